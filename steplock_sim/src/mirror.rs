//! Presentation mirror: what each viewer's chat window would show.
//!
//! Rebuilt purely from presentation events, then compared against the core
//! state. Displayed history must never diverge from stored history.

use std::collections::{BTreeMap, VecDeque};
use steplock_core::CoreState;
use steplock_env::{AgentId, PresentationAdapter, PresentationEvent, Role, SurfaceHandle, ViewerId};

/// One viewer's rendered window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowMirror {
    pub surface: Option<SurfaceHandle>,
    pub tabs: Vec<(AgentId, String)>,
    pub active: Option<AgentId>,
    pub messages: BTreeMap<AgentId, VecDeque<(Role, String)>>,
    pub badges: BTreeMap<AgentId, u32>,
    pub status: String,
    pub size: Option<(u32, u32)>,
    pub observer: bool,
}

impl WindowMirror {
    fn reset(&mut self) {
        self.tabs.clear();
        self.active = None;
        self.messages.clear();
        self.badges.clear();
    }
}

/// Presentation adapter that renders into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorPresentation {
    cap: usize,
    windows: BTreeMap<ViewerId, WindowMirror>,
    events_seen: u64,
}

impl MirrorPresentation {
    /// Creates a mirror whose rendered lists keep at most `cap` messages.
    /// A `cap` of 0 is treated as 1, matching the session store.
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            windows: BTreeMap::new(),
            events_seen: 0,
        }
    }

    pub fn window(&self, viewer: ViewerId) -> Option<&WindowMirror> {
        self.windows.get(&viewer)
    }

    pub fn events_seen(&self) -> u64 {
        self.events_seen
    }

    /// Rendered messages of one tab, oldest first.
    pub fn rendered(&self, viewer: ViewerId, agent: &AgentId) -> Vec<(Role, String)> {
        self.windows
            .get(&viewer)
            .and_then(|w| w.messages.get(agent))
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Checks every open window against the state it mirrors.
    ///
    /// Tabs must follow the registry, the selected tab the active agent,
    /// badges the unread counts, and every tab's rendered list the stored
    /// session exactly.
    pub fn verify(&self, state: &CoreState) -> Result<(), String> {
        for (viewer, view) in state.viewers() {
            if view.surface.is_some() && !self.windows.contains_key(&viewer) {
                return Err(format!("{viewer}: surface open but never rendered"));
            }
        }

        for (viewer, window) in &self.windows {
            let Some(view) = state.viewer(*viewer) else {
                return Err(format!("{viewer}: window for an unknown viewer"));
            };
            if window.surface != view.surface {
                return Err(format!(
                    "{viewer}: surface {:?} rendered, {:?} stored",
                    window.surface, view.surface
                ));
            }
            if window.surface.is_none() {
                continue;
            }

            let registered: Vec<(AgentId, String)> = state
                .registry()
                .iter()
                .map(|a| (a.id.clone(), a.label.clone()))
                .collect();
            if window.tabs != registered {
                return Err(format!("{viewer}: tabs {:?} != registry {:?}", window.tabs, registered));
            }

            if window.active.as_ref() != Some(&view.active_agent) {
                return Err(format!(
                    "{viewer}: selected tab {:?} != active agent {}",
                    window.active, view.active_agent
                ));
            }

            let badges: BTreeMap<_, _> = window
                .badges
                .iter()
                .filter(|(_, n)| **n > 0)
                .map(|(a, n)| (a.clone(), *n))
                .collect();
            if badges != view.badges {
                return Err(format!("{viewer}: badges {:?} != {:?}", badges, view.badges));
            }

            for (agent, _) in &window.tabs {
                let stored: Vec<(Role, String)> = state
                    .sessions()
                    .session(*viewer, agent)
                    .map(|s| s.messages().map(|m| (m.role, m.text.clone())).collect())
                    .unwrap_or_default();
                let rendered = self.rendered(*viewer, agent);
                if rendered != stored {
                    return Err(format!(
                        "{viewer}/{agent}: {} rendered messages, {} stored",
                        rendered.len(),
                        stored.len()
                    ));
                }
            }
        }
        Ok(())
    }
}

impl PresentationAdapter for MirrorPresentation {
    fn notify(&mut self, event: &PresentationEvent) {
        self.events_seen += 1;
        let cap = self.cap;
        let window = self.windows.entry(event.viewer()).or_default();

        match event {
            PresentationEvent::OpenSurface { handle, .. } => {
                window.reset();
                window.surface = Some(*handle);
            }
            PresentationEvent::CloseSurface { .. } => {
                window.reset();
                window.surface = None;
            }
            PresentationEvent::AppendMessage { agent, role, text, .. } => {
                let list = window.messages.entry(agent.clone()).or_default();
                list.push_back((*role, text.clone()));
                while list.len() > cap {
                    list.pop_front();
                }
            }
            PresentationEvent::SetStatus { text, .. } => window.status = text.clone(),
            PresentationEvent::AddTab { agent, label, .. } => {
                if !window.tabs.iter().any(|(a, _)| a == agent) {
                    window.tabs.push((agent.clone(), label.clone()));
                }
            }
            PresentationEvent::RelabelTab { agent, label, .. } => {
                if let Some(tab) = window.tabs.iter_mut().find(|(a, _)| a == agent) {
                    tab.1 = label.clone();
                }
            }
            PresentationEvent::RemoveTab { agent, .. } => {
                window.tabs.retain(|(a, _)| a != agent);
                window.messages.remove(agent);
                window.badges.remove(agent);
            }
            PresentationEvent::SelectTab { agent, .. } => {
                window.active = Some(agent.clone());
                window.badges.remove(agent);
            }
            PresentationEvent::IncrementBadge { agent, .. } => {
                *window.badges.entry(agent.clone()).or_insert(0) += 1;
            }
            PresentationEvent::ClearMessages { agent, .. } => match agent {
                Some(agent) => {
                    window.messages.remove(agent);
                    window.badges.remove(agent);
                }
                None => {
                    window.messages.clear();
                    window.badges.clear();
                }
            },
            PresentationEvent::ResizeSurface { width, height, .. } => {
                window.size = Some((*width, *height));
            }
            PresentationEvent::ObserverMode { enabled, .. } => window.observer = *enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(raw: &str) -> AgentId {
        AgentId::parse(raw).unwrap()
    }

    fn append(viewer: u32, text: &str) -> PresentationEvent {
        PresentationEvent::AppendMessage {
            viewer: ViewerId(viewer),
            agent: agent("a"),
            role: Role::Agent,
            text: text.into(),
        }
    }

    #[test]
    fn test_rendered_list_applies_cap() {
        let mut mirror = MirrorPresentation::new(3);
        for n in 0..5 {
            mirror.notify(&append(1, &n.to_string()));
        }

        let texts: Vec<_> = mirror
            .rendered(ViewerId(1), &agent("a"))
            .into_iter()
            .map(|(_, t)| t)
            .collect();
        assert_eq!(texts, vec!["2", "3", "4"]);
        assert_eq!(mirror.events_seen(), 5);
    }

    #[test]
    fn test_open_resets_window() {
        let mut mirror = MirrorPresentation::new(10);
        mirror.notify(&append(1, "stale"));
        mirror.notify(&PresentationEvent::OpenSurface { viewer: ViewerId(1), handle: SurfaceHandle(4) });

        let window = mirror.window(ViewerId(1)).unwrap();
        assert_eq!(window.surface, Some(SurfaceHandle(4)));
        assert!(window.messages.is_empty());
    }

    #[test]
    fn test_select_clears_badge() {
        let mut mirror = MirrorPresentation::new(10);
        let badge = PresentationEvent::IncrementBadge { viewer: ViewerId(1), agent: agent("b") };
        mirror.notify(&badge);
        mirror.notify(&badge);
        assert_eq!(mirror.window(ViewerId(1)).unwrap().badges[&agent("b")], 2);

        mirror.notify(&PresentationEvent::SelectTab { viewer: ViewerId(1), agent: agent("b") });
        assert!(mirror.window(ViewerId(1)).unwrap().badges.is_empty());
    }
}
