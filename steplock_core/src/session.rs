//! Session store: bounded chat history per (viewer, agent).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use steplock_env::{AgentId, Role, ViewerId};

/// One chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    /// Step in which the message was applied
    pub step: u64,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>, step: u64) -> Self {
        Self {
            role,
            text: text.into(),
            step,
        }
    }
}

/// Ordered history of one conversation, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session {
    messages: VecDeque<Message>,
}

impl Session {
    /// Appends a message, evicting the oldest one once `cap` is exceeded.
    ///
    /// Returns the evicted message, if any.
    pub fn push(&mut self, message: Message, cap: usize) -> Option<Message> {
        self.messages.push_back(message);
        if self.messages.len() > cap {
            self.messages.pop_front()
        } else {
            None
        }
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.back()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Every viewer's sessions, keyed viewer first.
///
/// Sessions are created lazily when a viewer or agent becomes known and
/// survive viewer disconnects; only an explicit clear drops history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStore {
    cap: usize,
    sessions: BTreeMap<ViewerId, BTreeMap<AgentId, Session>>,
}

impl SessionStore {
    /// Creates an empty store keeping at most `cap` messages per session.
    /// A `cap` of 0 is treated as 1.
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            sessions: BTreeMap::new(),
        }
    }

    /// Maximum messages per session.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Makes the viewer known, with an empty session for each given agent.
    ///
    /// Returns true if the viewer was new.
    pub fn ensure_viewer<'a>(
        &mut self,
        viewer: ViewerId,
        agents: impl IntoIterator<Item = &'a AgentId>,
    ) -> bool {
        let is_new = !self.sessions.contains_key(&viewer);
        let sessions = self.sessions.entry(viewer).or_default();
        for agent in agents {
            sessions.entry(agent.clone()).or_default();
        }
        is_new
    }

    /// Creates an empty session for the agent under every known viewer.
    pub fn ensure_agent(&mut self, agent: &AgentId) {
        for sessions in self.sessions.values_mut() {
            sessions.entry(agent.clone()).or_default();
        }
    }

    /// Appends a message, creating the session if needed.
    ///
    /// Returns the evicted oldest message when the cap was exceeded.
    pub fn append(&mut self, viewer: ViewerId, agent: &AgentId, message: Message) -> Option<Message> {
        let cap = self.cap;
        self.sessions
            .entry(viewer)
            .or_default()
            .entry(agent.clone())
            .or_default()
            .push(message, cap)
    }

    /// Clears one session, or with `agent = None` resets all of the viewer's
    /// sessions to empty ones for the given agents.
    pub fn clear<'a>(
        &mut self,
        viewer: ViewerId,
        agent: Option<&AgentId>,
        registered: impl IntoIterator<Item = &'a AgentId>,
    ) {
        match agent {
            Some(agent) => {
                self.sessions
                    .entry(viewer)
                    .or_default()
                    .entry(agent.clone())
                    .or_default()
                    .clear();
            }
            None => {
                let fresh = registered
                    .into_iter()
                    .map(|agent| (agent.clone(), Session::default()))
                    .collect();
                self.sessions.insert(viewer, fresh);
            }
        }
    }

    /// The session for a viewer and agent, if one exists.
    pub fn session(&self, viewer: ViewerId, agent: &AgentId) -> Option<&Session> {
        self.sessions.get(&viewer)?.get(agent)
    }

    /// Number of messages in a session (0 if it does not exist).
    pub fn history_len(&self, viewer: ViewerId, agent: &AgentId) -> usize {
        self.session(viewer, agent).map_or(0, Session::len)
    }

    /// Known viewers, in id order.
    pub fn viewers(&self) -> impl Iterator<Item = ViewerId> + '_ {
        self.sessions.keys().copied()
    }

    /// Agents with a session for the viewer, in id order.
    pub fn agents_of(&self, viewer: ViewerId) -> impl Iterator<Item = &AgentId> + '_ {
        self.sessions.get(&viewer).into_iter().flat_map(|s| s.keys())
    }

    pub fn is_known(&self, viewer: ViewerId) -> bool {
        self.sessions.contains_key(&viewer)
    }

    /// Total messages stored across every session.
    pub fn total_messages(&self) -> usize {
        self.sessions
            .values()
            .flat_map(|s| s.values())
            .map(Session::len)
            .sum()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(crate::config::HISTORY_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> AgentId {
        AgentId::parse(raw).unwrap()
    }

    #[test]
    fn test_append_creates_session_lazily() {
        let mut store = SessionStore::new(100);
        let scout = id("scout");
        let viewer = ViewerId(1);

        assert!(store.session(viewer, &scout).is_none());
        store.append(viewer, &scout, Message::new(Role::User, "hello", 1));

        let session = store.session(viewer, &scout).unwrap();
        assert_eq!(session.len(), 1);
        let first = session.messages().next().unwrap();
        assert_eq!(first.role, Role::User);
        assert_eq!(first.text, "hello");
    }

    #[test]
    fn test_cap_keeps_most_recent_in_order() {
        let mut store = SessionStore::new(100);
        let agent = id("default");
        let viewer = ViewerId(1);

        let mut evicted = 0;
        for n in 0..250u64 {
            if store.append(viewer, &agent, Message::new(Role::Agent, n.to_string(), n)).is_some() {
                evicted += 1;
            }
        }

        assert_eq!(evicted, 150);
        let texts: Vec<_> = store
            .session(viewer, &agent)
            .unwrap()
            .messages()
            .map(|m| m.text.clone())
            .collect();
        let expected: Vec<_> = (150..250u64).map(|n| n.to_string()).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn test_reading_never_evicts() {
        let mut store = SessionStore::new(2);
        let agent = id("a");
        store.append(ViewerId(1), &agent, Message::new(Role::User, "x", 0));
        store.append(ViewerId(1), &agent, Message::new(Role::User, "y", 0));

        for _ in 0..5 {
            assert_eq!(store.history_len(ViewerId(1), &agent), 2);
        }
    }

    #[test]
    fn test_ensure_agent_reaches_every_known_viewer() {
        let mut store = SessionStore::new(100);
        let a = id("a");
        store.ensure_viewer(ViewerId(1), [&a]);
        store.ensure_viewer(ViewerId(2), [&a]);

        let b = id("b");
        store.ensure_agent(&b);

        assert!(store.session(ViewerId(1), &b).is_some());
        assert!(store.session(ViewerId(2), &b).is_some());
    }

    #[test]
    fn test_clear_one_agent() {
        let mut store = SessionStore::new(100);
        let (a, b) = (id("a"), id("b"));
        store.append(ViewerId(1), &a, Message::new(Role::User, "1", 0));
        store.append(ViewerId(1), &b, Message::new(Role::User, "2", 0));

        store.clear(ViewerId(1), Some(&a), [&a, &b]);

        assert_eq!(store.history_len(ViewerId(1), &a), 0);
        assert_eq!(store.history_len(ViewerId(1), &b), 1);
    }

    #[test]
    fn test_clear_all_recreates_registered_sessions() {
        let mut store = SessionStore::new(100);
        let (a, b, gone) = (id("a"), id("b"), id("gone"));
        store.append(ViewerId(1), &a, Message::new(Role::User, "1", 0));
        store.append(ViewerId(1), &gone, Message::new(Role::User, "2", 0));
        store.append(ViewerId(2), &a, Message::new(Role::User, "3", 0));

        store.clear(ViewerId(1), None, [&a, &b]);

        let agents: Vec<_> = store.agents_of(ViewerId(1)).map(|a| a.as_str()).collect();
        assert_eq!(agents, vec!["a", "b"]);
        assert_eq!(store.history_len(ViewerId(1), &a), 0);
        // Other viewers untouched
        assert_eq!(store.history_len(ViewerId(2), &a), 1);
    }

    #[test]
    fn test_json_keys_survive_reload() {
        let mut store = SessionStore::new(10);
        store.append(ViewerId(7), &id("a"), Message::new(Role::System, "note", 3));

        let json = serde_json::to_string(&store).unwrap();
        let back: SessionStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
    }
}
