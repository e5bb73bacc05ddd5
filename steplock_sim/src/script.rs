//! Seeded command-script generator.
//!
//! Produces random but reproducible streams of commands and viewer inputs.
//! Same seed, same stream: a failing seed can always be replayed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use steplock_core::{Command, ViewerInput};
use steplock_env::{AgentId, Direction, ViewerId};

const WORDS: [&str; 12] = [
    "hello", "iron", "north", "base", "wood", "follow", "stop", "craft", "mine", "where", "ready",
    "done",
];

const TOOLS: [&str; 5] = ["mine", "craft", "walk_to", "inspect", "place"];

/// Relative weights of the generated command kinds.
#[derive(Debug, Clone, Copy)]
pub struct CommandMix {
    pub respond: u32,
    pub tool_status: u32,
    pub status: u32,
    pub clear: u32,
    pub register: u32,
    pub unregister: u32,
    pub movement: u32,
    pub observer: u32,
}

impl Default for CommandMix {
    fn default() -> Self {
        Self {
            respond: 30,
            tool_status: 8,
            status: 6,
            clear: 3,
            register: 8,
            unregister: 5,
            movement: 20,
            observer: 1,
        }
    }
}

impl CommandMix {
    /// Registry operations only.
    pub fn churn() -> Self {
        Self {
            respond: 10,
            tool_status: 0,
            status: 0,
            clear: 0,
            register: 45,
            unregister: 45,
            movement: 0,
            observer: 0,
        }
    }

    /// Movement directives only.
    pub fn movement() -> Self {
        Self {
            respond: 0,
            tool_status: 0,
            status: 0,
            clear: 0,
            register: 0,
            unregister: 0,
            movement: 100,
            observer: 0,
        }
    }

    fn total(&self) -> u32 {
        self.respond
            + self.tool_status
            + self.status
            + self.clear
            + self.register
            + self.unregister
            + self.movement
            + self.observer
    }
}

/// Deterministic generator of commands and viewer inputs.
pub struct ScriptGenerator {
    seed: u64,
    rng: ChaCha8Rng,
    viewers: u32,
    agents: Vec<AgentId>,
    mix: CommandMix,
}

impl ScriptGenerator {
    /// Creates a generator for `viewers` viewers (ids `1..=viewers`).
    pub fn new(seed: u64, viewers: u32) -> Self {
        let agents = ["default", "scout", "miner", "builder"]
            .iter()
            .filter_map(|raw| AgentId::parse(raw).ok())
            .collect();
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            viewers: viewers.max(1),
            agents,
            mix: CommandMix::default(),
        }
    }

    /// Replaces the pool of agent ids commands may name.
    pub fn with_agents(mut self, agents: &[&str]) -> Self {
        let parsed: Vec<AgentId> = agents
            .iter()
            .filter_map(|raw| AgentId::parse(raw).ok())
            .collect();
        if !parsed.is_empty() {
            self.agents = parsed;
        }
        self
    }

    pub fn with_mix(mut self, mix: CommandMix) -> Self {
        self.mix = mix;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn agents(&self) -> &[AgentId] {
        &self.agents
    }

    /// Up to `max` commands (possibly none).
    pub fn batch(&mut self, max: usize) -> Vec<Command> {
        let len = self.rng.gen_range(0..=max);
        (0..len).map(|_| self.next_command()).collect()
    }

    /// Up to `max` viewer inputs (possibly none).
    pub fn inputs(&mut self, max: usize) -> Vec<ViewerInput> {
        let len = self.rng.gen_range(0..=max);
        (0..len).map(|_| self.next_input()).collect()
    }

    /// One command, drawn from the configured mix. Always passes
    /// boundary validation.
    pub fn next_command(&mut self) -> Command {
        let total = self.mix.total().max(1);
        let mut roll = self.rng.gen_range(0..total);
        let mix = self.mix;

        let mut pick = |weight: u32| {
            if roll < weight {
                true
            } else {
                roll -= weight;
                false
            }
        };

        if pick(mix.respond) {
            Command::DeliverResponse {
                viewer: self.viewer(),
                agent: self.maybe_agent(),
                text: self.text(),
            }
        } else if pick(mix.tool_status) {
            Command::ToolStatus {
                viewer: self.viewer(),
                agent: self.maybe_agent(),
                tool: self.choose(&TOOLS).to_string(),
            }
        } else if pick(mix.status) {
            Command::SetStatus {
                viewer: self.viewer(),
                text: self.text(),
            }
        } else if pick(mix.clear) {
            Command::ClearSession {
                viewer: self.viewer(),
                agent: self.maybe_agent(),
            }
        } else if pick(mix.register) {
            let agent = self.agent();
            let label = self
                .rng
                .gen_bool(0.5)
                .then(|| format!("{} {}", agent, self.rng.gen_range(1..10)));
            Command::RegisterAgent { agent, label }
        } else if pick(mix.unregister) {
            Command::UnregisterAgent {
                agent: self.agent(),
            }
        } else if pick(mix.movement) {
            if self.rng.gen_bool(0.7) {
                Command::SetMovement {
                    agent: self.agent(),
                    direction: self.direction(),
                }
            } else {
                Command::StopMovement {
                    agent: self.agent(),
                }
            }
        } else {
            Command::SetObserverMode {
                enabled: self.rng.gen_bool(0.3),
            }
        }
    }

    /// One viewer input.
    pub fn next_input(&mut self) -> ViewerInput {
        let viewer = self.viewer();
        match self.rng.gen_range(0..10) {
            0 => ViewerInput::Joined { viewer },
            1 => ViewerInput::OpenSurface { viewer },
            2 => ViewerInput::CloseSurface { viewer },
            3 => ViewerInput::Resize {
                viewer,
                width: self.rng.gen_range(100..2000),
                height: self.rng.gen_range(100..1500),
            },
            4 | 5 => ViewerInput::SelectTab {
                viewer,
                agent: self.agent(),
            },
            _ => ViewerInput::Submit {
                viewer,
                text: self.text(),
            },
        }
    }

    pub fn viewer(&mut self) -> ViewerId {
        ViewerId(self.rng.gen_range(1..=self.viewers))
    }

    pub fn agent(&mut self) -> AgentId {
        let index = self.rng.gen_range(0..self.agents.len());
        self.agents[index].clone()
    }

    fn maybe_agent(&mut self) -> Option<AgentId> {
        if self.rng.gen_bool(0.3) {
            None
        } else {
            Some(self.agent())
        }
    }

    pub fn direction(&mut self) -> Direction {
        *self.choose(&Direction::ALL)
    }

    fn text(&mut self) -> String {
        let len = self.rng.gen_range(1..=4);
        (0..len)
            .map(|_| *self.choose(&WORDS))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn choose<'a, T, const N: usize>(&mut self, items: &'a [T; N]) -> &'a T {
        &items[self.rng.gen_range(0..N)]
    }
}
