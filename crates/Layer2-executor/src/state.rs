//! Shard state machine

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Finished shards whose final state stays queryable
pub const FINISHED_STATES_RETAINED: usize = 256;

/// Lifecycle states of one shard invocation
///
/// `Preparing -> Created -> Running -> Awaiting -> Terminated | Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardState {
    /// Resolving storage, building mounts, pulling the image
    Preparing,

    /// Container created but not started
    Created,

    /// Container started
    Running,

    /// Following logs and waiting for the container to stop
    Awaiting,

    /// Container stopped with this exit code
    Terminated(i64),

    /// Invocation failed
    Failed(String),
}

impl ShardState {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShardState::Terminated(_) | ShardState::Failed(_))
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: &ShardState) -> bool {
        use ShardState::*;
        match (self, next) {
            (_, Failed(_)) => !self.is_terminal(),
            (Preparing, Created) => true,
            (Created, Running) => true,
            (Running, Awaiting) => true,
            (Awaiting, Terminated(_)) => true,
            _ => false,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ShardState::Preparing => "Preparing",
            ShardState::Created => "Created",
            ShardState::Running => "Running",
            ShardState::Awaiting => "Awaiting",
            ShardState::Terminated(_) => "Terminated",
            ShardState::Failed(_) => "Failed",
        }
    }
}

impl std::fmt::Display for ShardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardState::Terminated(code) => write!(f, "Terminated({})", code),
            _ => write!(f, "{}", self.display_name()),
        }
    }
}

/// Current state per shard ID
///
/// Active shards are always kept. Only the most recent `retain_finished`
/// terminal states survive, so a long-lived node does not grow without bound.
#[derive(Debug)]
pub struct ShardStates {
    inner: Mutex<StatesInner>,
    retain_finished: usize,
}

#[derive(Debug, Default)]
struct StatesInner {
    current: HashMap<String, ShardState>,
    /// Terminal shard IDs, oldest first
    finished: VecDeque<String>,
}

impl Default for ShardStates {
    fn default() -> Self {
        Self::new(FINISHED_STATES_RETAINED)
    }
}

impl ShardStates {
    pub fn new(retain_finished: usize) -> Self {
        Self {
            inner: Mutex::new(StatesInner::default()),
            retain_finished,
        }
    }

    pub fn get(&self, id: &str) -> Option<ShardState> {
        self.inner.lock().current.get(id).cloned()
    }

    /// Forget a shard before it runs again
    pub fn reset(&self, id: &str) {
        let mut inner = self.inner.lock();
        inner.current.remove(id);
        inner.finished.retain(|f| f != id);
    }

    /// Record `next` and return the state it replaced
    pub fn set(&self, id: &str, next: ShardState) -> Option<ShardState> {
        let mut inner = self.inner.lock();
        let terminal = next.is_terminal();
        let previous = inner.current.insert(id.to_string(), next);

        if terminal {
            inner.finished.retain(|f| f != id);
            inner.finished.push_back(id.to_string());
            while inner.finished.len() > self.retain_finished {
                if let Some(oldest) = inner.finished.pop_front() {
                    inner.current.remove(&oldest);
                }
            }
        }
        previous
    }

    pub fn len(&self) -> usize {
        self.inner.lock().current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(ShardState::Preparing.can_transition_to(&ShardState::Created));
        assert!(ShardState::Created.can_transition_to(&ShardState::Running));
        assert!(ShardState::Running.can_transition_to(&ShardState::Awaiting));
        assert!(ShardState::Awaiting.can_transition_to(&ShardState::Terminated(0)));
    }

    #[test]
    fn test_skipping_and_reversing_rejected() {
        assert!(!ShardState::Preparing.can_transition_to(&ShardState::Running));
        assert!(!ShardState::Awaiting.can_transition_to(&ShardState::Created));
        assert!(!ShardState::Terminated(0).can_transition_to(&ShardState::Failed("x".into())));
    }

    #[test]
    fn test_any_active_state_can_fail() {
        for state in [
            ShardState::Preparing,
            ShardState::Created,
            ShardState::Running,
            ShardState::Awaiting,
        ] {
            assert!(state.can_transition_to(&ShardState::Failed("boom".into())));
            assert!(!state.is_terminal());
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ShardState::Terminated(137).to_string(), "Terminated(137)");
        assert_eq!(ShardState::Awaiting.to_string(), "Awaiting");
    }

    #[test]
    fn test_finished_states_are_bounded() {
        let states = ShardStates::new(2);
        states.set("active:0", ShardState::Running);
        for i in 0..5 {
            let id = format!("job:{}", i);
            states.set(&id, ShardState::Preparing);
            states.set(&id, ShardState::Terminated(0));
        }

        assert_eq!(states.len(), 3);
        assert_eq!(states.get("active:0"), Some(ShardState::Running));
        assert_eq!(states.get("job:4"), Some(ShardState::Terminated(0)));
        assert_eq!(states.get("job:3"), Some(ShardState::Terminated(0)));
        assert_eq!(states.get("job:2"), None);
    }

    #[test]
    fn test_rerun_resets_retention_slot() {
        let states = ShardStates::new(1);
        states.set("a:0", ShardState::Failed("x".into()));
        states.reset("a:0");
        assert!(states.is_empty());

        states.set("a:0", ShardState::Preparing);
        states.set("b:0", ShardState::Terminated(1));
        assert_eq!(states.get("a:0"), Some(ShardState::Preparing));
        assert_eq!(
            states.set("a:0", ShardState::Failed("y".into())),
            Some(ShardState::Preparing)
        );
        assert_eq!(states.get("b:0"), None);
    }
}
