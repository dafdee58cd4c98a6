use crate::error::EngineError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Engine lifecycle: `Idle → Starting → Running → (Paused ↔ Running)* →
/// Stopping → Idle`. `Error` is terminal for the current session and
/// cleared by `stop()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Error,
}

pub struct StateManager {
    state: Arc<RwLock<EngineState>>,
    state_tx: Sender<EngineState>,
    state_rx: Receiver<EngineState>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(EngineState::Idle)),
            state_tx,
            state_rx,
        }
    }

    pub fn transition(&self, new_state: EngineState) -> Result<(), EngineError> {
        let mut current = self.state.write();

        let valid = matches!(
            (&*current, &new_state),
            (EngineState::Idle, EngineState::Starting)
                | (EngineState::Starting, EngineState::Running)
                | (EngineState::Starting, EngineState::Error)
                | (EngineState::Running, EngineState::Paused)
                | (EngineState::Paused, EngineState::Running)
                | (EngineState::Running, EngineState::Stopping)
                | (EngineState::Paused, EngineState::Stopping)
                | (EngineState::Running, EngineState::Error)
                | (EngineState::Paused, EngineState::Error)
                | (EngineState::Error, EngineState::Stopping)
                | (EngineState::Stopping, EngineState::Idle)
        );

        if !valid {
            return Err(EngineError::Fatal(format!(
                "Invalid state transition: {:?} -> {:?}",
                *current, new_state
            )));
        }

        tracing::info!("State transition: {:?} -> {:?}", *current, new_state);
        *current = new_state.clone();
        let _ = self.state_tx.send(new_state);
        Ok(())
    }

    pub fn current(&self) -> EngineState {
        self.state.read().clone()
    }

    pub fn subscribe(&self) -> Receiver<EngineState> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle_is_valid() {
        let sm = StateManager::new();
        for s in [
            EngineState::Starting,
            EngineState::Running,
            EngineState::Paused,
            EngineState::Running,
            EngineState::Stopping,
            EngineState::Idle,
        ] {
            sm.transition(s).unwrap();
        }
        assert_eq!(sm.current(), EngineState::Idle);
    }

    #[test]
    fn idle_to_running_is_rejected() {
        let sm = StateManager::new();
        assert!(sm.transition(EngineState::Running).is_err());
        assert_eq!(sm.current(), EngineState::Idle);
    }

    #[test]
    fn error_exits_via_stop_only() {
        let sm = StateManager::new();
        sm.transition(EngineState::Starting).unwrap();
        sm.transition(EngineState::Error).unwrap();
        assert!(sm.transition(EngineState::Running).is_err());
        sm.transition(EngineState::Stopping).unwrap();
        sm.transition(EngineState::Idle).unwrap();
    }

    #[test]
    fn subscribers_see_transitions_in_order() {
        let sm = StateManager::new();
        let rx = sm.subscribe();
        sm.transition(EngineState::Starting).unwrap();
        sm.transition(EngineState::Running).unwrap();
        assert_eq!(rx.recv().unwrap(), EngineState::Starting);
        assert_eq!(rx.recv().unwrap(), EngineState::Running);
    }
}
