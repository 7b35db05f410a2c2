use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Worker lifecycle states. `Starting` and `Stopping` belong to the
/// supervisor's own operations; the two extra edges into and out of
/// `Running` are reserved for health reconciliation (adopting a worker
/// that is already up, demoting one that died silently).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(State, State),
}

pub struct StateMachine {
    pub state: State,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            state: State::Stopped,
        }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_transition(&self, to: &State) -> bool {
        matches!(
            (&self.state, to),
            (State::Stopped, State::Starting)
                | (State::Stopped, State::Running)
                | (State::Starting, State::Running)
                | (State::Starting, State::Stopped)
                | (State::Running, State::Stopping)
                | (State::Running, State::Stopped)
                | (State::Stopping, State::Stopped)
        )
    }

    pub fn transition(&mut self, to: State) -> Result<(), TransitionError> {
        if self.can_transition(&to) {
            tracing::info!("State transition: {:?} -> {:?}", self.state, to);
            self.state = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.state, to))
        }
    }
}
