use crate::orchestrator::types::{PipelineEvent, PipelineStage, PipelineState};
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid pipeline transition: {0}")]
pub struct InvalidTransition(pub String);

/// Per-file pipeline state with the visited states recorded
pub struct PipelineStateMachine {
    state: RwLock<PipelineState>,
    history: RwLock<Vec<PipelineState>>,
}

impl Default for PipelineStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStateMachine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PipelineState::Idle),
            history: RwLock::new(vec![PipelineState::Idle]),
        }
    }

    /// Get current state
    pub fn current_state(&self) -> PipelineState {
        self.state.read().clone()
    }

    /// Every state entered so far, oldest first
    pub fn history(&self) -> Vec<PipelineState> {
        self.history.read().clone()
    }

    /// Transition state based on event
    pub fn transition(&self, event: PipelineEvent) -> Result<PipelineState, InvalidTransition> {
        let mut state = self.state.write();

        let new_state = match (&*state, &event) {
            (PipelineState::Idle, PipelineEvent::Begin) => PipelineState::Validating,

            // Transform is skipped for files that do not need one
            (PipelineState::Validating, PipelineEvent::ValidationPassed { needs_transform }) => {
                if *needs_transform {
                    PipelineState::Transforming
                } else {
                    PipelineState::Transferring
                }
            }

            (PipelineState::Transforming, PipelineEvent::TransformDone) => {
                PipelineState::Transferring
            }

            (PipelineState::Transferring, PipelineEvent::TransferDone) => {
                PipelineState::Confirming
            }

            (PipelineState::Confirming, PipelineEvent::ConfirmationDone) => PipelineState::Done,

            // Any running stage may fail
            (current, PipelineEvent::StageFailed { error })
                if !current.is_terminal() && *current != PipelineState::Idle =>
            {
                PipelineState::Failed {
                    stage: current.stage(),
                    error: error.clone(),
                }
            }

            _ => {
                return Err(InvalidTransition(format!(
                    "Cannot handle {:?} in state {:?}",
                    event, *state
                )));
            }
        };

        *state = new_state.clone();
        self.history.write().push(new_state.clone());
        Ok(new_state)
    }

    pub fn stage(&self) -> PipelineStage {
        self.state.read().stage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_creation() {
        let sm = PipelineStateMachine::new();
        assert_eq!(sm.current_state(), PipelineState::Idle);
    }

    #[test]
    fn test_full_path_with_transform() {
        let sm = PipelineStateMachine::new();
        sm.transition(PipelineEvent::Begin).unwrap();
        sm.transition(PipelineEvent::ValidationPassed {
            needs_transform: true,
        })
        .unwrap();
        sm.transition(PipelineEvent::TransformDone).unwrap();
        sm.transition(PipelineEvent::TransferDone).unwrap();
        sm.transition(PipelineEvent::ConfirmationDone).unwrap();

        assert_eq!(
            sm.history(),
            vec![
                PipelineState::Idle,
                PipelineState::Validating,
                PipelineState::Transforming,
                PipelineState::Transferring,
                PipelineState::Confirming,
                PipelineState::Done,
            ]
        );
    }

    #[test]
    fn test_transform_skipped() {
        let sm = PipelineStateMachine::new();
        sm.transition(PipelineEvent::Begin).unwrap();
        let state = sm
            .transition(PipelineEvent::ValidationPassed {
                needs_transform: false,
            })
            .unwrap();

        assert_eq!(state, PipelineState::Transferring);
        assert!(sm.transition(PipelineEvent::TransformDone).is_err());
    }

    #[test]
    fn test_failure_records_stage() {
        let sm = PipelineStateMachine::new();
        sm.transition(PipelineEvent::Begin).unwrap();
        sm.transition(PipelineEvent::StageFailed {
            error: "EMPTY_FILE".into(),
        })
        .unwrap();

        match sm.current_state() {
            PipelineState::Failed { stage, error } => {
                assert_eq!(stage, PipelineStage::Validating);
                assert_eq!(error, "EMPTY_FILE");
            }
            other => panic!("Expected Failed state, got {other:?}"),
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let sm = PipelineStateMachine::new();
        sm.transition(PipelineEvent::Begin).unwrap();
        sm.transition(PipelineEvent::StageFailed {
            error: "boom".into(),
        })
        .unwrap();

        // No confirmation after a failure
        assert!(sm.transition(PipelineEvent::ConfirmationDone).is_err());
        assert!(sm
            .transition(PipelineEvent::StageFailed {
                error: "again".into()
            })
            .is_err());
    }

    #[test]
    fn test_invalid_transition() {
        let sm = PipelineStateMachine::new();

        // Cannot fail before starting
        let result = sm.transition(PipelineEvent::StageFailed {
            error: "early".into(),
        });
        assert!(result.is_err());
        assert!(sm.transition(PipelineEvent::TransferDone).is_err());
    }
}
