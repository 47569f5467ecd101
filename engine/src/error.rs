use crate::fsm::{RaceEvent, RaceState};

/// Errors surfaced by the race engine.
///
/// Mismatched keystrokes and blocked deletions are not errors; they come
/// back as [`crate::matcher::MatchOutcome`] variants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RaceError {
    #[error("target text is empty")]
    EmptyText,

    #[error("custom text must be at least {min} characters (got {len})")]
    TextTooShort { len: usize, min: usize },

    #[error("no transition from {state:?} on {event:?}")]
    InvalidTransition { state: RaceState, event: RaceEvent },

    #[error("race is not accepting input in state {0:?}")]
    NotActive(RaceState),

    #[error("could not acquire race: {reason}")]
    Acquisition { reason: String },
}

impl RaceError {
    /// Acquisition failures leave the race idle and can be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RaceError::Acquisition { .. })
    }
}
