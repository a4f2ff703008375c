use thiserror::Error;

use crate::phase::Phase;

/// Failure kinds surfaced by the coaching core.
///
/// Validator rejections are not errors — they are recoverable verdicts handled
/// inside the orchestrator (see `validator::Verdict`). Everything here either
/// crosses a component boundary or indicates the session cannot continue.
#[derive(Debug, Error)]
pub enum CoachError {
    /// A transition was requested that the phase ordering forbids
    /// (skipping forward or moving backward).
    #[error("invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },

    /// The session is not in a state that accepts this operation
    /// (e.g. an utterance after the session ended).
    #[error("session {session_id} is not active")]
    SessionNotActive { session_id: String },

    /// The language model endpoint failed or timed out. In-memory session
    /// state is left intact so the caller can retry the turn.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// The storage collaborator failed. In-memory session state is left
    /// intact so a retry does not lose conversational context.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// Stored session data failed to decode (e.g. a phase value outside the
    /// enumeration). This is a data-corruption condition, not something to
    /// guess a recovery for.
    #[error("corrupt session state: {0}")]
    CorruptState(String),
}

impl CoachError {
    /// True for failures the orchestrator propagates to the transport layer
    /// as a retry/reconnect condition rather than handling locally.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            CoachError::ModelUnavailable(_) | CoachError::PersistenceFailure(_)
        )
    }
}
