use thiserror::Error;

/// Recoverable interaction failures. The session resets the affected flag
/// and re-arms listening or allows a retry; none of these end the session.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("speech recognizer failed to start: {0}")]
    RecognizerStart(String),
    #[error("emergency action failed: {0}")]
    EmergencyAction(String),
    #[error("unknown language: {0:?}")]
    UnknownLanguage(String),
    #[error("session closed")]
    SessionClosed,
}
