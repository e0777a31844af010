use thiserror::Error;

/// Failure taxonomy for the journal engine.
///
/// `UserDeclined` is deliberately absent: declining a confirmation is a normal
/// outcome and is reported as `false`/`Declined` by the operations concerned.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A note, entries file, headings index, or cache file is missing.
    /// Recoverable; callers warn and fall back to a safe default.
    #[error("not found: {0}")]
    NotFound(String),

    /// A malformed binary entry record. Fatal to the note being decoded,
    /// never to the whole load.
    #[error("corrupt entry record: {0}")]
    CorruptRecord(String),

    /// An operation was applied to an id outside the expected set.
    /// Programmer error; raised immediately.
    #[error("invalid state: {0}")]
    InvalidState(String),
}
