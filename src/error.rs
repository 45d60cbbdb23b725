use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the `CoordinationStore` backend.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("no such node: {0}")]
    NoNode(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("coordination-store session error: {0}")]
    Session(String),

    #[error("coordination-store operation failed: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether a retry with backoff is worth attempting for this error.
    ///
    /// `NoNode`/`NodeExists` are structural and retrying them blindly
    /// would just repeat the same outcome; only session/backend faults
    /// are treated as transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Session(_) | StoreError::Backend(_))
    }
}

/// Errors that can prevent the coordination client from ever connecting.
#[derive(Error, Debug, Clone)]
pub enum ConnectError {
    #[error("timed out waiting for coordination-store connection after {0:?}")]
    Timeout(Duration),

    #[error("authentication with coordination store failed: {0}")]
    Auth(StoreError),

    #[error("coordination-store connect failed: {0}")]
    Unhandled(StoreError),
}

/// Fatal errors that terminate a leadership event stream.
#[derive(Error, Debug, Clone)]
pub enum ElectionError {
    #[error("coordination-store connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("no such node after {0} startup retries")]
    StartupRetriesExhausted(u32),

    #[error("participant read failed: {0}")]
    ParticipantRead(StoreError),

    #[error("candidate id {0:?} observed {1} times among participants")]
    DuplicateIdentity(String, usize),

    #[error("no leadership event was emitted within {0:?} of stream start")]
    InitialConnectTimeout(Duration),

    #[error("leader latch failed to start: {0}")]
    LatchStart(StoreError),
}
