use thiserror::Error;

use crate::battery::TestKind;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Result sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Stimulus error: {0}")]
    Stimulus(#[from] StimulusError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result Sink (persistent tabular store) errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("No result row for user: {unique_id}")]
    RecordNotFound { unique_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Stimulus Provider errors
#[derive(Debug, Error)]
pub enum StimulusError {
    /// The provider has nothing left to offer for this test. Fatal to the
    /// current run, never to the application.
    #[error("No content available for {kind} at iteration {iteration}")]
    NoContent { kind: TestKind, iteration: u32 },

    #[error("Malformed content for {kind}: {message}")]
    Malformed { kind: TestKind, message: String },
}

/// Chat transport errors (message could not be created, edited or removed)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to send message to chat {chat_id}: {message}")]
    Send { chat_id: i64, message: String },

    #[error("Failed to edit message {message_id} in chat {chat_id}: {message}")]
    Edit {
        chat_id: i64,
        message_id: i64,
        message: String,
    },

    #[error("Failed to delete message {message_id} in chat {chat_id}: {message}")]
    Delete {
        chat_id: i64,
        message_id: i64,
        message: String,
    },

    #[error("Transport closed")]
    Closed,
}

/// Session Registry / Dispatcher errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("A {active} test is already running in this chat")]
    TestAlreadyActive { active: TestKind },

    #[error("No active test in this chat")]
    NoActiveTest,

    #[error("Unknown test: {name}")]
    UnknownTest { name: String },

    #[error("No profile registered for this chat")]
    NoProfile,
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for Result Sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Result type alias for Stimulus Provider operations
pub type StimulusResult<T> = Result<T, StimulusError>;

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
