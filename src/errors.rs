//! Comprehensive error types for the archiver
//! Provides structured error handling using thiserror for better error reporting

use thiserror::Error;

/// Main error type for the archiver application
#[derive(Error, Debug)]
pub enum ArchiverError {
    /// Database connection related errors
    #[error("database connection error: {message}")]
    Connection {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration related errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Message parsing errors
    #[error("message parsing error: {message}")]
    MessageParsing {
        message: String,
        context: Option<String>,
    },

    /// Protocol errors
    #[error("protocol error: {message}")]
    Protocol {
        message: String,
        context: Option<String>,
    },

    /// Table/buffer operation errors
    #[error("table operation error: {message}")]
    Table { message: String },

    /// Errors raised while compiling or evaluating a monitor expression
    #[error("expression error: {message}")]
    Expression { message: String },

    /// Errors raised by the monitor service (create/drop/subscribe/flush)
    #[error("monitor error: {message}")]
    Monitor { message: String },

    /// Actor dictionary reconciliation failures; always fatal
    #[error("actor error: {message}")]
    Actor { message: String },

    /// Network/IO related errors
    #[error("network IO error")]
    NetworkIO(#[from] std::io::Error),

    /// String conversion errors
    #[error("string conversion error")]
    StringConversion(#[from] std::string::FromUtf8Error),

    /// Task execution errors for async operations
    #[error("task execution error")]
    TaskExecution(#[from] tokio::task::JoinError),

    #[error("backend error: {message}")]
    Backend { message: String },

    /// Generic error for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for convenience
pub type ArchiverResult<T> = std::result::Result<T, ArchiverError>;

impl ArchiverError {
    /// Create a connection error with context
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a message parsing error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::MessageParsing {
            message: message.into(),
            context: None,
        }
    }

    /// Create a message parsing error with context
    pub fn parse_with_context<S: Into<String>, C: Into<String>>(message: S, context: C) -> Self {
        Self::MessageParsing {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
            context: None,
        }
    }

    /// Create a table operation error
    pub fn table<S: Into<String>>(message: S) -> Self {
        Self::Table {
            message: message.into(),
        }
    }

    /// Create an expression error
    pub fn expression<S: Into<String>>(message: S) -> Self {
        Self::Expression {
            message: message.into(),
        }
    }

    /// Create a monitor error
    pub fn monitor<S: Into<String>>(message: S) -> Self {
        Self::Monitor {
            message: message.into(),
        }
    }

    /// Create an actor reconciliation error. Callers that see this for a
    /// `dictionaryRequired` attach should treat it as fatal; see the actor
    /// module for the exact reconciliation matrix.
    pub fn actor<S: Into<String>>(message: S) -> Self {
        Self::Actor {
            message: message.into(),
        }
    }

    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}
