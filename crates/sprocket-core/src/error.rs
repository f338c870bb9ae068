//! Error types for Sprocket

use thiserror::Error;

/// Whether a failure is expected to succeed when the call is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Timeouts, deadlocks, dropped connections, throttling
    Transient,
    /// Constraint violations, bad parameters, missing objects
    Fatal,
}

/// A failure reported by an execution provider.
///
/// Providers classify their own failures because only they know which
/// native error numbers denote transient conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    /// Native error number, if the backend reported one
    pub code: Option<i32>,
    /// Backend message
    pub message: String,
    /// Provider classification
    pub class: FailureClass,
}

impl DriverError {
    /// A fatal driver failure without an error number.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            class: FailureClass::Fatal,
        }
    }

    /// A transient driver failure without an error number.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            class: FailureClass::Transient,
        }
    }

    /// Attach the backend's native error number.
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DriverError {}

/// Core error type for Sprocket operations
#[derive(Error, Debug)]
pub enum SprocketError {
    /// Missing or unresolvable connection identity.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Parameter introspection against the database failed.
    #[error("Parameter discovery failed for {procedure}: {source}")]
    ParameterDiscovery {
        procedure: String,
        #[source]
        source: Box<SprocketError>,
    },

    /// A bound command failed; carries the rendered statement and command text.
    #[error("Database layer exception: {source}\n:{statement}")]
    Execution {
        statement: String,
        command: String,
        #[source]
        source: Box<SprocketError>,
    },

    /// Commit or rollback without an active transaction.
    #[error("Transaction state error: {0}")]
    TransactionState(String),

    /// A supplied value could not be coerced onto its parameter.
    #[error("Cannot bind {parameter}: {message}")]
    Bind { parameter: String, message: String },

    /// A result-set column was read out of range or out of order.
    #[error("Reader error: {0}")]
    Reader(String),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    /// The retry budget ran out; `last` is the final attempt's failure.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<SprocketError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl SprocketError {
    /// Wrap a failure with the statement that was being executed.
    pub fn execution(
        statement: impl Into<String>,
        command: impl Into<String>,
        source: SprocketError,
    ) -> Self {
        SprocketError::Execution {
            statement: statement.into(),
            command: command.into(),
            source: Box::new(source),
        }
    }

    /// Classify this failure for retry purposes.
    ///
    /// Wrapping variants defer to the error they wrap.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            SprocketError::Driver(err) => err.class,
            SprocketError::Connection(_) | SprocketError::Timeout(_) | SprocketError::Io(_) => {
                FailureClass::Transient
            }
            SprocketError::ParameterDiscovery { source, .. }
            | SprocketError::Execution { source, .. } => source.failure_class(),
            SprocketError::RetriesExhausted { last, .. } => last.failure_class(),
            SprocketError::Configuration(_)
            | SprocketError::TransactionState(_)
            | SprocketError::Bind { .. }
            | SprocketError::Reader(_)
            | SprocketError::Cancelled
            | SprocketError::Other(_) => FailureClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.failure_class() == FailureClass::Transient
    }

    /// The rendered statement attached to this failure, if any.
    pub fn statement(&self) -> Option<&str> {
        match self {
            SprocketError::Execution { statement, .. } => Some(statement),
            SprocketError::RetriesExhausted { last, .. } => last.statement(),
            _ => None,
        }
    }

    /// The innermost driver failure, if this error chain contains one.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            SprocketError::Driver(err) => Some(err),
            SprocketError::ParameterDiscovery { source, .. }
            | SprocketError::Execution { source, .. } => source.driver_error(),
            SprocketError::RetriesExhausted { last, .. } => last.driver_error(),
            _ => None,
        }
    }
}

/// Result type alias for Sprocket operations
pub type Result<T> = std::result::Result<T, SprocketError>;
