//! Pluggable handling of failed database calls

use std::fmt;

use sprocket_core::SprocketError;

/// What a command does with a failure once the handler has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Return the error to the caller
    Propagate,
    /// Report the mode's neutral result instead: `-1` rows, a NULL scalar,
    /// or a reader that simply returns
    Swallow,
}

/// Observes every failed command before it leaves the executor.
///
/// Closures of the right shape implement this trait, so a handler can be
/// written inline:
///
/// ```
/// use sprocket_connection::{FailureDecision, FailureHandler};
/// use sprocket_core::SprocketError;
///
/// let handler = |err: &SprocketError| {
///     if err.is_transient() { FailureDecision::Swallow } else { FailureDecision::Propagate }
/// };
/// assert_eq!(handler.on_failure(&SprocketError::Cancelled), FailureDecision::Propagate);
/// ```
pub trait FailureHandler: Send + Sync {
    fn on_failure(&self, error: &SprocketError) -> FailureDecision;
}

impl<F> FailureHandler for F
where
    F: Fn(&SprocketError) -> FailureDecision + Send + Sync,
{
    fn on_failure(&self, error: &SprocketError) -> FailureDecision {
        self(error)
    }
}

impl fmt::Debug for dyn FailureHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FailureHandler")
    }
}

/// Default handler: log the failure and return it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAndPropagate;

impl FailureHandler for LogAndPropagate {
    fn on_failure(&self, error: &SprocketError) -> FailureDecision {
        log_failure(error);
        FailureDecision::Propagate
    }
}

/// Log the failure and carry on with the neutral result.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAndSwallow;

impl FailureHandler for LogAndSwallow {
    fn on_failure(&self, error: &SprocketError) -> FailureDecision {
        log_failure(error);
        FailureDecision::Swallow
    }
}

/// Return every failure untouched and unlogged; for attempts whose outcome
/// is reported elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PassThrough;

impl FailureHandler for PassThrough {
    fn on_failure(&self, _error: &SprocketError) -> FailureDecision {
        FailureDecision::Propagate
    }
}

fn log_failure(error: &SprocketError) {
    tracing::error!(
        error = %error,
        transient = error.is_transient(),
        statement = error.statement().unwrap_or_default(),
        "database call failed"
    );
}
