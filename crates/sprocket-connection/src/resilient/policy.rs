//! Which failures a resilient call repeats

use serde::{Deserialize, Serialize};
use sprocket_core::{FailureClass, SprocketError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Repeat timeouts, deadlocks, dropped connections and throttling only
    #[default]
    TransientOnly,
    /// Repeat every failure, including constraint violations and bad input
    All,
}

impl RetryPolicy {
    pub fn should_retry(self, error: &SprocketError) -> bool {
        if matches!(error, SprocketError::Cancelled) {
            return false;
        }
        match self {
            RetryPolicy::TransientOnly => error.failure_class() == FailureClass::Transient,
            RetryPolicy::All => true,
        }
    }
}
