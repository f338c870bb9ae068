//! Bounded retry of procedure calls
//!
//! Every attempt runs on a fresh clone of a template connection, so a
//! failed attempt never leaves state behind for the next one.
//!
//! # Example
//!
//! ```ignore
//! use sprocket_connection::{BackoffStrategy, ResilientExecutor};
//!
//! let executor = ResilientExecutor::new(3, BackoffStrategy::fixed(100));
//! let rows = executor
//!     .execute_non_query(
//!         &template,
//!         "",
//!         "SaveOrder",
//!         |cmd| {
//!             cmd.add_in_parameter("@orderId", 42);
//!         },
//!         |_| {},
//!     )
//!     .await?;
//! ```

mod backoff;
mod executor;
mod policy;

#[cfg(test)]
mod tests;

pub use backoff::BackoffStrategy;
pub use executor::ResilientExecutor;
pub use policy::RetryPolicy;
