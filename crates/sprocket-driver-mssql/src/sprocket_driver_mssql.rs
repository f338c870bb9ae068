//! MS SQL Server execution provider for Sprocket
//!
//! Procedures run as single T-SQL batches over tiberius; parameter
//! signatures come from `sys.parameters`. Server error numbers decide
//! whether a failure is worth retrying.

mod batch;
mod connection;
mod error;
mod provider;

#[cfg(test)]
mod batch_tests;
#[cfg(test)]
mod connection_tests;
#[cfg(test)]
mod error_tests;

pub use connection::MssqlConnection;
pub use error::{MssqlConnectionError, TRANSIENT_ERROR_NUMBERS, classify, classify_code};
pub use provider::MssqlProvider;
