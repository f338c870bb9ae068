//! Sprocket Connection - Connections, commands and resilient execution
//!
//! This crate ties the catalog and binder to an execution provider:
//! `DbConnection` owns defaults and transaction state, `ProcedureCommand`
//! runs one bound call in any of the four execution modes and
//! `ResilientExecutor` repeats a call on fresh connections when it fails.

pub mod command;
mod config;
mod connection;
mod factory;
mod failure;
pub mod resilient;
mod scope;

pub use command::{ProcedureCommand, ProcedureReader};
pub use config::{DataConfig, RetrySettings, SchemaNames};
pub use connection::{DbConnection, DefaultParameterSource};
pub use factory::DatabaseFactory;
pub use failure::{FailureDecision, FailureHandler, LogAndPropagate, LogAndSwallow};
pub use resilient::{BackoffStrategy, ResilientExecutor, RetryPolicy};
pub use scope::ExecutionScope;
