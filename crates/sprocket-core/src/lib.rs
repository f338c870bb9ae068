//! Sprocket Core - Core abstractions for stored-procedure execution
//!
//! This crate provides the types and traits that the other Sprocket crates
//! build on. It defines:
//!
//! - `Value`, `DataType`, `Row` - the value model shared with drivers
//! - `ParameterDescriptor`, `BoundParameter`, `SuppliedParameter` - parameter signatures and bindings
//! - `ProcedureIdentity` - case-insensitive catalog key for a stored procedure
//! - `ExecutionProvider` / `ProviderConnection` / `RowCursor` - the driver boundary
//! - `SprocketError` - the error taxonomy and transient/fatal classification

mod command;
mod error;
mod identity;
mod parameter;
mod provider;
mod types;

#[cfg(feature = "test-support")]
pub mod testing;

#[cfg(test)]
mod tests;

pub use command::*;
pub use error::*;
pub use identity::*;
pub use parameter::*;
pub use provider::*;
pub use types::*;
