//! Sprocket Query - Procedure signatures, parameter binding and diagnostics
//!
//! This crate turns a procedure identity plus caller-supplied values into
//! the bound parameter list a provider executes:
//!
//! - [`ParameterCatalog`] caches discovered procedure signatures
//! - [`DefaultParameterSet`] holds connection-level fallback values
//! - [`bind_parameters`] resolves and coerces values onto a signature
//! - [`DiagnosticTrace`] renders the human-readable form of a bound call

pub mod binder;
mod catalog;
mod defaults;
mod diagnostics;

pub use binder::{
    BindError, BindResult, BinderOptions, BooleanTokens, CoercionRule, assign_value,
    bind_parameters, bind_text_parameters,
};
pub use catalog::{ParameterCatalog, ParameterDiscovery, ProviderDiscovery};
pub use defaults::DefaultParameterSet;
pub use diagnostics::DiagnosticTrace;

#[cfg(test)]
mod tests;
