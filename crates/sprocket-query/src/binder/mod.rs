//! Procedure Parameter Binder
//!
//! Resolves the value of every parameter in a procedure signature from, in
//! order of precedence, the caller's values and the connection defaults,
//! coercing each onto the declared parameter type.
//!
//! # Example
//!
//! ```
//! use sprocket_core::{DataType, ParameterDescriptor, SuppliedParameter, Value};
//! use sprocket_query::{BinderOptions, DefaultParameterSet, bind_parameters};
//!
//! let signature = vec![
//!     ParameterDescriptor::input("@id", DataType::Int32),
//!     ParameterDescriptor::input("@active", DataType::Boolean),
//! ];
//! let supplied = [
//!     SuppliedParameter::input("id", 5),
//!     SuppliedParameter::input("active", "false"),
//! ];
//!
//! let bound = bind_parameters(
//!     signature,
//!     &supplied,
//!     &DefaultParameterSet::new(),
//!     &BinderOptions::default(),
//! )
//! .unwrap();
//!
//! assert_eq!(bound[0].value, Some(Value::Int32(5)));
//! assert_eq!(bound[1].value, Some(Value::Bool(false)));
//! ```

mod coercion;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sprocket_core::{
    BoundParameter, ParameterDescriptor, ParameterDirection, SprocketError, SuppliedParameter,
    Value,
};
use thiserror::Error;

pub use coercion::{BooleanTokens, CoercionRule};

/// Errors that can occur during parameter binding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BindError {
    /// A supplied value could not be converted to the parameter's type.
    #[error("cannot coerce value for {parameter}: {message}")]
    Coercion { parameter: String, message: String },
}

impl BindError {
    /// Name of the parameter that failed to bind.
    pub fn parameter(&self) -> &str {
        match self {
            BindError::Coercion { parameter, .. } => parameter,
        }
    }
}

impl From<BindError> for SprocketError {
    fn from(err: BindError) -> Self {
        let parameter = err.parameter().to_string();
        SprocketError::Bind {
            parameter,
            message: err.to_string(),
        }
    }
}

/// Result type for parameter binding operations.
pub type BindResult<T> = Result<T, BindError>;

/// Per-connection knobs for value coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BinderOptions {
    #[serde(default)]
    pub boolean_tokens: BooleanTokens,
}

impl BinderOptions {
    pub fn with_boolean_tokens(mut self, tokens: BooleanTokens) -> Self {
        self.boolean_tokens = tokens;
        self
    }
}

/// Coerce `source` onto the parameter described by `target`.
///
/// Returns `None` when the source carries no value for an output-capable
/// parameter; [`bind_parameters`] turns that into an explicit NULL.
pub fn assign_value(
    target: &ParameterDescriptor,
    source: &SuppliedParameter,
    options: &BinderOptions,
) -> BindResult<Option<Value>> {
    let Some(value) = source.value.as_ref() else {
        return Ok(match source.direction {
            ParameterDirection::Input => Some(Value::Null),
            _ => None,
        });
    };

    let rule = CoercionRule::select(target.data_type, source.data_type);
    rule.apply(value, options.boolean_tokens)
        .map(Some)
        .map_err(|message| BindError::Coercion {
            parameter: target.name.clone(),
            message,
        })
}

/// Bind caller values and connection defaults onto a procedure signature.
///
/// `signature` is consumed; pass a clone of the cached descriptors. Caller
/// values win over defaults. Supplied names that the signature does not
/// declare are ignored. Every parameter left without a value, input or
/// output, is bound to an explicit NULL; only the return value stays unset.
pub fn bind_parameters(
    signature: Vec<ParameterDescriptor>,
    supplied: &[SuppliedParameter],
    defaults: &crate::DefaultParameterSet,
    options: &BinderOptions,
) -> BindResult<Vec<BoundParameter>> {
    let by_name: HashMap<String, &SuppliedParameter> =
        supplied.iter().map(|p| (p.key(), p)).collect();

    let mut bound = Vec::with_capacity(signature.len());
    for descriptor in signature {
        let key = descriptor.key();
        let source = by_name
            .get(&key)
            .copied()
            .or_else(|| defaults.get(&descriptor.name));

        let value = match source {
            Some(source) => assign_value(&descriptor, source, options)?,
            None => None,
        };
        let value = match value {
            None if descriptor.direction != ParameterDirection::ReturnValue => Some(Value::Null),
            other => other,
        };
        bound.push(BoundParameter { descriptor, value });
    }

    for param in supplied {
        if !bound.iter().any(|b| b.descriptor.key() == param.key()) {
            tracing::trace!(parameter = %param.name, "supplied parameter not in signature, ignored");
        }
    }

    Ok(bound)
}

/// Bind parameters of a text command directly from the supplied values.
///
/// Text commands have no discovered signature: each descriptor is built
/// from its supplied parameter, named without the `@` prefix. Missing values
/// bind as explicit NULL.
pub fn bind_text_parameters(supplied: &[SuppliedParameter]) -> Vec<BoundParameter> {
    supplied
        .iter()
        .enumerate()
        .map(|(index, param)| {
            let descriptor = ParameterDescriptor {
                name: param.name.trim_start_matches('@').to_string(),
                direction: param.direction,
                data_type: param.data_type,
                size: 0,
                precision: 0,
                scale: 0,
                ordinal: index + 1,
            };
            BoundParameter::new(descriptor, param.value.clone().unwrap_or(Value::Null))
        })
        .collect()
}
