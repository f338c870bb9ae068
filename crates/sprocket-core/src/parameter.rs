//! Parameter signatures and bindings

use serde::{Deserialize, Serialize};

use crate::{DataType, Value};

/// Name of the implicit return-code parameter on stored procedure calls.
pub const RETURN_VALUE_NAME: &str = "@RETURN_VALUE";

/// Which way a parameter carries its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterDirection {
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

impl ParameterDirection {
    /// Output-capable parameters may not reach the provider unset.
    pub fn requires_value(self) -> bool {
        matches!(
            self,
            ParameterDirection::Output | ParameterDirection::InputOutput
        )
    }

    /// Directions whose values are written back after execution.
    pub fn is_returned(self) -> bool {
        !matches!(self, ParameterDirection::Input)
    }
}

/// Trim a parameter name and make sure it carries the `@` prefix.
pub fn normalize_parameter_name(name: &str) -> String {
    let name = name.trim();
    if name.starts_with('@') {
        name.to_string()
    } else {
        format!("@{}", name)
    }
}

/// Case-insensitive lookup key for a parameter name.
pub fn parameter_key(name: &str) -> String {
    normalize_parameter_name(name).to_lowercase()
}

/// Formal signature of one procedure parameter, as discovered from metadata.
///
/// Descriptors are immutable once cached; consumers always work on clones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub direction: ParameterDirection,
    pub data_type: DataType,
    /// Maximum length for text/binary types; -1 means unbounded (MAX)
    pub size: i32,
    pub precision: u8,
    pub scale: u8,
    /// 1-based position in the procedure signature
    pub ordinal: usize,
}

impl ParameterDescriptor {
    pub fn new(name: &str, direction: ParameterDirection, data_type: DataType) -> Self {
        Self {
            name: normalize_parameter_name(name),
            direction,
            data_type,
            size: 0,
            precision: 0,
            scale: 0,
            ordinal: 0,
        }
    }

    pub fn input(name: &str, data_type: DataType) -> Self {
        Self::new(name, ParameterDirection::Input, data_type)
    }

    /// The implicit `@RETURN_VALUE` descriptor.
    pub fn return_value() -> Self {
        Self::new(
            RETURN_VALUE_NAME,
            ParameterDirection::ReturnValue,
            DataType::Int32,
        )
    }

    pub fn with_size(mut self, size: i32) -> Self {
        self.size = size;
        self
    }

    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn with_ordinal(mut self, ordinal: usize) -> Self {
        self.ordinal = ordinal;
        self
    }

    pub fn key(&self) -> String {
        parameter_key(&self.name)
    }

    pub fn matches(&self, name: &str) -> bool {
        self.key() == parameter_key(name)
    }
}

/// One descriptor with the value resolved for a single call.
///
/// `None` is native absence, which the binder only leaves on the return
/// value; providers send any other unset parameter as NULL.
/// `Some(Value::Null)` is an explicit NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub descriptor: ParameterDescriptor,
    pub value: Option<Value>,
}

impl BoundParameter {
    /// A value-less clone of the descriptor.
    pub fn unset(descriptor: ParameterDescriptor) -> Self {
        Self {
            descriptor,
            value: None,
        }
    }

    pub fn new(descriptor: ParameterDescriptor, value: Value) -> Self {
        Self {
            descriptor,
            value: Some(value),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn direction(&self) -> ParameterDirection {
        self.descriptor.direction
    }

    pub fn is_unset(&self) -> bool {
        self.value.is_none()
    }

    /// The bound value, with native absence read as NULL.
    pub fn value_or_null(&self) -> &Value {
        self.value.as_ref().unwrap_or(&Value::Null)
    }
}

/// A value offered for binding, either by the caller or as a connection default.
#[derive(Debug, Clone, PartialEq)]
pub struct SuppliedParameter {
    pub name: String,
    pub direction: ParameterDirection,
    /// `None` when no value was given (NULL is normalized to `None`)
    pub value: Option<Value>,
    pub data_type: DataType,
}

impl SuppliedParameter {
    pub fn new(name: &str, direction: ParameterDirection, value: impl Into<Value>) -> Self {
        let value = match value.into() {
            Value::Null => None,
            other => Some(other),
        };
        let data_type = value
            .as_ref()
            .map(Value::data_type)
            .unwrap_or(DataType::String);
        Self {
            name: normalize_parameter_name(name),
            direction,
            value,
            data_type,
        }
    }

    pub fn input(name: &str, value: impl Into<Value>) -> Self {
        Self::new(name, ParameterDirection::Input, value)
    }

    /// An output parameter with no initial value.
    pub fn output(name: &str) -> Self {
        Self::new(name, ParameterDirection::Output, Value::Null)
    }

    pub fn input_output(name: &str, value: impl Into<Value>) -> Self {
        Self::new(name, ParameterDirection::InputOutput, value)
    }

    /// Override the inferred data type.
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn key(&self) -> String {
        parameter_key(&self.name)
    }
}
