//! Value coercion between supplied and declared parameter types

use serde::{Deserialize, Serialize};
use sprocket_core::{DataType, Value};
use uuid::Uuid;

/// Text written for a boolean bound onto a textual parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BooleanTokens {
    /// `"true"` / `"false"`
    #[default]
    TrueFalse,
    /// `"Y"` / `"N"`, for procedures that store flags as `char(1)`
    YesNo,
}

impl BooleanTokens {
    fn render(self, value: bool) -> &'static str {
        match (self, value) {
            (BooleanTokens::TrueFalse, true) => "true",
            (BooleanTokens::TrueFalse, false) => "false",
            (BooleanTokens::YesNo, true) => "Y",
            (BooleanTokens::YesNo, false) => "N",
        }
    }
}

/// How a supplied value is converted onto a parameter of another type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoercionRule {
    /// Types agree; the value is used unchanged
    Passthrough,
    /// Parse the value's text as a GUID
    ParseGuid,
    /// `"0"` and `"false"` (any case) are false, everything else is true
    Truthiness,
    /// Boolean onto a textual parameter, written as a token
    BooleanToken,
    /// The value's string representation
    Stringify,
}

impl CoercionRule {
    /// Pick the rule for binding a `source` typed value onto a `target` parameter.
    pub fn select(target: DataType, source: DataType) -> Self {
        if target == source {
            return CoercionRule::Passthrough;
        }
        match (target, source) {
            (DataType::Guid, _) => CoercionRule::ParseGuid,
            (DataType::Boolean, _) => CoercionRule::Truthiness,
            (target, DataType::Boolean) if target.is_textual() => CoercionRule::BooleanToken,
            _ => CoercionRule::Stringify,
        }
    }

    /// Convert `value`; the error is a message for a bind failure.
    pub fn apply(self, value: &Value, tokens: BooleanTokens) -> Result<Value, String> {
        match self {
            CoercionRule::Passthrough => Ok(value.clone()),
            CoercionRule::ParseGuid => match value {
                Value::Uuid(id) => Ok(Value::Uuid(*id)),
                other => {
                    let text = other.to_string();
                    Uuid::parse_str(text.trim())
                        .map(Value::Uuid)
                        .map_err(|e| format!("'{}' is not a valid GUID ({})", text, e))
                }
            },
            CoercionRule::Truthiness => Ok(Value::Bool(truthiness(value))),
            CoercionRule::BooleanToken => {
                let flag = value.as_bool().unwrap_or_else(|| truthiness(value));
                Ok(Value::String(tokens.render(flag).to_string()))
            }
            CoercionRule::Stringify => Ok(Value::String(value.to_string())),
        }
    }
}

fn truthiness(value: &Value) -> bool {
    let text = value.to_string();
    let text = text.trim();
    !(text == "0" || text.eq_ignore_ascii_case("false"))
}
