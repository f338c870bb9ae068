//! Human-readable rendering of a bound procedure call

use std::fmt::Write as _;

use sprocket_core::{BoundParameter, ParameterDirection, Value};

/// Renders a bound call as an `exec` statement for logs and error reports.
///
/// ```text
/// exec dbo.GetUser
/// 	@id=5
/// 	,@name=NULL
/// ```
///
/// The implicit return-value parameter is not part of the call and is not
/// rendered.
pub struct DiagnosticTrace;

impl DiagnosticTrace {
    /// Render `procedure` (unquoted `schema.name`) with its bound parameters.
    pub fn render(procedure: &str, parameters: &[BoundParameter]) -> String {
        let mut out = format!("exec {}\n", procedure);
        let mut first = true;
        for param in parameters {
            if param.direction() == ParameterDirection::ReturnValue {
                continue;
            }
            out.push_str(if first { "\t" } else { "\t," });
            first = false;
            // Writing into a String cannot fail
            let _ = writeln!(out, "{}={}", param.name(), Self::render_value(param));
        }
        out
    }

    fn render_value(param: &BoundParameter) -> String {
        match &param.value {
            None | Some(Value::Null) => "NULL".to_string(),
            Some(value) if param.descriptor.data_type.is_numeric() => value.to_string(),
            Some(value) => format!("'{}'", value.to_string().replace('\'', "''")),
        }
    }
}
