//! Command descriptors handed to execution providers

use std::time::Duration;

use crate::{BoundParameter, ParameterDirection, Value, parameter_key};

/// Default provider-side command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// How the command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    StoredProcedure,
    Text,
}

/// How a reader call exposes its columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReaderBehavior {
    /// Forward-only rows, random column access within a row
    #[default]
    Default,
    /// Columns must be consumed in ordinal order (large/BLOB columns)
    SequentialAccess,
}

/// Isolation of a connection-level transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    /// Dirty reads allowed
    ReadUncommitted,
}

/// What the caller asked to run: a procedure or a block of SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Schema of the procedure; empty for text commands
    pub schema: String,
    /// Procedure name or SQL text
    pub text: String,
    pub kind: CommandKind,
    /// Zero means no limit
    pub timeout: Duration,
}

impl CommandDescriptor {
    pub fn stored_procedure(schema: impl Into<String>, procedure: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            text: procedure.into(),
            kind: CommandKind::StoredProcedure,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            schema: String::new(),
            text: sql.into(),
            kind: CommandKind::Text,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A fully bound command, ready for a provider to execute.
///
/// Providers write output, input-output and return values back into
/// `parameters` after execution.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCommand {
    pub kind: CommandKind,
    /// `schema.[name]` for procedures, SQL for text commands
    pub text: String,
    pub parameters: Vec<BoundParameter>,
    pub timeout: Duration,
}

impl PreparedCommand {
    pub fn new(kind: CommandKind, text: impl Into<String>, parameters: Vec<BoundParameter>) -> Self {
        Self {
            kind,
            text: text.into(),
            parameters,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Find a parameter by name, ignoring case and the `@` prefix.
    pub fn parameter(&self, name: &str) -> Option<&BoundParameter> {
        let key = parameter_key(name);
        self.parameters.iter().find(|p| p.descriptor.key() == key)
    }

    pub fn parameter_mut(&mut self, name: &str) -> Option<&mut BoundParameter> {
        let key = parameter_key(name);
        self.parameters.iter_mut().find(|p| p.descriptor.key() == key)
    }

    /// Store a value returned by the backend for an output-capable parameter.
    ///
    /// Returns false when no such parameter exists or it is a pure input.
    pub fn set_returned_value(&mut self, name: &str, value: Value) -> bool {
        match self.parameter_mut(name) {
            Some(param) if param.direction().is_returned() => {
                param.value = Some(value);
                true
            }
            _ => false,
        }
    }

    /// The bound return-value parameter, if this command carries one.
    pub fn return_parameter(&self) -> Option<&BoundParameter> {
        self.parameters
            .iter()
            .find(|p| p.direction() == ParameterDirection::ReturnValue)
    }
}
