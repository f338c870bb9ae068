//! Procedure and text commands
//!
//! A [`ProcedureCommand`] collects caller parameters, then resolves the
//! procedure signature, binds values, renders the diagnostic statement and
//! runs the call in one of four modes:
//!
//! - [`execute_non_query`](ProcedureCommand::execute_non_query): rows affected
//! - [`execute_scalar`](ProcedureCommand::execute_scalar): first column of the first row
//! - [`execute_reader`](ProcedureCommand::execute_reader): forward-only rows
//! - [`execute_sequential_reader`](ProcedureCommand::execute_sequential_reader):
//!   rows whose columns must be read in ordinal order
//!
//! # Example
//!
//! ```ignore
//! let mut conn = factory.create_database("orders")?;
//! let mut cmd = conn.stored_procedure("GetOrder");
//! cmd.add_in_parameter("@orderId", 42);
//! cmd.add_out_parameter("@total");
//! let rows = cmd.execute_non_query().await?;
//! let total = cmd.out_parameter("@total").cloned();
//! ```

mod reader;

#[cfg(test)]
mod tests;

use std::future::Future;
use std::time::Duration;

use sprocket_core::{
    BoundParameter, CommandDescriptor, CommandKind, ParameterDescriptor, PreparedCommand,
    ProcedureIdentity, ReaderBehavior, Result, SprocketError, SuppliedParameter, Value,
};
use sprocket_query::{DiagnosticTrace, ProviderDiscovery, bind_parameters, bind_text_parameters};

use crate::connection::DbConnection;
use crate::failure::FailureDecision;
use crate::scope::ExecutionScope;

pub use reader::ProcedureReader;

/// One call against a [`DbConnection`].
///
/// The command borrows its connection mutably, so a connection carrying a
/// transaction runs one command at a time.
pub struct ProcedureCommand<'c> {
    connection: &'c mut DbConnection,
    descriptor: CommandDescriptor,
    parameters: Vec<SuppliedParameter>,
    executed: Option<PreparedCommand>,
}

impl<'c> ProcedureCommand<'c> {
    pub(crate) fn new(connection: &'c mut DbConnection, descriptor: CommandDescriptor) -> Self {
        Self {
            connection,
            descriptor,
            parameters: Vec::new(),
            executed: None,
        }
    }

    pub fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    pub fn connection(&self) -> &DbConnection {
        self.connection
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.descriptor.timeout = timeout;
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.descriptor.timeout = timeout;
    }

    /// Add an input parameter; `Value::Null` binds an explicit NULL.
    pub fn add_in_parameter(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.add_parameter(SuppliedParameter::input(name, value))
    }

    /// Add an output parameter with no initial value.
    pub fn add_out_parameter(&mut self, name: &str) -> &mut Self {
        self.add_parameter(SuppliedParameter::output(name))
    }

    /// Add an input-output parameter with an initial value.
    pub fn add_in_out_parameter(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.add_parameter(SuppliedParameter::input_output(name, value))
    }

    /// Add a parameter; a later parameter with the same name replaces it.
    pub fn add_parameter(&mut self, parameter: SuppliedParameter) -> &mut Self {
        let key = parameter.key();
        self.parameters.retain(|p| p.key() != key);
        self.parameters.push(parameter);
        self
    }

    pub fn parameters(&self) -> &[SuppliedParameter] {
        &self.parameters
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    /// Value of an output, input-output or return parameter after execution.
    pub fn out_parameter(&self, name: &str) -> Option<&Value> {
        self.executed
            .as_ref()
            .and_then(|command| command.parameter(name))
            .filter(|p| p.direction().is_returned())
            .map(BoundParameter::value_or_null)
    }

    /// Return code of the last executed procedure call.
    pub fn return_value(&self) -> Option<&Value> {
        self.executed
            .as_ref()
            .and_then(|command| command.return_parameter())
            .map(BoundParameter::value_or_null)
    }

    /// The command as it was last sent to the provider.
    pub fn executed(&self) -> Option<&PreparedCommand> {
        self.executed.as_ref()
    }

    /// Run the command and return the number of rows affected.
    ///
    /// Yields `-1` when the provider reports no count or when the failure
    /// handler swallows an error.
    #[tracing::instrument(name = "execute", skip(self), fields(schema = %self.descriptor.schema, procedure = %self.descriptor.text, mode = "non_query"))]
    pub async fn execute_non_query(&mut self) -> Result<i64> {
        let outcome = self.run_non_query().await;
        self.settle(outcome, -1)
    }

    /// Run the command and return the first column of the first row.
    #[tracing::instrument(name = "execute", skip(self), fields(schema = %self.descriptor.schema, procedure = %self.descriptor.text, mode = "scalar"))]
    pub async fn execute_scalar(&mut self) -> Result<Value> {
        let outcome = self.run_scalar().await;
        self.settle(outcome, Value::Null)
    }

    /// Run the command and hand its rows to `read`.
    ///
    /// The reader and the connection behind it are only valid inside the
    /// callback.
    #[tracing::instrument(name = "execute", skip(self, read), fields(schema = %self.descriptor.schema, procedure = %self.descriptor.text, mode = "reader"))]
    pub async fn execute_reader<F>(&mut self, read: F) -> Result<()>
    where
        F: FnOnce(&mut ProcedureReader<'_>) -> Result<()>,
    {
        let outcome = self.run_reader(ReaderBehavior::Default, read).await;
        self.settle(outcome, ())
    }

    /// Like [`execute_reader`](Self::execute_reader), for rows with large
    /// columns: each row's columns must be read in increasing ordinal order
    /// and each column at most once.
    #[tracing::instrument(name = "execute", skip(self, read), fields(schema = %self.descriptor.schema, procedure = %self.descriptor.text, mode = "sequential_reader"))]
    pub async fn execute_sequential_reader<F>(&mut self, read: F) -> Result<()>
    where
        F: FnOnce(&mut ProcedureReader<'_>) -> Result<()>,
    {
        let outcome = self.run_reader(ReaderBehavior::SequentialAccess, read).await;
        self.settle(outcome, ())
    }

    fn settle<T>(&self, outcome: Result<T>, neutral: T) -> Result<T> {
        match outcome {
            Ok(value) => Ok(value),
            Err(err) => match self.connection.failure_handler().on_failure(&err) {
                FailureDecision::Propagate => Err(err),
                FailureDecision::Swallow => Ok(neutral),
            },
        }
    }

    async fn run_non_query(&mut self) -> Result<i64> {
        let mut command = self.prepare(true).await?;
        let statement = self.connection.last_sql().to_string();
        let timeout = command.timeout;

        let mut scope = self
            .connection
            .scope()
            .await
            .map_err(|e| SprocketError::execution(&statement, &command.text, e))?;
        let result = with_timeout(timeout, scope.connection().execute_non_query(&mut command)).await;
        let interrupted = abandoned_in_transaction(&scope, &result);
        scope.release().await;
        if interrupted {
            self.connection.interrupt_transaction();
        }

        let rows = result.map_err(|e| SprocketError::execution(&statement, &command.text, e))?;
        self.executed = Some(command);
        Ok(rows)
    }

    async fn run_scalar(&mut self) -> Result<Value> {
        let mut command = self.prepare(true).await?;
        let statement = self.connection.last_sql().to_string();
        let timeout = command.timeout;

        let mut scope = self
            .connection
            .scope()
            .await
            .map_err(|e| SprocketError::execution(&statement, &command.text, e))?;
        let result = with_timeout(timeout, scope.connection().execute_scalar(&mut command)).await;
        let interrupted = abandoned_in_transaction(&scope, &result);
        scope.release().await;
        if interrupted {
            self.connection.interrupt_transaction();
        }

        let value = result.map_err(|e| SprocketError::execution(&statement, &command.text, e))?;
        self.executed = Some(command);
        Ok(value)
    }

    async fn run_reader<F>(&mut self, behavior: ReaderBehavior, read: F) -> Result<()>
    where
        F: FnOnce(&mut ProcedureReader<'_>) -> Result<()>,
    {
        let mut command = self.prepare(false).await?;
        let statement = self.connection.last_sql().to_string();
        let timeout = command.timeout;

        let mut scope = self
            .connection
            .scope()
            .await
            .map_err(|e| SprocketError::execution(&statement, &command.text, e))?;
        let opened = with_timeout(
            timeout,
            scope.connection().execute_reader(&mut command, behavior),
        )
        .await;
        let interrupted = abandoned_in_transaction(&scope, &opened);
        let result = match opened {
            Ok(mut cursor) => {
                let mut reader = ProcedureReader::new(cursor.as_mut(), behavior);
                read(&mut reader)
            }
            Err(e) => Err(SprocketError::execution(&statement, &command.text, e)),
        };
        scope.release().await;
        if interrupted {
            self.connection.interrupt_transaction();
        }

        result?;
        self.executed = Some(command);
        Ok(())
    }

    /// Resolve, bind and render the command.
    ///
    /// Procedure calls made for a row count or scalar carry the implicit
    /// `@RETURN_VALUE` parameter after the discovered ones.
    async fn prepare(&mut self, with_return_value: bool) -> Result<PreparedCommand> {
        self.connection.set_last_sql(String::new());
        self.executed = None;

        let prepared = match self.descriptor.kind {
            CommandKind::StoredProcedure => {
                let identity = ProcedureIdentity::resolve(
                    self.connection.db_code(),
                    &self.descriptor.schema,
                    &self.descriptor.text,
                );
                let signature = {
                    let connection = &*self.connection;
                    let discovery = ProviderDiscovery::new(
                        connection.provider().as_ref(),
                        connection.connection_string(),
                    );
                    connection.catalog().resolve(&identity, &discovery).await?
                };

                let mut bound = bind_parameters(
                    signature,
                    &self.parameters,
                    self.connection.defaults(),
                    self.connection.binder_options(),
                )?;
                if with_return_value {
                    bound.push(BoundParameter::new(
                        ParameterDescriptor::return_value(),
                        Value::Int32(0),
                    ));
                }

                let statement = DiagnosticTrace::render(&identity.display_name(), &bound);
                tracing::trace!(target: "sprocket::sql", "{}", statement);
                self.connection.set_last_sql(statement);
                PreparedCommand::new(CommandKind::StoredProcedure, identity.command_text(), bound)
            }
            CommandKind::Text => {
                let bound = bind_text_parameters(&self.parameters);
                tracing::trace!(target: "sprocket::sql", "{}", self.descriptor.text);
                self.connection.set_last_sql(self.descriptor.text.clone());
                PreparedCommand::new(CommandKind::Text, self.descriptor.text.clone(), bound)
            }
        };

        Ok(prepared.with_timeout(self.descriptor.timeout))
    }
}

impl std::fmt::Debug for ProcedureCommand<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureCommand")
            .field("descriptor", &self.descriptor)
            .field("parameters", &self.parameters)
            .field("executed", &self.executed.is_some())
            .finish()
    }
}

/// A timed-out call on a borrowed connection was dropped mid-stream.
fn abandoned_in_transaction<T>(scope: &ExecutionScope<'_>, result: &Result<T>) -> bool {
    !scope.is_owned() && matches!(result, Err(SprocketError::Timeout(_)))
}

/// Bound a provider call by the command timeout; zero means no limit.
async fn with_timeout<T>(timeout: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    if timeout.is_zero() {
        return call.await;
    }
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(SprocketError::Timeout(format!(
            "command did not complete within {:?}",
            timeout
        ))),
    }
}
