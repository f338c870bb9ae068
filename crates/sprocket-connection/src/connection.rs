//! Logical database connection
//!
//! A `DbConnection` is not a socket. It carries what every call needs:
//! the provider and connection string, the shared signature catalog,
//! default parameter values, and the provider connection of an open
//! transaction, if any. Calls outside a transaction open and close their
//! own provider connection.

use std::sync::Arc;
use std::time::Duration;

use sprocket_core::{
    CommandDescriptor, DEFAULT_COMMAND_TIMEOUT, ExecutionProvider, IsolationLevel,
    ProviderConnection, Result, SprocketError, SuppliedParameter, Value,
};
use sprocket_query::{BinderOptions, DefaultParameterSet, ParameterCatalog};

use crate::command::ProcedureCommand;
use crate::config::SchemaNames;
use crate::failure::{FailureHandler, LogAndPropagate};
use crate::scope::ExecutionScope;

/// Supplies default parameters from an ambient identity, such as the
/// claims of an authenticated user.
pub trait DefaultParameterSource {
    fn default_parameters(&self) -> Vec<SuppliedParameter>;
}

pub struct DbConnection {
    provider: Arc<dyn ExecutionProvider>,
    catalog: Arc<ParameterCatalog>,
    connection_string: String,
    db_code: String,
    schemas: Arc<SchemaNames>,
    command_timeout: Duration,
    binder_options: BinderOptions,
    failure_handler: Arc<dyn FailureHandler>,
    defaults: DefaultParameterSet,
    /// Seeded on construction and again on every clone
    seed_defaults: Arc<Vec<SuppliedParameter>>,
    transaction: Option<Box<dyn ProviderConnection>>,
    /// Set when a call inside the transaction timed out mid-stream
    transaction_interrupted: bool,
    last_sql: String,
}

impl DbConnection {
    /// Create a connection seeded with the standard defaults
    /// (`@computerName`, `@wasError`, `@modifiedBy`).
    pub fn new(
        provider: Arc<dyn ExecutionProvider>,
        catalog: Arc<ParameterCatalog>,
        connection_string: impl Into<String>,
    ) -> Self {
        Self::with_seed_defaults(
            provider,
            catalog,
            connection_string,
            standard_defaults(),
        )
    }

    /// Create a connection without any default parameters.
    pub fn without_defaults(
        provider: Arc<dyn ExecutionProvider>,
        catalog: Arc<ParameterCatalog>,
        connection_string: impl Into<String>,
    ) -> Self {
        Self::with_seed_defaults(provider, catalog, connection_string, Vec::new())
    }

    /// Create a connection seeded with `seed` as transient defaults.
    ///
    /// Clones are seeded with the same values.
    pub fn with_seed_defaults(
        provider: Arc<dyn ExecutionProvider>,
        catalog: Arc<ParameterCatalog>,
        connection_string: impl Into<String>,
        seed: Vec<SuppliedParameter>,
    ) -> Self {
        let mut defaults = DefaultParameterSet::new();
        for parameter in &seed {
            defaults.add(parameter.clone());
        }
        Self {
            provider,
            catalog,
            connection_string: connection_string.into(),
            db_code: String::new(),
            schemas: Arc::new(SchemaNames::default()),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            binder_options: BinderOptions::default(),
            failure_handler: Arc::new(LogAndPropagate),
            defaults,
            seed_defaults: Arc::new(seed),
            transaction: None,
            transaction_interrupted: false,
            last_sql: String::new(),
        }
    }

    /// Database code; part of every catalog key.
    pub fn with_db_code(mut self, db_code: impl Into<String>) -> Self {
        self.db_code = db_code.into();
        self
    }

    pub fn with_schemas(mut self, schemas: SchemaNames) -> Self {
        self.schemas = Arc::new(schemas);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_binder_options(mut self, options: BinderOptions) -> Self {
        self.binder_options = options;
        self
    }

    pub fn with_failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = handler;
        self
    }

    pub fn db_code(&self) -> &str {
        &self.db_code
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn provider(&self) -> &Arc<dyn ExecutionProvider> {
        &self.provider
    }

    pub fn catalog(&self) -> &Arc<ParameterCatalog> {
        &self.catalog
    }

    pub fn schemas(&self) -> &SchemaNames {
        &self.schemas
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn set_command_timeout(&mut self, timeout: Duration) {
        self.command_timeout = timeout;
    }

    pub fn binder_options(&self) -> &BinderOptions {
        &self.binder_options
    }

    pub fn failure_handler(&self) -> &Arc<dyn FailureHandler> {
        &self.failure_handler
    }

    /// Rendered form of the last command prepared on this connection.
    pub fn last_sql(&self) -> &str {
        &self.last_sql
    }

    pub(crate) fn set_last_sql(&mut self, statement: String) {
        self.last_sql = statement;
    }

    pub fn defaults(&self) -> &DefaultParameterSet {
        &self.defaults
    }

    /// Add a default that is not carried over to clones.
    pub fn add_default_parameter(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.defaults.add(SuppliedParameter::input(name, value));
        self
    }

    /// Add a default that is carried over to clones.
    pub fn add_persistent_default_parameter(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.defaults
            .add_persistent(SuppliedParameter::input(name, value));
        self
    }

    pub fn add_default(&mut self, parameter: SuppliedParameter, persistent: bool) -> &mut Self {
        if persistent {
            self.defaults.add_persistent(parameter);
        } else {
            self.defaults.add(parameter);
        }
        self
    }

    /// Add every default the source supplies, as transient defaults.
    pub fn add_defaults_from(&mut self, source: &dyn DefaultParameterSource) -> &mut Self {
        for parameter in source.default_parameters() {
            self.defaults.add(parameter);
        }
        self
    }

    /// A new connection to the same database.
    ///
    /// The clone keeps the provider, catalog, settings and persistent
    /// defaults, is seeded again with the construction defaults and never
    /// shares transaction state.
    pub fn clone_connection(&self) -> Self {
        let mut defaults = self.defaults.clone_persistent();
        for parameter in self.seed_defaults.iter() {
            if defaults.get(&parameter.name).is_none() {
                defaults.add(parameter.clone());
            }
        }
        Self {
            provider: self.provider.clone(),
            catalog: self.catalog.clone(),
            connection_string: self.connection_string.clone(),
            db_code: self.db_code.clone(),
            schemas: self.schemas.clone(),
            command_timeout: self.command_timeout,
            binder_options: self.binder_options,
            failure_handler: self.failure_handler.clone(),
            defaults,
            seed_defaults: self.seed_defaults.clone(),
            transaction: None,
            transaction_interrupted: false,
            last_sql: String::new(),
        }
    }

    /// Command for a procedure in the default schema, or in the schema
    /// given as part of `procedure` (`sales.GetOrder`).
    pub fn stored_procedure(&mut self, procedure: &str) -> ProcedureCommand<'_> {
        self.stored_procedure_in("", procedure)
    }

    /// Command for `procedure` in `schema`; an empty schema takes the default.
    pub fn stored_procedure_in(&mut self, schema: &str, procedure: &str) -> ProcedureCommand<'_> {
        let descriptor = CommandDescriptor::stored_procedure(self.schemas.resolve(schema), procedure)
            .with_timeout(self.command_timeout);
        ProcedureCommand::new(self, descriptor)
    }

    /// Command for a block of SQL text.
    pub fn text_command(&mut self, sql: &str) -> ProcedureCommand<'_> {
        let descriptor = CommandDescriptor::text(sql).with_timeout(self.command_timeout);
        ProcedureCommand::new(self, descriptor)
    }

    /// Run parameterized SQL text and return the rows affected.
    pub async fn execute_command(
        &mut self,
        sql: &str,
        parameters: impl IntoIterator<Item = SuppliedParameter>,
    ) -> Result<i64> {
        let mut command = self.text_command(sql);
        for parameter in parameters {
            command.add_parameter(parameter);
        }
        command.execute_non_query().await
    }

    pub fn is_in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Start a read-committed transaction; a no-op when one is active.
    pub async fn begin_transaction(&mut self) -> Result<()> {
        self.begin_transaction_with(IsolationLevel::ReadCommitted)
            .await
    }

    #[tracing::instrument(skip(self), fields(db_code = %self.db_code))]
    pub async fn begin_transaction_with(&mut self, isolation: IsolationLevel) -> Result<()> {
        if self.transaction.is_some() {
            return Ok(());
        }
        let mut connection = self.provider.connect(&self.connection_string).await?;
        if let Err(e) = connection.begin_transaction(isolation).await {
            if let Err(close_err) = connection.close().await {
                tracing::debug!(error = %close_err, "failed to close connection");
            }
            return Err(e);
        }
        tracing::debug!("transaction started");
        self.transaction = Some(connection);
        self.transaction_interrupted = false;
        Ok(())
    }

    /// Commit the active transaction.
    ///
    /// A transaction interrupted by a timed-out call is rolled back instead
    /// and the commit fails with a connection error.
    #[tracing::instrument(skip(self), fields(db_code = %self.db_code))]
    pub async fn commit(&mut self) -> Result<()> {
        let mut connection = self.transaction.take().ok_or_else(|| {
            SprocketError::TransactionState("commit without begin transaction".into())
        })?;
        if std::mem::take(&mut self.transaction_interrupted) {
            if let Err(e) = connection.rollback().await {
                tracing::debug!(error = %e, "rollback of interrupted transaction failed");
            }
            close_quietly(connection.as_mut()).await;
            return Err(interrupted_transaction());
        }
        let result = connection.commit().await;
        close_quietly(connection.as_mut()).await;
        tracing::debug!(ok = result.is_ok(), "transaction committed");
        result
    }

    #[tracing::instrument(skip(self), fields(db_code = %self.db_code))]
    pub async fn rollback(&mut self) -> Result<()> {
        let mut connection = self.transaction.take().ok_or_else(|| {
            SprocketError::TransactionState("rollback without begin transaction".into())
        })?;
        self.transaction_interrupted = false;
        let result = connection.rollback().await;
        close_quietly(connection.as_mut()).await;
        tracing::debug!(ok = result.is_ok(), "transaction rolled back");
        result
    }

    /// Roll back any active transaction and release its connection.
    pub async fn close(&mut self) -> Result<()> {
        if self.transaction.is_none() {
            return Ok(());
        }
        self.rollback().await
    }

    pub fn is_transaction_interrupted(&self) -> bool {
        self.transaction_interrupted
    }

    /// Mark the transaction's connection unusable after a call on it was
    /// abandoned part way; only rollback or close may end it from here.
    pub(crate) fn interrupt_transaction(&mut self) {
        if self.transaction.is_some() && !self.transaction_interrupted {
            tracing::warn!(db_code = %self.db_code, "transaction interrupted by a timed-out call");
            self.transaction_interrupted = true;
        }
    }

    /// Connection for one call: the transaction's, or a fresh one.
    pub(crate) async fn scope(&mut self) -> Result<ExecutionScope<'_>> {
        if self.transaction_interrupted {
            return Err(interrupted_transaction());
        }
        match self.transaction.as_deref_mut() {
            Some(connection) => Ok(ExecutionScope::Borrowed(connection)),
            None => {
                let connection = self.provider.connect(&self.connection_string).await?;
                Ok(ExecutionScope::Owned(connection))
            }
        }
    }
}

impl Drop for DbConnection {
    fn drop(&mut self) {
        if self.transaction.is_some() {
            tracing::warn!(
                db_code = %self.db_code,
                "connection dropped with an open transaction"
            );
        }
    }
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("provider", &self.provider.name())
            .field("db_code", &self.db_code)
            .field("command_timeout", &self.command_timeout)
            .field("defaults", &self.defaults.len())
            .field("in_transaction", &self.transaction.is_some())
            .field("transaction_interrupted", &self.transaction_interrupted)
            .finish()
    }
}

fn interrupted_transaction() -> SprocketError {
    SprocketError::Connection(
        "transaction connection was interrupted by a timed-out call; roll back the transaction".into(),
    )
}

async fn close_quietly(connection: &mut dyn ProviderConnection) {
    if let Err(e) = connection.close().await {
        tracing::debug!(error = %e, "failed to close connection");
    }
}

/// Standard defaults every new connection starts with.
pub(crate) fn standard_defaults() -> Vec<SuppliedParameter> {
    let computer_name = std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_default();
    vec![
        SuppliedParameter::input("@computerName", computer_name),
        SuppliedParameter::input("@wasError", false),
        SuppliedParameter::input("@modifiedBy", 0),
    ]
}
