//! Creates configured connections
//!
//! The factory owns the signature catalog shared by every connection it
//! creates, so procedures are discovered once per database and process.

use std::sync::Arc;

use sprocket_core::{ExecutionProvider, Result, SprocketError, SuppliedParameter};
use sprocket_query::ParameterCatalog;

use crate::config::DataConfig;
use crate::connection::{DbConnection, standard_defaults};
use crate::failure::{FailureHandler, LogAndPropagate};
use crate::resilient::ResilientExecutor;

pub struct DatabaseFactory {
    config: DataConfig,
    provider: Arc<dyn ExecutionProvider>,
    catalog: Arc<ParameterCatalog>,
    failure_handler: Arc<dyn FailureHandler>,
}

impl DatabaseFactory {
    pub fn new(config: DataConfig, provider: Arc<dyn ExecutionProvider>) -> Self {
        Self {
            config,
            provider,
            catalog: ParameterCatalog::shared(),
            failure_handler: Arc::new(LogAndPropagate),
        }
    }

    /// Share a catalog with other factories for the same databases.
    pub fn with_catalog(mut self, catalog: Arc<ParameterCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = handler;
        self
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<ParameterCatalog> {
        &self.catalog
    }

    /// Connection for a configured name or alias.
    ///
    /// The resolved connection name becomes the connection's database code.
    #[tracing::instrument(skip(self))]
    pub fn create_database(&self, name: &str) -> Result<DbConnection> {
        let resolved = self.config.connection_name(name);
        let connection_string = self.config.connection_string(&resolved).ok_or_else(|| {
            let message = if resolved.eq_ignore_ascii_case(name.trim()) {
                format!("could not locate connectionString: {}", name)
            } else {
                format!(
                    "could not locate connectionString: {} mapped to {}",
                    name, resolved
                )
            };
            SprocketError::Configuration(message)
        })?;

        tracing::debug!(connection = %resolved, "creating connection");
        Ok(self.build(connection_string, &resolved))
    }

    /// Connection for an explicit connection string, outside the
    /// configured names. Its database code is empty.
    pub fn create_from_connection_string(&self, connection_string: &str) -> DbConnection {
        self.build(connection_string, "")
    }

    /// Executor using the `[retry]` settings.
    pub fn resilient_executor(&self) -> ResilientExecutor {
        self.config.retry.executor()
    }

    fn build(&self, connection_string: &str, db_code: &str) -> DbConnection {
        DbConnection::with_seed_defaults(
            self.provider.clone(),
            self.catalog.clone(),
            connection_string,
            self.seed_defaults(),
        )
        .with_db_code(db_code)
        .with_schemas(self.config.schema_names())
        .with_command_timeout(self.config.command_timeout())
        .with_binder_options(self.config.binder)
        .with_failure_handler(self.failure_handler.clone())
    }

    fn seed_defaults(&self) -> Vec<SuppliedParameter> {
        let mut seed = if self.config.standard_defaults {
            standard_defaults()
        } else {
            Vec::new()
        };
        let mut configured: Vec<_> = self.config.default_parameters.iter().collect();
        configured.sort();
        seed.extend(
            configured
                .into_iter()
                .map(|(name, value)| SuppliedParameter::input(name, value.clone())),
        );
        seed
    }
}

impl std::fmt::Debug for DatabaseFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseFactory")
            .field("provider", &self.provider.name())
            .field("default", &self.config.default)
            .field("catalog_entries", &self.catalog.len())
            .finish()
    }
}
