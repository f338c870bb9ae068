//! MS SQL Server execution provider

use async_trait::async_trait;
use sprocket_core::{ExecutionProvider, ProviderConnection, Result};

use crate::connection::MssqlConnection;

/// MS SQL Server execution provider
#[derive(Debug, Clone, Copy)]
pub struct MssqlProvider;

impl MssqlProvider {
    /// Create a new MS SQL Server provider instance
    pub fn new() -> Self {
        tracing::debug!("MS SQL Server provider initialized");
        Self
    }
}

impl Default for MssqlProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionProvider for MssqlProvider {
    fn name(&self) -> &str {
        "mssql"
    }

    async fn connect(&self, connection_string: &str) -> Result<Box<dyn ProviderConnection>> {
        let connection = MssqlConnection::connect(connection_string).await?;
        Ok(Box::new(connection))
    }
}
