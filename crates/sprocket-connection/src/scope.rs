//! Connection ownership for a single execution

use sprocket_core::ProviderConnection;

/// The provider connection one command runs on.
///
/// Outside a transaction every call gets a dedicated connection that is
/// closed as soon as the call is done. Inside a transaction calls borrow the
/// transaction's connection, which only commit, rollback or close may end.
pub enum ExecutionScope<'a> {
    Owned(Box<dyn ProviderConnection>),
    Borrowed(&'a mut dyn ProviderConnection),
}

impl ExecutionScope<'_> {
    pub fn connection(&mut self) -> &mut dyn ProviderConnection {
        match self {
            ExecutionScope::Owned(connection) => connection.as_mut(),
            ExecutionScope::Borrowed(connection) => &mut **connection,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, ExecutionScope::Owned(_))
    }

    /// End the scope, closing the connection if it is owned.
    pub async fn release(self) {
        if let ExecutionScope::Owned(mut connection) = self {
            if let Err(e) = connection.close().await {
                tracing::debug!(error = %e, "failed to close connection");
            }
        }
    }
}

impl std::fmt::Debug for ExecutionScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionScope::Owned(_) => f.write_str("ExecutionScope::Owned"),
            ExecutionScope::Borrowed(_) => f.write_str("ExecutionScope::Borrowed"),
        }
    }
}
