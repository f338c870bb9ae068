//! Procedure signature cache
//!
//! Signatures are discovered once per procedure identity and then served
//! from memory for the lifetime of the catalog. Entries are never
//! invalidated; a changed procedure signature requires a new catalog.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sprocket_core::{
    ExecutionProvider, ParameterDescriptor, ParameterDirection, ProcedureIdentity, Result,
    SprocketError,
};

/// Source of procedure signatures on a cache miss.
#[async_trait]
pub trait ParameterDiscovery: Send + Sync {
    /// Derive the parameters of `identity`, in ordinal order.
    async fn discover(&self, identity: &ProcedureIdentity) -> Result<Vec<ParameterDescriptor>>;
}

/// Discovers signatures over a short-lived provider connection.
///
/// Every discovery opens its own connection and closes it afterwards, so a
/// cache miss never touches a connection that is carrying a transaction.
pub struct ProviderDiscovery<'a> {
    provider: &'a dyn ExecutionProvider,
    connection_string: &'a str,
}

impl<'a> ProviderDiscovery<'a> {
    pub fn new(provider: &'a dyn ExecutionProvider, connection_string: &'a str) -> Self {
        Self {
            provider,
            connection_string,
        }
    }
}

#[async_trait]
impl ParameterDiscovery for ProviderDiscovery<'_> {
    async fn discover(&self, identity: &ProcedureIdentity) -> Result<Vec<ParameterDescriptor>> {
        let mut connection = self.provider.connect(self.connection_string).await?;
        let derived = connection.derive_parameters(&identity.command_text()).await;
        if let Err(e) = connection.close().await {
            tracing::debug!(error = %e, "failed to close discovery connection");
        }
        derived
    }
}

/// Thread-safe map from procedure identity to its discovered signature.
///
/// Shared between connections as `Arc<ParameterCatalog>`. Callers always
/// receive clones of the cached descriptors.
#[derive(Debug, Default)]
pub struct ParameterCatalog {
    entries: DashMap<ProcedureIdentity, Arc<[ParameterDescriptor]>>,
}

impl ParameterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog ready to be shared between connections.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Return the signature of `identity`, discovering it on a miss.
    ///
    /// Discovered return-value entries are dropped before caching; callers
    /// add the implicit `@RETURN_VALUE` themselves. Failed discoveries are
    /// not cached. Two tasks missing on the same identity may both discover
    /// it; the later insert wins and both results are equivalent.
    pub async fn resolve(
        &self,
        identity: &ProcedureIdentity,
        discovery: &dyn ParameterDiscovery,
    ) -> Result<Vec<ParameterDescriptor>> {
        if let Some(cached) = self.get(identity) {
            tracing::debug!(procedure = %identity, "parameter cache hit");
            return Ok(cached);
        }

        tracing::debug!(procedure = %identity, "parameter cache miss, discovering");
        let discovered = discovery.discover(identity).await.map_err(|source| {
            SprocketError::ParameterDiscovery {
                procedure: identity.to_string(),
                source: Box::new(source),
            }
        })?;

        let signature: Arc<[ParameterDescriptor]> = discovered
            .into_iter()
            .filter(|p| p.direction != ParameterDirection::ReturnValue)
            .collect();
        let result = signature.to_vec();
        self.entries.insert(identity.clone(), signature);
        Ok(result)
    }

    /// Clones of the cached signature, without discovering.
    pub fn get(&self, identity: &ProcedureIdentity) -> Option<Vec<ParameterDescriptor>> {
        self.entries.get(identity).map(|entry| entry.value().to_vec())
    }

    pub fn contains(&self, identity: &ProcedureIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    /// Number of cached procedures
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
