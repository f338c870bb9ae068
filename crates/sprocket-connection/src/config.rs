//! Data access configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! default = "main"
//! default_schema = "dbo"
//! command_timeout_secs = 30
//!
//! [connections]
//! orders = "main"
//!
//! [connection_strings]
//! main = "Server=tcp:localhost,1433;Database=app;IntegratedSecurity=true"
//!
//! [schemas]
//! reporting = "rpt"
//!
//! [retry]
//! attempts = 3
//! backoff_ms = 100
//! policy = "transient_only"
//!
//! [binder]
//! boolean_tokens = "true_false"
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use sprocket_core::{Result, SprocketError};
use sprocket_query::BinderOptions;

use crate::resilient::{BackoffStrategy, ResilientExecutor, RetryPolicy};

const FALLBACK_CONNECTION_NAME: &str = "default";
const DEFAULT_SCHEMA: &str = "dbo";

/// Connection names, connection strings and execution settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Connection used when a requested name cannot be resolved
    pub default: Option<String>,
    /// Schema for procedures called without one
    pub default_schema: String,
    /// Provider command timeout; 0 means no limit
    pub command_timeout_secs: u64,
    /// Seed `@computerName`, `@wasError` and `@modifiedBy` on new connections
    pub standard_defaults: bool,
    /// Alias name -> connection name
    pub connections: HashMap<String, String>,
    /// Connection name -> provider connection string
    pub connection_strings: HashMap<String, String>,
    /// Logical schema -> database schema
    pub schemas: HashMap<String, String>,
    /// Extra transient defaults seeded on every new connection
    pub default_parameters: HashMap<String, String>,
    pub retry: RetrySettings,
    pub binder: BinderOptions,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            default: None,
            default_schema: DEFAULT_SCHEMA.to_string(),
            command_timeout_secs: 30,
            standard_defaults: true,
            connections: HashMap::new(),
            connection_strings: HashMap::new(),
            schemas: HashMap::new(),
            default_parameters: HashMap::new(),
            retry: RetrySettings::default(),
            binder: BinderOptions::default(),
        }
    }
}

impl DataConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source)
            .map_err(|e| SprocketError::Configuration(format!("invalid data configuration: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading data configuration");
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn with_connection_string(
        mut self,
        name: impl Into<String>,
        connection_string: impl Into<String>,
    ) -> Self {
        self.connection_strings
            .insert(name.into(), connection_string.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>, name: impl Into<String>) -> Self {
        self.connections.insert(alias.into(), name.into());
        self
    }

    /// Resolve a requested connection name to a configured one.
    ///
    /// The lower-cased name is looked up in the alias map first, then used
    /// as-is if it has a connection string, and otherwise replaced by the
    /// configured default connection (`"default"` when none is set).
    pub fn connection_name(&self, name: &str) -> String {
        let name = name.trim().to_lowercase();
        if let Some(mapped) = lookup(&self.connections, &name) {
            return mapped.to_lowercase();
        }
        if lookup(&self.connection_strings, &name).is_some() {
            return name;
        }
        self.default
            .clone()
            .unwrap_or_else(|| FALLBACK_CONNECTION_NAME.to_string())
    }

    /// Connection string for an already resolved connection name.
    pub fn connection_string(&self, name: &str) -> Option<&str> {
        lookup(&self.connection_strings, name)
            .map(String::as_str)
            .filter(|cs| !cs.trim().is_empty())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn schema_names(&self) -> SchemaNames {
        SchemaNames {
            default_schema: if self.default_schema.trim().is_empty() {
                DEFAULT_SCHEMA.to_string()
            } else {
                self.default_schema.clone()
            },
            map: self
                .schemas
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
        }
    }
}

fn lookup<'a>(map: &'a HashMap<String, String>, key: &str) -> Option<&'a String> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Schema remapping applied to every procedure call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNames {
    default_schema: String,
    map: HashMap<String, String>,
}

impl Default for SchemaNames {
    fn default() -> Self {
        Self {
            default_schema: DEFAULT_SCHEMA.to_string(),
            map: HashMap::new(),
        }
    }
}

impl SchemaNames {
    pub fn new(default_schema: impl Into<String>) -> Self {
        Self {
            default_schema: default_schema.into(),
            map: HashMap::new(),
        }
    }

    pub fn with_mapping(mut self, from: &str, to: impl Into<String>) -> Self {
        self.map.insert(from.to_lowercase(), to.into());
        self
    }

    pub fn default_schema(&self) -> &str {
        &self.default_schema
    }

    /// Empty names take the default schema; mapped names are replaced.
    pub fn resolve(&self, schema: &str) -> String {
        let schema = schema.trim();
        if schema.is_empty() {
            return self.default_schema.clone();
        }
        self.map
            .get(&schema.to_lowercase())
            .cloned()
            .unwrap_or_else(|| schema.to_string())
    }
}

/// `[retry]` section: budget, delay and policy of resilient calls.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub attempts: u32,
    pub backoff_ms: u64,
    /// Cap for growing delays; defaults to `backoff_ms`
    pub max_backoff_ms: Option<u64>,
    /// 1.0 keeps the delay fixed
    pub multiplier: f64,
    pub jitter: bool,
    pub policy: RetryPolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 100,
            max_backoff_ms: None,
            multiplier: 1.0,
            jitter: false,
            policy: RetryPolicy::default(),
        }
    }
}

impl RetrySettings {
    pub fn backoff(&self) -> BackoffStrategy {
        let max_ms = self.max_backoff_ms.unwrap_or(self.backoff_ms);
        BackoffStrategy::new(self.backoff_ms, max_ms)
            .with_multiplier(self.multiplier)
            .with_jitter(self.jitter)
    }

    pub fn executor(&self) -> ResilientExecutor {
        ResilientExecutor::new(self.attempts, self.backoff()).with_policy(self.policy)
    }
}
