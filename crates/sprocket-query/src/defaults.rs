//! Connection-level default parameter values

use std::collections::HashMap;

use sprocket_core::{SuppliedParameter, parameter_key};

#[derive(Debug, Clone)]
struct DefaultEntry {
    parameter: SuppliedParameter,
    persistent: bool,
}

/// Fallback values bound to any procedure parameter of the same name that
/// the caller did not supply.
///
/// Persistent defaults survive [`clone_persistent`](Self::clone_persistent);
/// transient ones do not. Once a name has been added as persistent it stays
/// persistent even if a later transient add replaces its value.
#[derive(Debug, Clone, Default)]
pub struct DefaultParameterSet {
    entries: HashMap<String, DefaultEntry>,
}

impl DefaultParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a default that is dropped when the connection is cloned.
    pub fn add(&mut self, parameter: SuppliedParameter) {
        self.insert(parameter, false);
    }

    /// Add or replace a default that is carried over to connection clones.
    pub fn add_persistent(&mut self, parameter: SuppliedParameter) {
        self.insert(parameter, true);
    }

    fn insert(&mut self, parameter: SuppliedParameter, persistent: bool) {
        let key = parameter.key();
        let persistent = persistent || self.entries.get(&key).is_some_and(|e| e.persistent);
        self.entries.insert(
            key,
            DefaultEntry {
                parameter,
                persistent,
            },
        );
    }

    /// Look up a default by name, ignoring case and the `@` prefix.
    pub fn get(&self, name: &str) -> Option<&SuppliedParameter> {
        self.entries.get(&parameter_key(name)).map(|e| &e.parameter)
    }

    pub fn remove(&mut self, name: &str) -> Option<SuppliedParameter> {
        self.entries.remove(&parameter_key(name)).map(|e| e.parameter)
    }

    pub fn is_persistent(&self, name: &str) -> bool {
        self.entries
            .get(&parameter_key(name))
            .is_some_and(|e| e.persistent)
    }

    /// A new set holding copies of the persistent defaults only.
    pub fn clone_persistent(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(_, e)| e.persistent)
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SuppliedParameter> {
        self.entries.values().map(|e| &e.parameter)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
