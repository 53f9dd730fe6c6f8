//! Thread-safe registry of the live scheme per attribute.
//!
//! Schemes are immutable, so reconfiguration never edits one in place. The
//! registry swaps whole `Arc`s instead: a reader either sees the old scheme or
//! the new one, never a mix.

use crate::error::Error;
use crate::scheme::EncryptionScheme;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

type SchemeTable = HashMap<String, Arc<EncryptionScheme>>;

/// Attribute name to live [`EncryptionScheme`].
#[derive(Debug, Default)]
pub struct SchemeRegistry {
    schemes: RwLock<Arc<SchemeTable>>,
}

impl SchemeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live scheme for `attribute`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if no scheme is registered.
    pub fn get(&self, attribute: &str) -> Result<Arc<EncryptionScheme>, Error> {
        self.schemes
            .read()
            .get(attribute)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("no scheme registered for {attribute}")))
    }

    /// Registers `scheme` under its attribute name, replacing any previous one.
    pub fn register(&self, scheme: Arc<EncryptionScheme>) {
        let mut guard = self.schemes.write();
        let mut table = SchemeTable::clone(&guard);
        table.insert(scheme.attribute_name().to_string(), scheme);
        *guard = Arc::new(table);
    }

    /// Replaces every scheme at once, typically after building a new config.
    pub fn replace_all<I>(&self, schemes: I)
    where
        I: IntoIterator<Item = Arc<EncryptionScheme>>,
    {
        let table: SchemeTable = schemes
            .into_iter()
            .map(|scheme| (scheme.attribute_name().to_string(), scheme))
            .collect();
        info!(attributes = table.len(), "replaced encryption schemes");
        *self.schemes.write() = Arc::new(table);
    }

    /// Returns the registered attribute names, sorted.
    #[must_use]
    pub fn attributes(&self) -> Vec<String> {
        let table = self.schemes.read().clone();
        let mut names: Vec<String> = table.keys().cloned().collect();
        names.sort();
        names
    }
}
