//! Cartridge registration and lookup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::{Cartridge, CartridgeContext, CartridgeError, CartridgeHealth};

/// Registry of live cartridges, with action-prefix inference for
/// proposals that don't name their cartridge explicitly.
#[derive(Default)]
pub struct CartridgeRegistry {
    cartridges: RwLock<HashMap<String, Arc<dyn Cartridge>>>,
    /// First dotted segment of an action type → cartridge id.
    prefixes: RwLock<HashMap<String, String>>,
}

impl CartridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cartridge: Arc<dyn Cartridge>) {
        let id = cartridge.id().to_string();
        info!(cartridge = %id, "Cartridge registered");
        self.cartridges.write().insert(id, cartridge);
    }

    /// Map an action-type prefix (the first dotted segment, e.g. `ads`)
    /// to a cartridge id.
    pub fn register_prefix(&self, prefix: impl Into<String>, cartridge_id: impl Into<String>) {
        self.prefixes.write().insert(prefix.into(), cartridge_id.into());
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Cartridge>> {
        self.cartridges.read().get(id).cloned()
    }

    /// Resolve the cartridge for an action type: an explicit prefix
    /// mapping wins; otherwise a cartridge whose id is the prefix, or
    /// starts with `<prefix>-`.
    pub fn resolve_for_action(&self, action_type: &str) -> Option<Arc<dyn Cartridge>> {
        let prefix = action_type.split('.').next()?;
        if let Some(id) = self.prefixes.read().get(prefix) {
            return self.get(id);
        }
        let cartridges = self.cartridges.read();
        cartridges
            .iter()
            .find(|(id, _)| *id == prefix || id.starts_with(&format!("{prefix}-")))
            .map(|(_, c)| c.clone())
    }

    pub fn ids(&self) -> Vec<String> {
        self.cartridges.read().keys().cloned().collect()
    }

    fn all(&self) -> Vec<Arc<dyn Cartridge>> {
        self.cartridges.read().values().cloned().collect()
    }

    /// Initialize every registered cartridge. Stops on the first failure;
    /// a cartridge that cannot set up must not receive actions.
    pub async fn initialize_all(&self, context: &CartridgeContext) -> Result<(), CartridgeError> {
        for cartridge in self.all() {
            cartridge.initialize(context).await?;
            info!(cartridge = cartridge.id(), "Cartridge initialized");
        }
        Ok(())
    }

    /// Health of every registered cartridge, keyed by id.
    pub async fn health_report(&self) -> HashMap<String, CartridgeHealth> {
        let mut report = HashMap::new();
        for cartridge in self.all() {
            report.insert(cartridge.id().to_string(), cartridge.health_check().await);
        }
        report
    }
}
