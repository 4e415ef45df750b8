//! A configurable mock cartridge for tests.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use warden_types::{ExecuteResult, Guardrails, RiskInput, UndoRecipe};

use crate::entity::EntityLookup;
use crate::{
    Cartridge, CartridgeContext, CartridgeError, CartridgeHealth, EntityResolver, HealthStatus,
    Snapshotter,
};

/// Test cartridge with configurable risk, guardrails, execution
/// outcomes, undo recipes, and entity fixtures. Records every execute
/// call for assertions.
pub struct MockCartridge {
    id: String,
    risk_input: RiskInput,
    guardrails: Guardrails,
    /// Queued results consumed in order; when empty, executes succeed.
    queued_results: Mutex<VecDeque<ExecuteResult>>,
    /// Undo recipe attached to successful default executions.
    undo_recipe: Option<UndoRecipe>,
    entity_fixtures: HashMap<(String, String), EntityLookup>,
    snapshot: Option<Value>,
    executed: Mutex<Vec<(String, Value)>>,
    fail_execution: Mutex<bool>,
}

impl MockCartridge {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            risk_input: RiskInput {
                base_risk: warden_types::RiskCategory::None,
                exposure: Default::default(),
                reversibility: warden_types::Reversibility::Full,
                sensitivity: Default::default(),
            },
            guardrails: Guardrails::default(),
            queued_results: Mutex::new(VecDeque::new()),
            undo_recipe: None,
            entity_fixtures: HashMap::new(),
            snapshot: None,
            executed: Mutex::new(Vec::new()),
            fail_execution: Mutex::new(false),
        }
    }

    pub fn with_risk_input(mut self, risk_input: RiskInput) -> Self {
        self.risk_input = risk_input;
        self
    }

    pub fn with_guardrails(mut self, guardrails: Guardrails) -> Self {
        self.guardrails = guardrails;
        self
    }

    /// Attach an undo recipe to default successful executions. The
    /// original action/envelope ids are stamped by the runtime's
    /// conventions, so fixtures fill only the reverse half.
    pub fn with_undo_recipe(mut self, recipe: UndoRecipe) -> Self {
        self.undo_recipe = Some(recipe);
        self
    }

    pub fn with_entity(
        mut self,
        input_ref: impl Into<String>,
        entity_type: impl Into<String>,
        lookup: EntityLookup,
    ) -> Self {
        self.entity_fixtures
            .insert((input_ref.into(), entity_type.into()), lookup);
        self
    }

    pub fn with_snapshot(mut self, snapshot: Value) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Queue an explicit result for the next execute call.
    pub fn queue_result(&self, result: ExecuteResult) {
        self.queued_results.lock().push_back(result);
    }

    /// Make every subsequent execute return an error (not a failure
    /// result) until cleared.
    pub fn set_fail_execution(&self, fail: bool) {
        *self.fail_execution.lock() = fail;
    }

    /// Every (action_type, parameters) pair executed so far.
    pub fn executed_calls(&self) -> Vec<(String, Value)> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl Cartridge for MockCartridge {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self, _context: &CartridgeContext) -> Result<(), CartridgeError> {
        Ok(())
    }

    async fn get_risk_input(
        &self,
        _action_type: &str,
        _parameters: &Value,
        _context: &CartridgeContext,
    ) -> Result<RiskInput, CartridgeError> {
        Ok(self.risk_input.clone())
    }

    fn get_guardrails(&self) -> Guardrails {
        self.guardrails.clone()
    }

    async fn enrich_context(
        &self,
        _action_type: &str,
        _parameters: &Value,
        _context: &CartridgeContext,
    ) -> Result<BTreeMap<String, Value>, CartridgeError> {
        Ok(BTreeMap::new())
    }

    async fn execute(
        &self,
        action_type: &str,
        parameters: &Value,
        _context: &CartridgeContext,
    ) -> Result<ExecuteResult, CartridgeError> {
        self.executed
            .lock()
            .push((action_type.to_string(), parameters.clone()));

        if *self.fail_execution.lock() {
            return Err(CartridgeError::Provider("simulated provider outage".into()));
        }

        if let Some(queued) = self.queued_results.lock().pop_front() {
            return Ok(queued);
        }

        let mut result = ExecuteResult::succeeded(format!("executed {action_type}"), 5);
        if let Some(recipe) = &self.undo_recipe {
            result.rollback_available = true;
            result.undo_recipe = Some(recipe.clone());
        }
        Ok(result)
    }

    async fn health_check(&self) -> CartridgeHealth {
        let mut capabilities = vec!["execute".to_string(), "risk".to_string()];
        if !self.entity_fixtures.is_empty() {
            capabilities.push("resolve_entity".to_string());
        }
        if self.snapshot.is_some() {
            capabilities.push("capture_snapshot".to_string());
        }
        CartridgeHealth {
            status: HealthStatus::Healthy,
            capabilities,
        }
    }

    fn entity_resolver(&self) -> Option<&dyn EntityResolver> {
        if self.entity_fixtures.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    fn snapshotter(&self) -> Option<&dyn Snapshotter> {
        self.snapshot.as_ref().map(|_| self as &dyn Snapshotter)
    }
}

#[async_trait]
impl EntityResolver for MockCartridge {
    async fn resolve_entity(
        &self,
        input_ref: &str,
        entity_type: &str,
        _context: &CartridgeContext,
    ) -> Result<EntityLookup, CartridgeError> {
        self.entity_fixtures
            .get(&(input_ref.to_string(), entity_type.to_string()))
            .cloned()
            .ok_or_else(|| CartridgeError::Provider(format!("no fixture for {input_ref}")))
    }
}

#[async_trait]
impl Snapshotter for MockCartridge {
    async fn capture_snapshot(
        &self,
        _action_type: &str,
        _parameters: &Value,
        _context: &CartridgeContext,
    ) -> Result<Value, CartridgeError> {
        Ok(self.snapshot.clone().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn default_execution_succeeds_and_records() {
        let cartridge = MockCartridge::new("ads-spend");
        let result = cartridge
            .execute(
                "ads.campaign.pause",
                &json!({"campaign_id": "c1"}),
                &CartridgeContext::default(),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(cartridge.executed_calls().len(), 1);
    }

    #[tokio::test]
    async fn queued_results_consume_in_order() {
        let cartridge = MockCartridge::new("ads-spend");
        cartridge.queue_result(ExecuteResult::failed("boom", vec!["c1".into()]));
        let first = cartridge
            .execute("a", &json!({}), &CartridgeContext::default())
            .await
            .unwrap();
        assert!(!first.success);

        let second = cartridge
            .execute("a", &json!({}), &CartridgeContext::default())
            .await
            .unwrap();
        assert!(second.success);
    }

    #[tokio::test]
    async fn fail_execution_errors_instead_of_returning() {
        let cartridge = MockCartridge::new("ads-spend");
        cartridge.set_fail_execution(true);
        assert!(cartridge
            .execute("a", &json!({}), &CartridgeContext::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn capabilities_reflect_configuration() {
        let plain = MockCartridge::new("ads-spend");
        assert!(plain.entity_resolver().is_none());
        assert!(plain.snapshotter().is_none());

        let configured = MockCartridge::new("ads-spend")
            .with_entity("x", "campaign", EntityLookup::resolved("c1", "x", 1.0))
            .with_snapshot(json!({"budget": 100}));
        assert!(configured.entity_resolver().is_some());
        assert!(configured.snapshotter().is_some());

        let health = configured.health_check().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.capabilities.contains(&"resolve_entity".to_string()));
    }
}
