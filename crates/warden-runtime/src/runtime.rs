use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use warden_approvals::{
    apply_patch, can_approve_with_chain, compute_binding_hash, expire as expire_approval,
    respond as respond_approval, verify_binding, ApprovalError, ApprovalRoutingConfig,
    BindingInput,
};
use warden_canonical::hash_value;
use warden_cartridge::{
    resolve_entities, Cartridge, CartridgeContext, CartridgeRegistry, EntityRef, EntityResolution,
};
use warden_guardrails::{
    collect_keys, hydrate, matching_rate_rules, GuardrailState, GuardrailStateStore,
    MemoryGuardrailStore,
};
use warden_identity::{
    ActivationContext, CompetenceConfig, CompetenceTracker, IdentityResolver, TrustTransition,
};
use warden_ledger::{
    ActorType, AuditActor, AuditEntityRef, AuditEventType, AuditLedger, MemoryLedgerStorage,
    RecordParams, Redactor,
};
use warden_policy::{primary_entity_id, EngineInput, EvaluationContext, PolicyEngine, SpendLookup};
use warden_risk::RiskScoringConfig;
use warden_rules::Policy;
use warden_storage::{
    ApprovalRecord, ApprovalStore, EnvelopeFilter, EnvelopeStore, IdentityStore,
    MemoryApprovalStore, MemoryEnvelopeStore, MemoryIdentityStore, MemoryPolicyStore, PolicyStore,
};
use warden_types::{
    ActionEnvelope, ActionPlan, ActionProposal, ApprovalAction, ApprovalEvidence, ApprovalLevel,
    ApprovalRequest, ApprovalState, CompetenceRecord, CompositeContext, CooldownRule,
    DecisionTrace, EnvelopeStatus, ExecuteResult, GovernanceProfile, Guardrails, Principal,
    PrincipalType, ResolvedEntity, ResolvedIdentity, RiskInput,
};

use crate::backpressure::ProposalLimiter;
use crate::RuntimeError;

/// Orchestrator-level knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Per-principal proposal budget per minute.
    pub proposals_per_minute: u32,
    /// Window for composite-risk context assembly.
    pub recent_window_minutes: i64,
    /// Execute auto-approved envelopes inside `propose` /
    /// `respond_to_approval`. Observe-mode envelopes are never
    /// auto-executed.
    pub auto_execute: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            proposals_per_minute: 30,
            recent_window_minutes: 60,
            auto_execute: true,
        }
    }
}

/// Inputs to [`WardenRuntime::propose`].
#[derive(Debug, Clone)]
pub struct ProposeParams {
    pub principal_id: String,
    pub action_type: String,
    pub parameters: Value,
    /// Explicit cartridge; inferred from the action prefix when absent.
    pub cartridge_id: Option<String>,
    pub evidence: Option<String>,
    pub confidence: f64,
    pub original_message: Option<String>,
    pub conversation_id: Option<String>,
    pub source_message_id: Option<String>,
    pub organization_id: Option<String>,
    pub parent_envelope_id: Option<String>,
    /// Optional grouping when this proposal is part of a plan.
    pub plan: Option<ActionPlan>,
}

impl ProposeParams {
    pub fn new(
        principal_id: impl Into<String>,
        action_type: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            action_type: action_type.into(),
            parameters,
            cartridge_id: None,
            evidence: None,
            confidence: 1.0,
            original_message: None,
            conversation_id: None,
            source_message_id: None,
            organization_id: None,
            parent_envelope_id: None,
            plan: None,
        }
    }
}

/// What `propose` hands back.
#[derive(Debug, Clone)]
pub struct ProposeOutcome {
    pub envelope: ActionEnvelope,
    pub trace: DecisionTrace,
    pub approval: Option<ApprovalRequest>,
}

/// Inputs to [`WardenRuntime::respond_to_approval`].
#[derive(Debug, Clone)]
pub struct RespondParams {
    pub approval_id: String,
    pub action: ApprovalAction,
    pub responded_by: String,
    pub binding_hash: String,
    pub patch_value: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct RespondOutcome {
    pub envelope: ActionEnvelope,
    pub state: ApprovalState,
    pub execution: Option<ExecuteResult>,
}

/// Outcome of `simulate`: the trace, with no side effects anywhere.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub would_execute: bool,
    pub approval_required: ApprovalLevel,
    pub trace: DecisionTrace,
    pub explanation: String,
}

/// Outcome of `resolve_and_propose`.
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    Proposed(Box<ProposeOutcome>),
    NeedsClarification { question: String },
    NotFound { explanation: String },
}

/// Everything `prepare` gathers for one evaluation.
struct EvaluationBundle {
    principal: Principal,
    identity: ResolvedIdentity,
    guardrails: Guardrails,
    guardrail_state: GuardrailState,
    policies: Vec<Policy>,
    risk_input: RiskInput,
    composite: Option<CompositeContext>,
    competence: Vec<CompetenceRecord>,
    context: EvaluationContext,
}

struct ResponseLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResponseLocks {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn for_id(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// The decision-and-lifecycle engine, wired to its collaborators.
pub struct WardenRuntime {
    envelopes: Arc<dyn EnvelopeStore>,
    approvals: Arc<dyn ApprovalStore>,
    identities: Arc<dyn IdentityStore>,
    policies: Arc<dyn PolicyStore>,
    registry: Arc<CartridgeRegistry>,
    ledger: Arc<AuditLedger>,
    guardrail_store: Arc<dyn GuardrailStateStore>,
    competence: CompetenceTracker,
    engine: PolicyEngine,
    routing: ApprovalRoutingConfig,
    config: RuntimeConfig,
    limiter: ProposalLimiter,
    response_locks: ResponseLocks,
}

pub struct WardenRuntimeBuilder {
    envelopes: Option<Arc<dyn EnvelopeStore>>,
    approvals: Option<Arc<dyn ApprovalStore>>,
    identities: Option<Arc<dyn IdentityStore>>,
    policies: Option<Arc<dyn PolicyStore>>,
    registry: Option<Arc<CartridgeRegistry>>,
    ledger: Option<Arc<AuditLedger>>,
    guardrail_store: Option<Arc<dyn GuardrailStateStore>>,
    routing: ApprovalRoutingConfig,
    risk_config: RiskScoringConfig,
    competence_config: CompetenceConfig,
    config: RuntimeConfig,
}

impl Default for WardenRuntimeBuilder {
    fn default() -> Self {
        Self {
            envelopes: None,
            approvals: None,
            identities: None,
            policies: None,
            registry: None,
            ledger: None,
            guardrail_store: None,
            routing: ApprovalRoutingConfig::default(),
            risk_config: RiskScoringConfig::default(),
            competence_config: CompetenceConfig::default(),
            config: RuntimeConfig::default(),
        }
    }
}

impl WardenRuntimeBuilder {
    pub fn envelopes(mut self, store: Arc<dyn EnvelopeStore>) -> Self {
        self.envelopes = Some(store);
        self
    }

    pub fn approvals(mut self, store: Arc<dyn ApprovalStore>) -> Self {
        self.approvals = Some(store);
        self
    }

    pub fn identities(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identities = Some(store);
        self
    }

    pub fn policies(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.policies = Some(store);
        self
    }

    pub fn registry(mut self, registry: Arc<CartridgeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn ledger(mut self, ledger: Arc<AuditLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn guardrail_store(mut self, store: Arc<dyn GuardrailStateStore>) -> Self {
        self.guardrail_store = Some(store);
        self
    }

    pub fn routing(mut self, routing: ApprovalRoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    pub fn risk_config(mut self, config: RiskScoringConfig) -> Self {
        self.risk_config = config;
        self
    }

    pub fn competence_config(mut self, config: CompetenceConfig) -> Self {
        self.competence_config = config;
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the runtime; anything not supplied gets the in-memory
    /// reference implementation.
    pub fn build(self) -> WardenRuntime {
        let identities: Arc<dyn IdentityStore> = self
            .identities
            .unwrap_or_else(|| Arc::new(MemoryIdentityStore::new()));
        let config = self.config;
        WardenRuntime {
            envelopes: self
                .envelopes
                .unwrap_or_else(|| Arc::new(MemoryEnvelopeStore::new())),
            approvals: self
                .approvals
                .unwrap_or_else(|| Arc::new(MemoryApprovalStore::new())),
            identities: identities.clone(),
            policies: self
                .policies
                .unwrap_or_else(|| Arc::new(MemoryPolicyStore::new())),
            registry: self.registry.unwrap_or_else(|| Arc::new(CartridgeRegistry::new())),
            ledger: self.ledger.unwrap_or_else(|| {
                Arc::new(AuditLedger::new(
                    Arc::new(MemoryLedgerStorage::new()),
                    Redactor::default(),
                ))
            }),
            guardrail_store: self
                .guardrail_store
                .unwrap_or_else(|| Arc::new(MemoryGuardrailStore::new())),
            competence: CompetenceTracker::new(identities, self.competence_config),
            engine: PolicyEngine::new(self.risk_config),
            routing: self.routing,
            limiter: ProposalLimiter::new(config.proposals_per_minute, 60_000),
            config,
            response_locks: ResponseLocks::new(),
        }
    }
}

impl WardenRuntime {
    pub fn builder() -> WardenRuntimeBuilder {
        WardenRuntimeBuilder::default()
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    pub fn envelopes(&self) -> &Arc<dyn EnvelopeStore> {
        &self.envelopes
    }

    pub fn approvals(&self) -> &Arc<dyn ApprovalStore> {
        &self.approvals
    }

    /// Submit one intended action for evaluation.
    pub async fn propose(&self, params: ProposeParams) -> Result<ProposeOutcome, RuntimeError> {
        self.propose_with_entities(params, Vec::new()).await
    }

    /// Resolve entity references through the cartridge, then propose.
    pub async fn resolve_and_propose(
        &self,
        mut params: ProposeParams,
        entity_refs: Vec<EntityRef>,
    ) -> Result<ResolveOutcome, RuntimeError> {
        let cartridge = self.cartridge_for(&params)?;
        let context = CartridgeContext {
            principal_id: Some(params.principal_id.clone()),
            organization_id: params.organization_id.clone(),
            metadata: BTreeMap::new(),
        };

        let resolution =
            resolve_entities(&entity_refs, cartridge.as_ref(), &context, &params.parameters)
                .await?;

        match resolution {
            EntityResolution::Resolved {
                parameters,
                entities,
            } => {
                params.parameters = parameters;
                let outcome = self.propose_with_entities(params, entities).await?;
                Ok(ResolveOutcome::Proposed(Box::new(outcome)))
            }
            EntityResolution::NeedsClarification { question } => {
                Ok(ResolveOutcome::NeedsClarification { question })
            }
            EntityResolution::NotFound { explanation } => {
                Ok(ResolveOutcome::NotFound { explanation })
            }
        }
    }

    /// Run the full evaluation pipeline without touching storage, the
    /// ledger, or guardrail state.
    pub async fn simulate(&self, params: ProposeParams) -> Result<SimulationOutcome, RuntimeError> {
        let now = Utc::now();
        let proposal = self.build_proposal(&params)?;
        let bundle = self
            .prepare(&params.principal_id, &params, &proposal, now)
            .await?;
        let trace = self.evaluate(&proposal, &bundle);

        let observed = bundle.identity.governance_profile == Some(GovernanceProfile::Observe);
        let would_execute =
            observed || (!trace.is_denied() && trace.approval_required == ApprovalLevel::None);

        Ok(SimulationOutcome {
            would_execute,
            approval_required: trace.approval_required,
            explanation: trace.explanation.clone(),
            trace,
        })
    }

    async fn propose_with_entities(
        &self,
        params: ProposeParams,
        resolved_entities: Vec<ResolvedEntity>,
    ) -> Result<ProposeOutcome, RuntimeError> {
        let now = Utc::now();
        if !self.limiter.admit(&params.principal_id, now) {
            warn!(principal = %params.principal_id, "Proposal rate limit hit");
            return Err(RuntimeError::RateLimited {
                principal_id: params.principal_id.clone(),
            });
        }

        let proposal = self.build_proposal(&params)?;
        let bundle = self
            .prepare(&params.principal_id, &params, &proposal, now)
            .await?;
        let trace = self.evaluate(&proposal, &bundle);

        let mut envelope = ActionEnvelope::new(vec![proposal.clone()]);
        envelope.original_message = params.original_message.clone();
        envelope.conversation_id = params.conversation_id.clone();
        envelope.parent_envelope_id = params.parent_envelope_id.clone();
        envelope.plan = params.plan.clone();
        envelope.resolved_entities = resolved_entities;
        envelope.decision_traces.push(trace.clone());

        let observed = bundle.identity.governance_profile == Some(GovernanceProfile::Observe);

        // Decide the initial status. Observe mode forces approval-free
        // passage regardless of the trace; the trace itself is kept for
        // visibility. No approval request is ever created under observe.
        let mut approval: Option<(ApprovalRequest, ApprovalState)> = None;
        if observed {
            envelope.status = EnvelopeStatus::Approved;
        } else if trace.is_denied() {
            envelope.status = EnvelopeStatus::Denied;
        } else if trace.needs_approval() {
            match self.routing.route(
                &bundle.identity,
                trace.risk_score.category,
                Some(trace.approval_required),
            ) {
                Ok(route) => {
                    let expires_at = now + Duration::milliseconds(route.expiry_ms as i64);
                    let request = self.build_approval_request(
                        &envelope, &proposal, &trace, &bundle, &route, expires_at,
                    );
                    envelope.status = EnvelopeStatus::PendingApproval;
                    envelope.approval_ids.push(request.id.clone());
                    approval = Some((request, ApprovalState::pending(expires_at)));
                }
                Err(ApprovalError::NoApprovers) => {
                    envelope.status = EnvelopeStatus::Denied;
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            envelope.status = EnvelopeStatus::Approved;
        }

        self.envelopes.save(envelope.clone()).await?;
        if let Some((request, state)) = &approval {
            self.approvals
                .save(ApprovalRecord {
                    request: request.clone(),
                    state: state.clone(),
                    envelope_id: envelope.id.clone(),
                })
                .await?;
        }

        let event_type = if envelope.status == EnvelopeStatus::Denied {
            AuditEventType::ActionDenied
        } else {
            AuditEventType::ActionProposed
        };
        let envelope_id_for_audit = envelope.id.clone();
        self.audit(
            &mut envelope,
            RecordParams::new(
                event_type,
                actor_for(&bundle.principal),
                AuditEntityRef::envelope(envelope_id_for_audit.clone()),
                trace.explanation.clone(),
            )
            .with_envelope(envelope_id_for_audit.clone())
            .with_organization(params.organization_id.clone())
            .with_risk(trace.risk_score.category)
            .with_snapshot(json!({
                "action_type": proposal.action_type,
                "parameters": proposal.parameters,
                "final_decision": trace.final_decision,
                "approval_required": trace.approval_required,
                "governance_profile": bundle.identity.governance_profile,
            })),
        )
        .await?;
        self.envelopes.update(envelope.clone()).await?;

        info!(
            envelope = %envelope.id,
            action = %proposal.action_type,
            status = ?envelope.status,
            "Proposal processed"
        );

        if envelope.status == EnvelopeStatus::Approved && !observed && self.config.auto_execute {
            self.execute_approved(&envelope.id).await?;
            envelope = self.load_envelope(&envelope.id).await?;
        }

        Ok(ProposeOutcome {
            envelope,
            trace,
            approval: approval.map(|(request, _)| request),
        })
    }

    /// Respond to a pending approval. Atomic per approval id: two
    /// concurrent responders resolve to first-wins, the loser sees a
    /// state-machine error.
    pub async fn respond_to_approval(
        &self,
        params: RespondParams,
    ) -> Result<RespondOutcome, RuntimeError> {
        let lock = self.response_locks.for_id(&params.approval_id);
        let _guard = lock.lock().await;
        let now = Utc::now();

        let record = self
            .approvals
            .get_by_id(&params.approval_id)
            .await?
            .ok_or_else(|| {
                RuntimeError::Validation(format!("unknown approval {}", params.approval_id))
            })?;
        let mut envelope = self.load_envelope(&record.envelope_id).await?;
        let proposal = envelope
            .primary_proposal()
            .cloned()
            .ok_or_else(|| RuntimeError::Validation("envelope has no proposals".into()))?;

        // Expiry gate.
        if record.state.is_expired(now) {
            let expired = expire_approval(&record.state, now)?;
            self.approvals
                .update_state(&record.request.id, expired.clone())
                .await?;
            self.set_status(&mut envelope, EnvelopeStatus::Expired)?;
            let envelope_id_for_audit = envelope.id.clone();
            self.audit(
                &mut envelope,
                RecordParams::new(
                    AuditEventType::ActionExpired,
                    AuditActor::system("warden"),
                    AuditEntityRef::approval(record.request.id.clone()),
                    "approval expired before response",
                )
                .with_envelope(envelope_id_for_audit.clone())
                .with_snapshot(json!({
                    "expired_behavior": record.request.expired_behavior,
                    "expires_at": record.request.expires_at,
                })),
            )
            .await?;
            self.envelopes.update(envelope).await?;
            return Err(ApprovalError::Expired.into());
        }

        // Binding gate for approve and patch.
        if params.action != ApprovalAction::Reject {
            if let Err(e) = verify_binding(&record.request.binding_hash, &params.binding_hash) {
                let envelope_id_for_audit = envelope.id.clone();
                self.audit(
                    &mut envelope,
                    RecordParams::new(
                        AuditEventType::ActionRejected,
                        AuditActor::user(params.responded_by.clone()),
                        AuditEntityRef::approval(record.request.id.clone()),
                        "response rejected: stale binding hash",
                    )
                    .with_envelope(envelope_id_for_audit.clone())
                    .with_snapshot(json!({ "reason": "binding_hash_mismatch" })),
                )
                .await?;
                self.envelopes.update(envelope).await?;
                return Err(e.into());
            }
        }

        // Authorization gate.
        let responder = self.authorize_responder(&record, &proposal, &params, now).await?;

        let new_state = respond_approval(
            &record.state,
            params.action,
            &params.responded_by,
            params.patch_value.clone(),
            now,
        )?;
        self.approvals
            .update_state(&record.request.id, new_state.clone())
            .await?;

        match params.action {
            ApprovalAction::Reject => {
                self.set_status(&mut envelope, EnvelopeStatus::Denied)?;
                let envelope_id_for_audit = envelope.id.clone();
                self.audit(
                    &mut envelope,
                    RecordParams::new(
                        AuditEventType::ActionRejected,
                        actor_for(&responder),
                        AuditEntityRef::approval(record.request.id.clone()),
                        format!("rejected by {}", responder.id),
                    )
                    .with_envelope(envelope_id_for_audit.clone()),
                )
                .await?;
                self.envelopes.update(envelope.clone()).await?;
                Ok(RespondOutcome {
                    envelope,
                    state: new_state,
                    execution: None,
                })
            }
            ApprovalAction::Patch => {
                self.finish_patch(envelope, record, proposal, responder, new_state, params, now)
                    .await
            }
            ApprovalAction::Approve => {
                self.set_status(&mut envelope, EnvelopeStatus::Approved)?;
                let envelope_id_for_audit = envelope.id.clone();
                self.audit(
                    &mut envelope,
                    RecordParams::new(
                        AuditEventType::ActionApproved,
                        actor_for(&responder),
                        AuditEntityRef::approval(record.request.id.clone()),
                        format!("approved by {}", responder.id),
                    )
                    .with_envelope(envelope_id_for_audit.clone()),
                )
                .await?;
                self.envelopes.update(envelope.clone()).await?;

                let execution = if self.config.auto_execute {
                    Some(self.execute_approved(&envelope.id).await?)
                } else {
                    None
                };
                let envelope = self.load_envelope(&envelope.id).await?;
                Ok(RespondOutcome {
                    envelope,
                    state: new_state,
                    execution,
                })
            }
        }
    }

    /// Execute an approved envelope through its cartridge.
    pub async fn execute_approved(&self, envelope_id: &str) -> Result<ExecuteResult, RuntimeError> {
        let mut envelope = self.load_envelope(envelope_id).await?;
        if envelope.status != EnvelopeStatus::Approved {
            return Err(RuntimeError::InvalidStatus {
                envelope_id: envelope_id.to_string(),
                expected: "approved",
                actual: envelope.status,
            });
        }
        let proposal = envelope
            .primary_proposal()
            .cloned()
            .ok_or_else(|| RuntimeError::Validation("envelope has no proposals".into()))?;
        let principal_id = proposal
            .hidden_param("_principal_id")
            .ok_or_else(|| RuntimeError::Validation("proposal missing principal stamp".into()))?
            .to_string();
        let cartridge = self.cartridge_for_proposal(&proposal)?;
        let principal = self.load_principal(&principal_id).await?;
        let now = Utc::now();

        self.set_status(&mut envelope, EnvelopeStatus::Executing)?;
        self.envelopes.update(envelope.clone()).await?;

        let cartridge_context = CartridgeContext {
            principal_id: Some(principal_id.clone()),
            organization_id: principal.organization_id.clone(),
            metadata: BTreeMap::new(),
        };

        // Pre-execution snapshot for undo construction, when supported.
        // Read-only: an error here never blocks execution.
        let pre_state = match cartridge.snapshotter() {
            Some(snapshotter) => snapshotter
                .capture_snapshot(&proposal.action_type, &proposal.parameters, &cartridge_context)
                .await
                .ok(),
            None => None,
        };

        let envelope_id_for_audit = envelope.id.clone();
        self.audit(
            &mut envelope,
            RecordParams::new(
                AuditEventType::ActionExecuting,
                actor_for(&principal),
                AuditEntityRef::envelope(envelope_id_for_audit.clone()),
                format!("executing {}", proposal.action_type),
            )
            .with_envelope(envelope_id_for_audit.clone())
            .with_snapshot(json!({
                "action_type": proposal.action_type,
                "pre_execution_state": pre_state,
            })),
        )
        .await?;

        let mut exec_parameters = proposal.parameters.clone();
        if let Some(map) = exec_parameters.as_object_mut() {
            map.insert("_envelope_id".into(), json!(envelope.id));
            map.insert("_action_id".into(), json!(proposal.id));
        }

        let result = match cartridge
            .execute(&proposal.action_type, &exec_parameters, &cartridge_context)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(envelope = %envelope.id, error = %e, "Cartridge execution errored");
                ExecuteResult::failed(
                    format!("cartridge error: {e}"),
                    vec![proposal.action_type.clone()],
                )
            }
        };

        // Guardrail state moves only on success.
        if result.success {
            self.flush_guardrails(cartridge.as_ref(), &principal_id, &proposal, now)
                .await?;
        }

        let final_status = if result.success {
            EnvelopeStatus::Executed
        } else {
            EnvelopeStatus::Failed
        };
        self.set_status(&mut envelope, final_status)?;
        envelope.execution_results.push(result.clone());

        let transitions = if result.success {
            self.competence
                .record_success(&principal_id, &proposal.action_type)
                .await?
        } else {
            self.competence
                .record_failure(&principal_id, &proposal.action_type)
                .await?
        };
        self.audit_transitions(&mut envelope, &transitions).await?;

        let envelope_id_for_audit = envelope.id.clone();
        self.audit(
            &mut envelope,
            RecordParams::new(
                if result.success {
                    AuditEventType::ActionExecuted
                } else {
                    AuditEventType::ActionFailed
                },
                actor_for(&principal),
                AuditEntityRef::envelope(envelope_id_for_audit.clone()),
                result.summary.clone(),
            )
            .with_envelope(envelope_id_for_audit.clone())
            .with_snapshot(json!({
                "success": result.success,
                "duration_ms": result.duration_ms,
                "partial_failures": result.partial_failures,
                "external_refs": result.external_refs,
            })),
        )
        .await?;
        self.envelopes.update(envelope).await?;

        Ok(result)
    }

    /// Request the reverse of an executed envelope. The undo becomes a
    /// fresh proposal and is fully re-evaluated.
    pub async fn request_undo(&self, envelope_id: &str) -> Result<ProposeOutcome, RuntimeError> {
        let mut envelope = self.load_envelope(envelope_id).await?;
        let recipe = envelope
            .execution_results
            .iter()
            .rev()
            .find_map(|r| r.undo_recipe.clone())
            .ok_or_else(|| {
                RuntimeError::Validation(format!("envelope {envelope_id} has no undo recipe"))
            })?;
        let now = Utc::now();
        if let Some(deadline) = recipe.undo_expires_at {
            if now >= deadline {
                return Err(RuntimeError::Validation(format!(
                    "undo window for envelope {envelope_id} closed at {deadline}"
                )));
            }
        }

        let proposal = envelope
            .primary_proposal()
            .cloned()
            .ok_or_else(|| RuntimeError::Validation("envelope has no proposals".into()))?;
        let principal_id = proposal
            .hidden_param("_principal_id")
            .ok_or_else(|| RuntimeError::Validation("proposal missing principal stamp".into()))?
            .to_string();
        let cartridge_id = proposal.hidden_param("_cartridge_id").map(str::to_string);
        let principal = self.load_principal(&principal_id).await?;

        let envelope_id_for_audit = envelope.id.clone();
        self.audit(
            &mut envelope,
            RecordParams::new(
                AuditEventType::ActionUndoRequested,
                actor_for(&principal),
                AuditEntityRef::envelope(envelope_id_for_audit.clone()),
                format!("undo requested: {}", recipe.reverse_action_type),
            )
            .with_envelope(envelope_id_for_audit.clone())
            .with_snapshot(json!({
                "reverse_action_type": recipe.reverse_action_type,
                "original_action_id": recipe.original_action_id,
            })),
        )
        .await?;

        // The rollback counts against the original action's record.
        let transitions = self
            .competence
            .record_rollback(&principal_id, &proposal.action_type)
            .await?;
        self.audit_transitions(&mut envelope, &transitions).await?;
        self.envelopes.update(envelope.clone()).await?;

        let mut undo_params = ProposeParams::new(
            principal_id,
            recipe.reverse_action_type.clone(),
            recipe.reverse_parameters.clone(),
        );
        undo_params.cartridge_id = cartridge_id;
        undo_params.conversation_id = envelope.conversation_id.clone();
        undo_params.organization_id = principal.organization_id.clone();
        undo_params.parent_envelope_id = Some(envelope.id.clone());

        self.propose(undo_params).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn finish_patch(
        &self,
        mut envelope: ActionEnvelope,
        record: ApprovalRecord,
        proposal: ActionProposal,
        responder: Principal,
        new_state: ApprovalState,
        params: RespondParams,
        now: DateTime<Utc>,
    ) -> Result<RespondOutcome, RuntimeError> {
        let patch = params
            .patch_value
            .as_ref()
            .ok_or(ApprovalError::InvalidPatch)?;
        let patched = apply_patch(&proposal.parameters, patch)?;

        envelope.mutate_proposals(|proposals| {
            if let Some(first) = proposals.first_mut() {
                first.parameters = patched.clone();
            }
        });
        let patched_proposal = envelope
            .primary_proposal()
            .cloned()
            .ok_or_else(|| RuntimeError::Validation("envelope has no proposals".into()))?;

        let envelope_id_for_audit = envelope.id.clone();
        let envelope_version_for_audit = envelope.version;
        self.audit(
            &mut envelope,
            RecordParams::new(
                AuditEventType::ActionPatched,
                actor_for(&responder),
                AuditEntityRef::approval(record.request.id.clone()),
                format!("parameters patched by {}", responder.id),
            )
            .with_envelope(envelope_id_for_audit.clone())
            .with_snapshot(json!({
                "patch": patch,
                "envelope_version": envelope_version_for_audit,
            })),
        )
        .await?;

        // Re-evaluate the patched parameters end-to-end.
        let principal_id = patched_proposal
            .hidden_param("_principal_id")
            .unwrap_or(responder.id.as_str())
            .to_string();
        let mut reval_params = ProposeParams::new(
            principal_id.clone(),
            patched_proposal.action_type.clone(),
            patched_proposal.parameters.clone(),
        );
        reval_params.cartridge_id = patched_proposal
            .hidden_param("_cartridge_id")
            .map(str::to_string);
        let bundle = self
            .prepare(&principal_id, &reval_params, &patched_proposal, now)
            .await?;
        let trace = self.evaluate(&patched_proposal, &bundle);
        envelope.decision_traces.push(trace.clone());

        if trace.is_denied() {
            self.set_status(&mut envelope, EnvelopeStatus::Denied)?;
            let envelope_id_for_audit = envelope.id.clone();
            self.audit(
                &mut envelope,
                RecordParams::new(
                    AuditEventType::ActionDenied,
                    AuditActor::system("warden"),
                    AuditEntityRef::envelope(envelope_id_for_audit.clone()),
                    trace.explanation.clone(),
                )
                .with_envelope(envelope_id_for_audit.clone())
                .with_risk(trace.risk_score.category),
            )
            .await?;
            self.envelopes.update(envelope.clone()).await?;
            return Ok(RespondOutcome {
                envelope,
                state: new_state,
                execution: None,
            });
        }

        self.set_status(&mut envelope, EnvelopeStatus::Approved)?;
        let envelope_id_for_audit = envelope.id.clone();
        self.audit(
            &mut envelope,
            RecordParams::new(
                AuditEventType::ActionApproved,
                actor_for(&responder),
                AuditEntityRef::approval(record.request.id.clone()),
                format!("approved with patch by {}", responder.id),
            )
            .with_envelope(envelope_id_for_audit.clone()),
        )
        .await?;
        self.envelopes.update(envelope.clone()).await?;

        let execution = if self.config.auto_execute {
            Some(self.execute_approved(&envelope.id).await?)
        } else {
            None
        };
        let envelope = self.load_envelope(&envelope.id).await?;
        Ok(RespondOutcome {
            envelope,
            state: new_state,
            execution,
        })
    }

    async fn authorize_responder(
        &self,
        record: &ApprovalRecord,
        proposal: &ActionProposal,
        params: &RespondParams,
        now: DateTime<Utc>,
    ) -> Result<Principal, RuntimeError> {
        let mut approver_ids = record.request.approvers.clone();
        if let Some(fallback) = &record.request.fallback_approver {
            if !approver_ids.contains(fallback) {
                approver_ids.push(fallback.clone());
            }
        }

        let responder = self
            .identities
            .get_principal(&params.responded_by)
            .await?
            .ok_or_else(|| ApprovalError::UnknownResponder(params.responded_by.clone()))?;

        if approver_ids.is_empty() {
            return Ok(responder);
        }

        let delegations = self.identities.list_delegation_rules().await?;
        let resolution = can_approve_with_chain(
            &responder,
            &approver_ids,
            &delegations,
            &proposal.action_type,
            now,
        );
        if !resolution.authorized {
            warn!(
                responder = %responder.id,
                approval = %record.request.id,
                "Unauthorized approval response"
            );
            return Err(ApprovalError::NotAuthorized(responder.id.clone()).into());
        }
        if resolution.depth > 1 {
            self.ledger
                .record(
                    RecordParams::new(
                        AuditEventType::DelegationChainResolved,
                        actor_for(&responder),
                        AuditEntityRef::approval(record.request.id.clone()),
                        format!(
                            "delegation chain of depth {} resolved for {}",
                            resolution.depth, responder.id
                        ),
                    )
                    .with_envelope(record.envelope_id.clone())
                    .with_snapshot(json!({
                        "chain": resolution.chain,
                        "depth": resolution.depth,
                    })),
                )
                .await?;
        }
        Ok(responder)
    }

    /// Gather everything one evaluation needs. Read-only.
    async fn prepare(
        &self,
        principal_id: &str,
        params: &ProposeParams,
        proposal: &ActionProposal,
        now: DateTime<Utc>,
    ) -> Result<EvaluationBundle, RuntimeError> {
        let principal = self.load_principal(principal_id).await?;
        let cartridge = self.cartridge_for(params)?;

        let spec = self
            .identities
            .get_spec(principal_id)
            .await?
            .unwrap_or_else(|| warden_types::IdentitySpec::new(principal_id));
        let overlays = self.identities.list_overlays(principal_id).await?;
        let competence: Vec<CompetenceRecord> = self
            .identities
            .get_competence_record(principal_id, &proposal.action_type)
            .await?
            .into_iter()
            .collect();

        let activation = ActivationContext {
            cartridge_id: Some(cartridge.id().to_string()),
            now: Some(now),
            metadata: BTreeMap::new(),
        };
        let identity = IdentityResolver::resolve(&spec, &overlays, &activation, &competence);

        let cartridge_context = CartridgeContext {
            principal_id: Some(principal_id.to_string()),
            organization_id: params.organization_id.clone(),
            metadata: BTreeMap::new(),
        };

        // Fail closed: a cartridge that cannot describe risk gets the
        // worst-case assumption, and enrichment errors add nothing.
        let risk_input = cartridge
            .get_risk_input(&proposal.action_type, &proposal.parameters, &cartridge_context)
            .await
            .unwrap_or_else(|e| {
                warn!(cartridge = cartridge.id(), error = %e, "Risk input failed closed");
                RiskInput::worst_case()
            });
        let metadata = cartridge
            .enrich_context(&proposal.action_type, &proposal.parameters, &cartridge_context)
            .await
            .unwrap_or_default();

        let guardrails = cartridge.get_guardrails();
        let entity_id = primary_entity_id(&proposal.parameters);
        let (rate_keys, cooldown_keys) = collect_keys(
            &guardrails,
            principal_id,
            &proposal.action_type,
            entity_id.as_deref(),
        );
        let guardrail_state =
            hydrate(self.guardrail_store.as_ref(), &rate_keys, &cooldown_keys).await?;

        let policies = self.policies.list_active(Some(cartridge.id())).await?;
        let composite = self.composite_context(principal_id, now).await?;

        let context = EvaluationContext {
            cartridge_id: Some(cartridge.id().to_string()),
            principal_id: principal_id.to_string(),
            organization_id: params.organization_id.clone(),
            metadata,
            now,
        };

        Ok(EvaluationBundle {
            principal,
            identity,
            guardrails,
            guardrail_state,
            policies,
            risk_input,
            composite,
            competence,
            context,
        })
    }

    fn evaluate(&self, proposal: &ActionProposal, bundle: &EvaluationBundle) -> DecisionTrace {
        self.engine.evaluate(
            proposal,
            &EngineInput {
                context: &bundle.context,
                policies: &bundle.policies,
                guardrails: &bundle.guardrails,
                guardrail_state: &bundle.guardrail_state,
                identity: &bundle.identity,
                risk_input: &bundle.risk_input,
                spend_lookup: self.spend_lookup(),
                composite: bundle.composite,
                competence: &bundle.competence,
            },
        )
    }

    /// Hook for deployments that track spend windows; the core carries
    /// no spend aggregation of its own.
    fn spend_lookup(&self) -> Option<SpendLookup> {
        None
    }

    /// Recent activity by this principal inside the composite window.
    async fn composite_context(
        &self,
        principal_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CompositeContext>, RuntimeError> {
        let window_minutes = self.config.recent_window_minutes;
        let filter = EnvelopeFilter {
            created_after: Some(now - Duration::minutes(window_minutes)),
            ..Default::default()
        };
        let recent = self.envelopes.list(&filter).await?;

        let mut count = 0u32;
        let mut dollars = 0.0f64;
        let mut entities: HashSet<String> = HashSet::new();
        let mut cartridges: HashSet<String> = HashSet::new();
        for envelope in &recent {
            let mine = envelope
                .proposals
                .iter()
                .any(|p| p.hidden_param("_principal_id") == Some(principal_id));
            if !mine {
                continue;
            }
            for proposal in &envelope.proposals {
                count += 1;
                if let Some(amount) = proposal.parameters.get("amount").and_then(Value::as_f64) {
                    dollars += amount;
                }
                if let Some(entity) = primary_entity_id(&proposal.parameters) {
                    entities.insert(entity);
                }
                if let Some(cartridge) = proposal.hidden_param("_cartridge_id") {
                    cartridges.insert(cartridge.to_string());
                }
            }
        }

        if count == 0 {
            return Ok(None);
        }
        Ok(Some(CompositeContext {
            recent_action_count: count,
            cumulative_dollars: dollars,
            distinct_entities: entities.len() as u32,
            distinct_cartridges: cartridges.len() as u32,
            window_minutes: window_minutes as u32,
        }))
    }

    fn build_proposal(&self, params: &ProposeParams) -> Result<ActionProposal, RuntimeError> {
        if !params.parameters.is_object() {
            return Err(RuntimeError::Validation(
                "proposal parameters must be a JSON object".into(),
            ));
        }
        let cartridge = self.cartridge_for(params)?;
        let mut parameters = params.parameters.clone();
        if let Some(map) = parameters.as_object_mut() {
            map.insert("_principal_id".into(), json!(params.principal_id));
            map.insert("_cartridge_id".into(), json!(cartridge.id()));
        }
        Ok(ActionProposal {
            id: Uuid::new_v4().to_string(),
            action_type: params.action_type.clone(),
            parameters,
            evidence: params.evidence.clone(),
            confidence: params.confidence,
            source_message_id: params.source_message_id.clone(),
        })
    }

    fn build_approval_request(
        &self,
        envelope: &ActionEnvelope,
        proposal: &ActionProposal,
        trace: &DecisionTrace,
        bundle: &EvaluationBundle,
        route: &warden_approvals::ApprovalRoute,
        expires_at: DateTime<Utc>,
    ) -> ApprovalRequest {
        let context_snapshot = json!({
            "action_type": proposal.action_type,
            "parameters": proposal.parameters,
            "cartridge_id": bundle.context.cartridge_id,
            "principal_id": bundle.context.principal_id,
            "organization_id": bundle.context.organization_id,
            "metadata": bundle.context.metadata,
        });
        let trace_hash = hash_value(&serde_json::to_value(trace).unwrap_or(Value::Null));
        let snapshot_hash = hash_value(&context_snapshot);
        let binding_hash = compute_binding_hash(&BindingInput {
            envelope_id: &envelope.id,
            envelope_version: envelope.version,
            action_id: &proposal.id,
            parameters: &proposal.parameters,
            decision_trace_hash: &trace_hash,
            context_snapshot_hash: &snapshot_hash,
        });

        ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            action_id: proposal.id.clone(),
            envelope_id: envelope.id.clone(),
            summary: format!(
                "{} by {} ({} risk)",
                proposal.action_type,
                bundle.principal.display_name,
                trace.risk_score.category.as_str()
            ),
            risk_category: trace.risk_score.category,
            binding_hash,
            evidence: ApprovalEvidence {
                decision_trace: trace.clone(),
                context_snapshot,
                identity_snapshot: bundle.identity.clone(),
            },
            suggested_actions: vec!["approve".into(), "reject".into(), "patch".into()],
            approvers: route.approvers.clone(),
            fallback_approver: route.fallback_approver.clone(),
            expires_at,
            expired_behavior: route.expired_behavior,
        }
    }

    /// Record one execution against guardrail state and flush it. Only
    /// called on success; failures leave guardrail state untouched.
    async fn flush_guardrails(
        &self,
        cartridge: &dyn Cartridge,
        principal_id: &str,
        proposal: &ActionProposal,
        now: DateTime<Utc>,
    ) -> Result<(), RuntimeError> {
        let guardrails = cartridge.get_guardrails();
        let entity_id = primary_entity_id(&proposal.parameters);
        let (rate_keys, cooldown_keys) = collect_keys(
            &guardrails,
            principal_id,
            &proposal.action_type,
            entity_id.as_deref(),
        );
        let mut state =
            hydrate(self.guardrail_store.as_ref(), &rate_keys, &cooldown_keys).await?;

        for (rule, key) in matching_rate_rules(&guardrails, principal_id, &proposal.action_type) {
            let counter = state.bump_rate(&key, rule.window_ms, now);
            self.guardrail_store
                .set_rate_limit(&key, counter, rule.window_ms)
                .await?;
        }
        if let Some(entity) = entity_id {
            for rule in guardrails
                .cooldowns
                .iter()
                .filter(|c| c.applies_to(&proposal.action_type))
            {
                let key = CooldownRule::entity_key(principal_id, &entity);
                state.stamp_cooldown(&key, now);
                self.guardrail_store
                    .set_cooldown(&key, now, rule.cooldown_ms)
                    .await?;
            }
        }
        Ok(())
    }

    async fn audit_transitions(
        &self,
        envelope: &mut ActionEnvelope,
        transitions: &[TrustTransition],
    ) -> Result<(), RuntimeError> {
        for transition in transitions {
            self.audit(
                envelope,
                RecordParams::new(
                    AuditEventType::CompetenceTrustChanged,
                    AuditActor::system("warden"),
                    AuditEntityRef::principal(transition.principal_id.clone()),
                    format!(
                        "competence {:?} for {} on {}",
                        transition.kind, transition.principal_id, transition.action_type
                    ),
                )
                .with_envelope(envelope.id.clone())
                .with_snapshot(json!({
                    "kind": transition.kind,
                    "action_type": transition.action_type,
                    "score": transition.score,
                })),
            )
            .await?;
        }
        Ok(())
    }

    async fn audit(
        &self,
        envelope: &mut ActionEnvelope,
        params: RecordParams,
    ) -> Result<(), RuntimeError> {
        let recorded = self.ledger.record(params).await?;
        envelope.audit_entry_ids.push(recorded.entry.id);
        Ok(())
    }

    fn set_status(
        &self,
        envelope: &mut ActionEnvelope,
        to: EnvelopeStatus,
    ) -> Result<(), RuntimeError> {
        if !envelope.status.can_transition_to(to) {
            return Err(RuntimeError::InvalidStatus {
                envelope_id: envelope.id.clone(),
                expected: "a status with a legal edge to the target",
                actual: envelope.status,
            });
        }
        envelope.status = to;
        envelope.updated_at = Utc::now();
        Ok(())
    }

    fn cartridge_for(&self, params: &ProposeParams) -> Result<Arc<dyn Cartridge>, RuntimeError> {
        match &params.cartridge_id {
            Some(id) => self
                .registry
                .get(id)
                .ok_or_else(|| RuntimeError::UnknownCartridge(id.clone())),
            None => self
                .registry
                .resolve_for_action(&params.action_type)
                .ok_or_else(|| RuntimeError::UnknownCartridge(params.action_type.clone())),
        }
    }

    fn cartridge_for_proposal(
        &self,
        proposal: &ActionProposal,
    ) -> Result<Arc<dyn Cartridge>, RuntimeError> {
        if let Some(id) = proposal.hidden_param("_cartridge_id") {
            return self
                .registry
                .get(id)
                .ok_or_else(|| RuntimeError::UnknownCartridge(id.to_string()));
        }
        self.registry
            .resolve_for_action(&proposal.action_type)
            .ok_or_else(|| RuntimeError::UnknownCartridge(proposal.action_type.clone()))
    }

    async fn load_envelope(&self, id: &str) -> Result<ActionEnvelope, RuntimeError> {
        self.envelopes
            .get_by_id(id)
            .await?
            .ok_or_else(|| RuntimeError::Validation(format!("unknown envelope {id}")))
    }

    async fn load_principal(&self, id: &str) -> Result<Principal, RuntimeError> {
        self.identities
            .get_principal(id)
            .await?
            .ok_or_else(|| RuntimeError::UnknownPrincipal(id.to_string()))
    }
}

fn actor_for(principal: &Principal) -> AuditActor {
    let actor_type = match principal.principal_type {
        PrincipalType::User => ActorType::User,
        PrincipalType::Agent => ActorType::Agent,
        PrincipalType::System => ActorType::System,
    };
    AuditActor {
        id: principal.id.clone(),
        actor_type,
    }
}
