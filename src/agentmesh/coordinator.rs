//! The top-level execution coordinator.
//!
//! [`ExecutionCoordinator`] owns the per-query state machine and wires every
//! other component together:
//!
//! ```text
//! process_query
//!   ├─ Intake      validate, resolve session, open tracker session
//!   ├─ Route       AgentRouter → ordered agent set (fail fast on none)
//!   ├─ Plan        complexity heuristic, collaboration decision
//!   ├─ Retrieve    KnowledgeRetriever, concurrent with prompt assembly
//!   ├─ Execute     per-agent LLM calls (sequential or parallel),
//!   │              per-agent timeout, capability fallback, metrics
//!   ├─ Synthesize  deterministic merge + citation union
//!   └─ Commit      conversation append, tracker close, metrics flush
//! ```
//!
//! Budgets: 120 s per execution, 60 s per agent step, 4096 output tokens per
//! call, at most 3 agents in parallel — all configurable via
//! [`MeshConfig`].
//!
//! Cancellation is cooperative: [`cancel`](ExecutionCoordinator::cancel)
//! latches a watch signal that every await in the execution path races
//! against; the terminal tracker event carries the `cancelled` kind, and the
//! canceller reports `cancel_timeout` when the execution fails to wind down
//! within the 2 s grace period.
//!
//! Besides [`process_query`](ExecutionCoordinator::process_query), the
//! coordinator exposes the full typed inbound surface the transport edge
//! wraps: session state, session listing, conversation reads, feedback,
//! knowledge search, realtime subscriptions, and insight application.

use crate::agentmesh::agent::AgentDefinition;
use crate::agentmesh::clock::Clock;
use crate::agentmesh::config::MeshConfig;
use crate::agentmesh::conversation::{ConversationMemory, SessionInfo, SessionRecord};
use crate::agentmesh::error::{ErrorKind, MeshError};
use crate::agentmesh::knowledge::{Citation, KnowledgeBundle, KnowledgeRetriever, QueryFeatures, VectorHit};
use crate::agentmesh::llm_pool::{LlmPool, TaskProfile};
use crate::agentmesh::metrics::{FeedbackOutcome, InteractionRecord, MetricsStore};
use crate::agentmesh::model_client::Role;
use crate::agentmesh::registry::AgentRegistry;
use crate::agentmesh::router::{AgentRouter, RouteDecision};
use crate::agentmesh::tracker::{
    AgentStatus, EventSink, LogLevel, RealtimeTracker, SessionPhase, SessionState,
    SubscriptionFilter,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, RwLock};

/// Characters of each knowledge snippet included in a prompt.
const SNIPPET_PROMPT_CHARS: usize = 600;

/// One typed inbound query request.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Existing session to continue, or `None` for a fresh one.
    pub session_id: Option<String>,
    /// Optional end-user identity.
    pub user_id: Option<String>,
    /// The natural-language query.
    pub query: String,
    /// Extra caller-supplied context prepended to the conversation context.
    pub context: Option<String>,
}

impl ExecutionRequest {
    /// Create a request for a fresh session.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            session_id: None,
            user_id: None,
            query: query.into(),
            context: None,
        }
    }

    /// Continue an existing session (builder pattern).
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a user id (builder pattern).
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach caller-supplied context (builder pattern).
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Latency/cost/quality accounting for one execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionPerformance {
    /// End-to-end wall-clock time in milliseconds.
    pub response_time_ms: u64,
    /// Total tokens billed across all agents and fallbacks.
    pub tokens_used: u64,
    /// Total cost across all calls.
    pub cost: f64,
    /// Mean assessed quality of the successful agent answers.
    pub quality_score: f64,
}

/// One non-fatal problem surfaced with a (partial) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionWarning {
    /// The affected agent, when attributable.
    pub agent_name: Option<String>,
    /// The stable error tag.
    pub error_kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

/// The coordinator's answer to one [`ExecutionRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// The session the query ran in (fresh or continued).
    pub session_id: String,
    /// The synthesized response text.
    pub response: String,
    /// Citations backing the response, in snippet order.
    pub citations: Vec<Citation>,
    /// Display names of the agents that contributed.
    pub agents_used: Vec<String>,
    /// Latency/cost/quality accounting.
    pub performance: ExecutionPerformance,
    /// Non-fatal problems (failed agents, failed knowledge sources).
    pub warnings: Vec<ExecutionWarning>,
    /// `Some(partial_failure)` when any routed agent failed (including all
    /// of them, in which case `response` carries the best partial output,
    /// possibly empty); `None` on a clean run.
    pub outcome_kind: Option<ErrorKind>,
}

/// Response shape of the `searchKnowledge` surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSearchResponse {
    /// Matching articles, best first.
    pub results: Vec<VectorHit>,
    /// Number of results returned.
    pub total_results: usize,
    /// The query as executed.
    pub query: String,
}

/// What one agent produced.
struct AgentAnswer {
    text: String,
    quality: f64,
    tokens: u64,
    cost: f64,
}

struct AgentRun {
    agent: AgentDefinition,
    result: Result<AgentAnswer, MeshError>,
}

/// The orchestration core's top-level component. One instance per
/// deployment; cheap to share behind an `Arc`.
pub struct ExecutionCoordinator {
    config: MeshConfig,
    router: AgentRouter,
    registry: Arc<AgentRegistry>,
    pool: Arc<LlmPool>,
    retriever: Arc<KnowledgeRetriever>,
    memory: Arc<ConversationMemory>,
    tracker: Arc<RealtimeTracker>,
    metrics: Arc<MetricsStore>,
    clock: Clock,
    cancellations: RwLock<HashMap<String, watch::Sender<bool>>>,
}

impl ExecutionCoordinator {
    /// Wire a coordinator over its collaborating components with the given
    /// configuration.
    pub fn new(
        config: MeshConfig,
        registry: Arc<AgentRegistry>,
        pool: Arc<LlmPool>,
        retriever: Arc<KnowledgeRetriever>,
        memory: Arc<ConversationMemory>,
        tracker: Arc<RealtimeTracker>,
        metrics: Arc<MetricsStore>,
    ) -> Self {
        let mut router = AgentRouter::new(Arc::clone(&registry))
            .with_default_agent(config.default_agent.clone())
            .with_top_k(config.route_top_k);
        if let Some(orchestrator) = &config.orchestrator_agent {
            router = router.with_orchestrator(orchestrator.clone());
        }
        Self {
            config,
            router,
            registry,
            pool,
            retriever,
            memory,
            tracker,
            metrics,
            clock: Clock::new(),
            cancellations: RwLock::new(HashMap::new()),
        }
    }

    // ------------------------------------------------------------------
    // Inbound surface
    // ------------------------------------------------------------------

    /// Execute one query end to end. See the module docs for the stage
    /// breakdown.
    pub async fn process_query(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionOutcome, MeshError> {
        if request.query.trim().is_empty() {
            return Err(MeshError::invalid_input("query must not be empty"));
        }

        let started = Instant::now();
        let session_id = self
            .memory
            .ensure_session(request.session_id.as_deref(), request.user_id.clone())
            .await;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancellations
            .write()
            .await
            .insert(session_id.clone(), cancel_tx);

        let run = tokio::time::timeout(
            self.config.execution_timeout,
            self.run_execution(&session_id, &request, cancel_rx, started),
        )
        .await;

        self.cancellations.write().await.remove(&session_id);

        match run {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                self.tracker
                    .close_session(&session_id, e.kind.as_str())
                    .await;
                Err(e)
            }
            Err(_) => {
                let err = MeshError::timeout(format!(
                    "execution exceeded {:?}",
                    self.config.execution_timeout
                ));
                self.tracker
                    .close_session(&session_id, err.kind.as_str())
                    .await;
                Err(err)
            }
        }
    }

    /// Cooperatively cancel an in-flight execution.
    ///
    /// Latches the cancel signal and waits up to the configured grace period
    /// (2 s default) for the execution to wind down. Returns `not_found`
    /// when nothing is in flight for the session and `timeout`
    /// (`cancel_timeout`) when the execution failed to stop in time.
    pub async fn cancel(&self, session_id: &str) -> Result<(), MeshError> {
        {
            let cancellations = self.cancellations.read().await;
            match cancellations.get(session_id) {
                Some(tx) => {
                    let _ = tx.send(true);
                }
                None => {
                    return Err(MeshError::not_found(format!(
                        "no execution in flight for session {}",
                        session_id
                    )))
                }
            }
        }

        // The execution removes its cancellation entry when it winds down.
        let deadline = Instant::now() + self.config.cancel_grace;
        while Instant::now() < deadline {
            if !self.cancellations.read().await.contains_key(session_id) {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        log::error!("cancel_timeout: session {} did not stop in time", session_id);
        Err(MeshError::timeout(format!(
            "cancel_timeout: session {} still running after {:?}",
            session_id, self.config.cancel_grace
        )))
    }

    /// Realtime state of a session, or `not_found`.
    pub async fn session_state(&self, session_id: &str) -> Result<SessionState, MeshError> {
        self.tracker
            .snapshot(session_id)
            .await
            .ok_or_else(|| MeshError::not_found(format!("session {}", session_id)))
    }

    /// Page through known sessions, most recent activity first.
    pub async fn list_sessions(&self, limit: usize, offset: usize) -> Vec<SessionInfo> {
        self.memory.list_sessions(limit, offset).await
    }

    /// Full conversation for a session, or `not_found`.
    pub async fn conversation(&self, session_id: &str) -> Result<SessionRecord, MeshError> {
        self.memory
            .conversation(session_id)
            .await
            .ok_or_else(|| MeshError::not_found(format!("session {}", session_id)))
    }

    /// Attach satisfaction feedback (1–5) to a completed session and derive
    /// learning insights.
    pub async fn submit_feedback(
        &self,
        session_id: &str,
        rating: u8,
        comment: Option<String>,
    ) -> Result<FeedbackOutcome, MeshError> {
        if !self.memory.contains(session_id).await {
            return Err(MeshError::not_found(format!("session {}", session_id)));
        }
        self.memory.set_satisfaction(session_id, rating).await;
        self.metrics.feedback(session_id, rating, comment).await
    }

    /// Search the knowledge base directly (limit clamped to 50).
    pub async fn search_knowledge(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&str>,
    ) -> Result<KnowledgeSearchResponse, MeshError> {
        let results = self.retriever.search(query, limit, filter).await?;
        Ok(KnowledgeSearchResponse {
            total_results: results.len(),
            results,
            query: query.to_string(),
        })
    }

    /// Subscribe to realtime events. The returned sink is bounded and
    /// drop-oldest; see [`RealtimeTracker`].
    pub async fn subscribe(
        &self,
        subscriber_id: &str,
        filter: SubscriptionFilter,
    ) -> Arc<EventSink> {
        self.tracker.subscribe(subscriber_id, filter).await
    }

    /// Remove a realtime subscriber.
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        self.tracker.unsubscribe(subscriber_id).await
    }

    /// Acknowledge liveness for a realtime subscriber (heartbeat reply).
    pub async fn ack_subscriber(&self, subscriber_id: &str) {
        self.tracker.ack(subscriber_id).await
    }

    /// Every active agent definition, for admin/UI surfaces.
    pub async fn agents(&self) -> Vec<AgentDefinition> {
        self.registry.active_agents().await
    }

    /// Apply a pending learning insight: marks it applied and feeds the
    /// implied weight adjustment into the LLM pool. This is the learning
    /// loop's actuation point.
    pub async fn apply_insight(&self, insight_id: &str) -> Result<(), MeshError> {
        match self.metrics.apply_insight(insight_id).await {
            Some(adjustment) => {
                self.pool.tune_weights(adjustment).await;
                Ok(())
            }
            None => Err(MeshError::not_found(format!("insight {}", insight_id))),
        }
    }

    // ------------------------------------------------------------------
    // Execution FSM
    // ------------------------------------------------------------------

    async fn run_execution(
        &self,
        session_id: &str,
        request: &ExecutionRequest,
        cancel: watch::Receiver<bool>,
        started: Instant,
    ) -> Result<ExecutionOutcome, MeshError> {
        let query = request.query.trim().to_string();

        // Intake: prior context is captured before the new turn is recorded
        // so the prompt context holds previous turns only.
        let mut context = self.memory.context(session_id).await;
        if let Some(extra) = &request.context {
            if context.is_empty() {
                context = extra.clone();
            } else {
                context = format!("{}\n{}", extra, context);
            }
        }
        self.memory
            .append(session_id, Role::User, query.clone(), None)
            .await;
        self.tracker.open_session(session_id, &query, &[]).await;

        // Route.
        self.tracker
            .set_phase(session_id, SessionPhase::Analyzing, 10.0)
            .await;
        let routes = match self.router.route(&query).await {
            Ok(routes) => routes,
            Err(e) => return Err(e),
        };
        for route in &routes {
            self.tracker
                .set_agent_status(session_id, &route.agent.id, AgentStatus::Idle, 0.0, "routed")
                .await;
        }

        // Plan.
        let features = QueryFeatures::detect(&query);
        let complexity = complexity_of(&query, &features);
        let collaboration_enabled = complexity >= 0.6 || routes.len() > 1;
        self.tracker
            .append_log(
                session_id,
                LogLevel::Info,
                None,
                &format!(
                    "planned execution: {} agent(s), complexity {:.2}, collaboration {}",
                    routes.len(),
                    complexity,
                    collaboration_enabled
                ),
                None,
            )
            .await;

        // Retrieve. Prompt assembly for the routed agents (per-agent system
        // prompts plus the shared context and question sections) runs while
        // the knowledge sources are in flight; the join below only splices
        // the knowledge section into otherwise-finished prompts.
        let retriever = Arc::clone(&self.retriever);
        let retrieve_query = query.clone();
        let knowledge_task = tokio::spawn(async move { retriever.retrieve(&retrieve_query).await });
        let knowledge_abort_handle = knowledge_task.abort_handle();

        self.tracker
            .set_phase(session_id, SessionPhase::Processing, 30.0)
            .await;
        let plan = PromptPlan::assemble(&routes, &context, &query);

        let mut cancel_for_knowledge = cancel.clone();
        let knowledge = tokio::select! {
            _ = cancel_for_knowledge.changed() => {
                knowledge_abort_handle.abort();
                return Err(MeshError::cancelled("execution cancelled during retrieval"));
            }
            joined = knowledge_task => joined.unwrap_or_else(|e| {
                log::warn!("knowledge task panicked: {}", e);
                KnowledgeBundle::default()
            }),
        };

        let mut warnings: Vec<ExecutionWarning> = knowledge
            .warnings
            .iter()
            .map(|w| ExecutionWarning {
                agent_name: None,
                error_kind: ErrorKind::KnowledgeUnavailable,
                message: w.clone(),
            })
            .collect();

        // Execute.
        let parallel = collaboration_enabled
            && routes.len() > 1
            && routes.len() <= self.config.max_parallel_agents
            && tool_sets_disjoint(&routes);
        let runs = if parallel {
            self.execute_parallel(session_id, &routes, &plan, &query, &knowledge, complexity, &cancel)
                .await?
        } else {
            self.execute_sequential(
                session_id,
                &routes,
                &plan,
                &query,
                &knowledge,
                complexity,
                collaboration_enabled,
                &cancel,
            )
            .await?
        };

        // Record metrics per agent (P7: every processed query appends at
        // least one record per involved agent).
        let mut performance = ExecutionPerformance::default();
        let mut successes = 0usize;
        let mut quality_sum = 0.0;
        let mut last_error: Option<MeshError> = None;
        for run in &runs {
            match &run.result {
                Ok(answer) => {
                    successes += 1;
                    quality_sum += answer.quality;
                    performance.tokens_used += answer.tokens;
                    performance.cost += answer.cost;
                }
                Err(e) => {
                    warnings.push(ExecutionWarning {
                        agent_name: Some(run.agent.name.clone()),
                        error_kind: e.kind,
                        message: e.message.clone(),
                    });
                    last_error = Some(e.clone());
                }
            }
        }

        // Agent-level failures degrade to a partial result; only kinds fatal
        // to the whole execution may become the sole outcome.
        if successes == 0 {
            if let Some(e) = last_error.as_ref().filter(|e| e.kind.is_fatal()) {
                return Err(e.clone());
            }
            log::warn!(
                "all routed agents failed for session {}; surfacing partial failure",
                session_id
            );
        }

        // Synthesize.
        self.tracker
            .set_phase(session_id, SessionPhase::Finishing, 90.0)
            .await;
        let response = synthesize(&runs);
        let citations = knowledge.citations.clone();
        let agents_used: Vec<String> = runs
            .iter()
            .filter(|r| r.result.is_ok())
            .map(|r| r.agent.name.clone())
            .collect();

        // Commit. With zero survivors there is no answer text to record, but
        // the rest of the commit path still runs.
        if !response.is_empty() {
            let answering_agent = agents_used.first().cloned();
            self.memory
                .append_with_citations(
                    session_id,
                    Role::Assistant,
                    response.clone(),
                    answering_agent.as_deref(),
                    citations.clone(),
                )
                .await;
        }
        self.memory.record_agents_used(session_id, &agents_used).await;

        performance.response_time_ms = started.elapsed().as_millis() as u64;
        performance.quality_score = if successes > 0 {
            quality_sum / successes as f64
        } else {
            0.0
        };

        let partial = successes < runs.len();
        let outcome_kind = if partial {
            Some(ErrorKind::PartialFailure)
        } else {
            None
        };
        self.tracker
            .close_session(
                session_id,
                if partial { ErrorKind::PartialFailure.as_str() } else { "done" },
            )
            .await;

        log::info!(
            "execution finished for session {}: {} agent(s), {} ms, {} tokens{}",
            session_id,
            runs.len(),
            performance.response_time_ms,
            performance.tokens_used,
            if partial { " (partial)" } else { "" }
        );

        Ok(ExecutionOutcome {
            session_id: session_id.to_string(),
            response,
            citations,
            agents_used,
            performance,
            warnings,
            outcome_kind,
        })
    }

    /// Run every routed agent concurrently (collaboration enabled, tool sets
    /// disjoint, within the parallelism budget).
    async fn execute_parallel(
        &self,
        session_id: &str,
        routes: &[RouteDecision],
        plan: &PromptPlan,
        query: &str,
        knowledge: &KnowledgeBundle,
        complexity: f64,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Vec<AgentRun>, MeshError> {
        let futures = routes
            .iter()
            .zip(plan.system_prompts.iter())
            .map(|(route, system_prompt)| {
                self.execute_agent(
                    session_id,
                    route,
                    system_prompt,
                    plan,
                    query,
                    knowledge,
                    complexity,
                    None,
                    cancel.clone(),
                )
            });
        let runs = futures_util::future::join_all(futures).await;
        collect_unless_cancelled(runs)
    }

    /// Run the routed agents in order. With collaboration enabled, each
    /// agent after the first sees a scratchpad of earlier answers and the
    /// hand-off is surfaced as a collaboration event.
    #[allow(clippy::too_many_arguments)]
    async fn execute_sequential(
        &self,
        session_id: &str,
        routes: &[RouteDecision],
        plan: &PromptPlan,
        query: &str,
        knowledge: &KnowledgeBundle,
        complexity: f64,
        collaboration_enabled: bool,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Vec<AgentRun>, MeshError> {
        let mut runs: Vec<AgentRun> = Vec::with_capacity(routes.len());
        let mut scratchpad = String::new();

        for (i, (route, system_prompt)) in routes.iter().zip(plan.system_prompts.iter()).enumerate() {
            let collaborating = collaboration_enabled && i > 0 && !scratchpad.is_empty();
            if collaborating {
                self.tracker
                    .set_phase(session_id, SessionPhase::Collaborating, 60.0)
                    .await;
                if let Some(prior) = runs.iter().rev().find(|r| r.result.is_ok()) {
                    self.tracker
                        .record_collaboration(
                            session_id,
                            &route.agent.id,
                            &prior.agent.id,
                            "context_share",
                            "building on an earlier answer",
                        )
                        .await;
                }
            }

            let run = self
                .execute_agent(
                    session_id,
                    route,
                    system_prompt,
                    plan,
                    query,
                    knowledge,
                    complexity,
                    if collaborating { Some(scratchpad.as_str()) } else { None },
                    cancel.clone(),
                )
                .await;

            if collaborating {
                self.tracker
                    .set_phase(session_id, SessionPhase::Processing, 70.0)
                    .await;
            }

            let run = match run {
                Ok(run) => run,
                Err(e) => return Err(e),
            };
            if let Ok(answer) = &run.result {
                scratchpad.push_str(&format!("[{}] {}\n", run.agent.name, answer.text));
            }
            runs.push(run);
        }
        Ok(runs)
    }

    /// One agent step: select a capability, build the prompt, invoke with
    /// the per-agent deadline, and record the interaction. Agent failures
    /// are captured inside the returned [`AgentRun`]; only cancellation
    /// escapes as an error.
    #[allow(clippy::too_many_arguments)]
    async fn execute_agent(
        &self,
        session_id: &str,
        route: &RouteDecision,
        system_prompt: &str,
        plan: &PromptPlan,
        query: &str,
        knowledge: &KnowledgeBundle,
        complexity: f64,
        scratchpad: Option<&str>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<AgentRun, MeshError> {
        let agent = &route.agent;
        self.tracker
            .set_agent_status(session_id, &agent.id, AgentStatus::Analyzing, 20.0, "assembling prompt")
            .await;

        let profile = TaskProfile::new(agent.domain.clone(), complexity);
        let user_prompt = plan.render_user_prompt(knowledge, scratchpad);

        self.tracker
            .set_agent_status(session_id, &agent.id, AgentStatus::Processing, 50.0, "calling model")
            .await;

        let agent_started = Instant::now();
        let mut invocation = tokio::select! {
            _ = cancel.changed() => {
                self.tracker
                    .set_agent_status(session_id, &agent.id, AgentStatus::Error, 100.0, "cancelled")
                    .await;
                return Err(MeshError::cancelled("execution cancelled"));
            }
            r = tokio::time::timeout(
                self.config.agent_timeout,
                self.pool.invoke(&profile, system_prompt, &user_prompt, self.config.max_tokens_out),
            ) => match r {
                Ok(inner) => inner,
                Err(_) => Err(MeshError::timeout(format!(
                    "agent {} exceeded {:?}",
                    agent.name, self.config.agent_timeout
                ))),
            }
        };

        // One jittered retry for retriable provider failures; the prompt is
        // identical, so the call is idempotent.
        if let Err(e) = &invocation {
            if e.kind.is_retriable() {
                let jitter = jitter_ms(self.config.retry_jitter_ms);
                log::debug!(
                    "retrying agent {} after {} ms ({})",
                    agent.name,
                    jitter,
                    e.kind
                );
                tokio::time::sleep(std::time::Duration::from_millis(jitter)).await;
                invocation = tokio::select! {
                    _ = cancel.changed() => {
                        return Err(MeshError::cancelled("execution cancelled"));
                    }
                    r = tokio::time::timeout(
                        self.config.agent_timeout,
                        self.pool.invoke(&profile, system_prompt, &user_prompt, self.config.max_tokens_out),
                    ) => match r {
                        Ok(inner) => inner,
                        Err(_) => Err(MeshError::timeout(format!(
                            "agent {} exceeded {:?}",
                            agent.name, self.config.agent_timeout
                        ))),
                    }
                };
            }
        }

        let elapsed_ms = agent_started.elapsed().as_millis() as u64;
        match invocation {
            Ok(pool_invocation) => {
                let quality = assess_quality(&pool_invocation.response.text, !knowledge.snippets.is_empty());
                let usage = pool_invocation.response.usage();
                self.pool.record_quality(pool_invocation.tier, quality).await;
                self.metrics
                    .record(InteractionRecord::new(
                        session_id,
                        &agent.id,
                        pool_invocation.tier,
                        query,
                        quality,
                        elapsed_ms,
                        usage.total_tokens as u64,
                        pool_invocation.cost,
                        true,
                        None,
                    ))
                    .await;
                self.metrics
                    .skill_update(&agent.id, &agent.domain, 0.02)
                    .await;
                self.tracker
                    .set_agent_status(session_id, &agent.id, AgentStatus::Completed, 100.0, "completed")
                    .await;
                Ok(AgentRun {
                    agent: agent.clone(),
                    result: Ok(AgentAnswer {
                        text: pool_invocation.response.text,
                        quality,
                        tokens: usage.total_tokens as u64,
                        cost: pool_invocation.cost,
                    }),
                })
            }
            Err(e) => {
                self.metrics
                    .record(InteractionRecord::new(
                        session_id,
                        &agent.id,
                        agent.preferred_tier,
                        query,
                        0.0,
                        elapsed_ms,
                        0,
                        0.0,
                        false,
                        Some(e.kind),
                    ))
                    .await;
                self.metrics
                    .skill_update(&agent.id, &agent.domain, -0.02)
                    .await;
                self.tracker
                    .set_agent_status(
                        session_id,
                        &agent.id,
                        AgentStatus::Error,
                        100.0,
                        e.kind.as_str(),
                    )
                    .await;
                self.tracker
                    .append_log(
                        session_id,
                        LogLevel::Error,
                        Some(&agent.id),
                        &format!("agent failed: {}", e),
                        None,
                    )
                    .await;
                Ok(AgentRun {
                    agent: agent.clone(),
                    result: Err(e),
                })
            }
        }
    }

    /// Monotonic milliseconds for latency bookkeeping.
    pub fn uptime_ms(&self) -> u64 {
        self.clock.monotonic_ms()
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// `0.2 + 0.2·technical + 0.2·comparison + 0.2·(>15 words) + 0.2·hasReference`.
fn complexity_of(query: &str, features: &QueryFeatures) -> f64 {
    let word_count = query.split_whitespace().count();
    let lower = query.to_lowercase();
    let has_reference = ["that", "this", "it", "previous", "earlier", "above", "again"]
        .iter()
        .any(|w| lower.split_whitespace().any(|t| t == *w));

    let mut complexity: f64 = 0.2;
    if features.technical {
        complexity += 0.2;
    }
    if features.comparison {
        complexity += 0.2;
    }
    if word_count > 15 {
        complexity += 0.2;
    }
    if has_reference {
        complexity += 0.2;
    }
    complexity.min(1.0)
}

/// Pairwise tool disjointness across the routed agents.
fn tool_sets_disjoint(routes: &[RouteDecision]) -> bool {
    for (i, a) in routes.iter().enumerate() {
        for b in routes.iter().skip(i + 1) {
            if !a.agent.tools_disjoint_from(&b.agent) {
                return false;
            }
        }
    }
    true
}

/// Prompt material that does not depend on retrieval: the per-agent system
/// prompts plus the shared context and question sections. Assembled while
/// the knowledge sources are still in flight, so joining the retrieval task
/// only has to splice the knowledge section into otherwise-finished prompts.
struct PromptPlan {
    /// System prompts aligned index-for-index with the routed agents.
    system_prompts: Vec<String>,
    /// Rendered `Previous conversation:` block, empty when there is none.
    context_section: String,
    /// Rendered `Question: …` line.
    question_section: String,
}

impl PromptPlan {
    fn assemble(routes: &[RouteDecision], context: &str, query: &str) -> Self {
        let mut context_section = String::new();
        if !context.is_empty() {
            context_section.push_str("Previous conversation:\n");
            context_section.push_str(context);
            context_section.push_str("\n\n");
        }
        Self {
            system_prompts: routes.iter().map(|r| r.agent.system_prompt()).collect(),
            context_section,
            question_section: format!("Question: {}", query),
        }
    }

    /// Final user prompt: prior context, ranked knowledge, teammate
    /// scratchpad, then the question.
    fn render_user_prompt(&self, knowledge: &KnowledgeBundle, scratchpad: Option<&str>) -> String {
        let mut prompt = self.context_section.clone();
        if !knowledge.snippets.is_empty() {
            prompt.push_str("Relevant knowledge:\n");
            for (i, snippet) in knowledge.snippets.iter().enumerate() {
                let body: String = snippet.content.chars().take(SNIPPET_PROMPT_CHARS).collect();
                prompt.push_str(&format!("[{}] {}: {}\n", i + 1, snippet.title, body));
            }
            prompt.push('\n');
        }
        if let Some(scratchpad) = scratchpad {
            if !scratchpad.is_empty() {
                prompt.push_str("Findings from teammates so far:\n");
                prompt.push_str(scratchpad);
                prompt.push('\n');
            }
        }
        prompt.push_str(&self.question_section);
        prompt
    }
}

/// Cheap answer-quality heuristic: substance and grounding raise the score.
fn assess_quality(text: &str, grounded: bool) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let mut quality: f64 = 0.6;
    if trimmed.len() >= 200 {
        quality += 0.2;
    }
    if grounded {
        quality += 0.2;
    }
    quality.min(1.0)
}

/// Deterministic merge of the successful answers: single answers pass
/// through untouched; multiple answers are concatenated under per-agent
/// headers with exact-duplicate bodies dropped.
fn synthesize(runs: &[AgentRun]) -> String {
    let successes: Vec<(&str, &str)> = runs
        .iter()
        .filter_map(|run| match &run.result {
            Ok(answer) => Some((run.agent.name.as_str(), answer.text.as_str())),
            Err(_) => None,
        })
        .collect();

    match successes.len() {
        0 => String::new(),
        1 => successes[0].1.to_string(),
        _ => {
            let mut seen: Vec<String> = Vec::new();
            let mut merged = String::new();
            for (name, text) in successes {
                let normalized = text.trim().to_lowercase();
                if seen.contains(&normalized) {
                    continue;
                }
                seen.push(normalized);
                if !merged.is_empty() {
                    merged.push_str("\n\n");
                }
                merged.push_str(&format!("### {}\n{}", name, text.trim()));
            }
            merged
        }
    }
}

/// Early-return with `cancelled` if any run was aborted by cancellation.
fn collect_unless_cancelled(
    runs: Vec<Result<AgentRun, MeshError>>,
) -> Result<Vec<AgentRun>, MeshError> {
    let mut collected = Vec::with_capacity(runs.len());
    for run in runs {
        collected.push(run?);
    }
    Ok(collected)
}

/// Sub-250 ms jitter derived from the wall clock; good enough to de-correlate
/// retries without a PRNG dependency.
fn jitter_ms(window: u64) -> u64 {
    if window == 0 {
        return 0;
    }
    u64::from(Utc::now().timestamp_subsec_nanos()) % window
}
