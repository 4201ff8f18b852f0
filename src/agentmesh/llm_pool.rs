//! Multi-model capability pool with live performance tracking and adaptive,
//! weighted selection.
//!
//! The [`LlmPool`] owns every configured [`LlmCapability`] — a logical tier
//! (`fast`, `balanced`, `powerful`, `reasoning`, `creative`, `local`) bound to
//! a concrete provider model via a [`ModelClient`]. For each task the pool
//! scores all capabilities from their rolling metrics and the task's
//! complexity/domain, picks the best, and records the outcome back into the
//! capability's metric rings, closing the loop for the next selection.
//!
//! # Selection score
//!
//! ```text
//! score = w_q·avgQuality + w_s·speedScore + w_c·costScore + w_r·reliability
//!       + expertiseBonus + complexityBonus − errorPenalty
//! ```
//!
//! with default weights `0.4 / 0.3 / 0.2 / 0.1` (tunable at runtime via
//! [`LlmPool::tune_weights`], the hook used by learning insights). Ties break
//! by lower per-token cost, then lower average latency.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentmesh::llm_pool::{CapabilityTier, LlmCapability, LlmPool, TaskProfile};
//! use std::sync::Arc;
//!
//! # async fn example(client: Arc<dyn agentmesh::ModelClient>) {
//! let pool = LlmPool::new();
//! pool.register(
//!     LlmCapability::new(CapabilityTier::Fast, "gpt-4o-mini", client.clone())
//!         .with_cost_per_token(0.000_000_15),
//! ).await;
//! pool.register(
//!     LlmCapability::new(CapabilityTier::Powerful, "gpt-4o", client)
//!         .with_cost_per_token(0.000_002_5),
//! ).await;
//!
//! let profile = TaskProfile::new("technical", 0.8);
//! let tier = pool.select(&profile, &Default::default()).await.unwrap();
//! assert_eq!(tier, CapabilityTier::Powerful);
//! # }
//! ```

use crate::agentmesh::error::{ErrorKind, MeshError};
use crate::agentmesh::model_client::{ModelClient, ModelRequest, ModelResponse};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Samples retained per metric ring.
const METRIC_RING_CAP: usize = 100;

/// Response-time ceiling (ms) used by the speed score and bonus.
const SPEED_CEILING_MS: f64 = 5_000.0;

/// Fallback attempts after the first failed capability.
const MAX_FALLBACKS: usize = 2;

/// Logical model tiers. Each maps to one configured provider model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityTier {
    /// Cheap, low-latency model for simple tasks.
    Fast,
    /// Default general-purpose model.
    Balanced,
    /// High-quality model for complex tasks.
    Powerful,
    /// Extended-reasoning model.
    Reasoning,
    /// Model tuned for open-ended generation.
    Creative,
    /// Locally hosted model (no per-token cost).
    Local,
}

impl CapabilityTier {
    /// The stable lowercase tag (`"fast"`, `"reasoning"`, …).
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityTier::Fast => "fast",
            CapabilityTier::Balanced => "balanced",
            CapabilityTier::Powerful => "powerful",
            CapabilityTier::Reasoning => "reasoning",
            CapabilityTier::Creative => "creative",
            CapabilityTier::Local => "local",
        }
    }

    /// Tiers that earn the high-complexity bonus.
    fn is_heavyweight(&self) -> bool {
        matches!(self, CapabilityTier::Powerful | CapabilityTier::Reasoning)
    }

    /// Tiers that earn the low-complexity bonus.
    fn is_lightweight(&self) -> bool {
        matches!(self, CapabilityTier::Fast | CapabilityTier::Balanced)
    }
}

impl std::fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling metrics owned by one capability. Single-writer: only the pool
/// mutates these, under its own lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityMetrics {
    /// Recent response times in milliseconds (ring, cap 100).
    response_times_ms: VecDeque<f64>,
    /// Recent quality samples in `[0, 1]` (ring, cap 100).
    quality: VecDeque<f64>,
    /// Successful invocations.
    pub success_count: u64,
    /// Failed invocations.
    pub error_count: u64,
    /// Total prompt tokens billed.
    pub tokens_in: u64,
    /// Total completion tokens billed.
    pub tokens_out: u64,
    /// Multiset of task domains this capability has served.
    expertise: HashMap<String, u64>,
}

impl CapabilityMetrics {
    /// Mean of the quality ring; `0.5` before any samples exist.
    pub fn avg_quality(&self) -> f64 {
        if self.quality.is_empty() {
            0.5
        } else {
            self.quality.iter().sum::<f64>() / self.quality.len() as f64
        }
    }

    /// Mean response time in milliseconds; `0` before any samples exist.
    pub fn avg_response_ms(&self) -> f64 {
        if self.response_times_ms.is_empty() {
            0.0
        } else {
            self.response_times_ms.iter().sum::<f64>() / self.response_times_ms.len() as f64
        }
    }

    /// `successCount / max(1, successCount + errorCount)`.
    pub fn reliability(&self) -> f64 {
        self.success_count as f64 / (self.success_count + self.error_count).max(1) as f64
    }

    /// `errorCount / max(1, successCount + errorCount)`.
    pub fn error_rate(&self) -> f64 {
        self.error_count as f64 / (self.success_count + self.error_count).max(1) as f64
    }

    /// Whether `task_type` appears in the recorded expertise domains.
    pub fn has_expertise(&self, task_type: &str) -> bool {
        self.expertise.contains_key(task_type)
    }

    fn push_outcome(
        &mut self,
        quality: Option<f64>,
        response_ms: f64,
        tokens_in: u64,
        tokens_out: u64,
        success: bool,
        task_type: &str,
    ) {
        if success {
            if let Some(quality) = quality {
                push_ring(&mut self.quality, quality.clamp(0.0, 1.0));
            }
            push_ring(&mut self.response_times_ms, response_ms.max(0.0));
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
        if !task_type.is_empty() {
            *self.expertise.entry(task_type.to_string()).or_insert(0) += 1;
        }
    }
}

fn push_ring(ring: &mut VecDeque<f64>, sample: f64) {
    ring.push_back(sample);
    while ring.len() > METRIC_RING_CAP {
        ring.pop_front();
    }
}

/// A logical model handle: tier + provider binding + sampling config +
/// live metrics.
pub struct LlmCapability {
    /// The logical tier this capability serves.
    pub tier: CapabilityTier,
    /// Provider model identifier forwarded on every request.
    pub model_id: String,
    /// Sampling temperature used for this capability.
    pub temperature: f32,
    /// Output-token ceiling for this capability.
    pub max_tokens: usize,
    /// Per-token cost in account currency; `0` for local models.
    pub cost_per_token: f64,
    client: Arc<dyn ModelClient>,
    metrics: CapabilityMetrics,
}

impl LlmCapability {
    /// Bind a tier to a provider model.
    ///
    /// Defaults: temperature 0.7, 4096 output tokens, zero cost.
    pub fn new(
        tier: CapabilityTier,
        model_id: impl Into<String>,
        client: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            tier,
            model_id: model_id.into(),
            temperature: 0.7,
            max_tokens: 4096,
            cost_per_token: 0.0,
            client,
            metrics: CapabilityMetrics::default(),
        }
    }

    /// Override the sampling temperature (builder pattern).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Override the output-token ceiling (builder pattern).
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the per-token cost (builder pattern).
    pub fn with_cost_per_token(mut self, cost: f64) -> Self {
        self.cost_per_token = cost;
        self
    }

    /// `avgQuality / costPerToken × (1 + speedBonus)` where the speed bonus
    /// rewards staying under the 5 s ceiling. Zero-cost (local) capabilities
    /// are treated as costing one micro-unit so the ratio stays finite.
    pub fn efficiency_score(&self) -> f64 {
        let cost = if self.cost_per_token > 0.0 {
            self.cost_per_token
        } else {
            1e-6
        };
        let avg_ms = self.metrics.avg_response_ms();
        let speed_bonus = ((SPEED_CEILING_MS - avg_ms) / SPEED_CEILING_MS).max(0.0) * 0.2;
        self.metrics.avg_quality() / cost * (1.0 + speed_bonus)
    }
}

/// Selection weights; tuned at runtime by applied learning insights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SelectionWeights {
    /// Weight on average quality. Default 0.4.
    pub quality: f64,
    /// Weight on the speed score. Default 0.3.
    pub speed: f64,
    /// Weight on the cost score. Default 0.2.
    pub cost: f64,
    /// Weight on reliability. Default 0.1.
    pub reliability: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            quality: 0.4,
            speed: 0.3,
            cost: 0.2,
            reliability: 0.1,
        }
    }
}

/// Signed deltas applied to [`SelectionWeights`] when an insight is applied.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WeightAdjustment {
    /// Delta on the quality weight.
    pub quality: f64,
    /// Delta on the speed weight.
    pub speed: f64,
    /// Delta on the cost weight.
    pub cost: f64,
    /// Delta on the reliability weight.
    pub reliability: f64,
}

/// What the pool knows about the task it is selecting for.
#[derive(Debug, Clone)]
pub struct TaskProfile {
    /// Free-form domain tag (e.g. `"technical"`, `"billing"`).
    pub task_type: String,
    /// Task complexity in `[0, 1]`.
    pub complexity: f64,
    /// Optional per-token cost ceiling; pricier capabilities are excluded.
    pub budget_cap: Option<f64>,
}

impl TaskProfile {
    /// Create a profile with no budget cap. Complexity is clamped to `[0, 1]`.
    pub fn new(task_type: impl Into<String>, complexity: f64) -> Self {
        Self {
            task_type: task_type.into(),
            complexity: complexity.clamp(0.0, 1.0),
            budget_cap: None,
        }
    }

    /// Set a per-token budget cap (builder pattern).
    pub fn with_budget_cap(mut self, cap: f64) -> Self {
        self.budget_cap = Some(cap);
        self
    }
}

/// Result of a successful pool invocation.
#[derive(Debug, Clone)]
pub struct PoolInvocation {
    /// Which capability produced the response.
    pub tier: CapabilityTier,
    /// The provider response.
    pub response: ModelResponse,
    /// Wall-clock latency of the winning call in milliseconds.
    pub elapsed_ms: u64,
    /// Cost of the winning call (`total tokens × cost_per_token`).
    pub cost: f64,
    /// Capabilities that failed before the winning call, with their error
    /// kinds.
    pub fallbacks: Vec<(CapabilityTier, ErrorKind)>,
}

/// Registry and selector over the configured capabilities.
pub struct LlmPool {
    capabilities: RwLock<HashMap<CapabilityTier, LlmCapability>>,
    weights: RwLock<SelectionWeights>,
    call_timeout: Duration,
}

impl LlmPool {
    /// Create an empty pool with a 30 s per-call timeout.
    pub fn new() -> Self {
        Self {
            capabilities: RwLock::new(HashMap::new()),
            weights: RwLock::new(SelectionWeights::default()),
            call_timeout: Duration::from_secs(30),
        }
    }

    /// Override the per-call timeout (builder pattern).
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Register (or replace) a capability.
    pub async fn register(&self, capability: LlmCapability) {
        self.capabilities
            .write()
            .await
            .insert(capability.tier, capability);
    }

    /// Tiers currently registered.
    pub async fn tiers(&self) -> Vec<CapabilityTier> {
        self.capabilities.read().await.keys().copied().collect()
    }

    /// Clone of the live metrics for one capability, for rollups and tests.
    pub async fn metrics_snapshot(&self, tier: CapabilityTier) -> Option<CapabilityMetrics> {
        self.capabilities
            .read()
            .await
            .get(&tier)
            .map(|c| c.metrics.clone())
    }

    /// Current selection weights.
    pub async fn weights(&self) -> SelectionWeights {
        *self.weights.read().await
    }

    /// Apply a learning adjustment to the selection weights. Each weight is
    /// clamped to `[0.0, 1.0]` after the delta.
    pub async fn tune_weights(&self, adjustment: WeightAdjustment) {
        let mut weights = self.weights.write().await;
        weights.quality = (weights.quality + adjustment.quality).clamp(0.0, 1.0);
        weights.speed = (weights.speed + adjustment.speed).clamp(0.0, 1.0);
        weights.cost = (weights.cost + adjustment.cost).clamp(0.0, 1.0);
        weights.reliability = (weights.reliability + adjustment.reliability).clamp(0.0, 1.0);
        log::info!(
            "selection weights tuned: quality={:.2} speed={:.2} cost={:.2} reliability={:.2}",
            weights.quality,
            weights.speed,
            weights.cost,
            weights.reliability
        );
    }

    /// Score one capability for a task. Exposed for tests and diagnostics.
    pub async fn score(&self, tier: CapabilityTier, profile: &TaskProfile) -> Option<f64> {
        let weights = *self.weights.read().await;
        let capabilities = self.capabilities.read().await;
        capabilities
            .get(&tier)
            .map(|c| score_capability(c, profile, &weights))
    }

    /// Pick the best capability for a task, skipping `exclude`.
    ///
    /// Returns `None` when no eligible capability remains (empty pool, all
    /// excluded, or all above the budget cap). Ties break by lower cost, then
    /// lower average latency.
    pub async fn select(
        &self,
        profile: &TaskProfile,
        exclude: &HashSet<CapabilityTier>,
    ) -> Option<CapabilityTier> {
        let weights = *self.weights.read().await;
        let capabilities = self.capabilities.read().await;

        let mut best: Option<(f64, f64, f64, CapabilityTier)> = None;
        for (tier, capability) in capabilities.iter() {
            if exclude.contains(tier) {
                continue;
            }
            if let Some(cap) = profile.budget_cap {
                if capability.cost_per_token > cap {
                    continue;
                }
            }
            let score = score_capability(capability, profile, &weights);
            let cost = capability.cost_per_token;
            let latency = capability.metrics.avg_response_ms();
            let candidate = (score, cost, latency, *tier);
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    // Higher score wins; then cheaper; then faster.
                    let (cs, cc, cl, _) = current;
                    if score > cs
                        || (score == cs && cost < cc)
                        || (score == cs && cost == cc && latency < cl)
                    {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
        best.map(|(_, _, _, tier)| tier)
    }

    /// Record the outcome of one invocation into the capability's metrics.
    ///
    /// Pass `quality: None` when the answer has not been assessed yet; the
    /// quality ring is only touched by assessed samples.
    pub async fn record_outcome(
        &self,
        tier: CapabilityTier,
        quality: Option<f64>,
        response_ms: f64,
        tokens_in: u64,
        tokens_out: u64,
        success: bool,
        task_type: &str,
    ) {
        let mut capabilities = self.capabilities.write().await;
        if let Some(capability) = capabilities.get_mut(&tier) {
            capability.metrics.push_outcome(
                quality,
                response_ms,
                tokens_in,
                tokens_out,
                success,
                task_type,
            );
        }
    }

    /// Push an assessed quality sample for a capability without touching the
    /// success/error counters. Called by the coordinator once it has scored
    /// the produced answer.
    pub async fn record_quality(&self, tier: CapabilityTier, quality: f64) {
        let mut capabilities = self.capabilities.write().await;
        if let Some(capability) = capabilities.get_mut(&tier) {
            push_ring(&mut capability.metrics.quality, quality.clamp(0.0, 1.0));
        }
    }

    /// Select, invoke, and fall back: the pool's main entry point.
    ///
    /// Picks the best capability for `profile`, sends the prompt, and on a
    /// provider failure records the error, excludes the failed tier, and
    /// tries the next-scored capability, up to two fallbacks. When every
    /// attempt fails the last failure is returned (`provider_error` when no
    /// capability was eligible at all).
    ///
    /// Successful calls have their latency/token outcome recorded
    /// immediately; quality is recorded separately by the coordinator once
    /// it has assessed the answer.
    pub async fn invoke(
        &self,
        profile: &TaskProfile,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens_out: usize,
    ) -> Result<PoolInvocation, MeshError> {
        let mut excluded: HashSet<CapabilityTier> = HashSet::new();
        let mut fallbacks: Vec<(CapabilityTier, ErrorKind)> = Vec::new();
        let mut last_error: Option<MeshError> = None;

        for attempt in 0..=MAX_FALLBACKS {
            let tier = match self.select(profile, &excluded).await {
                Some(tier) => tier,
                None => break,
            };

            let (request, cost_per_token, client) = {
                let capabilities = self.capabilities.read().await;
                let capability = match capabilities.get(&tier) {
                    Some(c) => c,
                    None => break,
                };
                let request = ModelRequest::new(
                    capability.model_id.clone(),
                    system_prompt,
                    user_prompt,
                )
                .with_temperature(capability.temperature)
                .with_max_tokens(capability.max_tokens.min(max_tokens_out))
                .with_timeout(self.call_timeout);
                (request, capability.cost_per_token, Arc::clone(&capability.client))
            };

            log::debug!(
                "invoking {} (model {}) attempt {}",
                tier,
                request.model_id,
                attempt + 1
            );
            let started = Instant::now();
            let outcome = tokio::time::timeout(self.call_timeout, client.invoke(&request)).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let error = match outcome {
                Ok(Ok(response)) => {
                    let tokens = response.usage();
                    // Success path records latency/tokens only; the quality
                    // ring keeps its previous samples until assessed.
                    self.record_outcome(
                        tier,
                        None,
                        elapsed_ms as f64,
                        tokens.input_tokens as u64,
                        tokens.output_tokens as u64,
                        true,
                        &profile.task_type,
                    )
                    .await;
                    let cost = tokens.total_tokens as f64 * cost_per_token;
                    return Ok(PoolInvocation {
                        tier,
                        response,
                        elapsed_ms,
                        cost,
                        fallbacks,
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => MeshError::timeout(format!(
                    "capability {} exceeded {:?}",
                    tier, self.call_timeout
                )),
            };

            log::warn!("capability {} failed: {}", tier, error);
            self.record_outcome(tier, None, elapsed_ms as f64, 0, 0, false, &profile.task_type)
                .await;
            fallbacks.push((tier, error.kind));
            excluded.insert(tier);
            last_error = Some(error);
        }

        match last_error {
            // The last failure's kind is the honest terminal kind: a pool
            // whose capabilities all timed out reports `timeout`, one whose
            // capabilities all errored reports `provider_error`.
            Some(e) => Err(e),
            None => Err(MeshError::provider("no eligible capability registered")),
        }
    }
}

impl Default for LlmPool {
    fn default() -> Self {
        Self::new()
    }
}

/// The selection formula. Kept as a free function so the scoring is testable
/// without a pool.
fn score_capability(
    capability: &LlmCapability,
    profile: &TaskProfile,
    weights: &SelectionWeights,
) -> f64 {
    let metrics = &capability.metrics;

    let speed_score = 1.0 - (metrics.avg_response_ms() / SPEED_CEILING_MS).min(1.0);
    let cost_score = 1.0 / (1.0 + capability.cost_per_token * 1000.0);

    let expertise_bonus = if metrics.has_expertise(&profile.task_type) {
        0.2
    } else {
        0.0
    };

    let complexity_bonus = if capability.tier.is_heavyweight() && profile.complexity >= 0.7 {
        0.15
    } else if capability.tier.is_lightweight() && profile.complexity <= 0.4 {
        0.10
    } else {
        0.0
    };

    weights.quality * metrics.avg_quality()
        + weights.speed * speed_score
        + weights.cost * cost_score
        + weights.reliability * metrics.reliability()
        + expertise_bonus
        + complexity_bonus
        - 0.5 * metrics.error_rate()
}
