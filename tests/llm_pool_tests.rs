use agentmesh::error::{ErrorKind, MeshError};
use agentmesh::llm_pool::{
    CapabilityTier, LlmCapability, LlmPool, TaskProfile, WeightAdjustment,
};
use agentmesh::model_client::{ModelClient, ModelRequest, ModelResponse};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Scripted provider: fails with a fixed kind, or answers with fixed text.
struct ScriptedClient {
    name: String,
    response: String,
    fail_kind: Option<ErrorKind>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedClient {
    fn ok(name: &str, response: &str) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                name: name.to_string(),
                response: response.to_string(),
                fail_kind: None,
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }

    fn failing(name: &str, kind: ErrorKind) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                name: name.to_string(),
                response: String::new(),
                fail_kind: Some(kind),
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn invoke(&self, _request: &ModelRequest) -> Result<ModelResponse, MeshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_kind {
            Some(kind) => Err(MeshError::new(kind, "scripted failure")),
            None => Ok(ModelResponse {
                text: self.response.clone(),
                tokens_in: 20,
                tokens_out: 10,
                finish_reason: String::from("stop"),
            }),
        }
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

#[tokio::test]
async fn test_fallback_to_next_capability_on_failure() {
    let pool = LlmPool::new();
    let (bad, bad_calls) = ScriptedClient::failing("bad", ErrorKind::RateLimited);
    let (good, good_calls) = ScriptedClient::ok("good", "answer");

    // Powerful scores higher for a complex task, so it is tried first and
    // fails; the pool falls back to balanced.
    pool.register(LlmCapability::new(CapabilityTier::Powerful, "big-model", bad)).await;
    pool.register(LlmCapability::new(CapabilityTier::Balanced, "mid-model", good)).await;

    let profile = TaskProfile::new("technical", 0.9);
    let invocation = pool.invoke(&profile, "sys", "user", 4096).await.unwrap();

    assert_eq!(invocation.tier, CapabilityTier::Balanced);
    assert_eq!(invocation.response.text, "answer");
    assert_eq!(invocation.fallbacks, vec![(CapabilityTier::Powerful, ErrorKind::RateLimited)]);
    assert_eq!(bad_calls.load(Ordering::SeqCst), 1);
    assert_eq!(good_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_all_capabilities_unhealthy_surfaces_last_kind() {
    let pool = LlmPool::new();
    let (bad1, _) = ScriptedClient::failing("bad1", ErrorKind::ProviderError);
    let (bad2, _) = ScriptedClient::failing("bad2", ErrorKind::ProviderError);

    pool.register(LlmCapability::new(CapabilityTier::Fast, "m1", bad1)).await;
    pool.register(LlmCapability::new(CapabilityTier::Balanced, "m2", bad2)).await;

    let profile = TaskProfile::new("general", 0.5);
    let err = pool.invoke(&profile, "sys", "user", 4096).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ProviderError);

    // Both capabilities recorded the failure.
    let m1 = pool.metrics_snapshot(CapabilityTier::Fast).await.unwrap();
    let m2 = pool.metrics_snapshot(CapabilityTier::Balanced).await.unwrap();
    assert_eq!(m1.error_count + m2.error_count, 2);
}

#[tokio::test]
async fn test_timeout_failures_surface_as_timeout() {
    let pool = LlmPool::new();
    let (bad, _) = ScriptedClient::failing("bad", ErrorKind::Timeout);
    pool.register(LlmCapability::new(CapabilityTier::Balanced, "m", bad)).await;

    let profile = TaskProfile::new("general", 0.5);
    let err = pool.invoke(&profile, "sys", "user", 4096).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn test_selection_monotone_in_complexity() {
    let pool = LlmPool::new();
    let (client, _) = ScriptedClient::ok("m", "x");
    pool.register(LlmCapability::new(CapabilityTier::Powerful, "m", client.clone())).await;
    pool.register(LlmCapability::new(CapabilityTier::Reasoning, "m2", client)).await;

    let mut prev_powerful = f64::MIN;
    let mut prev_reasoning = f64::MIN;
    for step in 0..=10 {
        let profile = TaskProfile::new("general", step as f64 / 10.0);
        let powerful = pool.score(CapabilityTier::Powerful, &profile).await.unwrap();
        let reasoning = pool.score(CapabilityTier::Reasoning, &profile).await.unwrap();
        assert!(powerful >= prev_powerful);
        assert!(reasoning >= prev_reasoning);
        prev_powerful = powerful;
        prev_reasoning = reasoning;
    }
}

#[tokio::test]
async fn test_error_history_penalizes_selection() {
    let pool = LlmPool::new();
    let (client, _) = ScriptedClient::ok("m", "x");
    pool.register(LlmCapability::new(CapabilityTier::Fast, "m1", client.clone())).await;
    pool.register(LlmCapability::new(CapabilityTier::Balanced, "m2", client)).await;

    // Same shape initially; burn the fast tier's reliability.
    for _ in 0..10 {
        pool.record_outcome(CapabilityTier::Fast, None, 50.0, 0, 0, false, "general").await;
    }

    let profile = TaskProfile::new("general", 0.3);
    let selected = pool.select(&profile, &HashSet::new()).await.unwrap();
    assert_eq!(selected, CapabilityTier::Balanced);
}

#[tokio::test]
async fn test_cost_tie_break_when_cost_weight_is_zero() {
    let pool = LlmPool::new();
    // Remove cost from the score so both tiers score identically, leaving
    // the tie-break to decide.
    pool.tune_weights(WeightAdjustment {
        cost: -0.2,
        ..WeightAdjustment::default()
    })
    .await;

    let (client, _) = ScriptedClient::ok("m", "x");
    pool.register(
        LlmCapability::new(CapabilityTier::Fast, "cheap", client.clone()).with_cost_per_token(0.001),
    )
    .await;
    pool.register(
        LlmCapability::new(CapabilityTier::Balanced, "pricey", client).with_cost_per_token(0.01),
    )
    .await;

    let profile = TaskProfile::new("general", 0.2);
    let selected = pool.select(&profile, &HashSet::new()).await.unwrap();
    assert_eq!(selected, CapabilityTier::Fast);
}

#[tokio::test]
async fn test_exclusion_skips_tier() {
    let pool = LlmPool::new();
    let (client, _) = ScriptedClient::ok("m", "x");
    pool.register(LlmCapability::new(CapabilityTier::Powerful, "m1", client.clone())).await;
    pool.register(LlmCapability::new(CapabilityTier::Balanced, "m2", client)).await;

    let profile = TaskProfile::new("general", 0.9);
    let mut exclude = HashSet::new();
    exclude.insert(CapabilityTier::Powerful);
    assert_eq!(
        pool.select(&profile, &exclude).await.unwrap(),
        CapabilityTier::Balanced
    );
}

#[tokio::test]
async fn test_expertise_accumulates_through_invocations() {
    let pool = LlmPool::new();
    let (client, _) = ScriptedClient::ok("m", "x");
    pool.register(LlmCapability::new(CapabilityTier::Balanced, "m", client)).await;

    let profile = TaskProfile::new("billing", 0.5);
    pool.invoke(&profile, "sys", "user", 4096).await.unwrap();

    let metrics = pool.metrics_snapshot(CapabilityTier::Balanced).await.unwrap();
    assert!(metrics.has_expertise("billing"));
    assert_eq!(metrics.success_count, 1);
    assert_eq!(metrics.tokens_in, 20);
    assert_eq!(metrics.tokens_out, 10);
}

#[tokio::test]
async fn test_quality_recorded_separately_from_latency() {
    let pool = LlmPool::new();
    let (client, _) = ScriptedClient::ok("m", "x");
    pool.register(LlmCapability::new(CapabilityTier::Balanced, "m", client)).await;

    let profile = TaskProfile::new("general", 0.5);
    pool.invoke(&profile, "sys", "user", 4096).await.unwrap();

    // No assessed sample yet: the prior (0.5) holds.
    let metrics = pool.metrics_snapshot(CapabilityTier::Balanced).await.unwrap();
    assert!((metrics.avg_quality() - 0.5).abs() < 1e-9);

    pool.record_quality(CapabilityTier::Balanced, 0.9).await;
    let metrics = pool.metrics_snapshot(CapabilityTier::Balanced).await.unwrap();
    assert!((metrics.avg_quality() - 0.9).abs() < 1e-9);
}
