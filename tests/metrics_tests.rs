use agentmesh::error::ErrorKind;
use agentmesh::llm_pool::CapabilityTier;
use agentmesh::metrics::{
    InsightStatus, InsightType, InteractionRecord, JournalEntry, MetricsJournal, MetricsStore,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

fn record(session: &str, agent: &str, success: bool) -> InteractionRecord {
    InteractionRecord::new(
        session,
        agent,
        CapabilityTier::Balanced,
        "how do webhooks work",
        if success { 0.85 } else { 0.0 },
        150,
        64,
        0.002,
        success,
        if success { None } else { Some(ErrorKind::ProviderError) },
    )
}

#[tokio::test]
async fn test_summary_counts_each_record_exactly_once() {
    let store = MetricsStore::new();
    store.record(record("s1", "a1", true)).await;

    let summary = store.summary("a1", Duration::from_secs(3600)).await;
    assert_eq!(summary.interactions, 1);
    assert!((summary.avg_quality - 0.85).abs() < 1e-9);
    assert!((summary.avg_latency_ms - 150.0).abs() < 1e-9);
    assert!((summary.avg_cost - 0.002).abs() < 1e-9);
    assert_eq!(summary.success_rate, 1.0);
    assert!(summary.avg_rating.is_none());
}

#[tokio::test]
async fn test_system_summary_spans_agents() {
    let store = MetricsStore::new();
    store.record(record("s1", "a1", true)).await;
    store.record(record("s2", "a2", false)).await;

    let summary = store.system_summary(Duration::from_secs(3600)).await;
    assert_eq!(summary.interactions, 2);
    assert!((summary.success_rate - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_window_excludes_old_records() {
    let store = MetricsStore::new();
    let mut old = record("s1", "a1", true);
    old.timestamp = Utc::now() - ChronoDuration::days(30);
    store.record(old).await;
    store.record(record("s2", "a1", true)).await;

    let summary = store.summary("a1", Duration::from_secs(3600)).await;
    assert_eq!(summary.interactions, 1);
}

#[tokio::test]
async fn test_low_rating_creates_low_satisfaction_insight() {
    let store = MetricsStore::new();
    store.record(record("s1", "a1", true)).await;

    let outcome = store.feedback("s1", 1, Some(String::from("unhelpful"))).await.unwrap();
    assert!(outcome.insight_generated);

    let pending = store.insights(InsightStatus::Pending, 10).await;
    assert_eq!(pending.len(), 1);
    let insight = &pending[0];
    assert_eq!(insight.insight_type, InsightType::LowSatisfaction);
    assert!((insight.confidence - 0.8).abs() < 1e-9);
    assert!(insight.recommended_actions.len() >= 3);
}

#[tokio::test]
async fn test_rating_feeds_summary_rollup() {
    let store = MetricsStore::new();
    store.record(record("s1", "a1", true)).await;
    store.feedback("s1", 4, None).await.unwrap();

    let summary = store.summary("a1", Duration::from_secs(3600)).await;
    assert_eq!(summary.avg_rating, Some(4.0));
}

#[tokio::test]
async fn test_routing_drift_detector_fires_with_enough_points() {
    let store = MetricsStore::new();

    // Prior week: 12 successes. Current week: 10 failures.
    for _ in 0..12 {
        let mut r = record("old", "drifty", true);
        r.timestamp = Utc::now() - ChronoDuration::days(9);
        store.record(r).await;
    }
    for _ in 0..10 {
        store.record(record("new", "drifty", false)).await;
    }

    // Any feedback runs the drift detector.
    store.feedback("new", 3, None).await.unwrap();

    let pending = store.insights(InsightStatus::Pending, 10).await;
    let drift = pending
        .iter()
        .find(|i| i.insight_type == InsightType::RoutingDrift)
        .expect("drift insight expected");
    assert!(drift.description.contains("drifty"));
    assert!(drift.data_points >= 20);

    // A second feedback must not duplicate the pending insight.
    store.feedback("new", 3, None).await.unwrap();
    let pending = store.insights(InsightStatus::Pending, 10).await;
    let drifts = pending
        .iter()
        .filter(|i| i.insight_type == InsightType::RoutingDrift)
        .count();
    assert_eq!(drifts, 1);
}

#[tokio::test]
async fn test_drift_detector_needs_twenty_points() {
    let store = MetricsStore::new();
    for _ in 0..5 {
        let mut r = record("old", "a1", true);
        r.timestamp = Utc::now() - ChronoDuration::days(9);
        store.record(r).await;
    }
    for _ in 0..5 {
        store.record(record("new", "a1", false)).await;
    }
    store.feedback("new", 3, None).await.unwrap();
    assert!(store
        .insights(InsightStatus::Pending, 10)
        .await
        .iter()
        .all(|i| i.insight_type != InsightType::RoutingDrift));
}

#[tokio::test]
async fn test_skill_update_clamps_and_trends() {
    let store = MetricsStore::new();
    let skill = store.skill_update("a1", "webhook_debugging", 0.3).await;
    assert!((skill.proficiency - 0.8).abs() < 1e-9);
    assert_eq!(skill.usage_count, 1);

    let skill = store.skill_update("a1", "webhook_debugging", 0.9).await;
    assert_eq!(skill.proficiency, 1.0);
    assert_eq!(skill.usage_count, 2);
    assert!(skill.trend > 0.0);
}

#[tokio::test]
async fn test_apply_and_dismiss_insights() {
    let store = MetricsStore::new();
    store.feedback("s1", 1, None).await.unwrap();
    store.feedback("s2", 5, None).await.unwrap();

    let pending = store.insights(InsightStatus::Pending, 10).await;
    assert_eq!(pending.len(), 2);

    let low = pending
        .iter()
        .find(|i| i.insight_type == InsightType::LowSatisfaction)
        .unwrap();
    let high = pending
        .iter()
        .find(|i| i.insight_type == InsightType::HighSatisfaction)
        .unwrap();

    let adjustment = store.apply_insight(&low.id).await.unwrap();
    assert!(adjustment.quality > 0.0 && adjustment.cost < 0.0);

    assert!(store.dismiss_insight(&high.id).await);
    assert!(store.insights(InsightStatus::Pending, 10).await.is_empty());
    assert_eq!(store.insights(InsightStatus::Applied, 10).await.len(), 1);
    assert_eq!(store.insights(InsightStatus::Dismissed, 10).await.len(), 1);

    assert!(store.apply_insight("nope").await.is_none());
}

#[tokio::test]
async fn test_journal_persists_records_and_insights() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.jsonl");
    let (store, writer) = MetricsStore::with_journal(&path, 1024);

    store.record(record("s1", "a1", true)).await;
    store.record(record("s1", "a1", false)).await;
    store.feedback("s1", 1, None).await.unwrap();
    store.skill_update("a1", "webhooks", 0.1).await;

    // Give the writer task a moment to drain.
    tokio::time::sleep(Duration::from_millis(200)).await;
    writer.abort();

    let entries = MetricsJournal::load(&path).unwrap();
    let interactions = entries
        .iter()
        .filter(|e| matches!(e, JournalEntry::Interaction(_)))
        .count();
    let insights = entries
        .iter()
        .filter(|e| matches!(e, JournalEntry::Insight(_)))
        .count();
    let skills = entries
        .iter()
        .filter(|e| matches!(e, JournalEntry::Skill(_)))
        .count();
    assert_eq!(interactions, 2);
    assert_eq!(insights, 1);
    assert_eq!(skills, 1);

    // Round-trip: the persisted record carries the same error kind.
    let failed = entries.iter().find_map(|e| match e {
        JournalEntry::Interaction(r) if !r.success => Some(r.clone()),
        _ => None,
    });
    assert_eq!(failed.unwrap().error_kind, Some(ErrorKind::ProviderError));
}
