//! Interaction metrics, agent skills, and learning insights.
//!
//! The [`MetricsStore`] is the append-only record of everything the
//! orchestrator did: one [`InteractionRecord`] per agent invocation,
//! satisfaction feedback per session, a skill table with bounded-delta
//! updates, and [`LearningInsight`]s derived from feedback that close the
//! loop back into LLM-selection weights.
//!
//! # Durability
//!
//! [`MetricsStore::record`] never blocks and never fails toward the caller.
//! Records land in an in-memory log (serving rollups that may lag writes by
//! up to a second) and are queued to a background journal task writing
//! newline-delimited JSON. Journal writes retry with exponential backoff;
//! when the queue is full the *oldest* buffered entries are shed and a
//! `metrics_shedding` insight is raised so the loss is visible.
//!
//! # Feedback → insights
//!
//! - rating ≤ 2 → `low_satisfaction` (confidence 0.8, three recommended
//!   actions)
//! - rating ≥ 4 → `high_satisfaction` (confidence 0.9)
//! - an agent whose rolling success rate drops more than 15 percentage
//!   points week-over-week on ≥ 20 data points → `routing_drift`
//!
//! Applying an insight via [`MetricsStore::apply_insight`] yields the
//! [`WeightAdjustment`] the embedder feeds into
//! [`LlmPool::tune_weights`](crate::LlmPool::tune_weights).

use crate::agentmesh::error::{ErrorKind, MeshError};
use crate::agentmesh::llm_pool::{CapabilityTier, WeightAdjustment};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use uuid::Uuid;

/// Week used by the drift detector.
const DRIFT_WINDOW: i64 = 7;

/// Minimum data points before drift is trusted.
const DRIFT_MIN_POINTS: usize = 20;

/// Week-over-week success-rate drop that triggers a drift insight.
const DRIFT_THRESHOLD: f64 = 0.15;

/// Stable hash of a query for clustering without retaining raw text
/// everywhere: SHA-256 hex, truncated to 16 characters.
pub fn query_hash(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.trim().to_lowercase().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// The canonical per-invocation metric record. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    /// Record id (UUID v4).
    pub id: String,
    /// The session this interaction belonged to.
    pub session_id: String,
    /// The agent that was invoked.
    pub agent_id: String,
    /// The capability tier that served the call.
    pub capability: CapabilityTier,
    /// Stable hash of the query text.
    pub query_hash: String,
    /// Assessed answer quality in `[0, 1]` (0 for failures).
    pub quality: f64,
    /// End-to-end latency in milliseconds.
    pub response_time_ms: u64,
    /// Total tokens billed.
    pub tokens_used: u64,
    /// Cost of the call.
    pub cost: f64,
    /// Whether the invocation produced an answer.
    pub success: bool,
    /// Error kind for failures.
    pub error_kind: Option<ErrorKind>,
    /// When the interaction completed.
    pub timestamp: DateTime<Utc>,
}

impl InteractionRecord {
    /// Create a record stamped now with a fresh id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        capability: CapabilityTier,
        query: &str,
        quality: f64,
        response_time_ms: u64,
        tokens_used: u64,
        cost: f64,
        success: bool,
        error_kind: Option<ErrorKind>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            capability,
            query_hash: query_hash(query),
            quality: quality.clamp(0.0, 1.0),
            response_time_ms,
            tokens_used,
            cost,
            success,
            error_kind,
            timestamp: Utc::now(),
        }
    }
}

/// One (agent, skill) proficiency cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSkill {
    /// The agent.
    pub agent_id: String,
    /// Skill name (e.g. `"webhook_debugging"`).
    pub skill: String,
    /// Proficiency in `[0, 1]`, moved by bounded deltas.
    pub proficiency: f64,
    /// Times the skill was exercised. Monotonic.
    pub usage_count: u64,
    /// Smoothed direction of recent deltas.
    pub trend: f64,
    /// Last exercise time.
    pub last_used: DateTime<Utc>,
}

/// Classification of a learning insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    /// A session was rated 2 or lower.
    LowSatisfaction,
    /// A session was rated 4 or higher.
    HighSatisfaction,
    /// An agent's success rate dropped week-over-week.
    RoutingDrift,
    /// The metrics journal shed records under pressure.
    MetricsShedding,
}

/// Lifecycle of an insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightStatus {
    /// Awaiting review.
    Pending,
    /// Acted upon; weight adjustments were handed out.
    Applied,
    /// Reviewed and ignored.
    Dismissed,
}

/// A learning signal derived from metrics and feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningInsight {
    /// Insight id (UUID v4).
    pub id: String,
    /// Classification.
    pub insight_type: InsightType,
    /// Short headline.
    pub title: String,
    /// What was observed.
    pub description: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Observations backing the insight.
    pub data_points: usize,
    /// Suggested follow-ups, in priority order.
    pub recommended_actions: Vec<String>,
    /// Lifecycle status.
    pub status: InsightStatus,
    /// When the insight was raised.
    pub created_at: DateTime<Utc>,
    /// When it was applied, if ever.
    pub implemented_at: Option<DateTime<Utc>>,
}

impl LearningInsight {
    fn new(
        insight_type: InsightType,
        title: impl Into<String>,
        description: impl Into<String>,
        confidence: f64,
        data_points: usize,
        recommended_actions: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            insight_type,
            title: title.into(),
            description: description.into(),
            confidence: confidence.clamp(0.0, 1.0),
            data_points,
            recommended_actions,
            status: InsightStatus::Pending,
            created_at: Utc::now(),
            implemented_at: None,
        }
    }
}

/// Rollup shape shared by per-agent and system-wide summaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Interactions in the window.
    pub interactions: u64,
    /// Mean assessed quality over successful interactions.
    pub avg_quality: f64,
    /// Mean latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Fraction of interactions that succeeded.
    pub success_rate: f64,
    /// Mean cost per interaction.
    pub avg_cost: f64,
    /// Mean satisfaction rating over sessions in the window, when any.
    pub avg_rating: Option<f64>,
}

/// Outcome of [`MetricsStore::feedback`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackOutcome {
    /// Whether a learning insight was generated by this feedback.
    pub insight_generated: bool,
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// One journal line: interaction, insight, or skill delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum JournalEntry {
    /// An interaction record.
    Interaction(InteractionRecord),
    /// An insight.
    Insight(LearningInsight),
    /// A skill cell after an update.
    Skill(AgentSkill),
}

/// Append-only newline-delimited JSON journal on disk.
///
/// One [`JournalEntry`] per line; files are only ever appended to, so a
/// crash loses at most the entries still buffered in memory.
pub struct MetricsJournal {
    path: PathBuf,
}

impl MetricsJournal {
    /// Open (or lazily create) a journal at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append a batch of entries, one JSON line each.
    pub fn append(&self, entries: &[JournalEntry]) -> std::io::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for entry in entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writeln!(file, "{}", line)?;
        }
        file.flush()
    }

    /// Replay every entry from disk. Blank lines are skipped; a malformed
    /// line is an error (the journal is append-only, so corruption means
    /// truncation happened outside this process).
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Vec<JournalEntry>> {
        let text = std::fs::read_to_string(path)?;
        let mut entries = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Bounded drop-oldest buffer between `record()` callers and the journal
/// task.
struct JournalBuffer {
    queue: Mutex<VecDeque<JournalEntry>>,
    capacity: usize,
    notify: Notify,
}

impl JournalBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Push without blocking. Returns how many old entries were shed.
    async fn push(&self, entry: JournalEntry) -> usize {
        let mut queue = self.queue.lock().await;
        let mut shed = 0;
        while queue.len() >= self.capacity {
            queue.pop_front();
            shed += 1;
        }
        queue.push_back(entry);
        drop(queue);
        self.notify.notify_one();
        shed
    }

    async fn drain(&self) -> Vec<JournalEntry> {
        self.queue.lock().await.drain(..).collect()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct SessionFeedback {
    rating: u8,
    #[allow(dead_code)]
    comment: Option<String>,
    at: DateTime<Utc>,
}

/// The metrics and learning store. One owned instance per deployment.
pub struct MetricsStore {
    records: RwLock<Vec<InteractionRecord>>,
    skills: RwLock<HashMap<String, HashMap<String, AgentSkill>>>,
    insights: RwLock<Vec<LearningInsight>>,
    feedback: RwLock<HashMap<String, SessionFeedback>>,
    journal: Option<Arc<JournalBuffer>>,
}

impl MetricsStore {
    /// Create a store without on-disk journaling (tests, embedders that
    /// persist elsewhere).
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            skills: RwLock::new(HashMap::new()),
            insights: RwLock::new(Vec::new()),
            feedback: RwLock::new(HashMap::new()),
            journal: None,
        }
    }

    /// Create a store journaling to `path`, plus the background writer task.
    ///
    /// The writer drains the buffer as soon as entries arrive (worst-case
    /// in-memory exposure at crash is one drain cycle, well under a second)
    /// and retries failed writes with exponential backoff: 100 ms doubling
    /// to 1.6 s, five attempts, after which the batch is dropped with an
    /// error log.
    pub fn with_journal(
        path: impl Into<PathBuf>,
        buffer_capacity: usize,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let buffer = Arc::new(JournalBuffer::new(buffer_capacity));
        let journal = MetricsJournal::new(path);
        let writer_buffer = Arc::clone(&buffer);

        let handle = tokio::spawn(async move {
            loop {
                writer_buffer.notify.notified().await;
                let batch = writer_buffer.drain().await;
                if batch.is_empty() {
                    continue;
                }
                let mut backoff = Duration::from_millis(100);
                let mut written = false;
                for _ in 0..5 {
                    match journal.append(&batch) {
                        Ok(()) => {
                            written = true;
                            break;
                        }
                        Err(e) => {
                            log::warn!("journal write failed, retrying in {:?}: {}", backoff, e);
                            tokio::time::sleep(backoff).await;
                            backoff *= 2;
                        }
                    }
                }
                if !written {
                    log::error!("journal write failed permanently; dropped {} entries", batch.len());
                }
            }
        });

        let store = Self {
            records: RwLock::new(Vec::new()),
            skills: RwLock::new(HashMap::new()),
            insights: RwLock::new(Vec::new()),
            feedback: RwLock::new(HashMap::new()),
            journal: Some(buffer),
        };
        (store, handle)
    }

    /// Append one interaction record. Non-blocking; never fails toward the
    /// caller. Rollup visibility may lag by up to a second.
    pub async fn record(&self, record: InteractionRecord) {
        self.records.write().await.push(record.clone());
        self.journal_entry(JournalEntry::Interaction(record)).await;
    }

    async fn journal_entry(&self, entry: JournalEntry) {
        if let Some(buffer) = &self.journal {
            let shed = buffer.push(entry).await;
            if shed > 0 {
                log::warn!("metrics journal buffer full; shed {} oldest entries", shed);
                let insight = LearningInsight::new(
                    InsightType::MetricsShedding,
                    "Metrics journal shedding records",
                    format!(
                        "The journal buffer overflowed and {} oldest entries were dropped before \
                         reaching disk.",
                        shed
                    ),
                    1.0,
                    shed,
                    vec![
                        String::from("increase the journal buffer capacity"),
                        String::from("check journal disk throughput"),
                    ],
                );
                self.insights.write().await.push(insight);
            }
        }
    }

    /// Number of records currently held, for tests and diagnostics.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Records for one session, oldest first.
    pub async fn records_for_session(&self, session_id: &str) -> Vec<InteractionRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Attach satisfaction feedback to a session and derive insights.
    ///
    /// Fails with `invalid_input` for ratings outside 1–5. Returns whether a
    /// learning insight was generated.
    pub async fn feedback(
        &self,
        session_id: &str,
        rating: u8,
        comment: Option<String>,
    ) -> Result<FeedbackOutcome, MeshError> {
        if !(1..=5).contains(&rating) {
            return Err(MeshError::invalid_input(format!(
                "rating must be 1-5, got {}",
                rating
            )));
        }

        self.feedback.write().await.insert(
            session_id.to_string(),
            SessionFeedback {
                rating,
                comment,
                at: Utc::now(),
            },
        );

        let mut generated = false;
        if rating <= 2 {
            let insight = LearningInsight::new(
                InsightType::LowSatisfaction,
                format!("Low satisfaction on session {}", session_id),
                format!("A user rated session {} at {}/5.", session_id, rating),
                0.8,
                1,
                vec![
                    String::from("review agent routing for this query cluster"),
                    String::from("analyze response quality of the answering agents"),
                    String::from("consider retraining or reconfiguring the routed agents"),
                ],
            );
            self.push_insight(insight).await;
            generated = true;
        } else if rating >= 4 {
            let insight = LearningInsight::new(
                InsightType::HighSatisfaction,
                format!("High satisfaction on session {}", session_id),
                format!("A user rated session {} at {}/5.", session_id, rating),
                0.9,
                1,
                vec![
                    String::from("reinforce the routing pattern that served this session"),
                    String::from("record the interaction as a positive example"),
                ],
            );
            self.push_insight(insight).await;
            generated = true;
        }

        if self.detect_routing_drift().await {
            generated = true;
        }

        Ok(FeedbackOutcome {
            insight_generated: generated,
        })
    }

    async fn push_insight(&self, insight: LearningInsight) {
        self.journal_entry(JournalEntry::Insight(insight.clone())).await;
        self.insights.write().await.push(insight);
    }

    /// Week-over-week success-rate comparison per agent. Emits a
    /// `routing_drift` insight when an agent with at least 20 recent data
    /// points lost more than 15 percentage points. Returns whether anything
    /// was emitted.
    async fn detect_routing_drift(&self) -> bool {
        let now = Utc::now();
        let week_ago = now - ChronoDuration::days(DRIFT_WINDOW);
        let fortnight_ago = now - ChronoDuration::days(2 * DRIFT_WINDOW);

        // (this_week_success, this_week_total, prior_week_success, prior_week_total)
        let mut per_agent: HashMap<String, (u64, u64, u64, u64)> = HashMap::new();
        {
            let records = self.records.read().await;
            for record in records.iter() {
                if record.timestamp < fortnight_ago {
                    continue;
                }
                let entry = per_agent.entry(record.agent_id.clone()).or_default();
                if record.timestamp >= week_ago {
                    entry.1 += 1;
                    if record.success {
                        entry.0 += 1;
                    }
                } else {
                    entry.3 += 1;
                    if record.success {
                        entry.2 += 1;
                    }
                }
            }
        }

        let mut emitted = false;
        for (agent_id, (cur_ok, cur_total, prev_ok, prev_total)) in per_agent {
            let points = (cur_total + prev_total) as usize;
            if points < DRIFT_MIN_POINTS || cur_total == 0 || prev_total == 0 {
                continue;
            }
            let current = cur_ok as f64 / cur_total as f64;
            let prior = prev_ok as f64 / prev_total as f64;
            if prior - current <= DRIFT_THRESHOLD {
                continue;
            }
            // One pending drift insight per agent at a time.
            let already_pending = self.insights.read().await.iter().any(|i| {
                i.insight_type == InsightType::RoutingDrift
                    && i.status == InsightStatus::Pending
                    && i.description.contains(&agent_id)
            });
            if already_pending {
                continue;
            }
            log::warn!(
                "routing drift for agent {}: success {:.0}% -> {:.0}%",
                agent_id,
                prior * 100.0,
                current * 100.0
            );
            let insight = LearningInsight::new(
                InsightType::RoutingDrift,
                format!("Routing drift for agent {}", agent_id),
                format!(
                    "Success rate for agent {} dropped from {:.0}% to {:.0}% week-over-week.",
                    agent_id,
                    prior * 100.0,
                    current * 100.0
                ),
                0.7,
                points,
                vec![
                    String::from("review recent failures for the affected agent"),
                    String::from("rebalance routing keywords or confidence thresholds"),
                ],
            );
            self.push_insight(insight).await;
            emitted = true;
        }
        emitted
    }

    /// Rollup for one agent over a trailing window.
    pub async fn summary(&self, agent_id: &str, window: Duration) -> MetricsSummary {
        self.rollup(Some(agent_id), window).await
    }

    /// Rollup across all agents over a trailing window.
    pub async fn system_summary(&self, window: Duration) -> MetricsSummary {
        self.rollup(None, window).await
    }

    async fn rollup(&self, agent_id: Option<&str>, window: Duration) -> MetricsSummary {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::days(3650));
        let records = self.records.read().await;

        let mut interactions = 0u64;
        let mut successes = 0u64;
        let mut quality_sum = 0.0;
        let mut quality_n = 0u64;
        let mut latency_sum = 0.0;
        let mut cost_sum = 0.0;
        let mut sessions: Vec<&str> = Vec::new();

        for record in records.iter() {
            if record.timestamp < cutoff {
                continue;
            }
            if let Some(agent_id) = agent_id {
                if record.agent_id != agent_id {
                    continue;
                }
            }
            interactions += 1;
            latency_sum += record.response_time_ms as f64;
            cost_sum += record.cost;
            if record.success {
                successes += 1;
                quality_sum += record.quality;
                quality_n += 1;
            }
            if !sessions.contains(&record.session_id.as_str()) {
                sessions.push(&record.session_id);
            }
        }

        let feedback = self.feedback.read().await;
        let mut rating_sum = 0.0;
        let mut rating_n = 0u64;
        for session_id in &sessions {
            if let Some(fb) = feedback.get(*session_id) {
                if fb.at >= cutoff {
                    rating_sum += fb.rating as f64;
                    rating_n += 1;
                }
            }
        }

        MetricsSummary {
            interactions,
            avg_quality: if quality_n > 0 {
                quality_sum / quality_n as f64
            } else {
                0.0
            },
            avg_latency_ms: if interactions > 0 {
                latency_sum / interactions as f64
            } else {
                0.0
            },
            success_rate: if interactions > 0 {
                successes as f64 / interactions as f64
            } else {
                0.0
            },
            avg_cost: if interactions > 0 {
                cost_sum / interactions as f64
            } else {
                0.0
            },
            avg_rating: if rating_n > 0 {
                Some(rating_sum / rating_n as f64)
            } else {
                None
            },
        }
    }

    /// Move an (agent, skill) proficiency by `delta`, clamped to `[0, 1]`.
    /// Usage count is monotonic; the trend smooths recent deltas.
    pub async fn skill_update(&self, agent_id: &str, skill: &str, delta: f64) -> AgentSkill {
        let mut skills = self.skills.write().await;
        let cell = skills
            .entry(agent_id.to_string())
            .or_default()
            .entry(skill.to_string())
            .or_insert_with(|| AgentSkill {
                agent_id: agent_id.to_string(),
                skill: skill.to_string(),
                proficiency: 0.5,
                usage_count: 0,
                trend: 0.0,
                last_used: Utc::now(),
            });
        cell.proficiency = (cell.proficiency + delta).clamp(0.0, 1.0);
        cell.usage_count += 1;
        cell.trend = 0.8 * cell.trend + 0.2 * delta;
        cell.last_used = Utc::now();
        let snapshot = cell.clone();
        drop(skills);
        self.journal_entry(JournalEntry::Skill(snapshot.clone())).await;
        snapshot
    }

    /// All skill cells for one agent.
    pub async fn skills_for(&self, agent_id: &str) -> Vec<AgentSkill> {
        self.skills
            .read()
            .await
            .get(agent_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Insights with the given status, newest first, up to `limit`.
    pub async fn insights(&self, status: InsightStatus, limit: usize) -> Vec<LearningInsight> {
        let insights = self.insights.read().await;
        let mut matching: Vec<LearningInsight> = insights
            .iter()
            .filter(|i| i.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        matching
    }

    /// Mark an insight applied and return the selection-weight adjustment it
    /// implies (zero for insight types that don't tune weights). `None` for
    /// unknown ids.
    pub async fn apply_insight(&self, insight_id: &str) -> Option<WeightAdjustment> {
        let mut insights = self.insights.write().await;
        let insight = insights.iter_mut().find(|i| i.id == insight_id)?;
        insight.status = InsightStatus::Applied;
        insight.implemented_at = Some(Utc::now());
        let adjustment = match insight.insight_type {
            // Quality complaints shift weight from cost toward quality.
            InsightType::LowSatisfaction => WeightAdjustment {
                quality: 0.05,
                cost: -0.05,
                ..WeightAdjustment::default()
            },
            // Drift shifts weight toward reliability.
            InsightType::RoutingDrift => WeightAdjustment {
                reliability: 0.05,
                speed: -0.05,
                ..WeightAdjustment::default()
            },
            InsightType::HighSatisfaction | InsightType::MetricsShedding => {
                WeightAdjustment::default()
            }
        };
        Some(adjustment)
    }

    /// Mark an insight dismissed. Returns `false` for unknown ids.
    pub async fn dismiss_insight(&self, insight_id: &str) -> bool {
        let mut insights = self.insights.write().await;
        match insights.iter_mut().find(|i| i.id == insight_id) {
            Some(insight) => {
                insight.status = InsightStatus::Dismissed;
                true
            }
            None => false,
        }
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session: &str, agent: &str, success: bool) -> InteractionRecord {
        InteractionRecord::new(
            session,
            agent,
            CapabilityTier::Balanced,
            "test query",
            if success { 0.8 } else { 0.0 },
            120,
            50,
            0.001,
            success,
            if success { None } else { Some(ErrorKind::Timeout) },
        )
    }

    #[tokio::test]
    async fn test_record_and_rollup() {
        let store = MetricsStore::new();
        store.record(record("s1", "a1", true)).await;
        store.record(record("s1", "a1", true)).await;
        store.record(record("s2", "a1", false)).await;

        let summary = store.summary("a1", Duration::from_secs(3600)).await;
        assert_eq!(summary.interactions, 3);
        assert!((summary.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((summary.avg_quality - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_repeated_queries_are_not_deduplicated() {
        let store = MetricsStore::new();
        store.record(record("s1", "a1", true)).await;
        store.record(record("s1", "a1", true)).await;
        assert_eq!(store.record_count().await, 2);
    }

    #[tokio::test]
    async fn test_low_rating_generates_insight_with_three_actions() {
        let store = MetricsStore::new();
        let outcome = store.feedback("s1", 1, None).await.unwrap();
        assert!(outcome.insight_generated);

        let pending = store.insights(InsightStatus::Pending, 10).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].insight_type, InsightType::LowSatisfaction);
        assert!((pending[0].confidence - 0.8).abs() < 1e-9);
        assert!(pending[0].recommended_actions.len() >= 3);
    }

    #[tokio::test]
    async fn test_high_rating_generates_insight() {
        let store = MetricsStore::new();
        store.feedback("s1", 5, Some(String::from("great"))).await.unwrap();
        let pending = store.insights(InsightStatus::Pending, 10).await;
        assert_eq!(pending[0].insight_type, InsightType::HighSatisfaction);
        assert!((pending[0].confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_neutral_rating_generates_nothing() {
        let store = MetricsStore::new();
        let outcome = store.feedback("s1", 3, None).await.unwrap();
        assert!(!outcome.insight_generated);
        assert!(store.insights(InsightStatus::Pending, 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_rating_rejected() {
        let store = MetricsStore::new();
        let err = store.feedback("s1", 0, None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        let err = store.feedback("s1", 6, None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_skill_updates_clamp_and_count() {
        let store = MetricsStore::new();
        for _ in 0..20 {
            store.skill_update("a1", "webhooks", 0.1).await;
        }
        let skill = &store.skills_for("a1").await[0];
        assert_eq!(skill.proficiency, 1.0);
        assert_eq!(skill.usage_count, 20);
        assert!(skill.trend > 0.0);

        let skill = store.skill_update("a1", "webhooks", -5.0).await;
        assert_eq!(skill.proficiency, 0.0);
        assert_eq!(skill.usage_count, 21);
    }

    #[tokio::test]
    async fn test_apply_insight_returns_adjustment() {
        let store = MetricsStore::new();
        store.feedback("s1", 1, None).await.unwrap();
        let insight = store.insights(InsightStatus::Pending, 1).await.remove(0);

        let adjustment = store.apply_insight(&insight.id).await.unwrap();
        assert!(adjustment.quality > 0.0);
        assert!(store.insights(InsightStatus::Pending, 10).await.is_empty());
        assert_eq!(store.insights(InsightStatus::Applied, 10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_query_hash_is_stable_and_normalized() {
        assert_eq!(query_hash("Hello World"), query_hash("  hello world  "));
        assert_ne!(query_hash("hello"), query_hash("world"));
        assert_eq!(query_hash("x").len(), 16);
    }
}
