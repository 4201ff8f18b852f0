//! Live execution tracking and subscriber fan-out.
//!
//! The [`RealtimeTracker`] maintains a state machine per active execution —
//! session phase, per-agent sub-state, and a bounded log ring — and
//! broadcasts every transition to subscribers. Each subscriber owns a
//! bounded [`EventSink`]; overflow drops the oldest queued events and the
//! subscriber is handed a [`Delivery::Lagged`] marker so it can resync from
//! [`RealtimeTracker::snapshot`]. A slow subscriber can therefore never
//! stall the tracker or any other subscriber.
//!
//! # State machines
//!
//! ```text
//! Session:  queued → analyzing → processing ⇄ collaborating → finishing → done
//!                                     (failed reachable from any non-terminal)
//! Agent:    idle → analyzing → processing ⇄ collaborating → completed
//!                                     (error terminal)
//! ```
//!
//! # Ordering
//!
//! Events for one session carry strictly increasing sequence numbers and are
//! delivered to each subscriber in emit order. There is no ordering guarantee
//! across sessions.
//!
//! # Liveness
//!
//! A heartbeat is pushed to every subscriber each maintenance tick (30 s by
//! default). Subscribers acknowledge via [`RealtimeTracker::ack`]; those
//! silent for 90 s (or whose sink was closed) are unsubscribed. Completed
//! sessions stay queryable for the retention window (10 min default), then
//! are garbage-collected by [`RealtimeTracker::sweep`].

use crate::agentmesh::clock::SequenceGen;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};

/// Log-ring capacity per session.
const EVENT_LOG_CAP: usize = 500;

// ---------------------------------------------------------------------------
// State machines
// ---------------------------------------------------------------------------

/// Phase of one tracked execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Accepted, not yet started.
    Queued,
    /// Routing and planning.
    Analyzing,
    /// Agents are producing answers.
    Processing,
    /// Agents are exchanging intermediate results.
    Collaborating,
    /// Synthesizing and committing the final answer.
    Finishing,
    /// Terminal: completed successfully.
    Done,
    /// Terminal: failed or cancelled.
    Failed,
}

impl SessionPhase {
    /// Whether the phase is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Done | SessionPhase::Failed)
    }

    /// Legal forward transitions. `Failed` is reachable from any
    /// non-terminal phase; terminal phases admit nothing.
    pub fn can_transition_to(&self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Queued, Analyzing)
                | (Analyzing, Processing)
                | (Processing, Collaborating)
                | (Collaborating, Processing)
                | (Processing, Finishing)
                | (Collaborating, Finishing)
                | (Finishing, Done)
        )
    }
}

/// Sub-state of one agent within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Not yet started.
    Idle,
    /// Reading context and knowledge.
    Analyzing,
    /// Generating an answer.
    Processing,
    /// Consuming another agent's output.
    Collaborating,
    /// Terminal: produced an answer.
    Completed,
    /// Terminal: failed.
    Error,
}

/// Live progress of one agent within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProgress {
    /// The agent's id.
    pub agent_id: String,
    /// Current status.
    pub status: AgentStatus,
    /// Progress percentage in `[0, 100]`.
    pub progress: f64,
    /// Human-readable description of what the agent is doing.
    pub current_task: String,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
}

/// Severity of a session log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    Info,
    /// Recoverable problem.
    Warn,
    /// Failure.
    Error,
}

/// One entry in a session's bounded log ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Producing agent, when attributable.
    pub agent_id: Option<String>,
    /// Log message.
    pub message: String,
    /// Structured details.
    pub details: Option<serde_json::Value>,
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What happened, inside a [`SessionEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventPayload {
    /// A session was opened for tracking.
    SessionOpened {
        /// The query being executed.
        query: String,
        /// Ids of the routed agents.
        agents: Vec<String>,
    },
    /// The session moved to a new phase.
    PhaseChanged {
        /// New phase.
        phase: SessionPhase,
        /// Overall progress percentage.
        progress: f64,
    },
    /// An agent's status changed.
    AgentStatus {
        /// The agent.
        agent_id: String,
        /// New status.
        status: AgentStatus,
        /// Agent-level progress percentage.
        progress: f64,
        /// What the agent is doing.
        message: String,
    },
    /// Two agents collaborated.
    AgentCollaboration {
        /// The requesting agent.
        primary_agent_id: String,
        /// The consulted agent.
        secondary_agent_id: String,
        /// Kind of collaboration (free-form, e.g. `"context_share"`).
        kind: String,
        /// Why the collaboration happened.
        reason: String,
    },
    /// A log line was appended.
    Log {
        /// Severity.
        level: LogLevel,
        /// Producing agent, when attributable.
        agent_id: Option<String>,
        /// Log message.
        message: String,
    },
    /// Terminal event: the session closed.
    SessionClosed {
        /// `"done"` on success, otherwise the error kind tag
        /// (`"failed"`, `"cancelled"`, `"partial_failure"`, …).
        outcome: String,
    },
}

/// One broadcast event. Sequence numbers are strictly increasing per
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Per-session sequence number, starting at 1.
    pub seq: u64,
    /// The session this event belongs to.
    pub session_id: String,
    /// Emit time.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub payload: SessionEventPayload,
}

/// What a subscriber pulls out of its sink.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// A session event, in emit order.
    Event(SessionEvent),
    /// The sink overflowed and `dropped` events were discarded. Resync via
    /// [`RealtimeTracker::snapshot`].
    Lagged {
        /// Number of events dropped since the last delivery.
        dropped: u64,
    },
    /// Periodic liveness probe; acknowledge via [`RealtimeTracker::ack`].
    Heartbeat,
}

// ---------------------------------------------------------------------------
// Bounded sink
// ---------------------------------------------------------------------------

struct SinkState {
    queue: VecDeque<Delivery>,
    dropped: u64,
    closed: bool,
}

/// A bounded, drop-oldest outbound queue owned by one subscriber.
///
/// Pushes never block: when the queue is full the oldest entry is discarded
/// and a [`Delivery::Lagged`] marker is surfaced to the consumer before the
/// next event, carrying the drop count.
pub struct EventSink {
    state: Mutex<SinkState>,
    capacity: usize,
    notify: Notify,
}

impl EventSink {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SinkState {
                queue: VecDeque::new(),
                dropped: 0,
                closed: false,
            }),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Enqueue without blocking, dropping the oldest entry on overflow.
    async fn push(&self, delivery: Delivery) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        while state.queue.len() >= self.capacity {
            state.queue.pop_front();
            state.dropped += 1;
        }
        state.queue.push_back(delivery);
        drop(state);
        self.notify.notify_one();
    }

    /// Receive the next delivery, waiting until one is available.
    ///
    /// Returns `None` once the sink is closed and drained. A pending lag is
    /// reported before any newer event so the consumer knows to resync.
    pub async fn recv(&self) -> Option<Delivery> {
        loop {
            {
                let mut state = self.state.lock().await;
                if state.dropped > 0 {
                    let dropped = state.dropped;
                    state.dropped = 0;
                    return Some(Delivery::Lagged { dropped });
                }
                if let Some(delivery) = state.queue.pop_front() {
                    return Some(delivery);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking receive for polling consumers and tests.
    pub async fn try_recv(&self) -> Option<Delivery> {
        let mut state = self.state.lock().await;
        if state.dropped > 0 {
            let dropped = state.dropped;
            state.dropped = 0;
            return Some(Delivery::Lagged { dropped });
        }
        state.queue.pop_front()
    }

    /// Entries currently queued.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.queue.is_empty()
    }

    async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

/// Which sessions a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFilter {
    /// Every session.
    All,
    /// One session by id.
    Session(String),
}

impl SubscriptionFilter {
    fn matches(&self, session_id: &str) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Session(id) => id == session_id,
        }
    }
}

struct SubscriberEntry {
    filter: SubscriptionFilter,
    sink: Arc<EventSink>,
    last_ack: Instant,
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Queryable snapshot of one tracked session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// The session id.
    pub session_id: String,
    /// The query being executed.
    pub query: String,
    /// Current phase.
    pub phase: SessionPhase,
    /// Overall progress percentage in `[0, 100]`.
    pub progress: f64,
    /// When tracking began.
    pub started_at: DateTime<Utc>,
    /// Rough completion estimate.
    pub estimated_completion: DateTime<Utc>,
    /// Per-agent sub-state.
    pub agents: HashMap<String, AgentProgress>,
    /// Bounded log ring (cap 500), oldest first.
    pub event_log: VecDeque<SessionLogEntry>,
    /// Highest sequence number emitted so far.
    pub last_seq: u64,
    /// Set when the session reached a terminal phase.
    pub closed_at: Option<DateTime<Utc>>,
}

struct TrackedSession {
    state: SessionState,
    seq: SequenceGen,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Owner of all live session state and the subscriber set.
pub struct RealtimeTracker {
    sessions: RwLock<HashMap<String, TrackedSession>>,
    subscribers: RwLock<HashMap<String, SubscriberEntry>>,
    queue_capacity: usize,
    retention: Duration,
    stale_after: Duration,
}

impl RealtimeTracker {
    /// Create a tracker with default queue capacity (256), retention
    /// (10 min), and subscriber staleness bound (90 s).
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            queue_capacity: 256,
            retention: Duration::from_secs(600),
            stale_after: Duration::from_secs(90),
        }
    }

    /// Override the per-subscriber queue capacity (builder pattern).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Override the completed-session retention window (builder pattern).
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Override the subscriber staleness bound (builder pattern).
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Begin tracking a session and emit `session_opened`.
    pub async fn open_session(&self, session_id: &str, query: &str, agents: &[String]) {
        let now = Utc::now();
        let estimate = now + ChronoDuration::seconds(20 * agents.len().max(1) as i64);
        let agent_states = agents
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    AgentProgress {
                        agent_id: id.clone(),
                        status: AgentStatus::Idle,
                        progress: 0.0,
                        current_task: String::from("queued"),
                        updated_at: now,
                    },
                )
            })
            .collect();

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session_id) {
            log::warn!("reopening already-tracked session {}", session_id);
        }
        let mut tracked = TrackedSession {
            state: SessionState {
                session_id: session_id.to_string(),
                query: query.to_string(),
                phase: SessionPhase::Queued,
                progress: 0.0,
                started_at: now,
                estimated_completion: estimate,
                agents: agent_states,
                event_log: VecDeque::new(),
                last_seq: 0,
                closed_at: None,
            },
            seq: SequenceGen::new(),
        };
        let event = stamp(
            &mut tracked,
            SessionEventPayload::SessionOpened {
                query: query.to_string(),
                agents: agents.to_vec(),
            },
        );
        sessions.insert(session_id.to_string(), tracked);
        drop(sessions);
        self.fan_out(event).await;
    }

    /// Transition the session phase and emit `phase_changed`.
    ///
    /// Illegal transitions (from a terminal phase, or skipping the machine)
    /// are ignored with a warning; the tracker never panics on a late event.
    pub async fn set_phase(&self, session_id: &str, phase: SessionPhase, progress: f64) {
        let event = {
            let mut sessions = self.sessions.write().await;
            let tracked = match sessions.get_mut(session_id) {
                Some(t) => t,
                None => return,
            };
            if !tracked.state.phase.can_transition_to(phase) {
                log::warn!(
                    "ignoring illegal phase transition {:?} -> {:?} for session {}",
                    tracked.state.phase,
                    phase,
                    session_id
                );
                return;
            }
            tracked.state.phase = phase;
            tracked.state.progress = progress.clamp(0.0, 100.0);
            if phase.is_terminal() {
                tracked.state.closed_at = Some(Utc::now());
            }
            stamp(
                tracked,
                SessionEventPayload::PhaseChanged {
                    phase,
                    progress: progress.clamp(0.0, 100.0),
                },
            )
        };
        self.fan_out(event).await;
    }

    /// Update one agent's sub-state and emit `agent_status`.
    pub async fn set_agent_status(
        &self,
        session_id: &str,
        agent_id: &str,
        status: AgentStatus,
        progress: f64,
        message: &str,
    ) {
        let event = {
            let mut sessions = self.sessions.write().await;
            let tracked = match sessions.get_mut(session_id) {
                Some(t) => t,
                None => return,
            };
            let progress = progress.clamp(0.0, 100.0);
            let entry = tracked
                .state
                .agents
                .entry(agent_id.to_string())
                .or_insert_with(|| AgentProgress {
                    agent_id: agent_id.to_string(),
                    status: AgentStatus::Idle,
                    progress: 0.0,
                    current_task: String::new(),
                    updated_at: Utc::now(),
                });
            entry.status = status;
            entry.progress = progress;
            entry.current_task = message.to_string();
            entry.updated_at = Utc::now();
            stamp(
                tracked,
                SessionEventPayload::AgentStatus {
                    agent_id: agent_id.to_string(),
                    status,
                    progress,
                    message: message.to_string(),
                },
            )
        };
        self.fan_out(event).await;
    }

    /// Record a collaboration between two agents and emit
    /// `agent_collaboration`.
    pub async fn record_collaboration(
        &self,
        session_id: &str,
        primary_agent_id: &str,
        secondary_agent_id: &str,
        kind: &str,
        reason: &str,
    ) {
        let event = {
            let mut sessions = self.sessions.write().await;
            let tracked = match sessions.get_mut(session_id) {
                Some(t) => t,
                None => return,
            };
            stamp(
                tracked,
                SessionEventPayload::AgentCollaboration {
                    primary_agent_id: primary_agent_id.to_string(),
                    secondary_agent_id: secondary_agent_id.to_string(),
                    kind: kind.to_string(),
                    reason: reason.to_string(),
                },
            )
        };
        self.fan_out(event).await;
    }

    /// Append to the session's bounded log ring and emit `log`.
    pub async fn append_log(
        &self,
        session_id: &str,
        level: LogLevel,
        agent_id: Option<&str>,
        message: &str,
        details: Option<serde_json::Value>,
    ) {
        let event = {
            let mut sessions = self.sessions.write().await;
            let tracked = match sessions.get_mut(session_id) {
                Some(t) => t,
                None => return,
            };
            tracked.state.event_log.push_back(SessionLogEntry {
                level,
                agent_id: agent_id.map(String::from),
                message: message.to_string(),
                details,
                timestamp: Utc::now(),
            });
            while tracked.state.event_log.len() > EVENT_LOG_CAP {
                tracked.state.event_log.pop_front();
            }
            stamp(
                tracked,
                SessionEventPayload::Log {
                    level,
                    agent_id: agent_id.map(String::from),
                    message: message.to_string(),
                },
            )
        };
        self.fan_out(event).await;
    }

    /// Close a session with a terminal outcome and emit `session_closed`.
    ///
    /// `outcome` is `"done"` for success or the error-kind tag otherwise.
    /// The session stays queryable until the retention window lapses.
    pub async fn close_session(&self, session_id: &str, outcome: &str) {
        let event = {
            let mut sessions = self.sessions.write().await;
            let tracked = match sessions.get_mut(session_id) {
                Some(t) => t,
                None => return,
            };
            if !tracked.state.phase.is_terminal() {
                // A partial failure still produced a response; only hard
                // failures land in the Failed phase.
                tracked.state.phase = if outcome == "done" || outcome == "partial_failure" {
                    SessionPhase::Done
                } else {
                    SessionPhase::Failed
                };
            }
            tracked.state.progress = 100.0;
            tracked.state.closed_at = Some(Utc::now());
            stamp(
                tracked,
                SessionEventPayload::SessionClosed {
                    outcome: outcome.to_string(),
                },
            )
        };
        self.fan_out(event).await;
    }

    /// Register a subscriber and get its sink.
    ///
    /// An existing subscription with the same id is replaced (its old sink is
    /// closed).
    pub async fn subscribe(&self, subscriber_id: &str, filter: SubscriptionFilter) -> Arc<EventSink> {
        let sink = Arc::new(EventSink::new(self.queue_capacity));
        let mut subscribers = self.subscribers.write().await;
        if let Some(old) = subscribers.insert(
            subscriber_id.to_string(),
            SubscriberEntry {
                filter,
                sink: Arc::clone(&sink),
                last_ack: Instant::now(),
            },
        ) {
            old.sink.close().await;
        }
        log::debug!("subscriber {} registered", subscriber_id);
        sink
    }

    /// Remove a subscriber and close its sink.
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        if let Some(entry) = self.subscribers.write().await.remove(subscriber_id) {
            entry.sink.close().await;
            log::debug!("subscriber {} removed", subscriber_id);
        }
    }

    /// Record a liveness acknowledgement for a subscriber.
    pub async fn ack(&self, subscriber_id: &str) {
        if let Some(entry) = self.subscribers.write().await.get_mut(subscriber_id) {
            entry.last_ack = Instant::now();
        }
    }

    /// Snapshot one session's full state.
    pub async fn snapshot(&self, session_id: &str) -> Option<SessionState> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|t| t.state.clone())
    }

    /// Snapshots of every session not yet garbage-collected.
    pub async fn active_sessions(&self) -> Vec<SessionState> {
        self.sessions
            .read()
            .await
            .values()
            .map(|t| t.state.clone())
            .collect()
    }

    /// One maintenance pass: heartbeat every subscriber, evict the stale
    /// ones, and garbage-collect sessions past retention.
    ///
    /// Driven by [`spawn_maintenance`](RealtimeTracker::spawn_maintenance)
    /// in production; tests call it directly.
    pub async fn sweep(&self) {
        // Heartbeats + stale eviction.
        let stale: Vec<String> = {
            let mut subscribers = self.subscribers.write().await;
            let mut stale = Vec::new();
            for (id, entry) in subscribers.iter() {
                if entry.last_ack.elapsed() > self.stale_after {
                    stale.push(id.clone());
                } else {
                    entry.sink.push(Delivery::Heartbeat).await;
                }
            }
            for id in &stale {
                if let Some(entry) = subscribers.remove(id) {
                    entry.sink.close().await;
                }
            }
            stale
        };
        for id in &stale {
            log::info!("unsubscribed stale subscriber {}", id);
        }

        // Session GC.
        let mut sessions = self.sessions.write().await;
        let retention =
            ChronoDuration::from_std(self.retention).unwrap_or_else(|_| ChronoDuration::seconds(600));
        let cutoff = Utc::now() - retention;
        sessions.retain(|_, t| match t.state.closed_at {
            Some(closed_at) => closed_at > cutoff,
            None => true,
        });
    }

    /// Spawn the periodic maintenance task (heartbeats, stale eviction,
    /// session GC) at the given interval. The task runs until aborted.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tracker.sweep().await;
            }
        })
    }

    /// Deliver one event to every matching subscriber. Never blocks on a
    /// slow consumer; overflow is the sink's drop-oldest problem.
    async fn fan_out(&self, event: SessionEvent) {
        let subscribers = self.subscribers.read().await;
        for entry in subscribers.values() {
            if entry.filter.matches(&event.session_id) {
                entry.sink.push(Delivery::Event(event.clone())).await;
            }
        }
    }
}

impl Default for RealtimeTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Assign the next sequence number and build the event while the session
/// lock is held, which makes per-session emit order total.
fn stamp(tracked: &mut TrackedSession, payload: SessionEventPayload) -> SessionEvent {
    let seq = tracked.seq.next();
    tracked.state.last_seq = seq;
    SessionEvent {
        seq,
        session_id: tracked.state.session_id.clone(),
        timestamp: Utc::now(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_phase_machine_rejects_illegal_transitions() {
        assert!(SessionPhase::Queued.can_transition_to(SessionPhase::Analyzing));
        assert!(SessionPhase::Processing.can_transition_to(SessionPhase::Collaborating));
        assert!(SessionPhase::Collaborating.can_transition_to(SessionPhase::Processing));
        assert!(SessionPhase::Analyzing.can_transition_to(SessionPhase::Failed));
        assert!(!SessionPhase::Done.can_transition_to(SessionPhase::Failed));
        assert!(!SessionPhase::Queued.can_transition_to(SessionPhase::Done));
    }

    #[tokio::test]
    async fn test_events_carry_increasing_sequence() {
        let tracker = RealtimeTracker::new();
        let sink = tracker.subscribe("s1", SubscriptionFilter::All).await;

        tracker.open_session("sess", "q", &[String::from("a1")]).await;
        tracker.set_phase("sess", SessionPhase::Analyzing, 10.0).await;
        tracker
            .set_agent_status("sess", "a1", AgentStatus::Processing, 50.0, "working")
            .await;

        let mut prev = 0;
        for _ in 0..3 {
            match sink.try_recv().await.unwrap() {
                Delivery::Event(event) => {
                    assert!(event.seq > prev);
                    prev = event.seq;
                }
                other => panic!("unexpected delivery {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_and_reports_lag() {
        let tracker = RealtimeTracker::new().with_queue_capacity(4);
        let sink = tracker.subscribe("slow", SubscriptionFilter::All).await;

        tracker.open_session("sess", "q", &[]).await;
        for n in 0..10 {
            tracker
                .append_log("sess", LogLevel::Info, None, &format!("line {}", n), None)
                .await;
        }

        // 11 events were emitted into a capacity-4 queue: the consumer first
        // learns it lagged, then sees only the newest events.
        match sink.try_recv().await.unwrap() {
            Delivery::Lagged { dropped } => assert_eq!(dropped, 7),
            other => panic!("expected lag marker, got {:?}", other),
        }
        match sink.try_recv().await.unwrap() {
            Delivery::Event(event) => assert_eq!(event.seq, 8),
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_filter_restricts_fan_out() {
        let tracker = RealtimeTracker::new();
        let sink = tracker
            .subscribe("s1", SubscriptionFilter::Session(String::from("a")))
            .await;

        tracker.open_session("a", "q", &[]).await;
        tracker.open_session("b", "q", &[]).await;

        match sink.try_recv().await.unwrap() {
            Delivery::Event(event) => assert_eq!(event.session_id, "a"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(sink.try_recv().await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_collects_expired_sessions() {
        let tracker = RealtimeTracker::new().with_retention(Duration::from_secs(0));
        tracker.open_session("sess", "q", &[]).await;
        tracker.close_session("sess", "done").await;

        tracker.sweep().await;
        assert!(tracker.snapshot("sess").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_keeps_open_sessions() {
        let tracker = RealtimeTracker::new().with_retention(Duration::from_secs(0));
        tracker.open_session("sess", "q", &[]).await;
        tracker.sweep().await;
        assert!(tracker.snapshot("sess").await.is_some());
    }

    #[tokio::test]
    async fn test_stale_subscriber_evicted() {
        let tracker = RealtimeTracker::new().with_stale_after(Duration::from_secs(0));
        let sink = tracker.subscribe("s1", SubscriptionFilter::All).await;

        // Zero staleness bound: the first sweep evicts and closes the sink.
        tracker.sweep().await;
        tracker.open_session("sess", "q", &[]).await;
        assert!(sink.try_recv().await.is_none());
        assert!(sink.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_log_ring_is_bounded() {
        let tracker = RealtimeTracker::new();
        tracker.open_session("sess", "q", &[]).await;
        for n in 0..600 {
            tracker
                .append_log("sess", LogLevel::Debug, None, &format!("{}", n), None)
                .await;
        }
        let snapshot = tracker.snapshot("sess").await.unwrap();
        assert_eq!(snapshot.event_log.len(), EVENT_LOG_CAP);
        assert_eq!(snapshot.event_log.front().unwrap().message, "100");
    }
}
