//! Bounded per-session conversation memory.
//!
//! [`ConversationMemory`] keeps an in-RAM message log per session, bounded to
//! the most recent N messages (default 10), and projects a compact context
//! string for prompt assembly. It is the component behind the
//! `getConversation` / `listSessions` read surfaces and the context injected
//! into every agent prompt.
//!
//! Appends to one session are serialized through a per-session mutex so the
//! order of concurrent appends is preserved; unrelated sessions never contend
//! on each other. The outer map is only locked long enough to resolve the
//! session handle.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentmesh::ConversationMemory;
//! use agentmesh::model_client::Role;
//!
//! # async {
//! let memory = ConversationMemory::new(10, 6);
//! let session_id = memory.open_session(None).await;
//!
//! memory.append(&session_id, Role::User, "How do I set up webhooks?", None).await;
//! memory.append(&session_id, Role::Assistant, "Register an endpoint...", Some("Technical Integration Specialist")).await;
//!
//! let context = memory.context(&session_id).await;
//! assert!(context.starts_with("User: How do I set up webhooks?"));
//! # };
//! ```

use crate::agentmesh::clock::new_session_id;
use crate::agentmesh::knowledge::Citation;
use crate::agentmesh::model_client::Role;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Maximum characters of an assistant line included in context projection.
const ASSISTANT_CONTEXT_CHARS: usize = 200;

/// One message in a session's bounded log.
///
/// Content is never mutated after append; eviction only ever removes the
/// oldest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Who authored the message.
    pub role: Role,
    /// The message body.
    pub content: String,
    /// When the message was appended.
    pub timestamp: DateTime<Utc>,
    /// Display name of the producing agent, for assistant messages.
    pub agent_name: Option<String>,
    /// Citations attached to an assistant answer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
}

/// A single conversation session: bounded message log plus bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Stable session identifier (UUID v4).
    pub id: String,
    /// Optional end-user identity supplied at open time.
    pub user_id: Option<String>,
    /// When the session was opened.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent append or read-modifying operation.
    pub last_activity: DateTime<Utc>,
    /// The bounded message log, oldest first.
    pub messages: VecDeque<StoredMessage>,
    /// Names of agents that have contributed, in first-use order.
    pub agents_used: Vec<String>,
    /// Whether the session was escalated to a human.
    pub escalated: bool,
    /// Why the session was escalated, when it was.
    pub escalation_reason: Option<String>,
    /// Satisfaction rating (1–5) once feedback arrives.
    pub satisfaction: Option<u8>,
}

impl SessionRecord {
    fn new(id: String, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            created_at: now,
            last_activity: now,
            messages: VecDeque::new(),
            agents_used: Vec::new(),
            escalated: false,
            escalation_reason: None,
            satisfaction: None,
        }
    }

    /// First user message, used as the session's display query.
    pub fn first_query(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Compact per-session statistics returned by [`ConversationMemory::summary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Messages currently retained (≤ capacity).
    pub message_count: usize,
    /// Timestamp of the oldest retained message.
    pub first_ts: Option<DateTime<Utc>>,
    /// Timestamp of the newest retained message.
    pub last_ts: Option<DateTime<Utc>>,
}

/// Listing row for the `listSessions` surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Stable session identifier.
    pub session_id: String,
    /// First user message, if any.
    pub query: Option<String>,
    /// When the session was opened.
    pub created_at: DateTime<Utc>,
    /// Most recent activity.
    pub last_activity: DateTime<Utc>,
    /// Messages currently retained.
    pub message_count: usize,
    /// Agents that have contributed.
    pub agents_used: Vec<String>,
}

/// In-RAM, bounded, per-session conversation store.
///
/// Owned by the coordinator; other components receive read-only projections.
pub struct ConversationMemory {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionRecord>>>>,
    /// Messages retained per session before oldest-first eviction.
    capacity: usize,
    /// Messages projected by [`context`](ConversationMemory::context).
    context_window: usize,
}

impl ConversationMemory {
    /// Create a memory with the given retention capacity and context window.
    ///
    /// The defaults used by the coordinator are capacity 10 and window 6.
    pub fn new(capacity: usize, context_window: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity,
            context_window,
        }
    }

    /// Open a new session and return its identifier.
    pub async fn open_session(&self, user_id: Option<String>) -> String {
        let id = new_session_id();
        let record = SessionRecord::new(id.clone(), user_id);
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(record)));
        id
    }

    /// Resolve `session_id` if it exists, otherwise create it. Returns the
    /// id actually in use (a fresh UUID when `session_id` is `None`).
    pub async fn ensure_session(&self, session_id: Option<&str>, user_id: Option<String>) -> String {
        match session_id {
            Some(id) => {
                let mut sessions = self.sessions.write().await;
                if !sessions.contains_key(id) {
                    sessions.insert(
                        id.to_string(),
                        Arc::new(Mutex::new(SessionRecord::new(id.to_string(), user_id))),
                    );
                }
                id.to_string()
            }
            None => self.open_session(user_id).await,
        }
    }

    /// Whether a session with this id currently exists.
    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    async fn handle(&self, session_id: &str) -> Option<Arc<Mutex<SessionRecord>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Append a message to a session's log.
    ///
    /// O(1): pushes to the back and evicts the oldest entry once the log
    /// exceeds capacity. Creates the session implicitly if it does not exist
    /// yet, so the coordinator can always record turns. Appends to the same
    /// session are serialized; other sessions progress independently.
    pub async fn append(
        &self,
        session_id: &str,
        role: Role,
        content: impl Into<String>,
        agent_name: Option<&str>,
    ) {
        self.append_with_citations(session_id, role, content, agent_name, Vec::new())
            .await
    }

    /// Append an assistant answer together with its citations.
    pub async fn append_with_citations(
        &self,
        session_id: &str,
        role: Role,
        content: impl Into<String>,
        agent_name: Option<&str>,
        citations: Vec<Citation>,
    ) {
        let handle = match self.handle(session_id).await {
            Some(handle) => handle,
            None => {
                // Implicit create keeps the hot path to a single write lock.
                self.ensure_session(Some(session_id), None).await;
                match self.handle(session_id).await {
                    Some(handle) => handle,
                    None => return,
                }
            }
        };

        let mut session = handle.lock().await;
        session.messages.push_back(StoredMessage {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            agent_name: agent_name.map(String::from),
            citations,
        });
        while session.messages.len() > self.capacity {
            session.messages.pop_front();
        }
        session.last_activity = Utc::now();
    }

    /// Project the most recent messages into a compact context string.
    ///
    /// At most `context_window` (default 6) messages are included, one per
    /// line, oldest first, formatted as `"<Role>[ (agentName)]: <content>"`.
    /// Assistant lines are truncated to 200 characters so one verbose answer
    /// cannot crowd out the rest of the window. Missing sessions yield an
    /// empty string.
    pub async fn context(&self, session_id: &str) -> String {
        let handle = match self.handle(session_id).await {
            Some(handle) => handle,
            None => return String::new(),
        };
        let session = handle.lock().await;

        let skip = session.messages.len().saturating_sub(self.context_window);
        let mut lines = Vec::with_capacity(session.messages.len() - skip);
        for message in session.messages.iter().skip(skip) {
            let content: &str = if message.role == Role::Assistant {
                truncate_chars(&message.content, ASSISTANT_CONTEXT_CHARS)
            } else {
                &message.content
            };
            let line = match &message.agent_name {
                Some(agent) => format!("{} ({}): {}", message.role.label(), agent, content),
                None => format!("{}: {}", message.role.label(), content),
            };
            lines.push(line);
        }
        lines.join("\n")
    }

    /// Per-session statistics, or `None` for an unknown session.
    pub async fn summary(&self, session_id: &str) -> Option<SessionSummary> {
        let handle = self.handle(session_id).await?;
        let session = handle.lock().await;
        Some(SessionSummary {
            message_count: session.messages.len(),
            first_ts: session.messages.front().map(|m| m.timestamp),
            last_ts: session.messages.back().map(|m| m.timestamp),
        })
    }

    /// Full session snapshot for the `getConversation` surface.
    pub async fn conversation(&self, session_id: &str) -> Option<SessionRecord> {
        let handle = self.handle(session_id).await?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    /// Page through sessions for the `listSessions` surface, most recent
    /// activity first.
    pub async fn list_sessions(&self, limit: usize, offset: usize) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut rows = Vec::with_capacity(sessions.len());
        for handle in sessions.values() {
            let session = handle.lock().await;
            rows.push(SessionInfo {
                session_id: session.id.clone(),
                query: session.first_query().map(String::from),
                created_at: session.created_at,
                last_activity: session.last_activity,
                message_count: session.messages.len(),
                agents_used: session.agents_used.clone(),
            });
        }
        drop(sessions);
        rows.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        rows.into_iter().skip(offset).take(limit).collect()
    }

    /// Record that the named agents contributed to this session.
    pub async fn record_agents_used(&self, session_id: &str, agents: &[String]) {
        if let Some(handle) = self.handle(session_id).await {
            let mut session = handle.lock().await;
            for agent in agents {
                if !session.agents_used.contains(agent) {
                    session.agents_used.push(agent.clone());
                }
            }
            session.last_activity = Utc::now();
        }
    }

    /// Attach a satisfaction rating (1–5). Values outside the scale are
    /// clamped. Returns `false` for unknown sessions.
    pub async fn set_satisfaction(&self, session_id: &str, rating: u8) -> bool {
        match self.handle(session_id).await {
            Some(handle) => {
                let mut session = handle.lock().await;
                session.satisfaction = Some(rating.clamp(1, 5));
                true
            }
            None => false,
        }
    }

    /// Mark a session escalated, recording why.
    pub async fn escalate(&self, session_id: &str, reason: impl Into<String>) -> bool {
        match self.handle(session_id).await {
            Some(handle) => {
                let mut session = handle.lock().await;
                session.escalated = true;
                session.escalation_reason = Some(reason.into());
                true
            }
            None => false,
        }
    }

    /// Drop sessions idle for longer than `idle_for`. Returns how many were
    /// removed.
    pub async fn prune(&self, idle_for: std::time::Duration) -> usize {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(idle_for).unwrap_or_else(|_| ChronoDuration::seconds(0));
        let mut sessions = self.sessions.write().await;
        let mut stale = Vec::new();
        for (id, handle) in sessions.iter() {
            let session = handle.lock().await;
            if session.last_activity < cutoff {
                stale.push(id.clone());
            }
        }
        for id in &stale {
            sessions.remove(id);
        }
        stale.len()
    }

    /// Number of sessions currently retained.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Truncate to at most `max` characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_evicts_oldest_beyond_capacity() {
        let memory = ConversationMemory::new(3, 6);
        let id = memory.open_session(None).await;

        for n in 0..5 {
            memory
                .append(&id, Role::User, format!("message {}", n), None)
                .await;
        }

        let record = memory.conversation(&id).await.unwrap();
        assert_eq!(record.messages.len(), 3);
        assert_eq!(record.messages.front().unwrap().content, "message 2");
        assert_eq!(record.messages.back().unwrap().content, "message 4");
    }

    #[tokio::test]
    async fn test_context_truncates_assistant_lines() {
        let memory = ConversationMemory::new(10, 6);
        let id = memory.open_session(None).await;

        memory.append(&id, Role::User, "short question", None).await;
        memory
            .append(&id, Role::Assistant, "x".repeat(500), Some("Helper"))
            .await;

        let context = memory.context(&id).await;
        let assistant_line = context.lines().last().unwrap();
        assert!(assistant_line.starts_with("Assistant (Helper): "));
        let body = assistant_line.trim_start_matches("Assistant (Helper): ");
        assert_eq!(body.chars().count(), 200);
    }

    #[tokio::test]
    async fn test_context_missing_session_is_empty() {
        let memory = ConversationMemory::new(10, 6);
        assert_eq!(memory.context("no-such-session").await, "");
    }

    #[tokio::test]
    async fn test_context_window_limits_lines() {
        let memory = ConversationMemory::new(10, 6);
        let id = memory.open_session(None).await;
        for n in 0..9 {
            memory
                .append(&id, Role::User, format!("m{}", n), None)
                .await;
        }
        let context = memory.context(&id).await;
        assert_eq!(context.lines().count(), 6);
        assert!(context.starts_with("User: m3"));
    }

    #[tokio::test]
    async fn test_reads_are_non_mutating() {
        let memory = ConversationMemory::new(10, 6);
        let id = memory.open_session(None).await;
        memory.append(&id, Role::User, "one", None).await;
        let before = memory.context(&id).await;
        let _ = memory.summary(&id).await;
        let after = memory.context(&id).await;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_prune_removes_idle_sessions() {
        let memory = ConversationMemory::new(10, 6);
        let id = memory.open_session(None).await;
        memory.append(&id, Role::User, "hello", None).await;

        // Nothing is older than an hour.
        assert_eq!(memory.prune(std::time::Duration::from_secs(3600)).await, 0);
        // Everything is older than zero seconds.
        assert_eq!(memory.prune(std::time::Duration::from_secs(0)).await, 1);
        assert_eq!(memory.session_count().await, 0);
    }
}
