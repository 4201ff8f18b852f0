//! Agent registry: CRUD over [`AgentDefinition`]s with a TTL'd read cache
//! and fast lookup by id, name, keyword, or domain.
//!
//! The registry fronts a pluggable [`AgentStore`] backing store. Reads serve
//! from an in-process cache refreshed lazily when its ~5-minute TTL lapses;
//! every mutation refreshes eagerly so routing never sees a stale write from
//! this process.
//!
//! Deactivated agents are excluded from every routing-facing lookup
//! ([`active_agents`](AgentRegistry::active_agents),
//! [`by_keywords`](AgentRegistry::by_keywords),
//! [`by_domain`](AgentRegistry::by_domain)) but stay resolvable through
//! [`get`](AgentRegistry::get) for historical metric attribution.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentmesh::{AgentDefinition, AgentRegistry};
//! use agentmesh::registry::InMemoryAgentStore;
//! use std::sync::Arc;
//!
//! # async {
//! let registry = AgentRegistry::new(Arc::new(InMemoryAgentStore::new()));
//!
//! registry.create(
//!     AgentDefinition::new("tech-1", "Technical Integration Specialist", "integration engineer")
//!         .with_keywords(vec!["webhook".into(), "api".into()]),
//! ).await.unwrap();
//!
//! let ranked = registry.by_keywords(&["webhook".into()]).await;
//! assert_eq!(ranked[0].0.id, "tech-1");
//! # };
//! ```

use crate::agentmesh::agent::AgentDefinition;
use crate::agentmesh::error::MeshError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default cache TTL.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// Backing store for agent definitions.
///
/// Implementations may persist to a relational store, a document store, or —
/// as [`InMemoryAgentStore`] does — nothing at all.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Load every agent record, active or not.
    async fn load_all(&self) -> Result<Vec<AgentDefinition>, MeshError>;

    /// Insert or replace one record by id.
    async fn upsert(&self, agent: AgentDefinition) -> Result<(), MeshError>;
}

/// The default, dependency-free [`AgentStore`].
pub struct InMemoryAgentStore {
    agents: RwLock<HashMap<String, AgentDefinition>>,
}

impl InMemoryAgentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store pre-populated with agents.
    pub fn with_agents(agents: Vec<AgentDefinition>) -> Self {
        let map = agents.into_iter().map(|a| (a.id.clone(), a)).collect();
        Self {
            agents: RwLock::new(map),
        }
    }
}

impl Default for InMemoryAgentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn load_all(&self) -> Result<Vec<AgentDefinition>, MeshError> {
        Ok(self.agents.read().await.values().cloned().collect())
    }

    async fn upsert(&self, agent: AgentDefinition) -> Result<(), MeshError> {
        self.agents.write().await.insert(agent.id.clone(), agent);
        Ok(())
    }
}

struct CacheState {
    agents: HashMap<String, AgentDefinition>,
    loaded_at: Option<Instant>,
}

/// Cached CRUD front over an [`AgentStore`].
pub struct AgentRegistry {
    store: Arc<dyn AgentStore>,
    cache: RwLock<CacheState>,
    ttl: Duration,
}

impl AgentRegistry {
    /// Create a registry with the default 5-minute cache TTL.
    pub fn new(store: Arc<dyn AgentStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(CacheState {
                agents: HashMap::new(),
                loaded_at: None,
            }),
            ttl: CACHE_TTL,
        }
    }

    /// Override the cache TTL (builder pattern).
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Force-reload the cache from the backing store.
    pub async fn refresh(&self) -> Result<(), MeshError> {
        let agents = self.store.load_all().await?;
        let mut cache = self.cache.write().await;
        cache.agents = agents.into_iter().map(|a| (a.id.clone(), a)).collect();
        cache.loaded_at = Some(Instant::now());
        log::debug!("agent cache refreshed: {} records", cache.agents.len());
        Ok(())
    }

    /// Reload lazily when the TTL has lapsed (or nothing was ever loaded).
    async fn ensure_fresh(&self) {
        let stale = {
            let cache = self.cache.read().await;
            match cache.loaded_at {
                Some(at) => at.elapsed() > self.ttl,
                None => true,
            }
        };
        if stale {
            if let Err(e) = self.refresh().await {
                log::warn!("agent cache refresh failed: {}", e);
            }
        }
    }

    /// Register a new agent.
    ///
    /// Fails with `invalid_input` when the id is taken or when an *active*
    /// agent already uses the name.
    pub async fn create(&self, agent: AgentDefinition) -> Result<(), MeshError> {
        self.ensure_fresh().await;
        {
            let cache = self.cache.read().await;
            if cache.agents.contains_key(&agent.id) {
                return Err(MeshError::invalid_input(format!(
                    "agent id '{}' already exists",
                    agent.id
                )));
            }
            if cache
                .agents
                .values()
                .any(|a| a.is_active && a.name == agent.name)
            {
                return Err(MeshError::invalid_input(format!(
                    "active agent named '{}' already exists",
                    agent.name
                )));
            }
        }
        self.store.upsert(agent).await?;
        self.refresh().await
    }

    /// Replace an existing agent record. Fails with `not_found` for unknown
    /// ids; enforces name uniqueness among active agents.
    pub async fn update(&self, mut agent: AgentDefinition) -> Result<(), MeshError> {
        self.ensure_fresh().await;
        {
            let cache = self.cache.read().await;
            if !cache.agents.contains_key(&agent.id) {
                return Err(MeshError::not_found(format!("agent '{}'", agent.id)));
            }
            if cache
                .agents
                .values()
                .any(|a| a.is_active && a.id != agent.id && a.name == agent.name)
            {
                return Err(MeshError::invalid_input(format!(
                    "active agent named '{}' already exists",
                    agent.name
                )));
            }
        }
        agent.updated_at = Utc::now();
        self.store.upsert(agent).await?;
        self.refresh().await
    }

    /// Soft-deactivate an agent. The record survives for metric attribution.
    pub async fn deactivate(&self, id: &str) -> Result<(), MeshError> {
        self.ensure_fresh().await;
        let mut agent = self
            .get(id)
            .await
            .ok_or_else(|| MeshError::not_found(format!("agent '{}'", id)))?;
        agent.is_active = false;
        agent.updated_at = Utc::now();
        self.store.upsert(agent).await?;
        self.refresh().await
    }

    /// Resolve an agent by id, active or not.
    pub async fn get(&self, id: &str) -> Option<AgentDefinition> {
        self.ensure_fresh().await;
        self.cache.read().await.agents.get(id).cloned()
    }

    /// Resolve an *active* agent by display name.
    pub async fn by_name(&self, name: &str) -> Option<AgentDefinition> {
        self.ensure_fresh().await;
        self.cache
            .read()
            .await
            .agents
            .values()
            .find(|a| a.is_active && a.name == name)
            .cloned()
    }

    /// All active agents.
    pub async fn active_agents(&self) -> Vec<AgentDefinition> {
        self.ensure_fresh().await;
        self.cache
            .read()
            .await
            .agents
            .values()
            .filter(|a| a.is_active)
            .cloned()
            .collect()
    }

    /// Number of active agents.
    pub async fn active_count(&self) -> usize {
        self.ensure_fresh().await;
        self.cache
            .read()
            .await
            .agents
            .values()
            .filter(|a| a.is_active)
            .count()
    }

    /// Active agents in the given domain.
    pub async fn by_domain(&self, domain: &str) -> Vec<AgentDefinition> {
        self.ensure_fresh().await;
        self.cache
            .read()
            .await
            .agents
            .values()
            .filter(|a| a.is_active && a.domain.eq_ignore_ascii_case(domain))
            .cloned()
            .collect()
    }

    /// Rank active agents against a keyword set.
    ///
    /// Rank = count of the agent's keywords present in `keywords`
    /// + 0.5 × specialization score, descending. Agents with no keyword
    /// overlap are omitted.
    pub async fn by_keywords(&self, keywords: &[String]) -> Vec<(AgentDefinition, f64)> {
        self.ensure_fresh().await;
        let lowered: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        let cache = self.cache.read().await;

        let mut ranked: Vec<(AgentDefinition, f64)> = cache
            .agents
            .values()
            .filter(|a| a.is_active)
            .filter_map(|agent| {
                let matches = agent
                    .keywords
                    .iter()
                    .filter(|k| lowered.contains(k))
                    .count();
                if matches == 0 {
                    return None;
                }
                let rank = matches as f64 + 0.5 * agent.specialization_score;
                Some((agent.clone(), rank))
            })
            .collect();

        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }
}
