//! Keyword-scored agent routing.
//!
//! The [`AgentRouter`] turns a natural-language query into an ordered list of
//! [`RouteDecision`]s — which specialist agents should answer, and with what
//! confidence. Scoring is deterministic: for a fixed agent set, the same
//! query always routes the same way within one cache epoch.
//!
//! # Algorithm
//!
//! 1. Lowercase and tokenize the query.
//! 2. Expand tokens through a fixed keyword-category map (webhook, billing,
//!    security, database, deployment, legal, competitive, marketing,
//!    support): a category activates when its name or any related term
//!    appears in the query.
//! 3. Score each active agent by its keywords — 1.0 per direct token match,
//!    0.5 per activated-category match.
//! 4. `confidence = min(1, score / 3)`; agents scoring below 1 are dropped.
//! 5. No survivors → fall back to the configured default agent
//!    (`technical_support`) at confidence 0.5.
//! 6. Prepend the orchestrator agent when one is configured, then truncate
//!    to the top K (default 3).
//!
//! Keyword collisions break toward the higher specialization score.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentmesh::AgentRouter;
//! # async fn example(router: AgentRouter) {
//! let routes = router.route("Webhook returns 403 after signature check").await.unwrap();
//! assert!(routes[0].confidence >= 0.7);
//! # }
//! ```

use crate::agentmesh::agent::AgentDefinition;
use crate::agentmesh::error::MeshError;
use crate::agentmesh::registry::AgentRegistry;
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

lazy_static! {
    /// Fixed expansion map: category name → related terms that activate it.
    static ref KEYWORD_CATEGORIES: HashMap<&'static str, Vec<&'static str>> = {
        let mut map = HashMap::new();
        map.insert(
            "webhook",
            vec!["callback", "endpoint", "signature", "payload", "delivery", "retry"],
        );
        map.insert(
            "billing",
            vec!["invoice", "payment", "subscription", "refund", "charge", "pricing", "plan"],
        );
        map.insert(
            "security",
            vec!["auth", "authentication", "token", "encryption", "vulnerability", "breach", "permission"],
        );
        map.insert(
            "database",
            vec!["sql", "query", "migration", "index", "schema", "replication"],
        );
        map.insert(
            "deployment",
            vec!["deploy", "release", "rollback", "pipeline", "docker", "kubernetes"],
        );
        map.insert(
            "legal",
            vec!["contract", "terms", "compliance", "gdpr", "privacy", "license"],
        );
        map.insert(
            "competitive",
            vec!["competitor", "market", "alternative", "comparison", "landscape"],
        );
        map.insert(
            "marketing",
            vec!["campaign", "seo", "content", "brand", "audience", "conversion"],
        );
        map.insert(
            "support",
            vec!["help", "issue", "problem", "error", "ticket", "troubleshoot"],
        );
        map
    };
}

/// One routed agent with its confidence and the keywords that earned it.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    /// The selected agent.
    pub agent: AgentDefinition,
    /// `min(1, score / 3)`; 0.5 for the fallback default, 1.0 for the
    /// orchestrator.
    pub confidence: f64,
    /// Agent keywords that matched the expanded token set.
    pub matched_keywords: Vec<String>,
}

/// Deterministic keyword router over the active agents in a registry.
pub struct AgentRouter {
    registry: Arc<AgentRegistry>,
    default_agent: String,
    orchestrator_agent: Option<String>,
    top_k: usize,
}

impl AgentRouter {
    /// Create a router with the `technical_support` fallback and top-K of 3.
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            default_agent: String::from("technical_support"),
            orchestrator_agent: None,
            top_k: 3,
        }
    }

    /// Override the fallback agent name (builder pattern).
    pub fn with_default_agent(mut self, name: impl Into<String>) -> Self {
        self.default_agent = name.into();
        self
    }

    /// Configure an orchestrator agent prepended to every route (builder
    /// pattern).
    pub fn with_orchestrator(mut self, name: impl Into<String>) -> Self {
        self.orchestrator_agent = Some(name.into());
        self
    }

    /// Override the maximum number of routed agents (builder pattern).
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Route a query to an ordered agent list.
    ///
    /// Errors: `invalid_input` for an empty query, `no_agents_available`
    /// when the registry holds no active agents (or the fallback agent is
    /// missing when it is needed).
    pub async fn route(&self, query: &str) -> Result<Vec<RouteDecision>, MeshError> {
        if query.trim().is_empty() {
            return Err(MeshError::invalid_input("query must not be empty"));
        }

        let candidates = self.registry.active_agents().await;
        if candidates.is_empty() {
            return Err(MeshError::new(
                crate::agentmesh::error::ErrorKind::NoAgentsAvailable,
                "no active agents registered",
            ));
        }

        let lower = query.to_lowercase();
        let direct_tokens = tokenize(&lower);
        let category_tokens = expand_categories(&direct_tokens);

        let mut scored: Vec<(AgentDefinition, f64, Vec<String>)> = candidates
            .into_iter()
            .filter_map(|agent| {
                let mut score = 0.0;
                let mut matched = Vec::new();
                for keyword in &agent.keywords {
                    if direct_match(keyword, &direct_tokens, &lower) {
                        score += 1.0;
                        matched.push(keyword.clone());
                    } else if category_tokens.contains(keyword.as_str()) {
                        score += 0.5;
                        matched.push(keyword.clone());
                    }
                }
                if score > 0.0 {
                    Some((agent, score, matched))
                } else {
                    None
                }
            })
            .collect();

        // Deterministic order: score, then specialization, then id.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.0.specialization_score
                        .partial_cmp(&a.0.specialization_score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.0.id.cmp(&b.0.id))
        });

        let mut routes: Vec<RouteDecision> = scored
            .into_iter()
            .filter(|(_, score, _)| *score >= 1.0)
            .map(|(agent, score, matched_keywords)| RouteDecision {
                agent,
                confidence: (score / 3.0).min(1.0),
                matched_keywords,
            })
            .collect();

        if routes.is_empty() {
            let fallback = match self.registry.by_name(&self.default_agent).await {
                Some(agent) => agent,
                None => match self.registry.get(&self.default_agent).await.filter(|a| a.is_active) {
                    Some(agent) => agent,
                    None => {
                        return Err(MeshError::new(
                            crate::agentmesh::error::ErrorKind::NoAgentsAvailable,
                            format!("no keyword match and default agent '{}' is missing", self.default_agent),
                        ))
                    }
                },
            };
            log::debug!("no keyword match; falling back to '{}'", fallback.name);
            routes.push(RouteDecision {
                agent: fallback,
                confidence: 0.5,
                matched_keywords: Vec::new(),
            });
        }

        if let Some(name) = &self.orchestrator_agent {
            if let Some(orchestrator) = self.registry.by_name(name).await {
                if !routes.iter().any(|r| r.agent.id == orchestrator.id) {
                    routes.insert(
                        0,
                        RouteDecision {
                            agent: orchestrator,
                            confidence: 1.0,
                            matched_keywords: Vec::new(),
                        },
                    );
                }
            }
        }

        routes.truncate(self.top_k);
        log::info!(
            "routed query to {} agent(s): {}",
            routes.len(),
            routes
                .iter()
                .map(|r| format!("{} ({:.2})", r.agent.name, r.confidence))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(routes)
    }
}

/// Direct match: the keyword is a query token, or (for multi-word keywords)
/// a substring of the lowercased query.
fn direct_match(keyword: &str, tokens: &HashSet<String>, lower_query: &str) -> bool {
    if keyword.contains(' ') {
        lower_query.contains(keyword)
    } else {
        tokens.contains(keyword)
    }
}

fn tokenize(lower: &str) -> HashSet<String> {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Category names and related terms reachable from the query tokens at the
/// half-weight tier.
fn expand_categories(tokens: &HashSet<String>) -> HashSet<&'static str> {
    let mut expanded = HashSet::new();
    for (category, related) in KEYWORD_CATEGORIES.iter() {
        let activated =
            tokens.contains(*category) || related.iter().any(|term| tokens.contains(*term));
        if activated {
            expanded.insert(*category);
            for term in related {
                expanded.insert(*term);
            }
        }
    }
    expanded
}
