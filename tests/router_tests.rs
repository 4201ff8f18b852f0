use agentmesh::llm_pool::CapabilityTier;
use agentmesh::registry::InMemoryAgentStore;
use agentmesh::{AgentDefinition, AgentRegistry, AgentRouter, ErrorKind};
use std::sync::Arc;

fn specialist() -> AgentDefinition {
    AgentDefinition::new(
        "tech-integration",
        "Technical Integration Specialist",
        "integration engineer",
    )
    .with_keywords(vec![
        "webhook".into(),
        "signature".into(),
        "api".into(),
        "endpoint".into(),
        "integration".into(),
    ])
    .with_domain("technical")
    .with_preferred_tier(CapabilityTier::Powerful)
    .with_specialization(0.9)
}

fn billing_agent() -> AgentDefinition {
    AgentDefinition::new("billing-1", "Billing Expert", "billing specialist")
        .with_keywords(vec!["billing".into(), "invoice".into(), "refund".into()])
        .with_domain("billing")
}

fn default_agent() -> AgentDefinition {
    AgentDefinition::new("technical_support", "technical_support", "generalist support engineer")
        .with_domain("support")
}

async fn router_with(agents: Vec<AgentDefinition>) -> AgentRouter {
    let registry = Arc::new(AgentRegistry::new(Arc::new(InMemoryAgentStore::with_agents(
        agents,
    ))));
    AgentRouter::new(registry)
}

#[tokio::test]
async fn test_webhook_query_routes_specialist_with_high_confidence() {
    let router = router_with(vec![specialist(), billing_agent(), default_agent()]).await;
    let routes = router
        .route("Webhook returns 403 after signature check")
        .await
        .unwrap();

    assert_eq!(routes[0].agent.name, "Technical Integration Specialist");
    assert!(routes[0].confidence >= 0.7);
    assert!(routes[0].matched_keywords.contains(&"webhook".to_string()));
}

#[tokio::test]
async fn test_routing_is_deterministic() {
    let router = router_with(vec![specialist(), billing_agent(), default_agent()]).await;
    let query = "webhook signature and billing invoice questions";

    let first = router.route(query).await.unwrap();
    let second = router.route(query).await.unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.agent.id, b.agent.id);
        assert!((a.confidence - b.confidence).abs() < f64::EPSILON);
    }
}

#[tokio::test]
async fn test_unmatched_query_falls_back_to_default() {
    let router = router_with(vec![specialist(), default_agent()]).await;
    let routes = router.route("tell me a joke").await.unwrap();

    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].agent.id, "technical_support");
    assert!((routes[0].confidence - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_empty_query_is_invalid_input() {
    let router = router_with(vec![specialist()]).await;
    let err = router.route("   ").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_all_agents_deactivated_is_no_agents_available() {
    let registry = Arc::new(AgentRegistry::new(Arc::new(InMemoryAgentStore::with_agents(
        vec![specialist()],
    ))));
    registry.deactivate("tech-integration").await.unwrap();
    let router = AgentRouter::new(registry);

    let err = router.route("webhook trouble").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoAgentsAvailable);
}

#[tokio::test]
async fn test_top_k_truncation() {
    let mut agents = Vec::new();
    for n in 0..6 {
        agents.push(
            AgentDefinition::new(format!("a{}", n), format!("Agent {}", n), "specialist")
                .with_keywords(vec!["webhook".into(), "signature".into(), "endpoint".into()]),
        );
    }
    let router = router_with(agents).await;
    let routes = router
        .route("webhook signature endpoint problems")
        .await
        .unwrap();
    assert_eq!(routes.len(), 3);
}

#[tokio::test]
async fn test_orchestrator_agent_is_prepended() {
    let registry = Arc::new(AgentRegistry::new(Arc::new(InMemoryAgentStore::with_agents(
        vec![
            specialist(),
            AgentDefinition::new("orchestrator", "Mesh Orchestrator", "coordinator"),
        ],
    ))));
    let router = AgentRouter::new(registry).with_orchestrator("Mesh Orchestrator");

    let routes = router.route("webhook signature failing").await.unwrap();
    assert_eq!(routes[0].agent.name, "Mesh Orchestrator");
    assert!((routes[0].confidence - 1.0).abs() < f64::EPSILON);
    assert_eq!(routes[1].agent.name, "Technical Integration Specialist");
}

#[tokio::test]
async fn test_keyword_collision_broken_by_specialization() {
    let generalist = AgentDefinition::new("g", "Generalist", "support")
        .with_keywords(vec!["webhook".into()])
        .with_specialization(0.2);
    let expert = AgentDefinition::new("e", "Webhook Expert", "specialist")
        .with_keywords(vec!["webhook".into()])
        .with_specialization(0.95);

    let router = router_with(vec![generalist, expert]).await;
    let routes = router.route("webhook signature delivery failing").await.unwrap();
    assert_eq!(routes[0].agent.id, "e");
}

#[tokio::test]
async fn test_category_expansion_gives_half_weight() {
    // "callback" activates the webhook category; an agent keyed on
    // "webhook" gets the 0.5 category match but no direct match.
    let agent = AgentDefinition::new("w", "Webhook Person", "specialist")
        .with_keywords(vec!["webhook".into(), "endpoint".into()]);
    let router = router_with(vec![agent, default_agent()]).await;

    let routes = router.route("my callback endpoint fails").await.unwrap();
    // endpoint is a direct hit (1.0), webhook a category hit (0.5):
    // score 1.5 -> confidence 0.5.
    assert_eq!(routes[0].agent.id, "w");
    assert!((routes[0].confidence - 0.5).abs() < 1e-9);
}
