use agentmesh::model_client::Role;
use agentmesh::ConversationMemory;
use std::time::Duration;

#[tokio::test]
async fn test_message_log_is_bounded() {
    let memory = ConversationMemory::new(10, 6);
    let id = memory.open_session(None).await;

    for n in 0..15 {
        memory
            .append(&id, Role::User, format!("message {}", n), None)
            .await;
    }

    let record = memory.conversation(&id).await.unwrap();
    assert_eq!(record.messages.len(), 10);
    // Oldest five were evicted; order of the rest is preserved.
    assert_eq!(record.messages.front().unwrap().content, "message 5");
    assert_eq!(record.messages.back().unwrap().content, "message 14");
}

#[tokio::test]
async fn test_capacity_edge_drops_exactly_one() {
    let memory = ConversationMemory::new(10, 6);
    let id = memory.open_session(None).await;

    for n in 0..10 {
        memory.append(&id, Role::User, format!("m{}", n), None).await;
    }
    memory.append(&id, Role::User, "one more", None).await;

    let record = memory.conversation(&id).await.unwrap();
    assert_eq!(record.messages.len(), 10);
    assert_eq!(record.messages.front().unwrap().content, "m1");
    assert_eq!(record.messages.back().unwrap().content, "one more");
}

#[tokio::test]
async fn test_context_projects_at_most_six_messages() {
    let memory = ConversationMemory::new(10, 6);
    let id = memory.open_session(None).await;

    for n in 0..4 {
        memory.append(&id, Role::User, format!("u{}", n), None).await;
        memory
            .append(&id, Role::Assistant, format!("a{}", n), Some("Helper"))
            .await;
    }

    let context = memory.context(&id).await;
    assert_eq!(context.lines().count(), 6);
    // The window is the most recent six messages.
    assert!(context.starts_with("User: u1"));
    assert!(context.ends_with("Assistant (Helper): a3"));
}

#[tokio::test]
async fn test_assistant_lines_truncated_to_200_chars() {
    let memory = ConversationMemory::new(10, 6);
    let id = memory.open_session(None).await;

    memory
        .append(&id, Role::Assistant, "y".repeat(1000), Some("Verbose"))
        .await;
    memory.append(&id, Role::User, "z".repeat(1000), None).await;

    let context = memory.context(&id).await;
    let mut lines = context.lines();
    let assistant = lines.next().unwrap();
    let user = lines.next().unwrap();

    let assistant_body = assistant.trim_start_matches("Assistant (Verbose): ");
    assert_eq!(assistant_body.chars().count(), 200);
    // User lines are not truncated.
    let user_body = user.trim_start_matches("User: ");
    assert_eq!(user_body.chars().count(), 1000);
}

#[tokio::test]
async fn test_reads_do_not_mutate() {
    let memory = ConversationMemory::new(10, 6);
    let id = memory.open_session(None).await;

    memory.append(&id, Role::User, "first", None).await;
    let interleaved = memory.context(&id).await;
    memory.append(&id, Role::User, "second", None).await;
    let after_interleaved = memory.context(&id).await;

    // Same final state as appending both then reading once.
    let memory2 = ConversationMemory::new(10, 6);
    let id2 = memory2.open_session(None).await;
    memory2.append(&id2, Role::User, "first", None).await;
    memory2.append(&id2, Role::User, "second", None).await;
    let direct = memory2.context(&id2).await;

    assert_eq!(after_interleaved, direct);
    assert_eq!(interleaved, "User: first");
}

#[tokio::test]
async fn test_missing_session_yields_empty_context() {
    let memory = ConversationMemory::new(10, 6);
    assert_eq!(memory.context("missing").await, "");
    assert!(memory.summary("missing").await.is_none());
    assert!(memory.conversation("missing").await.is_none());
}

#[tokio::test]
async fn test_summary_reports_bounds() {
    let memory = ConversationMemory::new(10, 6);
    let id = memory.open_session(None).await;
    memory.append(&id, Role::User, "a", None).await;
    memory.append(&id, Role::Assistant, "b", Some("X")).await;

    let summary = memory.summary(&id).await.unwrap();
    assert_eq!(summary.message_count, 2);
    assert!(summary.first_ts.unwrap() <= summary.last_ts.unwrap());
}

#[tokio::test]
async fn test_list_sessions_pagination_and_order() {
    let memory = ConversationMemory::new(10, 6);
    let first = memory.open_session(None).await;
    memory.append(&first, Role::User, "older question", None).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = memory.open_session(None).await;
    memory.append(&second, Role::User, "newer question", None).await;

    let rows = memory.list_sessions(10, 0).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].session_id, second);
    assert_eq!(rows[0].query.as_deref(), Some("newer question"));

    let paged = memory.list_sessions(1, 1).await;
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].session_id, first);
}

#[tokio::test]
async fn test_concurrent_appends_to_one_session_all_land() {
    let memory = std::sync::Arc::new(ConversationMemory::new(100, 6));
    let id = memory.open_session(None).await;

    let mut handles = Vec::new();
    for n in 0..20 {
        let memory = std::sync::Arc::clone(&memory);
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            memory.append(&id, Role::User, format!("c{}", n), None).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let record = memory.conversation(&id).await.unwrap();
    assert_eq!(record.messages.len(), 20);
}

#[tokio::test]
async fn test_agents_used_and_satisfaction() {
    let memory = ConversationMemory::new(10, 6);
    let id = memory.open_session(Some(String::from("user-9"))).await;

    memory
        .record_agents_used(&id, &[String::from("A"), String::from("B"), String::from("A")])
        .await;
    assert!(memory.set_satisfaction(&id, 9).await); // clamped to 5

    let record = memory.conversation(&id).await.unwrap();
    assert_eq!(record.agents_used, vec!["A", "B"]);
    assert_eq!(record.satisfaction, Some(5));
    assert_eq!(record.user_id.as_deref(), Some("user-9"));
}

#[tokio::test]
async fn test_escalation_records_reason() {
    let memory = ConversationMemory::new(10, 6);
    let id = memory.open_session(None).await;

    assert!(memory.escalate(&id, "repeated low satisfaction").await);
    assert!(!memory.escalate("missing", "nope").await);

    let record = memory.conversation(&id).await.unwrap();
    assert!(record.escalated);
    assert_eq!(
        record.escalation_reason.as_deref(),
        Some("repeated low satisfaction")
    );
}
