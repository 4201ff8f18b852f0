use agentmesh::tracker::{
    AgentStatus, Delivery, LogLevel, RealtimeTracker, SessionEventPayload, SessionPhase,
    SubscriptionFilter,
};
use std::sync::Arc;
use std::time::Duration;

async fn drive_full_session(tracker: &RealtimeTracker, session_id: &str) {
    tracker
        .open_session(session_id, "test query", &[String::from("a1")])
        .await;
    tracker.set_phase(session_id, SessionPhase::Analyzing, 10.0).await;
    tracker.set_phase(session_id, SessionPhase::Processing, 30.0).await;
    tracker
        .set_agent_status(session_id, "a1", AgentStatus::Processing, 50.0, "working")
        .await;
    tracker
        .set_agent_status(session_id, "a1", AgentStatus::Completed, 100.0, "completed")
        .await;
    tracker.set_phase(session_id, SessionPhase::Finishing, 90.0).await;
    tracker.close_session(session_id, "done").await;
}

#[tokio::test]
async fn test_sequences_increase_and_terminal_comes_last() {
    let tracker = RealtimeTracker::new();
    let sink = tracker.subscribe("watcher", SubscriptionFilter::All).await;

    drive_full_session(&tracker, "s1").await;

    let mut seqs = Vec::new();
    let mut payloads = Vec::new();
    while let Some(delivery) = sink.try_recv().await {
        match delivery {
            Delivery::Event(event) => {
                seqs.push(event.seq);
                payloads.push(event.payload);
            }
            other => panic!("unexpected delivery {:?}", other),
        }
    }

    // Strictly increasing sequence numbers.
    for pair in seqs.windows(2) {
        assert!(pair[1] > pair[0]);
    }
    // Lifecycle precedes the terminal event.
    assert!(matches!(payloads.first(), Some(SessionEventPayload::SessionOpened { .. })));
    assert!(matches!(payloads.last(), Some(SessionEventPayload::SessionClosed { .. })));
    assert!(payloads.len() >= 3);
}

#[tokio::test]
async fn test_fast_subscriber_unaffected_by_slow_one() {
    // Small queues make the slow subscriber overflow quickly.
    let tracker = Arc::new(RealtimeTracker::new().with_queue_capacity(4));
    let fast = tracker.subscribe("fast", SubscriptionFilter::All).await;
    let _slow = tracker.subscribe("slow", SubscriptionFilter::All).await;

    // The fast subscriber drains concurrently; the slow one never reads.
    let drain = {
        let fast = Arc::clone(&fast);
        tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(delivery) = fast.recv().await {
                if let Delivery::Event(event) = delivery {
                    let done = matches!(event.payload, SessionEventPayload::SessionClosed { .. });
                    received.push(event.seq);
                    if done {
                        break;
                    }
                }
            }
            received
        })
    };

    tracker.open_session("s1", "q", &[]).await;
    for n in 0..20 {
        tracker
            .append_log("s1", LogLevel::Info, None, &format!("line {}", n), None)
            .await;
    }
    tracker.close_session("s1", "done").await;

    let received = tokio::time::timeout(Duration::from_secs(5), drain)
        .await
        .unwrap()
        .unwrap();

    // Every event arrived, in order, despite the stalled peer.
    assert_eq!(received.len(), 22);
    for pair in received.windows(2) {
        assert!(pair[1] > pair[0]);
    }
}

#[tokio::test]
async fn test_slow_subscriber_lags_then_resyncs_via_snapshot() {
    let tracker = RealtimeTracker::new().with_queue_capacity(4);
    let slow = tracker.subscribe("slow", SubscriptionFilter::All).await;

    tracker.open_session("s1", "q", &[]).await;
    for n in 0..20 {
        tracker
            .append_log("s1", LogLevel::Info, None, &format!("line {}", n), None)
            .await;
    }
    tracker.close_session("s1", "done").await;

    // First delivery tells the consumer it lagged.
    match slow.try_recv().await.unwrap() {
        Delivery::Lagged { dropped } => assert_eq!(dropped, 18),
        other => panic!("expected lag marker, got {:?}", other),
    }

    // Snapshot carries the authoritative state to resync from.
    let snapshot = tracker.snapshot("s1").await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Done);
    assert_eq!(snapshot.last_seq, 22);

    // The remaining queued events are the newest ones, still in order.
    let mut prev = 0;
    while let Some(Delivery::Event(event)) = slow.try_recv().await {
        assert!(event.seq > prev);
        prev = event.seq;
    }
    assert_eq!(prev, 22);
}

#[tokio::test]
async fn test_collaboration_events_reach_subscribers() {
    let tracker = RealtimeTracker::new();
    let sink = tracker.subscribe("w", SubscriptionFilter::All).await;

    tracker
        .open_session("s1", "q", &[String::from("a1"), String::from("a2")])
        .await;
    tracker
        .record_collaboration("s1", "a2", "a1", "context_share", "building on a1's answer")
        .await;

    let mut saw_collaboration = false;
    while let Some(delivery) = sink.try_recv().await {
        if let Delivery::Event(event) = delivery {
            if let SessionEventPayload::AgentCollaboration {
                primary_agent_id,
                secondary_agent_id,
                ..
            } = event.payload
            {
                assert_eq!(primary_agent_id, "a2");
                assert_eq!(secondary_agent_id, "a1");
                saw_collaboration = true;
            }
        }
    }
    assert!(saw_collaboration);
}

#[tokio::test]
async fn test_session_filter_only_sees_its_session() {
    let tracker = RealtimeTracker::new();
    let sink = tracker
        .subscribe("w", SubscriptionFilter::Session(String::from("mine")))
        .await;

    drive_full_session(&tracker, "mine").await;
    drive_full_session(&tracker, "other").await;

    while let Some(delivery) = sink.try_recv().await {
        if let Delivery::Event(event) = delivery {
            assert_eq!(event.session_id, "mine");
        }
    }
}

#[tokio::test]
async fn test_heartbeat_and_ack_keep_subscription_alive() {
    let tracker = RealtimeTracker::new().with_stale_after(Duration::from_secs(60));
    let sink = tracker.subscribe("w", SubscriptionFilter::All).await;

    tracker.sweep().await;
    match sink.try_recv().await.unwrap() {
        Delivery::Heartbeat => {}
        other => panic!("expected heartbeat, got {:?}", other),
    }

    tracker.ack("w").await;
    tracker.sweep().await;
    // Still subscribed: events keep flowing.
    tracker.open_session("s1", "q", &[]).await;
    assert!(matches!(sink.try_recv().await, Some(Delivery::Heartbeat)));
    assert!(matches!(sink.try_recv().await, Some(Delivery::Event(_))));
}

#[tokio::test]
async fn test_active_sessions_lists_untracked_after_gc() {
    let tracker = RealtimeTracker::new().with_retention(Duration::from_secs(0));
    tracker.open_session("s1", "q", &[]).await;
    tracker.open_session("s2", "q", &[]).await;
    tracker.close_session("s1", "done").await;

    assert_eq!(tracker.active_sessions().await.len(), 2);
    tracker.sweep().await;

    let remaining = tracker.active_sessions().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].session_id, "s2");
}

#[tokio::test]
async fn test_unsubscribe_closes_sink() {
    let tracker = RealtimeTracker::new();
    let sink = tracker.subscribe("w", SubscriptionFilter::All).await;
    tracker.unsubscribe("w").await;

    tracker.open_session("s1", "q", &[]).await;
    assert!(sink.recv().await.is_none());
}

#[tokio::test]
async fn test_maintenance_task_runs() {
    let tracker = Arc::new(RealtimeTracker::new().with_retention(Duration::from_secs(0)));
    tracker.open_session("s1", "q", &[]).await;
    tracker.close_session("s1", "done").await;

    let handle = tracker.spawn_maintenance(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.abort();

    assert!(tracker.snapshot("s1").await.is_none());
}
