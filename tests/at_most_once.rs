//! Delivery guarantee under contention: the execution marker is a
//! compare-and-set, so concurrent processors agree on a single winner.

use chrono::Utc;
use gambit::adapters::{EngineStore, MemoryStore};
use gambit::domain::{EngineMode, Event, EventType, ManagerRecord};
use gambit::engine::EventDispatcher;
use std::sync::Arc;

#[tokio::test]
async fn concurrent_markers_elect_exactly_one_winner() {
    let store = Arc::new(MemoryStore::new());
    let manager = ManagerRecord::new(EngineMode::Paper);
    store.insert_manager(&manager).await.unwrap();

    let event = Event::new(manager.id, EventType::Market, 1, serde_json::json!({}));
    store.insert_event(&event).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let store = store.clone();
        let event_id = event.id;
        tasks.push(tokio::spawn(async move {
            store.mark_executed(event_id, Utc::now()).await.unwrap()
        }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let stored = store.get_event(event.id).await.unwrap().unwrap();
    assert!(stored.is_executed());
}

#[tokio::test]
async fn executed_events_never_reappear_in_batches() {
    let store = Arc::new(MemoryStore::new());
    let dispatcher = EventDispatcher::new(store.clone());
    let manager = ManagerRecord::new(EngineMode::Paper);
    dispatcher.create_manager(&manager).await.unwrap();

    for priority in 1..=8 {
        dispatcher
            .publish(manager.id, EventType::Market, priority, serde_json::json!({}))
            .await
            .unwrap();
    }

    // Drain in two batches, marking everything executed along the way
    let mut seen = std::collections::HashSet::new();
    for _ in 0..2 {
        let batch = dispatcher.dispatch_next_batch(manager.id, 4).await.unwrap();
        assert_eq!(batch.len(), 4);
        for event in batch {
            assert!(seen.insert(event.id), "event delivered twice");
            assert!(dispatcher.mark_executed(event.id).await.unwrap());
        }
    }

    assert!(dispatcher
        .dispatch_next_batch(manager.id, 16)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(seen.len(), 8);
}
