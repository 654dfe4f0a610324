// Integration test: full message lifecycle over one storage service
//
// Exercises a client session end to end: appends on both directions of a
// conversation, state and disposition updates, paging through history,
// and concurrent appends sharing the single write lane.

use std::sync::Arc;

use chatstore_core::{
    DispositionState, Message, MessageState, MessageStorage, StateUpdate, StorageConfig,
};

fn memory_storage() -> MessageStorage {
    let storage = MessageStorage::new(StorageConfig::default());
    storage.initialize_memory();
    storage
}

#[tokio::test]
async fn test_session_flow() {
    let storage = memory_storage();

    // alice writes in, we answer; both land in the same conversation
    let inbound = Message::incoming(
        "alice@chat.example".to_string(),
        "me@chat.example".to_string(),
        "got a minute?",
    );
    let outbound = Message::outgoing(
        "me@chat.example".to_string(),
        "alice@chat.example".to_string(),
        "sure, what's up",
    );
    storage.add(&inbound).await.expect("Failed to add");
    let log = storage
        .add(&outbound)
        .await
        .expect("Failed to add")
        .expect("append was skipped");
    assert_eq!(log.len(), 2);

    // delivery confirmation, then the peer displays it
    storage
        .update(&StateUpdate {
            message_id: outbound.id.clone(),
            state: MessageState::Delivered,
        })
        .await
        .expect("Failed to update");
    let log = storage
        .update(&StateUpdate {
            message_id: outbound.id.clone(),
            state: MessageState::Displayed,
        })
        .await
        .expect("Failed to update")
        .expect("update found nothing");
    assert_eq!(log[1].state, MessageState::Displayed);

    // displayed is terminal; a later regression is ignored
    let stale = storage
        .update(&StateUpdate {
            message_id: outbound.id.clone(),
            state: MessageState::Sent,
        })
        .await
        .expect("Failed to update");
    assert!(stale.is_none());

    // we acknowledge the inbound message on our side
    let log = storage
        .update_disposition(&inbound.id, DispositionState::Displayed)
        .await
        .expect("Failed to update disposition")
        .expect("disposition found nothing");
    assert_eq!(log[0].disposition_state, Some(DispositionState::Displayed));

    // withdraw our reply
    let rest = storage.remove(&outbound).await.expect("Failed to remove");
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, inbound.id);

    storage.close();
    assert!(storage.load_last_messages().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_paging_walks_complete_history() {
    let storage = memory_storage();

    let mut ids = Vec::new();
    for n in 0..70 {
        let mut message = Message::outgoing(
            "me@chat.example".to_string(),
            "bob@chat.example".to_string(),
            &format!("note {}", n),
        );
        message.id = format!("m{:03}", n);
        ids.push(message.id.clone());
        storage
            .add(&message)
            .await
            .expect("Failed to add")
            .expect("append was skipped");
    }

    let loaded = storage.load_last_messages().await.unwrap();
    let window = &loaded["bob@chat.example"];
    assert_eq!(window.len(), 30);

    // pages arrive newest-first; stitch them back together oldest-first
    let mut seen: Vec<String> = window.iter().map(|m| m.id.clone()).collect();
    let mut page_sizes = Vec::new();
    while storage.has_more("bob@chat.example").await.unwrap() {
        let page = storage
            .load_more_messages("bob@chat.example")
            .await
            .expect("Failed to load page")
            .expect("has_more promised a page");
        page_sizes.push(page.len());
        let mut stitched: Vec<String> = page.iter().map(|m| m.id.clone()).collect();
        stitched.extend(seen);
        seen = stitched;
    }

    assert_eq!(page_sizes, vec![30, 10]);
    assert_eq!(seen, ids);
    // the oldest entry has been handed out
    assert!(storage
        .load_more_messages("bob@chat.example")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_share_one_lane() {
    let storage = Arc::new(memory_storage());

    let mut handles = Vec::new();
    for task in 0..4u32 {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            for n in 0..25 {
                let mut message = Message::outgoing(
                    "me@chat.example".to_string(),
                    format!("peer{}@chat.example", task % 2),
                    &format!("burst {} from task {}", n, task),
                );
                message.id = format!("t{}-m{:02}", task, n);
                storage
                    .add(&message)
                    .await
                    .expect("Failed to add")
                    .expect("append was skipped");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("writer task panicked");
    }

    // two conversations, fifty messages each, none lost
    let loaded = storage.load_last_messages().await.unwrap();
    assert_eq!(loaded.len(), 2);
    for peer in ["peer0@chat.example", "peer1@chat.example"] {
        assert_eq!(loaded[peer].len(), 30);
        let older = storage
            .load_more_messages(peer)
            .await
            .unwrap()
            .expect("missing second page");
        assert_eq!(older.len(), 20);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_racing_duplicate_appends_store_once() {
    let storage = Arc::new(memory_storage());

    let mut message = Message::outgoing(
        "me@chat.example".to_string(),
        "bob@chat.example".to_string(),
        "sent from two tasks at once",
    );
    message.id = "shared-id".to_string();

    let first = tokio::spawn({
        let storage = storage.clone();
        let message = message.clone();
        async move { storage.add(&message).await.unwrap() }
    });
    let second = tokio::spawn({
        let storage = storage.clone();
        let message = message.clone();
        async move { storage.add(&message).await.unwrap() }
    });

    let (a, b) = (first.await.unwrap(), second.await.unwrap());
    // exactly one append landed, whichever task won the lane
    assert!(a.is_some() ^ b.is_some());

    let loaded = storage.load_last_messages().await.unwrap();
    assert_eq!(loaded["bob@chat.example"].len(), 1);
}

#[tokio::test]
async fn test_rebind_starts_clean() {
    let storage = memory_storage();
    let message = Message::outgoing(
        "me@chat.example".to_string(),
        "bob@chat.example".to_string(),
        "gone after rebind",
    );
    storage.add(&message).await.expect("Failed to add");

    storage.close();
    storage.initialize_memory();

    // a fresh bind is a new store, not the old data
    assert!(storage.load_last_messages().await.unwrap().is_empty());
    assert!(storage.add(&message).await.unwrap().is_some());
}
