// Integration test: conversation logs survive a backend restart
//
// Writes through the embedded store, drops the service, reopens the same
// data directory and checks the logs, the rebuilt id map and the reset
// pagination state.

use chatstore_core::{Message, MessageState, MessageStorage, StateUpdate, StorageConfig};

#[tokio::test]
async fn test_messages_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        data_dir: dir.path().to_path_buf(),
    };

    let question = Message::incoming(
        "bob@chat.example".to_string(),
        "me@chat.example".to_string(),
        "did the deploy go out?",
    );
    let answer = Message::outgoing(
        "me@chat.example".to_string(),
        "bob@chat.example".to_string(),
        "yes, ten minutes ago",
    );

    // First instance: store a short conversation
    {
        let storage = MessageStorage::new(config.clone());
        storage
            .initialize("me@chat.example", None, false)
            .await
            .expect("Failed to open store");

        storage.add(&question).await.expect("Failed to add");
        storage.add(&answer).await.expect("Failed to add");
        storage
            .update(&StateUpdate {
                message_id: answer.id.clone(),
                state: MessageState::Delivered,
            })
            .await
            .expect("Failed to update");

        storage.close();
    }
    // storage dropped here - the embedded engine flushes on drop

    // Second instance: same directory, data and states intact
    {
        let storage = MessageStorage::new(config.clone());
        storage
            .initialize("me@chat.example", None, false)
            .await
            .expect("Failed to reopen store");

        // pagination cursors do not survive a restart
        assert!(!storage.has_more("bob@chat.example").await.unwrap());

        let loaded = storage
            .load_last_messages()
            .await
            .expect("Failed to load messages");
        let log = &loaded["bob@chat.example"];
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id, question.id);
        assert_eq!(log[0].state, MessageState::Received);
        assert_eq!(log[1].id, answer.id);
        assert_eq!(log[1].state, MessageState::Delivered);
        // millisecond timestamps round-trip through disk unchanged
        assert_eq!(log[0].timestamp, question.timestamp);

        // a rebuilt id map keeps rejecting stored ids
        storage.update_id_map().await.expect("Failed to rebuild");
        assert!(storage.add(&question).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_accounts_keep_separate_stores() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        data_dir: dir.path().to_path_buf(),
    };

    {
        let storage = MessageStorage::new(config.clone());
        storage
            .initialize("alice@chat.example", None, false)
            .await
            .expect("Failed to open store");
        let message = Message::outgoing(
            "alice@chat.example".to_string(),
            "bob@chat.example".to_string(),
            "only in alice's store",
        );
        storage.add(&message).await.expect("Failed to add");
    }

    {
        let storage = MessageStorage::new(config.clone());
        storage
            .initialize("carol@chat.example", None, false)
            .await
            .expect("Failed to open store");
        let loaded = storage
            .load_last_messages()
            .await
            .expect("Failed to load messages");
        assert!(loaded.is_empty());
    }
}
