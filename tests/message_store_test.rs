// Message store laws: gap-free sequences, idempotent appends, history paging

use std::sync::Arc;

use arc_backend_core::models::message::{AppendRequest, ConversationKind};
use arc_backend_core::realtime::{InMemoryMessageStore, MessageStore};
use chrono::Utc;

fn request(conversation: &str, client_msg_id: &str, text: &str) -> AppendRequest {
    AppendRequest {
        conversation_id: conversation.to_string(),
        kind: ConversationKind::Room,
        client_msg_id: client_msg_id.to_string(),
        sender_user_id: "user-1".to_string(),
        sender_session: "session-1".to_string(),
        text: text.to_string(),
    }
}

#[tokio::test]
async fn concurrent_appends_allocate_dense_sequences() {
    let store = Arc::new(InMemoryMessageStore::new());
    let now = Utc::now();

    let mut tasks = Vec::new();
    for i in 0..32 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .append_message(request("c1", &format!("client-{}", i), "hello"), now)
                .await
                .expect("append must succeed")
        }));
    }

    let mut seqs = Vec::new();
    for task in tasks {
        let stored = task.await.unwrap();
        assert!(!stored.duplicated);
        seqs.push(stored.row.seq);
    }

    seqs.sort_unstable();
    assert_eq!(seqs, (1..=32).collect::<Vec<i64>>());

    let (rows, has_more) = store.fetch_history("c1", 0, 200).await.unwrap();
    assert_eq!(rows.len(), 32);
    assert!(!has_more);
    let fetched: Vec<i64> = rows.iter().map(|r| r.seq).collect();
    assert_eq!(fetched, (1..=32).collect::<Vec<i64>>());
}

#[tokio::test]
async fn duplicate_append_is_idempotent() {
    let store = InMemoryMessageStore::new();
    let now = Utc::now();

    let first = store
        .append_message(request("c1", "m1", "payload"), now)
        .await
        .unwrap();
    let second = store
        .append_message(request("c1", "m1", "payload"), now)
        .await
        .unwrap();

    assert!(!first.duplicated);
    assert!(second.duplicated);
    assert_eq!(first.row.seq, second.row.seq);
    assert_eq!(first.row.server_msg_id, second.row.server_msg_id);
}

#[tokio::test]
async fn history_is_ascending_with_exclusive_after_seq() {
    let store = InMemoryMessageStore::new();
    let now = Utc::now();

    for i in 1..=10 {
        store
            .append_message(request("c1", &format!("m{}", i), "text"), now)
            .await
            .unwrap();
    }

    let (rows, has_more) = store.fetch_history("c1", 4, 3).await.unwrap();
    let seqs: Vec<i64> = rows.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![5, 6, 7]);
    assert!(has_more);

    // Every returned seq is strictly greater than after_seq
    assert!(seqs.iter().all(|&s| s > 4));

    let (tail, has_more) = store.fetch_history("c1", 9, 5).await.unwrap();
    assert_eq!(tail.len(), 1);
    assert!(!has_more);
}

#[tokio::test]
async fn server_msg_ids_are_unique_32_hex() {
    let store = InMemoryMessageStore::new();
    let now = Utc::now();

    let mut seen = std::collections::HashSet::new();
    for i in 0..50 {
        let stored = store
            .append_message(request("c1", &format!("m{}", i), "text"), now)
            .await
            .unwrap();
        let id = stored.row.server_msg_id;
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(seen.insert(id));
    }
}
