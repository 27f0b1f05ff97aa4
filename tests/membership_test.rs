// Membership ACL: fail-closed lookups and the private-only add rule

use arc_backend_core::models::message::Visibility;
use arc_backend_core::realtime::{InMemoryMembershipStore, MembershipStore};
use chrono::Utc;

#[tokio::test]
async fn unknown_conversations_read_as_private_non_member() {
    let store = InMemoryMembershipStore::new();

    assert!(!store.is_member("ghost", "user-1").await.unwrap());
    assert!(store.visibility("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn members_are_only_added_to_private_conversations() {
    let store = InMemoryMembershipStore::new();
    let now = Utc::now();

    store.create_conversation("lobby", Visibility::Public).await;
    store.create_conversation("team", Visibility::Private).await;

    assert!(store.add_member("lobby", "user-1", now).await.is_err());
    assert!(store.add_member("team", "user-1", now).await.is_ok());

    assert!(store.is_member("team", "user-1").await.unwrap());
    assert!(!store.is_member("lobby", "user-1").await.unwrap());

    // Adding twice stays idempotent
    assert!(store.add_member("team", "user-1", now).await.is_ok());
}
