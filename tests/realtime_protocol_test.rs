// Envelope protocol and fanout behavior

use std::sync::Arc;

use arc_backend_core::realtime::envelope::{
    Envelope, PROTOCOL_VERSION, T_HELLO, T_MESSAGE_NEW,
};
use arc_backend_core::realtime::hub::{ClientHandle, OutboundFrame};
use arc_backend_core::realtime::Hub;
use tokio::sync::mpsc;

fn client(id: u64, capacity: usize) -> (Arc<ClientHandle>, mpsc::Receiver<OutboundFrame>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        Arc::new(ClientHandle::new(
            id,
            format!("user-{}", id),
            format!("session-{}", id),
            tx,
        )),
        rx,
    )
}

#[test]
fn envelope_shape_matches_wire_contract() {
    let frame = Envelope::server(T_HELLO, serde_json::json!({"x": 1}));
    let value = serde_json::to_value(&frame).unwrap();

    assert_eq!(value["v"], PROTOCOL_VERSION);
    assert_eq!(value["type"], T_HELLO);
    assert!(value["id"].is_string());
    assert!(value["ts"].is_i64());
    assert_eq!(value["payload"]["x"], 1);
}

#[test]
fn client_frames_parse_and_validate() {
    let raw = r#"{"v":1,"type":"message.send","id":"abc","ts":1700000000000,
        "payload":{"conversation_id":"c1","client_msg_id":"m1","text":"hi"}}"#;
    let envelope: Envelope = serde_json::from_str(raw).unwrap();
    assert!(envelope.validate().is_ok());
    assert_eq!(envelope.kind, "message.send");

    let wrong_version = r#"{"v":2,"type":"hello","id":"abc","ts":0}"#;
    let envelope: Envelope = serde_json::from_str(wrong_version).unwrap();
    assert!(envelope.validate().is_err());
}

#[tokio::test]
async fn fanout_delivers_to_every_member_and_drops_on_full() {
    let hub = Hub::new();
    let conversation = hub.conversation("room-1").await;

    let (fast, mut fast_rx) = client(1, 8);
    let (slow, _slow_rx) = client(2, 1);
    conversation.join(fast).await;
    conversation.join(slow).await;

    let frame = Envelope::server(T_MESSAGE_NEW, serde_json::json!({"seq": 1}));

    // First broadcast fills the slow client's queue of one
    assert_eq!(conversation.broadcast(&frame).await, 0);
    // Second broadcast drops for the slow client, still reaches the fast one
    assert_eq!(conversation.broadcast(&frame).await, 1);

    let mut fast_count = 0;
    while let Ok(message) = fast_rx.try_recv() {
        assert!(matches!(message, OutboundFrame::Frame(_)));
        fast_count += 1;
    }
    assert_eq!(fast_count, 2);
}

#[tokio::test]
async fn leave_stops_delivery_before_done() {
    let hub = Hub::new();
    let conversation = hub.conversation("room-1").await;

    let (member, mut rx) = client(1, 8);
    conversation.join(member.clone()).await;

    // Shutdown ordering: close marker first, then leave, then done
    member.begin_close();
    conversation.leave(member.id).await;

    let frame = Envelope::server(T_MESSAGE_NEW, serde_json::json!({"seq": 1}));
    assert_eq!(conversation.broadcast(&frame).await, 0);
    assert!(rx.try_recv().is_err());
}
