// Realtime messaging gateway: websocket state machine, envelope protocol,
// in-memory fanout, and the message/membership stores

pub mod client;
pub mod envelope;
pub mod hub;
pub mod rate_window;
pub mod store;
pub mod ws;

pub use client::ConnIdentity;
pub use envelope::{Envelope, SUBPROTOCOL};
pub use hub::{ClientHandle, ConversationHandle, Hub, OutboundFrame};
pub use store::{
    InMemoryMembershipStore, InMemoryMessageStore, MembershipStore, MessageStore,
    PgMembershipStore, PgMessageStore,
};
pub use ws::ws_handler;
