// Per-connection websocket state machine
//
// Three cooperating tasks per socket: the reader loop (this function), a
// writer draining the bounded send queue, and a heartbeat pinger. They
// share a done signal; shutdown is idempotent and removes the client from
// its conversation strictly before signaling done, so no broadcaster still
// holds a live handle to a torn-down client.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::models::message::{AppendRequest, ConversationKind, MessageError};
use crate::realtime::envelope::{
    Envelope, HelloAckPayload, HistoryChunkPayload, HistoryFetchPayload, HistoryMessage,
    JoinPayload, MessageAckPayload, MessageNewPayload, SendPayload, MAX_WIRE_TEXT_RUNES,
    T_HELLO, T_HELLO_ACK, T_HISTORY_CHUNK, T_HISTORY_FETCH, T_JOIN, T_MESSAGE_ACK,
    T_MESSAGE_NEW, T_MESSAGE_SEND,
};
use crate::realtime::hub::{next_client_id, ClientHandle, ConversationHandle, OutboundFrame};
use crate::realtime::rate_window::SlidingWindow;

// Close codes
const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_POLICY_VIOLATION: u16 = 1008;

const HEARTBEAT_STRIKES: u32 = 3;

/// Identity resolved before the upgrade
#[derive(Debug, Clone)]
pub struct ConnIdentity {
    pub user_id: String,
    pub session_id: String,
}

struct JoinedConversation {
    handle: Arc<ConversationHandle>,
    kind: ConversationKind,
}

struct Connection {
    state: AppState,
    client: Arc<ClientHandle>,
    control_tx: mpsc::Sender<OutboundFrame>,
    joined: Mutex<Option<JoinedConversation>>,
    done_tx: watch::Sender<bool>,
    closed: AtomicBool,
    last_pong_ms: AtomicI64,
}

impl Connection {
    /// Idempotent teardown. Ordering matters: mark closing, leave the
    /// conversation, then signal done.
    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.client.begin_close();
        let joined = self.joined.lock().await.take();
        if let Some(joined) = joined {
            joined.handle.leave(self.client.id).await;
        }
        let _ = self.done_tx.send(true);
    }

    /// Best-effort close frame, then teardown
    async fn close_with(&self, code: u16, reason: &str) {
        let _ = self
            .control_tx
            .try_send(OutboundFrame::Close(code, reason.to_string()));
        self.shutdown().await;
    }

    fn send_frame(&self, frame: Envelope) {
        if !self.client.enqueue(OutboundFrame::Frame(frame)) {
            debug!(client = self.client.id, "outbound frame dropped");
        }
    }

    fn send_error(&self, code: &str, message: &str) {
        self.send_frame(Envelope::error(code, message));
    }
}

/// Drive one websocket connection to completion
pub async fn run_connection(socket: WebSocket, state: AppState, identity: ConnIdentity) {
    let limits = state.config.realtime.clone();
    let (frame_tx, frame_rx) = mpsc::channel::<OutboundFrame>(limits.send_queue_capacity);
    let (done_tx, _) = watch::channel(false);

    let client = Arc::new(ClientHandle::new(
        next_client_id(),
        identity.user_id.clone(),
        identity.session_id.clone(),
        frame_tx.clone(),
    ));

    let conn = Arc::new(Connection {
        state: state.clone(),
        client: client.clone(),
        control_tx: frame_tx,
        joined: Mutex::new(None),
        done_tx,
        closed: AtomicBool::new(false),
        last_pong_ms: AtomicI64::new(Utc::now().timestamp_millis()),
    });

    let (sink, stream) = socket.split();

    let writer = tokio::spawn(writer_task(
        sink,
        frame_rx,
        conn.clone(),
        Duration::from_secs(limits.write_timeout_secs),
    ));
    let heartbeat = tokio::spawn(heartbeat_task(
        conn.clone(),
        Duration::from_secs(limits.heartbeat_interval_secs),
        Duration::from_secs(limits.heartbeat_timeout_secs),
    ));

    reader_loop(stream, conn.clone(), &limits, identity).await;

    conn.shutdown().await;

    // Bounded waits so a wedged task cannot leak the connection
    if timeout(Duration::from_secs(5), writer).await.is_err() {
        warn!(client = client.id, "writer task did not stop in time");
    }
    if timeout(Duration::from_secs(5), heartbeat).await.is_err() {
        warn!(client = client.id, "heartbeat task did not stop in time");
    }
}

/// Drain the send queue into the socket with a per-write timeout
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut frame_rx: mpsc::Receiver<OutboundFrame>,
    conn: Arc<Connection>,
    write_timeout: Duration,
) {
    let mut done_rx = conn.done_tx.subscribe();

    loop {
        let frame = tokio::select! {
            _ = done_rx.changed() => break,
            frame = frame_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let message = match frame {
            OutboundFrame::Frame(envelope) => match serde_json::to_string(&envelope) {
                Ok(text) => Message::Text(text.into()),
                Err(e) => {
                    warn!("failed to serialize outbound frame: {}", e);
                    continue;
                },
            },
            OutboundFrame::Ping(data) => Message::Ping(data.into()),
            OutboundFrame::Close(code, reason) => {
                let _ = timeout(
                    write_timeout,
                    sink.send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    }))),
                )
                .await;
                break;
            },
        };

        match timeout(write_timeout, sink.send(message)).await {
            Ok(Ok(())) => {},
            _ => {
                conn.shutdown().await;
                break;
            },
        }
    }
}

/// Ping on an interval; three consecutive failures close the connection
async fn heartbeat_task(conn: Arc<Connection>, interval: Duration, ping_timeout: Duration) {
    let mut done_rx = conn.done_tx.subscribe();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately
    ticker.tick().await;

    let mut strikes: u32 = 0;

    loop {
        tokio::select! {
            _ = done_rx.changed() => break,
            _ = ticker.tick() => {},
        }

        let last_pong = conn.last_pong_ms.load(Ordering::Acquire);
        let silence_ms = Utc::now().timestamp_millis() - last_pong;
        let allowed_ms = (interval + ping_timeout).as_millis() as i64;

        if silence_ms > allowed_ms {
            strikes += 1;
        } else {
            strikes = 0;
        }

        if !conn
            .client
            .enqueue(OutboundFrame::Ping(b"hb".to_vec()))
        {
            strikes += 1;
        }

        if strikes >= HEARTBEAT_STRIKES {
            debug!(client = conn.client.id, "heartbeat failed; closing");
            conn.close_with(CLOSE_GOING_AWAY, "heartbeat timeout").await;
            break;
        }
    }
}

/// Read frames until the peer goes away or a policy forces a close
async fn reader_loop(
    mut stream: SplitStream<WebSocket>,
    conn: Arc<Connection>,
    limits: &crate::app_config::RealtimeConfig,
    identity: ConnIdentity,
) {
    let mut done_rx = conn.done_tx.subscribe();
    let read_idle = Duration::from_secs(limits.read_idle_timeout_secs);
    let mut window = SlidingWindow::new(
        limits.rate_limit_events,
        Duration::from_secs(limits.rate_limit_window_secs),
    );

    loop {
        let next = tokio::select! {
            _ = done_rx.changed() => {
                debug!(client = conn.client.id, "reader stop: ctx_done");
                break;
            },
            next = timeout(read_idle, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                debug!(client = conn.client.id, "reader stop: idle timeout");
                conn.close_with(CLOSE_GOING_AWAY, "idle timeout").await;
                break;
            },
            Ok(None) => {
                debug!(client = conn.client.id, "reader stop: conn_closed");
                break;
            },
            Ok(Some(Err(e))) => {
                debug!(client = conn.client.id, "reader stop: other: {}", e);
                break;
            },
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Close(_) => {
                debug!(client = conn.client.id, "reader stop: close");
                break;
            },
            Message::Pong(_) => {
                conn.last_pong_ms
                    .store(Utc::now().timestamp_millis(), Ordering::Release);
            },
            Message::Ping(_) => {
                // The transport answers pings automatically
            },
            Message::Binary(_) => {
                conn.send_error("bad_json", "frames must be JSON text");
            },
            Message::Text(text) => {
                if !window.allow(Instant::now()) {
                    conn.send_error("rate_limited", "too many frames");
                    conn.close_with(CLOSE_POLICY_VIOLATION, "rate limit").await;
                    break;
                }
                handle_frame(&conn, limits, &identity, text.as_str()).await;
                if conn.closed.load(Ordering::SeqCst) {
                    break;
                }
            },
        }
    }
}

/// Parse, validate, and dispatch one inbound frame
async fn handle_frame(
    conn: &Arc<Connection>,
    limits: &crate::app_config::RealtimeConfig,
    identity: &ConnIdentity,
    text: &str,
) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(_) => {
            conn.send_error("bad_json", "frame is not a valid envelope");
            return;
        },
    };

    if let Err(reason) = envelope.validate() {
        conn.send_error("invalid_envelope", reason);
        return;
    }

    match envelope.kind.as_str() {
        T_HELLO => {
            let payload = HelloAckPayload {
                session_id: identity.session_id.clone(),
            };
            conn.send_frame(Envelope::server(
                T_HELLO_ACK,
                serde_json::to_value(payload).unwrap_or_default(),
            ));
        },
        T_JOIN => handle_join(conn, limits, identity, envelope.payload).await,
        T_MESSAGE_SEND => handle_send(conn, limits, identity, envelope.payload).await,
        T_HISTORY_FETCH => handle_history(conn, limits, identity, envelope.payload).await,
        other => {
            conn.send_error("unknown_type", &format!("unsupported frame type: {}", other));
        },
    }
}

/// Membership ACL: unknown conversations fail closed
async fn is_member(
    conn: &Arc<Connection>,
    limits: &crate::app_config::RealtimeConfig,
    identity: &ConnIdentity,
    conversation_id: &str,
) -> Result<bool, MessageError> {
    if !limits.require_membership {
        return Ok(true);
    }
    conn.state
        .membership
        .is_member(conversation_id, &identity.user_id)
        .await
}

async fn handle_join(
    conn: &Arc<Connection>,
    limits: &crate::app_config::RealtimeConfig,
    identity: &ConnIdentity,
    payload: serde_json::Value,
) {
    let payload: JoinPayload = match serde_json::from_value(payload) {
        Ok(payload) => payload,
        Err(_) => {
            conn.send_error("invalid_payload", "conversation_id is required");
            return;
        },
    };
    if payload.conversation_id.is_empty() {
        conn.send_error("invalid_payload", "conversation_id is required");
        return;
    }

    match is_member(conn, limits, identity, &payload.conversation_id).await {
        Ok(true) => {},
        Ok(false) => {
            conn.send_error("not_a_member", "membership required");
            return;
        },
        Err(e) => {
            warn!("membership check failed: {}", e);
            conn.send_error("server_error", "membership check failed");
            return;
        },
    }

    let kind = ConversationKind::from(payload.kind.as_deref().unwrap_or("room"));
    let handle = conn.state.hub.conversation(&payload.conversation_id).await;

    // Switching conversations leaves the old one first
    let mut joined = conn.joined.lock().await;
    if let Some(previous) = joined.take() {
        if previous.handle.id != handle.id {
            previous.handle.leave(conn.client.id).await;
        }
    }
    handle.join(conn.client.clone()).await;
    *joined = Some(JoinedConversation {
        handle: handle.clone(),
        kind,
    });
    drop(joined);

    conn.send_frame(Envelope::server(
        T_JOIN,
        serde_json::json!({
            "conversation_id": payload.conversation_id,
            "kind": kind.as_str(),
        }),
    ));
}

async fn handle_send(
    conn: &Arc<Connection>,
    limits: &crate::app_config::RealtimeConfig,
    identity: &ConnIdentity,
    payload: serde_json::Value,
) {
    let payload: SendPayload = match serde_json::from_value(payload) {
        Ok(payload) => payload,
        Err(_) => {
            conn.send_error("invalid_payload", "message.send payload is malformed");
            return;
        },
    };

    let joined = conn.joined.lock().await;
    let Some(current) = joined.as_ref() else {
        conn.send_error("not_joined", "join a conversation first");
        return;
    };
    if current.handle.id != payload.conversation_id {
        conn.send_error("not_joined", "conversation_id does not match the joined conversation");
        return;
    }
    let handle = current.handle.clone();
    let kind = current.kind;
    drop(joined);

    match is_member(conn, limits, identity, &payload.conversation_id).await {
        Ok(true) => {},
        Ok(false) => {
            conn.send_error("not_a_member", "membership required");
            return;
        },
        Err(e) => {
            warn!("membership check failed: {}", e);
            conn.send_error("server_error", "membership check failed");
            return;
        },
    }

    if payload.client_msg_id.is_empty() {
        conn.send_error("invalid_payload", "client_msg_id is required");
        return;
    }
    let runes = payload.text.chars().count();
    if runes == 0 || runes > MAX_WIRE_TEXT_RUNES {
        conn.send_error(
            "invalid_payload",
            &format!("text must be 1..={} characters", MAX_WIRE_TEXT_RUNES),
        );
        return;
    }

    let request = AppendRequest {
        conversation_id: payload.conversation_id.clone(),
        kind,
        client_msg_id: payload.client_msg_id.clone(),
        sender_user_id: identity.user_id.clone(),
        sender_session: identity.session_id.clone(),
        text: payload.text.clone(),
    };

    let stored = match conn.state.messages.append_message(request, Utc::now()).await {
        Ok(stored) => stored,
        Err(MessageError::InvalidInput(msg)) => {
            conn.send_error("invalid_payload", &msg);
            return;
        },
        Err(e) => {
            warn!("message append failed: {}", e);
            conn.send_error("server_error", "message could not be stored");
            return;
        },
    };

    // The ack goes back in every case, duplicates included
    let ack = MessageAckPayload {
        conversation_id: stored.row.conversation_id.clone(),
        client_msg_id: stored.row.client_msg_id.clone(),
        server_msg_id: stored.row.server_msg_id.clone(),
        seq: stored.row.seq,
    };
    conn.send_frame(Envelope::server(
        T_MESSAGE_ACK,
        serde_json::to_value(ack).unwrap_or_default(),
    ));

    if !stored.duplicated {
        let broadcast = MessageNewPayload {
            conversation_id: stored.row.conversation_id.clone(),
            seq: stored.row.seq,
            server_msg_id: stored.row.server_msg_id.clone(),
            client_msg_id: stored.row.client_msg_id.clone(),
            sender: stored.row.sender_user_id.clone(),
            text: stored.row.body.clone(),
            server_ts: stored.row.server_ts,
        };
        let frame = Envelope::server(
            T_MESSAGE_NEW,
            serde_json::to_value(broadcast).unwrap_or_default(),
        );
        handle.broadcast(&frame).await;
    }
}

async fn handle_history(
    conn: &Arc<Connection>,
    limits: &crate::app_config::RealtimeConfig,
    identity: &ConnIdentity,
    payload: serde_json::Value,
) {
    let payload: HistoryFetchPayload = match serde_json::from_value(payload) {
        Ok(payload) => payload,
        Err(_) => {
            conn.send_error("invalid_payload", "history.fetch payload is malformed");
            return;
        },
    };
    if payload.conversation_id.is_empty() {
        conn.send_error("invalid_payload", "conversation_id is required");
        return;
    }

    match is_member(conn, limits, identity, &payload.conversation_id).await {
        Ok(true) => {},
        Ok(false) => {
            conn.send_error("not_a_member", "membership required");
            return;
        },
        Err(e) => {
            warn!("membership check failed: {}", e);
            conn.send_error("server_error", "membership check failed");
            return;
        },
    }

    let after_seq = payload.after_seq.unwrap_or(0).max(0);
    let limit = match payload.limit {
        Some(limit) if limit > 0 => limit.min(limits.history_max_limit),
        _ => limits.history_default_limit,
    };

    let (rows, has_more) = match conn
        .state
        .messages
        .fetch_history(&payload.conversation_id, after_seq, limit)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            warn!("history fetch failed: {}", e);
            conn.send_error("server_error", "history could not be fetched");
            return;
        },
    };

    let chunk = HistoryChunkPayload {
        conversation_id: payload.conversation_id,
        messages: rows
            .into_iter()
            .map(|row| HistoryMessage {
                seq: row.seq,
                server_msg_id: row.server_msg_id,
                client_msg_id: row.client_msg_id,
                sender: row.sender_user_id,
                text: row.body,
                server_ts: row.server_ts,
            })
            .collect(),
        has_more,
    };
    conn.send_frame(Envelope::server(
        T_HISTORY_CHUNK,
        serde_json::to_value(chunk).unwrap_or_default(),
    ));
}
