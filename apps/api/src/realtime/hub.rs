//! Server side of the real-time channel.
//!
//! One live connection per user. A new authenticate for a user that already
//! has a connection closes the old socket with `SUPERSEDED_CLOSE_CODE`; the
//! old socket's cleanup only removes the registry entry if it is still the
//! one it registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::realtime::protocol::{
    ClientMessage, Notification, Presence, ServerMessage, SUPERSEDED_CLOSE_CODE,
    SUPERSEDED_CLOSE_REASON,
};

/// What the hub hands to a connection's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    /// Superseded by a newer connection for the same user.
    Close,
}

struct Connection {
    id: u64,
    tx: mpsc::UnboundedSender<Outbound>,
    page: Option<String>,
}

#[derive(Clone, Default)]
pub struct RealtimeHub {
    connections: Arc<Mutex<HashMap<Uuid, Connection>>>,
    next_id: Arc<AtomicU64>,
}

/// A registered connection: its id and the receiver its writer drains.
pub struct Registration {
    pub user_id: Uuid,
    pub connection_id: u64,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Connection>> {
        // A poisoned map is still structurally valid; keep serving.
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a connection for `user_id`, closing any previous one.
    pub fn register(&self, user_id: Uuid) -> Registration {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self.lock().insert(
            user_id,
            Connection {
                id: connection_id,
                tx,
                page: None,
            },
        );
        if let Some(old) = previous {
            info!(%user_id, "Superseding existing real-time connection");
            let _ = old.tx.send(Outbound::Close);
        }
        Registration {
            user_id,
            connection_id,
            outbound: rx,
        }
    }

    /// Removes the entry only if it still belongs to `connection_id`.
    pub fn unregister(&self, user_id: Uuid, connection_id: u64) {
        let mut connections = self.lock();
        if connections.get(&user_id).map(|c| c.id) == Some(connection_id) {
            connections.remove(&user_id);
            debug!(%user_id, "Real-time connection removed");
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.lock().contains_key(&user_id)
    }

    pub fn page_of(&self, user_id: Uuid) -> Option<String> {
        self.lock().get(&user_id).and_then(|c| c.page.clone())
    }

    /// Sends a notification to one user. Returns false if they are offline.
    pub fn notify_user(&self, user_id: Uuid, notification: Notification) -> bool {
        self.send_to(user_id, ServerMessage::Notification(notification))
    }

    fn send_to(&self, user_id: Uuid, message: ServerMessage) -> bool {
        match self.lock().get(&user_id) {
            Some(conn) => conn.tx.send(Outbound::Message(message)).is_ok(),
            None => false,
        }
    }

    /// Sends to every connected user except `except`. Returns the number reached.
    pub fn broadcast(&self, message: ServerMessage, except: Option<Uuid>) -> usize {
        self.lock()
            .iter()
            .filter(|(user_id, _)| Some(**user_id) != except)
            .filter(|(_, conn)| conn.tx.send(Outbound::Message(message.clone())).is_ok())
            .count()
    }

    /// Records the user's current page and tells everyone else.
    pub fn page_changed(&self, user_id: Uuid, connection_id: u64, page: String) {
        {
            let mut connections = self.lock();
            match connections.get_mut(&user_id) {
                Some(conn) if conn.id == connection_id => conn.page = Some(page.clone()),
                _ => return,
            }
        }
        self.broadcast(
            ServerMessage::Presence(Presence { user_id, page }),
            Some(user_id),
        );
    }
}

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<RealtimeHub>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: RealtimeHub) {
    let (mut sink, mut stream) = socket.split();
    let mut session: Option<(Uuid, u64)> = None;
    let mut outbound: Option<mpsc::UnboundedReceiver<Outbound>> = None;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let message = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(m) => m,
                        Err(e) => {
                            debug!("Ignoring malformed real-time frame: {e}");
                            continue;
                        }
                    };
                    match message {
                        ClientMessage::Authenticate(auth) => {
                            if let Some((user_id, id)) = session.take() {
                                hub.unregister(user_id, id);
                            }
                            let registration = hub.register(auth.user_id);
                            info!(user_id = %auth.user_id, "Real-time client authenticated");
                            session = Some((registration.user_id, registration.connection_id));
                            outbound = Some(registration.outbound);
                        }
                        ClientMessage::PageChange(change) => match session {
                            Some((user_id, id)) => hub.page_changed(user_id, id, change.page),
                            None => debug!("page_change before authenticate ignored"),
                        },
                        ClientMessage::Ping => {
                            if send(&mut sink, &ServerMessage::Pong).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("Real-time socket error: {e}");
                    break;
                }
                Some(Ok(_)) => {}
            },
            next = recv_outbound(&mut outbound) => match next {
                Some(Outbound::Message(message)) => {
                    if send(&mut sink, &message).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close) => {
                    let frame = CloseFrame {
                        code: SUPERSEDED_CLOSE_CODE,
                        reason: SUPERSEDED_CLOSE_REASON.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    if let Some((user_id, id)) = session {
        hub.unregister(user_id, id);
    }
}

async fn recv_outbound(rx: &mut Option<mpsc::UnboundedReceiver<Outbound>>) -> Option<Outbound> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send<S>(sink: &mut S, message: &ServerMessage) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(message) {
        Ok(t) => t,
        Err(e) => {
            warn!("Failed to encode real-time message: {e}");
            return Ok(());
        }
    };
    sink.send(Message::Text(text)).await.map_err(|_| ())
}
