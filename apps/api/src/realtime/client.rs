#![allow(dead_code)]

//! Client side of the real-time channel.
//!
//! `RealtimeClient` is a handle to an owning task. The task holds the socket,
//! the outbound queue and the reconnect state; the handle talks to it through
//! a command channel and observes it through `watch` (connection state) and
//! `broadcast` (inbound messages).

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::realtime::protocol::{ClientMessage, ServerMessage, SUPERSEDED_CLOSE_CODE};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each backoff delay.
    pub jitter_max: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_max: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Observable connection state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelState {
    pub connected: bool,
    pub user_id: Option<Uuid>,
    pub last_message: Option<ServerMessage>,
    pub reconnect_attempts: u32,
    /// Reconnect attempts ran out; nothing happens until the next login.
    pub degraded: bool,
    /// Another connection took over this user; nothing happens until the
    /// next login.
    pub superseded: bool,
}

/// `min(base * 2^(attempt - 1), max) + jitter`, for `attempt >= 1`.
pub fn backoff_delay(config: &ClientConfig, attempt: u32, jitter: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let scaled = config
        .base_delay
        .checked_mul(1u32 << exponent)
        .unwrap_or(config.max_delay);
    scaled.min(config.max_delay) + jitter
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

enum Command {
    Login(Uuid),
    Logout,
    Send(ClientMessage),
    Shutdown,
}

pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ChannelState>,
    inbound: broadcast::Sender<ServerMessage>,
    task: JoinHandle<()>,
}

impl RealtimeClient {
    pub fn spawn(config: ClientConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ChannelState::default());
        let (inbound, _) = broadcast::channel(64);

        let driver = Driver {
            config,
            commands: command_rx,
            state: state_tx,
            inbound: inbound.clone(),
            queue: VecDeque::new(),
            user: None,
            attempts: 0,
        };
        let task = tokio::spawn(driver.run());

        Self {
            commands,
            state,
            inbound,
            task,
        }
    }

    /// Connects as `user_id`, closing any connection held for another user.
    pub fn login(&self, user_id: Uuid) {
        let _ = self.commands.send(Command::Login(user_id));
    }

    /// Closes the connection and stops reconnecting.
    pub fn logout(&self) {
        let _ = self.commands.send(Command::Logout);
    }

    /// Sends now if connected, otherwise queues until the next open.
    pub fn send(&self, message: ClientMessage) {
        let _ = self.commands.send(Command::Send(message));
    }

    pub fn state(&self) -> ChannelState {
        (*self.state.borrow()).clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.inbound.subscribe()
    }

    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

/// Why a connected session (or a connect attempt) ended.
enum SessionEnd {
    /// Socket lost or never opened; reconnect with backoff.
    Lost,
    /// Ended without fault, e.g. logout or takeover; `Driver::user` says what next.
    Replaced,
    Shutdown,
}

struct Driver {
    config: ClientConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ChannelState>,
    inbound: broadcast::Sender<ServerMessage>,
    queue: VecDeque<ClientMessage>,
    user: Option<Uuid>,
    attempts: u32,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let Some(user_id) = self.user else {
                if !self.idle().await {
                    return;
                }
                continue;
            };

            match self.connect(user_id).await {
                SessionEnd::Shutdown => return,
                SessionEnd::Replaced => continue,
                SessionEnd::Lost => {}
            }

            if self.attempts >= self.config.max_reconnect_attempts {
                warn!(
                    %user_id,
                    attempts = self.attempts,
                    "Real-time reconnect attempts exhausted, staying disconnected"
                );
                self.user = None;
                self.state.send_modify(|s| s.degraded = true);
                continue;
            }

            self.attempts += 1;
            let attempts = self.attempts;
            self.state.send_modify(|s| s.reconnect_attempts = attempts);
            let delay = backoff_delay(
                &self.config,
                attempts,
                random_jitter(self.config.jitter_max),
            );
            debug!("Reconnecting in {}ms (attempt {attempts})", delay.as_millis());
            if !self.wait(delay).await {
                return;
            }
        }
    }

    /// Waits for a command while no user is logged in. False on shutdown.
    async fn idle(&mut self) -> bool {
        match self.commands.recv().await {
            None | Some(Command::Shutdown) => false,
            Some(command) => {
                self.apply_offline(command);
                true
            }
        }
    }

    /// Sleeps out a backoff delay, still serving commands. False on shutdown.
    async fn wait(&mut self, delay: Duration) -> bool {
        let deadline = tokio::time::sleep(delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return true,
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return false,
                    Some(command) => {
                        let switches = matches!(command, Command::Login(_) | Command::Logout);
                        self.apply_offline(command);
                        if switches {
                            return true;
                        }
                    }
                },
            }
        }
    }

    /// Handles a command while no socket is open.
    fn apply_offline(&mut self, command: Command) {
        match command {
            Command::Login(user_id) => self.start_user(Some(user_id)),
            Command::Logout => self.start_user(None),
            Command::Send(message) => self.queue.push_back(message),
            Command::Shutdown => {}
        }
    }

    fn start_user(&mut self, user: Option<Uuid>) {
        self.user = user;
        self.attempts = 0;
        self.state.send_modify(|s| {
            s.user_id = user;
            s.reconnect_attempts = 0;
            s.degraded = false;
            s.superseded = false;
        });
    }

    async fn connect(&mut self, user_id: Uuid) -> SessionEnd {
        let socket = match tokio_tungstenite::connect_async(self.config.url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                warn!(%user_id, "Real-time connect failed: {e}");
                return SessionEnd::Lost;
            }
        };
        info!(%user_id, "Real-time channel connected");
        self.attempts = 0;
        self.state.send_modify(|s| {
            s.connected = true;
            s.reconnect_attempts = 0;
        });

        let end = self.session(socket, user_id).await;
        self.state.send_modify(|s| s.connected = false);
        end
    }

    async fn session(&mut self, socket: Socket, user_id: Uuid) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();

        if write(&mut sink, &ClientMessage::authenticate(user_id))
            .await
            .is_err()
            || !self.flush(&mut sink).await
        {
            return SessionEnd::Lost;
        }

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => {
                        let _ = sink.close().await;
                        return SessionEnd::Shutdown;
                    }
                    Some(Command::Logout) => {
                        info!(%user_id, "Real-time logout");
                        let _ = sink.close().await;
                        self.start_user(None);
                        return SessionEnd::Replaced;
                    }
                    Some(Command::Login(next)) if next == user_id => {}
                    Some(Command::Login(next)) => {
                        info!(from = %user_id, to = %next, "Real-time user switch");
                        let _ = sink.close().await;
                        self.start_user(Some(next));
                        return SessionEnd::Replaced;
                    }
                    Some(Command::Send(message)) => {
                        self.queue.push_back(message);
                        if !self.flush(&mut sink).await {
                            return SessionEnd::Lost;
                        }
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(text.as_str()) {
                            Ok(message) => {
                                let _ = self.inbound.send(message.clone());
                                self.state.send_modify(|s| s.last_message = Some(message));
                            }
                            Err(e) => debug!("Ignoring malformed server frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(Some(frame))))
                        if u16::from(frame.code) == SUPERSEDED_CLOSE_CODE =>
                    {
                        info!(%user_id, "Real-time session taken over by another connection");
                        self.start_user(None);
                        self.state.send_modify(|s| s.superseded = true);
                        return SessionEnd::Replaced;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(%user_id, "Real-time channel closed by server");
                        return SessionEnd::Lost;
                    }
                    Some(Err(e)) => {
                        warn!(%user_id, "Real-time channel error: {e}");
                        return SessionEnd::Lost;
                    }
                    Some(Ok(_)) => {}
                },
                _ = heartbeat.tick() => {
                    if write(&mut sink, &ClientMessage::Ping).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
            }
        }
    }

    /// Drains the queue in order. A failed send goes back to the front.
    async fn flush<S>(&mut self, sink: &mut S) -> bool
    where
        S: futures_util::Sink<Message> + Unpin,
    {
        while let Some(message) = self.queue.pop_front() {
            if write(sink, &message).await.is_err() {
                self.queue.push_front(message);
                return false;
            }
        }
        true
    }
}

async fn write<S>(sink: &mut S, message: &ClientMessage) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let text = serde_json::to_string(message).map_err(|_| ())?;
    sink.send(Message::text(text)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use axum::{routing::get, Router};
    use futures_util::Sink;
    use serde_json::json;

    use super::*;
    use crate::realtime::hub::{ws_handler, Outbound, RealtimeHub};
    use crate::realtime::protocol::{Notification, Presence};

    fn config(url: String) -> ClientConfig {
        ClientConfig {
            url,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            jitter_max: Duration::ZERO,
            max_reconnect_attempts: 2,
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    async fn serve(hub: RealtimeHub) -> SocketAddr {
        let app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(hub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn until<F: Fn() -> bool>(check: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let cfg = ClientConfig::new("ws://unused");
        let no_jitter = Duration::ZERO;
        assert_eq!(backoff_delay(&cfg, 1, no_jitter), Duration::from_secs(1));
        assert_eq!(backoff_delay(&cfg, 2, no_jitter), Duration::from_secs(2));
        assert_eq!(backoff_delay(&cfg, 4, no_jitter), Duration::from_secs(8));
        assert_eq!(backoff_delay(&cfg, 6, no_jitter), Duration::from_secs(30));
        assert_eq!(backoff_delay(&cfg, 40, no_jitter), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_adds_jitter_after_cap() {
        let cfg = ClientConfig::new("ws://unused");
        assert_eq!(
            backoff_delay(&cfg, 10, Duration::from_millis(250)),
            Duration::from_millis(30_250)
        );
    }

    #[test]
    fn test_jitter_stays_in_range() {
        for _ in 0..100 {
            assert!(random_jitter(Duration::from_millis(5)) <= Duration::from_millis(5));
        }
        assert_eq!(random_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_queued_messages_flush_after_authenticate() {
        let hub = RealtimeHub::new();
        let addr = serve(hub.clone()).await;
        let user = Uuid::new_v4();

        let client = RealtimeClient::spawn(config(format!("ws://{addr}/ws")));
        client.send(ClientMessage::page_change("/batches"));
        client.login(user);

        until(|| hub.page_of(user).as_deref() == Some("/batches")).await;
        assert!(client.state().connected);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_receives_notifications() {
        let hub = RealtimeHub::new();
        let addr = serve(hub.clone()).await;
        let user = Uuid::new_v4();

        let client = RealtimeClient::spawn(config(format!("ws://{addr}/ws")));
        let mut inbound = client.subscribe();
        client.login(user);
        until(|| hub.is_online(user)).await;

        let notification = Notification {
            kind: "batch_completed".to_string(),
            title: "Batch finished".to_string(),
            message: "2 completed, 0 failed".to_string(),
            data: json!({ "completed": 2 }),
        };
        assert!(hub.notify_user(user, notification.clone()));

        let received = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, ServerMessage::Notification(notification.clone()));
        until(|| client.state().last_message.is_some()).await;
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_switching_user_replaces_connection() {
        let hub = RealtimeHub::new();
        let addr = serve(hub.clone()).await;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let client = RealtimeClient::spawn(config(format!("ws://{addr}/ws")));
        client.login(alice);
        until(|| hub.is_online(alice)).await;

        client.login(bob);
        until(|| hub.is_online(bob) && !hub.is_online(alice)).await;
        assert_eq!(client.state().user_id, Some(bob));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_logout_disconnects() {
        let hub = RealtimeHub::new();
        let addr = serve(hub.clone()).await;
        let user = Uuid::new_v4();

        let client = RealtimeClient::spawn(config(format!("ws://{addr}/ws")));
        client.login(user);
        until(|| hub.is_online(user)).await;

        client.logout();
        until(|| !hub.is_online(user)).await;
        until(|| !client.state().connected).await;
        assert_eq!(client.state().user_id, None);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_reconnects_enter_degraded_mode() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let client = RealtimeClient::spawn(config(format!("ws://{addr}/ws")));
        client.login(Uuid::new_v4());

        until(|| client.state().degraded).await;
        let state = client.state();
        assert!(!state.connected);
        assert_eq!(state.reconnect_attempts, 2);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_client_for_same_user_ends_first_for_good() {
        let hub = RealtimeHub::new();
        let addr = serve(hub.clone()).await;
        let user = Uuid::new_v4();

        let first = RealtimeClient::spawn(config(format!("ws://{addr}/ws")));
        first.login(user);
        until(|| hub.is_online(user) && first.state().connected).await;

        let second = RealtimeClient::spawn(config(format!("ws://{addr}/ws")));
        second.login(user);
        until(|| first.state().superseded).await;

        // Long enough for several backoff rounds if the first one reconnected.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let state = first.state();
        assert!(!state.connected);
        assert_eq!(state.user_id, None);
        assert_eq!(state.reconnect_attempts, 0);

        let state = second.state();
        assert!(state.connected);
        assert!(!state.superseded);
        assert_eq!(state.user_id, Some(user));
        assert!(hub.is_online(user));

        first.shutdown().await;
        second.shutdown().await;
    }

    #[tokio::test]
    async fn test_login_after_takeover_connects_again() {
        let hub = RealtimeHub::new();
        let addr = serve(hub.clone()).await;
        let user = Uuid::new_v4();

        let client = RealtimeClient::spawn(config(format!("ws://{addr}/ws")));
        client.login(user);
        until(|| client.state().connected).await;

        let _other = hub.register(user);
        until(|| client.state().superseded).await;

        client.login(user);
        until(|| client.state().connected).await;
        assert!(!client.state().superseded);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_queued_page_changes_arrive_in_order() {
        let hub = RealtimeHub::new();
        let addr = serve(hub.clone()).await;
        let user = Uuid::new_v4();
        let mut observer = hub.register(Uuid::new_v4());

        let client = RealtimeClient::spawn(config(format!("ws://{addr}/ws")));
        for page in ["/candidates", "/batches", "/profiles", "/compare"] {
            client.send(ClientMessage::page_change(page));
        }
        client.login(user);

        let mut seen = Vec::new();
        while seen.len() < 4 {
            let next = tokio::time::timeout(Duration::from_secs(5), observer.outbound.recv())
                .await
                .unwrap();
            if let Some(Outbound::Message(ServerMessage::Presence(Presence { user_id, page }))) =
                next
            {
                assert_eq!(user_id, user);
                seen.push(page);
            }
        }
        assert_eq!(seen, ["/candidates", "/batches", "/profiles", "/compare"]);
        assert_eq!(hub.page_of(user).as_deref(), Some("/compare"));
        client.shutdown().await;
    }

    /// Accepts `capacity` frames, then fails every send.
    struct FailingSink {
        accepted: Vec<Message>,
        capacity: usize,
    }

    impl Sink<Message> for FailingSink {
        type Error = std::io::Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            if self.accepted.len() >= self.capacity {
                return Err(std::io::ErrorKind::BrokenPipe.into());
            }
            self.accepted.push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    fn idle_driver() -> Driver {
        let (_commands, command_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::default());
        let (inbound, _) = broadcast::channel(4);
        Driver {
            config: config("ws://unused".to_string()),
            commands: command_rx,
            state,
            inbound,
            queue: VecDeque::new(),
            user: None,
            attempts: 0,
        }
    }

    fn page_of(frame: &Message) -> String {
        match frame {
            Message::Text(text) => {
                match serde_json::from_str::<ClientMessage>(text.as_str()).unwrap() {
                    ClientMessage::PageChange(change) => change.page,
                    other => panic!("unexpected frame {other:?}"),
                }
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_at_front() {
        let mut driver = idle_driver();
        for page in ["/a", "/b", "/c"] {
            driver.queue.push_back(ClientMessage::page_change(page));
        }

        let mut sink = FailingSink {
            accepted: Vec::new(),
            capacity: 1,
        };
        assert!(!driver.flush(&mut sink).await);
        assert_eq!(sink.accepted.iter().map(page_of).collect::<Vec<_>>(), ["/a"]);
        assert_eq!(
            driver.queue.iter().cloned().collect::<Vec<_>>(),
            [
                ClientMessage::page_change("/b"),
                ClientMessage::page_change("/c")
            ]
        );

        driver.queue.push_back(ClientMessage::page_change("/d"));
        let mut sink = FailingSink {
            accepted: Vec::new(),
            capacity: usize::MAX,
        };
        assert!(driver.flush(&mut sink).await);
        assert!(driver.queue.is_empty());
        assert_eq!(
            sink.accepted.iter().map(page_of).collect::<Vec<_>>(),
            ["/b", "/c", "/d"]
        );
    }

    #[tokio::test]
    async fn test_heartbeat_pings_server() {
        let hub = RealtimeHub::new();
        let addr = serve(hub.clone()).await;

        let mut cfg = config(format!("ws://{addr}/ws"));
        cfg.heartbeat_interval = Duration::from_millis(50);
        let client = RealtimeClient::spawn(cfg);
        let mut inbound = client.subscribe();
        client.login(Uuid::new_v4());

        // The server only sends pong in reply to a ping.
        let received = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, ServerMessage::Pong);
        client.shutdown().await;
    }
}
