//! Connection handle and event loop.
//!
//! This module handles the WebSocket connection to the remote peer,
//! including outbound queueing before readiness and topic dispatch of
//! inbound envelopes.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - WebSocket handshake (emits issued meanwhile are queued)
//! - Outbound frames from the caller API
//! - Inbound envelopes, dispatched to registered listeners by prefix
//! - The reserved `/refresh` control topic

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Envelope;
use crate::registry::{self, Listener, RegisterOptions, Registry};

// ============================================================================
// Types
// ============================================================================

/// Reload hook callback type.
///
/// Invoked when the reserved `/refresh` control topic arrives. In a
/// browser this would be a full page reload; a native host decides what
/// reloading means.
pub type ReloadHook = Arc<dyn Fn() + Send + Sync>;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Send an encoded frame (or queue it while not ready).
    Emit(String),
    /// Shutdown the connection.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to one topic pub/sub WebSocket connection.
///
/// Owns a send queue and a topic-listener registry; the socket itself
/// lives on an internal event-loop task.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone; all operations are
/// non-blocking and complete synchronously.
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Readiness flag (shared with event loop).
    ready: Arc<AtomicBool>,
    /// Pending outbound frames, FIFO (shared with event loop).
    queue: Arc<Mutex<Vec<String>>>,
    /// Topic-listener registry (shared with event loop).
    registry: Arc<Mutex<Registry>>,
    /// Reload hook for the `/refresh` control topic (shared with event loop).
    reload_hook: Arc<Mutex<Option<ReloadHook>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("ready", &self.ready.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Clone for Connection {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            ready: Arc::clone(&self.ready),
            queue: Arc::clone(&self.queue),
            registry: Arc::clone(&self.registry),
            reload_hook: Arc::clone(&self.reload_hook),
        }
    }
}

impl Connection {
    /// Opens a connection to a WebSocket address.
    ///
    /// Validates the address, spawns the event-loop task and returns
    /// immediately with a handle in not-ready state; the WebSocket
    /// handshake proceeds in the background. Messages emitted before
    /// readiness are queued and flushed, in order, once the handshake
    /// completes.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if `address` is not a valid
    /// `ws://` or `wss://` URL. Handshake failures are not surfaced
    /// here; they terminate the event loop and are logged.
    pub fn connect(address: &str) -> Result<Self> {
        let url =
            Url::parse(address).map_err(|e| Error::invalid_address(address, e.to_string()))?;

        match url.scheme() {
            "ws" | "wss" => {}
            scheme => {
                return Err(Error::invalid_address(
                    address,
                    format!("unsupported scheme {scheme:?}, expected ws or wss"),
                ));
            }
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let ready = Arc::new(AtomicBool::new(false));
        let queue = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(Mutex::new(Registry::new()));
        let reload_hook: Arc<Mutex<Option<ReloadHook>>> = Arc::new(Mutex::new(None));

        debug!(address = %address, "Connecting");

        // Spawn event loop task
        tokio::spawn(Self::run_event_loop(
            address.to_owned(),
            command_rx,
            Arc::clone(&ready),
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&reload_hook),
        ));

        Ok(Self {
            command_tx,
            ready,
            queue,
            registry,
            reload_hook,
        })
    }

    /// Emits a message on a topic.
    ///
    /// The envelope is sent immediately if the connection is ready, or
    /// queued and flushed on the ready transition if not. Transport-level
    /// send failures are not surfaced to the caller; the event loop logs
    /// them.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTopic`] if `topic` contains a space
    /// - [`Error::Json`] if `body` cannot be serialized
    pub fn emit<B: Serialize + ?Sized>(&self, topic: &str, body: &B) -> Result<()> {
        let body = serde_json::to_value(body)?;
        let frame = Envelope::new(topic, body).encode()?;

        if self
            .command_tx
            .send(ConnectionCommand::Emit(frame))
            .is_err()
        {
            warn!(topic = %topic, "Emit on a terminated connection, message dropped");
        }

        Ok(())
    }

    /// Registers a listener under a topic prefix.
    ///
    /// Duplicate registration of the same `(prefix, listener)` pair is a
    /// no-op, checked by `Arc` identity of the listener. Listeners
    /// persist for the life of the connection.
    ///
    /// Returns `true` if the registration was new.
    pub fn register(
        &self,
        prefix: impl Into<String>,
        listener: Listener,
        options: RegisterOptions,
    ) -> bool {
        self.registry.lock().add(prefix, listener, options)
    }

    /// Installs the reload hook invoked by the `/refresh` control topic.
    ///
    /// Without a hook, `/refresh` is logged and otherwise ignored.
    pub fn set_reload_hook(&self, hook: ReloadHook) {
        let mut guard = self.reload_hook.lock();
        *guard = Some(hook);
    }

    /// Removes the reload hook.
    pub fn clear_reload_hook(&self) {
        let mut guard = self.reload_hook.lock();
        *guard = None;
    }

    /// Returns `true` once the WebSocket handshake has completed and
    /// sends go out immediately.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Returns the number of outbound frames waiting for readiness.
    #[inline]
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns the number of registered listener entries.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Shuts down the connection gracefully.
    ///
    /// Closes the socket and stops the event loop. Queued frames that
    /// never reached readiness are dropped with a log.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that owns the WebSocket stream.
    async fn run_event_loop(
        address: String,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        ready: Arc<AtomicBool>,
        queue: Arc<Mutex<Vec<String>>>,
        registry: Arc<Mutex<Registry>>,
        reload_hook: Arc<Mutex<Option<ReloadHook>>>,
    ) {
        // Phase 1: establish the transport while buffering outbound
        // frames in arrival order.
        let connect = connect_async(address.as_str());
        tokio::pin!(connect);

        let ws_stream = loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok((stream, _response)) => break stream,
                    Err(e) => {
                        error!(address = %address, error = %e, "WebSocket handshake failed");
                        Self::drop_queued(&queue);
                        return;
                    }
                },

                command = command_rx.recv() => match command {
                    Some(ConnectionCommand::Emit(frame)) => {
                        queue.lock().push(frame);
                    }
                    Some(ConnectionCommand::Shutdown) | None => {
                        debug!("Connection abandoned before handshake completed");
                        Self::drop_queued(&queue);
                        return;
                    }
                },
            }
        };

        debug!(address = %address, "Socket opened");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        // Ready transition: flush the queue FIFO through the same send
        // path emit uses, then clear it. Emits racing past the flag
        // still arrive on the command channel, behind these frames.
        ready.store(true, Ordering::SeqCst);
        let pending: Vec<String> = std::mem::take(&mut *queue.lock());
        if !pending.is_empty() {
            debug!(count = pending.len(), "Flushing queued messages");
        }
        for frame in pending {
            if let Err(e) = ws_write.send(Message::text(frame)).await {
                warn!(error = %e, "Failed to send queued message");
            }
        }

        // Phase 2: serve inbound envelopes and outbound commands.
        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_frame(&text, &registry, &reload_hook);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Emit(frame)) => {
                            if let Err(e) = ws_write.send(Message::text(frame)).await {
                                warn!(error = %e, "Failed to send message");
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        ready.store(false, Ordering::SeqCst);
        debug!("Event loop terminated");
    }

    /// Handles one inbound text frame.
    fn handle_incoming_frame(
        text: &str,
        registry: &Mutex<Registry>,
        reload_hook: &Mutex<Option<ReloadHook>>,
    ) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        // Control topic short-circuits listener dispatch entirely.
        if envelope.is_refresh() {
            let hook = reload_hook.lock().clone();
            match hook {
                Some(hook) => {
                    debug!("Reload requested by control topic");
                    hook();
                }
                None => warn!("Control topic /refresh received with no reload hook installed"),
            }
            return;
        }

        // Snapshot matches before invoking, so listeners may re-enter
        // register/emit on this connection.
        let listeners = registry.lock().matching(&envelope.topic);
        trace!(
            topic = %envelope.topic,
            listeners = listeners.len(),
            "Dispatching envelope"
        );
        registry::invoke_all(&listeners, &envelope.topic, &envelope.body);
    }

    /// Drops frames that never reached readiness.
    fn drop_queued(queue: &Mutex<Vec<String>>) {
        let dropped = std::mem::take(&mut *queue.lock()).len();
        if dropped > 0 {
            warn!(dropped, "Dropped queued messages, connection never became ready");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::{Value, json};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::{WebSocketStream, accept_async};

    const WAIT: Duration = Duration::from_secs(5);

    /// Installs a test subscriber so RUST_LOG surfaces event-loop logs.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Binds a throwaway listener and returns it with its ws:// URL.
    async fn bind_peer() -> (TcpListener, String) {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let port = listener.local_addr().expect("local addr").port();
        (listener, format!("ws://127.0.0.1:{port}"))
    }

    /// Accepts the client connection and completes the handshake.
    async fn accept_peer(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("client should connect")
            .expect("accept should succeed");
        accept_async(stream).await.expect("handshake should succeed")
    }

    /// Reads the next text frame from the peer side.
    async fn next_text(peer: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            let message = timeout(WAIT, peer.next())
                .await
                .expect("frame should arrive")
                .expect("stream should stay open")
                .expect("frame should be readable");
            if let Message::Text(text) = message {
                return text.to_string();
            }
        }
    }

    /// Polls the readiness flag until it flips.
    async fn wait_ready(conn: &Connection) {
        for _ in 0..500 {
            if conn.is_ready() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("connection never became ready");
    }

    /// Listener that forwards invocations into a channel.
    fn forwarding(label: &str) -> (Listener, UnboundedReceiver<(String, String, Value)>) {
        let (tx, rx) = unbounded_channel();
        let label = label.to_owned();
        let listener: Listener = Arc::new(move |topic: &str, body: &Value| {
            let _ = tx.send((label.clone(), topic.to_owned(), body.clone()));
        });
        (listener, rx)
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_address() {
        let err = Connection::connect("not a url").unwrap_err();
        assert!(matches!(err, Error::InvalidAddress { .. }));

        let err = Connection::connect("http://127.0.0.1:1").unwrap_err();
        assert!(matches!(err, Error::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn test_not_ready_until_handshake() {
        let (listener, url) = bind_peer().await;
        let conn = Connection::connect(&url).expect("connect should succeed");

        assert!(!conn.is_ready());

        let _peer = accept_peer(&listener).await;
        wait_ready(&conn).await;
    }

    #[tokio::test]
    async fn test_queued_emits_flush_in_order() {
        let (listener, url) = bind_peer().await;
        let conn = Connection::connect(&url).expect("connect should succeed");

        // All three land before the handshake can complete.
        conn.emit("/first", &json!(1)).expect("emit");
        conn.emit("/second", &json!(2)).expect("emit");
        conn.emit("/third", &json!(3)).expect("emit");

        let mut peer = accept_peer(&listener).await;

        assert_eq!(next_text(&mut peer).await, "/first 1\n");
        assert_eq!(next_text(&mut peer).await, "/second 2\n");
        assert_eq!(next_text(&mut peer).await, "/third 3\n");

        wait_ready(&conn).await;
        assert_eq!(conn.queued_count(), 0);
    }

    #[tokio::test]
    async fn test_emit_while_ready_skips_queue() {
        let (listener, url) = bind_peer().await;
        let conn = Connection::connect(&url).expect("connect should succeed");
        let mut peer = accept_peer(&listener).await;
        wait_ready(&conn).await;

        conn.emit("chat.message", &json!({"text": "hi"})).expect("emit");

        assert_eq!(next_text(&mut peer).await, "chat.message {\"text\":\"hi\"}\n");
        assert_eq!(conn.queued_count(), 0);
    }

    #[tokio::test]
    async fn test_emit_rejects_topic_with_space() {
        let (listener, url) = bind_peer().await;
        let conn = Connection::connect(&url).expect("connect should succeed");
        let _peer = accept_peer(&listener).await;

        let err = conn.emit("bad topic", &json!(null)).unwrap_err();
        assert!(matches!(err, Error::InvalidTopic { .. }));
    }

    #[tokio::test]
    async fn test_prefix_dispatch_over_socket() {
        let (listener, url) = bind_peer().await;
        let conn = Connection::connect(&url).expect("connect should succeed");
        let mut peer = accept_peer(&listener).await;
        wait_ready(&conn).await;

        let (wide, mut wide_rx) = forwarding("wide");
        let (narrow, mut narrow_rx) = forwarding("narrow");
        let (exact, mut exact_rx) = forwarding("exact");

        conn.register("/a", wide, RegisterOptions::default());
        conn.register("/a/b", narrow, RegisterOptions::default());
        conn.register("/a", exact, RegisterOptions::exact());
        assert_eq!(conn.listener_count(), 3);

        peer.send(Message::text("/a/b/c {\"n\":7}\n"))
            .await
            .expect("peer send");

        let (_, topic, body) = timeout(WAIT, wide_rx.recv())
            .await
            .expect("wide listener should fire")
            .expect("channel open");
        assert_eq!(topic, "/a/b/c");
        assert_eq!(body, json!({"n": 7}));

        let (_, topic, _) = timeout(WAIT, narrow_rx.recv())
            .await
            .expect("narrow listener should fire")
            .expect("channel open");
        assert_eq!(topic, "/a/b/c");

        // The exact listener on "/a" must not see "/a/b/c".
        sleep(Duration::from_millis(50)).await;
        assert!(exact_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_registration_dispatches_once() {
        let (listener, url) = bind_peer().await;
        let conn = Connection::connect(&url).expect("connect should succeed");
        let mut peer = accept_peer(&listener).await;
        wait_ready(&conn).await;

        let (listener_cb, mut rx) = forwarding("dup");
        assert!(conn.register("/a", Arc::clone(&listener_cb), RegisterOptions::default()));
        assert!(!conn.register("/a", listener_cb, RegisterOptions::default()));
        assert_eq!(conn.listener_count(), 1);

        peer.send(Message::text("/a/x true\n")).await.expect("peer send");

        timeout(WAIT, rx.recv())
            .await
            .expect("listener should fire")
            .expect("channel open");
        sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "listener fired more than once");
    }

    #[tokio::test]
    async fn test_refresh_bypasses_listeners() {
        let (listener, url) = bind_peer().await;
        let conn = Connection::connect(&url).expect("connect should succeed");
        let mut peer = accept_peer(&listener).await;
        wait_ready(&conn).await;

        let (reload_tx, mut reload_rx) = unbounded_channel();
        conn.set_reload_hook(Arc::new(move || {
            let _ = reload_tx.send(());
        }));

        // Catch-all listener on the empty prefix must still be skipped.
        let (catch_all, mut catch_all_rx) = forwarding("all");
        conn.register("", catch_all, RegisterOptions::default());

        peer.send(Message::text("/refresh null\n")).await.expect("peer send");

        timeout(WAIT, reload_rx.recv())
            .await
            .expect("reload hook should fire")
            .expect("channel open");

        // A follow-up envelope proves dispatch kept running and that the
        // catch-all saw nothing for /refresh.
        peer.send(Message::text("/after 1\n")).await.expect("peer send");
        let (_, topic, _) = timeout(WAIT, catch_all_rx.recv())
            .await
            .expect("catch-all should fire")
            .expect("channel open");
        assert_eq!(topic, "/after");
        assert!(catch_all_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let (listener, url) = bind_peer().await;
        let conn = Connection::connect(&url).expect("connect should succeed");
        let mut peer = accept_peer(&listener).await;
        wait_ready(&conn).await;

        let (listener_cb, mut rx) = forwarding("survivor");
        conn.register("/ok", listener_cb, RegisterOptions::default());

        peer.send(Message::text("no-separator")).await.expect("peer send");
        peer.send(Message::text("/ok {broken json")).await.expect("peer send");
        peer.send(Message::text("/ok \"fine\"\n")).await.expect("peer send");

        let (_, topic, body) = timeout(WAIT, rx.recv())
            .await
            .expect("well-formed frame should dispatch")
            .expect("channel open");
        assert_eq!(topic, "/ok");
        assert_eq!(body, json!("fine"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_closes_socket() {
        let (listener, url) = bind_peer().await;
        let conn = Connection::connect(&url).expect("connect should succeed");
        let mut peer = accept_peer(&listener).await;
        wait_ready(&conn).await;

        conn.shutdown();

        // The peer observes the close handshake, then end of stream.
        let closed = timeout(WAIT, async {
            loop {
                match peer.next().await {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "peer never saw the connection close");
    }
}
