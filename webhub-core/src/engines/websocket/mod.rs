//! The WebSocket engine (§4.4): a stateful, session-aware broadcast hub.
//! A single coordinator (realized here as the client map's write-lock
//! critical section, rather than a separate actor task — see DESIGN.md)
//! serializes register/unregister; one reader and one writer task run per
//! connection; fan-out runs under a read lock over the client map.

mod session;

pub use session::{Session, SessionStore};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::{header, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ErrorKind, ProxyError, Result};
use crate::stats::WsStats;

type RespBody = BoxBody<Bytes, std::convert::Infallible>;

fn empty_body() -> RespBody {
    Full::new(Bytes::new()).map_err(|never| match never {}).boxed()
}

const OUTBOUND_QUEUE_CAPACITY: usize = 256;
const READ_LIMIT_BYTES: usize = 4 * 1024;
const READ_DEADLINE: Duration = Duration::from_secs(60);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(30);
const CLEANUP_GRACE: Duration = Duration::from_secs(5);

type ClientMap = HashMap<String, Arc<Connection>, ahash::RandomState>;
type UserIndex = HashMap<i64, HashSet<String>, ahash::RandomState>;

/// A single WebSocket connection (§3). Mutated only by its own reader/
/// writer tasks and the engine's register/unregister critical section.
pub struct Connection {
    pub id: String,
    pub session_id: String,
    pub user_id: i64,
    pub display_name: String,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

/// The payload handed to the engine's message callback on every inbound
/// text frame (§4.4, §6).
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub connection_id: String,
    pub session_id: String,
    pub sender_id: String,
    pub payload: String,
}

pub type MessageCallback = Arc<dyn Fn(IncomingMessage) + Send + Sync>;

/// Shared engine state, reference-counted so reader/writer tasks can hold
/// it independently of the [`WsEngine`] handle that spawned them.
struct EngineState {
    clients: RwLock<ClientMap>,
    users: RwLock<UserIndex>,
    sessions: SessionStore,
    stats: WsStats,
}

impl EngineState {
    fn new() -> Self {
        Self {
            clients: RwLock::new(ClientMap::default()),
            users: RwLock::new(UserIndex::default()),
            sessions: SessionStore::new(),
            stats: WsStats::default(),
        }
    }

    /// Register `conn`, replacing any live connection with the same id.
    /// The old entry is detached from both maps *before* its socket is
    /// cancelled, so its reader's later unregister never touches the new
    /// connection's queue (the subtle invariant of §9).
    async fn register(&self, conn: Arc<Connection>) {
        let mut clients = self.clients.write().await;
        let mut users = self.users.write().await;

        if let Some(old) = clients.remove(&conn.id) {
            remove_from_user_index(&mut users, &old);
            old.cancel.cancel();
        }

        clients.insert(conn.id.clone(), conn.clone());
        users.entry(conn.user_id).or_default().insert(conn.id.clone());
        self.stats.total_connections.incr();
    }

    /// Unregister `conn`, but only if it is still the live connection for
    /// its id — a pointer-equality guard against a newer connection having
    /// already replaced it (§8: a connection's queue is closed exactly
    /// once).
    async fn unregister(&self, conn: &Arc<Connection>) {
        let mut clients = self.clients.write().await;
        let is_current = clients.get(&conn.id).is_some_and(|stored| Arc::ptr_eq(stored, conn));
        if !is_current {
            return;
        }
        clients.remove(&conn.id);
        let mut users = self.users.write().await;
        remove_from_user_index(&mut users, conn);
    }

    async fn evict_if_current(&self, conn: &Arc<Connection>) {
        self.unregister(conn).await;
    }

    async fn current_connections(&self) -> usize {
        self.clients.read().await.len()
    }
}

fn remove_from_user_index(users: &mut UserIndex, conn: &Connection) {
    if let Some(set) = users.get_mut(&conn.user_id) {
        set.remove(&conn.id);
        if set.is_empty() {
            users.remove(&conn.user_id);
        }
    }
}

/// The WebSocket engine: a per-mount broadcast hub. Cloning is cheap (an
/// `Arc` handle); clones share the same client map and stats.
#[derive(Clone)]
pub struct WsEngine {
    state: Arc<EngineState>,
    on_message: MessageCallback,
}

impl WsEngine {
    pub fn new(on_message: MessageCallback) -> Self {
        Self { state: Arc::new(EngineState::new()), on_message }
    }

    pub fn stats(&self) -> &WsStats {
        &self.state.stats
    }

    pub async fn current_connections(&self) -> usize {
        self.state.current_connections().await
    }

    /// Non-blocking fan-out to a single client by id. Evicts the client on
    /// a full queue rather than blocking the caller.
    pub async fn send_to_client(&self, client_id: &str, msg: Message) -> bool {
        let conn = self.state.clients.read().await.get(client_id).cloned();
        let Some(conn) = conn else { return false };
        match conn.outbound.try_send(msg) {
            Ok(()) => true,
            Err(_) => {
                self.state.evict_if_current(&conn).await;
                false
            }
        }
    }

    /// Fan out to every connection of `user_id`.
    pub async fn send_to_user(&self, user_id: i64, msg: Message) {
        let ids: Vec<String> =
            self.state.users.read().await.get(&user_id).cloned().unwrap_or_default().into_iter().collect();
        for id in ids {
            self.send_to_client(&id, msg.clone()).await;
        }
    }

    /// Broadcast to every connected client. Evictions are deferred to a
    /// second pass so the read-lock iteration never mutates the map it is
    /// walking (§9).
    pub async fn broadcast(&self, msg: Message) {
        let mut to_evict = Vec::new();
        {
            let clients = self.state.clients.read().await;
            for conn in clients.values() {
                if conn.outbound.try_send(msg.clone()).is_err() {
                    to_evict.push(conn.clone());
                }
            }
        }
        for conn in to_evict {
            self.state.evict_if_current(&conn).await;
        }
    }

    pub async fn send_to_session(&self, session_id: &str, msg: Message) {
        self.send_to_session_except(session_id, "", msg).await;
    }

    pub async fn send_to_session_except(&self, session_id: &str, exclude_id: &str, msg: Message) {
        let mut to_evict = Vec::new();
        {
            let clients = self.state.clients.read().await;
            for conn in clients.values().filter(|c| c.session_id == session_id && c.id != exclude_id) {
                if conn.outbound.try_send(msg.clone()).is_err() {
                    to_evict.push(conn.clone());
                }
            }
        }
        for conn in to_evict {
            self.state.evict_if_current(&conn).await;
        }
    }

    /// Drive one accepted WebSocket connection end to end: registers it,
    /// spawns its writer, runs its reader inline, then unregisters it.
    /// Generic over the transport so tests can drive it over an in-memory
    /// duplex stream instead of a live upgraded socket.
    pub async fn run_connection<S>(
        &self,
        ws: WebSocketStream<S>,
        connection_id: String,
        session_id: String,
        user_id: i64,
        display_name: String,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let _session = self.state.sessions.get_or_create(&session_id, user_id, &display_name).await;

        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let conn = Arc::new(Connection {
            id: connection_id,
            session_id,
            user_id,
            display_name,
            outbound: tx,
            cancel: cancel.clone(),
        });

        self.state.register(conn.clone()).await;

        let (sink, stream) = ws.split();
        let writer_cancel = cancel.clone();
        let writer = tokio::spawn(run_writer(sink, rx, writer_cancel));

        self.run_reader(stream, &conn, cancel).await;

        let _ = writer.await;
        self.state.unregister(&conn).await;
    }

    async fn run_reader<S>(
        &self,
        mut stream: futures_util::stream::SplitStream<WebSocketStream<S>>,
        conn: &Arc<Connection>,
        cancel: CancellationToken,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                res = tokio::time::timeout(READ_DEADLINE, stream.next()) => res,
            };
            match next {
                Ok(Some(Ok(Message::Text(text)))) => {
                    if text.len() > READ_LIMIT_BYTES {
                        warn!(connection_id = %conn.id, "frame exceeds read limit, dropping connection");
                        break;
                    }
                    self.state.stats.messages_received.incr();
                    (self.on_message)(IncomingMessage {
                        connection_id: conn.id.clone(),
                        session_id: conn.session_id.clone(),
                        sender_id: conn.user_id.to_string(),
                        payload: text.to_string(),
                    });
                }
                Ok(Some(Ok(Message::Pong(_)))) => {
                    // Read deadline is reinstated on every loop iteration, so a
                    // pong (or any other frame) implicitly resets it.
                }
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    debug!(connection_id = %conn.id, error = %e, "websocket read error");
                    break;
                }
                Err(_) => {
                    debug!(connection_id = %conn.id, "read deadline elapsed");
                    break;
                }
            }
        }
    }

    /// The cleanup endpoint (§4.4, §6): accept the connection, expect a
    /// single frame within 5s, then close with a normal-closure code. Never
    /// enters the engine's client map.
    pub async fn run_cleanup<S>(&self, mut ws: WebSocketStream<S>, connection_id: &str)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let _ = tokio::time::timeout(CLEANUP_GRACE, ws.next()).await;
        let _ = ws
            .close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
                code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                reason: "cleanup".into(),
            }))
            .await;
        self.state.unregister_by_id(connection_id).await;
    }
}

impl WsEngine {
    /// The upgrade endpoint (§4.4, §6): parse `connid`/`sessionid`/`cleanup`
    /// from the query string, negotiate the WebSocket handshake, and spawn
    /// the background task that drives the connection for as long as it
    /// lives. Returns the `101 Switching Protocols` response immediately;
    /// the caller does not await the connection's lifetime.
    pub fn handle_upgrade(&self, req: Request<Incoming>) -> Result<Response<RespBody>> {
        let query = req.uri().query().unwrap_or("");
        let params = parse_query(query);

        let key = req
            .headers()
            .get(header::SEC_WEBSOCKET_KEY)
            .ok_or_else(|| ProxyError::Engine(ErrorKind::BadRequest("missing Sec-WebSocket-Key".to_string())))?
            .to_str()
            .map_err(|_| ProxyError::Engine(ErrorKind::BadRequest("invalid Sec-WebSocket-Key".to_string())))?;
        let accept_key = derive_accept_key(key.as_bytes());

        let connection_id = params.get("connid").cloned().unwrap_or_else(generate_id);
        let session_id = params.get("sessionid").cloned().unwrap_or_else(generate_id);
        let cleanup = params.get("cleanup").map(|v| v == "1").unwrap_or(false);

        let engine = self.clone();
        tokio::spawn(async move {
            let upgraded = match hyper::upgrade::on(req).await {
                Ok(upgraded) => upgraded,
                Err(e) => {
                    warn!(error = %e, "websocket upgrade failed");
                    return;
                }
            };
            let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
            if cleanup {
                engine.run_cleanup(ws, &connection_id).await;
            } else {
                // User identity is outside this engine's remit (§4.4's
                // non-goal on auth plug-ins); callers that need an
                // authenticated session should gate the upgrade upstream.
                engine.run_connection(ws, connection_id, session_id, 0, String::new()).await;
            }
        });

        Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_ACCEPT, accept_key)
            .body(empty_body())
            .map_err(|e| ProxyError::Http(format!("failed to build upgrade response: {e}")))
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            if key.is_empty() {
                return None;
            }
            let value = parts.next().unwrap_or("");
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn generate_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("conn-{nanos:x}")
}

impl EngineState {
    async fn unregister_by_id(&self, id: &str) {
        let mut clients = self.clients.write().await;
        if let Some(conn) = clients.remove(id) {
            let mut users = self.users.write().await;
            remove_from_user_index(&mut users, &conn);
        }
    }
}

/// The writer task (§4.4): a 30s ping ticker, 10s write-deadline per
/// message, and message coalescing — additional already-queued text
/// messages are newline-joined into the same frame rather than sent one
/// frame per `send` (§9: resolved for text frames only; binary frames are
/// written individually and never coalesced).
async fn run_writer<S>(
    mut sink: futures_util::stream::SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if send_with_deadline(&mut sink, Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                let coalesced = coalesce(msg, &mut rx);
                if send_with_deadline(&mut sink, coalesced).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

/// Drain any messages already queued behind the first and, if they are all
/// text, join them with `\n` into a single frame. The outbound queue only
/// ever carries application text frames — pings are generated by the
/// writer's own ticker and closes are sent directly on the sink — so this
/// never has to decide what to do with a non-text frame in practice.
fn coalesce(first: Message, rx: &mut mpsc::Receiver<Message>) -> Message {
    let Message::Text(first_text) = first else { return first };
    let mut joined = first_text.to_string();
    while let Ok(Message::Text(more)) = rx.try_recv() {
        joined.push('\n');
        joined.push_str(&more);
    }
    Message::Text(joined.into())
}

async fn send_with_deadline<S>(
    sink: &mut futures_util::stream::SplitSink<WebSocketStream<S>, Message>,
    msg: Message,
) -> Result<(), ()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::time::timeout(WRITE_DEADLINE, sink.send(msg)).await.map_err(|_| ())?.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn test_connection(id: &str, user_id: i64, session_id: &str) -> (Arc<Connection>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let conn = Arc::new(Connection {
            id: id.to_string(),
            session_id: session_id.to_string(),
            user_id,
            display_name: "t".to_string(),
            outbound: tx,
            cancel: CancellationToken::new(),
        });
        (conn, rx)
    }

    #[tokio::test]
    async fn duplicate_id_replaces_and_cancels_old() {
        let engine = WsEngine::new(Arc::new(|_| {}));
        let (old, _old_rx) = test_connection("X", 1, "s1");
        let (new, _new_rx) = test_connection("X", 1, "s1");

        engine.state.register(old.clone()).await;
        assert_eq!(engine.current_connections().await, 1);

        engine.state.register(new.clone()).await;
        assert_eq!(engine.current_connections().await, 1);
        assert!(old.cancel.is_cancelled());
        assert!(!new.cancel.is_cancelled());

        let stored = engine.state.clients.read().await.get("X").cloned().unwrap();
        assert!(Arc::ptr_eq(&stored, &new));
    }

    #[tokio::test]
    async fn stale_unregister_does_not_evict_newer_connection() {
        let engine = WsEngine::new(Arc::new(|_| {}));
        let (old, _old_rx) = test_connection("X", 1, "s1");
        let (new, _new_rx) = test_connection("X", 1, "s1");

        engine.state.register(old.clone()).await;
        engine.state.register(new.clone()).await;

        // The old reader's deferred unregister must not remove the new
        // connection even though it shares the same id.
        engine.state.unregister(&old).await;
        assert_eq!(engine.current_connections().await, 1);

        engine.state.unregister(&new).await;
        assert_eq!(engine.current_connections().await, 0);
    }

    #[tokio::test]
    async fn broadcast_evicts_full_queue_without_blocking_others() {
        let engine = WsEngine::new(Arc::new(|_| {}));
        let (full, full_rx) = {
            let (tx, rx) = mpsc::channel(1);
            tx.try_send(Message::Text("filler".into())).unwrap(); // saturate capacity 1
            let conn = Arc::new(Connection {
                id: "full".to_string(),
                session_id: "s".to_string(),
                user_id: 1,
                display_name: "".to_string(),
                outbound: tx,
                cancel: CancellationToken::new(),
            });
            (conn, rx)
        };
        let (ok, mut ok_rx) = test_connection("ok", 2, "s");

        engine.state.register(full.clone()).await;
        engine.state.register(ok.clone()).await;

        engine.broadcast(Message::Text("hello".into())).await;

        assert_eq!(engine.current_connections().await, 1);
        assert!(engine.state.clients.read().await.get("ok").is_some());
        assert!(engine.state.clients.read().await.get("full").is_none());
        drop(full_rx);

        let received = ok_rx.try_recv().unwrap();
        assert_eq!(received, Message::Text("hello".into()));
    }

    #[tokio::test]
    async fn send_to_user_fans_out_to_all_their_connections() {
        let engine = WsEngine::new(Arc::new(|_| {}));
        let (c1, mut r1) = test_connection("c1", 7, "s1");
        let (c2, mut r2) = test_connection("c2", 7, "s2");
        engine.state.register(c1).await;
        engine.state.register(c2).await;

        engine.send_to_user(7, Message::Text("hi".into())).await;

        assert_eq!(r1.try_recv().unwrap(), Message::Text("hi".into()));
        assert_eq!(r2.try_recv().unwrap(), Message::Text("hi".into()));
    }

    #[tokio::test]
    async fn send_to_session_except_skips_excluded_connection() {
        let engine = WsEngine::new(Arc::new(|_| {}));
        let (a, mut ra) = test_connection("a", 1, "sess");
        let (b, mut rb) = test_connection("b", 2, "sess");
        engine.state.register(a).await;
        engine.state.register(b).await;

        engine.send_to_session_except("sess", "a", Message::Text("m".into())).await;

        assert!(ra.try_recv().is_err());
        assert_eq!(rb.try_recv().unwrap(), Message::Text("m".into()));
    }

    #[tokio::test]
    async fn removing_last_connection_drops_user_entry() {
        let engine = WsEngine::new(Arc::new(|_| {}));
        let (c, _rx) = test_connection("c", 5, "s");
        engine.state.register(c.clone()).await;
        engine.state.unregister(&c).await;
        assert!(engine.state.users.read().await.get(&5).is_none());
    }

    #[test]
    fn message_callback_receives_payload_shape() {
        let received: Arc<StdMutex<Vec<IncomingMessage>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = received.clone();
        let _cb: MessageCallback = Arc::new(move |msg| sink.lock().unwrap().push(msg));
        // Exercised end-to-end via `run_reader`/`run_connection`; this test
        // documents the callback's expected field shape (§6).
        let sample = IncomingMessage {
            connection_id: "X".to_string(),
            session_id: "s".to_string(),
            sender_id: "42".to_string(),
            payload: "hi".to_string(),
        };
        assert_eq!(sample.sender_id, "42");
        let _ = received;
    }
}
