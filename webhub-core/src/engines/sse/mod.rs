//! The SSE engine (§4.5): one outbound stream per client, each driven by a
//! bounded (capacity 10) string channel under an RW-locked map. The HTTP
//! body itself is a second, small channel of already-framed bytes so the
//! engine's fan-out API never has to know about `hyper`'s body types.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{header, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::Request;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::{ProxyError, Result};
use crate::stats::{now_ms, SseStats};

const CHANNEL_CAPACITY: usize = 10;
const BODY_BUFFER: usize = 16;

type RespBody = BoxBody<Bytes, std::convert::Infallible>;
type FrameResult = std::result::Result<Frame<Bytes>, std::convert::Infallible>;

/// A registered client: its payload sender plus the cancellation token tied
/// to its request context, so the stream can be torn down from outside the
/// client's own payload channel (§4.5's `context_done` close reason).
struct SseClient {
    sender: mpsc::Sender<String>,
    cancel: CancellationToken,
}

type ClientMap = HashMap<String, SseClient, ahash::RandomState>;

#[derive(Debug, Clone)]
pub struct SseConfig {
    pub keepalive: Duration,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self { keepalive: Duration::from_secs(15) }
    }
}

/// The SSE engine: a per-mount client map plus stats. Cloning the `Arc`
/// handle is how the HTTP handler and any broadcaster share it.
pub struct SseEngine {
    clients: RwLock<ClientMap>,
    stats: SseStats,
    config: SseConfig,
}

impl SseEngine {
    pub fn new(config: SseConfig) -> Arc<Self> {
        Arc::new(Self { clients: RwLock::new(ClientMap::default()), stats: SseStats::default(), config })
    }

    pub fn stats(&self) -> &SseStats {
        &self.stats
    }

    pub async fn current_connections(&self) -> usize {
        self.clients.read().await.len()
    }

    /// HTTP entry point: derive the client id from the `clientId` query
    /// parameter (generating one if absent) and accept the stream.
    pub async fn handle_stream(self: &Arc<Self>, req: Request<Incoming>) -> Result<Response<RespBody>> {
        let client_id = req
            .uri()
            .query()
            .and_then(|q| q.split('&').find_map(|pair| pair.strip_prefix("clientId=")))
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(generate_client_id);
        self.accept(client_id).await
    }

    /// Accept a new stream for `client_id`. Returns the full response
    /// (headers plus body) immediately; the body keeps writing frames from
    /// a spawned task for the stream's lifetime.
    pub async fn accept(self: &Arc<Self>, client_id: String) -> Result<Response<RespBody>> {
        let (payload_tx, payload_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (frame_tx, frame_rx) = mpsc::channel::<FrameResult>(BODY_BUFFER);
        let cancel = CancellationToken::new();

        let connected =
            format!("event: message\ndata: {{\"type\":\"connected\",\"clientId\":\"{client_id}\"}}\n\n");
        if frame_tx.send(Ok(Frame::data(Bytes::from(connected)))).await.is_err() {
            self.stats.rejected_connections.incr();
            return Err(ProxyError::Http("sse stream closed before first write".to_string()));
        }

        self.clients
            .write()
            .await
            .insert(client_id.clone(), SseClient { sender: payload_tx, cancel: cancel.clone() });
        self.stats.total_connections.incr();
        self.stats.current_connections.incr();
        self.stats.last_connected_ms.touch(now_ms());

        let engine = self.clone();
        tokio::spawn(engine.drive(client_id, payload_rx, frame_tx, cancel));

        let body = StreamBody::new(ReceiverStream::new(frame_rx)).boxed();
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache, no-transform")
            .header(header::CONNECTION, "keep-alive")
            .header("X-Accel-Buffering", "no")
            .header(header::TRANSFER_ENCODING, "chunked")
            .header(header::CONTENT_ENCODING, "identity")
            .body(body)
            .map_err(|e| ProxyError::Http(format!("failed to build sse response: {e}")))
    }

    /// The per-client loop (§4.5): keep-alive ticker plus the client's own
    /// payload channel, each write flushed as its own `StreamBody` frame so
    /// a blocked reader cannot stall other clients.
    async fn drive(
        self: Arc<Self>,
        client_id: String,
        mut payload_rx: mpsc::Receiver<String>,
        frame_tx: mpsc::Sender<FrameResult>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.keepalive);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let frame = format!(
                        "event: close\ndata: {{\"type\":\"close\",\"reason\":\"context_done\",\"timestamp\":\"{}\"}}\n\n",
                        rfc3339_now(),
                    );
                    let _ = frame_tx.send(Ok(Frame::data(Bytes::from(frame)))).await;
                    break;
                }
                _ = ticker.tick() => {
                    let frame = format!(
                        "event: keepalive\ndata: {{\"type\":\"keepalive\",\"timestamp\":\"{}\"}}\n\n",
                        rfc3339_now(),
                    );
                    if frame_tx.send(Ok(Frame::data(Bytes::from(frame)))).await.is_err() {
                        break;
                    }
                }
                msg = payload_rx.recv() => {
                    match msg {
                        Some(payload) => {
                            let frame = format!("event: message\ndata: {payload}\n\n");
                            if frame_tx.send(Ok(Frame::data(Bytes::from(frame)))).await.is_err() {
                                break;
                            }
                            self.stats.messages_sent.incr();
                        }
                        None => {
                            let frame = format!(
                                "event: close\ndata: {{\"type\":\"close\",\"reason\":\"channel_closed\",\"timestamp\":\"{}\"}}\n\n",
                                rfc3339_now(),
                            );
                            let _ = frame_tx.send(Ok(Frame::data(Bytes::from(frame)))).await;
                            break;
                        }
                    }
                }
            }
        }

        self.remove(&client_id).await;
    }

    async fn remove(&self, client_id: &str) {
        if self.clients.write().await.remove(client_id).is_some() {
            self.stats.current_connections.decr();
            self.stats.last_disconnected_ms.touch(now_ms());
        }
    }

    /// Cancel one client's request context, ending its stream with
    /// `event: close` / `reason: context_done` rather than silently
    /// dropping the channel. Returns whether a client was found.
    pub async fn disconnect_client(&self, client_id: &str) -> bool {
        let Some(client) = self.clients.read().await.get(client_id).map(|c| c.cancel.clone()) else {
            return false;
        };
        client.cancel();
        true
    }

    /// Non-blocking send to one client. Evicts the client on a full or
    /// closed channel rather than blocking the caller.
    pub async fn send_to_client(&self, client_id: &str, payload: String) -> bool {
        let sender = self.clients.read().await.get(client_id).map(|c| c.sender.clone());
        let Some(sender) = sender else { return false };
        match sender.try_send(payload) {
            Ok(()) => true,
            Err(_) => {
                self.remove(client_id).await;
                false
            }
        }
    }

    /// Broadcast to every connected client; same eviction rule, deferred to
    /// a second pass so the read-lock iteration never mutates the map it
    /// walks. Returns the number of clients the message was queued to.
    pub async fn broadcast(&self, payload: String) -> usize {
        let mut sent = 0;
        let mut to_evict = Vec::new();
        {
            let clients = self.clients.read().await;
            for (id, client) in clients.iter() {
                match client.sender.try_send(payload.clone()) {
                    Ok(()) => sent += 1,
                    Err(_) => to_evict.push(id.clone()),
                }
            }
        }
        for id in to_evict {
            self.remove(&id).await;
        }
        sent
    }

    /// Cancel every client's request context (each stream ends with
    /// `event: close` / `reason: context_done`) and clear the map.
    pub async fn shutdown(&self) {
        let mut clients = self.clients.write().await;
        for client in clients.values() {
            client.cancel.cancel();
        }
        clients.clear();
    }
}

/// RFC3339 UTC timestamp from the current wall clock, hand-rolled from the
/// same civil-calendar arithmetic the media engine uses for HTTP dates —
/// deliberately not pulling in a date/time crate for one format call.
fn rfc3339_now() -> String {
    rfc3339(now_ms() / 1000)
}

fn rfc3339(unix_secs: u64) -> String {
    let days_since_epoch = unix_secs / 86400;
    let secs_of_day = unix_secs % 86400;
    let (hour, min, sec) = (secs_of_day / 3600, (secs_of_day % 3600) / 60, secs_of_day % 60);

    let mut days = days_since_epoch as i64;
    let mut year = 1970i64;
    loop {
        let leap = is_leap(year);
        let year_days = if leap { 366 } else { 365 };
        if days < year_days {
            break;
        }
        days -= year_days;
        year += 1;
    }
    let month_lengths = month_lengths(is_leap(year));
    let mut month = 0usize;
    while days >= month_lengths[month] {
        days -= month_lengths[month];
        month += 1;
    }
    let day = days + 1;

    format!("{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z", year, month + 1, day, hour, min, sec)
}

fn is_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn generate_client_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("sse-{nanos:x}")
}

fn month_lengths(leap: bool) -> [i64; 12] {
    [31, if leap { 29 } else { 28 }, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_formats_known_epoch() {
        assert_eq!(rfc3339(0), "1970-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn accept_registers_client_and_sends_connected_event() {
        let engine = SseEngine::new(SseConfig::default());
        let resp = engine.accept("c1".to_string()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "text/event-stream");
        assert_eq!(engine.current_connections().await, 1);
    }

    #[tokio::test]
    async fn send_to_client_delivers_to_own_channel() {
        let engine = SseEngine::new(SseConfig::default());
        let _resp = engine.accept("c1".to_string()).await.unwrap();
        assert!(engine.send_to_client("c1", "hello".to_string()).await);
        assert!(!engine.send_to_client("unknown", "hello".to_string()).await);
    }

    #[tokio::test]
    async fn broadcast_counts_delivered_clients() {
        let engine = SseEngine::new(SseConfig::default());
        let _a = engine.accept("a".to_string()).await.unwrap();
        let _b = engine.accept("b".to_string()).await.unwrap();
        assert_eq!(engine.broadcast("hi".to_string()).await, 2);
    }

    #[tokio::test]
    async fn shutdown_clears_the_client_map() {
        let engine = SseEngine::new(SseConfig::default());
        let _a = engine.accept("a".to_string()).await.unwrap();
        engine.shutdown().await;
        assert_eq!(engine.current_connections().await, 0);
    }

    #[tokio::test]
    async fn disconnect_client_sends_context_done_and_evicts() {
        let engine = SseEngine::new(SseConfig::default());
        let resp = engine.accept("c1".to_string()).await.unwrap();
        assert!(engine.disconnect_client("c1").await);
        assert!(!engine.disconnect_client("unknown").await);

        let mut body = resp.into_body();
        let _connected = body.frame().await.unwrap().unwrap();
        let close_frame = body.frame().await.unwrap().unwrap();
        let data = close_frame.into_data().unwrap();
        let text = String::from_utf8(data.to_vec()).unwrap();
        assert!(text.contains("event: close"));
        assert!(text.contains("\"reason\":\"context_done\""));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.current_connections().await, 0);
    }
}
