//! The multi-listener server fabric (§4.1): binds every (address, port)
//! pair named across all configured listeners, accepts connections, enforces
//! per-listener protocol and domain policy, and drives each accepted
//! connection through a shared request handler.

mod peek;

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{header, Request, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use peek::{peek_outcome, peek_request_target, PeekOutcome};

use crate::config::{ListenerConfig, TimeoutConfig};
use crate::error::{ProxyError, Result};
use crate::pathutil::{domain_matches, host_without_port};
use crate::tls::build_rustls;

const GRACEFUL_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Guards against two `Fabric`s running at once within the same process.
/// Process-wide rather than per-instance since `start` is an associated
/// function: there is nothing else a re-entrant call could be checked
/// against.
static STARTED: AtomicBool = AtomicBool::new(false);

type RespBody = BoxBody<Bytes, hyper::Error>;
type HandlerFuture = Pin<Box<dyn Future<Output = std::result::Result<Response<RespBody>, hyper::Error>> + Send>>;

/// Per-connection facts a handler may need but that are outside the request
/// itself: peer address and whether the connection is TLS-terminated.
#[derive(Debug, Clone, Copy)]
pub struct ConnMeta {
    pub peer: SocketAddr,
    pub is_tls: bool,
}

/// The shared request handler every bound listener dispatches into. Boxed
/// and type-erased so the listener fabric stays independent of the routing
/// fabric's concrete handler representation.
pub type RequestHandler = Arc<dyn Fn(Request<Incoming>, ConnMeta) -> HandlerFuture + Send + Sync>;

fn empty_body() -> RespBody {
    Full::new(Bytes::new()).map_err(|never| match never {}).boxed()
}

fn redirect_response(location: &str) -> Response<RespBody> {
    let mut resp = Response::new(empty_body());
    *resp.status_mut() = StatusCode::MOVED_PERMANENTLY;
    if let Ok(value) = header::HeaderValue::from_str(location) {
        resp.headers_mut().insert(header::LOCATION, value);
    }
    resp
}

fn forbidden_response() -> Response<RespBody> {
    let mut resp = Response::new(empty_body());
    *resp.status_mut() = StatusCode::FORBIDDEN;
    resp
}

/// The running set of bound listeners. `Stop` requests graceful shutdown
/// with a 5s deadline; `Close` drops every acceptor task immediately.
pub struct Fabric {
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Fabric {
    /// `Start` (§4.1): compute the full (address, port) cross-product over
    /// every configured listener, bind each, and spawn one accept loop per
    /// bind. A bind failure is ignored (dual-stack fallback) iff it is
    /// `AddrInUse` on an IPv4 wildcard and the matching IPv6 wildcard bind
    /// on the same port already succeeded; any other bind error aborts and
    /// is returned after cancelling binds already spawned.
    pub async fn start(configs: Vec<ListenerConfig>, handler: RequestHandler, timeout: TimeoutConfig) -> Result<Self> {
        if STARTED.swap(true, Ordering::SeqCst) {
            return Err(ProxyError::AlreadyRunning);
        }

        let result = Self::bind_all(configs, handler, timeout).await;
        if result.is_err() {
            STARTED.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn bind_all(configs: Vec<ListenerConfig>, handler: RequestHandler, timeout: TimeoutConfig) -> Result<Self> {
        let tls_accept_timeout = Duration::from_secs(timeout.tls_handshake_secs);
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        let mut ipv6_wildcard_ports = std::collections::HashSet::new();

        for cfg in &configs {
            let tls_acceptor = if cfg.protocol == "https" {
                Some(Arc::new(build_rustls(cfg)?))
            } else {
                None
            };

            // IPv6 wildcards are bound before IPv4 ones on each port: a
            // dual-stack IPv6 wildcard bind (v6only=false) also serves v4
            // traffic, so trying it first lets the fallback below recognize
            // and ignore the IPv4 wildcard's subsequent `AddrInUse`.
            let mut addresses = cfg.addresses.clone();
            addresses.sort_by_key(|a| !a.contains(':'));

            for port in &cfg.ports {
                for address in &addresses {
                    let bind_addr = format!("{address}:{port}");
                    let socket_addr: SocketAddr = match bind_addr.parse() {
                        Ok(a) => a,
                        Err(e) => return Err(ProxyError::Config(format!("invalid listener address {bind_addr}: {e}"))),
                    };

                    match bind_listener(socket_addr, cfg.optimize_cloudflare) {
                        Ok(listener) => {
                            if socket_addr.is_ipv6() && socket_addr.ip().is_unspecified() {
                                ipv6_wildcard_ports.insert(*port);
                            }
                            let task = spawn_accept_loop(
                                listener,
                                cfg.clone(),
                                tls_acceptor.clone(),
                                handler.clone(),
                                cancel.clone(),
                                tls_accept_timeout,
                            );
                            tasks.push(task);
                        }
                        Err(e) if is_addr_in_use(&e) && socket_addr.is_ipv4() && socket_addr.ip().is_unspecified() && ipv6_wildcard_ports.contains(port) => {
                            debug!(%bind_addr, "ignoring address-in-use: dual-stack IPv6 wildcard already bound this port");
                        }
                        Err(e) => {
                            cancel.cancel();
                            for t in tasks {
                                t.abort();
                            }
                            return Err(ProxyError::Io(e));
                        }
                    }
                }
            }
        }

        Ok(Self { cancel, tasks })
    }

    /// `Stop`: request graceful shutdown, waiting up to 5s for in-flight
    /// accept loops to observe cancellation before forcing them closed.
    pub async fn stop(self) {
        self.cancel.cancel();
        let deadline = tokio::time::sleep(GRACEFUL_SHUTDOWN_GRACE);
        tokio::pin!(deadline);
        for task in self.tasks {
            tokio::select! {
                _ = task => {}
                _ = &mut deadline => {
                    break;
                }
            }
        }
        STARTED.store(false, Ordering::SeqCst);
    }

    /// `Close`: force-abort every acceptor task immediately, no grace period.
    pub fn close(self) {
        self.cancel.cancel();
        for task in self.tasks {
            task.abort();
        }
        STARTED.store(false, Ordering::SeqCst);
    }
}

fn is_addr_in_use(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::AddrInUse
}

/// Bind one (address, port) pair. `optimize_cloudflare` sets
/// `TCP_MAXSEG=1220` on the listening socket per §6's listener surface.
fn bind_listener(addr: SocketAddr, optimize_cloudflare: bool) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_nonblocking(true)?;
    #[cfg(unix)]
    if optimize_cloudflare {
        let _ = socket.set_mss(1220);
    }
    #[cfg(not(unix))]
    let _ = optimize_cloudflare;

    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

fn spawn_accept_loop(
    listener: TcpListener,
    cfg: ListenerConfig,
    tls_acceptor: Option<Arc<TlsAcceptor>>,
    handler: RequestHandler,
    cancel: CancellationToken,
    tls_accept_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    let cfg = Arc::new(cfg);
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                res = listener.accept() => res,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept error");
                    continue;
                }
            };

            let cfg = cfg.clone();
            let tls_acceptor = tls_acceptor.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    serve_connection(stream, peer, cfg, tls_acceptor, handler, tls_accept_timeout).await
                {
                    debug!(%peer, error = %e, "connection ended with error");
                }
            });
        }
    })
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    cfg: Arc<ListenerConfig>,
    tls_acceptor: Option<Arc<TlsAcceptor>>,
    handler: RequestHandler,
    tls_accept_timeout: Duration,
) -> std::io::Result<()> {
    let _ = stream.set_nodelay(true);

    match tls_acceptor {
        None => {
            let service = make_service(cfg, false, peer, handler);
            let builder = ConnBuilder::new(TokioExecutor::new());
            let _ = builder.serve_connection_with_upgrades(TokioIo::new(stream), service).await;
            Ok(())
        }
        Some(acceptor) => {
            let mut stream = stream;
            match peek_outcome(&mut stream).await? {
                PeekOutcome::Tls => {
                    let tls_stream = match tokio::time::timeout(tls_accept_timeout, acceptor.accept(stream)).await {
                        Ok(Ok(s)) => s,
                        Ok(Err(e)) => {
                            debug!(%peer, error = %e, "tls handshake failed");
                            return Ok(());
                        }
                        Err(_) => {
                            debug!(%peer, "tls handshake timed out");
                            return Ok(());
                        }
                    };
                    let service = make_service(cfg, true, peer, handler);
                    let builder = ConnBuilder::new(TokioExecutor::new());
                    let _ = builder.serve_connection_with_upgrades(TokioIo::new(tls_stream), service).await;
                }
                PeekOutcome::PlainHttp => {
                    answer_mis_protocol_redirect(stream, peer, &cfg).await;
                }
                PeekOutcome::Unknown => {
                    // Neither a TLS record nor a recognized HTTP method prefix;
                    // nothing meaningful to answer, drop the connection.
                }
            }
            Ok(())
        }
    }
}

/// Mis-protocol redirect (§4.1): a plain-text HTTP request arrived on a
/// TLS listener. Answer with a single `301` to the HTTPS equivalent and
/// close, without engaging the full HTTP server machinery.
async fn answer_mis_protocol_redirect(mut stream: TcpStream, peer: SocketAddr, cfg: &ListenerConfig) {
    let port = cfg.ports.first().copied().unwrap_or(443);
    let peeked = peek_request_target(&mut stream).await.unwrap_or_default();
    let host = peeked
        .host
        .as_deref()
        .map(host_without_port)
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string());
    let location = mis_protocol_location(&host, port, &peeked.path);
    let body = format!(
        "HTTP/1.1 301 Moved Permanently\r\nLocation: {location}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    );
    use tokio::io::AsyncWriteExt;
    let _ = stream.write_all(body.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// `https://{host}[:{port}]{path}` (§4.1): the port is omitted for the
/// default HTTPS port 443.
fn mis_protocol_location(host: &str, port: u16, path: &str) -> String {
    if port == 443 {
        format!("https://{host}{path}")
    } else {
        format!("https://{host}:{port}{path}")
    }
}

fn make_service(
    cfg: Arc<ListenerConfig>,
    is_tls: bool,
    peer: SocketAddr,
    handler: RequestHandler,
) -> impl hyper::service::Service<Request<Incoming>, Response = Response<RespBody>, Error = hyper::Error, Future = HandlerFuture>
{
    service_fn(move |req: Request<Incoming>| {
        let cfg = cfg.clone();
        let handler = handler.clone();
        let meta = ConnMeta { peer, is_tls };
        Box::pin(async move {
            if let Some(resp) = check_domain_policy(&req, &cfg) {
                return Ok(resp);
            }
            if !is_tls {
                if let Some(redirect_port) = cfg.https_redirect_port {
                    if cfg.https_redirect {
                        return Ok(https_redirect_response(&req, redirect_port));
                    }
                }
            }

            let mut resp = handler(req, meta).await?;
            if is_tls && cfg.http3 {
                if let Some(port) = cfg.ports.first() {
                    if let Ok(value) = header::HeaderValue::from_str(&format!("h3=\":{port}\"; ma=86400")) {
                        resp.headers_mut().insert(header::HeaderName::from_static("alt-svc"), value);
                    }
                }
            }
            Ok(resp)
        }) as HandlerFuture
    })
}

/// Domain validation (§4.1): strip `:port` from `Host`, deny if any
/// disallow pattern matches, else allow unless the allow list is non-empty
/// and nothing in it matches.
fn check_domain_policy(req: &Request<Incoming>, cfg: &ListenerConfig) -> Option<Response<RespBody>> {
    if cfg.domains_allow.is_empty() && cfg.domains_block.is_empty() {
        return None;
    }
    let host = req.headers().get(header::HOST).and_then(|v| v.to_str().ok())?;
    let host = host_without_port(host);

    if cfg.domains_block.iter().any(|pattern| domain_matches(pattern, host)) {
        return Some(forbidden_response());
    }
    if !cfg.domains_allow.is_empty() && !cfg.domains_allow.iter().any(|pattern| domain_matches(pattern, host)) {
        return Some(forbidden_response());
    }
    None
}

/// HTTPS redirect (§4.1) for HTTP listeners configured with a redirect port.
fn https_redirect_response(req: &Request<Incoming>, redirect_port: u16) -> Response<RespBody> {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(host_without_port)
        .unwrap_or("localhost");
    let uri = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let location = format!("https://{host}:{redirect_port}{uri}");
    redirect_response(&location)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mis_protocol_location_omits_default_port() {
        assert_eq!(mis_protocol_location("x", 443, "/"), "https://x/");
        assert_eq!(mis_protocol_location("x", 8443, "/a"), "https://x:8443/a");
    }

    fn http_cfg() -> ListenerConfig {
        ListenerConfig {
            protocol: "http".to_string(),
            ports: vec![0],
            addresses: vec!["127.0.0.1".to_string()],
            ssl_cert_path: None,
            ssl_key_path: None,
            ssl_cert_data: None,
            ssl_key_data: None,
            domain_certs: Vec::new(),
            optimize_cloudflare: false,
            https_redirect_port: None,
            https_redirect: true,
            http3: false,
            domains_allow: Vec::new(),
            domains_block: Vec::new(),
        }
    }

    fn noop_handler() -> RequestHandler {
        Arc::new(|_req: Request<Incoming>, _meta: ConnMeta| {
            Box::pin(async move { Ok(Response::new(empty_body())) }) as HandlerFuture
        })
    }

    #[tokio::test]
    #[serial_test::serial(fabric_singleton)]
    async fn re_entrant_start_is_rejected_while_running() {
        let fabric = Fabric::start(vec![http_cfg()], noop_handler(), TimeoutConfig::default()).await.unwrap();
        let second = Fabric::start(vec![http_cfg()], noop_handler(), TimeoutConfig::default()).await;
        assert!(matches!(second, Err(ProxyError::AlreadyRunning)));
        fabric.stop().await;
    }

    #[tokio::test]
    #[serial_test::serial(fabric_singleton)]
    async fn start_is_allowed_again_after_stop() {
        let fabric = Fabric::start(vec![http_cfg()], noop_handler(), TimeoutConfig::default()).await.unwrap();
        fabric.stop().await;
        let fabric2 = Fabric::start(vec![http_cfg()], noop_handler(), TimeoutConfig::default()).await.unwrap();
        fabric2.close();
    }

    #[tokio::test]
    #[serial_test::serial(fabric_singleton)]
    async fn failed_start_clears_the_guard() {
        let mut bad_cfg = http_cfg();
        bad_cfg.protocol = "https".to_string(); // no TLS material configured: build_rustls fails
        assert!(Fabric::start(vec![bad_cfg], noop_handler(), TimeoutConfig::default()).await.is_err());

        let fabric = Fabric::start(vec![http_cfg()], noop_handler(), TimeoutConfig::default()).await.unwrap();
        fabric.close();
    }
}
