//! The composition root (§2, §6): turns a loaded [`Config`] into a running
//! server. One engine instance is built per configured route and registered
//! into a shared [`Router`]; the listener fabric's single request handler
//! dispatches every accepted request through it. This module is the only
//! place that wires the otherwise-independent engines together.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::{header, Method, Request, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use tracing::{error, info, warn};

use crate::config::{Config, RouteConfig};
use crate::engines::media::{self, MediaConfig};
use crate::engines::proxy::{ProxyConfig, ProxyEngine};
use crate::engines::sse::{SseConfig as SseEngineConfig, SseEngine};
use crate::engines::websocket::{IncomingMessage, WsEngine};
use crate::error::{ErrorKind, ProxyError, Result};
use crate::fs::{Filesystem, RealFilesystem};
use crate::listener::{ConnMeta, Fabric, RequestHandler};
use crate::pathutil::DEFAULT_MEDIA_EXTENSIONS;
use crate::routing::{PathPrefix, Router};
use crate::spa::{self, NoSessionResolver, SessionResolver, SpaConfig};
use crate::stats::Gauge;
use crate::telemetry;

type RespBody = BoxBody<Bytes, hyper::Error>;
type InfallibleBody = BoxBody<Bytes, std::convert::Infallible>;
type HandlerFuture = Pin<Box<dyn Future<Output = std::result::Result<Response<RespBody>, hyper::Error>> + Send>>;

/// One configured route's engine, plus whatever else its dispatch needs
/// that the router's stripped path can't carry (the proxy's own matched
/// prefix, the SPA/media route's filesystem root).
enum RouteEngine {
    WebSocket(WsEngine),
    Sse(Arc<SseEngine>),
    Proxy { engine: ProxyEngine, matched_prefix: String },
    Media { config: MediaConfig, fs: Arc<dyn Filesystem> },
    Spa { config: SpaConfig, fs: Arc<dyn Filesystem>, session: Arc<dyn SessionResolver> },
}

/// Build the routing table (§4.2) from the configured routes: one engine
/// per entry, registered per its own mount-point semantics (exact for
/// WebSocket/SSE upgrade endpoints, prefix for proxy/media/SPA).
fn build_router(routes: &[RouteConfig]) -> Router<Arc<RouteEngine>> {
    let mut router = Router::new();

    for route in routes {
        match route {
            RouteConfig::WebSocket(cfg) => {
                let on_message: crate::engines::websocket::MessageCallback = Arc::new(|msg: IncomingMessage| {
                    tracing::debug!(
                        connection_id = %msg.connection_id,
                        session_id = %msg.session_id,
                        "websocket message received"
                    );
                });
                let engine = Arc::new(RouteEngine::WebSocket(WsEngine::new(on_message)));
                router.register_exact(cfg.path.clone(), None, engine);
            }
            RouteConfig::Sse(cfg) => {
                let engine_cfg =
                    SseEngineConfig { keepalive: std::time::Duration::from_secs(cfg.keepalive_secs.max(5)) };
                let engine = Arc::new(RouteEngine::Sse(SseEngine::new(engine_cfg)));
                router.register_exact(cfg.path.clone(), Some(vec![Method::GET]), engine);
            }
            RouteConfig::Proxy(cfg) => {
                let proxy_cfg = ProxyConfig {
                    targets: cfg.targets.iter().filter_map(|t| t.parse().ok()).collect(),
                    policy: cfg.policy,
                    strip_prefix: cfg.strip_prefix,
                    add_prefix: cfg.add_prefix.clone(),
                    preserve_host: cfg.preserve_host,
                    custom_headers: cfg
                        .custom_headers
                        .iter()
                        .filter_map(|(k, v)| Some((k.parse().ok()?, v.parse().ok()?)))
                        .collect(),
                    deny_headers: cfg.deny_headers.iter().filter_map(|h| h.parse().ok()).collect(),
                };
                let engine = Arc::new(RouteEngine::Proxy {
                    engine: ProxyEngine::new(proxy_cfg),
                    matched_prefix: cfg.path.clone(),
                });
                if cfg.forward {
                    router.register_forward_prefix(cfg.path.clone(), None, engine);
                } else {
                    router.register_prefix(cfg.path.clone(), false, None, engine);
                }
            }
            RouteConfig::Media(cfg) => {
                let allowed_extensions = cfg
                    .allowed_extensions
                    .clone()
                    .unwrap_or_else(|| DEFAULT_MEDIA_EXTENSIONS.iter().map(|s| s.to_string()).collect());
                let media_cfg = MediaConfig {
                    allowed_extensions,
                    buffer_size: cfg.buffer_size,
                    caching_enabled: cfg.caching_enabled,
                    cache_max_age: cfg.cache_max_age,
                };
                let fs: Arc<dyn Filesystem> = Arc::new(RealFilesystem::new(cfg.root.clone()));
                let engine = Arc::new(RouteEngine::Media { config: media_cfg, fs });
                router.register_prefix(cfg.path.clone(), true, None, engine);
            }
            RouteConfig::Spa(cfg) => {
                let spa_cfg = SpaConfig {
                    mount_url: cfg.mount_url.clone(),
                    default_route: cfg.default_route.clone(),
                    virtual_segment: cfg.virtual_segment.clone(),
                    listener_prefix: PathPrefix::new(""),
                    cache_max_age: cfg.cache_max_age,
                    auth_skip: cfg.auth_skip.clone(),
                    login_path: cfg.login_path.clone(),
                };
                let fs: Arc<dyn Filesystem> = Arc::new(RealFilesystem::new(cfg.root.clone()));
                let engine = Arc::new(RouteEngine::Spa {
                    config: spa_cfg,
                    fs,
                    session: Arc::new(NoSessionResolver),
                });
                router.register_prefix(cfg.mount_url.clone(), false, None, engine);
            }
        }
    }

    router
}

/// Dispatch one request to its matched engine, translating the engine's own
/// result type into the listener fabric's `RespBody`.
async fn dispatch_to_engine(
    engine: &RouteEngine,
    req: Request<Incoming>,
    handler_path: &str,
    meta: ConnMeta,
) -> Response<RespBody> {
    match engine {
        RouteEngine::WebSocket(ws) => match ws.handle_upgrade(req) {
            Ok(resp) => rebox_infallible(resp),
            Err(err) => error_response(&err),
        },
        RouteEngine::Sse(sse) => match sse.handle_stream(req).await {
            Ok(resp) => rebox_infallible(resp),
            Err(err) => error_response(&err),
        },
        RouteEngine::Proxy { engine, matched_prefix } => {
            let client_addr = meta.peer.to_string();
            match engine.forward(req, matched_prefix, &client_addr, meta.is_tls).await {
                Ok(resp) => resp,
                Err(err) => error_response(&err),
            }
        }
        RouteEngine::Media { config, fs } => {
            let method = req.method().clone();
            let range_header =
                req.headers().get(header::RANGE).and_then(|v| v.to_str().ok()).map(str::to_string);
            match media::serve(&method, range_header.as_deref(), handler_path, fs, config).await {
                Ok(resp) => rebox_infallible(resp),
                Err(err) => error_response(&err),
            }
        }
        RouteEngine::Spa { config, fs, session } => {
            serve_spa(handler_path, config, fs, session.as_ref()).await
        }
    }
}

/// The SPA route's HTTP-facing wrapper (§4.3): resolve the storage path,
/// gate on the session resolver for HTML, read through the filesystem
/// adapter, and patch relative asset references when the app is mounted
/// under a sub-path.
async fn serve_spa(
    request_path: &str,
    config: &SpaConfig,
    fs: &Arc<dyn Filesystem>,
    session: &dyn SessionResolver,
) -> Response<RespBody> {
    let storage_path = match spa::resolve_storage_path(request_path, config) {
        Ok(p) => p,
        Err(err) => return error_response(&err),
    };

    if !fs.exists(&storage_path).await || fs.is_dir(&storage_path).await {
        return error_response(&ProxyError::Engine(ErrorKind::NotFound));
    }

    if spa::requires_session(&storage_path, request_path, config) && session.resolve(request_path).is_none() {
        return redirect_response(&config.login_path);
    }

    let bytes = match fs.read(&storage_path).await {
        Ok(b) => b,
        Err(err) => return error_response(&err),
    };

    let content_type = spa::content_type_for(&storage_path);
    let cache_control = spa::cache_control_for(&storage_path, config);

    let body_bytes = if content_type.starts_with("text/html") {
        let prefix = PathPrefix::new(config.mount_url.clone());
        Bytes::from(prefix.patch_html(&String::from_utf8_lossy(&bytes)).into_bytes())
    } else {
        Bytes::from(bytes)
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, cache_control)
        .body(full_body(body_bytes))
        .unwrap_or_else(|_| error_response(&ProxyError::Http("failed to build spa response".to_string())))
}

fn empty_body() -> RespBody {
    Full::new(Bytes::new()).map_err(|never: std::convert::Infallible| match never {}).boxed()
}

fn full_body(data: Bytes) -> RespBody {
    Full::new(data).map_err(|never: std::convert::Infallible| match never {}).boxed()
}

fn rebox_infallible(resp: Response<InfallibleBody>) -> Response<RespBody> {
    let (parts, body) = resp.into_parts();
    Response::from_parts(parts, body.map_err(|never| match never {}).boxed())
}

/// Turn an engine failure into a response with no body, per §7: the
/// listener fabric never invents a structured error payload on an engine's
/// behalf.
fn error_response(err: &ProxyError) -> Response<RespBody> {
    let status = match err {
        ProxyError::Engine(kind) => kind.status_code(),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut resp = Response::new(empty_body());
    *resp.status_mut() = status;
    resp
}

fn not_found_response() -> Response<RespBody> {
    let mut resp = Response::new(empty_body());
    *resp.status_mut() = StatusCode::NOT_FOUND;
    resp
}

fn redirect_response(location: &str) -> Response<RespBody> {
    let mut resp = Response::new(empty_body());
    *resp.status_mut() = StatusCode::FOUND;
    if let Ok(value) = header::HeaderValue::from_str(location) {
        resp.headers_mut().insert(header::LOCATION, value);
    }
    resp
}

/// Build the listener fabric's single request handler (§4.1/§4.2): dispatch
/// by the routing table, or `404` when nothing matches.
fn build_handler(router: Arc<Router<Arc<RouteEngine>>>) -> RequestHandler {
    Arc::new(move |req: Request<Incoming>, meta: ConnMeta| {
        let router = router.clone();
        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let Some(dispatch) = router.dispatch(&path, &method) else {
                return Ok(not_found_response());
            };
            let engine = dispatch.handler.clone();
            let handler_path = dispatch.path.clone();
            let mut req = req;
            if let Some(original) = dispatch.original_path.as_deref() {
                if let Ok(value) = header::HeaderValue::from_str(original) {
                    req.headers_mut().insert("x-original-path", value);
                }
            }
            Ok(dispatch_to_engine(&engine, req, &handler_path, meta).await)
        }) as HandlerFuture
    })
}

/// Start the dedicated metrics/health server (§6) if a port is configured.
/// `bound_listeners` is a coarse readiness gauge: one tick per configured
/// listener, not per socket actually bound (the fabric doesn't report binds
/// back out, so this is a static approximation of "configured capacity").
async fn maybe_start_telemetry(config: &Config) {
    let Some(port) = config.telemetry.metrics_port else { return };

    let (_metrics, registry) = match telemetry::init_metrics() {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "failed to initialize metrics, observability server not started");
            return;
        }
    };

    let bound_listeners = Arc::new(Gauge::default());
    for _ in 0..config.listeners.len() {
        bound_listeners.incr();
    }

    tokio::spawn(async move {
        if let Err(e) = telemetry::start_observability_server(port, registry, bound_listeners).await {
            error!(error = %e, "observability server exited with error");
        }
    });
}

/// Wait for `SIGTERM`/`SIGINT` (or just Ctrl+C on platforms without
/// `SIGTERM`), mirroring the graceful-shutdown trigger the observability
/// server's own loop already uses.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// The binary's entry point: build the routing table from `config.routes`,
/// optionally start the metrics/health server, bind every configured
/// listener, and run until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let router = Arc::new(build_router(&config.routes));
    let handler = build_handler(router);

    maybe_start_telemetry(&config).await;

    let fabric = Fabric::start(config.listeners.clone(), handler, config.timeout.clone()).await?;
    info!(listeners = config.listeners.len(), routes = config.routes.len(), "webhub started");

    shutdown_signal().await;
    info!("shutdown signal received, draining connections");
    fabric.stop().await;
    Ok(())
}
