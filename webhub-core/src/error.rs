use http::StatusCode;
use thiserror::Error;

/// Errors that can occur anywhere in webhub-core: configuration, I/O, TLS
/// setup, and the HTTP-visible error kinds any engine can raise (see
/// [`ErrorKind`]).
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    #[error("No private key found in key file")]
    NoPrivateKey,

    #[error("No listeners configured")]
    NoListeners,

    #[error("already running")]
    AlreadyRunning,

    #[error(transparent)]
    Engine(#[from] ErrorKind),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

/// The HTTP-visible error kinds raised by the service engines (§7 of the
/// design spec). Every engine surfaces failures as one of these; the
/// listener fabric turns them directly into a response with no structured
/// body (handlers may decorate further upstream).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("range not satisfiable")]
    RangeNotSatisfiable,
    #[error("bad gateway")]
    BadGateway,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            ErrorKind::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            ErrorKind::BadGateway => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&ErrorKind> for StatusCode {
    fn from(e: &ErrorKind) -> StatusCode {
        e.status_code()
    }
}
