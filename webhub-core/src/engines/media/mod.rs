//! The range-serving media engine (§4.7): serves byte-range requests for
//! media files through the shared [`crate::fs::Filesystem`] adapter, with
//! caching metadata and the three `Range:` forms.

pub mod range;

pub use range::{parse_range_header, RangeError, RangeSpec};

use bytes::Bytes;
use http::{header, HeaderValue, Method, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full, StreamBody};
use hyper::body::Frame;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use crate::error::{ErrorKind, ProxyError, Result};
use crate::fs::Filesystem;
use crate::pathutil::{extension_of, is_allowed_extension, mime_type_for};

type RespBody = BoxBody<Bytes, std::convert::Infallible>;

#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Extensions permitted to be served; anything else is `403`.
    pub allowed_extensions: Vec<String>,
    /// Chunk size used when streaming a full (non-range) response.
    pub buffer_size: usize,
    /// Whether to emit `Cache-Control`/`Last-Modified`/`ETag`.
    pub caching_enabled: bool,
    pub cache_max_age: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: crate::pathutil::DEFAULT_MEDIA_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            buffer_size: 32 * 1024,
            caching_enabled: true,
            cache_max_age: 3600,
        }
    }
}

fn empty_body() -> RespBody {
    Full::new(Bytes::new()).map_err(|never| match never {}).boxed()
}

fn full_body(data: Vec<u8>) -> RespBody {
    Full::new(Bytes::from(data)).map_err(|never| match never {}).boxed()
}

fn streamed_body(data: Vec<u8>, chunk_size: usize) -> RespBody {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<Result<Frame<Bytes>, std::convert::Infallible>> = data
        .chunks(chunk_size)
        .map(|c| Ok(Frame::data(Bytes::copy_from_slice(c))))
        .collect();
    StreamBody::new(tokio_stream::iter(chunks)).boxed()
}

/// Serve a range-media request. Returns a plain `ErrorKind` for 404/403/416
/// cases; callers (the listener fabric) turn these into empty-bodied error
/// responses per §7.
///
/// Takes the method and optional `Range` header value directly rather than
/// a full `Request` so the engine stays decoupled from the transport's
/// concrete body type and is unit-testable without a live connection.
pub async fn serve(
    method: &Method,
    range_header: Option<&str>,
    path: &str,
    fs: &Arc<dyn Filesystem>,
    cfg: &MediaConfig,
) -> Result<Response<RespBody>> {
    if !fs.exists(path).await {
        return Err(ProxyError::Engine(ErrorKind::NotFound));
    }
    if fs.is_dir(path).await {
        return Err(ProxyError::Engine(ErrorKind::Forbidden));
    }
    let extension = extension_of(path);
    if !is_allowed_extension(&extension, &cfg.allowed_extensions) {
        return Err(ProxyError::Engine(ErrorKind::Forbidden));
    }

    let stat = fs.stat(path).await?;
    let content_type = mime_type_for(&extension);

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header("X-Content-Type-Options", "nosniff");

    if cfg.caching_enabled {
        let mtime_secs = stat.modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        let etag = format!("\"{:x}-{:x}\"", mtime_secs, stat.size);
        builder = builder
            .header(header::CACHE_CONTROL, format!("public, max-age={}", cfg.cache_max_age))
            .header(header::ETAG, etag)
            .header(header::LAST_MODIFIED, http_date(mtime_secs));
    }

    let is_head = *method == Method::HEAD;

    let Some(range_header) = range_header else {
        builder = builder.header(header::CONTENT_LENGTH, stat.size.to_string());
        let body = if is_head {
            empty_body()
        } else {
            streamed_body(fs.read(path).await?, cfg.buffer_size)
        };
        return Ok(builder.status(StatusCode::OK).body(body).map_err(build_err)?);
    };

    match parse_range_header(range_header, stat.size) {
        Ok(range) => {
            builder = builder
                .header(header::CONTENT_LENGTH, range.len().to_string())
                .header(
                    header::CONTENT_RANGE,
                    HeaderValue::from_str(&format!("bytes {}-{}/{}", range.start, range.end, stat.size))
                        .map_err(|e| ProxyError::Http(e.to_string()))?,
                );
            let body = if is_head {
                empty_body()
            } else {
                full_body(fs.read_range(path, range.start, range.len()).await?)
            };
            Ok(builder.status(StatusCode::PARTIAL_CONTENT).body(body).map_err(build_err)?)
        }
        Err(RangeError::MultiRange) | Err(RangeError::NotSatisfiable) => {
            let resp = Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{}", stat.size))
                .body(empty_body())
                .map_err(build_err)?;
            Ok(resp)
        }
    }
}

fn build_err(e: http::Error) -> ProxyError {
    ProxyError::Http(e.to_string())
}

/// A minimal RFC 7231 `Last-Modified`/`Date` formatter (no external crate:
/// civil calendar math over a Unix timestamp).
fn http_date(unix_secs: u64) -> String {
    const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    const MONTHS: [&str; 12] =
        ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];

    let days_since_epoch = unix_secs / 86400;
    let secs_of_day = unix_secs % 86400;
    let (hour, min, sec) = (secs_of_day / 3600, (secs_of_day % 3600) / 60, secs_of_day % 60);
    let weekday = DAYS[((days_since_epoch + 4) % 7) as usize];

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

    format!(
        "{}, {:02} {} {} {:02}:{:02}:{:02} GMT",
        weekday, day, MONTHS[month], year, hour, min, sec
    )
}

fn is_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn month_lengths(leap: bool) -> [i64; 12] {
    [31, if leap { 29 } else { 28 }, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
}
