//! The mis-protocol peek (§4.1): a TLS listener peeks the first bytes of an
//! accepted connection without consuming them, to tell a genuine TLS
//! ClientHello apart from a plaintext HTTP request arriving on the wrong
//! port, before committing to a TLS handshake.

use tokio::net::TcpStream;

const PEEK_BYTES: usize = 6;
const TLS_RECORD_HANDSHAKE: u8 = 0x16;
/// Upper bound on the fuller header peek used to recover the request's
/// path/Host for the mis-protocol redirect target (§4.1).
const MAX_HEADER_PEEK: usize = 4096;

const HTTP_METHOD_PREFIXES: &[&[u8]] =
    &[b"GET ", b"POST", b"PUT ", b"HEAD", b"DELE", b"PATC", b"OPTI"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeekOutcome {
    /// First byte is a TLS handshake record; proceed with the TLS acceptor.
    Tls,
    /// Looks like a plaintext HTTP request line; answer with a redirect.
    PlainHttp,
    /// Neither: too little data, or an unrecognized leading byte sequence.
    Unknown,
}

/// Peek up to [`PEEK_BYTES`] bytes without consuming them from the socket
/// buffer, and classify the connection.
pub async fn peek_outcome(stream: &mut TcpStream) -> std::io::Result<PeekOutcome> {
    stream.readable().await?;
    let mut buf = [0u8; PEEK_BYTES];
    let filled = stream.peek(&mut buf[..]).await?;

    if filled == 0 {
        return Ok(PeekOutcome::Unknown);
    }
    if buf[0] == TLS_RECORD_HANDSHAKE {
        return Ok(PeekOutcome::Tls);
    }
    if filled >= 4 && HTTP_METHOD_PREFIXES.iter().any(|p| &buf[..4] == *p) {
        return Ok(PeekOutcome::PlainHttp);
    }
    Ok(PeekOutcome::Unknown)
}

/// The request-line path and `Host` header recovered from a plaintext
/// request, used to build the mis-protocol redirect's target URL.
#[derive(Debug, Default, Clone)]
pub struct PeekedRequest {
    pub path: String,
    pub host: Option<String>,
}

/// Peek (without consuming) until a full header block is available or
/// [`MAX_HEADER_PEEK`] bytes have arrived, and pull out the request-line
/// path and `Host` header. Grounded on the same peek-until-double-CRLF
/// shape as the raw TCP forwarder's request-line peek, adapted here to
/// also recover `Host` for the redirect target.
pub async fn peek_request_target(stream: &mut TcpStream) -> std::io::Result<PeekedRequest> {
    let mut buf = vec![0u8; MAX_HEADER_PEEK];
    loop {
        stream.readable().await?;
        let filled = stream.peek(&mut buf[..]).await?;
        if filled == 0 {
            return Ok(PeekedRequest::default());
        }
        if let Some(pos) = find_double_crlf(&buf[..filled]) {
            return Ok(parse_peeked_request(&buf[..pos]));
        }
        if filled >= MAX_HEADER_PEEK {
            return Ok(parse_peeked_request(&buf[..filled]));
        }
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_peeked_request(header_block: &[u8]) -> PeekedRequest {
    let text = String::from_utf8_lossy(header_block);
    let mut lines = text.split("\r\n");
    let path = lines
        .next()
        .and_then(|line| line.split(' ').nth(1))
        .unwrap_or("/")
        .to_string();
    let host = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim().eq_ignore_ascii_case("host").then(|| value.trim().to_string())
    });
    PeekedRequest { path, host }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (server, (client, _)) = tokio::join!(connect, listener.accept());
        (server.unwrap(), client.unwrap())
    }

    #[tokio::test]
    async fn recognizes_tls_record_header() {
        let (mut server, mut client) = loopback_pair().await;
        client.write_all(&[0x16, 0x03, 0x01, 0x00, 0x00, 0x00]).await.unwrap();
        assert_eq!(peek_outcome(&mut server).await.unwrap(), PeekOutcome::Tls);
    }

    #[tokio::test]
    async fn recognizes_plaintext_http_request_line() {
        let (mut server, mut client) = loopback_pair().await;
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(peek_outcome(&mut server).await.unwrap(), PeekOutcome::PlainHttp);
    }

    #[tokio::test]
    async fn unrecognized_prefix_is_unknown() {
        let (mut server, mut client) = loopback_pair().await;
        client.write_all(b"\x01\x02\x03\x04\x05\x06").await.unwrap();
        assert_eq!(peek_outcome(&mut server).await.unwrap(), PeekOutcome::Unknown);
    }

    #[tokio::test]
    async fn recovers_path_and_host_from_peeked_headers() {
        let (mut server, mut client) = loopback_pair().await;
        client
            .write_all(b"GET /app/page?x=1 HTTP/1.1\r\nHost: example.com:8080\r\n\r\n")
            .await
            .unwrap();
        let peeked = peek_request_target(&mut server).await.unwrap();
        assert_eq!(peeked.path, "/app/page?x=1");
        assert_eq!(peeked.host.as_deref(), Some("example.com:8080"));
    }
}
