//! HTTP/1.1 start-line + header parsing/serialization.
//!
//! Grounded on `original_source/seal-server.py`'s
//! `HttpInputStream.read_message` (the folding loop and the
//! `Content-Length`-vs-`body_pending` framing decision) and restyled with
//! the teacher's line/status-line parsing shape
//! (`crates/httpserver/src/serve/{request/request_line,response/status_line}.rs`).

use anyhow::{Context, Result};

use crate::error::ProxyError;
use crate::http::header::HeaderMap;
use crate::http::method::Method;
use crate::io::stream::ByteStreamIn;

/// Shared state for a request or a response: the raw start line, headers,
/// and body framing status.
#[derive(Debug, Clone)]
pub struct HttpMessage {
    pub start_line: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// True iff the body has not yet been fully buffered and must be
    /// streamed by the caller via `http::body`.
    pub body_pending: bool,
}

impl HttpMessage {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.start_line.len() + 64 + self.body.len());
        out.extend_from_slice(self.start_line.as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(self.headers.to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        if !self.body_pending {
            out.extend_from_slice(&self.body);
        }
        out
    }

    /// `true` if `Transfer-Encoding` ends with `chunked` (case
    /// insensitive). This framing wins over `Content-Length` when both
    /// are present (RFC 7230).
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get("Transfer-Encoding")
            .is_some_and(|v| v.trim().to_ascii_lowercase().ends_with("chunked"))
    }
}

/// Reads a start line + header block off `input`, deciding
/// `body_pending`/`body` per spec §5.2 step 3. Does not yet apply the
/// request-specific bodyless-method refinement (§5.3); callers of
/// `parse_request` apply that afterward.
async fn parse_head(input: &mut ByteStreamIn, buffer_cap: usize) -> Result<HttpMessage> {
    let start_line = read_line_text(input).await?;
    if start_line.is_empty() {
        return Err(ProxyError::BadMessage).context("empty start line")?;
    }

    let mut headers = HeaderMap::new();
    let mut pending: Option<String> = None;
    loop {
        let line = read_line_text(input).await?;
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // Obsolete line folding (RFC 7230 §3.2.4): append the
            // trimmed continuation to the logical header in progress.
            match pending.as_mut() {
                Some(p) => {
                    p.push(' ');
                    p.push_str(line.trim());
                }
                None => {
                    return Err(ProxyError::BadMessage)
                        .context("continuation line with no preceding header")?;
                }
            }
        } else {
            if let Some(p) = pending.take() {
                headers.append_line(&p)?;
            }
            pending = Some(line);
        }
    }
    if let Some(p) = pending.take() {
        headers.append_line(&p)?;
    }

    let chunked = headers
        .get("Transfer-Encoding")
        .is_some_and(|v| v.trim().to_ascii_lowercase().ends_with("chunked"));

    let (body, body_pending) = if chunked {
        (Vec::new(), true)
    } else {
        match headers.get("Content-Length") {
            Some(raw) => {
                let len: usize = raw
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::Error::from(ProxyError::BadMessage))
                    .context("invalid Content-Length")?;
                if len <= buffer_cap {
                    (input.read_exact(len).await?, false)
                } else {
                    (Vec::new(), true)
                }
            }
            None => (Vec::new(), false),
        }
    };

    Ok(HttpMessage {
        start_line,
        headers,
        body,
        body_pending,
    })
}

async fn read_line_text(input: &mut ByteStreamIn) -> Result<String> {
    let bytes = input.read_line().await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Clone)]
pub struct RequestLine {
    pub method: Method,
    pub target: String,
    pub version: String,
}

impl RequestLine {
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
        if parts.len() != 3 {
            return Err(ProxyError::BadMessage).context("malformed request line")?;
        }
        Ok(Self {
            method: parts[0].parse().expect("Method::from_str is infallible"),
            target: parts[1].to_string(),
            version: parts[2].to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub message: HttpMessage,
    pub method: Method,
    pub target: String,
    pub version: String,
}

impl HttpRequest {
    /// Parses a request off `input`, then applies the request-specific
    /// bodyless-method refinement (§5.3): `GET/HEAD/DELETE/CONNECT/TRACE`
    /// are forced `body_pending=false`; every other method keeps whatever
    /// `parse_head` decided from the framing headers.
    pub async fn parse(input: &mut ByteStreamIn, buffer_cap: usize) -> Result<Self> {
        let mut message = parse_head(input, buffer_cap).await?;
        let line = RequestLine::parse(&message.start_line)?;
        if line.method.is_always_bodyless() {
            message.body_pending = false;
            message.body.clear();
        }
        Ok(Self {
            message,
            method: line.method,
            target: line.target,
            version: line.version,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.message.headers.get(name)
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.message.serialize()
    }
}

#[derive(Debug, Clone)]
pub struct StatusLine {
    pub version: String,
    pub code: u16,
    pub phrase: String,
}

impl StatusLine {
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
        if parts.len() < 2 {
            return Err(ProxyError::BadMessage).context("malformed status line")?;
        }
        let code = parts[1]
            .parse()
            .map_err(|_| anyhow::Error::from(ProxyError::BadMessage))
            .context("invalid status code")?;
        let phrase = parts.get(2).copied().unwrap_or("").to_string();
        Ok(Self {
            version: parts[0].to_string(),
            code,
            phrase,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub message: HttpMessage,
    pub version: String,
    pub code: u16,
    pub phrase: String,
}

impl HttpResponse {
    pub async fn parse(input: &mut ByteStreamIn, buffer_cap: usize) -> Result<Self> {
        let message = parse_head(input, buffer_cap).await?;
        let status = StatusLine::parse(&message.start_line)?;
        Ok(Self {
            message,
            version: status.version,
            code: status.code,
            phrase: status.phrase,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.message.headers.get(name)
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.message.serialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::READ_BUFFER_CAP;
    use smol::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (connect, accept) = smol::future::zip(connect, accept).await;
        (connect.unwrap(), accept.unwrap().0)
    }

    #[test]
    fn request_line_parses_method_target_version() {
        let line = RequestLine::parse("GET /a?b=1 HTTP/1.1").unwrap();
        assert_eq!(line.method, Method::Get);
        assert_eq!(line.target, "/a?b=1");
        assert_eq!(line.version, "HTTP/1.1");
    }

    #[test]
    fn status_line_allows_spaces_in_phrase() {
        let line = StatusLine::parse("HTTP/1.1 404 Not Found").unwrap();
        assert_eq!(line.code, 404);
        assert_eq!(line.phrase, "Not Found");
    }

    #[test]
    fn folded_header_joins_continuation() {
        smol::block_on(async {
            let (mut client, server) = loopback_pair().await;
            client
                .write_all(b"GET / HTTP/1.1\r\nX-Long: a\r\n \tb\r\n\r\n")
                .await
                .unwrap();
            drop(client);
            use smol::io::AsyncWriteExt;
            let mut input = ByteStreamIn::new(server);
            let req = HttpRequest::parse(&mut input, READ_BUFFER_CAP).await.unwrap();
            assert_eq!(req.header("X-Long"), Some("a b"));
        });
    }

    #[test]
    fn content_length_is_buffered_eagerly() {
        smol::block_on(async {
            use smol::io::AsyncWriteExt;
            let (mut client, server) = loopback_pair().await;
            client
                .write_all(b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
                .await
                .unwrap();
            drop(client);
            let mut input = ByteStreamIn::new(server);
            let req = HttpRequest::parse(&mut input, READ_BUFFER_CAP).await.unwrap();
            assert!(!req.message.body_pending);
            assert_eq!(req.message.body, b"hello");
        });
    }

    #[test]
    fn chunked_wins_over_content_length() {
        smol::block_on(async {
            use smol::io::AsyncWriteExt;
            let (mut client, server) = loopback_pair().await;
            client
                .write_all(
                    b"POST /x HTTP/1.1\r\nContent-Length: 999\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
                )
                .await
                .unwrap();
            drop(client);
            let mut input = ByteStreamIn::new(server);
            let req = HttpRequest::parse(&mut input, READ_BUFFER_CAP).await.unwrap();
            assert!(req.message.body_pending);
        });
    }

    #[test]
    fn bodyless_methods_force_pending_false() {
        smol::block_on(async {
            use smol::io::AsyncWriteExt;
            let (mut client, server) = loopback_pair().await;
            client
                .write_all(b"GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            drop(client);
            let mut input = ByteStreamIn::new(server);
            let req = HttpRequest::parse(&mut input, READ_BUFFER_CAP).await.unwrap();
            assert!(!req.message.body_pending);
        });
    }
}
