//! Per-client state machine: request loop, header rewriting, forwarding,
//! and `CONNECT` tunneling.
//!
//! Grounded on `original_source/seal-server.py`'s
//! `HttpProxyHandler.run`/`handle_request`/`handle_CONNECT`, restructured
//! into the teacher's async-task shape
//! (`crates/httproxy/src/start/mod.rs::handle_client`).

use std::net::SocketAddr;

use anyhow::{Context, Result};
use smol::future;
use smol::io::AsyncWriteExt;
use smol::net::TcpStream;

use crate::config::{CLIENT_IDLE_TIMEOUT, READ_BUFFER_CAP};
use crate::error::ProxyError;
use crate::http::body::{self, Framing};
use crate::http::header::HeaderMap;
use crate::http::message::{HttpRequest, HttpResponse};
use crate::http::method::Method;
use crate::init::logger;
use crate::io::stream::{ByteStreamIn, ByteStreamOut};
use crate::tunnel;
use crate::upstream::{connect_with_timeout, UpstreamPool};

pub struct Handler {
    peer: SocketAddr,
    client_in: ByteStreamIn,
    client_out: ByteStreamOut,
    upstream: UpstreamPool,
}

impl Handler {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        let read_half = stream.clone();
        Self {
            peer,
            client_in: ByteStreamIn::new(read_half),
            client_out: ByteStreamOut::new(stream),
            upstream: UpstreamPool::new(),
        }
    }

    /// Drives the keep-alive request loop for one client connection until
    /// the client disconnects, asks to close, issues `CONNECT` (which
    /// transfers control to the tunnel for the rest of the connection's
    /// life), or an error ends the connection outright.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let req = self.read_request().await?;

            let keep_alive = req
                .header("Proxy-Connection")
                .map(|v| v.trim().eq_ignore_ascii_case("keep-alive"))
                .unwrap_or(true);

            if req.method == Method::Connect {
                return self.handle_connect(&req).await;
            }

            if !req.method.is_known() {
                return Err(ProxyError::BadMethod).context(format!(
                    "peer={} unknown method in {:?}",
                    self.peer, req.message.start_line
                ));
            }

            self.handle_forward(&req).await?;

            if !keep_alive {
                return Ok(());
            }
        }
    }

    async fn read_request(&mut self) -> Result<HttpRequest> {
        let read = HttpRequest::parse(&mut self.client_in, READ_BUFFER_CAP);
        let idle = async {
            smol::Timer::after(CLIENT_IDLE_TIMEOUT).await;
            Err(ProxyError::ConnectionClosed.into())
        };
        future::race(read, idle).await
    }

    async fn handle_forward(&mut self, req: &HttpRequest) -> Result<()> {
        if req.method == Method::Get {
            logger::hit(&req.target);
        }

        let host_header = req.header("Host").map(str::to_string);
        let resolved = resolve_target(&req.target, host_header.as_deref())
            .context("parsing request target")?;

        let mut headers = HeaderMap::new();
        for (name, value) in req.message.headers.iter() {
            if name.to_ascii_lowercase().starts_with("proxy-") {
                continue;
            }
            headers.append(name, value);
        }
        if !headers.contains("Host") {
            headers.append("Host", &resolved.authority);
        }

        let mut forward_bytes = Vec::new();
        forward_bytes.extend_from_slice(
            format!("{} {} HTTP/1.1", req.method, resolved.forwarded_target).as_bytes(),
        );
        forward_bytes.extend_from_slice(b"\r\n");
        forward_bytes.extend_from_slice(headers.to_string().as_bytes());
        forward_bytes.extend_from_slice(b"\r\n");
        if !req.message.body_pending {
            forward_bytes.extend_from_slice(&req.message.body);
        }

        self.upstream
            .send(&resolved.host, resolved.port, &forward_bytes)
            .await
            .context(format!("forwarding to {}:{}", resolved.host, resolved.port))?;

        if req.message.body_pending {
            let framing = Framing::of(&req.message.headers)?;
            let (_, out) = self
                .upstream
                .streams()
                .context("upstream connection missing while streaming request body")?;
            body::transfer(&mut self.client_in, out, framing).await?;
        }

        let response = {
            let (input, _) = self
                .upstream
                .streams()
                .context("upstream connection missing while awaiting response")?;
            HttpResponse::parse(input, READ_BUFFER_CAP).await?
        };

        self.client_out.write(&response.serialize()).await?;
        if response.message.body_pending {
            let framing = Framing::of(&response.message.headers)?;
            let (input, _) = self
                .upstream
                .streams()
                .context("upstream connection missing while streaming response body")?;
            body::transfer(input, &mut self.client_out, framing).await?;
        }

        Ok(())
    }

    async fn handle_connect(mut self, req: &HttpRequest) -> Result<()> {
        let (host, port) = parse_connect_authority(&req.target)?;
        log::info!("peer={} CONNECT {host}:{port}", self.peer);

        let remote = match self.upstream.take_if_targets(&host, port) {
            Some(stream) => stream,
            None => match connect_with_timeout(&host, port).await {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = self
                        .client_out
                        .write(b"HTTP/1.1 503 Service Unavailable\r\nHost: seal\r\n\r\n")
                        .await;
                    return Err(err).context(format!("CONNECT target {host}:{port} unreachable"));
                }
            },
        };

        self.client_out
            .write(b"HTTP/1.1 200 OK\r\nHost: seal\r\n\r\n")
            .await?;
        self.client_out.flush().await?;

        // Bytes already buffered past the header block (e.g. the start of
        // a TLS ClientHello arriving in the same read) must reach the
        // remote before the tunnel takes over.
        let pre_body = self.client_in.take_buffered();
        if !pre_body.is_empty() {
            let mut lead = remote.clone();
            lead.write_all(&pre_body)
                .await
                .map_err(|_| ProxyError::ConnectionReset)?;
            lead.flush().await.map_err(|_| ProxyError::ConnectionReset)?;
        }

        // `into_inner` on both halves avoids triggering their half-close
        // `Drop` impls, which would shut down the shared socket before the
        // tunnel gets to use it.
        let client_read = self.client_in.into_inner();
        let client_write = self.client_out.into_inner();
        drop(client_write);

        tunnel::run(client_read, remote).await
    }
}

struct ResolvedTarget {
    host: String,
    port: u16,
    /// The authority exactly as it appeared in the original request
    /// (absolute-form target or `Host` header), used verbatim when
    /// synthesizing a `Host` header for the forwarded request.
    authority: String,
    forwarded_target: String,
}

/// Parses a request target per spec step 4: absolute-form targets carry
/// their own authority; origin-form targets fall back to the `Host`
/// header.
fn resolve_target(target: &str, host_header: Option<&str>) -> Result<ResolvedTarget> {
    if let Some(rest) = strip_scheme(target) {
        let (authority, path_and_query) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let (host, port) = split_authority(authority, 80)?;
        let authority = authority_string(&host, port);
        Ok(ResolvedTarget {
            host,
            port,
            authority,
            forwarded_target: path_and_query.to_string(),
        })
    } else {
        let authority = host_header.ok_or(ProxyError::BadTarget)?;
        let (host, port) = split_authority(authority, 80)?;
        let authority = authority_string(&host, port);
        Ok(ResolvedTarget {
            host,
            port,
            authority,
            forwarded_target: target.to_string(),
        })
    }
}

/// Renders `host[:port]` for synthesizing a `Host` header, omitting the
/// port when it is the default HTTP port 80 (RFC 7230 §2.7.1).
fn authority_string(host: &str, port: u16) -> String {
    if port == 80 {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

fn strip_scheme(target: &str) -> Option<&str> {
    target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
}

fn split_authority(authority: &str, default_port: u16) -> Result<(String, u16)> {
    match authority.rfind(':') {
        Some(i) if authority[i + 1..].chars().all(|c| c.is_ascii_digit()) && i + 1 < authority.len() => {
            let port = authority[i + 1..]
                .parse()
                .map_err(|_| anyhow::Error::from(ProxyError::BadTarget))?;
            Ok((authority[..i].to_string(), port))
        }
        _ => Ok((authority.to_string(), default_port)),
    }
}

/// Parses a `CONNECT` request target (`host:port`, per RFC 7230 authority
/// form). Requires an explicit port, matching
/// `original_source/seal-server.py`'s `handle_CONNECT`.
fn parse_connect_authority(target: &str) -> Result<(String, u16)> {
    let (host, port_str) = target
        .rsplit_once(':')
        .ok_or(ProxyError::BadTarget)
        .context("CONNECT target missing port")?;
    let port: u16 = port_str
        .parse()
        .map_err(|_| anyhow::Error::from(ProxyError::BadTarget))?;
    if host.is_empty() || port == 0 {
        return Err(ProxyError::BadTarget).context("CONNECT target has empty host or zero port");
    }
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_form_splits_authority_and_path() {
        let resolved = resolve_target("http://example.com:8080/a?b=1", None).unwrap();
        assert_eq!(resolved.host, "example.com");
        assert_eq!(resolved.port, 8080);
        assert_eq!(resolved.forwarded_target, "/a?b=1");
    }

    #[test]
    fn absolute_form_defaults_port_80() {
        let resolved = resolve_target("http://example.com/a", None).unwrap();
        assert_eq!(resolved.port, 80);
    }

    #[test]
    fn absolute_form_with_no_path_forwards_slash() {
        let resolved = resolve_target("http://example.com", None).unwrap();
        assert_eq!(resolved.forwarded_target, "/");
    }

    #[test]
    fn origin_form_falls_back_to_host_header() {
        let resolved = resolve_target("/hello", Some("example.com:9090")).unwrap();
        assert_eq!(resolved.host, "example.com");
        assert_eq!(resolved.port, 9090);
        assert_eq!(resolved.forwarded_target, "/hello");
    }

    #[test]
    fn origin_form_without_host_header_fails() {
        assert!(resolve_target("/hello", None).is_err());
    }

    #[test]
    fn authority_string_omits_default_port() {
        assert_eq!(authority_string("example.com", 80), "example.com");
        assert_eq!(authority_string("example.com", 8080), "example.com:8080");
    }

    #[test]
    fn connect_authority_requires_port() {
        assert!(parse_connect_authority("example.com").is_err());
        let (host, port) = parse_connect_authority("example.com:443").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 443);
    }
}
