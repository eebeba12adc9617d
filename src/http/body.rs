//! Framed body relay: Content-Length (exact byte count) or
//! chunked+trailers (size-prefixed, relayed verbatim).
//!
//! Grounded on `original_source/seal-server.py`'s `copy_bytes`/
//! `copy_chunks` (chunk headers and trailers are echoed byte-for-byte,
//! not reconstructed) and on
//! `crates/httpserver/src/serve/http/connection.rs`'s `BodyDecoder`,
//! whose use of `httparse::parse_chunk_size` for the hex chunk-size line
//! is reused here directly.

use anyhow::{Context, Result};

use crate::error::ProxyError;
use crate::http::header::HeaderMap;
use crate::io::stream::{ByteStreamIn, ByteStreamOut};

/// Framing a message body was parsed with, derived from its headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    None,
    Length(usize),
    Chunked,
}

impl Framing {
    pub fn of(headers: &HeaderMap) -> Result<Self> {
        let chunked = headers
            .get("Transfer-Encoding")
            .is_some_and(|v| v.trim().to_ascii_lowercase().ends_with("chunked"));
        if chunked {
            return Ok(Framing::Chunked);
        }
        match headers.get("Content-Length") {
            Some(raw) => {
                let len = raw
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::Error::from(ProxyError::BadMessage))
                    .context("invalid Content-Length")?;
                Ok(Framing::Length(len))
            }
            None => Ok(Framing::None),
        }
    }
}

/// Copies a message body from `src` to `dst` according to `framing`.
/// Only meaningful when the message's `body_pending` is true; callers
/// with an already-buffered body write `message.body` directly instead.
pub async fn transfer(src: &mut ByteStreamIn, dst: &mut ByteStreamOut, framing: Framing) -> Result<()> {
    match framing {
        Framing::Length(n) => copy_length(src, dst, n).await,
        Framing::Chunked => copy_chunked(src, dst).await,
        Framing::None => Ok(()),
    }
}

/// Copies exactly `len` bytes from `src` to `dst`.
async fn copy_length(src: &mut ByteStreamIn, dst: &mut ByteStreamOut, len: usize) -> Result<()> {
    let mut copied = 0;
    while copied < len {
        let chunk = src.read_some(len - copied).await?;
        dst.write(&chunk).await?;
        copied += chunk.len();
    }
    Ok(())
}

/// Relays a chunked-encoded body verbatim: each chunk-size line, the
/// chunk data + trailing CRLF, the terminating zero chunk, and any
/// trailer lines up to the final blank line.
async fn copy_chunked(src: &mut ByteStreamIn, dst: &mut ByteStreamOut) -> Result<()> {
    loop {
        let header_line = src.read_line().await?;
        let size = match httparse::parse_chunk_size(&[header_line.as_slice(), b"\r\n"].concat()) {
            Ok(httparse::Status::Complete((_, size))) => size,
            Ok(httparse::Status::Partial) => {
                return Err(anyhow::anyhow!("incomplete chunk size line"));
            }
            Err(_) => return Err(anyhow::anyhow!("invalid chunk size line")),
        };
        let size = usize::try_from(size).context("chunk size too large")?;

        dst.write(&header_line).await?;
        dst.write(b"\r\n").await?;

        if size == 0 {
            break;
        }
        copy_length(src, dst, size + 2).await?;
    }

    loop {
        let trailer_line = src.read_line().await?;
        if trailer_line.is_empty() {
            break;
        }
        dst.write(&trailer_line).await?;
        dst.write(b"\r\n").await?;
    }
    dst.write(b"\r\n").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smol::io::AsyncWriteExt;
    use smol::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (a, b) = smol::future::zip(TcpStream::connect(addr), listener.accept()).await;
        (a.unwrap(), b.unwrap().0)
    }

    #[test]
    fn length_framed_copies_exact_bytes() {
        smol::block_on(async {
            let (mut feeder, src_sock) = loopback_pair().await;
            let (dst_sock, mut collector) = loopback_pair().await;

            feeder.write_all(b"hello world").await.unwrap();
            drop(feeder);

            let mut src = ByteStreamIn::new(src_sock);
            let mut dst = ByteStreamOut::new(dst_sock);
            copy_length(&mut src, &mut dst, 11).await.unwrap();
            drop(dst);

            let mut out = [0u8; 11];
            smol::io::AsyncReadExt::read_exact(&mut collector, &mut out)
                .await
                .unwrap();
            assert_eq!(&out, b"hello world");
        });
    }

    #[test]
    fn chunked_relay_is_byte_identical() {
        smol::block_on(async {
            let (mut feeder, src_sock) = loopback_pair().await;
            let (dst_sock, mut collector) = loopback_pair().await;

            feeder.write_all(b"5\r\nhello\r\n0\r\n\r\n").await.unwrap();
            drop(feeder);

            let mut src = ByteStreamIn::new(src_sock);
            let mut dst = ByteStreamOut::new(dst_sock);
            copy_chunked(&mut src, &mut dst).await.unwrap();
            drop(dst);

            let mut out = Vec::new();
            smol::io::AsyncReadExt::read_to_end(&mut collector, &mut out)
                .await
                .unwrap();
            assert_eq!(out, b"5\r\nhello\r\n0\r\n\r\n");
        });
    }

    #[test]
    fn chunked_relay_preserves_trailers() {
        smol::block_on(async {
            let (mut feeder, src_sock) = loopback_pair().await;
            let (dst_sock, mut collector) = loopback_pair().await;

            feeder
                .write_all(b"3\r\nfoo\r\n0\r\nX-Trailer: v\r\n\r\n")
                .await
                .unwrap();
            drop(feeder);

            let mut src = ByteStreamIn::new(src_sock);
            let mut dst = ByteStreamOut::new(dst_sock);
            copy_chunked(&mut src, &mut dst).await.unwrap();
            drop(dst);

            let mut out = Vec::new();
            smol::io::AsyncReadExt::read_to_end(&mut collector, &mut out)
                .await
                .unwrap();
            assert_eq!(out, b"3\r\nfoo\r\n0\r\nX-Trailer: v\r\n\r\n");
        });
    }

    #[test]
    fn framing_prefers_chunked_over_content_length() {
        let mut headers = HeaderMap::new();
        headers.append("Content-Length", "10");
        headers.append("Transfer-Encoding", "chunked");
        assert_eq!(Framing::of(&headers).unwrap(), Framing::Chunked);
    }

    #[test]
    fn framing_defaults_to_none() {
        let headers = HeaderMap::new();
        assert_eq!(Framing::of(&headers).unwrap(), Framing::None);
    }
}
