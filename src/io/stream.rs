//! Buffered line/length reads and unbuffered writes over a raw socket.
//!
//! Grounded on `original_source/seal-server.py`'s `HttpInputStream`
//! (`wait`/`read`/`read_some`/`read_line`, 128 KiB `maxrdbuf`) and
//! `HttpOutputStream` (`write` that loops until fully sent, `close` as a
//! half-shutdown). Implemented with `smol::net::TcpStream` and the
//! teacher's "clone the socket handle, one reader one writer" idiom
//! (`crates/httproxy/src/start/mod.rs::tunnel`).

use std::net::Shutdown;

use anyhow::{Context, Result};
use smol::io::{AsyncReadExt, AsyncWriteExt};
use smol::net::TcpStream;

use crate::config::READ_BUFFER_CAP;
use crate::error::ProxyError;

/// Buffered reader over one direction of a TCP connection.
///
/// The socket is held in an `Option` so that `into_inner` can move it out
/// by value even though `ByteStreamIn` implements `Drop` (a type can't
/// otherwise be partially moved once it has a destructor).
pub struct ByteStreamIn {
    stream: Option<TcpStream>,
    buf: Vec<u8>,
    pos: usize,
    cap: usize,
}

impl ByteStreamIn {
    pub fn new(stream: TcpStream) -> Self {
        Self::with_capacity(stream, READ_BUFFER_CAP)
    }

    pub fn with_capacity(stream: TcpStream, cap: usize) -> Self {
        Self {
            stream: Some(stream),
            buf: Vec::new(),
            pos: 0,
            cap,
        }
    }

    fn stream_mut(&mut self) -> &mut TcpStream {
        self.stream.as_mut().expect("stream taken via into_inner")
    }

    fn available(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }

    /// Blocks for a single receive if the buffer is empty; refills up to
    /// `cap`. Fails `ConnectionReset` on a transport error and
    /// `ConnectionClosed` on a zero-length read.
    pub async fn wait(&mut self) -> Result<()> {
        if self.available() > 0 {
            return Ok(());
        }
        self.compact();
        let mut tmp = vec![0u8; self.cap];
        let n = self
            .stream_mut()
            .read(&mut tmp)
            .await
            .map_err(|_| ProxyError::ConnectionReset)
            .context("reading from socket")?;
        if n == 0 {
            return Err(ProxyError::ConnectionClosed.into());
        }
        tmp.truncate(n);
        self.buf.extend_from_slice(&tmp);
        Ok(())
    }

    /// Returns exactly `n` bytes, refilling as needed.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        while self.available() < n {
            self.wait().await?;
        }
        let out = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    /// Returns 1..=max bytes drawn from the buffer, refilling once if
    /// empty.
    pub async fn read_some(&mut self, max: usize) -> Result<Vec<u8>> {
        if self.available() == 0 {
            self.wait().await?;
        }
        let n = self.available().min(max.max(1));
        let out = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    /// Returns bytes up to (not including) the next CRLF, consuming the
    /// CRLF. Fails `LineTooLong` if the accumulated bytes would exceed
    /// `cap` before a CRLF is seen.
    pub async fn read_line(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(rel) = find_crlf(&self.buf[self.pos..]) {
                let line = self.buf[self.pos..self.pos + rel].to_vec();
                self.pos += rel + 2;
                return Ok(line);
            }
            if self.available() >= self.cap {
                return Err(ProxyError::LineTooLong.into());
            }
            self.wait().await?;
        }
    }

    /// Prefix bytes already buffered but not yet consumed. Used when a
    /// CONNECT request's tail (e.g. a TLS ClientHello) arrives in the
    /// same read as the header block and must be relayed before the
    /// tunnel takes over.
    pub fn take_buffered(&mut self) -> Vec<u8> {
        let out = self.buf[self.pos..].to_vec();
        self.buf.clear();
        self.pos = 0;
        out
    }

    /// Moves the underlying socket out, e.g. to hand it to a tunnel.
    /// Bypasses the half-close this type would otherwise perform on drop.
    pub fn into_inner(mut self) -> TcpStream {
        self.stream.take().expect("stream taken via into_inner")
    }
}

impl Drop for ByteStreamIn {
    fn drop(&mut self) {
        if let Some(stream) = &self.stream {
            let _ = stream.shutdown(Shutdown::Read);
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Unbuffered writer over one direction of a TCP connection. Same
/// `Option`-wrapped-socket trick as [`ByteStreamIn`] so `into_inner` can
/// move the socket out despite the `Drop` impl.
pub struct ByteStreamOut {
    stream: Option<TcpStream>,
}

impl ByteStreamOut {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream: Some(stream) }
    }

    fn stream_mut(&mut self) -> &mut TcpStream {
        self.stream.as_mut().expect("stream taken via into_inner")
    }

    /// Fully writes `bytes`; fails `ConnectionClosed` if a send returns
    /// zero before completion.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            let n = self
                .stream_mut()
                .write(&bytes[written..])
                .await
                .map_err(|_| ProxyError::ConnectionReset)
                .context("writing to socket")?;
            if n == 0 {
                return Err(ProxyError::ConnectionClosed.into());
            }
            written += n;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.stream_mut().flush().await.context("flushing socket")
    }

    /// Moves the underlying socket out, e.g. to hand it to a tunnel.
    /// Bypasses the half-close this type would otherwise perform on drop.
    pub fn into_inner(mut self) -> TcpStream {
        self.stream.take().expect("stream taken via into_inner")
    }
}

impl Drop for ByteStreamOut {
    fn drop(&mut self) {
        if let Some(stream) = &self.stream {
            let _ = stream.shutdown(Shutdown::Write);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::find_crlf;

    #[test]
    fn finds_crlf_position() {
        assert_eq!(find_crlf(b"abc\r\ndef"), Some(3));
        assert_eq!(find_crlf(b"no newline here"), None);
        assert_eq!(find_crlf(b"\r\n"), Some(0));
    }
}
