//! Per-Handler cached connection to an upstream `(host, port)`.
//!
//! Grounded on `original_source/seal-server.py`'s
//! `HttpProxyHandler.send_with_retry`: keep one connection alive across
//! requests to the same target, but retry up to
//! [`crate::config::UPSTREAM_MAX_ATTEMPTS`] times, reopening the
//! connection, if either the connect or the write fails, since HTTP is
//! stateless and a server-closed keep-alive connection is routine.

use anyhow::{Context, Result};
use smol::future;
use smol::net::TcpStream;

use crate::config::{UPSTREAM_CONNECT_TIMEOUT, UPSTREAM_MAX_ATTEMPTS};
use crate::error::ProxyError;
use crate::io::stream::{ByteStreamIn, ByteStreamOut};

pub struct UpstreamPool {
    slot: Option<Slot>,
}

struct Slot {
    host: String,
    port: u16,
    input: ByteStreamIn,
    output: ByteStreamOut,
}

impl UpstreamPool {
    pub fn new() -> Self {
        Self { slot: None }
    }

    pub fn target(&self) -> Option<(&str, u16)> {
        self.slot.as_ref().map(|s| (s.host.as_str(), s.port))
    }

    pub fn close(&mut self) {
        self.slot = None;
    }

    /// Writes `bytes` to the `(host, port)` target, reusing the current
    /// slot if it already points there. Reconnects and retries on any
    /// connect or write failure, up to `UPSTREAM_MAX_ATTEMPTS` attempts.
    pub async fn send(&mut self, host: &str, port: u16, bytes: &[u8]) -> Result<()> {
        let mut attempt = 0;
        loop {
            if !self.targets(host, port) {
                if let Err(_err) = self.reconnect(host, port).await {
                    self.close();
                    attempt += 1;
                    if attempt >= UPSTREAM_MAX_ATTEMPTS {
                        return Err(ProxyError::UpstreamUnavailable)
                            .context(format!("unable to reach {host}:{port}"));
                    }
                    continue;
                }
            }

            let result = match self.slot.as_mut() {
                Some(slot) => slot.output.write(bytes).await,
                None => unreachable!("reconnect always populates the slot on success"),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(_) => {
                    self.close();
                    attempt += 1;
                    if attempt >= UPSTREAM_MAX_ATTEMPTS {
                        return Err(ProxyError::UpstreamUnavailable)
                            .context(format!("unable to reach {host}:{port}"));
                    }
                }
            }
        }
    }

    fn targets(&self, host: &str, port: u16) -> bool {
        self.slot
            .as_ref()
            .is_some_and(|s| s.host == host && s.port == port)
    }

    async fn reconnect(&mut self, host: &str, port: u16) -> Result<()> {
        self.close();
        let stream = connect_with_timeout(host, port).await?;
        let read_half = stream.clone();
        self.slot = Some(Slot {
            host: host.to_string(),
            port,
            input: ByteStreamIn::new(read_half),
            output: ByteStreamOut::new(stream),
        });
        Ok(())
    }

    pub fn streams(&mut self) -> Option<(&mut ByteStreamIn, &mut ByteStreamOut)> {
        self.slot.as_mut().map(|s| (&mut s.input, &mut s.output))
    }

    /// Takes ownership of the current slot's socket if it already targets
    /// `(host, port)`, leaving the pool empty. Used by `CONNECT` handling
    /// to hand a reused upstream connection off to the tunnel instead of
    /// dialing a fresh one.
    pub fn take_if_targets(&mut self, host: &str, port: u16) -> Option<TcpStream> {
        if !self.targets(host, port) {
            return None;
        }
        let slot = self.slot.take()?;
        let socket = slot.output.into_inner();
        drop(slot.input.into_inner());
        Some(socket)
    }
}

impl Default for UpstreamPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens a fresh connection to `host:port`, bounded by
/// `UPSTREAM_CONNECT_TIMEOUT`.
pub async fn connect_with_timeout(host: &str, port: u16) -> Result<TcpStream> {
    let connect = async {
        TcpStream::connect((host, port))
            .await
            .map_err(|_| anyhow::Error::from(ProxyError::UpstreamUnavailable))
    };
    let timeout = async {
        smol::Timer::after(UPSTREAM_CONNECT_TIMEOUT).await;
        Err(ProxyError::UpstreamUnavailable.into())
    };
    future::race(connect, timeout)
        .await
        .context(format!("connecting to {host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_pool_has_no_target() {
        let pool = UpstreamPool::new();
        assert_eq!(pool.target(), None);
    }

    #[test]
    fn closing_clears_target() {
        smol::block_on(async {
            let mut pool = UpstreamPool::new();
            // can't actually connect in a unit test without a live listener;
            // exercise only the bookkeeping path.
            pool.close();
            assert_eq!(pool.target(), None);
        });
    }

    #[test]
    fn take_if_targets_returns_socket_and_empties_slot() {
        use smol::net::TcpListener;

        smol::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();

            let mut pool = UpstreamPool::new();
            let (connected, _accepted) =
                smol::future::zip(pool.reconnect(&addr.ip().to_string(), addr.port()), listener.accept())
                    .await;
            connected.unwrap();

            assert!(pool.target().is_some());
            assert!(pool.take_if_targets("unrelated.example", 1).is_none());
            let socket = pool.take_if_targets(&addr.ip().to_string(), addr.port());
            assert!(socket.is_some());
            assert_eq!(pool.target(), None);
        });
    }
}
