//! Runtime constants. The source program takes no flags (§6 of the spec
//! forbids a CLI surface), so these are plain `const`s rather than a
//! parsed `Args` struct.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default bind address: `0.0.0.0:8085`.
pub const BIND_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8085);

/// TCP accept backlog.
pub const BACKLOG: i32 = 50;

/// Read buffer capacity for a [`crate::io::stream::ByteStreamIn`], also the
/// largest `Content-Length` this proxy will buffer eagerly rather than
/// stream.
pub const READ_BUFFER_CAP: usize = 128 * 1024;

/// Max attempts `UpstreamPool::send` makes before failing with
/// `UpstreamUnavailable`.
pub const UPSTREAM_MAX_ATTEMPTS: u32 = 3;

/// Idle read timeout on the client socket between keep-alive requests.
pub const CLIENT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Connect timeout when dialing an upstream.
pub const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Initial supervisor restart backoff, in seconds.
pub const RESTART_BACKOFF_INITIAL: u64 = 3;

/// Per-restart backoff increment, in seconds.
pub const RESTART_BACKOFF_STEP: u64 = 3;

/// Backoff ceiling; once exceeded the supervisor gives up.
pub const RESTART_BACKOFF_LIMIT: u64 = 30;
