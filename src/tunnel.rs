//! Bidirectional opaque byte pump for `CONNECT` tunnels.
//!
//! Grounded near-verbatim on `crates/rproxy/src/start/mod.rs::tunnel`: two
//! `smol::io::copy` tasks racing each other, with the still-open side
//! half-closed for writing and drained once the first direction hits EOF.
//! `crates/httproxy`'s own tunnel just awaits both copies in sequence,
//! which can truncate a response still in flight after the client has
//! half-closed its write side, so the `rproxy` version is used here
//! instead.

use std::net::Shutdown;

use anyhow::Result;
use smol::future;
use smol::net::TcpStream;

enum Finished {
    ClientToRemote,
    RemoteToClient,
}

/// Relays bytes between `client` and `remote` until either direction
/// reaches EOF, then half-closes the other side and drains it.
pub async fn run(client: TcpStream, remote: TcpStream) -> Result<()> {
    let client_rx = client.clone();
    let client_tx = client.clone();
    let remote_rx = remote.clone();
    let remote_tx = remote.clone();

    let mut client_to_remote =
        smol::spawn(async move { smol::io::copy(client_rx, remote_tx).await });
    let mut remote_to_client =
        smol::spawn(async move { smol::io::copy(remote_rx, client_tx).await });

    let (finished, first) = future::race(
        async { (Finished::ClientToRemote, (&mut client_to_remote).await) },
        async { (Finished::RemoteToClient, (&mut remote_to_client).await) },
    )
    .await;

    match finished {
        Finished::ClientToRemote => {
            let _ = remote.shutdown(Shutdown::Write);
            let _ = remote_to_client.await;
        }
        Finished::RemoteToClient => {
            let _ = client.shutdown(Shutdown::Write);
            let _ = client_to_remote.await;
        }
    }

    first?;
    Ok(())
}
