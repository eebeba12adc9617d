//! Accept loop and supervised restart.
//!
//! Grounded on `original_source/seal-server.py`'s `ThreadingServer.run`/
//! `main()` (bind, `listen(backlog=50)`, one handler per accepted
//! connection, linear-backoff restart capped at 30s then exit 1) and the
//! teacher's accept-with-shutdown-race idiom
//! (`crates/httproxy/src/start/mod.rs::handle_local_target`). Backlog is
//! configured via `socket2`, which `smol::net::TcpListener::bind` has no
//! way to express. This is borrowed from the pack's `hyperium-hyper`
//! member, which sets up a listener by hand for the same reason.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use smol::future;
use smol::net::{TcpListener, TcpStream};
use socket2::{Domain, Socket, Type};

use crate::config::{
    BACKLOG, BIND_ADDR, RESTART_BACKOFF_INITIAL, RESTART_BACKOFF_LIMIT, RESTART_BACKOFF_STEP,
};
use crate::error::{classify, Severity};
use crate::handler::Handler;
use crate::init::shutdown::GracefulShutdown;

/// Runs the accept loop. If it faults, restarts it after a linear
/// backoff (3s, 6s, 9s, ...); once the backoff exceeds
/// `RESTART_BACKOFF_LIMIT` it gives up and exits the process with code 1.
pub async fn serve(shutdown: GracefulShutdown) -> Result<()> {
    let mut backoff = RESTART_BACKOFF_INITIAL;
    loop {
        match accept_loop(BIND_ADDR, &shutdown).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                if backoff > RESTART_BACKOFF_LIMIT {
                    log::error!("too many errors, stop trying to restart service: {err}");
                    std::process::exit(1);
                }
                log::warn!("service down: {err}. restarting in {backoff}s");
                smol::Timer::after(Duration::from_secs(backoff)).await;
                backoff += RESTART_BACKOFF_STEP;
            }
        }
    }
}

fn bind_with_backlog(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    Ok(TcpListener::try_from(std::net::TcpListener::from(socket))?)
}

async fn accept_loop(addr: SocketAddr, shutdown: &GracefulShutdown) -> Result<()> {
    let listener = bind_with_backlog(addr)?;
    log::info!("Starting proxy service at {addr}");

    loop {
        let Some((stream, peer)) = accept_or_shutdown(&listener, shutdown).await? else {
            break;
        };

        log::debug!("accept connection from {peer}");
        let shutdown = shutdown.clone();
        smol::spawn(async move {
            let _guard = shutdown.inflight_guard();
            if let Err(err) = Handler::new(stream, peer).run().await {
                log_handler_error(peer, &err);
            }
        })
        .detach();
    }

    shutdown.wait_inflight_zero().await;
    Ok(())
}

async fn accept_or_shutdown(
    listener: &TcpListener,
    shutdown: &GracefulShutdown,
) -> std::io::Result<Option<(TcpStream, SocketAddr)>> {
    let accept_fut = async { listener.accept().await.map(Some) };
    let shutdown_fut = async {
        shutdown.wait_shutting_down().await;
        Ok(None)
    };
    future::or(accept_fut, shutdown_fut).await
}

fn log_handler_error(peer: SocketAddr, err: &anyhow::Error) {
    match classify(err) {
        Severity::Routine => log::info!("peer={peer} {err}"),
        Severity::Warn | Severity::Error => log::warn!("peer={peer} {err}"),
    }
}
