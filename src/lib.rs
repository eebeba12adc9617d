pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod init;
pub mod io;
pub mod server;
pub mod tunnel;
pub mod upstream;

use anyhow::Result;

/// Wires the logger, the Ctrl+C shutdown signal, and the accept loop
/// together. The binary entry point does nothing but call this.
pub async fn run() -> Result<()> {
    init::logger::init()?;
    let shutdown = init::shutdown::init()?;
    server::serve(shutdown).await?;
    log::info!("Shutdown complete.");
    Ok(())
}
