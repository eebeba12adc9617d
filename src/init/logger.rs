//! Log sink: one `fern::Dispatch` writing timestamped, severity-prefixed
//! lines to stdout. `fern` serializes writes internally, which is the
//! single process-global lock §5 of the spec calls for.
//!
//! Prefixes and severity levels follow the source program's `log()`
//! helper exactly: `[LOG]` (3, info), `[URL]` (2, a request hit),
//! `[WARN]` (1), `[ERROR]` (0). The threshold is fixed at info, so nothing
//! below `log::LevelFilter::Info` is suppressed, but `debug!`/`trace!`
//! calls sprinkled through the hot path stay available for local runs
//! with `RUST_LOG` unset (they simply fall below the dispatch's own
//! level and are dropped by `log`'s global max-level filter instead).

use anyhow::Result;

pub fn init() -> Result<()> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            let prefix = match record.level() {
                log::Level::Error => "[ERROR]",
                log::Level::Warn => "[WARN]",
                log::Level::Info => "[LOG]",
                log::Level::Debug | log::Level::Trace => "[DEBUG]",
            };
            out.finish(format_args!(
                "{prefix} [{}] {message}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

/// Logs a URL hit (`[URL]` prefix, severity level 2 in the source's
/// numbering). `log`'s level enum has no slot between `Warn` and `Info`,
/// so this formats its own prefix rather than overload `log::info!`.
pub fn hit(url: &str) {
    println!(
        "[URL] [{}] {url}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
    );
}
