//! Error taxonomy for the proxy's I/O and protocol layers.
//!
//! Every fallible path in this crate ultimately returns `anyhow::Error`,
//! but the Handler's outer frame needs to know *how loudly* to log a
//! failure: a client hanging up mid keep-alive is routine, a malformed
//! request is not. `ProxyError` carries that distinction; call sites wrap
//! it with `anyhow::Error::from` (or `?` via `From`) and let
//! `ProxyError::log_severity` decide the level when it bubbles up.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyError {
    ConnectionClosed,
    ConnectionReset,
    LineTooLong,
    BadMessage,
    BadMethod,
    BadTarget,
    UpstreamUnavailable,
    TunnelTerminated,
}

/// Severity a [`ProxyError`] should be logged at, per the propagation
/// policy: routine disconnects are unremarkable, everything else is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warn,
    Routine,
}

impl ProxyError {
    pub fn log_severity(self) -> Severity {
        match self {
            ProxyError::ConnectionClosed | ProxyError::ConnectionReset => Severity::Routine,
            ProxyError::BadMessage | ProxyError::BadMethod | ProxyError::BadTarget => {
                Severity::Warn
            }
            ProxyError::LineTooLong | ProxyError::UpstreamUnavailable => Severity::Warn,
            ProxyError::TunnelTerminated => Severity::Routine,
        }
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ProxyError::ConnectionClosed => "connection closed",
            ProxyError::ConnectionReset => "connection reset",
            ProxyError::LineTooLong => "line too long",
            ProxyError::BadMessage => "malformed HTTP message",
            ProxyError::BadMethod => "unknown HTTP method",
            ProxyError::BadTarget => "unparseable request target",
            ProxyError::UpstreamUnavailable => "upstream unavailable",
            ProxyError::TunnelTerminated => "tunnel terminated",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ProxyError {}

/// Pulls the first [`ProxyError`] out of an error chain, if any is
/// present. Used by the Handler's outer frame to pick a log severity;
/// errors with no `ProxyError` in their chain (e.g. raw I/O failures from
/// `smol`) are treated as unexpected.
pub fn classify(err: &anyhow::Error) -> Severity {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<ProxyError>() {
            return e.log_severity();
        }
    }
    Severity::Warn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routine_errors_are_quiet() {
        assert_eq!(ProxyError::ConnectionClosed.log_severity(), Severity::Routine);
        assert_eq!(ProxyError::ConnectionReset.log_severity(), Severity::Routine);
    }

    #[test]
    fn protocol_errors_are_warnings() {
        assert_eq!(ProxyError::BadMethod.log_severity(), Severity::Warn);
        assert_eq!(ProxyError::BadMessage.log_severity(), Severity::Warn);
    }

    #[test]
    fn classify_walks_the_chain() {
        let err = anyhow::Error::new(ProxyError::BadTarget).context("while rewriting request");
        assert_eq!(classify(&err), Severity::Warn);
    }

    #[test]
    fn classify_defaults_to_warn_for_unknown_errors() {
        let err = anyhow::anyhow!("some io error");
        assert_eq!(classify(&err), Severity::Warn);
    }
}
