//! Application-facing hooks: message delivery and the reserved
//! authentication extension point.

use std::net::SocketAddr;

/// Outcome of handing a completed message to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The message was accepted; the client sees `250`.
    Accepted,
    /// A transient local problem; the client sees `451` and may retry.
    Deferred,
    /// The message was refused; the client sees `554`.
    Rejected,
}

/// Receives one fully read message per completed mail transaction.
///
/// The body is the raw dot-unstuffed bytes; no trace headers are added and
/// no MIME parsing is done. Handlers are shared across sessions and invoked
/// concurrently, so they must be safe for concurrent use.
pub trait Handler: Send + Sync {
    fn handle(&self, peer: SocketAddr, from: &str, to: &[String], body: &[u8]) -> Disposition;
}

impl<F> Handler for F
where
    F: Fn(SocketAddr, &str, &[String], &[u8]) -> Disposition + Send + Sync,
{
    fn handle(&self, peer: SocketAddr, from: &str, to: &[String], body: &[u8]) -> Disposition {
        self(peer, from, to, body)
    }
}

/// Reserved SASL extension point.
///
/// Configuring one advertises `AUTH` with the listed mechanisms in the
/// EHLO reply and enables a single-shot AUTH exchange. Challenge-response
/// mechanisms are not driven by the core.
pub trait AuthHandler: Send + Sync {
    /// Mechanism names to advertise, e.g. `PLAIN`.
    fn mechanisms(&self) -> Vec<String>;

    /// Authenticate one exchange. `Some(identity)` grants the session,
    /// `None` denies it.
    fn authenticate(&self, mechanism: &str, initial_response: Option<&str>) -> Option<String>;
}
