//! Error types for the SMTP server core.
//!
//! Protocol-level problems (bad syntax, bad sequence, policy refusals) are
//! answered on the wire and never surface here. This enum covers only the
//! conditions that end a session or prevent the server from starting.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read or write exceeded the session deadline.
    #[error("session deadline expired")]
    Timeout,

    /// The peer closed the connection in the middle of a message body.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The message body exceeded the configured maximum size. Internal to
    /// the DATA reader; the session answers 552 and keeps the connection.
    #[error("message exceeds fixed maximum message size")]
    MaxSizeExceeded,

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(std::io::Error),

    #[error("invalid TLS configuration: {0}")]
    TlsConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
