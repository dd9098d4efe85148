//! # smtpd
//!
//! A minimal, embeddable SMTP server.
//!
//! The crate implements the receiving side of SMTP (RFC 5321) with the
//! SIZE extension (RFC 1870) and opportunistic TLS via STARTTLS
//! (RFC 3207). Each accepted connection is served by an independent task
//! that runs the protocol state machine; completed messages are passed to
//! an application-supplied [`Handler`], which decides their fate.
//!
//! ## Quick start
//!
//! ```no_run
//! use smtpd::{Disposition, Server};
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::new(|peer: SocketAddr, from: &str, to: &[String], body: &[u8]| {
//!         println!("{peer}: {from} -> {to:?} ({} bytes)", body.len());
//!         Disposition::Accepted
//!     });
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:2525").await?;
//!     Arc::new(server).serve(listener).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported commands
//!
//! `HELO`, `EHLO`, `MAIL`, `RCPT`, `DATA`, `RSET`, `NOOP`, `QUIT`, and
//! `STARTTLS` when a TLS configuration is present. `VRFY`, `EXPN`, and
//! `HELP` answer 502. `AUTH` is a reserved hook: see [`AuthHandler`].
//!
//! ## Notes
//!
//! - Messages live in memory only; storage, queueing, and relay belong to
//!   the application.
//! - The body reaches the handler as raw bytes, dot-unstuffed but
//!   otherwise untouched; no MIME parsing, no trace headers.
//! - `max_size` bounds the message body (advertised via SIZE; 0 means
//!   unlimited); `max_recipients` bounds a transaction (default 100).
//! - With `tls_required`, mail transactions are refused with 530 until
//!   the client upgrades.

mod command;
mod data;
mod error;
mod handler;
mod server;
mod session;
mod wire;

pub use error::{Error, Result};
pub use handler::{AuthHandler, Disposition, Handler};
pub use server::{serve_connection, tls_config_from_pem, tls_config_from_pem_files, Server};
