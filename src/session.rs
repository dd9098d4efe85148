//! Per-connection SMTP session: the protocol state machine.
//!
//! A session alternates between reading one command line and writing one
//! reply until the peer quits, the stream ends, or a successful STARTTLS
//! hands the raw stream back to the connection driver for the handshake.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter, ReadHalf, WriteHalf};

use crate::command;
use crate::data;
use crate::error::{Error, Result};
use crate::handler::Disposition;
use crate::server::Server;
use crate::wire::{self, Line, Reply};

/// The mail transaction envelope accumulated between MAIL and DATA.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Envelope {
    pub(crate) reverse_path: String,
    pub(crate) forward_paths: Vec<String>,
    pub(crate) declared_size: Option<u64>,
}

/// What the connection driver should do once the command loop returns.
pub(crate) enum Outcome<S> {
    /// QUIT, EOF, or an expired deadline: the connection is finished.
    Closed,
    /// A successful STARTTLS: the raw stream is handed back for the
    /// server-side handshake.
    UpgradeTls(S),
}

pub(crate) struct Session<S> {
    server: Arc<Server>,
    peer: SocketAddr,
    reader: BufReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,
    peer_greeting: String,
    tls_in_use: bool,
    envelope: Option<Envelope>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(server: Arc<Server>, peer: SocketAddr, stream: S, tls_in_use: bool) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Session {
            server,
            peer,
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            peer_greeting: String::new(),
            tls_in_use,
            envelope: None,
        }
    }

    /// Run the command loop to completion.
    ///
    /// The 220 greeting is only sent on the plaintext leg; after a TLS
    /// upgrade the client speaks first with a fresh EHLO.
    pub(crate) async fn run(mut self) -> Result<Outcome<S>> {
        tracing::debug!(peer = %self.peer, tls = self.tls_in_use, "session started");
        if !self.tls_in_use {
            let greeting = format!(
                "{} {} ESMTP Service ready",
                self.server.hostname(),
                self.server.appname()
            );
            self.send(Reply::new(220, greeting)).await?;
        }
        loop {
            let line = match wire::with_deadline(
                self.server.timeout(),
                wire::read_line(&mut self.reader, wire::MAX_COMMAND_LINE),
            )
            .await
            {
                Ok(Line::Complete(line)) => line,
                Ok(Line::Eof) => {
                    tracing::debug!(peer = %self.peer, "peer closed connection");
                    return Ok(Outcome::Closed);
                }
                Ok(Line::TooLong) => {
                    self.send(Reply::new(500, "Line too long")).await?;
                    continue;
                }
                Err(Error::Timeout) => {
                    let _ = self.send(self.shutdown_reply()).await;
                    return Ok(Outcome::Closed);
                }
                Err(err) => return Err(err),
            };
            let (verb, args) = command::parse_line(&line);
            tracing::trace!(peer = %self.peer, verb = %verb, "dispatching command");

            if self.tls_gated(&verb) {
                self.send(Reply::new(530, "Must issue a STARTTLS command first"))
                    .await?;
                continue;
            }

            match verb.as_str() {
                "HELO" => self.cmd_helo(args).await?,
                "EHLO" => self.cmd_ehlo(args).await?,
                "MAIL" => self.cmd_mail(args).await?,
                "RCPT" => self.cmd_rcpt(args).await?,
                "DATA" => {
                    if let Some(outcome) = self.cmd_data().await? {
                        return Ok(outcome);
                    }
                }
                "RSET" => {
                    self.envelope = None;
                    self.send(Reply::new(250, "OK")).await?;
                }
                "NOOP" => self.send(Reply::new(250, "OK")).await?,
                "QUIT" => {
                    let bye = format!("{} closing connection", self.server.hostname());
                    self.send(Reply::new(221, bye)).await?;
                    return Ok(Outcome::Closed);
                }
                "VRFY" | "EXPN" | "HELP" => {
                    self.send(Reply::new(502, "Command not implemented")).await?;
                }
                "AUTH" => self.cmd_auth(args).await?,
                "STARTTLS" => {
                    if !args.is_empty() {
                        self.send(Reply::new(501, "Syntax error (no parameters allowed)"))
                            .await?;
                    } else if self.server.tls_config().is_none() {
                        self.send(Reply::new(502, "Command not implemented")).await?;
                    } else if self.tls_in_use {
                        self.send(Reply::new(503, "Bad sequence of commands")).await?;
                    } else {
                        self.send(Reply::new(220, "Ready to start TLS")).await?;
                        // Hand the raw stream back; any prior session state
                        // is discarded along with this Session.
                        let reader = self.reader.into_inner();
                        let stream = reader.unsplit(self.writer.into_inner());
                        return Ok(Outcome::UpgradeTls(stream));
                    }
                }
                _ => {
                    self.send(Reply::new(500, "Syntax error, command unrecognized"))
                        .await?;
                }
            }
        }
    }

    async fn send(&mut self, reply: Reply) -> Result<()> {
        wire::with_deadline(
            self.server.timeout(),
            wire::write_reply(&mut self.writer, &reply),
        )
        .await
    }

    fn shutdown_reply(&self) -> Reply {
        Reply::new(
            421,
            format!(
                "{} Service closing transmission channel",
                self.server.hostname()
            ),
        )
    }

    /// In TLS-required mode, commands that would progress a mail
    /// transaction are refused until the session is upgraded.
    fn tls_gated(&self, verb: &str) -> bool {
        self.server.tls_required()
            && self.server.tls_config().is_some()
            && !self.tls_in_use
            && matches!(verb, "MAIL" | "RCPT" | "DATA" | "RSET")
    }

    async fn cmd_helo(&mut self, args: &str) -> Result<()> {
        if args.is_empty() {
            return self
                .send(Reply::new(501, "Domain/address argument required"))
                .await;
        }
        self.peer_greeting = args.to_string();
        self.envelope = None;
        let hostname = self.server.hostname().to_string();
        self.send(Reply::new(250, hostname)).await
    }

    async fn cmd_ehlo(&mut self, args: &str) -> Result<()> {
        if args.is_empty() {
            return self
                .send(Reply::new(501, "Domain/address argument required"))
                .await;
        }
        self.peer_greeting = args.to_string();
        self.envelope = None;
        let text = ehlo_text(&self.server, &self.peer_greeting, self.tls_in_use);
        self.send(Reply::new(250, text)).await
    }

    async fn cmd_mail(&mut self, args: &str) -> Result<()> {
        let (path, params) = match command::parse_path(args, "FROM:") {
            Some(parts) => parts,
            None => {
                return self
                    .send(Reply::new(501, "Syntax error in parameters or arguments"))
                    .await;
            }
        };
        let declared_size = match command::parse_mail_params(params) {
            Ok(size) => size,
            Err(()) => {
                return self
                    .send(Reply::new(501, "Syntax error in parameters or arguments"))
                    .await;
            }
        };
        if let Some(size) = declared_size {
            let max = self.server.max_size();
            // A refused declaration leaves any current envelope untouched.
            if max > 0 && size > max as u64 {
                return self
                    .send(Reply::new(
                        552,
                        "Message size exceeds fixed maximum message size",
                    ))
                    .await;
            }
        }
        tracing::trace!(peer = %self.peer, reverse_path = %path, ?declared_size, "sender accepted");
        self.envelope = Some(Envelope {
            reverse_path: path,
            forward_paths: Vec::new(),
            declared_size,
        });
        self.send(Reply::new(250, "OK")).await
    }

    async fn cmd_rcpt(&mut self, args: &str) -> Result<()> {
        if self.envelope.is_none() {
            return self.send(Reply::new(503, "Bad sequence of commands")).await;
        }
        let path = match command::parse_path(args, "TO:") {
            // The null path is legal only as a sender.
            Some((path, _params)) if !path.is_empty() => path,
            _ => {
                return self
                    .send(Reply::new(501, "Syntax error in parameters or arguments"))
                    .await;
            }
        };
        let at_capacity = self
            .envelope
            .as_ref()
            .map(|env| env.forward_paths.len() >= self.server.max_recipients())
            .unwrap_or(true);
        if at_capacity {
            return self.send(Reply::new(452, "Too many recipients")).await;
        }
        if let Some(envelope) = self.envelope.as_mut() {
            envelope.forward_paths.push(path);
        }
        self.send(Reply::new(250, "OK")).await
    }

    /// The two-stage DATA exchange: 354, body, terminal reply. The
    /// envelope is cleared on every path back to command mode.
    async fn cmd_data(&mut self) -> Result<Option<Outcome<S>>> {
        let ready = self
            .envelope
            .as_ref()
            .map(|env| !env.forward_paths.is_empty())
            .unwrap_or(false);
        if !ready {
            self.send(Reply::new(503, "Bad sequence of commands")).await?;
            return Ok(None);
        }
        self.send(Reply::new(354, "End data with <CR><LF>.<CR><LF>"))
            .await?;
        let read = data::read_body(
            &mut self.reader,
            self.server.max_size(),
            self.server.timeout(),
        )
        .await;
        let envelope = self.envelope.take().unwrap_or_default();
        match read {
            Ok(body) => {
                let disposition = self.server.handler().handle(
                    self.peer,
                    &envelope.reverse_path,
                    &envelope.forward_paths,
                    &body,
                );
                tracing::debug!(
                    peer = %self.peer,
                    from = %envelope.reverse_path,
                    recipients = envelope.forward_paths.len(),
                    bytes = body.len(),
                    ?disposition,
                    "message handled"
                );
                let reply = match disposition {
                    Disposition::Accepted => Reply::new(250, "OK"),
                    Disposition::Deferred => {
                        Reply::new(451, "Requested action aborted: local error in processing")
                    }
                    Disposition::Rejected => Reply::new(554, "Transaction failed"),
                };
                self.send(reply).await?;
                Ok(None)
            }
            Err(Error::MaxSizeExceeded) => {
                self.send(Reply::new(
                    552,
                    "Requested mail action aborted: exceeded storage allocation",
                ))
                .await?;
                Ok(None)
            }
            Err(Error::Timeout) => {
                let _ = self.send(self.shutdown_reply()).await;
                Ok(Some(Outcome::Closed))
            }
            Err(err) => Err(err),
        }
    }

    async fn cmd_auth(&mut self, args: &str) -> Result<()> {
        let auth = match self.server.auth_handler() {
            Some(auth) => auth,
            None => return self.send(Reply::new(502, "Command not implemented")).await,
        };
        if args.is_empty() {
            return self
                .send(Reply::new(501, "Syntax error in parameters or arguments"))
                .await;
        }
        let (mechanism, initial) = match args.split_once(' ') {
            Some((mech, rest)) => (mech.to_ascii_uppercase(), Some(rest.trim())),
            None => (args.to_ascii_uppercase(), None),
        };
        match auth.authenticate(&mechanism, initial) {
            Some(identity) => {
                tracing::debug!(peer = %self.peer, %identity, "authentication accepted");
                self.send(Reply::new(235, "2.7.0 Authentication successful"))
                    .await
            }
            None => {
                self.send(Reply::new(535, "Authentication credentials invalid"))
                    .await
            }
        }
    }
}

/// Build the multi-line EHLO text: the greeting line, then the extension
/// lines in their advertised order.
pub(crate) fn ehlo_text(server: &Server, peer_greeting: &str, tls_in_use: bool) -> String {
    let mut lines = vec![format!("{} greets {}", server.hostname(), peer_greeting)];
    lines.push("PIPELINING".to_string());
    lines.push(format!("SIZE {}", server.max_size()));
    if server.tls_config().is_some() && !tls_in_use {
        lines.push("STARTTLS".to_string());
    }
    if let Some(auth) = server.auth_handler() {
        lines.push(format!("AUTH {}", auth.mechanisms().join(" ")));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::AuthHandler;

    fn test_server() -> Server {
        Server::new(|_: SocketAddr, _: &str, _: &[String], _: &[u8]| Disposition::Accepted)
            .with_hostname("mail.example.com")
    }

    /// A certificate-less TLS config is enough to flip advertisement.
    fn empty_tls_config() -> Arc<rustls::ServerConfig> {
        Arc::new(
            rustls::ServerConfig::builder()
                .with_safe_defaults()
                .with_no_client_auth()
                .with_cert_resolver(Arc::new(rustls::server::ResolvesServerCertUsingSni::new())),
        )
    }

    struct PlainAuth;

    impl AuthHandler for PlainAuth {
        fn mechanisms(&self) -> Vec<String> {
            vec!["PLAIN".to_string(), "LOGIN".to_string()]
        }

        fn authenticate(&self, _mechanism: &str, _initial: Option<&str>) -> Option<String> {
            None
        }
    }

    #[test]
    fn ehlo_lists_baseline_extensions() {
        let server = test_server();
        let text = ehlo_text(&server, "client.example.com", false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "mail.example.com greets client.example.com");
        assert!(lines.contains(&"PIPELINING"));
        assert!(lines.contains(&"SIZE 0"));
        assert!(!lines.iter().any(|l| l.starts_with("STARTTLS")));
        assert!(!lines.iter().any(|l| l.starts_with("AUTH")));
    }

    #[test]
    fn ehlo_advertises_configured_max_size() {
        let server = test_server().with_max_size(12345);
        let text = ehlo_text(&server, "client", false);
        assert!(text.lines().any(|l| l == "SIZE 12345"));
    }

    #[test]
    fn ehlo_advertises_starttls_only_before_upgrade() {
        let server = test_server().with_tls_config(empty_tls_config());
        let before = ehlo_text(&server, "client", false);
        assert!(before.lines().any(|l| l == "STARTTLS"));
        let after = ehlo_text(&server, "client", true);
        assert!(!after.lines().any(|l| l == "STARTTLS"));
    }

    #[test]
    fn ehlo_advertises_auth_mechanisms() {
        let server = test_server().with_auth_handler(PlainAuth);
        let text = ehlo_text(&server, "client", false);
        assert!(text.lines().any(|l| l == "AUTH PLAIN LOGIN"));
    }
}
