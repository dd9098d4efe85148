//! Server configuration, TLS setup, and the connection accept loop.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::LazyConfigAcceptor;

use crate::error::{Error, Result};
use crate::handler::{AuthHandler, Handler};
use crate::session::{Outcome, Session};
use crate::wire;

/// SMTP server configuration. Immutable once serving and shared across
/// sessions behind an `Arc`.
pub struct Server {
    hostname: String,
    appname: String,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    tls_required: bool,
    max_size: usize,
    max_recipients: usize,
    timeout: Duration,
    handler: Arc<dyn Handler>,
    auth_handler: Option<Arc<dyn AuthHandler>>,
}

impl Server {
    /// Create a server with default settings and the given delivery
    /// handler. The hostname defaults to the OS hostname.
    pub fn new<H: Handler + 'static>(handler: H) -> Self {
        Server {
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            appname: "smtpd".to_string(),
            tls_config: None,
            tls_required: false,
            max_size: 0,
            max_recipients: 100,
            timeout: Duration::from_secs(300),
            handler: Arc::new(handler),
            auth_handler: None,
        }
    }

    /// Hostname announced in the greeting and in the EHLO reply.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Application name announced after the hostname in the greeting.
    pub fn with_appname(mut self, appname: impl Into<String>) -> Self {
        self.appname = appname.into();
        self
    }

    /// Enable STARTTLS with an already-built TLS configuration.
    pub fn with_tls_config(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Load the certificate chain and private key from PEM files and
    /// enable STARTTLS.
    pub fn with_tls_files(self, cert: &Path, key: &Path) -> Result<Self> {
        let config = tls_config_from_pem_files(cert, key)?;
        Ok(self.with_tls_config(config))
    }

    /// Refuse mail transactions until the client has issued STARTTLS.
    /// Ignored unless a TLS configuration is present.
    pub fn with_tls_required(mut self, required: bool) -> Self {
        self.tls_required = required;
        self
    }

    /// Maximum message size in bytes, advertised via the SIZE extension.
    /// Zero means unlimited.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Maximum number of recipients accepted per transaction.
    pub fn with_max_recipients(mut self, max_recipients: usize) -> Self {
        self.max_recipients = max_recipients;
        self
    }

    /// Per-session read/write deadline. Zero disables the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Install the reserved authentication hook and advertise AUTH.
    pub fn with_auth_handler<A: AuthHandler + 'static>(mut self, auth_handler: A) -> Self {
        self.auth_handler = Some(Arc::new(auth_handler));
        self
    }

    pub(crate) fn hostname(&self) -> &str {
        &self.hostname
    }

    pub(crate) fn appname(&self) -> &str {
        &self.appname
    }

    pub(crate) fn tls_config(&self) -> Option<&Arc<rustls::ServerConfig>> {
        self.tls_config.as_ref()
    }

    pub(crate) fn tls_required(&self) -> bool {
        self.tls_required
    }

    pub(crate) fn max_size(&self) -> usize {
        self.max_size
    }

    pub(crate) fn max_recipients(&self) -> usize {
        self.max_recipients
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub(crate) fn auth_handler(&self) -> Option<Arc<dyn AuthHandler>> {
        self.auth_handler.clone()
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!(
            addr = %listener.local_addr()?,
            hostname = %self.hostname,
            "SMTP server listening"
        );
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = serve_connection(server, stream, peer).await {
                    tracing::debug!(%peer, error = %err, "session ended with error");
                }
            });
        }
    }

    /// Bind `addr` and serve. Convenience wrapper around [`Server::serve`].
    pub async fn listen(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        Arc::new(self).serve(listener).await
    }
}

/// Drive one connection: the plaintext command loop and, if the session
/// negotiated STARTTLS, the handshake followed by the TLS command loop.
///
/// Exposed so embedders that own their accept loop can feed streams in
/// directly.
pub async fn serve_connection<S>(server: Arc<Server>, stream: S, peer: SocketAddr) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let session = Session::new(Arc::clone(&server), peer, stream, false);
    let raw = match session.run().await? {
        Outcome::Closed => return Ok(()),
        Outcome::UpgradeTls(raw) => raw,
    };
    let config = match server.tls_config() {
        Some(config) => Arc::clone(config),
        None => return Ok(()),
    };
    let mut acceptor = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), raw);
    let start = match wire::with_deadline(server.timeout(), &mut acceptor).await {
        Ok(start) => start,
        Err(Error::Io(err)) => {
            // The ClientHello was rejected, so the plaintext side may
            // still be writable; report the failure there.
            if let Some(mut io) = acceptor.take_io() {
                let _ = io.write_all(b"403 4.7.0 TLS handshake failed\r\n").await;
                let _ = io.flush().await;
            }
            return Err(Error::TlsHandshake(err));
        }
        Err(err) => return Err(err),
    };
    let tls = match wire::with_deadline(server.timeout(), start.into_stream(config)).await {
        Ok(tls) => tls,
        Err(Error::Io(err)) => return Err(Error::TlsHandshake(err)),
        Err(err) => return Err(err),
    };
    tracing::debug!(%peer, "TLS established");
    // The upgraded session starts from a clean slate; only the TLS flag
    // carries over. It cannot ask for a second upgrade.
    let session = Session::new(server, peer, tls, true);
    session.run().await.map(|_| ())
}

/// Build a TLS server configuration from PEM-encoded certificate chain and
/// private key files.
pub fn tls_config_from_pem_files(cert: &Path, key: &Path) -> Result<Arc<rustls::ServerConfig>> {
    let cert_pem = std::fs::read(cert)?;
    let key_pem = std::fs::read(key)?;
    tls_config_from_pem(&cert_pem, &key_pem)
}

/// Build a TLS server configuration from PEM-encoded bytes. PKCS#8 keys
/// are preferred, with PKCS#1 RSA keys accepted as a fallback.
pub fn tls_config_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<rustls::ServerConfig>> {
    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .map_err(|_| Error::TlsConfig("failed to parse certificate".into()))?
        .into_iter()
        .map(rustls::Certificate)
        .collect::<Vec<_>>();
    if certs.is_empty() {
        return Err(Error::TlsConfig("no certificate found".into()));
    }
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut &key_pem[..])
        .map_err(|_| Error::TlsConfig("failed to parse private key".into()))?;
    if keys.is_empty() {
        keys = rustls_pemfile::rsa_private_keys(&mut &key_pem[..])
            .map_err(|_| Error::TlsConfig("failed to parse private key".into()))?;
    }
    let key = match keys.into_iter().next() {
        Some(key) => rustls::PrivateKey(key),
        None => return Err(Error::TlsConfig("no private key found".into())),
    };
    let config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| Error::TlsConfig(err.to_string()))?;
    Ok(Arc::new(config))
}
