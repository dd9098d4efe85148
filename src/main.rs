use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use structopt::StructOpt;

use smtpd::{Disposition, Server};

#[derive(Debug, StructOpt)]
#[structopt(name = "smtpd", about = "A minimal SMTP server that prints received mail")]
struct Opt {
    /// Listening address
    #[structopt(short = "l", long = "listen", default_value = "0.0.0.0:2525")]
    listen: String,

    /// Hostname announced in the greeting (default: OS hostname)
    #[structopt(long = "hostname")]
    hostname: Option<String>,

    /// Maximum message size in bytes (0 = unlimited)
    #[structopt(long = "max-size", default_value = "0")]
    max_size: usize,

    /// Maximum recipients per transaction
    #[structopt(long = "max-recipients", default_value = "100")]
    max_recipients: usize,

    /// TLS certificate file (PEM); enables STARTTLS together with --tls-key
    #[structopt(long = "tls-cert", parse(from_os_str))]
    tls_cert: Option<PathBuf>,

    /// TLS private key file (PEM)
    #[structopt(long = "tls-key", parse(from_os_str))]
    tls_key: Option<PathBuf>,

    /// Refuse mail transactions until the client has issued STARTTLS
    #[structopt(long = "tls-required")]
    tls_required: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opt = Opt::from_args();

    let mut server = Server::new(|peer: SocketAddr, from: &str, to: &[String], body: &[u8]| {
        println!(
            "message from {peer}: {from} -> {}, {} bytes",
            to.join(", "),
            body.len()
        );
        Disposition::Accepted
    })
    .with_max_size(opt.max_size)
    .with_max_recipients(opt.max_recipients)
    .with_tls_required(opt.tls_required);

    if let Some(hostname) = opt.hostname {
        server = server.with_hostname(hostname);
    }
    if let (Some(cert), Some(key)) = (&opt.tls_cert, &opt.tls_key) {
        server = server.with_tls_files(cert, key)?;
        eprintln!("[INFO] STARTTLS enabled with certificate {:?}", cert);
    }

    eprintln!("[INFO] listening on {}", opt.listen);
    server.listen(&opt.listen).await?;
    Ok(())
}
