use anyhow::Context;
use certbroker::cli::ServiceArguments;
use certbroker::{CRATE_NAME, Certbot, CertificateService, Configuration, server};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ENV_FILTER_NAME: &str = "CERTBROKER_LOG";

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Installing SIGTERM handler failed: {e}");
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
    info!("Shutdown requested");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServiceArguments::parse();
    let filter = EnvFilter::try_from_env(ENV_FILTER_NAME).unwrap_or_else(|_| {
        EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| {
            EnvFilter::new(if args.verbose {
                "certbroker=debug,info"
            } else {
                "info"
            })
        })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Arc::new(Configuration::load(args).context("Loading configuration failed")?);
    info!(
        "{CRATE_NAME} {} starting: allowed domains {:?}, NS1 domains {:?}, {} environment, certificates in {}",
        env!("CARGO_PKG_VERSION"),
        config.allowed_domains,
        config.ns1_domains,
        config.environment,
        config.letsencrypt_dir.display()
    );
    let runner = Arc::new(Certbot::from_config(&config));
    let service = Arc::new(CertificateService::new(config.clone(), runner));

    let listener = TcpListener::bind(config.listen_address)
        .await
        .context(format!("Binding to {} failed", config.listen_address))?;
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));
    server::serve(listener, service, shutdown).await
}
