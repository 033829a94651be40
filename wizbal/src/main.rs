use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wizbal::{Proxy, Registry};

/// Reverse proxy that routes by Host header to backends discovered via DNS SRV.
#[derive(Debug, Parser)]
#[command(name = "wizbal", version)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Strip that portion from the host header.
    #[arg(long, default_value = ".app.example.com")]
    host: String,

    /// Resolve the stripped host header relative to this domain.
    #[arg(long, default_value = "srv.example.com")]
    domain: String,

    /// How long a resolved set of backends is reused.
    #[arg(long, default_value_t = 10)]
    ttl_secs: u64,

    /// Timeout of a single backend liveness probe.
    #[arg(long, default_value_t = 2000)]
    probe_timeout_ms: u64,

    /// How many backends are probed at once during a refresh.
    #[arg(long, default_value_t = 8)]
    probe_concurrency: usize,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wizbal=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let registry = Registry::builder()
        .ttl(Duration::from_secs(args.ttl_secs))
        .probe_timeout(Duration::from_millis(args.probe_timeout_ms))
        .probe_concurrency(args.probe_concurrency)
        .build()
        .context("failed to build registry")?;

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("listening on {} failed", args.listen))?;

    tracing::info!(
        host = %args.host,
        domain = %args.domain,
        ttl_secs = args.ttl_secs,
        "started"
    );

    Proxy::new(registry, args.host, args.domain)
        .serve(listener)
        .await
        .context("proxy stopped")
}
