use anyhow::Context;
use wizbal::{Registry, Service};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "_http._tcp.example.com".to_string());
    let service = Service::from_name(name)?;

    // The default registry queries the system resolver and probes every
    // candidate with `HEAD /`.
    let registry = Registry::builder()
        .build()
        .context("failed to build Registry")?;

    let pool = registry.get_pool(&service).await?;
    println!("ALIVE={:?}", pool.backends());

    let backend = registry.get_backend(&service).await?;
    println!("SELECTED={backend}");

    Ok(())
}
