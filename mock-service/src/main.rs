use anyhow::Context;
use mock_service::{AppState, Seed};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mock_service=info,tower_http=info")),
        )
        .init();

    // Seeded users follow the benchmarker's userdata convention: the
    // password is the account name twice, and the first ten users are admins.
    let names: Vec<String> = (0..50).map(|i| format!("user{i:03}")).collect();
    let state = AppState::new(Seed::from_names(&names, 10, 100)).shared();

    let addr: SocketAddr = ADDR.parse().context("Invalid listen address")?;
    info!("Mock service listening on {addr}");
    mock_service::run(addr, state).await?;
    Ok(())
}
