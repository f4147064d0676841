use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use trino_pg_gateway::backend::TrinoConnector;
use trino_pg_gateway::config::{Config, LISTEN_ADDR};
use trino_pg_gateway::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trino_pg_gateway=info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let config = Config::from_env();
    let connector = TrinoConnector::connect(&config)?;
    connector
        .probe()
        .await
        .with_context(|| format!("failed to reach the Trino cluster at {}", config.base_url()))?;
    info!(
        host = %config.trino_host,
        port = %config.trino_port,
        catalog = %config.trino_catalog,
        schema = %config.trino_schema,
        "connected to trino"
    );

    let listener = TcpListener::bind(LISTEN_ADDR)
        .await
        .with_context(|| format!("failed to bind {LISTEN_ADDR}"))?;
    info!("PostgreSQL server is up and running at [{LISTEN_ADDR}]");

    Server::new(Arc::new(connector)).serve(listener).await
}
