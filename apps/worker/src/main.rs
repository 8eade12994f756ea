use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use serde::Deserialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use wallet_engine::{ServiceConfig, ServiceContext};

mod events;

#[derive(Debug, Deserialize)]
struct ListenCfg {
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct WorkerConfig {
    worker: ListenCfg,
    #[serde(flatten)]
    service: ServiceConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();
    tracing::info!("wallet-worker starting");

    let path = std::env::var("WALLET_CONFIG").unwrap_or_else(|_| "configs/default.yaml".into());
    let cfg: WorkerConfig = serde_yaml::from_str(&std::fs::read_to_string(&path)?)?;
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(cfg.worker.port);

    let ctx = Arc::new(ServiceContext::from_config(cfg.service));
    let app = events::router(ctx);

    let addr: SocketAddr = format!("{}:{}", cfg.worker.host, port).parse()?;
    tracing::info!(%addr, config = %path, "wallet-worker listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}
