use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use serde::Deserialize;
use tracing::info;
use wallet_engine::{ServiceConfig, ServiceContext};

mod routes;

#[derive(Debug, Deserialize)]
struct ServerCfg {
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct AppConfig {
    server: ServerCfg,
    #[serde(flatten)]
    service: ServiceConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let cfg: AppConfig = load_config()?;
    // Cloud Run 通过 PORT 指定监听端口
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(cfg.server.port);

    // 外部客户端在首个请求时才创建，初始化失败不影响进程启动
    let ctx = Arc::new(ServiceContext::from_config(cfg.service));
    let app = routes::router(routes::AppState { ctx });

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, port).parse()?;
    info!(%addr, "wallet-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config() -> anyhow::Result<AppConfig> {
    let path = std::env::var("WALLET_CONFIG").unwrap_or_else(|_| "configs/default.yaml".into());
    let s = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("read config {}: {}", path, e))?;
    let cfg: AppConfig = serde_yaml::from_str(&s)?;
    info!(path = %path, "load_config");
    Ok(cfg)
}
