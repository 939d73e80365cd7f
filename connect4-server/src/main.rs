use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use connect4_server::{
    EventSink, GameServer, GameStore, JsonFileStore, JsonLinesEventSink, ServerConfig,
    TracingEventSink,
};
use protocol::{Listener, TcpListener};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("connect4_server=debug".parse()?))
        .init();

    info!("四子棋服务端启动中...");

    let config = ServerConfig::from_env().context("加载配置失败")?;
    let data_dir = config.resolve_data_dir()?;
    let store: Arc<dyn GameStore> = Arc::new(JsonFileStore::new(&data_dir)?);
    let events: Arc<dyn EventSink> = match &config.event_log {
        Some(path) => Arc::new(JsonLinesEventSink::open(path)?),
        None => Arc::new(TracingEventSink),
    };
    info!(data_dir = %data_dir.display(), event_log = ?config.event_log, "storage ready");

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法监听 {}", addr))?;
    let server = Arc::new(GameServer::new(config, store, events));

    tokio::select! {
        result = server.run(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("收到退出信号，服务端关闭"),
    }

    Ok(())
}
