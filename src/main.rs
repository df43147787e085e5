//! hive-serve
//!
//! 入口：加载配置、构建 Agent、启动 HTTP 服务，收到 Ctrl+C / SIGTERM 后优雅关闭。
//! 用法：`hive-serve [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hive::config::load_config;
use hive::core::ShutdownManager;
use hive::gateway::{serve, AgentRuntime, SessionManager};
use hive::{create_agent, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;

    let agent = create_agent(&config)
        .await
        .context("Failed to create agent")?;
    let sessions = Arc::new(SessionManager::from_minutes(
        config.serving.context_timeout_minutes,
    ));
    let runtime = AgentRuntime::new(agent, sessions);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let handle = serve(runtime, &config.serving, Arc::clone(&shutdown))
        .await
        .context("Failed to start server")?;

    shutdown.wait_for_shutdown().await;
    let grace = Duration::from_secs(config.serving.shutdown_grace_secs);
    if !handle.shutdown(grace).await {
        tracing::warn!("Some requests were cancelled during shutdown");
    }
    Ok(())
}
