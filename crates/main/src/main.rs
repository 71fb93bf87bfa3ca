//! 主应用程序入口
//!
//! 加载配置，组装实时核心，启动 Axum 服务和后台清理任务。

use std::sync::Arc;
use std::time::Duration;

use application::{
    spawn_idle_sweeper, spawn_notification_sweeper, Clock, NotificationDispatcher, SystemClock,
};
use config::AppConfig;
use infrastructure::Infrastructure;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

const OUTCOME_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "配置已加载");

    let infrastructure = Infrastructure::build(&config.notifications)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (state, outcomes) = AppState::assemble(&config, &infrastructure, clock);

    let shutdown = CancellationToken::new();
    let outcome_logger = NotificationDispatcher::spawn_outcome_logger(outcomes);
    let idle_sweeper = spawn_idle_sweeper(
        state.hub.clone(),
        config.realtime.idle_sweep_interval(),
        shutdown.clone(),
    );
    let notification_sweeper = spawn_notification_sweeper(
        state.hub.notifications().clone(),
        config.notifications.expiry_sweep_interval(),
        config.notifications.cleanup_after_days,
        shutdown.clone(),
    );

    let app = router(state);
    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("实时服务启动在 http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let (idle, notifications) = tokio::join!(idle_sweeper, notification_sweeper);
    for result in [idle, notifications] {
        if let Err(err) = result {
            tracing::warn!(error = %err, "后台清理任务异常退出");
        }
    }

    // 服务与清理任务释放后投递方随之释放，结果通道关闭，日志任务写完剩余结果后退出
    match tokio::time::timeout(OUTCOME_DRAIN_TIMEOUT, outcome_logger).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(error = %err, "通知结果日志任务异常退出"),
        Err(_) => tracing::warn!("仍有连接持有通知投递方，不再等待剩余投递结果"),
    }
    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("收到退出信号，开始优雅停机"),
        Err(err) => {
            tracing::error!(error = %err, "无法监听退出信号");
            std::future::pending::<()>().await;
        }
    }
    shutdown.cancel();
}
