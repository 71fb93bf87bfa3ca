//! 周期性后台任务
//!
//! 失败只记录日志，等待下一个周期重试，不影响进程。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::hub::RealtimeHub;
use crate::notification::NotificationDispatcher;

/// 定期清理空闲连接
pub fn spawn_idle_sweeper(
    hub: Arc<RealtimeHub>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即返回
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = hub.sweep_idle_connections().await;
                    debug!(removed, "空闲连接清理周期结束");
                }
            }
        }
        info!("空闲连接清理任务已停止");
    })
}

/// 定期标记过期通知，并软删除旧的已读/已忽略通知
pub fn spawn_notification_sweeper(
    dispatcher: Arc<NotificationDispatcher>,
    every: Duration,
    cleanup_after_days: u32,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = dispatcher.sweep_expired().await {
                        error!(error = %err, "通知过期扫描失败");
                    }
                    if let Err(err) = dispatcher.cleanup(cleanup_after_days).await {
                        error!(error = %err, "通知清理失败");
                    }
                }
            }
        }
        info!("通知清理任务已停止");
    })
}
