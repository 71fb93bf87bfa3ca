use chrono::Duration;
use domain::{FrequencyLimit, Timestamp, UserId};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// 限流错误类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("hourly limit reached: {current}/{max} notifications")]
    HourlyLimitReached { current: u32, max: u32 },

    #[error("daily limit reached: {current}/{max} notifications")]
    DailyLimitReached { current: u32, max: u32 },
}

/// 通知发送频率限制器
///
/// 每个接收者保留最近 24 小时内的成功发送时间，按滑动窗口计数。
#[derive(Default)]
pub struct NotificationRateLimiter {
    deliveries: RwLock<HashMap<UserId, VecDeque<Timestamp>>>,
}

impl NotificationRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn window() -> Duration {
        Duration::hours(24)
    }

    /// 检查并占用一个发送名额，检查与占用在同一把写锁内完成
    ///
    /// 占用的名额在本次投递没有任何外部渠道成功时需要通过 `release` 归还。
    pub fn try_acquire(
        &self,
        recipient: UserId,
        limit: &FrequencyLimit,
        now: Timestamp,
    ) -> Result<(), RateLimitError> {
        let mut deliveries = self
            .deliveries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let history = deliveries.entry(recipient).or_default();

        let day_ago = now - Self::window();
        while history.front().is_some_and(|at| *at <= day_ago) {
            history.pop_front();
        }

        if !limit.is_unbounded() {
            let hour_ago = now - Duration::hours(1);
            let hourly = history.iter().filter(|at| **at > hour_ago).count() as u32;
            let daily = history.len() as u32;

            if let Some(max) = limit.hourly {
                if hourly >= max {
                    return Err(RateLimitError::HourlyLimitReached {
                        current: hourly,
                        max,
                    });
                }
            }
            if let Some(max) = limit.daily {
                if daily >= max {
                    return Err(RateLimitError::DailyLimitReached {
                        current: daily,
                        max,
                    });
                }
            }
        }

        history.push_back(now);
        Ok(())
    }

    /// 归还 `try_acquire` 在 `at` 时刻占用的名额
    pub fn release(&self, recipient: UserId, at: Timestamp) {
        let mut deliveries = self
            .deliveries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(history) = deliveries.get_mut(&recipient) else {
            return;
        };
        if let Some(index) = history.iter().rposition(|entry| *entry == at) {
            history.remove(index);
        }
        if history.is_empty() {
            deliveries.remove(&recipient);
        }
    }

    /// 清理窗口内已无记录的接收者（防止内存泄漏）
    pub fn cleanup(&self, now: Timestamp) {
        let day_ago = now - Self::window();
        let mut deliveries = self
            .deliveries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        deliveries.retain(|_, history| {
            history.retain(|at| *at > day_ago);
            !history.is_empty()
        });
    }

    pub fn tracked_recipients(&self) -> usize {
        self.deliveries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
