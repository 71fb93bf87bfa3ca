//! 多渠道通知投递
//!
//! 外部渠道（email / sms / push）在偏好、免打扰与频率限制通过后才会发送；
//! 站内渠道总是通过 `notifications:<recipient>` 房间实时推送。
//! 渠道发送失败只记录在历史中，不作为 `dispatch` 的错误返回。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use domain::{
    Channel, Notification, NotificationDraft, NotificationId, NotificationPriority,
    NotificationQuery, NotificationRepository, NotificationStatus, RoomKey, ServerEvent,
    Timestamp, UserId, UserRepository,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::ChannelSenders;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::locks::KeyedLocks;
use crate::rate_limiter::NotificationRateLimiter;
use crate::rooms::RoomRouter;

/// 外部渠道被跳过的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    Disabled,
    TypeDisabled,
    QuietHours,
    FrequencyLimit,
}

impl Suppression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Suppression::Disabled => "preferences_disabled",
            Suppression::TypeDisabled => "type_disabled",
            Suppression::QuietHours => "quiet_hours",
            Suppression::FrequencyLimit => "frequency_limit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub notification: Notification,
    pub sent: Vec<Channel>,
    pub failed: Vec<Channel>,
    pub skipped: Vec<Channel>,
}

/// 后台投递的结果，写入结果通道供日志任务消费
#[derive(Debug)]
pub struct DispatchOutcome {
    pub notification_id: NotificationId,
    pub recipient: UserId,
    pub result: Result<DispatchReport, ApplicationError>,
}

pub struct NotificationDispatcherDependencies {
    pub notifications: Arc<dyn NotificationRepository>,
    pub users: Arc<dyn UserRepository>,
    pub senders: ChannelSenders,
    pub rooms: Arc<RoomRouter>,
    pub clock: Arc<dyn Clock>,
}

pub struct NotificationDispatcher {
    deps: NotificationDispatcherDependencies,
    limiter: NotificationRateLimiter,
    /// 同一条通知的所有写操作在此串行
    locks: KeyedLocks<NotificationId>,
    outcomes: Option<mpsc::UnboundedSender<DispatchOutcome>>,
}

impl NotificationDispatcher {
    pub fn new(deps: NotificationDispatcherDependencies) -> Self {
        Self {
            deps,
            limiter: NotificationRateLimiter::new(),
            locks: KeyedLocks::new(),
            outcomes: None,
        }
    }

    pub fn with_outcome_channel(mut self, outcomes: mpsc::UnboundedSender<DispatchOutcome>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    /// 为接收者创建通知，偏好在此刻做快照
    pub async fn create(
        &self,
        recipient: UserId,
        draft: NotificationDraft,
    ) -> Result<Notification, ApplicationError> {
        let user = self
            .deps
            .users
            .find_by_id(recipient)
            .await?
            .ok_or_else(|| ApplicationError::not_found(format!("user {recipient}")))?;

        let notification = Notification::create(
            recipient,
            draft,
            user.notification_preferences,
            self.deps.clock.now(),
        )?;
        let stored = self
            .deps
            .notifications
            .insert(notification)
            .await
            .map_err(ApplicationError::persist)?;

        info!(
            notification_id = %stored.id,
            user_id = %recipient,
            notification_type = ?stored.notification_type,
            "通知已创建"
        );
        Ok(stored)
    }

    pub async fn create_and_dispatch(
        &self,
        recipient: UserId,
        draft: NotificationDraft,
    ) -> Result<DispatchReport, ApplicationError> {
        let notification = self.create(recipient, draft).await?;
        self.dispatch(notification).await
    }

    /// 偏好检查：全局开关、类型开关、免打扰时段（紧急通知不受免打扰限制）
    pub fn should_send(&self, notification: &Notification, now: Timestamp) -> bool {
        self.preference_gate(notification, now).is_none()
    }

    fn preference_gate(&self, notification: &Notification, now: Timestamp) -> Option<Suppression> {
        let preferences = &notification.preferences;
        if !preferences.enabled {
            return Some(Suppression::Disabled);
        }
        if !preferences.allows_type(notification.notification_type) {
            return Some(Suppression::TypeDisabled);
        }
        if notification.priority != NotificationPriority::Urgent && preferences.in_quiet_hours(now)
        {
            return Some(Suppression::QuietHours);
        }
        None
    }

    /// 投递一条待发送的通知
    ///
    /// 以存储中的最新记录为准，整个投递过程持有该通知的锁；
    /// 只有 `pending` 状态的通知可以投递，重复投递被拒绝。
    pub async fn dispatch(
        &self,
        notification: Notification,
    ) -> Result<DispatchReport, ApplicationError> {
        let notification_id = notification.id;
        let _guard = self.locks.lock(notification_id).await;
        let mut notification = self.load(notification_id).await?;

        let now = self.deps.clock.now();
        ensure_live(&notification, now)?;
        if notification.status != NotificationStatus::Pending {
            return Err(ApplicationError::Validation(format!(
                "notification {notification_id} is {:?}, only pending notifications can be dispatched",
                notification.status
            )));
        }

        let recipient = notification.recipient;
        let wants_external = Channel::EXTERNAL
            .into_iter()
            .any(|channel| notification.channels.get(channel).enabled);
        let mut gate = self.preference_gate(&notification, now);
        let mut reserved = false;
        if gate.is_none() && wants_external {
            match self.limiter.try_acquire(
                recipient,
                &notification.preferences.frequency_limit,
                now,
            ) {
                Ok(()) => reserved = true,
                Err(limit) => {
                    debug!(user_id = %recipient, %limit, "达到通知频率上限");
                    gate = Some(Suppression::FrequencyLimit);
                }
            }
        }

        let mut sent = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();

        for channel in Channel::EXTERNAL {
            if !notification.channels.get(channel).enabled {
                continue;
            }
            if let Some(reason) = gate {
                notification.mark_skipped(channel, now, reason.as_str());
                skipped.push(channel);
                continue;
            }
            let Some(sender) = self.deps.senders.get(channel) else {
                continue;
            };

            let result = sender.send(&notification).await;
            let at = self.deps.clock.now();
            match result {
                Ok(()) => {
                    notification.mark_sent(channel, at);
                    notification.advance_status(NotificationStatus::Sent);
                    sent.push(channel);
                }
                Err(err) => {
                    let failure = ApplicationError::ChannelSendFailed {
                        channel: channel.to_string(),
                        message: err.to_string(),
                    };
                    warn!(notification_id = %notification.id, error = %failure, "渠道发送失败");
                    notification.mark_failed(channel, at, err.message);
                    notification.advance_status(NotificationStatus::Failed);
                    failed.push(channel);
                }
            }
        }

        // 没有外部渠道成功时不计入频率
        if reserved && sent.is_empty() {
            self.limiter.release(recipient, now);
        }

        let in_app = notification.channels.in_app.enabled;
        if in_app {
            notification.mark_sent(Channel::InApp, self.deps.clock.now());
            notification.advance_status(NotificationStatus::Sent);
            sent.push(Channel::InApp);
        }

        let stored = self.save(notification).await?;

        if in_app {
            self.deps
                .rooms
                .publish(
                    RoomKey::Notifications(recipient),
                    ServerEvent::NewNotification {
                        notification: stored.clone(),
                    },
                )
                .await;
            self.publish_count(recipient).await;
        }

        info!(
            notification_id = %stored.id,
            user_id = %recipient,
            status = ?stored.status,
            sent = sent.len(),
            failed = failed.len(),
            skipped = skipped.len(),
            "通知投递完成"
        );
        Ok(DispatchReport {
            notification: stored,
            sent,
            failed,
            skipped,
        })
    }

    /// 在后台任务中投递，结果写入结果通道；未配置通道时直接记录日志
    pub fn dispatch_in_background(self: &Arc<Self>, notification: Notification) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let notification_id = notification.id;
            let recipient = notification.recipient;
            let result = dispatcher.dispatch(notification).await;
            let outcome = DispatchOutcome {
                notification_id,
                recipient,
                result,
            };
            match &dispatcher.outcomes {
                Some(outcomes) => {
                    if let Err(err) = outcomes.send(outcome) {
                        log_outcome(&err.0);
                    }
                }
                None => log_outcome(&outcome),
            }
        })
    }

    /// 消费结果通道的日志任务
    pub fn spawn_outcome_logger(
        mut outcomes: mpsc::UnboundedReceiver<DispatchOutcome>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(outcome) = outcomes.recv().await {
                log_outcome(&outcome);
            }
            debug!("通知结果通道已关闭");
        })
    }

    pub async fn mark_read(
        &self,
        notification_id: NotificationId,
        identity: UserId,
    ) -> Result<Notification, ApplicationError> {
        let (stored, changed) = self
            .modify(notification_id, |notification, now| {
                ensure_recipient(notification, identity)?;
                Ok(notification.mark_read(now))
            })
            .await?;
        if !changed {
            return Ok(stored);
        }

        let read_at = stored.read_at.unwrap_or_else(|| self.deps.clock.now());
        self.deps
            .rooms
            .publish(
                RoomKey::Notifications(identity),
                ServerEvent::NotificationRead {
                    notification_id,
                    read_at,
                },
            )
            .await;
        self.publish_count(identity).await;
        Ok(stored)
    }

    pub async fn mark_all_read(&self, identity: UserId) -> Result<u64, ApplicationError> {
        let unread = self
            .deps
            .notifications
            .list_for_recipient(NotificationQuery::unread(identity))
            .await?;

        let mut count = 0u64;
        for candidate in unread {
            let result = self
                .modify(candidate.id, |notification, now| {
                    ensure_recipient(notification, identity)?;
                    Ok(notification.mark_read(now))
                })
                .await;
            match result {
                Ok((_, true)) => count += 1,
                Ok((_, false)) => {}
                // 期间被删除
                Err(ApplicationError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        self.deps
            .rooms
            .publish(
                RoomKey::Notifications(identity),
                ServerEvent::AllNotificationsRead { count },
            )
            .await;
        self.publish_count(identity).await;
        info!(user_id = %identity, count, "全部通知已读");
        Ok(count)
    }

    /// 软删除
    pub async fn delete(
        &self,
        notification_id: NotificationId,
        identity: UserId,
    ) -> Result<(), ApplicationError> {
        self.modify(notification_id, |notification, now| {
            ensure_recipient(notification, identity)?;
            ensure_live(notification, now)?;
            Ok(notification.soft_delete(now))
        })
        .await?;

        self.deps
            .rooms
            .publish(
                RoomKey::Notifications(identity),
                ServerEvent::NotificationDeleted { notification_id },
            )
            .await;
        self.publish_count(identity).await;
        Ok(())
    }

    pub async fn dismiss(
        &self,
        notification_id: NotificationId,
        identity: UserId,
    ) -> Result<Notification, ApplicationError> {
        let (stored, changed) = self
            .modify(notification_id, |notification, now| {
                ensure_recipient(notification, identity)?;
                ensure_live(notification, now)?;
                Ok(notification.dismiss(now))
            })
            .await?;
        if changed {
            self.publish_count(identity).await;
        }
        Ok(stored)
    }

    /// 外部渠道的送达回执
    pub async fn record_delivery(
        &self,
        notification_id: NotificationId,
        channel: Channel,
    ) -> Result<Notification, ApplicationError> {
        let (stored, changed) = self
            .modify(notification_id, |notification, now| {
                ensure_live(notification, now)?;
                Ok(notification.mark_delivered(channel, now)?)
            })
            .await?;
        if changed {
            debug!(notification_id = %notification_id, channel = %channel, "渠道已送达");
        }
        Ok(stored)
    }

    pub async fn record_click(
        &self,
        notification_id: NotificationId,
        channel: Channel,
        identity: UserId,
    ) -> Result<Notification, ApplicationError> {
        let (stored, changed) = self
            .modify(notification_id, |notification, now| {
                ensure_recipient(notification, identity)?;
                ensure_live(notification, now)?;
                Ok(notification.mark_clicked(channel, now)?)
            })
            .await?;
        if changed {
            debug!(notification_id = %notification_id, channel = %channel, "通知被点击");
        }
        Ok(stored)
    }

    /// 周期任务：把已过期的通知标记为 expired
    pub async fn sweep_expired(&self) -> Result<usize, ApplicationError> {
        let now = self.deps.clock.now();
        let candidates = self.deps.notifications.find_expirable(now).await?;

        let mut expired = 0;
        let mut recipients = HashSet::new();
        for candidate in candidates {
            let result = self
                .modify(candidate.id, |notification, now| Ok(notification.expire(now)))
                .await;
            match result {
                Ok((stored, true)) => {
                    expired += 1;
                    recipients.insert(stored.recipient);
                }
                Ok((_, false)) | Err(ApplicationError::NotFound(_)) => {}
                Err(err) => {
                    warn!(notification_id = %candidate.id, error = %err, "标记通知过期失败，下次重试");
                }
            }
        }

        for recipient in recipients {
            self.publish_count(recipient).await;
        }
        if expired > 0 {
            info!(expired, "通知过期清理完成");
        }
        Ok(expired)
    }

    /// 软删除早于阈值、且已读或已忽略的通知
    pub async fn cleanup(&self, older_than_days: u32) -> Result<usize, ApplicationError> {
        let now = self.deps.clock.now();
        let cutoff = now - Duration::days(i64::from(older_than_days));
        let candidates = self
            .deps
            .notifications
            .find_cleanup_candidates(cutoff)
            .await?;

        let mut removed = 0;
        for candidate in candidates {
            let result = self
                .modify(candidate.id, |notification, now| {
                    let settled =
                        notification.read_at.is_some() || notification.dismissed_at.is_some();
                    Ok(notification.created_at < cutoff && settled && notification.soft_delete(now))
                })
                .await;
            match result {
                Ok((_, true)) => removed += 1,
                Ok((_, false)) | Err(ApplicationError::NotFound(_)) => {}
                Err(err) => {
                    warn!(notification_id = %candidate.id, error = %err, "清理通知失败，下次重试")
                }
            }
        }
        self.limiter.cleanup(now);

        if removed > 0 {
            info!(removed, older_than_days, "旧通知清理完成");
        }
        Ok(removed)
    }

    pub async fn unread_count(&self, identity: UserId) -> Result<u64, ApplicationError> {
        Ok(self.deps.notifications.count_unread(identity).await?)
    }

    pub async fn recent(
        &self,
        identity: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, ApplicationError> {
        Ok(self
            .deps
            .notifications
            .list_for_recipient(NotificationQuery::recent(identity, limit))
            .await?)
    }

    async fn load(&self, notification_id: NotificationId) -> Result<Notification, ApplicationError> {
        self.deps
            .notifications
            .find_by_id(notification_id)
            .await?
            .filter(|notification| !notification.is_deleted())
            .ok_or_else(|| ApplicationError::not_found(format!("notification {notification_id}")))
    }

    /// 在通知锁内读取最新记录并应用变更，变更返回 `false` 时不写回
    async fn modify<F>(
        &self,
        notification_id: NotificationId,
        change: F,
    ) -> Result<(Notification, bool), ApplicationError>
    where
        F: FnOnce(&mut Notification, Timestamp) -> Result<bool, ApplicationError>,
    {
        let _guard = self.locks.lock(notification_id).await;
        let mut notification = self.load(notification_id).await?;
        if !change(&mut notification, self.deps.clock.now())? {
            return Ok((notification, false));
        }
        let stored = self.save(notification).await?;
        Ok((stored, true))
    }

    async fn save(&self, notification: Notification) -> Result<Notification, ApplicationError> {
        self.deps
            .notifications
            .update(notification)
            .await
            .map_err(ApplicationError::persist)
    }

    async fn publish_count(&self, recipient: UserId) {
        match self.deps.notifications.count_unread(recipient).await {
            Ok(count) => {
                self.deps
                    .rooms
                    .publish(
                        RoomKey::Notifications(recipient),
                        ServerEvent::NotificationsCount { count },
                    )
                    .await;
            }
            Err(err) => warn!(user_id = %recipient, error = %err, "未读数统计失败"),
        }
    }
}

/// 只有接收者本人可以操作
fn ensure_recipient(notification: &Notification, identity: UserId) -> Result<(), ApplicationError> {
    if notification.recipient == identity {
        Ok(())
    } else {
        Err(ApplicationError::not_authorized(format!(
            "access notification {}",
            notification.id
        )))
    }
}

/// 过了 `expires_at` 即视为过期，不等待周期任务落库
fn ensure_live(notification: &Notification, now: Timestamp) -> Result<(), ApplicationError> {
    if notification.is_expired() || notification.should_expire(now) {
        Err(ApplicationError::AlreadyExpired(notification.id))
    } else {
        Ok(())
    }
}

fn log_outcome(outcome: &DispatchOutcome) {
    match &outcome.result {
        Ok(report) => debug!(
            notification_id = %outcome.notification_id,
            user_id = %outcome.recipient,
            sent = ?report.sent,
            failed = ?report.failed,
            skipped = ?report.skipped,
            "后台投递完成"
        ),
        Err(err) => error!(
            notification_id = %outcome.notification_id,
            user_id = %outcome.recipient,
            error = %err,
            "后台投递失败"
        ),
    }
}
