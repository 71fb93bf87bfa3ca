//! 通知实体定义
//!
//! 通知按渠道（email / sms / push / inApp）记录投递状态，并保留只追加的审计历史。
//! 状态流转：`pending → sent → delivered → read`，`failed` 为并行分支，
//! `expired` 为终态，任何未终结的状态在过期后都可进入。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::Validate;

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{NotificationId, Timestamp, UserId};

/// 一天的分钟数
const MINUTES_PER_DAY: i32 = 24 * 60;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Order,
    Payment,
    Promotion,
    Security,
    System,
    Chat,
    Product,
    Review,
}

impl NotificationType {
    /// 未显式指定 `expires_at` 时的默认有效期
    pub fn default_ttl(&self) -> Duration {
        match self {
            NotificationType::Promotion => Duration::days(7),
            NotificationType::Security => Duration::days(90),
            NotificationType::System => Duration::days(60),
            _ => Duration::days(30),
        }
    }
}

/// 通知优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationPriority::Low => write!(f, "low"),
            NotificationPriority::Normal => write!(f, "normal"),
            NotificationPriority::High => write!(f, "high"),
            NotificationPriority::Urgent => write!(f, "urgent"),
        }
    }
}

/// 通知整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
    Expired,
}

impl NotificationStatus {
    /// 主干上的先后顺序，`failed` 与 `pending` 同级
    fn rank(&self) -> u8 {
        match self {
            NotificationStatus::Pending | NotificationStatus::Failed => 0,
            NotificationStatus::Sent => 1,
            NotificationStatus::Delivered => 2,
            NotificationStatus::Read => 3,
            NotificationStatus::Expired => u8::MAX,
        }
    }
}

/// 投递渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Channel {
    Email,
    Sms,
    Push,
    InApp,
}

impl Channel {
    /// 需要调用外部发送方的渠道
    pub const EXTERNAL: [Channel; 3] = [Channel::Email, Channel::Sms, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
            Channel::InApp => "inApp",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "push" => Ok(Channel::Push),
            "inApp" | "in_app" => Ok(Channel::InApp),
            other => Err(DomainError::validation_error(
                "channel",
                format!("unknown channel: {other}"),
            )),
        }
    }
}

/// 单个渠道的投递状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    pub enabled: bool,
    pub sent: bool,
    pub sent_at: Option<Timestamp>,
    pub delivered: bool,
    pub delivered_at: Option<Timestamp>,
    pub opened: bool,
    pub opened_at: Option<Timestamp>,
    pub clicked: bool,
    pub clicked_at: Option<Timestamp>,
    pub failed: bool,
    pub failed_at: Option<Timestamp>,
}

impl ChannelState {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }
}

/// 四个渠道的状态集合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channels {
    pub email: ChannelState,
    pub sms: ChannelState,
    pub push: ChannelState,
    pub in_app: ChannelState,
}

impl Default for Channels {
    /// 默认开启 email / push / inApp，短信需显式开启
    fn default() -> Self {
        Self {
            email: ChannelState::enabled(true),
            sms: ChannelState::enabled(false),
            push: ChannelState::enabled(true),
            in_app: ChannelState::enabled(true),
        }
    }
}

impl Channels {
    pub fn get(&self, channel: Channel) -> &ChannelState {
        match channel {
            Channel::Email => &self.email,
            Channel::Sms => &self.sms,
            Channel::Push => &self.push,
            Channel::InApp => &self.in_app,
        }
    }

    pub fn get_mut(&mut self, channel: Channel) -> &mut ChannelState {
        match channel {
            Channel::Email => &mut self.email,
            Channel::Sms => &mut self.sms,
            Channel::Push => &mut self.push,
            Channel::InApp => &mut self.in_app,
        }
    }

    fn apply(&mut self, overrides: &ChannelOverrides) {
        for (channel, value) in [
            (Channel::Email, overrides.email),
            (Channel::Sms, overrides.sms),
            (Channel::Push, overrides.push),
            (Channel::InApp, overrides.in_app),
        ] {
            if let Some(enabled) = value {
                self.get_mut(channel).enabled = enabled;
            }
        }
    }
}

/// 创建通知时对默认渠道的覆盖
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOverrides {
    pub email: Option<bool>,
    pub sms: Option<bool>,
    pub push: Option<bool>,
    pub in_app: Option<bool>,
}

/// 免打扰时段，以一天中的分钟数表示的 `[start, end)` 区间
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    pub enabled: bool,
    pub start_minute: u16,
    pub end_minute: u16,
    /// 接收者所在时区相对 UTC 的分钟偏移
    #[serde(default)]
    pub utc_offset_minutes: i16,
}

impl QuietHours {
    /// `start > end` 视为跨越午夜；`start == end` 为空区间
    pub fn contains(&self, at: Timestamp) -> bool {
        if !self.enabled {
            return false;
        }
        let start = i32::from(self.start_minute) % MINUTES_PER_DAY;
        let end = i32::from(self.end_minute) % MINUTES_PER_DAY;
        if start == end {
            return false;
        }

        let utc_minute = (at.hour() * 60 + at.minute()) as i32;
        let local = (utc_minute + i32::from(self.utc_offset_minutes)).rem_euclid(MINUTES_PER_DAY);

        if start < end {
            local >= start && local < end
        } else {
            local >= start || local < end
        }
    }
}

/// 发送频率上限
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyLimit {
    pub hourly: Option<u32>,
    pub daily: Option<u32>,
}

impl FrequencyLimit {
    pub fn is_unbounded(&self) -> bool {
        self.hourly.is_none() && self.daily.is_none()
    }
}

/// 接收者的通知偏好
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub enabled: bool,
    /// 按类型开关，缺省视为开启
    #[serde(default)]
    pub types: HashMap<NotificationType, bool>,
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
    #[serde(default)]
    pub frequency_limit: FrequencyLimit,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            types: HashMap::new(),
            quiet_hours: None,
            frequency_limit: FrequencyLimit::default(),
        }
    }
}

impl NotificationPreferences {
    pub fn allows_type(&self, notification_type: NotificationType) -> bool {
        self.types.get(&notification_type).copied().unwrap_or(true)
    }

    pub fn in_quiet_hours(&self, at: Timestamp) -> bool {
        self.quiet_hours
            .as_ref()
            .is_some_and(|window| window.contains(at))
    }
}

/// 历史动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Failed,
    Skipped,
    Read,
    Dismissed,
    Deleted,
    Expired,
}

/// 审计历史条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub channel: Option<Channel>,
    pub timestamp: Timestamp,
    pub details: Option<JsonValue>,
}

/// 外部协作方提交的通知草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDraft {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub category: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
    #[serde(default)]
    pub priority: NotificationPriority,
    #[serde(default)]
    pub data: JsonValue,
    #[serde(default)]
    pub channels: Option<ChannelOverrides>,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
}

impl NotificationDraft {
    pub fn new(
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            notification_type,
            category: None,
            title: title.into(),
            message: message.into(),
            priority: NotificationPriority::Normal,
            data: JsonValue::Null,
            channels: None,
            expires_at: None,
        }
    }
}

/// 通知实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub category: String,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub data: JsonValue,
    pub channels: Channels,
    pub status: NotificationStatus,
    /// 创建时的偏好快照
    pub preferences: NotificationPreferences,
    pub history: Vec<HistoryEntry>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub expired_at: Option<Timestamp>,
    pub read_at: Option<Timestamp>,
    pub dismissed_at: Option<Timestamp>,
    pub deleted_at: Option<Timestamp>,
}

impl Notification {
    /// 根据草稿创建通知
    pub fn create(
        recipient: UserId,
        draft: NotificationDraft,
        preferences: NotificationPreferences,
        now: Timestamp,
    ) -> DomainResult<Self> {
        draft.validate()?;

        let expires_at = draft
            .expires_at
            .unwrap_or_else(|| now + draft.notification_type.default_ttl());
        if expires_at <= now {
            return Err(DomainError::validation_error(
                "expiresAt",
                "must be in the future",
            ));
        }

        let mut channels = Channels::default();
        if let Some(overrides) = &draft.channels {
            channels.apply(overrides);
        }

        let mut notification = Self {
            id: NotificationId::generate(),
            recipient,
            notification_type: draft.notification_type,
            category: draft.category.unwrap_or_else(|| "general".to_string()),
            title: draft.title,
            message: draft.message,
            priority: draft.priority,
            data: draft.data,
            channels,
            status: NotificationStatus::Pending,
            preferences,
            history: Vec::new(),
            created_at: now,
            expires_at,
            expired_at: None,
            read_at: None,
            dismissed_at: None,
            deleted_at: None,
        };
        notification.record(HistoryAction::Created, None, now, None);
        Ok(notification)
    }

    /// 追加历史；时间戳不早于上一条，保证单调
    pub fn record(
        &mut self,
        action: HistoryAction,
        channel: Option<Channel>,
        now: Timestamp,
        details: Option<JsonValue>,
    ) {
        let timestamp = self
            .history
            .last()
            .map(|last| last.timestamp.max(now))
            .unwrap_or(now);
        self.history.push(HistoryEntry {
            action,
            channel,
            timestamp,
            details,
        });
    }

    pub fn is_expired(&self) -> bool {
        self.status == NotificationStatus::Expired
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// 已过期但尚未被标记
    pub fn should_expire(&self, now: Timestamp) -> bool {
        !self.is_expired() && self.expires_at < now
    }

    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
            && self.dismissed_at.is_none()
            && self.deleted_at.is_none()
            && !self.is_expired()
    }

    /// 只沿主干向前推进，过期后不再变化
    pub fn advance_status(&mut self, status: NotificationStatus) {
        if self.is_expired() {
            return;
        }
        if status == NotificationStatus::Expired || status.rank() > self.status.rank() {
            self.status = status;
        } else if status == NotificationStatus::Failed && self.status == NotificationStatus::Pending
        {
            self.status = status;
        }
    }

    pub fn mark_sent(&mut self, channel: Channel, now: Timestamp) {
        let state = self.channels.get_mut(channel);
        state.sent = true;
        state.sent_at = Some(now);
        self.record(HistoryAction::Sent, Some(channel), now, None);
    }

    pub fn mark_failed(&mut self, channel: Channel, now: Timestamp, error: impl Into<String>) {
        let error: String = error.into();
        let state = self.channels.get_mut(channel);
        state.failed = true;
        state.failed_at = Some(now);
        self.record(
            HistoryAction::Failed,
            Some(channel),
            now,
            Some(serde_json::json!({ "error": error })),
        );
    }

    pub fn mark_skipped(&mut self, channel: Channel, now: Timestamp, reason: &str) {
        self.record(
            HistoryAction::Skipped,
            Some(channel),
            now,
            Some(serde_json::json!({ "reason": reason })),
        );
    }

    /// 渠道回执：送达必须发生在发送之后
    pub fn mark_delivered(&mut self, channel: Channel, now: Timestamp) -> DomainResult<bool> {
        let state = self.channels.get_mut(channel);
        if !state.sent {
            return Err(DomainError::business_rule_violation(format!(
                "channel {channel} was never sent"
            )));
        }
        if state.delivered {
            return Ok(false);
        }
        state.delivered = true;
        state.delivered_at = Some(now);
        self.record(HistoryAction::Delivered, Some(channel), now, None);
        self.advance_status(NotificationStatus::Delivered);
        Ok(true)
    }

    pub fn mark_clicked(&mut self, channel: Channel, now: Timestamp) -> DomainResult<bool> {
        let state = self.channels.get_mut(channel);
        if !state.sent {
            return Err(DomainError::business_rule_violation(format!(
                "channel {channel} was never sent"
            )));
        }
        if state.clicked {
            return Ok(false);
        }
        state.clicked = true;
        state.clicked_at = Some(now);
        if !state.opened {
            state.opened = true;
            state.opened_at = Some(now);
            self.record(HistoryAction::Opened, Some(channel), now, None);
        }
        self.record(HistoryAction::Clicked, Some(channel), now, None);
        Ok(true)
    }

    /// 站内已读；已过期的通知也可以标记已读，但状态保持 expired
    pub fn mark_read(&mut self, now: Timestamp) -> bool {
        if self.read_at.is_some() {
            return false;
        }
        self.read_at = Some(now);
        let in_app = self.channels.get_mut(Channel::InApp);
        in_app.opened = true;
        in_app.opened_at = Some(now);
        self.record(HistoryAction::Read, Some(Channel::InApp), now, None);
        self.advance_status(NotificationStatus::Read);
        true
    }

    pub fn dismiss(&mut self, now: Timestamp) -> bool {
        if self.dismissed_at.is_some() {
            return false;
        }
        self.dismissed_at = Some(now);
        self.record(HistoryAction::Dismissed, None, now, None);
        true
    }

    /// 软删除
    pub fn soft_delete(&mut self, now: Timestamp) -> bool {
        if self.deleted_at.is_some() {
            return false;
        }
        self.deleted_at = Some(now);
        self.record(HistoryAction::Deleted, None, now, None);
        true
    }

    pub fn expire(&mut self, now: Timestamp) -> bool {
        if self.is_expired() {
            return false;
        }
        self.status = NotificationStatus::Expired;
        self.expired_at = Some(now);
        self.record(HistoryAction::Expired, None, now, None);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(hour: u32, minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, 0).unwrap()
    }

    fn order_draft() -> NotificationDraft {
        NotificationDraft::new(NotificationType::Order, "Order shipped", "On its way")
    }

    #[test]
    fn default_expiry_follows_notification_type() {
        let now = at(9, 0);
        let cases = [
            (NotificationType::Promotion, 7),
            (NotificationType::Security, 90),
            (NotificationType::System, 60),
            (NotificationType::Order, 30),
        ];
        for (notification_type, days) in cases {
            let draft = NotificationDraft::new(notification_type, "t", "m");
            let notification = Notification::create(
                UserId::generate(),
                draft,
                NotificationPreferences::default(),
                now,
            )
            .unwrap();
            assert_eq!(notification.expires_at - notification.created_at, Duration::days(days));
        }
    }

    #[test]
    fn default_channels_leave_sms_disabled() {
        let notification = Notification::create(
            UserId::generate(),
            order_draft(),
            NotificationPreferences::default(),
            at(9, 0),
        )
        .unwrap();

        assert!(notification.channels.email.enabled);
        assert!(!notification.channels.sms.enabled);
        assert!(notification.channels.push.enabled);
        assert!(notification.channels.in_app.enabled);
        assert_eq!(notification.status, NotificationStatus::Pending);
        assert_eq!(notification.history[0].action, HistoryAction::Created);
    }

    #[test]
    fn empty_title_is_rejected() {
        let draft = NotificationDraft::new(NotificationType::Order, "", "body");
        let result = Notification::create(
            UserId::generate(),
            draft,
            NotificationPreferences::default(),
            at(9, 0),
        );
        assert!(matches!(result, Err(DomainError::ValidationError { .. })));
    }

    #[test]
    fn history_timestamps_never_go_backwards() {
        let mut notification = Notification::create(
            UserId::generate(),
            order_draft(),
            NotificationPreferences::default(),
            at(10, 0),
        )
        .unwrap();

        notification.mark_sent(Channel::Email, at(9, 0));
        let timestamps: Vec<_> = notification.history.iter().map(|e| e.timestamp).collect();
        assert!(timestamps.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn status_only_moves_forward() {
        let mut notification = Notification::create(
            UserId::generate(),
            order_draft(),
            NotificationPreferences::default(),
            at(10, 0),
        )
        .unwrap();

        notification.advance_status(NotificationStatus::Sent);
        notification.advance_status(NotificationStatus::Failed);
        assert_eq!(notification.status, NotificationStatus::Sent);

        notification.mark_read(at(11, 0));
        notification.advance_status(NotificationStatus::Delivered);
        assert_eq!(notification.status, NotificationStatus::Read);
    }

    #[test]
    fn delivery_requires_prior_send() {
        let mut notification = Notification::create(
            UserId::generate(),
            order_draft(),
            NotificationPreferences::default(),
            at(10, 0),
        )
        .unwrap();

        assert!(notification.mark_delivered(Channel::Email, at(10, 1)).is_err());
        notification.mark_sent(Channel::Email, at(10, 1));
        assert!(notification.mark_delivered(Channel::Email, at(10, 2)).unwrap());
        assert!(!notification.mark_delivered(Channel::Email, at(10, 3)).unwrap());
    }

    #[test]
    fn expired_notification_keeps_status_after_read() {
        let mut notification = Notification::create(
            UserId::generate(),
            order_draft(),
            NotificationPreferences::default(),
            at(10, 0),
        )
        .unwrap();

        assert!(notification.expire(at(10, 5)));
        assert!(!notification.expire(at(10, 6)));
        assert!(notification.mark_read(at(10, 7)));
        assert_eq!(notification.status, NotificationStatus::Expired);
    }

    #[test]
    fn quiet_hours_same_day_window() {
        let window = QuietHours {
            enabled: true,
            start_minute: 13 * 60,
            end_minute: 14 * 60,
            utc_offset_minutes: 0,
        };
        assert!(window.contains(at(13, 0)));
        assert!(window.contains(at(13, 59)));
        assert!(!window.contains(at(14, 0)));
        assert!(!window.contains(at(12, 59)));
    }

    #[test]
    fn quiet_hours_wrap_around_midnight() {
        let window = QuietHours {
            enabled: true,
            start_minute: 22 * 60,
            end_minute: 7 * 60,
            utc_offset_minutes: 0,
        };
        assert!(window.contains(at(23, 30)));
        assert!(window.contains(at(2, 0)));
        assert!(!window.contains(at(7, 0)));
        assert!(!window.contains(at(12, 0)));
    }

    #[test]
    fn quiet_hours_respect_utc_offset_and_empty_window() {
        let shifted = QuietHours {
            enabled: true,
            start_minute: 22 * 60,
            end_minute: 23 * 60,
            utc_offset_minutes: 8 * 60,
        };
        // 14:30 UTC 即 UTC+8 的 22:30
        assert!(shifted.contains(at(14, 30)));

        let empty = QuietHours {
            enabled: true,
            start_minute: 600,
            end_minute: 600,
            utc_offset_minutes: 0,
        };
        assert!(!empty.contains(at(10, 0)));
    }

    #[test]
    fn preferences_default_to_allowing_every_type() {
        let mut preferences = NotificationPreferences::default();
        assert!(preferences.allows_type(NotificationType::Promotion));
        preferences.types.insert(NotificationType::Promotion, false);
        assert!(!preferences.allows_type(NotificationType::Promotion));
        assert!(preferences.allows_type(NotificationType::Order));
    }

    #[test]
    fn notification_serializes_with_wire_names() {
        let notification = Notification::create(
            UserId::generate(),
            order_draft(),
            NotificationPreferences::default(),
            at(10, 0),
        )
        .unwrap();
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["type"], "order");
        assert_eq!(json["channels"]["inApp"]["enabled"], true);
        assert_eq!(json["status"], "pending");
    }
}
