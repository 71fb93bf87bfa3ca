//! 用户实体定义
//!
//! 实时核心只关心用户的身份、角色、激活状态以及通知偏好。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entities::notification::NotificationPreferences;
use crate::value_objects::{Role, Timestamp, UserId};

/// 用户状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// 活跃状态
    #[default]
    Active,
    /// 暂停
    Suspended,
    /// 已删除
    Deleted,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Active => write!(f, "active"),
            UserStatus::Suspended => write!(f, "suspended"),
            UserStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// 用户实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// 用户唯一ID
    pub id: UserId,
    /// 显示名称
    pub display_name: String,
    /// 邮箱
    pub email: String,
    /// 手机号（短信渠道）
    pub phone: Option<String>,
    /// 角色
    pub role: Role,
    /// 用户状态
    pub status: UserStatus,
    /// 通知偏好
    #[serde(default)]
    pub notification_preferences: NotificationPreferences,
    /// 创建时间
    pub created_at: Timestamp,
}

impl User {
    /// 创建新用户
    pub fn new(display_name: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            id: UserId::generate(),
            display_name: display_name.into(),
            email: email.into(),
            phone: None,
            role,
            status: UserStatus::Active,
            notification_preferences: NotificationPreferences::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: UserId) -> Self {
        self.id = id;
        self
    }

    pub fn with_preferences(mut self, preferences: NotificationPreferences) -> Self {
        self.notification_preferences = preferences;
        self
    }

    /// 是否可以建立实时连接
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
