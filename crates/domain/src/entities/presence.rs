//! 在线状态记录

use serde::{Deserialize, Serialize};

use crate::value_objects::{Timestamp, UserId};

/// 在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
    /// 自定义状态，文案见 `custom_status`
    Custom,
}

/// 每个身份仅有一条记录，更新时整体覆盖
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub identity: UserId,
    pub status: PresenceStatus,
    pub custom_status: Option<String>,
    pub updated_at: Timestamp,
}

impl PresenceRecord {
    pub fn new(
        identity: UserId,
        status: PresenceStatus,
        custom_status: Option<String>,
        updated_at: Timestamp,
    ) -> Self {
        // 只有 Custom 状态携带文案
        let custom_status = match status {
            PresenceStatus::Custom => custom_status,
            _ => None,
        };
        Self {
            identity,
            status,
            custom_status,
            updated_at,
        }
    }
}
