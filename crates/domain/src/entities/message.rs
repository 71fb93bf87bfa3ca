//! 会话与聊天消息实体
//!
//! 会话本身由外部的业务服务创建，实时核心只读取参与者并追加消息。

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 消息类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// 文本消息
    #[default]
    Text,
    /// 图片消息
    Image,
    /// 文件消息
    File,
    /// 商品卡片
    Product,
    /// 订单卡片
    Order,
    /// 系统消息
    System,
}

/// 会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    pub created_at: Timestamp,
}

impl Conversation {
    pub fn new(id: ConversationId, participants: Vec<UserId>, created_at: Timestamp) -> Self {
        Self {
            id,
            participants,
            created_at,
        }
    }

    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }
}

/// 已持久化的聊天消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: UserId,
    pub body: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub metadata: JsonValue,
    pub timestamp: Timestamp,
    /// 已读用户
    #[serde(default)]
    pub read_by: Vec<UserId>,
}

impl ChatMessage {
    pub fn new(
        conversation_id: ConversationId,
        sender: UserId,
        body: impl Into<String>,
        kind: MessageKind,
        metadata: JsonValue,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            sender,
            body: body.into(),
            kind,
            metadata,
            timestamp,
            read_by: Vec::new(),
        }
    }

    /// 记录已读，重复标记无副作用
    pub fn mark_read_by(&mut self, reader: UserId) -> bool {
        if self.read_by.contains(&reader) {
            return false;
        }
        self.read_by.push(reader);
        true
    }
}
