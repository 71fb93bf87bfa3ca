//! 服务端 → 客户端事件

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::entities::message::ChatMessage;
use crate::entities::notification::Notification;
use crate::entities::order::Order;
use crate::entities::presence::PresenceRecord;
use crate::entities::product::Product;
use crate::events::client::SignalKind;
use crate::value_objects::{
    ConversationId, MessageId, NotificationId, ProductId, Role, Timestamp, UserId,
};

/// 认证成功后推送的角色相关摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RoleFeed {
    Customer { active_orders: u64 },
    Seller { pending_orders: u64 },
    Admin { online_users: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Authenticated {
        identity: UserId,
        role: Role,
        feed: RoleFeed,
    },
    AuthError {
        message: String,
    },
    NotificationsCount {
        count: u64,
    },
    RecentNotifications {
        notifications: Vec<Notification>,
    },
    NewNotification {
        notification: Notification,
    },
    NotificationRead {
        notification_id: NotificationId,
        read_at: Timestamp,
    },
    AllNotificationsRead {
        count: u64,
    },
    NotificationDeleted {
        notification_id: NotificationId,
    },
    ChatHistory {
        conversation_id: ConversationId,
        messages: Vec<ChatMessage>,
    },
    NewMessage(ChatMessage),
    UserTyping {
        conversation_id: ConversationId,
        identity: UserId,
        is_typing: bool,
    },
    MessagesRead {
        conversation_id: ConversationId,
        reader: UserId,
        message_ids: Vec<MessageId>,
        read_at: Timestamp,
    },
    OrderStatus {
        order: Order,
    },
    OrderUpdated {
        order: Order,
    },
    ProductData {
        product: Product,
    },
    ProductUpdated {
        product: Product,
    },
    ProductViewed {
        product_id: ProductId,
        view_count: u64,
        viewer: UserId,
    },
    WebrtcOffer {
        from_identity: UserId,
        payload: JsonValue,
    },
    WebrtcAnswer {
        from_identity: UserId,
        payload: JsonValue,
    },
    WebrtcIceCandidate {
        from_identity: UserId,
        payload: JsonValue,
    },
    WebrtcHangup {
        from_identity: UserId,
        payload: JsonValue,
    },
    ScreenShareStarted {
        from_identity: UserId,
    },
    ScreenShareStopped {
        from_identity: UserId,
    },
    PresenceUpdated(PresenceRecord),
    OnlineUsers {
        users: Vec<UserId>,
    },
    SystemAnnouncement {
        message: String,
        sent_at: Timestamp,
    },
    MaintenanceMode {
        enabled: bool,
        message: Option<String>,
    },
    Heartbeat {
        timestamp: Timestamp,
    },
    Pong {
        timestamp: Timestamp,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    /// 把一条信令转换成转发给目标的事件
    pub fn signal(kind: SignalKind, from_identity: UserId, payload: JsonValue) -> Self {
        match kind {
            SignalKind::Offer => ServerEvent::WebrtcOffer {
                from_identity,
                payload,
            },
            SignalKind::Answer => ServerEvent::WebrtcAnswer {
                from_identity,
                payload,
            },
            SignalKind::IceCandidate => ServerEvent::WebrtcIceCandidate {
                from_identity,
                payload,
            },
            SignalKind::Hangup => ServerEvent::WebrtcHangup {
                from_identity,
                payload,
            },
            SignalKind::ScreenShareStart => ServerEvent::ScreenShareStarted { from_identity },
            SignalKind::ScreenShareStop => ServerEvent::ScreenShareStopped { from_identity },
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typing_event_uses_camel_case_fields() {
        let conversation_id = ConversationId::generate();
        let identity = UserId::generate();
        let event = ServerEvent::UserTyping {
            conversation_id,
            identity,
            is_typing: true,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "user_typing");
        assert_eq!(value["data"]["isTyping"], true);
        assert_eq!(value["data"]["conversationId"], json!(conversation_id));
    }

    #[test]
    fn screen_share_signal_carries_sender_only() {
        let from = UserId::generate();
        let event = ServerEvent::signal(SignalKind::ScreenShareStart, from, JsonValue::Null);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "screen_share_started");
        assert_eq!(value["data"], json!({ "fromIdentity": from }));
    }

    #[test]
    fn role_feed_is_tagged_by_role() {
        let value = serde_json::to_value(RoleFeed::Seller { pending_orders: 3 }).unwrap();
        assert_eq!(value, json!({ "role": "seller", "pendingOrders": 3 }));
    }
}
