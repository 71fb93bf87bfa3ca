//! 客户端 → 服务端事件

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::entities::message::MessageKind;
use crate::entities::presence::PresenceStatus;
use crate::value_objects::{ConversationId, MessageId, NotificationId, OrderId, ProductId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    Authenticate {
        identity: UserId,
        credential: String,
    },
    JoinChat {
        conversation_id: ConversationId,
    },
    LeaveChat {
        conversation_id: ConversationId,
    },
    SendMessage {
        conversation_id: ConversationId,
        body: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        metadata: JsonValue,
    },
    TypingStart {
        conversation_id: ConversationId,
    },
    TypingStop {
        conversation_id: ConversationId,
    },
    MarkMessagesRead {
        conversation_id: ConversationId,
        message_ids: Vec<MessageId>,
    },
    SubscribeToOrder {
        order_id: OrderId,
    },
    UnsubscribeFromOrder {
        order_id: OrderId,
    },
    SubscribeToProduct {
        product_id: ProductId,
    },
    ProductView {
        product_id: ProductId,
    },
    WebrtcOffer {
        target_identity: UserId,
        payload: JsonValue,
    },
    WebrtcAnswer {
        target_identity: UserId,
        payload: JsonValue,
    },
    WebrtcIceCandidate {
        target_identity: UserId,
        payload: JsonValue,
    },
    WebrtcHangup {
        target_identity: UserId,
        #[serde(default)]
        payload: JsonValue,
    },
    ScreenShareStart {
        target_identity: UserId,
    },
    ScreenShareStop {
        target_identity: UserId,
    },
    UpdatePresence {
        status: PresenceStatus,
        #[serde(default)]
        custom_status: Option<String>,
    },
    GetOnlineUsers,
    MarkNotificationRead {
        notification_id: NotificationId,
    },
    MarkAllNotificationsRead,
    DeleteNotification {
        notification_id: NotificationId,
    },
    Ping,
}

/// 呼叫建立阶段的点对点信令类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    Hangup,
    ScreenShareStart,
    ScreenShareStop,
}

impl ClientEvent {
    /// 信令类事件拆成 (类型, 目标, 载荷)
    pub fn as_signal(&self) -> Option<(SignalKind, UserId, JsonValue)> {
        let signal = match self {
            ClientEvent::WebrtcOffer {
                target_identity,
                payload,
            } => (SignalKind::Offer, *target_identity, payload.clone()),
            ClientEvent::WebrtcAnswer {
                target_identity,
                payload,
            } => (SignalKind::Answer, *target_identity, payload.clone()),
            ClientEvent::WebrtcIceCandidate {
                target_identity,
                payload,
            } => (SignalKind::IceCandidate, *target_identity, payload.clone()),
            ClientEvent::WebrtcHangup {
                target_identity,
                payload,
            } => (SignalKind::Hangup, *target_identity, payload.clone()),
            ClientEvent::ScreenShareStart { target_identity } => {
                (SignalKind::ScreenShareStart, *target_identity, JsonValue::Null)
            }
            ClientEvent::ScreenShareStop { target_identity } => {
                (SignalKind::ScreenShareStop, *target_identity, JsonValue::Null)
            }
            _ => return None,
        };
        Some(signal)
    }

    /// 未认证连接允许发送的事件
    pub fn allowed_before_auth(&self) -> bool {
        matches!(self, ClientEvent::Authenticate { .. } | ClientEvent::Ping)
    }
}
