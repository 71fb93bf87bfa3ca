//! 广播房间键
//!
//! 房间只存在于内存中：首次加入时创建，成员清空后回收，重连时重新建立。

use std::fmt;

use serde::{Serialize, Serializer};

use crate::value_objects::{ConversationId, OrderId, ProductId, Role, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKey {
    /// `user:<id>`，身份自身的所有连接
    User(UserId),
    /// `role:<role>`
    Role(Role),
    /// `notifications:<id>`
    Notifications(UserId),
    /// `chat:<conversationId>`
    Chat(ConversationId),
    /// `order:<orderId>`
    Order(OrderId),
    /// `product:<productId>`
    Product(ProductId),
}

impl RoomKey {
    /// 认证成功后每个连接都会加入的标准房间
    pub fn standard(identity: UserId, role: Role) -> [RoomKey; 3] {
        [
            RoomKey::User(identity),
            RoomKey::Role(role),
            RoomKey::Notifications(identity),
        ]
    }

    pub fn is_standard(&self) -> bool {
        matches!(
            self,
            RoomKey::User(_) | RoomKey::Role(_) | RoomKey::Notifications(_)
        )
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::User(id) => write!(f, "user:{id}"),
            RoomKey::Role(role) => write!(f, "role:{role}"),
            RoomKey::Notifications(id) => write!(f, "notifications:{id}"),
            RoomKey::Chat(id) => write!(f, "chat:{id}"),
            RoomKey::Order(id) => write!(f, "order:{id}"),
            RoomKey::Product(id) => write!(f, "product:{id}"),
        }
    }
}

impl Serialize for RoomKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_keys_render_with_prefixes() {
        let user = UserId::generate();
        assert_eq!(RoomKey::User(user).to_string(), format!("user:{user}"));
        assert_eq!(RoomKey::Role(Role::Seller).to_string(), "role:seller");
        assert!(RoomKey::Notifications(user).is_standard());
        assert!(!RoomKey::Chat(ConversationId::generate()).is_standard());
    }
}
