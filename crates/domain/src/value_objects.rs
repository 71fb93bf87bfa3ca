use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

/// 为 Uuid 包装的标识类型生成通用实现。
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| DomainError::validation_error(stringify!($name), "invalid uuid"))
            }
        }
    };
}

uuid_id!(
    /// 用户唯一标识（已认证身份）。
    UserId
);
uuid_id!(
    /// 会话唯一标识。
    ConversationId
);
uuid_id!(
    /// 聊天消息唯一标识。
    MessageId
);
uuid_id!(
    /// 通知唯一标识。
    NotificationId
);
uuid_id!(
    /// 订单唯一标识。
    OrderId
);
uuid_id!(
    /// 商品唯一标识。
    ProductId
);
uuid_id!(
    /// 单条实时连接（句柄）的标识。
    ConnectionId
);

/// 用户角色。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Seller,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Customer, Role::Seller, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Seller => "seller",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "seller" => Ok(Role::Seller),
            "admin" => Ok(Role::Admin),
            other => Err(DomainError::validation_error(
                "role",
                format!("unknown role: {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_parse_and_display_roundtrip() {
        let id = UserId::generate();
        let parsed: UserId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<OrderId>().is_err());
    }

    #[test]
    fn role_parsing_rejects_unknown_values() {
        assert_eq!("seller".parse::<Role>().unwrap(), Role::Seller);
        assert!("root".parse::<Role>().is_err());
    }
}
