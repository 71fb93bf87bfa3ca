//! 订单实体（只读快照）

use serde::{Deserialize, Serialize};

use crate::value_objects::{OrderId, Timestamp, UserId};

/// 订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// 仍在流转中的订单
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Shipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub buyer: UserId,
    pub seller: UserId,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub updated_at: Timestamp,
}

impl Order {
    /// 买家、卖家可以订阅订单房间
    pub fn involves(&self, user_id: UserId) -> bool {
        self.buyer == user_id || self.seller == user_id
    }
}
