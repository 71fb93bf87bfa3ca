//! 商品实体（只读快照）

use serde::{Deserialize, Serialize};

use crate::value_objects::{ProductId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub seller: UserId,
    pub name: String,
    pub price_cents: i64,
    pub stock: u32,
    pub view_count: u64,
    pub updated_at: Timestamp,
}
