//! 电商实时通信核心领域模型
//!
//! 包含身份、会话、订单、商品、通知等实体，广播房间键，以及实时通道上的事件定义。

pub mod entities;
pub mod errors;
pub mod events;
pub mod repository;
pub mod room;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use repository::*;
pub use room::RoomKey;
pub use value_objects::*;
