//! 基础设施层实现。
//!
//! 提供内存存储和外部投递通道等适配器，实现应用/领域层定义的接口。

pub mod builder;
pub mod channels;
pub mod memory;

pub use builder::{Infrastructure, InfrastructureError};
pub use channels::{build_channel_senders, HttpChannelSender, LoggingChannelSender};
pub use memory::{
    MemoryConversationRepository, MemoryNotificationRepository, MemoryOrderRepository,
    MemoryProductRepository, MemoryStorage, MemoryUserRepository,
};
