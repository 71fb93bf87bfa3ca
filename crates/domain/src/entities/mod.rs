//! 领域实体定义

pub mod message;
pub mod notification;
pub mod order;
pub mod presence;
pub mod product;
pub mod user;

pub use message::{ChatMessage, Conversation, MessageKind};
pub use notification::{
    Channel, ChannelOverrides, ChannelState, Channels, FrequencyLimit, HistoryAction,
    HistoryEntry, Notification, NotificationDraft, NotificationPreferences,
    NotificationPriority, NotificationStatus, NotificationType, QuietHours,
};
pub use order::{Order, OrderStatus};
pub use presence::{PresenceRecord, PresenceStatus};
pub use product::Product;
pub use user::{User, UserStatus};
