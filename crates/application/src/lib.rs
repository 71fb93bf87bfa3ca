//! 应用层实现。
//!
//! 实时通信核心：连接注册表、房间路由、在线状态、会话中继、信令转发、
//! 通知投递状态机，以及把它们串起来的 `RealtimeHub` 与周期任务。

pub mod channel;
pub mod chat;
pub mod clock;
pub mod connection;
pub mod error;
pub mod hub;
pub mod locks;
pub mod notification;
pub mod presence;
pub mod rate_limiter;
pub mod rooms;
pub mod signaling;
pub mod sweeper;

#[cfg(test)]
mod test_support;

pub use channel::{ChannelSendError, ChannelSender, ChannelSenders};
pub use chat::{ChatRelay, ChatRelayDependencies, DEFAULT_HISTORY_LIMIT};
pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{
    Connection, ConnectionHandle, ConnectionRegistry, Departure, EventReceiver, EventSender,
};
pub use error::ApplicationError;
pub use hub::{
    CredentialVerifier, HubSettings, Principal, RealtimeHub, RealtimeHubDependencies, Session,
};
pub use notification::{
    DispatchOutcome, DispatchReport, NotificationDispatcher, NotificationDispatcherDependencies,
    Suppression,
};
pub use locks::{KeyedGuard, KeyedLocks};
pub use presence::PresenceTracker;
pub use rate_limiter::{NotificationRateLimiter, RateLimitError};
pub use rooms::RoomRouter;
pub use signaling::{RelayOutcome, SignalingRelay};
pub use sweeper::{spawn_idle_sweeper, spawn_notification_sweeper};
