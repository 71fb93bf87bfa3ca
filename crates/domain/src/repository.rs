//! 存储协作方接口
//!
//! 核心只依赖这些抽象；持久化由外部系统负责。

use futures::future::BoxFuture;

use crate::entities::message::{ChatMessage, Conversation};
use crate::entities::notification::Notification;
use crate::entities::order::Order;
use crate::entities::product::Product;
use crate::entities::user::User;
use crate::errors::RepositoryResult;
use crate::value_objects::{
    ConversationId, MessageId, NotificationId, OrderId, ProductId, Timestamp, UserId,
};

pub type RepositoryFuture<T> = BoxFuture<'static, RepositoryResult<T>>;

#[cfg_attr(feature = "testing", mockall::automock)]
pub trait UserRepository: Send + Sync {
    fn find_by_id(&self, id: UserId) -> RepositoryFuture<Option<User>>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
pub trait ConversationRepository: Send + Sync {
    fn find_conversation(&self, id: ConversationId) -> RepositoryFuture<Option<Conversation>>;
    fn append_message(&self, message: ChatMessage) -> RepositoryFuture<ChatMessage>;
    /// 按时间正序返回最近 `limit` 条
    fn recent_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> RepositoryFuture<Vec<ChatMessage>>;
    /// 返回本次新标记为已读的消息 id
    fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        message_ids: Vec<MessageId>,
    ) -> RepositoryFuture<Vec<MessageId>>;
}

/// 通知列表查询条件
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationQuery {
    pub recipient: UserId,
    pub unread_only: bool,
    pub limit: Option<usize>,
}

impl NotificationQuery {
    pub fn recent(recipient: UserId, limit: usize) -> Self {
        Self {
            recipient,
            unread_only: false,
            limit: Some(limit),
        }
    }

    pub fn unread(recipient: UserId) -> Self {
        Self {
            recipient,
            unread_only: true,
            limit: None,
        }
    }
}

#[cfg_attr(feature = "testing", mockall::automock)]
pub trait NotificationRepository: Send + Sync {
    fn insert(&self, notification: Notification) -> RepositoryFuture<Notification>;
    fn update(&self, notification: Notification) -> RepositoryFuture<Notification>;
    fn find_by_id(&self, id: NotificationId) -> RepositoryFuture<Option<Notification>>;
    /// 不包含已删除的通知，按创建时间倒序
    fn list_for_recipient(&self, query: NotificationQuery) -> RepositoryFuture<Vec<Notification>>;
    fn count_unread(&self, recipient: UserId) -> RepositoryFuture<u64>;
    /// 未标记过期且 `expires_at < now` 的通知
    fn find_expirable(&self, now: Timestamp) -> RepositoryFuture<Vec<Notification>>;
    /// 已读或已忽略、尚未删除，并且创建于 `cutoff` 之前的通知
    fn find_cleanup_candidates(&self, cutoff: Timestamp) -> RepositoryFuture<Vec<Notification>>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
pub trait OrderRepository: Send + Sync {
    fn find_by_id(&self, id: OrderId) -> RepositoryFuture<Option<Order>>;
    fn count_active_for_buyer(&self, buyer: UserId) -> RepositoryFuture<u64>;
    fn count_pending_for_seller(&self, seller: UserId) -> RepositoryFuture<u64>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
pub trait ProductRepository: Send + Sync {
    fn find_by_id(&self, id: ProductId) -> RepositoryFuture<Option<Product>>;
    /// 浏览数加一，返回更新后的商品
    fn increment_views(&self, id: ProductId) -> RepositoryFuture<Option<Product>>;
}
