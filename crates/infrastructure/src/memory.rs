//! 内存存储实现
//!
//! 为实时核心提供完整的存储协作方，供开发环境和端到端测试使用。
//! 每个仓储持有共享的 `RwLock<HashMap>`，克隆后指向同一份数据。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{
    ChatMessage, Conversation, ConversationId, ConversationRepository, MessageId, Notification,
    NotificationId, NotificationQuery, NotificationRepository, Order, OrderId, OrderRepository,
    OrderStatus, Product, ProductId, ProductRepository, RepositoryError, RepositoryFuture,
    Timestamp, User, UserId, UserRepository,
};
use tokio::sync::RwLock;
use tracing::debug;

/// 内存用户仓储
#[derive(Clone, Default)]
pub struct MemoryUserRepository {
    users: Arc<RwLock<HashMap<UserId, User>>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入或覆盖用户
    pub async fn upsert(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }
}

impl UserRepository for MemoryUserRepository {
    fn find_by_id(&self, id: UserId) -> RepositoryFuture<Option<User>> {
        let users = self.users.clone();
        Box::pin(async move { Ok(users.read().await.get(&id).cloned()) })
    }
}

#[derive(Default)]
struct ConversationState {
    conversations: HashMap<ConversationId, Conversation>,
    /// 按追加顺序保存
    messages: HashMap<ConversationId, Vec<ChatMessage>>,
}

/// 内存会话仓储
#[derive(Clone, Default)]
pub struct MemoryConversationRepository {
    state: Arc<RwLock<ConversationState>>,
}

impl MemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_conversation(&self, conversation: Conversation) {
        let mut state = self.state.write().await;
        state.messages.entry(conversation.id).or_default();
        state.conversations.insert(conversation.id, conversation);
    }

    pub async fn message_count(&self, conversation_id: ConversationId) -> usize {
        self.state
            .read()
            .await
            .messages
            .get(&conversation_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl ConversationRepository for MemoryConversationRepository {
    fn find_conversation(&self, id: ConversationId) -> RepositoryFuture<Option<Conversation>> {
        let state = self.state.clone();
        Box::pin(async move { Ok(state.read().await.conversations.get(&id).cloned()) })
    }

    fn append_message(&self, message: ChatMessage) -> RepositoryFuture<ChatMessage> {
        let state = self.state.clone();
        Box::pin(async move {
            let mut state = state.write().await;
            if !state.conversations.contains_key(&message.conversation_id) {
                return Err(RepositoryError::NotFound);
            }
            state
                .messages
                .entry(message.conversation_id)
                .or_default()
                .push(message.clone());
            debug!(conversation_id = %message.conversation_id, message_id = %message.id, "消息已追加");
            Ok(message)
        })
    }

    fn recent_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> RepositoryFuture<Vec<ChatMessage>> {
        let state = self.state.clone();
        Box::pin(async move {
            let state = state.read().await;
            let messages = state
                .messages
                .get(&conversation_id)
                .map(|messages| {
                    let skip = messages.len().saturating_sub(limit);
                    messages[skip..].to_vec()
                })
                .unwrap_or_default();
            Ok(messages)
        })
    }

    fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        message_ids: Vec<MessageId>,
    ) -> RepositoryFuture<Vec<MessageId>> {
        let state = self.state.clone();
        Box::pin(async move {
            let mut state = state.write().await;
            let Some(messages) = state.messages.get_mut(&conversation_id) else {
                return Err(RepositoryError::NotFound);
            };
            let marked = messages
                .iter_mut()
                .filter(|message| message_ids.contains(&message.id) && message.sender != reader)
                .filter_map(|message| message.mark_read_by(reader).then_some(message.id))
                .collect();
            Ok(marked)
        })
    }
}

/// 内存通知仓储
#[derive(Clone, Default)]
pub struct MemoryNotificationRepository {
    items: Arc<RwLock<HashMap<NotificationId, Notification>>>,
}

impl MemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按条件筛选，创建时间倒序
    async fn select(&self, filter: impl Fn(&Notification) -> bool) -> Vec<Notification> {
        let mut items: Vec<Notification> = self
            .items
            .read()
            .await
            .values()
            .filter(|notification| filter(notification))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }
}

impl NotificationRepository for MemoryNotificationRepository {
    fn insert(&self, notification: Notification) -> RepositoryFuture<Notification> {
        let items = self.items.clone();
        Box::pin(async move {
            let mut items = items.write().await;
            if items.contains_key(&notification.id) {
                return Err(RepositoryError::Conflict);
            }
            items.insert(notification.id, notification.clone());
            Ok(notification)
        })
    }

    fn update(&self, notification: Notification) -> RepositoryFuture<Notification> {
        let items = self.items.clone();
        Box::pin(async move {
            let mut items = items.write().await;
            match items.get_mut(&notification.id) {
                Some(stored) => {
                    *stored = notification.clone();
                    Ok(notification)
                }
                None => Err(RepositoryError::NotFound),
            }
        })
    }

    fn find_by_id(&self, id: NotificationId) -> RepositoryFuture<Option<Notification>> {
        let items = self.items.clone();
        Box::pin(async move { Ok(items.read().await.get(&id).cloned()) })
    }

    fn list_for_recipient(&self, query: NotificationQuery) -> RepositoryFuture<Vec<Notification>> {
        let repo = self.clone();
        Box::pin(async move {
            let mut items = repo
                .select(|n| {
                    n.recipient == query.recipient
                        && !n.is_deleted()
                        && (!query.unread_only || n.is_unread())
                })
                .await;
            if let Some(limit) = query.limit {
                items.truncate(limit);
            }
            Ok(items)
        })
    }

    fn count_unread(&self, recipient: UserId) -> RepositoryFuture<u64> {
        let repo = self.clone();
        Box::pin(async move {
            let unread = repo
                .select(|n| n.recipient == recipient && n.is_unread())
                .await;
            Ok(unread.len() as u64)
        })
    }

    fn find_expirable(&self, now: Timestamp) -> RepositoryFuture<Vec<Notification>> {
        let repo = self.clone();
        Box::pin(async move { Ok(repo.select(|n| !n.is_deleted() && n.should_expire(now)).await) })
    }

    fn find_cleanup_candidates(&self, cutoff: Timestamp) -> RepositoryFuture<Vec<Notification>> {
        let repo = self.clone();
        Box::pin(async move {
            let candidates = repo
                .select(|n| {
                    !n.is_deleted()
                        && n.created_at < cutoff
                        && (n.read_at.is_some() || n.dismissed_at.is_some())
                })
                .await;
            Ok(candidates)
        })
    }
}

/// 内存订单仓储
#[derive(Clone, Default)]
pub struct MemoryOrderRepository {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, order: Order) {
        self.orders.write().await.insert(order.id, order);
    }

    async fn count(&self, filter: impl Fn(&Order) -> bool) -> u64 {
        self.orders
            .read()
            .await
            .values()
            .filter(|order| filter(order))
            .count() as u64
    }
}

impl OrderRepository for MemoryOrderRepository {
    fn find_by_id(&self, id: OrderId) -> RepositoryFuture<Option<Order>> {
        let orders = self.orders.clone();
        Box::pin(async move { Ok(orders.read().await.get(&id).cloned()) })
    }

    fn count_active_for_buyer(&self, buyer: UserId) -> RepositoryFuture<u64> {
        let repo = self.clone();
        Box::pin(async move {
            Ok(repo
                .count(|order| order.buyer == buyer && order.status.is_active())
                .await)
        })
    }

    fn count_pending_for_seller(&self, seller: UserId) -> RepositoryFuture<u64> {
        let repo = self.clone();
        Box::pin(async move {
            Ok(repo
                .count(|order| order.seller == seller && order.status == OrderStatus::Pending)
                .await)
        })
    }
}

/// 内存商品仓储
#[derive(Clone, Default)]
pub struct MemoryProductRepository {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
}

impl MemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, product: Product) {
        self.products.write().await.insert(product.id, product);
    }
}

impl ProductRepository for MemoryProductRepository {
    fn find_by_id(&self, id: ProductId) -> RepositoryFuture<Option<Product>> {
        let products = self.products.clone();
        Box::pin(async move { Ok(products.read().await.get(&id).cloned()) })
    }

    fn increment_views(&self, id: ProductId) -> RepositoryFuture<Option<Product>> {
        let products = self.products.clone();
        Box::pin(async move {
            let mut products = products.write().await;
            Ok(products.get_mut(&id).map(|product| {
                product.view_count += 1;
                product.clone()
            }))
        })
    }
}

/// 所有内存仓储的集合
#[derive(Clone, Default)]
pub struct MemoryStorage {
    pub user_repository: Arc<MemoryUserRepository>,
    pub conversation_repository: Arc<MemoryConversationRepository>,
    pub notification_repository: Arc<MemoryNotificationRepository>,
    pub order_repository: Arc<MemoryOrderRepository>,
    pub product_repository: Arc<MemoryProductRepository>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use domain::{
        MessageKind, NotificationDraft, NotificationPreferences, NotificationType, Role,
    };
    use serde_json::Value as JsonValue;

    fn message(conversation_id: ConversationId, sender: UserId, body: &str) -> ChatMessage {
        ChatMessage::new(
            conversation_id,
            sender,
            body,
            MessageKind::Text,
            JsonValue::Null,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn recent_messages_returns_tail_in_order() {
        let repo = MemoryConversationRepository::new();
        let alice = UserId::generate();
        let conversation = Conversation::new(ConversationId::generate(), vec![alice], Utc::now());
        repo.upsert_conversation(conversation.clone()).await;

        for body in ["one", "two", "three"] {
            repo.append_message(message(conversation.id, alice, body))
                .await
                .unwrap();
        }

        let tail = repo.recent_messages(conversation.id, 2).await.unwrap();
        let bodies: Vec<_> = tail.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn append_to_unknown_conversation_fails() {
        let repo = MemoryConversationRepository::new();
        let err = repo
            .append_message(message(ConversationId::generate(), UserId::generate(), "hi"))
            .await
            .unwrap_err();
        assert_eq!(err, RepositoryError::NotFound);
    }

    #[tokio::test]
    async fn mark_read_skips_own_and_already_read_messages() {
        let repo = MemoryConversationRepository::new();
        let alice = UserId::generate();
        let bob = UserId::generate();
        let conversation =
            Conversation::new(ConversationId::generate(), vec![alice, bob], Utc::now());
        repo.upsert_conversation(conversation.clone()).await;

        let from_alice = repo
            .append_message(message(conversation.id, alice, "hello"))
            .await
            .unwrap();
        let from_bob = repo
            .append_message(message(conversation.id, bob, "hey"))
            .await
            .unwrap();

        let ids = vec![from_alice.id, from_bob.id];
        let marked = repo.mark_read(conversation.id, bob, ids.clone()).await.unwrap();
        assert_eq!(marked, vec![from_alice.id]);

        let again = repo.mark_read(conversation.id, bob, ids).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn notification_queries_follow_lifecycle() {
        let repo = MemoryNotificationRepository::new();
        let recipient = UserId::generate();
        let now = Utc::now();
        let create = |title: &str, at| {
            Notification::create(
                recipient,
                NotificationDraft::new(NotificationType::Order, title, "body"),
                NotificationPreferences::default(),
                at,
            )
            .unwrap()
        };

        let old = create("old", now - Duration::days(40));
        let fresh = create("fresh", now);
        repo.insert(old.clone()).await.unwrap();
        repo.insert(fresh.clone()).await.unwrap();
        assert_eq!(
            repo.insert(fresh.clone()).await.unwrap_err(),
            RepositoryError::Conflict
        );

        let listed = repo
            .list_for_recipient(NotificationQuery::recent(recipient, 10))
            .await
            .unwrap();
        assert_eq!(listed[0].id, fresh.id);

        // 旧通知创建于 40 天前，默认有效期 30 天
        let expirable = repo.find_expirable(now).await.unwrap();
        assert_eq!(expirable.len(), 1);
        assert_eq!(expirable[0].id, old.id);

        let mut read = old.clone();
        read.mark_read(now);
        repo.update(read).await.unwrap();
        assert_eq!(repo.count_unread(recipient).await.unwrap(), 1);

        let candidates = repo
            .find_cleanup_candidates(now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, old.id);
    }

    #[tokio::test]
    async fn order_counters_use_status() {
        let repo = MemoryOrderRepository::new();
        let buyer = UserId::generate();
        let seller = UserId::generate();
        for status in [OrderStatus::Pending, OrderStatus::Shipped, OrderStatus::Delivered] {
            repo.upsert(Order {
                id: OrderId::generate(),
                buyer,
                seller,
                status,
                total_cents: 1000,
                updated_at: Utc::now(),
            })
            .await;
        }

        assert_eq!(repo.count_active_for_buyer(buyer).await.unwrap(), 2);
        assert_eq!(repo.count_pending_for_seller(seller).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn increment_views_updates_counter() {
        let repo = MemoryProductRepository::new();
        let product = Product {
            id: ProductId::generate(),
            seller: UserId::generate(),
            name: "Lamp".into(),
            price_cents: 2599,
            stock: 3,
            view_count: 0,
            updated_at: Utc::now(),
        };
        repo.upsert(product.clone()).await;

        repo.increment_views(product.id).await.unwrap();
        let viewed = repo.increment_views(product.id).await.unwrap().unwrap();
        assert_eq!(viewed.view_count, 2);
        assert!(repo
            .increment_views(ProductId::generate())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn users_are_found_after_upsert() {
        let repo = MemoryUserRepository::new();
        let user = User::new("Ana", "ana@example.com", Role::Seller);
        repo.upsert(user.clone()).await;
        assert_eq!(repo.find_by_id(user.id).await.unwrap(), Some(user));
    }
}
