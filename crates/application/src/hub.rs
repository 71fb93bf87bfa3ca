//! 实时通道编排
//!
//! 认证 → 注册连接 → 加入标准房间 → 标记在线 → 推送初始快照。
//! 之后每个入站事件在所属连接的任务中按到达顺序处理，
//! 处理失败只向发起连接回送 `error` 事件。

use std::sync::Arc;

use chrono::Duration;
use domain::{
    ClientEvent, ConversationId, OrderId, OrderRepository, PresenceStatus, ProductId,
    ProductRepository, Role, RoleFeed, RoomKey, ServerEvent, UserId, UserRepository,
};
use tracing::{debug, info, warn};

use crate::chat::ChatRelay;
use crate::clock::Clock;
use crate::connection::{ConnectionHandle, ConnectionRegistry, Departure};
use crate::error::ApplicationError;
use crate::locks::KeyedLocks;
use crate::notification::NotificationDispatcher;
use crate::presence::PresenceTracker;
use crate::rooms::RoomRouter;
use crate::signaling::SignalingRelay;

/// 凭证校验，签发不在本系统范围内
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, identity: UserId, credential: &str) -> Result<(), ApplicationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub identity: UserId,
    pub role: Role,
}

/// 单个连接的会话状态，由该连接的任务独占
#[derive(Debug)]
pub struct Session {
    handle: ConnectionHandle,
    principal: Option<Principal>,
}

impl Session {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            principal: None,
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn principal(&self) -> Option<Principal> {
        self.principal
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    fn reply(&self, event: ServerEvent) {
        if !self.handle.send(event) {
            debug!(connection_id = %self.handle.id(), "连接已关闭，回复丢弃");
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub idle_timeout: Duration,
    pub recent_notifications_limit: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::minutes(5),
            recent_notifications_limit: 20,
        }
    }
}

pub struct RealtimeHubDependencies {
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomRouter>,
    pub presence: Arc<PresenceTracker>,
    pub chat: Arc<ChatRelay>,
    pub signaling: Arc<SignalingRelay>,
    pub notifications: Arc<NotificationDispatcher>,
    pub users: Arc<dyn UserRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub clock: Arc<dyn Clock>,
    pub settings: HubSettings,
}

pub struct RealtimeHub {
    deps: RealtimeHubDependencies,
    /// 注册、注销与在线状态切换按身份串行
    identities: KeyedLocks<UserId>,
}

impl RealtimeHub {
    pub fn new(deps: RealtimeHubDependencies) -> Self {
        Self {
            deps,
            identities: KeyedLocks::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.deps.registry
    }

    pub fn rooms(&self) -> &Arc<RoomRouter> {
        &self.deps.rooms
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.deps.presence
    }

    pub fn notifications(&self) -> &Arc<NotificationDispatcher> {
        &self.deps.notifications
    }

    /// 任意入站帧都会刷新活跃时间
    pub async fn touch(&self, session: &Session) {
        self.deps.registry.touch(session.handle.id()).await;
    }

    /// 处理一个入站事件；错误转换为回送给本连接的事件
    pub async fn handle_event(&self, session: &mut Session, event: ClientEvent) {
        self.touch(session).await;

        if let ClientEvent::Ping = event {
            session.reply(ServerEvent::Pong {
                timestamp: self.deps.clock.now(),
            });
            return;
        }

        if let ClientEvent::Authenticate {
            identity,
            credential,
        } = event
        {
            self.authenticate(session, identity, &credential).await;
            return;
        }

        let Some(principal) = session.principal else {
            let err = ApplicationError::Unauthenticated;
            session.reply(ServerEvent::error(err.code(), err.to_string()));
            return;
        };

        if let Err(err) = self.dispatch_event(session, principal, event).await {
            debug!(
                user_id = %principal.identity,
                code = err.code(),
                error = %err,
                "事件处理失败"
            );
            session.reply(ServerEvent::error(err.code(), err.to_string()));
        }
    }

    pub async fn authenticate(&self, session: &mut Session, identity: UserId, credential: &str) {
        if session.is_authenticated() {
            let err = ApplicationError::AlreadyRegistered;
            session.reply(ServerEvent::error(err.code(), err.to_string()));
            return;
        }

        match self.try_authenticate(session, identity, credential).await {
            Ok(principal) => {
                session.principal = Some(principal);
                self.push_snapshot(session, principal).await;
            }
            Err(ApplicationError::AuthenticationFailed(message)) => {
                warn!(user_id = %identity, reason = %message, "认证失败");
                session.reply(ServerEvent::AuthError { message });
            }
            Err(err) => {
                warn!(user_id = %identity, error = %err, "认证过程出错");
                session.reply(ServerEvent::error(err.code(), err.to_string()));
            }
        }
    }

    async fn try_authenticate(
        &self,
        session: &Session,
        identity: UserId,
        credential: &str,
    ) -> Result<Principal, ApplicationError> {
        self.deps.verifier.verify(identity, credential)?;

        let user = self
            .deps
            .users
            .find_by_id(identity)
            .await?
            .ok_or_else(|| ApplicationError::AuthenticationFailed("unknown user".to_string()))?;
        if !user.is_active() {
            return Err(ApplicationError::AuthenticationFailed(format!(
                "user is {}",
                user.status
            )));
        }

        {
            let _guard = self.identities.lock(identity).await;
            self.deps
                .registry
                .register(identity, user.role, session.handle.clone())
                .await?;
            for room in RoomKey::standard(identity, user.role) {
                self.deps.rooms.join(&session.handle, room).await;
            }
            self.deps
                .presence
                .set_status(identity, PresenceStatus::Online, None)
                .await;
        }

        info!(user_id = %identity, role = %user.role, connection_id = %session.handle.id(), "用户已认证");
        Ok(Principal {
            identity,
            role: user.role,
        })
    }

    /// 认证成功后推送：authenticated(含角色摘要)、未读数、最近通知
    async fn push_snapshot(&self, session: &Session, principal: Principal) {
        let feed = match self.role_feed(principal).await {
            Ok(feed) => feed,
            Err(err) => {
                warn!(user_id = %principal.identity, error = %err, "角色摘要加载失败");
                empty_feed(principal.role)
            }
        };
        session.reply(ServerEvent::Authenticated {
            identity: principal.identity,
            role: principal.role,
            feed,
        });

        let notifications = &self.deps.notifications;
        match notifications.unread_count(principal.identity).await {
            Ok(count) => session.reply(ServerEvent::NotificationsCount { count }),
            Err(err) => warn!(user_id = %principal.identity, error = %err, "未读数加载失败"),
        }
        match notifications
            .recent(
                principal.identity,
                self.deps.settings.recent_notifications_limit,
            )
            .await
        {
            Ok(recent) => session.reply(ServerEvent::RecentNotifications {
                notifications: recent,
            }),
            Err(err) => warn!(user_id = %principal.identity, error = %err, "最近通知加载失败"),
        }
    }

    async fn role_feed(&self, principal: Principal) -> Result<RoleFeed, ApplicationError> {
        let feed = match principal.role {
            Role::Customer => RoleFeed::Customer {
                active_orders: self
                    .deps
                    .orders
                    .count_active_for_buyer(principal.identity)
                    .await?,
            },
            Role::Seller => RoleFeed::Seller {
                pending_orders: self
                    .deps
                    .orders
                    .count_pending_for_seller(principal.identity)
                    .await?,
            },
            Role::Admin => RoleFeed::Admin {
                online_users: self.deps.registry.online_count().await,
            },
        };
        Ok(feed)
    }

    async fn dispatch_event(
        &self,
        session: &Session,
        principal: Principal,
        event: ClientEvent,
    ) -> Result<(), ApplicationError> {
        let Principal { identity, role } = principal;
        let handle = &session.handle;

        if let Some((kind, target, payload)) = event.as_signal() {
            self.deps
                .signaling
                .relay(identity, target, kind, payload)
                .await;
            return Ok(());
        }

        match event {
            ClientEvent::JoinChat { conversation_id } => {
                self.deps
                    .chat
                    .join(identity, role, handle, conversation_id)
                    .await?;
            }
            ClientEvent::LeaveChat { conversation_id } => {
                self.deps
                    .chat
                    .leave(identity, handle.id(), conversation_id)
                    .await;
            }
            ClientEvent::SendMessage {
                conversation_id,
                body,
                kind,
                metadata,
            } => {
                self.deps
                    .chat
                    .send_message(identity, role, conversation_id, body, kind, metadata)
                    .await?;
            }
            ClientEvent::TypingStart { conversation_id } => {
                self.set_typing(principal, conversation_id, true).await?;
            }
            ClientEvent::TypingStop { conversation_id } => {
                self.set_typing(principal, conversation_id, false).await?;
            }
            ClientEvent::MarkMessagesRead {
                conversation_id,
                message_ids,
            } => {
                self.deps
                    .chat
                    .mark_read(identity, role, conversation_id, message_ids)
                    .await?;
            }
            ClientEvent::SubscribeToOrder { order_id } => {
                self.subscribe_to_order(session, principal, order_id).await?;
            }
            ClientEvent::UnsubscribeFromOrder { order_id } => {
                self.deps
                    .rooms
                    .leave(handle.id(), RoomKey::Order(order_id))
                    .await;
            }
            ClientEvent::SubscribeToProduct { product_id } => {
                self.subscribe_to_product(session, product_id).await?;
            }
            ClientEvent::ProductView { product_id } => {
                self.record_product_view(identity, product_id).await?;
            }
            ClientEvent::UpdatePresence {
                status,
                custom_status,
            } => {
                self.deps
                    .presence
                    .set_status(identity, status, custom_status)
                    .await;
            }
            ClientEvent::GetOnlineUsers => {
                let users = self.deps.registry.online_users().await;
                session.reply(ServerEvent::OnlineUsers { users });
            }
            ClientEvent::MarkNotificationRead { notification_id } => {
                self.deps
                    .notifications
                    .mark_read(notification_id, identity)
                    .await?;
            }
            ClientEvent::MarkAllNotificationsRead => {
                self.deps.notifications.mark_all_read(identity).await?;
            }
            ClientEvent::DeleteNotification { notification_id } => {
                self.deps
                    .notifications
                    .delete(notification_id, identity)
                    .await?;
            }
            ClientEvent::Authenticate { .. }
            | ClientEvent::Ping
            | ClientEvent::WebrtcOffer { .. }
            | ClientEvent::WebrtcAnswer { .. }
            | ClientEvent::WebrtcIceCandidate { .. }
            | ClientEvent::WebrtcHangup { .. }
            | ClientEvent::ScreenShareStart { .. }
            | ClientEvent::ScreenShareStop { .. } => {}
        }
        Ok(())
    }

    async fn set_typing(
        &self,
        principal: Principal,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Result<(), ApplicationError> {
        let own: Vec<_> = self
            .deps
            .registry
            .handles_for(principal.identity)
            .await
            .iter()
            .map(ConnectionHandle::id)
            .collect();
        self.deps
            .chat
            .set_typing(
                principal.identity,
                principal.role,
                conversation_id,
                is_typing,
                &own,
            )
            .await
    }

    /// 买家、卖家或管理员可以订阅订单
    async fn subscribe_to_order(
        &self,
        session: &Session,
        principal: Principal,
        order_id: OrderId,
    ) -> Result<(), ApplicationError> {
        let order = self
            .deps
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found(format!("order {order_id}")))?;
        if principal.role != Role::Admin && !order.involves(principal.identity) {
            return Err(ApplicationError::not_authorized(format!(
                "subscribe to order {order_id}"
            )));
        }

        self.deps
            .rooms
            .join(&session.handle, RoomKey::Order(order_id))
            .await;
        session.reply(ServerEvent::OrderStatus { order });
        Ok(())
    }

    async fn subscribe_to_product(
        &self,
        session: &Session,
        product_id: ProductId,
    ) -> Result<(), ApplicationError> {
        let product = self
            .deps
            .products
            .find_by_id(product_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found(format!("product {product_id}")))?;
        self.deps
            .rooms
            .join(&session.handle, RoomKey::Product(product_id))
            .await;
        session.reply(ServerEvent::ProductData { product });
        Ok(())
    }

    async fn record_product_view(
        &self,
        viewer: UserId,
        product_id: ProductId,
    ) -> Result<(), ApplicationError> {
        let product = self
            .deps
            .products
            .increment_views(product_id)
            .await
            .map_err(ApplicationError::persist)?
            .ok_or_else(|| ApplicationError::not_found(format!("product {product_id}")))?;
        self.deps
            .rooms
            .publish(
                RoomKey::Product(product_id),
                ServerEvent::ProductViewed {
                    product_id,
                    view_count: product.view_count,
                    viewer,
                },
            )
            .await;
        Ok(())
    }

    /// 连接关闭：退出房间、注销连接；最后一个连接离开时清除输入状态并标记离线
    pub async fn disconnect(&self, session: &mut Session) {
        let connection_id = session.handle.id();
        self.deps.rooms.leave_all(connection_id).await;

        let Some(principal) = session.principal.take() else {
            return;
        };
        if let Some(departure) = self
            .deps
            .registry
            .unregister(principal.identity, connection_id)
            .await
        {
            self.finish_departure(&departure).await;
        }
    }

    /// 在身份锁内复查：注销之后若已有新连接完成认证，则保持在线
    pub(crate) async fn finish_departure(&self, departure: &Departure) {
        if !departure.last_for_identity {
            return;
        }
        let identity = departure.connection.identity;
        let _guard = self.identities.lock(identity).await;
        if self.deps.registry.is_online(identity).await {
            debug!(user_id = %identity, "身份已重新连接，保持在线");
            return;
        }
        self.deps.chat.clear_typing_for(identity).await;
        self.deps
            .presence
            .set_status(identity, PresenceStatus::Offline, None)
            .await;
        info!(user_id = %identity, "用户已离线");
    }

    /// 清理空闲连接，返回移除的连接数
    pub async fn sweep_idle_connections(&self) -> usize {
        let departures = self
            .deps
            .registry
            .sweep_idle(self.deps.settings.idle_timeout)
            .await;
        for departure in &departures {
            self.deps
                .rooms
                .leave_all(departure.connection.handle.id())
                .await;
            self.finish_departure(departure).await;
        }
        departures.len()
    }

    /// 外部协作方通知订单已变更
    pub async fn publish_order_update(&self, order_id: OrderId) -> Result<usize, ApplicationError> {
        let order = self
            .deps
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found(format!("order {order_id}")))?;
        let delivered = self
            .deps
            .rooms
            .publish(RoomKey::Order(order_id), ServerEvent::OrderUpdated { order })
            .await;
        debug!(order_id = %order_id, delivered, "订单更新已推送");
        Ok(delivered)
    }

    pub async fn publish_product_update(
        &self,
        product_id: ProductId,
    ) -> Result<usize, ApplicationError> {
        let product = self
            .deps
            .products
            .find_by_id(product_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found(format!("product {product_id}")))?;
        let delivered = self
            .deps
            .rooms
            .publish(
                RoomKey::Product(product_id),
                ServerEvent::ProductUpdated { product },
            )
            .await;
        debug!(product_id = %product_id, delivered, "商品更新已推送");
        Ok(delivered)
    }

    /// 系统公告：指定角色，或所有角色
    pub async fn announce(&self, audience: Option<Role>, message: String) -> usize {
        let event = ServerEvent::SystemAnnouncement {
            message,
            sent_at: self.deps.clock.now(),
        };
        let roles: Vec<Role> = match audience {
            Some(role) => vec![role],
            None => Role::ALL.to_vec(),
        };

        let mut delivered = 0;
        for role in roles {
            delivered += self
                .deps
                .rooms
                .publish(RoomKey::Role(role), event.clone())
                .await;
        }
        info!(audience = ?audience, delivered, "系统公告已发送");
        delivered
    }

    pub async fn set_maintenance(&self, enabled: bool, message: Option<String>) -> usize {
        let event = ServerEvent::MaintenanceMode { enabled, message };
        let mut delivered = 0;
        for role in Role::ALL {
            delivered += self
                .deps
                .rooms
                .publish(RoomKey::Role(role), event.clone())
                .await;
        }
        info!(enabled, delivered, "维护模式通知已发送");
        delivered
    }

    pub fn heartbeat(&self) -> ServerEvent {
        ServerEvent::Heartbeat {
            timestamp: self.deps.clock.now(),
        }
    }
}

fn empty_feed(role: Role) -> RoleFeed {
    match role {
        Role::Customer => RoleFeed::Customer { active_orders: 0 },
        Role::Seller => RoleFeed::Seller { pending_orders: 0 },
        Role::Admin => RoleFeed::Admin { online_users: 0 },
    }
}
