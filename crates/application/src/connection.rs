//! 连接注册表
//!
//! 记录已认证身份与其全部活跃连接。一个身份可以同时持有多个连接，
//! 广播会扇出到该身份的所有连接。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use domain::{ConnectionId, Role, ServerEvent, Timestamp, UserId};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::ApplicationError;

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

/// 一条活跃连接的投递端
///
/// 出站事件写入无界通道，由连接自己的发送任务按顺序写到传输层。
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: EventSender,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(sender: EventSender) -> Self {
        Self {
            id: ConnectionId::generate(),
            sender,
            cancel: CancellationToken::new(),
        }
    }

    /// 创建句柄以及对应的接收端
    pub fn channel() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// 传输已关闭时返回 false
    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 通知连接任务关闭传输
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub identity: UserId,
    pub role: Role,
    pub joined_at: Timestamp,
    pub last_active: Timestamp,
    pub handle: ConnectionHandle,
}

/// 注销结果
#[derive(Debug, Clone)]
pub struct Departure {
    pub connection: Connection,
    /// 是否为该身份的最后一个连接
    pub last_for_identity: bool,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    /// 按注册顺序排列，末尾为最新连接
    by_identity: HashMap<UserId, Vec<ConnectionId>>,
}

impl RegistryState {
    fn remove(&mut self, connection_id: ConnectionId) -> Option<Departure> {
        let connection = self.connections.remove(&connection_id)?;
        let mut last_for_identity = true;
        if let Some(ids) = self.by_identity.get_mut(&connection.identity) {
            ids.retain(|id| *id != connection_id);
            last_for_identity = ids.is_empty();
            if last_for_identity {
                self.by_identity.remove(&connection.identity);
            }
        }
        Some(Departure {
            connection,
            last_for_identity,
        })
    }
}

pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            clock,
        }
    }

    /// 注册连接，返回该身份此前是否离线
    pub async fn register(
        &self,
        identity: UserId,
        role: Role,
        handle: ConnectionHandle,
    ) -> Result<bool, ApplicationError> {
        let connection_id = handle.id();
        let now = self.clock.now();
        let mut state = self.state.write().await;

        if state.connections.contains_key(&connection_id) {
            warn!(user_id = %identity, connection_id = %connection_id, "连接重复注册");
            return Err(ApplicationError::AlreadyRegistered);
        }

        state.connections.insert(
            connection_id,
            Connection {
                identity,
                role,
                joined_at: now,
                last_active: now,
                handle,
            },
        );
        let ids = state.by_identity.entry(identity).or_default();
        ids.push(connection_id);
        let came_online = ids.len() == 1;

        info!(
            user_id = %identity,
            connection_id = %connection_id,
            role = %role,
            handles = ids.len(),
            "连接已注册"
        );
        Ok(came_online)
    }

    /// 只移除指定的连接；身份不匹配时不做任何事
    pub async fn unregister(
        &self,
        identity: UserId,
        connection_id: ConnectionId,
    ) -> Option<Departure> {
        let mut state = self.state.write().await;
        match state.connections.get(&connection_id) {
            Some(connection) if connection.identity == identity => {}
            _ => return None,
        }
        let departure = state.remove(connection_id)?;
        info!(
            user_id = %identity,
            connection_id = %connection_id,
            last = departure.last_for_identity,
            "连接已注销"
        );
        Some(departure)
    }

    pub async fn is_online(&self, identity: UserId) -> bool {
        let state = self.state.read().await;
        state
            .by_identity
            .get(&identity)
            .is_some_and(|ids| !ids.is_empty())
    }

    /// 刷新连接的最后活跃时间
    pub async fn touch(&self, connection_id: ConnectionId) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if let Some(connection) = state.connections.get_mut(&connection_id) {
            connection.last_active = now;
        }
    }

    pub async fn get(&self, connection_id: ConnectionId) -> Option<Connection> {
        self.state.read().await.connections.get(&connection_id).cloned()
    }

    pub async fn handles_for(&self, identity: UserId) -> Vec<ConnectionHandle> {
        let state = self.state.read().await;
        state
            .by_identity
            .get(&identity)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.connections.get(id))
                    .map(|connection| connection.handle.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 该身份最近注册的连接
    pub async fn latest_handle(&self, identity: UserId) -> Option<ConnectionHandle> {
        let state = self.state.read().await;
        let id = state.by_identity.get(&identity)?.last()?;
        state
            .connections
            .get(id)
            .map(|connection| connection.handle.clone())
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        let state = self.state.read().await;
        let mut users: Vec<UserId> = state.by_identity.keys().copied().collect();
        users.sort_by_key(|id| id.as_uuid());
        users
    }

    pub async fn online_count(&self) -> usize {
        self.state.read().await.by_identity.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// 移除超过 `idle_timeout` 未活跃的连接，并通知其传输关闭
    pub async fn sweep_idle(&self, idle_timeout: Duration) -> Vec<Departure> {
        let cutoff = self.clock.now() - idle_timeout;
        let mut state = self.state.write().await;

        let stale: Vec<ConnectionId> = state
            .connections
            .iter()
            .filter(|(_, connection)| connection.last_active < cutoff)
            .map(|(id, _)| *id)
            .collect();

        let departures: Vec<Departure> = stale
            .into_iter()
            .filter_map(|id| state.remove(id))
            .collect();
        drop(state);

        for departure in &departures {
            departure.connection.handle.close();
            debug!(
                user_id = %departure.connection.identity,
                connection_id = %departure.connection.handle.id(),
                "空闲连接已清理"
            );
        }
        if !departures.is_empty() {
            info!(removed = departures.len(), "空闲连接清理完成");
        }
        departures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;

    fn registry() -> (ConnectionRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (ConnectionRegistry::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn identity_with_multiple_handles_stays_online_until_last_leaves() {
        let (registry, _) = registry();
        let user = UserId::generate();
        let (first, _rx1) = ConnectionHandle::channel();
        let (second, _rx2) = ConnectionHandle::channel();

        assert!(registry.register(user, Role::Customer, first.clone()).await.unwrap());
        assert!(!registry.register(user, Role::Customer, second.clone()).await.unwrap());
        assert_eq!(registry.handles_for(user).await.len(), 2);

        let departure = registry.unregister(user, first.id()).await.unwrap();
        assert!(!departure.last_for_identity);
        assert!(registry.is_online(user).await);

        let departure = registry.unregister(user, second.id()).await.unwrap();
        assert!(departure.last_for_identity);
        assert!(!registry.is_online(user).await);
    }

    #[tokio::test]
    async fn registering_same_handle_twice_fails() {
        let (registry, _) = registry();
        let user = UserId::generate();
        let (handle, _rx) = ConnectionHandle::channel();

        registry.register(user, Role::Seller, handle.clone()).await.unwrap();
        let err = registry.register(user, Role::Seller, handle).await.unwrap_err();
        assert!(matches!(err, ApplicationError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn unregister_ignores_foreign_identity() {
        let (registry, _) = registry();
        let owner = UserId::generate();
        let (handle, _rx) = ConnectionHandle::channel();
        registry.register(owner, Role::Customer, handle.clone()).await.unwrap();

        assert!(registry.unregister(UserId::generate(), handle.id()).await.is_none());
        assert!(registry.is_online(owner).await);
    }

    #[tokio::test]
    async fn latest_handle_is_most_recent_registration() {
        let (registry, _) = registry();
        let user = UserId::generate();
        let (older, _rx1) = ConnectionHandle::channel();
        let (newer, _rx2) = ConnectionHandle::channel();
        registry.register(user, Role::Customer, older).await.unwrap();
        registry.register(user, Role::Customer, newer.clone()).await.unwrap();

        assert_eq!(registry.latest_handle(user).await.unwrap().id(), newer.id());
    }

    #[tokio::test]
    async fn idle_sweep_removes_only_stale_handles() {
        let (registry, clock) = registry();
        let idle_user = UserId::generate();
        let active_user = UserId::generate();
        let (idle, _rx1) = ConnectionHandle::channel();
        let (active, _rx2) = ConnectionHandle::channel();
        registry.register(idle_user, Role::Customer, idle.clone()).await.unwrap();
        registry.register(active_user, Role::Customer, active.clone()).await.unwrap();

        clock.advance(Duration::minutes(4));
        registry.touch(active.id()).await;
        clock.advance(Duration::minutes(2));

        let departures = registry.sweep_idle(Duration::minutes(5)).await;
        assert_eq!(departures.len(), 1);
        assert_eq!(departures[0].connection.identity, idle_user);
        assert!(departures[0].last_for_identity);
        assert!(idle.is_closed());
        assert!(!registry.is_online(idle_user).await);
        assert!(registry.is_online(active_user).await);
    }
}
