//! 广播房间路由
//!
//! 房间在首次加入时隐式创建，成员清空时隐式回收，不做持久化。
//! 发布时先在读锁内取成员快照，释放锁后再逐个投递。

use std::collections::{HashMap, HashSet};

use domain::{ConnectionId, RoomKey, ServerEvent};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::connection::ConnectionHandle;

#[derive(Default)]
struct RouterState {
    rooms: HashMap<RoomKey, HashMap<ConnectionId, ConnectionHandle>>,
    memberships: HashMap<ConnectionId, HashSet<RoomKey>>,
}

impl RouterState {
    fn detach(&mut self, connection_id: ConnectionId, room: &RoomKey) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&connection_id).is_some();
        if members.is_empty() {
            self.rooms.remove(room);
            trace!(room = %room, "空房间已回收");
        }
        removed
    }
}

#[derive(Default)]
pub struct RoomRouter {
    state: RwLock<RouterState>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回是否为新加入
    pub async fn join(&self, handle: &ConnectionHandle, room: RoomKey) -> bool {
        let mut state = self.state.write().await;
        let joined = state
            .rooms
            .entry(room)
            .or_default()
            .insert(handle.id(), handle.clone())
            .is_none();
        state.memberships.entry(handle.id()).or_default().insert(room);
        if joined {
            debug!(connection_id = %handle.id(), room = %room, "加入房间");
        }
        joined
    }

    /// 离开动态房间；标准房间只在连接断开时随 `leave_all` 一起退出
    pub async fn leave(&self, connection_id: ConnectionId, room: RoomKey) -> bool {
        if room.is_standard() {
            return false;
        }
        let mut state = self.state.write().await;
        let removed = state.detach(connection_id, &room);
        if let Some(rooms) = state.memberships.get_mut(&connection_id) {
            rooms.remove(&room);
        }
        if removed {
            debug!(connection_id = %connection_id, room = %room, "离开房间");
        }
        removed
    }

    /// 退出连接所在的全部房间
    pub async fn leave_all(&self, connection_id: ConnectionId) -> Vec<RoomKey> {
        let mut state = self.state.write().await;
        let rooms: Vec<RoomKey> = state
            .memberships
            .remove(&connection_id)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();
        for room in &rooms {
            state.detach(connection_id, room);
        }
        rooms
    }

    pub async fn rooms_of(&self, connection_id: ConnectionId) -> HashSet<RoomKey> {
        self.state
            .read()
            .await
            .memberships
            .get(&connection_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_member(&self, connection_id: ConnectionId, room: RoomKey) -> bool {
        self.state
            .read()
            .await
            .rooms
            .get(&room)
            .is_some_and(|members| members.contains_key(&connection_id))
    }

    pub async fn member_count(&self, room: RoomKey) -> usize {
        self.state
            .read()
            .await
            .rooms
            .get(&room)
            .map_or(0, HashMap::len)
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }

    /// 投递给房间内的每个连接，返回成功投递的数量
    pub async fn publish(&self, room: RoomKey, event: ServerEvent) -> usize {
        self.publish_excluding(room, event, &[]).await
    }

    pub async fn publish_excluding(
        &self,
        room: RoomKey,
        event: ServerEvent,
        excluded: &[ConnectionId],
    ) -> usize {
        let targets: Vec<ConnectionHandle> = {
            let state = self.state.read().await;
            match state.rooms.get(&room) {
                Some(members) => members
                    .values()
                    .filter(|handle| !excluded.contains(&handle.id()))
                    .cloned()
                    .collect(),
                None => return 0,
            }
        };

        let delivered = targets
            .iter()
            .filter(|handle| handle.send(event.clone()))
            .count();
        trace!(room = %room, delivered, "房间广播");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{ConversationId, Role, UserId};

    fn heartbeat() -> ServerEvent {
        ServerEvent::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_member_once() {
        let router = RoomRouter::new();
        let room = RoomKey::Chat(ConversationId::generate());
        let (a, mut rx_a) = ConnectionHandle::channel();
        let (b, mut rx_b) = ConnectionHandle::channel();
        router.join(&a, room).await;
        router.join(&b, room).await;
        assert!(!router.join(&b, room).await);

        assert_eq!(router.publish(room, heartbeat()).await, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_excluding_skips_listed_connections() {
        let router = RoomRouter::new();
        let room = RoomKey::Chat(ConversationId::generate());
        let (sender, mut rx_sender) = ConnectionHandle::channel();
        let (peer, mut rx_peer) = ConnectionHandle::channel();
        router.join(&sender, room).await;
        router.join(&peer, room).await;

        let delivered = router
            .publish_excluding(room, heartbeat(), &[sender.id()])
            .await;
        assert_eq!(delivered, 1);
        assert!(rx_sender.try_recv().is_err());
        assert!(rx_peer.try_recv().is_ok());
    }

    #[tokio::test]
    async fn empty_rooms_are_collected() {
        let router = RoomRouter::new();
        let room = RoomKey::Chat(ConversationId::generate());
        let (handle, _rx) = ConnectionHandle::channel();
        router.join(&handle, room).await;
        assert_eq!(router.room_count().await, 1);

        assert!(router.leave(handle.id(), room).await);
        assert_eq!(router.room_count().await, 0);
        assert!(router.rooms_of(handle.id()).await.is_empty());
    }

    #[tokio::test]
    async fn standard_rooms_survive_explicit_leave() {
        let router = RoomRouter::new();
        let user = UserId::generate();
        let (handle, _rx) = ConnectionHandle::channel();
        for room in RoomKey::standard(user, Role::Customer) {
            router.join(&handle, room).await;
        }

        assert!(!router.leave(handle.id(), RoomKey::User(user)).await);
        assert!(router.is_member(handle.id(), RoomKey::User(user)).await);

        let left = router.leave_all(handle.id()).await;
        assert_eq!(left.len(), 3);
        assert_eq!(router.room_count().await, 0);
    }

    #[tokio::test]
    async fn events_arrive_in_submission_order() {
        let router = RoomRouter::new();
        let room = RoomKey::Chat(ConversationId::generate());
        let (handle, mut rx) = ConnectionHandle::channel();
        router.join(&handle, room).await;

        for count in 0..5u64 {
            router
                .publish(room, ServerEvent::NotificationsCount { count })
                .await;
        }
        for expected in 0..5u64 {
            match rx.try_recv().unwrap() {
                ServerEvent::NotificationsCount { count } => assert_eq!(count, expected),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }
}
