//! 在线状态跟踪
//!
//! 每个身份一条记录，变更只发布到 `user:<id>`，不做全局广播。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{PresenceRecord, PresenceStatus, RoomKey, ServerEvent, UserId};
use tokio::sync::RwLock;
use tracing::info;

use crate::clock::Clock;
use crate::rooms::RoomRouter;

pub struct PresenceTracker {
    records: RwLock<HashMap<UserId, PresenceRecord>>,
    rooms: Arc<RoomRouter>,
    clock: Arc<dyn Clock>,
}

impl PresenceTracker {
    pub fn new(rooms: Arc<RoomRouter>, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            rooms,
            clock,
        }
    }

    pub async fn set_status(
        &self,
        identity: UserId,
        status: PresenceStatus,
        custom_status: Option<String>,
    ) -> PresenceRecord {
        let record = PresenceRecord::new(identity, status, custom_status, self.clock.now());
        self.records.write().await.insert(identity, record.clone());

        info!(user_id = %identity, status = ?status, "在线状态变更");
        self.rooms
            .publish(
                RoomKey::User(identity),
                ServerEvent::PresenceUpdated(record.clone()),
            )
            .await;
        record
    }

    pub async fn get(&self, identity: UserId) -> Option<PresenceRecord> {
        self.records.read().await.get(&identity).cloned()
    }

    pub async fn status_of(&self, identity: UserId) -> PresenceStatus {
        self.get(identity)
            .await
            .map_or(PresenceStatus::Offline, |record| record.status)
    }
}
