//! 单元测试共用的内存存储

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use domain::{
    Notification, NotificationId, NotificationQuery, NotificationRepository, RepositoryError,
    RepositoryFuture, Timestamp, UserId,
};

#[derive(Default, Clone)]
pub struct MemoryNotifications {
    items: Arc<Mutex<HashMap<NotificationId, Notification>>>,
}

impl MemoryNotifications {
    pub fn get(&self, id: NotificationId) -> Option<Notification> {
        self.items.lock().unwrap().get(&id).cloned()
    }

    pub fn put(&self, notification: Notification) {
        self.items
            .lock()
            .unwrap()
            .insert(notification.id, notification);
    }

    fn select(&self, filter: impl Fn(&Notification) -> bool) -> Vec<Notification> {
        let mut items: Vec<Notification> = self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|n| filter(n))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }
}

impl NotificationRepository for MemoryNotifications {
    fn insert(&self, notification: Notification) -> RepositoryFuture<Notification> {
        self.put(notification.clone());
        Box::pin(async move { Ok(notification) })
    }

    fn update(&self, notification: Notification) -> RepositoryFuture<Notification> {
        let exists = self.items.lock().unwrap().contains_key(&notification.id);
        if exists {
            self.put(notification.clone());
        }
        Box::pin(async move {
            if exists {
                Ok(notification)
            } else {
                Err(RepositoryError::NotFound)
            }
        })
    }

    fn find_by_id(&self, id: NotificationId) -> RepositoryFuture<Option<Notification>> {
        let found = self.get(id);
        Box::pin(async move { Ok(found) })
    }

    fn list_for_recipient(&self, query: NotificationQuery) -> RepositoryFuture<Vec<Notification>> {
        let mut items = self.select(|n| {
            n.recipient == query.recipient && !n.is_deleted() && (!query.unread_only || n.is_unread())
        });
        if let Some(limit) = query.limit {
            items.truncate(limit);
        }
        Box::pin(async move { Ok(items) })
    }

    fn count_unread(&self, recipient: UserId) -> RepositoryFuture<u64> {
        let count = self
            .select(|n| n.recipient == recipient && n.is_unread())
            .len() as u64;
        Box::pin(async move { Ok(count) })
    }

    fn find_expirable(&self, now: Timestamp) -> RepositoryFuture<Vec<Notification>> {
        let items = self.select(|n| !n.is_deleted() && n.should_expire(now));
        Box::pin(async move { Ok(items) })
    }

    fn find_cleanup_candidates(&self, cutoff: Timestamp) -> RepositoryFuture<Vec<Notification>> {
        let items = self.select(|n| {
            !n.is_deleted()
                && n.created_at < cutoff
                && (n.read_at.is_some() || n.dismissed_at.is_some())
        });
        Box::pin(async move { Ok(items) })
    }
}
