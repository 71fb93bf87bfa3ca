//! 按键串行化的互斥锁表
//!
//! 同一个键上的操作互斥，不同键之间互不阻塞。
//! 最后一个持有者释放后条目被回收，表的大小只与当前活跃的键数相关。

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Copy> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Copy> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取键对应的锁，守卫释放前其他同键调用方等待
    pub async fn lock(&self, key: K) -> KeyedGuard<'_, K> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slots
                .entry(key)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = slot.lock_owned().await;
        KeyedGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    pub fn active_keys(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

pub struct KeyedGuard<'a, K: Eq + Hash + Copy> {
    locks: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Copy> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self
            .locks
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // 只剩表自身的引用说明没有等待者
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}
