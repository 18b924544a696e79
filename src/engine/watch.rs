// src/engine/watch.rs
use std::collections::HashSet;

use dashmap::{DashMap, DashSet};

use crate::engine::session::SessionId;

/// WATCH 的乐观锁登记表
///
/// 写命令成功后调用 `touch`，监视这些 key 的会话被标记为脏；
/// 脏会话的下一次 EXEC 不执行任何命令，直接返回 Nil。
#[derive(Debug, Default)]
pub struct WatchManager {
    // key -> 监视该 key 的会话 ID 集合
    watched_keys: DashMap<Vec<u8>, HashSet<SessionId>>,
    // Session ID -> 该会话监视的 key 集合
    session_watches: DashMap<SessionId, HashSet<Vec<u8>>>,
    // 被修改过的会话
    dirty: DashSet<SessionId>,
}

impl WatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    // 添加监视
    pub fn watch(&self, session_id: SessionId, keys: &[Vec<u8>]) {
        for key in keys {
            self.watched_keys
                .entry(key.clone())
                .or_default()
                .insert(session_id);
            self.session_watches
                .entry(session_id)
                .or_default()
                .insert(key.clone());
        }
    }

    // 移除 session 的所有监视，并清掉脏标记
    pub fn unwatch(&self, session_id: SessionId) {
        if let Some((_, keys)) = self.session_watches.remove(&session_id) {
            for key in keys {
                let now_empty = match self.watched_keys.get_mut(&key) {
                    Some(mut sessions) => {
                        sessions.remove(&session_id);
                        sessions.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.watched_keys.remove_if(&key, |_, s| s.is_empty());
                }
            }
        }
        self.dirty.remove(&session_id);
    }

    // 通知 key 被修改，返回受影响的会话数
    pub fn touch<K: AsRef<[u8]>>(&self, keys: &[K]) -> usize {
        let mut affected = 0;
        for key in keys {
            if let Some(sessions) = self.watched_keys.get(key.as_ref()) {
                for id in sessions.iter() {
                    if self.dirty.insert(*id) {
                        affected += 1;
                    }
                }
            }
        }
        affected
    }

    // FLUSHDB：所有正在监视的会话都变脏
    pub fn touch_all(&self) {
        for entry in self.session_watches.iter() {
            self.dirty.insert(*entry.key());
        }
    }

    // 检查会话是否标记为脏
    pub fn is_dirty(&self, session_id: SessionId) -> bool {
        self.dirty.contains(&session_id)
    }

    pub fn watched_key_count(&self) -> usize {
        self.watched_keys.len()
    }
}
