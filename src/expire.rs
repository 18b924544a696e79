// src/expire.rs

//! 过期相关命令与后台清理任务
//!
//! EXPIRE / PEXPIRE / EXPIREAT / PEXPIREAT / TTL / PTTL / PERSIST 作用于 keyspace 里的绝对过期时间。
//! 惰性删除由 keyspace 的每个访问入口完成；`start_cleaner` 负责定期主动清理。

use std::sync::Weak;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::time::{Duration, interval};
use tracing::debug;

use crate::engine::keyspace::Ttl;
use crate::engine::{Keyspace, Reply, Shared};
use crate::error::{CommandError, CommandResult};

/// 设置 key 的过期时间，`millis` 区分 PEXPIRE 与 EXPIRE
///
/// - key 不存在返回 0
/// - 非正数的时长会立即删除 key，返回 1
pub fn expire(ks: &mut Keyspace, key: &[u8], amount: i64, millis: bool) -> CommandResult<Reply> {
    let now = Instant::now();
    let at = if amount <= 0 {
        now
    } else {
        let ttl = if millis {
            Duration::from_millis(amount as u64)
        } else {
            Duration::from_secs(amount as u64)
        };
        let name = if millis { "pexpire" } else { "expire" };
        now.checked_add(ttl)
            .ok_or_else(|| CommandError::InvalidExpireTime(name.into()))?
    };
    Ok(Reply::Integer(ks.expire_at(key, at) as i64))
}

/// EXPIREAT / PEXPIREAT：按 Unix 时间戳设置过期，已过去的时间点立即删除 key
pub fn expire_at_unix(ks: &mut Keyspace, key: &[u8], timestamp: i64, millis: bool) -> CommandResult<Reply> {
    let name = if millis { "pexpireat" } else { "expireat" };
    let target_ms = if millis {
        timestamp
    } else {
        timestamp
            .checked_mul(1000)
            .ok_or_else(|| CommandError::InvalidExpireTime(name.into()))?
    };
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let now = Instant::now();
    let at = match target_ms.checked_sub(now_ms) {
        Some(left) if left > 0 => now
            .checked_add(Duration::from_millis(left as u64))
            .ok_or_else(|| CommandError::InvalidExpireTime(name.into()))?,
        _ => now,
    };
    Ok(Reply::Integer(ks.expire_at(key, at) as i64))
}

/// 查询 key TTL：不存在返回 -2，没有过期时间返回 -1
///
/// 秒数向上取整，剩余 1ms 也返回 1。
pub fn ttl(ks: &mut Keyspace, key: &[u8], millis: bool) -> CommandResult<Reply> {
    let v = match ks.ttl(key) {
        Ttl::Absent => -2,
        Ttl::NoExpiry => -1,
        Ttl::Remaining(left) if millis => left.as_millis() as i64,
        Ttl::Remaining(left) => left.as_millis().div_ceil(1000) as i64,
    };
    Ok(Reply::Integer(v))
}

/// 移除 key 的过期属性
pub fn persist(ks: &mut Keyspace, key: &[u8]) -> CommandResult<Reply> {
    Ok(Reply::Integer(ks.persist(key) as i64))
}

/// 后台定时清理任务
///
/// 只持有 `Weak`，引擎被释放后任务自动退出。
pub async fn start_cleaner(shared: Weak<Shared>) {
    let (period, batch) = match shared.upgrade() {
        Some(s) => (
            s.config.expire_sweep_interval_ms.max(1),
            s.config.expire_sweep_batch.max(1),
        ),
        None => return,
    };
    let mut iv = interval(Duration::from_millis(period));
    loop {
        iv.tick().await;
        let Some(strong) = shared.upgrade() else {
            debug!("engine dropped, expiry cleaner stopping");
            break;
        };
        let removed = strong.keyspace.lock().sweep_expired(batch);
        if removed > 0 {
            debug!(removed, "expired keys swept");
        }
    }
}
