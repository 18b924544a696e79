// src/types/string.rs

//! String 类型的存取与原子计数
//!
//! - SET key value [EX s|PX ms] [NX|XX] [KEEPTTL] [GET]
//! - GET / GETSET / GETDEL / SETNX / SETEX
//! - MSET / MGET：在同一把 keyspace 锁内完成，批量之间不会交错
//! - INCR / DECR / INCRBY / DECRBY：值必须能解析为 i64，否则 NotAnInteger 且不修改
//! - INCRBYFLOAT：按 f64 累加，结果不能是 NaN 或无穷
//! - APPEND / STRLEN

use std::time::{Duration, Instant};

use crate::engine::{Keyspace, Reply};
use crate::error::{CommandError, CommandResult};
use crate::types::{Value, format_f64, parse_f64, parse_i64};

#[derive(Debug, Default)]
struct SetOptions {
    expires_at: Option<Instant>,
    nx: bool,
    xx: bool,
    keep_ttl: bool,
    get: bool,
}

fn parse_set_options(opts: &[Vec<u8>]) -> CommandResult<SetOptions> {
    let mut out = SetOptions::default();
    let mut iter = opts.iter();
    while let Some(opt) = iter.next() {
        match opt.to_ascii_uppercase().as_slice() {
            flag @ (b"EX" | b"PX") => {
                if out.expires_at.is_some() || out.keep_ttl {
                    return Err(CommandError::Syntax);
                }
                let raw = iter.next().ok_or(CommandError::Syntax)?;
                let n = parse_i64(raw)?;
                if n <= 0 {
                    return Err(CommandError::InvalidExpireTime("set".into()));
                }
                let ttl = if flag == b"EX" {
                    Duration::from_secs(n as u64)
                } else {
                    Duration::from_millis(n as u64)
                };
                let at = Instant::now()
                    .checked_add(ttl)
                    .ok_or_else(|| CommandError::InvalidExpireTime("set".into()))?;
                out.expires_at = Some(at);
            }
            b"NX" => out.nx = true,
            b"XX" => out.xx = true,
            b"KEEPTTL" => {
                if out.expires_at.is_some() {
                    return Err(CommandError::Syntax);
                }
                out.keep_ttl = true;
            }
            b"GET" => out.get = true,
            _ => return Err(CommandError::Syntax),
        }
    }
    if out.nx && out.xx {
        return Err(CommandError::Syntax);
    }
    Ok(out)
}

/// 写入字符串，已有值（任何类型）会被覆盖。
///
/// # 返回
/// - `OK`：写入成功
/// - `Nil`：NX/XX 条件不满足
/// - 带 GET 时返回旧值（或 Nil）
///
/// # 错误
/// - 选项组合非法时返回 Syntax，带 GET 且旧值不是字符串时返回 WrongType
pub fn set(ks: &mut Keyspace, key: &[u8], value: &[u8], opts: &[Vec<u8>]) -> CommandResult<Reply> {
    let opts = parse_set_options(opts)?;

    let old = match ks.get(key) {
        Some(v) if opts.get => Some(Reply::Bulk(v.as_string()?.clone())),
        Some(_) => Some(Reply::Nil),
        None => None,
    };
    let exists = old.is_some();
    if (opts.nx && exists) || (opts.xx && !exists) {
        return Ok(Reply::Nil);
    }

    let value = Value::String(value.to_vec());
    if opts.keep_ttl {
        ks.set_keep_ttl(key, value);
    } else {
        ks.set(key, value, opts.expires_at);
    }

    if opts.get {
        Ok(old.unwrap_or(Reply::Nil))
    } else {
        Ok(Reply::ok())
    }
}

/// 读取字符串；键不存在返回 Nil。
pub fn get(ks: &mut Keyspace, key: &[u8]) -> CommandResult<Reply> {
    match ks.get(key) {
        Some(v) => Ok(Reply::Bulk(v.as_string()?.clone())),
        None => Ok(Reply::Nil),
    }
}

/// 键不存在时才写入，返回 1 / 0。
pub fn setnx(ks: &mut Keyspace, key: &[u8], value: &[u8]) -> CommandResult<Reply> {
    if ks.exists(key) {
        return Ok(Reply::Integer(0));
    }
    ks.set(key, Value::String(value.to_vec()), None);
    Ok(Reply::Integer(1))
}

/// 写入并设置过期秒数。
pub fn setex(ks: &mut Keyspace, key: &[u8], secs: i64, value: &[u8]) -> CommandResult<Reply> {
    if secs <= 0 {
        return Err(CommandError::InvalidExpireTime("setex".into()));
    }
    let at = Instant::now()
        .checked_add(Duration::from_secs(secs as u64))
        .ok_or_else(|| CommandError::InvalidExpireTime("setex".into()))?;
    ks.set(key, Value::String(value.to_vec()), Some(at));
    Ok(Reply::ok())
}

/// 原子地写入新值并返回旧值。
pub fn getset(ks: &mut Keyspace, key: &[u8], value: &[u8]) -> CommandResult<Reply> {
    let old = get(ks, key)?;
    ks.set(key, Value::String(value.to_vec()), None);
    Ok(old)
}

/// 读取后删除。
pub fn getdel(ks: &mut Keyspace, key: &[u8]) -> CommandResult<Reply> {
    let old = get(ks, key)?;
    if old != Reply::Nil {
        ks.delete(key);
    }
    Ok(old)
}

/// 批量写入。调用方持有 keyspace 锁，整批不会与其它 MSET/MGET 交错。
pub fn mset(ks: &mut Keyspace, pairs: &[Vec<u8>]) -> CommandResult<Reply> {
    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Err(CommandError::WrongArity("mset".into()));
    }
    for pair in pairs.chunks(2) {
        ks.set(&pair[0], Value::String(pair[1].clone()), None);
    }
    Ok(Reply::ok())
}

/// 批量读取，不存在或类型不是字符串的位置返回 Nil。
pub fn mget(ks: &mut Keyspace, keys: &[Vec<u8>]) -> CommandResult<Reply> {
    let out = keys
        .iter()
        .map(|k| match ks.get(k) {
            Some(Value::String(s)) => Reply::Bulk(s.clone()),
            _ => Reply::Nil,
        })
        .collect();
    Ok(Reply::Array(out))
}

/// 原子地加 `delta`：
/// - 键不存在视为 0
/// - 值不是整数时返回 NotAnInteger，原值不变
/// - 溢出时返回 Overflow，原值不变
/// - 保留原有的过期时间
pub fn incr_by(ks: &mut Keyspace, key: &[u8], delta: i64) -> CommandResult<Reply> {
    let current = match ks.get(key) {
        Some(v) => parse_i64(v.as_string()?)?,
        None => 0,
    };
    let next = current.checked_add(delta).ok_or(CommandError::Overflow)?;
    ks.set_keep_ttl(key, Value::String(next.to_string().into_bytes()));
    Ok(Reply::Integer(next))
}

/// 同理实现减法；`delta` 取反溢出（i64::MIN）也按 Overflow 处理
pub fn decr_by(ks: &mut Keyspace, key: &[u8], delta: i64) -> CommandResult<Reply> {
    let neg = delta.checked_neg().ok_or(CommandError::Overflow)?;
    incr_by(ks, key, neg)
}

/// 浮点累加，返回新值的字符串形式；保留原有的过期时间
pub fn incr_by_float(ks: &mut Keyspace, key: &[u8], delta: f64) -> CommandResult<Reply> {
    let current = match ks.get(key) {
        Some(v) => parse_f64(v.as_string()?)?,
        None => 0.0,
    };
    let next = current + delta;
    if !next.is_finite() {
        return Err(CommandError::NanOrInfinity);
    }
    let formatted = format_f64(next);
    ks.set_keep_ttl(key, Value::String(formatted.clone()));
    Ok(Reply::Bulk(formatted))
}

/// 追加到字符串末尾，返回新长度。
pub fn append(ks: &mut Keyspace, key: &[u8], suffix: &[u8]) -> CommandResult<Reply> {
    if let Some(v) = ks.get(key) {
        v.as_string()?;
    }
    let s = ks
        .get_or_insert_with(key, || Value::String(Vec::new()))
        .as_string_mut()?;
    s.extend_from_slice(suffix);
    Ok(Reply::Integer(s.len() as i64))
}

pub fn strlen(ks: &mut Keyspace, key: &[u8]) -> CommandResult<Reply> {
    match ks.get(key) {
        Some(v) => Ok(Reply::Integer(v.as_string()?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}
