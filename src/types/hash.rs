// src/types/hash.rs

//! Hash 类型：field -> value
//!
//! 支持命令：HSET（可一次写多个 field）、HGET、HMGET、HDEL、HEXISTS、
//! HLEN、HKEYS、HVALS、HGETALL、HINCRBY、HINCRBYFLOAT、HSETNX
//!
//! 删除最后一个 field 时整个键随之消失。

use crate::engine::{Keyspace, Reply};
use crate::error::{CommandError, CommandResult};
use crate::types::{Value, format_f64, parse_f64, parse_i64};

/// HSET key field value [field value ...]
///
/// 返回新增的 field 数量（覆盖已有 field 不计入）。
pub fn hset(ks: &mut Keyspace, key: &[u8], pairs: &[Vec<u8>]) -> CommandResult<Reply> {
    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Err(CommandError::WrongArity("hset".into()));
    }
    let hash = ks.get_or_insert_with(key, Value::new_hash).as_hash_mut()?;
    let mut added = 0;
    for pair in pairs.chunks(2) {
        if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
            added += 1;
        }
    }
    Ok(Reply::Integer(added))
}

/// HGET key field，不存在返回 Nil
pub fn hget(ks: &mut Keyspace, key: &[u8], field: &[u8]) -> CommandResult<Reply> {
    let Some(value) = ks.get(key) else {
        return Ok(Reply::Nil);
    };
    Ok(value
        .as_hash()?
        .get(field)
        .map(|v| Reply::Bulk(v.clone()))
        .unwrap_or(Reply::Nil))
}

pub fn hmget(ks: &mut Keyspace, key: &[u8], fields: &[Vec<u8>]) -> CommandResult<Reply> {
    let hash = match ks.get(key) {
        Some(value) => Some(value.as_hash()?),
        None => None,
    };
    let out = fields
        .iter()
        .map(|f| {
            hash.and_then(|h| h.get(f))
                .map(|v| Reply::Bulk(v.clone()))
                .unwrap_or(Reply::Nil)
        })
        .collect();
    Ok(Reply::Array(out))
}

/// HDEL key field [field ...]，返回实际删除的数量
pub fn hdel(ks: &mut Keyspace, key: &[u8], fields: &[Vec<u8>]) -> CommandResult<Reply> {
    let Some(value) = ks.get(key) else {
        return Ok(Reply::Integer(0));
    };
    value.as_hash()?;
    let mut removed = 0;
    if let Some(value) = ks.get_mut(key) {
        let hash = value.as_hash_mut()?;
        for f in fields {
            if hash.remove(f).is_some() {
                removed += 1;
            }
        }
    }
    ks.remove_if_empty(key);
    Ok(Reply::Integer(removed))
}

pub fn hexists(ks: &mut Keyspace, key: &[u8], field: &[u8]) -> CommandResult<Reply> {
    let found = match ks.get(key) {
        Some(value) => value.as_hash()?.contains_key(field),
        None => false,
    };
    Ok(Reply::Integer(found as i64))
}

pub fn hlen(ks: &mut Keyspace, key: &[u8]) -> CommandResult<Reply> {
    match ks.get(key) {
        Some(value) => Ok(Reply::Integer(value.as_hash()?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn hkeys(ks: &mut Keyspace, key: &[u8]) -> CommandResult<Reply> {
    match ks.get(key) {
        Some(value) => Ok(Reply::from_bulks(value.as_hash()?.keys().cloned())),
        None => Ok(Reply::Array(Vec::new())),
    }
}

pub fn hvals(ks: &mut Keyspace, key: &[u8]) -> CommandResult<Reply> {
    match ks.get(key) {
        Some(value) => Ok(Reply::from_bulks(value.as_hash()?.values().cloned())),
        None => Ok(Reply::Array(Vec::new())),
    }
}

/// HGETALL：field 与 value 交替排列，按 field 字节序
pub fn hgetall(ks: &mut Keyspace, key: &[u8]) -> CommandResult<Reply> {
    let Some(value) = ks.get(key) else {
        return Ok(Reply::Array(Vec::new()));
    };
    let mut out = Vec::new();
    for (f, v) in value.as_hash()? {
        out.push(Reply::Bulk(f.clone()));
        out.push(Reply::Bulk(v.clone()));
    }
    Ok(Reply::Array(out))
}

/// HINCRBY key field delta
///
/// field 不存在视为 0；原值不是整数时返回 NotAnInteger 且不修改。
pub fn hincrby(ks: &mut Keyspace, key: &[u8], field: &[u8], delta: i64) -> CommandResult<Reply> {
    let current = match ks.get(key) {
        Some(value) => match value.as_hash()?.get(field) {
            Some(raw) => parse_i64(raw)?,
            None => 0,
        },
        None => 0,
    };
    let next = current.checked_add(delta).ok_or(CommandError::Overflow)?;
    ks.get_or_insert_with(key, Value::new_hash)
        .as_hash_mut()?
        .insert(field.to_vec(), next.to_string().into_bytes());
    Ok(Reply::Integer(next))
}

/// HINCRBYFLOAT key field delta，返回新值的字符串形式
pub fn hincrbyfloat(ks: &mut Keyspace, key: &[u8], field: &[u8], delta: f64) -> CommandResult<Reply> {
    let current = match ks.get(key) {
        Some(value) => match value.as_hash()?.get(field) {
            Some(raw) => parse_f64(raw)?,
            None => 0.0,
        },
        None => 0.0,
    };
    let next = current + delta;
    if !next.is_finite() {
        return Err(CommandError::NanOrInfinity);
    }
    let formatted = format_f64(next);
    ks.get_or_insert_with(key, Value::new_hash)
        .as_hash_mut()?
        .insert(field.to_vec(), formatted.clone());
    Ok(Reply::Bulk(formatted))
}

/// HSETNX key field value：field 已存在时不写入，返回 1 / 0
pub fn hsetnx(ks: &mut Keyspace, key: &[u8], field: &[u8], value: &[u8]) -> CommandResult<Reply> {
    if let Some(existing) = ks.get(key) {
        if existing.as_hash()?.contains_key(field) {
            return Ok(Reply::Integer(0));
        }
    }
    ks.get_or_insert_with(key, Value::new_hash)
        .as_hash_mut()?
        .insert(field.to_vec(), value.to_vec());
    Ok(Reply::Integer(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    // 测试 HSET / HGET / HLEN
    #[test]
    fn test_hset_hget() -> CommandResult<()> {
        let mut ks = Keyspace::new();
        assert_eq!(hset(&mut ks, b"h", &[b("f1"), b("v1"), b("f2"), b("v2")])?, Reply::Integer(2));
        assert_eq!(hset(&mut ks, b"h", &[b("f1"), b("new")])?, Reply::Integer(0));
        assert_eq!(hget(&mut ks, b"h", b"f1")?, Reply::bulk("new"));
        assert_eq!(hget(&mut ks, b"h", b"zz")?, Reply::Nil);
        assert_eq!(hget(&mut ks, b"missing", b"f1")?, Reply::Nil);
        assert_eq!(hlen(&mut ks, b"h")?, Reply::Integer(2));
        Ok(())
    }

    // 测试 HGETALL 的顺序与 HKEYS / HVALS
    #[test]
    fn test_hgetall_ordered() -> CommandResult<()> {
        let mut ks = Keyspace::new();
        hset(&mut ks, b"h", &[b("b"), b("2"), b("a"), b("1")])?;
        assert_eq!(
            hgetall(&mut ks, b"h")?,
            Reply::from_bulks(["a", "1", "b", "2"])
        );
        assert_eq!(hkeys(&mut ks, b"h")?, Reply::from_bulks(["a", "b"]));
        assert_eq!(hvals(&mut ks, b"h")?, Reply::from_bulks(["1", "2"]));
        assert_eq!(
            hmget(&mut ks, b"h", &[b("a"), b("x")])?,
            Reply::Array(vec![Reply::bulk("1"), Reply::Nil])
        );
        Ok(())
    }

    // 删除最后一个 field 后键不存在
    #[test]
    fn test_hdel_removes_empty_hash() -> CommandResult<()> {
        let mut ks = Keyspace::new();
        hset(&mut ks, b"h", &[b("f"), b("v")])?;
        assert_eq!(hdel(&mut ks, b"h", &[b("f"), b("nope")])?, Reply::Integer(1));
        assert!(!ks.exists(b"h"));
        assert_eq!(hexists(&mut ks, b"h", b"f")?, Reply::Integer(0));
        Ok(())
    }

    #[test]
    fn test_hincrby() -> CommandResult<()> {
        let mut ks = Keyspace::new();
        assert_eq!(hincrby(&mut ks, b"h", b"n", 5)?, Reply::Integer(5));
        assert_eq!(hincrby(&mut ks, b"h", b"n", -7)?, Reply::Integer(-2));
        hset(&mut ks, b"h", &[b("s"), b("abc")])?;
        assert_eq!(hincrby(&mut ks, b"h", b"s", 1), Err(CommandError::NotAnInteger));
        assert_eq!(hget(&mut ks, b"h", b"s")?, Reply::bulk("abc"));
        Ok(())
    }

    #[test]
    fn test_hash_wrong_type() {
        let mut ks = Keyspace::new();
        ks.set(b"s", Value::String(b("x")), None);
        assert_eq!(hset(&mut ks, b"s", &[b("f"), b("v")]), Err(CommandError::WrongType));
        assert_eq!(hgetall(&mut ks, b"s"), Err(CommandError::WrongType));
        assert_eq!(ks.get(b"s"), Some(&Value::String(b("x"))));
    }

    #[test]
    fn test_hincrbyfloat() -> CommandResult<()> {
        let mut ks = Keyspace::new();
        assert_eq!(hincrbyfloat(&mut ks, b"h", b"price", 10.5)?, Reply::bulk("10.5"));
        assert_eq!(hincrbyfloat(&mut ks, b"h", b"price", 0.1)?, Reply::bulk("10.6"));
        hset(&mut ks, b"h", &[b("name"), b("widget")])?;
        assert_eq!(hincrbyfloat(&mut ks, b"h", b"name", 1.0), Err(CommandError::NotAFloat));
        assert_eq!(hget(&mut ks, b"h", b"name")?, Reply::bulk("widget"));
        Ok(())
    }

    #[test]
    fn test_hsetnx() -> CommandResult<()> {
        let mut ks = Keyspace::new();
        assert_eq!(hsetnx(&mut ks, b"h", b"f", b"first")?, Reply::Integer(1));
        assert_eq!(hsetnx(&mut ks, b"h", b"f", b"second")?, Reply::Integer(0));
        assert_eq!(hget(&mut ks, b"h", b"f")?, Reply::bulk("first"));
        ks.set(b"s", Value::String(b("x")), None);
        assert_eq!(hsetnx(&mut ks, b"s", b"f", b"v"), Err(CommandError::WrongType));
        Ok(())
    }
}
