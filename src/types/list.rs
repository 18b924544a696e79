// src/types/list.rs

//! # List Type Support
//!
//! Lists are double-ended queues of byte strings.
//!
//! Supported commands:
//! - `LPUSH` / `RPUSH`
//! - `LPOP` / `RPOP`
//! - `LRANGE`
//! - `LLEN`
//! - `LINDEX`
//! - `LSET`
//! - `LREM`
//! - `LTRIM`
//!
//! Popping the last element removes the key.

use crate::engine::{Keyspace, Reply};
use crate::error::{CommandError, CommandResult};
use crate::types::{Value, normalize_range};

/// Push `values` to the head (`left`) or the tail of the list.
///
/// `LPUSH k a b c` leaves the list as `c b a`, same as pushing one at a time.
///
/// # Returns
/// The length of the list after the push.
pub fn push(ks: &mut Keyspace, key: &[u8], values: &[Vec<u8>], left: bool) -> CommandResult<Reply> {
    let list = ks.get_or_insert_with(key, Value::new_list).as_list_mut()?;
    for v in values {
        if left {
            list.push_front(v.clone());
        } else {
            list.push_back(v.clone());
        }
    }
    Ok(Reply::Integer(list.len() as i64))
}

/// Pop one element from the head (`left`) or tail. `Nil` when the key is absent.
pub fn pop(ks: &mut Keyspace, key: &[u8], left: bool) -> CommandResult<Reply> {
    let Some(value) = ks.get(key) else {
        return Ok(Reply::Nil);
    };
    value.as_list()?;
    let mut popped = None;
    if let Some(value) = ks.get_mut(key) {
        let list = value.as_list_mut()?;
        popped = if left { list.pop_front() } else { list.pop_back() };
    }
    ks.remove_if_empty(key);
    Ok(popped.map(Reply::Bulk).unwrap_or(Reply::Nil))
}

/// Return the elements in `[start, stop]`, both inclusive. Negative indices
/// count from the tail (`-1` is the last element).
pub fn lrange(ks: &mut Keyspace, key: &[u8], start: i64, stop: i64) -> CommandResult<Reply> {
    let Some(value) = ks.get(key) else {
        return Ok(Reply::Array(Vec::new()));
    };
    let list = value.as_list()?;
    let Some((s, e)) = normalize_range(start, stop, list.len()) else {
        return Ok(Reply::Array(Vec::new()));
    };
    Ok(Reply::from_bulks(list.range(s..=e).cloned()))
}

pub fn llen(ks: &mut Keyspace, key: &[u8]) -> CommandResult<Reply> {
    match ks.get(key) {
        Some(value) => Ok(Reply::Integer(value.as_list()?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn lindex(ks: &mut Keyspace, key: &[u8], index: i64) -> CommandResult<Reply> {
    let Some(value) = ks.get(key) else {
        return Ok(Reply::Nil);
    };
    let list = value.as_list()?;
    let len = list.len() as i64;
    let idx = if index < 0 { len + index } else { index };
    if idx < 0 || idx >= len {
        return Ok(Reply::Nil);
    }
    Ok(list
        .get(idx as usize)
        .map(|v| Reply::Bulk(v.clone()))
        .unwrap_or(Reply::Nil))
}

/// Overwrite the element at `index`. The key must exist and the index must
/// fall inside the list.
pub fn lset(ks: &mut Keyspace, key: &[u8], index: i64, value: &[u8]) -> CommandResult<Reply> {
    let Some(current) = ks.get(key) else {
        return Err(CommandError::NoSuchKey);
    };
    let len = current.as_list()?.len() as i64;
    let idx = if index < 0 { len + index } else { index };
    if idx < 0 || idx >= len {
        return Err(CommandError::IndexOutOfRange);
    }
    if let Some(current) = ks.get_mut(key) {
        current.as_list_mut()?[idx as usize] = value.to_vec();
    }
    Ok(Reply::ok())
}

/// Remove occurrences of `value`: the first `count` from the head when
/// `count > 0`, from the tail when `count < 0`, every one when `count == 0`.
pub fn lrem(ks: &mut Keyspace, key: &[u8], count: i64, value: &[u8]) -> CommandResult<Reply> {
    let Some(current) = ks.get(key) else {
        return Ok(Reply::Integer(0));
    };
    current.as_list()?;
    let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
    let mut removed = 0;
    if let Some(current) = ks.get_mut(key) {
        let list = current.as_list_mut()?;
        if count >= 0 {
            list.retain(|v| {
                if removed < limit && v == value {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        } else {
            let mut i = list.len();
            while i > 0 && removed < limit {
                i -= 1;
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                }
            }
        }
    }
    ks.remove_if_empty(key);
    Ok(Reply::Integer(removed as i64))
}

/// Keep only `[start, stop]`. A range that selects nothing deletes the key.
pub fn ltrim(ks: &mut Keyspace, key: &[u8], start: i64, stop: i64) -> CommandResult<Reply> {
    let Some(current) = ks.get(key) else {
        return Ok(Reply::ok());
    };
    let range = normalize_range(start, stop, current.as_list()?.len());
    if let Some(current) = ks.get_mut(key) {
        let list = current.as_list_mut()?;
        match range {
            Some((s, e)) => {
                list.truncate(e + 1);
                list.drain(..s);
            }
            None => list.clear(),
        }
    }
    ks.remove_if_empty(key);
    Ok(Reply::ok())
}
