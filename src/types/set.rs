// src/types/set.rs

//! # Set Type Support
//!
//! Unordered collections of unique members. Members are held in byte order so
//! `SMEMBERS` is stable between calls.
//!
//! Supported commands:
//! - `SADD`
//! - `SREM`
//! - `SMEMBERS`
//! - `SISMEMBER`
//! - `SCARD`
//! - `SINTER` / `SUNION` / `SDIFF`

use crate::engine::{Keyspace, Reply};
use std::collections::BTreeSet;

use crate::error::CommandResult;
use crate::types::Value;

/// Add members, returning how many were not already present.
pub fn sadd(ks: &mut Keyspace, key: &[u8], members: &[Vec<u8>]) -> CommandResult<Reply> {
    let set = ks.get_or_insert_with(key, Value::new_set).as_set_mut()?;
    let added = members.iter().filter(|m| set.insert((*m).clone())).count();
    Ok(Reply::Integer(added as i64))
}

/// Remove members, returning how many were present. Removing the last member
/// deletes the key.
pub fn srem(ks: &mut Keyspace, key: &[u8], members: &[Vec<u8>]) -> CommandResult<Reply> {
    let Some(value) = ks.get(key) else {
        return Ok(Reply::Integer(0));
    };
    value.as_set()?;
    let mut removed = 0;
    if let Some(value) = ks.get_mut(key) {
        let set = value.as_set_mut()?;
        removed = members.iter().filter(|m| set.remove(m.as_slice())).count();
    }
    ks.remove_if_empty(key);
    Ok(Reply::Integer(removed as i64))
}

pub fn smembers(ks: &mut Keyspace, key: &[u8]) -> CommandResult<Reply> {
    match ks.get(key) {
        Some(value) => Ok(Reply::from_bulks(value.as_set()?.iter().cloned())),
        None => Ok(Reply::Array(Vec::new())),
    }
}

pub fn sismember(ks: &mut Keyspace, key: &[u8], member: &[u8]) -> CommandResult<Reply> {
    let found = match ks.get(key) {
        Some(value) => value.as_set()?.contains(member),
        None => false,
    };
    Ok(Reply::Integer(found as i64))
}

pub fn scard(ks: &mut Keyspace, key: &[u8]) -> CommandResult<Reply> {
    match ks.get(key) {
        Some(value) => Ok(Reply::Integer(value.as_set()?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

/// How `combine` folds the sets named by a multi-key command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Inter,
    Union,
    Diff,
}

/// SINTER / SUNION / SDIFF key [key ...]. A missing key is an empty set.
/// Every key is type-checked even once the result is already empty.
pub fn combine(ks: &mut Keyspace, keys: &[Vec<u8>], op: SetOp) -> CommandResult<Reply> {
    let mut operands: Vec<BTreeSet<Vec<u8>>> = Vec::with_capacity(keys.len());
    for key in keys {
        let members = match ks.get(key) {
            Some(value) => value.as_set()?.clone(),
            None => BTreeSet::new(),
        };
        operands.push(members);
    }
    let mut iter = operands.into_iter();
    let mut acc = iter.next().unwrap_or_default();
    for other in iter {
        match op {
            SetOp::Inter => acc.retain(|m| other.contains(m)),
            SetOp::Union => acc.extend(other),
            SetOp::Diff => acc.retain(|m| !other.contains(m)),
        }
    }
    Ok(Reply::from_bulks(acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommandError;

    fn b(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    fn test_sadd_dedup() -> CommandResult<()> {
        let mut ks = Keyspace::new();
        assert_eq!(sadd(&mut ks, b"s", &[b("b"), b("a"), b("b")])?, Reply::Integer(2));
        assert_eq!(sadd(&mut ks, b"s", &[b("a")])?, Reply::Integer(0));
        assert_eq!(scard(&mut ks, b"s")?, Reply::Integer(2));
        assert_eq!(smembers(&mut ks, b"s")?, Reply::from_bulks(["a", "b"]));
        Ok(())
    }

    #[test]
    fn test_srem_and_membership() -> CommandResult<()> {
        let mut ks = Keyspace::new();
        sadd(&mut ks, b"s", &[b("x"), b("y")])?;
        assert_eq!(sismember(&mut ks, b"s", b"x")?, Reply::Integer(1));
        assert_eq!(srem(&mut ks, b"s", &[b("x"), b("q")])?, Reply::Integer(1));
        assert_eq!(sismember(&mut ks, b"s", b"x")?, Reply::Integer(0));
        assert_eq!(srem(&mut ks, b"s", &[b("y")])?, Reply::Integer(1));
        assert!(!ks.exists(b"s"));
        assert_eq!(smembers(&mut ks, b"s")?, Reply::Array(vec![]));
        Ok(())
    }

    #[test]
    fn test_set_wrong_type() {
        let mut ks = Keyspace::new();
        ks.set(b"k", Value::new_list(), None);
        assert_eq!(sadd(&mut ks, b"k", &[b("a")]), Err(CommandError::WrongType));
        assert_eq!(scard(&mut ks, b"k"), Err(CommandError::WrongType));
    }

    #[test]
    fn test_combine_sets() -> CommandResult<()> {
        let mut ks = Keyspace::new();
        sadd(&mut ks, b"a", &[b("1"), b("2"), b("3")])?;
        sadd(&mut ks, b"b", &[b("2"), b("3"), b("4")])?;
        let keys = [b("a"), b("b")];
        assert_eq!(combine(&mut ks, &keys, SetOp::Inter)?, Reply::from_bulks(["2", "3"]));
        assert_eq!(combine(&mut ks, &keys, SetOp::Union)?, Reply::from_bulks(["1", "2", "3", "4"]));
        assert_eq!(combine(&mut ks, &keys, SetOp::Diff)?, Reply::from_bulks(["1"]));

        // 不存在的 key 当作空集
        let with_missing = [b("a"), b("nope")];
        assert_eq!(combine(&mut ks, &with_missing, SetOp::Inter)?, Reply::Array(vec![]));
        assert_eq!(combine(&mut ks, &with_missing, SetOp::Diff)?, Reply::from_bulks(["1", "2", "3"]));

        ks.set(b"l", Value::new_list(), None);
        assert_eq!(
            combine(&mut ks, &[b("nope"), b("l")], SetOp::Inter),
            Err(CommandError::WrongType)
        );
        Ok(())
    }
}
