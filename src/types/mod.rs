// src/types/mod.rs

//! # Typed values
//!
//! A key always holds exactly one of five shapes. Every command asks for the
//! shape it needs through the `as_*` accessors, which fail with
//! `CommandError::WrongType` instead of coercing.
//!
//! Hashes and sets are kept in ordered maps so that whole-value snapshots
//! (`HGETALL`, `SMEMBERS`) come out in the same order every time.

pub mod hash;
pub mod list;
pub mod set;
pub mod string;
pub mod zset;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{CommandError, CommandResult};

pub use zset::SortedSet;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Vec<u8>),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
    Set(BTreeSet<Vec<u8>>),
    ZSet(SortedSet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    Hash,
    List,
    Set,
    ZSet,
}

impl ValueKind {
    /// Name reported by `TYPE`.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Hash => "hash",
            ValueKind::List => "list",
            ValueKind::Set => "set",
            ValueKind::ZSet => "zset",
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Hash(_) => ValueKind::Hash,
            Value::List(_) => ValueKind::List,
            Value::Set(_) => ValueKind::Set,
            Value::ZSet(_) => ValueKind::ZSet,
        }
    }

    pub fn new_hash() -> Self {
        Value::Hash(BTreeMap::new())
    }

    pub fn new_list() -> Self {
        Value::List(VecDeque::new())
    }

    pub fn new_set() -> Self {
        Value::Set(BTreeSet::new())
    }

    pub fn new_zset() -> Self {
        Value::ZSet(SortedSet::default())
    }

    /// Collections are never stored empty; the caller removes the key instead.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::String(_) => false,
            Value::Hash(h) => h.is_empty(),
            Value::List(l) => l.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::ZSet(z) => z.is_empty(),
        }
    }

    pub fn as_string(&self) -> CommandResult<&Vec<u8>> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_string_mut(&mut self) -> CommandResult<&mut Vec<u8>> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_hash(&self) -> CommandResult<&BTreeMap<Vec<u8>, Vec<u8>>> {
        match self {
            Value::Hash(h) => Ok(h),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_hash_mut(&mut self) -> CommandResult<&mut BTreeMap<Vec<u8>, Vec<u8>>> {
        match self {
            Value::Hash(h) => Ok(h),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_list(&self) -> CommandResult<&VecDeque<Vec<u8>>> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_list_mut(&mut self) -> CommandResult<&mut VecDeque<Vec<u8>>> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_set(&self) -> CommandResult<&BTreeSet<Vec<u8>>> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_set_mut(&mut self) -> CommandResult<&mut BTreeSet<Vec<u8>>> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_zset(&self) -> CommandResult<&SortedSet> {
        match self {
            Value::ZSet(z) => Ok(z),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_zset_mut(&mut self) -> CommandResult<&mut SortedSet> {
        match self {
            Value::ZSet(z) => Ok(z),
            _ => Err(CommandError::WrongType),
        }
    }
}

/// Parse a decimal `i64` the way counters are stored.
pub fn parse_i64(raw: &[u8]) -> CommandResult<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(CommandError::NotAnInteger)
}

/// Parse a score. `inf`, `+inf` and `-inf` are accepted, NaN is not.
pub fn parse_f64(raw: &[u8]) -> CommandResult<f64> {
    let s = std::str::from_utf8(raw).map_err(|_| CommandError::NotAFloat)?;
    let v = match s.to_ascii_lowercase().as_str() {
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other.parse::<f64>().map_err(|_| CommandError::NotAFloat)?,
    };
    if v.is_nan() {
        return Err(CommandError::NotAFloat);
    }
    Ok(v)
}

/// Shortest text that parses back to `v`. Very large or very small
/// magnitudes use exponent notation.
pub fn format_f64(v: f64) -> Vec<u8> {
    let abs = v.abs();
    if abs.is_finite() && (abs >= 1e17 || (abs != 0.0 && abs < 1e-5)) {
        format!("{:e}", v).into_bytes()
    } else {
        v.to_string().into_bytes()
    }
}

/// Resolve an inclusive `[start, stop]` range with negative indices counting
/// from the tail. Returns `None` when the range selects nothing.
pub fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 {
        return None;
    }
    let s = if start < 0 { (len + start).max(0) } else { start };
    let e = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if s > e || s >= len || e < 0 {
        return None;
    }
    Some((s as usize, e as usize))
}
