// src/types/zset.rs

//! # Sorted Set Type Support
//!
//! A sorted set maps unique members to `f64` scores and is ordered by
//! `(score, member)` ascending, ties broken by member bytes.
//! Two indexes are kept in lockstep: `scores` answers point lookups,
//! `order` answers rank and range queries.
//!
//! Supported commands:
//! - `ZADD`
//! - `ZRANGE` / `ZREVRANGE`
//! - `ZSCORE`
//! - `ZRANK` / `ZREVRANK`
//! - `ZCARD`
//! - `ZREM`
//! - `ZINCRBY`
//! - `ZRANGEBYSCORE` / `ZCOUNT`

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::engine::{Keyspace, Reply};
use crate::error::{CommandError, CommandResult};
use crate::types::{Value, format_f64, normalize_range, parse_f64, parse_i64};

/// `f64` with a total order. NaN never gets in: `parse_f64` rejects it and
/// `ZINCRBY` refuses to produce it.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSet {
    scores: BTreeMap<Vec<u8>, f64>,
    order: BTreeSet<(Score, Vec<u8>)>,
}

impl SortedSet {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Insert or update a member. Returns `true` if the member is new.
    pub fn insert(&mut self, member: Vec<u8>, score: f64) -> bool {
        // -0.0 and 0.0 must land on the same slot of the order index
        let score = if score == 0.0 { 0.0 } else { score };
        let is_new = match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.order.remove(&(Score(old), member.clone()));
                false
            }
            None => true,
        };
        self.order.insert((Score(score), member));
        is_new
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(old) => {
                self.order.remove(&(Score(old), member.to_vec()));
                true
            }
            None => false,
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// 0-based position in ascending order.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = *self.scores.get(member)?;
        Some(self.order.range(..(Score(score), member.to_vec())).count())
    }

    pub fn rev_rank(&self, member: &[u8]) -> Option<usize> {
        self.rank(member).map(|r| self.len() - 1 - r)
    }

    /// Members in index range `[start, stop]` (negative = from the tail),
    /// ascending, or descending when `reverse` is set.
    pub fn range(&self, start: i64, stop: i64, reverse: bool) -> Vec<(&[u8], f64)> {
        let Some((s, e)) = normalize_range(start, stop, self.len()) else {
            return Vec::new();
        };
        let take = e - s + 1;
        if reverse {
            self.order.iter().rev().skip(s).take(take).map(pick).collect()
        } else {
            self.order.iter().skip(s).take(take).map(pick).collect()
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], f64)> {
        self.order.iter().map(pick)
    }

    /// Members whose score lies between `min` and `max`, ascending.
    pub fn range_by_score(&self, min: ScoreBound, max: ScoreBound) -> impl Iterator<Item = (&[u8], f64)> {
        let start = if min.value == 0.0 { 0.0 } else { min.value };
        self.order
            .range((Score(start), Vec::new())..)
            .map(pick)
            .skip_while(move |(_, s)| min.exclusive && *s <= min.value)
            .take_while(move |(_, s)| max.admits_below(*s))
    }
}

/// One end of a score interval: `1.5`, `(1.5` (exclusive), `-inf`, `+inf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBound {
    pub value: f64,
    pub exclusive: bool,
}

impl ScoreBound {
    pub fn parse(raw: &[u8]) -> CommandResult<Self> {
        let (exclusive, rest) = match raw.split_first() {
            Some((b'(', rest)) => (true, rest),
            _ => (false, raw),
        };
        let value = parse_f64(rest).map_err(|_| CommandError::BadScoreRange)?;
        Ok(ScoreBound { value, exclusive })
    }

    fn admits_below(&self, score: f64) -> bool {
        if self.exclusive { score < self.value } else { score <= self.value }
    }
}

fn pick(entry: &(Score, Vec<u8>)) -> (&[u8], f64) {
    (entry.1.as_slice(), entry.0.0)
}

#[derive(Debug, Default)]
struct ZaddFlags {
    nx: bool,
    xx: bool,
    ch: bool,
}

/// Execute ZADD:
/// `ZADD key [NX|XX] [CH] score member [score member ...]`
///
/// Every score is parsed before anything is written, so a bad score leaves
/// the set untouched.
///
/// # Returns
///
/// The number of members added, or added plus updated when `CH` is given.
pub fn zadd(ks: &mut Keyspace, key: &[u8], args: &[Vec<u8>]) -> CommandResult<Reply> {
    let mut flags = ZaddFlags::default();
    let mut idx = 0;
    while idx < args.len() {
        match args[idx].to_ascii_uppercase().as_slice() {
            b"NX" => flags.nx = true,
            b"XX" => flags.xx = true,
            b"CH" => flags.ch = true,
            _ => break,
        }
        idx += 1;
    }
    let pairs = &args[idx..];
    if pairs.is_empty() || pairs.len() % 2 != 0 || (flags.nx && flags.xx) {
        return Err(CommandError::Syntax);
    }
    let mut parsed = Vec::with_capacity(pairs.len() / 2);
    for pair in pairs.chunks(2) {
        parsed.push((parse_f64(&pair[0])?, pair[1].clone()));
    }

    if let Some(existing) = ks.get(key) {
        existing.as_zset()?;
    } else if flags.xx {
        return Ok(Reply::Integer(0));
    }

    let zset = ks.get_or_insert_with(key, Value::new_zset).as_zset_mut()?;
    let mut added = 0;
    let mut changed = 0;
    for (score, member) in parsed {
        match zset.score(&member) {
            Some(_) if flags.nx => {}
            Some(old) => {
                if old != score {
                    zset.insert(member, score);
                    changed += 1;
                }
            }
            None if flags.xx => {}
            None => {
                zset.insert(member, score);
                added += 1;
            }
        }
    }
    ks.remove_if_empty(key);
    Ok(Reply::Integer(if flags.ch { added + changed } else { added }))
}

/// Execute ZRANGE / ZREVRANGE.
///
/// With `with_scores` each member is followed by its score in the flat reply.
pub fn zrange(
    ks: &mut Keyspace,
    key: &[u8],
    start: i64,
    stop: i64,
    with_scores: bool,
    reverse: bool,
) -> CommandResult<Reply> {
    let Some(value) = ks.get(key) else {
        return Ok(Reply::Array(Vec::new()));
    };
    let zset = value.as_zset()?;
    let mut out = Vec::new();
    for (member, score) in zset.range(start, stop, reverse) {
        out.push(Reply::Bulk(member.to_vec()));
        if with_scores {
            out.push(Reply::Bulk(format_f64(score)));
        }
    }
    Ok(Reply::Array(out))
}

pub fn zscore(ks: &mut Keyspace, key: &[u8], member: &[u8]) -> CommandResult<Reply> {
    let Some(value) = ks.get(key) else {
        return Ok(Reply::Nil);
    };
    Ok(value
        .as_zset()?
        .score(member)
        .map(|s| Reply::Bulk(format_f64(s)))
        .unwrap_or(Reply::Nil))
}

pub fn zrank(ks: &mut Keyspace, key: &[u8], member: &[u8], reverse: bool) -> CommandResult<Reply> {
    let Some(value) = ks.get(key) else {
        return Ok(Reply::Nil);
    };
    let zset = value.as_zset()?;
    let rank = if reverse { zset.rev_rank(member) } else { zset.rank(member) };
    Ok(rank.map(|r| Reply::Integer(r as i64)).unwrap_or(Reply::Nil))
}

pub fn zcard(ks: &mut Keyspace, key: &[u8]) -> CommandResult<Reply> {
    match ks.get(key) {
        Some(value) => Ok(Reply::Integer(value.as_zset()?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn zrem(ks: &mut Keyspace, key: &[u8], members: &[Vec<u8>]) -> CommandResult<Reply> {
    let Some(value) = ks.get(key) else {
        return Ok(Reply::Integer(0));
    };
    value.as_zset()?;
    let mut removed = 0;
    if let Some(value) = ks.get_mut(key) {
        let zset = value.as_zset_mut()?;
        for member in members {
            if zset.remove(member) {
                removed += 1;
            }
        }
    }
    ks.remove_if_empty(key);
    Ok(Reply::Integer(removed))
}

/// Execute ZINCRBY: add `delta` to the member's score (missing member starts
/// at 0) and return the new score.
pub fn zincrby(ks: &mut Keyspace, key: &[u8], delta: f64, member: &[u8]) -> CommandResult<Reply> {
    if let Some(existing) = ks.get(key) {
        existing.as_zset()?;
    }
    let current = ks
        .get(key)
        .and_then(|v| v.as_zset().ok())
        .and_then(|z| z.score(member))
        .unwrap_or(0.0);
    let next = current + delta;
    if next.is_nan() {
        return Err(CommandError::NotAFloat);
    }
    ks.get_or_insert_with(key, Value::new_zset)
        .as_zset_mut()?
        .insert(member.to_vec(), next);
    Ok(Reply::Bulk(format_f64(next)))
}

/// Execute ZRANGEBYSCORE:
/// `ZRANGEBYSCORE key min max [WITHSCORES] [LIMIT offset count]`
///
/// A negative `count` means no limit.
pub fn zrangebyscore(ks: &mut Keyspace, key: &[u8], args: &[Vec<u8>]) -> CommandResult<Reply> {
    let [min, max, opts @ ..] = args else {
        return Err(CommandError::WrongArity("zrangebyscore".into()));
    };
    let (min, max) = (ScoreBound::parse(min)?, ScoreBound::parse(max)?);
    let mut with_scores = false;
    let mut offset = 0usize;
    let mut count = usize::MAX;
    let mut iter = opts.iter();
    while let Some(opt) = iter.next() {
        match opt.to_ascii_uppercase().as_slice() {
            b"WITHSCORES" => with_scores = true,
            b"LIMIT" => {
                let (Some(o), Some(c)) = (iter.next(), iter.next()) else {
                    return Err(CommandError::Syntax);
                };
                let (o, c) = (parse_i64(o)?, parse_i64(c)?);
                if o < 0 {
                    return Ok(Reply::Array(Vec::new()));
                }
                offset = o as usize;
                count = if c < 0 { usize::MAX } else { c as usize };
            }
            _ => return Err(CommandError::Syntax),
        }
    }

    let Some(value) = ks.get(key) else {
        return Ok(Reply::Array(Vec::new()));
    };
    let mut out = Vec::new();
    for (member, score) in value.as_zset()?.range_by_score(min, max).skip(offset).take(count) {
        out.push(Reply::Bulk(member.to_vec()));
        if with_scores {
            out.push(Reply::Bulk(format_f64(score)));
        }
    }
    Ok(Reply::Array(out))
}

/// Execute ZCOUNT: members with a score in `[min, max]`.
pub fn zcount(ks: &mut Keyspace, key: &[u8], min: &[u8], max: &[u8]) -> CommandResult<Reply> {
    let (min, max) = (ScoreBound::parse(min)?, ScoreBound::parse(max)?);
    let Some(value) = ks.get(key) else {
        return Ok(Reply::Integer(0));
    };
    let n = value.as_zset()?.range_by_score(min, max).count();
    Ok(Reply::Integer(n as i64))
}
