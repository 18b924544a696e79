// src/engine/mod.rs

//! # 引擎模块
//!
//! `engine` 是整个存储的核心。它：
//! - 持有唯一的 `Keyspace`，由一把互斥锁保护：单条命令、一次 EXEC、一次 EVAL
//!   都在同一把锁内完成，因此彼此严格串行，中间状态不可见。
//! - 按命令表校验命令，再分发给类型子模块（`string`、`hash`、`list`、`set`、`zset`）、
//!   `keys`、`expire`、`script` 和 pub/sub broker。
//! - 写命令成功后通知 WATCH 登记表。
//!
//! 调用方通过 `Engine::session()` 拿到一个 `Session`，所有命令都经由会话执行。

pub mod command;
pub mod keys;
pub mod keyspace;
pub mod reply;
pub mod session;
pub mod watch;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

pub use command::Command;
pub use keyspace::{Keyspace, Ttl};
pub use reply::Reply;
pub use session::{Session, SessionId};
pub use watch::WatchManager;

use crate::config::Config;
use crate::error::{CommandError, CommandResult};
use crate::expire;
use crate::monitor::{Monitor, info::build_info_response};
use crate::pubsub::Broker;
use crate::script::{self, ScriptCache};
use crate::types::{hash, list, parse_f64, parse_i64, set, string, zset};

/// 引擎内所有会话共享的状态
#[derive(Debug)]
pub struct Shared {
    pub config: Config,
    pub keyspace: Mutex<Keyspace>,
    pub broker: Broker,
    pub watches: WatchManager,
    pub scripts: ScriptCache,
    pub monitor: Monitor,
    pub started_at: Instant,
    next_session_id: AtomicU64,
}

impl Shared {
    fn next_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// 引擎句柄，可廉价克隆，所有克隆共享同一份数据
#[derive(Debug, Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(Config::default())
    }
}

impl Engine {
    pub fn new(config: Config) -> Self {
        info!(
            script_max_ops = config.script_max_ops,
            script_max_bytes = config.script_max_bytes,
            pubsub_buffer = config.pubsub_buffer,
            "engine started"
        );
        let monitor = Monitor::new(&config);
        Engine {
            shared: Arc::new(Shared {
                config,
                keyspace: Mutex::new(Keyspace::new()),
                broker: Broker::new(),
                watches: WatchManager::new(),
                scripts: ScriptCache::new(),
                monitor,
                started_at: Instant::now(),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// 打开一个新会话（相当于一条客户端连接）
    pub fn session(&self) -> Session {
        let id = self.shared.next_session_id();
        Session::new(id, self.shared.clone())
    }

    /// 启动后台过期清理任务，需要在 tokio runtime 中调用
    pub fn start_expiry(&self) -> JoinHandle<()> {
        tokio::spawn(expire::start_cleaner(Arc::downgrade(&self.shared)))
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// 当前存活的 key 数量，已过期但尚未清理的不计入
    pub fn dbsize(&self) -> usize {
        self.shared.keyspace.lock().len()
    }
}

fn int_arg(cmd: &Command, idx: usize) -> CommandResult<i64> {
    parse_i64(&cmd.args[idx])
}

/// 执行非事务命令（命令分发逻辑）
///
/// 调用方必须已持有 keyspace 锁并传入 `ks`。事务中的每条命令和脚本里的
/// 每次 `call` 也都走这里。会话级命令（MULTI、SUBSCRIBE 等）不在此处理。
pub fn execute_non_txn_command(shared: &Shared, ks: &mut Keyspace, cmd: &Command) -> CommandResult<Reply> {
    let spec = cmd.validate()?;
    let a = &cmd.args;

    let result = match spec.name {
        // --- keys & server ---
        "PING" => match a.as_slice() {
            [] => Ok(Reply::Status("PONG".into())),
            [msg] => Ok(Reply::Bulk(msg.clone())),
            _ => Err(CommandError::WrongArity(cmd.display_name())),
        },
        "ECHO" => Ok(Reply::Bulk(a[0].clone())),
        "DEL" => keys::del(ks, a),
        "EXISTS" => keys::exists(ks, a),
        "TYPE" => keys::type_of(ks, &a[0]),
        "KEYS" => keys::keys(ks, &a[0]),
        "DBSIZE" => Ok(Reply::Integer(ks.len() as i64)),
        "RENAME" => keys::rename(ks, &a[0], &a[1]),
        "EXPIRE" => expire::expire(ks, &a[0], int_arg(cmd, 1)?, false),
        "PEXPIRE" => expire::expire(ks, &a[0], int_arg(cmd, 1)?, true),
        "TTL" => expire::ttl(ks, &a[0], false),
        "PTTL" => expire::ttl(ks, &a[0], true),
        "PERSIST" => expire::persist(ks, &a[0]),
        "EXPIREAT" => expire::expire_at_unix(ks, &a[0], int_arg(cmd, 1)?, false),
        "PEXPIREAT" => expire::expire_at_unix(ks, &a[0], int_arg(cmd, 1)?, true),
        "FLUSHDB" | "FLUSHALL" => keys::flush(ks, a),
        "INFO" => {
            let section = cmd.arg_str(0);
            Ok(Reply::Bulk(build_info_response(section.as_deref(), shared, ks).into_bytes()))
        }

        // --- String commands ---
        "SET" => string::set(ks, &a[0], &a[1], &a[2..]),
        "GET" => string::get(ks, &a[0]),
        "SETNX" => string::setnx(ks, &a[0], &a[1]),
        "SETEX" => string::setex(ks, &a[0], int_arg(cmd, 1)?, &a[2]),
        "GETSET" => string::getset(ks, &a[0], &a[1]),
        "GETDEL" => string::getdel(ks, &a[0]),
        "MSET" => string::mset(ks, a),
        "MGET" => string::mget(ks, a),
        // 原子增减操作
        "INCR" => string::incr_by(ks, &a[0], 1),
        "DECR" => string::decr_by(ks, &a[0], 1),
        "INCRBY" => string::incr_by(ks, &a[0], int_arg(cmd, 1)?),
        "DECRBY" => string::decr_by(ks, &a[0], int_arg(cmd, 1)?),
        "INCRBYFLOAT" => string::incr_by_float(ks, &a[0], parse_f64(&a[1])?),
        "APPEND" => string::append(ks, &a[0], &a[1]),
        "STRLEN" => string::strlen(ks, &a[0]),

        // --- Hash commands ---
        "HSET" => hash::hset(ks, &a[0], &a[1..]),
        "HGET" => hash::hget(ks, &a[0], &a[1]),
        "HMGET" => hash::hmget(ks, &a[0], &a[1..]),
        "HDEL" => hash::hdel(ks, &a[0], &a[1..]),
        "HEXISTS" => hash::hexists(ks, &a[0], &a[1]),
        "HLEN" => hash::hlen(ks, &a[0]),
        "HKEYS" => hash::hkeys(ks, &a[0]),
        "HVALS" => hash::hvals(ks, &a[0]),
        "HGETALL" => hash::hgetall(ks, &a[0]),
        "HINCRBY" => hash::hincrby(ks, &a[0], &a[1], int_arg(cmd, 2)?),
        "HINCRBYFLOAT" => hash::hincrbyfloat(ks, &a[0], &a[1], parse_f64(&a[2])?),
        "HSETNX" => hash::hsetnx(ks, &a[0], &a[1], &a[2]),

        // --- List commands ---
        "LPUSH" => list::push(ks, &a[0], &a[1..], true),
        "RPUSH" => list::push(ks, &a[0], &a[1..], false),
        "LPOP" => list::pop(ks, &a[0], true),
        "RPOP" => list::pop(ks, &a[0], false),
        "LRANGE" => list::lrange(ks, &a[0], int_arg(cmd, 1)?, int_arg(cmd, 2)?),
        "LLEN" => list::llen(ks, &a[0]),
        "LINDEX" => list::lindex(ks, &a[0], int_arg(cmd, 1)?),
        "LSET" => list::lset(ks, &a[0], int_arg(cmd, 1)?, &a[2]),
        "LREM" => list::lrem(ks, &a[0], int_arg(cmd, 1)?, &a[2]),
        "LTRIM" => list::ltrim(ks, &a[0], int_arg(cmd, 1)?, int_arg(cmd, 2)?),

        // --- Set commands ---
        "SADD" => set::sadd(ks, &a[0], &a[1..]),
        "SREM" => set::srem(ks, &a[0], &a[1..]),
        "SMEMBERS" => set::smembers(ks, &a[0]),
        "SISMEMBER" => set::sismember(ks, &a[0], &a[1]),
        "SCARD" => set::scard(ks, &a[0]),
        "SINTER" => set::combine(ks, a, set::SetOp::Inter),
        "SUNION" => set::combine(ks, a, set::SetOp::Union),
        "SDIFF" => set::combine(ks, a, set::SetOp::Diff),

        // --- Sorted set commands ---
        "ZADD" => zset::zadd(ks, &a[0], &a[1..]),
        "ZRANGE" | "ZREVRANGE" => {
            let with_scores = match &a[3..] {
                [] => false,
                [opt] if opt.eq_ignore_ascii_case(b"WITHSCORES") => true,
                _ => return Err(CommandError::Syntax),
            };
            let reverse = spec.name == "ZREVRANGE";
            zset::zrange(ks, &a[0], int_arg(cmd, 1)?, int_arg(cmd, 2)?, with_scores, reverse)
        }
        "ZSCORE" => zset::zscore(ks, &a[0], &a[1]),
        "ZRANK" => zset::zrank(ks, &a[0], &a[1], false),
        "ZREVRANK" => zset::zrank(ks, &a[0], &a[1], true),
        "ZCARD" => zset::zcard(ks, &a[0]),
        "ZREM" => zset::zrem(ks, &a[0], &a[1..]),
        "ZINCRBY" => zset::zincrby(ks, &a[0], parse_f64(&a[1])?, &a[2]),
        "ZRANGEBYSCORE" => zset::zrangebyscore(ks, &a[0], &a[1..]),
        "ZCOUNT" => zset::zcount(ks, &a[0], &a[1], &a[2]),

        // --- Scripting ---
        "EVAL" => {
            let (_, program) = shared.scripts.load(&a[0])?;
            let (keys, argv) = script::split_keys(&a[1..])?;
            script::run(shared, ks, &program, &keys, &argv)
        }
        "EVALSHA" => {
            let sha = cmd.arg_str(0).unwrap_or_default();
            let program = shared.scripts.get(&sha).ok_or(CommandError::NoScript)?;
            let (keys, argv) = script::split_keys(&a[1..])?;
            script::run(shared, ks, &program, &keys, &argv)
        }
        "SCRIPT" => script_command(shared, cmd),

        // --- Pub/Sub ---
        "PUBLISH" => Ok(Reply::Integer(shared.broker.publish(&a[0], &a[1]) as i64)),
        "PUBSUB" => pubsub_command(shared, cmd),

        // --- Admin ---
        "SLOWLOG" => slowlog_command(shared, cmd),

        // 在事务里排队的 UNWATCH：EXEC 结束时会统一清理监视
        "UNWATCH" => Ok(Reply::ok()),

        _ => Err(CommandError::NotAllowedInMulti(cmd.display_name())),
    };

    if result.is_ok() && spec.is_write() {
        match spec.name {
            "FLUSHDB" | "FLUSHALL" => shared.watches.touch_all(),
            _ => {
                shared.watches.touch(&cmd.keys(spec));
            }
        }
    }
    result
}

fn subcommand(cmd: &Command) -> String {
    cmd.arg_str(0).unwrap_or_default().to_ascii_uppercase()
}

fn script_command(shared: &Shared, cmd: &Command) -> CommandResult<Reply> {
    let a = &cmd.args;
    match subcommand(cmd).as_str() {
        "LOAD" if a.len() == 2 => {
            let (sha, _) = shared.scripts.load(&a[1])?;
            Ok(Reply::Bulk(sha.into_bytes()))
        }
        "EXISTS" if a.len() >= 2 => Ok(Reply::Array(
            a[1..]
                .iter()
                .map(|sha| {
                    let sha = String::from_utf8_lossy(sha);
                    Reply::Integer(shared.scripts.exists(&sha) as i64)
                })
                .collect(),
        )),
        "FLUSH" => {
            let n = shared.scripts.flush();
            info!(flushed = n, "script cache flushed");
            Ok(Reply::ok())
        }
        "LOAD" | "EXISTS" => Err(CommandError::WrongArity("script".into())),
        _ => Err(CommandError::Syntax),
    }
}

fn pubsub_command(shared: &Shared, cmd: &Command) -> CommandResult<Reply> {
    let a = &cmd.args;
    match subcommand(cmd).as_str() {
        "CHANNELS" if a.len() <= 2 => {
            let pattern = a.get(1).map(Vec::as_slice);
            Ok(Reply::from_bulks(shared.broker.channels(pattern)))
        }
        "NUMSUB" => {
            let mut out = Vec::with_capacity((a.len() - 1) * 2);
            for channel in &a[1..] {
                out.push(Reply::Bulk(channel.clone()));
                out.push(Reply::Integer(shared.broker.numsub(channel) as i64));
            }
            Ok(Reply::Array(out))
        }
        "NUMPAT" if a.len() == 1 => Ok(Reply::Integer(shared.broker.numpat() as i64)),
        _ => Err(CommandError::Syntax),
    }
}

fn slowlog_command(shared: &Shared, cmd: &Command) -> CommandResult<Reply> {
    let log = &shared.monitor.slow_log;
    match (subcommand(cmd).as_str(), cmd.args.len()) {
        ("GET", 1 | 2) => {
            let count = match cmd.args.get(1) {
                Some(raw) => usize::try_from(parse_i64(raw)?).map_err(|_| CommandError::NotAnInteger)?,
                None => 10,
            };
            let entries = log
                .get(count)
                .into_iter()
                .map(|e| {
                    let ts = e
                        .timestamp
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs() as i64)
                        .unwrap_or(0);
                    let mut argv = vec![Reply::bulk(e.command)];
                    argv.extend(e.args.into_iter().map(Reply::bulk));
                    Reply::Array(vec![
                        Reply::Integer(e.id as i64),
                        Reply::Integer(ts),
                        Reply::Integer(e.duration.as_micros() as i64),
                        Reply::Array(argv),
                        Reply::Integer(e.session_id as i64),
                    ])
                })
                .collect();
            Ok(Reply::Array(entries))
        }
        ("LEN", 1) => Ok(Reply::Integer(log.len() as i64)),
        ("RESET", 1) => {
            log.reset();
            Ok(Reply::ok())
        }
        _ => Err(CommandError::Syntax),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_engine() -> Engine {
        Engine::new(Config::default())
    }

    fn run(engine: &Engine, parts: &[&str]) -> CommandResult<Reply> {
        let cmd = Command::parse(parts.iter().copied())?;
        let mut ks = engine.shared.keyspace.lock();
        execute_non_txn_command(&engine.shared, &mut ks, &cmd)
    }

    #[test]
    fn test_dispatch_basic() {
        let engine = make_engine();
        assert_eq!(run(&engine, &["PING"]), Ok(Reply::Status("PONG".into())));
        assert_eq!(run(&engine, &["ping", "hi"]), Ok(Reply::bulk("hi")));
        assert_eq!(run(&engine, &["SET", "foo", "bar"]), Ok(Reply::ok()));
        assert_eq!(run(&engine, &["GET", "foo"]), Ok(Reply::bulk("bar")));
        assert_eq!(run(&engine, &["DBSIZE"]), Ok(Reply::Integer(1)));
        assert_eq!(run(&engine, &["TYPE", "foo"]), Ok(Reply::Status("string".into())));
    }

    #[test]
    fn test_malformed_rejected_before_keyspace() {
        let engine = make_engine();
        let err = run(&engine, &["FROB", "x"]).unwrap_err();
        assert!(err.is_malformed());
        let err = run(&engine, &["SET", "only-key"]).unwrap_err();
        assert_eq!(err, CommandError::WrongArity("set".into()));
        assert_eq!(engine.dbsize(), 0);
    }

    #[test]
    fn test_numeric_argument_errors() {
        let engine = make_engine();
        assert_eq!(run(&engine, &["INCRBY", "n", "x"]), Err(CommandError::NotAnInteger));
        assert_eq!(run(&engine, &["ZADD", "z", "nan", "m"]), Err(CommandError::NotAFloat));
        assert_eq!(run(&engine, &["LRANGE", "l", "0", "one"]), Err(CommandError::NotAnInteger));
        assert_eq!(run(&engine, &["ZRANGE", "z", "0", "-1", "BOGUS"]), Err(CommandError::Syntax));
    }

    #[test]
    fn test_hincrby_on_list_is_wrong_type() {
        let engine = make_engine();
        run(&engine, &["RPUSH", "l", "a", "b"]).unwrap();
        assert_eq!(run(&engine, &["HINCRBY", "l", "f", "1"]), Err(CommandError::WrongType));
        assert_eq!(run(&engine, &["LRANGE", "l", "0", "-1"]), Ok(Reply::from_bulks(["a", "b"])));
    }

    #[test]
    fn test_write_touches_watchers() {
        let engine = make_engine();
        engine.shared.watches.watch(99, &[b"k".to_vec()]);
        run(&engine, &["GET", "k"]).unwrap();
        assert!(!engine.shared.watches.is_dirty(99));
        // 失败的写命令不算修改
        run(&engine, &["SET", "k", "v", "NX", "XX"]).unwrap_err();
        assert!(!engine.shared.watches.is_dirty(99));
        run(&engine, &["SET", "k", "v"]).unwrap();
        assert!(engine.shared.watches.is_dirty(99));
    }

    #[test]
    fn test_script_subcommands() {
        let engine = make_engine();
        let Reply::Bulk(sha) = run(&engine, &["SCRIPT", "LOAD", "return ARGV[1]"]).unwrap() else {
            panic!("expected digest");
        };
        let sha = String::from_utf8(sha).unwrap();
        assert_eq!(
            run(&engine, &["SCRIPT", "EXISTS", &sha, "ffff"]),
            Ok(Reply::Array(vec![Reply::Integer(1), Reply::Integer(0)]))
        );
        assert_eq!(run(&engine, &["EVALSHA", &sha, "0", "hey"]), Ok(Reply::bulk("hey")));
        assert_eq!(run(&engine, &["SCRIPT", "FLUSH"]), Ok(Reply::ok()));
        assert_eq!(run(&engine, &["EVALSHA", &sha, "0"]), Err(CommandError::NoScript));
        assert_eq!(run(&engine, &["SCRIPT", "LOAD"]), Err(CommandError::WrongArity("script".into())));
    }

    #[test]
    fn test_info_sections() {
        let engine = make_engine();
        run(&engine, &["SET", "a", "1"]).unwrap();
        let Reply::Bulk(all) = run(&engine, &["INFO"]).unwrap() else {
            panic!("expected bulk");
        };
        let all = String::from_utf8(all).unwrap();
        assert!(all.contains("# Server"));
        assert!(all.contains("db0:keys=1,expires=0"));
        let Reply::Bulk(ks) = run(&engine, &["INFO", "keyspace"]).unwrap() else {
            panic!("expected bulk");
        };
        let ks = String::from_utf8(ks).unwrap();
        assert!(ks.starts_with("# Keyspace"));
        assert!(!ks.contains("# Server"));
    }

    #[test]
    fn test_counts_ignore_overdue_keys() {
        let engine = make_engine();
        run(&engine, &["SET", "a", "1"]).unwrap();
        run(&engine, &["SET", "b", "1", "PX", "20"]).unwrap();
        assert_eq!(run(&engine, &["DBSIZE"]), Ok(Reply::Integer(2)));
        std::thread::sleep(std::time::Duration::from_millis(40));
        assert_eq!(run(&engine, &["DBSIZE"]), Ok(Reply::Integer(1)));
        assert_eq!(engine.dbsize(), 1);
        let Reply::Bulk(ks) = run(&engine, &["INFO", "keyspace"]).unwrap() else {
            panic!("expected bulk");
        };
        assert!(String::from_utf8(ks).unwrap().contains("db0:keys=1,expires=0"));
    }
}
