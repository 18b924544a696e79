// tests/integration_types.rs

use crab_storm::{CommandError, CommandResult, Engine, Reply, Session};

/// 辅助：用 &str 切片执行一条命令
fn cmd(s: &mut Session, parts: &[&str]) -> CommandResult<Reply> {
    s.execute_parts(parts.iter().copied())
}

fn bulks(items: &[&str]) -> Reply {
    Reply::from_bulks(items.iter().copied())
}

#[test]
fn test_types_integration() {
    let engine = Engine::default();
    let mut s = engine.session();

    //
    // -------- String --------
    //
    assert_eq!(cmd(&mut s, &["SET", "key", "val"]), Ok(Reply::ok()), "SET 应返回 OK");
    assert_eq!(cmd(&mut s, &["GET", "key"]), Ok(Reply::bulk("val")), "GET 应返回刚设的值");
    assert_eq!(cmd(&mut s, &["DEL", "key"]), Ok(Reply::Integer(1)));
    assert_eq!(cmd(&mut s, &["GET", "key"]), Ok(Reply::Nil), "不存在的 key 返回 Nil 而不是错误");

    //
    // -------- Hash --------
    //
    assert_eq!(cmd(&mut s, &["HSET", "h", "f1", "v1"]), Ok(Reply::Integer(1)));
    assert_eq!(cmd(&mut s, &["HSET", "h", "f1", "v2"]), Ok(Reply::Integer(0)), "覆盖已有 field 返回 0");
    assert_eq!(cmd(&mut s, &["HGET", "h", "f1"]), Ok(Reply::bulk("v2")));
    assert_eq!(cmd(&mut s, &["HINCRBY", "h", "n", "5"]), Ok(Reply::Integer(5)));
    // HGETALL 按 field 排序输出
    assert_eq!(cmd(&mut s, &["HGETALL", "h"]), Ok(bulks(&["f1", "v2", "n", "5"])));
    assert_eq!(cmd(&mut s, &["HDEL", "h", "f1", "n"]), Ok(Reply::Integer(2)));
    assert_eq!(cmd(&mut s, &["EXISTS", "h"]), Ok(Reply::Integer(0)), "空 hash 应被删除");

    //
    // -------- List --------
    //
    assert_eq!(cmd(&mut s, &["RPUSH", "l", "a", "b", "c"]), Ok(Reply::Integer(3)));
    assert_eq!(cmd(&mut s, &["LPOP", "l"]), Ok(Reply::bulk("a")));
    assert_eq!(cmd(&mut s, &["RPOP", "l"]), Ok(Reply::bulk("c")));
    assert_eq!(cmd(&mut s, &["LLEN", "l"]), Ok(Reply::Integer(1)));
    assert_eq!(cmd(&mut s, &["LINDEX", "l", "-1"]), Ok(Reply::bulk("b")));

    //
    // -------- Set --------
    //
    assert_eq!(cmd(&mut s, &["SADD", "s", "x", "y", "x"]), Ok(Reply::Integer(2)));
    assert_eq!(cmd(&mut s, &["SISMEMBER", "s", "x"]), Ok(Reply::Integer(1)));
    assert_eq!(cmd(&mut s, &["SCARD", "s"]), Ok(Reply::Integer(2)));
    assert_eq!(cmd(&mut s, &["SMEMBERS", "s"]), Ok(bulks(&["x", "y"])));

    //
    // -------- ZSet --------
    //
    assert_eq!(cmd(&mut s, &["ZADD", "z", "1", "one", "2", "two"]), Ok(Reply::Integer(2)));
    assert_eq!(cmd(&mut s, &["ZSCORE", "z", "two"]), Ok(Reply::bulk("2")));
    assert_eq!(cmd(&mut s, &["ZRANK", "z", "two"]), Ok(Reply::Integer(1)));
    assert_eq!(cmd(&mut s, &["ZREVRANGE", "z", "0", "-1"]), Ok(bulks(&["two", "one"])));

    //
    // -------- TYPE --------
    //
    assert_eq!(cmd(&mut s, &["TYPE", "l"]), Ok(Reply::Status("list".into())));
    assert_eq!(cmd(&mut s, &["TYPE", "z"]), Ok(Reply::Status("zset".into())));
    assert_eq!(cmd(&mut s, &["TYPE", "nope"]), Ok(Reply::Status("none".into())));
}

#[test]
fn test_set_then_get_round_trips_every_shape() {
    let engine = Engine::default();
    let mut s = engine.session();

    cmd(&mut s, &["SET", "str", "hello world"]).unwrap();
    assert_eq!(cmd(&mut s, &["GET", "str"]), Ok(Reply::bulk("hello world")));

    cmd(&mut s, &["HSET", "hash", "a", "1", "b", "2"]).unwrap();
    assert_eq!(cmd(&mut s, &["HGETALL", "hash"]), Ok(bulks(&["a", "1", "b", "2"])));

    cmd(&mut s, &["RPUSH", "list", "p", "q"]).unwrap();
    assert_eq!(cmd(&mut s, &["LRANGE", "list", "0", "-1"]), Ok(bulks(&["p", "q"])));

    cmd(&mut s, &["SADD", "set", "m2", "m1"]).unwrap();
    assert_eq!(cmd(&mut s, &["SMEMBERS", "set"]), Ok(bulks(&["m1", "m2"])));

    cmd(&mut s, &["ZADD", "zset", "1.5", "m"]).unwrap();
    assert_eq!(
        cmd(&mut s, &["ZRANGE", "zset", "0", "-1", "WITHSCORES"]),
        Ok(bulks(&["m", "1.5"]))
    );

    // 二进制安全
    let raw = vec![0u8, 159, 146, 150, b'\n'];
    s.execute_parts([b"SET".to_vec(), b"bin".to_vec(), raw.clone()]).unwrap();
    assert_eq!(s.execute_parts([b"GET".to_vec(), b"bin".to_vec()]), Ok(Reply::Bulk(raw)));
}

#[test]
fn test_incr_n_times() {
    let engine = Engine::default();
    let mut s = engine.session();
    cmd(&mut s, &["SET", "n", "-3"]).unwrap();
    for _ in 0..10 {
        cmd(&mut s, &["INCR", "n"]).unwrap();
    }
    assert_eq!(cmd(&mut s, &["GET", "n"]), Ok(Reply::bulk("7")));

    cmd(&mut s, &["SET", "text", "abc"]).unwrap();
    assert_eq!(cmd(&mut s, &["INCR", "text"]), Err(CommandError::NotAnInteger));
    assert_eq!(cmd(&mut s, &["GET", "text"]), Ok(Reply::bulk("abc")));

    cmd(&mut s, &["SET", "max", &i64::MAX.to_string()]).unwrap();
    assert_eq!(cmd(&mut s, &["INCR", "max"]), Err(CommandError::Overflow));
    assert_eq!(cmd(&mut s, &["GET", "max"]), Ok(Reply::bulk(i64::MAX.to_string())));
}

#[test]
fn test_lpush_puts_latest_at_head() {
    let engine = Engine::default();
    let mut s = engine.session();
    cmd(&mut s, &["LPUSH", "k", "a"]).unwrap();
    cmd(&mut s, &["LPUSH", "k", "b"]).unwrap();
    assert_eq!(cmd(&mut s, &["LRANGE", "k", "0", "-1"]), Ok(bulks(&["b", "a"])));
}

#[test]
fn test_zrange_orders_by_score() {
    let engine = Engine::default();
    let mut s = engine.session();
    cmd(&mut s, &["ZADD", "k", "100", "x"]).unwrap();
    cmd(&mut s, &["ZADD", "k", "200", "y", "150", "z"]).unwrap();
    assert_eq!(cmd(&mut s, &["ZRANGE", "k", "0", "-1"]), Ok(bulks(&["x", "z", "y"])));
}

#[test]
fn test_hincrby_on_list_leaves_list_alone() {
    let engine = Engine::default();
    let mut s = engine.session();
    cmd(&mut s, &["RPUSH", "k", "1", "2", "3"]).unwrap();
    assert_eq!(cmd(&mut s, &["HINCRBY", "k", "f", "1"]), Err(CommandError::WrongType));
    assert_eq!(cmd(&mut s, &["LRANGE", "k", "0", "-1"]), Ok(bulks(&["1", "2", "3"])));
    assert_eq!(cmd(&mut s, &["GET", "k"]), Err(CommandError::WrongType));
}

#[test]
fn test_malformed_commands() {
    let engine = Engine::default();
    let mut s = engine.session();
    assert_eq!(cmd(&mut s, &["GET"]), Err(CommandError::WrongArity("get".into())));
    assert_eq!(cmd(&mut s, &["NOPE"]), Err(CommandError::UnknownCommand("nope".into())));
    assert_eq!(cmd(&mut s, &[]), Err(CommandError::EmptyCommand));
    assert_eq!(cmd(&mut s, &["MSET", "a", "1", "b"]), Err(CommandError::WrongArity("mset".into())));
    assert_eq!(engine.dbsize(), 0);
    // 错误之后引擎仍然可用
    assert_eq!(cmd(&mut s, &["PING"]), Ok(Reply::Status("PONG".into())));
}

#[test]
fn test_expiry_commands() {
    let engine = Engine::default();
    let mut s = engine.session();
    cmd(&mut s, &["SET", "k", "v", "EX", "100"]).unwrap();
    assert_eq!(cmd(&mut s, &["TTL", "k"]), Ok(Reply::Integer(100)));
    assert_eq!(cmd(&mut s, &["PERSIST", "k"]), Ok(Reply::Integer(1)));
    assert_eq!(cmd(&mut s, &["TTL", "k"]), Ok(Reply::Integer(-1)));
    assert_eq!(cmd(&mut s, &["TTL", "missing"]), Ok(Reply::Integer(-2)));

    cmd(&mut s, &["SET", "short", "v", "PX", "20"]).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(40));
    assert_eq!(cmd(&mut s, &["GET", "short"]), Ok(Reply::Nil));
    assert_eq!(cmd(&mut s, &["EXISTS", "short"]), Ok(Reply::Integer(0)));

    assert_eq!(cmd(&mut s, &["DBSIZE"]), Ok(Reply::Integer(1)));

    // 过期但还没被读到或清理的 key 不出现在 DBSIZE 和 KEYS 里
    cmd(&mut s, &["SET", "lazy", "v", "PX", "20"]).unwrap();
    assert_eq!(cmd(&mut s, &["DBSIZE"]), Ok(Reply::Integer(2)));
    std::thread::sleep(std::time::Duration::from_millis(40));
    assert_eq!(cmd(&mut s, &["DBSIZE"]), Ok(Reply::Integer(1)));
    assert_eq!(engine.dbsize(), 1);
    assert_eq!(cmd(&mut s, &["KEYS", "*"]), Ok(bulks(&["k"])));

    assert_eq!(cmd(&mut s, &["EXPIRE", "k", "0"]), Ok(Reply::Integer(1)));
    assert_eq!(cmd(&mut s, &["GET", "k"]), Ok(Reply::Nil));
    assert_eq!(
        cmd(&mut s, &["SET", "k", "v", "EX", "-1"]),
        Err(CommandError::InvalidExpireTime("set".into()))
    );
}

#[tokio::test]
async fn test_background_expiry_sweeps_keys() {
    let engine = Engine::new(crab_storm::Config {
        expire_sweep_interval_ms: 10,
        ..Default::default()
    });
    let task = engine.start_expiry();
    let mut s = engine.session();
    cmd(&mut s, &["SET", "gone", "v", "PX", "15"]).unwrap();
    cmd(&mut s, &["SET", "kept", "v"]).unwrap();
    assert_eq!(engine.dbsize(), 2);
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    // 没有任何读操作，后台任务也应清理掉过期 key
    assert_eq!(engine.dbsize(), 1);
    let Ok(Reply::Bulk(stats)) = cmd(&mut s, &["INFO", "stats"]) else {
        panic!("INFO should return a bulk string");
    };
    assert!(String::from_utf8(stats).unwrap().contains("expired_keys:1"));
    task.abort();
}

#[test]
fn test_keys_and_flush() {
    let engine = Engine::default();
    let mut s = engine.session();
    cmd(&mut s, &["MSET", "user:1", "a", "user:2", "b", "order:1", "c"]).unwrap();
    assert_eq!(cmd(&mut s, &["KEYS", "user:*"]), Ok(bulks(&["user:1", "user:2"])));
    assert_eq!(cmd(&mut s, &["KEYS", "*:[1]"]), Ok(bulks(&["order:1", "user:1"])));
    assert_eq!(
        cmd(&mut s, &["MGET", "user:1", "nope", "order:1"]),
        Ok(Reply::Array(vec![Reply::bulk("a"), Reply::Nil, Reply::bulk("c")]))
    );
    assert_eq!(cmd(&mut s, &["DBSIZE"]), Ok(Reply::Integer(3)));
    assert_eq!(cmd(&mut s, &["FLUSHDB"]), Ok(Reply::ok()));
    assert_eq!(cmd(&mut s, &["DBSIZE"]), Ok(Reply::Integer(0)));
}

#[test]
fn test_float_list_set_and_range_commands() {
    let engine = Engine::default();
    let mut s = engine.session();

    assert_eq!(cmd(&mut s, &["INCRBYFLOAT", "f", "2.5"]), Ok(Reply::bulk("2.5")));
    assert_eq!(cmd(&mut s, &["HINCRBYFLOAT", "h", "x", "0.5"]), Ok(Reply::bulk("0.5")));
    assert_eq!(cmd(&mut s, &["HSETNX", "h", "x", "9"]), Ok(Reply::Integer(0)));

    cmd(&mut s, &["RPUSH", "l", "a", "b", "a", "c", "a"]).unwrap();
    assert_eq!(cmd(&mut s, &["LREM", "l", "-1", "a"]), Ok(Reply::Integer(1)));
    assert_eq!(cmd(&mut s, &["LSET", "l", "0", "z"]), Ok(Reply::ok()));
    assert_eq!(cmd(&mut s, &["LTRIM", "l", "0", "1"]), Ok(Reply::ok()));
    assert_eq!(cmd(&mut s, &["LRANGE", "l", "0", "-1"]), Ok(bulks(&["z", "b"])));
    assert_eq!(cmd(&mut s, &["LSET", "nope", "0", "v"]), Err(CommandError::NoSuchKey));

    cmd(&mut s, &["SADD", "s1", "a", "b", "c"]).unwrap();
    cmd(&mut s, &["SADD", "s2", "b", "c", "d"]).unwrap();
    assert_eq!(cmd(&mut s, &["SINTER", "s1", "s2"]), Ok(bulks(&["b", "c"])));
    assert_eq!(cmd(&mut s, &["SUNION", "s1", "s2"]), Ok(bulks(&["a", "b", "c", "d"])));
    assert_eq!(cmd(&mut s, &["SDIFF", "s1", "s2"]), Ok(bulks(&["a"])));
    assert_eq!(cmd(&mut s, &["SINTER", "s1", "l"]), Err(CommandError::WrongType));

    cmd(&mut s, &["ZADD", "z", "1", "a", "2", "b", "3", "c"]).unwrap();
    assert_eq!(cmd(&mut s, &["ZRANGEBYSCORE", "z", "(1", "+inf"]), Ok(bulks(&["b", "c"])));
    assert_eq!(cmd(&mut s, &["ZCOUNT", "z", "-inf", "2"]), Ok(Reply::Integer(2)));

    assert_eq!(cmd(&mut s, &["RENAME", "z", "z2"]), Ok(Reply::ok()));
    assert_eq!(cmd(&mut s, &["EXISTS", "z"]), Ok(Reply::Integer(0)));
    assert_eq!(cmd(&mut s, &["RENAME", "z", "z3"]), Err(CommandError::NoSuchKey));
    assert_eq!(cmd(&mut s, &["PEXPIREAT", "z2", "1"]), Ok(Reply::Integer(1)));
    assert_eq!(cmd(&mut s, &["EXISTS", "z2"]), Ok(Reply::Integer(0)));
}
