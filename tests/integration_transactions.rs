// tests/integration_transactions.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crab_storm::{CommandError, CommandResult, Engine, Reply, Session};

fn cmd(s: &mut Session, parts: &[&str]) -> CommandResult<Reply> {
    s.execute_parts(parts.iter().copied())
}

fn queued() -> CommandResult<Reply> {
    Ok(Reply::Status("QUEUED".into()))
}

#[test]
fn test_exec_runs_queue_in_order() {
    let engine = Engine::default();
    let mut s = engine.session();
    let mut other = engine.session();

    assert_eq!(cmd(&mut s, &["MULTI"]), Ok(Reply::ok()));
    assert_eq!(cmd(&mut s, &["SET", "a", "1"]), queued());
    assert_eq!(cmd(&mut s, &["INCRBY", "a", "9"]), queued());
    assert_eq!(cmd(&mut s, &["GET", "a"]), queued());

    // 其他会话在 EXEC 之前看不到任何变化
    assert_eq!(cmd(&mut other, &["GET", "a"]), Ok(Reply::Nil));

    assert_eq!(
        cmd(&mut s, &["EXEC"]),
        Ok(Reply::Array(vec![Reply::ok(), Reply::Integer(10), Reply::bulk("10")]))
    );
    assert_eq!(cmd(&mut other, &["GET", "a"]), Ok(Reply::bulk("10")));
}

#[test]
fn test_failed_slot_does_not_abort_siblings() {
    let engine = Engine::default();
    let mut s = engine.session();
    cmd(&mut s, &["RPUSH", "list", "x"]).unwrap();

    cmd(&mut s, &["MULTI"]).unwrap();
    cmd(&mut s, &["SET", "a", "1"]).unwrap();
    cmd(&mut s, &["INCR", "list"]).unwrap();
    cmd(&mut s, &["INCR", "a"]).unwrap();
    let Ok(Reply::Array(replies)) = cmd(&mut s, &["EXEC"]) else {
        panic!("EXEC should return an array");
    };
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0], Reply::ok());
    assert_eq!(replies[1], Reply::Error(CommandError::WrongType));
    assert_eq!(replies[2], Reply::Integer(2));
}

#[test]
fn test_state_machine_errors() {
    let engine = Engine::default();
    let mut s = engine.session();
    assert_eq!(cmd(&mut s, &["EXEC"]), Err(CommandError::ExecWithoutMulti));
    assert_eq!(cmd(&mut s, &["DISCARD"]), Err(CommandError::DiscardWithoutMulti));

    cmd(&mut s, &["MULTI"]).unwrap();
    cmd(&mut s, &["SET", "a", "1"]).unwrap();
    assert_eq!(cmd(&mut s, &["DISCARD"]), Ok(Reply::ok()));
    assert!(!s.in_multi());
    assert_eq!(cmd(&mut s, &["GET", "a"]), Ok(Reply::Nil));
}

#[test]
fn test_queue_time_error_aborts_exec() {
    let engine = Engine::default();
    let mut s = engine.session();
    cmd(&mut s, &["MULTI"]).unwrap();
    cmd(&mut s, &["SET", "a", "1"]).unwrap();
    assert_eq!(cmd(&mut s, &["SET", "b"]), Err(CommandError::WrongArity("set".into())));
    assert_eq!(cmd(&mut s, &["EXEC"]), Err(CommandError::ExecAbort));
    assert_eq!(engine.dbsize(), 0);
    // 事务状态已重置
    assert_eq!(cmd(&mut s, &["EXEC"]), Err(CommandError::ExecWithoutMulti));
}

#[test]
fn test_watch_detects_concurrent_write() {
    let engine = Engine::default();
    let mut s = engine.session();
    let mut other = engine.session();
    cmd(&mut s, &["SET", "balance", "100"]).unwrap();

    cmd(&mut s, &["WATCH", "balance"]).unwrap();
    cmd(&mut other, &["INCRBY", "balance", "5"]).unwrap();
    cmd(&mut s, &["MULTI"]).unwrap();
    cmd(&mut s, &["DECRBY", "balance", "30"]).unwrap();
    assert_eq!(cmd(&mut s, &["EXEC"]), Ok(Reply::Nil));
    assert_eq!(cmd(&mut s, &["GET", "balance"]), Ok(Reply::bulk("105")));

    // EXEC 之后监视已清除，下一次事务正常提交
    cmd(&mut s, &["MULTI"]).unwrap();
    cmd(&mut s, &["DECRBY", "balance", "30"]).unwrap();
    assert_eq!(cmd(&mut s, &["EXEC"]), Ok(Reply::Array(vec![Reply::Integer(75)])));
}

#[test]
fn test_watch_untouched_key_and_flush() {
    let engine = Engine::default();
    let mut s = engine.session();
    let mut other = engine.session();

    cmd(&mut s, &["WATCH", "k"]).unwrap();
    cmd(&mut other, &["SET", "unrelated", "1"]).unwrap();
    cmd(&mut other, &["GET", "k"]).unwrap();
    cmd(&mut s, &["MULTI"]).unwrap();
    cmd(&mut s, &["SET", "k", "mine"]).unwrap();
    assert_eq!(cmd(&mut s, &["EXEC"]), Ok(Reply::Array(vec![Reply::ok()])));

    cmd(&mut s, &["WATCH", "k"]).unwrap();
    cmd(&mut other, &["FLUSHALL"]).unwrap();
    cmd(&mut s, &["MULTI"]).unwrap();
    cmd(&mut s, &["SET", "k", "again"]).unwrap();
    assert_eq!(cmd(&mut s, &["EXEC"]), Ok(Reply::Nil));

    cmd(&mut s, &["WATCH", "k"]).unwrap();
    cmd(&mut s, &["UNWATCH"]).unwrap();
    cmd(&mut other, &["SET", "k", "theirs"]).unwrap();
    cmd(&mut s, &["MULTI"]).unwrap();
    cmd(&mut s, &["GET", "k"]).unwrap();
    assert_eq!(cmd(&mut s, &["EXEC"]), Ok(Reply::Array(vec![Reply::bulk("theirs")])));
}

#[test]
fn test_transfer_is_never_observed_half_done() {
    let engine = Engine::default();
    {
        let mut s = engine.session();
        cmd(&mut s, &["MSET", "a", "3000", "b", "0"]).unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let engine = engine.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut s = engine.session();
            let mut reads = 0u64;
            while !done.load(Ordering::Acquire) {
                let Ok(Reply::Array(vals)) = cmd(&mut s, &["MGET", "a", "b"]) else {
                    panic!("MGET should return an array");
                };
                let nums: Vec<i64> = vals
                    .iter()
                    .map(|v| match v {
                        Reply::Bulk(b) => std::str::from_utf8(b).unwrap().parse().unwrap(),
                        other => panic!("unexpected {other:?}"),
                    })
                    .collect();
                assert_eq!(nums[0] + nums[1], 3000, "observed a half-applied transfer: {nums:?}");
                assert_eq!(nums[1] % 30, 0);
                reads += 1;
            }
            reads
        })
    };

    let mut s = engine.session();
    for _ in 0..100 {
        cmd(&mut s, &["MULTI"]).unwrap();
        cmd(&mut s, &["DECRBY", "a", "30"]).unwrap();
        cmd(&mut s, &["INCRBY", "b", "30"]).unwrap();
        let Ok(Reply::Array(r)) = cmd(&mut s, &["EXEC"]) else {
            panic!("EXEC failed");
        };
        assert!(!r.iter().any(Reply::is_error));
    }
    done.store(true, Ordering::Release);
    reader.join().unwrap();

    assert_eq!(cmd(&mut s, &["GET", "a"]), Ok(Reply::bulk("0")));
    assert_eq!(cmd(&mut s, &["GET", "b"]), Ok(Reply::bulk("3000")));
}

#[test]
fn test_dropping_session_discards_queue() {
    let engine = Engine::default();
    {
        let mut s = engine.session();
        cmd(&mut s, &["MULTI"]).unwrap();
        cmd(&mut s, &["SET", "a", "1"]).unwrap();
    }
    let mut s = engine.session();
    assert_eq!(cmd(&mut s, &["GET", "a"]), Ok(Reply::Nil));
    assert!(!s.in_multi());
}
