// src/txn/executor.rs

use crate::engine::command::Command;
use crate::engine::{self, Keyspace, Reply, Shared};

// 事务的执行命令
// 调用方已持有 keyspace 锁，整个队列按 FIFO 顺序执行，中间状态对外不可见
// 单条命令失败只记录在对应位置，不回滚也不跳过后续命令
pub fn exec_all(shared: &Shared, ks: &mut Keyspace, cmds: &[Command]) -> Vec<Reply> {
    cmds.iter()
        .map(|cmd| match engine::execute_non_txn_command(shared, ks, cmd) {
            Ok(reply) => reply,
            Err(e) => Reply::Error(e),
        })
        .collect()
}
