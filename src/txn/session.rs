// src/txn/session.rs

use crate::engine::command::Command;
use crate::error::{CommandError, CommandResult};

/// 保存单个会话的 MULTI 队列状态
///
/// Idle --MULTI--> Queuing --EXEC--> Idle
///                         --DISCARD--> Idle
#[derive(Debug, Default)]
pub struct TxnSession {
    pub in_multi: bool,
    pub queue: Vec<Command>,
    /// 入队时有命令被拒绝（未知命令、参数个数错误），EXEC 将整体放弃
    pub aborted: bool,
}

impl TxnSession {
    pub fn new() -> Self {
        TxnSession::default()
    }

    pub fn begin(&mut self) -> CommandResult<&'static str> {
        if self.in_multi {
            Err(CommandError::NestedMulti)
        } else {
            self.in_multi = true;
            self.aborted = false;
            self.queue.clear();
            Ok("OK")
        }
    }

    pub fn enqueue(&mut self, cmd: Command) -> CommandResult<&'static str> {
        if !self.in_multi {
            Err(CommandError::ExecWithoutMulti)
        } else {
            self.queue.push(cmd);
            Ok("QUEUED")
        }
    }

    /// 标记事务已失效；仅在事务中生效
    pub fn mark_aborted(&mut self) {
        if self.in_multi {
            self.aborted = true;
        }
    }

    pub fn discard(&mut self) -> CommandResult<&'static str> {
        if !self.in_multi {
            Err(CommandError::DiscardWithoutMulti)
        } else {
            self.reset();
            Ok("OK")
        }
    }

    /// 取出执行队列并回到 Idle；已失效的事务返回 ExecAbort，队列同样被清空
    pub fn take_queue(&mut self) -> CommandResult<Vec<Command>> {
        if !self.in_multi {
            return Err(CommandError::ExecWithoutMulti);
        }
        let aborted = self.aborted;
        let queue = std::mem::take(&mut self.queue);
        self.reset();
        if aborted {
            Err(CommandError::ExecAbort)
        } else {
            Ok(queue)
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    fn reset(&mut self) {
        self.in_multi = false;
        self.aborted = false;
        self.queue.clear();
    }
}
