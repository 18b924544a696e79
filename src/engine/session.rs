// src/engine/session.rs

//! 会话：一条逻辑连接上的全部状态
//!
//! 每个 `Session` 拥有自己的 MULTI 队列、WATCH 列表、订阅集合和一个有界的
//! 推送收件箱。会话被 drop 时，这些状态都会从共享结构中清理掉。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::command::{Command, SESSION};
use super::{Reply, Shared, execute_non_txn_command};
use crate::error::{CommandError, CommandResult};
use crate::pubsub::{PushMessage, Subscriber};
use crate::txn::{TxnSession, exec_all};

pub type SessionId = u64;

pub struct Session {
    id: SessionId,
    shared: Arc<Shared>,
    txn: TxnSession,
    channels: BTreeSet<Vec<u8>>,
    patterns: BTreeSet<Vec<u8>>,
    tx: mpsc::Sender<PushMessage>,
    rx: mpsc::Receiver<PushMessage>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("in_multi", &self.txn.in_multi)
            .field("channels", &self.channels.len())
            .field("patterns", &self.patterns.len())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(id: SessionId, shared: Arc<Shared>) -> Self {
        let (tx, rx) = mpsc::channel(shared.config.pubsub_buffer.max(1));
        shared.monitor.metrics.session_opened();
        shared.monitor.sessions.add_session(id);
        debug!(session = id, "session opened");
        Session {
            id,
            shared,
            txn: TxnSession::new(),
            channels: BTreeSet::new(),
            patterns: BTreeSet::new(),
            tx,
            rx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn in_multi(&self) -> bool {
        self.txn.in_multi
    }

    pub fn subscription_count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }

    /// 执行一条命令并记录统计信息
    pub fn execute(&mut self, cmd: Command) -> CommandResult<Reply> {
        let start = Instant::now();
        let result = self.dispatch(&cmd);
        let elapsed = start.elapsed();

        let monitor = &self.shared.monitor;
        if monitor.enabled {
            let name = cmd.display_name();
            monitor.metrics.record_command(&name, elapsed, result.is_err());
            monitor.sessions.update_command(self.id, &name);
            monitor
                .sessions
                .update_state(self.id, self.subscription_count(), self.txn.in_multi);
            if monitor.slow_log.add_entry(&name, &cmd.args, elapsed, self.id) {
                warn!(session = self.id, command = %name, elapsed_us = elapsed.as_micros() as u64, "slow command");
            }
        }
        result
    }

    /// 便捷入口：直接传入 `["SET", "k", "v"]` 这样的分段
    pub fn execute_parts<I, A>(&mut self, parts: I) -> CommandResult<Reply>
    where
        I: IntoIterator<Item = A>,
        A: Into<Vec<u8>>,
    {
        let cmd = Command::parse(parts)?;
        self.execute(cmd)
    }

    /// 流水线：按顺序逐条执行，结果互相独立
    pub fn pipeline(&mut self, cmds: Vec<Command>) -> Vec<CommandResult<Reply>> {
        cmds.into_iter().map(|cmd| self.execute(cmd)).collect()
    }

    /// 等待下一条推送消息
    pub async fn next_message(&mut self) -> Option<PushMessage> {
        self.rx.recv().await
    }

    pub fn try_next_message(&mut self) -> Option<PushMessage> {
        self.rx.try_recv().ok()
    }

    fn dispatch(&mut self, cmd: &Command) -> CommandResult<Reply> {
        let spec = match cmd.validate() {
            Ok(spec) => spec,
            Err(e) => {
                self.txn.mark_aborted();
                return Err(e);
            }
        };

        match spec.name {
            "MULTI" => return self.txn.begin().map(|s| Reply::Status(s.into())),
            "EXEC" => return self.exec(),
            "DISCARD" => {
                let reply = self.txn.discard()?;
                self.shared.watches.unwatch(self.id);
                return Ok(Reply::Status(reply.into()));
            }
            "WATCH" => {
                if self.txn.in_multi {
                    return Err(CommandError::WatchInsideMulti);
                }
                self.shared.watches.watch(self.id, &cmd.args);
                return Ok(Reply::ok());
            }
            _ => {}
        }

        if self.txn.in_multi {
            if spec.has(SESSION) {
                self.txn.mark_aborted();
                return Err(CommandError::NotAllowedInMulti(cmd.display_name()));
            }
            let reply = self.txn.enqueue(cmd.clone())?;
            return Ok(Reply::Status(reply.into()));
        }

        match spec.name {
            "UNWATCH" => {
                self.shared.watches.unwatch(self.id);
                Ok(Reply::ok())
            }
            "SUBSCRIBE" => Ok(self.subscribe(&cmd.args, false)),
            "PSUBSCRIBE" => Ok(self.subscribe(&cmd.args, true)),
            "UNSUBSCRIBE" => Ok(self.unsubscribe(&cmd.args, false)),
            "PUNSUBSCRIBE" => Ok(self.unsubscribe(&cmd.args, true)),
            "CLIENT" => self.client(cmd),
            _ => {
                let mut ks = self.shared.keyspace.lock();
                execute_non_txn_command(&self.shared, &mut ks, cmd)
            }
        }
    }

    fn exec(&mut self) -> CommandResult<Reply> {
        if !self.txn.in_multi {
            // 没有事务可执行，WATCH 保持不变
            return Err(CommandError::ExecWithoutMulti);
        }
        let queue = self.txn.take_queue();
        let result = queue.map(|cmds| {
            let mut ks = self.shared.keyspace.lock();
            // 在 keyspace 锁内检查，保证检查与执行之间没有其他写入
            if self.shared.watches.is_dirty(self.id) {
                debug!(session = self.id, "watched key modified, EXEC aborted");
                Reply::Nil
            } else {
                Reply::Array(exec_all(&self.shared, &mut ks, &cmds))
            }
        });
        self.shared.watches.unwatch(self.id);
        result
    }

    fn subscribe(&mut self, targets: &[Vec<u8>], pattern: bool) -> Reply {
        let kind = if pattern { "psubscribe" } else { "subscribe" };
        let sub = Subscriber::new(self.id, self.tx.clone());
        let mut out = Vec::with_capacity(targets.len());
        for target in targets {
            if pattern {
                self.shared.broker.psubscribe(target, &sub);
                self.patterns.insert(target.clone());
            } else {
                self.shared.broker.subscribe(target, &sub);
                self.channels.insert(target.clone());
            }
            out.push(self.subscription_reply(kind, Some(target.clone())));
        }
        debug!(session = self.id, kind, count = targets.len(), "subscribed");
        Reply::Array(out)
    }

    fn unsubscribe(&mut self, targets: &[Vec<u8>], pattern: bool) -> Reply {
        let kind = if pattern { "punsubscribe" } else { "unsubscribe" };
        // 不带参数时退订全部
        let targets: Vec<Vec<u8>> = if targets.is_empty() {
            let all = if pattern { &self.patterns } else { &self.channels };
            all.iter().cloned().collect()
        } else {
            targets.to_vec()
        };
        if targets.is_empty() {
            return Reply::Array(vec![self.subscription_reply(kind, None)]);
        }

        let mut out = Vec::with_capacity(targets.len());
        for target in targets {
            if pattern {
                self.shared.broker.punsubscribe(&target, self.id);
                self.patterns.remove(&target);
            } else {
                self.shared.broker.unsubscribe(&target, self.id);
                self.channels.remove(&target);
            }
            out.push(self.subscription_reply(kind, Some(target)));
        }
        Reply::Array(out)
    }

    fn subscription_reply(&self, kind: &str, target: Option<Vec<u8>>) -> Reply {
        Reply::Array(vec![
            Reply::bulk(kind),
            target.map(Reply::Bulk).unwrap_or(Reply::Nil),
            Reply::Integer(self.subscription_count() as i64),
        ])
    }

    fn client(&self, cmd: &Command) -> CommandResult<Reply> {
        let sub = cmd.arg_str(0).unwrap_or_default().to_ascii_uppercase();
        match (sub.as_str(), cmd.args.len()) {
            ("ID", 1) => Ok(Reply::Integer(self.id as i64)),
            ("LIST", 1) => Ok(Reply::Bulk(self.shared.monitor.sessions.list_sessions().into_bytes())),
            _ => Err(CommandError::Syntax),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared
            .broker
            .remove_subscriber(self.id, &self.channels, &self.patterns);
        self.shared.watches.unwatch(self.id);
        self.shared.monitor.metrics.session_closed();
        self.shared.monitor.sessions.remove_session(self.id);
        debug!(session = self.id, queued = self.txn.queued_len(), "session closed");
    }
}
