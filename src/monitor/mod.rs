// src/monitor/mod.rs
//! 监控与诊断模块
mod client;
pub mod info;
mod metrics;
mod slowlog;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;

use crate::config::Config;

pub use client::SessionTracker;
pub use metrics::{CommandStat, Metrics};
pub use slowlog::SlowLog;

/// 监控系统主结构
#[derive(Debug)]
pub struct Monitor {
    pub sessions: SessionTracker,
    pub slow_log: SlowLog,
    pub metrics: Metrics,
    pub enabled: bool,
}

impl Monitor {
    pub fn new(config: &Config) -> Self {
        Monitor {
            sessions: SessionTracker::new(),
            slow_log: SlowLog::new(config.slowlog_max_len, config.slowlog_threshold_ms),
            metrics: Metrics::new(),
            enabled: config.metrics_enabled,
        }
    }
}

/// 会话信息
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: u64,
    pub connect_time: Instant,
    pub last_command: String,
    pub last_command_time: Instant,
    pub subscriptions: usize,
    pub in_multi: bool,
}

/// 慢日志条目
#[derive(Debug, Clone)]
pub struct SlowLogEntry {
    pub id: u64,
    pub timestamp: SystemTime,
    pub duration: Duration,
    pub command: String,
    pub args: Vec<String>,
    pub session_id: u64,
}
