// src/lib.rs
//! crab-storm 库：engine / types / txn / script / pubsub / expire / monitor

pub mod config;  // 配置加载
pub mod engine;  // 存储引擎 & 命令分发
pub mod error;   // 错误类型
pub mod expire;  // 过期策略
pub mod glob;    // glob 模式匹配
pub mod monitor; // 监控 & 诊断
pub mod pubsub;  // 发布订阅
pub mod script;  // 脚本解释器
pub mod txn;     // 事务支持
pub mod types;   // String / Hash / List / Set / ZSet 数据结构

pub use config::Config;
pub use engine::{Command, Engine, Reply, Session};
pub use error::{ApplicationError, CommandError, CommandResult};
pub use pubsub::PushMessage;
