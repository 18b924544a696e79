// src/config.rs
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use anyhow::{Context, Result};
use tracing::info;

/// 引擎的全局配置，缺省字段使用默认值
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 后台过期清理周期（毫秒）
    pub expire_sweep_interval_ms: u64,
    /// 每轮清理最多删除的 key 数
    pub expire_sweep_batch: usize,
    /// 单次脚本执行允许的最大步数
    pub script_max_ops: u64,
    /// 单次脚本执行允许复制或构造的最大字节数
    pub script_max_bytes: u64,
    /// 每个订阅者收件箱的容量，满了就丢弃
    pub pubsub_buffer: usize,
    // 监控配置
    pub metrics_enabled: bool,
    pub slowlog_threshold_ms: u64,
    pub slowlog_max_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            expire_sweep_interval_ms: 100,
            expire_sweep_batch: 200,
            script_max_ops: 100_000,
            script_max_bytes: 512 * 1024 * 1024,
            pubsub_buffer: 256,
            metrics_enabled: true,
            slowlog_threshold_ms: 10,
            slowlog_max_len: 128,
        }
    }
}

/// 从指定路径读取并反序列化 JSON 配置
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();

    // 如果配置文件不存在，创建默认配置
    if !path_ref.exists() {
        let default_cfg = Config::default();
        let default_json = serde_json::to_string_pretty(&default_cfg)?;
        fs::write(path_ref, default_json)
            .with_context(|| format!("Failed to write default config {:?}", path_ref))?;
        info!(path = ?path_ref, "config file not found, default configuration created");
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path_ref)
        .with_context(|| format!("Failed to read config file {:?}", path_ref))?;
    let cfg: Config = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse config file {:?}", path_ref))?;
    info!(path = ?path_ref, "config loaded");
    Ok(cfg)
}
