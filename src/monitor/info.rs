// src/monitor/info.rs

use super::*;
use crate::engine::{Keyspace, Shared};

const ALL_SECTIONS: &[&str] = &["server", "clients", "stats", "keyspace", "pubsub", "commandstats"];

/// `INFO [section]`：`default` / `all` / 未指定时输出全部段落
pub fn build_info_response(section: Option<&str>, shared: &Shared, ks: &Keyspace) -> String {
    let wanted = section.map(|s| s.to_ascii_lowercase());
    let sections: Vec<&str> = match wanted.as_deref() {
        None | Some("default") | Some("all") | Some("everything") => ALL_SECTIONS.to_vec(),
        Some(s) => ALL_SECTIONS.iter().copied().filter(|name| *name == s).collect(),
    };

    let metrics = &shared.monitor.metrics;
    let mut lines: Vec<String> = Vec::new();

    for sec in sections {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        match sec {
            "server" => {
                lines.push("# Server".into());
                lines.push(format!("crab_storm_version:{}", env!("CARGO_PKG_VERSION")));
                lines.push(format!("os:{}", std::env::consts::OS));
                lines.push(format!("uptime_in_seconds:{}", shared.started_at.elapsed().as_secs()));
            }
            "clients" => {
                lines.push("# Clients".into());
                lines.push(format!(
                    "connected_clients:{}",
                    metrics.connected_sessions.load(Ordering::Relaxed)
                ));
                lines.push(format!(
                    "total_connections_received:{}",
                    metrics.total_sessions.load(Ordering::Relaxed)
                ));
                lines.push(format!("watching_keys:{}", shared.watches.watched_key_count()));
            }
            "stats" => {
                lines.push("# Stats".into());
                lines.push(format!(
                    "total_commands_processed:{}",
                    metrics.command_count.load(Ordering::Relaxed)
                ));
                lines.push(format!("total_error_replies:{}", metrics.error_count.load(Ordering::Relaxed)));
                lines.push(format!("expired_keys:{}", ks.expired_count()));
                lines.push(format!("slowlog_len:{}", shared.monitor.slow_log.len()));
                lines.push(format!("cached_scripts:{}", shared.scripts.len()));
            }
            "keyspace" => {
                lines.push("# Keyspace".into());
                if !ks.is_empty() {
                    lines.push(format!("db0:keys={},expires={}", ks.len(), ks.volatile_len()));
                }
            }
            "pubsub" => {
                lines.push("# Pubsub".into());
                lines.push(format!("pubsub_channels:{}", shared.broker.channel_count()));
                lines.push(format!("pubsub_patterns:{}", shared.broker.numpat()));
                lines.push(format!("messages_delivered:{}", shared.broker.delivered_count()));
                lines.push(format!("messages_dropped:{}", shared.broker.dropped_count()));
            }
            "commandstats" => {
                lines.push("# Commandstats".into());
                for (name, stat) in metrics.command_stats_sorted() {
                    let per_call = if stat.calls == 0 { 0.0 } else { stat.usec as f64 / stat.calls as f64 };
                    lines.push(format!(
                        "cmdstat_{}:calls={},usec={},usec_per_call={:.2},failed_calls={}",
                        name, stat.calls, stat.usec, per_call, stat.failed
                    ));
                }
            }
            _ => {}
        }
    }

    let mut response = lines.join("\r\n");
    if !response.is_empty() {
        response.push_str("\r\n");
    }
    response
}
