// src/monitor/metrics.rs

use super::*;

#[derive(Debug, Default)]
pub struct Metrics {
    pub connected_sessions: AtomicU64,
    pub total_sessions: AtomicU64,
    pub command_count: AtomicU64,
    pub error_count: AtomicU64,
    pub command_stats: DashMap<String, CommandStat>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommandStat {
    pub calls: u64,
    pub failed: u64,
    pub usec: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    pub fn record_command(&self, command: &str, elapsed: Duration, failed: bool) {
        self.command_count.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        let mut stat = self.command_stats.entry(command.to_ascii_lowercase()).or_default();
        stat.calls += 1;
        stat.usec += elapsed.as_micros() as u64;
        if failed {
            stat.failed += 1;
        }
    }

    pub fn session_opened(&self) {
        self.connected_sessions.fetch_add(1, Ordering::Relaxed);
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.connected_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn stat(&self, command: &str) -> Option<CommandStat> {
        self.command_stats.get(&command.to_ascii_lowercase()).map(|s| *s)
    }

    /// Stats sorted by command name.
    pub fn command_stats_sorted(&self) -> Vec<(String, CommandStat)> {
        let mut out: Vec<_> = self
            .command_stats
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_command() {
        let m = Metrics::new();
        m.record_command("GET", Duration::from_micros(5), false);
        m.record_command("get", Duration::from_micros(7), true);
        m.record_command("SET", Duration::from_micros(1), false);
        assert_eq!(m.command_count.load(Ordering::Relaxed), 3);
        assert_eq!(m.error_count.load(Ordering::Relaxed), 1);
        assert_eq!(m.stat("GET"), Some(CommandStat { calls: 2, failed: 1, usec: 12 }));
        let names: Vec<_> = m.command_stats_sorted().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["get", "set"]);
    }

    #[test]
    fn test_session_gauges() {
        let m = Metrics::new();
        m.session_opened();
        m.session_opened();
        m.session_closed();
        assert_eq!(m.connected_sessions.load(Ordering::Relaxed), 1);
        assert_eq!(m.total_sessions.load(Ordering::Relaxed), 2);
    }
}
