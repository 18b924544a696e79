// src/monitor/slowlog.rs

use super::*;
use parking_lot::Mutex;

/// Bounded log of commands that ran at or above the threshold, newest first.
#[derive(Debug)]
pub struct SlowLog {
    logs: Mutex<VecDeque<SlowLogEntry>>,
    max_entries: usize,
    slow_threshold: Duration,
    next_id: AtomicU64,
}

impl SlowLog {
    pub fn new(max_entries: usize, threshold_ms: u64) -> Self {
        SlowLog {
            logs: Mutex::new(VecDeque::with_capacity(max_entries)),
            max_entries,
            slow_threshold: Duration::from_millis(threshold_ms),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Returns `true` if the command was slow enough to be logged.
    pub fn add_entry(&self, command: &str, args: &[Vec<u8>], duration: Duration, session_id: u64) -> bool {
        if duration < self.slow_threshold || self.max_entries == 0 {
            return false;
        }
        let mut logs = self.logs.lock();
        if logs.len() >= self.max_entries {
            logs.pop_back();
        }
        logs.push_front(SlowLogEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            timestamp: SystemTime::now(),
            duration,
            command: command.to_string(),
            args: args.iter().map(|a| String::from_utf8_lossy(a).into_owned()).collect(),
            session_id,
        });
        true
    }

    /// Up to `count` entries, newest first.
    pub fn get(&self, count: usize) -> Vec<SlowLogEntry> {
        self.logs.lock().iter().take(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.logs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.lock().is_empty()
    }

    pub fn reset(&self) {
        self.logs.lock().clear();
    }
}
