// src/monitor/client.rs

use super::*;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Live sessions, for `CLIENT LIST` and INFO.
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: Mutex<BTreeMap<u64, SessionInfo>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        SessionTracker::default()
    }

    pub fn add_session(&self, id: u64) {
        let now = Instant::now();
        self.sessions.lock().insert(
            id,
            SessionInfo {
                id,
                connect_time: now,
                last_command: "NULL".to_string(),
                last_command_time: now,
                subscriptions: 0,
                in_multi: false,
            },
        );
    }

    pub fn remove_session(&self, id: u64) {
        self.sessions.lock().remove(&id);
    }

    pub fn update_command(&self, id: u64, command: &str) {
        if let Some(s) = self.sessions.lock().get_mut(&id) {
            s.last_command = command.to_ascii_lowercase();
            s.last_command_time = Instant::now();
        }
    }

    pub fn update_state(&self, id: u64, subscriptions: usize, in_multi: bool) {
        if let Some(s) = self.sessions.lock().get_mut(&id) {
            s.subscriptions = subscriptions;
            s.in_multi = in_multi;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// One line per session, ordered by id.
    pub fn list_sessions(&self) -> String {
        let sessions = self.sessions.lock();
        let mut response = String::new();
        for s in sessions.values() {
            response.push_str(&format!(
                "id={} age={} idle={} sub={} multi={} cmd={}\n",
                s.id,
                s.connect_time.elapsed().as_secs(),
                s.last_command_time.elapsed().as_secs(),
                s.subscriptions,
                if s.in_multi { 1 } else { -1 },
                s.last_command
            ));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_sessions() {
        let t = SessionTracker::new();
        t.add_session(2);
        t.add_session(1);
        t.update_command(1, "GET");
        t.update_state(2, 3, true);
        let list = t.list_sessions();
        let lines: Vec<&str> = list.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("id=1 ") && lines[0].ends_with("cmd=get"));
        assert!(lines[1].contains("sub=3 multi=1"));
        t.remove_session(1);
        assert_eq!(t.len(), 1);
    }
}
