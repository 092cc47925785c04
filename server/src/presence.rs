use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Last time each (room, participant) pair was heard from.
pub struct Presence {
    last_seen: Mutex<HashMap<(String, String), Instant>>,
    timeout: Duration,
}

impl Presence {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_seen: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Record a heartbeat. Returns true if the participant was not being tracked.
    pub fn touch(&self, room_id: &str, participant_id: &str) -> bool {
        self.touch_at(room_id, participant_id, Instant::now())
    }

    fn touch_at(&self, room_id: &str, participant_id: &str, now: Instant) -> bool {
        self.last_seen
            .lock()
            .insert((room_id.to_string(), participant_id.to_string()), now)
            .is_none()
    }

    pub fn forget(&self, room_id: &str, participant_id: &str) {
        self.last_seen
            .lock()
            .remove(&(room_id.to_string(), participant_id.to_string()));
    }

    /// Remove and return the participants whose last heartbeat is older than the timeout,
    /// grouped by room.
    pub fn take_stale(&self, now: Instant) -> HashMap<String, Vec<String>> {
        let mut guard = self.last_seen.lock();
        let mut stale: HashMap<String, Vec<String>> = HashMap::new();
        guard.retain(|(room, participant), seen| {
            if now.duration_since(*seen) >= self.timeout {
                stale.entry(room.clone()).or_default().push(participant.clone());
                false
            } else {
                true
            }
        });
        stale
    }

    pub fn tracked(&self) -> usize {
        self.last_seen.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_after_timeout() {
        let presence = Presence::new(Duration::from_secs(30));
        let start = Instant::now();
        assert!(presence.touch_at("R", "a", start));
        assert!(presence.touch_at("R", "b", start));
        assert!(!presence.touch_at("R", "b", start + Duration::from_secs(20)));

        let stale = presence.take_stale(start + Duration::from_secs(35));
        assert_eq!(stale.get("R"), Some(&vec!["a".to_string()]));
        assert_eq!(presence.tracked(), 1);

        // a stale participant coming back is tracked again
        assert!(presence.touch_at("R", "a", start + Duration::from_secs(36)));
    }

    #[test]
    fn forget_drops_entry() {
        let presence = Presence::new(Duration::from_secs(1));
        presence.touch("R", "a");
        presence.forget("R", "a");
        assert_eq!(presence.tracked(), 0);
    }
}
