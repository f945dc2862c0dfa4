//! Greylisting store
//!
//! Tracks (client IP, envelope sender, recipient) triplets. A triplet's
//! first sighting is temporarily rejected and recorded; once it is older
//! than the minimum delay but younger than the expiry ceiling it is
//! accepted. Past expiry the triplet is forgotten and the cycle restarts.
//! Filters abuse engines that never retry.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::types::{GreylistEntry, GreylistVerdict};

pub struct GreylistStore {
    entries: DashMap<String, GreylistEntry>,
    delay_secs: i64,
    expiry_secs: i64,
}

impl GreylistStore {
    pub fn new(delay_secs: i64, expiry_secs: i64) -> Self {
        GreylistStore {
            entries: DashMap::new(),
            delay_secs,
            expiry_secs,
        }
    }

    /// Evaluate one triplet
    ///
    /// Records the sighting either way; only a triplet first seen at least
    /// `delay_secs` ago and less than `expiry_secs` ago passes.
    pub fn evaluate(&self, ip: IpAddr, sender: &str, recipient: &str) -> GreylistVerdict {
        use dashmap::mapref::entry::Entry;

        let key = format!("{}:{}:{}", ip, sender, recipient);
        let now = chrono::Utc::now();

        match self.entries.entry(key) {
            Entry::Vacant(slot) => {
                info!(
                    "Greylisting new triplet {} -> {} from {}",
                    sender, recipient, ip
                );
                slot.insert(GreylistEntry::new(
                    ip.to_string(),
                    sender.to_string(),
                    recipient.to_string(),
                ));
                GreylistVerdict::TemporaryReject
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();

                if entry.expired(self.expiry_secs) {
                    // Past the ceiling: treat as never seen and restart the delay
                    debug!("Greylist entry expired, restarting cycle: {}", entry.key());
                    entry.first_seen = now;
                    entry.last_seen = now;
                    entry.attempts = 1;
                    return GreylistVerdict::TemporaryReject;
                }

                entry.last_seen = now;
                entry.attempts += 1;

                if entry.past_delay(self.delay_secs) {
                    GreylistVerdict::Accept
                } else {
                    GreylistVerdict::TemporaryReject
                }
            }
        }
    }

    /// Remove entries past the expiry ceiling
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        let expiry = self.expiry_secs;
        self.entries.retain(|_, entry| !entry.expired(expiry));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Greylist sweep removed {} expired triplets", removed);
        }
        removed
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Periodic sweep loop, spawned once at server startup
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep();
        }
    }

    #[cfg(test)]
    fn backdate(&self, ip: IpAddr, sender: &str, recipient: &str, secs: i64) {
        let key = format!("{}:{}:{}", ip, sender, recipient);
        if let Some(mut entry) = self.entries.get_mut(&key) {
            entry.first_seen = chrono::Utc::now() - chrono::Duration::seconds(secs);
            entry.last_seen = entry.first_seen;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn first_sighting_is_rejected_and_recorded() {
        let store = GreylistStore::new(300, 86400);

        let verdict = store.evaluate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com");
        assert_eq!(verdict, GreylistVerdict::TemporaryReject);
        assert_eq!(store.entry_count(), 1);
    }

    #[test]
    fn retry_within_delay_is_rejected_again() {
        let store = GreylistStore::new(300, 86400);

        store.evaluate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com");
        let verdict = store.evaluate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com");
        assert_eq!(verdict, GreylistVerdict::TemporaryReject);
    }

    #[test]
    fn retry_after_delay_is_accepted() {
        let store = GreylistStore::new(300, 86400);

        store.evaluate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com");
        store.backdate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com", 400);

        let verdict = store.evaluate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com");
        assert_eq!(verdict, GreylistVerdict::Accept);
    }

    #[test]
    fn expired_triplet_restarts_the_cycle() {
        let store = GreylistStore::new(300, 86400);

        store.evaluate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com");
        store.backdate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com", 90000);

        // Past expiry: back to a temporary rejection with a fresh first_seen
        let verdict = store.evaluate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com");
        assert_eq!(verdict, GreylistVerdict::TemporaryReject);

        // And the delay applies from the restart, not the original sighting
        let verdict = store.evaluate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com");
        assert_eq!(verdict, GreylistVerdict::TemporaryReject);
    }

    #[test]
    fn distinct_triplets_are_tracked_separately() {
        let store = GreylistStore::new(300, 86400);

        store.evaluate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com");
        store.backdate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com", 400);
        assert_eq!(
            store.evaluate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com"),
            GreylistVerdict::Accept
        );

        // Same sender and recipient from a different IP starts over
        assert_eq!(
            store.evaluate(ip("192.0.2.2"), "sender@example.com", "rcpt@test.com"),
            GreylistVerdict::TemporaryReject
        );
        assert_eq!(store.entry_count(), 2);
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let store = GreylistStore::new(300, 86400);

        store.evaluate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com");
        store.evaluate(ip("192.0.2.2"), "sender@example.com", "rcpt@test.com");
        store.backdate(ip("192.0.2.1"), "sender@example.com", "rcpt@test.com", 90000);

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.entry_count(), 1);
    }
}
