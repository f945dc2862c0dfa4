use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Greylist entry tracking one (IP, sender, recipient) triplet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreylistEntry {
    pub client_ip: String,
    pub sender: String,
    pub recipient: String,
    /// First time this triplet was seen (restarts after expiry)
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub attempts: u32,
}

impl GreylistEntry {
    pub fn new(client_ip: String, sender: String, recipient: String) -> Self {
        let now = Utc::now();
        GreylistEntry {
            client_ip,
            sender,
            recipient,
            first_seen: now,
            last_seen: now,
            attempts: 1,
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.client_ip, self.sender, self.recipient)
    }

    fn age_secs(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.first_seen)
            .num_seconds()
    }

    /// The triplet has waited out the minimum delay
    pub fn past_delay(&self, delay_secs: i64) -> bool {
        self.age_secs() >= delay_secs
    }

    /// The triplet is older than the expiry ceiling and must start over
    pub fn expired(&self, expiry_secs: i64) -> bool {
        self.age_secs() >= expiry_secs
    }
}

/// Outcome of a greylist evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreylistVerdict {
    Accept,
    TemporaryReject,
}
