use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptainContextEntry {
    pub key: String,
    pub value: String,
    pub priority: i64,
    pub max_age_hours: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaptainContextEntry {
    /// `max_age_hours == 0` means "never expire" (spec §3).
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.max_age_hours <= 0 {
            None
        } else {
            Some(self.updated_at + chrono::Duration::hours(self.max_age_hours))
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at(), Some(expiry) if now > expiry)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLogEntry {
    pub id: i64,
    pub session_id: String,
    pub entry: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_max_age_never_expires() {
        let entry = CaptainContextEntry {
            key: "k".into(),
            value: "v".into(),
            priority: 1,
            max_age_hours: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(entry.expires_at().is_none());
        assert!(!entry.is_expired(Utc::now() + chrono::Duration::days(365)));
    }
}
