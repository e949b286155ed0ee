use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A cached value stamped with the time it was written.
///
/// Entries are never re-stamped: every `set` on a store builds a new
/// `CachedData`, so `cached_at` always reflects when the value was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T, cached_at: DateTime<Utc>) -> Self {
        Self { data, cached_at }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.cached_at
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        self.age(now).num_minutes()
    }

    /// Fresh while `now - cached_at < ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) < ttl
    }

    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age_minutes(now);
        if minutes < 1 {
            // Includes clock skew (negative ages)
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            let remaining_mins = minutes % 60;
            if remaining_mins >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            let remaining_hours = (minutes % 1440) / 60;
            if remaining_hours >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_data_age_display_just_now() {
        let now = Utc::now();
        let cached = CachedData::new(vec![1, 2, 3], now);
        assert_eq!(cached.age_display(now), "just now");
        assert_eq!(cached.age_display(now - Duration::minutes(5)), "just now");
    }

    #[test]
    fn test_cached_data_age_display_rounding() {
        let now = Utc::now();
        let cached = CachedData::new((), now);
        assert_eq!(cached.age_display(now + Duration::minutes(5)), "5m ago");
        assert_eq!(cached.age_display(now + Duration::minutes(90)), "2h ago");
        assert_eq!(cached.age_display(now + Duration::minutes(70)), "1h ago");
        assert_eq!(cached.age_display(now + Duration::hours(36)), "2d ago");
    }

    #[test]
    fn test_cached_data_freshness_boundary() {
        let now = Utc::now();
        let cached = CachedData::new(1, now);
        let ttl = Duration::minutes(5);
        assert!(cached.is_fresh(ttl, now + Duration::minutes(5) - Duration::milliseconds(1)));
        // Exactly at the TTL the value is already expired
        assert!(!cached.is_fresh(ttl, now + ttl));
    }
}
