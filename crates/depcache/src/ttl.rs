//! Entry lifetimes

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Time-to-live of a cache entry, in seconds from write time.
///
/// `0` never expires. Negative values are already expired: a backend may
/// reject such a write or accept it, but the entry is never readable as live.
/// A ttl too long to represent as a point in time never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ttl(Option<i64>);

impl Ttl {
    /// Never expires.
    pub const NEVER: Ttl = Ttl(Some(0));

    /// Use the cache instance's configured default.
    ///
    /// Only meaningful when passed to the façade; backends treat it as
    /// [`Ttl::NEVER`].
    pub const DEFAULT: Ttl = Ttl(None);

    /// Create a ttl from a number of seconds
    pub const fn seconds(seconds: i64) -> Self {
        Ttl(Some(seconds))
    }

    /// Create a ttl from minutes
    pub const fn minutes(minutes: i64) -> Self {
        Ttl(Some(minutes.saturating_mul(60)))
    }

    /// Create a ttl from hours
    pub const fn hours(hours: i64) -> Self {
        Ttl(Some(hours.saturating_mul(3600)))
    }

    /// Raw seconds, `0` for [`Ttl::DEFAULT`]
    pub fn as_secs(self) -> i64 {
        self.0.unwrap_or(0)
    }

    pub fn is_never(self) -> bool {
        self.0 == Some(0)
    }

    pub fn is_default(self) -> bool {
        self.0.is_none()
    }

    /// Whether an entry written now with this ttl is already dead.
    pub fn is_elapsed(self) -> bool {
        matches!(self.0, Some(seconds) if seconds < 0)
    }

    /// Resolve [`Ttl::DEFAULT`] against a configured default.
    pub fn or_default(self, default: Ttl) -> Ttl {
        if self.is_default() {
            default
        } else {
            self
        }
    }

    /// Absolute expiry for an entry written at `now`, `None` if it never expires.
    ///
    /// Elapsed ttls resolve to `now`, which readers treat as expired.
    pub fn expires_at(self, now: SystemTime) -> Option<SystemTime> {
        match self.0 {
            None | Some(0) => None,
            Some(seconds) if seconds < 0 => Some(now),
            Some(seconds) => now.checked_add(Duration::from_secs(seconds as u64)),
        }
    }

    /// Epoch expiry column value in milliseconds: `0` for no expiry.
    ///
    /// Elapsed ttls map to `1`, a moment that is always in the past.
    pub fn expire_epoch_millis(self, now: SystemTime) -> u64 {
        match self.expires_at(now) {
            None => 0,
            Some(_) if self.is_elapsed() => 1,
            Some(at) => at
                .duration_since(UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1))
                .unwrap_or(1),
        }
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Ttl::DEFAULT
    }
}

impl From<i64> for Ttl {
    fn from(seconds: i64) -> Self {
        Ttl::seconds(seconds)
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        // Sub-second durations still expire rather than becoming "never".
        let secs = duration.as_secs().max(u64::from(!duration.is_zero()));
        Ttl::seconds(secs.min(i64::MAX as u64) as i64)
    }
}

/// Whether an epoch-millisecond expiry column value is in the past.
pub fn epoch_expired(expire_at: u64, now: SystemTime) -> bool {
    if expire_at == 0 {
        return false;
    }
    let now_millis = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    expire_at <= now_millis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_has_no_expiry() {
        let now = SystemTime::now();
        assert_eq!(Ttl::NEVER.expires_at(now), None);
        assert_eq!(Ttl::NEVER.expire_epoch_millis(now), 0);
        assert!(!epoch_expired(0, now));
    }

    #[test]
    fn test_negative_ttl_is_expired() {
        let now = SystemTime::now();
        let ttl = Ttl::seconds(-5);
        assert!(ttl.is_elapsed());
        assert_eq!(ttl.expires_at(now), Some(now));
        assert!(epoch_expired(ttl.expire_epoch_millis(now), now));
    }

    #[test]
    fn test_positive_ttl() {
        let now = SystemTime::now();
        let ttl = Ttl::minutes(2);
        assert_eq!(ttl.as_secs(), 120);
        assert_eq!(ttl.expires_at(now), Some(now + Duration::from_secs(120)));
        assert!(!epoch_expired(ttl.expire_epoch_millis(now), now));
    }

    #[test]
    fn test_default_resolution() {
        assert_eq!(Ttl::DEFAULT.or_default(Ttl::hours(1)), Ttl::seconds(3600));
        assert_eq!(Ttl::seconds(5).or_default(Ttl::hours(1)), Ttl::seconds(5));
    }

    #[test]
    fn test_most_negative_ttl_is_not_the_default() {
        let ttl = Ttl::seconds(i64::MIN);
        assert!(!ttl.is_default());
        assert!(ttl.is_elapsed());
        assert_eq!(ttl.or_default(Ttl::NEVER), ttl);
        assert!(Ttl::DEFAULT.or_default(Ttl::NEVER).is_never());
    }

    #[test]
    fn test_overlong_ttl_never_expires() {
        let now = SystemTime::now();
        for ttl in [Ttl::seconds(i64::MAX), Ttl::from(Duration::MAX), Ttl::hours(i64::MAX)] {
            assert_eq!(ttl.expires_at(now), None);
            assert_eq!(ttl.expire_epoch_millis(now), 0);
        }
        assert!(!epoch_expired(Ttl::seconds(i64::MAX / 1_000_000).expire_epoch_millis(now), now));
    }

    #[test]
    fn test_from_duration() {
        assert_eq!(Ttl::from(Duration::from_secs(30)), Ttl::seconds(30));
        assert_eq!(Ttl::from(Duration::from_millis(10)), Ttl::seconds(1));
        assert_eq!(Ttl::from(Duration::ZERO), Ttl::NEVER);
    }
}
