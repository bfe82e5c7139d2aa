//! Redraw rate limiting.
//!
//! Beacons can advertise many times a second. The render loop asks a
//! [`RefreshLimiter`] before every redraw so a busy environment does not
//! flood the terminal.

use std::time::{Duration, Instant};

/// Allows at most one refresh per `interval`.
///
/// The first refresh is always allowed. A denied refresh does not move the
/// window.
#[derive(Debug)]
pub struct RefreshLimiter {
    interval: Duration,
    last_refresh: Option<Instant>,
}

impl RefreshLimiter {
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use beacon_listener::throttle::RefreshLimiter;
    ///
    /// let mut limiter = RefreshLimiter::new(Duration::from_secs(1));
    /// assert!(limiter.should_refresh());
    /// assert!(!limiter.should_refresh());
    /// ```
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_refresh: None,
        }
    }

    /// Returns `true` and restarts the window when a refresh is due.
    pub fn should_refresh(&mut self) -> bool {
        self.should_refresh_at(Instant::now())
    }

    fn should_refresh_at(&mut self, now: Instant) -> bool {
        match self.last_refresh {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_refresh = Some(now);
                true
            }
        }
    }
}

/// Duration suffixes and their length in milliseconds. "ms" must precede "m" and "s".
const UNITS: [(&str, u64); 4] = [("ms", 1), ("h", 3_600_000), ("m", 60_000), ("s", 1_000)];

/// Parse a duration from a human-readable string.
///
/// Supports the suffixes `ms`, `s`, `m` and `h`; a bare number is seconds.
///
/// # Examples
/// ```
/// use beacon_listener::throttle::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (number, millis_per_unit) = UNITS
        .iter()
        .find_map(|&(suffix, scale)| src.strip_suffix(suffix).map(|n| (n, scale)))
        .unwrap_or((src, 1_000));

    number
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(millis_per_unit))
        .map(Duration::from_millis)
        .ok_or_else(|| format!("invalid duration: {}", src))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_refresh_allowed() {
        let mut limiter = RefreshLimiter::new(Duration::from_secs(1));
        assert!(limiter.should_refresh());
    }

    #[test]
    fn test_refresh_within_interval_denied() {
        let start = Instant::now();
        let mut limiter = RefreshLimiter::new(Duration::from_millis(100));
        assert!(limiter.should_refresh_at(start));
        assert!(!limiter.should_refresh_at(start + Duration::from_millis(50)));
        assert!(limiter.should_refresh_at(start + Duration::from_millis(100)));
    }

    #[test]
    fn test_denied_refresh_does_not_move_window() {
        let start = Instant::now();
        let mut limiter = RefreshLimiter::new(Duration::from_millis(30));
        assert!(limiter.should_refresh_at(start));
        assert!(!limiter.should_refresh_at(start + Duration::from_millis(10)));
        assert!(!limiter.should_refresh_at(start + Duration::from_millis(20)));
        assert!(limiter.should_refresh_at(start + Duration::from_millis(35)));
        assert!(!limiter.should_refresh_at(start + Duration::from_millis(40)));
    }

    #[test]
    fn test_zero_interval_always_refreshes() {
        let mut limiter = RefreshLimiter::new(Duration::ZERO);
        for _ in 0..5 {
            assert!(limiter.should_refresh());
        }
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_duration_with_whitespace() {
        assert_eq!(parse_duration(" 3s ").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("3 s").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("1.5s").is_err());
    }
}
