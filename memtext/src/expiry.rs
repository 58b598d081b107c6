//! Expiration time conversions.
//!
//! The wire `exptime` field is overloaded: values up to thirty days are
//! relative offsets in seconds, larger values are absolute Unix
//! timestamps, and zero means "never expires".

use std::time::{SystemTime, UNIX_EPOCH};

/// Largest exptime interpreted as a relative offset (thirty days in
/// seconds). Anything larger is an absolute Unix timestamp.
pub const RELATIVE_EXPTIME_MAX: u64 = 60 * 60 * 24 * 30;

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Convert an intended-relative expiration to its wire representation.
///
/// Offsets at or below [`RELATIVE_EXPTIME_MAX`] pass through unchanged;
/// larger offsets must be sent as absolute timestamps, `base + relative`,
/// where `base` defaults to the current Unix time.
pub fn wire_exptime(relative: u64, base: Option<u64>) -> u64 {
    if relative <= RELATIVE_EXPTIME_MAX {
        relative
    } else {
        base.unwrap_or_else(unix_now) + relative
    }
}

/// Resolve a wire exptime to an absolute expiration deadline.
///
/// `None` means the item never expires. Small values are `now`-relative,
/// large values are already absolute.
pub fn resolve_exptime(wire: u64, now: u64) -> Option<u64> {
    match wire {
        0 => None,
        v if v <= RELATIVE_EXPTIME_MAX => Some(now + v),
        v => Some(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_relative_passes_through() {
        assert_eq!(wire_exptime(100, Some(1_000_000)), 100);
        assert_eq!(wire_exptime(RELATIVE_EXPTIME_MAX, Some(1)), RELATIVE_EXPTIME_MAX);
    }

    #[test]
    fn large_relative_becomes_absolute() {
        let base = 1_700_000_000;
        let rel = RELATIVE_EXPTIME_MAX + 1;
        assert_eq!(wire_exptime(rel, Some(base)), base + rel);
    }

    #[test]
    fn large_relative_defaults_to_current_time() {
        let rel = RELATIVE_EXPTIME_MAX + 5;
        let before = unix_now();
        let wire = wire_exptime(rel, None);
        let after = unix_now();
        assert!(wire >= before + rel && wire <= after + rel);
    }

    #[test]
    fn resolve_covers_all_three_forms() {
        let now = 1_700_000_000;
        assert_eq!(resolve_exptime(0, now), None);
        assert_eq!(resolve_exptime(60, now), Some(now + 60));
        assert_eq!(resolve_exptime(1_800_000_000, now), Some(1_800_000_000));
    }
}
