//! Single seam for reading the wall clock.
//!
//! Everything in quarry that needs "now" goes through this crate, so tests
//! can pin the clock with the `enable_faketime` feature.

use std::time::{SystemTime, UNIX_EPOCH};

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

#[cfg(feature = "enable_faketime")]
pub mod faketime;

fn system_time_as_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock is before unix epoch")
        .as_millis() as u64
}

/// Milliseconds since the unix epoch.
#[cfg(not(feature = "enable_faketime"))]
pub fn unix_time_as_millis() -> u64 {
    system_time_as_millis()
}

/// Milliseconds since the unix epoch, honoring a pinned faketime.
#[cfg(feature = "enable_faketime")]
pub fn unix_time_as_millis() -> u64 {
    faketime::unix_time_as_millis()
}

/// RFC3339 UTC representation of a unix-millis timestamp.
pub fn rfc3339_from_millis(millis: u64) -> String {
    let nanos = (millis as i128) * 1_000_000;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// UTC calendar date (`YYYY-MM-DD`) of a unix-millis timestamp, used as the
/// `day` partition label.
pub fn day_from_millis(millis: u64) -> String {
    let format = format_description!("[year]-[month]-[day]");
    let nanos = (millis as i128) * 1_000_000;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .format(&format)
        .unwrap_or_else(|_| String::from("1970-01-01"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_known_instant() {
        // 2024-05-06T07:08:09Z
        let millis = 1_714_979_289_000;
        assert_eq!(rfc3339_from_millis(millis), "2024-05-06T07:08:09Z");
        assert_eq!(day_from_millis(millis), "2024-05-06");
    }

    #[test]
    fn epoch_is_day_zero() {
        assert_eq!(day_from_millis(0), "1970-01-01");
    }
}
