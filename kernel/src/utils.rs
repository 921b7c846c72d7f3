//! Various utility functions/macros used throughout the kernel
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{Error, PitrResult};

/// convenient way to return an error if a condition isn't true
macro_rules! require {
    ( $cond:expr, $err:expr ) => {
        if !($cond) {
            return Err($err);
        }
    };
}

pub(crate) use require;

/// Nanoseconds since the Unix epoch. Instants outside roughly 1677..2262 are not representable.
pub(crate) fn timestamp_nanos(at: DateTime<Utc>) -> PitrResult<i64> {
    at.timestamp_nanos_opt().ok_or_else(|| {
        Error::InvalidTimeWindow(format!("{at} cannot be represented with nanosecond precision"))
    })
}

pub(crate) fn from_timestamp_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

/// Whole nanoseconds in `duration`, saturating at `i64::MAX`.
pub(crate) fn duration_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Format a duration the way protobuf's JSON mapping expects it, e.g. `"1.500000000s"`.
pub(crate) fn proto_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}.{:09}s", duration.as_secs(), duration.subsec_nanos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    #[test]
    fn test_nanos_round_trip() {
        let at = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
        let nanos = timestamp_nanos(at).unwrap();
        assert_eq!(from_timestamp_nanos(nanos), at);

        let far = Utc.with_ymd_and_hms(3000, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            timestamp_nanos(far),
            Err(Error::InvalidTimeWindow(_))
        ));
    }

    #[test]
    fn test_proto_duration() {
        assert_eq!(proto_duration(Duration::from_secs(15)), "15s");
        assert_eq!(proto_duration(Duration::from_millis(1500)), "1.500000000s");
        assert_eq!(duration_nanos(Duration::MAX), i64::MAX);
    }
}
