//! If-Modified-Since evaluation for conditional GET.

use std::time::{SystemTime, UNIX_EPOCH};

/// True when the client's `If-Modified-Since` timestamp matches the file's
/// modification time at second precision.
///
/// The header is accepted in the RFC 1123, RFC 850 and ANSI C asctime
/// formats, which are exactly the forms `httpdate` recognises.
pub(crate) fn not_modified(if_modified_since: Option<&str>, modified: SystemTime) -> bool {
    let Some(raw) = if_modified_since else {
        return false;
    };
    let Ok(parsed) = httpdate::parse_http_date(raw.trim()) else {
        return false;
    };
    unix_seconds(parsed) == unix_seconds(modified)
}

fn unix_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // Sun, 06 Nov 1994 08:49:37 GMT
    const STAMP_SECS: u64 = 784111777;

    fn stamp() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(STAMP_SECS)
    }

    #[test]
    fn accepts_rfc1123() {
        assert!(not_modified(Some("Sun, 06 Nov 1994 08:49:37 GMT"), stamp()));
    }

    #[test]
    fn accepts_rfc850() {
        assert!(not_modified(Some("Sunday, 06-Nov-94 08:49:37 GMT"), stamp()));
    }

    #[test]
    fn accepts_asctime() {
        assert!(not_modified(Some("Sun Nov  6 08:49:37 1994"), stamp()));
    }

    #[test]
    fn mismatched_timestamp_is_modified() {
        assert!(!not_modified(
            Some("Sun, 06 Nov 1994 08:49:38 GMT"),
            stamp()
        ));
    }

    #[test]
    fn sub_second_mtime_is_truncated() {
        let modified = stamp() + Duration::from_millis(430);
        assert!(not_modified(
            Some("Sun, 06 Nov 1994 08:49:37 GMT"),
            modified
        ));
    }

    #[test]
    fn missing_or_garbage_header_is_modified() {
        assert!(!not_modified(None, stamp()));
        assert!(!not_modified(Some("last tuesday"), stamp()));
    }
}
