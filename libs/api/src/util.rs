use chrono::{DateTime, NaiveDateTime, Utc};

/// Parse a UTC timestamp.
///
/// Accepts RFC 3339 (`2026-10-18T09:10:00Z`, `...+03:00`) and times without
/// an offset (`2026-10-18T09:10:00.123`, `2026-10-18 09:10:00`), which are
/// taken as UTC (без смещения = UTC).
pub fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_offsets_and_naive_times_as_utc() {
        let expected = Utc.with_ymd_and_hms(2026, 10, 18, 9, 10, 0).unwrap();
        assert_eq!(parse_utc("2026-10-18T09:10:00Z"), Some(expected));
        assert_eq!(parse_utc("2026-10-18T12:10:00+03:00"), Some(expected));
        assert_eq!(parse_utc("2026-10-18T09:10:00"), Some(expected));
        assert_eq!(parse_utc("2026-10-18 09:10:00"), Some(expected));
        assert_eq!(parse_utc("yesterday"), None);
    }
}
