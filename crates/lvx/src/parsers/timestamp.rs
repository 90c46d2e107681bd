// ai
//! 🕰️ Timestamp parsing — because every logging framework invented its own
//! way to write down "when", and all of them ship to production.
//!
//! The strategy is a polite escalation:
//! 1. the operator's configured format (they know their logs best),
//! 2. a standard list — RFC 3339, the common ISO-8601 dialects, RFC 2822,
//!    apache access-log time, bare syslog time,
//! 3. numeric epochs (seconds, millis — we guess by magnitude),
//! 4. give up gracefully: the caller falls back to ingest wall-clock.
//!
//! No parse failure here is an error. Time is fuzzy. Logs are fuzzier. 🦆

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};

use crate::events::FieldValue;

/// 📋 The standard format list, tried in order after the configured format.
///
/// Order matters only for speed, not correctness — these formats are
/// mutually exclusive enough that the first match is the right one.
const STANDARD_FORMATS: &[&str] = &[
    // ISO-8601 without zone — the "we log in UTC, trust us" dialect
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    // apache/nginx access-log time: 15/Jan/2024:10:30:00 +0000 (zoned, handled below)
];

/// 🕰️ Parse a timestamp out of a field value. `None` means "use wall-clock".
pub(crate) fn parse_field(value: &FieldValue, configured: Option<&str>) -> Option<DateTime<Utc>> {
    match value {
        FieldValue::Str(s) => parse_str(s, configured),
        // 🔢 numeric epoch — magnitude decides seconds vs millis
        FieldValue::Int(i) => parse_epoch(*i),
        FieldValue::Float(f) => {
            // -- 🧮 fractional epoch seconds (python time.time() energy)
            let secs = f.trunc() as i64;
            let nanos = (f.fract() * 1e9) as u32;
            Utc.timestamp_opt(secs, nanos).single()
        }
        _ => None,
    }
}

/// 🕰️ Parse a timestamp string: configured format first, then the standards.
pub(crate) fn parse_str(s: &str, configured: Option<&str>) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    // 1️⃣ the operator's format wins — zoned first, then naive-as-UTC
    if let Some(fmt) = configured {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    // 2️⃣ RFC 3339 — the lingua franca, tried before everything else
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // 2️⃣b the zoneless ISO-ish dialects, interpreted as UTC
    for fmt in STANDARD_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    // 2️⃣c RFC 2822 — email time, but some HTTP logs speak it too
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // 2️⃣d apache access-log time: 15/Jan/2024:10:30:00 +0000
    if let Ok(dt) = DateTime::parse_from_str(s, "%d/%b/%Y:%H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }

    // 2️⃣e bare syslog time ("Jan 15 10:30:00") — no year on the wire, so we
    // borrow the current one. Yes, this is wrong for five minutes around
    // midnight on new year's eve. Syslog chose this life, not us.
    let with_year = format!("{} {}", Utc::now().year(), s);
    if let Ok(naive) = NaiveDateTime::parse_from_str(&with_year, "%Y %b %e %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }

    // 3️⃣ numeric epoch hiding in a string
    if let Ok(i) = s.parse::<i64>() {
        return parse_epoch(i);
    }

    // 4️⃣ nothing matched — the caller falls back to now()
    None
}

/// 🔢 Interpret an integer as an epoch timestamp, guessing the unit by
/// magnitude: 13+ digits is millis, 10-ish is seconds, tiny is nonsense.
fn parse_epoch(i: i64) -> Option<DateTime<Utc>> {
    if i <= 0 {
        return None;
    }
    if i >= 100_000_000_000 {
        // -- 🕰️ millis (anything past Sat Mar 03 5138 in seconds is... unlikely)
        Utc.timestamp_millis_opt(i).single()
    } else {
        Utc.timestamp_opt(i, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_rfc3339_just_works() {
        let ts = parse_str("2024-01-15T10:30:00Z", None).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-15T10:30:00+00:00");
        // zoned variant normalizes to UTC
        let ts = parse_str("2024-01-15T12:30:00+02:00", None).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-15T10:30:00+00:00");
    }

    #[test]
    fn the_one_where_the_operator_format_goes_first() {
        let ts = parse_str("15.01.2024 10:30:00", Some("%d.%m.%Y %H:%M:%S")).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-15T10:30:00+00:00");
    }

    #[test]
    fn the_one_where_the_standard_list_catches_the_stragglers() {
        for s in [
            "2024-01-15T10:30:00.123",
            "2024-01-15 10:30:00",
            "2024/01/15 10:30:00",
            "15/Jan/2024:10:30:00 +0000",
        ] {
            let ts = parse_str(s, None).unwrap_or_else(|| panic!("failed to parse '{s}'"));
            assert_eq!(ts.date_naive().to_string(), "2024-01-15", "input '{s}'");
        }
    }

    #[test]
    fn the_one_where_epochs_get_their_unit_guessed_by_size() {
        assert_eq!(
            parse_field(&FieldValue::Int(1_705_314_600), None)
                .unwrap()
                .to_rfc3339(),
            "2024-01-15T10:30:00+00:00"
        );
        assert_eq!(
            parse_field(&FieldValue::Int(1_705_314_600_000), None)
                .unwrap()
                .to_rfc3339(),
            "2024-01-15T10:30:00+00:00"
        );
    }

    #[test]
    fn the_one_where_gibberish_yields_none_not_panic() {
        assert!(parse_str("not a time", None).is_none());
        assert!(parse_str("", None).is_none());
        assert!(parse_field(&FieldValue::Bool(true), None).is_none());
    }
}
