// 🔤 Normalization - canonical keys for matching people and places
//
// Roster names arrive typed by hand ("Maria  Silva", "MARIA SÍLVA"), so every
// comparison in the engine goes through these helpers:
//   name  -> uppercase, accents stripped, whitespace collapsed
//   dates -> tolerant parsing, anything unparseable becomes None

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// NAMES
// ============================================================================

/// Matching key for patient names, sector names and bed codes
///
/// ```
/// use bed_census::normalize::normalize_name;
///
/// assert_eq!(normalize_name("  Maria   Sílva "), "MARIA SILVA");
/// assert_eq!(normalize_name("joão"), "JOAO");
/// ```
pub fn normalize_name(raw: &str) -> String {
    let stripped: String = raw
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_uppercase();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// DATES
// ============================================================================

const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%d.%m.%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Spreadsheet exports sometimes carry dates as serial day numbers
/// (days since 1899-12-30)
fn spreadsheet_serial(raw: &str) -> Option<NaiveDateTime> {
    let serial: f64 = raw.parse().ok()?;
    if !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }

    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_time(NaiveTime::MIN);
    let whole_days = serial.trunc() as i64;
    let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;

    epoch
        .checked_add_signed(Duration::days(whole_days))?
        .checked_add_signed(Duration::seconds(seconds))
}

/// Parse a calendar date (birth dates). Returns None instead of failing.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }

    // A full timestamp still carries a usable date
    if let Some(datetime) = parse_datetime(raw) {
        return Some(datetime.date_naive());
    }

    None
}

/// Parse an admission timestamp. Naive values are taken as UTC.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date.and_time(NaiveTime::MIN).and_utc());
        }
    }

    spreadsheet_serial(raw).map(|naive| naive.and_utc())
}

// ============================================================================
// TESTS
// ============================================================================
