// Utility helpers for parsing and formatting.
//
// All the forgiving cell handling lives here so the loader and the
// summarizers can assume typed values.
use chrono::{Datelike, NaiveDateTime};
use num_format::{Locale, ToFormattedString};

/// Timestamp layout used by both date columns of the export.
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Parse a `DD/MM/YYYY HH:MM` cell.
///
/// Blank or malformed values yield `None`; callers count them but never fail.
pub fn parse_timestamp_safe(s: Option<&str>) -> Option<NaiveDateTime> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok()
}

/// Parse an order count cell.
///
/// - `Ok(None)` for a blank cell (a missing value, not zero).
/// - `Err(raw)` for anything that is not a non-negative integer.
/// - A trailing `.0` is accepted since spreadsheet exports often write
///   integer columns as floats.
pub fn parse_count(s: Option<&str>) -> Result<Option<u32>, String> {
    let Some(raw) = s else { return Ok(None) };
    let s = raw.trim();
    if s.is_empty() {
        return Ok(None);
    }
    let digits = s.strip_suffix(".0").unwrap_or(s);
    digits.parse::<u32>().map(Some).map_err(|_| raw.to_string())
}

/// Drop a leading UTF-8 byte-order mark if present.
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// `(year, month)` bucket of a timestamp.
pub fn month_of(ts: &NaiveDateTime) -> (i32, u32) {
    (ts.year(), ts.month())
}

pub fn month_key((year, month): (i32, u32)) -> String {
    format!("{:04}-{:02}", year, month)
}

pub fn format_percent(n: f64, decimals: usize) -> String {
    if !n.is_finite() {
        return format!("{:.*}", decimals, 0.0);
    }
    format!("{:.*}", decimals, n)
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Counts in console output are printed with thousands separators,
    // e.g. `9,855 customers`.
    n.to_formatted_string(&Locale::en)
}
