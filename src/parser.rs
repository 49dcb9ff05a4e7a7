// 🧹 Value Parsers - raw spreadsheet cells → typed values
//
// Every parser here is total: malformed input is logged and comes back as
// None. A bad cell never aborts a row.
//
// Sentinels:
//   "-"  → null in every field
//   "*"  → redacted; kept verbatim in text/categorical fields, null in numbers

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const NULL_SENTINEL: &str = "-";
pub const REDACTED_SENTINEL: &str = "*";

/// Serial range accepted as spreadsheet dates (1900-01-01 .. 2099-12-31)
const SERIAL_MIN: f64 = 1.0;
const SERIAL_MAX: f64 = 73050.0;

// ============================================================================
// CELL VALUE
// ============================================================================

/// A single raw cell as read from an extract (spreadsheet, CSV or staging).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
}

impl CellValue {
    /// Build from text, mapping blank strings to Empty
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value)
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    /// Canonical textual form.
    ///
    /// Staging stores every column as text, so each parser below must give the
    /// same answer for a typed cell and for its canonical text.
    pub fn to_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) => {
                if s.trim().is_empty() {
                    None
                } else {
                    Some(s.clone())
                }
            }
            CellValue::Number(n) => {
                if n.is_nan() {
                    None
                } else {
                    Some(format_number(*n))
                }
            }
            CellValue::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
            CellValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }

    /// Trimmed text, or None when blank
    fn trimmed(&self) -> Option<String> {
        self.to_text()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Render a number without a trailing ".0" and without exponent notation
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e18 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// ============================================================================
// DATES
// ============================================================================

/// Date-only formats, tried in order: ISO, UK day-first, US month-first,
/// long-form month names, two-digit years.
const DATE_FORMATS: &[&str] = &[
    // ISO
    "%Y-%m-%d",
    "%Y/%m/%d",
    // UK (day first)
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    // US (month first)
    "%m/%d/%Y",
    "%m-%d-%Y",
    // Long form
    "%d %m %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

const SHORT_YEAR_FORMATS: &[&str] = &["%d/%m/%y", "%m/%d/%y", "%d-%m-%y", "%m-%d-%y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Parse any supported date representation.
///
/// Numeric cells and purely numeric strings are spreadsheet serials.
pub fn parse_date(value: &CellValue) -> Option<NaiveDate> {
    match value {
        CellValue::Empty | CellValue::Bool(_) => None,
        CellValue::Date(d) => Some(*d),
        CellValue::Number(n) => from_excel_serial(*n),
        CellValue::Text(raw) => {
            let s = raw.trim();
            if s.is_empty() || s == NULL_SENTINEL || s == REDACTED_SENTINEL {
                return None;
            }
            let parsed = parse_date_str(s);
            if parsed.is_none() {
                warn!("Could not parse date: '{}'", s);
            }
            parsed
        }
    }
}

fn parse_date_str(s: &str) -> Option<NaiveDate> {
    if looks_numeric(s) {
        return s.parse::<f64>().ok().and_then(from_excel_serial);
    }

    // Four-digit-year formats. chrono's %Y also accepts "25", which must
    // fall through to the two-digit-year formats instead.
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            if date.year() >= 1000 {
                return Some(date);
            }
        }
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            if dt.date().year() >= 1000 {
                return Some(dt.date());
            }
        }
    }

    for fmt in SHORT_YEAR_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }

    parse_month_year(s)
}

/// "08/2025", "2025-08", "August 2025", "Aug 2025" → first of month
fn parse_month_year(s: &str) -> Option<NaiveDate> {
    let candidates = [
        (format!("01/{}", s), "%d/%m/%Y"),
        (format!("{}-01", s), "%Y-%m-%d"),
        (format!("1 {}", s), "%d %B %Y"),
    ];
    candidates
        .iter()
        .filter_map(|(text, fmt)| NaiveDate::parse_from_str(text, fmt).ok())
        .find(|d| d.year() >= 1000)
}

fn looks_numeric(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_digit() || c == '.')
        && s.chars().filter(|c| *c == '.').count() <= 1
        && s.chars().any(|c| c.is_ascii_digit())
}

/// Convert a spreadsheet serial day number to a date.
///
/// Spreadsheets treat 1900 as a leap year, so serial 60 is the phantom
/// 1900-02-29. Serials after it count from 1899-12-30, serials before it
/// from 1899-12-31.
pub fn from_excel_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(SERIAL_MIN..=SERIAL_MAX).contains(&serial) {
        warn!("Spreadsheet date serial out of range: {}", serial);
        return None;
    }
    let days = serial.floor() as i64;
    let epoch = if days > 59 {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    };
    epoch.checked_add_signed(Duration::days(days))
}

/// Sanity checks on a parsed date.
///
/// Years before 1900 are treated as data errors. A future publication date is
/// suspicious but kept.
pub fn validate_date(date: Option<NaiveDate>, field: &str) -> Option<NaiveDate> {
    let date = date?;
    if date.year() < 1900 {
        warn!("Very old date detected for {}: {}", field, date);
        return None;
    }
    if field == "publication_date" && date > Local::now().date_naive() {
        warn!("Future publication date detected: {}", date);
    }
    Some(date)
}

// ============================================================================
// BOOLEANS
// ============================================================================

/// Strict tri-state boolean: unparseable is None, never false.
pub fn parse_bool(value: &CellValue) -> Option<bool> {
    match value {
        CellValue::Bool(b) => Some(*b),
        CellValue::Number(n) if *n == 1.0 => Some(true),
        CellValue::Number(n) if *n == 0.0 => Some(false),
        CellValue::Number(_) | CellValue::Date(_) | CellValue::Empty => None,
        CellValue::Text(raw) => {
            let s = raw.trim().to_uppercase();
            match s.as_str() {
                "Y" | "YES" | "T" | "TRUE" | "1" => Some(true),
                "N" | "NO" | "F" | "FALSE" | "0" => Some(false),
                "" | NULL_SENTINEL | REDACTED_SENTINEL => None,
                _ => {
                    debug!("Unrecognized boolean value: '{}'", raw);
                    None
                }
            }
        }
    }
}

/// Legacy Y/N flag reading: "Y" or "DUAL REGISTRATION" is true, anything else false.
pub fn parse_flag(value: &CellValue) -> bool {
    match value {
        CellValue::Bool(b) => *b,
        other => other
            .trimmed()
            .map(|s| {
                let upper = s.to_uppercase();
                upper == "Y" || upper == "DUAL REGISTRATION"
            })
            .unwrap_or(false),
    }
}

// ============================================================================
// IDENTIFIERS / CATEGORICAL TEXT
// ============================================================================

/// Expand "1.23E+10"-style artifacts back to plain digits
fn expand_scientific(s: &str) -> String {
    let lower = s.to_lowercase();
    if !(lower.contains("e+") || lower.contains("e-")) {
        return s.to_string();
    }
    match s.parse::<f64>() {
        Ok(n) if n.is_finite() => format_number(n),
        _ => s.to_string(),
    }
}

/// Categorical identifiers (postal codes, ODS codes, PAF/UPRN ids).
///
/// Never goes through a numeric type for text input, so "007" stays "007".
pub fn parse_categorical(value: &CellValue) -> Option<String> {
    let s = value.trimmed()?;
    if s == NULL_SENTINEL {
        return None;
    }
    if s == REDACTED_SENTINEL {
        return Some(s);
    }

    let mut s = expand_scientific(&s);

    // "01.0" → "01"; only for digit-and-dot strings
    if s.contains('.') && s.replace('.', "").chars().all(|c| c.is_ascii_digit()) {
        s = s.trim_end_matches('0').trim_end_matches('.').to_string();
    }

    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Natural keys. Stricter than [`parse_categorical`]: redaction, null and
/// garbage all mean "no key", and the caller skips the row.
pub fn parse_primary_key(value: &CellValue, field: &str) -> Option<String> {
    if let CellValue::Number(n) = value {
        if !n.is_finite() {
            debug!("Non-finite {} rejected", field);
            return None;
        }
    }
    let s = value.trimmed()?;
    if matches!(s.as_str(), "*" | "-" | "nan" | "NaN" | "None" | "null") {
        return None;
    }

    let mut s = expand_scientific(&s);
    if let Some(stripped) = s.strip_suffix(".0") {
        s = stripped.to_string();
    }

    if s.is_empty() {
        debug!("Empty {} after cleaning", field);
        None
    } else {
        Some(s)
    }
}

/// Free text. `preserve_special = false` also nulls "*" (used for names,
/// where a redacted name is useless as a display value).
pub fn parse_text(value: &CellValue, preserve_special: bool) -> Option<String> {
    let s = value.trimmed()?;
    if s == NULL_SENTINEL {
        return None;
    }
    if s == REDACTED_SENTINEL {
        return if preserve_special { Some(s) } else { None };
    }

    let mut s = expand_scientific(&s);
    if let Some(stripped) = s.strip_suffix(".0") {
        if !stripped.is_empty()
            && stripped
                .chars()
                .all(|c| c.is_ascii_digit() || c == '.' || c == '-')
        {
            s = stripped.to_string();
        }
    }
    Some(s)
}

/// UK telephone numbers as text. A 10-digit number that lost its leading
/// zero (numeric round-trip upstream) gets it back.
pub fn parse_telephone(value: &CellValue) -> Option<String> {
    let phone = parse_categorical(value)?;
    if phone == REDACTED_SENTINEL {
        return Some(phone);
    }

    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 && !digits.starts_with('0') && phone.chars().all(|c| c.is_ascii_digit())
    {
        return Some(format!("0{}", phone));
    }
    Some(phone)
}

// ============================================================================
// NUMBERS
// ============================================================================

fn numeric_text(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Number(n) => {
            if n.is_finite() {
                Some(*n)
            } else {
                None
            }
        }
        CellValue::Empty | CellValue::Bool(_) | CellValue::Date(_) => None,
        CellValue::Text(raw) => {
            let s = raw.trim();
            if s.is_empty() || s == NULL_SENTINEL || s == REDACTED_SENTINEL {
                return None;
            }
            match s.replace(',', "").parse::<f64>() {
                Ok(n) if n.is_finite() => Some(n),
                _ => {
                    warn!("Could not parse numeric field: '{}'", s);
                    None
                }
            }
        }
    }
}

/// Counts (beds, etc). Non-integral values are absent, not truncated.
pub fn parse_integer(value: &CellValue) -> Option<i64> {
    let n = numeric_text(value)?;
    if n.fract() != 0.0 || n.abs() > i64::MAX as f64 {
        warn!("Numeric value not a representable integer: {}", n);
        return None;
    }
    Some(n as i64)
}

/// Coordinates and other decimals
pub fn parse_decimal(value: &CellValue) -> Option<f64> {
    numeric_text(value)
}

// ============================================================================
// EXTRACT FILE NAMES
// ============================================================================

/// (month, year) from an `mm_yyyy.<ext>` file name
pub fn parse_extract_name(file_name: &str) -> Option<(u32, i32)> {
    let stem = std::path::Path::new(file_name).file_stem()?.to_str()?;
    let (month, year) = stem.split_once('_')?;
    if month.is_empty() || month.len() > 2 || year.len() != 4 {
        return None;
    }
    let month: u32 = month.parse().ok()?;
    let year: i32 = year.parse().ok()?;
    Some((month, year))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn aug_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
    }

    #[test]
    fn test_dates_all_formats_agree() {
        assert_eq!(parse_date(&text("2025-08-01")), Some(aug_first()));
        assert_eq!(parse_date(&text("01/08/2025")), Some(aug_first()));
        assert_eq!(parse_date(&text("1 August 2025")), Some(aug_first()));
        assert_eq!(parse_date(&CellValue::Number(45870.0)), Some(aug_first()));
        assert_eq!(parse_date(&text("45870")), Some(aug_first()));
        assert_eq!(parse_date(&text("Aug 01, 2025")), Some(aug_first()));
        assert_eq!(parse_date(&text("2025-08-01T10:30:00")), Some(aug_first()));
        assert_eq!(parse_date(&CellValue::Date(aug_first())), Some(aug_first()));
    }

    #[test]
    fn test_dates_fallbacks() {
        // US month-first only when day-first is impossible
        assert_eq!(
            parse_date(&text("08/13/2025")),
            NaiveDate::from_ymd_opt(2025, 8, 13)
        );
        assert_eq!(parse_date(&text("01/08/25")), Some(aug_first()));
        assert_eq!(parse_date(&text("August 2025")), Some(aug_first()));
        assert_eq!(parse_date(&text("08/2025")), Some(aug_first()));
    }

    #[test]
    fn test_unparseable_date_is_none() {
        assert_eq!(parse_date(&text("not a date")), None);
        assert_eq!(parse_date(&text("-")), None);
        assert_eq!(parse_date(&text("*")), None);
        assert_eq!(parse_date(&CellValue::Empty), None);
        assert_eq!(parse_date(&CellValue::Number(99999.0)), None);
    }

    #[test]
    fn test_excel_leap_year_quirk() {
        assert_eq!(from_excel_serial(1.0), NaiveDate::from_ymd_opt(1900, 1, 1));
        assert_eq!(from_excel_serial(59.0), NaiveDate::from_ymd_opt(1900, 2, 28));
        assert_eq!(from_excel_serial(61.0), NaiveDate::from_ymd_opt(1900, 3, 1));
        assert_eq!(from_excel_serial(45870.75), Some(aug_first()));
    }

    #[test]
    fn test_validate_date() {
        assert_eq!(
            validate_date(NaiveDate::from_ymd_opt(1850, 1, 1), "publication_date"),
            None
        );
        assert_eq!(
            validate_date(Some(aug_first()), "publication_date"),
            Some(aug_first())
        );
        assert_eq!(validate_date(None, "publication_date"), None);
    }

    #[test]
    fn test_bool_is_tri_state() {
        assert_eq!(parse_bool(&text("y")), Some(true));
        assert_eq!(parse_bool(&text("Yes")), Some(true));
        assert_eq!(parse_bool(&text("TRUE")), Some(true));
        assert_eq!(parse_bool(&text("1")), Some(true));
        assert_eq!(parse_bool(&text("n")), Some(false));
        assert_eq!(parse_bool(&text("false")), Some(false));
        assert_eq!(parse_bool(&CellValue::Number(0.0)), Some(false));
        assert_eq!(parse_bool(&text("maybe")), None);
        assert_eq!(parse_bool(&text("*")), None);
        assert_eq!(parse_bool(&CellValue::Empty), None);
    }

    #[test]
    fn test_flag_accepts_dual_registration() {
        assert!(parse_flag(&text("Y")));
        assert!(parse_flag(&text("dual registration")));
        assert!(!parse_flag(&text("N")));
        assert!(!parse_flag(&text("yes")));
        assert!(!parse_flag(&CellValue::Empty));
    }

    #[test]
    fn test_categorical_preserves_format() {
        assert_eq!(parse_categorical(&text("SW1A 1AA")), Some("SW1A 1AA".to_string()));
        assert_eq!(parse_categorical(&text("007")), Some("007".to_string()));
        assert_eq!(parse_categorical(&text("01.0")), Some("01".to_string()));
        assert_eq!(
            parse_categorical(&text("1.0E+11")),
            Some("100000000000".to_string())
        );
        assert_eq!(parse_categorical(&CellValue::Number(7.0)), Some("7".to_string()));
        assert_eq!(parse_categorical(&text("*")), Some("*".to_string()));
        assert_eq!(parse_categorical(&text("-")), None);
    }

    #[test]
    fn test_primary_key_rejects_sentinels() {
        assert_eq!(parse_primary_key(&text("1-101"), "Location ID"), Some("1-101".to_string()));
        assert_eq!(parse_primary_key(&text("12345.0"), "Provider ID"), Some("12345".to_string()));
        assert_eq!(parse_primary_key(&text("*"), "Location ID"), None);
        assert_eq!(parse_primary_key(&text("-"), "Location ID"), None);
        assert_eq!(parse_primary_key(&text("  "), "Location ID"), None);
        assert_eq!(parse_primary_key(&text("nan"), "Location ID"), None);
        assert_eq!(parse_primary_key(&CellValue::Number(f64::INFINITY), "Location ID"), None);
    }

    #[test]
    fn test_text_sentinels() {
        assert_eq!(parse_text(&text("*"), true), Some("*".to_string()));
        assert_eq!(parse_text(&text("*"), false), None);
        assert_eq!(parse_text(&text("-"), true), None);
        assert_eq!(parse_text(&text("  Oak House "), true), Some("Oak House".to_string()));
        assert_eq!(parse_text(&text("12345.0"), true), Some("12345".to_string()));
    }

    #[test]
    fn test_numbers_null_redaction() {
        assert_eq!(parse_integer(&text("*")), None);
        assert_eq!(parse_integer(&text("-")), None);
        assert_eq!(parse_integer(&text("42")), Some(42));
        assert_eq!(parse_integer(&CellValue::Number(42.0)), Some(42));
        assert_eq!(parse_integer(&text("4.5")), None);
        assert_eq!(parse_decimal(&text("51.5074")), Some(51.5074));
        assert_eq!(parse_decimal(&text("*")), None);
        assert_eq!(parse_decimal(&text("north")), None);
    }

    #[test]
    fn test_telephone_leading_zero() {
        assert_eq!(parse_telephone(&text("02079460000")), Some("02079460000".to_string()));
        assert_eq!(
            parse_telephone(&CellValue::Number(2079460000.0)),
            Some("02079460000".to_string())
        );
        assert_eq!(parse_telephone(&text("020 7946 0000")), Some("020 7946 0000".to_string()));
        assert_eq!(parse_telephone(&text("*")), Some("*".to_string()));
    }

    #[test]
    fn test_typed_and_text_cells_agree() {
        let cells = [
            CellValue::Number(45870.0),
            CellValue::Number(7.0),
            CellValue::Number(51.25),
            CellValue::Bool(true),
            CellValue::Date(aug_first()),
        ];
        for cell in cells {
            let as_text = CellValue::text(cell.to_text().unwrap());
            assert_eq!(parse_date(&cell), parse_date(&as_text));
            assert_eq!(parse_bool(&cell), parse_bool(&as_text));
            assert_eq!(parse_categorical(&cell), parse_categorical(&as_text));
            assert_eq!(parse_decimal(&cell), parse_decimal(&as_text));
        }
    }

    #[test]
    fn test_extract_name() {
        assert_eq!(parse_extract_name("08_2025.ods"), Some((8, 2025)));
        assert_eq!(parse_extract_name("/data/1_2024.xlsx"), Some((1, 2024)));
        assert_eq!(parse_extract_name("August.xlsx"), None);
        assert_eq!(parse_extract_name("08_25.xlsx"), None);
    }
}
