use serde::{Deserialize, Serialize};
use std::fmt;

/// A single spreadsheet cell value.
///
/// Serialized untagged, so JSON sees plain strings, numbers, booleans and
/// `null` for empty cells.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    Bool(bool),
    Number(f64),
    String(String),
    #[default]
    Empty,
}

impl CellValue {
    /// Creates a string cell.
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::String(s.into())
    }

    /// True when the cell carries something: empty cells and empty strings do not.
    ///
    /// Whitespace-only strings and the number zero are present.
    pub fn is_present(&self) -> bool {
        match self {
            CellValue::Empty => false,
            CellValue::String(s) => !s.is_empty(),
            CellValue::Number(_) | CellValue::Bool(_) => true,
        }
    }

    /// Numeric reading of the cell, or `None` when it does not coerce.
    ///
    /// Strings follow floating point prefix parsing: leading whitespace is
    /// skipped and the longest numeric prefix wins, so `"12kg"` reads as 12.
    /// Booleans and empty cells never coerce.
    pub fn numeric_value(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if n.is_nan() => None,
            CellValue::Number(n) => Some(*n),
            CellValue::String(s) => parse_float(s),
            CellValue::Bool(_) | CellValue::Empty => None,
        }
    }

    /// Numeric reading with the "0.0 on failure" fallback used for chart axes.
    pub fn as_f64_or_zero(&self) -> f64 {
        self.numeric_value().unwrap_or(0.0)
    }

    /// The string form of the cell, used as a category key or header name.
    pub fn to_label(&self) -> String {
        self.to_string()
    }

    /// True for non-empty string cells.
    pub fn is_text(&self) -> bool {
        matches!(self, CellValue::String(s) if !s.is_empty())
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::String(s) => f.write_str(s),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Number(n) => f.write_str(&format_number(*n)),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::String(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

/// Formats a number the way it reads in a spreadsheet: integral values have no
/// fractional part (`10`, not `10.0`).
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        format!("{:.0}", n)
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        n.to_string()
    }
}

/// Parses the longest floating point prefix of `input`.
///
/// Accepts an optional sign, digits with an optional fraction, an optional
/// exponent, and the literal `Infinity`. Returns `None` when no digits lead
/// the string.
pub fn parse_float(input: &str) -> Option<f64> {
    let s = input.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }

    if s[end..].starts_with("Infinity") {
        let negative = bytes.first() == Some(&b'-');
        return Some(if negative {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }

    if digits == 0 {
        return None;
    }

    // Exponent only counts when at least one digit follows it.
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_prefixes() {
        assert_eq!(parse_float("42"), Some(42.0));
        assert_eq!(parse_float("  3.5kg"), Some(3.5));
        assert_eq!(parse_float("-.5"), Some(-0.5));
        assert_eq!(parse_float("1,234"), Some(1.0));
        assert_eq!(parse_float("2e3x"), Some(2000.0));
        assert_eq!(parse_float("7e"), Some(7.0));
        assert_eq!(parse_float("5."), Some(5.0));
        assert_eq!(parse_float("-Infinity"), Some(f64::NEG_INFINITY));
    }

    #[test]
    fn rejects_non_numeric_text() {
        assert_eq!(parse_float(""), None);
        assert_eq!(parse_float("abc"), None);
        assert_eq!(parse_float("."), None);
        assert_eq!(parse_float("-"), None);
        assert_eq!(parse_float("$12"), None);
    }

    #[test]
    fn coerces_cells() {
        assert_eq!(CellValue::Number(10.0).as_f64_or_zero(), 10.0);
        assert_eq!(CellValue::text("12.5").as_f64_or_zero(), 12.5);
        assert_eq!(CellValue::text("East").as_f64_or_zero(), 0.0);
        assert_eq!(CellValue::Bool(true).numeric_value(), None);
        assert_eq!(CellValue::Empty.numeric_value(), None);
    }

    #[test]
    fn presence_rules() {
        assert!(!CellValue::Empty.is_present());
        assert!(!CellValue::text("").is_present());
        assert!(CellValue::text(" ").is_present());
        assert!(CellValue::Number(0.0).is_present());
        assert!(CellValue::Bool(false).is_present());
    }

    #[test]
    fn labels_render_like_a_spreadsheet() {
        assert_eq!(CellValue::Number(10.0).to_label(), "10");
        assert_eq!(CellValue::Number(2.5).to_label(), "2.5");
        assert_eq!(CellValue::Bool(true).to_label(), "true");
        assert_eq!(CellValue::Empty.to_label(), "");
    }

    #[test]
    fn serializes_untagged() {
        let cells = vec![
            CellValue::text("East"),
            CellValue::Number(10.0),
            CellValue::Bool(false),
            CellValue::Empty,
        ];
        let json = serde_json::to_string(&cells).unwrap();
        assert_eq!(json, r#"["East",10.0,false,null]"#);
        let back: Vec<CellValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cells);
    }
}
