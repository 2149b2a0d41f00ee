//! Numeric and text normalization shared by the grouping and reconciliation code.
//!
//! Extracted values come from OCR or LLM output, so numbers arrive as
//! `"1.234,56"`, `"€ 1 234,56"`, `"1234,5 kg"` or plain JSON numbers. Everything
//! here is lenient: a value that cannot be read yields `None`, never an error.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn number_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"-?\s*\d(?:[\d.,' ]*\d)?").expect("number token regex is valid")
    })
}

/// Parse a number written in either European or US notation.
///
/// When both `.` and `,` appear, the last one is the decimal separator. A single
/// `,` followed by exactly three digits is read as a thousands separator
/// (`"1,234"` → 1234), otherwise as a decimal comma (`"12,5"` → 12.5).
/// Repeated separators of the same kind are always thousands separators.
pub fn parse_number(raw: &str) -> Option<f64> {
    let token = number_token().find(raw)?.as_str();
    let compact: String = token
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'')
        .collect();

    let (negative, digits) = match compact.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, compact.as_str()),
    };

    let dots = digits.matches('.').count();
    let commas = digits.matches(',').count();

    let canonical = match (dots, commas) {
        (0, 0) => digits.to_string(),
        (_, 0) if dots > 1 => digits.replace('.', ""),
        (_, 0) => digits.to_string(),
        (0, _) if commas > 1 => digits.replace(',', ""),
        (0, _) => {
            let (int_part, frac_part) = digits.split_once(',')?;
            let int_is_zero = int_part.trim_start_matches('0').is_empty();
            if frac_part.len() == 3 && !int_is_zero {
                format!("{}{}", int_part, frac_part)
            } else {
                format!("{}.{}", int_part, frac_part)
            }
        }
        _ => {
            let last_dot = digits.rfind('.')?;
            let last_comma = digits.rfind(',')?;
            if last_comma > last_dot {
                digits.replace('.', "").replace(',', ".")
            } else {
                digits.replace(',', "")
            }
        }
    };

    let value: f64 = canonical.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Read a JSON value as a float: numbers directly, strings through [`parse_number`].
pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// Render a scalar JSON value as text. Null, arrays and objects yield `None`.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Trim and collapse internal whitespace runs into a single space.
pub fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text form used for similarity comparison: cleaned and lowercased.
pub fn comparison_text(raw: &str) -> String {
    clean_text(raw).to_lowercase()
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_numbers() {
        assert_eq!(parse_number("1234.56"), Some(1234.56));
        assert_eq!(parse_number("42"), Some(42.0));
        assert_eq!(parse_number("-12,00"), Some(-12.0));
    }

    #[test]
    fn test_parse_european_and_us_notation() {
        assert_eq!(parse_number("1.234,56"), Some(1234.56));
        assert_eq!(parse_number("1,234.56"), Some(1234.56));
        assert_eq!(parse_number("1 234,56"), Some(1234.56));
        assert_eq!(parse_number("1.234.567"), Some(1234567.0));
    }

    #[test]
    fn test_parse_lone_comma() {
        assert_eq!(parse_number("1,234"), Some(1234.0));
        assert_eq!(parse_number("12,5"), Some(12.5));
        assert_eq!(parse_number("0,125"), Some(0.125));
    }

    #[test]
    fn test_parse_with_units_and_currency() {
        assert_eq!(parse_number("€ 1.234,56"), Some(1234.56));
        assert_eq!(parse_number("1234,5 kg"), Some(1234.5));
        assert_eq!(parse_number("Gross: 880 KGS"), Some(880.0));
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("n/a"), None);
    }

    #[test]
    fn test_value_to_f64() {
        assert_eq!(value_to_f64(&json!(3.5)), Some(3.5));
        assert_eq!(value_to_f64(&json!("7,25")), Some(7.25));
        assert_eq!(value_to_f64(&json!(null)), None);
        assert_eq!(value_to_f64(&json!([1, 2])), None);
    }

    #[test]
    fn test_comparison_text() {
        assert_eq!(comparison_text("  ACME   Logistics\tBV "), "acme logistics bv");
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_to(33.333333, 2), 33.33);
        assert_eq!(round_to(1.23456, 3), 1.235);
    }
}
