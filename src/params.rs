//! Conversion of raw parameter strings into typed JSON values.

use serde_json::{Number, Value};
use thiserror::Error;

use crate::types::PrimitiveType;

/// The raw string is not a valid value of the requested primitive type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot convert {value:?} to {expected}")]
pub struct ConversionError {
    pub expected: PrimitiveType,
    pub value: String,
}

/// Convert a raw parameter value.
///
/// Absent and empty values convert to `None` without error; whether the
/// parameter was required is decided later by schema validation.
///
/// # Errors
///
/// Returns `ConversionError` for non-numeric numbers and booleans other than
/// `true`/`false` (case-insensitive).
pub fn convert(kind: PrimitiveType, raw: Option<&str>) -> Result<Option<Value>, ConversionError> {
    let raw = match raw {
        None | Some("") => return Ok(None),
        Some(raw) => raw,
    };
    let fail = || ConversionError {
        expected: kind,
        value: raw.to_string(),
    };

    match kind {
        PrimitiveType::String => Ok(Some(Value::String(raw.to_string()))),
        PrimitiveType::Boolean => {
            if raw.eq_ignore_ascii_case("true") {
                Ok(Some(Value::Bool(true)))
            } else if raw.eq_ignore_ascii_case("false") {
                Ok(Some(Value::Bool(false)))
            } else {
                Err(fail())
            }
        }
        PrimitiveType::Number => parse_number(raw).map(Some).ok_or_else(fail),
    }
}

/// Lenient numeric parsing: surrounding whitespace, exponents and
/// `0x`/`0o`/`0b` prefixes are accepted. Integral results become JSON
/// integers so `type: integer` schemas accept them.
fn parse_number(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(Value::from(0));
    }

    let radix = match trimmed.get(..2).map(str::to_ascii_lowercase).as_deref() {
        Some("0x") => Some(16),
        Some("0o") => Some(8),
        Some("0b") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return u64::from_str_radix(&trimmed[2..], radix).ok().map(Value::from);
    }

    // Rust's float parser also accepts "inf"/"nan" spellings; JSON has neither.
    let parsed: f64 = trimmed.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    if parsed.fract() == 0.0 && parsed.abs() < i64::MAX as f64 {
        return Some(Value::from(parsed as i64));
    }
    Number::from_f64(parsed).map(Value::Number)
}
