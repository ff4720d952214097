use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::entity::EntityKind;
use crate::table::ColumnKind;

/// A single typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Double(f64),
    Long(i64),
    String(String),
    Bool(bool),
    Reference { entity: EntityKind, id: i64 },
}

impl TypedValue {
    pub fn as_display(&self) -> String {
        match self {
            TypedValue::Double(f) => {
                if f.is_nan() {
                    "NaN".to_string()
                } else {
                    f.to_string()
                }
            }
            TypedValue::Long(i) => i.to_string(),
            TypedValue::String(s) => s.clone(),
            TypedValue::Bool(b) => b.to_string(),
            TypedValue::Reference { id, .. } => id.to_string(),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

const BOOLEAN_TRUE: &[&str] = &["yes", "y", "true", "t", "1"];
const BOOLEAN_FALSE: &[&str] = &["no", "n", "false", "f", "0"];

pub fn parse_long(value: &str) -> Option<i64> {
    value.trim().parse().ok()
}

pub fn parse_double(value: &str) -> Option<f64> {
    value.trim().parse().ok()
}

/// Boolean coercion for declared `b` columns; an empty cell is `false`.
pub fn parse_bool(value: &str) -> Option<bool> {
    let lowered = value.trim().to_ascii_lowercase();
    if lowered.is_empty() || BOOLEAN_FALSE.contains(&lowered.as_str()) {
        Some(false)
    } else if BOOLEAN_TRUE.contains(&lowered.as_str()) {
        Some(true)
    } else {
        None
    }
}

/// Tokens that make a column look boolean during inference.
///
/// Same token set as [`parse_bool`] minus `0`/`1`, so integer columns stay
/// integers.
pub fn is_boolean_token(value: &str) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "1" => false,
        other => parse_bool(other).is_some(),
    }
}

/// Value of an inferred boolean cell (empty is `false`).
pub fn inferred_bool(value: &str) -> bool {
    parse_bool(value).unwrap_or(false)
}

/// Coerces a raw cell to a scalar kind; `None` when it does not decode.
///
/// Empty numeric cells become NaN for doubles when `allow_nan` is set and
/// fail otherwise.
pub fn coerce_scalar(value: &str, kind: ColumnKind, allow_nan: bool) -> Option<TypedValue> {
    let trimmed = value.trim();
    match kind {
        ColumnKind::String => Some(TypedValue::String(value.to_string())),
        ColumnKind::Bool => parse_bool(trimmed).map(TypedValue::Bool),
        ColumnKind::Long => parse_long(trimmed).map(TypedValue::Long),
        ColumnKind::Double => match parse_double(trimmed) {
            Some(parsed) => Some(TypedValue::Double(parsed)),
            None if allow_nan => Some(TypedValue::Double(f64::NAN)),
            None => None,
        },
        _ => None,
    }
}

fn well_regex() -> &'static Regex {
    static WELL: OnceLock<Regex> = OnceLock::new();
    WELL.get_or_init(|| Regex::new(r"^([a-zA-Z]+)(\d+)$").expect("valid well regex"))
}

/// Parses a well position such as `B12` into zero-based `(row, column)`.
///
/// Rows use bijective base-26 letters (`A`..`Z`, `AA`..), columns are
/// one-based in the text.
pub fn parse_well_position(value: &str) -> Option<(u32, u32)> {
    let captures = well_regex().captures(value.trim())?;
    let row = letters_to_index(captures.get(1)?.as_str())?;
    let column: u32 = captures.get(2)?.as_str().parse().ok()?;
    if column == 0 {
        return None;
    }
    Some((row, column - 1))
}

/// Zero-based index of a bijective base-26 row label (`A` is 0, `AA` is 26).
fn letters_to_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || !letters.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return None;
    }
    let mut index: u32 = 0;
    for ch in letters.chars() {
        let digit = ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
    }
    Some(index - 1)
}

/// Zero-based plate row or column index from a cell.
///
/// Numbers are one-based in the text (`3` is 2); letters are row labels
/// (`c` is 2).
pub fn parse_well_axis(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    match trimmed.parse::<i64>() {
        Ok(number) if number >= 1 => Some(number - 1),
        Ok(_) => None,
        Err(_) => letters_to_index(trimmed).map(i64::from),
    }
}

/// Canonical text of a zero-based well position, e.g. `(0, 0)` is `A1`.
pub fn format_well_position(row: u32, column: u32) -> String {
    let mut letters = Vec::new();
    let mut n = row + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    let letters = letters.into_iter().rev().collect::<String>();
    format!("{letters}{}", column + 1)
}

/// Normalizes a well name so `a01`, `A1` and ` a1 ` compare equal.
pub fn normalize_well_name(value: &str) -> Option<String> {
    parse_well_position(value).map(|(row, column)| format_well_position(row, column))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_coercion_accepts_documented_tokens() {
        for token in ["yes", "y", "TRUE", "t", "1"] {
            assert_eq!(parse_bool(token), Some(true), "{token}");
        }
        for token in ["no", "n", "False", "f", "0", ""] {
            assert_eq!(parse_bool(token), Some(false), "{token}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn well_axis_accepts_numbers_and_letters() {
        assert_eq!(parse_well_axis("1"), Some(0));
        assert_eq!(parse_well_axis(" 12 "), Some(11));
        assert_eq!(parse_well_axis("c"), Some(2));
        assert_eq!(parse_well_axis("AB"), Some(27));
        assert_eq!(parse_well_axis("0"), None);
        assert_eq!(parse_well_axis(""), None);
        assert_eq!(parse_well_axis("a1"), None);
    }

    #[test]
    fn inferred_booleans_coerce_under_declared_kind() {
        for token in ["y", "N", "Yes", "f", "TRUE"] {
            assert!(is_boolean_token(token), "{token}");
            assert!(parse_bool(token).is_some(), "{token}");
        }
        assert_eq!(parse_bool("y"), Some(true));
        assert_eq!(parse_bool("n"), Some(false));
        assert!(inferred_bool("Y"));
    }

    #[test]
    fn inference_tokens_exclude_digits() {
        assert!(is_boolean_token("True"));
        assert!(is_boolean_token("n"));
        assert!(!is_boolean_token("1"));
        assert!(!is_boolean_token("0"));
    }

    #[test]
    fn coerce_scalar_handles_nan_policy() {
        assert_eq!(
            coerce_scalar(" 2.5 ", ColumnKind::Double, false),
            Some(TypedValue::Double(2.5))
        );
        assert_eq!(coerce_scalar("", ColumnKind::Double, false), None);
        match coerce_scalar("", ColumnKind::Double, true) {
            Some(TypedValue::Double(v)) => assert!(v.is_nan()),
            other => panic!("expected NaN, got {other:?}"),
        }
        assert_eq!(coerce_scalar("", ColumnKind::Long, true), None);
        assert_eq!(
            coerce_scalar("42", ColumnKind::Long, false),
            Some(TypedValue::Long(42))
        );
        assert_eq!(
            coerce_scalar(" keep ", ColumnKind::String, false),
            Some(TypedValue::String(" keep ".to_string()))
        );
    }

    #[test]
    fn well_names_normalize_case_and_padding() {
        assert_eq!(normalize_well_name("a1").as_deref(), Some("A1"));
        assert_eq!(normalize_well_name("A01").as_deref(), Some("A1"));
        assert_eq!(normalize_well_name("h12").as_deref(), Some("H12"));
        assert_eq!(normalize_well_name("AA3").as_deref(), Some("AA3"));
        assert_eq!(normalize_well_name("A0"), None);
        assert_eq!(normalize_well_name("1A"), None);
    }

    #[test]
    fn well_positions_use_bijective_rows() {
        assert_eq!(parse_well_position("A1"), Some((0, 0)));
        assert_eq!(parse_well_position("Z2"), Some((25, 1)));
        assert_eq!(parse_well_position("AA1"), Some((26, 0)));
        assert_eq!(format_well_position(51, 9), "AZ10");
    }

    #[test]
    fn display_renders_nan_and_references() {
        assert_eq!(TypedValue::Double(f64::NAN).to_string(), "NaN");
        assert_eq!(
            TypedValue::Reference {
                entity: EntityKind::Well,
                id: 7
            }
            .to_string(),
            "7"
        );
    }
}
