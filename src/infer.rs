//! Data-driven column kind inference.
//!
//! Columns without an explicit or name-based kind are typed from their full
//! set of values: the narrowest of `Bool ⊂ Long ⊂ Double ⊂ String` that every
//! non-empty cell satisfies. Empty cells do not constrain the choice.

use crate::data::{TypedValue, inferred_bool, is_boolean_token, parse_double, parse_long};
use crate::error::{PopulateError, Result};
use crate::table::{ColumnData, ColumnKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindCandidate {
    non_empty: usize,
    empty: usize,
    boolean_matches: usize,
    long_matches: usize,
    double_matches: usize,
}

impl KindCandidate {
    pub fn update(&mut self, value: &str) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.empty += 1;
            return;
        }
        self.non_empty += 1;
        if is_boolean_token(trimmed) {
            self.boolean_matches += 1;
        }
        if parse_long(trimmed).is_some() {
            self.long_matches += 1;
        }
        if parse_double(trimmed).is_some() {
            self.double_matches += 1;
        }
    }

    pub fn decide(&self) -> ColumnKind {
        if self.non_empty == 0 {
            ColumnKind::String
        } else if self.boolean_matches == self.non_empty {
            ColumnKind::Bool
        } else if self.long_matches == self.non_empty {
            ColumnKind::Long
        } else if self.double_matches == self.non_empty {
            ColumnKind::Double
        } else {
            ColumnKind::String
        }
    }

    pub fn has_empty(&self) -> bool {
        self.empty > 0
    }
}

pub fn infer_kind<'a, I>(values: I) -> ColumnKind
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidate = KindCandidate::default();
    for value in values {
        candidate.update(value);
    }
    candidate.decide()
}

/// Types buffered raw text under an inferred kind.
///
/// `rows[i]` is the data row index of `values[i]`, used for error reports.
/// Empty cells become `0`, `false` or `""`; in a double column they become
/// NaN when `allow_nan` is set and fail otherwise.
pub fn materialize(
    column: &str,
    kind: ColumnKind,
    values: &[String],
    rows: &[usize],
    allow_nan: bool,
) -> Result<ColumnData> {
    let mut data = ColumnData::empty(kind);
    for (idx, raw) in values.iter().enumerate() {
        let trimmed = raw.trim();
        let value = match kind {
            ColumnKind::Bool => TypedValue::Bool(inferred_bool(trimmed)),
            ColumnKind::Long => TypedValue::Long(parse_long(trimmed).unwrap_or(0)),
            ColumnKind::Double => match parse_double(trimmed) {
                Some(parsed) => TypedValue::Double(parsed),
                None if allow_nan => TypedValue::Double(f64::NAN),
                None => {
                    return Err(PopulateError::TypeInference {
                        row: rows.get(idx).copied().unwrap_or(idx + 1),
                        column: column.to_string(),
                        kind,
                        value: raw.clone(),
                    });
                }
            },
            _ => TypedValue::String(raw.clone()),
        };
        data.push(value);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn numeric_inference_follows_narrowest_kind() {
        assert_eq!(infer_kind(["1", "2", "3"]), ColumnKind::Long);
        assert_eq!(infer_kind(["1.0", "2", "3"]), ColumnKind::Double);
        assert_eq!(infer_kind(["true", "false"]), ColumnKind::Bool);
        assert_eq!(infer_kind(["1", "x", "3"]), ColumnKind::String);
        assert_eq!(infer_kind(["11", "0.1", "True"]), ColumnKind::String);
    }

    #[test]
    fn empty_cells_do_not_constrain() {
        assert_eq!(infer_kind(["1", "", "3"]), ColumnKind::Long);
        assert_eq!(infer_kind(["", "yes", " "]), ColumnKind::Bool);
        assert_eq!(infer_kind(["", ""]), ColumnKind::String);
        assert_eq!(infer_kind(std::iter::empty::<&str>()), ColumnKind::String);
    }

    #[test]
    fn zero_one_columns_stay_integer() {
        assert_eq!(infer_kind(["0", "1", "1"]), ColumnKind::Long);
    }

    #[test]
    fn materialize_double_with_nan_tolerance() {
        let values = strings(&["1.5", "", "3.2"]);
        let data = materialize("Area", ColumnKind::Double, &values, &[1, 2, 3], true).unwrap();
        match data {
            ColumnData::Double(v) => {
                assert_eq!(v[0], 1.5);
                assert!(v[1].is_nan());
                assert_eq!(v[2], 3.2);
            }
            other => panic!("expected doubles, got {other:?}"),
        }
    }

    #[test]
    fn materialize_double_without_nan_tolerance_fails() {
        let values = strings(&["1.5", "", "3.2"]);
        let err = materialize("Area", ColumnKind::Double, &values, &[4, 5, 6], false).unwrap_err();
        match err {
            PopulateError::TypeInference { row, column, .. } => {
                assert_eq!(row, 5);
                assert_eq!(column, "Area");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn materialize_fills_zero_values() {
        let values = strings(&["", "7"]);
        assert_eq!(
            materialize("n", ColumnKind::Long, &values, &[1, 2], false).unwrap(),
            ColumnData::Long(vec![0, 7])
        );
        let flags = strings(&["Yes", ""]);
        assert_eq!(
            materialize("ok", ColumnKind::Bool, &flags, &[1, 2], false).unwrap(),
            ColumnData::Bool(vec![true, false])
        );
    }

    proptest! {
        #[test]
        fn integer_columns_infer_long(values in proptest::collection::vec(any::<i64>(), 1..20)) {
            let text = values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
            prop_assert_eq!(infer_kind(text.iter().map(String::as_str)), ColumnKind::Long);
        }

        #[test]
        fn fractional_columns_infer_double(
            values in proptest::collection::vec(-1.0e6f64..1.0e6, 1..20)
        ) {
            let mut text = values.iter().map(|v| format!("{v:.3}")).collect::<Vec<_>>();
            text.push("0.5".to_string());
            prop_assert_eq!(infer_kind(text.iter().map(String::as_str)), ColumnKind::Double);
        }

        #[test]
        fn any_non_numeric_token_forces_string(
            prefix in proptest::collection::vec(any::<i32>(), 0..10),
            word in "[a-eg-mo-su-xz]{2,8}"
        ) {
            let mut text = prefix.iter().map(|v| v.to_string()).collect::<Vec<_>>();
            text.push(word);
            prop_assert_eq!(infer_kind(text.iter().map(String::as_str)), ColumnKind::String);
        }
    }
}
