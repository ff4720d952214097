//! Error taxonomy for the population engine.
//!
//! Row-scoped variants carry the 1-based data row index (blank rows are not
//! counted) and the column name so a failed run can point at the offending
//! cell.

use std::path::PathBuf;

use thiserror::Error;

use crate::entity::{ContainerKind, EntityKind, HierarchyError};
use crate::table::ColumnKind;

/// Why a reference cell could not be turned into an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedCause {
    /// The cell was empty.
    Blank,
    /// No entity with that name exists in the lookup scope.
    NameNotFound,
    /// No entity with that identifier exists in the lookup scope.
    IdNotFound,
    /// The cell is not a valid identifier.
    InvalidId,
    /// The row does not identify the parent container needed for the lookup.
    MissingScope,
}

impl std::fmt::Display for UnresolvedCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            UnresolvedCause::Blank => "cell is blank",
            UnresolvedCause::NameNotFound => "name not found",
            UnresolvedCause::IdNotFound => "identifier not found",
            UnresolvedCause::InvalidId => "not a valid identifier",
            UnresolvedCause::MissingScope => "row has no resolvable parent container",
        };
        f.write_str(text)
    }
}

/// Errors that abort a population run.
#[derive(Debug, Error)]
pub enum PopulateError {
    // === Input errors ===
    /// Failed to open the CSV source.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The CSV reader failed (I/O or quoting).
    #[error("failed to read CSV input: {0}")]
    Csv(#[from] csv::Error),

    /// A field could not be decoded with the configured encoding.
    #[error("failed to decode text with encoding {encoding}")]
    Decode { encoding: &'static str },

    /// Unknown input encoding label.
    #[error("unknown encoding '{0}'")]
    UnknownEncoding(String),

    /// The source contains no header row.
    #[error("CSV input has no header row")]
    EmptyInput,

    /// A header cell is empty.
    #[error("empty column header at position {position}")]
    EmptyColumnHeader { position: usize },

    /// Two columns end up with the same name.
    #[error("duplicate column '{name}'")]
    DuplicateColumn { name: String },

    // === Header directive errors ===
    /// A type token is not one of `d,l,s,b,plate,well,image,dataset,roi`.
    #[error("invalid column type token '{token}'")]
    InvalidDirective { token: String },

    /// The directive lists a different number of types than there are columns.
    #[error("number of column types ({found}) does not match number of columns ({expected})")]
    DirectiveArity { expected: usize, found: usize },

    /// Reference columns that cannot be resolved together.
    #[error("{first} and {second} columns cannot be resolved at the same time, pick one")]
    ConflictingColumns {
        first: &'static str,
        second: &'static str,
    },

    // === Precondition errors ===
    /// The target container does not exist.
    #[error("cannot find {kind}:{id}")]
    TargetNotFound { kind: ContainerKind, id: i64 },

    /// The header lacks the columns the target container kind needs.
    #[error("{target} tables require {requirement}")]
    MissingRequiredColumn {
        target: ContainerKind,
        requirement: &'static str,
    },

    // === Row errors ===
    /// Row arity differs from the header.
    #[error("row {row}: expected {expected} fields, found {found}")]
    MalformedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// An inferred column holds a value its inferred kind cannot represent.
    #[error(
        "row {row} column '{column}': empty or unparseable value '{value}' in {kind} column, use allow-nan to convert to NaN"
    )]
    TypeInference {
        row: usize,
        column: String,
        kind: ColumnKind,
        value: String,
    },

    /// A value does not decode under its declared kind.
    #[error("row {row} column '{column}': cannot convert '{value}' to {kind}")]
    TypeCoercion {
        row: usize,
        column: String,
        kind: ColumnKind,
        value: String,
    },

    /// A required linking column could not be resolved.
    #[error("row {row} column '{column}': required {entity} reference '{value}' unresolved ({cause})")]
    UnresolvedRequiredReference {
        row: usize,
        column: String,
        entity: EntityKind,
        value: String,
        cause: UnresolvedCause,
    },

    /// An identifier that must exist is unknown to the hierarchy.
    #[error("row {row} column '{column}': {entity} id {id} does not exist")]
    UnknownIdentifier {
        row: usize,
        column: String,
        entity: EntityKind,
        id: i64,
    },

    // === Collaborator and internal errors ===
    /// The hierarchy collaborator failed.
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    /// A column append would break the equal-length invariant.
    #[error("column '{column}' has {found} values, table has {expected} rows")]
    ColumnLength {
        column: String,
        expected: usize,
        found: usize,
    },
}

impl PopulateError {
    /// Data row the error refers to, if it is row scoped.
    pub fn row(&self) -> Option<usize> {
        match self {
            PopulateError::MalformedRow { row, .. }
            | PopulateError::TypeInference { row, .. }
            | PopulateError::TypeCoercion { row, .. }
            | PopulateError::UnresolvedRequiredReference { row, .. }
            | PopulateError::UnknownIdentifier { row, .. } => Some(*row),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PopulateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_errors_report_index_and_column() {
        let err = PopulateError::TypeCoercion {
            row: 3,
            column: "Area".to_string(),
            kind: ColumnKind::Double,
            value: "abc".to_string(),
        };
        assert_eq!(err.row(), Some(3));
        assert_eq!(
            err.to_string(),
            "row 3 column 'Area': cannot convert 'abc' to double"
        );
    }

    #[test]
    fn precondition_errors_are_not_row_scoped() {
        let err = PopulateError::MissingRequiredColumn {
            target: ContainerKind::Screen,
            requirement: "a Plate and a Well column",
        };
        assert_eq!(err.row(), None);
        assert_eq!(
            err.to_string(),
            "Screen tables require a Plate and a Well column"
        );
    }
}
