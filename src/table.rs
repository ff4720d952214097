//! Column-major table model and its text rendering.

use std::borrow::Cow;
use std::fmt::{self, Write as _};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::TypedValue;
use crate::entity::EntityKind;
use crate::error::{PopulateError, Result};

/// Minimum width of a string column in the persisted table.
pub const DEFAULT_COLUMN_SIZE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Double,
    Long,
    String,
    Bool,
    PlateRef,
    WellRef,
    ImageRef,
    DatasetRef,
    RoiRef,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Double => "double",
            ColumnKind::Long => "long",
            ColumnKind::String => "string",
            ColumnKind::Bool => "bool",
            ColumnKind::PlateRef => "plate",
            ColumnKind::WellRef => "well",
            ColumnKind::ImageRef => "image",
            ColumnKind::DatasetRef => "dataset",
            ColumnKind::RoiRef => "roi",
        }
    }

    /// Token used in `# header` directives.
    pub fn token(&self) -> &'static str {
        match self {
            ColumnKind::Double => "d",
            ColumnKind::Long => "l",
            ColumnKind::String => "s",
            ColumnKind::Bool => "b",
            other => other.as_str(),
        }
    }

    pub fn tokens() -> &'static [&'static str] {
        &["d", "l", "s", "b", "plate", "well", "image", "dataset", "roi"]
    }

    pub fn from_entity(entity: EntityKind) -> Option<ColumnKind> {
        match entity {
            EntityKind::Plate => Some(ColumnKind::PlateRef),
            EntityKind::Well => Some(ColumnKind::WellRef),
            EntityKind::Image => Some(ColumnKind::ImageRef),
            EntityKind::Dataset => Some(ColumnKind::DatasetRef),
            EntityKind::Roi => Some(ColumnKind::RoiRef),
            _ => None,
        }
    }

    /// Entity referenced by a reference kind.
    pub fn entity(&self) -> Option<EntityKind> {
        match self {
            ColumnKind::PlateRef => Some(EntityKind::Plate),
            ColumnKind::WellRef => Some(EntityKind::Well),
            ColumnKind::ImageRef => Some(EntityKind::Image),
            ColumnKind::DatasetRef => Some(EntityKind::Dataset),
            ColumnKind::RoiRef => Some(EntityKind::Roi),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        self.entity().is_some()
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnKind {
    type Err = PopulateError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "d" => Ok(ColumnKind::Double),
            "l" => Ok(ColumnKind::Long),
            "s" => Ok(ColumnKind::String),
            "b" => Ok(ColumnKind::Bool),
            "plate" => Ok(ColumnKind::PlateRef),
            "well" => Ok(ColumnKind::WellRef),
            "image" => Ok(ColumnKind::ImageRef),
            "dataset" => Ok(ColumnKind::DatasetRef),
            "roi" => Ok(ColumnKind::RoiRef),
            _ => Err(PopulateError::InvalidDirective {
                token: value.to_string(),
            }),
        }
    }
}

/// How a column's kind was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnSource {
    ExplicitHeader,
    NameHeuristic,
    Inferred,
    /// Automatic detection was suppressed and no directive matched.
    Default,
    /// Appended by the engine.
    Derived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub source: ColumnSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Double(Vec<f64>),
    Long(Vec<i64>),
    String { values: Vec<String>, size: usize },
    Bool(Vec<bool>),
    Reference(Vec<i64>),
}

impl ColumnData {
    pub fn empty(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Double => ColumnData::Double(Vec::new()),
            ColumnKind::Long => ColumnData::Long(Vec::new()),
            ColumnKind::String => ColumnData::String {
                values: Vec::new(),
                size: DEFAULT_COLUMN_SIZE,
            },
            ColumnKind::Bool => ColumnData::Bool(Vec::new()),
            _ => ColumnData::Reference(Vec::new()),
        }
    }

    pub fn strings(values: Vec<String>) -> Self {
        let size = values
            .iter()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max(DEFAULT_COLUMN_SIZE);
        ColumnData::String { values, size }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Double(v) => v.len(),
            ColumnData::Long(v) => v.len(),
            ColumnData::String { values, .. } => values.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Reference(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`ColumnData::push`] would take `value`.
    pub fn accepts(&self, value: &TypedValue) -> bool {
        matches!(
            (self, value),
            (ColumnData::Double(_), TypedValue::Double(_))
                | (ColumnData::Long(_), TypedValue::Long(_))
                | (ColumnData::Bool(_), TypedValue::Bool(_))
                | (ColumnData::Reference(_), TypedValue::Reference { .. })
                | (ColumnData::String { .. }, TypedValue::String(_))
        )
    }

    /// Appends a value; returns `false` when the value does not fit the column.
    pub fn push(&mut self, value: TypedValue) -> bool {
        match (self, value) {
            (ColumnData::Double(v), TypedValue::Double(x)) => v.push(x),
            (ColumnData::Long(v), TypedValue::Long(x)) => v.push(x),
            (ColumnData::Bool(v), TypedValue::Bool(x)) => v.push(x),
            (ColumnData::Reference(v), TypedValue::Reference { id, .. }) => v.push(id),
            (ColumnData::String { values, size }, TypedValue::String(s)) => {
                *size = (*size).max(s.len());
                values.push(s);
            }
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub spec: ColumnSpec,
    pub data: ColumnData,
}

impl Column {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn kind(&self) -> ColumnKind {
        self.spec.kind
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Byte width of a string column.
    pub fn size(&self) -> Option<usize> {
        match &self.data {
            ColumnData::String { size, .. } => Some(*size),
            _ => None,
        }
    }

    pub fn value(&self, row: usize) -> Option<TypedValue> {
        match &self.data {
            ColumnData::Double(v) => v.get(row).copied().map(TypedValue::Double),
            ColumnData::Long(v) => v.get(row).copied().map(TypedValue::Long),
            ColumnData::String { values, .. } => values.get(row).cloned().map(TypedValue::String),
            ColumnData::Bool(v) => v.get(row).copied().map(TypedValue::Bool),
            ColumnData::Reference(v) => {
                let entity = self.spec.kind.entity()?;
                v.get(row)
                    .copied()
                    .map(|id| TypedValue::Reference { entity, id })
            }
        }
    }
}

/// Column specs paired with column-major data of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    pub fn new(row_count: usize) -> Self {
        Self {
            columns: Vec::new(),
            row_count,
        }
    }

    pub(crate) fn push_column(&mut self, column: Column) -> Result<()> {
        if column.len() != self.row_count {
            return Err(PopulateError::ColumnLength {
                column: column.spec.name,
                expected: self.row_count,
                found: column.data.len(),
            });
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.spec.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.spec.name == name)
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn headers(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.spec.name.clone()).collect()
    }

    pub fn specs(&self) -> Vec<&ColumnSpec> {
        self.columns.iter().map(|c| &c.spec).collect()
    }

    pub fn value(&self, row: usize, column: usize) -> Option<TypedValue> {
        self.columns.get(column)?.value(row)
    }

    pub fn row(&self, row: usize) -> Option<Vec<TypedValue>> {
        if row >= self.row_count {
            return None;
        }
        self.columns.iter().map(|c| c.value(row)).collect()
    }

    /// Renders the table as aligned text, one line per row.
    pub fn render(&self) -> String {
        let headers = self.headers();
        let rows = (0..self.row_count)
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| c.value(row).map(|v| v.to_string()).unwrap_or_default())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        render_grid(&headers, &rows)
    }
}

fn render_grid(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| h.chars().count().max(1)).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(sanitize_cell(cell).chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_line(headers, &widths));
    let rule_widths = widths.iter().map(|w| (*w).max(3)).collect::<Vec<_>>();
    let rule = rule_widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_line(&rule, &rule_widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_line(row, &widths));
    }
    output
}

fn format_line(values: &[String], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = sanitize_cell(value);
            let pad = width.saturating_sub(cell.chars().count());
            format!("{cell}{}", " ".repeat(pad))
        })
        .collect::<Vec<_>>()
        .join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
