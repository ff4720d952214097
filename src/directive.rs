//! Column kind resolution from header directives and column names.
//!
//! Precedence, highest first: an explicit type token for the column, the
//! name heuristic table, data-driven inference (deferred until every row has
//! been read) and, when automatic detection is suppressed, plain strings.
//!
//! Plate and well heuristics only apply to Screen and Plate targets; other
//! targets have no scope to resolve them in and keep such columns as text.
//!
//! The resolved [`HeaderPlan`] also fixes the derived columns the builder
//! must append: a name column for every resolved reference column and a
//! reference column for `Image Name` / `Roi Name`.

use std::io::Read;

use log::{debug, warn};

use crate::entity::{ContainerKind, EntityKind};
use crate::error::{PopulateError, Result};
use crate::infer::KindCandidate;
use crate::rows::RowStream;
use crate::table::{ColumnKind, ColumnSource};

/// Column count above which the persisted table format degrades.
pub const MAX_COLUMN_COUNT: usize = 512;

const DESCRIPTION_SEPARATOR: &str = "%%";

/// What a column means to the resolution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Plain,
    /// Holds identifiers (or well/plate names) of an entity.
    Reference(EntityKind),
    /// Holds human-readable names of an entity.
    EntityName(EntityKind),
    /// Shape identifiers, validated against the target.
    Shape,
    /// Plate `row` or `column` position, stored zero-based.
    WellAxis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    pub position: usize,
    pub name: String,
    pub description: Option<String>,
    /// `None` while the kind waits for data-driven inference.
    pub kind: Option<ColumnKind>,
    pub source: ColumnSource,
    pub role: ColumnRole,
    pub required: bool,
}

/// A column the builder appends after all source columns.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedPlan {
    pub name: String,
    pub kind: ColumnKind,
    pub entity: EntityKind,
    /// Index of the source column whose values drive this one.
    pub trigger: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderPlan {
    pub columns: Vec<ColumnPlan>,
    pub derived: Vec<DerivedPlan>,
}

impl HeaderPlan {
    pub fn position_of(&self, role: ColumnRole) -> Option<usize> {
        self.columns.iter().position(|c| c.role == role)
    }

    pub fn has_role(&self, role: ColumnRole) -> bool {
        self.position_of(role).is_some()
    }

    /// Names of source columns whose kind is left to inference.
    pub fn deferred_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.kind.is_none())
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Case-insensitive name key where spaces and underscores are ignored.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '_'))
        .collect::<String>()
        .to_lowercase()
}

/// Kind implied by a recognized column name, independent of the target.
///
/// Plates and wells are addressed by name, so `Plate Name` and `Well Name`
/// are reference columns just like `Plate` and `Well`.
pub fn heuristic_kind(name: &str) -> Option<ColumnKind> {
    let kind = match normalize_name(name).as_str() {
        "project" | "projectid" => ColumnKind::Long,
        "dataset" | "datasetid" => ColumnKind::DatasetRef,
        "plate" | "platename" => ColumnKind::PlateRef,
        "plateid" => ColumnKind::Long,
        "well" | "wellname" => ColumnKind::WellRef,
        "wellid" => ColumnKind::Long,
        "image" | "imageid" => ColumnKind::ImageRef,
        "roi" | "roiid" => ColumnKind::RoiRef,
        "shape" => ColumnKind::Long,
        "projectname" | "datasetname" | "imagename" | "roiname" => ColumnKind::String,
        _ => return None,
    };
    Some(kind)
}

fn is_plate_like(target: ContainerKind) -> bool {
    matches!(target, ContainerKind::Screen | ContainerKind::Plate)
}

/// Kind implied by a column name for a table linked to `target`.
pub fn heuristic_kind_for(name: &str, target: ContainerKind) -> Option<ColumnKind> {
    let plate_like = is_plate_like(target);
    match normalize_name(name).as_str() {
        "field" | "wellsample" if plate_like => Some(ColumnKind::ImageRef),
        "row" | "column" if plate_like => Some(ColumnKind::Long),
        _ => match heuristic_kind(name)? {
            ColumnKind::PlateRef | ColumnKind::WellRef if !plate_like => Some(ColumnKind::String),
            kind => Some(kind),
        },
    }
}

fn is_name_variant(name: &str) -> bool {
    normalize_name(name).ends_with("name")
}

fn name_column_entity(name: &str) -> Option<EntityKind> {
    match normalize_name(name).as_str() {
        "projectname" => Some(EntityKind::Project),
        "datasetname" => Some(EntityKind::Dataset),
        "platename" => Some(EntityKind::Plate),
        "wellname" => Some(EntityKind::Well),
        "imagename" => Some(EntityKind::Image),
        "roiname" => Some(EntityKind::Roi),
        _ => None,
    }
}

fn role_for(name: &str, kind: Option<ColumnKind>) -> ColumnRole {
    match kind {
        Some(kind) if kind.is_reference() => kind
            .entity()
            .map(ColumnRole::Reference)
            .unwrap_or(ColumnRole::Plain),
        Some(ColumnKind::String) => name_column_entity(name)
            .map(ColumnRole::EntityName)
            .unwrap_or(ColumnRole::Plain),
        Some(ColumnKind::Long) => match normalize_name(name).as_str() {
            "shape" => ColumnRole::Shape,
            "row" | "column" => ColumnRole::WellAxis,
            _ => ColumnRole::Plain,
        },
        _ => ColumnRole::Plain,
    }
}

/// Splits `Name %% key=value` into a name and a description.
///
/// A `key=value` description is stored as a one-entry JSON object. `/` is
/// not allowed in stored column names and becomes `\`.
pub fn parse_header_cell(raw: &str, position: usize) -> Result<(String, Option<String>)> {
    let (name, description) = match raw.split_once(DESCRIPTION_SEPARATOR) {
        Some((name, description)) => {
            let description = description.trim();
            let description = match description.split_once('=') {
                Some((key, value)) => {
                    let key = key.trim();
                    serde_json::json!({ key: value.trim() }).to_string()
                }
                None => description.to_string(),
            };
            (name.trim(), Some(description).filter(|d| !d.is_empty()))
        }
        None => (raw.trim(), None),
    };
    if name.is_empty() {
        return Err(PopulateError::EmptyColumnHeader {
            position: position + 1,
        });
    }
    Ok((name.replace('/', "\\"), description))
}

pub fn parse_type_tokens(tokens: &[String]) -> Result<Vec<ColumnKind>> {
    tokens.iter().map(|t| t.parse::<ColumnKind>()).collect()
}

/// Fixes every column kind that does not need data, and the derived columns.
pub fn resolve_header(
    headers: &[String],
    directive: Option<&[ColumnKind]>,
    manual_headers: bool,
    target: ContainerKind,
) -> Result<HeaderPlan> {
    if let Some(kinds) = directive
        && kinds.len() != headers.len()
    {
        return Err(PopulateError::DirectiveArity {
            expected: headers.len(),
            found: kinds.len(),
        });
    }
    if headers.len() > MAX_COLUMN_COUNT {
        warn!(
            "Column count {} exceeds max column count {MAX_COLUMN_COUNT}",
            headers.len()
        );
    }

    let cells = headers
        .iter()
        .enumerate()
        .map(|(position, raw)| parse_header_cell(raw, position))
        .collect::<Result<Vec<_>>>()?;
    let heuristics = name_heuristics(&cells, target);

    let mut columns = Vec::with_capacity(headers.len());
    for (position, (mut name, description)) in cells.into_iter().enumerate() {
        let (kind, source) = match directive {
            Some(kinds) => (Some(kinds[position]), ColumnSource::ExplicitHeader),
            None => match heuristics[position] {
                Some(kind) => (Some(kind), ColumnSource::NameHeuristic),
                None if manual_headers => (Some(ColumnKind::String), ColumnSource::Default),
                None => (None, ColumnSource::Inferred),
            },
        };
        let role = role_for(&name, kind);
        if let ColumnRole::Reference(entity) = role {
            name = entity.as_str().to_string();
        }
        debug!("Column '{name}' at {position}: {kind:?} ({source:?}, {role:?})");
        columns.push(ColumnPlan {
            position,
            name,
            description,
            kind,
            source,
            role,
            required: false,
        });
    }

    check_conflicts(&columns)?;
    let derived = plan_derived(&columns);
    Ok(HeaderPlan { columns, derived })
}

/// Heuristic kind per column.
///
/// A `Plate Name` / `Well Name` column stays a plain name column when the
/// header already has the matching `Plate` / `Well` reference column.
fn name_heuristics(cells: &[(String, Option<String>)], target: ContainerKind) -> Vec<Option<ColumnKind>> {
    let kinds = cells
        .iter()
        .map(|(name, _)| heuristic_kind_for(name, target))
        .collect::<Vec<_>>();
    cells
        .iter()
        .zip(&kinds)
        .map(|((name, _), kind)| match kind {
            Some(kind @ (ColumnKind::PlateRef | ColumnKind::WellRef))
                if is_name_variant(name)
                    && cells
                        .iter()
                        .zip(&kinds)
                        .any(|((other, _), k)| *k == Some(*kind) && !is_name_variant(other)) =>
            {
                Some(ColumnKind::String)
            }
            other => *other,
        })
        .collect()
}

fn check_conflicts(columns: &[ColumnPlan]) -> Result<()> {
    let has = |role| columns.iter().any(|c| c.role == role);
    if has(ColumnRole::Reference(EntityKind::Well)) && has(ColumnRole::Reference(EntityKind::Image)) {
        return Err(PopulateError::ConflictingColumns {
            first: "Well",
            second: "Image",
        });
    }
    for (idx, column) in columns.iter().enumerate() {
        if columns[..idx].iter().any(|c| c.name == column.name) {
            return Err(PopulateError::DuplicateColumn {
                name: column.name.clone(),
            });
        }
    }
    Ok(())
}

fn complement(role: ColumnRole) -> Option<(String, ColumnKind, EntityKind)> {
    match role {
        ColumnRole::Reference(entity) => Some((
            format!("{} Name", entity.as_str()),
            ColumnKind::String,
            entity,
        )),
        ColumnRole::EntityName(entity @ (EntityKind::Image | EntityKind::Roi)) => {
            let kind = ColumnKind::from_entity(entity)?;
            Some((entity.as_str().to_string(), kind, entity))
        }
        _ => None,
    }
}

fn plan_derived(columns: &[ColumnPlan]) -> Vec<DerivedPlan> {
    let mut taken = columns
        .iter()
        .map(|c| normalize_name(&c.name))
        .collect::<Vec<_>>();
    let mut derived = Vec::new();
    for (trigger, column) in columns.iter().enumerate() {
        let Some((name, kind, entity)) = complement(column.role) else {
            continue;
        };
        let key = normalize_name(&name);
        if taken.contains(&key) {
            debug!("Not appending '{name}': column already present");
            continue;
        }
        taken.push(key);
        derived.push(DerivedPlan {
            name,
            kind,
            entity,
            trigger,
        });
    }
    derived
}

/// Type tokens the automatic policy picks for every column of a CSV source.
///
/// An explicit `# header` row wins; otherwise name heuristics apply and the
/// remaining columns are inferred from a full scan.
pub fn detect_header_tokens<R: Read>(stream: &mut RowStream<R>) -> Result<Vec<String>> {
    let preamble = stream.read_preamble()?;
    if let Some(tokens) = preamble.directive {
        let kinds = parse_type_tokens(&tokens)?;
        if kinds.len() != preamble.headers.len() {
            return Err(PopulateError::DirectiveArity {
                expected: preamble.headers.len(),
                found: kinds.len(),
            });
        }
        return Ok(kinds.iter().map(|k| k.token().to_string()).collect());
    }

    let known = preamble
        .headers
        .iter()
        .enumerate()
        .map(|(position, raw)| parse_header_cell(raw, position).map(|(name, _)| heuristic_kind(&name)))
        .collect::<Result<Vec<_>>>()?;
    let mut candidates = vec![KindCandidate::default(); known.len()];
    for row in stream.by_ref() {
        let row = row?;
        for (idx, candidate) in candidates.iter_mut().enumerate() {
            if known[idx].is_none() {
                candidate.update(row.field(idx));
            }
        }
    }
    Ok(known
        .iter()
        .zip(&candidates)
        .map(|(kind, candidate)| kind.unwrap_or_else(|| candidate.decide()).token().to_string())
        .collect())
}
