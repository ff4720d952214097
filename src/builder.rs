//! Column-major accumulation of typed, resolved rows.
//!
//! [`TableBuilder`] takes one [`RawRow`] at a time. Reference columns are
//! resolved through the run's [`EntityResolver`], scalar columns are coerced
//! under their declared kind, and columns still waiting for inference keep
//! their raw text. [`TableBuilder::finish`] types the deferred columns and
//! appends the derived columns in trigger order.

use log::{debug, warn};

use crate::data::{TypedValue, coerce_scalar, parse_long, parse_well_axis};
use crate::directive::{ColumnPlan, ColumnRole, HeaderPlan};
use crate::entity::{
    ContainerKind, EntityKind, EntityReference, HierarchyResolver, Scope, Target,
};
use crate::error::{PopulateError, Result, UnresolvedCause};
use crate::infer::{infer_kind, materialize};
use crate::resolver::EntityResolver;
use crate::rows::RawRow;
use crate::table::{Column, ColumnData, ColumnKind, ColumnSource, ColumnSpec, Table};

/// One table row's ROI and shape, for linking shapes to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiLink {
    /// 0-based table row.
    pub row: usize,
    pub roi: Option<i64>,
    pub shape: Option<i64>,
}

/// A reference cell that was left unresolved without failing the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedCell {
    pub row: usize,
    pub column: String,
    pub entity: EntityKind,
    pub value: String,
    pub cause: UnresolvedCause,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltTable {
    pub table: Table,
    pub linkage: Vec<RoiLink>,
    pub unresolved: Vec<UnresolvedCell>,
    /// Columns typed by inference, with the kind picked for each.
    pub inferred: Vec<(String, ColumnKind)>,
    pub derived: Vec<String>,
}

enum ColumnBuffer {
    Typed { kind: ColumnKind, data: ColumnData },
    Deferred { values: Vec<String>, rows: Vec<usize> },
}

enum Staged {
    Value(TypedValue),
    Raw,
}

pub struct TableBuilder {
    plan: HeaderPlan,
    target: Target,
    allow_nan: bool,
    buffers: Vec<ColumnBuffer>,
    derived: Vec<Vec<EntityReference>>,
    track_links: bool,
    linkage: Vec<RoiLink>,
    unresolved: Vec<UnresolvedCell>,
    rows: usize,
}

impl TableBuilder {
    pub fn new(plan: HeaderPlan, target: Target, allow_nan: bool) -> Self {
        let buffers = plan
            .columns
            .iter()
            .map(|column| match column.kind {
                Some(kind) => ColumnBuffer::Typed {
                    kind,
                    data: ColumnData::empty(kind),
                },
                None => ColumnBuffer::Deferred {
                    values: Vec::new(),
                    rows: Vec::new(),
                },
            })
            .collect();
        let derived = vec![Vec::new(); plan.derived.len()];
        let track_links = plan.has_role(ColumnRole::Reference(EntityKind::Roi))
            || plan.has_role(ColumnRole::EntityName(EntityKind::Roi))
            || plan.has_role(ColumnRole::Shape);
        Self {
            plan,
            target,
            allow_nan,
            buffers,
            derived,
            track_links,
            linkage: Vec::new(),
            unresolved: Vec::new(),
            rows: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn plan(&self) -> &HeaderPlan {
        &self.plan
    }

    /// Resolves, coerces and appends one row. Nothing is appended on error.
    pub fn push_row<H: HierarchyResolver>(
        &mut self,
        row: &RawRow,
        resolver: &mut EntityResolver<H>,
    ) -> Result<()> {
        let mut pending = Vec::new();
        let refs = self.resolve_references(row, resolver, &mut pending)?;

        let mut staged = Vec::with_capacity(self.plan.columns.len());
        for ((idx, column), buffer) in self.plan.columns.iter().enumerate().zip(&self.buffers) {
            let raw = row.field(idx);
            let cell = match buffer {
                ColumnBuffer::Deferred { .. } => Staged::Raw,
                ColumnBuffer::Typed { kind, data } => {
                    match typed_cell(column, *kind, raw, refs[idx].as_ref(), self.allow_nan) {
                        Some(value) if data.accepts(&value) => Staged::Value(value),
                        _ => return Err(coercion_error(row.index, column, *kind, raw)),
                    }
                }
            };
            staged.push(cell);
        }

        let link = self.track_links.then(|| RoiLink {
            row: self.rows,
            roi: self
                .reference_for(&refs, ColumnRole::Reference(EntityKind::Roi))
                .or_else(|| self.reference_for(&refs, ColumnRole::EntityName(EntityKind::Roi)))
                .filter(|r| r.is_resolved())
                .and_then(|r| r.id),
            shape: self.shape_for(row, &refs),
        });

        for ((buffer, cell), column) in self.buffers.iter_mut().zip(staged).zip(&self.plan.columns) {
            match (buffer, cell) {
                (ColumnBuffer::Deferred { values, rows }, _) => {
                    values.push(row.field(column.position).to_string());
                    rows.push(row.index);
                }
                (ColumnBuffer::Typed { data, .. }, Staged::Value(value)) => {
                    data.push(value);
                }
                (ColumnBuffer::Typed { .. }, Staged::Raw) => {}
            }
        }
        for (buffer, plan) in self.derived.iter_mut().zip(&self.plan.derived) {
            let reference = refs[plan.trigger]
                .clone()
                .unwrap_or_else(|| EntityReference::unresolved(plan.entity, UnresolvedCause::Blank));
            buffer.push(reference);
        }
        if let Some(link) = link {
            self.linkage.push(link);
        }
        self.unresolved.extend(pending);
        self.rows += 1;
        Ok(())
    }

    /// Types deferred columns and appends derived columns.
    pub fn finish(self) -> Result<BuiltTable> {
        let mut table = Table::new(self.rows);
        let mut inferred = Vec::new();
        for (column, buffer) in self.plan.columns.iter().zip(self.buffers) {
            let (kind, source, data) = match buffer {
                ColumnBuffer::Typed { kind, data } => (kind, column.source, data),
                ColumnBuffer::Deferred { values, rows } => {
                    let kind = infer_kind(values.iter().map(String::as_str));
                    debug!("Inferred '{}' as {kind}", column.name);
                    let data = materialize(&column.name, kind, &values, &rows, self.allow_nan)?;
                    inferred.push((column.name.clone(), kind));
                    (kind, ColumnSource::Inferred, data)
                }
            };
            table.push_column(Column {
                spec: ColumnSpec {
                    name: column.name.clone(),
                    kind,
                    source,
                    description: column.description.clone(),
                },
                data,
            })?;
        }

        let mut derived = Vec::with_capacity(self.plan.derived.len());
        for (plan, references) in self.plan.derived.iter().zip(self.derived) {
            let data = match plan.kind {
                ColumnKind::String => ColumnData::strings(
                    references
                        .iter()
                        .map(|r| r.name_or_blank().to_string())
                        .collect(),
                ),
                _ => ColumnData::Reference(references.iter().map(EntityReference::id_or_sentinel).collect()),
            };
            debug!("Appending derived column '{}'", plan.name);
            table.push_column(Column {
                spec: ColumnSpec {
                    name: plan.name.clone(),
                    kind: plan.kind,
                    source: ColumnSource::Derived,
                    description: None,
                },
                data,
            })?;
            derived.push(plan.name.clone());
        }

        Ok(BuiltTable {
            table,
            linkage: self.linkage,
            unresolved: self.unresolved,
            inferred,
            derived,
        })
    }

    fn reference_for<'a>(
        &self,
        refs: &'a [Option<EntityReference>],
        role: ColumnRole,
    ) -> Option<&'a EntityReference> {
        self.plan.position_of(role).and_then(|idx| refs[idx].as_ref())
    }

    fn shape_for(&self, row: &RawRow, refs: &[Option<EntityReference>]) -> Option<i64> {
        let idx = self.plan.position_of(ColumnRole::Shape)?;
        match &refs[idx] {
            Some(reference) => reference.is_resolved().then_some(reference.id).flatten(),
            None => parse_long(row.field(idx)),
        }
    }

    /// Scope holding the row's wells and plate images.
    fn plate_scope(&self, plate: Option<&EntityReference>) -> Option<Scope> {
        match self.target.kind {
            ContainerKind::Plate => Some(self.target.scope()),
            ContainerKind::Screen => plate
                .filter(|r| r.is_resolved())
                .and_then(|r| r.id)
                .map(|id| Target::new(ContainerKind::Plate, id).scope()),
            _ => None,
        }
    }

    fn image_scope(&self, plate: Option<Scope>, dataset: Option<Scope>) -> Option<Scope> {
        match self.target.kind {
            ContainerKind::Screen | ContainerKind::Plate => plate,
            ContainerKind::Project => dataset,
            ContainerKind::Dataset => Some(self.target.scope()),
            ContainerKind::Image => Some(Scope::Root),
        }
    }

    fn roi_scope(&self) -> Scope {
        match self.target.kind {
            ContainerKind::Image | ContainerKind::Dataset => self.target.scope(),
            _ => Scope::Root,
        }
    }

    /// One resolved reference per source column that takes part in resolution.
    ///
    /// Plates and datasets go first since they scope the other lookups.
    fn resolve_references<H: HierarchyResolver>(
        &self,
        row: &RawRow,
        resolver: &mut EntityResolver<H>,
        pending: &mut Vec<UnresolvedCell>,
    ) -> Result<Vec<Option<EntityReference>>> {
        let mut refs: Vec<Option<EntityReference>> = vec![None; self.plan.columns.len()];
        let target = self.target;

        if let Some(idx) = self.plan.position_of(ColumnRole::Reference(EntityKind::Plate)) {
            let raw = row.field(idx).trim();
            let reference = if target.kind == ContainerKind::Plate
                && resolver
                    .name_for(&Scope::Root, EntityKind::Plate, target.id)?
                    .is_some_and(|name| name == raw)
            {
                EntityReference::resolved(EntityKind::Plate, target.id, raw)
            } else {
                let scope = match target.kind {
                    ContainerKind::Screen => target.scope(),
                    _ => Scope::Root,
                };
                resolver.by_name(&scope, EntityKind::Plate, raw)?
            };
            refs[idx] = Some(self.settle(row, idx, reference, pending)?);
        }
        let plate_scope = self.plate_scope(
            self.plan
                .position_of(ColumnRole::Reference(EntityKind::Plate))
                .and_then(|idx| refs[idx].as_ref()),
        );

        let dataset_lookup = match target.kind {
            ContainerKind::Project => target.scope(),
            _ => Scope::Root,
        };
        if let Some(idx) = self.plan.position_of(ColumnRole::Reference(EntityKind::Dataset)) {
            let reference = resolver.by_id(&dataset_lookup, EntityKind::Dataset, row.field(idx))?;
            refs[idx] = Some(self.settle(row, idx, reference, pending)?);
        } else if target.kind == ContainerKind::Project
            && let Some(idx) = self.plan.position_of(ColumnRole::EntityName(EntityKind::Dataset))
        {
            let reference = resolver.by_name(&dataset_lookup, EntityKind::Dataset, row.field(idx))?;
            refs[idx] = Some(self.settle(row, idx, reference, pending)?);
        }
        let dataset_scope = match target.kind {
            ContainerKind::Project => [
                ColumnRole::Reference(EntityKind::Dataset),
                ColumnRole::EntityName(EntityKind::Dataset),
            ]
            .into_iter()
            .find_map(|role| self.reference_for(&refs, role))
            .filter(|r| r.is_resolved())
            .and_then(|r| r.id)
            .map(|id| Target::new(ContainerKind::Dataset, id).scope()),
            _ => None,
        };

        let image_scope = self.image_scope(plate_scope, dataset_scope);
        let roi_scope = self.roi_scope();
        for idx in 0..self.plan.columns.len() {
            let raw = row.field(idx);
            let reference = match self.plan.columns[idx].role {
                ColumnRole::Reference(EntityKind::Well) => match plate_scope {
                    Some(scope) => resolver.by_name(&scope, EntityKind::Well, raw)?,
                    None => unscoped_name(EntityKind::Well, raw),
                },
                ColumnRole::Reference(EntityKind::Image) => match image_scope {
                    Some(scope) => resolver.by_id(&scope, EntityKind::Image, raw)?,
                    None => unscoped_id(EntityKind::Image, raw),
                },
                ColumnRole::EntityName(EntityKind::Image) => match image_scope {
                    Some(scope) => resolver.by_name(&scope, EntityKind::Image, raw)?,
                    None => unscoped_name(EntityKind::Image, raw),
                },
                ColumnRole::Reference(EntityKind::Roi) => {
                    resolver.by_id(&roi_scope, EntityKind::Roi, raw)?
                }
                ColumnRole::EntityName(EntityKind::Roi) => {
                    resolver.by_name(&roi_scope, EntityKind::Roi, raw)?
                }
                ColumnRole::Shape => resolver.by_id(&roi_scope, EntityKind::Shape, raw)?,
                _ => continue,
            };
            refs[idx] = Some(self.settle(row, idx, reference, pending)?);
        }
        Ok(refs)
    }

    /// Turns an unresolved reference into an error or a recorded omission.
    ///
    /// Only shape ids degrade to `-1` when they do not exist; every other
    /// identifier must be known.
    fn settle(
        &self,
        row: &RawRow,
        idx: usize,
        reference: EntityReference,
        pending: &mut Vec<UnresolvedCell>,
    ) -> Result<EntityReference> {
        let Some(cause) = reference.unresolved else {
            return Ok(reference);
        };
        let column = &self.plan.columns[idx];
        let raw = row.field(idx);
        let entity = reference.kind;
        let degradable = column.role == ColumnRole::Shape
            && (cause != UnresolvedCause::Blank || !column.required);

        match cause {
            UnresolvedCause::InvalidId if !degradable => {
                let kind = column
                    .kind
                    .or_else(|| ColumnKind::from_entity(entity))
                    .unwrap_or(ColumnKind::Long);
                return Err(coercion_error(row.index, column, kind, raw));
            }
            UnresolvedCause::IdNotFound if !degradable => {
                return Err(PopulateError::UnknownIdentifier {
                    row: row.index,
                    column: column.name.clone(),
                    entity,
                    id: reference.id.unwrap_or_default(),
                });
            }
            _ if column.required && !degradable => {
                return Err(PopulateError::UnresolvedRequiredReference {
                    row: row.index,
                    column: column.name.clone(),
                    entity,
                    value: raw.to_string(),
                    cause,
                });
            }
            UnresolvedCause::Blank => {
                debug!("Row {} column '{}': blank {entity} reference", row.index, column.name);
            }
            _ => {
                warn!(
                    "Row {} column '{}': {entity} '{}' left unresolved ({cause})",
                    row.index,
                    column.name,
                    raw.trim()
                );
            }
        }
        pending.push(UnresolvedCell {
            row: row.index,
            column: column.name.clone(),
            entity,
            value: raw.to_string(),
            cause,
        });
        Ok(reference)
    }
}

/// A name reference whose row has no container to look it up in.
///
/// The name is kept so the derived name column still carries it.
fn unscoped_name(entity: EntityKind, raw: &str) -> EntityReference {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return EntityReference::unresolved(entity, UnresolvedCause::Blank);
    }
    EntityReference::partial(entity, None, Some(trimmed.to_string()), UnresolvedCause::MissingScope)
}

fn unscoped_id(entity: EntityKind, raw: &str) -> EntityReference {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return EntityReference::unresolved(entity, UnresolvedCause::Blank);
    }
    match trimmed.parse::<i64>() {
        Ok(id) => EntityReference::partial(entity, Some(id), None, UnresolvedCause::MissingScope),
        Err(_) => EntityReference::unresolved(entity, UnresolvedCause::InvalidId),
    }
}

/// Typed value of a cell under its fixed kind, `None` when it does not decode.
fn typed_cell(
    column: &ColumnPlan,
    kind: ColumnKind,
    raw: &str,
    reference: Option<&EntityReference>,
    allow_nan: bool,
) -> Option<TypedValue> {
    match reference {
        Some(reference) if kind.is_reference() => Some(TypedValue::Reference {
            entity: reference.kind,
            id: reference.id_or_sentinel(),
        }),
        Some(reference) if kind == ColumnKind::Long => {
            Some(TypedValue::Long(reference.id_or_sentinel()))
        }
        None if column.role == ColumnRole::WellAxis => parse_well_axis(raw).map(TypedValue::Long),
        _ => coerce_scalar(raw, kind, allow_nan),
    }
}

fn coercion_error(row: usize, column: &ColumnPlan, kind: ColumnKind, raw: &str) -> PopulateError {
    PopulateError::TypeCoercion {
        row,
        column: column.name.clone(),
        kind,
        value: raw.to_string(),
    }
}
