//! Population orchestration.
//!
//! One [`populate`] call owns a [`PopulationContext`] for its whole run and
//! walks it through `Init → HeaderResolved → Streaming → Finalizing → Done`.
//! Any error moves the context to `Failed` and no table leaves the run.

use std::fmt;
use std::io::Read;
use std::path::Path;

use encoding_rs::{Encoding, UTF_8};
use log::{debug, info};

use crate::builder::{RoiLink, TableBuilder, UnresolvedCell};
use crate::directive::{self, ColumnRole, HeaderPlan};
use crate::entity::{ContainerKind, EntityKind, HierarchyResolver, Scope, Target};
use crate::error::{PopulateError, Result};
use crate::io_utils;
use crate::resolver::EntityResolver;
use crate::rows::{RawRow, RowStream};
use crate::table::{ColumnKind, ColumnSource, Table};

pub const DEFAULT_TABLE_NAME: &str = "bulk_annotations";

#[derive(Debug, Clone)]
pub struct PopulateOptions {
    /// Suppress inference; undeclared, unrecognized columns become strings.
    pub manual_headers: bool,
    /// Substitute NaN for empty or unparseable double cells.
    pub allow_nan: bool,
    pub table_name: String,
    /// Type tokens supplied out of band; they win over a `# header` row.
    pub column_types: Option<Vec<String>>,
    pub encoding: &'static Encoding,
}

impl Default for PopulateOptions {
    fn default() -> Self {
        Self {
            manual_headers: false,
            allow_nan: false,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            column_types: None,
            encoding: UTF_8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulationState {
    Init,
    HeaderResolved,
    Streaming,
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for PopulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PopulationState::Init => "init",
            PopulationState::HeaderResolved => "header-resolved",
            PopulationState::Streaming => "streaming",
            PopulationState::Finalizing => "finalizing",
            PopulationState::Done => "done",
            PopulationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a successful run did, for the user-facing summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulationReport {
    pub rows: usize,
    /// Rows dropped because they belong to another container.
    pub filtered_rows: usize,
    pub blank_rows: usize,
    pub columns: usize,
    /// Columns typed without an explicit directive, with how they were typed.
    pub auto_detected: Vec<(String, ColumnKind, ColumnSource)>,
    pub derived: Vec<String>,
    pub unresolved: Vec<UnresolvedCell>,
    pub external_lookups: usize,
    pub memo_hits: usize,
}

/// A finished table, ready for the persistence sink.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulatedTable {
    pub target: Target,
    pub target_name: String,
    pub table_name: String,
    pub table: Table,
    pub linkage: Vec<RoiLink>,
    pub report: PopulationReport,
}

/// Only rows whose `column` equals `expected` belong to the target.
struct RowFilter {
    column: usize,
    expected: String,
}

impl RowFilter {
    fn keeps(&self, row: &RawRow) -> bool {
        row.field(self.column).trim() == self.expected
    }
}

pub struct PopulationContext<'o, H> {
    target: Target,
    options: &'o PopulateOptions,
    resolver: EntityResolver<H>,
    state: PopulationState,
}

impl<'o, H: HierarchyResolver> PopulationContext<'o, H> {
    pub fn new(target: Target, hierarchy: H, options: &'o PopulateOptions) -> Self {
        Self {
            target,
            options,
            resolver: EntityResolver::new(hierarchy),
            state: PopulationState::Init,
        }
    }

    pub fn state(&self) -> PopulationState {
        self.state
    }

    pub fn resolver(&self) -> &EntityResolver<H> {
        &self.resolver
    }

    fn transition(&mut self, next: PopulationState) {
        debug!("Population of {}: {} -> {next}", self.target, self.state);
        self.state = next;
    }

    /// Runs the whole pipeline over `stream`.
    pub fn run<R: Read>(&mut self, stream: RowStream<R>) -> Result<PopulatedTable> {
        let result = self.run_inner(stream);
        if result.is_err() {
            self.transition(PopulationState::Failed);
        }
        result
    }

    fn run_inner<R: Read>(&mut self, mut stream: RowStream<R>) -> Result<PopulatedTable> {
        let target = self.target;
        let target_name = self
            .resolver
            .name_for(&Scope::Root, target.kind.entity(), target.id)?
            .ok_or(PopulateError::TargetNotFound {
                kind: target.kind,
                id: target.id,
            })?;

        let preamble = stream.read_preamble()?;
        let tokens = self
            .options
            .column_types
            .as_ref()
            .or(preamble.directive.as_ref());
        let kinds = tokens
            .map(|tokens| directive::parse_type_tokens(tokens))
            .transpose()?;
        let mut plan =
            directive::resolve_header(&preamble.headers, kinds.as_deref(), self.options.manual_headers, target.kind)?;
        apply_requirements(&mut plan, target.kind)?;
        let filter = row_filter(&plan, target.kind, &target_name);
        self.transition(PopulationState::HeaderResolved);

        let deferred = plan.deferred_columns();
        if !deferred.is_empty() {
            debug!("Deferring kind of {deferred:?} until all rows are read");
        }
        let mut builder = TableBuilder::new(plan, target, self.options.allow_nan);
        let mut filtered_rows = 0;
        self.transition(PopulationState::Streaming);
        for row in stream.by_ref() {
            let row = row?;
            if let Some(filter) = &filter
                && !filter.keeps(&row)
            {
                filtered_rows += 1;
                continue;
            }
            builder.push_row(&row, &mut self.resolver)?;
        }

        self.transition(PopulationState::Finalizing);
        let auto_detected = builder
            .plan()
            .columns
            .iter()
            .filter(|c| c.source != ColumnSource::ExplicitHeader)
            .filter_map(|c| c.kind.map(|kind| (c.name.clone(), kind, c.source)))
            .collect::<Vec<_>>();
        let built = builder.finish()?;
        let mut auto_detected = auto_detected;
        auto_detected.extend(
            built
                .inferred
                .iter()
                .map(|(name, kind)| (name.clone(), *kind, ColumnSource::Inferred)),
        );

        let report = PopulationReport {
            rows: built.table.row_count(),
            filtered_rows,
            blank_rows: stream.blank_rows_skipped(),
            columns: built.table.column_count(),
            auto_detected,
            derived: built.derived,
            unresolved: built.unresolved,
            external_lookups: self.resolver.external_lookups(),
            memo_hits: self.resolver.memo_hits(),
        };
        self.transition(PopulationState::Done);
        Ok(PopulatedTable {
            target,
            target_name,
            table_name: self.options.table_name.clone(),
            table: built.table,
            linkage: built.linkage,
            report,
        })
    }
}

/// Marks the columns the target kind links through, failing when absent.
pub fn apply_requirements(plan: &mut HeaderPlan, kind: ContainerKind) -> Result<()> {
    use ColumnRole::{EntityName, Reference, Shape};
    use EntityKind::{Dataset, Image, Plate, Roi, Well};

    let missing = |requirement| PopulateError::MissingRequiredColumn {
        target: kind,
        requirement,
    };
    match kind {
        ContainerKind::Screen => {
            let plate = require(plan, &[Reference(Plate)]);
            let well = require(plan, &[Reference(Well)]);
            if !(plate && well) {
                return Err(missing("a Plate and a Well column"));
            }
        }
        ContainerKind::Plate => {
            if !require(plan, &[Reference(Well)]) {
                return Err(missing("a Well column"));
            }
        }
        ContainerKind::Project => {
            let dataset = require(plan, &[Reference(Dataset), EntityName(Dataset)]);
            let image = require(plan, &[Reference(Image), EntityName(Image)]);
            if !(dataset && image) {
                return Err(missing("Dataset and Image identifying columns"));
            }
        }
        ContainerKind::Dataset => {
            let roles = [
                Reference(Image),
                EntityName(Image),
                Reference(Roi),
                EntityName(Roi),
                Shape,
            ];
            if !require(plan, &roles) {
                return Err(missing("an Image, Roi or Shape identifying column"));
            }
        }
        ContainerKind::Image => {
            if !require(plan, &[Reference(Roi), EntityName(Roi), Shape]) {
                return Err(missing("a Roi or Shape identifying column"));
            }
        }
    }
    Ok(())
}

/// Marks the first column carrying any of `roles`, in preference order.
fn require(plan: &mut HeaderPlan, roles: &[ColumnRole]) -> bool {
    match roles.iter().find_map(|role| plan.position_of(*role)) {
        Some(idx) => {
            debug!("Column '{}' is required", plan.columns[idx].name);
            plan.columns[idx].required = true;
            true
        }
        None => false,
    }
}

fn row_filter(plan: &HeaderPlan, kind: ContainerKind, target_name: &str) -> Option<RowFilter> {
    let role = match kind {
        ContainerKind::Plate => ColumnRole::Reference(EntityKind::Plate),
        ContainerKind::Dataset => ColumnRole::EntityName(EntityKind::Dataset),
        _ => return None,
    };
    plan.position_of(role).map(|column| RowFilter {
        column,
        expected: target_name.to_string(),
    })
}

/// Builds the table for `target` from a CSV row stream.
pub fn populate<R, H>(
    stream: RowStream<R>,
    target: Target,
    hierarchy: H,
    options: &PopulateOptions,
) -> Result<PopulatedTable>
where
    R: Read,
    H: HierarchyResolver,
{
    let mut context = PopulationContext::new(target, hierarchy, options);
    let populated = context.run(stream)?;
    let report = &populated.report;
    info!(
        "Populated {} row(s) x {} column(s) for {target} ({} blank, {} filtered)",
        report.rows, report.columns, report.blank_rows, report.filtered_rows
    );
    if !report.auto_detected.is_empty() {
        info!(
            "Auto-detected columns: {}",
            report
                .auto_detected
                .iter()
                .map(|(name, kind, _)| format!("{name}:{kind}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    if !report.derived.is_empty() {
        info!("Derived columns: {}", report.derived.join(", "));
    }
    debug!(
        "Hierarchy lookups: {} external, {} memoized",
        report.external_lookups, report.memo_hits
    );
    Ok(populated)
}

/// Opens `path` (`-` for stdin) with the configured encoding and populates.
pub fn populate_path<H: HierarchyResolver>(
    path: &Path,
    target: Target,
    hierarchy: H,
    options: &PopulateOptions,
) -> Result<PopulatedTable> {
    let reader = io_utils::open_csv_reader_from_path(path)?;
    populate(RowStream::new(reader, options.encoding), target, hierarchy, options)
}
