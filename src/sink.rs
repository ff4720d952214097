//! Persistence handoff.
//!
//! [`TableSink`] is the contract of the store that keeps finished tables and
//! links them to their container. [`CsvTableSink`] is the local
//! implementation: the table goes to a CSV file whose first row is a
//! `# header` directive, and the annotation metadata goes to a JSON manifest
//! next to it.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::{debug, info};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::builder::RoiLink;
use crate::entity::Target;
use crate::populate::PopulatedTable;
use crate::rows::HEADER_DIRECTIVE_SENTINEL;
use crate::table::{ColumnSpec, Table};

/// Namespace under which bulk annotation tables are linked.
pub const BULK_ANNOTATION_NS: &str = "openmicroscopy.org/omero/bulk_annotations";

const MANIFEST_SUFFIX: &str = "annotation.json";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode table rows: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to encode annotation manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("refusing to persist table '{0}' without columns")]
    EmptyTable(String),
}

/// Everything the store needs to save a table and link it.
#[derive(Debug, Clone, Copy)]
pub struct AnnotationRequest<'a> {
    pub table_name: &'a str,
    pub namespace: &'static str,
    pub target: Target,
    pub table: &'a Table,
    pub linkage: &'a [RoiLink],
}

impl<'a> AnnotationRequest<'a> {
    pub fn new(populated: &'a PopulatedTable) -> Self {
        Self {
            table_name: &populated.table_name,
            namespace: BULK_ANNOTATION_NS,
            target: populated.target,
            table: &populated.table,
            linkage: &populated.linkage,
        }
    }
}

/// Receipt for a persisted table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableHandle {
    pub location: PathBuf,
    pub sha256: String,
    pub rows: usize,
    pub columns: usize,
    pub created_at: DateTime<Utc>,
}

pub trait TableSink {
    fn persist(&mut self, request: &AnnotationRequest<'_>) -> Result<TableHandle, SinkError>;
}

#[derive(Serialize)]
struct ManifestColumn<'a> {
    #[serde(flatten)]
    spec: &'a ColumnSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<usize>,
}

#[derive(Serialize)]
struct ManifestLink {
    row: usize,
    roi: Option<i64>,
    shape: Option<i64>,
}

#[derive(Serialize)]
struct Manifest<'a> {
    table_name: &'a str,
    namespace: &'a str,
    target: String,
    rows: usize,
    columns: Vec<ManifestColumn<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    linkage: Vec<ManifestLink>,
    sha256: &'a str,
    created_at: DateTime<Utc>,
}

pub struct CsvTableSink {
    output: PathBuf,
}

impl CsvTableSink {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }

    /// Path of the JSON manifest written next to the table.
    pub fn manifest_path(&self) -> PathBuf {
        manifest_path_for(&self.output)
    }
}

pub fn manifest_path_for(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(MANIFEST_SUFFIX);
    output.with_file_name(name)
}

/// Serializes a table as CSV, directive row first.
pub fn encode_table(table: &Table) -> Result<Vec<u8>, SinkError> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(false)
        .from_writer(Vec::new());
    let tokens = table.columns().iter().map(|c| c.kind().token()).collect_vec();
    let mut directive = tokens.iter().map(|t| t.to_string()).collect_vec();
    if let Some(first) = directive.first_mut() {
        *first = format!("{HEADER_DIRECTIVE_SENTINEL} {first}");
    }
    writer.write_record(&directive)?;
    writer.write_record(table.headers())?;
    for row in 0..table.row_count() {
        let cells = table
            .columns()
            .iter()
            .map(|c| c.value(row).map(|v| v.to_string()).unwrap_or_default())
            .collect_vec();
        writer.write_record(&cells)?;
    }
    writer
        .into_inner()
        .map_err(|err| SinkError::Csv(err.into_error().into()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .join("")
}

impl TableSink for CsvTableSink {
    fn persist(&mut self, request: &AnnotationRequest<'_>) -> Result<TableHandle, SinkError> {
        let table = request.table;
        if table.column_count() == 0 {
            return Err(SinkError::EmptyTable(request.table_name.to_string()));
        }
        let bytes = encode_table(table)?;
        let sha256 = sha256_hex(&bytes);
        fs::write(&self.output, &bytes).map_err(|source| SinkError::Io {
            path: self.output.clone(),
            source,
        })?;
        debug!("Wrote {} byte(s) to {:?}", bytes.len(), self.output);

        let created_at = Utc::now();
        let manifest = Manifest {
            table_name: request.table_name,
            namespace: request.namespace,
            target: request.target.to_string(),
            rows: table.row_count(),
            columns: table
                .columns()
                .iter()
                .map(|c| ManifestColumn {
                    spec: &c.spec,
                    size: c.size(),
                })
                .collect(),
            linkage: request
                .linkage
                .iter()
                .map(|l| ManifestLink {
                    row: l.row,
                    roi: l.roi,
                    shape: l.shape,
                })
                .collect(),
            sha256: &sha256,
            created_at,
        };
        let manifest_path = self.manifest_path();
        let json = serde_json::to_vec_pretty(&manifest)?;
        fs::write(&manifest_path, json).map_err(|source| SinkError::Io {
            path: manifest_path.clone(),
            source,
        })?;
        info!(
            "Table '{}' linked to {} under {} ({:?})",
            request.table_name, request.target, request.namespace, manifest_path
        );

        Ok(TableHandle {
            location: self.output.clone(),
            sha256,
            rows: table.row_count(),
            columns: table.column_count(),
            created_at,
        })
    }
}
