//! Entity identities and the hierarchy lookup contract.
//!
//! The remote object graph is never traversed here. Everything the engine
//! knows about it goes through [`HierarchyResolver`], a scoped two-way
//! name/identifier lookup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::UnresolvedCause;

/// Kinds of entities that can be referenced from a table or act as a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Screen,
    Plate,
    Well,
    Project,
    Dataset,
    Image,
    Roi,
    Shape,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Screen => "Screen",
            EntityKind::Plate => "Plate",
            EntityKind::Well => "Well",
            EntityKind::Project => "Project",
            EntityKind::Dataset => "Dataset",
            EntityKind::Image => "Image",
            EntityKind::Roi => "Roi",
            EntityKind::Shape => "Shape",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Containers a finished table can be linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContainerKind {
    Screen,
    Plate,
    Project,
    Dataset,
    Image,
}

impl ContainerKind {
    pub fn entity(&self) -> EntityKind {
        match self {
            ContainerKind::Screen => EntityKind::Screen,
            ContainerKind::Plate => EntityKind::Plate,
            ContainerKind::Project => EntityKind::Project,
            ContainerKind::Dataset => EntityKind::Dataset,
            ContainerKind::Image => EntityKind::Image,
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["Screen", "Plate", "Project", "Dataset", "Image"]
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity().as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetParseError {
    #[error("target must look like Kind:id, got '{0}'")]
    Format(String),
    #[error("unsupported target kind '{kind}'. Supported kinds: {supported}")]
    Kind { kind: String, supported: String },
    #[error("invalid target id '{0}'")]
    Id(String),
}

/// A container identity: kind plus numeric id, written `Dataset:42`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub kind: ContainerKind,
    pub id: i64,
}

impl Target {
    pub fn new(kind: ContainerKind, id: i64) -> Self {
        Self { kind, id }
    }

    /// Scope covering the children of this container.
    pub fn scope(&self) -> Scope {
        Scope::Under(*self)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for Target {
    type Err = TargetParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, id) = value
            .trim()
            .split_once(':')
            .ok_or_else(|| TargetParseError::Format(value.to_string()))?;
        let kind = match kind.trim().to_ascii_lowercase().as_str() {
            "screen" => ContainerKind::Screen,
            "plate" => ContainerKind::Plate,
            "project" => ContainerKind::Project,
            "dataset" => ContainerKind::Dataset,
            "image" => ContainerKind::Image,
            other => {
                return Err(TargetParseError::Kind {
                    kind: other.to_string(),
                    supported: ContainerKind::variants().join(", "),
                });
            }
        };
        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|_| TargetParseError::Id(id.to_string()))?;
        Ok(Target { kind, id })
    }
}

/// Where a lookup happens: globally, or among the children of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Root,
    Under(Target),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Root => f.write_str("root"),
            Scope::Under(target) => write!(f, "{target}"),
        }
    }
}

/// A reference to an entity, identified by id, by name, or both.
///
/// After resolution either both sides are known or `unresolved` records why
/// the missing side could not be derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReference {
    pub kind: EntityKind,
    pub id: Option<i64>,
    pub name: Option<String>,
    pub unresolved: Option<UnresolvedCause>,
}

impl EntityReference {
    pub fn resolved(kind: EntityKind, id: i64, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: Some(id),
            name: Some(name.into()),
            unresolved: None,
        }
    }

    pub fn unresolved(kind: EntityKind, cause: UnresolvedCause) -> Self {
        Self {
            kind,
            id: None,
            name: None,
            unresolved: Some(cause),
        }
    }

    /// Keeps whatever side the input supplied when the other side is missing.
    pub fn partial(kind: EntityKind, id: Option<i64>, name: Option<String>, cause: UnresolvedCause) -> Self {
        Self {
            kind,
            id,
            name,
            unresolved: Some(cause),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.unresolved.is_none()
    }

    /// Identifier as stored in a reference column, `-1` when unresolved.
    pub fn id_or_sentinel(&self) -> i64 {
        match (self.unresolved, self.id) {
            (None, Some(id)) => id,
            _ => UNRESOLVED_ID,
        }
    }

    /// Name as stored in a name column, empty when unknown.
    pub fn name_or_blank(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// Identifier recorded for references that could not be resolved.
pub const UNRESOLVED_ID: i64 = -1;

#[derive(Debug, Error)]
pub enum HierarchyError {
    /// More than one entity answers to the same name in the scope.
    #[error("{kind} name '{name}' is ambiguous in {scope}")]
    Ambiguous {
        kind: EntityKind,
        name: String,
        scope: Scope,
    },

    /// The hierarchy does not support this kind of lookup.
    #[error("cannot look up {kind} in {scope}")]
    UnsupportedScope { kind: EntityKind, scope: Scope },

    /// The hierarchy description could not be loaded.
    #[error("failed to load hierarchy from {path}: {reason}")]
    Load { path: String, reason: String },

    /// Transport-level failure of a remote hierarchy.
    #[error("hierarchy service unavailable: {0}")]
    Unavailable(String),
}

/// Read-only, scoped name/identifier lookup against the external hierarchy.
///
/// `Ok(None)` means "not found in this scope"; entities that exist but carry
/// no name (ROIs, shapes) resolve to an empty name.
pub trait HierarchyResolver {
    fn resolve_id(&self, scope: &Scope, kind: EntityKind, name: &str) -> Result<Option<i64>, HierarchyError>;

    fn resolve_name(&self, scope: &Scope, kind: EntityKind, id: i64) -> Result<Option<String>, HierarchyError>;
}

impl<T: HierarchyResolver + ?Sized> HierarchyResolver for &T {
    fn resolve_id(&self, scope: &Scope, kind: EntityKind, name: &str) -> Result<Option<i64>, HierarchyError> {
        (**self).resolve_id(scope, kind, name)
    }

    fn resolve_name(&self, scope: &Scope, kind: EntityKind, id: i64) -> Result<Option<String>, HierarchyError> {
        (**self).resolve_name(scope, kind, id)
    }
}
