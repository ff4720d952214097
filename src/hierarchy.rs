//! In-memory hierarchy snapshot.
//!
//! Stands in for the remote directory service: the CLI loads one from a
//! YAML or JSON file, tests build one with the `with_*` methods.
//!
//! ```yaml
//! screens:
//!   - { id: 1, name: screen1, plates: [10] }
//! plates:
//!   - id: 10
//!     name: plate1
//!     wells:
//!       - { id: 100, position: A1, images: [1000] }
//! images:
//!   - id: 1000
//!     name: img
//!     rois:
//!       - { id: 7, name: nucleus, shapes: [70, 71] }
//! ```

use std::cell::Cell;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::normalize_well_name;
use crate::entity::{ContainerKind, EntityKind, HierarchyError, HierarchyResolver, Scope, Target};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchySnapshot {
    #[serde(default)]
    pub screens: Vec<ScreenNode>,
    #[serde(default)]
    pub plates: Vec<PlateNode>,
    #[serde(default)]
    pub projects: Vec<ProjectNode>,
    #[serde(default)]
    pub datasets: Vec<DatasetNode>,
    #[serde(default)]
    pub images: Vec<ImageNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenNode {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub plates: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateNode {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub wells: Vec<WellNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellNode {
    pub id: i64,
    /// Position such as `B7`.
    pub position: String,
    #[serde(default)]
    pub images: Vec<i64>,
}

impl WellNode {
    fn name(&self) -> String {
        normalize_well_name(&self.position).unwrap_or_else(|| self.position.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectNode {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub datasets: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetNode {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub images: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageNode {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub rois: Vec<RoiNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiNode {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub shapes: Vec<i64>,
}

/// A [`HierarchyResolver`] over a [`HierarchySnapshot`].
#[derive(Debug, Default)]
pub struct InMemoryHierarchy {
    snapshot: HierarchySnapshot,
    calls: Cell<usize>,
}

impl InMemoryHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: HierarchySnapshot) -> Self {
        Self {
            snapshot,
            calls: Cell::new(0),
        }
    }

    /// Loads a snapshot, YAML or JSON by file extension.
    pub fn load(path: &Path) -> Result<Self, HierarchyError> {
        let load_error = |reason: String| HierarchyError::Load {
            path: path.display().to_string(),
            reason,
        };
        let raw = fs::read_to_string(path).map_err(|err| load_error(err.to_string()))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let snapshot: HierarchySnapshot = match extension.as_deref() {
            Some("json") => {
                serde_json::from_str(&raw).map_err(|err| load_error(err.to_string()))?
            }
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&raw).map_err(|err| load_error(err.to_string()))?
            }
            _ => return Err(load_error("expected a .yaml, .yml or .json file".to_string())),
        };
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn snapshot(&self) -> &HierarchySnapshot {
        &self.snapshot
    }

    /// Number of lookups served so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn with_screen(mut self, id: i64, name: &str, plates: &[i64]) -> Self {
        self.snapshot.screens.push(ScreenNode {
            id,
            name: name.to_string(),
            plates: plates.to_vec(),
        });
        self
    }

    pub fn with_plate(mut self, id: i64, name: &str) -> Self {
        self.snapshot.plates.push(PlateNode {
            id,
            name: name.to_string(),
            wells: Vec::new(),
        });
        self
    }

    /// Adds a well to an existing plate.
    pub fn with_well(mut self, plate: i64, id: i64, position: &str) -> Self {
        if let Some(node) = self.snapshot.plates.iter_mut().find(|p| p.id == plate) {
            node.wells.push(WellNode {
                id,
                position: position.to_string(),
                images: Vec::new(),
            });
        }
        self
    }

    /// Adds an image acquired in an existing well.
    pub fn with_well_image(mut self, well: i64, id: i64, name: &str) -> Self {
        let node = self
            .snapshot
            .plates
            .iter_mut()
            .flat_map(|p| p.wells.iter_mut())
            .find(|w| w.id == well);
        if let Some(node) = node {
            node.images.push(id);
        }
        self.with_image(id, name, None)
    }

    pub fn with_project(mut self, id: i64, name: &str, datasets: &[i64]) -> Self {
        self.snapshot.projects.push(ProjectNode {
            id,
            name: name.to_string(),
            datasets: datasets.to_vec(),
        });
        self
    }

    pub fn with_dataset(mut self, id: i64, name: &str) -> Self {
        self.snapshot.datasets.push(DatasetNode {
            id,
            name: name.to_string(),
            images: Vec::new(),
        });
        self
    }

    /// Adds an image, linked into `dataset` when given.
    pub fn with_image(mut self, id: i64, name: &str, dataset: Option<i64>) -> Self {
        if let Some(dataset) = dataset
            && let Some(node) = self.snapshot.datasets.iter_mut().find(|d| d.id == dataset)
        {
            node.images.push(id);
        }
        if !self.snapshot.images.iter().any(|i| i.id == id) {
            self.snapshot.images.push(ImageNode {
                id,
                name: name.to_string(),
                rois: Vec::new(),
            });
        }
        self
    }

    pub fn with_roi(mut self, image: i64, id: i64, name: Option<&str>) -> Self {
        if let Some(node) = self.snapshot.images.iter_mut().find(|i| i.id == image) {
            node.rois.push(RoiNode {
                id,
                name: name.map(str::to_string),
                shapes: Vec::new(),
            });
        }
        self
    }

    pub fn with_shape(mut self, roi: i64, id: i64) -> Self {
        let node = self
            .snapshot
            .images
            .iter_mut()
            .flat_map(|i| i.rois.iter_mut())
            .find(|r| r.id == roi);
        if let Some(node) = node {
            node.shapes.push(id);
        }
        self
    }

    fn image_nodes<'a>(&'a self, ids: &'a [i64]) -> impl Iterator<Item = &'a ImageNode> + 'a {
        self.snapshot
            .images
            .iter()
            .filter(move |image| ids.contains(&image.id))
    }

    fn images_in(&self, target: &Target) -> Vec<&ImageNode> {
        let s = &self.snapshot;
        match target.kind {
            ContainerKind::Dataset => s
                .datasets
                .iter()
                .filter(|d| d.id == target.id)
                .flat_map(|d| self.image_nodes(&d.images))
                .collect(),
            ContainerKind::Project => s
                .projects
                .iter()
                .filter(|p| p.id == target.id)
                .flat_map(|p| s.datasets.iter().filter(move |d| p.datasets.contains(&d.id)))
                .flat_map(|d| self.image_nodes(&d.images))
                .collect(),
            ContainerKind::Plate => s
                .plates
                .iter()
                .filter(|p| p.id == target.id)
                .flat_map(|p| p.wells.iter())
                .flat_map(|w| self.image_nodes(&w.images))
                .collect(),
            ContainerKind::Image => s.images.iter().filter(|i| i.id == target.id).collect(),
            ContainerKind::Screen => Vec::new(),
        }
    }

    /// `(id, name)` of every `kind` entity directly visible in `scope`.
    fn members(&self, scope: &Scope, kind: EntityKind) -> Result<Vec<(i64, String)>, HierarchyError> {
        let s = &self.snapshot;
        let named = |id: i64, name: &str| (id, name.to_string());
        let rois = |images: Vec<&ImageNode>| -> Vec<(i64, String)> {
            images
                .into_iter()
                .flat_map(|i| i.rois.iter())
                .map(|r| (r.id, r.name.clone().unwrap_or_default()))
                .collect()
        };
        let shapes = |images: Vec<&ImageNode>| -> Vec<(i64, String)> {
            images
                .into_iter()
                .flat_map(|i| i.rois.iter())
                .flat_map(|r| r.shapes.iter())
                .map(|id| (*id, String::new()))
                .collect()
        };
        let found = match (scope, kind) {
            (Scope::Root, EntityKind::Screen) => s.screens.iter().map(|x| named(x.id, &x.name)).collect(),
            (Scope::Root, EntityKind::Plate) => s.plates.iter().map(|x| named(x.id, &x.name)).collect(),
            (Scope::Root, EntityKind::Project) => s.projects.iter().map(|x| named(x.id, &x.name)).collect(),
            (Scope::Root, EntityKind::Dataset) => s.datasets.iter().map(|x| named(x.id, &x.name)).collect(),
            (Scope::Root, EntityKind::Image) => s.images.iter().map(|x| named(x.id, &x.name)).collect(),
            (Scope::Root, EntityKind::Roi) => rois(s.images.iter().collect()),
            (Scope::Root, EntityKind::Shape) => shapes(s.images.iter().collect()),
            (Scope::Under(t), EntityKind::Plate) if t.kind == ContainerKind::Screen => s
                .screens
                .iter()
                .filter(|screen| screen.id == t.id)
                .flat_map(|screen| s.plates.iter().filter(move |p| screen.plates.contains(&p.id)))
                .map(|p| named(p.id, &p.name))
                .collect(),
            (Scope::Under(t), EntityKind::Well) if t.kind == ContainerKind::Plate => s
                .plates
                .iter()
                .filter(|p| p.id == t.id)
                .flat_map(|p| p.wells.iter())
                .map(|w| (w.id, w.name()))
                .collect(),
            (Scope::Under(t), EntityKind::Dataset) if t.kind == ContainerKind::Project => s
                .projects
                .iter()
                .filter(|p| p.id == t.id)
                .flat_map(|p| s.datasets.iter().filter(move |d| p.datasets.contains(&d.id)))
                .map(|d| named(d.id, &d.name))
                .collect(),
            (Scope::Under(t), EntityKind::Image)
                if matches!(
                    t.kind,
                    ContainerKind::Plate | ContainerKind::Project | ContainerKind::Dataset
                ) =>
            {
                self.images_in(t)
                    .into_iter()
                    .map(|i| named(i.id, &i.name))
                    .collect()
            }
            (Scope::Under(t), EntityKind::Roi)
                if matches!(t.kind, ContainerKind::Dataset | ContainerKind::Image) =>
            {
                rois(self.images_in(t))
            }
            (Scope::Under(t), EntityKind::Shape)
                if matches!(t.kind, ContainerKind::Dataset | ContainerKind::Image) =>
            {
                shapes(self.images_in(t))
            }
            _ => {
                return Err(HierarchyError::UnsupportedScope {
                    kind,
                    scope: *scope,
                });
            }
        };
        Ok(found)
    }
}

fn same_name(kind: EntityKind, stored: &str, wanted: &str) -> bool {
    if stored.is_empty() {
        return false;
    }
    match kind {
        EntityKind::Well => normalize_well_name(wanted).is_some_and(|w| w == stored),
        _ => stored == wanted,
    }
}

impl HierarchyResolver for InMemoryHierarchy {
    fn resolve_id(&self, scope: &Scope, kind: EntityKind, name: &str) -> Result<Option<i64>, HierarchyError> {
        self.calls.set(self.calls.get() + 1);
        let mut matches = self
            .members(scope, kind)?
            .into_iter()
            .filter(|(_, stored)| same_name(kind, stored, name))
            .map(|(id, _)| id);
        let first = matches.next();
        if first.is_some() && matches.next().is_some() {
            return Err(HierarchyError::Ambiguous {
                kind,
                name: name.to_string(),
                scope: *scope,
            });
        }
        Ok(first)
    }

    fn resolve_name(&self, scope: &Scope, kind: EntityKind, id: i64) -> Result<Option<String>, HierarchyError> {
        self.calls.set(self.calls.get() + 1);
        Ok(self
            .members(scope, kind)?
            .into_iter()
            .find(|(member, _)| *member == id)
            .map(|(_, name)| name))
    }
}
