//! Memoizing name/identifier resolution.
//!
//! [`EntityResolver`] wraps a [`HierarchyResolver`] for the duration of one
//! run. Every `(scope, kind, name)` and `(scope, kind, id)` lookup reaches
//! the hierarchy at most once; errors are returned without being cached.

use std::collections::HashMap;

use log::debug;

use crate::data::normalize_well_name;
use crate::entity::{EntityKind, EntityReference, HierarchyError, HierarchyResolver, Scope};
use crate::error::UnresolvedCause;

type NameKey = (Scope, EntityKind, String);
type IdKey = (Scope, EntityKind, i64);

pub struct EntityResolver<H> {
    hierarchy: H,
    ids: HashMap<NameKey, Option<i64>>,
    names: HashMap<IdKey, Option<String>>,
    external_lookups: usize,
    memo_hits: usize,
}

impl<H: HierarchyResolver> EntityResolver<H> {
    pub fn new(hierarchy: H) -> Self {
        Self {
            hierarchy,
            ids: HashMap::new(),
            names: HashMap::new(),
            external_lookups: 0,
            memo_hits: 0,
        }
    }

    /// Lookups that reached the hierarchy.
    pub fn external_lookups(&self) -> usize {
        self.external_lookups
    }

    pub fn memo_hits(&self) -> usize {
        self.memo_hits
    }

    pub fn hierarchy(&self) -> &H {
        &self.hierarchy
    }

    /// Identifier of the entity called `name` in `scope`.
    ///
    /// Well names are normalized first, so `a01` and `A1` share one lookup.
    pub fn id_for(
        &mut self,
        scope: &Scope,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<i64>, HierarchyError> {
        let name = lookup_name(kind, name);
        let key = (*scope, kind, name);
        if let Some(hit) = self.ids.get(&key) {
            self.memo_hits += 1;
            return Ok(*hit);
        }
        self.external_lookups += 1;
        let found = self.hierarchy.resolve_id(scope, kind, &key.2)?;
        debug!("Resolved {kind} '{}' in {scope}: {found:?}", key.2);
        self.ids.insert(key, found);
        Ok(found)
    }

    /// Name of entity `id` in `scope`.
    pub fn name_for(
        &mut self,
        scope: &Scope,
        kind: EntityKind,
        id: i64,
    ) -> Result<Option<String>, HierarchyError> {
        let key = (*scope, kind, id);
        if let Some(hit) = self.names.get(&key) {
            self.memo_hits += 1;
            return Ok(hit.clone());
        }
        self.external_lookups += 1;
        let found = self.hierarchy.resolve_name(scope, kind, id)?;
        debug!("Resolved {kind} {id} in {scope}: {found:?}");
        self.names.insert(key, found.clone());
        Ok(found)
    }

    /// Completes a reference known by name.
    ///
    /// Blank cells, unparseable well names and unknown names come back
    /// unresolved with the cause recorded; the caller decides whether that
    /// is fatal.
    pub fn by_name(
        &mut self,
        scope: &Scope,
        kind: EntityKind,
        name: &str,
    ) -> Result<EntityReference, HierarchyError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Ok(EntityReference::unresolved(kind, UnresolvedCause::Blank));
        }
        let display = if kind == EntityKind::Well {
            match normalize_well_name(trimmed) {
                Some(normalized) => normalized,
                None => {
                    return Ok(EntityReference::partial(
                        kind,
                        None,
                        Some(trimmed.to_string()),
                        UnresolvedCause::InvalidId,
                    ));
                }
            }
        } else {
            trimmed.to_string()
        };
        match self.id_for(scope, kind, &display)? {
            Some(id) => Ok(EntityReference::resolved(kind, id, display)),
            None => Ok(EntityReference::partial(
                kind,
                None,
                Some(display),
                UnresolvedCause::NameNotFound,
            )),
        }
    }

    /// Completes a reference known by identifier text.
    pub fn by_id(
        &mut self,
        scope: &Scope,
        kind: EntityKind,
        raw: &str,
    ) -> Result<EntityReference, HierarchyError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(EntityReference::unresolved(kind, UnresolvedCause::Blank));
        }
        let Ok(id) = trimmed.parse::<i64>() else {
            return Ok(EntityReference::unresolved(kind, UnresolvedCause::InvalidId));
        };
        match self.name_for(scope, kind, id)? {
            Some(name) => Ok(EntityReference::resolved(kind, id, name)),
            None => Ok(EntityReference::partial(
                kind,
                Some(id),
                None,
                UnresolvedCause::IdNotFound,
            )),
        }
    }
}

fn lookup_name(kind: EntityKind, name: &str) -> String {
    let trimmed = name.trim();
    match kind {
        EntityKind::Well => normalize_well_name(trimmed).unwrap_or_else(|| trimmed.to_string()),
        _ => trimmed.to_string(),
    }
}
