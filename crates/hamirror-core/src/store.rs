// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of HaMirror.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use std::collections::HashMap;

use tracing::{debug, info};

use crate::types::EntityState;

/// Sentinel returned by [`EntityStore::formatted_state`] when no value can be shown.
pub const NOT_AVAILABLE: &str = "N/A";

/// In-memory mirror of hub entity state with O(1) lookup by entity id or
/// friendly name.
///
/// The friendly-name index holds at most one entity id per name; on collision
/// the most recently merged record wins. Records are never deleted — a full
/// [`bulk_load`](Self::bulk_load) after a reconnect replaces stale entries.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: HashMap<String, EntityState>,
    by_friendly_name: HashMap<String, String>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entire mirror and rebuilds both indices.
    pub fn bulk_load(&mut self, states: Vec<EntityState>) {
        self.entities.clear();
        self.by_friendly_name.clear();
        for entity in states {
            if entity.entity_id.is_empty() {
                continue;
            }
            if let Some(name) = entity.friendly_name() {
                self.by_friendly_name
                    .insert(name.to_string(), entity.entity_id.clone());
            }
            self.entities.insert(entity.entity_id.clone(), entity);
        }
        info!("[STORE] Loaded {} entities", self.entities.len());
    }

    /// Merges a single record into the mirror.
    ///
    /// An existing record with the same id is overwritten field by field and
    /// the friendly-name index is kept consistent: the old name entry is only
    /// removed if it still points at this id, so a rename cannot clobber
    /// another entity's index slot. An unseen id is inserted and indexed fresh.
    /// A record without an id is silently skipped.
    pub fn merge(&mut self, incoming: EntityState) {
        if incoming.entity_id.is_empty() {
            debug!("[STORE] Dropping record without entity_id");
            return;
        }

        let Some(existing) = self.entities.get_mut(&incoming.entity_id) else {
            if let Some(name) = incoming.friendly_name() {
                self.by_friendly_name
                    .insert(name.to_string(), incoming.entity_id.clone());
            }
            self.entities.insert(incoming.entity_id.clone(), incoming);
            return;
        };

        let old_name = existing.friendly_name().map(str::to_owned);
        let new_name = incoming.friendly_name().map(str::to_owned);

        existing.state = incoming.state;
        existing.attributes = incoming.attributes;
        existing.last_changed = incoming.last_changed;
        existing.last_updated = incoming.last_updated;

        if new_name != old_name {
            if let Some(old) = old_name
                && self
                    .by_friendly_name
                    .get(&old)
                    .is_some_and(|id| *id == incoming.entity_id)
            {
                self.by_friendly_name.remove(&old);
            }
            if let Some(new) = new_name {
                self.by_friendly_name.insert(new, incoming.entity_id);
            }
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityState> {
        self.entities.get(entity_id)
    }

    /// Lookup by the `friendly_name` attribute. Friendly names are not
    /// guaranteed unique on the hub; the last merged owner wins.
    pub fn get_by_friendly_name(&self, name: &str) -> Option<&EntityState> {
        self.by_friendly_name
            .get(name)
            .and_then(|id| self.entities.get(id))
    }

    /// `"<state> <unit>"` trimmed, or [`NOT_AVAILABLE`] when the record is
    /// absent or its state is a non-data sentinel.
    pub fn formatted_state(&self, entity_id: &str) -> String {
        match self.get(entity_id) {
            Some(entity) if !entity.is_unavailable() => {
                let unit = entity.unit_of_measurement().unwrap_or("");
                format!("{} {}", entity.state, unit).trim().to_string()
            }
            _ => NOT_AVAILABLE.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityState> {
        self.entities.values()
    }
}
