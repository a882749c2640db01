//! Free-text venue names to stable location ids.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::SyncError;
use crate::models::{LocationId, LocationReference};

/// Backing collection of location references.
///
/// `create` must be a conditional insert: when a row with `name` already
/// exists (including one inserted by a concurrent caller a moment ago) it
/// returns that row's id with `created == false` instead of adding a second
/// entry.
pub trait LocationStore: Send + Sync {
    fn find_by_name(&self, name: &str) -> Result<Option<LocationId>, SyncError>;

    fn create(&self, name: &str) -> Result<(LocationId, bool), SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub id: LocationId,
    pub created: bool,
}

#[derive(Clone)]
pub struct LocationResolver {
    store: Arc<dyn LocationStore>,
}

impl LocationResolver {
    pub fn new(store: Arc<dyn LocationStore>) -> Self {
        Self { store }
    }

    pub fn resolve(&self, name: &str) -> Result<Resolution, SyncError> {
        if let Some(id) = self.store.find_by_name(name)? {
            return Ok(Resolution { id, created: false });
        }
        let (id, created) = self.store.create(name)?;
        if created {
            tracing::info!(location = name, %id, "created new location");
        } else {
            tracing::debug!(location = name, %id, "location created concurrently, reusing");
        }
        Ok(Resolution { id, created })
    }
}

/// In-process location collection.
#[derive(Default)]
pub struct MemoryLocationStore {
    inner: Mutex<MemoryLocations>,
}

#[derive(Default)]
struct MemoryLocations {
    by_name: HashMap<String, LocationId>,
    next_id: i64,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locations(names: &[&str]) -> Self {
        let store = Self::new();
        for name in names {
            // Seeding an empty map cannot race.
            let _ = store.create(name);
        }
        store
    }

    pub fn locations(&self) -> Vec<LocationReference> {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut out: Vec<_> = guard
            .by_name
            .iter()
            .map(|(name, id)| LocationReference {
                id: *id,
                name: name.clone(),
            })
            .collect();
        out.sort_by_key(|location| location.id);
        out
    }
}

impl LocationStore for MemoryLocationStore {
    fn find_by_name(&self, name: &str) -> Result<Option<LocationId>, SyncError> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| SyncError::Store("location mutex poisoned".into()))?;
        Ok(guard.by_name.get(name).copied())
    }

    fn create(&self, name: &str) -> Result<(LocationId, bool), SyncError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| SyncError::Store("location mutex poisoned".into()))?;
        if let Some(id) = guard.by_name.get(name) {
            return Ok((*id, false));
        }
        guard.next_id += 1;
        let id = LocationId(guard.next_id);
        guard.by_name.insert(name.to_string(), id);
        Ok((id, true))
    }
}
