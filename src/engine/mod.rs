mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{availability, compute_saturated_spans, merge_overlapping, peak_concurrency, subtract_intervals};
pub use conflict::now_ms;
pub use error::EngineError;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};
use ulid::Ulid;

use crate::directory::ResourceDirectory;
use crate::model::*;
use crate::store::{StoreError, TimeSpanStore};

pub type SharedIndex = Arc<RwLock<OverlapIndex>>;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Bound on each store write made while a resource lock is held.
    pub store_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(2000),
        }
    }
}

/// Admission, cancellation and views over reservations and absences.
///
/// Every resource with at least one reservation has its own
/// `RwLock<OverlapIndex>`. Admission and cancellation take that resource's
/// write lock around the check and the store write; nothing is ever locked
/// across resources.
pub struct Engine {
    indexes: DashMap<Ulid, SharedIndex>,
    store: Arc<dyn TimeSpanStore>,
    directory: Arc<dyn ResourceDirectory>,
    settings: EngineSettings,
}

impl Engine {
    /// Rebuild the overlap indexes from the store's reservations.
    pub async fn open(
        store: Arc<dyn TimeSpanStore>,
        directory: Arc<dyn ResourceDirectory>,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        let mut rebuilt: HashMap<Ulid, OverlapIndex> = HashMap::new();
        let mut count = 0usize;
        for record in store.reservations().await? {
            let Some(resource_id) = record.resource else {
                continue;
            };
            rebuilt
                .entry(resource_id)
                .or_insert_with(|| OverlapIndex::new(resource_id))
                .insert(record);
            count += 1;
        }
        info!("indexed {count} reservations across {} resources", rebuilt.len());

        let indexes = rebuilt
            .into_iter()
            .map(|(id, idx)| (id, Arc::new(RwLock::new(idx))))
            .collect();
        Ok(Self {
            indexes,
            store,
            directory,
            settings,
        })
    }

    pub fn store(&self) -> &Arc<dyn TimeSpanStore> {
        &self.store
    }

    pub fn directory(&self) -> &Arc<dyn ResourceDirectory> {
        &self.directory
    }

    pub fn get_index(&self, resource_id: &Ulid) -> Option<SharedIndex> {
        self.indexes.get(resource_id).map(|e| e.value().clone())
    }

    /// The index for a resource, created empty on first use.
    pub(super) fn index(&self, resource_id: Ulid) -> SharedIndex {
        self.indexes
            .entry(resource_id)
            .or_insert_with(|| Arc::new(RwLock::new(OverlapIndex::new(resource_id))))
            .value()
            .clone()
    }

    pub(super) fn indexed_resources(&self) -> Vec<Ulid> {
        self.indexes.iter().map(|e| *e.key()).collect()
    }

    /// Run a store call under the configured timeout.
    pub(super) async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.settings.store_timeout, op).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => {
                warn!(
                    "store write timed out after {}ms",
                    self.settings.store_timeout.as_millis()
                );
                Err(EngineError::StoreUnavailable("store write timed out".into()))
            }
        }
    }

    /// Insert a new record. If the write fails for any reason other than a
    /// duplicate id, a remove is issued so a late-landing write doesn't
    /// leave a record the index never saw.
    pub(super) async fn insert_or_compensate(&self, record: &TimeSpan) -> Result<(), EngineError> {
        match self.bounded(self.store.insert(record.clone())).await {
            Ok(()) => Ok(()),
            Err(EngineError::AlreadyExists(id)) => Err(EngineError::AlreadyExists(id)),
            Err(e) => {
                if let Err(undo) = self.bounded(self.store.remove(record.id)).await {
                    warn!("compensating remove of {} not confirmed: {undo}", record.id);
                }
                Err(e)
            }
        }
    }
}
