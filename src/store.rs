//! Durable ledger of timespans.
//!
//! The engine only talks to [`TimeSpanStore`]. [`WalStore`] is the production
//! implementation: an in-memory [`Ledger`] materialized from an append-only
//! WAL, with a background writer that group-commits appends. [`MemoryStore`]
//! is the same ledger without durability.

use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("timespan {0} already exists")]
    Duplicate(Ulid),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait TimeSpanStore: Send + Sync {
    /// Persist a new record. Fails with `Duplicate` if the id is taken.
    async fn insert(&self, record: TimeSpan) -> Result<(), StoreError>;

    /// Overwrite an existing record, returning the previous version.
    /// `Ok(None)` if there is nothing to overwrite.
    async fn replace(&self, record: TimeSpan) -> Result<Option<TimeSpan>, StoreError>;

    /// Delete by id, returning the deleted record.
    async fn remove(&self, id: Ulid) -> Result<Option<TimeSpan>, StoreError>;

    async fn get(&self, id: Ulid) -> Result<Option<TimeSpan>, StoreError>;

    /// Every record of the department (any kind) that intersects the window.
    async fn by_department(&self, department: Ulid, window: Window) -> Result<Vec<TimeSpan>, StoreError>;

    async fn by_owner(&self, owner: Ulid) -> Result<Vec<TimeSpan>, StoreError>;

    async fn by_resource(&self, resource: Ulid) -> Result<Vec<TimeSpan>, StoreError>;

    /// Every reservation, used to rebuild the overlap indexes on startup.
    async fn reservations(&self) -> Result<Vec<TimeSpan>, StoreError>;
}

// ── Ledger ───────────────────────────────────────────────

/// Records keyed by id plus secondary id lists per owner, department and
/// resource. Records are cloned whole on read, so readers never see a
/// partially written one; a secondary entry whose record is already gone is
/// skipped.
#[derive(Default)]
pub struct Ledger {
    records: DashMap<Ulid, TimeSpan>,
    by_owner: DashMap<Ulid, Vec<Ulid>>,
    by_department: DashMap<Ulid, Vec<Ulid>>,
    by_resource: DashMap<Ulid, Vec<Ulid>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &Ulid) -> Option<TimeSpan> {
        self.records.get(id).map(|e| e.value().clone())
    }

    /// Apply one event. Returns the record displaced by it, if any.
    pub fn apply(&self, event: &Event) -> Option<TimeSpan> {
        match event {
            Event::TimeSpanStored { record } => {
                // Secondary lists first: a reader that finds the id before
                // the record simply skips it.
                self.link(record);
                self.records.insert(record.id, record.clone())
            }
            Event::TimeSpanAmended { record } => {
                let mut entry = self.records.get_mut(&record.id)?;
                Some(std::mem::replace(entry.value_mut(), record.clone()))
            }
            Event::TimeSpanRemoved { id } => {
                let (_, removed) = self.records.remove(id)?;
                self.unlink(&removed);
                Some(removed)
            }
        }
    }

    fn link(&self, record: &TimeSpan) {
        self.by_owner.entry(record.owner).or_default().push(record.id);
        self.by_department
            .entry(record.department)
            .or_default()
            .push(record.id);
        if let Some(rid) = record.resource {
            self.by_resource.entry(rid).or_default().push(record.id);
        }
    }

    fn unlink(&self, record: &TimeSpan) {
        let drop_id = |map: &DashMap<Ulid, Vec<Ulid>>, key: &Ulid| {
            if let Some(mut ids) = map.get_mut(key) {
                ids.retain(|i| *i != record.id);
            }
        };
        drop_id(&self.by_owner, &record.owner);
        drop_id(&self.by_department, &record.department);
        if let Some(rid) = record.resource {
            drop_id(&self.by_resource, &rid);
        }
    }

    fn collect(&self, map: &DashMap<Ulid, Vec<Ulid>>, key: &Ulid) -> Vec<TimeSpan> {
        let ids = map.get(key).map(|e| e.value().clone()).unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn owned_by(&self, owner: &Ulid) -> Vec<TimeSpan> {
        self.collect(&self.by_owner, owner)
    }

    pub fn in_department(&self, department: &Ulid, window: &Window) -> Vec<TimeSpan> {
        let mut out = self.collect(&self.by_department, department);
        out.retain(|r| window.intersects(&r.span));
        out
    }

    pub fn on_resource(&self, resource: &Ulid) -> Vec<TimeSpan> {
        self.collect(&self.by_resource, resource)
    }

    pub fn reservations(&self) -> Vec<TimeSpan> {
        self.records
            .iter()
            .filter(|e| e.value().is_reservation())
            .map(|e| e.value().clone())
            .collect()
    }

    /// Events that recreate the current state.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut records: Vec<TimeSpan> = self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        records
            .into_iter()
            .map(|record| Event::TimeSpanStored { record })
            .collect()
    }
}

// ── MemoryStore ──────────────────────────────────────────

/// Non-durable store over a bare [`Ledger`].
#[derive(Default)]
pub struct MemoryStore {
    ledger: Ledger,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeSpanStore for MemoryStore {
    async fn insert(&self, record: TimeSpan) -> Result<(), StoreError> {
        match self.ledger.records.entry(record.id) {
            Entry::Occupied(_) => return Err(StoreError::Duplicate(record.id)),
            Entry::Vacant(slot) => {
                self.ledger.link(&record);
                slot.insert(record);
            }
        }
        Ok(())
    }

    async fn replace(&self, record: TimeSpan) -> Result<Option<TimeSpan>, StoreError> {
        Ok(self.ledger.apply(&Event::TimeSpanAmended { record }))
    }

    async fn remove(&self, id: Ulid) -> Result<Option<TimeSpan>, StoreError> {
        Ok(self.ledger.apply(&Event::TimeSpanRemoved { id }))
    }

    async fn get(&self, id: Ulid) -> Result<Option<TimeSpan>, StoreError> {
        Ok(self.ledger.get(&id))
    }

    async fn by_department(&self, department: Ulid, window: Window) -> Result<Vec<TimeSpan>, StoreError> {
        Ok(self.ledger.in_department(&department, &window))
    }

    async fn by_owner(&self, owner: Ulid) -> Result<Vec<TimeSpan>, StoreError> {
        Ok(self.ledger.owned_by(&owner))
    }

    async fn by_resource(&self, resource: Ulid) -> Result<Vec<TimeSpan>, StoreError> {
        Ok(self.ledger.on_resource(&resource))
    }

    async fn reservations(&self) -> Result<Vec<TimeSpan>, StoreError> {
        Ok(self.ledger.reservations())
    }
}

// ── WalStore ─────────────────────────────────────────────

type Reply = oneshot::Sender<Result<Option<TimeSpan>, StoreError>>;

enum WalCommand {
    Append { event: Event, response: Reply },
    Compact { response: oneshot::Sender<io::Result<()>> },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// WAL-backed store. The writer task owns the log and applies each event to
/// the ledger only after its batch is fsynced, so the ledger never holds a
/// record the log could lose.
pub struct WalStore {
    ledger: Arc<Ledger>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay the log at `path` and start the writer. Must be called inside a
    /// tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, events) = crate::wal::Wal::open(path)?;
        let ledger = Arc::new(Ledger::new());
        for event in &events {
            ledger.apply(event);
        }
        info!(
            "replayed {} events from {} ({} timespans)",
            events.len(),
            path.display(),
            ledger.len()
        );

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, ledger.clone(), wal_rx));
        Ok(Self { ledger, wal_tx })
    }

    async fn append(&self, event: Event) -> Result<Option<TimeSpan>, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
    }

    /// Rewrite the log with only the events needed to recreate the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(StoreError::from)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl TimeSpanStore for WalStore {
    async fn insert(&self, record: TimeSpan) -> Result<(), StoreError> {
        self.append(Event::TimeSpanStored { record }).await.map(|_| ())
    }

    async fn replace(&self, record: TimeSpan) -> Result<Option<TimeSpan>, StoreError> {
        if !self.ledger.contains(&record.id) {
            return Ok(None);
        }
        self.append(Event::TimeSpanAmended { record }).await
    }

    async fn remove(&self, id: Ulid) -> Result<Option<TimeSpan>, StoreError> {
        self.append(Event::TimeSpanRemoved { id }).await
    }

    async fn get(&self, id: Ulid) -> Result<Option<TimeSpan>, StoreError> {
        Ok(self.ledger.get(&id))
    }

    async fn by_department(&self, department: Ulid, window: Window) -> Result<Vec<TimeSpan>, StoreError> {
        Ok(self.ledger.in_department(&department, &window))
    }

    async fn by_owner(&self, owner: Ulid) -> Result<Vec<TimeSpan>, StoreError> {
        Ok(self.ledger.owned_by(&owner))
    }

    async fn by_resource(&self, resource: Ulid) -> Result<Vec<TimeSpan>, StoreError> {
        Ok(self.ledger.on_resource(&resource))
    }

    async fn reservations(&self) -> Result<Vec<TimeSpan>, StoreError> {
        Ok(self.ledger.reservations())
    }
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first command arrives.
/// 2. Drain every immediately available Append into the batch.
/// 3. Reject duplicate inserts, buffer the rest, one flush_sync.
/// 4. Apply to the ledger and answer every sender.
async fn wal_writer_loop(mut wal: crate::wal::Wal, ledger: Arc<Ledger>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }
                commit_batch(&mut wal, &ledger, batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, &ledger, other);
                }
            }
            other => handle_non_append(&mut wal, &ledger, other),
        }
    }
}

fn commit_batch(wal: &mut crate::wal::Wal, ledger: &Ledger, batch: Vec<(Event, Reply)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();

    let mut accepted = Vec::with_capacity(batch.len());
    let mut claimed = HashSet::new();
    for (event, response) in batch {
        if let Event::TimeSpanStored { record } = &event
            && (ledger.contains(&record.id) || !claimed.insert(record.id))
        {
            let _ = response.send(Err(StoreError::Duplicate(record.id)));
            continue;
        }
        accepted.push((event, response));
    }
    if accepted.is_empty() {
        return;
    }

    let mut result = Ok(());
    for (event, _) in &accepted {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after an append error so partially buffered bytes don't
    // leak into the next batch. Callers are told this batch failed.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (event, response) in accepted {
        let reply = match &result {
            Ok(()) => Ok(ledger.apply(&event)),
            Err(e) => Err(StoreError::Unavailable(e.to_string())),
        };
        let _ = response.send(reply);
    }
}

fn handle_non_append(wal: &mut crate::wal::Wal, ledger: &Ledger, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            let before = wal.appends_since_compact();
            let result = wal.compact(&ledger.snapshot());
            if result.is_ok() {
                info!("compacted WAL after {before} appends ({} timespans)", ledger.len());
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, ledger, vec![(event, response)]),
    }
}
