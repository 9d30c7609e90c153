mod tables;

pub use tables::{ReservationFilter, Tables};

use std::io;
use std::ops::Deref;
use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock, RwLockReadGuard};
use ulid::Ulid;

use crate::limits::{MAX_HOURLY_RATE, WAL_CHANNEL_CAPACITY};
use crate::model::*;
use crate::wal::{Frame, Wal};

use tables::Undo;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("unique constraint {constraint} violated by {value}")]
    UniqueViolation { constraint: &'static str, value: String },

    #[error("foreign key {constraint} violated by {value}")]
    ForeignKeyViolation { constraint: &'static str, value: String },

    #[error("check constraint {constraint} violated: {message}")]
    CheckViolation { constraint: &'static str, message: String },

    /// Two ACTIVE reservations of one space with intersecting ranges.
    #[error("exclusion constraint reservation_no_overlap violated by {conflicting}")]
    ExclusionViolation { conflicting: Ulid },

    #[error("WAL error: {0}")]
    Wal(String),
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        frame: Frame,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Frame,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { frame, response } => {
                let mut batch = vec![(frame, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { frame, response }) => batch.push((frame, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                for (_, tx) in batch {
                    let r = match &result {
                        Ok(()) => Ok(()),
                        Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
                    };
                    let _ = tx.send(r);
                }

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Frame, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (frame, _) in batch {
        if let Err(e) = wal.append_buffered(frame) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { snapshot, response } => {
            let result = Wal::write_compact_file(wal.path(), &snapshot).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

// ── Transactions ─────────────────────────────────────────

/// Exclusive, serializable access to the tables. Writes are visible to later
/// reads in the same transaction and are undone if the transaction fails.
pub struct Txn<'a> {
    tables: &'a mut Tables,
    events: Vec<Event>,
    undo: Vec<Undo>,
}

impl Deref for Txn<'_> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        self.tables
    }
}

impl<'a> Txn<'a> {
    fn new(tables: &'a mut Tables) -> Self {
        Self {
            tables,
            events: Vec::new(),
            undo: Vec::new(),
        }
    }

    fn record(&mut self, event: Event) {
        let undo = self.tables.apply(&event);
        self.undo.push(undo);
        self.events.push(event);
    }

    pub fn upsert_space(&mut self, space: Space) -> Result<(), StoreError> {
        if space.hourly_rate.is_sign_negative() {
            return Err(StoreError::CheckViolation {
                constraint: "space_rate_non_negative",
                message: format!("hourly rate {} for space {}", space.hourly_rate, space.id),
            });
        }
        if space.hourly_rate > rust_decimal::Decimal::from(MAX_HOURLY_RATE) {
            return Err(StoreError::CheckViolation {
                constraint: "space_rate_bounded",
                message: format!("hourly rate {} for space {} exceeds {MAX_HOURLY_RATE}", space.hourly_rate, space.id),
            });
        }
        self.record(Event::SpaceUpserted(space));
        Ok(())
    }

    pub fn write_setting(&mut self, setting: SettingValue) -> Result<(), StoreError> {
        self.record(Event::SettingWritten(setting));
        Ok(())
    }

    pub fn insert_reservation(&mut self, r: Reservation) -> Result<(), StoreError> {
        if self.tables.reservation(&r.id).is_some() {
            return Err(StoreError::UniqueViolation {
                constraint: "reservation_pkey",
                value: r.id.to_string(),
            });
        }
        self.check_reservation(&r)?;
        self.record(Event::ReservationCreated(r));
        Ok(())
    }

    pub fn update_reservation(&mut self, r: Reservation) -> Result<(), StoreError> {
        if self.tables.reservation(&r.id).is_none() {
            return Err(StoreError::NotFound {
                entity: "reservation",
                id: r.id.to_string(),
            });
        }
        self.check_reservation(&r)?;
        self.record(Event::ReservationUpdated(r));
        Ok(())
    }

    fn check_reservation(&self, r: &Reservation) -> Result<(), StoreError> {
        if r.end <= r.start {
            return Err(StoreError::CheckViolation {
                constraint: "reservation_time_range",
                message: format!("end {} is not after start {}", r.end, r.start),
            });
        }
        if self.tables.space(&r.space_id).is_none() {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "reservation_space_fkey",
                value: r.space_id.to_string(),
            });
        }
        if r.is_active()
            && let Some(other) = self.tables.active_overlapping(&r.space_id, &r.span(), Some(r.id)).first()
        {
            return Err(StoreError::ExclusionViolation { conflicting: other.id });
        }
        Ok(())
    }

    /// Bulk status transition of every reservation matching `filter`.
    /// Returns the ids that changed.
    pub fn update_status_where(
        &mut self,
        filter: &ReservationFilter,
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<Vec<Ulid>, StoreError> {
        let targets: Vec<Reservation> = self
            .tables
            .reservations(filter)
            .into_iter()
            .filter(|r| r.status != status)
            .cloned()
            .collect();
        let mut changed = Vec::with_capacity(targets.len());
        for r in targets {
            if status == ReservationStatus::Active {
                let mut next = r.clone();
                next.status = status;
                self.check_reservation(&next)?;
            }
            self.record(Event::ReservationStatusChanged { id: r.id, status, at });
            changed.push(r.id);
        }
        Ok(changed)
    }

    pub fn insert_liquidation(&mut self, liquidation: Liquidation) -> Result<(), StoreError> {
        if self.tables.liquidation(&liquidation.id).is_some() {
            return Err(StoreError::UniqueViolation {
                constraint: "liquidation_pkey",
                value: liquidation.id.to_string(),
            });
        }
        self.record(Event::LiquidationCreated(liquidation));
        Ok(())
    }

    pub fn insert_liquidation_item(&mut self, item: LiquidationItem) -> Result<(), StoreError> {
        if self.tables.liquidation(&item.liquidation_id).is_none() {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "liquidation_item_liquidation_fkey",
                value: item.liquidation_id.to_string(),
            });
        }
        if self.tables.reservation(&item.reservation_id).is_none() {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "liquidation_item_reservation_fkey",
                value: item.reservation_id.to_string(),
            });
        }
        if self.tables.is_billed(&item.reservation_id) {
            return Err(StoreError::UniqueViolation {
                constraint: "liquidation_item_reservation_key",
                value: item.reservation_id.to_string(),
            });
        }
        self.record(Event::LiquidationItemCreated(item));
        Ok(())
    }

    fn into_parts(mut self) -> (Vec<Event>, Vec<Undo>) {
        (std::mem::take(&mut self.events), std::mem::take(&mut self.undo))
    }

    fn rollback(mut self) {
        let undo = std::mem::take(&mut self.undo);
        self.tables.rollback(undo);
    }
}

impl Drop for Txn<'_> {
    /// Only reached with pending writes when the transaction body panicked.
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            tracing::error!(writes = self.undo.len(), "transaction aborted by panic, rolling back");
            let undo = std::mem::take(&mut self.undo);
            self.tables.rollback(undo);
        }
    }
}

// ── Store ────────────────────────────────────────────────

/// Reservation/space/settings/liquidation tables with WAL durability.
pub struct Store {
    tables: RwLock<Tables>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Store {
    /// A store with no durability, for tests and embedding.
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            wal_tx: None,
        }
    }

    /// Replay the WAL at `path` and start its group-commit writer.
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let frames = Wal::replay(path)?;
        let mut tables = Tables::default();
        let mut replayed = 0usize;
        for frame in &frames {
            for event in frame {
                tables.apply(event);
                replayed += 1;
            }
        }
        tracing::info!(frames = frames.len(), events = replayed, path = %path.display(), "store replayed");

        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            tables: RwLock::new(tables),
            wal_tx: Some(wal_tx),
        })
    }

    /// Shared read access. Blocks while a transaction is open.
    pub async fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().await
    }

    /// Run `f` with exclusive access. All of its writes commit as one WAL
    /// frame, or none of them take effect.
    pub async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Txn<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut tables = self.tables.write().await;
        let mut txn = Txn::new(&mut *tables);
        let value = match f(&mut txn) {
            Ok(value) => value,
            Err(e) => {
                txn.rollback();
                return Err(e);
            }
        };
        let (events, undo) = txn.into_parts();
        if events.is_empty() {
            return Ok(value);
        }
        if let Err(e) = self.wal_append(events).await {
            tracing::error!(error = %e, "WAL append failed, rolling back transaction");
            tables.rollback(undo);
            return Err(e.into());
        }
        Ok(value)
    }

    async fn wal_append(&self, frame: Frame) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append { frame, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Rewrite the WAL as a single snapshot frame of the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        // Holding the read lock keeps commits out until the swap is done.
        let tables = self.tables.read().await;
        let snapshot = tables.snapshot();
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { snapshot, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()));
        drop(tables);
        result
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx.send(WalCommand::AppendsSinceCompact { response: tx }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
