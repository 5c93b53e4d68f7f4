mod bookings;
mod catalog;
mod compaction;
mod conflict;
mod error;
mod ledger;
mod queries;

pub use error::{EngineError, ErrorKind};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedServiceState = Arc<RwLock<ServiceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. Single flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
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
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                // Non-append commands run only after the batch ahead of them is durable.
                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// The booking engine: catalog, availability ledger, and bookings, rebuilt
/// from the WAL on startup.
pub struct Engine {
    pub(super) services: DashMap<Ulid, SharedServiceState>,
    pub(super) time_slots: DashMap<Ulid, TimeSlotTemplate>,
    /// `(provider_id, service_id)` → provider-service id.
    pub(super) service_pairs: DashMap<(Ulid, Ulid), Ulid>,
    /// Reverse lookup: slot or booking id → provider-service id.
    pub(super) entity_to_service: DashMap<Ulid, Ulid>,
    /// Serializes catalog writes that check uniqueness across entries.
    pub(super) catalog_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply an event to one provider-service (no locking: caller holds the lock).
fn apply_to_service(state: &mut ServiceState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ProviderServiceUpdated {
            hourly_rate_cents,
            experience,
            ..
        } => {
            state.service.hourly_rate_cents = *hourly_rate_cents;
            state.service.experience = experience.clone();
        }
        Event::SlotCreated { slot } => {
            entity_map.insert(slot.id, state.id());
            state.insert_slot(slot.clone());
        }
        Event::SlotUpdated {
            id,
            time_slot_id,
            service_date,
            is_available,
            ..
        } => {
            if let Some(mut slot) = state.remove_slot(*id) {
                slot.time_slot_id = *time_slot_id;
                slot.service_date = *service_date;
                slot.is_available = *is_available;
                state.insert_slot(slot);
            }
        }
        Event::SlotReserved { id, .. } => ledger::reserve(state, *id, None),
        Event::SlotReleased { id, .. } => ledger::release(state, *id),
        Event::SlotRemoved { id, .. } => {
            state.remove_slot(*id);
            entity_map.remove(id);
        }
        Event::BookingCreated { booking, .. } => {
            entity_map.insert(booking.id, state.id());
            ledger::reserve(state, booking.slot_id, Some(booking.id));
            state.bookings.push(booking.clone());
        }
        Event::BookingStatusChanged {
            id,
            status,
            release_slot,
            ..
        } => {
            let slot_id = state.booking_mut(*id).map(|booking| {
                booking.status = *status;
                booking.slot_id
            });
            if let Some(slot_id) = slot_id
                && *release_slot
            {
                ledger::release(state, slot_id);
            }
        }
        Event::ReviewAdded { review } => state.reviews.push(review.clone()),
        // Catalog-level events are handled by the engine, not here.
        Event::TimeSlotCreated { .. }
        | Event::ProviderServiceCreated { .. }
        | Event::ProviderServiceDeleted { .. } => {}
    }
}

/// Provider-service an event belongs to (catalog events have none).
fn event_service_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ProviderServiceUpdated { id, .. } => Some(*id),
        Event::SlotCreated { slot } => Some(slot.provider_service_id),
        Event::SlotUpdated { provider_service_id, .. }
        | Event::SlotReserved { provider_service_id, .. }
        | Event::SlotReleased { provider_service_id, .. }
        | Event::SlotRemoved { provider_service_id, .. }
        | Event::BookingCreated { provider_service_id, .. }
        | Event::BookingStatusChanged { provider_service_id, .. } => Some(*provider_service_id),
        Event::ReviewAdded { review } => Some(review.provider_service_id),
        Event::TimeSlotCreated { .. }
        | Event::ProviderServiceCreated { .. }
        | Event::ProviderServiceDeleted { .. } => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            services: DashMap::new(),
            time_slots: DashMap::new(),
            service_pairs: DashMap::new(),
            entity_to_service: DashMap::new(),
            catalog_lock: Mutex::new(()),
            wal_tx,
        };

        // Rebuild into plain values first; nothing else can observe the engine yet.
        let mut states: HashMap<Ulid, ServiceState> = HashMap::new();
        for event in &events {
            match event {
                Event::TimeSlotCreated { template } => {
                    engine.time_slots.insert(template.id, template.clone());
                }
                Event::ProviderServiceCreated { service } => {
                    engine
                        .service_pairs
                        .insert((service.provider_id, service.service_id), service.id);
                    states.insert(service.id, ServiceState::new(service.clone()));
                }
                Event::ProviderServiceDeleted { id } => {
                    if let Some(state) = states.remove(id) {
                        engine.forget_service(&state);
                    }
                }
                other => {
                    if let Some(service_id) = event_service_id(other)
                        && let Some(state) = states.get_mut(&service_id)
                    {
                        apply_to_service(state, other, &engine.entity_to_service);
                    }
                }
            }
        }
        for (id, state) in states {
            engine.services.insert(id, Arc::new(RwLock::new(state)));
        }

        info!(
            events = events.len(),
            provider_services = engine.services.len(),
            time_slots = engine.time_slots.len(),
            "engine state restored from WAL"
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_service_state(&self, id: &Ulid) -> Option<SharedServiceState> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn get_service_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_service.get(entity_id).map(|e| *e.value())
    }

    pub fn template(&self, id: &Ulid) -> Option<TimeSlotTemplate> {
        self.time_slots.get(id).map(|e| e.value().clone())
    }

    /// WAL-append then apply. Memory is untouched if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut ServiceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_service(state, event, &self.entity_to_service);
        Ok(())
    }

    /// Provider-service write lock, or NotFound. A service deleted while we
    /// waited for the lock counts as gone.
    pub(super) async fn service_write(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ServiceState>, EngineError> {
        let state = self.get_service_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = state.write_owned().await;
        if !self.services.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    /// Lookup entity → provider-service, acquire its write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ServiceState>, EngineError> {
        let service_id = self
            .get_service_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        self.service_write(service_id).await
    }

    /// Drop index entries owned by a deleted provider-service.
    pub(super) fn forget_service(&self, state: &ServiceState) {
        for slot in &state.slots {
            self.entity_to_service.remove(&slot.id);
        }
        for booking in &state.bookings {
            self.entity_to_service.remove(&booking.id);
        }
        self.service_pairs
            .remove(&(state.service.provider_id, state.service.service_id));
    }
}
