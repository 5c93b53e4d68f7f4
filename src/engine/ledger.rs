use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Mark a slot booked. Idempotent; an existing holder is kept.
pub(super) fn reserve(state: &mut ServiceState, slot_id: Ulid, by: Option<Ulid>) {
    if let Some(slot) = state.slot_mut(slot_id) {
        if !slot.is_booked {
            slot.reserved_by = by;
        }
        slot.is_booked = true;
    }
}

/// Clear the booked flag and its holder. A missing slot is a no-op.
pub(super) fn release(state: &mut ServiceState, slot_id: Ulid) {
    if let Some(slot) = state.slot_mut(slot_id) {
        slot.is_booked = false;
        slot.reserved_by = None;
    }
}

impl Engine {
    /// Offer a provider-service on `service_date` using template `time_slot_id`.
    /// The slot starts unpublished and unbooked.
    pub async fn create_slot(
        &self,
        provider_service_id: Ulid,
        service_date: NaiveDate,
        time_slot_id: Ulid,
    ) -> Result<AvailabilitySlot, EngineError> {
        if !self.time_slots.contains_key(&time_slot_id) {
            return Err(EngineError::NotFound(time_slot_id));
        }
        let mut guard = self.service_write(provider_service_id).await?;
        if guard.slots.len() >= MAX_SLOTS_PER_SERVICE {
            return Err(EngineError::LimitExceeded("too many slots on provider service"));
        }
        if guard.find_slot(service_date, time_slot_id).is_some() {
            return Err(EngineError::Duplicate(format!(
                "slot for {provider_service_id} on {service_date} with template {time_slot_id}"
            )));
        }

        let slot = AvailabilitySlot::new(Ulid::new(), provider_service_id, time_slot_id, service_date);
        let event = Event::SlotCreated { slot: slot.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(slot_id = %slot.id, %provider_service_id, %service_date, "slot created");
        Ok(slot)
    }

    /// Change a slot's template, date or visibility.
    ///
    /// Moving a reserved slot to another time is refused; toggling
    /// `is_available` is always allowed.
    pub async fn update_slot(
        &self,
        id: Ulid,
        update: SlotUpdate,
    ) -> Result<AvailabilitySlot, EngineError> {
        if let Some(tid) = update.time_slot_id
            && !self.time_slots.contains_key(&tid)
        {
            return Err(EngineError::NotFound(tid));
        }
        let mut guard = self.resolve_entity_write(&id).await?;
        let current = guard.slot(id).cloned().ok_or(EngineError::NotFound(id))?;

        let time_slot_id = update.time_slot_id.unwrap_or(current.time_slot_id);
        let service_date = update.service_date.unwrap_or(current.service_date);
        let is_available = update.is_available.unwrap_or(current.is_available);
        let moved = time_slot_id != current.time_slot_id || service_date != current.service_date;

        if moved {
            if current.is_booked {
                return Err(EngineError::Conflict(id));
            }
            if guard.find_slot(service_date, time_slot_id).is_some() {
                return Err(EngineError::Duplicate(format!(
                    "slot for {} on {service_date} with template {time_slot_id}",
                    current.provider_service_id
                )));
            }
        }

        let event = Event::SlotUpdated {
            id,
            provider_service_id: current.provider_service_id,
            time_slot_id,
            service_date,
            is_available,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.slot(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Mark a slot booked outside the booking flow. Reserving a booked slot
    /// is a no-op that still succeeds.
    pub async fn reserve_slot(&self, id: Ulid) -> Result<AvailabilitySlot, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let slot = guard.slot(id).cloned().ok_or(EngineError::NotFound(id))?;
        if slot.is_booked {
            return Ok(slot);
        }
        let event = Event::SlotReserved {
            id,
            provider_service_id: slot.provider_service_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.slot(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Clear a slot's reservation regardless of who holds it.
    pub async fn release_slot(&self, id: Ulid) -> Result<AvailabilitySlot, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let slot = guard.slot(id).cloned().ok_or(EngineError::NotFound(id))?;
        if !slot.is_booked {
            return Ok(slot);
        }
        let event = Event::SlotReleased {
            id,
            provider_service_id: slot.provider_service_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.slot(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Hard-delete a slot. Bookings that referenced it keep their slot id.
    pub async fn remove_slot(&self, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let provider_service_id = guard.id();
        if guard.slot(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::SlotRemoved { id, provider_service_id };
        self.persist_and_apply(&mut guard, &event).await
    }
}
