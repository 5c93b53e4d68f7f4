use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

fn validate_new_booking(req: &NewBooking) -> Result<(), EngineError> {
    if req.total_price_cents < 0 {
        return Err(EngineError::Validation("total price must not be negative".into()));
    }
    if let Some(ref c) = req.comments
        && c.len() > MAX_COMMENT_LEN
    {
        return Err(EngineError::LimitExceeded("booking comments too long"));
    }
    Ok(())
}

impl Engine {
    /// Book a slot. The reserved check, the booking row and the slot
    /// reservation happen under one write lock and land as one WAL record.
    pub async fn create_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        validate_new_booking(&req)?;
        let mut guard = self.resolve_entity_write(&req.slot_id).await?;
        let slot = guard.slot(req.slot_id).ok_or(EngineError::NotFound(req.slot_id))?;
        if slot.is_booked {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(req.slot_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SERVICE {
            return Err(EngineError::LimitExceeded("too many bookings on provider service"));
        }

        let provider_service_id = guard.id();
        let booking = Booking {
            id: Ulid::new(),
            slot_id: req.slot_id,
            customer_id: req.customer_id,
            provider_id: req.provider_id,
            total_price_cents: req.total_price_cents,
            comments: req.comments,
            booking_date: req.booking_date,
            status: BookingStatus::Created,
        };
        let event = Event::BookingCreated {
            provider_service_id,
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(booking_id = %booking.id, slot_id = %booking.slot_id, "booking created");
        Ok(booking)
    }

    /// Move a booking along the status table. Rejecting or cancelling hands
    /// the slot back unless another booking has since reserved it.
    pub async fn update_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_entity_write(&id).await?;
        let current = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        if current.status == status {
            return Ok(current);
        }
        if !current.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        }

        // Another booking's reservation of the same slot is left alone.
        let release_slot = status.releases_slot()
            && guard
                .slot(current.slot_id)
                .is_some_and(|s| s.is_booked && s.reserved_by.is_none_or(|holder| holder == id));
        let event = Event::BookingStatusChanged {
            id,
            provider_service_id: guard.id(),
            status,
            release_slot,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKING_STATUS_CHANGES_TOTAL, "status" => status.as_str())
            .increment(1);
        debug!(booking_id = %id, from = %current.status, to = %status, release_slot, "booking status changed");
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn request() -> NewBooking {
        NewBooking {
            slot_id: Ulid::new(),
            customer_id: Ulid::new(),
            provider_id: Ulid::new(),
            total_price_cents: 10_000,
            comments: None,
            booking_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        }
    }

    #[test]
    fn negative_price_rejected() {
        let req = NewBooking { total_price_cents: -1, ..request() };
        assert!(matches!(validate_new_booking(&req), Err(EngineError::Validation(_))));
    }

    #[test]
    fn oversized_comment_rejected() {
        let req = NewBooking {
            comments: Some("x".repeat(MAX_COMMENT_LEN + 1)),
            ..request()
        };
        assert!(matches!(validate_new_booking(&req), Err(EngineError::LimitExceeded(_))));
        assert!(validate_new_booking(&request()).is_ok());
    }
}
