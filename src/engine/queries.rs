use ulid::Ulid;

use crate::model::*;

use super::{Engine, SharedServiceState};

impl Engine {
    pub fn get_time_slot(&self, id: &Ulid) -> Option<TimeSlotTemplate> {
        self.template(id)
    }

    /// Templates ordered by start time; unparseable ones sort last.
    pub fn list_time_slots(&self, duration: Option<&str>) -> Vec<TimeSlotTemplate> {
        let mut out: Vec<TimeSlotTemplate> = self
            .time_slots
            .iter()
            .filter(|e| duration.is_none_or(|d| e.value().duration == d))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|t| (t.interval().map(|iv| iv.start.minutes()).unwrap_or(u16::MAX), t.id));
        out
    }

    pub async fn get_provider_service(&self, id: &Ulid) -> Option<ProviderService> {
        let rs = self.get_service_state(id)?;
        let guard = rs.read().await;
        Some(guard.service.clone())
    }

    pub async fn list_provider_services(
        &self,
        provider_id: Option<Ulid>,
        service_id: Option<Ulid>,
    ) -> Vec<ProviderService> {
        let mut out = Vec::new();
        for rs in self.service_handles() {
            let guard = rs.read().await;
            let s = &guard.service;
            if provider_id.is_none_or(|p| p == s.provider_id)
                && service_id.is_none_or(|x| x == s.service_id)
            {
                out.push(s.clone());
            }
        }
        out.sort_by_key(|s| s.id);
        out
    }

    pub async fn get_slot(&self, id: &Ulid) -> Option<SlotInfo> {
        let rs = self.get_service_state(&self.get_service_for_entity(id)?)?;
        let guard = rs.read().await;
        let slot = guard.slot(*id)?;
        Some(self.slot_info(slot, guard.service.hourly_rate_cents))
    }

    /// Slots of one provider-service by service date. With `duration`, only
    /// unbooked slots whose template carries that label.
    pub async fn list_slots(&self, provider_service_id: &Ulid, duration: Option<&str>) -> Vec<SlotInfo> {
        let Some(rs) = self.get_service_state(provider_service_id) else {
            return vec![];
        };
        let guard = rs.read().await;
        let rate = guard.service.hourly_rate_cents;
        guard
            .slots
            .iter()
            .map(|slot| self.slot_info(slot, rate))
            .filter(|info| match duration {
                None => true,
                Some(d) => !info.is_booked && info.duration.as_deref() == Some(d),
            })
            .collect()
    }

    pub async fn get_booking(&self, id: &Ulid) -> Option<BookingInfo> {
        let rs = self.get_service_state(&self.get_service_for_entity(id)?)?;
        let guard = rs.read().await;
        let booking = guard.booking(*id)?;
        Some(self.booking_info(&guard, booking))
    }

    /// Bookings across all provider-services, newest booking date first.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<BookingInfo> {
        let mut out = Vec::new();
        for rs in self.service_handles() {
            let guard = rs.read().await;
            out.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| filter.matches(b))
                    .map(|b| self.booking_info(&guard, b)),
            );
        }
        out.sort_by(|a, b| b.booking_date.cmp(&a.booking_date).then(a.id.cmp(&b.id)));
        out
    }

    /// Reviews of one provider-service by review date.
    pub async fn list_reviews(&self, provider_service_id: &Ulid) -> Vec<Review> {
        let Some(rs) = self.get_service_state(provider_service_id) else {
            return vec![];
        };
        let guard = rs.read().await;
        let mut out = guard.reviews.clone();
        out.sort_by_key(|r| (r.review_date, r.id));
        out
    }

    /// Snapshot of the lock handles, so no map shard stays locked across an await.
    pub(super) fn service_handles(&self) -> Vec<SharedServiceState> {
        self.services.iter().map(|e| e.value().clone()).collect()
    }

    fn slot_info(&self, slot: &AvailabilitySlot, hourly_rate_cents: Cents) -> SlotInfo {
        let template = self.template(&slot.time_slot_id);
        SlotInfo {
            id: slot.id,
            provider_service_id: slot.provider_service_id,
            time_slot_id: slot.time_slot_id,
            service_date: slot.service_date,
            start_time: template.as_ref().map(|t| t.start_time.clone()),
            end_time: template.as_ref().map(|t| t.end_time.clone()),
            duration: template.map(|t| t.duration),
            hourly_rate_cents,
            is_available: slot.is_available,
            is_booked: slot.is_booked,
        }
    }

    fn booking_info(&self, state: &ServiceState, booking: &Booking) -> BookingInfo {
        let slot = state.slot(booking.slot_id);
        let template = slot.and_then(|s| self.template(&s.time_slot_id));
        BookingInfo {
            id: booking.id,
            slot_id: booking.slot_id,
            provider_service_id: state.id(),
            customer_id: booking.customer_id,
            provider_id: booking.provider_id,
            total_price_cents: booking.total_price_cents,
            comments: booking.comments.clone(),
            booking_date: booking.booking_date,
            status: booking.status,
            service_date: slot.map(|s| s.service_date),
            start_time: template.as_ref().map(|t| t.start_time.clone()),
            end_time: template.as_ref().map(|t| t.end_time.clone()),
            duration: template.map(|t| t.duration),
            hourly_rate_cents: state.service.hourly_rate_cents,
        }
    }
}
