use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::{ClockError, TimeInterval};

/// Price in the smallest currency unit.
pub type Cents = i64;

/// Catalog entry defining a canonical start/end/duration triple.
/// Clock strings are kept verbatim; see [`TimeInterval::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlotTemplate {
    pub id: Ulid,
    pub start_time: String,
    pub end_time: String,
    pub duration: String,
}

impl TimeSlotTemplate {
    pub fn interval(&self) -> Result<TimeInterval, ClockError> {
        TimeInterval::parse(&self.start_time, &self.end_time)
    }
}

/// A provider offering one service type at its own rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderService {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub service_id: Ulid,
    pub hourly_rate_cents: Cents,
    pub experience: String,
}

/// One offering of a provider-service on one date using one template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Ulid,
    pub provider_service_id: Ulid,
    pub time_slot_id: Ulid,
    pub service_date: NaiveDate,
    /// Provider-controlled visibility. New slots start unpublished.
    pub is_available: bool,
    pub is_booked: bool,
    /// Booking holding the reservation; `None` for a manual reserve.
    pub reserved_by: Option<Ulid>,
}

impl AvailabilitySlot {
    pub fn new(id: Ulid, provider_service_id: Ulid, time_slot_id: Ulid, service_date: NaiveDate) -> Self {
        Self {
            id,
            provider_service_id,
            time_slot_id,
            service_date,
            is_available: false,
            is_booked: false,
            reserved_by: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Created,
    Confirmed,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Created => "Created",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::Rejected => "Rejected",
            BookingStatus::Cancelled => "Cancelled",
            BookingStatus::Completed => "Completed",
        }
    }

    /// Statuses that hand the slot back to the ledger.
    pub fn releases_slot(self) -> bool {
        matches!(self, BookingStatus::Rejected | BookingStatus::Cancelled)
    }

    /// Transition table. Same-status moves are handled by the caller as no-ops.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        match self {
            Created => matches!(next, Confirmed | Rejected | Cancelled | Completed),
            Confirmed => matches!(next, Cancelled | Completed),
            Rejected | Cancelled | Completed => false,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown booking status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Created" => Ok(BookingStatus::Created),
            "Confirmed" => Ok(BookingStatus::Confirmed),
            "Rejected" => Ok(BookingStatus::Rejected),
            "Cancelled" => Ok(BookingStatus::Cancelled),
            "Completed" => Ok(BookingStatus::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub customer_id: Ulid,
    pub provider_id: Ulid,
    pub total_price_cents: Cents,
    pub comments: Option<String>,
    pub booking_date: NaiveDate,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: Ulid,
    pub provider_service_id: Ulid,
    pub customer_id: Ulid,
    pub review_date: NaiveDate,
    pub comments: String,
}

/// Everything owned by one provider-service. Guarded by a single lock so a
/// booking and its slot reservation change together.
#[derive(Debug, Clone)]
pub struct ServiceState {
    pub service: ProviderService,
    /// Sorted by `service_date`.
    pub slots: Vec<AvailabilitySlot>,
    pub bookings: Vec<Booking>,
    pub reviews: Vec<Review>,
}

impl ServiceState {
    pub fn new(service: ProviderService) -> Self {
        Self {
            service,
            slots: Vec::new(),
            bookings: Vec::new(),
            reviews: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.service.id
    }

    /// Insert slot maintaining sort order by date.
    pub fn insert_slot(&mut self, slot: AvailabilitySlot) {
        let pos = self
            .slots
            .partition_point(|s| s.service_date <= slot.service_date);
        self.slots.insert(pos, slot);
    }

    pub fn remove_slot(&mut self, id: Ulid) -> Option<AvailabilitySlot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    pub fn slot(&self, id: Ulid) -> Option<&AvailabilitySlot> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn slot_mut(&mut self, id: Ulid) -> Option<&mut AvailabilitySlot> {
        self.slots.iter_mut().find(|s| s.id == id)
    }

    /// Slots on one date, via binary search on the sorted vector.
    pub fn slots_on(&self, date: NaiveDate) -> &[AvailabilitySlot] {
        let lo = self.slots.partition_point(|s| s.service_date < date);
        let hi = self.slots.partition_point(|s| s.service_date <= date);
        &self.slots[lo..hi]
    }

    /// Slot for an exact `(date, template)` pair.
    pub fn find_slot(&self, date: NaiveDate, time_slot_id: Ulid) -> Option<&AvailabilitySlot> {
        self.slots_on(date).iter().find(|s| s.time_slot_id == time_slot_id)
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TimeSlotCreated {
        template: TimeSlotTemplate,
    },
    ProviderServiceCreated {
        service: ProviderService,
    },
    ProviderServiceUpdated {
        id: Ulid,
        hourly_rate_cents: Cents,
        experience: String,
    },
    ProviderServiceDeleted {
        id: Ulid,
    },
    SlotCreated {
        slot: AvailabilitySlot,
    },
    SlotUpdated {
        id: Ulid,
        provider_service_id: Ulid,
        time_slot_id: Ulid,
        service_date: NaiveDate,
        is_available: bool,
    },
    SlotReserved {
        id: Ulid,
        provider_service_id: Ulid,
    },
    SlotReleased {
        id: Ulid,
        provider_service_id: Ulid,
    },
    SlotRemoved {
        id: Ulid,
        provider_service_id: Ulid,
    },
    /// Inserts the booking and reserves its slot in one record.
    BookingCreated {
        provider_service_id: Ulid,
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        provider_service_id: Ulid,
        status: BookingStatus,
        release_slot: bool,
    },
    ReviewAdded {
        review: Review,
    },
}

// ── Request types ────────────────────────────────────────────────

/// Input to the conflict check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotQuery {
    pub provider_service_id: Ulid,
    pub service_date: NaiveDate,
    pub time_slot_id: Option<Ulid>,
    pub start_time: String,
    pub end_time: String,
}

/// Partial slot update; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotUpdate {
    pub time_slot_id: Option<Ulid>,
    pub service_date: Option<NaiveDate>,
    pub is_available: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub slot_id: Ulid,
    pub customer_id: Ulid,
    pub provider_id: Ulid,
    pub total_price_cents: Cents,
    pub comments: Option<String>,
    pub booking_date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub customer_id: Option<Ulid>,
    pub provider_id: Option<Ulid>,
    pub booking_date: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        self.customer_id.is_none_or(|c| c == booking.customer_id)
            && self.provider_id.is_none_or(|p| p == booking.provider_id)
            && self.booking_date.is_none_or(|d| d == booking.booking_date)
            && self.status.is_none_or(|s| s == booking.status)
    }
}

// ── Query result types ───────────────────────────────────────────

/// A slot joined with its template and the provider-service rate.
/// Template fields are `None` when the template is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: Ulid,
    pub provider_service_id: Ulid,
    pub time_slot_id: Ulid,
    pub service_date: NaiveDate,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration: Option<String>,
    pub hourly_rate_cents: Cents,
    pub is_available: bool,
    pub is_booked: bool,
}

/// A booking joined with its slot. Slot fields are `None` once the slot has
/// been removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub provider_service_id: Ulid,
    pub customer_id: Ulid,
    pub provider_id: Ulid,
    pub total_price_cents: Cents,
    pub comments: Option<String>,
    pub booking_date: NaiveDate,
    pub status: BookingStatus,
    pub service_date: Option<NaiveDate>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration: Option<String>,
    pub hourly_rate_cents: Cents,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn service() -> ProviderService {
        ProviderService {
            id: Ulid::new(),
            provider_id: Ulid::new(),
            service_id: Ulid::new(),
            hourly_rate_cents: 4_500,
            experience: "10 years".into(),
        }
    }

    fn slot_on(state: &ServiceState, d: &str) -> AvailabilitySlot {
        AvailabilitySlot::new(Ulid::new(), state.id(), Ulid::new(), date(d))
    }

    #[test]
    fn new_slot_starts_unpublished_and_free() {
        let slot = AvailabilitySlot::new(Ulid::new(), Ulid::new(), Ulid::new(), date("2024-05-01"));
        assert!(!slot.is_available);
        assert!(!slot.is_booked);
        assert_eq!(slot.reserved_by, None);
    }

    #[test]
    fn slots_stay_sorted_by_date() {
        let mut state = ServiceState::new(service());
        for d in ["2024-05-03", "2024-05-01", "2024-05-02", "2024-05-01"] {
            let s = slot_on(&state, d);
            state.insert_slot(s);
        }
        let dates: Vec<_> = state.slots.iter().map(|s| s.service_date).collect();
        assert_eq!(
            dates,
            vec![date("2024-05-01"), date("2024-05-01"), date("2024-05-02"), date("2024-05-03")]
        );
    }

    #[test]
    fn slots_on_returns_only_that_date() {
        let mut state = ServiceState::new(service());
        for d in ["2024-05-01", "2024-05-02", "2024-05-02", "2024-05-04"] {
            let s = slot_on(&state, d);
            state.insert_slot(s);
        }
        assert_eq!(state.slots_on(date("2024-05-02")).len(), 2);
        assert_eq!(state.slots_on(date("2024-05-01")).len(), 1);
        assert!(state.slots_on(date("2024-05-03")).is_empty());
        assert!(state.slots_on(date("2024-06-01")).is_empty());
    }

    #[test]
    fn find_slot_by_date_and_template() {
        let mut state = ServiceState::new(service());
        let template = Ulid::new();
        let slot = AvailabilitySlot::new(Ulid::new(), state.id(), template, date("2024-05-01"));
        let id = slot.id;
        state.insert_slot(slot);
        assert_eq!(state.find_slot(date("2024-05-01"), template).map(|s| s.id), Some(id));
        assert!(state.find_slot(date("2024-05-02"), template).is_none());
        assert!(state.find_slot(date("2024-05-01"), Ulid::new()).is_none());
    }

    #[test]
    fn remove_slot_by_id() {
        let mut state = ServiceState::new(service());
        let a = slot_on(&state, "2024-05-01");
        let b = slot_on(&state, "2024-05-02");
        let a_id = a.id;
        state.insert_slot(a);
        state.insert_slot(b);
        assert!(state.remove_slot(a_id).is_some());
        assert!(state.remove_slot(a_id).is_none());
        assert_eq!(state.slots.len(), 1);
    }

    #[test]
    fn status_text_roundtrip() {
        for status in [
            BookingStatus::Created,
            BookingStatus::Confirmed,
            BookingStatus::Rejected,
            BookingStatus::Cancelled,
            BookingStatus::Completed,
        ] {
            assert_eq!(status.to_string().parse::<BookingStatus>(), Ok(status));
        }
        assert!("cancelled".parse::<BookingStatus>().is_err());
        assert!("Pending".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn transition_table() {
        use BookingStatus::*;
        assert!(Created.can_transition_to(Confirmed));
        assert!(Created.can_transition_to(Cancelled));
        assert!(Created.can_transition_to(Rejected));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!Confirmed.can_transition_to(Created));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(Cancelled.releases_slot());
        assert!(Rejected.releases_slot());
        assert!(!Completed.releases_slot());
    }

    #[test]
    fn booking_filter_matches_all_set_fields() {
        let booking = Booking {
            id: Ulid::new(),
            slot_id: Ulid::new(),
            customer_id: Ulid::new(),
            provider_id: Ulid::new(),
            total_price_cents: 9_000,
            comments: None,
            booking_date: date("2024-05-01"),
            status: BookingStatus::Created,
        };
        assert!(BookingFilter::default().matches(&booking));
        let by_customer = BookingFilter {
            customer_id: Some(booking.customer_id),
            status: Some(BookingStatus::Created),
            ..Default::default()
        };
        assert!(by_customer.matches(&booking));
        let wrong_date = BookingFilter {
            customer_id: Some(booking.customer_id),
            booking_date: Some(date("2024-05-02")),
            ..Default::default()
        };
        assert!(!wrong_date.matches(&booking));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            provider_service_id: Ulid::new(),
            booking: Booking {
                id: Ulid::new(),
                slot_id: Ulid::new(),
                customer_id: Ulid::new(),
                provider_id: Ulid::new(),
                total_price_cents: 12_000,
                comments: Some("ring twice".into()),
                booking_date: date("2024-05-01"),
                status: BookingStatus::Created,
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
