use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::{TimeInterval, TimeOfDay};
use crate::limits::MAX_CLOCK_LEN;
use crate::model::*;

use super::{Engine, EngineError};

pub(crate) fn parse_interval(start: &str, end: &str) -> Result<TimeInterval, EngineError> {
    if start.len() > MAX_CLOCK_LEN || end.len() > MAX_CLOCK_LEN {
        return Err(EngineError::LimitExceeded("clock string too long"));
    }
    let start = TimeOfDay::parse_clock(start)?;
    let end = TimeOfDay::parse_clock(end)?;
    Ok(TimeInterval::new(start, end)?)
}

/// First slot on `date` whose template interval overlaps `candidate`.
///
/// Booked and unpublished slots count alike. Slots whose template cannot be
/// resolved are skipped.
pub(crate) fn find_overlap<F>(
    state: &ServiceState,
    date: NaiveDate,
    candidate: &TimeInterval,
    template_interval: F,
) -> Option<Ulid>
where
    F: Fn(Ulid) -> Option<TimeInterval>,
{
    state
        .slots_on(date)
        .iter()
        .find(|slot| template_interval(slot.time_slot_id).is_some_and(|iv| iv.overlaps(candidate)))
        .map(|slot| slot.id)
}

impl Engine {
    /// `true` when the query collides with an existing slot of the same
    /// provider-service on the same date.
    pub async fn is_slot_booked(&self, query: &SlotQuery) -> Result<bool, EngineError> {
        let candidate = parse_interval(&query.start_time, &query.end_time)?;
        let Some(rs) = self.get_service_state(&query.provider_service_id) else {
            return Ok(false);
        };
        let guard = rs.read().await;

        if let Some(tid) = query.time_slot_id
            && guard.find_slot(query.service_date, tid).is_some()
        {
            return Ok(true);
        }

        let hit = find_overlap(&guard, query.service_date, &candidate, |tid| {
            self.time_slots.get(&tid).and_then(|t| t.interval().ok())
        });
        Ok(hit.is_some())
    }
}
