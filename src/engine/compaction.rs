use tokio::sync::oneshot;
use tracing::info;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

/// Events that rebuild one provider-service as it stands.
///
/// Bookings come before slots: their slot is not there yet, so replaying
/// `BookingCreated` reserves nothing and the slot's own record carries its
/// final booked state and holder.
fn snapshot_service(state: &ServiceState, events: &mut Vec<Event>) {
    let provider_service_id = state.id();
    events.push(Event::ProviderServiceCreated {
        service: state.service.clone(),
    });
    events.extend(state.bookings.iter().map(|booking| Event::BookingCreated {
        provider_service_id,
        booking: booking.clone(),
    }));
    events.extend(state.slots.iter().map(|slot| Event::SlotCreated { slot: slot.clone() }));
    events.extend(state.reviews.iter().map(|review| Event::ReviewAdded {
        review: review.clone(),
    }));
}

impl Engine {
    /// Rewrite the WAL as the minimal event set for the current state.
    ///
    /// Holds the catalog lock and a read lock on every provider-service until
    /// the new file is in place, so no append can slip in between snapshot
    /// and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;

        let mut events: Vec<Event> = self
            .time_slots
            .iter()
            .map(|e| Event::TimeSlotCreated {
                template: e.value().clone(),
            })
            .collect();

        let handles = self.service_handles();
        let mut guards = Vec::with_capacity(handles.len());
        for rs in handles {
            guards.push(rs.read_owned().await);
        }
        for guard in &guards {
            snapshot_service(guard, &mut events);
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
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
