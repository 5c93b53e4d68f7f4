use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::parse_interval;
use super::{Engine, EngineError};

fn validate_rate(hourly_rate_cents: Cents) -> Result<(), EngineError> {
    if hourly_rate_cents < 0 {
        return Err(EngineError::Validation("hourly rate must not be negative".into()));
    }
    Ok(())
}

fn validate_experience(experience: &str) -> Result<(), EngineError> {
    if experience.len() > MAX_EXPERIENCE_LEN {
        return Err(EngineError::LimitExceeded("experience text too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_time_slot(
        &self,
        start_time: String,
        end_time: String,
        duration: String,
    ) -> Result<TimeSlotTemplate, EngineError> {
        parse_interval(&start_time, &end_time)?;
        let duration = duration.trim().to_string();
        if duration.is_empty() {
            return Err(EngineError::Validation("duration label must not be empty".into()));
        }
        if duration.len() > MAX_DURATION_LABEL_LEN {
            return Err(EngineError::LimitExceeded("duration label too long"));
        }
        let _catalog = self.catalog_lock.lock().await;
        if self.time_slots.len() >= MAX_TIME_SLOTS {
            return Err(EngineError::LimitExceeded("too many time-slot templates"));
        }

        let template = TimeSlotTemplate {
            id: Ulid::new(),
            start_time: start_time.trim().to_string(),
            end_time: end_time.trim().to_string(),
            duration,
        };
        self.wal_append(&Event::TimeSlotCreated { template: template.clone() })
            .await?;
        self.time_slots.insert(template.id, template.clone());
        info!(time_slot_id = %template.id, start = %template.start_time, end = %template.end_time, "time slot template created");
        Ok(template)
    }

    pub async fn create_provider_service(
        &self,
        provider_id: Ulid,
        service_id: Ulid,
        hourly_rate_cents: Cents,
        experience: String,
    ) -> Result<ProviderService, EngineError> {
        validate_rate(hourly_rate_cents)?;
        validate_experience(&experience)?;

        let _catalog = self.catalog_lock.lock().await;
        if self.services.len() >= MAX_PROVIDER_SERVICES {
            return Err(EngineError::LimitExceeded("too many provider services"));
        }
        if let Some(existing) = self.service_pairs.get(&(provider_id, service_id)) {
            return Err(EngineError::Duplicate(format!(
                "provider {provider_id} already offers service {service_id} as {}",
                *existing
            )));
        }

        let service = ProviderService {
            id: Ulid::new(),
            provider_id,
            service_id,
            hourly_rate_cents,
            experience,
        };
        self.wal_append(&Event::ProviderServiceCreated { service: service.clone() })
            .await?;
        self.service_pairs.insert((provider_id, service_id), service.id);
        self.services
            .insert(service.id, Arc::new(RwLock::new(ServiceState::new(service.clone()))));
        info!(provider_service_id = %service.id, %provider_id, %service_id, "provider service created");
        Ok(service)
    }

    /// Change rate and/or experience; `None` keeps the current value.
    pub async fn update_provider_service(
        &self,
        id: Ulid,
        hourly_rate_cents: Option<Cents>,
        experience: Option<String>,
    ) -> Result<ProviderService, EngineError> {
        if let Some(rate) = hourly_rate_cents {
            validate_rate(rate)?;
        }
        if let Some(ref e) = experience {
            validate_experience(e)?;
        }
        let mut guard = self.service_write(id).await?;
        let event = Event::ProviderServiceUpdated {
            id,
            hourly_rate_cents: hourly_rate_cents.unwrap_or(guard.service.hourly_rate_cents),
            experience: experience.unwrap_or_else(|| guard.service.experience.clone()),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.service.clone())
    }

    /// Remove a provider-service with its slots and reviews. Refused while
    /// any booking references it.
    pub async fn delete_provider_service(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let guard = self.service_write(id).await?;
        if !guard.bookings.is_empty() {
            return Err(EngineError::HasBookings(id));
        }
        self.wal_append(&Event::ProviderServiceDeleted { id }).await?;
        self.forget_service(&guard);
        self.services.remove(&id);
        info!(provider_service_id = %id, "provider service deleted");
        Ok(())
    }

    pub async fn add_review(
        &self,
        provider_service_id: Ulid,
        customer_id: Ulid,
        review_date: NaiveDate,
        comments: String,
    ) -> Result<Review, EngineError> {
        if comments.len() > MAX_COMMENT_LEN {
            return Err(EngineError::LimitExceeded("review comments too long"));
        }
        let mut guard = self.service_write(provider_service_id).await?;
        if guard.reviews.len() >= MAX_REVIEWS_PER_SERVICE {
            return Err(EngineError::LimitExceeded("too many reviews on provider service"));
        }
        let review = Review {
            id: Ulid::new(),
            provider_service_id,
            customer_id,
            review_date,
            comments,
        };
        self.persist_and_apply(&mut guard, &Event::ReviewAdded { review: review.clone() })
            .await?;
        Ok(review)
    }
}
