use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate};
use tracing::{debug, info};

use crate::services::quota::SlotQuotaManager;
use crate::services::store::SlotStore;
use crate::{BookingQueueError, NewSlot, Slot, WeeklyTemplate};

const MAX_GENERATION_DAYS: u32 = 62;

/// Creates slots, either one at a time or from weekly templates.
pub struct ScheduleGenerator {
    slots: Arc<dyn SlotStore>,
    quota: Arc<SlotQuotaManager>,
}

impl ScheduleGenerator {
    pub fn new(slots: Arc<dyn SlotStore>, quota: Arc<SlotQuotaManager>) -> Self {
        Self { slots, quota }
    }

    pub async fn create_slot(&self, new_slot: NewSlot) -> Result<Slot, BookingQueueError> {
        if new_slot.capacity == 0 {
            return Err(BookingQueueError::ValidationError("capacity must be at least 1".to_string()));
        }
        if new_slot.fee < 0.0 {
            return Err(BookingQueueError::ValidationError("fee cannot be negative".to_string()));
        }

        if let Some(existing) = self
            .slots
            .find_slot(new_slot.doctor_id, new_slot.date, new_slot.shift)
            .await?
        {
            return Err(BookingQueueError::ValidationError(format!(
                "doctor {} already has slot {} for {} {}",
                new_slot.doctor_id, existing.id, new_slot.date, new_slot.shift
            )));
        }

        let slot = new_slot.into_slot();
        self.slots.insert_slot(&slot).await?;
        self.quota.refresh_cache(&slot).await;

        info!(
            "Created slot {} for doctor {} on {} {} (capacity {})",
            slot.id, slot.doctor_id, slot.date, slot.shift, slot.capacity
        );
        Ok(slot)
    }

    /// Generates `days` days of slots starting at `start_date`. Existing
    /// (doctor, date, shift) combinations are left untouched.
    pub async fn generate(
        &self,
        start_date: NaiveDate,
        days: u32,
        templates: &[WeeklyTemplate],
    ) -> Result<Vec<Slot>, BookingQueueError> {
        if days == 0 || days > MAX_GENERATION_DAYS {
            return Err(BookingQueueError::ValidationError(format!(
                "days must be between 1 and {}",
                MAX_GENERATION_DAYS
            )));
        }

        let mut created = Vec::new();
        for offset in 0..days {
            let date = start_date + Duration::days(i64::from(offset));
            for template in templates.iter().filter(|t| t.weekday == date.weekday()) {
                if self
                    .slots
                    .find_slot(template.doctor_id, date, template.shift)
                    .await?
                    .is_some()
                {
                    debug!("Slot for doctor {} on {} {} exists, skipping", template.doctor_id, date, template.shift);
                    continue;
                }

                let slot = self
                    .create_slot(NewSlot {
                        doctor_id: template.doctor_id,
                        department_id: template.department_id,
                        room_id: template.room_id,
                        date,
                        shift: template.shift,
                        capacity: template.capacity,
                        fee: template.fee,
                    })
                    .await?;
                created.push(slot);
            }
        }

        info!("Generated {} slots from {} templates starting {}", created.len(), templates.len(), start_date);
        Ok(created)
    }
}
