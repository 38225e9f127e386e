use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{BookingQueueError, Registration, RegistrationStatus, Slot, SlotCounters};

/// Persistent slot rows. The versioned counter is the single source of truth
/// for capacity.
#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, BookingQueueError>;

    async fn insert_slot(&self, slot: &Slot) -> Result<(), BookingQueueError>;

    async fn find_slot(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        shift: crate::Shift,
    ) -> Result<Option<Slot>, BookingQueueError>;

    /// Writes `counters` and bumps the version only if the stored version is
    /// still `expected_version`. Returns the updated slot, or `None` when a
    /// concurrent writer got there first.
    async fn compare_and_swap_counts(
        &self,
        slot_id: Uuid,
        expected_version: u64,
        counters: SlotCounters,
    ) -> Result<Option<Slot>, BookingQueueError>;

    /// Decrements `reserved_count` with a floor at zero. Returns `None` when
    /// the counter was already zero.
    async fn release_reserved(&self, slot_id: Uuid) -> Result<Option<Slot>, BookingQueueError>;

    /// Consumer-side bookkeeping; never checks capacity.
    async fn adjust_persisted_count(&self, slot_id: Uuid, delta: i32) -> Result<(), BookingQueueError>;

    /// Administrative counterpart of `compare_and_swap_counts` for capacity
    /// and the active flag; same version rule.
    async fn compare_and_swap_settings(
        &self,
        slot_id: Uuid,
        expected_version: u64,
        capacity: u32,
        is_active: bool,
    ) -> Result<Option<Slot>, BookingQueueError>;
}

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Returns `false` if a row with the same id already exists.
    async fn insert_registration(&self, registration: &Registration) -> Result<bool, BookingQueueError>;

    async fn get_registration(&self, registration_id: Uuid) -> Result<Option<Registration>, BookingQueueError>;

    /// Moves the registration to `to` only if it is currently in `from`.
    async fn update_status(
        &self,
        registration_id: Uuid,
        from: RegistrationStatus,
        to: RegistrationStatus,
    ) -> Result<Option<Registration>, BookingQueueError>;

    async fn find_active_booking(
        &self,
        patient_id: Uuid,
        slot_id: Uuid,
    ) -> Result<Option<Registration>, BookingQueueError>;

    /// Ordered by queue number ascending.
    async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        status: RegistrationStatus,
    ) -> Result<Vec<Registration>, BookingQueueError>;

    /// Ordered by queue number ascending.
    async fn list_for_department(
        &self,
        department_id: Uuid,
        status: RegistrationStatus,
    ) -> Result<Vec<Registration>, BookingQueueError>;

    async fn list_by_status(&self, status: RegistrationStatus) -> Result<Vec<Registration>, BookingQueueError>;

    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Registration>, BookingQueueError>;
}

/// In-process store used when Supabase is not configured, and by tests.
#[derive(Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<Uuid, Slot>>,
    registrations: RwLock<HashMap<Uuid, Registration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Orders registrations the way patients are called: by session, then queue number.
pub(crate) fn in_call_order(mut registrations: Vec<Registration>) -> Vec<Registration> {
    registrations.sort_by_key(Registration::call_order);
    registrations
}

#[async_trait]
impl SlotStore for MemoryStore {
    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, BookingQueueError> {
        Ok(self.slots.read().await.get(&slot_id).cloned())
    }

    async fn insert_slot(&self, slot: &Slot) -> Result<(), BookingQueueError> {
        let mut slots = self.slots.write().await;
        if slots.contains_key(&slot.id) {
            return Err(BookingQueueError::ValidationError(format!("slot {} already exists", slot.id)));
        }
        slots.insert(slot.id, slot.clone());
        Ok(())
    }

    async fn find_slot(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        shift: crate::Shift,
    ) -> Result<Option<Slot>, BookingQueueError> {
        let slots = self.slots.read().await;
        Ok(slots
            .values()
            .find(|s| s.doctor_id == doctor_id && s.date == date && s.shift == shift)
            .cloned())
    }

    async fn compare_and_swap_counts(
        &self,
        slot_id: Uuid,
        expected_version: u64,
        counters: SlotCounters,
    ) -> Result<Option<Slot>, BookingQueueError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(&slot_id)
            .ok_or(BookingQueueError::SlotNotFound(slot_id))?;

        if slot.version != expected_version {
            return Ok(None);
        }

        slot.reserved_count = counters.reserved_count;
        slot.issued_count = counters.issued_count;
        slot.version += 1;
        Ok(Some(slot.clone()))
    }

    async fn release_reserved(&self, slot_id: Uuid) -> Result<Option<Slot>, BookingQueueError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(&slot_id)
            .ok_or(BookingQueueError::SlotNotFound(slot_id))?;

        if slot.reserved_count == 0 {
            return Ok(None);
        }

        slot.reserved_count -= 1;
        slot.version += 1;
        Ok(Some(slot.clone()))
    }

    async fn adjust_persisted_count(&self, slot_id: Uuid, delta: i32) -> Result<(), BookingQueueError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(&slot_id)
            .ok_or(BookingQueueError::SlotNotFound(slot_id))?;

        slot.persisted_count = slot.persisted_count.saturating_add_signed(delta);
        Ok(())
    }

    async fn compare_and_swap_settings(
        &self,
        slot_id: Uuid,
        expected_version: u64,
        capacity: u32,
        is_active: bool,
    ) -> Result<Option<Slot>, BookingQueueError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(&slot_id)
            .ok_or(BookingQueueError::SlotNotFound(slot_id))?;

        if slot.version != expected_version {
            return Ok(None);
        }

        slot.capacity = capacity;
        slot.is_active = is_active;
        slot.version += 1;
        Ok(Some(slot.clone()))
    }
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    async fn insert_registration(&self, registration: &Registration) -> Result<bool, BookingQueueError> {
        let mut registrations = self.registrations.write().await;
        if registrations.contains_key(&registration.id) {
            return Ok(false);
        }
        registrations.insert(registration.id, registration.clone());
        Ok(true)
    }

    async fn get_registration(&self, registration_id: Uuid) -> Result<Option<Registration>, BookingQueueError> {
        Ok(self.registrations.read().await.get(&registration_id).cloned())
    }

    async fn update_status(
        &self,
        registration_id: Uuid,
        from: RegistrationStatus,
        to: RegistrationStatus,
    ) -> Result<Option<Registration>, BookingQueueError> {
        let mut registrations = self.registrations.write().await;
        match registrations.get_mut(&registration_id) {
            Some(registration) if registration.status == from => {
                registration.status = to;
                registration.updated_at = Utc::now();
                Ok(Some(registration.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_active_booking(
        &self,
        patient_id: Uuid,
        slot_id: Uuid,
    ) -> Result<Option<Registration>, BookingQueueError> {
        let registrations = self.registrations.read().await;
        Ok(registrations
            .values()
            .find(|r| r.patient_id == patient_id && r.slot_id == slot_id && r.status.is_active())
            .cloned())
    }

    async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        status: RegistrationStatus,
    ) -> Result<Vec<Registration>, BookingQueueError> {
        let registrations = self.registrations.read().await;
        Ok(in_call_order(
            registrations
                .values()
                .filter(|r| r.doctor_id == doctor_id && r.status == status)
                .cloned()
                .collect(),
        ))
    }

    async fn list_for_department(
        &self,
        department_id: Uuid,
        status: RegistrationStatus,
    ) -> Result<Vec<Registration>, BookingQueueError> {
        let registrations = self.registrations.read().await;
        Ok(in_call_order(
            registrations
                .values()
                .filter(|r| r.department_id == department_id && r.status == status)
                .cloned()
                .collect(),
        ))
    }

    async fn list_by_status(&self, status: RegistrationStatus) -> Result<Vec<Registration>, BookingQueueError> {
        let registrations = self.registrations.read().await;
        Ok(in_call_order(
            registrations.values().filter(|r| r.status == status).cloned().collect(),
        ))
    }

    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Registration>, BookingQueueError> {
        let registrations = self.registrations.read().await;
        let mut stale: Vec<Registration> = registrations
            .values()
            .filter(|r| r.status == RegistrationStatus::PendingPayment && r.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.created_at);
        Ok(stale)
    }
}
