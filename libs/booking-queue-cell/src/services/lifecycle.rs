use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_utils::geo::GeoFence;

use crate::services::broadcaster::DoctorQueueBroadcaster;
use crate::services::quota::SlotQuotaManager;
use crate::services::store::{RegistrationStore, SlotStore};
use crate::{BookingQueueError, Registration, RegistrationStatus};

/// Drives registrations through the visit lifecycle.
///
/// Every transition is validated against the legal-edge table and then
/// applied with a conditional update on the expected current status.
pub struct RegistrationLifecycleService {
    registrations: Arc<dyn RegistrationStore>,
    slots: Arc<dyn SlotStore>,
    quota: Arc<SlotQuotaManager>,
    broadcaster: Arc<DoctorQueueBroadcaster>,
    geofence: GeoFence,
}

impl RegistrationLifecycleService {
    pub fn new(
        registrations: Arc<dyn RegistrationStore>,
        slots: Arc<dyn SlotStore>,
        quota: Arc<SlotQuotaManager>,
        broadcaster: Arc<DoctorQueueBroadcaster>,
        geofence: GeoFence,
    ) -> Self {
        Self { registrations, slots, quota, broadcaster, geofence }
    }

    pub async fn get(&self, registration_id: Uuid) -> Result<Registration, BookingQueueError> {
        self.registrations
            .get_registration(registration_id)
            .await?
            .ok_or(BookingQueueError::RegistrationNotFound(registration_id))
    }

    async fn transition(
        &self,
        registration: &Registration,
        to: RegistrationStatus,
    ) -> Result<Registration, BookingQueueError> {
        let from = registration.status;
        if !from.can_transition_to(to) {
            warn!("Rejected transition {} -> {} for registration {}", from, to, registration.id);
            return Err(BookingQueueError::InvalidTransition { from, to });
        }

        match self.registrations.update_status(registration.id, from, to).await? {
            Some(updated) => {
                info!("Registration {} moved {} -> {}", registration.id, from, to);
                Ok(updated)
            }
            None => {
                // Someone else moved it first; report against what is there now.
                let current = self.get(registration.id).await?;
                warn!(
                    "Lost race moving registration {} {} -> {}: now {}",
                    registration.id, from, to, current.status
                );
                Err(BookingQueueError::InvalidTransition { from: current.status, to })
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn pay(&self, registration_id: Uuid) -> Result<Registration, BookingQueueError> {
        let registration = self.get(registration_id).await?;
        self.transition(&registration, RegistrationStatus::Paid).await
    }

    #[instrument(skip(self))]
    pub async fn check_in(
        &self,
        registration_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<Registration, BookingQueueError> {
        let registration = self.get(registration_id).await?;

        if registration.status != RegistrationStatus::Paid {
            warn!(
                "Check-in rejected for registration {} in status {}",
                registration_id, registration.status
            );
            return Err(BookingQueueError::InvalidTransition {
                from: registration.status,
                to: RegistrationStatus::CheckedIn,
            });
        }

        if !self.geofence.contains(latitude, longitude) {
            let distance_meters = self.geofence.distance_to(latitude, longitude);
            warn!(
                "Check-in rejected for registration {}: {:.0} m from facility",
                registration_id, distance_meters
            );
            return Err(BookingQueueError::LocationRejected {
                distance_meters,
                radius_meters: self.geofence.radius_meters,
            });
        }

        let updated = self.transition(&registration, RegistrationStatus::CheckedIn).await?;
        self.broadcaster.on_enqueue(&updated).await;
        self.broadcaster.broadcast_quietly(updated.department_id).await;
        Ok(updated)
    }

    /// Calls the lowest-numbered waiting patient into consultation.
    #[instrument(skip(self))]
    pub async fn call_next(&self, doctor_id: Uuid) -> Result<Registration, BookingQueueError> {
        while let Some(candidate) = self.broadcaster.peek_next(doctor_id).await {
            match self.try_call(doctor_id, candidate).await? {
                Some(called) => return Ok(called),
                None => {
                    debug!("Dropping stale waiting entry {} for doctor {}", candidate, doctor_id);
                    self.broadcaster.on_dequeue(doctor_id, candidate).await;
                }
            }
        }

        // Empty cache (e.g. fresh restart): fall back to storage.
        let waiting = self
            .registrations
            .list_for_doctor(doctor_id, RegistrationStatus::CheckedIn)
            .await?;
        for registration in waiting {
            if let Some(called) = self.try_call(doctor_id, registration.id).await? {
                return Ok(called);
            }
        }

        Err(BookingQueueError::NoWaitingPatients(doctor_id))
    }

    /// `None` when the registration is no longer waiting for this doctor.
    async fn try_call(
        &self,
        doctor_id: Uuid,
        registration_id: Uuid,
    ) -> Result<Option<Registration>, BookingQueueError> {
        let Some(registration) = self.registrations.get_registration(registration_id).await? else {
            return Ok(None);
        };
        if registration.doctor_id != doctor_id || registration.status != RegistrationStatus::CheckedIn {
            return Ok(None);
        }

        match self.transition(&registration, RegistrationStatus::InConsultation).await {
            Ok(called) => {
                self.broadcaster.on_dequeue(doctor_id, called.id).await;
                self.broadcaster.broadcast_quietly(called.department_id).await;
                info!("Doctor {} called registration {} (queue number {})", doctor_id, called.id, called.queue_number);
                Ok(Some(called))
            }
            Err(BookingQueueError::InvalidTransition { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    pub async fn pause(&self, registration_id: Uuid) -> Result<Registration, BookingQueueError> {
        let registration = self.get(registration_id).await?;
        let updated = self.transition(&registration, RegistrationStatus::Paused).await?;
        self.broadcaster.broadcast_quietly(updated.department_id).await;
        Ok(updated)
    }

    /// Paused patients return straight to consultation, not to the waiting list.
    #[instrument(skip(self))]
    pub async fn resume(&self, registration_id: Uuid) -> Result<Registration, BookingQueueError> {
        let registration = self.get(registration_id).await?;
        let updated = self.transition(&registration, RegistrationStatus::InConsultation).await?;
        self.broadcaster.broadcast_quietly(updated.department_id).await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn complete(&self, registration_id: Uuid) -> Result<Registration, BookingQueueError> {
        let registration = self.get(registration_id).await?;
        let updated = self.transition(&registration, RegistrationStatus::Completed).await?;
        self.broadcaster.broadcast_quietly(updated.department_id).await;
        Ok(updated)
    }

    /// Cancels an unpaid or paid-but-not-checked-in registration and gives
    /// its place back to the slot.
    #[instrument(skip(self))]
    pub async fn cancel(&self, registration_id: Uuid) -> Result<Registration, BookingQueueError> {
        let registration = self.get(registration_id).await?;
        let updated = self.transition(&registration, RegistrationStatus::Cancelled).await?;

        // Row is already cancelled: a failing release is deferred, not surfaced.
        self.quota.return_place(updated.slot_id).await?;
        if let Err(e) = self.slots.adjust_persisted_count(updated.slot_id, -1).await {
            warn!("Persisted count on slot {} not decremented: {}", updated.slot_id, e);
        }
        self.broadcaster.broadcast_quietly(updated.department_id).await;

        info!(
            "Registration {} cancelled, slot {} place released",
            registration_id, updated.slot_id
        );
        Ok(updated)
    }
}
