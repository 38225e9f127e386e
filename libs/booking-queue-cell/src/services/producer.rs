use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::services::queue::BookingQueue;
use crate::services::quota::SlotQuotaManager;
use crate::services::store::RegistrationStore;
use crate::{BookingMessage, BookingQueueError, Registration};

/// (patient, slot) pairs that have been reserved and enqueued but not yet
/// persisted by the consumer.
#[derive(Default)]
pub struct InFlightBookings {
    pairs: Mutex<HashSet<(Uuid, Uuid)>>,
}

impl InFlightBookings {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` if the pair is already in flight.
    pub async fn claim(&self, patient_id: Uuid, slot_id: Uuid) -> bool {
        self.pairs.lock().await.insert((patient_id, slot_id))
    }

    pub async fn release(&self, patient_id: Uuid, slot_id: Uuid) {
        self.pairs.lock().await.remove(&(patient_id, slot_id));
    }

    pub async fn len(&self) -> usize {
        self.pairs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pairs.lock().await.is_empty()
    }
}

/// Synchronous half of the booking pipeline: reserve, enqueue, answer.
pub struct BookingProducerService {
    registrations: Arc<dyn RegistrationStore>,
    quota: Arc<SlotQuotaManager>,
    queue: Arc<dyn BookingQueue>,
    in_flight: Arc<InFlightBookings>,
}

impl BookingProducerService {
    pub fn new(
        registrations: Arc<dyn RegistrationStore>,
        quota: Arc<SlotQuotaManager>,
        queue: Arc<dyn BookingQueue>,
        in_flight: Arc<InFlightBookings>,
    ) -> Self {
        Self { registrations, quota, queue, in_flight }
    }

    /// Reserves a place in `slot_id` and returns the provisional registration
    /// without waiting for it to be persisted.
    #[instrument(skip(self))]
    pub async fn submit(&self, patient_id: Uuid, slot_id: Uuid) -> Result<Registration, BookingQueueError> {
        if !self.in_flight.claim(patient_id, slot_id).await {
            warn!("Duplicate in-flight booking by patient {} for slot {}", patient_id, slot_id);
            return Err(BookingQueueError::DuplicateBooking { patient_id, slot_id });
        }

        match self.reserve_and_enqueue(patient_id, slot_id).await {
            Ok(registration) => Ok(registration),
            Err(e) => {
                self.in_flight.release(patient_id, slot_id).await;
                Err(e)
            }
        }
    }

    async fn reserve_and_enqueue(&self, patient_id: Uuid, slot_id: Uuid) -> Result<Registration, BookingQueueError> {
        if let Some(existing) = self.registrations.find_active_booking(patient_id, slot_id).await? {
            warn!(
                "Patient {} already holds registration {} for slot {}",
                patient_id, existing.id, slot_id
            );
            return Err(BookingQueueError::DuplicateBooking { patient_id, slot_id });
        }

        let reservation = self.quota.try_reserve(slot_id).await?;
        let message = BookingMessage::new(patient_id, slot_id, reservation.queue_number);

        if let Err(e) = self.queue.enqueue(&message).await {
            error!(
                "Failed to enqueue booking for patient {} on slot {}: {}; releasing reservation",
                patient_id, slot_id, e
            );
            if let Err(release_err) = self.quota.return_place(slot_id).await {
                error!("Compensating release on slot {} failed: {}", slot_id, release_err);
            }
            return Err(e);
        }

        let registration = Registration::from_message(&message, &reservation.slot);

        info!(
            "Booking queued for patient {} on slot {} as registration {} (queue number {})",
            patient_id, slot_id, registration.id, registration.queue_number
        );

        Ok(registration)
    }
}
