use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

use crate::RegistrationStatus;

#[derive(Error, Debug)]
pub enum BookingQueueError {
    #[error("No capacity left in slot {slot_id}")]
    CapacityExhausted { slot_id: Uuid },

    #[error("Slot {slot_id} is contended: gave up after {attempts} reservation attempts")]
    CapacityContention { slot_id: Uuid, attempts: u32 },

    #[error("Slot {0} is not open for booking")]
    SlotInactive(Uuid),

    #[error("Patient {patient_id} already holds an active booking for slot {slot_id}")]
    DuplicateBooking { patient_id: Uuid, slot_id: Uuid },

    #[error("Invalid registration status transition from {from} to {to}")]
    InvalidTransition { from: RegistrationStatus, to: RegistrationStatus },

    #[error("Check-in location is {distance_meters:.0} m from the facility, outside the {radius_meters:.0} m radius")]
    LocationRejected { distance_meters: f64, radius_meters: f64 },

    #[error("Registration not found: {0}")]
    RegistrationNotFound(Uuid),

    #[error("Slot not found: {0}")]
    SlotNotFound(Uuid),

    #[error("No waiting patients for doctor {0}")]
    NoWaitingPatients(Uuid),

    #[error("Booking message {message_id} references missing slot {slot_id}")]
    DataAnomaly { message_id: Uuid, slot_id: Uuid },

    #[error("Queue operation failed: {0}")]
    QueueError(String),

    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl BookingQueueError {
    /// Both outright exhaustion and a lost retry race mean "no slot for you".
    pub fn is_capacity_error(&self) -> bool {
        matches!(
            self,
            BookingQueueError::CapacityExhausted { .. } | BookingQueueError::CapacityContention { .. }
        )
    }

    /// Failures of the backing store or transport rather than of the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BookingQueueError::QueueError(_)
                | BookingQueueError::RedisError(_)
                | BookingQueueError::DatabaseError(_)
        )
    }
}

impl From<anyhow::Error> for BookingQueueError {
    fn from(err: anyhow::Error) -> Self {
        BookingQueueError::DatabaseError(err.to_string())
    }
}

impl From<BookingQueueError> for AppError {
    fn from(err: BookingQueueError) -> Self {
        let message = err.to_string();
        match err {
            BookingQueueError::CapacityExhausted { .. }
            | BookingQueueError::CapacityContention { .. }
            | BookingQueueError::SlotInactive(_)
            | BookingQueueError::DuplicateBooking { .. }
            | BookingQueueError::InvalidTransition { .. } => AppError::Conflict(message),
            BookingQueueError::LocationRejected { .. } => AppError::Forbidden(message),
            BookingQueueError::RegistrationNotFound(_)
            | BookingQueueError::SlotNotFound(_)
            | BookingQueueError::NoWaitingPatients(_) => AppError::NotFound(message),
            BookingQueueError::ValidationError(_) => AppError::ValidationError(message),
            BookingQueueError::DatabaseError(_) => AppError::Database(message),
            BookingQueueError::DataAnomaly { .. }
            | BookingQueueError::QueueError(_)
            | BookingQueueError::RedisError(_)
            | BookingQueueError::SerializationError(_) => AppError::Internal(message),
        }
    }
}
