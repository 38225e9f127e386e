use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// SLOTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Shift {
    Morning,
    Afternoon,
    Emergency,
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shift::Morning => write!(f, "morning"),
            Shift::Afternoon => write!(f, "afternoon"),
            Shift::Emergency => write!(f, "emergency"),
        }
    }
}

/// One bookable doctor/date/shift block.
///
/// `reserved_count` and `issued_count` only change through the versioned
/// conditional update (reservation) or the floor-at-zero release;
/// `persisted_count` is owned by the booking consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub department_id: Uuid,
    pub room_id: Uuid,
    pub date: NaiveDate,
    pub shift: Shift,
    pub capacity: u32,
    pub reserved_count: u32,
    /// Queue numbers handed out so far; never decremented.
    pub issued_count: u32,
    pub persisted_count: u32,
    pub version: u64,
    pub fee: f64,
    pub is_active: bool,
}

impl Slot {
    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.reserved_count)
    }

    pub fn is_full(&self) -> bool {
        self.reserved_count >= self.capacity
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSlot {
    pub doctor_id: Uuid,
    pub department_id: Uuid,
    pub room_id: Uuid,
    pub date: NaiveDate,
    pub shift: Shift,
    pub capacity: u32,
    pub fee: f64,
}

impl NewSlot {
    pub fn into_slot(self) -> Slot {
        Slot {
            id: Uuid::new_v4(),
            doctor_id: self.doctor_id,
            department_id: self.department_id,
            room_id: self.room_id,
            date: self.date,
            shift: self.shift,
            capacity: self.capacity,
            reserved_count: 0,
            issued_count: 0,
            persisted_count: 0,
            version: 0,
            fee: self.fee,
            is_active: true,
        }
    }
}

/// Recurring weekly schedule entry used to generate slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyTemplate {
    pub doctor_id: Uuid,
    pub department_id: Uuid,
    pub room_id: Uuid,
    pub weekday: Weekday,
    pub shift: Shift,
    pub capacity: u32,
    pub fee: f64,
}

/// Counter values written by a successful reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCounters {
    pub reserved_count: u32,
    pub issued_count: u32,
}

#[derive(Debug, Clone)]
pub struct Reservation {
    pub slot: Slot,
    pub queue_number: u32,
}

// ==============================================================================
// REGISTRATIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(into = "u8", try_from = "u8")]
pub enum RegistrationStatus {
    PendingPayment,
    Paid,
    CheckedIn,
    InConsultation,
    Completed,
    Cancelled,
    Paused,
}

impl RegistrationStatus {
    pub fn code(self) -> u8 {
        match self {
            RegistrationStatus::PendingPayment => 0,
            RegistrationStatus::Paid => 1,
            RegistrationStatus::CheckedIn => 2,
            RegistrationStatus::InConsultation => 3,
            RegistrationStatus::Completed => 4,
            RegistrationStatus::Cancelled => 5,
            RegistrationStatus::Paused => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RegistrationStatus::PendingPayment),
            1 => Some(RegistrationStatus::Paid),
            2 => Some(RegistrationStatus::CheckedIn),
            3 => Some(RegistrationStatus::InConsultation),
            4 => Some(RegistrationStatus::Completed),
            5 => Some(RegistrationStatus::Cancelled),
            6 => Some(RegistrationStatus::Paused),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RegistrationStatus::Completed | RegistrationStatus::Cancelled)
    }

    /// Anything but a cancelled registration blocks a second booking of the same slot.
    pub fn is_active(self) -> bool {
        self != RegistrationStatus::Cancelled
    }

    pub fn can_transition_to(self, target: RegistrationStatus) -> bool {
        use RegistrationStatus::*;
        matches!(
            (self, target),
            (PendingPayment, Paid)
                | (PendingPayment, Cancelled)
                | (Paid, Cancelled)
                | (Paid, CheckedIn)
                | (CheckedIn, InConsultation)
                | (InConsultation, Paused)
                | (Paused, InConsultation)
                | (InConsultation, Completed)
        )
    }
}

impl From<RegistrationStatus> for u8 {
    fn from(status: RegistrationStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for RegistrationStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        RegistrationStatus::from_code(code)
            .ok_or_else(|| format!("unknown registration status code {}", code))
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationStatus::PendingPayment => "pending_payment",
            RegistrationStatus::Paid => "paid",
            RegistrationStatus::CheckedIn => "checked_in",
            RegistrationStatus::InConsultation => "in_consultation",
            RegistrationStatus::Completed => "completed",
            RegistrationStatus::Cancelled => "cancelled",
            RegistrationStatus::Paused => "paused",
        };
        write!(f, "{}({})", name, self.code())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registration {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub department_id: Uuid,
    pub slot_id: Uuid,
    /// Copied from the slot; queue numbers only count within one date/shift.
    pub date: NaiveDate,
    pub shift: Shift,
    pub status: RegistrationStatus,
    pub queue_number: u32,
    pub fee: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sort key for calling patients: earlier sessions first, then queue number.
pub type CallOrder = (NaiveDate, Shift, u32, Uuid);

impl Registration {
    pub fn call_order(&self) -> CallOrder {
        (self.date, self.shift, self.queue_number, self.id)
    }

    /// The row the consumer persists for a booking message.
    pub fn from_message(message: &BookingMessage, slot: &Slot) -> Self {
        Self {
            id: message.registration_id,
            patient_id: message.patient_id,
            doctor_id: slot.doctor_id,
            department_id: slot.department_id,
            slot_id: slot.id,
            date: slot.date,
            shift: slot.shift,
            status: RegistrationStatus::PendingPayment,
            queue_number: message.queue_number,
            fee: slot.fee,
            created_at: message.submitted_at,
            updated_at: Utc::now(),
        }
    }
}

// ==============================================================================
// QUEUE PAYLOADS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingMessage {
    pub message_id: Uuid,
    pub registration_id: Uuid,
    pub patient_id: Uuid,
    pub slot_id: Uuid,
    pub queue_number: u32,
    pub submitted_at: DateTime<Utc>,
}

impl BookingMessage {
    pub fn new(patient_id: Uuid, slot_id: Uuid, queue_number: u32) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            registration_id: Uuid::new_v4(),
            patient_id,
            slot_id,
            queue_number,
            submitted_at: Utc::now(),
        }
    }
}

/// A dequeued message plus the transport handle needed to ack it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: BookingMessage,
    pub receipt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message: BookingMessage,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub persisted: usize,
    pub duplicates: usize,
    pub dead_lettered: usize,
    pub requeued: usize,
}

impl BatchReport {
    pub fn handled(&self) -> usize {
        self.persisted + self.duplicates + self.dead_lettered
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending_messages: u64,
    pub in_flight_messages: u64,
    pub dead_letters: u64,
    pub persisted_total: u64,
    pub dead_lettered_total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub consumer_id: String,
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_id: format!("consumer-{}", Uuid::new_v4()),
            batch_size: 10,
            poll_interval_ms: 500,
            error_backoff_ms: 1000,
        }
    }
}

// ==============================================================================
// LIVE DISPLAY
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub registration_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub shift: Shift,
    pub queue_number: u32,
    pub status: RegistrationStatus,
}

impl QueueEntry {
    pub fn call_order(&self) -> CallOrder {
        (self.date, self.shift, self.queue_number, self.registration_id)
    }
}

impl From<&Registration> for QueueEntry {
    fn from(registration: &Registration) -> Self {
        Self {
            registration_id: registration.id,
            patient_id: registration.patient_id,
            doctor_id: registration.doctor_id,
            date: registration.date,
            shift: registration.shift,
            queue_number: registration.queue_number,
            status: registration.status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSnapshot {
    pub department_id: Uuid,
    pub current_patient: Option<QueueEntry>,
    pub waiting_list: Vec<QueueEntry>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub cancelled: usize,
    pub failed: usize,
    /// Deferred place returns that went through on this pass.
    pub released: usize,
}

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub patient_id: Uuid,
    pub slot_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInRequest {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCapacityRequest {
    pub capacity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateScheduleRequest {
    pub start_date: NaiveDate,
    pub days: u32,
    pub templates: Vec<WeeklyTemplate>,
}
