use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::{SupabaseClient, RETURN_REPRESENTATION};

use crate::services::store::{in_call_order, RegistrationStore, SlotStore};
use crate::{BookingQueueError, Registration, RegistrationStatus, Shift, Slot, SlotCounters};

const SLOTS: &str = "slots";
const REGISTRATIONS: &str = "registrations";

/// PostgREST-backed store. Conditional updates are expressed as filters on
/// the PATCH, so an empty result set means the condition did not hold.
pub struct SupabaseStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn first_slot(&self, query: &str) -> Result<Option<Slot>, BookingQueueError> {
        let rows: Vec<Slot> = self.supabase.select(SLOTS, query).await?;
        Ok(rows.into_iter().next())
    }

    async fn registrations(&self, query: &str) -> Result<Vec<Registration>, BookingQueueError> {
        Ok(self.supabase.select(REGISTRATIONS, query).await?)
    }
}

// '+' in an offset would be read as a space in the query string.
fn timestamp_param(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl SlotStore for SupabaseStore {
    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, BookingQueueError> {
        self.first_slot(&format!("id=eq.{}", slot_id)).await
    }

    async fn insert_slot(&self, slot: &Slot) -> Result<(), BookingQueueError> {
        let _: Vec<Slot> = self
            .supabase
            .insert(SLOTS, serde_json::to_value(slot)?, RETURN_REPRESENTATION)
            .await?;
        Ok(())
    }

    async fn find_slot(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        shift: Shift,
    ) -> Result<Option<Slot>, BookingQueueError> {
        self.first_slot(&format!(
            "doctor_id=eq.{}&date=eq.{}&shift=eq.{}&limit=1",
            doctor_id, date, shift
        ))
        .await
    }

    async fn compare_and_swap_counts(
        &self,
        slot_id: Uuid,
        expected_version: u64,
        counters: SlotCounters,
    ) -> Result<Option<Slot>, BookingQueueError> {
        let rows: Vec<Slot> = self
            .supabase
            .update(
                SLOTS,
                &format!("id=eq.{}&version=eq.{}", slot_id, expected_version),
                json!({
                    "reserved_count": counters.reserved_count,
                    "issued_count": counters.issued_count,
                    "version": expected_version + 1,
                }),
            )
            .await?;

        if rows.is_empty() {
            debug!("Conditional counter update on slot {} matched no row", slot_id);
        }
        Ok(rows.into_iter().next())
    }

    async fn release_reserved(&self, slot_id: Uuid) -> Result<Option<Slot>, BookingQueueError> {
        let rows: Vec<Slot> = self
            .supabase
            .rpc("release_slot_reservation", json!({ "p_slot_id": slot_id }))
            .await?;

        match rows.into_iter().next() {
            Some(updated) => Ok(Some(updated)),
            // No row either means the count was already zero or the slot is gone.
            None => match self.get_slot(slot_id).await? {
                Some(_) => Ok(None),
                None => Err(BookingQueueError::SlotNotFound(slot_id)),
            },
        }
    }

    async fn adjust_persisted_count(&self, slot_id: Uuid, delta: i32) -> Result<(), BookingQueueError> {
        let rows: Vec<Slot> = self
            .supabase
            .rpc(
                "adjust_slot_persisted_count",
                json!({ "p_slot_id": slot_id, "p_delta": delta }),
            )
            .await?;

        if rows.is_empty() {
            return Err(BookingQueueError::SlotNotFound(slot_id));
        }
        Ok(())
    }

    async fn compare_and_swap_settings(
        &self,
        slot_id: Uuid,
        expected_version: u64,
        capacity: u32,
        is_active: bool,
    ) -> Result<Option<Slot>, BookingQueueError> {
        let rows: Vec<Slot> = self
            .supabase
            .update(
                SLOTS,
                &format!("id=eq.{}&version=eq.{}", slot_id, expected_version),
                json!({
                    "capacity": capacity,
                    "is_active": is_active,
                    "version": expected_version + 1,
                }),
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl RegistrationStore for SupabaseStore {
    async fn insert_registration(&self, registration: &Registration) -> Result<bool, BookingQueueError> {
        let rows: Vec<Registration> = self
            .supabase
            .insert(
                REGISTRATIONS,
                serde_json::to_value(registration)?,
                "return=representation,resolution=ignore-duplicates",
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn get_registration(&self, registration_id: Uuid) -> Result<Option<Registration>, BookingQueueError> {
        Ok(self
            .registrations(&format!("id=eq.{}", registration_id))
            .await?
            .into_iter()
            .next())
    }

    async fn update_status(
        &self,
        registration_id: Uuid,
        from: RegistrationStatus,
        to: RegistrationStatus,
    ) -> Result<Option<Registration>, BookingQueueError> {
        let rows: Vec<Registration> = self
            .supabase
            .update(
                REGISTRATIONS,
                &format!("id=eq.{}&status=eq.{}", registration_id, from.code()),
                json!({
                    "status": to.code(),
                    "updated_at": Utc::now(),
                }),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_active_booking(
        &self,
        patient_id: Uuid,
        slot_id: Uuid,
    ) -> Result<Option<Registration>, BookingQueueError> {
        Ok(self
            .registrations(&format!(
                "patient_id=eq.{}&slot_id=eq.{}&status=neq.{}&limit=1",
                patient_id,
                slot_id,
                RegistrationStatus::Cancelled.code()
            ))
            .await?
            .into_iter()
            .next())
    }

    async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        status: RegistrationStatus,
    ) -> Result<Vec<Registration>, BookingQueueError> {
        let rows = self
            .registrations(&format!("doctor_id=eq.{}&status=eq.{}", doctor_id, status.code()))
            .await?;
        Ok(in_call_order(rows))
    }

    async fn list_for_department(
        &self,
        department_id: Uuid,
        status: RegistrationStatus,
    ) -> Result<Vec<Registration>, BookingQueueError> {
        let rows = self
            .registrations(&format!("department_id=eq.{}&status=eq.{}", department_id, status.code()))
            .await?;
        Ok(in_call_order(rows))
    }

    async fn list_by_status(&self, status: RegistrationStatus) -> Result<Vec<Registration>, BookingQueueError> {
        let rows = self.registrations(&format!("status=eq.{}", status.code())).await?;
        Ok(in_call_order(rows))
    }

    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Registration>, BookingQueueError> {
        self.registrations(&format!(
            "status=eq.{}&created_at=lt.{}&order=created_at.asc",
            RegistrationStatus::PendingPayment.code(),
            timestamp_param(cutoff)
        ))
        .await
    }
}
