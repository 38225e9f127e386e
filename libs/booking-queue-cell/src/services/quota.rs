use std::sync::Arc;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::services::cache::CapacityCache;
use crate::services::store::SlotStore;
use crate::{BookingQueueError, Reservation, Slot, SlotCounters};

/// Bounded optimistic-retry settings for `try_reserve`.
#[derive(Debug, Clone)]
pub struct ReservationPolicy {
    pub max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            backoff_min: Duration::from_millis(5),
            backoff_max: Duration::from_millis(20),
        }
    }
}

impl ReservationPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        let backoff_min = config.reservation_backoff_min_ms;
        let backoff_max = config.reservation_backoff_max_ms.max(backoff_min);
        Self {
            max_attempts: config.reservation_max_attempts.max(1),
            backoff_min: Duration::from_millis(backoff_min),
            backoff_max: Duration::from_millis(backoff_max),
        }
    }

    /// Uniformly jittered pause between attempts.
    pub fn jitter(&self) -> Duration {
        let min = self.backoff_min.as_millis() as u64;
        let max = self.backoff_max.as_millis() as u64;
        if max <= min {
            return self.backoff_min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Admission control for slot capacity.
///
/// Every grant goes through the store's versioned conditional update, so
/// `0 <= reserved_count <= capacity` holds under any interleaving. The
/// capacity cache is refreshed after each change but is never consulted when
/// deciding a reservation.
pub struct SlotQuotaManager {
    slots: Arc<dyn SlotStore>,
    cache: Arc<dyn CapacityCache>,
    policy: ReservationPolicy,
    /// Slots owed one place back whose release kept failing.
    deferred_releases: Mutex<Vec<Uuid>>,
}

impl SlotQuotaManager {
    pub fn new(
        slots: Arc<dyn SlotStore>,
        cache: Arc<dyn CapacityCache>,
        policy: ReservationPolicy,
    ) -> Self {
        Self {
            slots,
            cache,
            policy,
            deferred_releases: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    #[instrument(skip(self))]
    pub async fn try_reserve(&self, slot_id: Uuid) -> Result<Reservation, BookingQueueError> {
        for attempt in 1..=self.policy.max_attempts {
            let slot = self
                .slots
                .get_slot(slot_id)
                .await?
                .ok_or(BookingQueueError::SlotNotFound(slot_id))?;

            if !slot.is_active {
                return Err(BookingQueueError::SlotInactive(slot_id));
            }

            if slot.is_full() {
                debug!("Slot {} full ({}/{})", slot_id, slot.reserved_count, slot.capacity);
                return Err(BookingQueueError::CapacityExhausted { slot_id });
            }

            let counters = SlotCounters {
                reserved_count: slot.reserved_count + 1,
                issued_count: slot.issued_count + 1,
            };

            match self
                .slots
                .compare_and_swap_counts(slot_id, slot.version, counters)
                .await?
            {
                Some(updated) => {
                    info!(
                        "Reserved slot {} position {} ({}/{}) on attempt {}",
                        slot_id, counters.issued_count, updated.reserved_count, updated.capacity, attempt
                    );
                    self.refresh_cache(&updated).await;
                    return Ok(Reservation {
                        queue_number: counters.issued_count,
                        slot: updated,
                    });
                }
                None => {
                    let pause = self.policy.jitter();
                    debug!(
                        "Version conflict on slot {} (attempt {}), retrying in {:?}",
                        slot_id, attempt, pause
                    );
                    tokio::time::sleep(pause).await;
                }
            }
        }

        warn!(
            "Giving up on slot {} after {} contended attempts",
            slot_id, self.policy.max_attempts
        );
        Err(BookingQueueError::CapacityContention {
            slot_id,
            attempts: self.policy.max_attempts,
        })
    }

    /// Returns one unit of capacity. `false` when the counter was already zero.
    pub async fn release(&self, slot_id: Uuid) -> Result<bool, BookingQueueError> {
        match self.slots.release_reserved(slot_id).await? {
            Some(updated) => {
                info!(
                    "Released reservation on slot {} ({}/{})",
                    slot_id, updated.reserved_count, updated.capacity
                );
                self.refresh_cache(&updated).await;
                Ok(true)
            }
            None => {
                warn!("Release on slot {} ignored: reserved count already zero", slot_id);
                Ok(false)
            }
        }
    }

    /// Gives back the place of a booking that will never hold it again.
    ///
    /// Transient store failures are retried with the reservation backoff; if
    /// they persist, the release is queued for `retry_deferred_releases`.
    /// Only non-transient errors (such as a missing slot) are returned.
    #[instrument(skip(self))]
    pub async fn return_place(&self, slot_id: Uuid) -> Result<(), BookingQueueError> {
        match self.release_with_retry(slot_id).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_transient() => {
                error!("Deferring release of a place on slot {}: {}", slot_id, e);
                self.deferred_releases.lock().await.push(slot_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn release_with_retry(&self, slot_id: Uuid) -> Result<bool, BookingQueueError> {
        let mut attempt = 1;
        loop {
            match self.release(slot_id).await {
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let pause = self.policy.jitter();
                    debug!(
                        "Release on slot {} failed (attempt {}): {}; retrying in {:?}",
                        slot_id, attempt, e, pause
                    );
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    /// One pass over the deferred releases. Returns how many went through.
    pub async fn retry_deferred_releases(&self) -> usize {
        let pending = std::mem::take(&mut *self.deferred_releases.lock().await);
        if pending.is_empty() {
            return 0;
        }

        let mut released = 0;
        let mut still_owed = Vec::new();
        for slot_id in pending {
            match self.release(slot_id).await {
                Ok(_) => released += 1,
                Err(e) if e.is_transient() => {
                    warn!("Deferred release on slot {} failed again: {}", slot_id, e);
                    still_owed.push(slot_id);
                }
                Err(e) => error!("Dropping deferred release on slot {}: {}", slot_id, e),
            }
        }

        if !still_owed.is_empty() {
            self.deferred_releases.lock().await.extend(still_owed);
        }
        if released > 0 {
            info!("Returned {} deferred places", released);
        }
        released
    }

    pub async fn deferred_release_count(&self) -> usize {
        self.deferred_releases.lock().await.len()
    }

    /// Approximate remaining capacity: cache first, store on miss.
    pub async fn remaining_capacity(&self, slot_id: Uuid) -> Result<u32, BookingQueueError> {
        match self.cache.get_remaining(slot_id).await {
            Ok(Some(remaining)) => return Ok(remaining),
            Ok(None) => debug!("Capacity cache miss for slot {}", slot_id),
            Err(e) => warn!("Capacity cache read failed for slot {}: {}", slot_id, e),
        }

        let slot = self
            .slots
            .get_slot(slot_id)
            .await?
            .ok_or(BookingQueueError::SlotNotFound(slot_id))?;
        self.refresh_cache(&slot).await;
        Ok(if slot.is_active { slot.remaining() } else { 0 })
    }

    pub async fn set_capacity(&self, slot_id: Uuid, capacity: u32) -> Result<Slot, BookingQueueError> {
        if capacity == 0 {
            return Err(BookingQueueError::ValidationError("capacity must be at least 1".to_string()));
        }

        let updated = self
            .update_settings(slot_id, |slot| {
                if capacity < slot.reserved_count {
                    return Err(BookingQueueError::ValidationError(format!(
                        "capacity {} is below the {} reservations already granted",
                        capacity, slot.reserved_count
                    )));
                }
                Ok((capacity, slot.is_active))
            })
            .await?;

        info!("Slot {} capacity set to {}", slot_id, capacity);
        Ok(updated)
    }

    pub async fn set_active(&self, slot_id: Uuid, is_active: bool) -> Result<Slot, BookingQueueError> {
        let updated = self
            .update_settings(slot_id, |slot| Ok((slot.capacity, is_active)))
            .await?;

        info!("Slot {} active flag set to {}", slot_id, is_active);
        Ok(updated)
    }

    /// Same optimistic loop as `try_reserve`, for administrative changes.
    /// `decide` sees the current row and returns the new (capacity, is_active).
    async fn update_settings<F>(&self, slot_id: Uuid, decide: F) -> Result<Slot, BookingQueueError>
    where
        F: Fn(&Slot) -> Result<(u32, bool), BookingQueueError>,
    {
        for attempt in 1..=self.policy.max_attempts {
            let slot = self
                .slots
                .get_slot(slot_id)
                .await?
                .ok_or(BookingQueueError::SlotNotFound(slot_id))?;

            let (capacity, is_active) = decide(&slot)?;

            if let Some(updated) = self
                .slots
                .compare_and_swap_settings(slot_id, slot.version, capacity, is_active)
                .await?
            {
                self.refresh_cache(&updated).await;
                return Ok(updated);
            }

            debug!("Version conflict updating slot {} settings (attempt {})", slot_id, attempt);
            tokio::time::sleep(self.policy.jitter()).await;
        }

        Err(BookingQueueError::CapacityContention {
            slot_id,
            attempts: self.policy.max_attempts,
        })
    }

    /// Best effort: a failed cache write is logged, never surfaced.
    pub async fn refresh_cache(&self, slot: &Slot) {
        let remaining = if slot.is_active { slot.remaining() } else { 0 };
        if let Err(e) = self.cache.set_remaining(slot.id, remaining).await {
            warn!("Failed to refresh capacity cache for slot {}: {}", slot.id, e);
            // A stale entry is worse than a miss.
            if let Err(e) = self.cache.invalidate(slot.id).await {
                debug!("Failed to invalidate capacity cache for slot {}: {}", slot.id, e);
            }
        }
    }
}
