#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use booking_queue_cell::*;
use shared_utils::test_utils::TestConfig;

pub const FACILITY_LAT: f64 = 31.2304;
pub const FACILITY_LON: f64 = 121.4737;

/// In-memory wiring with handles on the concrete backends, so tests can
/// seed rows and inspect the queue directly.
pub struct TestHarness {
    pub config: TestConfig,
    pub state: Arc<BookingQueueState>,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryBookingQueue>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(TestConfig::default())
    }

    pub fn with_config(config: TestConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryBookingQueue::new());
        let state = Self::build_state(&config, &store, &queue);
        Self { config, state, store, queue }
    }

    fn build_state(
        config: &TestConfig,
        store: &Arc<MemoryStore>,
        queue: &Arc<MemoryBookingQueue>,
    ) -> Arc<BookingQueueState> {
        Arc::new(BookingQueueState::assemble(
            config.to_arc(),
            store.clone(),
            store.clone(),
            queue.clone(),
            Arc::new(MemoryCapacityCache::new()),
        ))
    }

    /// Fresh services over the same storage and queue, as after a process restart.
    pub fn restart(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Self::build_state(&self.config, &self.store, &self.queue),
            store: self.store.clone(),
            queue: self.queue.clone(),
        }
    }

    pub async fn slot(&self, capacity: u32) -> Slot {
        self.slot_for(Uuid::new_v4(), Uuid::new_v4(), capacity).await
    }

    pub async fn slot_for(&self, doctor_id: Uuid, department_id: Uuid, capacity: u32) -> Slot {
        self.session_slot(doctor_id, department_id, test_date(), Shift::Morning, capacity)
            .await
    }

    pub async fn session_slot(
        &self,
        doctor_id: Uuid,
        department_id: Uuid,
        date: NaiveDate,
        shift: Shift,
        capacity: u32,
    ) -> Slot {
        self.state
            .schedule
            .create_slot(NewSlot {
                doctor_id,
                department_id,
                room_id: Uuid::new_v4(),
                date,
                shift,
                capacity,
                fee: 25.0,
            })
            .await
            .expect("slot creation should succeed")
    }

    /// Drains the queue through the consumer until nothing is left.
    pub async fn drain(&self) -> BatchReport {
        let mut total = BatchReport::default();
        loop {
            let report = self.state.consumer.run_once().await.expect("consumer batch");
            if report.handled() == 0 && report.requeued == 0 {
                return total;
            }
            total.persisted += report.persisted;
            total.duplicates += report.duplicates;
            total.dead_lettered += report.dead_lettered;
            total.requeued += report.requeued;
        }
    }

    /// Books, persists and pays; returns the paid registration.
    pub async fn paid_registration(&self, slot_id: Uuid) -> Registration {
        let provisional = self
            .state
            .producer
            .submit(Uuid::new_v4(), slot_id)
            .await
            .expect("booking should succeed");
        self.drain().await;
        self.state
            .lifecycle
            .pay(provisional.id)
            .await
            .expect("payment should succeed")
    }

    pub async fn checked_in_registration(&self, slot_id: Uuid) -> Registration {
        let paid = self.paid_registration(slot_id).await;
        self.state
            .lifecycle
            .check_in(paid.id, FACILITY_LAT, FACILITY_LON)
            .await
            .expect("check-in should succeed")
    }

    pub async fn reserved_count(&self, slot_id: Uuid) -> u32 {
        self.state
            .slots
            .get_slot(slot_id)
            .await
            .expect("slot lookup")
            .expect("slot exists")
            .reserved_count
    }
}

pub fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 3).expect("valid date")
}
