mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use booking_queue_cell::*;
use common::{TestHarness, FACILITY_LAT, FACILITY_LON};
use shared_utils::test_utils::TestConfig;

#[tokio::test]
async fn booking_walks_through_the_full_visit() {
    let harness = TestHarness::new();
    let slot = harness.slot(5).await;
    let lifecycle = &harness.state.lifecycle;

    let checked_in = harness.checked_in_registration(slot.id).await;
    assert_eq!(checked_in.status, RegistrationStatus::CheckedIn);

    let called = lifecycle.call_next(slot.doctor_id).await.unwrap();
    assert_eq!(called.id, checked_in.id);
    assert_eq!(called.status, RegistrationStatus::InConsultation);

    let paused = lifecycle.pause(called.id).await.unwrap();
    assert_eq!(paused.status, RegistrationStatus::Paused);

    let resumed = lifecycle.resume(called.id).await.unwrap();
    assert_eq!(resumed.status, RegistrationStatus::InConsultation);

    let completed = lifecycle.complete(called.id).await.unwrap();
    assert_eq!(completed.status, RegistrationStatus::Completed);
}

#[tokio::test]
async fn illegal_transitions_are_domain_errors() {
    let harness = TestHarness::new();
    let slot = harness.slot(5).await;
    let lifecycle = &harness.state.lifecycle;

    let provisional = harness.state.producer.submit(Uuid::new_v4(), slot.id).await.unwrap();
    harness.drain().await;

    // 0 -> 4 skips payment, check-in and consultation
    assert_matches!(
        lifecycle.complete(provisional.id).await,
        Err(BookingQueueError::InvalidTransition {
            from: RegistrationStatus::PendingPayment,
            to: RegistrationStatus::Completed,
        })
    );
    assert_matches!(
        lifecycle.check_in(provisional.id, FACILITY_LAT, FACILITY_LON).await,
        Err(BookingQueueError::InvalidTransition { from: RegistrationStatus::PendingPayment, .. })
    );

    lifecycle.pay(provisional.id).await.unwrap();
    assert_matches!(
        lifecycle.pay(provisional.id).await,
        Err(BookingQueueError::InvalidTransition { from: RegistrationStatus::Paid, to: RegistrationStatus::Paid })
    );
}

#[tokio::test]
async fn missing_registration_is_reported() {
    let harness = TestHarness::new();
    let missing = Uuid::new_v4();

    assert_matches!(
        harness.state.lifecycle.pay(missing).await,
        Err(BookingQueueError::RegistrationNotFound(id)) if id == missing
    );
}

#[tokio::test]
async fn resume_never_returns_to_waiting() {
    let harness = TestHarness::new();
    let slot = harness.slot(5).await;
    let lifecycle = &harness.state.lifecycle;

    harness.checked_in_registration(slot.id).await;
    let called = lifecycle.call_next(slot.doctor_id).await.unwrap();
    lifecycle.pause(called.id).await.unwrap();

    let resumed = tokio_test::assert_ok!(lifecycle.resume(called.id).await);
    assert_eq!(resumed.status, RegistrationStatus::InConsultation);
    assert!(harness.state.broadcaster.waiting_list(slot.doctor_id).await.is_empty());
}

#[tokio::test]
async fn check_in_outside_radius_is_rejected() {
    let harness = TestHarness::new();
    let slot = harness.slot(5).await;
    let paid = harness.paid_registration(slot.id).await;

    // roughly 7.7 km north of the facility
    let result = harness.state.lifecycle.check_in(paid.id, 31.3, FACILITY_LON).await;
    assert_matches!(
        result,
        Err(BookingQueueError::LocationRejected { distance_meters, radius_meters })
            if distance_meters > 7_000.0 && radius_meters == 500.0
    );

    let unchanged = harness.state.lifecycle.get(paid.id).await.unwrap();
    assert_eq!(unchanged.status, RegistrationStatus::Paid);
}

#[tokio::test]
async fn zero_radius_accepts_the_exact_facility_point() {
    let harness = TestHarness::with_config(TestConfig {
        checkin_radius_meters: 0.0,
        ..TestConfig::default()
    });
    let slot = harness.slot(5).await;
    let paid = harness.paid_registration(slot.id).await;

    let checked_in = harness
        .state
        .lifecycle
        .check_in(paid.id, FACILITY_LAT, FACILITY_LON)
        .await
        .unwrap();
    assert_eq!(checked_in.status, RegistrationStatus::CheckedIn);
}

#[tokio::test]
async fn cancel_before_check_in_releases_the_place() {
    let harness = TestHarness::new();
    let slot = harness.slot(2).await;
    let lifecycle = &harness.state.lifecycle;
    let before = harness.state.quota.remaining_capacity(slot.id).await.unwrap();

    let provisional = harness.state.producer.submit(Uuid::new_v4(), slot.id).await.unwrap();
    harness.drain().await;
    let cancelled = lifecycle.cancel(provisional.id).await.unwrap();
    assert_eq!(cancelled.status, RegistrationStatus::Cancelled);

    let paid = harness.paid_registration(slot.id).await;
    lifecycle.cancel(paid.id).await.unwrap();

    assert_eq!(harness.state.quota.remaining_capacity(slot.id).await.unwrap(), before);
    assert_eq!(harness.reserved_count(slot.id).await, 0);
}

#[tokio::test]
async fn cancel_after_consultation_starts_is_refused() {
    let harness = TestHarness::new();
    let slot = harness.slot(2).await;
    let lifecycle = &harness.state.lifecycle;

    harness.checked_in_registration(slot.id).await;
    let called = lifecycle.call_next(slot.doctor_id).await.unwrap();

    assert_matches!(
        lifecycle.cancel(called.id).await,
        Err(BookingQueueError::InvalidTransition { from: RegistrationStatus::InConsultation, .. })
    );
    assert_eq!(harness.reserved_count(slot.id).await, 1);
}

#[tokio::test]
async fn cancelled_patient_can_book_the_same_slot_again() {
    let harness = TestHarness::new();
    let slot = harness.slot(2).await;
    let patient_id = Uuid::new_v4();

    let first = harness.state.producer.submit(patient_id, slot.id).await.unwrap();
    assert_matches!(
        harness.state.producer.submit(patient_id, slot.id).await,
        Err(BookingQueueError::DuplicateBooking { .. })
    );

    harness.drain().await;
    assert_matches!(
        harness.state.producer.submit(patient_id, slot.id).await,
        Err(BookingQueueError::DuplicateBooking { .. })
    );

    harness.state.lifecycle.cancel(first.id).await.unwrap();
    let second = harness.state.producer.submit(patient_id, slot.id).await.unwrap();
    assert_eq!(second.queue_number, 2);
}

#[tokio::test]
async fn call_next_with_nobody_waiting_fails() {
    let harness = TestHarness::new();
    let doctor_id = Uuid::new_v4();

    assert_matches!(
        harness.state.lifecycle.call_next(doctor_id).await,
        Err(BookingQueueError::NoWaitingPatients(id)) if id == doctor_id
    );
}

#[tokio::test]
async fn call_next_picks_the_lowest_queue_number_not_arrival_order() {
    let harness = TestHarness::new();
    let slot = harness.slot(5).await;
    let lifecycle = &harness.state.lifecycle;

    let first = harness.paid_registration(slot.id).await;
    let second = harness.paid_registration(slot.id).await;
    let third = harness.paid_registration(slot.id).await;

    for registration in [&third, &first, &second] {
        lifecycle.check_in(registration.id, FACILITY_LAT, FACILITY_LON).await.unwrap();
    }

    let called: Vec<u32> = [
        lifecycle.call_next(slot.doctor_id).await.unwrap(),
        lifecycle.call_next(slot.doctor_id).await.unwrap(),
        lifecycle.call_next(slot.doctor_id).await.unwrap(),
    ]
    .iter()
    .map(|r| r.queue_number)
    .collect();

    assert_eq!(called, vec![1, 2, 3]);
}

#[tokio::test]
async fn call_next_falls_back_to_storage_after_restart() {
    let harness = TestHarness::new();
    let slot = harness.slot(5).await;

    let first = harness.checked_in_registration(slot.id).await;
    harness.checked_in_registration(slot.id).await;

    let restarted = harness.restart();
    assert!(restarted.state.broadcaster.waiting_list(slot.doctor_id).await.is_empty());

    let called = restarted.state.lifecycle.call_next(slot.doctor_id).await.unwrap();
    assert_eq!(called.id, first.id);
    assert_eq!(called.queue_number, 1);
}

#[tokio::test]
async fn rebuild_restores_waiting_lists() {
    let harness = TestHarness::new();
    let slot = harness.slot(5).await;
    harness.checked_in_registration(slot.id).await;
    harness.checked_in_registration(slot.id).await;

    let restarted = harness.restart();
    assert_eq!(restarted.state.broadcaster.rebuild_from_store().await.unwrap(), 2);

    let waiting = restarted.state.broadcaster.waiting_list(slot.doctor_id).await;
    assert_eq!(waiting.iter().map(|e| e.queue_number).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn call_next_serves_earlier_sessions_first() {
    let harness = TestHarness::new();
    let doctor_id = Uuid::new_v4();
    let department_id = Uuid::new_v4();
    let monday = common::test_date();
    let tuesday = monday.succ_opt().expect("next day");

    let afternoon = harness.session_slot(doctor_id, department_id, monday, Shift::Afternoon, 5).await;
    let morning = harness.session_slot(doctor_id, department_id, monday, Shift::Morning, 5).await;
    let next_day = harness.session_slot(doctor_id, department_id, tuesday, Shift::Morning, 5).await;

    // Queue numbers restart in every session, so three patients hold number 1.
    let next_day_1 = harness.checked_in_registration(next_day.id).await;
    let afternoon_1 = harness.checked_in_registration(afternoon.id).await;
    let morning_1 = harness.checked_in_registration(morning.id).await;
    let morning_2 = harness.checked_in_registration(morning.id).await;
    assert_eq!(
        [next_day_1.queue_number, afternoon_1.queue_number, morning_1.queue_number],
        [1, 1, 1]
    );

    let expected = vec![morning_1.id, morning_2.id, afternoon_1.id, next_day_1.id];

    let waiting: Vec<Uuid> = harness
        .state
        .broadcaster
        .waiting_list(doctor_id)
        .await
        .iter()
        .map(|e| e.registration_id)
        .collect();
    assert_eq!(waiting, expected);

    let snapshot = harness.state.broadcaster.snapshot(department_id).await.unwrap();
    let displayed: Vec<Uuid> = snapshot.waiting_list.iter().map(|e| e.registration_id).collect();
    assert_eq!(displayed, expected);

    // The storage fallback after a restart calls in the same order.
    let restarted = harness.restart();
    let mut called = Vec::new();
    for _ in 0..expected.len() {
        called.push(restarted.state.lifecycle.call_next(doctor_id).await.unwrap().id);
    }
    assert_eq!(called, expected);
}

/// Slot storage whose floor-at-zero release fails while `failures` is non-zero.
struct FailingRelease {
    inner: Arc<MemoryStore>,
    failures: Mutex<usize>,
}

impl FailingRelease {
    fn new(inner: Arc<MemoryStore>, failures: usize) -> Self {
        Self { inner, failures: Mutex::new(failures) }
    }

    async fn recover(&self) {
        *self.failures.lock().await = 0;
    }
}

#[async_trait]
impl SlotStore for FailingRelease {
    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, BookingQueueError> {
        self.inner.get_slot(slot_id).await
    }

    async fn insert_slot(&self, slot: &Slot) -> Result<(), BookingQueueError> {
        self.inner.insert_slot(slot).await
    }

    async fn find_slot(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        shift: Shift,
    ) -> Result<Option<Slot>, BookingQueueError> {
        self.inner.find_slot(doctor_id, date, shift).await
    }

    async fn compare_and_swap_counts(
        &self,
        slot_id: Uuid,
        expected_version: u64,
        counters: SlotCounters,
    ) -> Result<Option<Slot>, BookingQueueError> {
        self.inner.compare_and_swap_counts(slot_id, expected_version, counters).await
    }

    async fn release_reserved(&self, slot_id: Uuid) -> Result<Option<Slot>, BookingQueueError> {
        let mut failures = self.failures.lock().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(BookingQueueError::DatabaseError("timeout".to_string()));
        }
        drop(failures);
        self.inner.release_reserved(slot_id).await
    }

    async fn adjust_persisted_count(&self, slot_id: Uuid, delta: i32) -> Result<(), BookingQueueError> {
        self.inner.adjust_persisted_count(slot_id, delta).await
    }

    async fn compare_and_swap_settings(
        &self,
        slot_id: Uuid,
        expected_version: u64,
        capacity: u32,
        is_active: bool,
    ) -> Result<Option<Slot>, BookingQueueError> {
        self.inner
            .compare_and_swap_settings(slot_id, expected_version, capacity, is_active)
            .await
    }
}

/// Wiring over `FailingRelease`, plus one stored, unpaid booking on a one-place slot.
async fn booking_behind_failing_release(
    failures: usize,
) -> (BookingQueueState, Arc<FailingRelease>, Arc<MemoryStore>, Slot, Registration) {
    let store = Arc::new(MemoryStore::new());
    let failing = Arc::new(FailingRelease::new(store.clone(), failures));
    let state = BookingQueueState::assemble(
        TestConfig::default().to_arc(),
        failing.clone(),
        store.clone(),
        Arc::new(MemoryBookingQueue::new()),
        Arc::new(MemoryCapacityCache::new()),
    );

    let slot = state
        .schedule
        .create_slot(NewSlot {
            doctor_id: Uuid::new_v4(),
            department_id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            date: common::test_date(),
            shift: Shift::Morning,
            capacity: 1,
            fee: 25.0,
        })
        .await
        .unwrap();

    let booked = state.producer.submit(Uuid::new_v4(), slot.id).await.unwrap();
    assert_eq!(state.consumer.run_once().await.unwrap().persisted, 1);

    (state, failing, store, slot, booked)
}

#[tokio::test(start_paused = true)]
async fn cancel_rides_out_a_brief_release_failure() {
    let (state, failing, store, slot, booked) = booking_behind_failing_release(3).await;

    let cancelled = state.lifecycle.cancel(booked.id).await.unwrap();
    assert_eq!(cancelled.status, RegistrationStatus::Cancelled);

    assert_eq!(*failing.failures.lock().await, 0);
    assert_eq!(store.get_slot(slot.id).await.unwrap().unwrap().reserved_count, 0);
    assert_eq!(state.quota.deferred_release_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn place_held_by_cancelled_booking_comes_back_after_an_outage() {
    let (state, failing, store, slot, booked) = booking_behind_failing_release(usize::MAX).await;

    let cancelled = tokio_test::assert_ok!(state.lifecycle.cancel(booked.id).await);
    assert_eq!(cancelled.status, RegistrationStatus::Cancelled);
    assert_eq!(store.get_slot(slot.id).await.unwrap().unwrap().reserved_count, 1);
    assert_eq!(state.quota.deferred_release_count().await, 1);

    assert_matches!(
        state.lifecycle.cancel(booked.id).await,
        Err(BookingQueueError::InvalidTransition { from: RegistrationStatus::Cancelled, .. })
    );

    // Still failing: the release stays owed.
    assert_eq!(state.reaper.sweep(Utc::now()).await.unwrap().released, 0);
    assert_eq!(state.quota.deferred_release_count().await, 1);

    failing.recover().await;
    let report = state.reaper.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.released, 1);
    assert_eq!(state.quota.deferred_release_count().await, 0);

    let after = store.get_slot(slot.id).await.unwrap().unwrap();
    assert_eq!(after.reserved_count, 0);
    assert_eq!(after.persisted_count, 0);
    tokio_test::assert_ok!(state.producer.submit(Uuid::new_v4(), slot.id).await);
}
