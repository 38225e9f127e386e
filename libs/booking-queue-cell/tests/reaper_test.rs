mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use booking_queue_cell::*;
use common::TestHarness;

/// Books a place and persists it with a back-dated creation time.
async fn stale_booking(harness: &TestHarness, slot_id: Uuid, age: Duration) -> Registration {
    let reservation = harness.state.quota.try_reserve(slot_id).await.unwrap();
    let mut message = BookingMessage::new(Uuid::new_v4(), slot_id, reservation.queue_number);
    message.submitted_at = Utc::now() - age;

    let registration = Registration::from_message(&message, &reservation.slot);
    assert!(harness.store.insert_registration(&registration).await.unwrap());
    registration
}

#[tokio::test]
async fn unpaid_registration_past_timeout_is_cancelled() {
    let harness = TestHarness::new();
    let slot = harness.slot(5).await;

    let stale = stale_booking(&harness, slot.id, Duration::minutes(16)).await;
    assert_eq!(harness.reserved_count(slot.id).await, 1);

    let report = harness.state.reaper.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.failed, 0);

    let cancelled = harness.state.lifecycle.get(stale.id).await.unwrap();
    assert_eq!(cancelled.status, RegistrationStatus::Cancelled);
    assert_eq!(harness.reserved_count(slot.id).await, 0);
}

#[tokio::test]
async fn recent_and_paid_registrations_are_left_alone() {
    let harness = TestHarness::new();
    let slot = harness.slot(5).await;

    let recent = stale_booking(&harness, slot.id, Duration::minutes(5)).await;
    let old_but_paid = stale_booking(&harness, slot.id, Duration::minutes(30)).await;
    harness.state.lifecycle.pay(old_but_paid.id).await.unwrap();

    let report = harness.state.reaper.sweep(Utc::now()).await.unwrap();
    assert_eq!(report, SweepReport::default());

    assert_eq!(
        harness.state.lifecycle.get(recent.id).await.unwrap().status,
        RegistrationStatus::PendingPayment
    );
    assert_eq!(harness.reserved_count(slot.id).await, 2);
}

#[tokio::test]
async fn one_failure_does_not_stop_the_sweep() {
    let harness = TestHarness::new();
    let slot = harness.slot(5).await;

    // Oldest row points at a slot that no longer exists, so releasing its
    // place fails.
    let mut orphan_message = BookingMessage::new(Uuid::new_v4(), Uuid::new_v4(), 1);
    orphan_message.submitted_at = Utc::now() - Duration::minutes(40);
    let mut ghost_slot = slot.clone();
    ghost_slot.id = orphan_message.slot_id;
    let orphan = Registration::from_message(&orphan_message, &ghost_slot);
    assert!(harness.store.insert_registration(&orphan).await.unwrap());

    let stale = stale_booking(&harness, slot.id, Duration::minutes(20)).await;

    let report = harness.state.reaper.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.cancelled, 1);

    assert_eq!(
        harness.state.lifecycle.get(stale.id).await.unwrap().status,
        RegistrationStatus::Cancelled
    );
    assert_eq!(harness.reserved_count(slot.id).await, 0);
}

#[tokio::test(start_paused = true)]
async fn periodic_reaper_sweeps_until_shutdown() {
    let harness = TestHarness::new();
    let slot = harness.slot(5).await;
    let stale = stale_booking(&harness, slot.id, Duration::minutes(16)).await;

    let (tx, rx) = watch::channel(false);
    let handle = Arc::clone(&harness.state.reaper).start(rx);

    tokio::time::sleep(tokio::time::Duration::from_secs(61)).await;
    assert_eq!(
        harness.state.lifecycle.get(stale.id).await.unwrap().status,
        RegistrationStatus::Cancelled
    );

    tx.send(true).unwrap();
    handle.await.unwrap();
}
