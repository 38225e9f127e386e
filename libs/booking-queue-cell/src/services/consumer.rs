use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::services::producer::InFlightBookings;
use crate::services::queue::BookingQueue;
use crate::services::quota::SlotQuotaManager;
use crate::services::store::{RegistrationStore, SlotStore};
use crate::{BatchReport, BookingMessage, BookingQueueError, ConsumerConfig, Delivery, QueueStats, Registration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Persisted,
    /// Redelivery of a message whose row already exists.
    Duplicate,
}

/// The single logical consumer that turns booking messages into registration rows.
pub struct BookingConsumerService {
    queue: Arc<dyn BookingQueue>,
    slots: Arc<dyn SlotStore>,
    registrations: Arc<dyn RegistrationStore>,
    quota: Arc<SlotQuotaManager>,
    in_flight: Arc<InFlightBookings>,
    config: ConsumerConfig,
    /// Held for the whole of a batch so two loops can never interleave.
    consumer_lock: Mutex<()>,
    is_running: RwLock<bool>,
    persisted_total: AtomicU64,
    dead_lettered_total: AtomicU64,
}

impl BookingConsumerService {
    pub fn new(
        queue: Arc<dyn BookingQueue>,
        slots: Arc<dyn SlotStore>,
        registrations: Arc<dyn RegistrationStore>,
        quota: Arc<SlotQuotaManager>,
        in_flight: Arc<InFlightBookings>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            slots,
            registrations,
            quota,
            in_flight,
            config,
            consumer_lock: Mutex::new(()),
            is_running: RwLock::new(false),
            persisted_total: AtomicU64::new(0),
            dead_lettered_total: AtomicU64::new(0),
        }
    }

    #[instrument(skip(self), fields(consumer_id = %self.config.consumer_id))]
    pub async fn start(&self) -> Result<(), BookingQueueError> {
        {
            let mut running = self.is_running.write().await;
            if *running {
                warn!("Consumer service is already running");
                return Ok(());
            }
            *running = true;
        }

        info!("Starting booking consumer {}", self.config.consumer_id);

        match self.queue.recover_in_flight().await {
            Ok(0) => {}
            Ok(recovered) => info!("Requeued {} messages left in flight", recovered),
            Err(e) => error!("Failed to recover in-flight messages: {}", e),
        }

        loop {
            if !*self.is_running.read().await {
                debug!("Consumer loop stopping due to shutdown");
                break;
            }

            match self.run_once().await {
                Ok(report) if report.requeued > 0 => {
                    tokio::time::sleep(Duration::from_millis(self.config.error_backoff_ms)).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Consumer {} failed to dequeue: {}", self.config.consumer_id, e);
                    tokio::time::sleep(Duration::from_millis(self.config.error_backoff_ms)).await;
                }
            }
        }

        info!("Booking consumer {} stopped", self.config.consumer_id);
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("Initiating consumer service shutdown");
        let mut running = self.is_running.write().await;
        *running = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Processes one batch in arrival order.
    pub async fn run_once(&self) -> Result<BatchReport, BookingQueueError> {
        let _guard = self.consumer_lock.lock().await;

        let deliveries = self
            .queue
            .dequeue_batch(
                self.config.batch_size.max(1),
                Duration::from_millis(self.config.poll_interval_ms),
            )
            .await?;

        let mut report = BatchReport::default();

        for (index, delivery) in deliveries.iter().enumerate() {
            match self.process_message(delivery).await {
                Ok(outcome) => {
                    match outcome {
                        ConsumeOutcome::Persisted => report.persisted += 1,
                        ConsumeOutcome::Duplicate => report.duplicates += 1,
                    }
                    if let Err(e) = self.queue.ack(delivery).await {
                        error!("Failed to ack message {}: {}", delivery.message.message_id, e);
                    }
                }
                Err(e) if e.is_transient() => {
                    // Keep order: this message and everything behind it go back to the head.
                    let remaining = &deliveries[index..];
                    warn!(
                        "Transient failure on message {}: {}; requeueing {} messages",
                        delivery.message.message_id,
                        e,
                        remaining.len()
                    );
                    if let Err(rq_err) = self.queue.requeue(remaining).await {
                        error!("Failed to requeue messages: {}", rq_err);
                    }
                    report.requeued = remaining.len();
                    break;
                }
                Err(e) => {
                    error!("Dead-lettering booking message {}: {}", delivery.message.message_id, e);
                    if !matches!(e, BookingQueueError::DataAnomaly { .. }) {
                        self.return_reservation(&delivery.message).await;
                    }
                    self.in_flight
                        .release(delivery.message.patient_id, delivery.message.slot_id)
                        .await;
                    if let Err(dl_err) = self.queue.dead_letter(delivery, &e.to_string()).await {
                        error!(
                            "Failed to dead-letter message {}: {}",
                            delivery.message.message_id, dl_err
                        );
                    }
                    self.dead_lettered_total.fetch_add(1, Ordering::Relaxed);
                    report.dead_lettered += 1;
                }
            }
        }

        if report.handled() > 0 || report.requeued > 0 {
            debug!(
                "Batch done: {} persisted, {} duplicates, {} dead-lettered, {} requeued",
                report.persisted, report.duplicates, report.dead_lettered, report.requeued
            );
        }

        Ok(report)
    }

    /// The slot exists but the booking will never be persisted: give its place back.
    async fn return_reservation(&self, message: &BookingMessage) {
        match self.registrations.get_registration(message.registration_id).await {
            Ok(Some(_)) => {
                debug!("Registration {} already stored; keeping its place", message.registration_id);
                return;
            }
            Ok(None) => {}
            Err(e) => {
                error!(
                    "Cannot tell whether registration {} was stored, place on slot {} not returned: {}",
                    message.registration_id, message.slot_id, e
                );
                return;
            }
        }

        match self.quota.return_place(message.slot_id).await {
            Ok(()) => info!(
                "Returned place on slot {} held by dead-lettered message {}",
                message.slot_id, message.message_id
            ),
            Err(e) => error!(
                "Failed to return place on slot {} for message {}: {}",
                message.slot_id, message.message_id, e
            ),
        }
    }

    #[instrument(skip(self, delivery), fields(message_id = %delivery.message.message_id))]
    async fn process_message(&self, delivery: &Delivery) -> Result<ConsumeOutcome, BookingQueueError> {
        let message = &delivery.message;

        if self.registrations.get_registration(message.registration_id).await?.is_some() {
            debug!("Registration {} already persisted, acking redelivery", message.registration_id);
            self.in_flight.release(message.patient_id, message.slot_id).await;
            return Ok(ConsumeOutcome::Duplicate);
        }

        let slot = self
            .slots
            .get_slot(message.slot_id)
            .await?
            .ok_or(BookingQueueError::DataAnomaly {
                message_id: message.message_id,
                slot_id: message.slot_id,
            })?;

        let registration = Registration::from_message(message, &slot);
        if !self.registrations.insert_registration(&registration).await? {
            self.in_flight.release(message.patient_id, message.slot_id).await;
            return Ok(ConsumeOutcome::Duplicate);
        }

        // Capacity was enforced at reservation time; this is bookkeeping only.
        self.slots.adjust_persisted_count(slot.id, 1).await?;
        if let Some(current) = self.slots.get_slot(slot.id).await? {
            self.quota.refresh_cache(&current).await;
        }

        self.in_flight.release(message.patient_id, message.slot_id).await;
        self.persisted_total.fetch_add(1, Ordering::Relaxed);

        info!(
            "Persisted registration {} for patient {} on slot {} (queue number {})",
            registration.id, registration.patient_id, slot.id, registration.queue_number
        );
        Ok(ConsumeOutcome::Persisted)
    }

    pub async fn get_queue_stats(&self) -> Result<QueueStats, BookingQueueError> {
        Ok(QueueStats {
            pending_messages: self.queue.pending_len().await?,
            in_flight_messages: self.queue.in_flight_len().await?,
            dead_letters: self.queue.dead_letter_len().await?,
            persisted_total: self.persisted_total.load(Ordering::Relaxed),
            dead_lettered_total: self.dead_lettered_total.load(Ordering::Relaxed),
        })
    }
}
