use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::{BookingMessage, BookingQueueError, DeadLetter, Delivery};

/// Durable FIFO transport for booking messages.
///
/// Deliveries stay "in flight" until acked, requeued or dead-lettered, which
/// gives at-least-once delivery across consumer restarts.
#[async_trait]
pub trait BookingQueue: Send + Sync {
    async fn enqueue(&self, message: &BookingMessage) -> Result<(), BookingQueueError>;

    /// Blocks up to `wait` for the first message, then takes whatever else is
    /// immediately available, up to `max` in arrival order.
    async fn dequeue_batch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, BookingQueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), BookingQueueError>;

    /// Puts deliveries back at the head of the queue, preserving their order.
    async fn requeue(&self, deliveries: &[Delivery]) -> Result<(), BookingQueueError>;

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), BookingQueueError>;

    /// Moves anything left in flight by a previous consumer back to the head.
    async fn recover_in_flight(&self) -> Result<usize, BookingQueueError>;

    async fn pending_len(&self) -> Result<u64, BookingQueueError>;

    async fn in_flight_len(&self) -> Result<u64, BookingQueueError>;

    async fn dead_letter_len(&self) -> Result<u64, BookingQueueError>;
}

// ==============================================================================
// IN-MEMORY TRANSPORT
// ==============================================================================

#[derive(Default)]
struct MemoryQueueState {
    pending: VecDeque<BookingMessage>,
    in_flight: HashMap<String, BookingMessage>,
    in_flight_order: Vec<String>,
    dead_letters: Vec<DeadLetter>,
}

#[derive(Default)]
pub struct MemoryBookingQueue {
    state: Mutex<MemoryQueueState>,
    notify: Notify,
}

impl MemoryBookingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    async fn take_available(&self, max: usize) -> Vec<Delivery> {
        let mut state = self.state.lock().await;
        let mut deliveries = Vec::new();
        while deliveries.len() < max {
            let Some(message) = state.pending.pop_front() else {
                break;
            };
            let receipt = message.message_id.to_string();
            state.in_flight.insert(receipt.clone(), message.clone());
            state.in_flight_order.push(receipt.clone());
            deliveries.push(Delivery { message, receipt });
        }
        deliveries
    }

    fn forget(state: &mut MemoryQueueState, receipt: &str) -> Option<BookingMessage> {
        state.in_flight_order.retain(|r| r != receipt);
        state.in_flight.remove(receipt)
    }
}

#[async_trait]
impl BookingQueue for MemoryBookingQueue {
    async fn enqueue(&self, message: &BookingMessage) -> Result<(), BookingQueueError> {
        self.state.lock().await.pending.push_back(message.clone());
        self.notify.notify_one();
        debug!("Message {} enqueued in memory", message.message_id);
        Ok(())
    }

    async fn dequeue_batch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, BookingQueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let deliveries = self.take_available(max).await;
        if !deliveries.is_empty() {
            return Ok(deliveries);
        }

        // Nothing ready: wait for an enqueue or the poll interval, whichever first.
        let _ = timeout(wait, self.notify.notified()).await;
        Ok(self.take_available(max).await)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BookingQueueError> {
        let mut state = self.state.lock().await;
        if Self::forget(&mut state, &delivery.receipt).is_none() {
            warn!("Ack for unknown delivery {}", delivery.receipt);
        }
        Ok(())
    }

    async fn requeue(&self, deliveries: &[Delivery]) -> Result<(), BookingQueueError> {
        let mut state = self.state.lock().await;
        for delivery in deliveries.iter().rev() {
            Self::forget(&mut state, &delivery.receipt);
            state.pending.push_front(delivery.message.clone());
        }
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), BookingQueueError> {
        let mut state = self.state.lock().await;
        Self::forget(&mut state, &delivery.receipt);
        state.dead_letters.push(DeadLetter {
            message: delivery.message.clone(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<usize, BookingQueueError> {
        let mut state = self.state.lock().await;
        let receipts = std::mem::take(&mut state.in_flight_order);
        let recovered = receipts.len();
        for receipt in receipts.iter().rev() {
            if let Some(message) = state.in_flight.remove(receipt) {
                state.pending.push_front(message);
            }
        }
        Ok(recovered)
    }

    async fn pending_len(&self) -> Result<u64, BookingQueueError> {
        Ok(self.state.lock().await.pending.len() as u64)
    }

    async fn in_flight_len(&self) -> Result<u64, BookingQueueError> {
        Ok(self.state.lock().await.in_flight.len() as u64)
    }

    async fn dead_letter_len(&self) -> Result<u64, BookingQueueError> {
        Ok(self.state.lock().await.dead_letters.len() as u64)
    }
}

// ==============================================================================
// REDIS TRANSPORT
// ==============================================================================

/// Redis lists: producers LPUSH onto `pending`, the consumer pops from the
/// right into `processing` (BRPOPLPUSH), so the oldest message is always
/// consumed first.
pub struct RedisBookingQueue {
    pool: Pool,
    pending_key: String,
    processing_key: String,
    dead_letter_key: String,
}

impl RedisBookingQueue {
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self, BookingQueueError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            BookingQueueError::RedisError(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to create Redis pool",
                format!("Pool creation error: {}", e),
            )))
        })?;

        let queue = Self::from_pool(pool, prefix);

        // Test connection
        let mut conn = queue.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis booking queue initialized with prefix {}", prefix);

        Ok(queue)
    }

    pub fn from_pool(pool: Pool, prefix: &str) -> Self {
        Self {
            pool,
            pending_key: format!("{}:pending", prefix),
            processing_key: format!("{}:processing", prefix),
            dead_letter_key: format!("{}:dead_letter", prefix),
        }
    }

    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    async fn get_connection(&self) -> Result<Connection, BookingQueueError> {
        self.pool.get().await.map_err(|e| {
            BookingQueueError::RedisError(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to get Redis connection",
                e.to_string(),
            )))
        })
    }

    fn to_delivery(raw: String) -> Result<Delivery, BookingQueueError> {
        let message: BookingMessage = serde_json::from_str(&raw)?;
        Ok(Delivery { message, receipt: raw })
    }
}

#[async_trait]
impl BookingQueue for RedisBookingQueue {
    async fn enqueue(&self, message: &BookingMessage) -> Result<(), BookingQueueError> {
        let mut conn = self.get_connection().await?;
        let payload = serde_json::to_string(message)?;
        let _: () = conn.lpush(&self.pending_key, payload).await?;
        debug!("Message {} enqueued", message.message_id);
        Ok(())
    }

    async fn dequeue_batch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, BookingQueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.get_connection().await?;
        let mut raw_messages = Vec::new();

        let first: Option<String> = conn
            .brpoplpush(&self.pending_key, &self.processing_key, wait.as_secs_f64().max(0.01))
            .await?;

        let Some(first) = first else {
            return Ok(Vec::new());
        };
        raw_messages.push(first);

        while raw_messages.len() < max {
            let next: Option<String> = conn.rpoplpush(&self.pending_key, &self.processing_key).await?;
            match next {
                Some(raw) => raw_messages.push(raw),
                None => break,
            }
        }

        let mut deliveries = Vec::with_capacity(raw_messages.len());
        for raw in raw_messages {
            match Self::to_delivery(raw.clone()) {
                Ok(delivery) => deliveries.push(delivery),
                Err(e) => {
                    // Unparseable payloads can never succeed; park them with the reason.
                    warn!("Dropping unparseable booking message to dead letter: {}", e);
                    let entry = serde_json::json!({
                        "raw": raw,
                        "reason": format!("unparseable payload: {}", e),
                        "failed_at": Utc::now().to_rfc3339(),
                    })
                    .to_string();
                    let _: () = conn.lpush(&self.dead_letter_key, entry).await?;
                    let _: () = conn.lrem(&self.processing_key, 1, &raw).await?;
                }
            }
        }

        debug!("Dequeued {} booking messages", deliveries.len());
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BookingQueueError> {
        let mut conn = self.get_connection().await?;
        let removed: i64 = conn.lrem(&self.processing_key, 1, &delivery.receipt).await?;
        if removed == 0 {
            warn!("Ack for message {} found nothing in flight", delivery.message.message_id);
        }
        Ok(())
    }

    async fn requeue(&self, deliveries: &[Delivery]) -> Result<(), BookingQueueError> {
        let mut conn = self.get_connection().await?;
        // RPUSH in reverse so the earliest delivery ends up right-most, i.e. next out.
        for delivery in deliveries.iter().rev() {
            let _: () = conn.lrem(&self.processing_key, 1, &delivery.receipt).await?;
            let _: () = conn.rpush(&self.pending_key, &delivery.receipt).await?;
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), BookingQueueError> {
        let mut conn = self.get_connection().await?;
        let entry = serde_json::to_string(&DeadLetter {
            message: delivery.message.clone(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        })?;
        let _: () = conn.lpush(&self.dead_letter_key, entry).await?;
        let _: () = conn.lrem(&self.processing_key, 1, &delivery.receipt).await?;
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<usize, BookingQueueError> {
        let mut conn = self.get_connection().await?;
        let mut recovered = 0;
        // Newest in-flight sits at the left of `processing`; moving left-to-right
        // onto the right of `pending` leaves the oldest next in line.
        loop {
            let moved: Option<String> = conn
                .lmove(
                    &self.processing_key,
                    &self.pending_key,
                    redis::Direction::Left,
                    redis::Direction::Right,
                )
                .await?;
            match moved {
                Some(_) => recovered += 1,
                None => break,
            }
        }

        if recovered > 0 {
            info!("Recovered {} in-flight booking messages", recovered);
        }
        Ok(recovered)
    }

    async fn pending_len(&self) -> Result<u64, BookingQueueError> {
        let mut conn = self.get_connection().await?;
        Ok(conn.llen(&self.pending_key).await?)
    }

    async fn in_flight_len(&self) -> Result<u64, BookingQueueError> {
        let mut conn = self.get_connection().await?;
        Ok(conn.llen(&self.processing_key).await?)
    }

    async fn dead_letter_len(&self) -> Result<u64, BookingQueueError> {
        let mut conn = self.get_connection().await?;
        Ok(conn.llen(&self.dead_letter_key).await?)
    }
}
