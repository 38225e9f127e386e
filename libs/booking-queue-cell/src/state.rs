use std::sync::Arc;

use tracing::info;

use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_utils::geo::GeoFence;

use crate::services::{
    broadcaster::DoctorQueueBroadcaster,
    cache::{CapacityCache, MemoryCapacityCache, RedisCapacityCache},
    consumer::BookingConsumerService,
    lifecycle::RegistrationLifecycleService,
    producer::{BookingProducerService, InFlightBookings},
    queue::{BookingQueue, MemoryBookingQueue, RedisBookingQueue},
    quota::{ReservationPolicy, SlotQuotaManager},
    reaper::ExpiryReaper,
    schedule::ScheduleGenerator,
    store::{MemoryStore, RegistrationStore, SlotStore},
    supabase_store::SupabaseStore,
};
use crate::{BookingQueueError, ConsumerConfig};

/// Everything the booking-queue routes and background tasks share.
pub struct BookingQueueState {
    pub config: Arc<AppConfig>,
    pub slots: Arc<dyn SlotStore>,
    pub registrations: Arc<dyn RegistrationStore>,
    pub queue: Arc<dyn BookingQueue>,
    pub quota: Arc<SlotQuotaManager>,
    pub producer: Arc<BookingProducerService>,
    pub consumer: Arc<BookingConsumerService>,
    pub lifecycle: Arc<RegistrationLifecycleService>,
    pub broadcaster: Arc<DoctorQueueBroadcaster>,
    pub schedule: Arc<ScheduleGenerator>,
    pub reaper: Arc<ExpiryReaper>,
}

impl BookingQueueState {
    /// Fully in-process wiring.
    pub fn in_memory(config: Arc<AppConfig>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::assemble(
            config,
            store.clone(),
            store,
            Arc::new(MemoryBookingQueue::new()),
            Arc::new(MemoryCapacityCache::new()),
        )
    }

    /// Supabase when configured, Redis when `REDIS_URL` is set; in-process
    /// fallbacks otherwise.
    pub async fn from_config(config: Arc<AppConfig>) -> Result<Self, BookingQueueError> {
        let (slots, registrations): (Arc<dyn SlotStore>, Arc<dyn RegistrationStore>) =
            if config.is_configured() {
                info!("Using Supabase storage at {}", config.supabase_url);
                let store = Arc::new(SupabaseStore::new(Arc::new(SupabaseClient::new(&config))));
                (store.clone(), store)
            } else {
                info!("Supabase not configured, using in-memory storage");
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store)
            };

        let (queue, cache): (Arc<dyn BookingQueue>, Arc<dyn CapacityCache>) =
            match config.redis_url.as_deref().filter(|_| config.is_redis_configured()) {
                Some(redis_url) => {
                    let queue = RedisBookingQueue::new(redis_url, &config.queue_key_prefix).await?;
                    let cache = RedisCapacityCache::from_pool(queue.pool(), &config.queue_key_prefix);
                    info!("Using Redis booking queue with prefix {}", config.queue_key_prefix);
                    (Arc::new(queue), Arc::new(cache))
                }
                None => {
                    info!("REDIS_URL not set, using in-memory booking queue");
                    (Arc::new(MemoryBookingQueue::new()), Arc::new(MemoryCapacityCache::new()))
                }
            };

        Ok(Self::assemble(config, slots, registrations, queue, cache))
    }

    pub fn assemble(
        config: Arc<AppConfig>,
        slots: Arc<dyn SlotStore>,
        registrations: Arc<dyn RegistrationStore>,
        queue: Arc<dyn BookingQueue>,
        cache: Arc<dyn CapacityCache>,
    ) -> Self {
        let quota = Arc::new(SlotQuotaManager::new(
            slots.clone(),
            cache,
            ReservationPolicy::from_config(&config),
        ));
        let in_flight = Arc::new(InFlightBookings::new());
        let broadcaster = Arc::new(DoctorQueueBroadcaster::new(registrations.clone()));

        let producer = Arc::new(BookingProducerService::new(
            registrations.clone(),
            quota.clone(),
            queue.clone(),
            in_flight.clone(),
        ));

        let consumer = Arc::new(BookingConsumerService::new(
            queue.clone(),
            slots.clone(),
            registrations.clone(),
            quota.clone(),
            in_flight,
            ConsumerConfig {
                batch_size: config.consumer_batch_size,
                poll_interval_ms: config.consumer_poll_interval_ms,
                ..ConsumerConfig::default()
            },
        ));

        let lifecycle = Arc::new(RegistrationLifecycleService::new(
            registrations.clone(),
            slots.clone(),
            quota.clone(),
            broadcaster.clone(),
            GeoFence::from_config(&config),
        ));

        let schedule = Arc::new(ScheduleGenerator::new(slots.clone(), quota.clone()));
        let reaper = Arc::new(ExpiryReaper::from_config(
            &config,
            registrations.clone(),
            lifecycle.clone(),
            quota.clone(),
        ));

        Self {
            config,
            slots,
            registrations,
            queue,
            quota,
            producer,
            consumer,
            lifecycle,
            broadcaster,
            schedule,
            reaper,
        }
    }
}
