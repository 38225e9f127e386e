use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub redis_url: Option<String>,
    pub queue_key_prefix: String,
    pub facility_latitude: f64,
    pub facility_longitude: f64,
    pub checkin_radius_meters: f64,
    pub reservation_max_attempts: u32,
    pub reservation_backoff_min_ms: u64,
    pub reservation_backoff_max_ms: u64,
    pub consumer_batch_size: usize,
    pub consumer_poll_interval_ms: u64,
    pub payment_timeout_minutes: i64,
    pub reaper_interval_seconds: u64,
    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            redis_url: None,
            queue_key_prefix: "booking_queue".to_string(),
            facility_latitude: 0.0,
            facility_longitude: 0.0,
            checkin_radius_meters: 500.0,
            reservation_max_attempts: 50,
            reservation_backoff_min_ms: 5,
            reservation_backoff_max_ms: 20,
            consumer_batch_size: 10,
            consumer_poll_interval_ms: 500,
            payment_timeout_minutes: 15,
            reaper_interval_seconds: 60,
            server_port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, registrations will be kept in memory");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            queue_key_prefix: env::var("QUEUE_KEY_PREFIX")
                .unwrap_or(defaults.queue_key_prefix),
            facility_latitude: parse_or("FACILITY_LATITUDE", defaults.facility_latitude),
            facility_longitude: parse_or("FACILITY_LONGITUDE", defaults.facility_longitude),
            checkin_radius_meters: parse_or("CHECKIN_RADIUS_METERS", defaults.checkin_radius_meters),
            reservation_max_attempts: parse_or("RESERVATION_MAX_ATTEMPTS", defaults.reservation_max_attempts),
            reservation_backoff_min_ms: parse_or("RESERVATION_BACKOFF_MIN_MS", defaults.reservation_backoff_min_ms),
            reservation_backoff_max_ms: parse_or("RESERVATION_BACKOFF_MAX_MS", defaults.reservation_backoff_max_ms),
            consumer_batch_size: parse_or("CONSUMER_BATCH_SIZE", defaults.consumer_batch_size),
            consumer_poll_interval_ms: parse_or("CONSUMER_POLL_INTERVAL_MS", defaults.consumer_poll_interval_ms),
            payment_timeout_minutes: parse_or("PAYMENT_TIMEOUT_MINUTES", defaults.payment_timeout_minutes),
            reaper_interval_seconds: parse_or("REAPER_INTERVAL_SECONDS", defaults.reaper_interval_seconds),
            server_port: parse_or("SERVER_PORT", defaults.server_port),
        };

        if config.redis_url.is_none() {
            warn!("REDIS_URL not set, booking queue and capacity cache will be kept in memory");
        }

        if config.facility_latitude == 0.0 && config.facility_longitude == 0.0 {
            warn!("FACILITY_LATITUDE/FACILITY_LONGITUDE not set, check-in geofence is centred on 0,0");
        }

        config
    }

    /// True when registrations and slots should live in Supabase.
    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    pub fn is_redis_configured(&self) -> bool {
        self.redis_url.is_some()
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has unparseable value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
