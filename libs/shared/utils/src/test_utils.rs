use std::sync::Arc;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;

#[derive(Debug, Clone)]
pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub facility_latitude: f64,
    pub facility_longitude: f64,
    pub checkin_radius_meters: f64,
    pub payment_timeout_minutes: i64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            facility_latitude: 31.2304,
            facility_longitude: 121.4737,
            checkin_radius_meters: 500.0,
            payment_timeout_minutes: 15,
        }
    }
}

impl TestConfig {
    /// Points the config at a mock PostgREST server.
    pub fn with_supabase(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            facility_latitude: self.facility_latitude,
            facility_longitude: self.facility_longitude,
            checkin_radius_meters: self.checkin_radius_meters,
            payment_timeout_minutes: self.payment_timeout_minutes,
            consumer_poll_interval_ms: 10,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn slot_response(slot_id: Uuid, capacity: u32, reserved_count: u32, version: u64) -> serde_json::Value {
        json!({
            "id": slot_id,
            "doctor_id": Uuid::nil(),
            "department_id": Uuid::nil(),
            "room_id": Uuid::nil(),
            "date": NaiveDate::from_ymd_opt(2025, 3, 3).map(|d| d.to_string()),
            "shift": "morning",
            "capacity": capacity,
            "reserved_count": reserved_count,
            "issued_count": reserved_count,
            "persisted_count": reserved_count,
            "version": version,
            "fee": 25.0,
            "is_active": true
        })
    }

    pub fn registration_response(registration_id: Uuid, slot_id: Uuid, status: u8, queue_number: u32) -> serde_json::Value {
        let now = Utc::now().to_rfc3339();
        json!({
            "id": registration_id,
            "patient_id": Uuid::new_v4(),
            "doctor_id": Uuid::nil(),
            "department_id": Uuid::nil(),
            "slot_id": slot_id,
            "date": "2025-03-03",
            "shift": "morning",
            "status": status,
            "queue_number": queue_number,
            "fee": 25.0,
            "created_at": now,
            "updated_at": now
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "message": message,
            "code": code
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let app_config = TestConfig::default().to_app_config();

        assert!(!app_config.is_configured());
        assert_eq!(app_config.checkin_radius_meters, 500.0);
        assert_eq!(app_config.payment_timeout_minutes, 15);
    }

    #[test]
    fn test_config_with_supabase() {
        let app_config = TestConfig::with_supabase("http://localhost:54321").to_app_config();

        assert!(app_config.is_configured());
        assert_eq!(app_config.supabase_url, "http://localhost:54321");
    }

    #[test]
    fn test_slot_response_shape() {
        let slot_id = Uuid::new_v4();
        let body = MockSupabaseResponses::slot_response(slot_id, 10, 3, 7);

        assert_eq!(body["capacity"], 10);
        assert_eq!(body["reserved_count"], 3);
        assert_eq!(body["version"], 7);
        assert_eq!(body["date"], "2025-03-03");
    }
}
