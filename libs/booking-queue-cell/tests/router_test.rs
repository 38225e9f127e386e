mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use booking_queue_cell::*;
use common::{TestHarness, FACILITY_LAT, FACILITY_LON};

fn app(harness: &TestHarness) -> Router {
    create_booking_queue_router(harness.state.clone())
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn booking_flow_over_http() {
    let harness = TestHarness::new();
    let app = app(&harness);
    let department_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    let (status, slot) = send(
        &app,
        "POST",
        "/admin/slots",
        Some(json!({
            "doctor_id": doctor_id,
            "department_id": department_id,
            "room_id": Uuid::new_v4(),
            "date": "2025-03-03",
            "shift": "morning",
            "capacity": 2,
            "fee": 30.0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let slot_id = slot["id"].as_str().unwrap().to_string();

    let (status, booked) = send(
        &app,
        "POST",
        "/bookings",
        Some(json!({ "patient_id": Uuid::new_v4(), "slot_id": slot_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booked["registration"]["status"], 0);
    assert_eq!(booked["registration"]["queue_number"], 1);
    let registration_id = booked["registration"]["id"].as_str().unwrap().to_string();

    harness.drain().await;

    let (status, paid) = send(&app, "POST", &format!("/registrations/{}/pay", registration_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], 1);

    let (status, checked_in) = send(
        &app,
        "POST",
        &format!("/registrations/{}/check-in", registration_id),
        Some(json!({ "latitude": FACILITY_LAT, "longitude": FACILITY_LON })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(checked_in["status"], 2);

    let (status, queue) = send(&app, "GET", &format!("/doctors/{}/queue", doctor_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue["total"], 1);

    let (status, called) = send(&app, "POST", &format!("/doctors/{}/call-next", doctor_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(called["status"], 3);

    let (status, snapshot) = send(&app, "GET", &format!("/departments/{}/snapshot", department_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["current_patient"]["registration_id"], registration_id.as_str());

    let (status, availability) = send(&app, "GET", &format!("/slots/{}/availability", slot_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(availability["remaining"], 1);
}

#[tokio::test]
async fn full_slot_is_a_conflict() {
    let harness = TestHarness::new();
    let app = app(&harness);
    let slot = harness.slot(1).await;

    let body = |patient: Uuid| Some(json!({ "patient_id": patient, "slot_id": slot.id }));
    let (status, _) = send(&app, "POST", "/bookings", body(Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, error) = send(&app, "POST", "/bookings", body(Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(error["error"].as_str().unwrap().contains("No capacity"));
}

#[tokio::test]
async fn check_in_far_away_is_forbidden() {
    let harness = TestHarness::new();
    let app = app(&harness);
    let slot = harness.slot(2).await;
    let paid = harness.paid_registration(slot.id).await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/registrations/{}/check-in", paid.id),
        Some(json!({ "latitude": 40.0, "longitude": -74.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn cancel_reports_success() {
    let harness = TestHarness::new();
    let app = app(&harness);
    let slot = harness.slot(2).await;
    let paid = harness.paid_registration(slot.id).await;

    let (status, body) = send(&app, "POST", &format!("/registrations/{}/cancel", paid.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = send(&app, "POST", &format!("/registrations/{}/cancel", paid.id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let harness = TestHarness::new();
    let app = app(&harness);

    let (status, _) = send(&app, "GET", &format!("/registrations/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", &format!("/doctors/{}/call-next", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", &format!("/slots/{}/availability", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_capacity_and_deactivation() {
    let harness = TestHarness::new();
    let app = app(&harness);
    let slot = harness.slot(2).await;

    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/admin/slots/{}/capacity", slot.id),
        Some(json!({ "capacity": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, updated) = send(
        &app,
        "PATCH",
        &format!("/admin/slots/{}/capacity", slot.id),
        Some(json!({ "capacity": 6 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["capacity"], 6);

    let (status, deactivated) = send(&app, "POST", &format!("/admin/slots/{}/deactivate", slot.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deactivated["is_active"], false);

    let (status, _) = send(
        &app,
        "POST",
        "/bookings",
        Some(json!({ "patient_id": Uuid::new_v4(), "slot_id": slot.id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn schedule_generation_and_stats() {
    let harness = TestHarness::new();
    let app = app(&harness);
    let doctor_id = Uuid::new_v4();

    // 2025-03-03 is a Monday; one week covers each weekday once.
    let template = |weekday: &str, shift: &str| {
        json!({
            "doctor_id": doctor_id,
            "department_id": Uuid::new_v4(),
            "room_id": Uuid::new_v4(),
            "weekday": weekday,
            "shift": shift,
            "capacity": 8,
            "fee": 20.0
        })
    };
    let request = json!({
        "start_date": "2025-03-03",
        "days": 7,
        "templates": [template("Mon", "morning"), template("Mon", "afternoon"), template("Wed", "morning")]
    });

    let (status, generated) = send(&app, "POST", "/admin/schedules/generate", Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(generated["created"], 3);

    let (status, again) = send(&app, "POST", "/admin/schedules/generate", Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["created"], 0);

    let (status, stats) = send(&app, "GET", "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["queue_stats"]["pending_messages"], 0);
}
