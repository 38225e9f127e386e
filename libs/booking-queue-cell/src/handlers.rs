use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{Json, Response},
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::{
    BookingQueueState, CheckInRequest, CreateBookingRequest, GenerateScheduleRequest, NewSlot,
    RegistrationStatus, UpdateCapacityRequest,
};

type HandlerResult<T = Json<Value>> = Result<T, AppError>;

// ==============================================================================
// BOOKING
// ==============================================================================

pub async fn create_booking(
    State(state): State<Arc<BookingQueueState>>,
    Json(request): Json<CreateBookingRequest>,
) -> HandlerResult<(StatusCode, Json<Value>)> {
    info!("Booking request from patient {} for slot {}", request.patient_id, request.slot_id);

    let registration = state
        .producer
        .submit(request.patient_id, request.slot_id)
        .await
        .map_err(AppError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "registration": registration,
        })),
    ))
}

pub async fn get_registration(
    State(state): State<Arc<BookingQueueState>>,
    Path(registration_id): Path<Uuid>,
) -> HandlerResult {
    let registration = state.lifecycle.get(registration_id).await.map_err(AppError::from)?;
    Ok(Json(json!(registration)))
}

pub async fn pay_registration(
    State(state): State<Arc<BookingQueueState>>,
    Path(registration_id): Path<Uuid>,
) -> HandlerResult {
    let registration = state.lifecycle.pay(registration_id).await.map_err(AppError::from)?;
    Ok(Json(json!(registration)))
}

pub async fn check_in_registration(
    State(state): State<Arc<BookingQueueState>>,
    Path(registration_id): Path<Uuid>,
    Json(request): Json<CheckInRequest>,
) -> HandlerResult {
    let registration = state
        .lifecycle
        .check_in(registration_id, request.latitude, request.longitude)
        .await
        .map_err(AppError::from)?;
    Ok(Json(json!(registration)))
}

pub async fn cancel_registration(
    State(state): State<Arc<BookingQueueState>>,
    Path(registration_id): Path<Uuid>,
) -> HandlerResult {
    let registration = state.lifecycle.cancel(registration_id).await.map_err(AppError::from)?;
    Ok(Json(json!({
        "success": registration.status == RegistrationStatus::Cancelled,
        "registration": registration,
    })))
}

pub async fn pause_registration(
    State(state): State<Arc<BookingQueueState>>,
    Path(registration_id): Path<Uuid>,
) -> HandlerResult {
    let registration = state.lifecycle.pause(registration_id).await.map_err(AppError::from)?;
    Ok(Json(json!(registration)))
}

pub async fn resume_registration(
    State(state): State<Arc<BookingQueueState>>,
    Path(registration_id): Path<Uuid>,
) -> HandlerResult {
    let registration = state.lifecycle.resume(registration_id).await.map_err(AppError::from)?;
    Ok(Json(json!(registration)))
}

pub async fn complete_registration(
    State(state): State<Arc<BookingQueueState>>,
    Path(registration_id): Path<Uuid>,
) -> HandlerResult {
    let registration = state.lifecycle.complete(registration_id).await.map_err(AppError::from)?;
    Ok(Json(json!(registration)))
}

// ==============================================================================
// DOCTOR QUEUE
// ==============================================================================

pub async fn get_doctor_queue(
    State(state): State<Arc<BookingQueueState>>,
    Path(doctor_id): Path<Uuid>,
) -> HandlerResult {
    let waiting = state.broadcaster.waiting_list(doctor_id).await;
    Ok(Json(json!({
        "doctor_id": doctor_id,
        "waiting_list": waiting,
        "total": waiting.len(),
    })))
}

pub async fn call_next_patient(
    State(state): State<Arc<BookingQueueState>>,
    Path(doctor_id): Path<Uuid>,
) -> HandlerResult {
    let registration = state.lifecycle.call_next(doctor_id).await.map_err(AppError::from)?;
    Ok(Json(json!(registration)))
}

pub async fn get_department_snapshot(
    State(state): State<Arc<BookingQueueState>>,
    Path(department_id): Path<Uuid>,
) -> HandlerResult {
    let snapshot = state.broadcaster.snapshot(department_id).await.map_err(AppError::from)?;
    Ok(Json(json!(snapshot)))
}

/// Live department display: one JSON snapshot on connect, then one per change.
pub async fn department_live(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BookingQueueState>>,
    Path(department_id): Path<Uuid>,
) -> Response {
    info!("Live display connection requested for department {}", department_id);
    ws.on_upgrade(move |socket| handle_department_socket(socket, department_id, state))
}

async fn handle_department_socket(socket: WebSocket, department_id: Uuid, state: Arc<BookingQueueState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.broadcaster.subscribe(department_id).await;

    match state.broadcaster.snapshot(department_id).await {
        Ok(snapshot) => match serde_json::to_string(&snapshot) {
            Ok(text) => {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!("Failed to serialize initial snapshot for {}: {}", department_id, e),
        },
        Err(e) => warn!("Failed to build initial snapshot for {}: {}", department_id, e),
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Later snapshots supersede the skipped ones.
                    debug!("Live display for {} lagged by {} snapshots", department_id, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Live display socket error for {}: {}", department_id, e);
                    break;
                }
            },
        }
    }

    info!("Live display for department {} disconnected", department_id);
}

// ==============================================================================
// SLOTS AND SCHEDULES
// ==============================================================================

pub async fn get_slot_availability(
    State(state): State<Arc<BookingQueueState>>,
    Path(slot_id): Path<Uuid>,
) -> HandlerResult {
    let remaining = state.quota.remaining_capacity(slot_id).await.map_err(AppError::from)?;
    Ok(Json(json!({
        "slot_id": slot_id,
        "remaining": remaining,
    })))
}

pub async fn create_slot(
    State(state): State<Arc<BookingQueueState>>,
    Json(request): Json<NewSlot>,
) -> HandlerResult<(StatusCode, Json<Value>)> {
    let slot = state.schedule.create_slot(request).await.map_err(AppError::from)?;
    Ok((StatusCode::CREATED, Json(json!(slot))))
}

pub async fn update_slot_capacity(
    State(state): State<Arc<BookingQueueState>>,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<UpdateCapacityRequest>,
) -> HandlerResult {
    let slot = state
        .quota
        .set_capacity(slot_id, request.capacity)
        .await
        .map_err(AppError::from)?;
    Ok(Json(json!(slot)))
}

pub async fn deactivate_slot(
    State(state): State<Arc<BookingQueueState>>,
    Path(slot_id): Path<Uuid>,
) -> HandlerResult {
    let slot = state.quota.set_active(slot_id, false).await.map_err(AppError::from)?;
    Ok(Json(json!(slot)))
}

pub async fn generate_schedule(
    State(state): State<Arc<BookingQueueState>>,
    Json(request): Json<GenerateScheduleRequest>,
) -> HandlerResult {
    let slots = state
        .schedule
        .generate(request.start_date, request.days, &request.templates)
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({
        "created": slots.len(),
        "slots": slots,
    })))
}

pub async fn get_queue_stats(State(state): State<Arc<BookingQueueState>>) -> HandlerResult {
    let stats = state.consumer.get_queue_stats().await.map_err(AppError::from)?;
    Ok(Json(json!({
        "queue_stats": stats,
        "consumer_running": state.consumer.is_running().await,
        "timestamp": chrono::Utc::now(),
    })))
}
