use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use booking_queue_cell::{create_booking_queue_router, BookingQueueState};

pub fn create_router(state: Arc<BookingQueueState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic queue API is running!" }))
        .nest("/queue", create_booking_queue_router(state))
}
