use std::sync::Arc;
use axum::{
    Router,
    routing::{get, patch, post},
};

use crate::handlers::{
    create_booking,
    get_registration,
    pay_registration,
    check_in_registration,
    cancel_registration,
    pause_registration,
    resume_registration,
    complete_registration,
    get_doctor_queue,
    call_next_patient,
    get_department_snapshot,
    department_live,
    get_slot_availability,
    create_slot,
    update_slot_capacity,
    deactivate_slot,
    generate_schedule,
    get_queue_stats,
};
use crate::BookingQueueState;

pub fn create_booking_queue_router(state: Arc<BookingQueueState>) -> Router {
    let booking_routes = Router::new()
        .route("/bookings", post(create_booking))
        .route("/registrations/{registration_id}", get(get_registration))
        .route("/registrations/{registration_id}/pay", post(pay_registration))
        .route("/registrations/{registration_id}/check-in", post(check_in_registration))
        .route("/registrations/{registration_id}/cancel", post(cancel_registration))
        .route("/registrations/{registration_id}/pause", post(pause_registration))
        .route("/registrations/{registration_id}/resume", post(resume_registration))
        .route("/registrations/{registration_id}/complete", post(complete_registration));

    let display_routes = Router::new()
        .route("/doctors/{doctor_id}/queue", get(get_doctor_queue))
        .route("/doctors/{doctor_id}/call-next", post(call_next_patient))
        .route("/departments/{department_id}/snapshot", get(get_department_snapshot))
        .route("/departments/{department_id}/live", get(department_live))
        .route("/slots/{slot_id}/availability", get(get_slot_availability))
        .route("/stats", get(get_queue_stats));

    let admin_routes = Router::new()
        .route("/admin/slots", post(create_slot))
        .route("/admin/slots/{slot_id}/capacity", patch(update_slot_capacity))
        .route("/admin/slots/{slot_id}/deactivate", post(deactivate_slot))
        .route("/admin/schedules/generate", post(generate_schedule));

    Router::new()
        .merge(booking_routes)
        .merge(display_routes)
        .merge(admin_routes)
        .with_state(state)
}
