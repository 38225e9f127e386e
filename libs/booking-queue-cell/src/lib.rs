pub mod models;
pub mod services;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use models::*;
pub use error::*;
pub use services::*;
pub use router::create_booking_queue_router;
pub use state::BookingQueueState;
