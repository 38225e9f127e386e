pub mod broadcaster;
pub mod cache;
pub mod consumer;
pub mod lifecycle;
pub mod periodic;
pub mod producer;
pub mod queue;
pub mod quota;
pub mod reaper;
pub mod schedule;
pub mod store;
pub mod supabase_store;

pub use broadcaster::*;
pub use cache::*;
pub use consumer::*;
pub use lifecycle::*;
pub use periodic::*;
pub use producer::*;
pub use queue::*;
pub use quota::*;
pub use reaper::*;
pub use schedule::*;
pub use store::*;
pub use supabase_store::*;
