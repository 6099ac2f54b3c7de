pub mod analysis;
pub mod engine;
pub mod events;
pub mod queue;

pub use engine::ContractReviewEngine;
pub use events::{ReviewEvent, ReviewEventBus};
pub use queue::ReviewQueue;
