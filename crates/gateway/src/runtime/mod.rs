//! Delivery runtime: the coordinator with its per-app lanes, the retry
//! queues, the replay policy, and the periodic feedback job.
//!
//! Entry point: [`Coordinator::start`] spawns the run loop and returns a
//! handle whose [`Coordinator::submit`] is the producer interface.

pub mod coordinator;
pub mod feedback;
mod lane;
pub mod replay;
pub mod retry_queue;

pub use coordinator::{Coordinator, CoordinatorDeps, DeliverySettings, SubmitError};
pub use feedback::{FeedbackError, FeedbackJob, FeedbackReport};
pub use replay::{ReplayPolicy, StatusReplayPolicy};
pub use retry_queue::{QueueDepth, RetryQueue};
