pub mod app;
pub mod config;
pub mod error;
pub mod notification;
pub mod payload;
pub mod trace;

pub use app::AppKey;
pub use notification::Notification;
pub use payload::{Alert, AlertObject, Aps, Payload, PayloadError, MAX_PAYLOAD_BYTES};
