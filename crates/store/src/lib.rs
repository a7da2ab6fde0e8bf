//! Durable state of the delivery engine on top of an ordered key-value store.
//!
//! Everything lives in one keyspace:
//!
//! | key                                           | value                  |
//! |-----------------------------------------------|------------------------|
//! | `log\0<app>\0<generation u32 BE><seq u32 BE>` | notification JSON      |
//! | `meta\0latest_identity`                       | last identity, u32 BE  |
//! | `bad\0<app>\0<token>`                         | marked-at, i64 BE secs |
//!
//! Big-endian integers make log keys sort by generation, then sequence.

mod bad_tokens;
mod durable_log;
mod identity;
pub mod keys;
mod kv;
mod memory;
mod sqlite;

pub use bad_tokens::BadTokenStore;
pub use durable_log::DurableLog;
pub use identity::IdentityAllocator;
pub use keys::LATEST_IDENTITY_KEY;
pub use kv::KvStore;
pub use memory::MemoryKv;
pub use sqlite::SqliteKv;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("identity space exhausted")]
    IdentityExhausted,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
