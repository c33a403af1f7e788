// src/lib.rs
// Public library surface shared by the binary and integration tests.

pub mod api;
pub mod config;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod matcher;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod notify;
pub mod query;
pub mod store;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::ingest::IngestPipeline;
pub use crate::model::{Mention, MentionFilter, Platform};
pub use crate::notify::{MentionEvent, NotifierMux};
pub use crate::store::MentionStore;
