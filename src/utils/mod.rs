//! # Utility Modules
//!
//! Supporting utilities shared by the codec and the session managers.
//!
//! ## Components
//! - **Hashing**: FNV-1a identifiers for data channels and record types
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Sync**: Poison-tolerant lock helpers

pub mod hashing;
pub mod logging;
pub mod metrics;
pub mod sync;

pub use hashing::fnv1a_32;
pub use metrics::{Metrics, MetricsSnapshot};
