//! Environment-driven tuning knobs, read once into lazily-initialized statics.
//!
//! Grounded on the teacher's `cnf/mod.rs`, which reads tunables through
//! `lazy_env_parse!` rather than hard-coding them or threading them through
//! every call site.
use once_cell::sync::Lazy;

/// Capacity of the staging pipeline's bounded batch channel (§4.4).
pub static STAGE_BATCH_CHANNEL_CAPACITY: Lazy<usize> =
	lazy_env_parse!("OPFLOW_STAGE_BATCH_CHANNEL_CAPACITY", usize, 8);

/// Default number of rows an actor accumulates before pushing a batch (§4.4).
pub const DEFAULT_BATCH_SIZE: i64 = 50;

/// In-memory row budget of the external heap before it spills to disk (§6).
///
/// Mirrors the teacher's `EXTERNAL_SORTING_BUFFER_LIMIT` default of `50_000`.
pub static EXTERNAL_HEAP_MEMORY_BUDGET: Lazy<usize> =
	lazy_env_parse!("OPFLOW_EXTERNAL_HEAP_MEMORY_BUDGET", usize, 50_000);

/// Size in bytes of each on-disk chunk group used by the external heap's
/// file-backed tier.
pub static HEAP_CHUNK_SIZE: Lazy<usize> = lazy_env_parse!("OPFLOW_HEAP_CHUNK_SIZE", usize, 4 * 1024 * 1024);

/// Path prefix used for the external heap's spill directory name.
pub const HEAP_SPILL_PREFIX: &str = "opflow-heap-";
