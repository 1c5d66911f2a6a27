mod backend;
mod record;
mod store;

pub use backend::{BackendError, InMemoryBackend, MemoryBackend};
pub use record::{MemoryRecord, DEFAULT_CATEGORY};
pub use store::{AccessCount, MemoryError, MemoryStats, MemoryStore};
