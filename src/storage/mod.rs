//! Persistence capability
//!
//! The engine only talks to [`StorageBackend`]. [`MemoryBackend`] is the
//! implementation used by default and in tests; a database-backed
//! implementation only has to implement the trait.

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{EventRow, ExceptionRecord, ExceptionReport, ServiceHistoryRow, ServiceStatusRow};
