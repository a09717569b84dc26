pub mod cleanup_service;
pub mod database;
pub mod memory_job_store;

pub use cleanup_service::{CleanupService, CleanupStats};
pub use database::sqlite::{SqliteExecutionRepository, SqliteJobStore};
pub use database::{create_sqlite_pool, run_migrations};
pub use memory_job_store::MemoryJobStore;
