pub mod sqlite_execution_repository;
pub mod sqlite_job_store;

pub use sqlite_execution_repository::SqliteExecutionRepository;
pub use sqlite_job_store::SqliteJobStore;
