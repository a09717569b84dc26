pub mod entities;
pub mod events;
pub mod repositories;

pub use entities::{
    canonical_time, ExecutionFilter, ExecutionRecord, ExecutionStatus, Job, TriggerSpec,
};
pub use events::{SchedulerEvent, SchedulerEventKind};
pub use repositories::{ExecutionChange, ExecutionRepository, JobStore};
