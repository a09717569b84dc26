pub mod bridge;
pub mod reconciler;
pub mod registry;
pub mod run_now;
pub mod scheduler;

pub use bridge::EventBridge;
pub use reconciler::ExecutionReconciler;
pub use registry::{JobTask, TaskRegistry};
pub use run_now::{RunNowOutcome, RunNowReport, RunNowService};
pub use scheduler::ImmediateScheduler;
