//! Stuck-task detection and recovery.

pub mod detector;
pub mod dispatch;
pub mod scheduler;

pub use detector::{
    FailedJob, RecoveredJob, RecoveryAction, RecoveryReport, StuckTaskDetector, StuckTaskSummary,
};
pub use dispatch::{ContinuationWorker, HttpContinuationWorker, UnconfiguredWorker};
pub use scheduler::RecoveryScheduler;
