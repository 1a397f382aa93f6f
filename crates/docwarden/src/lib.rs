pub mod config;
pub mod db;
pub mod error;
pub mod integrity;
pub mod logging;
pub mod model;
pub mod recovery;
pub mod secrets;

pub use config::{load_config, load_or_default, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, DispatchError, DocwardenError, IntegrityError, RecoveryError, Result};
pub use integrity::{HealOutcome, IntegrityHealer, IntegrityIssue, IntegrityValidator, IssueType};
pub use model::{Job, JobStatus, Page, RecoveryLogEntry, RecoveryOutcome, Task, TaskStatus};
pub use recovery::{
    ContinuationWorker, HttpContinuationWorker, RecoveryReport, RecoveryScheduler,
    StuckTaskDetector,
};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
