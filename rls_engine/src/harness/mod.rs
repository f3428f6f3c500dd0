//! Live row-level-security test harness.
//!
//! - [`context`]: the simulated identity a probe runs as
//! - [`scenario`]: scenario templates instantiated per table
//! - [`executor`]: the [`ProbeBackend`] seam and its Postgres implementation
//! - [`orchestrator`]: table discovery, the worker pool and report assembly

pub mod context;
pub mod executor;
pub mod orchestrator;
pub mod scenario;

pub use context::{Claims, ContextKind, SecurityContext};
pub use executor::{ColumnInfo, PgExecutor, ProbeBackend, TableInfo};
pub use orchestrator::Orchestrator;
pub use scenario::{ProbeTarget, RowSpec, Scenario, Step};

/// Failures of the test infrastructure itself. Never a security verdict.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("cannot establish identity {identity}: {reason}")]
    Identity { identity: String, reason: String },

    #[error("fixture error: {0}")]
    Fixture(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("scenario timed out after {0}ms")]
    Timeout(u64),

    #[error("invalid harness configuration: {0}")]
    Config(String),
}
