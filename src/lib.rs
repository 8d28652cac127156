//! polycast - Autonomous governance core for multilingual content pipelines
//!
//! Decides what content gets produced, in which language, when it is
//! published, and how fast the pipeline may run given system health.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`executor`] - Retry with backoff, circuit breakers and recovery analysis
//! - [`governor`] - Resource governor turning system metrics into limits
//! - [`analytics`] - Trend analyzer with TTL cache and heuristic fallback
//! - [`scoring`] - Per-language viral scoring of content items
//! - [`scheduler`] - Schedule planner and scheduling rules
//! - [`batch`] - Per-language batch queue processor
//! - [`orchestrator`] - Timed cycles, health checks and maintenance
//! - [`store`] - Content store abstraction (SQLite, in-memory)
//! - [`notifications`] - Performance alerts and delivery channels
//! - [`ops`] - Operational HTTP surface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use polycast::app::App;
//! use polycast::config::Config;
//! use polycast::store::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(SqliteStore::new(&config.database.sqlite_path)?);
//!     let app = App::builder(config, store).build()?;
//!     app.orchestrator.start().await?;
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod app;
pub mod batch;
pub mod config;
pub mod error;
pub mod executor;
pub mod governor;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod ops;
pub mod orchestrator;
pub mod scheduler;
pub mod scoring;
pub mod store;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::app::App;
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, PolycastErrorTrait, Result};
    pub use crate::executor::{Executor, OperationContext, RetryPolicy};
    pub use crate::governor::ResourceGovernor;
    pub use crate::models::{ContentItem, Language, WorkItem, WorkItemKind, WorkItemStatus};
    pub use crate::orchestrator::{CycleKind, Orchestrator};
    pub use crate::store::{ContentStore, MemoryStore, SqliteStore};
}

// Direct re-exports for convenience
pub use models::{ContentItem, Language, WorkItem};
