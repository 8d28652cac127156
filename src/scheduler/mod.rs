//! Publication scheduling
//!
//! The planner turns scored (content, language) pairs into a capped,
//! priority-ordered publication schedule. Operators adjust publish timing
//! through scheduling rules.
//!
//! # Modules
//!
//! - [`planner`] - Planning pass, daily cap admission and reach estimates
//! - [`rules`] - Peak-hour and shift overrides per language
//! - [`error`] - Scheduler error types

pub mod error;
pub mod planner;
pub mod rules;

pub use error::{SchedulerError, SchedulerResult};
pub use planner::{
    admit_by_daily_cap, estimate_reach, next_peak_time, Approval, CapOutcome, PlanOutcome,
    PlannerConfig, ScheduleEntry, SchedulePlanner,
};
pub use rules::{RuleManager, RuleRequest, SchedulingRule};
