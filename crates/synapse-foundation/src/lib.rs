//! Synapse Foundation — concrete implementations over the kernel's seams.
//!
//! This crate provides everything between the kernel's data model and the
//! runtime's execution engine:
//!
//! - [`persistence`] — key-value store backends (`MemoryKvStore`, and
//!   `RedisKvStore` behind the `persistence-redis` feature)
//! - [`registry`] — capability CRUD and goal matching with
//!   learning-weighted ranking
//! - [`evaluator`] — option and plan scoring, plus the feedback tracker
//! - [`planner`] — flat plan generation, ranking, principles screening,
//!   and episode persistence
//! - [`hierarchical`] — goal → workflow expansion and template management
//! - [`principles`] — the HTTP principles client
//! - [`substitute`] — `${name}` placeholder substitution and the state
//!   predicate grammar

pub mod evaluator;
pub mod hierarchical;
pub mod persistence;
pub mod planner;
pub mod principles;
pub mod registry;
pub mod substitute;

pub use evaluator::{Evaluator, EvaluatorWeights, FeedbackWeights, Outcome};
pub use hierarchical::HierarchicalPlanner;
pub use persistence::MemoryKvStore;
#[cfg(feature = "persistence-redis")]
pub use persistence::RedisKvStore;
pub use planner::{Planner, PlannerConfig};
pub use principles::HttpPrinciplesGate;
pub use registry::CapabilityRegistry;
