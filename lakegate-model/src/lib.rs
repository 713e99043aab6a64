//! Model compilation, scheduling, and materialization for Lakegate.
//!
//! A model is declared SQL plus a materialization strategy. This crate
//! renders the restricted template language, extracts the dependency graph,
//! tiers it with Kahn's algorithm, and walks the tiers on pinned engine
//! connections with contract checks, data tests, and cooperative
//! cancellation.

pub mod compile;
pub mod contract;
pub mod dag;
pub mod datatest;
pub mod ephemeral;
pub mod executor;
pub mod freshness;
pub mod materialize;
pub mod selector;
pub mod store;

pub use compile::{compute_hash, fqn, CompileContext, CompiledModel, ModelCompiler};
pub use contract::validate_contract;
pub use dag::ModelDag;
pub use datatest::{assertion_sql, execute_test};
pub use ephemeral::inline_ephemerals;
pub use executor::{new_run, CancelRegistry, PlannedRun, RunExecutor};
pub use freshness::{check_freshness, FreshnessReport, FreshnessStatus};
pub use materialize::{MaterializeOutcome, Materializer};
pub use selector::{select_models, SelectionInput};
pub use store::{new_step, ModelStore};
