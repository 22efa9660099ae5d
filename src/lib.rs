//! Concurrency patterns: decomposition strategies and shared-state synchronization.
//!
//! - [`pool`]: one-shot launch/join of a fixed batch of named workers
//! - [`accumulator`]: lost updates without a guard, exact totals with one
//! - [`matrix`]: domain decomposition of a matrix product by row ranges
//! - [`game`]: task decomposition into a model role and a view role
//! - [`search`]: multi-partition search with cooperative early stop
//! - [`basics`]: current thread, sleep and yield, and interleaving of two workers' output

pub mod accumulator;
pub mod basics;
pub mod config;
pub mod error;
pub mod game;
pub mod logging;
pub mod matrix;
pub mod pool;
pub mod search;

pub use accumulator::{AccumulatorScenario, Guarding, RaceWindow, SynchronizedAccumulator, TrialSummary};
pub use config::ToolkitConfig;
pub use error::{ConcurrencyError, ConfigError, Result};
pub use game::{SharedModelState, TaskDecompositionPair};
pub use matrix::{DomainDecompositionEngine, Matrix};
pub use pool::{JoinReport, WorkItem, WorkerPool, WorkerState};
pub use search::{CooperativeMultiSearch, Keyed, Partition, Student};
