//! # panda-core
//!
//! Scheduler and execution engine for running compiler-based tools across
//! the translation units of a C/C++ project.
//!
//! A run replays the compilations recorded in a JSON compilation database:
//! each entry is normalized into a replay-ready [`cdb::CompileCommand`], one
//! task per enabled [`action::ActionDescriptor`] is fanned out over a
//! fixed-size [`pool::TaskPool`], and project-level [`reducer`]s aggregate
//! the per-unit outputs afterwards. The worklist feeding the pool is either
//! FIFO or a priority queue ordered by a pluggable job-size
//! [`estimator::SizeMetric`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use panda_core::options::Options;
//!
//! let mut opts = Options::default();
//! opts.builtins.syntax = true;
//! opts.jobs = 4;
//! panda_core::driver::run(&Arc::new(opts)).expect("run failed");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod action;
pub mod cdb;
pub mod driver;
pub mod estimator;
pub mod exec;
pub mod options;
pub mod pool;
pub mod reducer;
pub mod worklist;

pub use cdb::{CompileCommand, Language};
pub use estimator::SizeMetric;
pub use options::Options;
pub use worklist::SchedulerStrategy;
