//! Task scheduling substrate for the phantom controller emulator
//!
//! This crate provides the single serialized execution context that the rest
//! of the emulator runs on. Timed callbacks, zero-delay work items, and
//! socket readiness notifications all funnel into one actor task, so no two
//! callbacks ever execute concurrently and shared emulator state needs no
//! locking discipline beyond "touch it from a scheduled task".
//!
//! # Architecture
//!
//! - [`TaskQueue`] is the pure, single-owner priority queue: tasks ordered by
//!   (due time, insertion sequence), grouped by [`TaskGroupId`] for bulk
//!   cancellation.
//! - [`Executor`] is the actor that owns a `TaskQueue` and runs callbacks
//!   inline, one at a time. [`ExecutorHandle`] is the cloneable entry point
//!   for scheduling and cancelling from anywhere, including from inside a
//!   running callback.
//! - [`TerminationBarrier`] is the single-fire signal that ends a simulation
//!   run.
//!
//! # Example
//!
//! ```rust,no_run
//! use phantom_sched::Executor;
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let (executor, handle) = Executor::new();
//! tokio::spawn(executor.run());
//!
//! let group = handle.new_group();
//! handle
//!     .schedule(group, Duration::from_millis(10), || println!("fired"))
//!     .unwrap();
//! # }
//! ```

pub mod barrier;
pub mod error;
pub mod executor;
pub mod queue;

pub use barrier::{termination_barrier, TerminationBarrier, TerminationWaiter};
pub use error::SchedulerError;
pub use executor::{Executor, ExecutorHandle};
pub use queue::{TaskCallback, TaskGroupId, TaskHandle, TaskQueue};
