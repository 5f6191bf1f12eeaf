//! Pacer - adaptive throughput control for streams of async jobs
//!
//! A pacer pulls jobs from an input stream one at a time, fires each off as an
//! independent tokio task, and sleeps between dispatches so that the launch
//! rate tracks a runtime-adjustable target (jobs/second). Alongside the target
//! it publishes "efficiency": the number of jobs that actually *completed*
//! during the last sampling window, so callers can see when realized
//! throughput falls behind the requested rate.
//!
//! # Core Concepts
//!
//! - **Pacing by sleep, not by capping**: throughput is governed purely by the
//!   inter-dispatch sleep (`1s / target rate`). In-flight concurrency is
//!   deliberately unbounded - a slow handler at a high rate piles up tasks.
//! - **Target vs. realized**: the target rate is what the caller asked for;
//!   efficiency is what the handlers delivered in the last window.
//! - **Bounded mutation**: the target moves only within `[min, max]` bounds;
//!   mutations that would leave the bounds are rejected, never clamped.
//! - **Failures are data**: handler errors flow to a caller-owned error sink
//!   and never stop or slow the dispatcher.
//!
//! # Modules
//!
//! - [`pacer`] - dispatcher loop, efficiency sampler, and the `Pacer` handle
//! - [`rate`] - the shared `(current, min, max)` rate triple and its mutators
//! - [`handler`] - the `JobHandler` trait and async-closure adapter
//! - [`config`] - configuration types and loading
//! - [`error`] - construction-time error types

pub mod config;
pub mod error;
pub mod handler;
pub mod pacer;
pub mod rate;

// Re-export commonly used types
pub use config::PacerConfig;
pub use error::PacerError;
pub use handler::{FnHandler, JobHandler, handler_fn};
pub use pacer::{Pacer, PacerStats};
pub use rate::RateLimits;
