//! Background Tasks Module
//!
//! Contains background tasks that run for the lifetime of a cache.
//!
//! # Tasks
//! - TTL Sweep: Removes expired entries at a fixed interval

mod sweeper;

pub use sweeper::{spawn_sweep_task, Sweep, SweepHandle};
