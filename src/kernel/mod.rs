//! Cooperative virtual-time kernel.
//!
//! A single-threaded executor with a millisecond virtual clock. Tasks are
//! `async` functions that suspend only through [`wait::delay`] and the
//! event waits; the [`Scheduler`] advances the clock between timer
//! deadlines and delivers events to one-shot subscriptions.

pub mod scheduler;
pub mod task;
pub mod time;
pub mod wait;

pub use scheduler::{EventId, Scheduler, SchedulerHandle};
pub use task::Task;
pub use time::SimTime;
pub use wait::{delay, wait_for_event, wait_for_signal};
