//! Concurrency helpers for the periodic reconciliation driver.

pub mod scheduler;

pub use scheduler::schedule_every;
