//! Reservation constraint and settlement engine for a coworking space.

pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod wal;

#[cfg(test)]
mod fixtures;
