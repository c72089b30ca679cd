//! SCBA dashboard sync service.
//!
//! Periodically logs into a PSTrax fleet-safety portal by replaying its HTML
//! login form, pulls SCBA alert/gear data, and stores each run's outcome as
//! an append-only record. A background scheduler drives the scrape on a
//! configurable interval and evaluates time-bounded broadcast alerts.

pub mod cli;
pub mod config;
pub mod events;
pub mod models;
pub mod repository;
pub mod scheduler;
pub mod scrapers;
pub mod services;
pub mod vault;
