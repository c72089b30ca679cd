//! Data models for scbadash.

mod alert;
mod scrape;
mod scrape_config;

pub use alert::Alert;
pub use scrape::{ScrapeEnvelope, ScrapeRecord, ScrapeStatus};
pub use scrape_config::ScrapeConfig;
