//! Application services: scrape orchestration and alert evaluation.

pub mod alerts;
pub mod scrape;

pub use alerts::evaluate_alerts;
pub use scrape::{RunOutcome, ScrapeService};
