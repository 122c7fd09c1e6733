pub mod appraisal;
pub mod config;
pub mod enricher;
pub mod filter;
pub mod notify;
pub mod parser;
pub mod pipeline;
pub mod reconciler;
pub mod record;
pub mod retry;
pub mod scraper;
pub mod store;
pub mod summary;
pub mod types;
pub mod utils;

pub use pipeline::{Pipeline, RunError, RunOutcome};
pub use scraper::EdikteClient;

pub(crate) const BASE_URL: &str = "https://edikte.justiz.gv.at";
