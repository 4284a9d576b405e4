//! Per-metric scrape and test pipeline
//!
//! The front half of a metric pipeline: the scraper queries the backend on
//! every scrape tick and hands a window's worth of normalized samples to the
//! tester, which reduces each window to one [`TestResult`] per test tick.

pub mod normalize;
pub mod scraper;
pub mod tester;

pub use normalize::{
    normalize, normalize_or_invalid, scalar_bounds, NormalizeError, Sample, ScrapedMetric,
};
pub use scraper::{scrape_once, spawn_scraper};
pub use tester::{aggregate_batch, spawn_tester, test_value_bounds, TestResult};
