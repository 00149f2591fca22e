//! Multi-country car listing extraction.
//!
//! Fetches listing pages from the national AutoScout24 marketplaces under a
//! shared rate budget, escalates blocked pages to a headless browser,
//! extracts vehicle records through ordered extraction tiers and returns a
//! deduplicated, filtered listing set.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod extraction;
pub mod harvester;
pub mod locale;
pub mod models;
pub mod scrapers;

pub use aggregator::{AggregatedListings, Aggregator, ListingFilters, Offer};
pub use config::RunConfig;
pub use error::ScrapeError;
pub use extraction::ExtractionPipeline;
pub use harvester::{Harvester, RunReport};
pub use models::{Country, ListingRecord};
