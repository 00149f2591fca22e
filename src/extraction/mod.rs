//! Tiered listing extraction
//!
//! A fetched detail page is run through an ordered list of tiers:
//! - Structured: JSON-LD vehicle/product markup
//! - Table: labeled spec tables using per-country label dictionaries
//! - Pattern: locale-aware regexes over visible text
//!
//! Each tier is a pure function over (page, partial record). The first tier
//! to produce a value for a field wins; later tiers only fill gaps. Data
//! read from the search-result card fills whatever the page left empty.

pub mod pattern;
pub mod structured;
pub mod table;

use scraper::Html;
use tracing::debug;

use crate::error::ScrapeError;
use crate::models::{Country, ListingRecord, Tier, ValidationConfig, VehicleFields};

/// One fetched page, parsed once and shared by every tier
pub struct Page<'a> {
    pub url: &'a str,
    pub country: Country,
    pub html: Html,
    /// Visible text with script and style content removed
    pub text: String,
}

impl<'a> Page<'a> {
    pub fn parse(url: &'a str, country: Country, body: &str) -> Self {
        let html = Html::parse_document(body);
        let text = visible_text(&html);
        Self {
            url,
            country,
            html,
            text,
        }
    }
}

fn visible_text(html: &Html) -> String {
    html.root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node
                .parent()
                .and_then(|parent| {
                    parent
                        .value()
                        .as_element()
                        .map(|el| matches!(el.name(), "script" | "style" | "noscript" | "template"))
                })
                .unwrap_or(false);
            let trimmed = text.trim();
            (!hidden && !trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A tier: reads the page and the fields found so far, returns what it found
pub type TierFn = fn(&Page<'_>, &VehicleFields) -> VehicleFields;

/// Outcome of extracting one page
#[derive(Debug)]
pub struct Extraction {
    pub record: ListingRecord,
    /// Number of fields each tier contributed
    pub tier_hits: Vec<(Tier, usize)>,
    /// Fields nulled by validation
    pub nulled: Vec<ScrapeError>,
}

pub struct ExtractionPipeline {
    tiers: Vec<(Tier, TierFn)>,
    validation: ValidationConfig,
}

impl Default for ExtractionPipeline {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

impl ExtractionPipeline {
    pub fn new(validation: ValidationConfig) -> Self {
        Self {
            tiers: vec![
                (Tier::Structured, structured::extract as TierFn),
                (Tier::Table, table::extract as TierFn),
                (Tier::Pattern, pattern::extract as TierFn),
            ],
            validation,
        }
    }

    /// Replace the tier list; order is priority order
    pub fn with_tiers(mut self, tiers: Vec<(Tier, TierFn)>) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn validation(&self) -> &ValidationConfig {
        &self.validation
    }

    /// Extract a candidate record from one page body.
    ///
    /// Fails with `ExtractionIncomplete` when make, model or price are still
    /// missing after every tier and validation.
    pub fn extract(&self, url: &str, country: Country, body: &str) -> Result<Extraction, ScrapeError> {
        self.extract_with_card(url, country, body, None)
    }

    /// Like [`extract`](Self::extract), with the listing's search-result
    /// card as the lowest-priority source
    pub fn extract_with_card(
        &self,
        url: &str,
        country: Country,
        body: &str,
        card: Option<&VehicleFields>,
    ) -> Result<Extraction, ScrapeError> {
        let page = Page::parse(url, country, body);
        let mut record = ListingRecord::new(url, country);
        let mut tier_hits = Vec::with_capacity(self.tiers.len() + 1);

        for (tier, run) in &self.tiers {
            let found = run(&page, &record.fields);
            let filled = record.fields.fill_gaps(found, *tier, &mut record.provenance);
            debug!("{} tier filled {} fields for {}", tier.as_str(), filled, url);
            tier_hits.push((*tier, filled));
        }

        if let Some(card) = card {
            let filled = record.fields.fill_gaps(card.clone(), Tier::Card, &mut record.provenance);
            tier_hits.push((Tier::Card, filled));
        }

        self.complete(record, tier_hits)
    }

    /// Build a record from search-result card data alone, for listings
    /// whose detail page could not be fetched
    pub fn from_card(&self, url: &str, country: Country, card: &VehicleFields) -> Result<Extraction, ScrapeError> {
        let mut record = ListingRecord::new(url, country);
        let filled = record.fields.fill_gaps(card.clone(), Tier::Card, &mut record.provenance);
        self.complete(record, vec![(Tier::Card, filled)])
    }

    fn complete(&self, mut record: ListingRecord, tier_hits: Vec<(Tier, usize)>) -> Result<Extraction, ScrapeError> {
        let url = record.listing_url.clone();
        record.finalize(&self.validation);
        let nulled = record.validate(&self.validation);
        for err in &nulled {
            debug!("Nulled field on {}: {}", url, err);
        }

        let missing = record.missing_mandatory();
        if !missing.is_empty() {
            return Err(ScrapeError::ExtractionIncomplete { url, missing });
        }

        Ok(Extraction {
            record,
            tier_hits,
            nulled,
        })
    }
}
