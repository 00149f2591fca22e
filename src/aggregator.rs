//! Listing aggregation
//!
//! Collects extracted records for a run, drops duplicates (first seen
//! wins), applies post-filters and data-quality rules and partitions the
//! result by country.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::locale::normalize_make;
use crate::models::{Condition, Country, ListingRecord};
use crate::scrapers::types::SearchParams;

/// Post-filters. The search filters are inactive while left empty / unset;
/// the two quality rules are on by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingFilters {
    pub countries: Vec<Country>,
    pub makes: Vec<String>,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub condition: Option<Condition>,
    /// Accepted records per country; later ones are dropped
    pub max_per_country: Option<usize>,
    /// Also collapse records with identical make, model, year, mileage and price
    pub collapse_near_duplicates: bool,
    /// Prices below this are placeholders ("1 €", "Preis auf Anfrage"); 0 disables
    pub price_floor: u64,
    /// Drop used cars at least three years old showing under 100 km
    pub mileage_sanity: bool,
}

impl Default for ListingFilters {
    fn default() -> Self {
        Self {
            countries: Vec::new(),
            makes: Vec::new(),
            min_price: None,
            max_price: None,
            condition: None,
            max_per_country: None,
            collapse_near_duplicates: false,
            price_floor: 500,
            mileage_sanity: true,
        }
    }
}

impl ListingFilters {
    /// Fill inactive filters from the search constraints
    pub fn inherit(mut self, search: &SearchParams) -> Self {
        if self.countries.is_empty() {
            self.countries = search.countries.clone();
        }
        if self.makes.is_empty() {
            self.makes = search.makes.clone();
        }
        self.min_price = self.min_price.or(search.min_price);
        self.max_price = self.max_price.or(search.max_price);
        self.condition = self.condition.or(search.condition);
        self.max_per_country = self.max_per_country.or(Some(search.max_listings_per_country));
        self
    }

    /// `Err` names the first filter the record fails
    pub fn check(&self, record: &ListingRecord) -> Result<(), &'static str> {
        if !self.countries.is_empty() && !self.countries.contains(&record.country) {
            return Err("country");
        }

        if !self.makes.is_empty() {
            let make = record.make().map(|m| normalize_make(m).to_lowercase());
            let allowed = make.is_some_and(|make| {
                self.makes
                    .iter()
                    .any(|wanted| normalize_make(wanted).to_lowercase() == make)
            });
            if !allowed {
                return Err("make");
            }
        }

        if let Some(min) = self.min_price {
            if record.price().map_or(true, |p| p < min) {
                return Err("min_price");
            }
        }
        if let Some(max) = self.max_price {
            if record.price().map_or(true, |p| p > max) {
                return Err("max_price");
            }
        }

        if let Some(wanted) = self.condition {
            if record.condition() != Some(wanted) {
                return Err("condition");
            }
        }

        if record.price().is_some_and(|p| p < self.price_floor) {
            return Err("price_outlier");
        }

        if self.mileage_sanity && record.condition() != Some(Condition::New) {
            let stale = record.age_years.is_some_and(|age| age >= 3);
            let barely_driven = record.fields.mileage_km.is_some_and(|km| km < 100);
            if stale && barely_driven {
                return Err("mileage_sanity");
            }
        }

        Ok(())
    }
}

/// What the aggregator did with an offered record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    Duplicate,
    Filtered(&'static str),
    OverCap,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Signature {
    make: String,
    model: String,
    year: Option<i32>,
    mileage_km: Option<u64>,
    price: Option<u64>,
}

impl Signature {
    fn of(record: &ListingRecord) -> Self {
        let f = &record.fields;
        Self {
            make: f.make.as_deref().unwrap_or_default().to_lowercase(),
            model: f.model.as_deref().unwrap_or_default().to_lowercase(),
            year: f.year,
            mileage_km: f.mileage_km,
            price: f.price,
        }
    }
}

/// Final listing set, per country and combined
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedListings {
    pub by_country: BTreeMap<Country, Vec<ListingRecord>>,
    pub combined: Vec<ListingRecord>,
}

impl AggregatedListings {
    pub fn len(&self) -> usize {
        self.combined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Aggregator {
    filters: ListingFilters,
    seen_keys: HashSet<String>,
    signatures: HashSet<Signature>,
    per_country: HashMap<Country, usize>,
    accepted: Vec<ListingRecord>,
}

impl Aggregator {
    pub fn new(filters: ListingFilters) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    /// Offer one record in fetch-completion order
    pub fn offer(&mut self, record: ListingRecord) -> Offer {
        if !self.seen_keys.insert(record.dedup_key().to_string()) {
            return Offer::Duplicate;
        }

        if let Err(filter) = self.filters.check(&record) {
            return Offer::Filtered(filter);
        }

        if self.filters.collapse_near_duplicates && !self.signatures.insert(Signature::of(&record)) {
            return Offer::Duplicate;
        }

        let count = self.per_country.entry(record.country).or_insert(0);
        if self.filters.max_per_country.is_some_and(|cap| *count >= cap) {
            return Offer::OverCap;
        }
        *count += 1;

        self.accepted.push(record);
        Offer::Accepted
    }

    pub fn finish(self) -> AggregatedListings {
        let mut by_country: BTreeMap<Country, Vec<ListingRecord>> = BTreeMap::new();
        for record in &self.accepted {
            by_country.entry(record.country).or_default().push(record.clone());
        }
        AggregatedListings {
            by_country,
            combined: self.accepted,
        }
    }
}
