use serde::{Deserialize, Serialize};

use crate::models::{Condition, Country, VehicleFields};

/// Search parameters for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Markets to scrape
    pub countries: Vec<Country>,
    /// Make allow-list; empty means all makes
    pub makes: Vec<String>,
    /// Only NEW or only USED listings
    pub condition: Option<Condition>,
    /// Minimum price (EUR)
    pub min_price: Option<u64>,
    /// Maximum price (EUR)
    pub max_price: Option<u64>,
    /// Hard cap of accepted listings per country
    pub max_listings_per_country: usize,
    /// Search result pages to walk per make
    pub max_search_pages: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            countries: vec![Country::De],
            makes: Vec::new(),
            condition: None,
            min_price: None,
            max_price: None,
            max_listings_per_country: 100,
            max_search_pages: 20,
        }
    }
}

/// One listing page to fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTask {
    pub url: String,
    pub country: Country,
    /// Fields read from the listing's search-result card
    pub card: Option<VehicleFields>,
}

impl FetchTask {
    pub fn new(url: impl Into<String>, country: Country) -> Self {
        Self {
            url: url.into(),
            country,
            card: None,
        }
    }

    pub fn with_card(mut self, card: VehicleFields) -> Self {
        self.card = Some(card);
        self
    }

    /// Host used as the pacing key
    pub fn host(&self) -> String {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.country.domain().to_string())
    }
}

/// A fetch task dressed with the identity it is sent under
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub country: Country,
    pub user_agent: String,
    pub accept_language: String,
}

/// Raw response from either fetch path
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Produced by the browser rendering path
    pub rendered: bool,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
