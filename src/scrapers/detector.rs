//! Anti-bot detection
//!
//! Decides whether a fetch result is usable listing content, a block or
//! challenge page (worth one escalation to the browser path), or a plain
//! failure.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::ScrapeError;
use crate::scrapers::types::RawResponse;

static META_REFRESH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<meta[^>]+http-equiv\s*=\s*["']?refresh"#).expect("valid regex"));

/// Detection thresholds and markers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Listing pages shorter than this are treated as interstitials
    pub min_body_bytes: usize,
    /// Case-insensitive substrings that identify challenge pages
    pub challenge_markers: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_body_bytes: 2048,
            challenge_markers: [
                "captcha-delivery.com",
                "geo.captcha-delivery",
                "px-captcha",
                "cf-challenge",
                "challenge-platform",
                "cf-browser-verification",
                "_incapsula_resource",
                "distil_r_captcha",
                "are you a robot",
                "please verify you are a human",
                "kein roboter",
                "vous n'êtes pas un robot",
                "non sei un robot",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
        }
    }
}

/// Classification of one fetch result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Usable,
    /// Blocked or challenged; the marker says why
    Blocked(String),
    /// Not worth escalating (404, exhausted network retries, ...)
    Failed(String),
}

pub struct AntiBotDetector {
    min_body_bytes: usize,
    markers: Vec<String>,
}

impl AntiBotDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            min_body_bytes: config.min_body_bytes,
            markers: config.challenge_markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    /// Classify a fetch result as it comes out of the scheduler's retry loop
    pub fn inspect(&self, fetched: &Result<RawResponse, ScrapeError>) -> Verdict {
        match fetched {
            Ok(response) => self.classify(response),
            Err(ScrapeError::RateLimited { status, .. }) => {
                Verdict::Blocked(format!("HTTP {} after retries", status))
            }
            Err(ScrapeError::AntiBotBlocked { marker, .. }) => Verdict::Blocked(marker.clone()),
            Err(other) => Verdict::Failed(other.to_string()),
        }
    }

    pub fn classify(&self, response: &RawResponse) -> Verdict {
        if response.status == 403 || response.status == 429 {
            return Verdict::Blocked(format!("HTTP {}", response.status));
        }
        if !response.is_success() {
            return Verdict::Failed(format!("HTTP {}", response.status));
        }

        let body = response.body.to_lowercase();
        if let Some(marker) = self.markers.iter().find(|m| body.contains(m.as_str())) {
            return Verdict::Blocked(marker.clone());
        }

        let length = response.body.trim().len();
        if length < self.min_body_bytes {
            if META_REFRESH.is_match(&response.body) {
                return Verdict::Blocked("interstitial redirect".to_string());
            }
            return Verdict::Blocked(format!("short body ({} bytes)", length));
        }

        Verdict::Usable
    }
}

impl Default for AntiBotDetector {
    fn default() -> Self {
        Self::new(&DetectorConfig::default())
    }
}
