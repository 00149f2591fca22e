use std::time::Duration;
use thiserror::Error;

/// Per-URL and per-field failures. None of these abort a run.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Timeout, connection reset, DNS failure, unexpected 5xx
    #[error("transient network error on {url}: {reason}")]
    TransientNetwork { url: String, reason: String },

    /// 429 or 403 from the target host
    #[error("rate limited on {url} (HTTP {status})")]
    RateLimited {
        url: String,
        status: u16,
        retry_after: Option<Duration>,
    },

    /// Challenge or interstitial page detected
    #[error("anti-bot block on {url}: {marker}")]
    AntiBotBlocked { url: String, marker: String },

    /// Mandatory field missing after all extraction tiers
    #[error("extraction incomplete for {url}: missing {missing:?}")]
    ExtractionIncomplete {
        url: String,
        missing: Vec<&'static str>,
    },

    /// A field value outside plausible bounds; the field is nulled
    #[error("invalid {field}: {value}")]
    Validation { field: &'static str, value: String },

    /// Browser rendering path failed
    #[error("render failed for {url}: {reason}")]
    Render { url: String, reason: String },
}

impl ScrapeError {
    /// Whether the scheduler should retry this failure under its backoff policy
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScrapeError::TransientNetwork { .. } | ScrapeError::RateLimited { .. }
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ScrapeError::RateLimited { .. })
    }
}
