//! Run orchestration
//!
//! Wires the scheduler, anti-bot detector, browser fallback, extraction
//! pipeline and aggregator together for one run. Search pages and listing
//! pages pass the same detector and fallback; a listing whose page is lost
//! can still be built from its search-result card.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::aggregator::{AggregatedListings, Aggregator, ListingFilters, Offer};
use crate::config::RunConfig;
use crate::error::ScrapeError;
use crate::extraction::{Extraction, ExtractionPipeline};
use crate::models::ListingRecord;
use crate::scrapers::detector::{AntiBotDetector, Verdict};
use crate::scrapers::discovery::{self, SearchPages};
use crate::scrapers::identity::IdentityPool;
use crate::scrapers::metrics::{MetricsSnapshot, RunMetrics};
use crate::scrapers::scheduler::{RunSummary, Scheduler};
use crate::scrapers::traits::{PageFetcher, TaskHandler, TaskOutcome};
use crate::scrapers::types::{FetchTask, RawResponse, SearchParams};

/// Everything a finished run hands to the export writer
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub listings: AggregatedListings,
    pub summary: RunSummary,
    pub metrics: MetricsSnapshot,
}

pub struct Harvester {
    scheduler: Arc<Scheduler>,
    pipeline: ExtractionPipeline,
    detector: AntiBotDetector,
    fallback: Option<Arc<dyn PageFetcher>>,
    aggregator: Mutex<Aggregator>,
    metrics: Arc<RunMetrics>,
}

impl Harvester {
    pub fn new(
        scheduler: Arc<Scheduler>,
        pipeline: ExtractionPipeline,
        detector: AntiBotDetector,
        filters: ListingFilters,
    ) -> Self {
        let metrics = scheduler.metrics();
        Self {
            scheduler,
            pipeline,
            detector,
            fallback: None,
            aggregator: Mutex::new(Aggregator::new(filters)),
            metrics,
        }
    }

    /// Re-fetch blocked pages through `fallback`
    pub fn with_fallback(mut self, fallback: Arc<dyn PageFetcher>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Build a harvester from the run configuration. `fallback` is only
    /// used when `fetch.fallback_enabled` is set.
    pub fn from_config(
        config: &RunConfig,
        fetcher: Arc<dyn PageFetcher>,
        fallback: Option<Arc<dyn PageFetcher>>,
    ) -> Self {
        let identities = IdentityPool::new(config.fetch.user_agents.clone(), config.fetch.rotate_every);
        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            fetcher,
            identities,
            Arc::new(RunMetrics::default()),
        )
        .with_cutoff(config.search.max_listings_per_country);

        let harvester = Self::new(
            Arc::new(scheduler),
            ExtractionPipeline::new(config.validation.clone()),
            AntiBotDetector::new(&config.detector),
            config.effective_filters(),
        );

        match fallback {
            Some(fallback) if config.fetch.fallback_enabled => harvester.with_fallback(fallback),
            _ => harvester,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Walk the search pages of every configured country.
    ///
    /// Fails when search pages were requested and not one of them came back
    /// usable, so a blocked or unreachable marketplace is not mistaken for
    /// an empty one.
    pub async fn discover(&self, params: &SearchParams) -> Result<Vec<FetchTask>> {
        let mut tasks = Vec::new();
        let mut requested = 0;
        let mut usable = 0;
        for &country in &params.countries {
            let found = discovery::discover(self, params, country).await;
            requested += found.pages_requested;
            usable += found.pages_usable;
            tasks.extend(found.tasks);
        }

        if requested > 0 && usable == 0 {
            bail!(
                "All {} search pages failed without a usable response; target host unreachable or blocking every request",
                requested
            );
        }
        Ok(tasks)
    }

    /// Fetch, extract and aggregate every task.
    ///
    /// Per-URL failures never fail the run. It fails only when tasks were
    /// submitted and every admitted one failed without a single usable
    /// response.
    pub async fn run(self: &Arc<Self>, tasks: Vec<FetchTask>) -> Result<RunReport> {
        let handler: Arc<dyn TaskHandler> = Arc::clone(self) as Arc<dyn TaskHandler>;
        let summary = self.scheduler.run(tasks, handler).await;
        let metrics = self.metrics.snapshot();

        let aggregator = std::mem::take(&mut *self.aggregator.lock().unwrap_or_else(PoisonError::into_inner));
        let listings = aggregator.finish();

        if summary.submitted > 0
            && summary.failed > 0
            && summary.failed == summary.admitted
            && metrics.usable_responses == 0
        {
            bail!(
                "All {} fetches failed without a usable response; target host unreachable or blocking every request",
                summary.failed
            );
        }

        info!(
            "✅ Run finished: {} accepted, {} rejected, {} failed, {} skipped by cutoff, {} abandoned",
            summary.accepted, summary.rejected, summary.failed, summary.skipped_cutoff, summary.abandoned
        );

        Ok(RunReport {
            listings,
            summary,
            metrics,
        })
    }

    /// Usable response for a task, escalating blocked pages once
    async fn resolve(&self, task: &FetchTask, fetched: Result<RawResponse, ScrapeError>) -> Option<RawResponse> {
        match self.detector.inspect(&fetched) {
            Verdict::Usable => fetched.ok(),
            Verdict::Failed(reason) => {
                warn!("✗ {}: {}", task.url, reason);
                None
            }
            Verdict::Blocked(marker) => self.escalate(task, marker).await,
        }
    }

    async fn escalate(&self, task: &FetchTask, marker: String) -> Option<RawResponse> {
        let Some(fallback) = &self.fallback else {
            warn!(
                "✗ {}",
                ScrapeError::AntiBotBlocked {
                    url: task.url.clone(),
                    marker,
                }
            );
            return None;
        };

        self.metrics.fallback_escalated.inc();
        info!("Blocked on {} ({}), escalating to {} fetch", task.url, marker, fallback.name());

        let Some(fetched) = self.scheduler.fetch_via(fallback.as_ref(), task).await else {
            warn!("Run timeout reached before fallback fetch of {}", task.url);
            return None;
        };

        match self.detector.inspect(&fetched) {
            Verdict::Usable => fetched.ok(),
            Verdict::Blocked(marker) => {
                warn!(
                    "✗ {} (after fallback)",
                    ScrapeError::AntiBotBlocked {
                        url: task.url.clone(),
                        marker,
                    }
                );
                None
            }
            Verdict::Failed(reason) => {
                warn!("✗ {} (fallback): {}", task.url, reason);
                None
            }
        }
    }

    fn extract(&self, task: &FetchTask, response: &RawResponse) -> Option<ListingRecord> {
        let extracted = self
            .pipeline
            .extract_with_card(&task.url, task.country, &response.body, task.card.as_ref());
        self.collect(extracted)
    }

    /// Record built from the search-result card alone
    fn extract_card(&self, task: &FetchTask) -> Option<ListingRecord> {
        let card = task.card.as_ref()?;
        info!("Building {} from its search-result card", task.url);
        self.collect(self.pipeline.from_card(&task.url, task.country, card))
    }

    fn collect(&self, extracted: Result<Extraction, ScrapeError>) -> Option<ListingRecord> {
        match extracted {
            Ok(extraction) => {
                for (tier, filled) in &extraction.tier_hits {
                    if *filled > 0 {
                        self.metrics.record_tier_hit(*tier);
                    }
                }
                self.metrics.nulled_fields.add(extraction.nulled.len() as u64);
                Some(extraction.record)
            }
            Err(e) => {
                self.metrics.incomplete.inc();
                warn!("Discarded: {}", e);
                None
            }
        }
    }

    fn offer(&self, record: ListingRecord) -> TaskOutcome {
        let url = record.listing_url.clone();
        let offer = self
            .aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .offer(record);

        match offer {
            Offer::Accepted => {
                self.metrics.accepted.inc();
                debug!("✓ {}", url);
                TaskOutcome::Accepted
            }
            Offer::Duplicate => {
                self.metrics.duplicates.inc();
                debug!("Duplicate listing {}", url);
                TaskOutcome::Rejected
            }
            Offer::Filtered(filter) => {
                self.metrics.filtered.inc();
                debug!("Filtered by {}: {}", filter, url);
                TaskOutcome::Rejected
            }
            Offer::OverCap => {
                debug!("Country cap reached, dropping {}", url);
                TaskOutcome::Rejected
            }
        }
    }
}

#[async_trait]
impl TaskHandler for Harvester {
    async fn handle(&self, task: &FetchTask, fetched: Result<RawResponse, ScrapeError>) -> TaskOutcome {
        let Some(response) = self.resolve(task, fetched).await else {
            return match self.extract_card(task) {
                Some(record) => self.offer(record),
                None => TaskOutcome::Failed,
            };
        };
        self.metrics.usable_responses.inc();

        match self.extract(task, &response) {
            Some(record) => self.offer(record),
            None => TaskOutcome::Rejected,
        }
    }
}

#[async_trait]
impl SearchPages for Harvester {
    async fn search_page(&self, task: &FetchTask) -> Option<RawResponse> {
        let fetched = self.scheduler.fetch_page(task).await;
        self.resolve(task, fetched).await
    }
}
