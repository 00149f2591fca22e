//! Request scheduler
//!
//! Bounds concurrency with a semaphore, paces requests per host, retries
//! transient failures with capped exponential backoff and stops admitting
//! tasks for a country once its accepted-record cutoff is reached.
//!
//! A task that is sleeping in backoff does not hold a concurrency permit.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::ScrapeError;
use crate::models::Country;
use crate::scrapers::identity::IdentityPool;
use crate::scrapers::metrics::RunMetrics;
use crate::scrapers::traits::{PageFetcher, TaskHandler, TaskOutcome};
use crate::scrapers::types::{FetchTask, RawResponse};

/// Scheduler tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum requests in flight across all hosts
    pub max_concurrent: usize,
    /// Minimum spacing between requests to one host
    pub base_delay_ms: u64,
    /// Uniform random extra spacing, 0..=jitter_ms
    pub jitter_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Whole-run wall clock limit; unfinished tasks are abandoned
    pub run_timeout_secs: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            base_delay_ms: 500,
            jitter_ms: 300,
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            run_timeout_secs: None,
        }
    }
}

impl SchedulerConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Delay before retry number `attempt + 1`. A server-provided
    /// `Retry-After` replaces the computed value; both are capped.
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let computed = Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(2u64.saturating_pow(attempt)),
        );
        retry_after
            .unwrap_or(computed)
            .min(Duration::from_millis(self.max_backoff_ms))
    }
}

/// Per-host request spacing
struct Pacer {
    base: Duration,
    jitter_ms: u64,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl Pacer {
    fn new(config: &SchedulerConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            jitter_ms: config.jitter_ms,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve the next slot for `host` and sleep until it arrives.
    /// Returns false, reserving nothing, when the slot would fall at or
    /// after `deadline`.
    async fn wait(&self, host: &str, deadline: Option<Instant>) -> bool {
        let slot = {
            let mut slots = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let slot = slots.get(host).copied().filter(|s| *s > now).unwrap_or(now);
            if deadline.is_some_and(|d| slot >= d) {
                return false;
            }
            let gap = self.base + Duration::from_millis(fastrand::u64(0..=self.jitter_ms));
            slots.insert(host.to_string(), slot + gap);
            slot
        };
        sleep_until(slot).await;
        true
    }

    /// Push the host's next slot out after a rate limit response
    fn hold(&self, host: &str, until: Instant) {
        let mut slots = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(host.to_string()).or_insert(until);
        if *slot < until {
            *slot = until;
        }
    }
}

#[derive(Debug, Default)]
struct CountryGate {
    accepted: usize,
    in_flight: usize,
}

enum Admission {
    Admitted,
    CutOff,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Accepted,
    Rejected,
    Failed,
    SkippedCutoff,
    Abandoned,
}

impl From<TaskOutcome> for Disposition {
    fn from(outcome: TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Accepted => Disposition::Accepted,
            TaskOutcome::Rejected => Disposition::Rejected,
            TaskOutcome::Failed => Disposition::Failed,
        }
    }
}

/// Task counts for one `Scheduler::run`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub submitted: usize,
    pub admitted: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
    pub skipped_cutoff: usize,
    pub abandoned: usize,
}

impl RunSummary {
    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Accepted => self.accepted += 1,
            Disposition::Rejected => self.rejected += 1,
            Disposition::Failed => self.failed += 1,
            Disposition::SkippedCutoff => self.skipped_cutoff += 1,
            Disposition::Abandoned => self.abandoned += 1,
        }
        if matches!(
            disposition,
            Disposition::Accepted | Disposition::Rejected | Disposition::Failed
        ) {
            self.admitted += 1;
        }
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    fetcher: Arc<dyn PageFetcher>,
    identities: IdentityPool,
    pacer: Pacer,
    semaphore: Arc<Semaphore>,
    metrics: Arc<RunMetrics>,
    gates: Mutex<HashMap<Country, CountryGate>>,
    completed: Notify,
    cutoff: Option<usize>,
    /// Deadline of the run in progress
    deadline: Mutex<Option<Instant>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        fetcher: Arc<dyn PageFetcher>,
        identities: IdentityPool,
        metrics: Arc<RunMetrics>,
    ) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            pacer: Pacer::new(&config),
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
            fetcher,
            identities,
            metrics,
            gates: Mutex::new(HashMap::new()),
            completed: Notify::new(),
            cutoff: None,
            deadline: Mutex::new(None),
        }
    }

    /// Stop admitting a country's tasks once this many were accepted
    pub fn with_cutoff(mut self, max_accepted_per_country: usize) -> Self {
        self.cutoff = Some(max_accepted_per_country);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<RunMetrics> {
        Arc::clone(&self.metrics)
    }

    /// One request through another fetch path (the browser fallback),
    /// paced on the task's host and refused past the run deadline. The
    /// caller already holds a concurrency permit. `None` means the
    /// deadline came first.
    pub async fn fetch_via(
        &self,
        fetcher: &dyn PageFetcher,
        task: &FetchTask,
    ) -> Option<Result<RawResponse, ScrapeError>> {
        let deadline = *self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
        if deadline.is_some_and(|d| Instant::now() >= d) || !self.pacer.wait(&task.host(), deadline).await {
            return None;
        }

        let request = self.identities.request_for(task);
        self.metrics.requests_issued.inc();
        debug!("Fetching {} via {}", task.url, fetcher.name());
        Some(fetcher.fetch(&request).await)
    }

    /// Fetch a single page under the same concurrency, pacing and retry
    /// policy as the listing tasks. Used for search result pages.
    pub async fn fetch_page(&self, task: &FetchTask) -> Result<RawResponse, ScrapeError> {
        match self.fetch_with_retry(task, None).await {
            Some((fetched, _permit)) => fetched,
            None => Err(ScrapeError::TransientNetwork {
                url: task.url.clone(),
                reason: "scheduler closed".to_string(),
            }),
        }
    }

    /// Run every task to completion and hand each final fetch result to
    /// `handler`
    pub async fn run(self: &Arc<Self>, tasks: Vec<FetchTask>, handler: Arc<dyn TaskHandler>) -> RunSummary {
        let deadline = self.config.run_timeout().map(|t| Instant::now() + t);
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = deadline;
        let mut summary = RunSummary {
            submitted: tasks.len(),
            ..RunSummary::default()
        };

        info!(
            "Scheduling {} tasks ({} concurrent, {}ms base delay)",
            tasks.len(),
            self.config.max_concurrent,
            self.config.base_delay_ms
        );

        let mut set = JoinSet::new();
        for task in tasks {
            let scheduler = Arc::clone(self);
            let handler = Arc::clone(&handler);
            set.spawn(async move { scheduler.process(task, handler, deadline).await });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(disposition) => summary.record(disposition),
                Err(e) => {
                    warn!("Task aborted: {}", e);
                    self.metrics.failed.inc();
                    summary.record(Disposition::Failed);
                }
            }
        }

        summary
    }

    async fn process(&self, task: FetchTask, handler: Arc<dyn TaskHandler>, deadline: Option<Instant>) -> Disposition {
        match self.admit(task.country, deadline).await {
            Admission::Admitted => {}
            Admission::CutOff => {
                debug!("Cutoff reached for {}, skipping {}", task.country, task.url);
                return Disposition::SkippedCutoff;
            }
            Admission::TimedOut => {
                self.metrics.abandoned.inc();
                return Disposition::Abandoned;
            }
        }

        let disposition = match self.fetch_with_retry(&task, deadline).await {
            Some((fetched, permit)) => {
                let outcome = handler.handle(&task, fetched).await;
                drop(permit);
                if outcome == TaskOutcome::Failed {
                    self.metrics.failed.inc();
                }
                Disposition::from(outcome)
            }
            None => {
                warn!("Run timeout reached, abandoning {}", task.url);
                self.metrics.abandoned.inc();
                Disposition::Abandoned
            }
        };

        self.release(task.country, disposition);
        disposition
    }

    async fn admit(&self, country: Country, deadline: Option<Instant>) -> Admission {
        let Some(max) = self.cutoff else {
            return Admission::Admitted;
        };

        loop {
            // Registered before the gate check so a completion in between is not missed
            let notified = self.completed.notified();
            {
                let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
                let gate = gates.entry(country).or_default();
                if gate.accepted >= max {
                    return Admission::CutOff;
                }
                if gate.accepted + gate.in_flight < max {
                    gate.in_flight += 1;
                    return Admission::Admitted;
                }
            }

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = sleep_until(deadline) => return Admission::TimedOut,
                    }
                }
                None => notified.await,
            }
        }
    }

    fn release(&self, country: Country, disposition: Disposition) {
        if self.cutoff.is_none() {
            return;
        }
        {
            let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            let gate = gates.entry(country).or_default();
            gate.in_flight = gate.in_flight.saturating_sub(1);
            if disposition == Disposition::Accepted {
                gate.accepted += 1;
            }
        }
        self.completed.notify_waiters();
    }

    async fn acquire(&self, deadline: Option<Instant>) -> Option<OwnedSemaphorePermit> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        match deadline {
            Some(deadline) => tokio::select! {
                permit = acquire => permit.ok(),
                _ = sleep_until(deadline) => None,
            },
            None => acquire.await.ok(),
        }
    }

    /// Fetch with retries. Returns the final result together with the
    /// permit it was obtained under, or `None` when the run deadline cut
    /// the task short.
    async fn fetch_with_retry(
        &self,
        task: &FetchTask,
        deadline: Option<Instant>,
    ) -> Option<(Result<RawResponse, ScrapeError>, OwnedSemaphorePermit)> {
        let host = task.host();
        let mut attempt = 0u32;

        loop {
            let permit = self.acquire(deadline).await?;
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }

            if !self.pacer.wait(&host, deadline).await {
                return None;
            }
            let request = self.identities.request_for(task);
            self.metrics.requests_issued.inc();
            debug!("Fetching {} via {} (attempt {})", task.url, self.fetcher.name(), attempt + 1);

            let fetched = self.fetcher.fetch(&request).await;
            let error = match fetched {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => e,
                other => return Some((other, permit)),
            };

            let retry_after = match &error {
                ScrapeError::RateLimited { retry_after, .. } => *retry_after,
                _ => None,
            };
            let delay = self.config.backoff_delay(attempt, retry_after);

            self.metrics.retried.inc();
            if error.is_rate_limited() {
                self.metrics.backed_off.inc();
                self.pacer.hold(&host, Instant::now() + delay);
            }
            warn!("{} (retry {} in {:?})", error, attempt + 1, delay);

            drop(permit);
            if deadline.is_some_and(|d| Instant::now() + delay >= d) {
                return None;
            }
            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::types::FetchRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: 5,
            base_delay_ms: 0,
            jitter_ms: 0,
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            run_timeout_secs: None,
        }
    }

    /// Tracks peak concurrency; fails the first `failures` attempts per call site
    struct CountingFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        attempts: AtomicUsize,
        failures: usize,
        rate_limited: bool,
    }

    impl CountingFetcher {
        fn new(failures: usize, rate_limited: bool) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                attempts: AtomicUsize::new(0),
                failures,
                rate_limited,
            }
        }
    }

    #[async_trait]
    impl PageFetcher for CountingFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, ScrapeError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if attempt < self.failures {
                if self.rate_limited {
                    return Err(ScrapeError::RateLimited {
                        url: request.url.clone(),
                        status: 429,
                        retry_after: None,
                    });
                }
                return Err(ScrapeError::TransientNetwork {
                    url: request.url.clone(),
                    reason: "connection reset".to_string(),
                });
            }

            Ok(RawResponse {
                url: request.url.clone(),
                status: 200,
                headers: Vec::new(),
                body: "<html></html>".to_string(),
                rendered: false,
            })
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl TaskHandler for AcceptAll {
        async fn handle(&self, _task: &FetchTask, fetched: Result<RawResponse, ScrapeError>) -> TaskOutcome {
            match fetched {
                Ok(_) => TaskOutcome::Accepted,
                Err(_) => TaskOutcome::Failed,
            }
        }
    }

    fn tasks(n: usize, country: Country) -> Vec<FetchTask> {
        (0..n)
            .map(|i| FetchTask::new(format!("https://{}/offer/{}", country.domain(), i), country))
            .collect()
    }

    fn scheduler(config: SchedulerConfig, fetcher: Arc<CountingFetcher>) -> Scheduler {
        Scheduler::new(config, fetcher, IdentityPool::default(), Arc::new(RunMetrics::default()))
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let fetcher = Arc::new(CountingFetcher::new(0, false));
        let scheduler = Arc::new(scheduler(fast_config(), Arc::clone(&fetcher)));

        let mut all = tasks(10, Country::De);
        all.extend(tasks(10, Country::Fr));
        let summary = scheduler.run(all, Arc::new(AcceptAll)).await;

        assert_eq!(summary.accepted, 20);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_rate_limit_retry_ceiling() {
        let fetcher = Arc::new(CountingFetcher::new(usize::MAX, true));
        let scheduler = Arc::new(scheduler(fast_config(), Arc::clone(&fetcher)));

        let summary = scheduler.run(tasks(1, Country::It), Arc::new(AcceptAll)).await;

        assert_eq!(fetcher.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(summary.failed, 1);
        let metrics = scheduler.metrics().snapshot();
        assert_eq!(metrics.requests_issued, 4);
        assert_eq!(metrics.retried, 3);
        assert_eq!(metrics.backed_off, 3);
        assert_eq!(metrics.failed, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let fetcher = Arc::new(CountingFetcher::new(2, false));
        let scheduler = Arc::new(scheduler(fast_config(), Arc::clone(&fetcher)));

        let summary = scheduler.run(tasks(1, Country::Be), Arc::new(AcceptAll)).await;

        assert_eq!(summary.accepted, 1);
        assert_eq!(fetcher.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.metrics().snapshot().backed_off, 0);
    }

    #[tokio::test]
    async fn test_cutoff_per_country() {
        let fetcher = Arc::new(CountingFetcher::new(0, false));
        let scheduler = Arc::new(scheduler(fast_config(), Arc::clone(&fetcher)).with_cutoff(3));

        let mut all = tasks(10, Country::De);
        all.extend(tasks(2, Country::Fr));
        let summary = scheduler.run(all, Arc::new(AcceptAll)).await;

        assert_eq!(summary.accepted, 5);
        assert_eq!(summary.skipped_cutoff, 7);
        assert_eq!(fetcher.attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_run_timeout_abandons_backoff() {
        let config = SchedulerConfig {
            initial_backoff_ms: 10_000,
            max_backoff_ms: 60_000,
            run_timeout_secs: Some(1),
            ..fast_config()
        };
        let fetcher = Arc::new(CountingFetcher::new(usize::MAX, true));
        let scheduler = Arc::new(scheduler(config, Arc::clone(&fetcher)));

        let summary = scheduler.run(tasks(1, Country::De), Arc::new(AcceptAll)).await;

        assert_eq!(summary.abandoned, 1);
        assert_eq!(fetcher.attempts.load(Ordering::SeqCst), 1);
    }

    fn paced_config(base_delay_ms: u64) -> SchedulerConfig {
        SchedulerConfig {
            base_delay_ms,
            jitter_ms: 0,
            ..SchedulerConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_host_requests_are_spaced() {
        let pacer = Pacer::new(&paced_config(500));
        let start = Instant::now();

        assert!(pacer.wait("www.autoscout24.de", None).await);
        assert!(pacer.wait("www.autoscout24.de", None).await);
        assert!(pacer.wait("www.autoscout24.de", None).await);

        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_are_paced_independently() {
        let pacer = Pacer::new(&paced_config(500));
        let start = Instant::now();

        assert!(pacer.wait("www.autoscout24.de", None).await);
        assert!(pacer.wait("www.autoscout24.fr", None).await);
        assert!(pacer.wait("www.autoscout24.it", None).await);

        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_pushes_next_slot_out() {
        let pacer = Pacer::new(&paced_config(100));
        let start = Instant::now();

        pacer.hold("www.autoscout24.be", start + Duration::from_secs(5));
        assert!(pacer.wait("www.autoscout24.be", None).await);

        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_past_deadline_is_refused() {
        let pacer = Pacer::new(&paced_config(500));
        let start = Instant::now();
        let deadline = Some(start + Duration::from_millis(300));

        assert!(pacer.wait("www.autoscout24.de", deadline).await);
        assert!(!pacer.wait("www.autoscout24.de", deadline).await);
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_via_is_paced_and_bounded_by_deadline() {
        let config = SchedulerConfig {
            run_timeout_secs: Some(1),
            ..paced_config(600)
        };
        let primary = Arc::new(CountingFetcher::new(0, false));
        let fallback = CountingFetcher::new(0, false);
        let scheduler = Arc::new(scheduler(config, primary));

        scheduler.run(tasks(1, Country::De), Arc::new(AcceptAll)).await;
        let task = FetchTask::new("https://www.autoscout24.de/angebote/x", Country::De);

        // the listing fetch took the first slot; the next one is 600ms out
        let start = Instant::now();
        assert!(scheduler.fetch_via(&fallback, &task).await.is_some());
        assert!(start.elapsed() >= Duration::from_millis(500));

        // the slot after that lands past the one-second deadline
        assert!(scheduler.fetch_via(&fallback, &task).await.is_none());
        assert_eq!(fallback.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.metrics().snapshot().requests_issued, 2);
    }

    #[test]
    fn test_backoff_delay() {
        let config = SchedulerConfig::default();
        assert_eq!(config.backoff_delay(0, None), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(2, None), Duration::from_secs(4));
        assert_eq!(config.backoff_delay(20, None), Duration::from_secs(60));
        assert_eq!(
            config.backoff_delay(0, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            config.backoff_delay(0, Some(Duration::from_secs(600))),
            Duration::from_secs(60)
        );
    }
}
