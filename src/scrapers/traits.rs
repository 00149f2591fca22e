use crate::error::ScrapeError;
use crate::scrapers::types::{FetchRequest, FetchTask, RawResponse};
use async_trait::async_trait;

/// Common trait for every way of fetching a page
/// (lightweight HTTP, headless browser, in-memory doubles in tests)
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one page
    async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, ScrapeError>;

    /// Get the name of the fetch path
    fn name(&self) -> &'static str;
}

/// What happened to an admitted task once its page was processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// A new record entered the result set
    Accepted,
    /// Page was processed but produced no new record (duplicate, filtered, incomplete)
    Rejected,
    /// URL failed and is excluded from output
    Failed,
}

/// Receives each task's final fetch result while the task still holds its
/// concurrency permit
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &FetchTask, fetched: Result<RawResponse, ScrapeError>) -> TaskOutcome;
}
