pub mod browser;
pub mod detector;
pub mod discovery;
pub mod http;
pub mod identity;
pub mod metrics;
pub mod scheduler;
pub mod traits;
pub mod types;

pub use browser::BrowserFetcher;
pub use detector::{AntiBotDetector, Verdict};
pub use http::HttpFetcher;
pub use identity::IdentityPool;
pub use metrics::{MetricsSnapshot, RunMetrics};
pub use scheduler::{RunSummary, Scheduler, SchedulerConfig};
pub use traits::{PageFetcher, TaskHandler, TaskOutcome};
pub use types::{FetchRequest, FetchTask, RawResponse, SearchParams};
