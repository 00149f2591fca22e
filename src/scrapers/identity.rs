//! Request identity rotation
//!
//! Every request carries the target country's `Accept-Language` and a
//! user agent taken from a rotating pool. This lowers fingerprint
//! correlation between requests; it does not guarantee anything.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::scrapers::types::{FetchRequest, FetchTask};

pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

/// Round-robin user agent pool, starting at a random offset
pub struct IdentityPool {
    user_agents: Vec<String>,
    /// Requests sent under one user agent before rotating
    rotate_every: usize,
    counter: AtomicUsize,
}

impl IdentityPool {
    pub fn new(user_agents: Vec<String>, rotate_every: usize) -> Self {
        let user_agents = if user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect()
        } else {
            user_agents
        };
        let rotate_every = rotate_every.max(1);
        let start = fastrand::usize(..user_agents.len()) * rotate_every;

        Self {
            user_agents,
            rotate_every,
            counter: AtomicUsize::new(start),
        }
    }

    pub fn next_user_agent(&self) -> &str {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        &self.user_agents[(n / self.rotate_every) % self.user_agents.len()]
    }

    /// Dress a task with the next identity
    pub fn request_for(&self, task: &FetchTask) -> FetchRequest {
        FetchRequest {
            url: task.url.clone(),
            country: task.country,
            user_agent: self.next_user_agent().to_string(),
            accept_language: task.country.accept_language().to_string(),
        }
    }
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self::new(Vec::new(), 1)
    }
}
