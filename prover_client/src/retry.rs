use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tower::retry::Policy;
use tracing::warn;

/// Retries requests that failed to reach the server, or that the server
/// failed to handle, after a fixed backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    backoff: Duration,
    retries: u32,
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(backoff: Duration, max_retries: u32) -> Self {
        Self {
            backoff,
            retries: 0,
            max_retries,
        }
    }

    /// Sends every request exactly once.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> tokio::time::Sleep {
        tokio::time::sleep(self.backoff)
    }
}

fn is_transient(result: Result<&reqwest::Response, &reqwest::Error>) -> bool {
    match result {
        Ok(response) => response.status().is_server_error(),
        Err(e) => e.is_connect() || e.is_timeout(),
    }
}

impl<Req: Clone> Policy<Req, reqwest::Response, reqwest::Error> for RetryPolicy {
    type Future = Pin<Box<dyn Future<Output = Self> + Send + 'static>>;

    fn retry(
        &self,
        _req: &Req,
        result: Result<&reqwest::Response, &reqwest::Error>,
    ) -> Option<Self::Future> {
        if is_transient(result) && self.retries < self.max_retries {
            let mut policy = self.clone();
            warn!(
                "Request failed, retrying in {:?} ({}/{})",
                self.backoff,
                self.retries + 1,
                self.max_retries
            );
            Some(Box::pin(async move {
                policy.backoff().await;
                policy.retries += 1;
                policy
            }))
        } else {
            None
        }
    }

    fn clone_request(&self, req: &Req) -> Option<Req> {
        Some(req.clone())
    }
}
