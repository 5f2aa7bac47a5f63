//! Blocking HTTP client with a fixed delay between requests and retries for transient failures.

use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; ebook-corpus/0.1)";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_DELAY_SECS: u64 = 1;
const MAX_REDIRECTS: usize = 10;

/// Default number of attempts for get_with_retry (initial plus retries).
const DEFAULT_RETRY_COUNT: u32 = 4;
/// Default backoff in seconds after each failed attempt.
const DEFAULT_BACKOFF_SECS: [u64; 3] = [1, 2, 4];
/// Backoff for HTTP 429: wait longer so the server can recover.
const BACKOFF_429_SECS: [u64; 4] = [30, 60, 90, 120];

/// Blocking HTTP client that enforces a delay between requests.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::blocking::Client,
    delay: Duration,
    last_request: Option<Instant>,
    retry_count: u32,
    backoff_secs: Vec<u64>,
}

impl PoliteClient {
    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    /// GET with retries on timeouts, connection errors, HTTP 5xx, and HTTP 429. Each attempt
    /// first sleeps until the configured delay has passed since the last request.
    ///
    /// Other failures are returned immediately. The last attempt's response or error is
    /// returned as is, so the caller still sees a 5xx status after retries run out.
    pub fn get_with_retry(
        &mut self,
        url: &str,
    ) -> Result<reqwest::blocking::Response, reqwest::Error> {
        let max_attempts = self.retry_count.max(1);
        let mut attempt = 0;
        loop {
            let last_attempt = attempt + 1 >= max_attempts;
            self.wait_delay();
            let result = self.inner.get(url).send();
            self.last_request = Some(Instant::now());
            let backoff = match &result {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 {
                        Some(pick(&BACKOFF_429_SECS, attempt, 60))
                    } else if status.is_server_error() {
                        Some(pick(&self.backoff_secs, attempt, 1))
                    } else {
                        None
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    Some(pick(&self.backoff_secs, attempt, 1))
                }
                Err(_) => None,
            };
            match backoff {
                Some(secs) if !last_attempt => {
                    debug!(%url, attempt = attempt + 1, backoff_secs = secs, "retrying request");
                    std::thread::sleep(Duration::from_secs(secs));
                    attempt += 1;
                }
                _ => return result,
            }
        }
    }

    fn wait_delay(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                std::thread::sleep(self.delay - elapsed);
            }
        }
    }
}

fn pick(table: &[u64], attempt: u32, fallback: u64) -> u64 {
    table
        .get(attempt as usize)
        .or_else(|| table.last())
        .copied()
        .unwrap_or(fallback)
}

/// Builder for PoliteClient. Cloned once per worker thread by the catalog scraper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    delay_secs: u64,
    timeout_secs: u64,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_secs: DEFAULT_DELAY_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }
}

impl PoliteClientBuilder {
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Delay between requests in seconds. Default 1.
    pub fn delay_secs(mut self, secs: u64) -> Self {
        self.delay_secs = secs;
        self
    }

    /// Request timeout in seconds. Default 60.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Number of attempts for transient failures (at least 1).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Backoff in seconds before each retry. If shorter than retry_count - 1, the last value is reused.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    pub fn build(self) -> Result<PoliteClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        let backoff_secs = if self.retry_backoff_secs.is_empty() {
            // 1, 2, 4, ... for (retry_count - 1) steps
            let n = self.retry_count.saturating_sub(1) as usize;
            (0..n).map(|i| 1u64 << i.min(4)).collect::<Vec<_>>()
        } else {
            self.retry_backoff_secs
        };
        Ok(PoliteClient {
            inner,
            delay: Duration::from_secs(self.delay_secs),
            last_request: None,
            retry_count: self.retry_count,
            backoff_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_table_reuses_last_value() {
        assert_eq!(pick(&[1, 2, 4], 0, 9), 1);
        assert_eq!(pick(&[1, 2, 4], 5, 9), 4);
        assert_eq!(pick(&[], 0, 9), 9);
    }

    #[test]
    fn builder_fills_default_backoff_when_empty() -> Result<(), reqwest::Error> {
        let client = PoliteClient::builder()
            .retry_count(4)
            .retry_backoff_secs(Vec::new())
            .delay_secs(0)
            .build()?;
        assert_eq!(client.backoff_secs, vec![1, 2, 4]);
        assert_eq!(client.retry_count, 4);
        assert_eq!(client.delay, Duration::ZERO);
        Ok(())
    }

    #[test]
    fn builder_defaults() {
        let builder = PoliteClientBuilder::default();
        assert_eq!(builder.user_agent, None);
        assert_eq!(builder.delay_secs, 1);
        assert_eq!(builder.timeout_secs, 60);
        assert_eq!(builder.retry_count, 4);
        assert_eq!(builder.retry_backoff_secs, vec![1, 2, 4]);
    }

    #[test]
    fn retry_count_is_at_least_one() {
        let builder = PoliteClientBuilder::default().retry_count(0);
        assert_eq!(builder.retry_count, 1);
    }
}
