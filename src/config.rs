use std::{env, time::Duration};

use anyhow::{bail, Result};

#[derive(Debug, Clone)]
pub(crate) struct SyncConfig {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub workers_num: usize,
    pub batch_size: usize,
    pub queue_capacity: usize,
    pub scan_page_size: usize,
    pub retry: RetryPolicy,
    pub write_backoff: Duration,
    pub final_flush_attempts: u32,
    pub drain_timeout: Duration,
}

impl SyncConfig {
    pub(crate) fn from_env(workers_num: usize) -> Result<Self> {
        let config = Self {
            api_base_url: env::var("ARCHIVER_API_BASE_URL")
                .unwrap_or("https://hacker-news.firebaseio.com/v0".to_string()),
            request_timeout: Duration::from_secs(
                env::var("ARCHIVER_REQUEST_TIMEOUT_SECS")
                    .unwrap_or("30".to_string())
                    .parse()?,
            ),
            workers_num,
            batch_size: env::var("ARCHIVER_BATCH_SIZE").unwrap_or("500".to_string()).parse()?,
            queue_capacity: env::var("ARCHIVER_QUEUE_CAPACITY")
                .unwrap_or("10000".to_string())
                .parse()?,
            scan_page_size: env::var("ARCHIVER_SCAN_PAGE_SIZE")
                .unwrap_or("10000".to_string())
                .parse()?,
            retry: RetryPolicy {
                max_attempts: env::var("ARCHIVER_MAX_FETCH_ATTEMPTS")
                    .unwrap_or("10".to_string())
                    .parse()?,
                base_delay: Duration::from_millis(
                    env::var("ARCHIVER_RETRY_BASE_DELAY_MS")
                        .unwrap_or("500".to_string())
                        .parse()?,
                ),
                max_delay: Duration::from_millis(
                    env::var("ARCHIVER_RETRY_MAX_DELAY_MS")
                        .unwrap_or("60000".to_string())
                        .parse()?,
                ),
            },
            write_backoff: Duration::from_millis(
                env::var("ARCHIVER_WRITE_BACKOFF_MS")
                    .unwrap_or("1000".to_string())
                    .parse()?,
            ),
            final_flush_attempts: env::var("ARCHIVER_FINAL_FLUSH_ATTEMPTS")
                .unwrap_or("5".to_string())
                .parse()?,
            drain_timeout: Duration::from_secs(
                env::var("ARCHIVER_DRAIN_TIMEOUT_SECS")
                    .unwrap_or("3600".to_string())
                    .parse()?,
            ),
        };
        config.validate()?;
        return Ok(config);
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.workers_num == 0 {
            bail!("workers must be at least 1");
        }
        if self.batch_size == 0 || self.queue_capacity == 0 || self.scan_page_size == 0 {
            bail!("batch size, queue capacity and scan page size must be positive");
        }
        if self.final_flush_attempts == 0 {
            bail!("final flush needs at least one attempt");
        }
        Ok(())
    }
}

/// Per-id fetch retries: exponential backoff, capped attempts. `max_attempts == 0` retries forever.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Whether an id that has already failed `attempts` times gets another try.
    pub(crate) fn allows(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }

    /// Delay before the next try of an id that failed `attempts` times (1 = first failure).
    pub(crate) fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        std::cmp::min(delay, self.max_delay)
    }
}
