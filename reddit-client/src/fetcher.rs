//! Batched fan-out over many upstream requests.
//!
//! Requests run in fixed-size batches. Calls inside a batch are concurrent
//! and a batch always finishes completely before the next one starts. A
//! failing request only affects its own result; rate-limited requests are
//! deferred and retried after the main pass.

use crate::api::{UpstreamRequest, UpstreamSource};
use crate::retry::{delay_for, RetryConfig};
use futures::future::join_all;
use radar_core::{CoreError, RedditApiError};
use serde_json::Value;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct BatchFetcher {
    batch_size: usize,
    inter_batch_delay: Duration,
    request_timeout: Duration,
    retry_config: RetryConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutSummary {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rate_limited: usize,
    pub timed_out: usize,
    pub retried: usize,
    pub stopped_early: bool,
}

impl FanoutSummary {
    pub fn merge(&mut self, other: &FanoutSummary) {
        self.requested += other.requested;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.rate_limited += other.rate_limited;
        self.timed_out += other.timed_out;
        self.retried += other.retried;
        self.stopped_early |= other.stopped_early;
    }
}

impl BatchFetcher {
    pub fn new(
        batch_size: usize,
        inter_batch_delay: Duration,
        request_timeout: Duration,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            batch_size: batch_size.max(1),
            inter_batch_delay,
            request_timeout,
            retry_config,
        }
    }

    /// Fetches every request and hands each final outcome to `on_result`.
    ///
    /// Returning `ControlFlow::Break` from the callback stops the fan-out
    /// before the next batch is issued.
    pub async fn fetch_batched<S, F>(
        &self,
        source: &S,
        requests: Vec<UpstreamRequest>,
        mut on_result: F,
    ) -> FanoutSummary
    where
        S: UpstreamSource,
        F: FnMut(&UpstreamRequest, Result<Value, CoreError>) -> ControlFlow<()>,
    {
        let mut summary = FanoutSummary {
            requested: requests.len(),
            ..Default::default()
        };
        let mut pending = requests;
        let mut attempt: u32 = 0;

        while !pending.is_empty() {
            let retry_allowed = attempt + 1 < self.retry_config.max_attempts;
            let mut deferred: Vec<(UpstreamRequest, CoreError)> = Vec::new();

            for (index, batch) in pending.chunks(self.batch_size).enumerate() {
                if index > 0 && !self.inter_batch_delay.is_zero() {
                    sleep(self.inter_batch_delay).await;
                }

                debug!("Issuing batch {} with {} requests", index + 1, batch.len());
                let results = join_all(batch.iter().map(|r| self.fetch_one(source, r))).await;

                for (request, result) in batch.iter().zip(results) {
                    let rate_limited = matches!(&result, Err(e) if e.is_rate_limited());
                    let timed_out = matches!(&result, Err(e) if e.is_timeout());

                    if result.is_ok() {
                        summary.succeeded += 1;
                    } else if rate_limited {
                        summary.rate_limited += 1;
                        if retry_allowed {
                            debug!("Deferring rate-limited {}", request.label());
                            if let Err(e) = result {
                                deferred.push((request.clone(), e));
                            }
                            continue;
                        }
                        summary.failed += 1;
                    } else {
                        if timed_out {
                            summary.timed_out += 1;
                        }
                        summary.failed += 1;
                    }

                    if on_result(request, result).is_break() {
                        debug!("Fan-out stopped by caller");
                        summary.stopped_early = true;
                        return summary;
                    }
                }
            }

            if deferred.is_empty() {
                break;
            }

            let delay = deferred
                .iter()
                .map(|(_, e)| delay_for(e, attempt, &self.retry_config))
                .max()
                .unwrap_or_default();
            info!(
                "Retrying {} rate-limited requests in {:?}",
                deferred.len(),
                delay
            );
            sleep(delay).await;

            attempt += 1;
            summary.retried += deferred.len();
            pending = deferred.into_iter().map(|(request, _)| request).collect();
        }

        summary
    }

    async fn fetch_one<S: UpstreamSource>(
        &self,
        source: &S,
        request: &UpstreamRequest,
    ) -> Result<Value, CoreError> {
        match timeout(self.request_timeout, source.fetch_json(request)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    "{} exceeded per-request timeout of {:?}",
                    request.label(),
                    self.request_timeout
                );
                Err(CoreError::RedditApi(RedditApiError::RequestTimeout))
            }
        }
    }
}
