//! Process-wide identify coordinator

use super::{IdentifyQueue, IdentifyRequest, IdentifyToken};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Pending requests beyond this block the requesting client
const QUEUE_CAPACITY: usize = 64;

/// How long a granted token may stay unreleased before the next client is served
const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Grants identify tokens one at a time, at most one per interval
///
/// Create one per process with [`IdentifyCoordinator::new`], hand a clone of
/// the returned [`IdentifyQueue`] to every client, and spawn [`run`](Self::run).
pub struct IdentifyCoordinator {
    requests: mpsc::Receiver<IdentifyRequest>,
    limiter: Option<DefaultDirectRateLimiter>,
    release_timeout: Duration,
    next_key: u64,
}

impl IdentifyCoordinator {
    /// Create a coordinator allowing one identify per `interval`
    ///
    /// A zero interval disables the rate limit; grants are then only
    /// serialized.
    #[must_use]
    pub fn new(interval: Duration) -> (IdentifyQueue, Self) {
        let (queue, requests) = mpsc::channel(QUEUE_CAPACITY);
        let limiter = Quota::with_period(interval)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));

        let coordinator = Self {
            requests,
            limiter,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
            next_key: 1,
        };
        (queue, coordinator)
    }

    #[must_use]
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    /// Serve requests until `shutdown` fires or every queue handle is dropped
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            rate_limited = self.limiter.is_some(),
            "Identify coordinator started"
        );

        loop {
            let request = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                request = self.requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            if let Some(limiter) = &self.limiter {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    () = limiter.until_ready() => {}
                }
            }

            let key = self.next_key;
            self.next_key += 1;
            let shard_id = request.shard_id();
            let (release, released) = oneshot::channel();

            if request.grant(IdentifyToken::new(key, release)).is_err() {
                tracing::debug!(key, shard_id, "Requester stopped waiting; token discarded");
                continue;
            }
            tracing::debug!(key, shard_id, "Identify token granted");

            if !self.await_release(key, shard_id, released, &shutdown).await {
                break;
            }
        }

        tracing::info!("Identify coordinator stopped");
    }

    /// Returns false if shutdown fired while waiting
    async fn await_release(
        &self,
        key: u64,
        shard_id: u32,
        released: oneshot::Receiver<()>,
        shutdown: &CancellationToken,
    ) -> bool {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => false,
            outcome = tokio::time::timeout(self.release_timeout, released) => {
                match outcome {
                    Ok(Ok(())) => tracing::trace!(key, shard_id, "Identify token released"),
                    Ok(Err(_)) => tracing::warn!(key, shard_id, "Identify token abandoned"),
                    Err(_) => tracing::warn!(
                        key,
                        shard_id,
                        timeout_ms = self.release_timeout.as_millis() as u64,
                        "Identify token not released in time"
                    ),
                }
                true
            }
        }
    }
}
