//! Rate-limit-aware call wrapper and cursor pagination.
//!
//! Every GitHub request made by this crate goes through a
//! [`PaginatedApiClient`] call path. The call path states the idempotence of
//! the request:
//!
//! | Call path | Retried on rate limit | Use for |
//! |-----------|-----------------------|---------|
//! | [`PaginatedApiClient::read`] | once | pure reads |
//! | [`PaginatedApiClient::mutate_idempotent`] | once | mutations safe to repeat (member removal) |
//! | [`PaginatedApiClient::mutate_once`] | never | everything else |
//!
//! On a rate-limit error the client asks the [`RateLimitProbe`] when the
//! exhausted bucket resets, sleeps `max(0, reset - now) + buffer` and issues
//! the call exactly once more. A second rate-limit error is returned as is.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dormancy::{Clock, Sleeper};
use futures::stream::{self, Stream, TryStreamExt};
use tracing::{debug, warn};

use crate::error::{GitHubError, RateLimitResource};

/// Default pad added to the provider-reported reset time.
pub const DEFAULT_RATE_LIMIT_BUFFER: Duration = Duration::from_secs(5);

/// Reports when a GitHub quota bucket resets.
#[async_trait]
pub trait RateLimitProbe: Send + Sync {
    async fn reset_at(&self, resource: RateLimitResource) -> Result<DateTime<Utc>, GitHubError>;
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

/// Cursor state reported with every page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_info: PageInfo,
}

impl<T> Page<T> {
    /// The cursor to fetch next, or `None` when this is the last page.
    ///
    /// A page that claims more results but carries no cursor is treated as
    /// the last page.
    fn next_cursor(&self) -> Option<String> {
        if !self.page_info.has_next_page {
            return None;
        }
        if self.page_info.end_cursor.is_none() {
            warn!("Page reports more results but no end cursor; stopping pagination");
        }
        self.page_info.end_cursor.clone()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Wraps GitHub calls with single-retry rate-limit recovery.
#[derive(Clone)]
pub struct PaginatedApiClient {
    probe: Arc<dyn RateLimitProbe>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    buffer: Duration,
}

impl PaginatedApiClient {
    pub fn new(
        probe: Arc<dyn RateLimitProbe>,
        sleeper: Arc<dyn Sleeper>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            probe,
            sleeper,
            clock,
            buffer: DEFAULT_RATE_LIMIT_BUFFER,
        }
    }

    /// Overrides the pad added to the reset wait.
    pub fn with_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    /// Issues a read, retrying once after a rate limit.
    pub async fn read<T, F, Fut>(&self, op: F) -> Result<T, GitHubError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GitHubError>>,
    {
        self.call_with_retry(op).await
    }

    /// Issues a mutation the caller guarantees is safe to repeat, retrying
    /// once after a rate limit.
    pub async fn mutate_idempotent<T, F, Fut>(&self, op: F) -> Result<T, GitHubError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GitHubError>>,
    {
        self.call_with_retry(op).await
    }

    /// Issues a mutation exactly once. Rate-limit errors are returned as is.
    pub async fn mutate_once<T, F, Fut>(&self, op: F) -> Result<T, GitHubError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GitHubError>>,
    {
        op().await
    }

    /// Lazily fetches pages starting at `start_cursor`, each through
    /// [`Self::read`]. The stream ends after the last page or the first error
    /// and cannot be restarted.
    pub fn paginate<'a, T, F, Fut>(
        &'a self,
        fetch_page: F,
        start_cursor: Option<String>,
    ) -> impl Stream<Item = Result<Page<T>, GitHubError>> + 'a
    where
        T: 'a,
        F: FnMut(Option<String>) -> Fut + 'a,
        Fut: Future<Output = Result<Page<T>, GitHubError>> + 'a,
    {
        stream::try_unfold(
            (Some(start_cursor), fetch_page),
            move |(cursor, mut fetch_page)| async move {
                let Some(cursor) = cursor else {
                    return Ok(None);
                };
                let page = self.read(|| fetch_page(cursor.clone())).await?;
                debug!(
                    items = page.items.len(),
                    has_next_page = page.page_info.has_next_page,
                    "Fetched page"
                );
                let next = page.next_cursor().map(Some);
                Ok(Some((page, (next, fetch_page))))
            },
        )
    }

    /// Fetches every page and flattens the items.
    pub async fn paginate_all<T, F, Fut>(&self, fetch_page: F) -> Result<Vec<T>, GitHubError>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<Page<T>, GitHubError>>,
    {
        self.paginate(fetch_page, None)
            .map_ok(|page| page.items)
            .try_concat()
            .await
    }

    /// `max(0, reset - now) + buffer`.
    pub fn sleep_duration(&self, reset: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        (reset - now).to_std().unwrap_or(Duration::ZERO) + self.buffer
    }

    async fn call_with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, GitHubError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GitHubError>>,
    {
        let err = match op().await {
            Err(err) => err,
            ok => return ok,
        };
        let Some(resource) = err.rate_limited_resource() else {
            return Err(err);
        };

        let reset = self.probe.reset_at(resource).await?;
        let wait = self.sleep_duration(reset, self.clock.now());
        warn!(
            %resource,
            reset = %reset,
            wait_secs = wait.as_secs(),
            "GitHub rate limit exceeded; waiting for reset before retrying once"
        );
        self.sleeper.sleep(wait).await;
        op().await
    }
}
