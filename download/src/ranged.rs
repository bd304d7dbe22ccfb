//! Multi-part download of a single URL into a [`RandomAccessBuffer`].
//!
//! This is the building block for [`ObjectStore::fetch`](objstream::ObjectStore::fetch)
//! implementations whose objects are reachable by URL, such as pre-signed object URLs.
//!
//! The download orchestrator never retries.  Here each part is retried on its own, and a retry
//! resumes from the first byte of the part not yet written rather than starting the part over.
use anyhow::{anyhow, Context, Error, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::stream::{self, StreamExt};
use objstream::RandomAccessBuffer;
use reqwest::{header, StatusCode};
use std::time::Duration;

/// Tuning for [`fetch_url`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Size of each ranged request, in bytes (default 5 MiB)
    pub part_size: u64,

    /// Number of ranged requests in flight at once (default 5)
    pub concurrency: usize,

    /// How each part is retried
    pub retry: PartRetry,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            part_size: 5 * 1024 * 1024,
            concurrency: 5,
            retry: PartRetry::default(),
        }
    }
}

/// Retry settings for one part of a ranged fetch.
#[derive(Debug, Clone)]
pub struct PartRetry {
    /// Retries after the first request, zero to never retry (default 3)
    pub retries: u32,

    /// Delay before the first retry, doubled for each retry after it (default 100ms)
    pub initial_delay: Duration,

    /// Cap on the delay between retries (default 10s)
    pub max_delay: Duration,

    /// Each delay is scaled by a random factor in `1 ± jitter` (default 0.25)
    pub jitter: f64,
}

impl Default for PartRetry {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: 0.25,
        }
    }
}

/// The progress of one part: the bytes `next..end` are still to be written.
struct Part {
    start: u64,
    next: u64,
    end: u64,
    attempts: u32,
    backoff: ExponentialBackoff,
}

impl Part {
    fn new(start: u64, end: u64, retry: &PartRetry) -> Self {
        let mut backoff = ExponentialBackoff {
            max_elapsed_time: None,
            max_interval: retry.max_delay,
            initial_interval: retry.initial_delay,
            multiplier: 2.0,
            randomization_factor: retry.jitter,
            ..Default::default()
        };
        backoff.reset();
        Self {
            start,
            next: start,
            end,
            attempts: 0,
            backoff,
        }
    }

    /// The delay before the next attempt, or None once `retry.retries` retries are used up.
    fn retry_delay(&mut self, retry: &PartRetry) -> Option<Duration> {
        if self.attempts > retry.retries {
            None
        } else {
            self.backoff.next_backoff()
        }
    }

    /// The `Range` header value for what is left of this part.
    fn range(&self) -> String {
        format!("bytes={}-{}", self.next, self.end - 1)
    }
}

/// A result from a possibly-retriable operation.
pub(crate) enum RetriableResult<R, E> {
    /// Operation failed, but could be retried
    Retriable(E),
    /// Operation failed, and should not be retried
    Permanent(E),
    /// Operation succeeded
    Ok(R),
}

/// Download the `size` bytes at `url` into `dest`, as concurrent `Range` requests of
/// `options.part_size` bytes each.  Parts complete in any order and are written at their own
/// offsets.  Each part is retried on its own; a client error (4xx) is never retried.
pub async fn fetch_url(
    url: &str,
    size: u64,
    options: &FetchOptions,
    dest: &RandomAccessBuffer,
) -> Result<()> {
    let client = reqwest::Client::new();
    let part_size = options.part_size.max(1);
    let parts = (0..size)
        .step_by(part_size as usize)
        .map(|start| Part::new(start, (start + part_size).min(size), &options.retry));

    let client = &client;
    let mut results = stream::iter(parts)
        .map(|part| fetch_part(client, url, size, part, &options.retry, dest))
        .buffer_unordered(options.concurrency.max(1));

    while let Some(res) = results.next().await {
        res?;
    }
    Ok(())
}

/// Fetch one part, retrying with backoff.
async fn fetch_part(
    client: &reqwest::Client,
    url: &str,
    size: u64,
    mut part: Part,
    retry: &PartRetry,
    dest: &RandomAccessBuffer,
) -> Result<()> {
    loop {
        part.attempts += 1;
        match get_range(client, url, size, &mut part, dest).await {
            RetriableResult::Ok(()) => return Ok(()),
            RetriableResult::Retriable(err) => match part.retry_delay(retry) {
                Some(duration) => tokio::time::sleep(duration).await,
                None => {
                    return Err(err).context(format!(
                        "Fetching bytes {}-{} failed after {} attempts",
                        part.start,
                        part.end - 1,
                        part.attempts
                    ))
                }
            },
            RetriableResult::Permanent(err) => return Err(err),
        }
    }
}

/// Get what is left of a part and write it to `dest` at its offset, advancing `part.next` past
/// every byte written.  The return value indicates whether the operation can be retried.
async fn get_range(
    client: &reqwest::Client,
    url: &str,
    size: u64,
    part: &mut Part,
    dest: &RandomAccessBuffer,
) -> RetriableResult<(), Error> {
    let res = match client
        .get(url)
        .header(header::RANGE, part.range())
        .send()
        .await
        .and_then(|res| res.error_for_status())
    {
        Err(err) => {
            // if this was a client error (e.g., 404), it is permanent
            if err.status().map(|s| s.is_client_error()).unwrap_or(false) {
                return RetriableResult::Permanent(err.into());
            } else {
                return RetriableResult::Retriable(err.into());
            }
        }

        Ok(res) => res,
    };

    // a server ignoring the Range header sends the whole object, which is only useful if
    // that is exactly what was asked for
    let whole = part.next == 0 && part.end == size;
    if res.status() != StatusCode::PARTIAL_CONTENT && !whole {
        return RetriableResult::Permanent(anyhow!(
            "server does not support range requests (status {})",
            res.status()
        ));
    }

    let mut body = res.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            // an error reading data from the remote is common and retriable
            Err(e) => return RetriableResult::Retriable(e.into()),
        };
        if part.next + chunk.len() as u64 > part.end {
            return RetriableResult::Permanent(anyhow!(
                "server sent more than the requested bytes {}-{}",
                part.start,
                part.end - 1
            ));
        }
        if let Err(e) = dest.write_at(&chunk, part.next) {
            return RetriableResult::Permanent(e.into());
        }
        part.next += chunk.len() as u64;
    }

    if part.next != part.end {
        return RetriableResult::Retriable(anyhow!(
            "short read of bytes {}-{}: stopped at {}",
            part.start,
            part.end - 1,
            part.next
        ));
    }
    RetriableResult::Ok(())
}
