/*! Single-shot object publishing.

[`upload_from_buf`] publishes an in-memory payload to a key in the configured bucket through an
[`ObjectStore`], returning the new object's location.  [`Uploader`] does the same for callers
that upload repeatedly to one bucket and want logging.  [`upload_to_url`] uploads directly to a
pre-signed URL with a single `PUT`.

None of these retry.  A failure is returned to the caller, who decides whether to try again.
 */
use anyhow::{Context, Result};
use objstream::logging::discard_logger;
use objstream::{BucketConfig, ObjectStore};
use reqwest::{Body, Url};
use slog::{debug, info, o, Logger};
use std::io::Cursor;
use tokio_util::codec::{BytesCodec, FramedRead};

/// Publish `data` at `key` in the configured bucket, returning the resulting location.
pub async fn upload_from_buf<S: ObjectStore + ?Sized>(
    config: &BucketConfig,
    key: &str,
    data: &[u8],
    store: &S,
) -> Result<String> {
    store
        .publish(&config.bucket, key, data.to_vec())
        .await
        .with_context(|| format!("publishing {}/{}", config.bucket, key))
}

/// An Uploader publishes objects to a single bucket.
pub struct Uploader<S: ObjectStore> {
    config: BucketConfig,
    store: S,
    logger: Logger,
}

impl<S: ObjectStore> Uploader<S> {
    pub fn new(config: BucketConfig, store: S) -> Self {
        Self {
            config,
            store,
            logger: discard_logger(),
        }
    }

    /// Set the [`slog::Logger`] that uploads will log to
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Publish `data` at `key`, returning the resulting location.
    pub async fn upload(&self, key: &str, data: &[u8]) -> Result<String> {
        let logger = self.logger.new(o!(
            "bucket" => self.config.bucket.clone(),
            "key" => key.to_owned()
        ));
        debug!(logger, "uploading"; "bytes" => data.len());
        let location = upload_from_buf(&self.config, key, data, &self.store).await?;
        info!(logger, "uploaded"; "location" => location.as_str());
        Ok(location)
    }
}

/// Upload `data` to a pre-signed `url` with a single `PUT`.  Returns the object's location, which
/// is the URL without its query string (where pre-signed URLs carry their signature).
pub async fn upload_to_url(url: &str, content_type: &str, data: Vec<u8>) -> Result<String> {
    let mut location = Url::parse(url).with_context(|| format!("invalid upload URL {}", url))?;

    let content_length = data.len();
    let stream = FramedRead::new(Cursor::new(data), BytesCodec::new());
    reqwest::Client::new()
        .put(location.clone())
        .header("Content-Type", content_type)
        .header("Content-Length", content_length)
        .body(Body::wrap_stream(stream))
        .send()
        .await?
        .error_for_status()?;

    location.set_query(None);
    Ok(location.to_string())
}
