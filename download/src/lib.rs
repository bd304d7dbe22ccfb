/*! Streaming bulk download of the objects under a prefix.

A [`Downloader`] is bound to one bucket (a [`BucketConfig`](objstream::BucketConfig)) and an
[`ObjectStore`](objstream::ObjectStore).  Each call to [`Downloader::download`] or
[`Downloader::download_bounded`] walks the store's listing of a prefix page by page in a
background task.  Every selected object is fetched into a fresh
[`RandomAccessBuffer`](objstream::RandomAccessBuffer) and handed, as a [`RemoteObject`], to the
caller's [`ObjectHandler`] before the next one is fetched.

## Progress

The returned [`Download`] is a stream of [`DownloadEvent`]s:

* `PageCount(n)` once per listing page, before any of that page's objects are fetched;
* `Failure(err)` at most once, if listing or fetching failed, after which nothing else happens;
* `Done` once every page was processed and the handler's `on_complete` returned.

The background task waits for each event to be received before continuing, so the stream must be
drained (or [`Download::finish`] awaited).  Dropping the `Download` cancels the task.

## Bounds

[`DownloadOptions`] limits each page to `max_count` objects starting at index `start_offset`
within that page.  A `max_count` of zero means "the rest of the page".  Both apply to every page
separately; the position ID handed to the handler is always the object's index in its page.

## Ranged fetches

Stores whose objects can be fetched by URL can use [`fetch_url`] to download them as concurrent
`Range` requests written straight into the destination buffer.

```
# use objstream::{BucketConfig, Credentials, MemoryStore};
# use objstream_download::{Downloader, ObjectHandler, RemoteObject};
# use async_trait::async_trait;
struct Sizes(Vec<usize>);

#[async_trait]
impl ObjectHandler for Sizes {
    async fn handle_object(&mut self, object: RemoteObject) {
        self.0.push(object.remaining());
    }
    async fn on_complete(&mut self) {}
}

# #[tokio::main]
# async fn main() -> anyhow::Result<()> {
let config = BucketConfig::new("bucket", "local", Credentials::new("id", "secret"));
let store = MemoryStore::new(100);
store.insert("bucket", "logs/a", "abc")?;
store.insert("bucket", "logs/b", "de")?;

let sizes = Downloader::new(config, store)
    .download("logs/", Sizes(vec![]))
    .finish()
    .await?;
assert_eq!(sizes.0, vec![3, 2]);
# Ok(())
# }
```
 */
mod downloader;
mod handler;
mod object;
mod ranged;

#[cfg(test)]
mod test_helpers;

pub use downloader::{Download, DownloadEvent, DownloadOptions, Downloader};
pub use handler::ObjectHandler;
pub use object::RemoteObject;
pub use ranged::{fetch_url, FetchOptions, PartRetry};
