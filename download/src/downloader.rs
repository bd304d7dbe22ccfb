use crate::handler::ObjectHandler;
use crate::object::RemoteObject;
use anyhow::{anyhow, Context as AnyhowContext, Error, Result};
use futures_util::stream::Stream;
use objstream::logging::discard_logger;
use objstream::{BucketConfig, ObjectInfo, ObjectStore, RandomAccessBuffer};
use slog::{debug, error, info, o, Logger};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Limits on how much of each listing page a download processes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// The most objects to process from each page.  Zero means no limit: everything from
    /// `start_offset` to the end of the page.  This is a per-page bound, not a total.
    pub max_count: usize,

    /// Index within each page of the first object to process.
    pub start_offset: usize,
}

impl DownloadOptions {
    /// The number of objects to process from a page holding `page_len` objects.
    pub fn page_count(&self, page_len: usize) -> usize {
        let available = page_len.saturating_sub(self.start_offset);
        if self.max_count > 0 {
            self.max_count.min(available)
        } else {
            available
        }
    }
}

/// Progress of a running download.
#[derive(Debug)]
pub enum DownloadEvent {
    /// A listing page was received, and this many of its objects will be processed.  Sent
    /// before any of them are fetched.
    PageCount(usize),
    /// The download failed and has stopped.  At most one failure is sent per download, and it
    /// is the last event.
    Failure(Error),
    /// Every page was processed and the handler's `on_complete` has returned.
    Done,
}

/// A Downloader fetches every object under a prefix of one bucket, handing each to an
/// [`ObjectHandler`] as it arrives.
pub struct Downloader<S: ObjectStore + 'static> {
    config: Arc<BucketConfig>,
    store: Arc<S>,
    logger: Logger,
}

impl<S: ObjectStore + 'static> Downloader<S> {
    pub fn new(config: BucketConfig, store: S) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            logger: discard_logger(),
        }
    }

    /// Set the [`slog::Logger`] that downloads will log to
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Download every object under `prefix`.  This is `download_bounded` with default options.
    pub fn download<H>(&self, prefix: &str, handler: H) -> Download<H>
    where
        H: ObjectHandler + 'static,
    {
        self.download_bounded(prefix, handler, DownloadOptions::default())
    }

    /// Start downloading the objects under `prefix`, processing at most `options.max_count`
    /// objects from each listing page, starting at `options.start_offset` within the page.
    ///
    /// The download runs in a background task, which must be spawned from within a tokio
    /// runtime.  Its progress is reported by the returned [`Download`], which must be polled for
    /// the download to make progress.  Dropping the `Download` cancels the task.
    pub fn download_bounded<H>(
        &self,
        prefix: &str,
        handler: H,
        options: DownloadOptions,
    ) -> Download<H>
    where
        H: ObjectHandler + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(1);
        let walk = PageWalk {
            config: self.config.clone(),
            store: self.store.clone(),
            prefix: prefix.to_owned(),
            options,
            events: events_tx,
            logger: self.logger.new(o!(
                "bucket" => self.config.bucket.clone(),
                "prefix" => prefix.to_owned()
            )),
        };
        let task = tokio::spawn(walk.run(handler));

        Download {
            events: events_rx,
            task: Some(task),
        }
    }
}

/// An event on its way to the caller.  The background task waits on `ack` until the caller has
/// taken the event.
struct Handoff {
    event: DownloadEvent,
    ack: oneshot::Sender<()>,
}

impl Handoff {
    fn accept(self) -> DownloadEvent {
        // the task may already be gone, which is fine
        let _ = self.ack.send(());
        self.event
    }
}

/// A running download.  This is a [`Stream`] of [`DownloadEvent`]s that ends after `Done` or
/// `Failure`.
///
/// The background task stops at each event until the caller takes it: nothing is fetched before
/// the first `PageCount` is received, and a page's objects are fetched only after its count has
/// been received.  So the stream must be drained.  Objects already handed to the handler before a
/// failure stay delivered; only `Done` means the download as a whole succeeded.
pub struct Download<H> {
    events: mpsc::Receiver<Handoff>,
    task: Option<JoinHandle<H>>,
}

impl<H> Download<H> {
    /// Wait for the next event, or None once the download has ended.
    pub async fn next(&mut self) -> Option<DownloadEvent> {
        self.events.recv().await.map(Handoff::accept)
    }

    /// Drive the download to its end, returning the handler on success or the download's
    /// failure.
    pub async fn finish(mut self) -> Result<H> {
        while let Some(event) = self.next().await {
            match event {
                DownloadEvent::PageCount(_) => {}
                DownloadEvent::Failure(err) => return Err(err),
                DownloadEvent::Done => break,
            }
        }
        let task = self
            .task
            .take()
            .ok_or_else(|| anyhow!("download already finished"))?;
        task.await.context("download task failed")
    }
}

impl<H> Stream for Download<H> {
    type Item = DownloadEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<DownloadEvent>> {
        self.events
            .poll_recv(cx)
            .map(|handoff| handoff.map(Handoff::accept))
    }
}

impl<H> Drop for Download<H> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The state of the background task behind a [`Download`].
struct PageWalk<S: ObjectStore> {
    config: Arc<BucketConfig>,
    store: Arc<S>,
    prefix: String,
    options: DownloadOptions,
    events: mpsc::Sender<Handoff>,
    logger: Logger,
}

/// How a walk over the listing ended, if it did not fail.
enum WalkEnd {
    Complete,
    /// The receiving end of the event stream was dropped.
    Abandoned,
}

impl<S: ObjectStore> PageWalk<S> {
    async fn run<H: ObjectHandler>(self, mut handler: H) -> H {
        match self.walk(&mut handler).await {
            Ok(WalkEnd::Complete) => {
                handler.on_complete().await;
                info!(self.logger, "download complete");
                self.publish(DownloadEvent::Done).await;
            }
            Ok(WalkEnd::Abandoned) => {
                debug!(self.logger, "event stream dropped; stopping download");
            }
            Err(err) => {
                error!(self.logger, "download failed"; "error" => format!("{:#}", err));
                self.publish(DownloadEvent::Failure(err)).await;
            }
        }
        handler
    }

    async fn walk<H: ObjectHandler>(&self, handler: &mut H) -> Result<WalkEnd> {
        let bucket = self.config.bucket.as_str();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .store
                .list_page(bucket, &self.prefix, continuation.as_deref())
                .await
                .with_context(|| format!("listing {}/{}", bucket, self.prefix))?;

            let count = self.options.page_count(page.len());
            debug!(self.logger, "listed page"; "objects" => page.len(), "selected" => count);
            if !self.publish(DownloadEvent::PageCount(count)).await {
                return Ok(WalkEnd::Abandoned);
            }

            let selected = page
                .objects
                .iter()
                .enumerate()
                .skip(self.options.start_offset)
                .take(count);
            for (index, info) in selected {
                let object = self.fetch_object(info, index).await?;
                debug!(self.logger, "object downloaded";
                       "key" => info.key.as_str(), "position_id" => index);
                handler.handle_object(object).await;
            }

            match page.next {
                Some(next) => continuation = Some(next),
                None => return Ok(WalkEnd::Complete),
            }
        }
    }

    /// Fetch a single object into a fresh buffer.
    async fn fetch_object(&self, info: &ObjectInfo, position_id: usize) -> Result<RemoteObject> {
        let bucket = self.config.bucket.as_str();
        let data = RandomAccessBuffer::new();
        self.store
            .fetch(bucket, &info.key, &data)
            .await
            .with_context(|| format!("fetching {}/{}", bucket, info.key))?;
        Ok(RemoteObject::new(info.clone(), position_id, data))
    }

    /// Hand an event to the caller and wait until they have taken it.  Returns false if the
    /// receiving end is gone.
    async fn publish(&self, event: DownloadEvent) -> bool {
        let (ack, taken) = oneshot::channel();
        match self.events.send(Handoff { event, ack }).await {
            Ok(()) => taken.await.is_ok(),
            Err(mpsc::error::SendError(Handoff {
                event: DownloadEvent::Failure(err),
                ..
            })) => {
                // the error! line in `run` is the record of this failure
                debug!(self.logger, "failure not delivered"; "error" => format!("{:#}", err));
                false
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::{EventLog, RecordingHandler};
    use futures_util::stream::StreamExt;
    use objstream::logging::test_logger;
    use objstream::{Credentials, MemoryStore};

    fn config() -> BucketConfig {
        BucketConfig::new("bkt", "local", Credentials::new("id", "secret"))
    }

    /// A store holding `count` objects named data/0, data/1, .. with contents "object 0", ..
    fn store(page_size: usize, count: usize) -> Arc<MemoryStore> {
        let store = MemoryStore::new(page_size).with_part_size(3);
        for i in 0..count {
            store
                .insert("bkt", format!("data/{}", i), format!("object {}", i))
                .unwrap();
        }
        Arc::new(store)
    }

    fn downloader(store: &Arc<MemoryStore>) -> Downloader<Arc<MemoryStore>> {
        Downloader::new(config(), store.clone()).logger(test_logger())
    }

    async fn events<H>(download: Download<H>) -> Vec<String> {
        download
            .map(|event| match event {
                DownloadEvent::PageCount(n) => format!("count {}", n),
                DownloadEvent::Failure(err) => format!("failure {:#}", err),
                DownloadEvent::Done => "done".to_owned(),
            })
            .collect()
            .await
    }

    #[test]
    fn page_count_bounds() {
        let opts = |max_count, start_offset| DownloadOptions {
            max_count,
            start_offset,
        };
        assert_eq!(opts(0, 0).page_count(5), 5);
        assert_eq!(opts(3, 1).page_count(5), 3);
        assert_eq!(opts(10, 1).page_count(5), 4);
        assert_eq!(opts(0, 2).page_count(5), 3);
        assert_eq!(opts(0, 7).page_count(5), 0);
        assert_eq!(opts(2, 7).page_count(5), 0);
        assert_eq!(opts(4, 0).page_count(0), 0);
    }

    #[tokio::test]
    async fn bounded_single_page() {
        let store = store(10, 5);
        let log = EventLog::default();
        let download = downloader(&store).download_bounded(
            "data/",
            RecordingHandler::new(log.clone()),
            DownloadOptions {
                max_count: 3,
                start_offset: 1,
            },
        );

        assert_eq!(events(download).await, vec!["count 3", "done"]);
        log.assert(vec![
            "object 1 data/1 object 1".to_owned(),
            "object 2 data/2 object 2".to_owned(),
            "object 3 data/3 object 3".to_owned(),
            "complete".to_owned(),
        ]);
        assert_eq!(store.fetch_count(), 3);
    }

    #[tokio::test]
    async fn fetch_failure_stops_download() {
        let store = store(10, 5);
        store.fail_fetch("data/2").unwrap();
        let log = EventLog::default();
        let download = downloader(&store).download("data/", RecordingHandler::new(log.clone()));

        let got = events(download).await;
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], "count 5");
        assert!(got[1].starts_with("failure fetching bkt/data/2"));

        log.assert(vec![
            "object 0 data/0 object 0".to_owned(),
            "object 1 data/1 object 1".to_owned(),
        ]);
        assert_eq!(store.fetch_count(), 3);
    }

    #[tokio::test]
    async fn fetch_failure_abandons_later_pages() {
        let store = store(2, 6);
        store.fail_fetch("data/1").unwrap();
        let log = EventLog::default();
        let download = downloader(&store).download("data/", RecordingHandler::new(log.clone()));

        let got = events(download).await;
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], "count 2");
        assert!(got[1].starts_with("failure"));
        log.assert(vec!["object 0 data/0 object 0".to_owned()]);
    }

    #[tokio::test]
    async fn count_published_before_first_fetch() {
        let store = store(10, 3);
        store.fail_fetch("data/0").unwrap();
        let log = EventLog::default();
        let download = downloader(&store).download("data/", RecordingHandler::new(log.clone()));

        let got = events(download).await;
        assert_eq!(got[0], "count 3");
        assert!(got[1].starts_with("failure"));
        log.assert(vec![]);
    }

    #[tokio::test]
    async fn multiple_pages() {
        let store = store(2, 5);
        let log = EventLog::default();
        let download = downloader(&store).download("data/", RecordingHandler::new(log.clone()));

        assert_eq!(
            events(download).await,
            vec!["count 2", "count 2", "count 1", "done"]
        );
        // position ids restart with each page
        log.assert(vec![
            "object 0 data/0 object 0".to_owned(),
            "object 1 data/1 object 1".to_owned(),
            "object 0 data/2 object 2".to_owned(),
            "object 1 data/3 object 3".to_owned(),
            "object 0 data/4 object 4".to_owned(),
            "complete".to_owned(),
        ]);
    }

    #[tokio::test]
    async fn unbounded_count_is_per_page() {
        let store = store(3, 7);
        let log = EventLog::default();
        let download = downloader(&store).download_bounded(
            "data/",
            RecordingHandler::new(log.clone()),
            DownloadOptions {
                max_count: 0,
                start_offset: 1,
            },
        );

        assert_eq!(
            events(download).await,
            vec!["count 2", "count 2", "count 0", "done"]
        );
        log.assert(vec![
            "object 1 data/1 object 1".to_owned(),
            "object 2 data/2 object 2".to_owned(),
            "object 1 data/4 object 4".to_owned(),
            "object 2 data/5 object 5".to_owned(),
            "complete".to_owned(),
        ]);
    }

    #[tokio::test]
    async fn offset_past_end_of_page() {
        let store = store(10, 2);
        let log = EventLog::default();
        let download = downloader(&store).download_bounded(
            "data/",
            RecordingHandler::new(log.clone()),
            DownloadOptions {
                max_count: 0,
                start_offset: 5,
            },
        );

        assert_eq!(events(download).await, vec!["count 0", "done"]);
        log.assert(vec!["complete".to_owned()]);
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn empty_listing_completes() {
        let store = store(10, 0);
        let log = EventLog::default();
        let download = downloader(&store).download("data/", RecordingHandler::new(log.clone()));

        assert_eq!(events(download).await, vec!["count 0", "done"]);
        log.assert(vec!["complete".to_owned()]);
    }

    #[tokio::test]
    async fn listing_failure() {
        let store = store(10, 3);
        store.fail_listing().unwrap();
        let log = EventLog::default();
        let download = downloader(&store).download("data/", RecordingHandler::new(log.clone()));

        let got = events(download).await;
        assert_eq!(got.len(), 1);
        assert!(got[0].starts_with("failure listing bkt/data/"));
        log.assert(vec![]);
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn finish_returns_handler() -> Result<()> {
        let store = store(2, 3);
        let log = EventLog::default();
        let handler = downloader(&store)
            .download("data/", RecordingHandler::new(log.clone()))
            .finish()
            .await?;
        assert_eq!(handler.objects, 3);
        Ok(())
    }

    #[tokio::test]
    async fn finish_returns_failure() {
        let store = store(2, 3);
        store.fail_fetch("data/2").unwrap();
        let res = downloader(&store)
            .download("data/", RecordingHandler::new(EventLog::default()))
            .finish()
            .await;
        let err = res.err().unwrap();
        assert_eq!(format!("{}", err), "fetching bkt/data/2");
    }

    #[tokio::test]
    async fn next_yields_events_in_order() {
        let store = store(10, 1);
        let mut download =
            downloader(&store).download("data/", RecordingHandler::new(EventLog::default()));
        assert!(matches!(download.next().await, Some(DownloadEvent::PageCount(1))));
        assert!(matches!(download.next().await, Some(DownloadEvent::Done)));
        assert!(download.next().await.is_none());
    }

    #[tokio::test]
    async fn nothing_fetched_until_count_is_taken() {
        let store = store(10, 3);
        let log = EventLog::default();
        let mut download =
            downloader(&store).download("data/", RecordingHandler::new(log.clone()));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(store.fetch_count(), 0);
        log.assert(vec![]);

        assert!(matches!(download.next().await, Some(DownloadEvent::PageCount(3))));
        assert!(matches!(download.next().await, Some(DownloadEvent::Done)));
        assert_eq!(store.fetch_count(), 3);
        assert_eq!(log.snapshot().last().map(String::as_str), Some("complete"));
    }

    #[tokio::test]
    async fn next_page_waits_for_caller() {
        let store = store(2, 4);
        let log = EventLog::default();
        let mut download =
            downloader(&store).download("data/", RecordingHandler::new(log.clone()));

        assert!(matches!(download.next().await, Some(DownloadEvent::PageCount(2))));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // the first page is handled, then the task waits on the second page's count
        assert_eq!(store.fetch_count(), 2);
        assert_eq!(log.snapshot().len(), 2);

        assert!(matches!(download.next().await, Some(DownloadEvent::PageCount(2))));
        assert!(matches!(download.next().await, Some(DownloadEvent::Done)));
        assert_eq!(store.fetch_count(), 4);
    }

    /// A store whose objects claim to start far beyond addressable memory.
    struct HugeOffsetStore(MemoryStore);

    #[async_trait::async_trait]
    impl ObjectStore for HugeOffsetStore {
        async fn list_page(
            &self,
            bucket: &str,
            prefix: &str,
            continuation: Option<&str>,
        ) -> Result<objstream::ListPage> {
            self.0.list_page(bucket, prefix, continuation).await
        }

        async fn fetch(&self, _bucket: &str, _key: &str, dest: &RandomAccessBuffer) -> Result<()> {
            dest.write_at(b"x", 1 << 62)?;
            Ok(())
        }

        async fn publish(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<String> {
            self.0.publish(bucket, key, data).await
        }
    }

    #[cfg(target_pointer_width = "64")]
    #[tokio::test]
    async fn buffer_error_becomes_failure() {
        let inner = MemoryStore::new(10);
        inner.insert("bkt", "data/big", "x").unwrap();
        let log = EventLog::default();
        let download = Downloader::new(config(), HugeOffsetStore(inner))
            .logger(test_logger())
            .download("data/", RecordingHandler::new(log.clone()));

        let got = events(download).await;
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], "count 1");
        assert!(got[1].starts_with("failure fetching bkt/data/big"));
        assert!(got[1].contains("could not allocate"));
        log.assert(vec![]);
    }

    #[tokio::test]
    async fn dropping_download_stops_it() {
        let store = store(1, 50);
        let log = EventLog::default();
        let mut download =
            downloader(&store).download("data/", RecordingHandler::new(log.clone()));
        assert!(matches!(download.next().await, Some(DownloadEvent::PageCount(1))));
        drop(download);

        // give an aborted task every chance to misbehave
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(store.fetch_count() < 50);
        assert!(!log.snapshot().contains(&"complete".to_owned()));
    }
}
