//! The collaborator trait through which objects are listed, fetched and published.
use crate::buffer::RandomAccessBuffer;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A single entry in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

impl ObjectInfo {
    pub fn new<S: Into<String>>(key: S, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,

    /// Token to pass to the next `list_page` call, or None if this is the last page.
    pub next: Option<String>,
}

impl ListPage {
    pub fn has_more(&self) -> bool {
        self.next.is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// An object store, as seen by the download and upload paths.  Implementations own the wire
/// protocol: authentication, signing, request retries and multi-part transfer all happen behind
/// this trait.
///
/// Only the bucket name crosses this trait.  A store is built with whatever it needs from a
/// [`BucketConfig`](crate::BucketConfig), such as its `region` and `credentials`, and those are
/// never read by the downloader or uploader.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of the objects in `bucket` whose keys start with `prefix`.  `continuation`
    /// is None for the first page and otherwise the `next` token of the previous page.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage>;

    /// Fetch the object at `key`, writing its bytes into `dest` with
    /// [`RandomAccessBuffer::write_at`].  The writes may happen in any order and concurrently.
    async fn fetch(&self, bucket: &str, key: &str, dest: &RandomAccessBuffer) -> Result<()>;

    /// Store `data` at `key`, returning the location of the new object.
    async fn publish(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<String>;
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage> {
        (**self).list_page(bucket, prefix, continuation).await
    }

    async fn fetch(&self, bucket: &str, key: &str, dest: &RandomAccessBuffer) -> Result<()> {
        (**self).fetch(bucket, key, dest).await
    }

    async fn publish(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<String> {
        (**self).publish(bucket, key, data).await
    }
}
