use crate::buffer::RandomAccessBuffer;
use crate::store::{ListPage, ObjectInfo, ObjectStore};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// An in-process [`ObjectStore`].
///
/// Listings are returned in key order, `page_size` objects at a time.  Fetches are split into
/// `part_size` parts which are written into the destination concurrently and in shuffled order,
/// the way a multi-part download would deliver them.  Failures can be injected for individual
/// keys or for listing as a whole.
pub struct MemoryStore {
    page_size: usize,
    part_size: usize,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    buckets: BTreeMap<String, BTreeMap<String, Arc<Vec<u8>>>>,
    failing_keys: HashSet<String>,
    listing_fails: bool,
    fetches: usize,
}

impl MemoryStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            part_size: DEFAULT_PART_SIZE,
            state: Mutex::new(State::default()),
        }
    }

    /// Set the size of the parts each fetch is split into.
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    pub fn insert<B, K, D>(&self, bucket: B, key: K, data: D) -> Result<()>
    where
        B: Into<String>,
        K: Into<String>,
        D: Into<Vec<u8>>,
    {
        self.lock()?
            .buckets
            .entry(bucket.into())
            .or_default()
            .insert(key.into(), Arc::new(data.into()));
        Ok(())
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let state = self.lock().ok()?;
        state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|data| data.to_vec())
    }

    /// Make every future fetch of `key` fail.
    pub fn fail_fetch<K: Into<String>>(&self, key: K) -> Result<()> {
        self.lock()?.failing_keys.insert(key.into());
        Ok(())
    }

    /// Make every future listing fail.
    pub fn fail_listing(&self) -> Result<()> {
        self.lock()?.listing_fails = true;
        Ok(())
    }

    /// The number of fetches attempted so far, including failed ones.
    pub fn fetch_count(&self) -> usize {
        self.lock().map(|state| state.fetches).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage> {
        let state = self.lock()?;
        if state.listing_fails {
            bail!("injected listing failure for {}/{}", bucket, prefix);
        }
        let objects = match state.buckets.get(bucket) {
            Some(objects) => objects,
            None => return Ok(ListPage::default()),
        };

        let lower = match continuation {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        let mut matching = objects
            .range::<str, _>((lower, Bound::Unbounded))
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, data)| ObjectInfo::new(key.clone(), data.len() as u64));

        let page: Vec<ObjectInfo> = matching.by_ref().take(self.page_size).collect();
        let next = match matching.next() {
            Some(_) => page.last().map(|info| info.key.clone()),
            None => None,
        };
        Ok(ListPage {
            objects: page,
            next,
        })
    }

    async fn fetch(&self, bucket: &str, key: &str, dest: &RandomAccessBuffer) -> Result<()> {
        let data = {
            let mut state = self.lock()?;
            state.fetches += 1;
            if state.failing_keys.contains(key) {
                bail!("injected fetch failure for {}/{}", bucket, key);
            }
            state
                .buckets
                .get(bucket)
                .and_then(|objects| objects.get(key))
                .cloned()
                .ok_or_else(|| anyhow!("no such object {}/{}", bucket, key))?
        };

        let mut parts: Vec<(usize, usize)> = (0..data.len())
            .step_by(self.part_size)
            .map(|start| (start, (start + self.part_size).min(data.len())))
            .collect();
        fastrand::shuffle(&mut parts);

        let data = &data;
        let writes = parts.into_iter().map(|(start, end)| async move {
            tokio::task::yield_now().await;
            dest.write_at(&data[start..end], start as u64)
        });
        for res in join_all(writes).await {
            res.with_context(|| format!("writing {}/{}", bucket, key))?;
        }
        Ok(())
    }

    async fn publish(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<String> {
        self.insert(bucket, key, data)?;
        Ok(format!("mem://{}/{}", bucket, key))
    }
}
