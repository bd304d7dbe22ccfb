/*!
# objstream

Shared building blocks for bulk transfers to and from an object store.

This crate holds the pieces that both the download and upload crates need:

* [`BucketConfig`] and [`Credentials`] identify the bucket and how to access it;
* [`RandomAccessBuffer`] accumulates an object's bytes from out-of-order, range-addressed writes
  and then hands them out again as a single-pass stream;
* [`ObjectStore`] is the collaborator that lists, fetches and publishes objects.  Any transport
  can implement it; [`MemoryStore`] is an in-process implementation suitable for local use and
  for tests.

Most users will want the `objstream-download` and `objstream-upload` crates, which build on
these types.

## Configuration

A [`BucketConfig`] can be built directly, loaded from the environment with
[`BucketConfig::from_env`], or deserialized from JSON:

```
# use objstream::BucketConfig;
# fn main() -> anyhow::Result<()> {
let config = BucketConfig::from_json(r#"{
    "bucket": "telemetry",
    "region": "eu-west-1",
    "credentials": {"access_key_id": "AKID", "secret_access_key": "s3cr3t"}
}"#)?;
assert_eq!(config.bucket, "telemetry");
# Ok(())
# }
```
 */
mod buffer;
mod config;
pub mod logging;
mod memory;
mod store;

pub use buffer::{BufferError, RandomAccessBuffer};
pub use config::{BucketConfig, Credentials};
pub use memory::MemoryStore;
pub use store::{ListPage, ObjectInfo, ObjectStore};
