use crate::object::RemoteObject;
use async_trait::async_trait;

/// An ObjectHandler receives the objects produced by a download.
///
/// `handle_object` is called once for each downloaded object, in ascending `position_id` order
/// within each listing page, and the download waits for it to return before fetching the next
/// object.  The handler owns the object from then on.
///
/// `on_complete` is called exactly once, after the last object, and only if the whole download
/// succeeded.  Neither method is called again once the download has failed.
#[async_trait]
pub trait ObjectHandler: Send {
    async fn handle_object(&mut self, object: RemoteObject);

    async fn on_complete(&mut self);
}
