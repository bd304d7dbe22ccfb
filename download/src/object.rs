use objstream::{BufferError, ObjectInfo, RandomAccessBuffer};
use std::fmt;
use std::io::{self, Read};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// A downloaded object, as handed to an [`ObjectHandler`](crate::ObjectHandler).
///
/// The object's bytes can be read exactly once, front to back, with
/// [`read_next`](RemoteObject::read_next) or through the [`Read`] and [`AsyncRead`]
/// implementations.  The latter follow the usual convention of returning zero bytes at the end
/// of the data.
pub struct RemoteObject {
    info: ObjectInfo,
    position_id: usize,
    data: RandomAccessBuffer,
}

impl RemoteObject {
    pub fn new(info: ObjectInfo, position_id: usize, data: RandomAccessBuffer) -> Self {
        Self {
            info,
            position_id,
            data,
        }
    }

    pub fn key(&self) -> &str {
        &self.info.key
    }

    /// The size of the object according to the listing it came from.
    pub fn size(&self) -> u64 {
        self.info.size
    }

    /// This object's index within its listing page.
    pub fn position_id(&self) -> usize {
        self.position_id
    }

    /// The number of bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    /// Read the next bytes of the object; see [`RandomAccessBuffer::read_next`].
    pub fn read_next(&mut self, buf: &mut [u8]) -> Result<usize, BufferError> {
        self.data.read_next(buf)
    }

    /// Consume the object, returning its unread bytes.
    pub fn into_vec(self) -> Result<Vec<u8>, BufferError> {
        self.data.into_vec()
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("key", &self.info.key)
            .field("size", &self.info.size)
            .field("position_id", &self.position_id)
            .field("remaining", &self.data.len())
            .finish()
    }
}

impl Read for RemoteObject {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.read_next(buf) {
            Ok(n) => Ok(n),
            Err(BufferError::EndOfData) => Ok(0),
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}

impl AsyncRead for RemoteObject {
    // the data is already in memory, so reads never pend
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Read::read(this, buf.initialize_unfilled()) {
            Ok(n) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}
