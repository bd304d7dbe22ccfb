use std::convert::TryFrom;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Errors from a [`RandomAccessBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// A read found no remaining data.
    EndOfData,
    /// `offset + len` does not fit in the address space.
    OffsetOverflow { offset: u64, len: usize },
    /// The allocator refused to grow the buffer to `size` bytes.  The buffer is unchanged.
    AllocationFailed { size: usize },
    /// Growing the buffer copied fewer bytes than it held.  The exclusive lock held across a
    /// grow rules this out for a correct copy; it is reported instead of truncating the data.
    ShortGrowCopy { copied: usize, expected: usize },
    /// A writer panicked while holding the buffer's lock.
    Poisoned,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::EndOfData => write!(f, "end of data"),
            BufferError::OffsetOverflow { offset, len } => {
                write!(f, "write of {} bytes at offset {} overflows", len, offset)
            }
            BufferError::AllocationFailed { size } => {
                write!(f, "could not allocate {} bytes for buffer", size)
            }
            BufferError::ShortGrowCopy { copied, expected } => write!(
                f,
                "copied {} bytes instead of the expected {} while growing buffer",
                copied, expected
            ),
            BufferError::Poisoned => write!(f, "buffer lock poisoned"),
        }
    }
}

impl std::error::Error for BufferError {}

/// The bytes written so far, and how many of them have already been read.
#[derive(Default)]
struct Region {
    bytes: Vec<u8>,
    consumed: usize,
}

impl Region {
    /// Zero-extend the region to `required` bytes, keeping everything already written.
    fn grow(&mut self, required: usize) -> Result<(), BufferError> {
        self.grow_with(required, copy_prefix)
    }

    fn grow_with(
        &mut self,
        required: usize,
        copy: fn(&mut [u8], &[u8]) -> usize,
    ) -> Result<(), BufferError> {
        if self.bytes.capacity() >= required {
            // no reallocation, so nothing can be lost
            self.bytes.resize(required, 0);
            return Ok(());
        }

        // offsets come from the remote side, so an absurd one must fail the write rather than
        // abort the process
        let mut grown = Vec::new();
        let doubled = self.bytes.capacity().saturating_mul(2);
        if required >= doubled || grown.try_reserve_exact(doubled).is_err() {
            grown
                .try_reserve_exact(required)
                .map_err(|_| BufferError::AllocationFailed { size: required })?;
        }
        grown.resize(required, 0);
        let copied = copy(&mut grown, &self.bytes);
        if copied != self.bytes.len() {
            return Err(BufferError::ShortGrowCopy {
                copied,
                expected: self.bytes.len(),
            });
        }
        self.bytes = grown;
        Ok(())
    }

    fn remaining(&self) -> &[u8] {
        &self.bytes[self.consumed..]
    }
}

/// Copy as much of `src` as fits to the front of `dst`, returning the number of bytes copied.
fn copy_prefix(dst: &mut [u8], src: &[u8]) -> usize {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}

/// A growable byte buffer filled by range-addressed writes and drained by consuming reads.
///
/// Writes may arrive in any order and from concurrent tasks, as they do when an object is
/// fetched in several parts at once.  A write past the current extent grows the buffer,
/// zero-filling any gap, without disturbing bytes other writes have already placed.  Where writes
/// overlap, the last one wins.
///
/// Once all writes are done the buffer is read front-to-back exactly once with
/// [`read_next`](RandomAccessBuffer::read_next).  Read bytes are gone; offsets given to
/// `write_at` are always relative to the start of the object, not to the read position.
///
/// The backing store sits behind a readers-writer lock.  Size queries share it, while writes,
/// and in particular the grow-and-copy step, hold it exclusively, so a grow can never race a
/// write or a read.  Reading while writes are still in flight is not meaningful.
#[derive(Default)]
pub struct RandomAccessBuffer {
    region: RwLock<Region>,
}

impl RandomAccessBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `capacity` bytes before it has to reallocate.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            region: RwLock::new(Region {
                bytes: Vec::with_capacity(capacity),
                consumed: 0,
            }),
        }
    }

    /// Write `payload` at `offset`, growing the buffer if necessary.  Returns the number of bytes
    /// written, which is always `payload.len()`.
    pub fn write_at(&self, payload: &[u8], offset: u64) -> Result<usize, BufferError> {
        let overflow = || BufferError::OffsetOverflow {
            offset,
            len: payload.len(),
        };
        let start = usize::try_from(offset).map_err(|_| overflow())?;
        let end = start.checked_add(payload.len()).ok_or_else(overflow)?;

        let mut region = self.exclusive()?;
        if region.bytes.len() < end {
            region.grow(end)?;
        }
        region.bytes[start..end].copy_from_slice(payload);
        Ok(payload.len())
    }

    /// Copy up to `buf.len()` bytes from the front of the remaining data into `buf`, and discard
    /// them from the buffer.  An empty `buf` always reads zero bytes; otherwise a buffer with no
    /// data left returns [`BufferError::EndOfData`].
    pub fn read_next(&self, buf: &mut [u8]) -> Result<usize, BufferError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut region = self.exclusive()?;
        let n = copy_prefix(buf, region.remaining());
        if n == 0 {
            return Err(BufferError::EndOfData);
        }
        region.consumed += n;
        Ok(n)
    }

    /// The number of bytes not yet read.
    pub fn len(&self) -> usize {
        self.shared()
            .map(|region| region.bytes.len() - region.consumed)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The highest offset written so far, including any bytes already read.
    pub fn extent(&self) -> usize {
        self.shared().map(|region| region.bytes.len()).unwrap_or(0)
    }

    /// Consume the buffer, returning all of its unread bytes.
    pub fn into_vec(self) -> Result<Vec<u8>, BufferError> {
        let mut region = self.region.into_inner().map_err(|_| BufferError::Poisoned)?;
        region.bytes.drain(..region.consumed);
        Ok(region.bytes)
    }

    fn shared(&self) -> Result<RwLockReadGuard<'_, Region>, BufferError> {
        self.region.read().map_err(|_| BufferError::Poisoned)
    }

    fn exclusive(&self) -> Result<RwLockWriteGuard<'_, Region>, BufferError> {
        self.region.write().map_err(|_| BufferError::Poisoned)
    }
}

impl fmt::Debug for RandomAccessBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomAccessBuffer")
            .field("extent", &self.extent())
            .field("remaining", &self.len())
            .finish()
    }
}
