//! Byte buffer pooling for the handoff pipeline
//!
//! Buffers travel from the broker task to the processing task (and from
//! callers to the dispatch task) and come back here afterwards.
//! Uses crossbeam-queue for lock-free acquire/release.

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;

/// Growable byte buffer handed between pipeline tasks
///
/// Owned by exactly one task at a time; moving it into
/// [`BufferPool::release`] ends that ownership.
#[derive(Debug, Default)]
pub struct PooledBuffer {
    bytes: BytesMut,
}

impl PooledBuffer {
    /// Create an empty buffer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
        }
    }

    /// Append bytes to the buffer
    #[inline]
    pub fn write(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Content decoded as UTF-8, invalid sequences replaced
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Drop the content, keep the allocation
    #[inline]
    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

/// Advisory pool of reusable byte buffers
///
/// Never blocks and never fails: an empty pool allocates, a full pool drops
/// the returned buffer.
///
/// # Example
/// ```
/// use kafka_relay::infrastructure::pool::BufferPool;
///
/// let pool = BufferPool::new(100);
///
/// let mut buf = pool.acquire();
/// buf.write(b"payload");
///
/// // Content is cleared on release
/// pool.release(buf);
/// assert!(pool.acquire().is_empty());
/// ```
pub struct BufferPool {
    stack: ArrayQueue<PooledBuffer>,
    buffer_size: usize,
}

impl BufferPool {
    /// Create an empty pool caching at most `capacity` buffers
    ///
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self::with_buffer_size(capacity, 0)
    }

    /// Create a pool whose fresh allocations reserve `buffer_size` bytes
    pub fn with_buffer_size(capacity: usize, buffer_size: usize) -> Self {
        Self {
            stack: ArrayQueue::new(capacity.max(1)),
            buffer_size,
        }
    }

    /// Take a cached buffer, or allocate a new empty one
    #[inline]
    pub fn acquire(&self) -> PooledBuffer {
        self.stack
            .pop()
            .unwrap_or_else(|| PooledBuffer::with_capacity(self.buffer_size))
    }

    /// Clear a buffer and cache it if there is spare capacity
    #[inline]
    pub fn release(&self, mut buffer: PooledBuffer) {
        buffer.clear();
        // Full pool: let the buffer drop
        let _ = self.stack.push(buffer);
    }

    /// Number of buffers currently cached
    #[inline]
    pub fn size(&self) -> usize {
        self.stack.len()
    }

    /// Maximum number of cached buffers
    #[inline]
    pub fn capacity(&self) -> usize {
        self.stack.capacity()
    }
}
