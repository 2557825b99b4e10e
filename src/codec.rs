//! Pooled payload codec.
//!
//! Application payloads are protobuf messages (`prost`). Encoding goes
//! through a scratch buffer borrowed from a shared [`BufferPool`] so a busy
//! dispatch loop does not allocate a fresh `Vec` per call. Buffers are
//! cleared before they go back to the pool.

use bytes::Bytes;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use prost::Message;

use crate::error::Result;

/// Buffers larger than this are dropped instead of pooled.
const MAX_POOLED_CAPACITY: usize = 64 * 1024;

/// Upper bound on idle buffers kept by a pool.
const MAX_IDLE_BUFFERS: usize = 256;

lazy_static! {
    static ref SHARED_POOL: BufferPool = BufferPool::new(MAX_IDLE_BUFFERS);
}

/// A pool of reusable scratch buffers.
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
}

impl BufferPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// The process-wide pool used by [`encode`].
    pub fn shared() -> &'static BufferPool {
        &SHARED_POOL
    }

    /// Borrow a cleared buffer.
    pub fn get(&self) -> PooledBuffer<'_> {
        let buf = self.idle.lock().pop().unwrap_or_default();
        PooledBuffer {
            pool: self,
            buf: Some(buf),
        }
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }

    /// Serialize `message` through a pooled scratch buffer.
    pub fn encode<M: Message>(&self, message: &M) -> Result<Bytes> {
        let mut scratch = self.get();
        message.encode(scratch.as_mut_vec())?;
        Ok(Bytes::copy_from_slice(scratch.as_ref()))
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(MAX_IDLE_BUFFERS)
    }
}

/// A buffer on loan from a [`BufferPool`]. Returned on drop.
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<Vec<u8>>,
}

impl AsRef<[u8]> for PooledBuffer<'_> {
    fn as_ref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl PooledBuffer<'_> {
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        self.buf.get_or_insert_with(Vec::new)
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}

/// Serialize a message using the shared pool.
pub fn encode<M: Message>(message: &M) -> Result<Bytes> {
    BufferPool::shared().encode(message)
}

/// Deserialize bytes into a new message.
pub fn decode<M: Message + Default>(bytes: &[u8]) -> Result<M> {
    Ok(M::decode(bytes)?)
}

/// Deserialize bytes into a caller-owned message, replacing its contents.
///
/// prost decodes straight from the input slice, so no scratch buffer is
/// needed on this side.
pub fn decode_into<M: Message>(bytes: &[u8], message: &mut M) -> Result<()> {
    message.clear();
    message.merge(bytes)?;
    Ok(())
}
