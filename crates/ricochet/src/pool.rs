//! Byte buffer recycling for response-body reads.
//!
//! [`BufferPool`] hands out buffers that are *at least* the requested size and
//! takes them back afterwards, keeping the total it retains under a byte
//! limit. [`PooledOutputStream`] is a growable sink that sources every backing
//! buffer from a pool and gives it back when dropped.

use std::collections::VecDeque;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

/// Initial capacity floor of a [`PooledOutputStream`].
pub const DEFAULT_STREAM_SIZE: usize = 256;

/// A size-bounded pool of reusable byte buffers.
///
/// Allocation is first-fit: [`get_buf`](BufferPool::get_buf) returns the first
/// pooled buffer whose length is at least the requested minimum, so callers
/// must cope with buffers longer than they asked for. When the pool grows past
/// its limit the buffers returned longest ago are dropped first.
///
/// The pool claims no ownership over what it hands out. A buffer may be kept
/// forever, and a buffer allocated elsewhere may be donated with
/// [`return_buf`](BufferPool::return_buf).
#[derive(Debug)]
pub struct BufferPool {
    inner:      Mutex<PoolInner>,
    size_limit: usize,
}

#[derive(Debug, Default)]
struct PoolInner {
    /// Sorted by ascending length; equal lengths keep return order.
    by_size:      Vec<PooledBuf>,
    /// Ids, oldest return first.
    by_last_use:  VecDeque<u64>,
    current_size: usize,
    next_id:      u64,
}

#[derive(Debug)]
struct PooledBuf {
    id:  u64,
    buf: Vec<u8>,
}

impl BufferPool {
    pub fn new(size_limit: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            size_limit,
        }
    }

    pub fn size_limit(&self) -> usize { self.size_limit }

    /// Total length of the buffers currently pooled.
    pub fn current_size(&self) -> usize { self.lock().current_size }

    /// Number of buffers currently pooled.
    pub fn len(&self) -> usize { self.lock().by_size.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Take a buffer of at least `min_len` bytes, allocating one on a miss.
    ///
    /// A recycled buffer keeps whatever bytes it held before.
    pub fn get_buf(&self, min_len: usize) -> Vec<u8> {
        let mut inner = self.lock();

        match inner.by_size.iter().position(|pooled| pooled.buf.len() >= min_len) {
            Some(index) => {
                let pooled = inner.by_size.remove(index);
                inner.forget(pooled.id);
                inner.current_size -= pooled.buf.len();
                pooled.buf
            }
            None => vec![0; min_len],
        }
    }

    /// Give a buffer back. Buffers longer than the size limit are dropped.
    pub fn return_buf(&self, buf: Vec<u8>) {
        let len = buf.len();
        if len > self.size_limit {
            return;
        }

        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        inner.by_last_use.push_back(id);
        let pos = inner.by_size.partition_point(|pooled| pooled.buf.len() <= len);
        inner.by_size.insert(pos, PooledBuf { id, buf });
        inner.current_size += len;

        inner.trim(self.size_limit);
    }

    /// Drop the oldest returned buffers until the pool is within its limit.
    pub fn trim(&self) { self.lock().trim(self.size_limit); }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PoolInner {
    fn trim(&mut self, size_limit: usize) {
        while self.current_size > size_limit {
            let Some(id) = self.by_last_use.pop_front() else {
                break;
            };
            if let Some(index) = self.by_size.iter().position(|pooled| pooled.id == id) {
                let pooled = self.by_size.remove(index);
                self.current_size -= pooled.buf.len();
            }
        }
    }

    fn forget(&mut self, id: u64) {
        if let Some(index) = self.by_last_use.iter().position(|&used| used == id) {
            self.by_last_use.remove(index);
        }
    }
}

/// An append-only byte sink backed by pooled buffers.
///
/// The backing buffer goes back to the pool when the stream is closed or
/// dropped, including on early returns and unwinding.
///
/// # Examples
///
/// ```
/// use ricochet::{BufferPool, PooledOutputStream};
///
/// let pool = BufferPool::new(4096);
/// let mut out = PooledOutputStream::new(&pool);
/// out.write(b"hello ");
/// out.write(b"world");
/// assert_eq!(out.to_bytes(), "hello world");
/// out.close();
/// assert_eq!(pool.len(), 1);
/// ```
#[derive(Debug)]
pub struct PooledOutputStream<'a> {
    pool:  &'a BufferPool,
    buf:   Vec<u8>,
    count: usize,
}

impl<'a> PooledOutputStream<'a> {
    pub fn new(pool: &'a BufferPool) -> Self { Self::with_capacity(pool, DEFAULT_STREAM_SIZE) }

    /// `size` is a hint; it is raised to [`DEFAULT_STREAM_SIZE`] if smaller.
    pub fn with_capacity(pool: &'a BufferPool, size: usize) -> Self {
        Self {
            pool,
            buf: pool.get_buf(size.max(DEFAULT_STREAM_SIZE)),
            count: 0,
        }
    }

    /// Append `data`, growing the backing buffer through the pool if needed.
    pub fn write(&mut self, data: &[u8]) {
        self.expand(data.len());
        self.buf[self.count..self.count + data.len()].copy_from_slice(data);
        self.count += data.len();
    }

    pub fn len(&self) -> usize { self.count }

    pub fn is_empty(&self) -> bool { self.count == 0 }

    /// Length of the current backing buffer.
    pub fn capacity(&self) -> usize { self.buf.len() }

    pub fn as_slice(&self) -> &[u8] { &self.buf[..self.count] }

    /// Copy the written bytes out.
    pub fn to_bytes(&self) -> Bytes { Bytes::copy_from_slice(self.as_slice()) }

    /// Return the backing buffer to the pool.
    pub fn close(self) {}

    fn expand(&mut self, additional: usize) {
        let required = self.count + additional;
        if required <= self.buf.len() {
            return;
        }

        let mut grown = self.pool.get_buf(required.saturating_mul(2));
        grown[..self.count].copy_from_slice(&self.buf[..self.count]);
        let old = std::mem::replace(&mut self.buf, grown);
        self.pool.return_buf(old);
    }
}

impl io::Write for PooledOutputStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        PooledOutputStream::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

impl Drop for PooledOutputStream<'_> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        if buf.capacity() > 0 {
            self.pool.return_buf(buf);
        }
    }
}
