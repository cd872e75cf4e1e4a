//! A generic size-classed buffer pool (§4.11), grounded in the "rent/return" idiom the teacher
//! uses for its `Socket` read/write scratch buffers, generalized into a reusable type.
//!
//! `Pool::rent` hands out a [`PooledBuffer`] RAII guard from the smallest size-class bucket that
//! fits the requested size, allocating fresh when the bucket is empty. Dropping the guard
//! returns the buffer to its bucket unless the bucket is already at capacity, in which case the
//! buffer is dropped instead of returned — this is what keeps `count <= capacity` under any
//! contention pattern (§8 invariant 8).

use std::sync::{Arc, Mutex};

struct Bucket {
    size: usize,
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

/// A bounded cache of reusable `Vec<u8>` buffers, organized into size-class buckets.
pub struct Pool {
    buckets: Vec<Bucket>,
}

impl Pool {
    /// `buckets` is `(size, capacity)` pairs; the caller (typically [`crate::config::PoolConfig`])
    /// is expected to pass them smallest-first, though `rent` does not depend on the order.
    pub fn new(buckets: impl IntoIterator<Item = (usize, usize)>) -> Arc<Self> {
        Arc::new(Self {
            buckets: buckets
                .into_iter()
                .map(|(size, capacity)| Bucket {
                    size,
                    capacity,
                    free: Mutex::new(Vec::with_capacity(capacity)),
                })
                .collect(),
        })
    }

    /// Picks the smallest bucket whose size is `>= size_hint`; falls back to a fresh,
    /// unpooled allocation if no bucket is large enough.
    fn bucket_for(&self, size_hint: usize) -> Option<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| b.size >= size_hint)
            .min_by_key(|(_, b)| b.size)
            .map(|(i, _)| i)
    }

    /// Rents a buffer of at least `size_hint` bytes, with unspecified (possibly non-zero)
    /// contents.
    pub fn rent(self: &Arc<Self>, size_hint: usize) -> PooledBuffer {
        self.rent_inner(size_hint, false)
    }

    /// Rents a buffer of at least `size_hint` bytes, guaranteed to be zero-filled. Used for
    /// HPACK literal buffers carrying sensitive header values (`authorization`, `cookie`).
    pub fn rent_zeroed(self: &Arc<Self>, size_hint: usize) -> PooledBuffer {
        self.rent_inner(size_hint, true)
    }

    fn rent_inner(self: &Arc<Self>, size_hint: usize, zero: bool) -> PooledBuffer {
        let bucket_index = self.bucket_for(size_hint);

        let mut buf = if let Some(index) = bucket_index {
            let mut free = self.buckets[index].free.lock().expect("pool lock");
            free.pop()
                .unwrap_or_else(|| Vec::with_capacity(self.buckets[index].size))
        } else {
            Vec::with_capacity(size_hint)
        };

        buf.clear();

        PooledBuffer {
            pool: self.clone(),
            bucket_index,
            buf: Some(buf),
            zero_on_return: zero,
        }
    }
}

/// An RAII handle for a rented buffer. Returns its backing `Vec<u8>` to the pool's size-class
/// bucket on drop, zeroing it first if it was rented via [`Pool::rent_zeroed`] — unless the
/// bucket is already at capacity, in which case the buffer is simply dropped.
pub struct PooledBuffer {
    pool: Arc<Pool>,
    bucket_index: Option<usize>,
    buf: Option<Vec<u8>>,
    zero_on_return: bool,
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;
    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buf taken only on drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buf taken only on drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(index) = self.bucket_index else {
            return;
        };
        let Some(mut buf) = self.buf.take() else {
            return;
        };

        if self.zero_on_return {
            buf.iter_mut().for_each(|b| *b = 0);
        }

        let bucket = &self.pool.buckets[index];
        let mut free = bucket.free.lock().expect("pool lock");
        if free.len() < bucket.capacity {
            free.push(buf);
        }
    }
}
