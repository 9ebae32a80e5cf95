use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Length-keyed pool of `f64` scratch buffers.
///
/// Cloning is cheap and every clone shares the same storage. Descent runs
/// acquire their gradient and delta scratch here instead of allocating per
/// run; buffers come back through the [`PooledBuffer`] guard's `Drop`, so
/// every exit path releases: convergence, exhaustion, cancellation, or an
/// unwind out of a faulting objective.
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    idle: Arc<Mutex<HashMap<usize, Vec<Vec<f64>>>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a zeroed buffer of exactly `len` elements, reusing a
    /// previously released one when available.
    pub fn acquire(&self, len: usize) -> PooledBuffer {
        let recycled = self.idle.lock().get_mut(&len).and_then(Vec::pop);
        let buffer = match recycled {
            Some(mut buffer) => {
                buffer.fill(0.0); // recycled buffers keep stale values
                buffer
            }
            None => vec![0.0; len],
        };
        PooledBuffer {
            buffer,
            pool: self.clone(),
        }
    }

    /// Number of idle buffers currently held for `len`.
    pub fn idle_count(&self, len: usize) -> usize {
        self.idle.lock().get(&len).map_or(0, Vec::len)
    }

    fn release(&self, buffer: Vec<f64>) {
        self.idle.lock().entry(buffer.len()).or_default().push(buffer);
    }
}

/// Scratch buffer borrowed from a [`BufferPool`]; returned on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Vec<f64>,
    pool: BufferPool,
}

impl Deref for PooledBuffer {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [f64] {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}
