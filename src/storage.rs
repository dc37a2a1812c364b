//! Bounded idle storage for one instance type

use crate::lifecycle::Pooled;

use crossbeam::queue::ArrayQueue;

/// FIFO queue of idle instances with a fixed capacity.
///
/// The oldest idle instance is reused first. A capacity of zero keeps nothing:
/// every store is refused and the caller destroys the instance.
pub struct PoolStorage<T> {
    idle: Option<ArrayQueue<Pooled<T>>>,
}

impl<T> PoolStorage<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            idle: (max_size > 0).then(|| ArrayQueue::new(max_size)),
        }
    }

    /// Take the oldest idle instance
    pub fn try_take(&self) -> Option<Pooled<T>> {
        self.idle.as_ref().and_then(ArrayQueue::pop)
    }

    /// Park an idle instance, handing it back if the queue is full
    pub fn store(&self, instance: Pooled<T>) -> Result<(), Pooled<T>> {
        match &self.idle {
            Some(queue) => queue.push(instance),
            None => Err(instance),
        }
    }

    pub fn is_full(&self) -> bool {
        self.idle.as_ref().is_none_or(ArrayQueue::is_full)
    }

    /// Remove every idle instance, oldest first
    pub fn clear(&self) -> Vec<Pooled<T>> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(instance) = self.try_take() {
            drained.push(instance);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.idle.as_ref().map_or(0, ArrayQueue::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.idle.as_ref().map_or(0, ArrayQueue::capacity)
    }
}
