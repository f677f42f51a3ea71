//! Contract shared by `TwoLockQueue` and `LockFreeQueue`.

/// Unbounded multi-producer multi-consumer FIFO queue.
///
/// Values of one producer are dequeued in the order that producer enqueued them, every value is
/// dequeued at most once.
pub trait ConcurrentQueue<T>: Send + Sync {
    /// Append `value` at the tail. Never fails, the value is reachable before returning.
    fn enqueue(&self, value: T);

    /// Remove the value at the head, `None` if the queue was observed empty.
    fn dequeue(&self) -> Option<T>;

    /// Return true if the queue was observed empty. The answer may be stale immediately.
    fn is_empty(&self) -> bool;
}
