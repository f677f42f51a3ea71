//! Blocking queue with one lock for the head and one for the tail, producers only contend with
//! producers and consumers only with consumers.

use crate::concurrent_queue::ConcurrentQueue;
use crate::spin_lock::SpinLock;
use crate::util;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

type NodePtr<T> = *mut Node<T>;

struct Node<T> {
    value: Option<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn new(value: Option<T>) -> NodePtr<T> {
        Box::into_raw(Box::new(Node {
            value,
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// Two-lock unbounded MPMC queue.
///
/// # Examples
///
/// ```
/// use rs_msqueue::two_lock_queue::TwoLockQueue;
///
/// let queue = TwoLockQueue::new();
/// queue.enqueue("a");
/// assert_eq!(queue.dequeue(), Some("a"));
/// assert_eq!(queue.dequeue(), None);
/// ```
pub struct TwoLockQueue<T> {
    head: util::WrappedAlign64Type<SpinLock<NodePtr<T>>>,
    tail: util::WrappedAlign64Type<SpinLock<NodePtr<T>>>,
}

unsafe impl<T: Send> Send for TwoLockQueue<T> {}

unsafe impl<T: Send> Sync for TwoLockQueue<T> {}

impl<T> Default for TwoLockQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TwoLockQueue<T> {
    /// Create an empty queue holding only the sentinel node.
    pub fn new() -> TwoLockQueue<T> {
        let sentinel = Node::new(None);
        TwoLockQueue {
            head: util::WrappedAlign64Type(SpinLock::new(sentinel)),
            tail: util::WrappedAlign64Type(SpinLock::new(sentinel)),
        }
    }

    /// Append `v` at the tail. The node is allocated before taking the tail lock.
    pub fn enqueue(&self, v: T) {
        let node = Node::new(Some(v));
        let mut tail = self.tail.lock();
        unsafe {
            (**tail).next.store(node, Ordering::Release);
        }
        *tail = node;
    }

    /// Remove the value at the head, `None` if the queue is empty. The old sentinel is freed
    /// after the head lock is released.
    pub fn dequeue(&self) -> Option<T> {
        let mut head = self.head.lock();
        let old = *head;
        let next = unsafe { (*old).next.load(Ordering::Acquire) };
        if next.is_null() {
            return None;
        }
        let value = unsafe { (*next).value.take() };
        *head = next;
        drop(head);
        // producers never reach a node behind the tail, consumers are past it
        unsafe { drop(Box::from_raw(old)) };
        debug_assert!(value.is_some());
        value
    }

    /// Return true if no value was linked after the sentinel at the time of the call.
    pub fn is_empty(&self) -> bool {
        let head = self.head.lock();
        unsafe { (**head).next.load(Ordering::Acquire).is_null() }
    }

    unsafe fn destroy(&mut self) {
        let mut iter = *self.head.get_mut();
        while !iter.is_null() {
            iter = *Box::from_raw(iter).next.get_mut();
        }
        *self.head.get_mut() = ptr::null_mut();
        *self.tail.get_mut() = ptr::null_mut();
    }
}

impl<T: Send> ConcurrentQueue<T> for TwoLockQueue<T> {
    fn enqueue(&self, value: T) {
        TwoLockQueue::enqueue(self, value)
    }

    fn dequeue(&self) -> Option<T> {
        TwoLockQueue::dequeue(self)
    }

    fn is_empty(&self) -> bool {
        TwoLockQueue::is_empty(self)
    }
}

impl<T> Drop for TwoLockQueue<T> {
    fn drop(&mut self) {
        unsafe {
            self.destroy();
        }
    }
}

#[cfg(test)]
mod test {
    use super::TwoLockQueue;
    use std::cell::RefCell;

    struct Node<'a> {
        cnt: &'a RefCell<i32>,
        v: i32,
    }

    impl<'a> Drop for Node<'a> {
        fn drop(&mut self) {
            *self.cnt.borrow_mut() += 1;
        }
    }

    #[test]
    fn test_base() {
        let queue = TwoLockQueue::new();
        assert!(queue.dequeue().is_none());
        assert!(queue.is_empty());
        for i in 1..=3 {
            queue.enqueue(i);
        }
        assert!(!queue.is_empty());
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_locks_are_independent() {
        let queue = TwoLockQueue::new();
        queue.enqueue(1);
        let _tail = queue.tail.lock();
        // a consumer is not blocked by a producer holding the tail lock
        assert_eq!(queue.dequeue(), Some(1));
        assert!(queue.head.try_lock().is_some());
    }

    #[test]
    fn test_memory_leak() {
        let cnt = RefCell::new(0);
        let queue = TwoLockQueue::new();
        for v in 0..10 {
            queue.enqueue(Node { cnt: &cnt, v });
        }
        assert_eq!(queue.dequeue().unwrap().v, 0);
        assert_eq!(*cnt.borrow(), 1);
        drop(queue);
        assert_eq!(*cnt.borrow(), 10);
    }
}
