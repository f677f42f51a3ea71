//! Non-blocking queue of Michael & Scott, nodes reclaimed through `HazardEpoch`.
//!
//! `head` always points at a sentinel node whose value has been moved out (or never existed),
//! the first value lives in `head.next`. `tail` may lag one or more nodes behind the last node,
//! every operation observing that helps to swing it forward.

use crate::concurrent_queue::ConcurrentQueue;
use crate::hazard_epoch::{
    HazardEpoch, DEFAULT_MIN_VERSION_CACHE_TIME_US, DEFAULT_THREAD_WAITING_THRESHOLD,
    MAX_THREAD_COUNT,
};
use crate::hazard_pointer::{BaseHazardNode, HazardNodeT};
use crate::util;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

type FIFONodePtr<T> = *mut FIFONode<T>;

struct FIFONode<T> {
    value: MaybeUninit<T>,
    base: BaseHazardNode,
    next: AtomicPtr<FIFONode<T>>,
}

impl<T> HazardNodeT for FIFONode<T> {
    fn get_base_hazard_node(&self) -> *mut BaseHazardNode {
        &self.base as *const _ as *mut _
    }
}

impl<T> Default for FIFONode<T> {
    fn default() -> Self {
        FIFONode {
            value: MaybeUninit::uninit(),
            base: BaseHazardNode::default(),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl<T> FIFONode<T> {
    #[inline]
    fn next(&self) -> FIFONodePtr<T> {
        self.next.load(Ordering::Acquire)
    }

    fn new(value: T) -> Self {
        FIFONode {
            value: MaybeUninit::new(value),
            base: BaseHazardNode::default(),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// Lock-free unbounded MPMC queue.
///
/// # Examples
///
/// ```
/// use rs_msqueue::lockfree_queue::LockFreeQueue;
///
/// let queue = LockFreeQueue::new();
/// queue.enqueue(1);
/// queue.enqueue(2);
/// assert_eq!(queue.dequeue(), Some(1));
/// assert_eq!(queue.dequeue(), Some(2));
/// assert_eq!(queue.dequeue(), None);
/// ```
pub struct LockFreeQueue<T> {
    hazard_epoch: HazardEpoch,
    head: util::WrappedAlign64Type<AtomicPtr<FIFONode<T>>>,
    tail: util::WrappedAlign64Type<AtomicPtr<FIFONode<T>>>,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Send> Send for LockFreeQueue<T> {}

unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockFreeQueue<T> {
    #[inline]
    fn atomic_load_head(&self) -> FIFONodePtr<T> {
        self.head.load(Ordering::Acquire)
    }

    #[inline]
    fn atomic_load_tail(&self) -> FIFONodePtr<T> {
        self.tail.load(Ordering::Acquire)
    }

    /// Create an empty queue holding only the sentinel node.
    pub fn new() -> LockFreeQueue<T> {
        Self::with_reclaim_params(
            DEFAULT_THREAD_WAITING_THRESHOLD,
            DEFAULT_MIN_VERSION_CACHE_TIME_US,
        )
    }

    /// Same as `new`, parameters are passed to `HazardEpoch::new`.
    pub fn with_reclaim_params(
        thread_waiting_threshold: i64,
        min_version_cache_time_us: i64,
    ) -> LockFreeQueue<T> {
        let head = Box::into_raw(Box::new(FIFONode::<T>::default()));
        LockFreeQueue {
            hazard_epoch: HazardEpoch::new(thread_waiting_threshold, min_version_cache_time_us),
            head: util::WrappedAlign64Type(AtomicPtr::new(head)),
            tail: util::WrappedAlign64Type(AtomicPtr::new(head)),
            _marker: PhantomData,
        }
    }

    fn acquire_handle(&self) -> u64 {
        let mut handle = 0_u64;
        let ret = self.hazard_epoch.acquire(&mut handle);
        assert!(
            ret.is_success(),
            "hazard epoch acquire fail, ret={}, at most {} threads may use the queue at once, \
             enable a larger max_thread_count_* feature",
            ret,
            MAX_THREAD_COUNT
        );
        handle
    }

    /// Append `v` at the tail. Linearized at the CAS linking the node after the last node.
    pub fn enqueue(&self, v: T) {
        let node = Box::into_raw(Box::new(FIFONode::new(v)));
        let handle = self.acquire_handle();
        unsafe { self.inner_enqueue(node) };
        self.hazard_epoch.release(handle);
    }

    unsafe fn inner_enqueue(&self, node: FIFONodePtr<T>) {
        loop {
            let tail = self.atomic_load_tail();
            let next = (*tail).next();
            if tail != self.atomic_load_tail() {
                continue;
            }
            if next.is_null() {
                if (*tail)
                    .next
                    .compare_exchange(ptr::null_mut(), node, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    // another operation may have swung it already
                    let _ = self.tail.compare_exchange(
                        tail,
                        node,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    return;
                }
            } else {
                // tail is lagging, help the producer which linked `next`
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::AcqRel, Ordering::Acquire);
            }
            util::pause();
        }
    }

    /// Remove the value at the head. Linearized at the CAS swinging `head`, `None` if the queue
    /// was empty.
    pub fn dequeue(&self) -> Option<T> {
        let handle = self.acquire_handle();
        let ret = unsafe { self.inner_dequeue() };
        self.hazard_epoch.release(handle);
        ret
    }

    unsafe fn inner_dequeue(&self) -> Option<T> {
        loop {
            let head = self.atomic_load_head();
            let tail = self.atomic_load_tail();
            let next = (*head).next();
            if head != self.atomic_load_head() {
                continue;
            }
            if head == tail {
                if next.is_null() {
                    return None;
                }
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::AcqRel, Ordering::Acquire);
            } else {
                // bitwise copy, only the thread winning the CAS below owns it
                let value = ptr::read(&(*next).value);
                if self
                    .head
                    .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.hazard_epoch.add_node(head);
                    return Some(value.assume_init());
                }
            }
            util::pause();
        }
    }

    /// Return true if no value was linked after the sentinel at the time of the call.
    pub fn is_empty(&self) -> bool {
        let handle = self.acquire_handle();
        let empty = unsafe { (*self.atomic_load_head()).next().is_null() };
        self.hazard_epoch.release(handle);
        empty
    }

    /// Count of unlinked nodes not reclaimed yet.
    pub fn hazard_waiting_count(&self) -> i64 {
        self.hazard_epoch.atomic_load_hazard_waiting_count()
    }

    unsafe fn destroy(&mut self) {
        let head = *self.head.get_mut();
        let mut iter = *(*head).next.get_mut();
        drop(Box::from_raw(head));
        while !iter.is_null() {
            let mut node = Box::from_raw(iter);
            iter = *node.next.get_mut();
            ptr::drop_in_place(node.value.as_mut_ptr());
        }
        *self.head.get_mut() = ptr::null_mut();
        *self.tail.get_mut() = ptr::null_mut();
    }
}

impl<T: Send> ConcurrentQueue<T> for LockFreeQueue<T> {
    fn enqueue(&self, value: T) {
        LockFreeQueue::enqueue(self, value)
    }

    fn dequeue(&self) -> Option<T> {
        LockFreeQueue::dequeue(self)
    }

    fn is_empty(&self) -> bool {
        LockFreeQueue::is_empty(self)
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        unsafe {
            self.destroy();
        }
    }
}
