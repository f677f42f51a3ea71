//! Concurrent FIFO queues for Rust: a two-lock queue and the lock-free queue of Michael & Scott,
//! the latter based on practical `Hazard Pointers` algorithm
//!
//! [`Hazard Pointers`](http://www.cs.otago.ac.nz/cosc440/readings/hazard-pointers.pdf) algorithm
//! firstly saves the pointer of shared object to local thread, and then accessed it, and removes it
//! after accessing is over. An object can be released only when there is no thread contains its
//! reference, which solve the [`ABA problem`](https://en.wikipedia.org/wiki/ABA_problem).
//!
//! We provide `HazardEpoch`, a practical implementation of `Hazard Pointers`: instead of publishing
//! every pointer, a thread publishes the global version it started at, and a retired object is
//! reclaimed once all published versions are newer than the one stamped on it.
//!
//! `LockFreeQueue` is the non-blocking queue of Michael & Scott, which hands every unlinked node to
//! `HazardEpoch`. `TwoLockQueue` guards head and tail by two different `SpinLock`s. Both implement
//! `ConcurrentQueue` and contain the same methods `enqueue`, `dequeue` and `is_empty`.
//!

mod hazard_pointer;
pub mod util;
pub mod error;
pub mod hazard_epoch;
pub mod spin_lock;
pub mod concurrent_queue;
pub mod lockfree_queue;
pub mod two_lock_queue;

pub use crate::concurrent_queue::ConcurrentQueue;
pub use crate::lockfree_queue::LockFreeQueue;
pub use crate::two_lock_queue::TwoLockQueue;

#[macro_use]
extern crate log;

#[macro_use]
extern crate cfg_if;
