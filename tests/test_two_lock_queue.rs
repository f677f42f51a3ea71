mod common;

use rs_msqueue::two_lock_queue::TwoLockQueue;
use rs_msqueue::{ConcurrentQueue, LockFreeQueue};

#[test]
fn test_empty_on_fresh_queue() {
    let queue = TwoLockQueue::<u64>::new();
    assert!(queue.is_empty());
    assert_eq!(queue.dequeue(), None);
}

#[test]
fn test_round_trip() {
    let queue = TwoLockQueue::new();
    queue.enqueue(1);
    queue.enqueue(2);
    queue.enqueue(3);
    assert_eq!(queue.dequeue(), Some(1));
    assert_eq!(queue.dequeue(), Some(2));
    assert_eq!(queue.dequeue(), Some(3));
    assert_eq!(queue.dequeue(), None);
}

#[test]
fn test_multi_threads() {
    common::init_log();
    common::run_stress(TwoLockQueue::new(), 10, 10, 10_000);
}

#[test]
fn test_single_consumer_sees_producer_order() {
    common::init_log();
    common::run_stress(TwoLockQueue::new(), 8, 1, 5_000);
}

#[test]
fn test_memory_leak() {
    common::init_log();
    common::run_drop_accounting(TwoLockQueue::new(), 6, 5_000);
}

#[test]
fn test_interchangeable() {
    let queues: Vec<Box<dyn ConcurrentQueue<&str>>> = vec![
        Box::new(TwoLockQueue::<&str>::new()),
        Box::new(LockFreeQueue::<&str>::new()),
    ];
    for queue in &queues {
        queue.enqueue("a");
        queue.enqueue("b");
        assert!(!queue.is_empty());
        assert_eq!(queue.dequeue(), Some("a"));
        assert_eq!(queue.dequeue(), Some("b"));
        assert_eq!(queue.dequeue(), None);
        assert!(queue.is_empty());
    }
}
