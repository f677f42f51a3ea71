#![allow(dead_code)]

use rs_msqueue::util;
use rs_msqueue::ConcurrentQueue;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn set_cpu_affinity() {
    if let Some(cpus) = core_affinity::get_core_ids() {
        if !cpus.is_empty() {
            let idx = util::get_thread_id() as usize % cpus.len();
            core_affinity::set_for_current(cpus[idx]);
            log::trace!("set_cpu_affinity {} {}", util::get_thread_id(), idx);
        }
    }
}

pub struct GlobalControl<Q> {
    pub queue: Q,
    pub ops_per_producer: u64,
    pub produced: AtomicI64,
    pub consumed: AtomicI64,
}

fn producer_thread<Q: ConcurrentQueue<u64>>(control: &GlobalControl<Q>, id: u64) {
    set_cpu_affinity();
    for j in 0..control.ops_per_producer {
        control.queue.enqueue(id * control.ops_per_producer + j);
        control.produced.fetch_add(1, Ordering::SeqCst);
    }
}

/// Drain until `total` values have been taken by all consumers together.
fn consumer_thread<Q: ConcurrentQueue<u64>>(control: &GlobalControl<Q>, total: i64) -> Vec<u64> {
    set_cpu_affinity();
    let mut taken = vec![];
    while control.consumed.load(Ordering::SeqCst) < total {
        match control.queue.dequeue() {
            Some(v) => {
                taken.push(v);
                control.consumed.fetch_add(1, Ordering::SeqCst);
            }
            None => thread::yield_now(),
        }
    }
    taken
}

/// Run `producers` x `ops_per_producer` values through `queue` with `consumers` draining
/// concurrently, then check nothing got lost, duplicated or reordered per producer.
pub fn run_stress<Q>(queue: Q, producers: u64, consumers: u64, ops_per_producer: u64)
where
    Q: ConcurrentQueue<u64> + 'static,
{
    let control = Arc::new(GlobalControl {
        queue,
        ops_per_producer,
        produced: AtomicI64::new(0),
        consumed: AtomicI64::new(0),
    });
    let total = (producers * ops_per_producer) as i64;

    let producer_threads: Vec<_> = (0..producers)
        .map(|id| {
            let control = control.clone();
            thread::spawn(move || producer_thread(&*control, id))
        })
        .collect();
    let consumer_threads: Vec<_> = (0..consumers)
        .map(|_| {
            let control = control.clone();
            thread::spawn(move || consumer_thread(&*control, total))
        })
        .collect();

    for t in producer_threads {
        t.join().unwrap();
    }
    log::info!("producer_threads joined");

    let mut seen = HashSet::with_capacity(total as usize);
    for t in consumer_threads {
        let taken = t.join().unwrap();
        let mut last = vec![None; producers as usize];
        for v in taken {
            let producer = (v / ops_per_producer) as usize;
            assert!(producer < producers as usize, "unknown value {}", v);
            if let Some(prev) = last[producer] {
                assert!(prev < v, "producer {} out of order: {} after {}", producer, v, prev);
            }
            last[producer] = Some(v);
            assert!(seen.insert(v), "value {} dequeued twice", v);
        }
    }
    log::info!("consumer_threads joined");

    assert_eq!(control.produced.load(Ordering::SeqCst), total);
    assert_eq!(control.consumed.load(Ordering::SeqCst), total);
    assert_eq!(seen.len() as i64, total);
    assert!((0..total as u64).all(|v| seen.contains(&v)));
    assert!(control.queue.is_empty());
    assert_eq!(control.queue.dequeue(), None);
}

/// Value which counts its drops.
pub struct Counted {
    pub v: u64,
    pub drops: Arc<AtomicI64>,
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Producers and consumers race, consumers stop halfway, the rest is dropped with the queue.
pub fn run_drop_accounting<Q>(queue: Q, producers: u64, ops_per_producer: u64)
where
    Q: ConcurrentQueue<Counted> + 'static,
{
    let drops = Arc::new(AtomicI64::new(0));
    let queue = Arc::new(queue);
    let total = (producers * ops_per_producer) as i64;
    let to_take = Arc::new(AtomicI64::new(total / 2));

    let mut threads = vec![];
    for id in 0..producers {
        let queue = queue.clone();
        let drops = drops.clone();
        threads.push(thread::spawn(move || {
            for j in 0..ops_per_producer {
                queue.enqueue(Counted {
                    v: id * ops_per_producer + j,
                    drops: drops.clone(),
                });
            }
        }));
    }
    for _ in 0..producers {
        let queue = queue.clone();
        let to_take = to_take.clone();
        threads.push(thread::spawn(move || {
            while to_take.load(Ordering::SeqCst) > 0 {
                if to_take.fetch_sub(1, Ordering::SeqCst) <= 0 {
                    break;
                }
                loop {
                    if let Some(c) = queue.dequeue() {
                        drop(c);
                        break;
                    }
                    thread::yield_now();
                }
            }
        }));
    }
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(drops.load(Ordering::SeqCst), total / 2);
    drop(Arc::try_unwrap(queue).ok().unwrap());
    assert_eq!(drops.load(Ordering::SeqCst), total);
}
