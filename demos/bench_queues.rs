//! Producers and consumers hammering both queue flavours, elapsed time of each is logged.
//!
//! `PRODUCERS`, `CONSUMERS` and `OPS_PER_PRODUCER` override the defaults (10, 10, 10000),
//! `RUST_LOG=info` shows the progress.

#[macro_use]
extern crate log;

use rs_msqueue::util;
use rs_msqueue::{ConcurrentQueue, LockFreeQueue, TwoLockQueue};
use std::env;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct GlobalControl<Q> {
    queue: Q,
    loop_cnt: i64,
    total: i64,
    produced: AtomicI64,
    consumed: AtomicI64,
    tol_val: AtomicI64,
}

fn env_or(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn set_cpu_affinity() {
    if let Some(cpus) = core_affinity::get_core_ids() {
        if !cpus.is_empty() {
            let idx = util::get_thread_id() as usize % cpus.len();
            core_affinity::set_for_current(cpus[idx]);
            debug!("set_cpu_affinity {} {}", util::get_thread_id(), idx);
        }
    }
}

fn producer_thread<Q: ConcurrentQueue<i64>>(global_control: &GlobalControl<Q>, id: i64) {
    set_cpu_affinity();
    let mut tol = 0;
    for j in 0..global_control.loop_cnt {
        global_control.queue.enqueue(id * global_control.loop_cnt + j);
        tol += 1;
        if tol % 1024 == 0 {
            global_control.produced.fetch_add(tol, Ordering::SeqCst);
            tol = 0;
        }
    }
    global_control.produced.fetch_add(tol, Ordering::SeqCst);
}

fn consumer_thread<Q: ConcurrentQueue<i64>>(global_control: &GlobalControl<Q>) {
    set_cpu_affinity();
    let mut tol_val = 0;
    // the shared counter decides termination, an empty queue alone says nothing
    while global_control.consumed.load(Ordering::SeqCst) < global_control.total {
        match global_control.queue.dequeue() {
            Some(v) => {
                tol_val += v;
                global_control.consumed.fetch_add(1, Ordering::SeqCst);
            }
            None => thread::yield_now(),
        }
    }
    global_control.tol_val.fetch_add(tol_val, Ordering::SeqCst);
}

fn debug_thread<Q>(global_control: &GlobalControl<Q>) {
    while global_control.consumed.load(Ordering::SeqCst) < global_control.total {
        info!(
            "debug_thread produced {} consumed {}",
            global_control.produced.load(Ordering::SeqCst),
            global_control.consumed.load(Ordering::SeqCst)
        );
        thread::sleep(Duration::from_millis(200));
    }
}

fn run<Q>(name: &str, queue: Q, producer_count: i64, consumer_count: i64, loop_cnt: i64)
where
    Q: ConcurrentQueue<i64> + 'static,
{
    let total = producer_count * loop_cnt;
    let global_control = Arc::new(GlobalControl {
        queue,
        loop_cnt,
        total,
        produced: AtomicI64::new(0),
        consumed: AtomicI64::new(0),
        tol_val: AtomicI64::new(0),
    });
    let start = Instant::now();

    let watch_thread = {
        let global_control = global_control.clone();
        thread::spawn(move || debug_thread(&*global_control))
    };
    let mut producer_threads = vec![];
    let mut consumer_threads = vec![];
    for id in 0..producer_count {
        let global_control = global_control.clone();
        producer_threads.push(thread::spawn(move || producer_thread(&*global_control, id)));
    }
    for _ in 0..consumer_count {
        let global_control = global_control.clone();
        consumer_threads.push(thread::spawn(move || consumer_thread(&*global_control)));
    }

    for t in producer_threads {
        t.join().expect("producer panicked");
    }
    info!("{} producer_threads joined", name);
    for t in consumer_threads {
        t.join().expect("consumer panicked");
    }
    info!("{} consumer_threads joined", name);
    watch_thread.join().expect("debug thread panicked");

    let cost = start.elapsed();
    let produced = global_control.produced.load(Ordering::SeqCst);
    let consumed = global_control.consumed.load(Ordering::SeqCst);
    info!(
        "{} produced {} consumed {} time cost {} ms",
        name,
        produced,
        consumed,
        cost.as_millis()
    );
    assert_eq!(produced, consumed);
    assert_eq!(
        global_control.tol_val.load(Ordering::SeqCst),
        (total - 1) * total / 2
    );
    println!("{}: {} values in {} ms", name, total, cost.as_millis());
}

fn main() {
    env_logger::init();

    let producer_count = env_or("PRODUCERS", 10);
    let consumer_count = env_or("CONSUMERS", 10);
    let loop_cnt = env_or("OPS_PER_PRODUCER", 10_000);
    info!(
        "producer_count {} consumer_count {} loop_cnt {}",
        producer_count, consumer_count, loop_cnt
    );

    run(
        "two_lock_queue",
        TwoLockQueue::new(),
        producer_count,
        consumer_count,
        loop_cnt,
    );
    run(
        "lockfree_queue",
        LockFreeQueue::new(),
        producer_count,
        consumer_count,
        loop_cnt,
    );
}
