//! Readers dereference a shared pointer which writers keep replacing, replaced objects are handed
//! to `HazardEpoch` and reclaimed once no reader can see them.

#[macro_use]
extern crate log;

use rs_msqueue::error::Status;
use rs_msqueue::hazard_epoch::{BaseHazardNode, HazardEpoch, HazardNodeT};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct Payload {
    base: BaseHazardNode,
    alive: Arc<AtomicI64>,
    a: i64,
    b: i64,
    sum: i64,
}

impl HazardNodeT for Payload {
    fn get_base_hazard_node(&self) -> *mut BaseHazardNode {
        &self.base as *const _ as *mut _
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        self.alive.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Payload {
    fn new(alive: &Arc<AtomicI64>, i: i64) -> *mut Payload {
        alive.fetch_add(1, Ordering::SeqCst);
        Box::into_raw(Box::new(Payload {
            base: BaseHazardNode::default(),
            alive: alive.clone(),
            a: i,
            b: 2 * i,
            sum: 3 * i,
        }))
    }
}

struct GlobalConf {
    stop: AtomicBool,
    shared: AtomicPtr<Payload>,
    h: HazardEpoch,
}

fn reader(global_conf: &GlobalConf) -> i64 {
    let mut reads = 0;
    while !global_conf.stop.load(Ordering::SeqCst) {
        let mut handle = 0u64;
        if global_conf.h.acquire(&mut handle) != Status::Success {
            break;
        }
        let p = unsafe { &*global_conf.shared.load(Ordering::SeqCst) };
        assert_eq!(p.a + p.b, p.sum);
        global_conf.h.release(handle);
        reads += 1;
    }
    reads
}

fn writer(global_conf: &GlobalConf, alive: &Arc<AtomicI64>, loops: i64) {
    for i in 0..loops {
        let old = global_conf
            .shared
            .swap(Payload::new(alive, i), Ordering::SeqCst);
        let mut handle = 0u64;
        if global_conf.h.acquire(&mut handle) == Status::Success {
            unsafe {
                global_conf.h.add_node(old);
            }
            global_conf.h.release(handle);
        }
    }
}

fn main() {
    env_logger::init();

    let alive = Arc::new(AtomicI64::new(0));
    let global_conf = Arc::new(GlobalConf {
        stop: AtomicBool::new(false),
        shared: AtomicPtr::new(Payload::new(&alive, 0)),
        h: HazardEpoch::default(),
    });
    let start = Instant::now();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let global_conf = global_conf.clone();
            thread::spawn(move || reader(&global_conf))
        })
        .collect();
    let writers: Vec<_> = (0..2)
        .map(|_| {
            let global_conf = global_conf.clone();
            let alive = alive.clone();
            thread::spawn(move || writer(&global_conf, &alive, 200_000))
        })
        .collect();

    for t in writers {
        t.join().expect("writer panicked");
    }
    thread::sleep(Duration::from_millis(10));
    global_conf.stop.store(true, Ordering::SeqCst);
    let reads: i64 = readers
        .into_iter()
        .map(|t| t.join().expect("reader panicked"))
        .sum();

    unsafe {
        drop(Box::from_raw(
            global_conf.shared.swap(std::ptr::null_mut(), Ordering::SeqCst),
        ));
    }
    global_conf.h.retire();
    info!(
        "reads {} alive after retire {} waiting {}",
        reads,
        alive.load(Ordering::SeqCst),
        global_conf.h.atomic_load_hazard_waiting_count()
    );
    println!(
        "{} reads, {} objects alive, time cost {} ms",
        reads,
        alive.load(Ordering::SeqCst),
        start.elapsed().as_millis()
    );
}
