//! Definition and implementations of of `HazardEpoch`
//!
use crate::error;
use crate::hazard_pointer::{ThreadStore, VersionHandle};
use crate::spin_lock::SpinLock;
use crate::util;
use crate::util::WrappedAlign64Type;
use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicU64, Ordering};

pub use crate::hazard_pointer::{BaseHazardNode, HazardNodeT};

cfg_if! {
    if #[cfg(feature = "max_thread_count_4096")] {
        pub const MAX_THREAD_COUNT: usize = 4096;
    } else if #[cfg(feature = "max_thread_count_256")] {
        pub const MAX_THREAD_COUNT: usize = 256;
    } else {
        /// Maximum thread count
        pub const MAX_THREAD_COUNT: usize = 16;
    }
}

/// Default maximum of shared objects waiting to be reclaimed under one thread.
pub const DEFAULT_THREAD_WAITING_THRESHOLD: i64 = 64;
/// Default interval(microsecond) to update minimum version cache.
pub const DEFAULT_MIN_VERSION_CACHE_TIME_US: i64 = 200_000;

struct VersionTimestamp {
    curr_min_version: AtomicU64,
    curr_min_version_timestamp: AtomicI64,
}

/// `HazardEpoch` a practical implementation of `Hazard Pointers`, which use global incremental
/// version to identify shared object to be reclaimed. Because of [`False sharing`](https://en.wikipedia.org/wiki/False_sharing),
/// a part of the member variables, might be frequently modified by different threads, are aligned
/// to 64 bytes.
///
/// Every thread publishes the global version it observed in `acquire`. A retired object is
/// stamped with a newer version, so it is reclaimed only after each thread, which could still
/// hold a reference to it, has called `release`.
pub struct HazardEpoch {
    thread_waiting_threshold: i64,
    min_version_cache_time_us: i64,
    version: WrappedAlign64Type<AtomicU64>,
    thread_lock: WrappedAlign64Type<SpinLock>,
    threads: Box<[ThreadStore]>,
    thread_list: AtomicPtr<ThreadStore>,
    thread_count: AtomicI64,
    hazard_waiting_count: WrappedAlign64Type<AtomicI64>,
    curr_min_version_info: WrappedAlign64Type<VersionTimestamp>,
}

impl Default for HazardEpoch {
    /// Return `Self::new(64, 200000)`
    fn default() -> Self {
        Self::new(
            DEFAULT_THREAD_WAITING_THRESHOLD,
            DEFAULT_MIN_VERSION_CACHE_TIME_US,
        )
    }
}

impl HazardEpoch {
    #[inline]
    fn curr_min_version(&self) -> u64 {
        self.curr_min_version_info
            .curr_min_version
            .load(Ordering::SeqCst)
    }

    #[inline]
    fn set_curr_min_version(&self, curr_min_version: u64) {
        self.curr_min_version_info
            .curr_min_version
            .store(curr_min_version, Ordering::SeqCst);
    }

    #[inline]
    fn curr_min_version_timestamp(&self) -> i64 {
        self.curr_min_version_info
            .curr_min_version_timestamp
            .load(Ordering::SeqCst)
    }

    #[inline]
    fn set_curr_min_version_timestamp(&self, curr_min_version_timestamp: i64) {
        self.curr_min_version_info
            .curr_min_version_timestamp
            .store(curr_min_version_timestamp, Ordering::SeqCst);
    }

    /// `thread_waiting_threshold` means the maximum of the number of shared objects to be
    /// reclaimed under one thread. `min_version_cache_time_us` means the time
    /// interval(microsecond) to update minimum version cache. Thread stores live in the heap, so
    /// `HazardEpoch` can be moved freely.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_msqueue::hazard_epoch::HazardEpoch;
    ///
    /// let h = HazardEpoch::new(64, 200000);
    /// assert_eq!(h.atomic_load_hazard_waiting_count(), 0);
    /// ```
    ///
    pub fn new(thread_waiting_threshold: i64, min_version_cache_time_us: i64) -> HazardEpoch {
        HazardEpoch {
            thread_waiting_threshold,
            min_version_cache_time_us,
            version: WrappedAlign64Type(AtomicU64::new(0)),
            thread_lock: WrappedAlign64Type(SpinLock::default()),
            threads: (0..MAX_THREAD_COUNT).map(|_| ThreadStore::new()).collect(),
            thread_list: AtomicPtr::new(ptr::null_mut()),
            thread_count: AtomicI64::new(0),
            hazard_waiting_count: WrappedAlign64Type(AtomicI64::new(0)),
            curr_min_version_info: WrappedAlign64Type(VersionTimestamp {
                curr_min_version: AtomicU64::new(0),
                curr_min_version_timestamp: AtomicI64::new(0),
            }),
        }
    }

    /// Reclaim all shared objects waiting to be reclaimed which no thread can reference any more.
    /// Objects still protected by some thread stay in the list of the calling thread.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_msqueue::hazard_epoch::HazardEpoch;
    /// use rs_msqueue::hazard_epoch::BaseHazardNode;
    ///
    /// let h = HazardEpoch::default();
    /// let node = Box::into_raw(Box::new(BaseHazardNode::default()));
    /// unsafe { h.add_node(node); }
    /// h.retire();
    /// assert_eq!(h.atomic_load_hazard_waiting_count(), 0);
    /// ```
    ///
    pub fn retire(&self) {
        let ts = match self.get_thread_store() {
            Ok(ts) => ts,
            Err(ret) => {
                warn!("get_thread_store fail, ret={}", ret);
                return;
            }
        };
        let min_version = self.get_min_version(true);
        let mut total = 0;
        unsafe {
            let retire_count = ts.retire(min_version, ts);
            self.hazard_waiting_count
                .fetch_sub(retire_count, Ordering::SeqCst);
            total += retire_count;

            let mut iter = self.atomic_load_thread_list();
            while !iter.is_null() {
                if !ptr::eq(iter, ts) {
                    let retire_count = (*iter).retire(min_version, ts);
                    self.hazard_waiting_count
                        .fetch_sub(retire_count, Ordering::SeqCst);
                    total += retire_count;
                }
                iter = (*iter).next();
            }
        }
        debug!(
            "retire all, min_version={}, reclaimed={}, waiting={}",
            min_version,
            total,
            self.atomic_load_hazard_waiting_count()
        );
    }

    /// Hand a shared object over to be reclaimed. `node` can be any type as long as it implements
    /// Trait `HazardNodeT`, it must come from `Box::into_raw` and must already be unreachable for
    /// other threads which have not acquired a handle yet. The object is dropped once no thread
    /// holding an older handle is left.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_msqueue::hazard_epoch::HazardEpoch;
    /// use rs_msqueue::hazard_epoch::{BaseHazardNode, HazardNodeT};
    /// use std::cell::RefCell;
    ///
    /// struct Node<'a, T> {
    ///     base: BaseHazardNode,
    ///     cnt: &'a RefCell<i32>,
    ///     v: T,
    /// }
    ///
    /// impl<'a, T> Drop for Node<'a, T> {
    ///     fn drop(&mut self) {
    ///         *self.cnt.borrow_mut() += 10;
    ///     }
    /// }
    ///
    /// impl<'a, T> HazardNodeT for Node<'a, T> {
    ///     fn get_base_hazard_node(&self) -> *mut BaseHazardNode {
    ///         &self.base as *const _ as *mut _
    ///     }
    /// }
    ///
    /// let cnt = RefCell::new(0);
    /// let h = HazardEpoch::default();
    /// let node = Box::into_raw(Box::new(Node{
    ///     base: Default::default(),
    ///     cnt: &cnt,
    ///     v: 2333,
    /// }));
    /// unsafe { h.add_node(node); }
    /// drop(h);
    /// assert_eq!(*cnt.borrow(), 10);
    /// ```
    ///
    #[inline]
    pub unsafe fn add_node<T>(&self, node: *mut T) -> error::Status
    where
        T: HazardNodeT,
    {
        if node.is_null() {
            warn!("node is null");
            return error::Status::InvalidParam;
        }
        let ts = match self.get_thread_store() {
            Ok(ts) => ts,
            Err(ret) => {
                warn!("get_thread_store fail, ret={}", ret);
                return ret;
            }
        };
        let ret = ts.add_node(self.version.fetch_add(1, Ordering::SeqCst) + 1, node);
        if ret.is_success() {
            self.hazard_waiting_count.fetch_add(1, Ordering::SeqCst);
        } else {
            warn!("add_node fail, ret={}", ret);
        }
        ret
    }

    #[inline]
    fn atomic_load_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Before accessing a shared object, call method `acquire` to get the `handle` of this operation.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_msqueue::hazard_epoch::HazardEpoch;
    /// use rs_msqueue::hazard_epoch::BaseHazardNode;
    /// use rs_msqueue::error::Status;
    ///
    /// let h = HazardEpoch::default();
    /// let node = Box::into_raw(Box::new(BaseHazardNode::default()));
    /// let mut handle = 0;
    /// assert_eq!(h.acquire(&mut handle), Status::Success);
    /// let _o = unsafe { &(*node) };
    /// h.release(handle);
    /// unsafe { drop(Box::from_raw(node)); }
    /// ```
    ///
    pub fn acquire(&self, handle: &mut u64) -> error::Status {
        let ts = match self.get_thread_store() {
            Ok(ts) => ts,
            Err(ret) => {
                warn!("get_thread_store fail, ret={}", ret);
                return ret;
            }
        };
        loop {
            let version = self.atomic_load_version();
            let mut version_handle = VersionHandle::new(0);
            let ret = ts.acquire(version, &mut version_handle);
            if !ret.is_success() {
                warn!("thread store acquire fail, ret={}", ret);
                return ret;
            } else if version != self.atomic_load_version() {
                ts.release(&version_handle);
            } else {
                *handle = version_handle.ver_u64();
                return ret;
            }
        }
    }

    /// Atomic load count of thread
    #[inline]
    fn atomic_load_thread_count(&self) -> i64 {
        self.thread_count.load(Ordering::SeqCst)
    }

    /// After accessing a shared object, call method `release` to trigger reclaiming. Usage is the
    /// same as `acquire`. A handle of another thread, or one released already, is ignored.
    #[inline]
    pub fn release(&self, handle: u64) {
        let version_handle = VersionHandle::new(handle);
        let tid = util::get_thread_id();
        if tid < 0 || version_handle.tid() as i64 != tid || MAX_THREAD_COUNT <= tid as usize {
            warn!(
                "release handle of thread {} on thread {}",
                version_handle.tid(),
                tid
            );
            return;
        }
        let ts = &self.threads[tid as usize];
        ts.release(&version_handle);
        if self.thread_waiting_threshold < ts.get_hazard_waiting_count() {
            let mut retire_count = unsafe { ts.retire(self.get_min_version(false), ts) };
            // cached min version is stale, the list is still above threshold
            if 0 == retire_count && self.thread_waiting_threshold < ts.get_hazard_waiting_count() {
                retire_count = unsafe { ts.retire(self.get_min_version(true), ts) };
            }
            self.hazard_waiting_count
                .fetch_sub(retire_count, Ordering::SeqCst);
        } else if self.atomic_load_thread_count() * self.thread_waiting_threshold
            < self.atomic_load_hazard_waiting_count()
        {
            self.retire();
        }
    }

    /// Atomic load count of shared objects waiting to be reclaimed.
    #[inline]
    pub fn atomic_load_hazard_waiting_count(&self) -> i64 {
        self.hazard_waiting_count.load(Ordering::SeqCst)
    }

    #[inline]
    fn get_thread_store(&self) -> Result<&ThreadStore, error::Status> {
        let tn = util::get_thread_id();
        if tn < 0 || MAX_THREAD_COUNT <= tn as usize {
            warn!(
                "thread number overflow, tn={}, MAX_THREAD_COUNT={}",
                tn, MAX_THREAD_COUNT
            );
            return Err(error::Status::ThreadNumOverflow);
        }
        let ts = &self.threads[tn as usize];
        // different thread use different thread store.
        if !ts.is_enabled() {
            let _guard = self.thread_lock.lock();

            ts.set_next(self.atomic_load_thread_list());
            self.thread_list
                .store(ts as *const _ as *mut ThreadStore, Ordering::SeqCst);
            ts.set_enabled(tn as u16);
            self.thread_count.fetch_add(1, Ordering::SeqCst);
            trace!("thread store {} enabled", tn);
        }
        Ok(ts)
    }

    #[inline]
    fn atomic_load_thread_list(&self) -> *mut ThreadStore {
        self.thread_list.load(Ordering::SeqCst)
    }

    fn get_min_version(&self, force_flush: bool) -> u64 {
        let cached = self.curr_min_version();
        if !force_flush
            && 0 != cached
            && self.curr_min_version_timestamp() + self.min_version_cache_time_us
                > util::get_cur_microseconds_time()
        {
            return cached;
        }
        let mut ret = self.atomic_load_version();
        let mut iter = self.atomic_load_thread_list();
        while !iter.is_null() {
            let ts_min_version = unsafe { (*iter).version() };
            if ret > ts_min_version {
                ret = ts_min_version;
            }
            iter = unsafe { (*iter).next() };
        }
        self.set_curr_min_version(ret);
        self.set_curr_min_version_timestamp(util::get_cur_microseconds_time());
        ret
    }
}

impl Drop for HazardEpoch {
    fn drop(&mut self) {
        debug!(
            "drop HazardEpoch, {} nodes still waiting",
            self.atomic_load_hazard_waiting_count()
        );
    }
}
