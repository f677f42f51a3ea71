//! Per thread bookkeeping of `HazardEpoch`: version handles, retired node lists and the base node
//! every reclaimable object embeds.

use crate::error;
use crate::util;
use crate::util::WrappedAlign64Type;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicPtr, AtomicU16, AtomicU32, AtomicU64, Ordering};

struct SeqVersion {
    seq: AtomicU32,
    version: AtomicU64,
}

impl Default for SeqVersion {
    fn default() -> Self {
        SeqVersion {
            seq: AtomicU32::new(0),
            version: AtomicU64::new(u64::MAX),
        }
    }
}

#[derive(Copy, Clone)]
struct TidSeq {
    tid: u16,
    high_bits: u16,
    seq: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
union VersionHandleUnion {
    tid_seq: TidSeq,
    ver_u64: u64,
}

/// Handle returned by `acquire`, thread id and sequence number packed into an `u64`.
#[derive(Copy, Clone)]
pub struct VersionHandle {
    data: VersionHandleUnion,
}

impl VersionHandle {
    pub fn ver_u64(&self) -> u64 {
        unsafe { self.data.ver_u64 }
    }

    pub fn new(uv: u64) -> VersionHandle {
        VersionHandle {
            data: VersionHandleUnion { ver_u64: uv },
        }
    }

    #[inline]
    fn set_tid(&mut self, tid: u16) {
        self.data.tid_seq.tid = tid;
    }

    #[inline]
    pub fn tid(&self) -> u16 {
        unsafe { self.data.tid_seq.tid }
    }

    #[inline]
    fn set_high_bits(&mut self, high_bits: u16) {
        self.data.tid_seq.high_bits = high_bits;
    }

    #[inline]
    fn seq(&self) -> u32 {
        unsafe { self.data.tid_seq.seq }
    }

    #[inline]
    fn set_seq(&mut self, seq: u32) {
        self.data.tid_seq.seq = seq;
    }
}

/// Implemented by every object handed to `HazardEpoch::add_node`. The object embeds a
/// `BaseHazardNode` and returns its address.
pub trait HazardNodeT {
    fn get_base_hazard_node(&self) -> *mut BaseHazardNode;
}

/// Intrusive header of a retired object: list link, retire version and the type erased
/// destructor of the enclosing object.
pub struct BaseHazardNode {
    obj: *mut u8,
    reclaim: Option<unsafe fn(*mut u8)>,
    next: *mut BaseHazardNode,
    version: u64,
}

impl Default for BaseHazardNode {
    fn default() -> Self {
        BaseHazardNode {
            obj: ptr::null_mut(),
            reclaim: None,
            next: ptr::null_mut(),
            version: u64::MAX,
        }
    }
}

impl HazardNodeT for BaseHazardNode {
    fn get_base_hazard_node(&self) -> *mut BaseHazardNode {
        self as *const _ as *mut BaseHazardNode
    }
}

unsafe fn reclaim_boxed<T>(obj: *mut u8) {
    drop(Box::from_raw(obj as *mut T));
}

impl BaseHazardNode {
    #[inline]
    fn next(&self) -> *mut BaseHazardNode {
        self.next
    }

    #[inline]
    fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    #[inline]
    fn set_next(&mut self, next: *mut BaseHazardNode) {
        assert_ne!(next, self as *mut _);
        self.next = next;
    }

    #[inline]
    fn set_reclaim<T>(&mut self, obj: *mut T) {
        self.obj = obj as *mut u8;
        self.reclaim = Some(reclaim_boxed::<T>);
    }
}

pub struct ThreadStore {
    enabled: AtomicBool,
    tid: AtomicU16,
    last_retire_version: AtomicU64,
    curr_seq_version: WrappedAlign64Type<SeqVersion>,
    hazard_waiting_list: WrappedAlign64Type<AtomicPtr<BaseHazardNode>>,
    hazard_waiting_count: WrappedAlign64Type<AtomicI64>,
    next: WrappedAlign64Type<AtomicPtr<ThreadStore>>,
}

impl Default for ThreadStore {
    fn default() -> Self {
        ThreadStore::new()
    }
}

impl ThreadStore {
    pub fn new() -> ThreadStore {
        ThreadStore {
            enabled: AtomicBool::new(false),
            tid: AtomicU16::new(0),
            last_retire_version: AtomicU64::new(0),
            curr_seq_version: Default::default(),
            hazard_waiting_list: WrappedAlign64Type(AtomicPtr::new(ptr::null_mut())),
            hazard_waiting_count: Default::default(),
            next: WrappedAlign64Type(AtomicPtr::new(ptr::null_mut())),
        }
    }

    pub fn set_enabled(&self, tid: u16) {
        self.tid.store(tid, Ordering::SeqCst);
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn tid(&self) -> u16 {
        self.tid.load(Ordering::Relaxed)
    }

    pub fn set_next(&self, next: *mut ThreadStore) {
        self.next.store(next, Ordering::SeqCst);
    }

    pub fn next(&self) -> *mut ThreadStore {
        self.next.load(Ordering::SeqCst)
    }

    #[inline]
    fn curr_seq(&self) -> u32 {
        self.curr_seq_version.seq.load(Ordering::Relaxed)
    }

    #[inline]
    fn inc_curr_seq(&self) {
        self.curr_seq_version.seq.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn curr_version(&self) -> u64 {
        self.curr_seq_version.version.load(Ordering::SeqCst)
    }

    #[inline]
    fn set_curr_version(&self, version: u64) {
        self.curr_seq_version.version.store(version, Ordering::SeqCst);
    }

    pub fn acquire(&self, version: u64, handle: &mut VersionHandle) -> error::Status {
        debug_assert_eq!(self.tid(), util::get_thread_id() as u16);
        let mut ret = error::Status::Success;
        if u64::MAX != self.curr_version() {
            warn!(
                "current thread has already assigned a version handle, seq={}",
                self.curr_seq()
            );
            ret = error::Status::Busy;
        } else {
            self.set_curr_version(version);
            handle.set_tid(self.tid());
            handle.set_high_bits(0);
            handle.set_seq(self.curr_seq());
        }
        ret
    }

    pub fn release(&self, handle: &VersionHandle) {
        debug_assert_eq!(self.tid(), util::get_thread_id() as u16);
        if self.tid() != handle.tid() || self.curr_seq() != handle.seq() {
            warn!("invalid handle seq={}, tid={}", handle.seq(), handle.tid());
        } else {
            self.set_curr_version(u64::MAX);
            self.inc_curr_seq();
        }
    }

    /// Stamp `node` with `version` and push it on the retired list of this store.
    ///
    /// `node` must come from `Box::into_raw` and must be unreachable for operations that acquire
    /// a version later than `version`.
    pub unsafe fn add_node<T>(&self, version: u64, node: *mut T) -> error::Status
    where
        T: HazardNodeT,
    {
        debug_assert_eq!(self.tid(), util::get_thread_id() as u16);
        let base = (*node).get_base_hazard_node();
        (*base).set_reclaim(node);
        (*base).set_version(version);
        self.inner_add_nodes(base, base, 1);
        error::Status::Success
    }

    pub fn get_hazard_waiting_count(&self) -> i64 {
        self.hazard_waiting_count.load(Ordering::SeqCst)
    }

    /// Reclaim nodes of this store whose version is not greater than `version`; the rest move to
    /// `node_receiver`, which must be the store of the calling thread. Return count of reclaimed.
    pub unsafe fn retire(&self, version: u64, node_receiver: &ThreadStore) -> i64 {
        debug_assert_eq!(node_receiver.tid(), util::get_thread_id() as u16);
        if self.last_retire_version.swap(version, Ordering::SeqCst) == version {
            return 0;
        }
        let curr = self.hazard_waiting_list.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut list_retire = ptr::null_mut();
        let mut move_count = 0i64;
        let mut retire_count = 0i64;
        let mut pseudo_head = BaseHazardNode::default();
        pseudo_head.set_next(curr);
        let mut iter = &mut pseudo_head as *mut BaseHazardNode;
        while !(*iter).next().is_null() {
            if (*(*iter).next()).version() <= version {
                retire_count += 1;
                let tmp = (*iter).next();
                (*iter).set_next((*tmp).next());

                (*tmp).set_next(list_retire);
                list_retire = tmp;
            } else {
                move_count += 1;
                iter = (*iter).next();
            }
        }
        let move_list_head = pseudo_head.next();
        if !move_list_head.is_null() {
            node_receiver.inner_add_nodes(move_list_head, iter, move_count);
        }
        self.hazard_waiting_count
            .fetch_sub(move_count + retire_count, Ordering::SeqCst);
        while !list_retire.is_null() {
            let node_retire = list_retire;
            list_retire = (*list_retire).next();
            Self::retire_hazard_node(node_retire);
        }
        retire_count
    }

    unsafe fn retire_hazard_node(node_retire: *mut BaseHazardNode) {
        if let Some(reclaim) = (*node_retire).reclaim {
            reclaim((*node_retire).obj);
        }
    }

    pub fn version(&self) -> u64 {
        self.curr_version()
    }

    unsafe fn inner_add_nodes(&self, head: *mut BaseHazardNode, tail: *mut BaseHazardNode, count: i64) {
        if 0 < count {
            let mut old = self.hazard_waiting_list.load(Ordering::Acquire);
            (*tail).set_next(old);
            while let Err(curr) = self.hazard_waiting_list.compare_exchange_weak(
                old,
                head,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                old = curr;
                (*tail).set_next(old);
            }
            self.hazard_waiting_count.fetch_add(count, Ordering::SeqCst);
        }
    }

    unsafe fn destroy(&mut self) {
        let mut node_retire = self.hazard_waiting_list.swap(ptr::null_mut(), Ordering::AcqRel);
        while !node_retire.is_null() {
            let next = (*node_retire).next();
            Self::retire_hazard_node(node_retire);
            node_retire = next;
        }
        self.hazard_waiting_count.store(0, Ordering::SeqCst);
    }
}

impl Drop for ThreadStore {
    fn drop(&mut self) {
        unsafe {
            self.destroy();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicI64;
    use std::sync::Arc;

    struct Counted {
        base: BaseHazardNode,
        cnt: Arc<AtomicI64>,
    }

    impl HazardNodeT for Counted {
        fn get_base_hazard_node(&self) -> *mut BaseHazardNode {
            &self.base as *const _ as *mut _
        }
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.cnt.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counted(cnt: &Arc<AtomicI64>) -> *mut Counted {
        Box::into_raw(Box::new(Counted {
            base: BaseHazardNode::default(),
            cnt: cnt.clone(),
        }))
    }

    fn enabled_store() -> ThreadStore {
        let ts = ThreadStore::new();
        ts.set_enabled(util::get_thread_id() as u16);
        ts
    }

    #[test]
    fn test_version_handle() {
        let mut h = VersionHandle::new(0);
        h.set_tid(7);
        h.set_high_bits(0);
        h.set_seq(42);
        let h2 = VersionHandle::new(h.ver_u64());
        assert_eq!(h2.tid(), 7);
        assert_eq!(h2.seq(), 42);
    }

    #[test]
    fn test_acquire_release() {
        let ts = enabled_store();
        let mut h = VersionHandle::new(0);
        assert_eq!(ts.acquire(3, &mut h), error::Status::Success);
        assert_eq!(ts.version(), 3);
        assert_eq!(ts.acquire(4, &mut h), error::Status::Busy);
        ts.release(&h);
        assert_eq!(ts.version(), u64::MAX);
        // stale handle is ignored
        assert_eq!(ts.acquire(5, &mut VersionHandle::new(0)), error::Status::Success);
        ts.release(&h);
        assert_eq!(ts.version(), 5);
    }

    #[test]
    fn test_retire_by_version() {
        let cnt = Arc::new(AtomicI64::new(0));
        let ts = enabled_store();
        unsafe {
            for v in 1..=10u64 {
                assert_eq!(ts.add_node(v, counted(&cnt)), error::Status::Success);
            }
            assert_eq!(ts.get_hazard_waiting_count(), 10);
            assert_eq!(ts.retire(4, &ts), 4);
            assert_eq!(cnt.load(Ordering::SeqCst), 4);
            assert_eq!(ts.get_hazard_waiting_count(), 6);
            // same version is skipped
            assert_eq!(ts.retire(4, &ts), 0);
        }
        drop(ts);
        assert_eq!(cnt.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_retire_moves_to_receiver() {
        let cnt = Arc::new(AtomicI64::new(0));
        let other = enabled_store();
        let me = enabled_store();
        unsafe {
            other.add_node(1, counted(&cnt));
            other.add_node(9, counted(&cnt));
            assert_eq!(other.retire(5, &me), 1);
        }
        assert_eq!(other.get_hazard_waiting_count(), 0);
        assert_eq!(me.get_hazard_waiting_count(), 1);
        assert_eq!(cnt.load(Ordering::SeqCst), 1);
        drop(other);
        assert_eq!(cnt.load(Ordering::SeqCst), 1);
        drop(me);
        assert_eq!(cnt.load(Ordering::SeqCst), 2);
    }
}
