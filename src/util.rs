use crate::spin_lock::SpinLock;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI64, Ordering};

static GLOBAL_THREAD_ID: AtomicI64 = AtomicI64::new(0);

/// Ids of exited threads, handed out again before `GLOBAL_THREAD_ID` grows.
static FREE_THREAD_IDS: SpinLock<Vec<i64>> = SpinLock::new(Vec::new());

struct ThreadIdSlot(i64);

impl ThreadIdSlot {
    fn alloc() -> ThreadIdSlot {
        let reused = FREE_THREAD_IDS.lock().pop();
        ThreadIdSlot(reused.unwrap_or_else(|| GLOBAL_THREAD_ID.fetch_add(1, Ordering::SeqCst)))
    }
}

impl Drop for ThreadIdSlot {
    fn drop(&mut self) {
        FREE_THREAD_IDS.lock().push(self.0);
    }
}

thread_local!(static THREAD_ID: ThreadIdSlot = ThreadIdSlot::alloc());

/// Dense id of the current thread. Ids of exited threads are reused, so the
/// value stays below the number of threads alive at the same time.
///
/// Returns -1 while the thread local storage is being torn down.
pub fn get_thread_id() -> i64 {
    THREAD_ID.try_with(|tid| tid.0).unwrap_or(-1)
}

#[repr(align(64))]
pub struct WrappedAlign64Type<T>(pub T);

impl<T> Default for WrappedAlign64Type<T>
where
    T: Default,
{
    fn default() -> Self {
        WrappedAlign64Type(T::default())
    }
}

impl<T> Deref for WrappedAlign64Type<T> {
    type Target = T;

    fn deref(&self) -> &<Self as Deref>::Target {
        &self.0
    }
}

impl<T> DerefMut for WrappedAlign64Type<T> {
    fn deref_mut(&mut self) -> &mut <Self as Deref>::Target {
        &mut self.0
    }
}

pub fn get_cur_microseconds_time() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000) as i64
}

#[inline]
pub fn pause() {
    hint::spin_loop();
}

#[cfg(test)]
mod test {
    use super::*;
    use std::mem;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_align() {
        let v = WrappedAlign64Type(0u8);
        assert_eq!(&v as *const _ as usize % 64, 0);
        assert_eq!(mem::size_of::<WrappedAlign64Type<u8>>(), 64);
    }

    #[test]
    fn test_thread_id_stable() {
        let tid = get_thread_id();
        assert!(tid >= 0);
        assert_eq!(tid, get_thread_id());
    }

    #[test]
    fn test_thread_id_reused() {
        let before = GLOBAL_THREAD_ID.load(Ordering::SeqCst);
        for _ in 0..200 {
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || tx.send(get_thread_id()).unwrap())
                .join()
                .unwrap();
            assert!(rx.recv().unwrap() >= 0);
        }
        // only threads alive at the same time may need fresh ids
        assert!(GLOBAL_THREAD_ID.load(Ordering::SeqCst) - before < 100);
    }

    #[test]
    fn test_time() {
        let t = get_cur_microseconds_time();
        assert!(t > 0);
    }
}
