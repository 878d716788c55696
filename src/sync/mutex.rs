use atomic_wait::{wait, wake_one};
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};

use super::futex;
use crate::word::AtomicWord32;

const UNLOCKED: u32 = 0;
/// Held, nobody asleep on the word.
const LOCKED: u32 = 1;
/// Held, and whoever unlocks has to wake a sleeper.
const CONTENDED: u32 = 2;

const SPIN_LIMIT: u32 = 100;

/// A futex mutex whose state is one atomic word.
///
/// Taking it is one compare-and-swap from `UNLOCKED` to `LOCKED`, releasing
/// it one exchange back to `UNLOCKED`. Only when the exchange hands back
/// `CONTENDED` is there a system call.
pub struct Mutex<T> {
    state: AtomicWord32,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for Mutex<T> where T: Send {}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

unsafe impl<T> Sync for MutexGuard<'_, T> where T: Sync {}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<'a, T> MutexGuard<'a, T> {
    /// Releases the lock around `f` and takes it again afterwards.
    pub(super) fn unlocked(self, f: impl FnOnce()) -> Self {
        let mutex = self.mutex;
        drop(self);
        f();
        mutex.lock()
    }
}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicWord32::new(UNLOCKED),
            value: UnsafeCell::new(value),
        }
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        if !self.state.compare_exchange(UNLOCKED, LOCKED) {
            self.lock_contended();
        }
        MutexGuard { mutex: self }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        match self.state.read_if_equal_write(UNLOCKED, LOCKED) {
            UNLOCKED => Some(MutexGuard { mutex: self }),
            _ => None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.read() != UNLOCKED
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    #[cold]
    fn lock_contended(&self) {
        // A holder with no sleepers is likely to let go soon; watch the word
        // with plain reads for a while. Once somebody sleeps, spinning has
        // already failed for them.
        for _ in 0..SPIN_LIMIT {
            match self.state.read() {
                UNLOCKED if self.state.compare_exchange(UNLOCKED, LOCKED) => return,
                CONTENDED => break,
                _ => std::hint::spin_loop(),
            }
        }

        // We can't tell any more whether others sleep, so every acquisition
        // from here marks the word contended.
        while self.state.read_write(CONTENDED) != UNLOCKED {
            wait(futex(&self.state), CONTENDED);
        }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        let state = &self.mutex.state;
        if state.read_write(UNLOCKED) == CONTENDED {
            wake_one(futex(state));
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

#[test]
fn state_follows_the_guard() {
    let m = Mutex::new(vec![1]);
    {
        let mut guard = m.lock();
        guard.push(2);
        assert_eq!(m.state.read(), LOCKED);
        assert!(m.try_lock().is_none());
    }
    assert_eq!(m.state.read(), UNLOCKED);
    assert_eq!(format!("{m:?}"), "Mutex { locked: false, .. }");
    assert_eq!(m.into_inner(), [1, 2]);
}

#[test]
fn blocked_locker_marks_the_word_contended() {
    use std::thread;
    use std::time::Duration;

    let m = Mutex::new(0);
    thread::scope(|s| {
        let mut guard = m.lock();
        let waiter = s.spawn(|| *m.lock() += 1);
        // Long past the spin phase, the waiter is asleep on the word.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(m.state.read(), CONTENDED);
        *guard = 10;
        drop(guard);
        waiter.join().unwrap();
    });
    assert_eq!(m.state.read(), UNLOCKED);
    assert_eq!(*m.lock(), 11);
}

#[test]
fn no_update_lost_under_contention() {
    use std::thread;

    let m = Mutex::new(Vec::new());
    std::hint::black_box(&m);
    thread::scope(|s| {
        for id in 0..4u32 {
            let m = &m;
            s.spawn(move || {
                for i in 0..10_000 {
                    m.lock().push((id, i));
                }
            });
        }
    });
    let mut all = m.into_inner();
    assert_eq!(all.len(), 40_000);
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 40_000);
}
