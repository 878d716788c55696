use atomic_wait::{wait, wake_all, wake_one};
use std::sync::atomic::AtomicU32;

use super::{futex, MutexGuard};
use crate::word::AtomicWord32;

/// A condition variable for [`Mutex`](super::Mutex).
///
/// Waiters sleep on a sequence word; a notification bumps it and wakes.
/// While nobody waits, notifying touches neither word's futex.
pub struct Condvar {
    seq: AtomicWord32,
    waiters: AtomicWord32,
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            seq: AtomicWord32::new(0),
            waiters: AtomicWord32::new(0),
        }
    }

    pub fn notify_one(&self) {
        self.notify(wake_one);
    }

    pub fn notify_all(&self) {
        self.notify(wake_all);
    }

    // A waiter registers while holding the mutex and the notifier has just
    // released it, so a zero count here really means nobody is waiting.
    fn notify(&self, wake: fn(*const AtomicU32)) {
        if self.waiters.read() != 0 {
            self.seq.inc();
            wake(futex(&self.seq));
        }
    }

    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.waiters.inc();
        let seq = self.seq.read();
        // The futex returns at once if a notify moved seq past our read.
        let guard = guard.unlocked(|| wait(futex(&self.seq), seq));
        self.waiters.dec();
        guard
    }

    /// Waits until `condition` returns false, rechecking after every wakeup.
    pub fn wait_while<'a, T, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        mut condition: F,
    ) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut *guard) {
            guard = self.wait(guard);
        }
        guard
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn notify_without_waiters_is_free() {
    let condvar = Condvar::new();
    condvar.notify_one();
    condvar.notify_all();
    assert_eq!(condvar.seq.read(), 0);
}

#[test]
fn consumer_sleeps_until_items_arrive() {
    use super::Mutex;
    use std::collections::VecDeque;
    use std::thread;
    use std::time::Duration;

    let queue = Mutex::new(VecDeque::new());
    let ready = Condvar::new();
    let mut wakeups = 0;

    thread::scope(|s| {
        s.spawn(|| {
            for item in 1..=3 {
                thread::sleep(Duration::from_millis(20));
                queue.lock().push_back(item);
                ready.notify_one();
            }
        });

        let mut received = Vec::new();
        let mut q = queue.lock();
        while received.len() < 3 {
            match q.pop_front() {
                Some(item) => received.push(item),
                None => {
                    q = ready.wait(q);
                    wakeups += 1;
                }
            }
        }
        assert_eq!(received, [1, 2, 3]);
    });

    // Slept rather than spun, give or take a few spurious wakeups.
    assert!(wakeups < 20, "wakeups = {wakeups}");
    assert_eq!(ready.waiters.read(), 0);
}

#[test]
fn wait_while_sees_every_notifier() {
    use super::Mutex;
    use std::thread;

    let remaining = Mutex::new(4);
    let condvar = Condvar::new();

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                *remaining.lock() -= 1;
                condvar.notify_all();
            });
        }
        let guard = condvar.wait_while(remaining.lock(), |n| *n > 0);
        assert_eq!(*guard, 0);
    });
}
