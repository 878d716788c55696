//! Compare-and-swap synthesized from an exclusive exchange.
//!
//! Some processors have no compare-and-swap instruction, only an
//! "exchange if unchanged" facility that may also fail for reasons other
//! than a mismatch (the ARM Linux kernel helper at `0xffff0fc0` is one).
//! [`read_if_equal_write`] turns such a facility into a compare-and-swap
//! with the usual contract: it returns the value observed at the
//! comparison, and it only reports success if `old` was replaced by `new`
//! in one indivisible step.

/// An "exchange if unchanged" facility for one 32-bit word.
pub trait ExclusiveExchange {
    /// Reads the current contents of the word.
    fn load(&self) -> u32;

    /// Stores `new` if the word still holds `old`, and returns whether the
    /// store committed. May fail even when the word holds `old`.
    fn try_exchange(&self, old: u32, new: u32) -> bool;
}

/// Optimistic retry: read, give up on a mismatch, otherwise attempt the
/// exchange and start over if it did not commit.
pub fn read_if_equal_write<X: ExclusiveExchange + ?Sized>(word: &X, old: u32, new: u32) -> u32 {
    loop {
        let current = word.load();
        if current != old {
            return current;
        }
        if word.try_exchange(old, new) {
            return old;
        }
    }
}

/// Applies `f` to the current value until an exchange commits, returning
/// the value `f` was applied to.
pub fn fetch_update<X: ExclusiveExchange + ?Sized>(word: &X, f: impl Fn(u32) -> u32) -> u32 {
    loop {
        let current = word.load();
        if word.try_exchange(current, f(current)) {
            return current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering::{Relaxed, SeqCst};
    use std::thread;

    /// Fails the first `failures` exchanges regardless of the word's value.
    struct Flaky {
        word: AtomicU32,
        failures: AtomicU32,
        attempts: AtomicU32,
    }

    impl Flaky {
        fn new(value: u32, failures: u32) -> Self {
            Self {
                word: AtomicU32::new(value),
                failures: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
            }
        }
    }

    impl ExclusiveExchange for Flaky {
        fn load(&self) -> u32 {
            self.word.load(SeqCst)
        }

        fn try_exchange(&self, old: u32, new: u32) -> bool {
            self.attempts.fetch_add(1, Relaxed);
            let spurious = self
                .failures
                .fetch_update(Relaxed, Relaxed, |n| n.checked_sub(1))
                .is_ok();
            !spurious && self.word.compare_exchange(old, new, SeqCst, SeqCst).is_ok()
        }
    }

    #[test]
    fn mismatch_fails_without_exchanging() {
        let w = Flaky::new(3, 0);
        assert_eq!(read_if_equal_write(&w, 4, 10), 3);
        assert_eq!(w.attempts.load(Relaxed), 0);
        assert_eq!(w.load(), 3);
    }

    #[test]
    fn spurious_failures_are_retried() {
        let w = Flaky::new(3, 5);
        assert_eq!(read_if_equal_write(&w, 3, 10), 3);
        assert_eq!(w.attempts.load(Relaxed), 6);
        assert_eq!(w.load(), 10);
    }

    #[test]
    fn retry_rechecks_the_value() {
        // The first exchange fails and the value moves on before the retry.
        struct Interfering {
            inner: Flaky,
        }

        impl ExclusiveExchange for Interfering {
            fn load(&self) -> u32 {
                self.inner.load()
            }

            fn try_exchange(&self, old: u32, new: u32) -> bool {
                if self.inner.attempts.load(Relaxed) == 0 {
                    self.inner.attempts.fetch_add(1, Relaxed);
                    self.inner.word.store(old + 1, SeqCst);
                    return false;
                }
                self.inner.try_exchange(old, new)
            }
        }

        let w = Interfering {
            inner: Flaky::new(7, 0),
        };
        assert_eq!(read_if_equal_write(&w, 7, 0), 8);
        assert_eq!(w.load(), 8);
    }

    #[test]
    fn fetch_update_from_many_threads() {
        let w = Flaky::new(0, 100);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        fetch_update(&w, |v| v + 1);
                    }
                });
            }
        });
        assert_eq!(w.load(), 4000);
    }
}
