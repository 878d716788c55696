//! Blocking locks for the parts of the crate that may sleep.
//!
//! The atomics never block. The file-block registry does: a thread opening
//! a blocked path waits until the block is gone. The locks here keep their
//! state in an [`AtomicWord32`] and sleep on that same word through
//! `atomic_wait`.

use std::sync::atomic::AtomicU32;

use crate::word::AtomicWord32;

mod condvar;
mod mutex;

pub use condvar::Condvar;
pub use mutex::{Mutex, MutexGuard};

/// The futex view of a word.
fn futex(word: &AtomicWord32) -> &AtomicU32 {
    // Same size and alignment, and the word is only ever accessed
    // atomically.
    unsafe { AtomicU32::from_ptr(word.as_ptr()) }
}
