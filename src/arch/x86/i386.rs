//! 64-bit words on a 32-bit host.
//!
//! The only 64-bit atomic instruction available is `lock cmpxchg8b`, which
//! takes the expected value in EDX:EAX and the desired value in ECX:EBX.
//! Read is one `cmpxchg8b` that can only ever write back what is already
//! there; every other operation is a compare-and-swap retry loop over it.

use std::arch::asm;

use super::epilogue;
use crate::arch::Primitive;
use crate::word::{AtomicWord64, DoubleWord};

/// Double-width compare-and-exchange. Returns the halves observed in memory,
/// which equal `expected` iff the store happened.
#[inline(always)]
fn cmpxchg8b(word: &AtomicWord64, expected: DoubleWord, desired: DoubleWord) -> DoubleWord {
    let observed = cmpxchg8b_unfenced(word, expected, desired);
    epilogue();
    observed
}

#[inline(always)]
fn cmpxchg8b_unfenced(
    word: &AtomicWord64,
    expected: DoubleWord,
    desired: DoubleWord,
) -> DoubleWord {
    let low: u32;
    let high: u32;
    // ESI is reserved by LLVM on x86, so the address goes in EDI.
    unsafe {
        asm!(
            "lock cmpxchg8b qword ptr [edi]",
            in("edi") word.as_ptr(),
            inout("eax") expected.low => low,
            inout("edx") expected.high => high,
            in("ebx") desired.low,
            in("ecx") desired.high,
            options(nostack),
        );
    }
    DoubleWord { low, high }
}

impl Primitive for AtomicWord64 {
    type Value = u64;

    #[inline(always)]
    fn read(&self) -> u64 {
        // If the word is zero this stores zero back, otherwise it fails and
        // loads the current value. Either way the load is a single access.
        cmpxchg8b(self, DoubleWord::default(), DoubleWord::default()).join()
    }

    #[inline(always)]
    fn read_if_equal_write(&self, old: u64, new: u64) -> u64 {
        cmpxchg8b(self, DoubleWord::split(old), DoubleWord::split(new)).join()
    }

    #[inline(always)]
    fn compare_exchange(&self, old: u64, new: u64) -> bool {
        let expected = DoubleWord::split(old);
        // Both halves have to match; a change in either one fails the swap.
        cmpxchg8b(self, expected, DoubleWord::split(new)) == expected
    }

    /// The loop runs on the bare instruction; the caller fences once, if at
    /// all.
    #[inline(always)]
    fn fetch_add_unfenced(&self, value: u64) -> u64 {
        let mut current = cmpxchg8b_unfenced(self, DoubleWord::default(), DoubleWord::default());
        loop {
            let desired = DoubleWord::split(current.join().wrapping_add(value));
            let observed = cmpxchg8b_unfenced(self, current, desired);
            if observed == current {
                return current.join();
            }
            current = observed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derived;

    #[test]
    fn unfenced_add_carries_into_the_high_half() {
        let w = AtomicWord64::new(u32::MAX as u64);
        assert_eq!(w.fetch_add_unfenced(1), u32::MAX as u64);
        assert_eq!(w.read(), 1 << 32);
        assert_eq!(derived::fetch_and_dec(&w), 1 << 32);
        assert_eq!(w.read(), u32::MAX as u64);
    }

    #[test]
    fn read_leaves_a_nonzero_word_alone() {
        let w = AtomicWord64::new(0x1234_5678_9abc_def0);
        assert_eq!(Primitive::read(&w), 0x1234_5678_9abc_def0);
        let raw = cmpxchg8b_unfenced(&w, DoubleWord::default(), DoubleWord::split(7));
        assert_eq!(raw.join(), 0x1234_5678_9abc_def0);
        assert_eq!(w.read(), 0x1234_5678_9abc_def0);
    }
}
