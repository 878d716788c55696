//! The raw atomic words.
//!
//! An atomic word is caller-allocated storage whose every access goes
//! through the hardware primitive layer. It has value semantics: embed it
//! in a structure or a static, there is no separate lifecycle.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Not};

use crate::arch::Primitive;
use crate::derived;

mod private {
    pub trait Sealed {}
}

/// An unsigned machine word the primitive layer can operate on.
pub trait Bits:
    private::Sealed
    + Copy
    + Eq
    + fmt::Debug
    + fmt::LowerHex
    + Send
    + Sync
    + BitAnd<Output = Self>
    + BitOr<Output = Self>
    + BitXor<Output = Self>
    + Not<Output = Self>
    + 'static
{
    const ZERO: Self;
    const ONE: Self;
    const BITS: u32;

    fn wrapping_add(self, other: Self) -> Self;
    fn wrapping_sub(self, other: Self) -> Self;
}

macro_rules! impl_bits {
    ($($ty:ty),*) => {
        $(
            impl private::Sealed for $ty {}

            impl Bits for $ty {
                const ZERO: Self = 0;
                const ONE: Self = 1;
                const BITS: u32 = <$ty>::BITS;

                #[inline(always)]
                fn wrapping_add(self, other: Self) -> Self {
                    <$ty>::wrapping_add(self, other)
                }

                #[inline(always)]
                fn wrapping_sub(self, other: Self) -> Self {
                    <$ty>::wrapping_sub(self, other)
                }
            }
        )*
    };
}

impl_bits!(u32, u64);

/// A 64-bit value split into the halves a double-word compare-and-exchange
/// consumes on a 32-bit host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoubleWord {
    pub low: u32,
    pub high: u32,
}

impl DoubleWord {
    pub const fn split(value: u64) -> Self {
        Self {
            low: value as u32,
            high: (value >> 32) as u32,
        }
    }

    pub const fn join(self) -> u64 {
        (self.high as u64) << 32 | self.low as u64
    }
}

impl From<u64> for DoubleWord {
    fn from(value: u64) -> Self {
        Self::split(value)
    }
}

impl From<DoubleWord> for u64 {
    fn from(halves: DoubleWord) -> Self {
        halves.join()
    }
}

/// A word an [`Atomic`](crate::Atomic) can be built on.
pub trait AtomicWord: Primitive {
    fn from_value(value: Self::Value) -> Self;
}

/// A 32-bit word that is only ever accessed atomically.
#[repr(C, align(4))]
pub struct AtomicWord32 {
    value: UnsafeCell<u32>,
}

word64! {
    /// A 64-bit word that is only ever accessed atomically.
    ///
    /// Always 8-byte aligned, which `cmpxchg8b` requires on 32-bit hosts.
    #[repr(C, align(8))]
    pub struct AtomicWord64 {
        value: UnsafeCell<u64>,
    }
}

macro_rules! word_ops {
    ($word:ident, $ty:ty, $bits:literal) => {
        // Every access to `value` goes through the primitive layer.
        unsafe impl Sync for $word {}

        impl $word {
            pub const fn new(value: $ty) -> Self {
                Self {
                    value: UnsafeCell::new(value),
                }
            }

            /// Views caller-owned storage as an atomic word.
            ///
            /// # Safety
            ///
            /// `ptr` must be valid for reads and writes for `'a`, aligned to
            #[doc = concat!("`align_of::<", stringify!($word), ">()`,")]
            /// and must not be accessed non-atomically while the returned
            /// reference is alive.
            pub unsafe fn from_ptr<'a>(ptr: *mut $ty) -> &'a Self {
                debug_assert_eq!(ptr as usize % std::mem::align_of::<Self>(), 0);
                &*(ptr as *const Self)
            }

            pub const fn as_ptr(&self) -> *mut $ty {
                self.value.get()
            }

            pub fn get_mut(&mut self) -> &mut $ty {
                self.value.get_mut()
            }

            pub fn into_inner(self) -> $ty {
                self.value.into_inner()
            }

            /// Torn-free load with no ordering beyond the load itself.
            #[inline]
            pub fn read(&self) -> $ty {
                Primitive::read(self)
            }

            /// Torn-free store.
            #[inline]
            pub fn write(&self, value: $ty) {
                Primitive::write(self, value)
            }

            /// Stores `value` and returns the previous contents.
            #[inline]
            pub fn read_write(&self, value: $ty) -> $ty {
                Primitive::read_write(self, value)
            }

            /// Replaces the contents with `new` if they equal `old`.
            ///
            /// Returns the value observed at the comparison; the swap happened
            /// iff that equals `old`.
            #[inline]
            pub fn read_if_equal_write(&self, old: $ty, new: $ty) -> $ty {
                Primitive::read_if_equal_write(self, old, new)
            }

            /// Like [`read_if_equal_write`](Self::read_if_equal_write) but only
            /// reports whether the swap happened.
            #[inline]
            pub fn compare_exchange(&self, old: $ty, new: $ty) -> bool {
                Primitive::compare_exchange(self, old, new)
            }

            #[inline]
            pub fn and(&self, mask: $ty) {
                Primitive::and(self, mask)
            }

            #[inline]
            pub fn or(&self, mask: $ty) {
                Primitive::or(self, mask)
            }

            #[inline]
            pub fn xor(&self, mask: $ty) {
                Primitive::xor(self, mask)
            }

            #[inline]
            pub fn add(&self, value: $ty) {
                Primitive::add(self, value)
            }

            #[inline]
            pub fn sub(&self, value: $ty) {
                Primitive::sub(self, value)
            }

            #[inline]
            pub fn inc(&self) {
                Primitive::inc(self)
            }

            #[inline]
            pub fn dec(&self) {
                Primitive::dec(self)
            }

            /// Ors `mask` in and returns the previous value.
            #[inline]
            pub fn fetch_and_or(&self, mask: $ty) -> $ty {
                derived::fetch_and_or(self, mask)
            }

            /// Ands `mask` in and returns the previous value.
            #[inline]
            pub fn fetch_and_and(&self, mask: $ty) -> $ty {
                derived::fetch_and_and(self, mask)
            }

            #[inline]
            pub fn fetch_and_xor(&self, mask: $ty) -> $ty {
                derived::fetch_and_xor(self, mask)
            }

            /// Adds `value`, returns the previous value, and applies the fence
            /// policy afterwards.
            #[inline]
            pub fn fetch_and_add(&self, value: $ty) -> $ty {
                derived::fetch_and_add(self, value)
            }

            /// [`fetch_and_add`](Self::fetch_and_add) without the trailing
            /// fence, for callers that fence around a group of operations.
            #[inline]
            pub fn fetch_and_add_unfenced(&self, value: $ty) -> $ty {
                Primitive::fetch_add_unfenced(self, value)
            }

            #[inline]
            pub fn fetch_and_inc(&self) -> $ty {
                derived::fetch_and_inc(self)
            }

            #[inline]
            pub fn fetch_and_dec(&self) -> $ty {
                derived::fetch_and_dec(self)
            }
        }

        impl AtomicWord for $word {
            fn from_value(value: $ty) -> Self {
                Self::new(value)
            }
        }

        impl Default for $word {
            fn default() -> Self {
                Self::new(0)
            }
        }

        impl From<$ty> for $word {
            fn from(value: $ty) -> Self {
                Self::new(value)
            }
        }

        impl fmt::Debug for $word {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($word), self.read())
            }
        }

        const _: () = assert!(std::mem::size_of::<$word>() * 8 == $bits);
    };
}

word_ops!(AtomicWord32, u32, 32);

word64! {
    word_ops!(AtomicWord64, u64, 64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn write_then_read() {
        let w = AtomicWord32::new(7);
        w.write(0xdead_beef);
        assert_eq!(w.read(), 0xdead_beef);
    }

    #[test]
    fn read_write_returns_previous() {
        let w = AtomicWord32::new(1);
        assert_eq!(w.read_write(2), 1);
        assert_eq!(w.read_write(3), 2);
        assert_eq!(w.read(), 3);
    }

    #[test]
    fn read_if_equal_write_reports_observed_value() {
        let w = AtomicWord32::new(5);
        // Mismatch leaves the word alone.
        assert_eq!(w.read_if_equal_write(4, 9), 5);
        assert_eq!(w.read(), 5);
        assert_eq!(w.read_if_equal_write(5, 9), 5);
        assert_eq!(w.read(), 9);
        assert!(!w.compare_exchange(5, 1));
        assert!(w.compare_exchange(9, 1));
        assert_eq!(w.read(), 1);
    }

    #[test]
    fn bitwise_and_arithmetic() {
        let w = AtomicWord32::new(0b1100);
        w.and(0b0100);
        assert_eq!(w.read(), 0b0100);
        w.or(0b0011);
        assert_eq!(w.read(), 0b0111);
        w.xor(0b0101);
        assert_eq!(w.read(), 0b0010);
        w.add(10);
        w.sub(2);
        w.inc();
        w.inc();
        w.dec();
        assert_eq!(w.read(), 11);
        w.sub(12);
        assert_eq!(w.read(), u32::MAX);
    }

    #[test]
    fn fetch_and_and_zero_clears_all_bits() {
        let w = AtomicWord32::new(0xFFFF_FFFF);
        assert_eq!(w.fetch_and_and(0), 0xFFFF_FFFF);
        assert_eq!(w.read(), 0);
    }

    #[test]
    fn fetch_ops_return_previous() {
        let w = AtomicWord32::new(0x10);
        assert_eq!(w.fetch_and_or(0x01), 0x10);
        assert_eq!(w.fetch_and_xor(0x11), 0x11);
        assert_eq!(w.fetch_and_add(5), 0);
        assert_eq!(w.fetch_and_add_unfenced(5), 5);
        assert_eq!(w.fetch_and_inc(), 10);
        assert_eq!(w.fetch_and_dec(), 11);
        assert_eq!(w.read(), 10);
    }

    #[test]
    fn two_threads_increment_from_zero() {
        let w = AtomicWord32::new(0);
        thread::scope(|s| {
            s.spawn(|| w.inc());
            s.spawn(|| w.inc());
        });
        assert_eq!(w.read(), 2);
    }

    #[test]
    fn from_ptr_views_plain_storage() {
        let mut raw = 41u32;
        let w = unsafe { AtomicWord32::from_ptr(&mut raw) };
        w.inc();
        assert_eq!(w.read(), 42);
        assert_eq!(raw, 42);
    }

    #[test]
    fn double_word_halves() {
        let halves = DoubleWord::split(0x0123_4567_89ab_cdef);
        assert_eq!(halves.low, 0x89ab_cdef);
        assert_eq!(halves.high, 0x0123_4567);
        assert_eq!(halves.join(), 0x0123_4567_89ab_cdef);
    }

    word64! {
        #[test]
        fn word64_is_eight_byte_aligned() {
            assert_eq!(std::mem::align_of::<AtomicWord64>(), 8);
            let words = [AtomicWord64::new(0), AtomicWord64::new(0)];
            assert_eq!(words.as_ptr() as usize % 8, 0);
        }

        #[test]
        fn word64_compare_exchange_sees_single_half_changes() {
            let w = AtomicWord64::new(0x0000_0001_0000_0001);

            // Only the high half differs from the expected value.
            assert!(!w.compare_exchange(0x0000_0002_0000_0001, 0));
            // Only the low half differs.
            assert!(!w.compare_exchange(0x0000_0001_0000_0002, 0));
            assert_eq!(w.read(), 0x0000_0001_0000_0001);

            assert!(w.compare_exchange(0x0000_0001_0000_0001, 0xffff_ffff_0000_0000));
            assert_eq!(w.read_if_equal_write(0xffff_ffff_0000_0001, 3), 0xffff_ffff_0000_0000);
            assert_eq!(w.read(), 0xffff_ffff_0000_0000);
        }

        #[test]
        fn word64_carries_across_halves() {
            let w = AtomicWord64::new(u32::MAX as u64);
            w.inc();
            assert_eq!(w.read(), 1 << 32);
            w.dec();
            assert_eq!(w.read(), u32::MAX as u64);
            assert_eq!(w.fetch_and_add(1 << 32), u32::MAX as u64);
            assert_eq!(w.read_write(7), (1 << 32) + u32::MAX as u64);
            assert_eq!(w.fetch_and_dec(), 7);
            assert_eq!(w.fetch_and_or(1 << 63), 6);
            w.and(!1);
            w.xor(1 << 63);
            assert_eq!(w.read(), 6);
        }

        #[test]
        fn word64_fetch_and_add_from_many_threads() {
            let w = AtomicWord64::new(u32::MAX as u64 - 100);
            thread::scope(|s| {
                for t in 1..=8u64 {
                    let w = &w;
                    s.spawn(move || {
                        for _ in 0..1000 {
                            w.fetch_and_add(t);
                        }
                    });
                }
            });
            assert_eq!(w.read(), u32::MAX as u64 - 100 + 1000 * 36);
        }
    }
}
