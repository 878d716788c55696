//! Atomics over logical types.
//!
//! [`Atomic<T>`] stores a `T` in the backing word `T::Word` and forwards
//! every operation to it with a bit-preserving cast. There is no runtime
//! cost over using the word directly: the only check, that `T` is exactly
//! as wide as its word, happens at build time.
//!
//! ```
//! use vm_atomic::{AtomicInt, AtomicPtr};
//!
//! let count = AtomicInt::new(-1);
//! count.inc();
//! assert_eq!(count.read(), 0);
//!
//! let mut slot = 5u8;
//! let ptr: AtomicPtr<u8> = AtomicPtr::new(std::ptr::null_mut());
//! assert!(ptr.read_write(&mut slot).is_null());
//! assert_eq!(unsafe { *ptr.read() }, 5);
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;

use crate::arch::Primitive;
use crate::derived;
use crate::word::{AtomicWord, AtomicWord32};

#[cfg(target_pointer_width = "64")]
type PtrWord = crate::word::AtomicWord64;
#[cfg(target_pointer_width = "32")]
type PtrWord = AtomicWord32;

type BitsOf<T> = <<T as AtomicValue>::Word as Primitive>::Value;

/// A type that can live in an atomic word.
///
/// # Safety
///
/// `from_bits(into_bits(v))` must give back `v`, and any bit pattern stored
/// by one thread must be a valid `Self` when read by another. The type must
/// be exactly as wide as `Word`'s value; [`Atomic::new`] refuses to build
/// otherwise.
pub unsafe trait AtomicValue: Copy {
    type Word: AtomicWord;

    fn into_bits(self) -> BitsOf<Self>;
    fn from_bits(bits: BitsOf<Self>) -> Self;
}

macro_rules! atomic_value {
    ($word:ty => $($ty:ty),*) => {
        $(
            unsafe impl AtomicValue for $ty {
                type Word = $word;

                #[inline(always)]
                fn into_bits(self) -> BitsOf<Self> {
                    self as BitsOf<Self>
                }

                #[inline(always)]
                fn from_bits(bits: BitsOf<Self>) -> Self {
                    bits as $ty
                }
            }
        )*
    };
}

atomic_value!(AtomicWord32 => u32, i32);
atomic_value!(PtrWord => usize, isize);

word64! {
    atomic_value!(crate::word::AtomicWord64 => u64, i64);
}

unsafe impl<P> AtomicValue for *mut P {
    type Word = PtrWord;

    #[inline(always)]
    fn into_bits(self) -> BitsOf<Self> {
        self as usize as BitsOf<Self>
    }

    #[inline(always)]
    fn from_bits(bits: BitsOf<Self>) -> Self {
        bits as usize as *mut P
    }
}

/// A `T` that is only ever accessed atomically.
#[repr(transparent)]
pub struct Atomic<T: AtomicValue> {
    word: T::Word,
    _value: PhantomData<T>,
}

// The word is Sync and AtomicValue promises the bits are shareable.
unsafe impl<T: AtomicValue> Send for Atomic<T> {}
unsafe impl<T: AtomicValue> Sync for Atomic<T> {}

/// The atomic counterpart of a C `int`.
pub type AtomicInt = Atomic<i32>;

/// A pointer-sized atomic, backed by the 64-bit word on 64-bit targets.
pub type AtomicPtr<P> = Atomic<*mut P>;

impl<T: AtomicValue> Atomic<T> {
    const WIDTH_MATCHES: () = assert!(
        size_of::<T>() == size_of::<BitsOf<T>>(),
        "atomic value type must be exactly as wide as its backing word",
    );

    pub fn new(value: T) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::WIDTH_MATCHES;
        Self {
            word: <T::Word as AtomicWord>::from_value(value.into_bits()),
            _value: PhantomData,
        }
    }

    /// The backing word, for composing with word-level operations.
    pub fn as_word(&self) -> &T::Word {
        &self.word
    }

    #[inline]
    pub fn read(&self) -> T {
        T::from_bits(self.word.read())
    }

    #[inline]
    pub fn write(&self, value: T) {
        self.word.write(value.into_bits())
    }

    #[inline]
    pub fn read_write(&self, value: T) -> T {
        T::from_bits(self.word.read_write(value.into_bits()))
    }

    /// Compare-and-swap; returns the value seen at the comparison.
    #[inline]
    pub fn read_if_equal_write(&self, old: T, new: T) -> T {
        T::from_bits(self.word.read_if_equal_write(old.into_bits(), new.into_bits()))
    }

    #[inline]
    pub fn and(&self, value: T) {
        self.word.and(value.into_bits())
    }

    #[inline]
    pub fn or(&self, value: T) {
        self.word.or(value.into_bits())
    }

    #[inline]
    pub fn xor(&self, value: T) {
        self.word.xor(value.into_bits())
    }

    #[inline]
    pub fn add(&self, value: T) {
        self.word.add(value.into_bits())
    }

    #[inline]
    pub fn sub(&self, value: T) {
        self.word.sub(value.into_bits())
    }

    #[inline]
    pub fn inc(&self) {
        self.word.inc()
    }

    #[inline]
    pub fn dec(&self) {
        self.word.dec()
    }

    #[inline]
    pub fn fetch_and_or(&self, value: T) -> T {
        T::from_bits(derived::fetch_and_or(&self.word, value.into_bits()))
    }

    #[inline]
    pub fn fetch_and_add(&self, value: T) -> T {
        T::from_bits(derived::fetch_and_add(&self.word, value.into_bits()))
    }

    #[inline]
    pub fn fetch_and_inc(&self) -> T {
        T::from_bits(derived::fetch_and_inc(&self.word))
    }

    #[inline]
    pub fn fetch_and_dec(&self) -> T {
        T::from_bits(derived::fetch_and_dec(&self.word))
    }
}

impl<T: AtomicValue + Default> Default for Atomic<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: AtomicValue + fmt::Debug> fmt::Debug for Atomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Atomic").field(&self.read()).finish()
    }
}
