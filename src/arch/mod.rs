//! The hardware primitive layer.
//!
//! [`Primitive`] is the single interface every backend implements for
//! [`AtomicWord32`](crate::AtomicWord32) and, where the target has one, the
//! 64-bit word. A backend must provide `read` and `read_if_equal_write`;
//! everything else defaults to the compare-and-swap loop `cas_loop` and is
//! overridden wherever the instruction set has a direct encoding. The
//! [`derived`](crate::derived) operations are built on the same loop.
//!
//! Backends never disable interrupts. Every operation is one locked
//! instruction, an exclusive load/store pair, or a retry loop over one.

use crate::word::Bits;

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
        mod x86;
        pub(crate) use x86::epilogue;
        pub use x86::NAME;
    } else if #[cfg(target_has_atomic = "32")] {
        mod portable;
        pub(crate) use portable::epilogue;
        pub use portable::NAME;
    } else if #[cfg(all(target_arch = "arm", target_os = "linux"))] {
        mod kuser;
        pub(crate) use kuser::epilogue;
        pub use kuser::NAME;
    } else {
        compile_error!("vm-atomic has no atomic backend for this target");
    }
}

/// Replaces the value with `f(value)` through compare-and-swap, retrying
/// from whatever the failed swap observed, and returns the value `f` was
/// applied to.
#[inline]
pub(crate) fn cas_loop<W: Primitive>(var: &W, f: impl Fn(W::Value) -> W::Value) -> W::Value {
    let mut current = var.read();
    loop {
        let observed = var.read_if_equal_write(current, f(current));
        if observed == current {
            return current;
        }
        current = observed;
    }
}

mod private {
    pub trait Sealed {}

    impl Sealed for crate::word::AtomicWord32 {}

    word64! {
        impl Sealed for crate::word::AtomicWord64 {}
    }
}

/// The operation set one backend implements for one word width.
pub trait Primitive: private::Sealed + Sync + Sized {
    type Value: Bits;

    fn read(&self) -> Self::Value;

    /// Compare-and-swap returning the value observed at the comparison.
    fn read_if_equal_write(&self, old: Self::Value, new: Self::Value) -> Self::Value;

    fn write(&self, value: Self::Value) {
        cas_loop(self, |_| value);
    }

    fn read_write(&self, value: Self::Value) -> Self::Value {
        cas_loop(self, |_| value)
    }

    fn compare_exchange(&self, old: Self::Value, new: Self::Value) -> bool {
        self.read_if_equal_write(old, new) == old
    }

    fn and(&self, mask: Self::Value) {
        cas_loop(self, |v| v & mask);
    }

    fn or(&self, mask: Self::Value) {
        cas_loop(self, |v| v | mask);
    }

    fn xor(&self, mask: Self::Value) {
        cas_loop(self, |v| v ^ mask);
    }

    fn add(&self, value: Self::Value) {
        cas_loop(self, |v| v.wrapping_add(value));
    }

    fn sub(&self, value: Self::Value) {
        cas_loop(self, |v| v.wrapping_sub(value));
    }

    fn inc(&self) {
        self.add(Self::Value::ONE)
    }

    fn dec(&self) {
        self.sub(Self::Value::ONE)
    }

    /// Adds `value` and returns the previous contents without applying the
    /// fence policy afterwards.
    fn fetch_add_unfenced(&self, value: Self::Value) -> Self::Value {
        cas_loop(self, |v| v.wrapping_add(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AtomicWord32;

    #[test]
    fn backend_has_a_name() {
        assert!(!NAME.is_empty());
    }

    #[test]
    fn cas_loop_returns_input_of_the_winning_attempt() {
        let w = AtomicWord32::new(6);
        assert_eq!(cas_loop(&w, |v| v * 7), 6);
        assert_eq!(w.read(), 42);
    }

    #[test]
    fn primitive_is_usable_generically() {
        fn bump<W: Primitive>(w: &W) -> W::Value {
            w.inc();
            w.read()
        }

        let w = AtomicWord32::new(41);
        assert_eq!(bump(&w), 42);
    }
}
