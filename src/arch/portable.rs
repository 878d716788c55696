//! Targets where the compiler's own atomics are the hardware encoding.
//!
//! On load-linked/store-conditional machines (ARMv7+, AArch64, RISC-V,
//! POWER) the compiler emits the exclusive pair and its retry loop for
//! every read-modify-write below.

use std::sync::atomic::Ordering::{Relaxed, SeqCst};
use std::sync::atomic::{fence, AtomicU32};

use super::Primitive;
use crate::word::AtomicWord32;

pub const NAME: &str = "portable";

#[inline(always)]
pub(crate) fn epilogue() {
    if crate::fence::enabled() {
        fence(SeqCst);
    }
}

macro_rules! portable_primitive {
    ($word:ty, $ty:ty, $atomic:ty) => {
        impl $word {
            #[inline(always)]
            fn atomic(&self) -> &$atomic {
                // Same size, and the word's alignment is at least the
                // atomic's.
                unsafe { &*(self.as_ptr() as *const $atomic) }
            }
        }

        impl Primitive for $word {
            type Value = $ty;

            #[inline(always)]
            fn read(&self) -> $ty {
                self.atomic().load(Relaxed)
            }

            #[inline(always)]
            fn write(&self, value: $ty) {
                self.atomic().store(value, Relaxed)
            }

            #[inline(always)]
            fn read_write(&self, value: $ty) -> $ty {
                let previous = self.atomic().swap(value, SeqCst);
                epilogue();
                previous
            }

            #[inline(always)]
            fn read_if_equal_write(&self, old: $ty, new: $ty) -> $ty {
                let observed = match self.atomic().compare_exchange(old, new, SeqCst, SeqCst) {
                    Ok(v) => v,
                    Err(v) => v,
                };
                epilogue();
                observed
            }

            #[inline(always)]
            fn and(&self, mask: $ty) {
                self.atomic().fetch_and(mask, SeqCst);
                epilogue();
            }

            #[inline(always)]
            fn or(&self, mask: $ty) {
                self.atomic().fetch_or(mask, SeqCst);
                epilogue();
            }

            #[inline(always)]
            fn xor(&self, mask: $ty) {
                self.atomic().fetch_xor(mask, SeqCst);
                epilogue();
            }

            #[inline(always)]
            fn add(&self, value: $ty) {
                self.atomic().fetch_add(value, SeqCst);
                epilogue();
            }

            #[inline(always)]
            fn sub(&self, value: $ty) {
                self.atomic().fetch_sub(value, SeqCst);
                epilogue();
            }

            #[inline(always)]
            fn fetch_add_unfenced(&self, value: $ty) -> $ty {
                self.atomic().fetch_add(value, SeqCst)
            }
        }
    };
}

portable_primitive!(AtomicWord32, u32, AtomicU32);

#[cfg(target_has_atomic = "64")]
portable_primitive!(crate::word::AtomicWord64, u64, std::sync::atomic::AtomicU64);
