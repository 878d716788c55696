//! ARM Linux without exclusive load/store.
//!
//! The kernel maps an exchange helper at a fixed address in every process;
//! it is the same code the kernel uses for its own atomics. Compare-and-swap
//! is synthesized from it in [`exchange`](crate::exchange), and everything
//! else falls back to the compare-and-swap retry loop. There is no 64-bit word on
//! this backend, so 64-bit uses fail to build.

use std::ptr;

use super::Primitive;
use crate::exchange::{self, ExclusiveExchange};
use crate::word::AtomicWord32;

pub const NAME: &str = "arm-kuser";

/// Returns 0 iff `*ptr` held `old` and now holds `new`.
type KernelCmpxchg = unsafe extern "C" fn(old: u32, new: u32, ptr: *mut u32) -> i32;

const KUSER_CMPXCHG: usize = 0xffff_0fc0;

#[inline(always)]
pub(crate) fn epilogue() {}

impl ExclusiveExchange for AtomicWord32 {
    #[inline(always)]
    fn load(&self) -> u32 {
        unsafe { ptr::read_volatile(self.as_ptr()) }
    }

    #[inline(always)]
    fn try_exchange(&self, old: u32, new: u32) -> bool {
        let helper: KernelCmpxchg = unsafe { std::mem::transmute(KUSER_CMPXCHG) };
        unsafe { helper(old, new, self.as_ptr()) == 0 }
    }
}

impl Primitive for AtomicWord32 {
    type Value = u32;

    #[inline(always)]
    fn read(&self) -> u32 {
        ExclusiveExchange::load(self)
    }

    #[inline(always)]
    fn write(&self, value: u32) {
        unsafe { ptr::write_volatile(self.as_ptr(), value) }
    }

    #[inline(always)]
    fn read_if_equal_write(&self, old: u32, new: u32) -> u32 {
        exchange::read_if_equal_write(self, old, new)
    }

    #[inline(always)]
    fn fetch_add_unfenced(&self, value: u32) -> u32 {
        exchange::fetch_update(self, |v| v.wrapping_add(value))
    }
}
