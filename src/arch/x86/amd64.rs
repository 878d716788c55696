//! Native quadword encodings.

use std::arch::asm;

use super::epilogue;
use crate::arch::Primitive;
use crate::word::AtomicWord64;

impl Primitive for AtomicWord64 {
    type Value = u64;

    #[inline(always)]
    fn read(&self) -> u64 {
        let value: u64;
        unsafe {
            asm!(
                "mov {value}, qword ptr [{ptr}]",
                ptr = in(reg) self.as_ptr(),
                value = lateout(reg) value,
                options(nostack, preserves_flags, readonly),
            );
        }
        value
    }

    #[inline(always)]
    fn write(&self, value: u64) {
        unsafe {
            asm!(
                "mov qword ptr [{ptr}], {value}",
                ptr = in(reg) self.as_ptr(),
                value = in(reg) value,
                options(nostack, preserves_flags),
            );
        }
    }

    #[inline(always)]
    fn read_write(&self, value: u64) -> u64 {
        let mut value = value;
        unsafe {
            asm!(
                "xchg qword ptr [{ptr}], {value}",
                ptr = in(reg) self.as_ptr(),
                value = inout(reg) value,
                options(nostack, preserves_flags),
            );
        }
        epilogue();
        value
    }

    #[inline(always)]
    fn read_if_equal_write(&self, old: u64, new: u64) -> u64 {
        let observed: u64;
        unsafe {
            asm!(
                "lock cmpxchg qword ptr [{ptr}], {new}",
                ptr = in(reg) self.as_ptr(),
                new = in(reg) new,
                inout("rax") old => observed,
                options(nostack),
            );
        }
        epilogue();
        observed
    }

    #[inline(always)]
    fn and(&self, mask: u64) {
        unsafe {
            asm!(
                "lock and qword ptr [{ptr}], {mask}",
                ptr = in(reg) self.as_ptr(),
                mask = in(reg) mask,
                options(nostack),
            );
        }
        epilogue();
    }

    #[inline(always)]
    fn or(&self, mask: u64) {
        unsafe {
            asm!(
                "lock or qword ptr [{ptr}], {mask}",
                ptr = in(reg) self.as_ptr(),
                mask = in(reg) mask,
                options(nostack),
            );
        }
        epilogue();
    }

    #[inline(always)]
    fn xor(&self, mask: u64) {
        unsafe {
            asm!(
                "lock xor qword ptr [{ptr}], {mask}",
                ptr = in(reg) self.as_ptr(),
                mask = in(reg) mask,
                options(nostack),
            );
        }
        epilogue();
    }

    #[inline(always)]
    fn add(&self, value: u64) {
        unsafe {
            asm!(
                "lock add qword ptr [{ptr}], {value}",
                ptr = in(reg) self.as_ptr(),
                value = in(reg) value,
                options(nostack),
            );
        }
        epilogue();
    }

    #[inline(always)]
    fn sub(&self, value: u64) {
        unsafe {
            asm!(
                "lock sub qword ptr [{ptr}], {value}",
                ptr = in(reg) self.as_ptr(),
                value = in(reg) value,
                options(nostack),
            );
        }
        epilogue();
    }

    #[inline(always)]
    fn inc(&self) {
        unsafe {
            asm!(
                "lock inc qword ptr [{ptr}]",
                ptr = in(reg) self.as_ptr(),
                options(nostack),
            );
        }
        epilogue();
    }

    #[inline(always)]
    fn dec(&self) {
        unsafe {
            asm!(
                "lock dec qword ptr [{ptr}]",
                ptr = in(reg) self.as_ptr(),
                options(nostack),
            );
        }
        epilogue();
    }

    #[inline(always)]
    fn fetch_add_unfenced(&self, value: u64) -> u64 {
        let mut value = value;
        unsafe {
            asm!(
                "lock xadd qword ptr [{ptr}], {value}",
                ptr = in(reg) self.as_ptr(),
                value = inout(reg) value,
                options(nostack),
            );
        }
        value
    }
}
