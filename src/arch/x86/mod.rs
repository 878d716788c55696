//! x86 and x86-64 encodings.
//!
//! The 32-bit operations are identical on both; the 64-bit word uses native
//! `lock`-prefixed quadword instructions on x86-64 ([`amd64`]) and
//! `lock cmpxchg8b` on 32-bit hosts ([`i386`]).
//!
//! Locked instructions are full barriers on x86, so none of the blocks
//! below pass `nomem`. The only extra ordering is the optional `lfence`
//! some K8 parts need after a locked instruction.

use std::arch::asm;

use super::Primitive;
use crate::fence;
use crate::word::AtomicWord32;

#[cfg(target_arch = "x86_64")]
mod amd64;
#[cfg(target_arch = "x86")]
mod i386;

#[cfg(target_arch = "x86_64")]
pub const NAME: &str = "x86_64";
#[cfg(target_arch = "x86")]
pub const NAME: &str = "x86";

/// Runs after every locked instruction.
#[inline(always)]
pub(crate) fn epilogue() {
    if fence::enabled() {
        lfence();
    }
}

#[cold]
fn lfence() {
    unsafe { asm!("lfence", options(nostack, preserves_flags)) };
}

impl Primitive for AtomicWord32 {
    type Value = u32;

    #[inline(always)]
    fn read(&self) -> u32 {
        let value: u32;
        unsafe {
            asm!(
                "mov {value:e}, dword ptr [{ptr}]",
                ptr = in(reg) self.as_ptr(),
                value = lateout(reg) value,
                options(nostack, preserves_flags, readonly),
            );
        }
        value
    }

    #[inline(always)]
    fn write(&self, value: u32) {
        unsafe {
            asm!(
                "mov dword ptr [{ptr}], {value:e}",
                ptr = in(reg) self.as_ptr(),
                value = in(reg) value,
                options(nostack, preserves_flags),
            );
        }
    }

    #[inline(always)]
    fn read_write(&self, value: u32) -> u32 {
        let mut value = value;
        // xchg with a memory operand is implicitly locked.
        unsafe {
            asm!(
                "xchg dword ptr [{ptr}], {value:e}",
                ptr = in(reg) self.as_ptr(),
                value = inout(reg) value,
                options(nostack, preserves_flags),
            );
        }
        epilogue();
        value
    }

    #[inline(always)]
    fn read_if_equal_write(&self, old: u32, new: u32) -> u32 {
        let observed: u32;
        unsafe {
            asm!(
                "lock cmpxchg dword ptr [{ptr}], {new:e}",
                ptr = in(reg) self.as_ptr(),
                new = in(reg) new,
                inout("eax") old => observed,
                options(nostack),
            );
        }
        epilogue();
        observed
    }

    #[inline(always)]
    fn and(&self, mask: u32) {
        unsafe {
            asm!(
                "lock and dword ptr [{ptr}], {mask:e}",
                ptr = in(reg) self.as_ptr(),
                mask = in(reg) mask,
                options(nostack),
            );
        }
        epilogue();
    }

    #[inline(always)]
    fn or(&self, mask: u32) {
        unsafe {
            asm!(
                "lock or dword ptr [{ptr}], {mask:e}",
                ptr = in(reg) self.as_ptr(),
                mask = in(reg) mask,
                options(nostack),
            );
        }
        epilogue();
    }

    #[inline(always)]
    fn xor(&self, mask: u32) {
        unsafe {
            asm!(
                "lock xor dword ptr [{ptr}], {mask:e}",
                ptr = in(reg) self.as_ptr(),
                mask = in(reg) mask,
                options(nostack),
            );
        }
        epilogue();
    }

    #[inline(always)]
    fn add(&self, value: u32) {
        unsafe {
            asm!(
                "lock add dword ptr [{ptr}], {value:e}",
                ptr = in(reg) self.as_ptr(),
                value = in(reg) value,
                options(nostack),
            );
        }
        epilogue();
    }

    #[inline(always)]
    fn sub(&self, value: u32) {
        unsafe {
            asm!(
                "lock sub dword ptr [{ptr}], {value:e}",
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
                "lock inc dword ptr [{ptr}]",
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
                "lock dec dword ptr [{ptr}]",
                ptr = in(reg) self.as_ptr(),
                options(nostack),
            );
        }
        epilogue();
    }

    #[inline(always)]
    fn fetch_add_unfenced(&self, value: u32) -> u32 {
        let mut value = value;
        unsafe {
            asm!(
                "lock xadd dword ptr [{ptr}], {value:e}",
                ptr = in(reg) self.as_ptr(),
                value = inout(reg) value,
                options(nostack),
            );
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lfence_between_locked_ops() {
        let w = AtomicWord32::new(1);
        assert_eq!(w.read_write(2), 1);
        lfence();
        assert_eq!(w.read_if_equal_write(2, 3), 2);
        lfence();
        w.add(1);
        assert_eq!(w.read(), 4);
    }

    #[test]
    fn xadd_wraps() {
        let w = AtomicWord32::new(u32::MAX);
        assert_eq!(Primitive::fetch_add_unfenced(&w, 2), u32::MAX);
        assert_eq!(w.read(), 1);
    }
}
