//! Lock-free atomic primitives for hypervisor support code.
//!
//! The crate is layered bottom-up:
//!
//! - [`arch`]: one hardware backend per target (read, write, exchange,
//!   compare-and-swap, bitwise ops), chosen at build time.
//! - [`fence`]: the process-wide switch deciding whether a fence follows
//!   every locked instruction.
//! - [`derived`]: operations with no direct encoding, built as
//!   compare-and-swap retry loops.
//! - [`typed`]: [`Atomic<T>`] binds a backing word to a logical type.
//!
//! [`cpuid`], [`vcpu`] and [`blocklist`] are small consumers that live next
//! to the atomics in the driver sources.

/// Expands the given items only on targets that have a 64-bit primitive.
///
/// 32-bit x86 gets one through `cmpxchg8b`; everything else relies on the
/// compiler's own 64-bit atomics.
macro_rules! word64 {
    ($($item:item)*) => {
        $(
            #[cfg(any(
                target_arch = "x86",
                target_arch = "x86_64",
                target_has_atomic = "64",
            ))]
            $item
        )*
    };
}

pub mod arch;
#[cfg(unix)]
pub mod blocklist;
pub mod cpuid;
pub mod derived;
pub mod exchange;
pub mod fence;
pub mod sync;
pub mod typed;
pub mod vcpu;
pub mod word;

pub use fence::{FenceMode, FencePolicy, FenceState};
pub use typed::{Atomic, AtomicInt, AtomicPtr, AtomicValue};
pub use word::{AtomicWord, AtomicWord32, Bits, DoubleWord};

word64! {
    pub use word::AtomicWord64;
}
