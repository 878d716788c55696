//! Operations built from compare-and-swap.
//!
//! Every function here is the primitive layer's retry loop: take the
//! current value, compute the new one, and try to swap it in with
//! [`read_if_equal_write`](Primitive::read_if_equal_write). If another
//! thread got in between, the swap returns what it wrote and we go again
//! from there.
//!
//! The loop is lock-free but not wait-free. Some thread always makes
//! progress, but a single caller can in principle retry forever under
//! pathological contention. Retries are unbounded and nothing here blocks.

use crate::arch::{self, Primitive};
use crate::word::Bits;

/// Replaces the value with `f(value)` and returns the value `f` was
/// applied to.
///
/// `f` may run more than once and must not have side effects.
#[inline]
pub fn fetch_update<W: Primitive>(var: &W, f: impl Fn(W::Value) -> W::Value) -> W::Value {
    arch::cas_loop(var, f)
}

#[inline]
pub fn fetch_and_or<W: Primitive>(var: &W, mask: W::Value) -> W::Value {
    fetch_update(var, |v| v | mask)
}

#[inline]
pub fn fetch_and_and<W: Primitive>(var: &W, mask: W::Value) -> W::Value {
    fetch_update(var, |v| v & mask)
}

#[inline]
pub fn fetch_and_xor<W: Primitive>(var: &W, mask: W::Value) -> W::Value {
    fetch_update(var, |v| v ^ mask)
}

/// Adds `value` and returns the previous value, followed by the fence the
/// policy asks for.
#[inline]
pub fn fetch_and_add<W: Primitive>(var: &W, value: W::Value) -> W::Value {
    let previous = var.fetch_add_unfenced(value);
    arch::epilogue();
    previous
}

#[inline]
pub fn fetch_and_sub<W: Primitive>(var: &W, value: W::Value) -> W::Value {
    fetch_update(var, |v| v.wrapping_sub(value))
}

#[inline]
pub fn fetch_and_inc<W: Primitive>(var: &W) -> W::Value {
    fetch_and_add(var, W::Value::ONE)
}

/// `lock xadd` of -1 where the backend has it, like [`fetch_and_inc`].
#[inline]
pub fn fetch_and_dec<W: Primitive>(var: &W) -> W::Value {
    fetch_and_add(var, W::Value::ZERO.wrapping_sub(W::Value::ONE))
}
