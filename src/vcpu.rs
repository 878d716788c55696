//! Virtual CPU ids and a lock-free set of them.

use std::fmt;

use crate::word::AtomicWord32;

/// Upper bound on virtual CPUs per VM; a [`VcpuSet`] is one bit per vCPU
/// in a single 32-bit word.
pub const MAX_VCPUS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vcpuid(pub u32);

impl Vcpuid {
    pub const INVALID: Self = Self(!0);
    pub const BOOT: Self = Self(0);

    pub fn is_boot(self) -> bool {
        self == Self::BOOT
    }

    pub fn is_valid(self) -> bool {
        self.0 < MAX_VCPUS
    }

    fn bit(self) -> u32 {
        assert!(self.is_valid(), "vcpu id {} out of range", self.0);
        1 << self.0
    }
}

impl fmt::Display for Vcpuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vcpu{}", self.0)
    }
}

/// A set of vCPUs that any thread may modify.
///
/// Every operation is a single atomic access on the backing word, so two
/// threads inserting different vCPUs never lose each other's update.
/// Out-of-range ids panic.
#[derive(Default)]
pub struct VcpuSet {
    bits: AtomicWord32,
}

impl VcpuSet {
    pub const fn new() -> Self {
        Self {
            bits: AtomicWord32::new(0),
        }
    }

    pub fn from_bits(bits: u32) -> Self {
        Self {
            bits: AtomicWord32::new(bits & Self::all_bits()),
        }
    }

    fn all_bits() -> u32 {
        (1 << MAX_VCPUS) - 1
    }

    /// Returns `true` if the vCPU was not already present.
    pub fn insert(&self, vcpu: Vcpuid) -> bool {
        let bit = vcpu.bit();
        self.bits.fetch_and_or(bit) & bit == 0
    }

    /// Returns `true` if the vCPU was present.
    pub fn remove(&self, vcpu: Vcpuid) -> bool {
        let bit = vcpu.bit();
        self.bits.fetch_and_and(!bit) & bit != 0
    }

    pub fn contains(&self, vcpu: Vcpuid) -> bool {
        self.bits.read() & vcpu.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits.read() == 0
    }

    pub fn len(&self) -> usize {
        self.bits.read().count_ones() as usize
    }

    /// Empties the set, returning what it held.
    pub fn take(&self) -> Vcpus {
        Vcpus(self.bits.read_write(0))
    }

    pub fn snapshot(&self) -> Vcpus {
        Vcpus(self.bits.read())
    }
}

impl fmt::Debug for VcpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.snapshot()).finish()
    }
}

/// A point-in-time copy of a [`VcpuSet`], iterated in ascending id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vcpus(u32);

impl Vcpus {
    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, vcpu: Vcpuid) -> bool {
        vcpu.is_valid() && self.0 & (1 << vcpu.0) != 0
    }
}

impl Iterator for Vcpus {
    type Item = Vcpuid;

    fn next(&mut self) -> Option<Vcpuid> {
        if self.0 == 0 {
            return None;
        }
        let id = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(Vcpuid(id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Vcpus {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn insert_and_remove() {
        let set = VcpuSet::new();
        assert!(set.is_empty());
        assert!(set.insert(Vcpuid::BOOT));
        assert!(!set.insert(Vcpuid::BOOT));
        assert!(set.insert(Vcpuid(3)));
        assert_eq!(set.len(), 2);
        assert!(set.contains(Vcpuid(3)));
        assert!(!set.contains(Vcpuid(2)));
        assert!(set.remove(Vcpuid(3)));
        assert!(!set.remove(Vcpuid(3)));
        assert_eq!(set.snapshot().collect::<Vec<_>>(), [Vcpuid::BOOT]);
    }

    #[test]
    fn take_empties() {
        let set = VcpuSet::from_bits(0b1010_0101);
        let taken = set.take();
        assert!(set.is_empty());
        assert_eq!(taken.len(), 4);
        assert_eq!(
            taken.collect::<Vec<_>>(),
            [Vcpuid(0), Vcpuid(2), Vcpuid(5), Vcpuid(7)]
        );
    }

    #[test]
    fn from_bits_drops_out_of_range() {
        let set = VcpuSet::from_bits(!0);
        assert_eq!(set.len(), MAX_VCPUS as usize);
        assert!(!set.snapshot().contains(Vcpuid::INVALID));
    }

    #[test]
    #[should_panic]
    fn invalid_id_panics() {
        VcpuSet::new().insert(Vcpuid::INVALID);
    }

    #[test]
    fn concurrent_inserts_are_all_kept() {
        let set = VcpuSet::new();
        thread::scope(|s| {
            for id in 0..MAX_VCPUS {
                let set = &set;
                s.spawn(move || {
                    for _ in 0..1000 {
                        set.insert(Vcpuid(id));
                        set.remove(Vcpuid(id));
                    }
                    assert!(set.insert(Vcpuid(id)));
                });
            }
        });
        assert_eq!(set.snapshot().bits(), 0xff);
        assert!(Vcpuid::BOOT.is_boot());
        assert_eq!(Vcpuid(5).to_string(), "vcpu5");
    }
}
