//! Captured CPUID leaves and the capability checks the monitor runs on
//! them.
//!
//! Everything here is a pure function over a [`CpuidSummary`] that was
//! captured once, so the checks can run anywhere (and be tested) without
//! executing `cpuid` again.

pub const VENDOR_AMD: &[u8; 12] = b"AuthenticAMD";
pub const VENDOR_INTEL: &[u8; 12] = b"GenuineIntel";

pub const FAMILY_P6: u32 = 6;
pub const FAMILY_PENTIUM4: u32 = 0x0f;
pub const FAMILY_K8: u32 = 0x0f;
pub const FAMILY_K8L: u32 = 0x10;
pub const FAMILY_K8_MOBILE: u32 = 0x11;

/// EDX bit of leaf 1: the package has more than one logical processor.
pub const FEATURE_ID1EDX_HT: u32 = 1 << 28;

pub const LEAF_CACHE_PARAMS: u32 = 4;
pub const LEAF_EXT_ADDR_SIZES: u32 = 0x8000_0008;

/// Nehalem-class models of Intel family 6.
const NEHALEM_MODELS: [u32; 4] = [0x1a, 0x1e, 0x1f, 0x2e];

/// The first model number of the K8 revision that fixed locked-instruction
/// ordering.
const K8_LOCK_ORDERING_FIXED_MODEL: u32 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuidRegs {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Leaf 0: highest basic leaf and the vendor string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cpuid0 {
    pub num_entries: u32,
    pub name: [u8; 12],
}

/// Leaf 1: version and feature words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cpuid1 {
    pub version: u32,
    pub ebx: u32,
    pub ecx_features: u32,
    pub edx_features: u32,
}

/// Leaf 0x80000000: highest extended leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cpuid80 {
    pub num_entries: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Leaf 0x80000001: extended features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cpuid81 {
    pub eax: u32,
    pub ebx: u32,
    pub ecx_features: u32,
    pub edx_features: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuidSummary {
    pub id0: Cpuid0,
    pub id1: Cpuid1,
    /// Leaf 4, subleaf 0.
    pub id4: CpuidRegs,
    /// Leaf 0xa.
    pub ida: CpuidRegs,
    pub id80: Cpuid80,
    pub id81: Cpuid81,
    pub id88: CpuidRegs,
    pub id8a: CpuidRegs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageTopology {
    pub cores_per_package: u32,
    pub threads_per_core: u32,
}

impl PackageTopology {
    const SINGLE: Self = Self {
        cores_per_package: 1,
        threads_per_core: 1,
    };
}

/// Rebuilds the leaf-0 registers; the vendor string is spread over EBX,
/// EDX, ECX in that order.
pub fn regs_from_id0(id0: &Cpuid0) -> CpuidRegs {
    let word = |i: usize| {
        u32::from_le_bytes([id0.name[i], id0.name[i + 1], id0.name[i + 2], id0.name[i + 3]])
    };
    CpuidRegs {
        eax: id0.num_entries,
        ebx: word(0),
        edx: word(4),
        ecx: word(8),
    }
}

fn vendor_of(id0: &CpuidRegs) -> [u8; 12] {
    let mut name = [0; 12];
    name[0..4].copy_from_slice(&id0.ebx.to_le_bytes());
    name[4..8].copy_from_slice(&id0.edx.to_le_bytes());
    name[8..12].copy_from_slice(&id0.ecx.to_le_bytes());
    name
}

pub fn is_vendor_amd(id0: &CpuidRegs) -> bool {
    &vendor_of(id0) == VENDOR_AMD
}

pub fn is_vendor_intel(id0: &CpuidRegs) -> bool {
    &vendor_of(id0) == VENDOR_INTEL
}

/// Base family plus extended family.
pub fn family(version: u32) -> u32 {
    ((version >> 8) & 0xf) + ((version >> 20) & 0xff)
}

/// Base model plus extended model in the high nibble.
pub fn model(version: u32) -> u32 {
    ((version >> 4) & 0xf) | ((version >> 12) & 0xf0)
}

pub fn is_pentium4(version: u32) -> bool {
    family(version) == FAMILY_PENTIUM4
}

pub fn is_k8(version: u32) -> bool {
    family(version) == FAMILY_K8
}

/// K8 and the families derived from it.
pub fn is_k8star(version: u32) -> bool {
    matches!(family(version), FAMILY_K8 | FAMILY_K8L | FAMILY_K8_MOBILE)
}

pub fn is_nehalem(version: u32) -> bool {
    family(version) == FAMILY_P6 && NEHALEM_MODELS.contains(&model(version))
}

impl CpuidSummary {
    pub fn id0_regs(&self) -> CpuidRegs {
        regs_from_id0(&self.id0)
    }

    /// Whether writing the MC0_CTL machine-check register is known to be
    /// safe: all AMD parts, and Intel Pentium 4 and Nehalem. P6 through
    /// Penryn are known not to be; anything else is unknown and reported
    /// unsafe.
    pub fn safe_to_use_mc0_ctl(&self) -> bool {
        let id0 = self.id0_regs();
        let version = self.id1.version;
        is_vendor_amd(&id0)
            || (is_vendor_intel(&id0) && (is_pentium4(version) || is_nehalem(version)))
    }

    pub fn amd_cores_per_package(&self) -> PackageTopology {
        if is_k8star(self.id1.version) && self.id80.num_entries >= LEAF_EXT_ADDR_SIZES {
            PackageTopology {
                cores_per_package: (self.id88.ecx & 0xff) + 1,
                threads_per_core: 1,
            }
        } else {
            PackageTopology::SINGLE
        }
    }

    /// Multi-core parts set the HT bit even without hyperthreading, and the
    /// logical count in leaf 1 covers the whole package, so it is divided
    /// by the core count from leaf 4.
    pub fn intel_cores_per_package(&self) -> PackageTopology {
        if self.id1.edx_features & FEATURE_ID1EDX_HT == 0 {
            return PackageTopology::SINGLE;
        }
        let logical = ((self.id1.ebx >> 16) & 0xff).max(1);
        if self.id0.num_entries < LEAF_CACHE_PARAMS {
            return PackageTopology {
                cores_per_package: 1,
                threads_per_core: logical,
            };
        }
        let cores = ((self.id4.eax >> 26) & 0x3f) + 1;
        PackageTopology {
            cores_per_package: cores,
            threads_per_core: (logical / cores).max(1),
        }
    }

    pub fn cores_per_package(&self) -> PackageTopology {
        let id0 = self.id0_regs();
        if is_vendor_amd(&id0) {
            self.amd_cores_per_package()
        } else if is_vendor_intel(&id0) {
            self.intel_cores_per_package()
        } else {
            PackageTopology::SINGLE
        }
    }
}

/// Whether locked instructions need a trailing `lfence`: AMD K8 before
/// the revision that fixed it.
pub fn requires_lock_fence(summary: &CpuidSummary) -> bool {
    let version = summary.id1.version;
    is_vendor_amd(&summary.id0_regs())
        && is_k8(version)
        && model(version) < K8_LOCK_ORDERING_FIXED_MODEL
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
impl CpuidSummary {
    /// Executes `cpuid` for every leaf the summary holds. Leaves beyond the
    /// processor's maximum are left zeroed.
    #[allow(unused_unsafe)]
    pub fn capture() -> Self {
        #[cfg(target_arch = "x86")]
        use std::arch::x86::{__cpuid, __cpuid_count};
        #[cfg(target_arch = "x86_64")]
        use std::arch::x86_64::{__cpuid, __cpuid_count};

        let regs = |leaf: u32, subleaf: u32| {
            let r = unsafe { __cpuid_count(leaf, subleaf) };
            CpuidRegs {
                eax: r.eax,
                ebx: r.ebx,
                ecx: r.ecx,
                edx: r.edx,
            }
        };

        let r0 = unsafe { __cpuid(0) };
        let regs0 = CpuidRegs {
            eax: r0.eax,
            ebx: r0.ebx,
            ecx: r0.ecx,
            edx: r0.edx,
        };
        let mut summary = CpuidSummary {
            id0: Cpuid0 {
                num_entries: regs0.eax,
                name: vendor_of(&regs0),
            },
            ..Default::default()
        };

        let max_basic = regs0.eax;
        if max_basic >= 1 {
            let r = regs(1, 0);
            summary.id1 = Cpuid1 {
                version: r.eax,
                ebx: r.ebx,
                ecx_features: r.ecx,
                edx_features: r.edx,
            };
        }
        if max_basic >= LEAF_CACHE_PARAMS {
            summary.id4 = regs(LEAF_CACHE_PARAMS, 0);
        }
        if max_basic >= 0xa {
            summary.ida = regs(0xa, 0);
        }

        let r = regs(0x8000_0000, 0);
        summary.id80 = Cpuid80 {
            num_entries: r.eax,
            ebx: r.ebx,
            ecx: r.ecx,
            edx: r.edx,
        };
        let max_ext = r.eax;
        if max_ext >= 0x8000_0001 {
            let r = regs(0x8000_0001, 0);
            summary.id81 = Cpuid81 {
                eax: r.eax,
                ebx: r.ebx,
                ecx_features: r.ecx,
                edx_features: r.edx,
            };
        }
        if max_ext >= LEAF_EXT_ADDR_SIZES {
            summary.id88 = regs(LEAF_EXT_ADDR_SIZES, 0);
        }
        if max_ext >= 0x8000_000a {
            summary.id8a = regs(0x8000_000a, 0);
        }

        tracing::trace!(
            vendor = %String::from_utf8_lossy(&summary.id0.name),
            version = summary.id1.version,
            "captured cpuid summary"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a leaf-1 version word from its fields.
    fn version(family: u32, model: u32) -> u32 {
        let (base_family, ext_family) = if family >= 0xf {
            (0xf, family - 0xf)
        } else {
            (family, 0)
        };
        (ext_family << 20) | ((model >> 4) << 16) | (base_family << 8) | ((model & 0xf) << 4)
    }

    fn summary(vendor: &[u8; 12], version: u32) -> CpuidSummary {
        CpuidSummary {
            id0: Cpuid0 {
                num_entries: 0xb,
                name: *vendor,
            },
            id1: Cpuid1 {
                version,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn version_fields_decode() {
        let v = version(0x10, 0x42);
        assert_eq!(family(v), 0x10);
        assert_eq!(model(v), 0x42);
        assert!(is_k8star(v));
        assert!(!is_k8(v));
        assert!(is_nehalem(version(6, 0x1a)));
        assert!(!is_nehalem(version(6, 0x17)));
    }

    #[test]
    fn vendor_round_trips_through_registers() {
        let s = summary(VENDOR_AMD, 0);
        let regs = s.id0_regs();
        assert_eq!(&regs.ebx.to_le_bytes(), b"Auth");
        assert_eq!(&regs.edx.to_le_bytes(), b"enti");
        assert_eq!(&regs.ecx.to_le_bytes(), b"cAMD");
        assert!(is_vendor_amd(&regs));
        assert!(!is_vendor_intel(&regs));
    }

    #[test]
    fn mc0_ctl_safety() {
        assert!(summary(VENDOR_AMD, version(6, 0)).safe_to_use_mc0_ctl());
        assert!(summary(VENDOR_INTEL, version(0xf, 2)).safe_to_use_mc0_ctl());
        assert!(summary(VENDOR_INTEL, version(6, 0x1e)).safe_to_use_mc0_ctl());
        // Core 2.
        assert!(!summary(VENDOR_INTEL, version(6, 0x0f)).safe_to_use_mc0_ctl());
        assert!(!summary(b"CentaurHauls", version(6, 0x0f)).safe_to_use_mc0_ctl());
    }

    #[test]
    fn amd_core_count() {
        let mut s = summary(VENDOR_AMD, version(0x10, 2));
        s.id80.num_entries = 0x8000_0008;
        s.id88.ecx = 3;
        assert_eq!(
            s.cores_per_package(),
            PackageTopology {
                cores_per_package: 4,
                threads_per_core: 1
            }
        );
        // Extended leaf not available.
        s.id80.num_entries = 0x8000_0004;
        assert_eq!(s.cores_per_package(), PackageTopology::SINGLE);
    }

    #[test]
    fn intel_core_count() {
        let mut s = summary(VENDOR_INTEL, version(6, 0x1a));
        assert_eq!(s.cores_per_package(), PackageTopology::SINGLE);

        s.id1.edx_features = FEATURE_ID1EDX_HT;
        s.id1.ebx = 16 << 16;
        s.id4.eax = 7 << 26;
        assert_eq!(
            s.cores_per_package(),
            PackageTopology {
                cores_per_package: 8,
                threads_per_core: 2
            }
        );

        s.id0.num_entries = 2;
        assert_eq!(
            s.intel_cores_per_package(),
            PackageTopology {
                cores_per_package: 1,
                threads_per_core: 16
            }
        );
    }

    #[test]
    fn lock_fence_only_for_early_k8() {
        assert!(requires_lock_fence(&summary(VENDOR_AMD, version(0xf, 0x21))));
        assert!(!requires_lock_fence(&summary(VENDOR_AMD, version(0xf, 0x41))));
        assert!(!requires_lock_fence(&summary(VENDOR_AMD, version(0x10, 0x02))));
        assert!(!requires_lock_fence(&summary(VENDOR_INTEL, version(0xf, 0x02))));
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    #[test]
    fn capture_reads_a_known_layout() {
        let s = CpuidSummary::capture();
        assert!(s.id0.num_entries >= 1);
        assert_eq!(regs_from_id0(&s.id0).eax, s.id0.num_entries);
        // Whatever the vendor, the derived topology is never zero.
        let topo = s.cores_per_package();
        assert!(topo.cores_per_package >= 1);
        assert!(topo.threads_per_core >= 1);
    }
}
