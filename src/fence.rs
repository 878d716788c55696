//! Whether a fence follows every locked instruction.
//!
//! Some AMD K8 processors can let a load pass a preceding locked
//! instruction. The workaround is an `lfence` after every locked operation,
//! which nobody else should pay for, so it is a process-wide switch:
//!
//! - [`init`] works out whether the running processor needs it. It is cheap,
//!   can be called any number of times, and only acts the first time.
//! - [`set_fence`] forces the answer. It always wins over [`init`], whether
//!   it runs before, after, or between calls to it.
//!
//! The hot path reads one byte.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering::Relaxed;

use thiserror::Error;

use crate::AtomicWord32;

const UNINITIALIZED: u8 = 0;
const DISABLED: u8 = 1;
const ENABLED: u8 = 2;

/// Environment variable read by [`FenceMode::from_env`].
pub const FENCE_ENV: &str = "VM_ATOMIC_FENCE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    Uninitialized,
    Disabled,
    Enabled,
}

impl FenceState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            UNINITIALIZED => Self::Uninitialized,
            DISABLED => Self::Disabled,
            _ => Self::Enabled,
        }
    }
}

fn raw(enabled: bool) -> u8 {
    if enabled {
        ENABLED
    } else {
        DISABLED
    }
}

/// One fence switch. The crate's atomics consult [`policy()`]; separate
/// instances are only useful for testing the state machine.
pub struct FencePolicy {
    state: AtomicU8,
}

impl FencePolicy {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINITIALIZED),
        }
    }

    /// Installs the detected requirement unless the policy has already been
    /// decided. Returns whether fencing is on afterwards.
    pub fn init(&self) -> bool {
        self.init_with(processor_requires_fence)
    }

    /// [`init`](Self::init) with a caller-supplied detector. The detector
    /// only runs while the policy is undecided.
    pub fn init_with(&self, detect: impl FnOnce() -> bool) -> bool {
        if self.state.load(Relaxed) != UNINITIALIZED {
            return self.use_fence();
        }
        let needed = detect();
        // A concurrent set_fence got there first; keep its answer.
        match self
            .state
            .compare_exchange(UNINITIALIZED, raw(needed), Relaxed, Relaxed)
        {
            Ok(_) => {
                tracing::debug!(fence = needed, "atomic fence policy initialized");
                needed
            }
            Err(current) => current == ENABLED,
        }
    }

    pub fn set_fence(&self, enabled: bool) {
        tracing::debug!(fence = enabled, "atomic fence policy set");
        self.state.store(raw(enabled), Relaxed);
    }

    pub fn state(&self) -> FenceState {
        FenceState::from_raw(self.state.load(Relaxed))
    }

    #[inline(always)]
    pub fn use_fence(&self) -> bool {
        self.state.load(Relaxed) == ENABLED
    }
}

impl Default for FencePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FencePolicy")
            .field("state", &self.state())
            .finish()
    }
}

static POLICY: FencePolicy = FencePolicy::new();

/// The policy every atomic operation in this crate consults.
pub fn policy() -> &'static FencePolicy {
    &POLICY
}

#[inline(always)]
pub(crate) fn enabled() -> bool {
    POLICY.use_fence()
}

/// Decides the global policy from the running processor if nothing has yet.
pub fn init() -> bool {
    POLICY.init()
}

/// Forces the global policy.
pub fn set_fence(enabled: bool) {
    POLICY.set_fence(enabled)
}

/// Whether the running processor needs a fence after locked instructions.
pub fn processor_requires_fence() -> bool {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        crate::cpuid::requires_lock_fence(&crate::cpuid::CpuidSummary::capture())
    }
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    {
        false
    }
}

/// Full memory fence built from a locked XOR, which every supported
/// processor has even when it lacks a dedicated fence instruction.
pub fn mfence() {
    let scratch = AtomicWord32::new(0);
    scratch.xor(1);
}

/// How the global policy should be decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FenceMode {
    /// Detect from the processor.
    #[default]
    Auto,
    On,
    Off,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid fence mode {0:?}, expected auto, on or off")]
pub struct ParseFenceModeError(String);

impl FromStr for FenceMode {
    type Err = ParseFenceModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "on" | "true" | "1" => Ok(Self::On),
            "off" | "false" | "0" => Ok(Self::Off),
            _ => Err(ParseFenceModeError(s.to_owned())),
        }
    }
}

impl FenceMode {
    /// Reads [`FENCE_ENV`]; unset means [`FenceMode::Auto`].
    pub fn from_env() -> Result<Self, ParseFenceModeError> {
        match env::var(FENCE_ENV) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Self::Auto),
        }
    }

    /// Applies the mode to `policy`. Returns whether fencing is on.
    pub fn apply(self, policy: &FencePolicy) -> bool {
        match self {
            Self::Auto => policy.init(),
            Self::On => {
                policy.set_fence(true);
                true
            }
            Self::Off => {
                policy.set_fence(false);
                false
            }
        }
    }
}

/// Applies `mode` to the global policy.
pub fn configure(mode: FenceMode) -> bool {
    mode.apply(&POLICY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::thread;

    #[test]
    fn init_decides_once() {
        let p = FencePolicy::new();
        assert_eq!(p.state(), FenceState::Uninitialized);
        assert!(p.init_with(|| true));
        assert_eq!(p.state(), FenceState::Enabled);

        let ran = Cell::new(false);
        assert!(p.init_with(|| {
            ran.set(true);
            false
        }));
        assert!(!ran.get());
        assert!(p.use_fence());
    }

    #[test]
    fn set_fence_before_init_wins() {
        let p = FencePolicy::new();
        p.set_fence(false);
        assert!(!p.init_with(|| true));
        assert_eq!(p.state(), FenceState::Disabled);
    }

    #[test]
    fn set_fence_after_init_overrides() {
        let p = FencePolicy::new();
        assert!(!p.init_with(|| false));
        p.set_fence(true);
        assert!(p.use_fence());
        assert!(p.init_with(|| false));
    }

    #[test]
    fn racing_init_and_set_fence_never_lose_the_override() {
        for _ in 0..100 {
            let p = FencePolicy::new();
            thread::scope(|s| {
                s.spawn(|| p.init_with(|| true));
                s.spawn(|| p.set_fence(false));
            });
            // Whichever ran first, init never undoes the override.
            assert_eq!(p.state(), FenceState::Disabled);
            assert!(!p.init_with(|| true));
        }
    }

    #[test]
    fn modes_parse() {
        assert_eq!("auto".parse(), Ok(FenceMode::Auto));
        assert_eq!(" ON ".parse(), Ok(FenceMode::On));
        assert_eq!("0".parse(), Ok(FenceMode::Off));
        assert_eq!(
            "sometimes".parse::<FenceMode>(),
            Err(ParseFenceModeError("sometimes".to_owned()))
        );
    }

    #[test]
    fn mode_apply() {
        let p = FencePolicy::new();
        assert!(FenceMode::On.apply(&p));
        assert!(!FenceMode::Off.apply(&p));
        // Already decided, so Auto keeps the override.
        assert!(!FenceMode::Auto.apply(&p));
    }

    #[test]
    fn global_init_is_idempotent() {
        // Other tests flip the global switch, so only the state is stable.
        init();
        init();
        assert_ne!(policy().state(), FenceState::Uninitialized);
    }

    #[test]
    fn fenced_operations_on_both_widths() {
        assert!(configure(FenceMode::On));
        assert_eq!(policy().state(), FenceState::Enabled);

        let w = AtomicWord32::new(0);
        w.inc();
        assert_eq!(w.read_write(5), 1);
        assert_eq!(w.fetch_and_add(2), 5);
        assert_eq!(w.read_if_equal_write(7, 9), 7);
        assert!(w.compare_exchange(9, 1));
        assert_eq!(w.fetch_and_dec(), 1);
        w.or(0x30);
        assert_eq!(w.read(), 0x30);

        #[cfg(any(target_arch = "x86", target_arch = "x86_64", target_has_atomic = "64"))]
        {
            let w = crate::AtomicWord64::new(u32::MAX as u64);
            w.inc();
            assert_eq!(w.read_write(3), 1 << 32);
            assert_eq!(w.fetch_and_add(1 << 40), 3);
            assert_eq!(w.read_if_equal_write(3 + (1 << 40), 9), 3 + (1 << 40));
            assert_eq!(w.fetch_and_dec(), 9);
        }

        mfence();
        assert!(!configure(FenceMode::Off));
        assert_eq!(policy().state(), FenceState::Disabled);
    }

    #[test]
    fn mode_from_env() {
        env::set_var(FENCE_ENV, "off");
        assert_eq!(FenceMode::from_env(), Ok(FenceMode::Off));
        env::set_var(FENCE_ENV, "sometimes");
        let err = FenceMode::from_env().unwrap_err();
        assert_eq!(err, ParseFenceModeError("sometimes".to_owned()));
        assert_eq!(err.to_string(), r#"invalid fence mode "sometimes", expected auto, on or off"#);
        env::remove_var(FENCE_ENV);
        assert_eq!(FenceMode::from_env(), Ok(FenceMode::Auto));
    }

    #[test]
    fn mfence_runs() {
        mfence();
    }
}
