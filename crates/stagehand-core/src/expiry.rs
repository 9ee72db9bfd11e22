#![forbid(unsafe_code)]

//! Process-wide snapshot-expiry enforcement settings.
//!
//! Once a mutation session commits, the prior snapshot is superseded; any
//! reference still held to it is a logically stale read. How such reads are
//! treated is a process-wide, overridable setting rather than a per-call
//! argument: enforcement exists to catch bugs, and bugs do not honor call
//! sites. The setting is stored in an [`ArcSwap`] so the hot read path
//! (every snapshot accessor) is a lock-free load.

use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;

/// How reads of superseded snapshots are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryEnforcement {
    /// Stale reads are silently permitted.
    #[default]
    Off,
    /// Stale reads log a warning with a captured backtrace.
    Warn,
    /// Stale reads are contract violations: fallible accessors return
    /// [`DispatchError::ExpiredModelAccess`], infallible ones panic.
    ///
    /// [`DispatchError::ExpiredModelAccess`]: crate::DispatchError::ExpiredModelAccess
    Strict,
}

/// The process-wide expiry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpirySettings {
    pub enforcement: ExpiryEnforcement,
}

static SETTINGS: LazyLock<ArcSwap<ExpirySettings>> =
    LazyLock::new(|| ArcSwap::from_pointee(ExpirySettings::default()));

impl ExpirySettings {
    #[must_use]
    pub fn new(enforcement: ExpiryEnforcement) -> Self {
        Self { enforcement }
    }

    /// Install these settings process-wide, replacing the current ones.
    pub fn install(self) {
        SETTINGS.store(Arc::new(self));
    }

    /// The currently installed settings.
    #[must_use]
    pub fn current() -> ExpirySettings {
        **SETTINGS.load()
    }
}
