//! Runtime check-mode configuration.
//!
//! The check mode is set via the `SEGFIT_CHECK` environment variable:
//! - `off` (default): no automatic consistency walks. The checker is still
//!   callable explicitly through [`crate::heap::Heap::check_heap`].
//! - `boundary`: the full consistency walk runs after every public
//!   operation and panics on the first violated rule. Debug tooling only;
//!   every operation becomes O(heap).

use std::sync::OnceLock;

/// When the heap-consistency checker runs automatically.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckMode {
    /// No automatic walks.
    #[default]
    Off,
    /// Walk the whole heap after every public operation.
    Boundary,
}

impl CheckMode {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "boundary" | "on" | "debug" | "full" => Self::Boundary,
            "off" | "none" | "disabled" => Self::Off,
            _ => Self::Off,
        }
    }

    /// Returns true if the checker should run at operation boundaries.
    #[must_use]
    pub const fn checks_boundaries(self) -> bool {
        matches!(self, Self::Boundary)
    }
}

static GLOBAL_MODE: OnceLock<CheckMode> = OnceLock::new();

/// Get the configured check mode (reads env var on first call, caches thereafter).
#[must_use]
pub fn check_mode() -> CheckMode {
    *GLOBAL_MODE.get_or_init(|| {
        std::env::var("SEGFIT_CHECK")
            .map(|v| CheckMode::from_str_loose(&v))
            .unwrap_or_default()
    })
}
