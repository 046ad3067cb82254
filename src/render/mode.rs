//! Render mode and the invalidation flag.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// What the per-frame program draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Progressive path tracing into the accumulation surface.
    #[default]
    Standard,
    /// Primary-hit normals, one sample per frame, never accumulated.
    DebugNormals,
}

impl RenderMode {
    /// Whether frames in this mode add to the accumulation surface.
    pub fn accumulates(&self) -> bool {
        matches!(self, RenderMode::Standard)
    }
}

/// Set when the rendered subject changes, consumed once per render cycle.
///
/// Atomic so an input thread may raise it; camera writes must happen before
/// `raise` for the next cycle to observe them.
#[derive(Debug, Default)]
pub struct InvalidationFlag(AtomicBool);

impl InvalidationFlag {
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_take_clears() {
        let flag = InvalidationFlag::default();
        assert!(!flag.take());
        flag.raise();
        flag.raise();
        assert!(flag.is_raised());
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn test_mode_serde() {
        let m: RenderMode = serde_json::from_str("\"debug_normals\"").unwrap();
        assert_eq!(m, RenderMode::DebugNormals);
        assert!(!m.accumulates());
        assert!(RenderMode::default().accumulates());
    }
}
