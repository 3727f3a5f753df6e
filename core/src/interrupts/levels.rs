//! # Priority-Level Masking
//!
//! Tracks, per hardware priority level, how many IRQ lines are currently
//! claimed by non-root domains. The aggregate mask answers in O(1) which
//! levels must stay unmasked at the controller so every domain above root
//! can still receive its interrupts, whatever the depth of the stack.
//!
//! ```text
//!   enable(L):  depth[L] 0 ──▶ 1   set   bit L
//!   disable(L): depth[L] 1 ──▶ 0   clear bit L
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use strata_hal::{Level, LevelMask, NR_LEVELS};

/// Per-level dependency counts and their aggregate mask
pub struct LevelDepth {
    depth: [AtomicU32; NR_LEVELS],
    mask: AtomicU32,
}

impl LevelDepth {
    /// Create an empty tracker
    pub const fn new() -> Self {
        Self {
            depth: [const { AtomicU32::new(0) }; NR_LEVELS],
            mask: AtomicU32::new(0),
        }
    }

    /// Record one more line depending on `level`
    ///
    /// Returns `true` when the level became live.
    pub fn enable(&self, level: Level) -> bool {
        let prev = self.depth[level.index()].fetch_add(1, Ordering::AcqRel);
        if prev == 0 {
            self.mask.fetch_or(level.bit(), Ordering::AcqRel);
            true
        } else {
            false
        }
    }

    /// Drop one line depending on `level`
    ///
    /// Returns `true` when the level went idle. A call on an idle level is
    /// ignored.
    pub fn disable(&self, level: Level) -> bool {
        let slot = &self.depth[level.index()];
        let updated = slot.fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1));
        match updated {
            Ok(1) => {
                self.mask.fetch_and(!level.bit(), Ordering::AcqRel);
                true
            },
            Ok(_) => false,
            Err(_) => {
                log::warn!("level {} released more often than claimed", level.0);
                false
            },
        }
    }

    /// Levels with at least one dependent line
    pub fn mask(&self) -> LevelMask {
        LevelMask(self.mask.load(Ordering::Acquire))
    }
}

impl Default for LevelDepth {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for LevelDepth {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LevelDepth")
            .field("mask", &self.mask())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let levels = LevelDepth::new();
        assert!(levels.enable(Level(3)));
        assert!(!levels.enable(Level(3)));
        assert!(levels.mask().contains(Level(3)));

        assert!(!levels.disable(Level(3)));
        assert!(levels.mask().contains(Level(3)));
        assert!(levels.disable(Level(3)));
        assert!(levels.mask().is_empty());
    }

    #[test]
    fn test_levels_are_independent() {
        let levels = LevelDepth::new();
        levels.enable(Level(1));
        levels.enable(Level(9));
        levels.disable(Level(1));
        assert_eq!(levels.mask(), LevelMask::of(Level(9)));
    }

    #[test]
    fn test_disable_idle_level() {
        let levels = LevelDepth::new();
        assert!(!levels.disable(Level(4)));
        assert!(levels.mask().is_empty());

        // The ignored release must not eat a later claim.
        assert!(levels.enable(Level(4)));
        assert!(levels.mask().contains(Level(4)));
    }
}
