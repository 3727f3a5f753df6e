//! # Interrupt Controller Seam
//!
//! Local hardware interrupt masking, IRQ priority levels and the register
//! snapshot handed to the pipeline on a genuine hardware trap.
//!
//! ## Priority Levels
//!
//! Every hardware IRQ line maps to one coarse priority level. Level `0` is
//! the most urgent, `NR_LEVELS - 1` the least. The last level is reserved
//! for software-only (virtual) interrupts.
//!
//! ```text
//!   level:   0    1    2   ...  14   15
//!           ─┬── ─┬── ─┬──      ─┬── ─┬──
//!            │    │    │         │    └── virtual IRQs
//!            └────┴────┴─ ... ───┴─────── hardware lines
//! ```

use core::fmt;

use static_assertions::const_assert;

// =============================================================================
// Constants
// =============================================================================

/// Number of hardware IRQ lines the controller exposes
pub const NR_HW_IRQS: usize = 128;

/// Number of coarse interrupt priority levels
pub const NR_LEVELS: usize = 16;

const_assert!(NR_LEVELS <= 32);
const_assert!(NR_HW_IRQS % 32 == 0);

// =============================================================================
// Levels
// =============================================================================

/// Coarse interrupt priority level (0 = most urgent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Level(pub u8);

impl Level {
    /// Most urgent level
    pub const HIGHEST: Level = Level(0);
    /// Least urgent level
    pub const LOWEST: Level = Level((NR_LEVELS - 1) as u8);

    /// Index into per-level tables
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Single-bit mask for this level
    #[inline]
    pub const fn bit(self) -> u32 {
        1 << self.0
    }
}

/// Set of priority levels
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LevelMask(pub u32);

impl LevelMask {
    /// No level
    pub const NONE: LevelMask = LevelMask(0);
    /// Every level
    pub const ALL: LevelMask = LevelMask(((1u64 << NR_LEVELS) - 1) as u32);

    /// Mask holding a single level
    #[inline]
    pub const fn of(level: Level) -> Self {
        LevelMask(level.bit())
    }

    /// Check if `level` is part of the mask
    #[inline]
    pub const fn contains(self, level: Level) -> bool {
        self.0 & level.bit() != 0
    }

    /// Check if the mask is empty
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Most urgent level in the mask
    #[inline]
    pub const fn highest(self) -> Option<Level> {
        if self.0 == 0 {
            None
        } else {
            Some(Level(self.0.trailing_zeros() as u8))
        }
    }
}

impl fmt::Debug for LevelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LevelMask({:#06x})", self.0)
    }
}

impl core::ops::BitOr for LevelMask {
    type Output = LevelMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        LevelMask(self.0 | rhs.0)
    }
}

impl core::ops::BitAnd for LevelMask {
    type Output = LevelMask;

    fn bitand(self, rhs: Self) -> Self::Output {
        LevelMask(self.0 & rhs.0)
    }
}

// =============================================================================
// Interrupt Context
// =============================================================================

/// Register snapshot captured by the trap entry for a hardware interrupt
///
/// Only the timer path keeps it beyond the dispatch that carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrqContext {
    /// Interrupted instruction pointer
    pub ip: usize,
    /// Interrupted stack pointer
    pub sp: usize,
    /// Interrupted status/flags word
    pub status: usize,
    /// Whether the trap came from user mode
    pub user_mode: bool,
}

/// Saved local interrupt state, as returned by
/// [`InterruptController::save_and_disable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqFlags {
    /// Whether interrupts were enabled before the save
    pub was_enabled: bool,
}

// =============================================================================
// Controller Trait
// =============================================================================

/// Platform interrupt controller as seen by the pipeline
///
/// All masking operations act on the *calling* CPU only.
pub trait InterruptController: Send + Sync {
    /// Number of CPUs the platform brought online
    fn cpu_count(&self) -> usize;

    /// CPU executing the caller
    fn current_cpu(&self) -> crate::CpuId;

    /// Mask local hardware interrupts, returning the previous state
    fn save_and_disable(&self) -> IrqFlags;

    /// Restore a state returned by [`save_and_disable`](Self::save_and_disable)
    fn restore(&self, flags: IrqFlags);

    /// Unmask local hardware interrupts
    fn enable(&self);

    /// Check if local hardware interrupts are unmasked
    fn are_enabled(&self) -> bool;

    /// Priority level a hardware IRQ line is wired to
    fn irq_level(&self, irq: u32) -> Level;

    /// Leave only the levels in `allowed` unmasked at the controller
    fn restrict_levels(&self, allowed: LevelMask);

    /// Undo [`restrict_levels`](Self::restrict_levels)
    fn release_levels(&self);

    /// Core clock frequency in Hz
    fn cpu_freq(&self) -> u64;
}

// =============================================================================
// Interrupt State Guard
// =============================================================================

/// RAII guard for local interrupt state
///
/// Masks local hardware interrupts when created, restores the previous
/// state when dropped.
pub struct InterruptGuard<'a, C: InterruptController + ?Sized> {
    controller: &'a C,
    flags: IrqFlags,
}

impl<'a, C: InterruptController + ?Sized> InterruptGuard<'a, C> {
    /// Create a new interrupt guard, masking interrupts
    pub fn new(controller: &'a C) -> Self {
        Self {
            flags: controller.save_and_disable(),
            controller,
        }
    }

    /// State that will be restored on drop
    pub fn saved(&self) -> IrqFlags {
        self.flags
    }
}

impl<C: InterruptController + ?Sized> Drop for InterruptGuard<'_, C> {
    fn drop(&mut self) {
        self.controller.restore(self.flags);
    }
}

impl<C: InterruptController + ?Sized> fmt::Debug for InterruptGuard<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptGuard")
            .field("flags", &self.flags)
            .finish()
    }
}

/// Execute a closure with local interrupts masked
///
/// Restores the previous interrupt state after the closure returns.
#[inline]
pub fn without_interrupts<C, F, R>(controller: &C, f: F) -> R
where
    C: InterruptController + ?Sized,
    F: FnOnce() -> R,
{
    let _guard = InterruptGuard::new(controller);
    f()
}
