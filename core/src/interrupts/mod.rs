//! # Interrupt Numbering
//!
//! IRQ numbers, the hardware/virtual split and the per-line control word.
//!
//! ## IRQ Space
//!
//! ```text
//!   0                     NR_HW_IRQS             NR_IRQS
//!   ├──── hardware lines ─────┼──── virtual IRQs ───┤
//!                         VIRQ_BASE
//! ```
//!
//! Virtual IRQs are software-only: they have no acknowledge step and all
//! live at [`VIRQ_LEVEL`], the least urgent priority level.

use core::fmt;

use static_assertions::const_assert;
use strata_hal::{Level, NR_HW_IRQS, NR_LEVELS};

pub mod control;
pub mod levels;
pub mod virq;

pub use control::{IrqControl, Route};
pub use levels::LevelDepth;
pub use virq::VirqMap;

// =============================================================================
// Constants
// =============================================================================

/// Number of virtual IRQs
pub const NR_VIRQS: usize = 32;

/// First virtual IRQ number
pub const VIRQ_BASE: u32 = NR_HW_IRQS as u32;

/// Total IRQ space (hardware + virtual)
pub const NR_IRQS: usize = NR_HW_IRQS + NR_VIRQS;

/// Priority level every virtual IRQ is delivered at
pub const VIRQ_LEVEL: Level = Level((NR_LEVELS - 1) as u8);

/// Number of 32-bit words in a bitmap covering the whole IRQ space
pub const IRQ_WORDS: usize = NR_IRQS / 32;

const_assert!(NR_IRQS % 32 == 0);
const_assert!(NR_VIRQS <= 32);

// =============================================================================
// IRQ Number
// =============================================================================

/// An IRQ number, hardware or virtual
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Irq(pub u32);

impl Irq {
    /// Check if the number is inside the IRQ space
    #[inline]
    pub const fn is_valid(self) -> bool {
        (self.0 as usize) < NR_IRQS
    }

    /// Check if this is a virtual IRQ number
    #[inline]
    pub const fn is_virtual(self) -> bool {
        self.0 >= VIRQ_BASE && self.is_valid()
    }

    /// Check if this is a hardware line
    #[inline]
    pub const fn is_hardware(self) -> bool {
        self.0 < VIRQ_BASE
    }

    /// Index into per-IRQ tables
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Word of an IRQ bitmap holding this IRQ
    #[inline]
    pub(crate) const fn word(self) -> usize {
        (self.0 / 32) as usize
    }

    /// Bit of [`word`](Self::word) holding this IRQ
    #[inline]
    pub(crate) const fn bit(self) -> u32 {
        1 << (self.0 % 32)
    }
}

impl fmt::Display for Irq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_virtual() {
            write!(f, "virq{}", self.0 - VIRQ_BASE)
        } else {
            write!(f, "irq{}", self.0)
        }
    }
}

impl From<u32> for Irq {
    fn from(value: u32) -> Self {
        Irq(value)
    }
}
