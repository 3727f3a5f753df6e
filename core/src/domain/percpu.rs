//! # Per-CPU Domain Data
//!
//! One instance per (domain, CPU). Written from interrupt context at any
//! nesting depth on its own CPU, so every word is an atomic and every
//! read-modify-write is a single atomic operation.
//!
//! ## Pending Layout
//!
//! ```text
//!   himask          bit L set  ⇔  some IRQ pending at level L
//!     │
//!     ▼
//!   lomask[L][w]    bit b set  ⇔  IRQ (w * 32 + b) pending at level L
//!     │
//!     ▼
//!   hits[irq]       undelivered occurrences of irq
//! ```
//!
//! Draining (`take_pending`) must run with local hardware interrupts
//! masked: clearing an emptied level bit is a check-then-act sequence.

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use strata_hal::{Level, LevelMask, NR_LEVELS};

use crate::interrupts::{Irq, IRQ_WORDS, NR_IRQS, VIRQ_LEVEL};

bitflags! {
    /// Per-CPU status word of a domain
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: u32 {
        /// Virtual interrupts masked, delivery deferred
        const STALL = 1 << 0;
        /// A synchronization pass owns the domain, do not recurse
        const SYNCDEFER = 1 << 1;
    }
}

/// Priority levels a synchronization pass may deliver from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncMask(pub LevelMask);

impl SyncMask {
    /// Every level
    pub const ANY: SyncMask = SyncMask(LevelMask::ALL);
    /// Only the virtual IRQ level
    pub const VIRT: SyncMask = SyncMask(LevelMask::of(VIRQ_LEVEL));

    /// A single level
    pub const fn level(level: Level) -> Self {
        SyncMask(LevelMask::of(level))
    }
}

/// Pending state and status of one domain on one CPU
pub struct PerCpuDomainData {
    status: AtomicU32,
    himask: AtomicU32,
    lomask: [[AtomicU32; IRQ_WORDS]; NR_LEVELS],
    hits: [AtomicU32; NR_IRQS],
    delivered: [AtomicU32; NR_IRQS],
}

impl PerCpuDomainData {
    /// Fresh, idle data (no status bits, nothing pending)
    pub fn new() -> Self {
        Self {
            status: AtomicU32::new(0),
            himask: AtomicU32::new(0),
            lomask: [const { [const { AtomicU32::new(0) }; IRQ_WORDS] }; NR_LEVELS],
            hits: [const { AtomicU32::new(0) }; NR_IRQS],
            delivered: [const { AtomicU32::new(0) }; NR_IRQS],
        }
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Current status bits
    #[inline]
    pub fn status(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.status.load(Ordering::Acquire))
    }

    /// Set status bits, returning whether all of them were already set
    #[inline]
    pub fn test_and_set(&self, flags: StatusFlags) -> bool {
        let prev = self.status.fetch_or(flags.bits(), Ordering::AcqRel);
        prev & flags.bits() == flags.bits()
    }

    /// Clear status bits, returning whether any of them was set
    #[inline]
    pub fn test_and_clear(&self, flags: StatusFlags) -> bool {
        let prev = self.status.fetch_and(!flags.bits(), Ordering::AcqRel);
        prev & flags.bits() != 0
    }

    /// Check if the domain is stalled on this CPU
    #[inline]
    pub fn is_stalled(&self) -> bool {
        self.status().contains(StatusFlags::STALL)
    }

    /// Check if a synchronization pass owns the domain on this CPU
    #[inline]
    pub fn is_sync_deferred(&self) -> bool {
        self.status().contains(StatusFlags::SYNCDEFER)
    }

    // -------------------------------------------------------------------------
    // Pending
    // -------------------------------------------------------------------------

    /// Record one occurrence of `irq` at `level`
    pub fn mark_pending(&self, irq: Irq, level: Level) {
        self.hits[irq.index()].fetch_add(1, Ordering::AcqRel);
        self.lomask[level.index()][irq.word()].fetch_or(irq.bit(), Ordering::AcqRel);
        self.himask.fetch_or(level.bit(), Ordering::AcqRel);
    }

    /// Levels with pending IRQs
    #[inline]
    pub fn pending_levels(&self) -> LevelMask {
        LevelMask(self.himask.load(Ordering::Acquire))
    }

    /// Check if anything at all is pending
    #[inline]
    pub fn has_pending(&self) -> bool {
        !self.pending_levels().is_empty()
    }

    /// Check if anything is pending at the levels selected by `mask`
    #[inline]
    pub fn has_pending_in(&self, mask: SyncMask) -> bool {
        !(self.pending_levels() & mask.0).is_empty()
    }

    /// Undelivered occurrences of `irq`
    pub fn pending_hits(&self, irq: Irq) -> u32 {
        self.hits[irq.index()].load(Ordering::Acquire)
    }

    /// Delivered occurrences of `irq` since creation
    pub fn delivered(&self, irq: Irq) -> u32 {
        self.delivered[irq.index()].load(Ordering::Acquire)
    }

    /// Count a delivery that bypassed the pending bitmap (wired path)
    pub fn count_delivery(&self, irq: Irq) {
        self.delivered[irq.index()].fetch_add(1, Ordering::AcqRel);
    }

    /// Consume one pending occurrence from the most urgent selected level
    ///
    /// Within a level the lowest IRQ number goes first. Returns `None` when
    /// nothing is pending under `mask`.
    pub fn take_pending(&self, mask: SyncMask) -> Option<Irq> {
        loop {
            let level = (self.pending_levels() & mask.0).highest()?;
            let words = &self.lomask[level.index()];

            let found = words.iter().enumerate().find_map(|(w, word)| {
                let bits = word.load(Ordering::Acquire);
                (bits != 0).then(|| Irq((w as u32) * 32 + bits.trailing_zeros()))
            });

            let Some(irq) = found else {
                self.himask.fetch_and(!level.bit(), Ordering::AcqRel);
                continue;
            };

            let left = self.hits[irq.index()]
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |h| h.checked_sub(1))
                .map(|prev| prev - 1)
                .unwrap_or(0);

            if left == 0 {
                words[irq.word()].fetch_and(!irq.bit(), Ordering::AcqRel);
                if words.iter().all(|w| w.load(Ordering::Acquire) == 0) {
                    self.himask.fetch_and(!level.bit(), Ordering::AcqRel);
                }
            }

            self.delivered[irq.index()].fetch_add(1, Ordering::AcqRel);
            return Some(irq);
        }
    }
}

impl Default for PerCpuDomainData {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for PerCpuDomainData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PerCpuDomainData")
            .field("status", &self.status())
            .field("pending", &self.pending_levels())
            .finish()
    }
}
