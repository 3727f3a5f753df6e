//! # Virtual IRQ Allocation
//!
//! Virtual IRQs are handed out from a single bitmap word. A virtual number
//! that was never allocated is rejected everywhere an IRQ is accepted.

use core::sync::atomic::{AtomicU32, Ordering};

use super::{Irq, NR_VIRQS, VIRQ_BASE};
use crate::error::{PipelineError, PipelineResult};

/// Allocation map for the virtual IRQ range
#[derive(Debug)]
pub struct VirqMap {
    map: AtomicU32,
}

impl VirqMap {
    /// Create an empty map
    pub const fn new() -> Self {
        Self {
            map: AtomicU32::new(0),
        }
    }

    /// Allocate the lowest free virtual IRQ
    pub fn alloc(&self) -> PipelineResult<Irq> {
        let mut current = self.map.load(Ordering::Acquire);
        loop {
            let free = !current;
            let slot = free.trailing_zeros() as usize;
            if slot >= NR_VIRQS {
                return Err(PipelineError::NoVirqAvailable);
            }
            match self.map.compare_exchange_weak(
                current,
                current | (1 << slot),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(Irq(VIRQ_BASE + slot as u32)),
                Err(seen) => current = seen,
            }
        }
    }

    /// Release a virtual IRQ
    pub fn free(&self, irq: Irq) -> PipelineResult<()> {
        if !irq.is_virtual() {
            return Err(PipelineError::InvalidIrq);
        }
        let bit = 1 << (irq.0 - VIRQ_BASE);
        let prev = self.map.fetch_and(!bit, Ordering::AcqRel);
        if prev & bit == 0 {
            return Err(PipelineError::InvalidIrq);
        }
        Ok(())
    }

    /// Check if a virtual IRQ is allocated
    pub fn is_allocated(&self, irq: Irq) -> bool {
        irq.is_virtual() && self.map.load(Ordering::Acquire) & (1 << (irq.0 - VIRQ_BASE)) != 0
    }

    /// Validate an IRQ number for dispatch or configuration
    pub fn check(&self, irq: Irq) -> PipelineResult<()> {
        if !irq.is_valid() || (irq.is_virtual() && !self.is_allocated(irq)) {
            return Err(PipelineError::InvalidIrq);
        }
        Ok(())
    }
}

impl Default for VirqMap {
    fn default() -> Self {
        Self::new()
    }
}
