//! # Pipeline Configuration
//!
//! Platform facts and tunables fixed when a [`Pipeline`](crate::Pipeline)
//! is created.

use crate::interrupts::Irq;

/// Default number of general-purpose kernel system calls
pub const DEFAULT_NR_SYSCALLS: u32 = 400;

/// Pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// System timer line (always acknowledged up front)
    pub system_timer_irq: Option<Irq>,
    /// Core timer line (always acknowledged up front)
    pub core_timer_irq: Option<Irq>,
    /// Syscall numbers below this belong to the general-purpose kernel
    pub nr_syscalls: u32,
    /// Skip the delivery walk when the head domain is current and has
    /// nothing pending
    pub ahead_shortcut: bool,
}

impl PipelineConfig {
    /// Configuration with no timer lines and the shortcut enabled
    pub const fn new() -> Self {
        Self {
            system_timer_irq: None,
            core_timer_irq: None,
            nr_syscalls: DEFAULT_NR_SYSCALLS,
            ahead_shortcut: true,
        }
    }

    /// Set the system timer line
    pub const fn with_system_timer(mut self, irq: Irq) -> Self {
        self.system_timer_irq = Some(irq);
        self
    }

    /// Set the core timer line
    pub const fn with_core_timer(mut self, irq: Irq) -> Self {
        self.core_timer_irq = Some(irq);
        self
    }

    /// Set the general-purpose kernel syscall count
    pub const fn with_nr_syscalls(mut self, nr: u32) -> Self {
        self.nr_syscalls = nr;
        self
    }

    /// Enable or disable the head-domain shortcut
    pub const fn with_ahead_shortcut(mut self, enabled: bool) -> Self {
        self.ahead_shortcut = enabled;
        self
    }

    /// Check if `irq` is one of the timer lines
    pub fn is_timer(&self, irq: Irq) -> bool {
        self.system_timer_irq == Some(irq) || self.core_timer_irq == Some(irq)
    }

    /// Timer line reported through system info (system timer first)
    pub fn timer_irq(&self) -> Option<Irq> {
        self.system_timer_irq.or(self.core_timer_irq)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}
