//! # Pipeline Errors
//!
//! Every fallible pipeline operation reports one of these synchronously.
//! Invariant violations (a corrupted pipeline) are not errors: they log and
//! panic, since carrying on could silently drop real-time interrupts.

use core::fmt;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Pipeline error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineError {
    /// IRQ number out of range, or virtual IRQ not allocated
    InvalidIrq,
    /// A domain with the same priority is already registered
    DuplicatePriority,
    /// Domain handle does not name a registered domain
    UnknownHandle,
    /// The root domain cannot be unregistered
    CannotRemoveRoot,
    /// Domain arena is full
    TooManyDomains,
    /// Every virtual IRQ is already allocated
    NoVirqAvailable,
    /// IRQ is exclusively owned by another handler
    Busy,
}

impl PipelineError {
    /// Short, stable name of the error
    pub const fn as_str(self) -> &'static str {
        match self {
            PipelineError::InvalidIrq => "invalid irq",
            PipelineError::DuplicatePriority => "duplicate priority",
            PipelineError::UnknownHandle => "unknown domain handle",
            PipelineError::CannotRemoveRoot => "cannot remove root domain",
            PipelineError::TooManyDomains => "too many domains",
            PipelineError::NoVirqAvailable => "no virtual irq available",
            PipelineError::Busy => "irq busy",
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::string::ToString;

    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(PipelineError::InvalidIrq.to_string(), "invalid irq");
        assert_eq!(
            PipelineError::CannotRemoveRoot.to_string(),
            "cannot remove root domain"
        );
    }
}
