//! # CPU Identity
//!
//! Logical CPU numbering shared by the controller and the pipeline's
//! per-CPU tables.

use core::fmt;

/// Maximum number of CPUs a pipeline keeps per-CPU state for
pub const MAX_CPUS: usize = 8;

/// Logical CPU identifier (dense, `0..cpu_count`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(pub u32);

impl CpuId {
    /// The boot CPU
    pub const BOOT: CpuId = CpuId(0);

    /// Index into per-CPU tables
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

impl From<usize> for CpuId {
    fn from(value: usize) -> Self {
        CpuId(value as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_index() {
        assert_eq!(CpuId::BOOT.index(), 0);
        assert_eq!(CpuId::from(3usize).index(), 3);
    }
}
