//! # Critical Section
//!
//! Pipeline-wide exclusion: local hardware interrupts masked and the global
//! pipeline lock held, both released when the guard drops.

use core::fmt;

use spin::MutexGuard;
use strata_hal::{InterruptController, InterruptGuard};

use super::Pipeline;

/// Guard returned by [`Pipeline::critical_enter`]
///
/// Not reentrant: entering twice on one CPU spins forever.
pub struct CriticalSection<'a, C: InterruptController> {
    // Field order is drop order: unlock first, then unmask.
    _lock: MutexGuard<'a, ()>,
    _irq: InterruptGuard<'a, C>,
}

impl<C: InterruptController> Pipeline<C> {
    /// Enter the pipeline-wide critical section
    pub fn critical_enter(&self) -> CriticalSection<'_, C> {
        let irq = InterruptGuard::new(&self.controller);
        let lock = self.critical.lock();
        CriticalSection {
            _lock: lock,
            _irq: irq,
        }
    }

    /// Check if some CPU holds the critical section
    pub fn in_critical(&self) -> bool {
        self.critical.is_locked()
    }
}

impl<C: InterruptController> fmt::Debug for CriticalSection<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalSection").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use strata_hal::host::HostController;

    use super::*;
    use crate::config::PipelineConfig;

    #[test]
    fn test_released_on_drop() {
        let p = Pipeline::new(HostController::uniprocessor(), PipelineConfig::new());
        assert!(p.controller().are_enabled());
        {
            let _cs = p.critical_enter();
            assert!(p.in_critical());
            assert!(!p.controller().are_enabled());
        }
        assert!(!p.in_critical());
        assert!(p.controller().are_enabled());
    }

    #[test]
    fn test_released_on_early_return() {
        fn bail(p: &Pipeline<HostController>) -> Result<(), ()> {
            let _cs = p.critical_enter();
            Err(())
        }

        let p = Pipeline::new(HostController::uniprocessor(), PipelineConfig::new());
        assert!(bail(&p).is_err());
        assert!(!p.in_critical());
        assert!(p.controller().are_enabled());
    }
}
