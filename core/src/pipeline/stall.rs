//! # Stall / Sync Engine
//!
//! Per-CPU virtual interrupt masking of domains and the passes that flush
//! deferred work once a domain is unstalled.
//!
//! ```text
//!            stall()                    SYNCDEFER (lock/unlock)
//!   RUNNING ─────────▶ STALLED          orthogonal: a pass owns root,
//!      ▲                  │             nested passes return at once
//!      └──── unstall() ───┘
//!           (+ sync pending)
//! ```
//!
//! Every read-then-write of a status word happens with local hardware
//! interrupts masked.

use log::error;
use strata_hal::{InterruptController, InterruptGuard};

use super::Pipeline;
use crate::domain::{DomainId, StatusFlags, SyncMask};
use crate::error::{PipelineError, PipelineResult};

impl<C: InterruptController> Pipeline<C> {
    // =========================================================================
    // Root domain, calling CPU
    // =========================================================================

    /// Stall the root domain
    pub fn stall(&self) {
        let _irq = InterruptGuard::new(&self.controller);
        let cpu = self.controller.current_cpu();
        self.snapshot().root().cpu(cpu).test_and_set(StatusFlags::STALL);
    }

    /// Unstall the root domain, flushing its pending work if it is current
    pub fn unstall(&self) {
        let _irq = InterruptGuard::new(&self.controller);
        let cpu = self.controller.current_cpu();
        let stages = self.snapshot();
        let root = stages.root();
        let data = root.cpu(cpu);

        data.test_and_clear(StatusFlags::STALL);
        if self.current_id(cpu) == DomainId::ROOT && data.has_pending() {
            self.sync_stage(cpu, root, SyncMask::ANY);
        }
    }

    /// Check if the root domain is stalled
    pub fn test_stall(&self) -> bool {
        let _irq = InterruptGuard::new(&self.controller);
        let cpu = self.controller.current_cpu();
        self.snapshot().root().cpu(cpu).is_stalled()
    }

    /// Stall the root domain, returning whether it already was
    pub fn test_and_stall(&self) -> bool {
        let _irq = InterruptGuard::new(&self.controller);
        let cpu = self.controller.current_cpu();
        self.snapshot().root().cpu(cpu).test_and_set(StatusFlags::STALL)
    }

    /// Put back a state returned by [`test_and_stall`](Self::test_and_stall)
    pub fn restore(&self, stalled: bool) {
        if stalled {
            self.stall();
        } else {
            self.unstall();
        }
    }

    /// Forbid synchronization passes over the root domain
    pub fn lock(&self) {
        let _irq = InterruptGuard::new(&self.controller);
        let cpu = self.controller.current_cpu();
        self.snapshot().root().cpu(cpu).test_and_set(StatusFlags::SYNCDEFER);
    }

    /// Allow synchronization passes over the root domain again
    pub fn unlock(&self) {
        let _irq = InterruptGuard::new(&self.controller);
        let cpu = self.controller.current_cpu();
        self.snapshot().root().cpu(cpu).test_and_clear(StatusFlags::SYNCDEFER);
    }

    /// Flush the current domain's pending IRQs at the levels in `mask`
    ///
    /// No-op while root is current and locked.
    pub fn sync_pipeline(&self, mask: SyncMask) {
        let _irq = InterruptGuard::new(&self.controller);
        let cpu = self.controller.current_cpu();
        let stages = self.snapshot();
        let current = self.current_in(&stages, cpu);

        if current.is_root() && current.cpu(cpu).is_sync_deferred() {
            return;
        }
        self.sync_stage(cpu, current, mask);
    }

    /// Run the tail hook, then flush everything pending for root
    ///
    /// # Panics
    ///
    /// Panics if the root domain is stalled on the calling CPU.
    pub fn sync_root(&self) {
        let _irq = InterruptGuard::new(&self.controller);
        let cpu = self.controller.current_cpu();
        let stages = self.snapshot();
        let root = stages.root();

        if root.cpu(cpu).is_stalled() {
            error!("root sync requested on {} with root stalled", cpu);
            panic!("pipeline: sync_root with root stalled");
        }

        self.run_tail_hook();
        if root.cpu(cpu).has_pending() {
            self.sync_stage(cpu, root, SyncMask::ANY);
        }
    }

    // =========================================================================
    // Any domain, calling CPU
    // =========================================================================

    /// Stall domain `id`
    pub fn stall_domain(&self, id: DomainId) -> PipelineResult<()> {
        let _irq = InterruptGuard::new(&self.controller);
        let cpu = self.controller.current_cpu();
        let stages = self.snapshot();
        let domain = stages.get(id).ok_or(PipelineError::UnknownHandle)?;
        domain.cpu(cpu).test_and_set(StatusFlags::STALL);
        Ok(())
    }

    /// Unstall domain `id` and walk the pipeline from it
    pub fn unstall_domain(&self, id: DomainId) -> PipelineResult<()> {
        let _irq = InterruptGuard::new(&self.controller);
        let cpu = self.controller.current_cpu();
        let stages = self.snapshot();
        let pos = stages.position(id).ok_or(PipelineError::UnknownHandle)?;
        let domain = stages.get(id).ok_or(PipelineError::UnknownHandle)?;

        domain.cpu(cpu).test_and_clear(StatusFlags::STALL);
        self.walk_pipeline(&stages, cpu, pos);
        Ok(())
    }

    /// Check if domain `id` is stalled
    pub fn test_stall_domain(&self, id: DomainId) -> PipelineResult<bool> {
        let _irq = InterruptGuard::new(&self.controller);
        let cpu = self.controller.current_cpu();
        let stages = self.snapshot();
        let domain = stages.get(id).ok_or(PipelineError::UnknownHandle)?;
        Ok(domain.cpu(cpu).is_stalled())
    }

    /// Stall domain `id`, returning whether it already was
    pub fn test_and_stall_domain(&self, id: DomainId) -> PipelineResult<bool> {
        let _irq = InterruptGuard::new(&self.controller);
        let cpu = self.controller.current_cpu();
        let stages = self.snapshot();
        let domain = stages.get(id).ok_or(PipelineError::UnknownHandle)?;
        Ok(domain.cpu(cpu).test_and_set(StatusFlags::STALL))
    }

    // =========================================================================
    // Hardware root stall
    // =========================================================================

    /// Mask every level no domain above root depends on, and stall root
    pub fn stall_root_hw(&self) {
        let cpu = self.controller.current_cpu();
        self.controller.restrict_levels(self.levels.mask());
        self.snapshot().root().cpu(cpu).test_and_set(StatusFlags::STALL);
    }

    /// Undo [`stall_root_hw`](Self::stall_root_hw)
    pub fn unstall_root_hw(&self) {
        let cpu = self.controller.current_cpu();
        self.snapshot().root().cpu(cpu).test_and_clear(StatusFlags::STALL);
        self.controller.release_levels();
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    use strata_hal::host::HostController;
    use strata_hal::{Level, LevelMask};

    use super::*;
    use crate::config::PipelineConfig;
    use crate::domain::{irq_handler, DomainAttr, Priority};
    use crate::interrupts::{Irq, IrqControl};

    fn pipeline() -> Pipeline<HostController> {
        Pipeline::new(HostController::uniprocessor(), PipelineConfig::new())
    }

    fn counting(p: &Pipeline<HostController>, id: DomainId, irq: Irq) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let probe = hits.clone();
        p.virtualize_irq(
            id,
            irq,
            Some(irq_handler(move |_, _| {
                probe.fetch_add(1, Ordering::SeqCst);
            })),
            None,
            IrqControl::HANDLE | IrqControl::PASS,
        )
        .unwrap();
        hits
    }

    #[test]
    fn test_stall_then_test() {
        let p = pipeline();
        p.stall();
        assert!(p.test_stall());
        p.unstall();
        assert!(!p.test_stall());
    }

    #[test]
    fn test_and_stall_and_restore() {
        let p = pipeline();
        assert!(!p.test_and_stall());
        assert!(p.test_and_stall());
        p.restore(false);
        assert!(!p.test_stall());
        p.restore(true);
        assert!(p.test_stall());
    }

    #[test]
    fn test_unstall_flushes_root() {
        let p = pipeline();
        let hits = counting(&p, DomainId::ROOT, Irq(3));

        p.stall();
        p.trigger(Irq(3)).unwrap();
        p.trigger(Irq(3)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(p.irq_stats(DomainId::ROOT, Irq(3)).unwrap().pending, 2);

        p.unstall();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(p.irq_stats(DomainId::ROOT, Irq(3)).unwrap().pending, 0);
    }

    #[test]
    fn test_sync_pipeline_noop_while_locked() {
        let p = pipeline();
        let hits = counting(&p, DomainId::ROOT, Irq(3));

        p.stall();
        p.trigger(Irq(3)).unwrap();
        p.lock();
        p.unstall();
        p.sync_pipeline(SyncMask::ANY);
        p.sync_pipeline(SyncMask::ANY);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        p.unlock();
        p.sync_pipeline(SyncMask::ANY);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sync_pipeline_honours_mask() {
        let p = pipeline();
        let virq = p.alloc_virq().unwrap();
        let hw = counting(&p, DomainId::ROOT, Irq(3));
        let soft = counting(&p, DomainId::ROOT, virq);

        p.stall();
        p.trigger(Irq(3)).unwrap();
        p.trigger(virq).unwrap();
        p.lock();
        p.unstall();
        p.unlock();

        p.sync_pipeline(SyncMask::VIRT);
        assert_eq!(soft.load(Ordering::SeqCst), 1);
        assert_eq!(hw.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sync_root_runs_tail_hook() {
        let p = pipeline();
        let ticks = Arc::new(AtomicUsize::new(0));
        let probe = ticks.clone();
        p.set_irq_tail_hook(Some(Arc::new(move || {
            probe.fetch_add(1, Ordering::SeqCst);
        })));
        p.sync_root();
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "sync_root with root stalled")]
    fn test_sync_root_stalled_is_fatal() {
        let p = pipeline();
        p.stall();
        p.sync_root();
    }

    #[test]
    fn test_domain_stall() {
        let p = pipeline();
        let rt = p.register_domain(DomainAttr::new("rt", Priority(1))).unwrap();

        assert_eq!(p.test_and_stall_domain(rt), Ok(false));
        assert_eq!(p.test_stall_domain(rt), Ok(true));
        assert!(!p.test_stall());
        p.unstall_domain(rt).unwrap();
        assert_eq!(p.test_stall_domain(rt), Ok(false));
        p.stall_domain(rt).unwrap();
        assert_eq!(p.test_stall_domain(rt), Ok(true));

        p.unregister_domain(rt).unwrap();
        assert_eq!(p.test_stall_domain(rt), Err(PipelineError::UnknownHandle));
    }

    #[test]
    fn test_unstall_domain_delivers_pending() {
        let p = pipeline();
        let rt = p.register_domain(DomainAttr::new("rt", Priority(1))).unwrap();
        let hits = counting(&p, rt, Irq(9));

        p.stall_domain(rt).unwrap();
        p.trigger(Irq(9)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        p.unstall_domain(rt).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(p.current_domain(), DomainId::ROOT);
    }

    #[test]
    fn test_hw_root_stall() {
        let p = pipeline();
        p.controller().set_irq_level(9, Level(4));
        let rt = p.register_domain(DomainAttr::new("rt", Priority(1))).unwrap();
        counting(&p, rt, Irq(9));

        p.stall_root_hw();
        assert!(p.test_stall());
        assert_eq!(p.controller().restriction(), Some(LevelMask::of(Level(4))));

        p.unstall_root_hw();
        assert!(!p.test_stall());
        assert_eq!(p.controller().restriction(), None);
    }
}
