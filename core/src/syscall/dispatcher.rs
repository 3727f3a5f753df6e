//! # Syscall Dispatcher
//!
//! Root-domain syscall entry hook, riding on the event walk.

use log::trace;
use strata_hal::{InterruptController, InterruptGuard};

use super::{SyscallContext, SyscallDisposition};
use crate::domain::SyncMask;
use crate::event::{EventData, PipelineEvent};
use crate::pipeline::Pipeline;

impl<C: InterruptController> Pipeline<C> {
    /// Offer a root-domain system call to the domains above root
    ///
    /// The tail hook always runs first. Calls from tasks that did not ask
    /// for notification are passed through unless their number lies
    /// outside the general-purpose kernel's table.
    pub fn syscall_entry(&self, ctx: &SyscallContext) -> SyscallDisposition {
        self.run_tail_hook();

        if ctx.number < self.config().nr_syscalls && !ctx.evnotify {
            return SyscallDisposition::Passthrough;
        }
        if !self.monitors().is_monitored(PipelineEvent::Syscall) {
            return SyscallDisposition::Passthrough;
        }

        let absorbed = self.dispatch_event(PipelineEvent::Syscall, &EventData::Syscall(ctx));

        let _irq = InterruptGuard::new(self.controller());
        let cpu = self.controller().current_cpu();
        let stages = self.snapshot();
        let current = self.current_in(&stages, cpu);

        if !current.is_root() {
            trace!("syscall {} left {} current", ctx.number, current.name());
            return SyscallDisposition::Handled;
        }

        if current.cpu(cpu).has_pending_in(SyncMask::VIRT) && !current.cpu(cpu).is_sync_deferred() {
            self.sync_stage(cpu, current, SyncMask::VIRT);
        }

        if absorbed {
            SyscallDisposition::HandledWithTail
        } else {
            SyscallDisposition::Passthrough
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    use strata_hal::host::HostController;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::domain::{irq_handler, DomainAttr, DomainId, Priority};
    use crate::event::{event_handler, EventDisposition};
    use crate::interrupts::IrqControl;

    fn pipeline() -> Arc<Pipeline<HostController>> {
        Arc::new(Pipeline::new(HostController::uniprocessor(), PipelineConfig::new()))
    }

    fn count_tail(p: &Pipeline<HostController>) -> Arc<AtomicUsize> {
        let ticks = Arc::new(AtomicUsize::new(0));
        let probe = ticks.clone();
        p.set_irq_tail_hook(Some(Arc::new(move || {
            probe.fetch_add(1, Ordering::SeqCst);
        })));
        ticks
    }

    #[test]
    fn test_unmonitored_passthrough() {
        let p = pipeline();
        let ticks = count_tail(&p);
        assert_eq!(p.syscall_entry(&SyscallContext::new(3)), SyscallDisposition::Passthrough);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unnotified_kernel_call_skips_event() {
        let p = pipeline();
        let rt = p.register_domain(DomainAttr::new("rt", Priority(1))).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let probe = seen.clone();
        p.catch_event(
            rt,
            PipelineEvent::Syscall,
            Some(event_handler(move |_, _, _| {
                probe.fetch_add(1, Ordering::SeqCst);
                EventDisposition::Absorb
            })),
        )
        .unwrap();

        let call = SyscallContext::new(3).without_notify();
        assert_eq!(p.syscall_entry(&call), SyscallDisposition::Passthrough);
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        let foreign = SyscallContext::new(p.config().nr_syscalls + 1).without_notify();
        assert_eq!(p.syscall_entry(&foreign), SyscallDisposition::HandledWithTail);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_absorbed_syscall_runs_tail() {
        let p = pipeline();
        let rt = p.register_domain(DomainAttr::new("rt", Priority(1))).unwrap();
        p.catch_event(
            rt,
            PipelineEvent::Syscall,
            Some(event_handler(|_, _, data| match data {
                EventData::Syscall(call) if call.number == 42 => EventDisposition::Absorb,
                _ => EventDisposition::Propagate,
            })),
        )
        .unwrap();

        assert_eq!(p.syscall_entry(&SyscallContext::new(42)), SyscallDisposition::HandledWithTail);
        assert_eq!(p.syscall_entry(&SyscallContext::new(7)), SyscallDisposition::Passthrough);
        assert_eq!(SyscallDisposition::HandledWithTail.as_raw(), -1);
    }

    #[test]
    fn test_migrated_caller_is_handled() {
        let p = pipeline();
        let rt = p.register_domain(DomainAttr::new("rt", Priority(1))).unwrap();
        let weak = Arc::downgrade(&p);
        p.catch_event(
            rt,
            PipelineEvent::Syscall,
            Some(event_handler(move |_, _, _| {
                if let Some(p) = weak.upgrade() {
                    p.set_current_domain(rt).unwrap();
                }
                EventDisposition::Absorb
            })),
        )
        .unwrap();

        // The handler already runs as `rt`, so the walk sees no migration
        // and puts root back.
        assert_eq!(p.syscall_entry(&SyscallContext::new(1)), SyscallDisposition::HandledWithTail);
        assert_eq!(p.current_domain(), DomainId::ROOT);

        let mid = p.register_domain(DomainAttr::new("mid", Priority(2))).unwrap();
        let weak = Arc::downgrade(&p);
        p.catch_event(
            rt,
            PipelineEvent::Syscall,
            Some(event_handler(move |_, _, _| {
                if let Some(p) = weak.upgrade() {
                    p.set_current_domain(mid).unwrap();
                }
                EventDisposition::Absorb
            })),
        )
        .unwrap();

        assert_eq!(p.syscall_entry(&SyscallContext::new(1)), SyscallDisposition::Handled);
        assert_eq!(p.current_domain(), mid);
    }

    #[test]
    fn test_root_virqs_flushed() {
        let p = pipeline();
        let rt = p.register_domain(DomainAttr::new("rt", Priority(1))).unwrap();
        p.catch_event(
            rt,
            PipelineEvent::Syscall,
            Some(event_handler(|_, _, _| EventDisposition::Propagate)),
        )
        .unwrap();

        let virq = p.alloc_virq().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let probe = hits.clone();
        p.virtualize_irq(
            DomainId::ROOT,
            virq,
            Some(irq_handler(move |_, _| {
                probe.fetch_add(1, Ordering::SeqCst);
            })),
            None,
            IrqControl::HANDLE,
        )
        .unwrap();

        p.stall();
        p.trigger(virq).unwrap();
        let cpu = p.controller().current_cpu();
        p.root().cpu(cpu).test_and_clear(crate::domain::StatusFlags::STALL);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert_eq!(p.syscall_entry(&SyscallContext::new(1)), SyscallDisposition::Passthrough);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
