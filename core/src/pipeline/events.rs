//! # Event Propagation
//!
//! Events walk the pipeline like interrupts do: head first, each catching
//! domain made current while its handler runs, and pending IRQs of the
//! domains passed on the way flushed before moving down.

use alloc::sync::Arc;

use log::debug;
use strata_hal::{InterruptController, InterruptGuard};

use super::Pipeline;
use crate::domain::{DomainId, SyncMask};
use crate::error::{PipelineError, PipelineResult};
use crate::event::{EventData, EventDisposition, EventHandler, PipelineEvent};

impl<C: InterruptController> Pipeline<C> {
    /// Install (or with `None`, remove) the handler of domain `id` for
    /// `event`, returning the handler it replaces
    pub fn catch_event(
        &self,
        id: DomainId,
        event: PipelineEvent,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> PipelineResult<Option<Arc<dyn EventHandler>>> {
        let _cs = self.critical_enter();
        let stages = self.snapshot();
        let domain = stages.get(id).ok_or(PipelineError::UnknownHandle)?;

        let installing = handler.is_some();
        let prev = domain.replace_event_handler(event, handler);
        match (prev.is_some(), installing) {
            (false, true) => self.monitors.add(event),
            (true, false) => self.monitors.remove(event),
            _ => {},
        }

        debug!(
            "{:?} {} by {}",
            event,
            if installing { "caught" } else { "released" },
            domain.name()
        );
        Ok(prev)
    }

    /// Check if any domain catches `event`
    pub fn is_monitored(&self, event: PipelineEvent) -> bool {
        self.monitors.is_monitored(event)
    }

    /// Propagate `event` down the pipeline
    ///
    /// Returns `true` if a handler absorbed it.
    pub fn dispatch_event(&self, event: PipelineEvent, data: &EventData<'_>) -> bool {
        let irq = InterruptGuard::new(&self.controller);
        let cpu = self.controller.current_cpu();
        let stages = self.snapshot();

        let origin = self.current_in(&stages, cpu).id();
        let mut this = origin;
        let mut absorbed = false;

        for domain in stages.iter() {
            if let Some(handler) = domain.event_handler(event) {
                self.set_current(cpu, domain.id());

                self.controller.restore(irq.saved());
                let disposition = handler.on_event(event, origin, data);
                let _ = self.controller.save_and_disable();

                absorbed = disposition == EventDisposition::Absorb;
                let now = self.current_id(cpu);
                if now != domain.id() {
                    this = now;
                }
            }

            if !domain.is_root() && domain.cpu(cpu).has_pending() {
                self.set_current(cpu, domain.id());
                self.sync_stage(cpu, domain, SyncMask::ANY);
                let now = self.current_id(cpu);
                if now != domain.id() {
                    this = now;
                }
            }

            self.set_current(cpu, this);
            if domain.id() == this || absorbed {
                break;
            }
        }

        absorbed
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};

    use spin::Mutex;
    use strata_hal::host::HostController;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::domain::{irq_handler, DomainAttr, Priority};
    use crate::event::event_handler;
    use crate::interrupts::{Irq, IrqControl};

    fn pipeline() -> Arc<Pipeline<HostController>> {
        Arc::new(Pipeline::new(HostController::uniprocessor(), PipelineConfig::new()))
    }

    fn recorder(
        log: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
        answer: EventDisposition,
    ) -> Arc<dyn EventHandler> {
        let log = log.clone();
        event_handler(move |_, _, _| {
            log.lock().push(name);
            answer
        })
    }

    #[test]
    fn test_catch_replaces_and_counts() {
        let p = pipeline();
        let log = Arc::new(Mutex::new(Vec::new()));

        assert!(!p.is_monitored(PipelineEvent::Exit));
        let prev = p
            .catch_event(
                DomainId::ROOT,
                PipelineEvent::Exit,
                Some(recorder(&log, "a", EventDisposition::Propagate)),
            )
            .unwrap();
        assert!(prev.is_none());
        assert!(p.is_monitored(PipelineEvent::Exit));

        let prev = p
            .catch_event(
                DomainId::ROOT,
                PipelineEvent::Exit,
                Some(recorder(&log, "b", EventDisposition::Propagate)),
            )
            .unwrap();
        assert!(prev.is_some());

        p.catch_event(DomainId::ROOT, PipelineEvent::Exit, None).unwrap();
        assert!(!p.is_monitored(PipelineEvent::Exit));
    }

    #[test]
    fn test_walk_order_and_absorb() {
        let p = pipeline();
        let log = Arc::new(Mutex::new(Vec::new()));
        let hi = p.register_domain(DomainAttr::new("hi", Priority(1))).unwrap();
        let mid = p.register_domain(DomainAttr::new("mid", Priority(2))).unwrap();

        p.catch_event(
            hi,
            PipelineEvent::Schedule,
            Some(recorder(&log, "hi", EventDisposition::Propagate)),
        )
        .unwrap();
        p.catch_event(
            mid,
            PipelineEvent::Schedule,
            Some(recorder(&log, "mid", EventDisposition::Absorb)),
        )
        .unwrap();
        p.catch_event(
            DomainId::ROOT,
            PipelineEvent::Schedule,
            Some(recorder(&log, "root", EventDisposition::Propagate)),
        )
        .unwrap();

        assert!(p.dispatch_event(PipelineEvent::Schedule, &EventData::Task(7)));
        assert_eq!(*log.lock(), alloc::vec!["hi", "mid"]);
        assert_eq!(p.current_domain(), DomainId::ROOT);
    }

    #[test]
    fn test_handler_runs_as_catching_domain() {
        let p = pipeline();
        let hi = p.register_domain(DomainAttr::new("hi", Priority(1))).unwrap();
        let seen = Arc::new(Mutex::new(None));

        let probe = seen.clone();
        let weak = Arc::downgrade(&p);
        p.catch_event(
            hi,
            PipelineEvent::SigWake,
            Some(event_handler(move |_, origin, _| {
                if let Some(p) = weak.upgrade() {
                    *probe.lock() = Some((p.current_domain(), origin));
                }
                EventDisposition::Propagate
            })),
        )
        .unwrap();

        assert!(!p.dispatch_event(PipelineEvent::SigWake, &EventData::None));
        assert_eq!(*seen.lock(), Some((hi, DomainId::ROOT)));
        assert_eq!(p.current_domain(), DomainId::ROOT);
    }

    #[test]
    fn test_migration_stops_walk() {
        let p = pipeline();
        let log = Arc::new(Mutex::new(Vec::new()));
        let hi = p.register_domain(DomainAttr::new("hi", Priority(1))).unwrap();
        let mid = p.register_domain(DomainAttr::new("mid", Priority(2))).unwrap();

        let weak = Arc::downgrade(&p);
        let trail = log.clone();
        p.catch_event(
            hi,
            PipelineEvent::Setsched,
            Some(event_handler(move |_, _, _| {
                trail.lock().push("hi");
                if let Some(p) = weak.upgrade() {
                    p.set_current_domain(mid).unwrap();
                }
                EventDisposition::Propagate
            })),
        )
        .unwrap();
        p.catch_event(
            mid,
            PipelineEvent::Setsched,
            Some(recorder(&log, "mid", EventDisposition::Propagate)),
        )
        .unwrap();
        p.catch_event(
            DomainId::ROOT,
            PipelineEvent::Setsched,
            Some(recorder(&log, "root", EventDisposition::Propagate)),
        )
        .unwrap();

        assert!(!p.dispatch_event(PipelineEvent::Setsched, &EventData::None));
        assert_eq!(*log.lock(), alloc::vec!["hi", "mid"]);
        assert_eq!(p.current_domain(), mid);
    }

    #[test]
    fn test_pending_irqs_flushed_on_the_way() {
        let p = pipeline();
        let hi = p.register_domain(DomainAttr::new("hi", Priority(1))).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let probe = hits.clone();
        p.virtualize_irq(
            hi,
            Irq(12),
            Some(irq_handler(move |_, _| {
                probe.fetch_add(1, Ordering::SeqCst);
            })),
            None,
            IrqControl::HANDLE,
        )
        .unwrap();

        p.stall_domain(hi).unwrap();
        p.trigger(Irq(12)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // Unstalled without a walk, so only the event pass can deliver it.
        let cpu = p.controller().current_cpu();
        p.domain(hi).unwrap().cpu(cpu).test_and_clear(crate::domain::StatusFlags::STALL);
        p.dispatch_event(PipelineEvent::Cleanup, &EventData::None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
