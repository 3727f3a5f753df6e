//! # IRQ Dispatch
//!
//! Entry point of every interrupt occurrence, hardware or software.
//!
//! ## Flow
//!
//! ```text
//!   dispatch(irq, ctx)
//!     │
//!     ├── current STICKY? ──────────────── walk head = current
//!     │
//!     ├── pipeline head WIRED? ─── yes ──▶ dispatch_wired(head) ──┐
//!     │                                                           │
//!     ├── mark pass: HANDLE ⇒ pending (+ ack once), !PASS ⇒ stop  │
//!     │                                                           │
//!     ├── delivery walk: head ──▶ current, enter pending stages   │
//!     │                                                           │
//!     └── restore root STALL ◀────────────────────────────────────┘
//! ```
//!
//! Everything here runs with local hardware interrupts masked, except the
//! handlers called while a stage is being synchronized.

use alloc::sync::Arc;

use log::trace;
use strata_hal::{CpuId, InterruptController, InterruptGuard, IrqContext};

use super::{Pipeline, Stages};
use crate::domain::{Domain, HandlerContext, StatusFlags, SyncMask};
use crate::error::PipelineResult;
use crate::interrupts::Irq;

impl<C: InterruptController> Pipeline<C> {
    /// Feed one occurrence of `irq` into the pipeline
    ///
    /// `ctx` is the register frame of a hardware trap; `None` marks a
    /// software occurrence. Software occurrences, virtual IRQs and timer
    /// lines are never acknowledged here.
    pub fn dispatch(&self, irq: Irq, ctx: Option<&IrqContext>) -> PipelineResult<()> {
        self.virqs.check(irq)?;
        let _irq = InterruptGuard::new(&self.controller);
        self.handle_irq(irq, ctx.copied());
        Ok(())
    }

    /// Inject a software occurrence of `irq`
    pub fn trigger(&self, irq: Irq) -> PipelineResult<()> {
        self.virqs.check(irq)?;
        let _irq = InterruptGuard::new(&self.controller);
        trace!("trigger {}", irq);
        self.handle_irq(irq, None);
        Ok(())
    }

    fn handle_irq(&self, irq: Irq, ctx: Option<IrqContext>) {
        let cpu = self.controller.current_cpu();
        let stages = self.snapshot();
        let root = stages.root().cpu(cpu);

        let timer = self.config.is_timer(irq);
        let mut acked = ctx.is_none() || timer || irq.is_virtual();
        if let (true, Some(regs)) = (timer, ctx) {
            self.record_tick(cpu, regs);
        }

        let current = self.current_in(&stages, cpu).clone();
        let mut stalled_before = None;

        let sticky = current.control(irq).is_sticky();
        let from = if sticky {
            stages.position_or_root(current.id())
        } else {
            let head = stages.head();
            if head.control(irq).is_wired() {
                if !acked {
                    head.acknowledge(irq);
                }
                if root.is_sync_deferred() {
                    stalled_before = Some(root.test_and_set(StatusFlags::STALL));
                }
                trace!("{} wired into {}", irq, head.name());
                self.dispatch_wired(&stages, cpu, head, irq, ctx);
                if stalled_before == Some(false) {
                    root.test_and_clear(StatusFlags::STALL);
                }
                return;
            }
            0
        };

        let level = self.level_of(irq);
        for domain in stages.iter().skip(from) {
            let route = domain.control(irq).route();
            if route.handles() {
                domain.cpu(cpu).mark_pending(irq, level);
                if !acked {
                    acked = domain.acknowledge(irq);
                }
            }
            if sticky || !route.passes() {
                break;
            }
        }

        if root.is_sync_deferred() {
            stalled_before = Some(root.test_and_set(StatusFlags::STALL));
        }

        let shortcut = self.config.ahead_shortcut
            && current.is_ahead()
            && !stages.head().cpu(cpu).has_pending();

        if shortcut {
            trace!("{} preempted head {}, no walk", irq, current.name());
        } else {
            self.walk_pipeline(&stages, cpu, from);
        }

        if stalled_before == Some(false) {
            root.test_and_clear(StatusFlags::STALL);
        }
    }

    /// Hand `irq` straight to the head domain
    fn dispatch_wired(
        &self,
        stages: &Stages,
        cpu: CpuId,
        head: &Arc<Domain>,
        irq: Irq,
        regs: Option<IrqContext>,
    ) {
        let data = head.cpu(cpu);

        if data.is_stalled() {
            data.mark_pending(irq, self.level_of(irq));
            return;
        }

        let old = self.current_id(cpu);
        self.set_current(cpu, head.id());

        data.count_delivery(irq);
        data.test_and_set(StatusFlags::STALL);
        if let Some(handler) = head.handler(irq) {
            handler.handle(
                irq,
                HandlerContext {
                    cpu,
                    domain: head.id(),
                    regs,
                },
            );
        }
        self.run_tail_hook();
        data.test_and_clear(StatusFlags::STALL);

        if self.current_id(cpu) == head.id() {
            self.set_current(cpu, old);
            if old == head.id() {
                if data.has_pending() {
                    self.sync_stage(cpu, head, SyncMask::ANY);
                }
                return;
            }
        }

        self.walk_pipeline(stages, cpu, 0);
    }

    /// Delivery walk from pipeline position `from` down to the current
    /// domain
    ///
    /// Stops at the first stalled stage, or when a handler migrates the
    /// CPU to another domain.
    pub(crate) fn walk_pipeline(&self, stages: &Stages, cpu: CpuId, from: usize) {
        let last = stages.position_or_root(self.current_id(cpu));

        for pos in from..=last {
            let Some(domain) = stages.at(pos) else {
                break;
            };
            let data = domain.cpu(cpu);
            if data.is_stalled() {
                break;
            }
            if data.has_pending() && self.enter_stage(cpu, domain) {
                break;
            }
        }
    }

    /// Make `domain` current, drain it, then switch back
    ///
    /// Returns `true` if a handler left another domain current.
    pub(crate) fn enter_stage(&self, cpu: CpuId, domain: &Arc<Domain>) -> bool {
        let prev = self.current_id(cpu);
        self.set_current(cpu, domain.id());
        trace!("entering {}", domain.name());

        self.sync_stage(cpu, domain, SyncMask::ANY);

        if self.current_id(cpu) == domain.id() {
            self.set_current(cpu, prev);
            false
        } else {
            true
        }
    }

    /// Deliver the pending IRQs of `domain` selected by `mask`
    ///
    /// Handlers run with hardware interrupts unmasked and the domain
    /// stalled, one occurrence per handler call.
    pub(crate) fn sync_stage(&self, cpu: CpuId, domain: &Arc<Domain>, mask: SyncMask) {
        let data = domain.cpu(cpu);
        if domain.is_root() && data.is_sync_deferred() {
            return;
        }

        while !data.is_stalled() {
            let Some(irq) = data.take_pending(mask) else {
                break;
            };
            let handler = domain.handler(irq);

            data.test_and_set(StatusFlags::STALL);
            self.controller.enable();
            if let Some(handler) = handler {
                handler.handle(
                    irq,
                    HandlerContext {
                        cpu,
                        domain: domain.id(),
                        regs: None,
                    },
                );
            }
            let _ = self.controller.save_and_disable();
            data.test_and_clear(StatusFlags::STALL);
        }
    }
}
