//! # Interrupt Pipeline
//!
//! The pipeline owns every domain and decides, for each interrupt
//! occurrence, which domains see it and which domain runs next.
//!
//! ## Layout
//!
//! ```text
//!                 ┌──────────── Stages (immutable snapshot) ────────────┐
//!                 │ arena: [slot 0: root] [slot 1] [slot 2] ... [slot 7] │
//!   RwLock<Arc<>> │ order: head ──▶ ... ──▶ root   (ascending priority)  │
//!                 └─────────────────────────────────────────────────────┘
//!
//!   per CPU:      current domain │ last timer context
//!   global:       level depth │ virq map │ event monitors │ tail hook
//! ```
//!
//! Mutations build a new `Stages` value under the critical section and swap
//! it in. Dispatch clones the snapshot and never holds a lock while a
//! handler runs, so handlers may freely re-enter the pipeline.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use arrayvec::ArrayVec;
use log::{debug, error, info, warn};
use spin::{Mutex, RwLock};
use static_assertions::const_assert;
use strata_hal::{CpuId, InterruptController, IrqContext, Level, LevelMask};

use crate::config::PipelineConfig;
use crate::domain::{
    Domain, DomainAttr, DomainEntry, DomainId, DomainInfo, IrqAcknowledge, IrqHandler, Priority,
};
use crate::error::{PipelineError, PipelineResult};
use crate::event::EventMonitors;
use crate::interrupts::{Irq, IrqControl, LevelDepth, VirqMap, VIRQ_LEVEL};

mod critical;
mod dispatch;
mod events;
mod stall;

pub use critical::CriticalSection;

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of registered domains, root included
pub const MAX_DOMAINS: usize = 8;

const_assert!(MAX_DOMAINS <= 256);

const GENERATION_MASK: u32 = 0x00ff_ffff;

/// Routine run after wired handlers, at root sync and at syscall entry
pub type TailHook = Arc<dyn Fn() + Send + Sync>;

// =============================================================================
// Info Types
// =============================================================================

/// Platform facts reported to domains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysInfo {
    /// Online CPUs
    pub ncpus: usize,
    /// Core clock in Hz
    pub cpufreq: u64,
    /// Timer line, if one is configured
    pub timer_irq: Option<Irq>,
    /// Timer clock in Hz
    pub timer_freq: u64,
}

/// Per-CPU counters of one IRQ in one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrqStats {
    /// Undelivered occurrences
    pub pending: u32,
    /// Delivered occurrences
    pub delivered: u32,
}

// =============================================================================
// Stages
// =============================================================================

/// One published view of the pipeline
#[derive(Clone)]
pub(crate) struct Stages {
    root: Arc<Domain>,
    arena: [Option<Arc<Domain>>; MAX_DOMAINS],
    order: ArrayVec<Arc<Domain>, MAX_DOMAINS>,
}

impl Stages {
    fn with_root(root: Arc<Domain>) -> Self {
        let mut arena: [Option<Arc<Domain>>; MAX_DOMAINS] = Default::default();
        arena[DomainId::ROOT.slot()] = Some(root.clone());
        let mut order = ArrayVec::new();
        order.push(root.clone());
        Self { root, arena, order }
    }

    /// Domain named by `id`, if it is still registered
    pub(crate) fn get(&self, id: DomainId) -> Option<&Arc<Domain>> {
        self.arena
            .get(id.slot())?
            .as_ref()
            .filter(|domain| domain.id() == id)
    }

    /// Pipeline position of `id`
    pub(crate) fn position(&self, id: DomainId) -> Option<usize> {
        self.order.iter().position(|domain| domain.id() == id)
    }

    /// Pipeline position of `id`, root's position if unknown
    pub(crate) fn position_or_root(&self, id: DomainId) -> usize {
        self.position(id).unwrap_or_else(|| self.root_position())
    }

    /// Position of root, which always closes the order
    fn root_position(&self) -> usize {
        match self.order.last() {
            Some(last) if Arc::ptr_eq(last, &self.root) => self.order.len() - 1,
            _ => corrupted("root missing from the order"),
        }
    }

    /// Domain at pipeline position `pos`
    pub(crate) fn at(&self, pos: usize) -> Option<&Arc<Domain>> {
        self.order.get(pos)
    }

    pub(crate) fn root(&self) -> &Arc<Domain> {
        &self.root
    }

    pub(crate) fn head(&self) -> &Arc<Domain> {
        self.order
            .first()
            .unwrap_or_else(|| corrupted("empty order"))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Domain>> {
        self.order.iter()
    }

    fn free_slot(&self) -> Option<usize> {
        self.arena.iter().position(Option::is_none)
    }

    fn inserted(&self, domain: Arc<Domain>) -> PipelineResult<Self> {
        let mut next = self.clone();
        let pos = next
            .order
            .iter()
            .position(|d| d.priority() > domain.priority())
            .unwrap_or(next.order.len());
        next.order
            .try_insert(pos, domain.clone())
            .map_err(|_| PipelineError::TooManyDomains)?;
        let slot = domain.id().slot();
        next.arena[slot] = Some(domain);
        next.mark_head();
        Ok(next)
    }

    fn removed(&self, id: DomainId) -> Self {
        let mut next = self.clone();
        next.order.retain(|d| d.id() != id);
        next.arena[id.slot()] = None;
        next.mark_head();
        next
    }

    /// Recompute the AHEAD flag
    fn mark_head(&self) {
        for (pos, domain) in self.order.iter().enumerate() {
            domain.set_ahead(pos == 0 && !domain.is_root());
        }
    }
}

#[cold]
fn corrupted(what: &str) -> ! {
    error!("pipeline corrupted: {}", what);
    panic!("pipeline corrupted: {}", what);
}

// =============================================================================
// Per-CPU State
// =============================================================================

struct CpuState {
    current: AtomicU32,
    tick: Mutex<Option<IrqContext>>,
}

impl CpuState {
    fn new() -> Self {
        Self {
            current: AtomicU32::new(DomainId::ROOT.raw()),
            tick: Mutex::new(None),
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Interrupt pipeline over an interrupt controller
pub struct Pipeline<C: InterruptController> {
    controller: C,
    config: PipelineConfig,
    stages: RwLock<Arc<Stages>>,
    critical: Mutex<()>,
    cpus: Vec<CpuState>,
    levels: LevelDepth,
    virqs: VirqMap,
    monitors: EventMonitors,
    tail_hook: RwLock<Option<TailHook>>,
    generation: AtomicU32,
}

impl<C: InterruptController> Pipeline<C> {
    /// Create a pipeline holding only the root domain
    pub fn new(controller: C, config: PipelineConfig) -> Self {
        let ncpus = controller.cpu_count();
        let root = Arc::new(Domain::new(DomainId::ROOT, "root", Priority::ROOT, ncpus));

        info!("pipeline: {} cpu(s), root domain installed", ncpus);

        Self {
            controller,
            config,
            stages: RwLock::new(Arc::new(Stages::with_root(root))),
            critical: Mutex::new(()),
            cpus: (0..ncpus).map(|_| CpuState::new()).collect(),
            levels: LevelDepth::new(),
            virqs: VirqMap::new(),
            monitors: EventMonitors::new(),
            tail_hook: RwLock::new(None),
            generation: AtomicU32::new(1),
        }
    }

    /// Interrupt controller
    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Snapshot plumbing
    // -------------------------------------------------------------------------

    pub(crate) fn snapshot(&self) -> Arc<Stages> {
        self.stages.read().clone()
    }

    fn publish(&self, stages: Stages) {
        *self.stages.write() = Arc::new(stages);
    }

    fn cpu_state(&self, cpu: CpuId) -> &CpuState {
        &self.cpus[cpu.index()]
    }

    pub(crate) fn current_id(&self, cpu: CpuId) -> DomainId {
        DomainId::from_raw(self.cpu_state(cpu).current.load(Ordering::Acquire))
    }

    pub(crate) fn set_current(&self, cpu: CpuId, id: DomainId) {
        self.cpu_state(cpu).current.store(id.raw(), Ordering::Release);
    }

    /// Current domain of `cpu` in `stages`, root if it went stale
    pub(crate) fn current_in<'s>(&self, stages: &'s Stages, cpu: CpuId) -> &'s Arc<Domain> {
        stages.get(self.current_id(cpu)).unwrap_or(stages.root())
    }

    /// Level an occurrence of `irq` is queued at
    pub(crate) fn level_of(&self, irq: Irq) -> Level {
        if irq.is_virtual() {
            VIRQ_LEVEL
        } else {
            self.controller.irq_level(irq.0)
        }
    }

    pub(crate) fn run_tail_hook(&self) {
        let hook = self.tail_hook.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub(crate) fn monitors(&self) -> &EventMonitors {
        &self.monitors
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// The root domain
    pub fn root(&self) -> Arc<Domain> {
        self.snapshot().root().clone()
    }

    /// The highest-priority domain
    pub fn head(&self) -> Arc<Domain> {
        self.snapshot().head().clone()
    }

    /// Domain named by `id`
    pub fn domain(&self, id: DomainId) -> Option<Arc<Domain>> {
        self.snapshot().get(id).cloned()
    }

    /// Identity snapshot of a domain
    pub fn domain_info(&self, id: DomainId) -> PipelineResult<DomainInfo> {
        self.snapshot()
            .get(id)
            .map(|domain| domain.info())
            .ok_or(PipelineError::UnknownHandle)
    }

    /// Every domain, highest priority first
    pub fn domains(&self) -> Vec<DomainInfo> {
        self.snapshot().iter().map(|domain| domain.info()).collect()
    }

    /// Current domain of the calling CPU
    pub fn current_domain(&self) -> DomainId {
        let stages = self.snapshot();
        let cpu = self.controller.current_cpu();
        self.current_in(&stages, cpu).id()
    }

    /// Make `id` the current domain of the calling CPU
    pub fn set_current_domain(&self, id: DomainId) -> PipelineResult<()> {
        if self.snapshot().get(id).is_none() {
            return Err(PipelineError::UnknownHandle);
        }
        self.set_current(self.controller.current_cpu(), id);
        Ok(())
    }

    /// Platform facts
    pub fn sysinfo(&self) -> SysInfo {
        let cpufreq = self.controller.cpu_freq();
        SysInfo {
            ncpus: self.controller.cpu_count(),
            cpufreq,
            timer_irq: self.config.timer_irq(),
            timer_freq: cpufreq,
        }
    }

    /// Register frame of the last timer interrupt on the calling CPU
    pub fn tick_context(&self) -> Option<IrqContext> {
        *self.cpu_state(self.controller.current_cpu()).tick.lock()
    }

    pub(crate) fn record_tick(&self, cpu: CpuId, ctx: IrqContext) {
        *self.cpu_state(cpu).tick.lock() = Some(ctx);
    }

    /// Counters of `irq` in domain `id` on the calling CPU
    pub fn irq_stats(&self, id: DomainId, irq: Irq) -> PipelineResult<IrqStats> {
        if !irq.is_valid() {
            return Err(PipelineError::InvalidIrq);
        }
        let stages = self.snapshot();
        let domain = stages.get(id).ok_or(PipelineError::UnknownHandle)?;
        let data = domain.cpu(self.controller.current_cpu());
        Ok(IrqStats {
            pending: data.pending_hits(irq),
            delivered: data.delivered(irq),
        })
    }

    /// Levels some domain above root depends on
    pub fn level_mask(&self) -> LevelMask {
        self.levels.mask()
    }

    /// Install or remove the IRQ tail hook
    pub fn set_irq_tail_hook(&self, hook: Option<TailHook>) {
        *self.tail_hook.write() = hook;
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Insert a domain into the pipeline
    ///
    /// The optional entry routine runs after the pipeline is unlocked, with
    /// the new domain current on the calling CPU.
    pub fn register_domain(&self, attr: DomainAttr) -> PipelineResult<DomainId> {
        let DomainAttr {
            name,
            priority,
            entry,
        } = attr;

        let id = {
            let _cs = self.critical_enter();
            let stages = self.snapshot();

            if priority == Priority::ROOT || stages.iter().any(|d| d.priority() == priority) {
                warn!("domain {}: priority {} already taken", name, priority.0);
                return Err(PipelineError::DuplicatePriority);
            }

            let slot = stages.free_slot().ok_or_else(|| {
                warn!("domain {}: no free slot", name);
                PipelineError::TooManyDomains
            })?;

            let generation = self.next_generation();
            let id = DomainId::new(slot, generation);
            let domain = Arc::new(Domain::new(id, name, priority, self.cpus.len()));

            self.publish(stages.inserted(domain)?);
            id
        };

        info!("domain {} registered as {:?} at priority {}", name, id, priority.0);

        if let Some(entry) = entry {
            self.run_entry(id, entry);
        }

        Ok(id)
    }

    fn next_generation(&self) -> u32 {
        loop {
            let generation = self.generation.fetch_add(1, Ordering::Relaxed) & GENERATION_MASK;
            if generation != 0 {
                return generation;
            }
        }
    }

    fn run_entry(&self, id: DomainId, entry: DomainEntry) {
        let cpu = self.controller.current_cpu();
        let prev = self.current_id(cpu);
        self.set_current(cpu, id);
        entry(id);
        if self.current_id(cpu) == id {
            self.set_current(cpu, prev);
        }
    }

    /// Remove a domain from the pipeline
    pub fn unregister_domain(&self, id: DomainId) -> PipelineResult<()> {
        if id == DomainId::ROOT {
            warn!("refusing to unregister the root domain");
            return Err(PipelineError::CannotRemoveRoot);
        }

        let _cs = self.critical_enter();
        let stages = self.snapshot();
        let domain = stages.get(id).cloned().ok_or(PipelineError::UnknownHandle)?;

        for level in domain.take_claims() {
            self.levels.disable(level);
        }
        for event in domain.caught_events() {
            domain.replace_event_handler(event, None);
            self.monitors.remove(event);
        }
        for state in self.cpus.iter() {
            let _ = state.current.compare_exchange(
                id.raw(),
                DomainId::ROOT.raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        self.publish(stages.removed(id));
        info!("domain {} ({:?}) unregistered", domain.name(), id);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // IRQ configuration
    // -------------------------------------------------------------------------

    /// Configure how domain `id` treats `irq`
    pub fn virtualize_irq(
        &self,
        id: DomainId,
        irq: Irq,
        handler: Option<Arc<dyn IrqHandler>>,
        ack: Option<Arc<dyn IrqAcknowledge>>,
        control: IrqControl,
    ) -> PipelineResult<()> {
        self.virqs.check(irq)?;

        let _cs = self.critical_enter();
        let stages = self.snapshot();
        let domain = stages.get(id).ok_or(PipelineError::UnknownHandle)?;

        let mut control = control;
        if handler.is_none() {
            control.remove(IrqControl::HANDLE | IrqControl::STICKY | IrqControl::WIRED);
        }

        let ack = match ack {
            None if irq.is_hardware() => stages.root().acknowledge_routine(irq),
            ack => ack,
        };

        let mut desc = domain.descriptor(irq).write();

        if control.contains(IrqControl::EXCLUSIVE) && handler.is_some() && desc.handler.is_some() {
            warn!("{}: exclusive request on a taken line in {}", irq, domain.name());
            return Err(PipelineError::Busy);
        }

        if control.is_wired() && !Arc::ptr_eq(domain, stages.head()) {
            warn!(
                "{}: wired in {} which does not head the pipeline",
                irq,
                domain.name()
            );
        }

        let receives = handler.is_some() && control.receives();
        if irq.is_hardware() && !domain.is_root() {
            match (receives, desc.claim) {
                (true, None) => {
                    let level = self.controller.irq_level(irq.0);
                    self.levels.enable(level);
                    desc.claim = Some(level);
                },
                (false, Some(level)) => {
                    self.levels.disable(level);
                    desc.claim = None;
                },
                _ => {},
            }
        }

        desc.control = control;
        desc.handler = handler;
        desc.ack = ack;

        debug!("{} in {}: {:?}", irq, domain.name(), control);
        Ok(())
    }

    /// Route every hardware line through the root domain
    pub fn enable_pipeline(
        &self,
        handler: Arc<dyn IrqHandler>,
        ack: Arc<dyn IrqAcknowledge>,
    ) -> PipelineResult<()> {
        for line in 0..crate::interrupts::VIRQ_BASE {
            self.virtualize_irq(
                DomainId::ROOT,
                Irq(line),
                Some(handler.clone()),
                Some(ack.clone()),
                IrqControl::HANDLE | IrqControl::PASS,
            )?;
        }
        info!("pipeline enabled: {} hardware lines routed to root", crate::interrupts::VIRQ_BASE);
        Ok(())
    }

    /// Allocate a virtual IRQ
    pub fn alloc_virq(&self) -> PipelineResult<Irq> {
        let irq = self.virqs.alloc()?;
        debug!("allocated {}", irq);
        Ok(irq)
    }

    /// Release a virtual IRQ
    ///
    /// Descriptors installed for it in any domain are cleared.
    pub fn free_virq(&self, irq: Irq) -> PipelineResult<()> {
        let _cs = self.critical_enter();
        self.virqs.free(irq)?;
        for domain in self.snapshot().iter() {
            *domain.descriptor(irq).write() = Default::default();
        }
        debug!("released {}", irq);
        Ok(())
    }
}

impl<C: InterruptController + fmt::Debug> fmt::Debug for Pipeline<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("controller", &self.controller)
            .field("config", &self.config)
            .field("domains", &self.domains())
            .field("levels", &self.levels)
            .field("events", &self.monitors)
            .finish()
    }
}
