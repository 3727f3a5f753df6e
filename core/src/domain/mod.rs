//! # Domains
//!
//! A domain is one participant of the pipeline: a priority, a descriptor
//! for every IRQ line, a handler for every event it catches, and a block
//! of per-CPU data.
//!
//! ## Anatomy
//!
//! ```text
//! ┌──────────────────────────── Domain ────────────────────────────┐
//! │  id ─ name ─ priority ─ flags (AHEAD)                          │
//! │                                                                │
//! │  irqs[NR_IRQS]      control │ handler │ acknowledge │ claim    │
//! │  events[NR_EVENTS]  Option<EventHandler>                       │
//! │  cpu[ncpus]         status │ himask │ lomask │ hits            │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use spin::RwLock;
use strata_hal::{CpuId, IrqContext, Level};

use crate::event::{EventHandler, PipelineEvent, NR_EVENTS};
use crate::interrupts::{Irq, IrqControl, NR_IRQS};

pub mod percpu;

pub use percpu::{PerCpuDomainData, StatusFlags, SyncMask};

// =============================================================================
// Identity
// =============================================================================

/// Pipeline rank of a domain; a smaller number is more urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u32);

impl Priority {
    /// Most urgent priority
    pub const HEAD: Priority = Priority(0);
    /// Reserved for the root domain
    pub const ROOT: Priority = Priority(u32::MAX);
}

/// Stable domain handle (arena slot + generation)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(u32);

impl DomainId {
    /// The root domain
    pub const ROOT: DomainId = DomainId(0);

    pub(crate) const fn new(slot: usize, generation: u32) -> Self {
        DomainId((generation << 8) | (slot as u32 & 0xff))
    }

    /// Arena slot
    #[inline]
    pub const fn slot(self) -> usize {
        (self.0 & 0xff) as usize
    }

    /// Registration generation
    #[inline]
    pub const fn generation(self) -> u32 {
        self.0 >> 8
    }

    /// Packed representation
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) const fn from_raw(raw: u32) -> Self {
        DomainId(raw)
    }
}

impl fmt::Debug for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainId({}:{})", self.slot(), self.generation())
    }
}

bitflags! {
    /// Domain-wide flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DomainFlags: u32 {
        /// Heads the pipeline: owns the CPU first, never preempted by a walk
        const AHEAD = 1 << 0;
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// What a handler learns about the delivery it is running for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerContext {
    /// CPU the handler runs on
    pub cpu: CpuId,
    /// Domain the handler belongs to
    pub domain: DomainId,
    /// Live register frame, only on a direct (wired) hardware delivery
    pub regs: Option<IrqContext>,
}

/// IRQ handler capability
pub trait IrqHandler: Send + Sync {
    /// Handle one occurrence of `irq`
    fn handle(&self, irq: Irq, ctx: HandlerContext);
}

impl<F> IrqHandler for F
where
    F: Fn(Irq, HandlerContext) + Send + Sync,
{
    fn handle(&self, irq: Irq, ctx: HandlerContext) {
        self(irq, ctx)
    }
}

/// IRQ acknowledge capability
pub trait IrqAcknowledge: Send + Sync {
    /// Acknowledge `irq` at the interrupt controller
    fn acknowledge(&self, irq: Irq);
}

impl<F> IrqAcknowledge for F
where
    F: Fn(Irq) + Send + Sync,
{
    fn acknowledge(&self, irq: Irq) {
        self(irq)
    }
}

/// Wrap a closure as a shareable IRQ handler
pub fn irq_handler<F>(f: F) -> Arc<dyn IrqHandler>
where
    F: Fn(Irq, HandlerContext) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a shareable acknowledge routine
pub fn irq_ack<F>(f: F) -> Arc<dyn IrqAcknowledge>
where
    F: Fn(Irq) + Send + Sync + 'static,
{
    Arc::new(f)
}

// =============================================================================
// Registration Attributes
// =============================================================================

/// One-shot routine run in the context of a freshly registered domain
pub type DomainEntry = Box<dyn FnOnce(DomainId) + Send>;

/// Attributes of a domain being registered
pub struct DomainAttr {
    /// Human-readable name
    pub name: &'static str,
    /// Pipeline rank
    pub priority: Priority,
    /// Optional entry routine
    pub entry: Option<DomainEntry>,
}

impl DomainAttr {
    /// Attributes with no entry routine
    pub fn new(name: &'static str, priority: Priority) -> Self {
        Self {
            name,
            priority,
            entry: None,
        }
    }

    /// Run `entry` once the domain is in the pipeline
    pub fn with_entry<F>(mut self, entry: F) -> Self
    where
        F: FnOnce(DomainId) + Send + 'static,
    {
        self.entry = Some(Box::new(entry));
        self
    }
}

impl fmt::Debug for DomainAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainAttr")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("entry", &self.entry.is_some())
            .finish()
    }
}

/// Snapshot of a domain's identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainInfo {
    /// Handle
    pub id: DomainId,
    /// Name
    pub name: &'static str,
    /// Pipeline rank
    pub priority: Priority,
    /// Domain-wide flags
    pub flags: DomainFlags,
}

// =============================================================================
// Descriptors
// =============================================================================

/// One IRQ line as configured in one domain
#[derive(Clone)]
pub(crate) struct IrqDescriptor {
    pub(crate) control: IrqControl,
    pub(crate) handler: Option<Arc<dyn IrqHandler>>,
    pub(crate) ack: Option<Arc<dyn IrqAcknowledge>>,
    /// Level this line holds in the pipeline's level tracker
    pub(crate) claim: Option<Level>,
}

impl Default for IrqDescriptor {
    /// Pass, don't handle
    fn default() -> Self {
        Self {
            control: IrqControl::PASS,
            handler: None,
            ack: None,
            claim: None,
        }
    }
}

// =============================================================================
// Domain
// =============================================================================

/// A pipeline participant
pub struct Domain {
    id: DomainId,
    name: &'static str,
    priority: Priority,
    flags: AtomicU32,
    irqs: Box<[RwLock<IrqDescriptor>]>,
    events: RwLock<[Option<Arc<dyn EventHandler>>; NR_EVENTS]>,
    cpus: Box<[PerCpuDomainData]>,
}

impl Domain {
    pub(crate) fn new(id: DomainId, name: &'static str, priority: Priority, ncpus: usize) -> Self {
        let irqs: Vec<RwLock<IrqDescriptor>> =
            (0..NR_IRQS).map(|_| RwLock::new(IrqDescriptor::default())).collect();
        let cpus: Vec<PerCpuDomainData> = (0..ncpus).map(|_| PerCpuDomainData::new()).collect();

        Self {
            id,
            name,
            priority,
            flags: AtomicU32::new(0),
            irqs: irqs.into_boxed_slice(),
            events: RwLock::new([const { None }; NR_EVENTS]),
            cpus: cpus.into_boxed_slice(),
        }
    }

    /// Handle
    #[inline]
    pub fn id(&self) -> DomainId {
        self.id
    }

    /// Name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Pipeline rank
    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Check if this is the root domain
    #[inline]
    pub fn is_root(&self) -> bool {
        self.id == DomainId::ROOT
    }

    /// Domain-wide flags
    #[inline]
    pub fn flags(&self) -> DomainFlags {
        DomainFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Check if the domain heads the pipeline
    #[inline]
    pub fn is_ahead(&self) -> bool {
        self.flags().contains(DomainFlags::AHEAD)
    }

    pub(crate) fn set_ahead(&self, ahead: bool) {
        if ahead {
            self.flags.fetch_or(DomainFlags::AHEAD.bits(), Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!DomainFlags::AHEAD.bits(), Ordering::AcqRel);
        }
    }

    /// Identity snapshot
    pub fn info(&self) -> DomainInfo {
        DomainInfo {
            id: self.id,
            name: self.name,
            priority: self.priority,
            flags: self.flags(),
        }
    }

    /// Per-CPU data for `cpu`
    ///
    /// # Panics
    ///
    /// Panics if `cpu` is beyond the CPU count the pipeline was built for.
    #[inline]
    pub fn cpu(&self, cpu: CpuId) -> &PerCpuDomainData {
        &self.cpus[cpu.index()]
    }

    // -------------------------------------------------------------------------
    // IRQ descriptors
    // -------------------------------------------------------------------------

    /// Control word of `irq`
    #[inline]
    pub fn control(&self, irq: Irq) -> IrqControl {
        self.irqs[irq.index()].read().control
    }

    /// Handler installed for `irq`
    pub fn handler(&self, irq: Irq) -> Option<Arc<dyn IrqHandler>> {
        self.irqs[irq.index()].read().handler.clone()
    }

    /// Acknowledge routine installed for `irq`
    pub fn acknowledge_routine(&self, irq: Irq) -> Option<Arc<dyn IrqAcknowledge>> {
        self.irqs[irq.index()].read().ack.clone()
    }

    /// Run the acknowledge routine of `irq`, if any
    ///
    /// Returns whether a routine ran.
    pub(crate) fn acknowledge(&self, irq: Irq) -> bool {
        let desc = self.irqs[irq.index()].read();
        match &desc.ack {
            Some(ack) => {
                ack.acknowledge(irq);
                true
            },
            None => false,
        }
    }

    pub(crate) fn descriptor(&self, irq: Irq) -> &RwLock<IrqDescriptor> {
        &self.irqs[irq.index()]
    }

    /// Drop every level claim, returning the levels released
    pub(crate) fn take_claims(&self) -> Vec<Level> {
        self.irqs
            .iter()
            .filter_map(|slot| slot.write().claim.take())
            .collect()
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Handler catching `event`
    pub fn event_handler(&self, event: PipelineEvent) -> Option<Arc<dyn EventHandler>> {
        self.events.read()[event.index()].clone()
    }

    pub(crate) fn replace_event_handler(
        &self,
        event: PipelineEvent,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Option<Arc<dyn EventHandler>> {
        core::mem::replace(&mut self.events.write()[event.index()], handler)
    }

    /// Events this domain catches
    pub(crate) fn caught_events(&self) -> Vec<PipelineEvent> {
        let events = self.events.read();
        PipelineEvent::ALL
            .iter()
            .copied()
            .filter(|e| events[e.index()].is_some())
            .collect()
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_domain_id_packing() {
        let id = DomainId::new(3, 17);
        assert_eq!(id.slot(), 3);
        assert_eq!(id.generation(), 17);
        assert_eq!(DomainId::from_raw(id.raw()), id);
        assert_eq!(DomainId::ROOT.slot(), 0);
        assert_ne!(DomainId::new(3, 18), id);
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::HEAD < Priority(1));
        assert!(Priority(1) < Priority::ROOT);
    }

    #[test]
    fn test_fresh_domain() {
        let domain = Domain::new(DomainId::new(1, 1), "rt", Priority(1), 2);
        assert_eq!(domain.control(Irq(5)), IrqControl::PASS);
        assert!(domain.handler(Irq(5)).is_none());
        assert!(!domain.is_ahead());
        assert!(!domain.is_root());
        assert!(!domain.cpu(CpuId(1)).has_pending());
        assert!(domain.caught_events().is_empty());
    }

    #[test]
    fn test_ahead_flag() {
        let domain = Domain::new(DomainId::new(1, 1), "rt", Priority(1), 1);
        domain.set_ahead(true);
        assert!(domain.is_ahead());
        assert_eq!(domain.info().flags, DomainFlags::AHEAD);
        domain.set_ahead(false);
        assert!(!domain.is_ahead());
    }

    #[test]
    fn test_acknowledge_runs_installed_routine() {
        let count = Arc::new(AtomicUsize::new(0));
        let domain = Domain::new(DomainId::new(1, 1), "rt", Priority(1), 1);
        assert!(!domain.acknowledge(Irq(4)));

        let seen = count.clone();
        domain.descriptor(Irq(4)).write().ack = Some(irq_ack(move |irq| {
            assert_eq!(irq, Irq(4));
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(domain.acknowledge(Irq(4)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_take_claims() {
        let domain = Domain::new(DomainId::new(1, 1), "rt", Priority(1), 1);
        domain.descriptor(Irq(2)).write().claim = Some(Level(2));
        domain.descriptor(Irq(9)).write().claim = Some(Level(9));
        let claims = domain.take_claims();
        assert_eq!(claims, alloc::vec![Level(2), Level(9)]);
        assert!(domain.take_claims().is_empty());
    }
}
