//! # Pipeline Events
//!
//! Non-IRQ notifications the general-purpose kernel raises (system call
//! entry, task rescheduling, signal wakeups, ...) and that domains above
//! root may want to see first.
//!
//! Events travel the same pipeline as interrupts, highest priority first.
//! Each domain has at most one handler per event; a handler that answers
//! [`EventDisposition::Absorb`] stops the walk.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::domain::DomainId;
use crate::syscall::SyscallContext;

// =============================================================================
// Event Kinds
// =============================================================================

/// Number of event kinds
pub const NR_EVENTS: usize = 6;

/// Events a domain can catch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum PipelineEvent {
    /// System call entry in the root domain
    Syscall  = 0,
    /// Root is about to switch tasks
    Schedule = 1,
    /// A sleeping task is being woken by a signal
    SigWake  = 2,
    /// A task's scheduling parameters changed
    Setsched = 3,
    /// A task is exiting
    Exit     = 4,
    /// A task's resources are being released
    Cleanup  = 5,
}

impl PipelineEvent {
    /// Every event kind, in table order
    pub const ALL: [PipelineEvent; NR_EVENTS] = [
        PipelineEvent::Syscall,
        PipelineEvent::Schedule,
        PipelineEvent::SigWake,
        PipelineEvent::Setsched,
        PipelineEvent::Exit,
        PipelineEvent::Cleanup,
    ];

    /// Index into per-event tables
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Payload carried with an event
#[derive(Debug, Clone, Copy)]
pub enum EventData<'a> {
    /// System call being entered
    Syscall(&'a SyscallContext),
    /// Task the event is about
    Task(u64),
    /// No payload
    None,
}

/// Answer of an event handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Let lower-priority domains see the event
    Propagate,
    /// Stop the walk here
    Absorb,
}

// =============================================================================
// Handlers
// =============================================================================

/// Event handler capability
pub trait EventHandler: Send + Sync {
    /// Handle `event`, raised while `origin` was the current domain
    fn on_event(
        &self,
        event: PipelineEvent,
        origin: DomainId,
        data: &EventData<'_>,
    ) -> EventDisposition;
}

impl<F> EventHandler for F
where
    F: Fn(PipelineEvent, DomainId, &EventData<'_>) -> EventDisposition + Send + Sync,
{
    fn on_event(
        &self,
        event: PipelineEvent,
        origin: DomainId,
        data: &EventData<'_>,
    ) -> EventDisposition {
        self(event, origin, data)
    }
}

/// Wrap a closure as a shareable event handler
pub fn event_handler<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(PipelineEvent, DomainId, &EventData<'_>) -> EventDisposition + Send + Sync + 'static,
{
    Arc::new(f)
}

// =============================================================================
// Monitors
// =============================================================================

/// How many domains catch each event
pub struct EventMonitors {
    counts: [AtomicU32; NR_EVENTS],
}

impl EventMonitors {
    /// No event monitored
    pub const fn new() -> Self {
        Self {
            counts: [const { AtomicU32::new(0) }; NR_EVENTS],
        }
    }

    /// One more domain catches `event`
    pub fn add(&self, event: PipelineEvent) {
        self.counts[event.index()].fetch_add(1, Ordering::AcqRel);
    }

    /// One domain stopped catching `event`
    pub fn remove(&self, event: PipelineEvent) {
        let _ = self.counts[event.index()].fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |c| c.checked_sub(1),
        );
    }

    /// Check if any domain catches `event`
    pub fn is_monitored(&self, event: PipelineEvent) -> bool {
        self.counts[event.index()].load(Ordering::Acquire) != 0
    }
}

impl Default for EventMonitors {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for EventMonitors {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut list = f.debug_list();
        for event in PipelineEvent::ALL {
            if self.is_monitored(event) {
                list.entry(&event);
            }
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_counts() {
        let monitors = EventMonitors::new();
        assert!(!monitors.is_monitored(PipelineEvent::Syscall));
        monitors.add(PipelineEvent::Syscall);
        monitors.add(PipelineEvent::Syscall);
        monitors.remove(PipelineEvent::Syscall);
        assert!(monitors.is_monitored(PipelineEvent::Syscall));
        monitors.remove(PipelineEvent::Syscall);
        assert!(!monitors.is_monitored(PipelineEvent::Syscall));
        monitors.remove(PipelineEvent::Syscall);
        assert!(!monitors.is_monitored(PipelineEvent::Syscall));
    }

    #[test]
    fn test_event_table_order() {
        for (i, event) in PipelineEvent::ALL.iter().enumerate() {
            assert_eq!(event.index(), i);
        }
    }

    #[test]
    fn test_closure_handler() {
        let handler = event_handler(|event, _origin, data| match (event, data) {
            (PipelineEvent::Exit, EventData::Task(42)) => EventDisposition::Absorb,
            _ => EventDisposition::Propagate,
        });
        let root = DomainId::ROOT;
        assert_eq!(
            handler.on_event(PipelineEvent::Exit, root, &EventData::Task(42)),
            EventDisposition::Absorb
        );
        assert_eq!(
            handler.on_event(PipelineEvent::Exit, root, &EventData::None),
            EventDisposition::Propagate
        );
    }
}
