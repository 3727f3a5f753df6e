//! # Strata Interrupt Pipeline
//!
//! A real-time interrupt pipeline: several independent interrupt-handling
//! domains share one CPU's physical interrupt line, each seeing a
//! virtualized, priority-ordered view of every IRQ before the
//! general-purpose kernel does. The kernel itself is the lowest-priority
//! *root* domain.
//!
//! ## Architecture
//!
//! ```text
//!        hardware trap / trigger()
//!                  │
//!                  ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │                           Pipeline                            │
//! │                                                               │
//! │   ┌─────────┐    ┌─────────┐           ┌──────────────────┐   │
//! │   │  head   │──▶ │ domain  │──▶ ... ──▶│ root (GP kernel) │   │
//! │   └─────────┘    └─────────┘           └──────────────────┘   │
//! │        HANDLE ⇒ pending    PASS ⇒ next    STALL ⇒ deferred    │
//! │                                                               │
//! │   dispatch ─ stall/sync ─ critical section ─ events/syscalls  │
//! └───────────────────────────────────────────────────────────────┘
//!                  │
//!                  ▼
//!        strata-hal InterruptController
//! ```
//!
//! ## Components
//!
//! - **Domains**: priority-ranked participants with per-IRQ descriptors
//!   and per-CPU pending state
//! - **Dispatcher**: marks pending work, acknowledges once, enters the
//!   highest-priority domain that has something to run
//! - **Stall/Sync Engine**: virtual interrupt masking and the passes that
//!   flush deferred work
//! - **Events**: syscall entry and task notifications walking the same
//!   pipeline

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod domain;
pub mod error;
pub mod event;
pub mod interrupts;
pub mod pipeline;
pub mod syscall;


pub use config::PipelineConfig;
pub use domain::{
    irq_ack, irq_handler, Domain, DomainAttr, DomainFlags, DomainId, DomainInfo, HandlerContext,
    IrqAcknowledge, IrqHandler, Priority, StatusFlags, SyncMask,
};
pub use error::{PipelineError, PipelineResult};
pub use event::{
    event_handler, EventData, EventDisposition, EventHandler, PipelineEvent,
};
pub use interrupts::{Irq, IrqControl, NR_IRQS, NR_VIRQS, VIRQ_BASE, VIRQ_LEVEL};
pub use pipeline::{CriticalSection, IrqStats, Pipeline, SysInfo, TailHook, MAX_DOMAINS};
pub use syscall::{SyscallContext, SyscallDisposition};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
