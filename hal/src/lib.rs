//! # Strata Hardware Abstraction Layer
//!
//! The narrow hardware seam the interrupt pipeline runs on top of. The
//! pipeline itself never touches a register: everything it needs from the
//! platform goes through [`InterruptController`].
//!
//! ## What the platform provides
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      InterruptController                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Local masking     save_and_disable / restore / enable           │
//! │  CPU identity      current_cpu / cpu_count / cpu_freq            │
//! │  Priority levels   irq_level / restrict_levels / release_levels  │
//! └──────────────────────────────────────────────────────────────────┘
//!              │                                   │
//!              ▼                                   ▼
//!      InterruptGuard (RAII)               strata-core pipeline
//! ```
//!
//! ## Backends
//!
//! - `host` feature: [`host::HostController`], a fully simulated controller
//!   used by the test suites and by host-side tooling.
//! - Native backends live with the board support code and implement the
//!   same trait.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod cpu;
pub mod irq;

#[cfg(any(test, feature = "host"))]
pub mod host;

pub use cpu::{CpuId, MAX_CPUS};
pub use irq::{
    without_interrupts, InterruptController, InterruptGuard, IrqContext, IrqFlags, Level,
    LevelMask, NR_HW_IRQS, NR_LEVELS,
};
