//! # IRQ Control Word
//!
//! Per-domain, per-line flags deciding how the dispatcher treats an IRQ
//! occurrence at that domain's stage.
//!
//! | Flag      | Meaning                                                   |
//! |-----------|-----------------------------------------------------------|
//! | HANDLE    | Mark the IRQ pending for this domain                      |
//! | PASS      | Keep walking toward root after this domain                |
//! | WIRED     | Head domain takes the IRQ directly, no pending walk       |
//! | STICKY    | Current domain owns every occurrence, nobody else sees it |
//! | EXCLUSIVE | Refuse to replace an installed handler                    |

use bitflags::bitflags;

bitflags! {
    /// Control flags for one IRQ line in one domain
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IrqControl: u32 {
        /// Mark the IRQ pending for this domain
        const HANDLE = 1 << 0;
        /// Continue the walk to the next lower-priority domain
        const PASS = 1 << 1;
        /// Fast path into the head domain
        const WIRED = 1 << 2;
        /// Owned by this domain while it is current
        const STICKY = 1 << 3;
        /// Installation fails if another handler is present
        const EXCLUSIVE = 1 << 4;
    }
}

/// What the general walk does at one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Mark pending here, then continue
    HandleAndPass,
    /// Mark pending here, then stop
    HandleAndStop,
    /// Leave this domain alone, continue
    Pass,
    /// Leave this domain alone, stop
    Stop,
}

impl Route {
    /// Whether this stage gets a pending mark
    #[inline]
    pub const fn handles(self) -> bool {
        matches!(self, Route::HandleAndPass | Route::HandleAndStop)
    }

    /// Whether the walk continues past this stage
    #[inline]
    pub const fn passes(self) -> bool {
        matches!(self, Route::HandleAndPass | Route::Pass)
    }
}

impl IrqControl {
    /// Flags that make a domain a recipient of the line
    pub const RECEIVE: IrqControl = IrqControl::HANDLE
        .union(IrqControl::WIRED)
        .union(IrqControl::STICKY);

    /// Route of the general walk at a stage with these flags
    #[inline]
    pub const fn route(self) -> Route {
        match (self.contains(IrqControl::HANDLE), self.contains(IrqControl::PASS)) {
            (true, true) => Route::HandleAndPass,
            (true, false) => Route::HandleAndStop,
            (false, true) => Route::Pass,
            (false, false) => Route::Stop,
        }
    }

    /// Check for the sticky fast path
    #[inline]
    pub const fn is_sticky(self) -> bool {
        self.contains(IrqControl::STICKY)
    }

    /// Check for the wired fast path
    #[inline]
    pub const fn is_wired(self) -> bool {
        self.contains(IrqControl::WIRED)
    }

    /// Check if the domain wants the line at all
    #[inline]
    pub const fn receives(self) -> bool {
        self.intersects(IrqControl::RECEIVE)
    }
}
