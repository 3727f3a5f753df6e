//! # Syscall Interception
//!
//! The root domain's system call entry runs through the pipeline before the
//! general-purpose kernel sees the call, so domains above root can take it
//! over.
//!
//! ## Return Contract
//!
//! | Disposition       | Raw | Kernel syscall path | Kernel tail work |
//! |-------------------|-----|---------------------|------------------|
//! | `Passthrough`     | 0   | runs                | runs             |
//! | `Handled`         | 1   | skipped             | skipped          |
//! | `HandledWithTail` | -1  | skipped             | runs             |

mod dispatcher;

/// Number of syscall argument registers
pub const SYSCALL_ARGS: usize = 6;

/// System call as seen at root entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallContext {
    /// Syscall number
    pub number: u32,
    /// Raw argument registers
    pub args: [usize; SYSCALL_ARGS],
    /// Calling task asked for pipeline notification of its syscalls
    pub evnotify: bool,
}

impl SyscallContext {
    /// Context for `number` from a task flagged for notification
    pub const fn new(number: u32) -> Self {
        Self {
            number,
            args: [0; SYSCALL_ARGS],
            evnotify: true,
        }
    }

    /// Set the argument registers
    pub const fn with_args(mut self, args: [usize; SYSCALL_ARGS]) -> Self {
        self.args = args;
        self
    }

    /// Mark the calling task as not flagged for notification
    pub const fn without_notify(mut self) -> Self {
        self.evnotify = false;
        self
    }
}

/// Outcome of [`Pipeline::syscall_entry`](crate::Pipeline::syscall_entry)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallDisposition {
    /// Let the general-purpose kernel handle the call
    Passthrough,
    /// Fully handled, skip kernel processing and tail work
    Handled,
    /// Handled, skip kernel processing but run tail work
    HandledWithTail,
}

impl SyscallDisposition {
    /// Raw value expected by the trap entry assembly
    pub const fn as_raw(self) -> i32 {
        match self {
            SyscallDisposition::Passthrough => 0,
            SyscallDisposition::Handled => 1,
            SyscallDisposition::HandledWithTail => -1,
        }
    }
}

impl From<SyscallDisposition> for i32 {
    fn from(value: SyscallDisposition) -> Self {
        value.as_raw()
    }
}
