//! # Host Interrupt Controller
//!
//! A simulated [`InterruptController`] with no hardware behind it. Local
//! masking is a per-CPU flag, the "current CPU" is whatever the owner last
//! selected, and level restrictions are recorded rather than programmed.
//!
//! Used by the pipeline test suites and by host-side tooling that replays
//! interrupt traces.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::cpu::{CpuId, MAX_CPUS};
use crate::irq::{InterruptController, IrqFlags, Level, LevelMask, NR_HW_IRQS, NR_LEVELS};

/// Default simulated core clock (500 MHz)
pub const DEFAULT_CPU_FREQ: u64 = 500_000_000;

/// Simulated interrupt controller
pub struct HostController {
    cpus: usize,
    current: AtomicU32,
    enabled: [AtomicBool; MAX_CPUS],
    levels: [AtomicU8; NR_HW_IRQS],
    restricted: AtomicBool,
    allowed: AtomicU32,
    masks_taken: AtomicU64,
    freq: AtomicU64,
}

impl HostController {
    /// Create a controller simulating `cpus` CPUs (clamped to `1..=MAX_CPUS`)
    ///
    /// Every CPU starts with interrupts unmasked. Hardware line `n` is wired
    /// to level `n % (NR_LEVELS - 1)`, which keeps the lowest level free for
    /// virtual interrupts.
    pub fn new(cpus: usize) -> Self {
        Self {
            cpus: cpus.clamp(1, MAX_CPUS),
            current: AtomicU32::new(0),
            enabled: [const { AtomicBool::new(true) }; MAX_CPUS],
            levels: core::array::from_fn(|irq| AtomicU8::new((irq % (NR_LEVELS - 1)) as u8)),
            restricted: AtomicBool::new(false),
            allowed: AtomicU32::new(LevelMask::ALL.0),
            masks_taken: AtomicU64::new(0),
            freq: AtomicU64::new(DEFAULT_CPU_FREQ),
        }
    }

    /// Single-CPU controller
    pub fn uniprocessor() -> Self {
        Self::new(1)
    }

    /// Select the CPU subsequent calls are made "on"
    pub fn set_current_cpu(&self, cpu: CpuId) {
        assert!(cpu.index() < self.cpus, "no such simulated {}", cpu);
        self.current.store(cpu.0, Ordering::SeqCst);
    }

    /// Rewire a hardware line to a different level
    pub fn set_irq_level(&self, irq: u32, level: Level) {
        assert!(level.index() < NR_LEVELS);
        if let Some(slot) = self.levels.get(irq as usize) {
            slot.store(level.0, Ordering::SeqCst);
        }
    }

    /// Change the simulated core clock
    pub fn set_cpu_freq(&self, hz: u64) {
        self.freq.store(hz, Ordering::SeqCst);
    }

    /// Levels left unmasked by the last restriction, if one is active
    pub fn restriction(&self) -> Option<LevelMask> {
        if self.restricted.load(Ordering::SeqCst) {
            Some(LevelMask(self.allowed.load(Ordering::SeqCst)))
        } else {
            None
        }
    }

    /// Number of times local interrupts were masked through this controller
    pub fn mask_count(&self) -> u64 {
        self.masks_taken.load(Ordering::SeqCst)
    }

    fn local(&self) -> &AtomicBool {
        &self.enabled[self.current.load(Ordering::SeqCst) as usize]
    }
}

impl Default for HostController {
    fn default() -> Self {
        Self::uniprocessor()
    }
}

impl core::fmt::Debug for HostController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostController")
            .field("cpus", &self.cpus)
            .field("current", &self.current.load(Ordering::Relaxed))
            .field("restriction", &self.restriction())
            .finish()
    }
}

impl InterruptController for HostController {
    fn cpu_count(&self) -> usize {
        self.cpus
    }

    fn current_cpu(&self) -> CpuId {
        CpuId(self.current.load(Ordering::SeqCst))
    }

    fn save_and_disable(&self) -> IrqFlags {
        self.masks_taken.fetch_add(1, Ordering::Relaxed);
        IrqFlags {
            was_enabled: self.local().swap(false, Ordering::SeqCst),
        }
    }

    fn restore(&self, flags: IrqFlags) {
        self.local().store(flags.was_enabled, Ordering::SeqCst);
    }

    fn enable(&self) {
        self.local().store(true, Ordering::SeqCst);
    }

    fn are_enabled(&self) -> bool {
        self.local().load(Ordering::SeqCst)
    }

    fn irq_level(&self, irq: u32) -> Level {
        self.levels
            .get(irq as usize)
            .map(|slot| Level(slot.load(Ordering::SeqCst)))
            .unwrap_or(Level::LOWEST)
    }

    fn restrict_levels(&self, allowed: LevelMask) {
        log::trace!("host: restricting levels to {:?}", allowed);
        self.allowed.store(allowed.0, Ordering::SeqCst);
        self.restricted.store(true, Ordering::SeqCst);
    }

    fn release_levels(&self) {
        self.allowed.store(LevelMask::ALL.0, Ordering::SeqCst);
        self.restricted.store(false, Ordering::SeqCst);
    }

    fn cpu_freq(&self) -> u64 {
        self.freq.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq::{without_interrupts, InterruptGuard};

    #[test]
    fn test_guard_restores_state() {
        let ctrl = HostController::uniprocessor();
        assert!(ctrl.are_enabled());
        {
            let _guard = InterruptGuard::new(&ctrl);
            assert!(!ctrl.are_enabled());
            {
                let inner = InterruptGuard::new(&ctrl);
                assert!(!inner.saved().was_enabled);
            }
            assert!(!ctrl.are_enabled());
        }
        assert!(ctrl.are_enabled());
        assert_eq!(ctrl.mask_count(), 2);
    }

    #[test]
    fn test_without_interrupts() {
        let ctrl = HostController::uniprocessor();
        let seen = without_interrupts(&ctrl, || ctrl.are_enabled());
        assert!(!seen);
        assert!(ctrl.are_enabled());
    }

    #[test]
    fn test_masking_is_per_cpu() {
        let ctrl = HostController::new(2);
        let _guard = InterruptGuard::new(&ctrl);
        ctrl.set_current_cpu(CpuId(1));
        assert!(ctrl.are_enabled());
        ctrl.set_current_cpu(CpuId(0));
        assert!(!ctrl.are_enabled());
    }

    #[test]
    fn test_level_wiring() {
        let ctrl = HostController::uniprocessor();
        assert_eq!(ctrl.irq_level(5), Level(5));
        assert_eq!(ctrl.irq_level(15), Level(0));
        ctrl.set_irq_level(5, Level(2));
        assert_eq!(ctrl.irq_level(5), Level(2));
    }

    #[test]
    fn test_restriction() {
        let ctrl = HostController::uniprocessor();
        assert_eq!(ctrl.restriction(), None);
        ctrl.restrict_levels(LevelMask::of(Level(3)));
        assert_eq!(ctrl.restriction(), Some(LevelMask::of(Level(3))));
        ctrl.release_levels();
        assert_eq!(ctrl.restriction(), None);
    }
}
