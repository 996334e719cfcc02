//! Trait for components that consume bus cycles.

use crate::Ticks;

/// A component that observes the passage of bus cycles.
///
/// Timers, interrupt controllers and DMA engines implement this to advance
/// their internal state in step with the CPU. The bus batches cycles and
/// drains them to every observer before any sync-sensitive access, so an
/// observer must tolerate `run_cycles(Ticks::ZERO)`.
pub trait CycleObserver {
    /// Consume `cycles` elapsed cycles, possibly changing device state
    /// (e.g. raising an interrupt line).
    fn run_cycles(&mut self, cycles: Ticks);

    /// How many cycles this observer may sleep before its state requires
    /// attention. [`Ticks::MAX`] means never.
    fn next_action(&mut self) -> Ticks {
        Ticks::MAX
    }
}
