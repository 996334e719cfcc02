//! Core bus and timing abstractions for the PC emulator.
//!
//! The CPU and every peripheral meet at the [`SystemBus`]: memory-mapped
//! regions and port-mapped I/O are registered as handlers, and devices that
//! care about elapsed time register as cycle observers. The bus counts
//! cycles on every access and hands them to the observers before any
//! access that is marked sync-sensitive.

mod bus;
mod handler;
mod observer;
mod ticks;

pub use bus::{BusError, SystemBus};
pub use handler::{IoHandler, MemoryHandler, Ram, Rom, Unmapped};
pub use observer::CycleObserver;
pub use ticks::Ticks;
