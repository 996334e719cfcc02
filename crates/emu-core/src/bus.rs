//! The system bus: address decoding, cycle accounting, A20 masking.
//!
//! Two sorted range maps route memory and port I/O to registered handlers.
//! Handlers are shared (`Rc<RefCell<_>>`) because a device is typically
//! reachable both through the bus and through the machine that owns it;
//! the core is single-threaded so the borrows never contend.
//!
//! Every access adds cycles (doubled, to match observed real-hardware
//! ratios). When the accumulated count reaches the next-action horizon the
//! bus drains `cycles * 3` to every observer — the original system clock
//! was 14.31818 MHz, /3 for the 4.77 MHz CPU — and recomputes the horizon
//! as the minimum `next_action()`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::{CycleObserver, IoHandler, MemoryHandler, Ticks};

/// Host-level bus faults. These are never guest-visible: a missing I/O
/// handler is an emulator configuration bug, not something the guest can
/// observe, so the caller surfaces them to the driver loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    NoIoHandler { port: u16, size: u8 },
    NoPeekHandler { addr: u64 },
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoIoHandler { port, size } => {
                write!(f, "no handler for {size}-byte I/O access to port {port:#06X}")
            }
            Self::NoPeekHandler { addr } => {
                write!(f, "no handler for peek from {addr:#X}")
            }
        }
    }
}

impl std::error::Error for BusError {}

struct AreaHandler<H: ?Sized, A> {
    base: A,
    length: A,
    handler: Rc<RefCell<H>>,
    need_sync: bool,
}

type MemArea = AreaHandler<dyn MemoryHandler, u64>;
type IoArea = AreaHandler<dyn IoHandler, u16>;

/// The system bus.
pub struct SystemBus {
    mem_handlers: Vec<MemArea>,
    io_handlers: Vec<IoArea>,
    default_io_handler: Option<Rc<RefCell<dyn IoHandler>>>,
    cycle_observers: Vec<Rc<RefCell<dyn CycleObserver>>>,
    address_mask: u64,
    cycles: u64,
    next_action: u64,
    #[cfg(debug_assertions)]
    unmapped_trace_count: u32,
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mem_handlers: Vec::new(),
            io_handlers: Vec::new(),
            default_io_handler: None,
            cycle_observers: Vec::new(),
            // 20 address lines until something ungates A20
            address_mask: 0xF_FFFF,
            cycles: 0,
            next_action: 0,
            #[cfg(debug_assertions)]
            unmapped_trace_count: 0,
        }
    }

    /// Register a memory handler for `[base, base+length)`.
    ///
    /// # Panics
    /// Panics if the range overlaps an already registered one.
    pub fn add_mem_handler(
        &mut self,
        base: u64,
        length: u64,
        handler: Rc<RefCell<dyn MemoryHandler>>,
        need_sync: bool,
    ) {
        add_handler(
            &mut self.mem_handlers,
            AreaHandler {
                base,
                length,
                handler,
                need_sync,
            },
        );
    }

    /// Register an I/O handler for ports `[base, base+length)`.
    ///
    /// # Panics
    /// Panics if the range overlaps an already registered one.
    pub fn add_io_handler(
        &mut self,
        base: u16,
        length: u16,
        handler: Rc<RefCell<dyn IoHandler>>,
        need_sync: bool,
    ) {
        add_handler(
            &mut self.io_handlers,
            AreaHandler {
                base,
                length,
                handler,
                need_sync,
            },
        );
    }

    /// Handler consulted when no explicit port mapping matches.
    pub fn set_default_io_handler(&mut self, handler: Rc<RefCell<dyn IoHandler>>) {
        self.default_io_handler = Some(handler);
    }

    pub fn add_cycle_observer(&mut self, observer: Rc<RefCell<dyn CycleObserver>>) {
        self.cycle_observers.push(observer);
    }

    /// Set the address-line mask. The A20 gate is modelled by toggling
    /// bit 20 here.
    pub fn set_address_mask(&mut self, mask: u64) {
        self.address_mask = mask;
    }

    #[must_use]
    pub fn address_mask(&self) -> u64 {
        self.address_mask
    }

    // === Memory access ===

    pub fn read_u8(&mut self, addr: u64) -> u8 {
        self.read(addr, 1) as u8
    }

    pub fn read_u16(&mut self, addr: u64) -> u16 {
        self.read(addr, 2) as u16
    }

    pub fn read_u32(&mut self, addr: u64) -> u32 {
        self.read(addr, 4) as u32
    }

    pub fn read_u64(&mut self, addr: u64) -> u64 {
        self.read(addr, 8)
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) {
        self.write(addr, u64::from(value), 1);
    }

    pub fn write_u16(&mut self, addr: u64, value: u16) {
        self.write(addr, u64::from(value), 2);
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) {
        self.write(addr, u64::from(value), 4);
    }

    /// Debugger read: no cycles, no device side effects, no fallback.
    pub fn peek_u8(&mut self, addr: u64) -> Result<u8, BusError> {
        let addr = addr & self.address_mask;
        match find_handler(&self.mem_handlers, addr) {
            Some(i) => {
                let ah = &self.mem_handlers[i];
                let base = ah.base;
                Ok(ah.handler.borrow_mut().peek_u8(addr, addr - base))
            }
            None => Err(BusError::NoPeekHandler { addr }),
        }
    }

    fn read(&mut self, addr: u64, size: u8) -> u64 {
        self.add_cycles(u64::from(size));
        let addr = addr & self.address_mask;
        if let Some(i) = find_handler(&self.mem_handlers, addr) {
            if self.mem_handlers[i].need_sync {
                self.run_cycles();
            }
            let ah = &self.mem_handlers[i];
            let offset = addr - ah.base;
            let mut handler = ah.handler.borrow_mut();
            return match size {
                1 => u64::from(handler.read_u8(addr, offset)),
                2 => u64::from(handler.read_u16(addr, offset)),
                4 => u64::from(handler.read_u32(addr, offset)),
                _ => handler.read_u64(addr, offset),
            };
        }
        self.trace_unmapped(addr, size, None);
        if size == 1 {
            // HLT opcode: runaway real-mode code parks instead of
            // executing garbage
            0xF4
        } else {
            u64::MAX >> (64 - 8 * u32::from(size))
        }
    }

    fn write(&mut self, addr: u64, value: u64, size: u8) {
        self.add_cycles(u64::from(size));
        let addr = addr & self.address_mask;
        if let Some(i) = find_handler(&self.mem_handlers, addr) {
            if self.mem_handlers[i].need_sync {
                self.run_cycles();
            }
            let ah = &self.mem_handlers[i];
            let offset = addr - ah.base;
            let mut handler = ah.handler.borrow_mut();
            match size {
                1 => handler.write_u8(addr, offset, value as u8),
                2 => handler.write_u16(addr, offset, value as u16),
                _ => handler.write_u32(addr, offset, value as u32),
            }
            return;
        }
        self.trace_unmapped(addr, size, Some(value));
    }

    // === Port I/O ===

    pub fn io_input(&mut self, port: u16, size: u8) -> Result<u32, BusError> {
        debug_assert!(size == 1 || size == 2 || size == 4);
        self.add_cycles(1);
        let (handler, offset, need_sync) = match find_handler(&self.io_handlers, port) {
            Some(i) => {
                let ah = &self.io_handlers[i];
                (Rc::clone(&ah.handler), port - ah.base, ah.need_sync)
            }
            None => match &self.default_io_handler {
                Some(h) => (Rc::clone(h), port, false),
                None => return Err(BusError::NoIoHandler { port, size }),
            },
        };
        if need_sync {
            self.run_cycles();
        }
        let mut handler = handler.borrow_mut();
        Ok(match size {
            1 => u32::from(handler.in_u8(port, offset)),
            2 => u32::from(handler.in_u16(port, offset)),
            _ => handler.in_u32(port, offset),
        })
    }

    pub fn io_output(&mut self, port: u16, value: u32, size: u8) -> Result<(), BusError> {
        debug_assert!(size == 1 || size == 2 || size == 4);
        self.add_cycles(1);
        let (handler, offset, need_sync) = match find_handler(&self.io_handlers, port) {
            Some(i) => {
                let ah = &self.io_handlers[i];
                (Rc::clone(&ah.handler), port - ah.base, ah.need_sync)
            }
            None => match &self.default_io_handler {
                Some(h) => (Rc::clone(h), port, false),
                None => return Err(BusError::NoIoHandler { port, size }),
            },
        };
        if need_sync {
            self.run_cycles();
        }
        let mut handler = handler.borrow_mut();
        match size {
            1 => handler.out_u8(port, offset, value as u8),
            2 => handler.out_u16(port, offset, value as u16),
            _ => handler.out_u32(port, offset, value),
        }
        Ok(())
    }

    // === Cycle machinery ===

    /// Add raw access cycles. The 2x fudge factor matches observed
    /// real-hardware instruction/bus ratios.
    pub fn add_cycles(&mut self, count: u64) {
        self.cycles += count * 2;
        if self.cycles >= self.next_action {
            self.run_cycles();
        }
    }

    /// Drain accumulated cycles to every observer and recompute the
    /// horizon.
    pub fn run_cycles(&mut self) {
        let cycles = Ticks::new(std::mem::take(&mut self.cycles) * 3);
        for obs in &self.cycle_observers {
            obs.borrow_mut().run_cycles(cycles);
        }
        self.recalc_next_action();
    }

    pub fn recalc_next_action(&mut self) {
        let mut next = Ticks::MAX;
        for obs in &self.cycle_observers {
            next = next.min(obs.borrow_mut().next_action());
        }
        self.next_action = next.get();
    }

    fn trace_unmapped(&mut self, addr: u64, size: u8, value: Option<u64>) {
        #[cfg(debug_assertions)]
        {
            if self.unmapped_trace_count < 128 {
                match value {
                    Some(v) => eprintln!(
                        "Write of size {size} to unmapped address {addr:X} value={v:0w$X}",
                        w = 2 * size as usize
                    ),
                    None => eprintln!("Read of size {size} from unmapped address {addr:X}"),
                }
                self.unmapped_trace_count += 1;
            }
        }
        #[cfg(not(debug_assertions))]
        let _ = (addr, size, value);
    }
}

// Range arithmetic happens in u64 so port ranges ending at 0xFFFF don't
// overflow the narrower address type.
fn add_handler<H: ?Sized, A: Copy + Ord + Into<u64>>(
    handlers: &mut Vec<AreaHandler<H, A>>,
    handler: AreaHandler<H, A>,
) {
    let base: u64 = handler.base.into();
    let end = base + handler.length.into();
    for ah in handlers.iter() {
        let ah_base: u64 = ah.base.into();
        let ah_end = ah_base + ah.length.into();
        assert!(
            end <= ah_base || base >= ah_end,
            "handler range {base:#X}..{end:#X} overlaps {ah_base:#X}..{ah_end:#X}",
        );
    }
    let pos = handlers
        .iter()
        .position(|ah| ah.base > handler.base)
        .unwrap_or(handlers.len());
    handlers.insert(pos, handler);
}

// Linear scan: a PC has a few dozen handlers at most.
fn find_handler<H: ?Sized, A: Copy + Ord + Into<u64>>(
    handlers: &[AreaHandler<H, A>],
    addr: A,
) -> Option<usize> {
    let addr: u64 = addr.into();
    handlers
        .iter()
        .position(|ah| addr >= ah.base.into() && addr < ah.base.into() + ah.length.into())
}
