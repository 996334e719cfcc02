//! Execution history and the control-transfer log.
//!
//! Every step snapshots the full architectural state plus the raw
//! instruction bytes into a 256-entry ring; after a crash the driver can
//! re-decode and print the last few hundred instructions. Control
//! transfers get their own compressed log (consecutive identical
//! transfers count up instead of filling the ring).

use emu_core::SystemBus;

use crate::address::Address;
use crate::cpu::{Cpu, CpuState};
use crate::exception::InterruptEvent;
use crate::opcodes::Mnemonic;
use crate::registers::SReg;

pub(crate) const MAX_HISTORY: usize = 256;
pub(crate) const MAX_CONTROL_TRANSFER_HISTORY: usize = 64;

/// Pre-step snapshot plus what the step turned out to be.
pub(crate) struct HistoryEntry {
    pub state: CpuState,
    pub bytes: [u8; 15],
    pub num_bytes: u8,
    pub exception: Option<InterruptEvent>,
}

/// One (possibly repeated) control transfer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ControlTransferEntry {
    pub addr: Address,
    pub destination: Address,
    pub mnemonic: Mnemonic,
    pub count: u32,
}

impl Cpu {
    pub fn clear_history(&mut self) {
        self.instructions_executed = 0;
    }

    /// The event recorded for the most recent step, if it faulted or
    /// took an interrupt.
    #[must_use]
    pub fn last_exception(&self) -> Option<InterruptEvent> {
        if self.instructions_executed == 0 {
            return None;
        }
        let idx = ((self.instructions_executed - 1) % MAX_HISTORY as u64) as usize;
        self.history.get(idx).and_then(|h| h.exception)
    }

    /// Print the last `max` executed instructions with their pre-step
    /// state.
    pub fn show_history(&mut self, bus: &mut SystemBus, max: usize) {
        let mut max = max.min(MAX_HISTORY);
        if max as u64 > self.instructions_executed {
            max = self.instructions_executed as usize;
        }
        for i in (self.instructions_executed - max as u64)..self.instructions_executed {
            let idx = (i % MAX_HISTORY as u64) as usize;
            let (state, bytes, num_bytes, exception) = {
                let h = &self.history[idx];
                (h.state.clone(), h.bytes, h.num_bytes, h.exception)
            };
            self.show_state(bus, &state, Some((&bytes, num_bytes)));
            if let Some(event) = exception {
                eprintln!("*** {event} ***");
            }
        }
    }

    /// Log a control transfer out of the currently executing instruction.
    /// Plain conditional jumps and LOOPs are skipped; back-to-back
    /// repeats of the same transfer bump a counter instead.
    pub(crate) fn record_control_transfer(&mut self, cs: u16, ip: u64) {
        match self.current.opcode & 0xFFF0 {
            0x0070 | 0x0F80 => return, // Jcc
            0x00E0 if self.current.opcode & 0xF <= 2 => return, // LOOP
            _ => {}
        }

        let size = self.state.default_operand_size();
        let entry = ControlTransferEntry {
            addr: Address::new(self.state.sregs[SReg::Cs.index()], self.current_ip, size),
            destination: Address::new(cs, ip, size),
            mnemonic: self.current.instruction.mnemonic,
            count: 1,
        };

        if self.control_transfer_count > 0 {
            let last_idx = ((self.control_transfer_count - 1)
                % MAX_CONTROL_TRANSFER_HISTORY as u64) as usize;
            if let Some(last) = self.control_transfer_history.get_mut(last_idx) {
                if last.mnemonic == entry.mnemonic && last.addr == entry.addr {
                    last.count += 1;
                    return;
                }
            }
        }

        let idx = (self.control_transfer_count % MAX_CONTROL_TRANSFER_HISTORY as u64) as usize;
        if idx == self.control_transfer_history.len() {
            self.control_transfer_history.push(entry);
        } else {
            self.control_transfer_history[idx] = entry;
        }
        self.control_transfer_count += 1;
    }

    pub fn show_control_transfer_history(&self, max: usize) {
        let mut max = max.min(MAX_CONTROL_TRANSFER_HISTORY);
        if max as u64 > self.control_transfer_count {
            max = self.control_transfer_count as usize;
        }
        for i in (self.control_transfer_count - max as u64)..self.control_transfer_count {
            let h =
                &self.control_transfer_history[(i % MAX_CONTROL_TRANSFER_HISTORY as u64) as usize];
            eprintln!("{} {} {} {}", h.addr, h.mnemonic, h.destination, h.count);
        }
    }
}
