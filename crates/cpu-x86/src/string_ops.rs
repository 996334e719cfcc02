//! String instructions: one generic loop parameterised over the
//! operation.
//!
//! Source is DS:SI (segment override honoured), destination is ES:DI
//! (never overridable). SI/DI advance by the operation size in the DF
//! direction *after* each access, so a faulting iteration leaves them
//! pointing at the faulting element. REP decrements CX per iteration;
//! the compare forms exit early on the ZF/REPNZ condition.

use emu_core::SystemBus;

use crate::cpu::{add_reg, get, update, Cpu};
use crate::exception::CpuError;
use crate::flags::{DF, ZF};
use crate::opcodes::Mnemonic;
use crate::registers::{SReg, SegmentedAddress, REG_AX, REG_CX, REG_DI, REG_SI};

impl Cpu {
    pub(crate) fn do_string_instruction(
        &mut self,
        bus: &mut SystemBus,
        kind: Mnemonic,
    ) -> Result<(), CpuError> {
        let addr_size = self.current.address_size;
        let is_compare = matches!(kind, Mnemonic::Cmps | Mnemonic::Scas);

        // REPNZ also repeats the non-compare forms
        if !self.current.prefixes.has_rep() {
            return self.string_op_once(bus, kind);
        }

        while get(self.state.regs[REG_CX], addr_size) != 0 {
            self.string_op_once(bus, kind)?;
            add_reg(&mut self.state.regs[REG_CX], -1, addr_size);
            if is_compare {
                let zf_clear = self.state.flags & ZF == 0;
                let repnz = self.current.prefixes.has_repnz();
                if zf_clear == !repnz {
                    break;
                }
            }
        }
        Ok(())
    }

    fn string_op_once(&mut self, bus: &mut SystemBus, kind: Mnemonic) -> Result<(), CpuError> {
        let op_size = self.current.operation_size;
        let addr_size = self.current.address_size;
        let mask = self.current.address_mask();
        let incr: i64 = if self.state.flags & DF != 0 {
            -i64::from(op_size)
        } else {
            i64::from(op_size)
        };
        let ds = self.current.prefixes.seg_override().unwrap_or(SReg::Ds);

        let si_addr = SegmentedAddress {
            sreg: ds,
            offset: self.state.regs[REG_SI] & mask,
        };
        let di_addr = SegmentedAddress {
            sreg: SReg::Es,
            offset: self.state.regs[REG_DI] & mask,
        };

        match kind {
            Mnemonic::Cmps | Mnemonic::Scas => {
                let (l, r) = if kind == Mnemonic::Cmps {
                    (self.read_mem(bus, si_addr, op_size)?, self.read_mem(bus, di_addr, op_size)?)
                } else {
                    (self.state.regs[REG_AX], self.read_mem(bus, di_addr, op_size)?)
                };
                add_reg(&mut self.state.regs[REG_DI], incr, addr_size);
                if kind == Mnemonic::Cmps {
                    add_reg(&mut self.state.regs[REG_SI], incr, addr_size);
                }
                let result = l.wrapping_sub(r);
                let carry = (!l & r) | (!(l ^ r) & result);
                self.update_flags(result, carry, crate::exec::RESULT_FLAGS_MASK);
            }
            Mnemonic::Lods => {
                let value = self.read_mem(bus, si_addr, op_size)?;
                update(&mut self.state.regs[REG_AX], value, op_size);
                add_reg(&mut self.state.regs[REG_SI], incr, addr_size);
            }
            Mnemonic::Movs => {
                let value = self.read_mem(bus, si_addr, op_size)?;
                self.write_mem(bus, di_addr, value, op_size)?;
                add_reg(&mut self.state.regs[REG_DI], incr, addr_size);
                add_reg(&mut self.state.regs[REG_SI], incr, addr_size);
            }
            Mnemonic::Stos => {
                let value = self.state.regs[REG_AX];
                self.write_mem(bus, di_addr, value, op_size)?;
                add_reg(&mut self.state.regs[REG_DI], incr, addr_size);
            }
            Mnemonic::Ins => {
                let port = crate::cpu::get_u16(self.state.regs[crate::registers::REG_DX]);
                self.check_io_access(bus, port, op_size)?;
                let value = bus.io_input(port, op_size)?;
                self.write_mem(bus, di_addr, u64::from(value), op_size)?;
                add_reg(&mut self.state.regs[REG_DI], incr, addr_size);
            }
            Mnemonic::Outs => {
                let port = crate::cpu::get_u16(self.state.regs[crate::registers::REG_DX]);
                self.check_io_access(bus, port, op_size)?;
                let value = self.read_mem(bus, si_addr, op_size)? as u32;
                bus.io_output(port, value, op_size)?;
                add_reg(&mut self.state.regs[REG_SI], incr, addr_size);
            }
            _ => {
                return Err(CpuError::Runtime(format!(
                    "string operation {kind} not implemented"
                )))
            }
        }
        Ok(())
    }
}
