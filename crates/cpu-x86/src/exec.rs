//! Per-instruction semantics: the dispatch driven by [`Cpu::step`].
//!
//! Arithmetic goes through a 64-bit carry-chain word: for addition
//! `carry = (l & r) | ((l | r) & !result)` and for subtraction
//! `carry = (!l & r) | (!(l ^ r) & result)`; the flag updater then picks
//! CF/AF/OF out of the chain and ZF/SF/PF from the masked result.

use emu_core::SystemBus;

use crate::cpu::{
    add_reg, get, get_u8h, get_u8l, get_u16, get_u32, sign_extend, update, update_u8h, update_u8l,
    update_u16, update_u32, Cpu, CR0_TS, PL_W,
};
use crate::decode::DecodedEa;
use crate::descriptor::{
    ACCESS_DC, ACCESS_E, ACCESS_P, ACCESS_RW, ACCESS_S, ACCESS_TYPE, SD_TYPE_LDT,
    SD_TYPE_TASK16_AVAILABLE, SD_TYPE_TASK32_AVAILABLE, SD_TYPE_TSS_BUSY_BIT, SEL_RPL,
};
use crate::exception::{CpuError, CpuException, Exception};
use crate::flags::{eval_cond, parity, set_flag, AF, CF, DF, IF, OF, PF, SF, ZF};
use crate::model::CpuModel;
use crate::opcodes::Mnemonic;
use crate::registers::{SReg, SegmentedAddress, REG_AX, REG_BP, REG_BX, REG_CX, REG_DX, REG_SP};
use crate::transfer::TransferKind;

/// The flags an ordinary ALU result updates.
pub(crate) const RESULT_FLAGS_MASK: u32 = OF | SF | ZF | AF | PF | CF;

fn add_carry(l: u64, r: u64, result: u64) -> u64 {
    (l & r) | ((l | r) & !result)
}

fn sub_carry(l: u64, r: u64, result: u64) -> u64 {
    (!l & r) | (!(l ^ r) & result)
}

struct IMulResult {
    product: u64,
    overflow: bool,
}

fn imul(l: u64, r: u64, size: u8) -> IMulResult {
    let product =
        (sign_extend(l, size) as i64).wrapping_mul(sign_extend(r, size) as i64) as u64;
    IMulResult {
        product,
        overflow: product != sign_extend(product, size),
    }
}

impl Cpu {
    fn write_double_reg(&mut self, result: u64, half_size: u8) {
        match half_size {
            1 => update_u16(&mut self.state.regs[REG_AX], result),
            2 => {
                update_u16(&mut self.state.regs[REG_AX], result);
                update_u16(&mut self.state.regs[REG_DX], result >> 16);
            }
            _ => {
                update_u32(&mut self.state.regs[REG_AX], result);
                update_u32(&mut self.state.regs[REG_DX], result >> 32);
            }
        }
    }

    fn get_double_reg(&self, half_size: u8) -> u64 {
        match half_size {
            1 => u64::from(get_u16(self.state.regs[REG_AX])),
            2 => {
                u64::from(get_u16(self.state.regs[REG_AX]))
                    | u64::from(get_u16(self.state.regs[REG_DX])) << 16
            }
            _ => {
                u64::from(get_u32(self.state.regs[REG_AX]))
                    | u64::from(get_u32(self.state.regs[REG_DX])) << 32
            }
        }
    }

    /// BT/BTS/BTR/BTC. The memory forms address the bit string relative
    /// to the EA with the (signed) bit offset, then write back only the
    /// touched byte.
    fn do_bit_instruction(&mut self, bus: &mut SystemBus, kind: Mnemonic) -> Result<(), CpuError> {
        let op_size = self.current.operand_size;
        debug_assert!(self.current.num_operands == 2);
        debug_assert!(op_size == 2 || op_size == 4);
        let is_mem = self.current.ea[0].is_memory();

        let mut bit_offset = self.read_ea(bus, 1)?;
        let mut addr = SegmentedAddress {
            sreg: SReg::Ds,
            offset: 0,
        };
        let mut val;
        if is_mem {
            if matches!(self.current.ea[1], DecodedEa::Imm8(_)) {
                bit_offset %= 8 * u64::from(op_size);
            }
            let shift = if op_size == 2 { 4 } else { 5 };
            addr = self.calc_address_no_mask(self.current.ea[0]);
            addr.offset = addr.offset.wrapping_add(
                (((sign_extend(bit_offset, op_size) as i64) >> shift) * i64::from(op_size)) as u64,
            );
            addr.offset &= self.current.address_mask();
            val = self.read_mem(bus, addr, op_size)?;
        } else {
            val = self.read_ea(bus, 0)?;
        }
        bit_offset %= 8 * u64::from(op_size);

        let mask = 1u64 << bit_offset;
        set_flag(&mut self.state.flags, CF, val & mask != 0);

        let rotated = val >> bit_offset | val << (8 * u64::from(op_size) - bit_offset);
        let overflow = ((rotated ^ (rotated << 1)) >> (8 * u32::from(op_size) - 1)) & 1;
        set_flag(&mut self.state.flags, OF, overflow != 0);

        match kind {
            Mnemonic::Btc => val ^= mask,
            Mnemonic::Btr => val &= !mask,
            Mnemonic::Bts => val |= mask,
            _ => return Ok(()), // BT
        }

        if is_mem {
            addr.offset = (addr.offset + bit_offset / 8) & self.current.address_mask();
            self.write_mem(bus, addr, val >> (bit_offset & !7), 1)?;
        } else {
            self.write_ea(bus, 0, val)?;
        }
        Ok(())
    }

    fn do_load_far_pointer(&mut self, bus: &mut SystemBus, sr: SReg) -> Result<(), CpuError> {
        debug_assert!(self.current.num_operands == 2);
        let far = self.read_far_ptr(bus, self.current.ea[1])?;
        self.load_sreg(bus, sr, far.segment())?;
        self.write_ea(bus, 0, far.offset())
    }

    /// Decode and execute one instruction.
    pub(crate) fn do_step(&mut self, bus: &mut SystemBus) -> Result<(), CpuError> {
        self.current = self.decode_next(bus)?;

        self.state.ip += u64::from(self.current.num_bytes);
        if self.model < CpuModel::I80386Sx {
            self.state.ip &= 0xFFFF;
        }

        if self.current.prefixes.has_lock() && self.model >= CpuModel::I80386Sx {
            // LOCK is only legal on the read-modify-write forms with a
            // memory destination (XCHG: either operand)
            let legal = match self.current.instruction.mnemonic {
                Mnemonic::Add
                | Mnemonic::Adc
                | Mnemonic::And
                | Mnemonic::Btc
                | Mnemonic::Btr
                | Mnemonic::Bts
                | Mnemonic::Dec
                | Mnemonic::Inc
                | Mnemonic::Neg
                | Mnemonic::Not
                | Mnemonic::Or
                | Mnemonic::Sbb
                | Mnemonic::Sub
                | Mnemonic::Xor => self.current.ea[0].is_memory(),
                Mnemonic::Xchg => self.current.ea[1].is_memory(),
                _ => false,
            };
            if !legal {
                return Err(self.ud(&format!(
                    "LOCK prefix used with {}",
                    self.current.mnemonic
                )));
            }
        }

        let mut flags_mask = 0u32;
        let mut result = 0u64;
        let mut carry = 0u64;

        match self.current.instruction.mnemonic {
            Mnemonic::Aaa => {
                if self.state.regs[REG_AX] & 0xF > 9 || self.state.flags & AF != 0 {
                    if self.model < CpuModel::I80386Sx {
                        let ax = self.state.regs[REG_AX];
                        update_u8l(&mut self.state.regs[REG_AX], (ax + 6) & 0xF);
                        let ax = self.state.regs[REG_AX];
                        update_u8h(&mut self.state.regs[REG_AX], (ax >> 8) + 1);
                    } else {
                        let ax = self.state.regs[REG_AX];
                        update_u16(&mut self.state.regs[REG_AX], (ax + 0x106) & 0xFF0F);
                    }
                    self.state.flags |= CF | AF;
                } else {
                    self.state.flags &= !(CF | AF);
                    let ax = self.state.regs[REG_AX];
                    update_u8l(&mut self.state.regs[REG_AX], ax & 0xF);
                }
            }
            Mnemonic::Aad => {
                let factor = self.read_ea(bus, 0)?;
                result = u64::from(get_u8l(self.state.regs[REG_AX]))
                    .wrapping_add(u64::from(get_u8h(self.state.regs[REG_AX])).wrapping_mul(factor))
                    & 0xFF;
                update_u16(&mut self.state.regs[REG_AX], result);
                flags_mask = SF | ZF | PF;
                self.current.operation_size = 1;
            }
            Mnemonic::Aam => {
                debug_assert!(self.current.operation_size == 1);
                let l = self.state.regs[REG_AX] & 0xFF;
                let r = self.read_ea(bus, 0)? & 0xFF;
                if r == 0 {
                    // Flag state on the divide fault
                    self.state.flags &= !(ZF | SF | AF);
                    return Err(CpuException::new(Exception::DivisionError).into());
                }
                result = l % r;
                update_u8l(&mut self.state.regs[REG_AX], result);
                update_u8h(&mut self.state.regs[REG_AX], l / r);
                flags_mask = SF | ZF | PF;
            }
            Mnemonic::Aas => {
                if self.state.regs[REG_AX] & 0xF > 9 || self.state.flags & AF != 0 {
                    if self.model < CpuModel::I80386Sx {
                        let ax = self.state.regs[REG_AX];
                        update_u8l(&mut self.state.regs[REG_AX], (ax.wrapping_sub(6)) & 0xF);
                        let ax = self.state.regs[REG_AX];
                        update_u8h(&mut self.state.regs[REG_AX], (ax >> 8).wrapping_sub(1));
                    } else {
                        let ax = (self.state.regs[REG_AX] & 0xFFFF).wrapping_sub(6);
                        let ax = ((ax.wrapping_sub(0x100)) & 0xFF00) | (ax & 0x0F);
                        update_u16(&mut self.state.regs[REG_AX], ax);
                    }
                    self.state.flags |= CF | AF;
                } else {
                    self.state.flags &= !(CF | AF);
                    let ax = self.state.regs[REG_AX];
                    update_u8l(&mut self.state.regs[REG_AX], ax & 0xF);
                }
            }
            Mnemonic::Adc => {
                let l = self.read_ea(bus, 0)?;
                let r = self.read_ea(bus, 1)?;
                result = l
                    .wrapping_add(r)
                    .wrapping_add(u64::from(self.state.flags & CF != 0));
                self.write_ea(bus, 0, result)?;
                carry = add_carry(l, r, result);
                flags_mask = RESULT_FLAGS_MASK;
            }
            Mnemonic::Add => {
                let l = self.read_ea(bus, 0)?;
                let r = self.read_ea(bus, 1)?;
                result = l.wrapping_add(r);
                self.write_ea(bus, 0, result)?;
                carry = add_carry(l, r, result);
                flags_mask = RESULT_FLAGS_MASK;
            }
            Mnemonic::And => {
                let l = self.read_ea(bus, 0)?;
                let r = self.read_ea(bus, 1)?;
                result = l & r;
                self.write_ea(bus, 0, result)?;
                flags_mask = RESULT_FLAGS_MASK;
            }
            Mnemonic::Arpl => {
                self.check_pmode()?;
                let l = self.read_ea(bus, 0)?;
                let r = self.read_ea(bus, 1)?;
                if (l & u64::from(SEL_RPL)) < (r & u64::from(SEL_RPL)) {
                    self.state.flags |= ZF;
                    self.write_ea(bus, 0, (l & !u64::from(SEL_RPL)) | (r & u64::from(SEL_RPL)))?;
                } else {
                    self.state.flags &= !ZF;
                }
            }
            Mnemonic::Bound => {
                // Operand size selects 16/16 or 32/32 bounds
                if !self.current.ea[1].is_memory() {
                    return Err(self.ud("second operand for BOUND is not a memory location"));
                }
                let op_size = self.current.operand_size;
                let l = sign_extend(self.read_ea(bus, 0)?, op_size) as i64;
                let mut addr = self.calc_address(self.current.ea[1]);
                let lower = sign_extend(self.read_mem(bus, addr, op_size)?, op_size) as i64;
                addr.offset += u64::from(op_size);
                addr.offset &= self.current.address_mask();
                let upper = sign_extend(self.read_mem(bus, addr, op_size)?, op_size) as i64;
                if l < lower || l > upper {
                    return Err(self.fault(
                        Exception::BoundRangeExceeded,
                        0,
                        &format!("out of bounds: {lower} <= {l} <= {upper}"),
                    ));
                }
            }
            Mnemonic::Bsf => {
                let r = self.read_ea(bus, 1)?;
                if r == 0 {
                    self.state.flags |= ZF;
                    // Destination is undefined
                } else {
                    self.state.flags &= !ZF;
                    self.write_ea(bus, 0, u64::from(r.trailing_zeros()))?;
                }
            }
            Mnemonic::Bsr => {
                let r = self.read_ea(bus, 1)?;
                if r == 0 {
                    self.state.flags |= ZF;
                } else {
                    self.state.flags &= !ZF;
                    self.write_ea(bus, 0, u64::from(63 - r.leading_zeros()))?;
                }
            }
            Mnemonic::Bt | Mnemonic::Btc | Mnemonic::Btr | Mnemonic::Bts => {
                let kind = self.current.instruction.mnemonic;
                self.do_bit_instruction(bus, kind)?;
            }
            Mnemonic::Call => self.do_near_control_transfer(bus, TransferKind::Call)?,
            Mnemonic::Cbw => {
                let sign = self.state.regs[REG_AX] & 0x80 != 0;
                update_u8h(&mut self.state.regs[REG_AX], if sign { 0xFF } else { 0x00 });
            }
            Mnemonic::Clts => {
                self.check_priv(0)?;
                self.state.cregs[0] &= !CR0_TS;
            }
            Mnemonic::Cwd => {
                self.state.regs[REG_DX] = if self.state.regs[REG_AX] & 0x8000 != 0 {
                    0xFFFF
                } else {
                    0x0000
                };
            }
            Mnemonic::Cwde => {
                let ax = self.state.regs[REG_AX];
                if self.current.operand_size == 2 {
                    update_u16(&mut self.state.regs[REG_AX], sign_extend(ax, 1));
                } else {
                    update_u32(&mut self.state.regs[REG_AX], sign_extend(ax, 2));
                }
            }
            Mnemonic::Cdq => {
                let op_size = self.current.operand_size;
                let sign = (self.state.regs[REG_AX] >> (8 * u32::from(op_size) - 1)) & 1;
                let l = (sign as i64).wrapping_neg() as u64;
                update(&mut self.state.regs[REG_DX], l, op_size);
            }
            Mnemonic::Clc => self.state.flags &= !CF,
            Mnemonic::Cld => self.state.flags &= !DF,
            Mnemonic::Cli => {
                self.check_priv_iopl()?;
                self.state.flags &= !IF;
            }
            Mnemonic::Cmc => self.state.flags ^= CF,
            Mnemonic::Cmp => {
                let l = self.read_ea(bus, 0)?;
                let r = self.read_ea(bus, 1)?;
                result = l.wrapping_sub(r);
                carry = sub_carry(l, r, result);
                flags_mask = RESULT_FLAGS_MASK;
            }
            Mnemonic::Cmps | Mnemonic::Cmpsb => {
                self.do_string_instruction(bus, Mnemonic::Cmps)?;
            }
            Mnemonic::Daa | Mnemonic::Das => {
                debug_assert!(self.current.operation_size == 1);
                let is_daa = self.current.instruction.mnemonic == Mnemonic::Daa;
                let adjust: i64 = if is_daa { 6 } else { -6 };
                let old_al = get_u8l(self.state.regs[REG_AX]);
                let upper_check: u8 =
                    if self.model <= CpuModel::I8086 && self.state.flags & AF != 0 {
                        0x9F
                    } else {
                        0x99
                    };
                let old_cf = self.state.flags & CF != 0;
                if old_al & 0xF > 9 || self.state.flags & AF != 0 {
                    add_reg(&mut self.state.regs[REG_AX], adjust, 1);
                    self.state.flags |= AF;
                    if self.model >= CpuModel::I80386Sx
                        && adjust < 0
                        && i32::from(old_al) - 6 < 0
                    {
                        self.state.flags |= CF;
                    }
                }
                if old_al > upper_check || old_cf {
                    add_reg(&mut self.state.regs[REG_AX], adjust << 4, 1);
                    self.state.flags |= CF;
                }
                // OF is undefined; set when bit 7 flips 0 -> 1, except
                // the 8086-family DAS looks at the opposite transition
                if self.model <= CpuModel::I8086 && !is_daa {
                    set_flag(
                        &mut self.state.flags,
                        OF,
                        old_al & 0x80 != 0 && self.state.regs[REG_AX] & 0x80 == 0,
                    );
                } else {
                    set_flag(
                        &mut self.state.flags,
                        OF,
                        old_al & 0x80 == 0 && self.state.regs[REG_AX] & 0x80 != 0,
                    );
                }
                result = self.state.regs[REG_AX] & 0xFF;
                flags_mask = SF | ZF | PF;
            }
            Mnemonic::Dec => {
                let l = self.read_ea(bus, 0)?;
                result = l.wrapping_sub(1);
                self.write_ea(bus, 0, result)?;
                carry = sub_carry(l, 1, result);
                flags_mask = RESULT_FLAGS_MASK & !CF; // Carry not updated
            }
            Mnemonic::Enter => {
                let alloc_size = (self.read_ea(bus, 0)? & 0xFFFF) as u16;
                let mut nesting_level = self.read_ea(bus, 1)? & 31;
                let op_size = self.current.operand_size;
                let old_sp = self.state.regs[REG_SP];
                let old_bp = self.state.regs[REG_BP];

                if nesting_level > 1
                    && ((self.state.regs[REG_BP].wrapping_sub(u64::from(op_size))
                        & self.state.stack_mask())
                        + u64::from(op_size)
                        - 1)
                        > u64::from(self.state.sdesc[SReg::Ss.index()].limit)
                {
                    return Err(self.fault(
                        Exception::StackSegmentFault,
                        0,
                        "(E)BP would be outside the stack limit",
                    ));
                }

                let mut body = |cpu: &mut Self, bus: &mut SystemBus| -> Result<(), CpuError> {
                    let bp = cpu.state.regs[REG_BP];
                    cpu.push(bus, bp, op_size)?;
                    let frame_temp = get(cpu.state.regs[REG_SP], op_size);
                    while nesting_level > 1 {
                        let stack_size = cpu.state.stack_size();
                        add_reg(&mut cpu.state.regs[REG_BP], -i64::from(op_size), stack_size);
                        let addr = SegmentedAddress {
                            sreg: SReg::Ss,
                            offset: cpu.state.regs[REG_BP] & cpu.state.stack_mask(),
                        };
                        let value = cpu.read_mem(bus, addr, op_size)?;
                        cpu.push(bus, value, op_size)?;
                        nesting_level -= 1;
                    }
                    if nesting_level != 0 {
                        cpu.push(bus, frame_temp, op_size)?;
                    }
                    update(&mut cpu.state.regs[REG_BP], frame_temp, op_size);
                    let stack_size = cpu.state.stack_size();
                    add_reg(&mut cpu.state.regs[REG_SP], -i64::from(alloc_size), stack_size);
                    // Fault now if a write at the final stack pointer
                    // would page-fault
                    if cpu.paging_enabled() {
                        let sp = cpu.current_sp();
                        let linear = cpu.to_linear_address(sp, 1, true)?;
                        cpu.page_lookup(bus, linear, PL_W)?;
                    }
                    Ok(())
                };
                if let Err(e) = body(self, bus) {
                    if matches!(e, CpuError::Exception(_)) {
                        self.state.regs[REG_BP] = old_bp;
                        self.state.regs[REG_SP] = old_sp;
                    }
                    return Err(e);
                }
            }
            Mnemonic::Esc | Mnemonic::Fwait => {
                // x87 is decoded but not executed
            }
            Mnemonic::In => {
                let mut port = self.read_ea(bus, 1)?;
                if matches!(self.current.ea[1], DecodedEa::Imm8(_)) {
                    port &= 0xFF;
                }
                let size = if self.current.opcode == 0xE4 || self.current.opcode == 0xEC {
                    1
                } else {
                    self.current.operand_size
                };
                self.check_io_access(bus, port as u16, size)?;
                let value = bus.io_input(port as u16, size)?;
                self.write_ea(bus, 0, u64::from(value))?;
            }
            Mnemonic::Ins | Mnemonic::Insb => {
                self.do_string_instruction(bus, Mnemonic::Ins)?;
            }
            Mnemonic::Inc => {
                let l = self.read_ea(bus, 0)?;
                result = l.wrapping_add(1);
                self.write_ea(bus, 0, result)?;
                carry = add_carry(l, 1, result);
                flags_mask = RESULT_FLAGS_MASK & !CF; // Carry not updated
            }
            Mnemonic::Int => {
                self.check_priv_vm86()?;
                let vector = match self.current.ea[0] {
                    DecodedEa::Imm8(v) => v as u8,
                    _ => return Err(CpuError::Runtime("INT without immediate vector".into())),
                };
                self.do_interrupt(bus, vector, crate::exception::InterruptOrigin::Software, 0)?;
            }
            Mnemonic::Int3 => {
                self.do_interrupt(bus, 3, crate::exception::InterruptOrigin::Software, 0)?;
            }
            Mnemonic::Into => {
                if self.state.flags & OF != 0 {
                    self.do_interrupt(
                        bus,
                        Exception::Overflow.vector(),
                        crate::exception::InterruptOrigin::Software,
                        0,
                    )?;
                }
            }
            Mnemonic::Leave => {
                let addr = SegmentedAddress {
                    sreg: SReg::Ss,
                    offset: self.state.regs[REG_BP] & self.state.stack_mask(),
                };
                let old_bp = self.read_mem(bus, addr, self.current.operand_size)?;
                let bp = self.state.regs[REG_BP];
                let stack_size = self.state.stack_size();
                update(&mut self.state.regs[REG_SP], bp, stack_size);
                update(&mut self.state.regs[REG_BP], old_bp, self.current.operand_size);
                self.update_sp(1);
            }
            Mnemonic::Imul => {
                let op_size = self.current.operand_size;
                let res = match self.current.num_operands {
                    1 => {
                        let r = self.read_ea(bus, 0)?;
                        let res = imul(self.state.regs[REG_AX], r, op_size);
                        self.write_double_reg(res.product, op_size);
                        res
                    }
                    2 => {
                        let l = self.read_ea(bus, 0)?;
                        let r = self.read_ea(bus, 1)?;
                        let res = imul(l, r, op_size);
                        self.write_ea(bus, 0, res.product)?;
                        res
                    }
                    _ => {
                        let l = self.read_ea(bus, 1)?;
                        let r = self.read_ea(bus, 2)?;
                        let res = imul(l, r, op_size);
                        self.write_ea(bus, 0, res.product)?;
                        res
                    }
                };
                self.state.flags &= !(CF | OF | SF | ZF | AF | PF);
                if res.overflow {
                    self.state.flags |= CF | OF;
                }
                // The 8086 microcode sets the remaining flags from an
                // internal ADC of the product's top half
                let half_shift = 8 * u32::from(op_size);
                let tmp_a = res.product >> half_shift;
                let tmp_c_msb = (res.product >> (half_shift - 1)) & 1;
                result = tmp_a.wrapping_add(tmp_c_msb);
                carry = add_carry(tmp_a, tmp_c_msb, result);
                flags_mask = SF | ZF | AF | PF;
            }
            Mnemonic::Mul => {
                if self.current.num_operands != 1 {
                    return Err(CpuError::Runtime("MUL with multiple operands".into()));
                }
                let op_size = self.current.operand_size;
                let r = self.read_ea(bus, 0)?;
                result = get(self.state.regs[REG_AX], op_size).wrapping_mul(r);
                self.write_double_reg(result, op_size);

                self.state.flags &= !(CF | OF | SF | ZF | AF | PF);
                if result >> (8 * u32::from(op_size)) != 0 {
                    self.state.flags |= CF | OF;
                } else {
                    self.state.flags |= ZF;
                }
                if result >> (16 * u32::from(op_size) - 1) != 0 {
                    self.state.flags |= SF;
                }
                if self.model <= CpuModel::I8086 {
                    let high = if op_size == 1 {
                        (self.state.regs[REG_AX] >> 8) as u8
                    } else {
                        self.state.regs[REG_DX] as u8
                    };
                    if parity(high) {
                        self.state.flags |= PF;
                    }
                }
            }
            Mnemonic::Idiv => {
                let op_size = self.current.operand_size;
                let r = sign_extend(self.read_ea(bus, 0)?, op_size);
                if r == 0 {
                    return Err(CpuException::new(Exception::DivisionError).into());
                }
                let l = sign_extend(self.get_double_reg(op_size), op_size * 2);
                let mut q = (l as i64).wrapping_div(r as i64);
                let mut rem = (l as i64).wrapping_rem(r as i64);

                if self.model <= CpuModel::I8086 && self.current.prefixes.has_rep() {
                    // REP/REPNE on the 8086 family negates the quotient
                    q = -q;
                }

                match op_size {
                    1 => {
                        if self.model == CpuModel::I80386Sx && q < i64::from(i8::MIN) {
                            // Observed 386SX behaviour in published test
                            // vectors; not what the silicon "should" do
                            q = ((l ^ 0x4000) as i64).wrapping_div(r as i64);
                            rem = ((l ^ 0x4000) as i64).wrapping_rem(r as i64);
                            if q != i64::from(i8::MIN) {
                                return Err(
                                    CpuException::new(Exception::DivisionError).into()
                                );
                            }
                        }
                        if q < i64::from(i8::MIN)
                            || q > i64::from(i8::MAX)
                            || (self.model <= CpuModel::I8086 && q == i64::from(i8::MIN))
                        {
                            return Err(CpuException::new(Exception::DivisionError).into());
                        }
                        update_u8l(&mut self.state.regs[REG_AX], q as u64);
                        update_u8h(&mut self.state.regs[REG_AX], rem as u64);
                    }
                    2 => {
                        if q < i64::from(i16::MIN)
                            || q > i64::from(i16::MAX)
                            || (self.model <= CpuModel::I8086 && q == i64::from(i16::MIN))
                        {
                            return Err(CpuException::new(Exception::DivisionError).into());
                        }
                        update_u16(&mut self.state.regs[REG_AX], q as u64);
                        update_u16(&mut self.state.regs[REG_DX], rem as u64);
                    }
                    _ => {
                        if q < i64::from(i32::MIN) || q > i64::from(i32::MAX) {
                            return Err(CpuException::new(Exception::DivisionError).into());
                        }
                        update_u32(&mut self.state.regs[REG_AX], q as u64);
                        update_u32(&mut self.state.regs[REG_DX], rem as u64);
                    }
                }
            }
            Mnemonic::Div => {
                let op_size = self.current.operand_size;
                let r = self.read_ea(bus, 0)?;
                if r == 0 {
                    return Err(CpuException::new(Exception::DivisionError).into());
                }
                let l = self.get_double_reg(op_size);
                result = l / r;
                if result >> (8 * u32::from(op_size)) != 0 {
                    return Err(CpuException::new(Exception::DivisionError).into());
                }
                if op_size == 1 {
                    update_u8l(&mut self.state.regs[REG_AX], result);
                    update_u8h(&mut self.state.regs[REG_AX], l % r);
                } else {
                    update(&mut self.state.regs[REG_AX], result, op_size);
                    update(&mut self.state.regs[REG_DX], l % r, op_size);
                }
            }
            Mnemonic::Jcxz => {
                // Counter width comes from the address size
                if self.state.regs[REG_CX] & self.current.address_mask() == 0 {
                    self.do_near_control_transfer(bus, TransferKind::Jump)?;
                }
            }
            Mnemonic::Hlt => {
                self.check_priv(0)?;
                if self.state.flags & IF == 0 {
                    return Err(CpuError::Halted);
                }
                self.halted = true;
            }
            Mnemonic::Callf | Mnemonic::Jmpf => {
                let (cs, ip) = match self.current.ea[0] {
                    DecodedEa::Abs16_16(addr) => ((addr >> 16) as u16, addr & 0xFFFF),
                    DecodedEa::Abs16_32(addr) => ((addr >> 32) as u16, addr & 0xFFFF_FFFF),
                    ea => {
                        let far = self.read_far_ptr(bus, ea)?;
                        (far.segment(), far.offset())
                    }
                };
                let kind = if self.current.mnemonic == Mnemonic::Callf {
                    TransferKind::Call
                } else {
                    TransferKind::Jump
                };
                self.do_control_transfer(bus, cs, ip, kind)?;
            }
            Mnemonic::Jo
            | Mnemonic::Jno
            | Mnemonic::Jb
            | Mnemonic::Jnb
            | Mnemonic::Jz
            | Mnemonic::Jnz
            | Mnemonic::Jbe
            | Mnemonic::Jnbe
            | Mnemonic::Js
            | Mnemonic::Jns
            | Mnemonic::Jp
            | Mnemonic::Jnp
            | Mnemonic::Jl
            | Mnemonic::Jnl
            | Mnemonic::Jle
            | Mnemonic::Jnle => {
                if eval_cond(self.state.flags, (self.current.opcode & 0xF) as u8) {
                    self.do_near_control_transfer(bus, TransferKind::Jump)?;
                }
            }
            Mnemonic::Jmp => self.do_near_control_transfer(bus, TransferKind::Jump)?,
            Mnemonic::Lahf => {
                let flags = u64::from(self.state.flags);
                update_u8h(&mut self.state.regs[REG_AX], flags);
            }
            Mnemonic::Lar | Mnemonic::Lsl => {
                let is_lar = self.current.instruction.mnemonic == Mnemonic::Lar;
                let mut ok = false;
                let attempt = |cpu: &mut Self, bus: &mut SystemBus| -> Result<bool, CpuError> {
                    let sel = cpu.read_ea(bus, 1)? as u16;
                    let desc = cpu.read_descriptor(bus, sel)?;
                    // System types LAR/LSL accept
                    let valid_mask: u32 = 1 << 1 | 1 << 2 | 1 << 3 | 1 << 4 | 1 << 5
                        | 1 << 9
                        | 1 << 11
                        | 1 << 12;
                    let mut ok = desc.is_conforming_code_segment()
                        || !(cpu.cpl() > desc.dpl() || (sel & SEL_RPL) as u8 > desc.dpl());
                    if desc.access & ACCESS_S == 0
                        && valid_mask & (1 << u32::from(desc.system_type())) == 0
                    {
                        ok = false;
                    }
                    if ok {
                        let val = if is_lar {
                            ((desc.raw >> 32) & 0x00F0_FF00) as u64
                        } else {
                            u64::from(desc.limit)
                        };
                        if matches!(cpu.current.ea[0], DecodedEa::Reg32(_)) {
                            cpu.current.operation_size = 4;
                        }
                        cpu.write_ea(bus, 0, val)?;
                    }
                    Ok(ok)
                };
                match attempt(self, bus) {
                    Ok(v) => ok = v,
                    Err(CpuError::Exception(_)) => {}
                    Err(e) => return Err(e),
                }
                set_flag(&mut self.state.flags, ZF, ok);
            }
            Mnemonic::Lea => {
                if self.model >= CpuModel::I8086 && !self.current.ea[1].is_memory() {
                    return Err(self.ud("LEA with a register operand"));
                }
                let offset = self.calc_address(self.current.ea[1]).offset;
                self.write_ea(bus, 0, offset)?;
            }
            Mnemonic::Lgdt | Mnemonic::Lidt => {
                debug_assert!(self.current.operand_size == 2 || self.current.operand_size == 4);
                let mut addr = self.calc_address(self.current.ea[0]);
                let limit = self.read_mem(bus, addr, 2)? as u16;
                addr.offset += 2;
                let mut base = self.read_mem(bus, addr, 4)?;
                if self.current.operand_size == 2 {
                    base &= 0xFF_FFFF;
                }
                let table = if self.current.mnemonic == Mnemonic::Lgdt {
                    &mut self.state.gdt
                } else {
                    &mut self.state.idt
                };
                table.limit = limit;
                table.base = base;
            }
            Mnemonic::Lldt => {
                let index = self.read_ea(bus, 0)? as u16;
                if index & !3 == 0 {
                    self.state.ldt = crate::descriptor::SegmentDescriptor::default();
                    self.state.ldt_index = index;
                } else {
                    let desc = self.read_descriptor(bus, index)?;
                    if desc.access & (ACCESS_P | ACCESS_S | ACCESS_TYPE)
                        != ACCESS_P | SD_TYPE_LDT
                    {
                        return Err(CpuError::Runtime(format!(
                            "invalid LDT descriptor {desc}"
                        )));
                    }
                    self.state.ldt = desc;
                    self.state.ldt_index = index;
                }
            }
            Mnemonic::Lmsw => {
                self.check_priv(0)?;
                let value = self.read_ea(bus, 0)?;
                let cr0 = (self.state.cregs[0] & !15) | (value & 15);
                self.set_creg(0, cr0 as u32)?;
            }
            Mnemonic::Ltr => {
                let index = self.read_ea(bus, 0)? as u16;
                let mut desc = self.read_descriptor(bus, index)?;
                if desc.access & (ACCESS_P | ACCESS_S) != ACCESS_P {
                    return Err(CpuError::Runtime(format!(
                        "invalid task descriptor {desc}"
                    )));
                }
                let ty = desc.system_type();
                if ty != SD_TYPE_TASK16_AVAILABLE && ty != SD_TYPE_TASK32_AVAILABLE {
                    return Err(CpuError::Runtime(format!(
                        "invalid task descriptor type {desc}"
                    )));
                }
                desc.access |= SD_TYPE_TSS_BUSY_BIT;
                let linear = self.descriptor_linear_address(index)? + 5;
                self.write_mem_linear(bus, linear, u64::from(desc.access), 1, crate::cpu::PL_SYS)?;
                self.state.task = desc;
                self.state.task_index = index;
            }
            Mnemonic::Lds => self.do_load_far_pointer(bus, SReg::Ds)?,
            Mnemonic::Les => self.do_load_far_pointer(bus, SReg::Es)?,
            Mnemonic::Lfs => self.do_load_far_pointer(bus, SReg::Fs)?,
            Mnemonic::Lgs => self.do_load_far_pointer(bus, SReg::Gs)?,
            Mnemonic::Lss => self.do_load_far_pointer(bus, SReg::Ss)?,
            Mnemonic::Lods | Mnemonic::Lodsb => {
                self.do_string_instruction(bus, Mnemonic::Lods)?;
            }
            Mnemonic::Loop | Mnemonic::Loopz | Mnemonic::Loopnz => {
                let condition = match self.current.instruction.mnemonic {
                    Mnemonic::Loopz => self.state.flags & ZF != 0,
                    Mnemonic::Loopnz => self.state.flags & ZF == 0,
                    _ => true,
                };
                let addr_size = self.current.address_size;
                debug_assert!(addr_size == 2 || addr_size == 4);
                let count = add_reg(&mut self.state.regs[REG_CX], -1, addr_size);
                if count != 0 && condition {
                    self.do_near_control_transfer(bus, TransferKind::Jump)?;
                }
            }
            Mnemonic::Mov => {
                if self.model > CpuModel::I8086 {
                    if let DecodedEa::Sreg(r) = self.current.ea[0] {
                        // Check before any memory read happens
                        self.check_sreg(r)?;
                        if r as usize == SReg::Cs.index() {
                            return Err(self.ud("MOV to CS"));
                        }
                    }
                }
                let value = self.read_ea(bus, 1)?;
                self.write_ea(bus, 0, value)?;
            }
            Mnemonic::Movs | Mnemonic::Movsb => {
                self.do_string_instruction(bus, Mnemonic::Movs)?;
            }
            Mnemonic::Movsx => {
                let value = self.read_ea(bus, 1)?;
                let extended = sign_extend(value, self.current.operand_size);
                self.write_ea(bus, 0, extended)?;
            }
            Mnemonic::Movzx => {
                let value = self.read_ea(bus, 1)?;
                self.write_ea(bus, 0, value)?;
            }
            Mnemonic::Neg => {
                let r = self.read_ea(bus, 0)?;
                result = 0u64.wrapping_sub(r);
                self.write_ea(bus, 0, result)?;
                carry = sub_carry(0, r, result);
                flags_mask = RESULT_FLAGS_MASK;
            }
            Mnemonic::Nop => {}
            Mnemonic::Not => {
                // Flags untouched
                let value = self.read_ea(bus, 0)?;
                self.write_ea(bus, 0, !value)?;
            }
            Mnemonic::Or => {
                let l = self.read_ea(bus, 0)?;
                let r = self.read_ea(bus, 1)?;
                result = l | r;
                self.write_ea(bus, 0, result)?;
                flags_mask = RESULT_FLAGS_MASK;
            }
            Mnemonic::Out => {
                let mut port = self.read_ea(bus, 0)?;
                let value = self.read_ea(bus, 1)?;
                if matches!(self.current.ea[0], DecodedEa::Imm8(_)) {
                    port &= 0xFF;
                }
                let size = if self.current.opcode == 0xE6 || self.current.opcode == 0xEE {
                    1
                } else {
                    self.current.operand_size
                };
                self.check_io_access(bus, port as u16, size)?;
                bus.io_output(port as u16, value as u32, size)?;
            }
            Mnemonic::Outs | Mnemonic::Outsb => {
                self.do_string_instruction(bus, Mnemonic::Outs)?;
            }
            Mnemonic::Pop => {
                let old_sp = self.state.regs[REG_SP];
                let body = |cpu: &mut Self, bus: &mut SystemBus| -> Result<(), CpuError> {
                    if matches!(cpu.current.ea[0], DecodedEa::Sreg(_)) {
                        // Only a word leaves the stack for a segment
                        // register
                        let sp = cpu.current_sp();
                        let res = cpu.read_mem(bus, sp, 2)?;
                        cpu.update_sp(1);
                        cpu.write_ea(bus, 0, res)
                    } else if cpu.model >= CpuModel::I80286 && cpu.current.ea[0].is_memory() {
                        // SP moves before the EA is evaluated
                        let sp_addr = cpu.current_sp();
                        cpu.update_sp(1);
                        let size = cpu.current.operand_size;
                        let linear = cpu.to_linear_address(sp_addr, size, false)?;
                        let value = cpu.read_mem_linear(bus, linear, size, 0)?;
                        cpu.write_ea(bus, 0, value)
                    } else {
                        let size = cpu.current.operand_size;
                        let value = cpu.pop(bus, size)?;
                        cpu.write_ea(bus, 0, value)
                    }
                };
                if let Err(e) = body(self, bus) {
                    self.state.regs[REG_SP] = old_sp;
                    return Err(e);
                }
            }
            Mnemonic::Push => {
                if self.model <= CpuModel::I8086
                    && self.current.ea[0] == DecodedEa::Reg16(REG_SP as u8)
                {
                    // 8086 family pushes the already-decremented SP
                    debug_assert!(self.current.operand_size == 2);
                    let value = (self.state.regs[REG_SP].wrapping_sub(2)) & 0xFFFF;
                    self.push(bus, value, self.current.operand_size)?;
                } else if matches!(self.current.ea[0], DecodedEa::Sreg(_)) {
                    // Selectors go to the stack as a 16-bit move
                    self.update_sp(-1);
                    let value = self.read_ea(bus, 0)?;
                    let sp = self.current_sp();
                    self.write_mem(bus, sp, value, 2)?;
                } else {
                    let value = self.read_ea(bus, 0)?;
                    self.push(bus, value, self.current.operand_size)?;
                }
            }
            Mnemonic::Popa => {
                // (E)SP is read from its slot but overwritten at the end
                let op_size = self.current.operand_size;
                let mut temp_sp = self.current_sp();
                for reg in (REG_AX..=crate::registers::REG_DI).rev() {
                    let val = self.read_mem(bus, temp_sp, op_size)?;
                    if reg != REG_SP || self.model < CpuModel::I80586 {
                        update(&mut self.state.regs[reg], val, op_size);
                    }
                    temp_sp.offset += u64::from(op_size);
                    temp_sp.offset &= self.state.stack_mask();
                }
                let sp = temp_sp.offset;
                let stack_size = self.state.stack_size();
                update(&mut self.state.regs[REG_SP], sp, stack_size);
            }
            Mnemonic::Popf => {
                self.check_priv_vm86()?;
                let op_size = self.current.operand_size;
                debug_assert!(op_size == 2 || op_size == 4);
                let popped = self.pop(bus, op_size)? as u32;
                let mut flags = self.filter_flags(popped, op_size == 2);
                // VM is never writable here
                flags = (flags & !crate::flags::VM) | (self.state.flags & crate::flags::VM);
                if self.cpl() > self.iopl() {
                    // IF only changes when CPL <= IOPL
                    flags = (flags & !IF) | (self.state.flags & IF);
                }
                self.set_flags(flags);
            }
            Mnemonic::Pusha => {
                for reg in (REG_AX..=crate::registers::REG_DI).rev() {
                    let value = self.state.regs[reg];
                    self.write_stack(bus, reg as i32, value)?;
                }
                self.update_sp(-8);
            }
            Mnemonic::Pushf => {
                self.check_priv_vm86()?;
                // The upper half reads as zero on the 386
                let flags = u64::from(self.state.flags & 0xFFFF);
                self.push(bus, flags, self.current.operand_size)?;
            }
            Mnemonic::Iret => {
                self.check_priv_vm86()?;
                self.do_interrupt_return(bus)?;
            }
            Mnemonic::Retf => {
                let bytes_to_pop = if self.current.num_operands != 0 {
                    self.read_ea(bus, 0)? as u16
                } else {
                    0
                };
                self.do_far_return(bus, bytes_to_pop)?;
            }
            Mnemonic::Retn => {
                let ret_address = self.read_stack(bus, 0)?;
                if self.model >= CpuModel::I80286
                    && ret_address > u64::from(self.state.sdesc[SReg::Cs.index()].limit)
                {
                    return Err(self.gp(
                        0,
                        "RETN - return instruction pointer is not within the code segment limit",
                    ));
                }
                self.update_sp(1);
                if self.current.num_operands != 0 {
                    let pop_bytes = self.read_ea(bus, 0)?;
                    let mut temp_sp = self.state.regs[REG_SP];
                    add_reg(&mut temp_sp, pop_bytes as i64, self.state.stack_size());
                    if self.model >= CpuModel::I80286
                        && temp_sp > u64::from(self.state.sdesc[SReg::Ss.index()].limit)
                    {
                        return Err(self.gp(
                            0,
                            "RETN - stack pointer is not within the stack segment limit",
                        ));
                    }
                    self.state.regs[REG_SP] = temp_sp;
                }
                update(&mut self.state.ip, ret_address, self.current.operand_size);
                let ip = self.state.ip;
                self.state.prefetch.flush(ip);
            }
            Mnemonic::Salc => {
                let value = if self.state.flags & CF != 0 { 0xFF } else { 0x00 };
                update_u8l(&mut self.state.regs[REG_AX], value);
            }
            Mnemonic::Sahf => {
                let ah = get_u8h(self.state.regs[REG_AX]);
                self.set_flags((self.state.flags & !0xFF) | u32::from(ah));
            }
            Mnemonic::Setb
            | Mnemonic::Setbe
            | Mnemonic::Setl
            | Mnemonic::Setle
            | Mnemonic::Setnb
            | Mnemonic::Setnbe
            | Mnemonic::Setnl
            | Mnemonic::Setnle
            | Mnemonic::Setno
            | Mnemonic::Setnp
            | Mnemonic::Setns
            | Mnemonic::Setnz
            | Mnemonic::Seto
            | Mnemonic::Setp
            | Mnemonic::Sets
            | Mnemonic::Setz => {
                let value = eval_cond(self.state.flags, (self.current.opcode & 0xF) as u8);
                self.write_ea(bus, 0, u64::from(value))?;
            }
            Mnemonic::Setmo => {
                // Undocumented 8086 group-2 reg=6: set minus one
                if self.read_ea(bus, 1)? != 0 {
                    result = u64::MAX;
                    self.write_ea(bus, 0, result)?;
                    flags_mask = RESULT_FLAGS_MASK;
                }
            }
            Mnemonic::Sal | Mnemonic::Shl => self.exec_shl(bus)?,
            Mnemonic::Shr => self.exec_shr(bus)?,
            Mnemonic::Sar => self.exec_sar(bus)?,
            Mnemonic::Shld | Mnemonic::Shrd => {
                let kind = self.current.instruction.mnemonic;
                self.exec_shift_double(bus, kind)?;
            }
            Mnemonic::Rcl | Mnemonic::Rcr | Mnemonic::Rol | Mnemonic::Ror => {
                let kind = self.current.instruction.mnemonic;
                self.exec_rotate(bus, kind)?;
            }
            Mnemonic::Sbb => {
                let l = self.read_ea(bus, 0)?;
                let r = self.read_ea(bus, 1)?;
                result = l
                    .wrapping_sub(r)
                    .wrapping_sub(u64::from(self.state.flags & CF != 0));
                self.write_ea(bus, 0, result)?;
                carry = sub_carry(l, r, result);
                flags_mask = RESULT_FLAGS_MASK;
            }
            Mnemonic::Sgdt | Mnemonic::Sidt => {
                let table = if self.current.mnemonic == Mnemonic::Sgdt {
                    self.state.gdt
                } else {
                    self.state.idt
                };
                let mut addr = self.calc_address(self.current.ea[0]);
                self.write_mem(bus, addr, u64::from(table.limit), 2)?;
                addr.offset += 2;
                self.write_mem(bus, addr, table.base, 4)?;
            }
            Mnemonic::Sldt => {
                let index = self.state.ldt_index;
                self.write_ea(bus, 0, u64::from(index))?;
            }
            Mnemonic::Sub => {
                let l = self.read_ea(bus, 0)?;
                let r = self.read_ea(bus, 1)?;
                result = l.wrapping_sub(r);
                self.write_ea(bus, 0, result)?;
                carry = sub_carry(l, r, result);
                flags_mask = RESULT_FLAGS_MASK;
            }
            Mnemonic::Scas | Mnemonic::Scasb => {
                self.do_string_instruction(bus, Mnemonic::Scas)?;
            }
            Mnemonic::Smsw => {
                let value = self.state.cregs[0] & 0xFFFF;
                self.write_ea(bus, 0, value)?;
            }
            Mnemonic::Stc => self.state.flags |= CF,
            Mnemonic::Std => self.state.flags |= DF,
            Mnemonic::Sti => {
                self.check_priv_iopl()?;
                self.state.flags |= IF;
                self.state.int_delay = true;
            }
            Mnemonic::Stos | Mnemonic::Stosb => {
                self.do_string_instruction(bus, Mnemonic::Stos)?;
            }
            Mnemonic::Str => {
                self.check_pmode()?;
                let index = self.state.task_index;
                self.write_ea(bus, 0, u64::from(index))?;
            }
            Mnemonic::Test => {
                let l = self.read_ea(bus, 0)?;
                let r = self.read_ea(bus, 1)?;
                result = l & r;
                flags_mask = RESULT_FLAGS_MASK;
            }
            Mnemonic::Verr | Mnemonic::Verw => {
                let is_verr = self.current.instruction.mnemonic == Mnemonic::Verr;
                let seg = self.read_ea(bus, 0)? as u16;
                self.state.flags &= !ZF;
                if seg != 0 {
                    let attempt = |cpu: &mut Self,
                                   bus: &mut SystemBus|
                     -> Result<bool, CpuError> {
                        let desc = cpu.read_descriptor(bus, seg)?;
                        if desc.access & ACCESS_S == 0 {
                            return Ok(false);
                        }
                        if desc.access & (ACCESS_E | ACCESS_DC) != ACCESS_E | ACCESS_DC
                            && (cpu.cpl() > desc.dpl() || (seg & SEL_RPL) as u8 > desc.dpl())
                        {
                            return Ok(false);
                        }
                        Ok(match desc.access & (ACCESS_E | ACCESS_RW) {
                            0 | 0b1010 => is_verr, // Readable data / readable code
                            0b0010 => true,        // Writable data
                            _ => false,
                        })
                    };
                    match attempt(self, bus) {
                        Ok(true) => self.state.flags |= ZF,
                        Ok(false) => {}
                        Err(CpuError::Exception(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
            Mnemonic::Xchg => {
                let l = self.read_ea(bus, 0)?;
                let r = self.read_ea(bus, 1)?;
                // Memory first, in case a register is part of the EA
                self.write_ea(bus, 1, l)?;
                self.write_ea(bus, 0, r)?;
            }
            Mnemonic::Xlat => {
                // Segment overrides work here even where undocumented
                let sr = self.current.prefixes.seg_override().unwrap_or(SReg::Ds);
                let offset = (self.state.regs[REG_BX]
                    .wrapping_add(self.state.regs[REG_AX] & 0xFF))
                    & self.current.address_mask();
                let value = self.read_mem(bus, SegmentedAddress { sreg: sr, offset }, 1)?;
                update_u8l(&mut self.state.regs[REG_AX], value);
            }
            Mnemonic::Xor => {
                let l = self.read_ea(bus, 0)?;
                let r = self.read_ea(bus, 1)?;
                result = l ^ r;
                self.write_ea(bus, 0, result)?;
                flags_mask = RESULT_FLAGS_MASK;
            }
            Mnemonic::Undef | Mnemonic::Ud2 => {
                return Err(self.ud(&format!(
                    "undefined instruction {:02X?}",
                    self.current.raw_bytes()
                )));
            }
            other => {
                return Err(CpuError::Runtime(format!(
                    "{other} is not yet implemented"
                )));
            }
        }

        if flags_mask != 0 {
            self.update_flags(result, carry, flags_mask);
        }
        Ok(())
    }
}
