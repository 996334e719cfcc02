//! Shifts and rotates.
//!
//! Counts are masked by the family shift mask (63 on the 8086 family, 31
//! later). Where the architecture leaves flags undefined for counts past
//! the operand width, these routines compute them deterministically the
//! way a 386SX does; the byte-operand fixups for counts above 8 are
//! gated on that model.

use emu_core::SystemBus;

use crate::cpu::{sign_extend, Cpu};
use crate::exception::CpuError;
use crate::exec::RESULT_FLAGS_MASK;
use crate::flags::{set_flag, AF, CF, OF};
use crate::model::CpuModel;
use crate::opcodes::Mnemonic;

impl Cpu {
    pub(crate) fn exec_shl(&mut self, bus: &mut SystemBus) -> Result<(), CpuError> {
        let l = self.read_ea(bus, 0)?;
        let r = self.read_ea(bus, 1)? & u64::from(self.shift_mask);
        if r == 0 {
            return Ok(());
        }
        let result = l << r;
        let carry = l << (r - 1);
        self.write_ea(bus, 0, result)?;
        self.state.flags &= !OF;
        if ((result ^ carry) >> (8 * u32::from(self.current.operation_size) - 1)) & 1 != 0 {
            self.state.flags |= OF;
        }
        let mut flags_mask = RESULT_FLAGS_MASK & !OF;

        // CF is undefined for counts past the width
        if self.current.operation_size == 1 && self.model == CpuModel::I80386Sx && r > 8 {
            if (r == 16 || r == 24) && l & 1 != 0 {
                self.state.flags |= CF | OF;
            } else {
                self.state.flags &= !(CF | OF);
            }
            flags_mask &= !CF;
        }
        self.update_flags(result, carry, flags_mask);
        Ok(())
    }

    pub(crate) fn exec_shr(&mut self, bus: &mut SystemBus) -> Result<(), CpuError> {
        let l = self.read_ea(bus, 0)?;
        let r = self.read_ea(bus, 1)? & u64::from(self.shift_mask);
        if r == 0 {
            return Ok(());
        }
        let result = l >> r;
        let carry = l >> (r - 1);
        self.state.flags &= !(OF | CF | AF);
        if carry & 1 != 0 {
            self.state.flags |= CF;
        }
        // One-bit shifts set OF to the original sign bit
        if r == 1 && l >> (8 * u32::from(self.current.operand_size) - 1) != 0 {
            self.state.flags |= OF;
        }
        // Flags are evaluated before the result lands
        self.update_flags(result, carry, RESULT_FLAGS_MASK & !(OF | CF | AF));
        if self.current.operation_size == 1 && self.model == CpuModel::I80386Sx && r > 8 {
            self.state.flags &= !OF;
            if (r == 16 || r == 24) && l & 0x80 != 0 {
                self.state.flags |= CF;
            } else {
                self.state.flags &= !CF;
            }
        }
        self.write_ea(bus, 0, result)?;
        Ok(())
    }

    pub(crate) fn exec_sar(&mut self, bus: &mut SystemBus) -> Result<(), CpuError> {
        let l = sign_extend(self.read_ea(bus, 0)?, self.current.operand_size);
        let r = self.read_ea(bus, 1)? & u64::from(self.shift_mask);
        if r == 0 {
            return Ok(());
        }
        let result = ((l as i64) >> r) as u64;
        let carry = ((l as i64) >> (r - 1)) as u64;
        self.write_ea(bus, 0, result)?;
        self.state.flags &= !(OF | CF | AF);
        if carry & 1 != 0 {
            self.state.flags |= CF;
        }
        self.update_flags(result, carry, RESULT_FLAGS_MASK & !(OF | CF | AF));
        Ok(())
    }

    /// SHLD/SHRD, computed bit-by-bit the way the barrel shifter's
    /// observable flags come out.
    pub(crate) fn exec_shift_double(
        &mut self,
        bus: &mut SystemBus,
        kind: Mnemonic,
    ) -> Result<(), CpuError> {
        let msb_shift = u32::from(self.current.operand_size) * 8 - 1;
        // The result is undefined for counts past the width; 31 matches
        // the reference behaviour
        let shift = self.read_ea(bus, 2)? & 31;
        let mut result = self.read_ea(bus, 0)?;
        let mut r = self.read_ea(bus, 1)?;
        if shift == 0 {
            return Ok(());
        }

        let mut carry = 0u64;
        if kind == Mnemonic::Shld {
            for _ in 0..shift {
                let cy = (r >> msb_shift) & 1;
                r = r << 1 | r >> msb_shift;
                carry = result;
                result = result << 1 | cy;
            }
            self.write_ea(bus, 0, result)?;
            set_flag(
                &mut self.state.flags,
                OF,
                ((result ^ carry) >> msb_shift) & 1 != 0,
            );
            self.update_flags(result, carry, RESULT_FLAGS_MASK & !(OF | AF));
        } else {
            let mut overflow = false;
            for _ in 0..shift {
                let cy = r & 1;
                r = r << msb_shift | r >> 1;
                carry = result << msb_shift;
                overflow = cy ^ ((result >> msb_shift) & 1) != 0;
                result = result >> 1 | cy << msb_shift;
            }
            self.write_ea(bus, 0, result)?;
            set_flag(&mut self.state.flags, OF, overflow);
            self.update_flags(result, carry, RESULT_FLAGS_MASK & !OF);
        }
        Ok(())
    }

    pub(crate) fn exec_rotate(
        &mut self,
        bus: &mut SystemBus,
        kind: Mnemonic,
    ) -> Result<(), CpuError> {
        let width = u32::from(self.current.operation_size) * 8;
        let mut l = self.read_ea(bus, 0)?;
        let r = self.read_ea(bus, 1)? & u64::from(self.shift_mask);
        let mut overflow = 0u64;
        let mut carry;

        match kind {
            Mnemonic::Rcl => {
                carry = u64::from(self.state.flags & CF != 0);
                for _ in 0..r {
                    let old_cy = carry;
                    carry = (l >> (width - 1)) & 1;
                    l <<= 1;
                    l |= old_cy;
                    overflow = (carry ^ (l >> (width - 1))) & 1;
                }
            }
            Mnemonic::Rcr => {
                carry = u64::from(self.state.flags & CF != 0);
                for _ in 0..r {
                    let old_cy = carry;
                    carry = l & 1;
                    l >>= 1;
                    overflow = (old_cy ^ (l >> (width - 2))) & 1;
                    l |= old_cy << (width - 1);
                }
            }
            Mnemonic::Rol => {
                carry = u64::from(self.state.flags & CF);
                for _ in 0..r {
                    carry = (l >> (width - 1)) & 1;
                    l <<= 1;
                    overflow = (carry ^ (l >> (width - 1))) & 1;
                    l |= carry;
                }
            }
            _ => {
                // ROR
                carry = u64::from(self.state.flags & CF);
                for _ in 0..r {
                    carry = l & 1;
                    l >>= 1;
                    overflow = (carry ^ (l >> (width - 2))) & 1;
                    l |= carry << (width - 1);
                }
            }
        }

        set_flag(&mut self.state.flags, CF, carry != 0);
        if r != 0 {
            set_flag(&mut self.state.flags, OF, overflow != 0);
        }
        self.write_ea(bus, 0, l)?;
        Ok(())
    }
}
