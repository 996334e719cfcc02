//! Stateless instruction decoder.
//!
//! Input is a fetch callback producing one byte at a time (so the caller
//! controls where bytes come from: the prefetch queue during execution, a
//! memory peek for disassembly). The decoder calls it exactly as many
//! times as the encoded instruction consumes and fails with `#UD` once an
//! encoding would exceed 15 bytes.
//!
//! Effective addresses are *not* evaluated here; each operand comes back
//! as a [`DecodedEa`] that the execution engine resolves against the
//! current register and segment state.

use crate::exception::{CpuError, CpuException, Exception};
use crate::model::{CpuInfo, CpuModel};
use crate::opcodes::{
    DecodeTables, Instruction, Mnemonic, Op, DECODE_TABLES_80386, DECODE_TABLES_8086,
    UNDEFINED_INSTRUCTION,
};
use crate::registers::{SReg, REG_DX};

pub(crate) const MAX_INSTRUCTION_BYTES: usize = 15;
pub(crate) const MAX_OPERANDS: usize = 3;

// Prefix byte values.
pub(crate) const OPCODE_ES: u8 = 0x26;
pub(crate) const OPCODE_CS: u8 = 0x2E;
pub(crate) const OPCODE_SS: u8 = 0x36;
pub(crate) const OPCODE_DS: u8 = 0x3E;
pub(crate) const OPCODE_FS: u8 = 0x64;
pub(crate) const OPCODE_GS: u8 = 0x65;
pub(crate) const OPCODE_OPER: u8 = 0x66;
pub(crate) const OPCODE_ADDR: u8 = 0x67;
pub(crate) const OPCODE_LOCK: u8 = 0xF0;
pub(crate) const OPCODE_REPNZ: u8 = 0xF2;
pub(crate) const OPCODE_REPZ: u8 = 0xF3;

const PREFIX_REPNZ: u32 = 1;
const PREFIX_REPZ: u32 = 2;
const PREFIX_REP_MASK: u32 = 3;
const PREFIX_SEG_SHIFT: u32 = 2;
const PREFIX_SEG_MASK: u32 = 7 << PREFIX_SEG_SHIFT;
const PREFIX_OPER_SIZE: u32 = 1 << 5;
const PREFIX_ADDR_SIZE: u32 = 1 << 6;
const PREFIX_LOCK: u32 = 1 << 7;

/// Collected prefix state. Later segment/repeat prefixes win; the other
/// bits are OR'd.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Prefixes(u32);

impl Prefixes {
    #[must_use]
    pub fn seg_override(self) -> Option<SReg> {
        let v = (self.0 & PREFIX_SEG_MASK) >> PREFIX_SEG_SHIFT;
        if v == 0 {
            None
        } else {
            SReg::from_index((v - 1) as u8)
        }
    }

    #[must_use]
    pub fn has_rep(self) -> bool {
        self.0 & PREFIX_REP_MASK != 0
    }

    #[must_use]
    pub fn has_repnz(self) -> bool {
        self.0 & PREFIX_REP_MASK == PREFIX_REPNZ
    }

    #[must_use]
    pub fn has_repz(self) -> bool {
        self.0 & PREFIX_REP_MASK == PREFIX_REPZ
    }

    #[must_use]
    pub fn has_lock(self) -> bool {
        self.0 & PREFIX_LOCK != 0
    }

    #[must_use]
    pub fn has_operand_size(self) -> bool {
        self.0 & PREFIX_OPER_SIZE != 0
    }

    #[must_use]
    pub fn has_address_size(self) -> bool {
        self.0 & PREFIX_ADDR_SIZE != 0
    }

    fn set_seg(&mut self, sr: SReg) {
        self.0 = (self.0 & !PREFIX_SEG_MASK) | ((sr.index() as u32 + 1) << PREFIX_SEG_SHIFT);
    }

    fn set_rep(&mut self, repnz: bool) {
        self.0 = (self.0 & !PREFIX_REP_MASK) | if repnz { PREFIX_REPNZ } else { PREFIX_REPZ };
    }
}

/// A decoded operand. Closed sum over register classes, immediates,
/// absolute far pointers, direct memory offsets, modrm memory forms, and
/// PC-relative displacements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodedEa {
    #[default]
    None,
    Reg8(u8),
    Reg16(u8),
    Reg32(u8),
    Sreg(u8),
    Creg(u8),
    Dreg(u8),
    /// Immediate; `Ibss`-style operands are stored already sign-extended.
    Imm8(u64),
    Imm16(u64),
    Imm32(u64),
    /// PC-relative displacement, stored raw (sign applied at use).
    Rel8(u64),
    Rel16(u64),
    Rel32(u64),
    /// Direct memory offset (moffs).
    Mem16(u64),
    Mem32(u64),
    /// Absolute far pointer, offset in the low bits, segment above.
    Abs16_16(u64),
    Abs16_32(u64),
    /// 16-bit modrm memory form.
    Rm16 { rm: u8, disp: u32 },
    /// 32-bit modrm memory form (SIB byte meaningful when present).
    Rm32 { rm: u8, sib: u8, disp: u32 },
}

impl DecodedEa {
    #[must_use]
    pub fn is_memory(self) -> bool {
        matches!(
            self,
            Self::Mem16(_)
                | Self::Mem32(_)
                | Self::Abs16_16(_)
                | Self::Abs16_32(_)
                | Self::Rm16 { .. }
                | Self::Rm32 { .. }
        )
    }
}

pub(crate) const fn modrm_mod(modrm: u8) -> u8 {
    (modrm >> 6) & 3
}

pub(crate) const fn modrm_reg(modrm: u8) -> u8 {
    (modrm >> 3) & 7
}

pub(crate) const fn modrm_rm(modrm: u8) -> u8 {
    modrm & 7
}

pub(crate) const fn modrm32_has_sib(modrm: u8) -> bool {
    modrm_mod(modrm) != 0b11 && modrm_rm(modrm) == 0b100
}

pub(crate) const fn modrm32_has_disp(modrm: u8) -> bool {
    match modrm_mod(modrm) {
        0b00 => modrm_rm(modrm) == 0b101,
        0b01 | 0b10 => true,
        _ => false,
    }
}

/// One fully decoded instruction.
#[derive(Debug, Clone, Copy)]
pub struct DecodedInstruction {
    pub num_bytes: u8,
    pub bytes: [u8; MAX_INSTRUCTION_BYTES],
    pub instruction: &'static Instruction,
    pub prefixes: Prefixes,
    /// Width of the result in bytes (drives flag evaluation).
    pub operation_size: u8,
    pub operand_size: u8,
    pub address_size: u8,
    /// Primary opcode, with the `0F` page in the high byte.
    pub opcode: u16,
    pub mnemonic: Mnemonic,
    pub num_operands: u8,
    pub ea: [DecodedEa; MAX_OPERANDS],
}

impl Default for DecodedInstruction {
    fn default() -> Self {
        Self {
            num_bytes: 0,
            bytes: [0; MAX_INSTRUCTION_BYTES],
            instruction: &UNDEFINED_INSTRUCTION,
            prefixes: Prefixes::default(),
            operation_size: 0,
            operand_size: 0,
            address_size: 0,
            opcode: 0,
            mnemonic: Mnemonic::Undef,
            num_operands: 0,
            ea: [DecodedEa::None; MAX_OPERANDS],
        }
    }
}

impl DecodedInstruction {
    #[must_use]
    pub fn raw_bytes(&self) -> &[u8] {
        &self.bytes[..self.num_bytes as usize]
    }

    #[must_use]
    pub fn address_mask(&self) -> u64 {
        (1u64 << (8 * self.address_size)) - 1
    }
}

fn tables_for(model: CpuModel) -> Result<&'static DecodeTables, CpuError> {
    match model {
        CpuModel::I8088 | CpuModel::I8086 => Ok(&DECODE_TABLES_8086),
        CpuModel::I80386Sx | CpuModel::I80386 | CpuModel::I80586 => Ok(&DECODE_TABLES_80386),
        _ => Err(CpuError::Runtime(format!(
            "unsupported CPU model {model:?}"
        ))),
    }
}

fn operation_size_from_op(op: Op, v_size: u8, mnemonic: Mnemonic) -> Result<u8, CpuError> {
    if op.reg8_index().is_some() {
        return Ok(1);
    }
    if op.regv_index().is_some() {
        return Ok(v_size);
    }
    if op.sreg_index().is_some() {
        return Ok(2);
    }
    Ok(match op {
        Op::None | Op::C1 | Op::DX | Op::Ap => 0,
        Op::Cd | Op::Dd => 4,
        Op::Eb | Op::Gb | Op::Ob => 1,
        Op::Ev | Op::Gv | Op::Ov => v_size,
        Op::Ew | Op::Gw | Op::Sw => 2,
        Op::Ib if mnemonic == Mnemonic::Aam => 1,
        Op::Ib
        | Op::Ibs
        | Op::Ibss
        | Op::Iv
        | Op::Ivds
        | Op::Ivs
        | Op::Iw
        | Op::Jbs
        | Op::Jvds
        | Op::Ma
        | Op::Mp
        | Op::Mptp
        | Op::Ms
        | Op::MwRv => 0,
        Op::Rd => 4,
        _ => {
            return Err(CpuError::Runtime(format!(
                "no operation size for operand mode {op:?}"
            )))
        }
    })
}

struct Decoder<F> {
    fetch: F,
    res: DecodedInstruction,
}

impl<F: FnMut() -> Result<u8, CpuError>> Decoder<F> {
    fn ib(&mut self) -> Result<u8, CpuError> {
        if self.res.num_bytes as usize == MAX_INSTRUCTION_BYTES {
            return Err(CpuException::new(Exception::InvalidOpcode).into());
        }
        let byte = (self.fetch)()?;
        self.res.bytes[self.res.num_bytes as usize] = byte;
        self.res.num_bytes += 1;
        Ok(byte)
    }

    fn iw(&mut self) -> Result<u16, CpuError> {
        let lo = self.ib()?;
        let hi = self.ib()?;
        Ok(u16::from(lo) | u16::from(hi) << 8)
    }

    fn id(&mut self) -> Result<u32, CpuError> {
        let lo = self.iw()?;
        let hi = self.iw()?;
        Ok(u32::from(lo) | u32::from(hi) << 16)
    }

    /// Shared tail for the `E`-family operand modes: register form for
    /// mod 11, otherwise the 16- or 32-bit modrm memory encoding with its
    /// SIB and displacement bytes.
    fn handle_e(&mut self, modrm: u8, reg_form: DecodedEa) -> Result<DecodedEa, CpuError> {
        if modrm_mod(modrm) == 0b11 {
            return Ok(reg_form);
        }
        if self.res.address_size == 4 {
            let mut sib = 0;
            let mut disp = 0;
            if modrm32_has_sib(modrm) {
                sib = self.ib()?;
                // SIB base=BP with mod 00 means disp32 instead
                if sib & 7 == 0b101 && modrm_mod(modrm) == 0b00 {
                    disp = self.id()?;
                }
            }
            if modrm32_has_disp(modrm) {
                disp = if modrm_mod(modrm) == 0b01 {
                    u32::from(self.ib()?)
                } else {
                    self.id()?
                };
            }
            Ok(DecodedEa::Rm32 { rm: modrm, sib, disp })
        } else {
            let mut disp = 0;
            if modrm_mod(modrm) == 0b01 {
                disp = u32::from(self.ib()?);
            } else if modrm_mod(modrm) == 0b10
                || (modrm_mod(modrm) == 0b00 && modrm_rm(modrm) == 0b110)
            {
                disp = u32::from(self.iw()?);
            }
            Ok(DecodedEa::Rm16 { rm: modrm, disp })
        }
    }

    /// Register form of `Ev` for the current operand size.
    fn ev_reg_form(&self, modrm: u8) -> DecodedEa {
        if self.res.operand_size == 4 {
            DecodedEa::Reg32(modrm_rm(modrm))
        } else {
            DecodedEa::Reg16(modrm_rm(modrm))
        }
    }
}

/// Decode one instruction from a byte stream.
pub fn decode<F>(info: CpuInfo, fetch: F) -> Result<DecodedInstruction, CpuError>
where
    F: FnMut() -> Result<u8, CpuError>,
{
    let tables = tables_for(info.model)?;

    let mut d = Decoder {
        fetch,
        res: DecodedInstruction {
            operand_size: info.default_operand_size,
            address_size: info.default_operand_size,
            ..DecodedInstruction::default()
        },
    };

    let mut table = tables.table;
    let mut has_modrm_table = tables.has_modrm;

    // Prefix collection ends at the first byte that is not a prefix in
    // the primary table.
    let mut opcode;
    loop {
        opcode = d.ib()?;
        if table[opcode as usize].mnemonic != Mnemonic::Prefix {
            break;
        }
        match opcode {
            OPCODE_ES => d.res.prefixes.set_seg(SReg::Es),
            OPCODE_CS => d.res.prefixes.set_seg(SReg::Cs),
            OPCODE_SS => d.res.prefixes.set_seg(SReg::Ss),
            OPCODE_DS => d.res.prefixes.set_seg(SReg::Ds),
            OPCODE_FS => d.res.prefixes.set_seg(SReg::Fs),
            OPCODE_GS => d.res.prefixes.set_seg(SReg::Gs),
            OPCODE_OPER => {
                d.res.prefixes.0 |= PREFIX_OPER_SIZE;
                d.res.operand_size = info.default_operand_size ^ 6;
            }
            OPCODE_ADDR => {
                d.res.prefixes.0 |= PREFIX_ADDR_SIZE;
                d.res.address_size = info.default_operand_size ^ 6;
            }
            OPCODE_LOCK => d.res.prefixes.0 |= PREFIX_LOCK,
            OPCODE_REPNZ => d.res.prefixes.set_rep(true),
            OPCODE_REPZ => d.res.prefixes.set_rep(false),
            _ => {
                return Err(CpuError::Runtime(format!(
                    "unhandled prefix {opcode:#04X}"
                )))
            }
        }
    }

    let mut full_opcode = u16::from(opcode);

    if opcode == 0x0F {
        if let (Some(table_0f), Some(has_modrm_0f)) = (tables.table_0f, tables.has_modrm_0f) {
            table = table_0f;
            has_modrm_table = has_modrm_0f;
            opcode = d.ib()?;
            full_opcode = full_opcode << 8 | u16::from(opcode);
        }
    }

    let mut ins = &table[opcode as usize];
    if ins.mnemonic == Mnemonic::Undef {
        return Err(CpuException::new(Exception::InvalidOpcode).into());
    }

    let has_modrm = has_modrm_table[opcode as usize / 32] & (1 << (opcode % 32)) != 0;
    let modrm = if has_modrm { d.ib()? } else { 0 };

    if ins.mnemonic == Mnemonic::Table {
        debug_assert!(has_modrm);
        if let Some(sub) = ins.table {
            ins = &sub[modrm_reg(modrm) as usize];
        }
    }

    d.res.mnemonic = ins.mnemonic;
    d.res.instruction = ins;
    d.res.opcode = full_opcode;

    if ins.operands[0] == Op::None {
        d.res.operation_size = match ins.mnemonic {
            Mnemonic::Daa
            | Mnemonic::Das
            | Mnemonic::Insb
            | Mnemonic::Movsb
            | Mnemonic::Lodsb
            | Mnemonic::Stosb
            | Mnemonic::Scasb
            | Mnemonic::Cmpsb
            | Mnemonic::Outsb => 1,
            _ => d.res.operand_size,
        };
    } else {
        d.res.operation_size =
            operation_size_from_op(ins.operands[0], d.res.operand_size, ins.mnemonic)?;
    }

    for i in 0..MAX_OPERANDS {
        let opmode = ins.operands[i];
        if opmode == Op::None {
            break;
        }

        let ea = if let Some(r) = opmode.reg8_index() {
            DecodedEa::Reg8(r)
        } else if let Some(r) = opmode.regv_index() {
            if d.res.operand_size == 4 {
                DecodedEa::Reg32(r)
            } else {
                DecodedEa::Reg16(r)
            }
        } else if let Some(r) = opmode.sreg_index() {
            DecodedEa::Sreg(r)
        } else {
            match opmode {
                Op::C1 => DecodedEa::Imm8(1),
                Op::DX => DecodedEa::Reg16(REG_DX as u8),
                Op::Ap => {
                    if d.res.operand_size == 4 {
                        let offset = d.id()?;
                        let seg = d.iw()?;
                        DecodedEa::Abs16_32(u64::from(offset) | u64::from(seg) << 32)
                    } else {
                        DecodedEa::Abs16_16(u64::from(d.id()?))
                    }
                }
                Op::Cd => DecodedEa::Creg(modrm_reg(modrm)),
                Op::Dd => DecodedEa::Dreg(modrm_reg(modrm)),
                Op::Eb => {
                    d.res.operand_size = 1;
                    d.handle_e(modrm, DecodedEa::Reg8(modrm_rm(modrm)))?
                }
                Op::Ew | Op::Mw => {
                    // Operation forced to 16-bit (e.g. MOV Sw, Ew)
                    d.res.operand_size = 2;
                    d.handle_e(modrm, DecodedEa::Reg16(modrm_rm(modrm)))?
                }
                Op::Ev => {
                    let reg_form = d.ev_reg_form(modrm);
                    d.handle_e(modrm, reg_form)?
                }
                Op::Gb => DecodedEa::Reg8(modrm_reg(modrm)),
                Op::Gv => {
                    if d.res.operand_size == 4 {
                        DecodedEa::Reg32(modrm_reg(modrm))
                    } else {
                        DecodedEa::Reg16(modrm_reg(modrm))
                    }
                }
                Op::Gw => DecodedEa::Reg16(modrm_reg(modrm)),
                Op::Ib | Op::Ibs => DecodedEa::Imm8(u64::from(d.ib()?)),
                Op::Ibss => DecodedEa::Imm8(i64::from(d.ib()? as i8) as u64),
                Op::Ivs => {
                    if d.res.operand_size == 4 {
                        DecodedEa::Imm32(i64::from(d.id()? as i32) as u64)
                    } else {
                        DecodedEa::Imm16(i64::from(d.iw()? as i16) as u64)
                    }
                }
                Op::Iv | Op::Ivds => {
                    if d.res.operand_size == 4 {
                        DecodedEa::Imm32(u64::from(d.id()?))
                    } else {
                        DecodedEa::Imm16(u64::from(d.iw()?))
                    }
                }
                Op::Iw => DecodedEa::Imm16(u64::from(d.iw()?)),
                Op::Jbs => DecodedEa::Rel8(u64::from(d.ib()?)),
                Op::Jvds => {
                    if d.res.operand_size == 4 {
                        DecodedEa::Rel32(u64::from(d.id()?))
                    } else {
                        DecodedEa::Rel16(u64::from(d.iw()?))
                    }
                }
                Op::Ob => {
                    d.res.operand_size = 1;
                    if d.res.address_size == 2 {
                        DecodedEa::Mem16(u64::from(d.iw()?))
                    } else {
                        DecodedEa::Mem32(u64::from(d.id()?))
                    }
                }
                Op::Ov => {
                    if d.res.address_size == 2 {
                        DecodedEa::Mem16(u64::from(d.iw()?))
                    } else {
                        DecodedEa::Mem32(u64::from(d.id()?))
                    }
                }
                Op::M | Op::Ma | Op::Mp | Op::Mptp | Op::Ms => {
                    // A register form decodes (the executor raises #UD)
                    let reg_form = d.ev_reg_form(modrm);
                    d.handle_e(modrm, reg_form)?
                }
                Op::Rd => {
                    if modrm_mod(modrm) != 0b11 {
                        return Err(CpuError::Runtime(format!(
                            "memory form invalid for 'R' operand of {} (opcode {full_opcode:#06X})",
                            ins.mnemonic
                        )));
                    }
                    DecodedEa::Reg32(modrm_rm(modrm))
                }
                Op::Sw => {
                    let mut reg = modrm_reg(modrm);
                    if info.model < CpuModel::I80386Sx {
                        reg &= 3; // Only two bits decoded
                    }
                    DecodedEa::Sreg(reg)
                }
                Op::MwRv => {
                    // MOV r/m, Sreg: "Ew" to memory but "Ev" to a register
                    if modrm_mod(modrm) == 0b11 {
                        d.res.operation_size = d.res.operand_size;
                        let reg_form = d.ev_reg_form(modrm);
                        d.handle_e(modrm, reg_form)?
                    } else {
                        d.res.operand_size = 2;
                        d.res.operation_size = 2;
                        d.handle_e(modrm, DecodedEa::Reg16(modrm_rm(modrm)))?
                    }
                }
                _ => {
                    return Err(CpuError::Runtime(format!(
                        "unhandled operand mode {opmode:?} for {} (opcode {full_opcode:#06X})",
                        ins.mnemonic
                    )))
                }
            }
        };

        d.res.ea[i] = ea;
        d.res.num_operands += 1;
    }

    Ok(d.res)
}
