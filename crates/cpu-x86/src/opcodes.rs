//! Opcode table data model.
//!
//! Static per-family tables map each primary (and `0F`-escaped) opcode
//! byte to a mnemonic and up to three operand modes. A 256-bit bitmap per
//! table marks which opcodes carry a modrm byte; `Mnemonic::Table`
//! entries hold an eight-entry sub-table dispatched on modrm.reg.

pub(crate) mod tables_8086;
pub(crate) mod tables_80386;

/// Instruction mnemonics across all supported families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnemonic {
    Aaa,
    Aad,
    Aam,
    Aas,
    Adc,
    Add,
    And,
    Arpl,
    Bound,
    Bsf,
    Bsr,
    Bt,
    Btc,
    Btr,
    Bts,
    Call,
    Callf,
    Cbw,
    Cdq,
    Clc,
    Cld,
    Cli,
    Clts,
    Cmc,
    Cmp,
    Cmps,
    Cmpsb,
    Cwd,
    Cwde,
    Daa,
    Das,
    Dec,
    Div,
    Enter,
    Esc,
    Fwait,
    Hlt,
    Idiv,
    Imul,
    In,
    Inc,
    Ins,
    Insb,
    Int,
    Int1,
    Int3,
    Into,
    Iret,
    Jb,
    Jbe,
    Jcxz,
    Jl,
    Jle,
    Jmp,
    Jmpf,
    Jnb,
    Jnbe,
    Jnl,
    Jnle,
    Jno,
    Jnp,
    Jns,
    Jnz,
    Jo,
    Jp,
    Js,
    Jz,
    Lahf,
    Lar,
    Lds,
    Lea,
    Leave,
    Les,
    Lfs,
    Lgdt,
    Lgs,
    Lidt,
    Lldt,
    Lmsw,
    Loadall,
    Lock,
    Lods,
    Lodsb,
    Loop,
    Loopnz,
    Loopz,
    Lsl,
    Lss,
    Ltr,
    Mov,
    Movs,
    Movsb,
    Movsx,
    Movzx,
    Mul,
    Neg,
    Nop,
    Not,
    Or,
    Out,
    Outs,
    Outsb,
    Pop,
    Popa,
    Popf,
    Prefix,
    Push,
    Pusha,
    Pushf,
    Rcl,
    Rcr,
    Retf,
    Retn,
    Rol,
    Ror,
    Rsm,
    Sahf,
    Sal,
    Salc,
    Sar,
    Sbb,
    Scas,
    Scasb,
    Setb,
    Setbe,
    Setl,
    Setle,
    Setmo,
    Setnb,
    Setnbe,
    Setnl,
    Setnle,
    Setno,
    Setnp,
    Setns,
    Setnz,
    Seto,
    Setp,
    Sets,
    Setz,
    Sgdt,
    Shl,
    Shld,
    Shr,
    Shrd,
    Sidt,
    Sldt,
    Smsw,
    Stc,
    Std,
    Sti,
    Stos,
    Stosb,
    Str,
    Sub,
    Table,
    Test,
    Ud1,
    Ud2,
    Undef,
    Verr,
    Verw,
    Xchg,
    Xlat,
    Xor,
}

impl std::fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Every mnemonic is a single word, so the debug name uppercased
        // is exactly the assembler spelling.
        f.write_str(&format!("{self:?}").to_uppercase())
    }
}

/// Operand modes: explicit registers, then the encoded operand templates.
///
/// The first three runs (byte registers, v-sized registers, segment
/// registers) are kept contiguous so decode can turn a mode into a
/// register number by subtraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    None,
    // Byte registers, encoding order
    AL,
    CL,
    DL,
    BL,
    AH,
    CH,
    DH,
    BH,
    // 16/32-bit registers, encoding order (width from operand size)
    EAX,
    ECX,
    EDX,
    EBX,
    ESP,
    EBP,
    ESI,
    EDI,
    // Segment registers, encoding order
    ES,
    CS,
    SS,
    DS,
    FS,
    GS,
    /// The constant 1 (shift-by-one forms).
    C1,
    /// DX as a port number (IN/OUT).
    DX,
    /// Direct far pointer `seg:offset`.
    Ap,
    /// Control register selected by modrm.reg.
    Cd,
    /// Debug register selected by modrm.reg.
    Dd,
    /// Test register selected by modrm.reg.
    Td,
    E,
    Eb,
    Ev,
    Ew,
    G,
    Gb,
    Gv,
    Gw,
    Ib,
    Ibs,
    Ibss,
    Iv,
    Ivds,
    Ivs,
    Iw,
    Jbs,
    Jvds,
    M,
    Ma,
    Mp,
    Mptp,
    Ms,
    Mw,
    MwRv,
    Ob,
    Ov,
    Rd,
    Sw,
}

impl Op {
    /// Register number for an explicit byte-register mode.
    #[must_use]
    pub(crate) fn reg8_index(self) -> Option<u8> {
        let i = self as u8;
        (Self::AL as u8..=Self::BH as u8)
            .contains(&i)
            .then(|| i - Self::AL as u8)
    }

    /// Register number for an explicit v-sized register mode.
    #[must_use]
    pub(crate) fn regv_index(self) -> Option<u8> {
        let i = self as u8;
        (Self::EAX as u8..=Self::EDI as u8)
            .contains(&i)
            .then(|| i - Self::EAX as u8)
    }

    /// Register number for an explicit segment-register mode.
    #[must_use]
    pub(crate) fn sreg_index(self) -> Option<u8> {
        let i = self as u8;
        (Self::ES as u8..=Self::GS as u8)
            .contains(&i)
            .then(|| i - Self::ES as u8)
    }
}

/// One opcode table entry.
#[derive(Debug, Clone, Copy)]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub operands: [Op; 3],
    /// Sub-table for `Mnemonic::Table`, dispatched on modrm.reg.
    pub table: Option<&'static [Instruction; 8]>,
}

impl Instruction {
    pub(crate) const fn ins(mnemonic: Mnemonic) -> Self {
        Self {
            mnemonic,
            operands: [Op::None; 3],
            table: None,
        }
    }

    pub(crate) const fn ins1(mnemonic: Mnemonic, a: Op) -> Self {
        Self {
            mnemonic,
            operands: [a, Op::None, Op::None],
            table: None,
        }
    }

    pub(crate) const fn ins2(mnemonic: Mnemonic, a: Op, b: Op) -> Self {
        Self {
            mnemonic,
            operands: [a, b, Op::None],
            table: None,
        }
    }

    pub(crate) const fn ins3(mnemonic: Mnemonic, a: Op, b: Op, c: Op) -> Self {
        Self {
            mnemonic,
            operands: [a, b, c],
            table: None,
        }
    }

    pub(crate) const fn group(table: &'static [Instruction; 8]) -> Self {
        Self {
            mnemonic: Mnemonic::Table,
            operands: [Op::None; 3],
            table: Some(table),
        }
    }
}

/// Decode tables for one CPU family.
pub(crate) struct DecodeTables {
    pub table: &'static [Instruction; 256],
    pub has_modrm: &'static [u32; 8],
    pub table_0f: Option<&'static [Instruction; 256]>,
    pub has_modrm_0f: Option<&'static [u32; 8]>,
}

pub(crate) static DECODE_TABLES_8086: DecodeTables = DecodeTables {
    table: &tables_8086::INSTRUCTION_TABLE,
    has_modrm: &tables_8086::HAS_MODRM,
    table_0f: None,
    has_modrm_0f: None,
};

pub(crate) static DECODE_TABLES_80386: DecodeTables = DecodeTables {
    table: &tables_80386::INSTRUCTION_TABLE,
    has_modrm: &tables_80386::HAS_MODRM,
    table_0f: Some(&tables_80386::INSTRUCTION_TABLE_0F),
    has_modrm_0f: Some(&tables_80386::HAS_MODRM_0F),
};

/// Entry used before any instruction has been decoded.
pub(crate) static UNDEFINED_INSTRUCTION: Instruction = Instruction::ins(Mnemonic::Undef);
