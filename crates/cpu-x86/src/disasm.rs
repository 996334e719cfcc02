//! Text rendering of decoded instructions for traces and history dumps.

use crate::address::Address;
use crate::decode::{
    modrm32_has_sib, modrm_mod, modrm_rm, DecodedEa, DecodedInstruction, OPCODE_ADDR, OPCODE_CS,
    OPCODE_DS, OPCODE_ES, OPCODE_FS, OPCODE_GS, OPCODE_LOCK, OPCODE_OPER, OPCODE_REPNZ,
    OPCODE_REPZ, OPCODE_SS,
};
use crate::opcodes::Mnemonic;
use crate::registers::{REG8_NAMES, REG16_NAMES, REG32_NAMES, RM16_NAMES, SREG_NAMES};
use std::fmt::Write as _;

fn disp_string(disp: i64, width: usize) -> String {
    if disp < 0 {
        format!("-0x{:0width$X}", -disp)
    } else {
        format!("+0x{disp:0width$X}")
    }
}

fn seg_override_string(ins: &DecodedInstruction) -> &'static str {
    match ins.prefixes.seg_override() {
        Some(sr) => match sr.index() {
            0 => "ES:",
            1 => "CS:",
            2 => "SS:",
            3 => "DS:",
            4 => "FS:",
            _ => "GS:",
        },
        None => "",
    }
}

fn format_ea(ins: &DecodedInstruction, ea: DecodedEa, next: Address, mem_size: u8) -> String {
    let mem_prefix = |out: &mut String| {
        match mem_size {
            1 => out.push_str("BYTE "),
            2 => out.push_str("WORD "),
            4 => out.push_str("DWORD "),
            _ => {}
        }
        out.push('[');
        out.push_str(seg_override_string(ins));
    };

    match ea {
        DecodedEa::None => String::new(),
        DecodedEa::Reg8(r) => REG8_NAMES[r as usize].into(),
        DecodedEa::Reg16(r) => REG16_NAMES[r as usize].into(),
        DecodedEa::Reg32(r) => REG32_NAMES[r as usize].into(),
        DecodedEa::Sreg(r) => SREG_NAMES.get(r as usize).copied().unwrap_or("S?").into(),
        DecodedEa::Creg(r) => format!("CR{r}"),
        DecodedEa::Dreg(r) => format!("DR{r}"),
        DecodedEa::Imm8(v) => format!("0x{:02X}", v & 0xFF),
        DecodedEa::Imm16(v) => format!("0x{:04X}", v & 0xFFFF),
        DecodedEa::Imm32(v) => format!("0x{:08X}", v & 0xFFFF_FFFF),
        DecodedEa::Rel8(v) => format!("0x{:04X}", (next + i64::from(v as u8 as i8)).offset()),
        DecodedEa::Rel16(v) => {
            format!("0x{:04X}", (next + i64::from(v as u16 as i16)).offset())
        }
        DecodedEa::Rel32(v) => {
            format!("0x{:08X}", (next + i64::from(v as u32 as i32)).offset())
        }
        DecodedEa::Mem16(addr) => {
            let mut out = String::new();
            mem_prefix(&mut out);
            let _ = write!(out, "0x{:04X}]", addr & 0xFFFF);
            out
        }
        DecodedEa::Mem32(addr) => {
            let mut out = String::new();
            mem_prefix(&mut out);
            let _ = write!(out, "0x{:08X}]", addr & 0xFFFF_FFFF);
            out
        }
        DecodedEa::Abs16_16(addr) => {
            format!("0x{:04X}:0x{:04X}", addr >> 16, addr & 0xFFFF)
        }
        DecodedEa::Abs16_32(addr) => {
            format!("0x{:04X}:0x{:08X}", addr >> 32, addr & 0xFFFF_FFFF)
        }
        DecodedEa::Rm16 { rm, disp } => {
            let mut out = String::new();
            mem_prefix(&mut out);
            match modrm_mod(rm) {
                0b00 if modrm_rm(rm) == 0b110 => {
                    let _ = write!(out, "0x{disp:04X}]");
                }
                0b00 => {
                    let _ = write!(out, "{}]", RM16_NAMES[modrm_rm(rm) as usize]);
                }
                0b01 => {
                    let _ = write!(
                        out,
                        "{}{}]",
                        RM16_NAMES[modrm_rm(rm) as usize],
                        disp_string(i64::from(disp as u8 as i8), 2)
                    );
                }
                _ => {
                    let _ = write!(
                        out,
                        "{}{}]",
                        RM16_NAMES[modrm_rm(rm) as usize],
                        disp_string(i64::from(disp as u16 as i16), 4)
                    );
                }
            }
            out
        }
        DecodedEa::Rm32 { rm, sib, disp } => {
            let mut out = String::new();
            mem_prefix(&mut out);
            let md = modrm_mod(rm);
            let disp_str = match md {
                0b01 => disp_string(i64::from(disp as u8 as i8), 2),
                0b10 => disp_string(i64::from(disp as i32), 8),
                _ => String::new(),
            };
            if modrm32_has_sib(rm) {
                let scale = 1u32 << ((sib >> 6) & 3);
                let index = (sib >> 3) & 7;
                let base = sib & 7;
                if base == 0b101 && md == 0b00 {
                    if index == 0b100 {
                        let _ = write!(out, "0x{disp:08X}]");
                    } else {
                        let _ = write!(
                            out,
                            "{}*{}{}]",
                            REG32_NAMES[index as usize],
                            scale,
                            disp_string(i64::from(disp as i32), 8)
                        );
                    }
                } else if index == 0b100 {
                    let _ = write!(out, "{}{}]", REG32_NAMES[base as usize], disp_str);
                } else {
                    let _ = write!(
                        out,
                        "{}+{}*{}{}]",
                        REG32_NAMES[base as usize], REG32_NAMES[index as usize], scale, disp_str
                    );
                }
            } else {
                match md {
                    0b00 if modrm_rm(rm) == 0b101 => {
                        let _ = write!(out, "0x{disp:08X}]");
                    }
                    0b00 => {
                        let _ = write!(out, "{}]", REG32_NAMES[modrm_rm(rm) as usize]);
                    }
                    _ => {
                        let _ = write!(out, "{}{}]", REG32_NAMES[modrm_rm(rm) as usize], disp_str);
                    }
                }
            }
            out
        }
    }
}

/// Format a decoded instruction in Intel-ish syntax. `addr` is the
/// address of the instruction (PC-relative operands render as their
/// resolved target).
#[must_use]
pub(crate) fn format_instruction(ins: &DecodedInstruction, addr: Address) -> String {
    let mut res = String::new();

    // First pass over the prefix bytes: find the active segment/repeat
    // prefixes so superseded ones can still be printed.
    let mut pos_seg = None;
    let mut pos_rep = None;
    let mut prefix_end = 0;
    for (i, &byte) in ins.raw_bytes().iter().enumerate() {
        if byte == (ins.opcode & 0xFF) as u8 || byte == (ins.opcode >> 8) as u8 {
            prefix_end = i;
            break;
        }
        match byte {
            OPCODE_ES | OPCODE_CS | OPCODE_SS | OPCODE_DS | OPCODE_FS | OPCODE_GS => {
                pos_seg = Some(i);
            }
            OPCODE_REPNZ | OPCODE_REPZ => pos_rep = Some(i),
            _ => {}
        }
    }

    let has_mem_operand = ins.ea[..ins.num_operands as usize]
        .iter()
        .any(|ea| ea.is_memory());

    for (i, &byte) in ins.raw_bytes().iter().take(prefix_end).enumerate() {
        match byte {
            OPCODE_ES | OPCODE_CS | OPCODE_SS | OPCODE_DS | OPCODE_FS | OPCODE_GS => {
                if pos_seg != Some(i) || !has_mem_operand {
                    let name = match byte {
                        OPCODE_ES => "ES",
                        OPCODE_CS => "CS",
                        OPCODE_SS => "SS",
                        OPCODE_DS => "DS",
                        OPCODE_FS => "FS",
                        _ => "GS",
                    };
                    res.push_str(name);
                    res.push(' ');
                }
            }
            OPCODE_OPER | OPCODE_ADDR => {}
            OPCODE_LOCK => res.push_str("LOCK "),
            OPCODE_REPNZ => res.push_str("REPNZ "),
            OPCODE_REPZ => {
                if pos_rep != Some(i) {
                    res.push_str("REPZ ");
                } else {
                    match ins.instruction.mnemonic {
                        Mnemonic::Ins
                        | Mnemonic::Insb
                        | Mnemonic::Movs
                        | Mnemonic::Movsb
                        | Mnemonic::Lods
                        | Mnemonic::Lodsb
                        | Mnemonic::Stos
                        | Mnemonic::Stosb
                        | Mnemonic::Outs
                        | Mnemonic::Outsb => res.push_str("REP "),
                        _ => res.push_str("REPZ "),
                    }
                }
            }
            _ => {}
        }
    }

    let _ = write!(res, "{}", ins.mnemonic);

    let mut mem_size = 0u8;
    match ins.instruction.mnemonic {
        Mnemonic::Ins
        | Mnemonic::Movs
        | Mnemonic::Lods
        | Mnemonic::Stos
        | Mnemonic::Scas
        | Mnemonic::Cmps
        | Mnemonic::Outs => {
            res.push(if ins.operation_size == 2 { 'W' } else { 'D' });
        }
        Mnemonic::Pusha
        | Mnemonic::Pushf
        | Mnemonic::Popa
        | Mnemonic::Popf
        | Mnemonic::Iret => {
            if ins.operand_size == 4 {
                res.push('D');
            }
        }
        Mnemonic::Mul | Mnemonic::Imul | Mnemonic::Div | Mnemonic::Idiv => {
            if ins.num_operands == 1 && ins.ea[0].is_memory() {
                mem_size = ins.operand_size;
            }
        }
        _ => {}
    }

    if ins.num_operands == 2 {
        let mut op_size = 0u8;
        for i in 0..2 {
            if ins.ea[i].is_memory() {
                mem_size = ins.operand_size;
            } else {
                op_size = match ins.ea[i] {
                    DecodedEa::Reg8(_) | DecodedEa::Imm8(_) => 1,
                    DecodedEa::Reg16(_) | DecodedEa::Sreg(_) | DecodedEa::Imm16(_) => 2,
                    _ => 4,
                };
            }
        }
        if mem_size == op_size {
            mem_size = 0;
        }
    }

    let next = addr + i64::from(ins.num_bytes);
    for i in 0..ins.num_operands as usize {
        res.push_str(if i == 0 { "\t" } else { ", " });
        res.push_str(&format_ea(ins, ins.ea[i], next, mem_size));
    }
    res
}

/// Like [`format_instruction`] but prefixed with the address and raw hex
/// bytes, as used by history dumps.
#[must_use]
pub(crate) fn format_instruction_full(ins: &DecodedInstruction, addr: Address) -> String {
    const MAX_BYTES_PER_LINE: usize = 8;
    let mut res = String::new();
    for (i, &byte) in ins.raw_bytes().iter().enumerate() {
        if i % MAX_BYTES_PER_LINE == 0 {
            if i != 0 {
                res.push('\n');
            }
            let _ = write!(res, "{:22} ", (addr + i as i64).to_string());
        }
        let _ = write!(res, "{byte:02X}");
    }
    let rem = ins.num_bytes as usize % MAX_BYTES_PER_LINE;
    if rem != 0 {
        for _ in rem..MAX_BYTES_PER_LINE {
            res.push_str("  ");
        }
    }
    res.push(' ');
    res + &format_instruction(ins, addr)
}
