//! Opcode tables for the 80386 family: the primary table plus the `0F`
//! escape table.

use super::{Instruction, Mnemonic as M, Op as O};

const fn i0(m: M) -> Instruction {
    Instruction::ins(m)
}

const fn i1(m: M, a: O) -> Instruction {
    Instruction::ins1(m, a)
}

const fn i2(m: M, a: O, b: O) -> Instruction {
    Instruction::ins2(m, a, b)
}

const fn i3(m: M, a: O, b: O, c: O) -> Instruction {
    Instruction::ins3(m, a, b, c)
}

const fn grp(t: &'static [Instruction; 8]) -> Instruction {
    Instruction::group(t)
}

const fn setcc(m: M) -> [Instruction; 8] {
    [i1(m, O::Eb); 8]
}

static GROUP_80: [Instruction; 8] = [
    i2(M::Add, O::Eb, O::Ib),
    i2(M::Or, O::Eb, O::Ib),
    i2(M::Adc, O::Eb, O::Ib),
    i2(M::Sbb, O::Eb, O::Ib),
    i2(M::And, O::Eb, O::Ib),
    i2(M::Sub, O::Eb, O::Ib),
    i2(M::Xor, O::Eb, O::Ib),
    i2(M::Cmp, O::Eb, O::Ib),
];

static GROUP_81: [Instruction; 8] = [
    i2(M::Add, O::Ev, O::Ivds),
    i2(M::Or, O::Ev, O::Ivds),
    i2(M::Adc, O::Ev, O::Ivds),
    i2(M::Sbb, O::Ev, O::Ivds),
    i2(M::And, O::Ev, O::Ivds),
    i2(M::Sub, O::Ev, O::Ivds),
    i2(M::Xor, O::Ev, O::Ivds),
    i2(M::Cmp, O::Ev, O::Ivds),
];

static GROUP_83: [Instruction; 8] = [
    i2(M::Add, O::Ev, O::Ibs),
    i2(M::Or, O::Ev, O::Ibs),
    i2(M::Adc, O::Ev, O::Ibs),
    i2(M::Sbb, O::Ev, O::Ibs),
    i2(M::And, O::Ev, O::Ibs),
    i2(M::Sub, O::Ev, O::Ibs),
    i2(M::Xor, O::Ev, O::Ibs),
    i2(M::Cmp, O::Ev, O::Ibs),
];

static GROUP_8F: [Instruction; 8] = [
    i1(M::Pop, O::Ev),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
];

static GROUP_C0: [Instruction; 8] = [
    i2(M::Rol, O::Eb, O::Ib),
    i2(M::Ror, O::Eb, O::Ib),
    i2(M::Rcl, O::Eb, O::Ib),
    i2(M::Rcr, O::Eb, O::Ib),
    i2(M::Shl, O::Eb, O::Ib),
    i2(M::Shr, O::Eb, O::Ib),
    i2(M::Sal, O::Eb, O::Ib),
    i2(M::Sar, O::Eb, O::Ib),
];

static GROUP_C1: [Instruction; 8] = [
    i2(M::Rol, O::Ev, O::Ib),
    i2(M::Ror, O::Ev, O::Ib),
    i2(M::Rcl, O::Ev, O::Ib),
    i2(M::Rcr, O::Ev, O::Ib),
    i2(M::Shl, O::Ev, O::Ib),
    i2(M::Shr, O::Ev, O::Ib),
    i2(M::Sal, O::Ev, O::Ib),
    i2(M::Sar, O::Ev, O::Ib),
];

static GROUP_C6: [Instruction; 8] = [
    i2(M::Mov, O::Eb, O::Ib),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
];

static GROUP_C7: [Instruction; 8] = [
    i2(M::Mov, O::Ev, O::Ivds),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
];

static GROUP_D0: [Instruction; 8] = [
    i2(M::Rol, O::Eb, O::C1),
    i2(M::Ror, O::Eb, O::C1),
    i2(M::Rcl, O::Eb, O::C1),
    i2(M::Rcr, O::Eb, O::C1),
    i2(M::Shl, O::Eb, O::C1),
    i2(M::Shr, O::Eb, O::C1),
    i2(M::Sal, O::Eb, O::C1),
    i2(M::Sar, O::Eb, O::C1),
];

static GROUP_D1: [Instruction; 8] = [
    i2(M::Rol, O::Ev, O::C1),
    i2(M::Ror, O::Ev, O::C1),
    i2(M::Rcl, O::Ev, O::C1),
    i2(M::Rcr, O::Ev, O::C1),
    i2(M::Shl, O::Ev, O::C1),
    i2(M::Shr, O::Ev, O::C1),
    i2(M::Sal, O::Ev, O::C1),
    i2(M::Sar, O::Ev, O::C1),
];

static GROUP_D2: [Instruction; 8] = [
    i2(M::Rol, O::Eb, O::CL),
    i2(M::Ror, O::Eb, O::CL),
    i2(M::Rcl, O::Eb, O::CL),
    i2(M::Rcr, O::Eb, O::CL),
    i2(M::Shl, O::Eb, O::CL),
    i2(M::Shr, O::Eb, O::CL),
    i2(M::Sal, O::Eb, O::CL),
    i2(M::Sar, O::Eb, O::CL),
];

static GROUP_D3: [Instruction; 8] = [
    i2(M::Rol, O::Ev, O::CL),
    i2(M::Ror, O::Ev, O::CL),
    i2(M::Rcl, O::Ev, O::CL),
    i2(M::Rcr, O::Ev, O::CL),
    i2(M::Shl, O::Ev, O::CL),
    i2(M::Shr, O::Ev, O::CL),
    i2(M::Sal, O::Ev, O::CL),
    i2(M::Sar, O::Ev, O::CL),
];

static GROUP_ESC: [Instruction; 8] = [i1(M::Esc, O::Eb); 8];

static GROUP_F6: [Instruction; 8] = [
    i2(M::Test, O::Eb, O::Ib),
    i2(M::Test, O::Eb, O::Ib),
    i1(M::Not, O::Eb),
    i1(M::Neg, O::Eb),
    i1(M::Mul, O::Eb),
    i1(M::Imul, O::Eb),
    i1(M::Div, O::Eb),
    i1(M::Idiv, O::Eb),
];

static GROUP_F7: [Instruction; 8] = [
    i2(M::Test, O::Ev, O::Ivds),
    i2(M::Test, O::Ev, O::Ivds),
    i1(M::Not, O::Ev),
    i1(M::Neg, O::Ev),
    i1(M::Mul, O::Ev),
    i1(M::Imul, O::Ev),
    i1(M::Div, O::Ev),
    i1(M::Idiv, O::Ev),
];

static GROUP_FE: [Instruction; 8] = [
    i1(M::Inc, O::Eb),
    i1(M::Dec, O::Eb),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
];

static GROUP_FF: [Instruction; 8] = [
    i1(M::Inc, O::Ev),
    i1(M::Dec, O::Ev),
    i1(M::Call, O::Ev),
    i1(M::Callf, O::Mptp),
    i1(M::Jmp, O::Ev),
    i1(M::Jmpf, O::Mptp),
    i1(M::Push, O::Ev),
    i0(M::Undef),
];

pub(crate) static INSTRUCTION_TABLE: [Instruction; 256] = [
    i2(M::Add, O::Eb, O::Gb),    // 00
    i2(M::Add, O::Ev, O::Gv),    // 01
    i2(M::Add, O::Gb, O::Eb),    // 02
    i2(M::Add, O::Gv, O::Ev),    // 03
    i2(M::Add, O::AL, O::Ib),    // 04
    i2(M::Add, O::EAX, O::Ivds), // 05
    i1(M::Push, O::ES),          // 06
    i1(M::Pop, O::ES),           // 07
    i2(M::Or, O::Eb, O::Gb),     // 08
    i2(M::Or, O::Ev, O::Gv),     // 09
    i2(M::Or, O::Gb, O::Eb),     // 0A
    i2(M::Or, O::Gv, O::Ev),     // 0B
    i2(M::Or, O::AL, O::Ib),     // 0C
    i2(M::Or, O::EAX, O::Ivds),  // 0D
    i1(M::Push, O::CS),          // 0E
    i0(M::Undef),                // 0F (escape, handled in decode)
    i2(M::Adc, O::Eb, O::Gb),    // 10
    i2(M::Adc, O::Ev, O::Gv),    // 11
    i2(M::Adc, O::Gb, O::Eb),    // 12
    i2(M::Adc, O::Gv, O::Ev),    // 13
    i2(M::Adc, O::AL, O::Ib),    // 14
    i2(M::Adc, O::EAX, O::Ivds), // 15
    i1(M::Push, O::SS),          // 16
    i1(M::Pop, O::SS),           // 17
    i2(M::Sbb, O::Eb, O::Gb),    // 18
    i2(M::Sbb, O::Ev, O::Gv),    // 19
    i2(M::Sbb, O::Gb, O::Eb),    // 1A
    i2(M::Sbb, O::Gv, O::Ev),    // 1B
    i2(M::Sbb, O::AL, O::Ib),    // 1C
    i2(M::Sbb, O::EAX, O::Ivds), // 1D
    i1(M::Push, O::DS),          // 1E
    i1(M::Pop, O::DS),           // 1F
    i2(M::And, O::Eb, O::Gb),    // 20
    i2(M::And, O::Ev, O::Gv),    // 21
    i2(M::And, O::Gb, O::Eb),    // 22
    i2(M::And, O::Gv, O::Ev),    // 23
    i2(M::And, O::AL, O::Ib),    // 24
    i2(M::And, O::EAX, O::Ivds), // 25
    i0(M::Prefix),               // 26
    i0(M::Daa),                  // 27
    i2(M::Sub, O::Eb, O::Gb),    // 28
    i2(M::Sub, O::Ev, O::Gv),    // 29
    i2(M::Sub, O::Gb, O::Eb),    // 2A
    i2(M::Sub, O::Gv, O::Ev),    // 2B
    i2(M::Sub, O::AL, O::Ib),    // 2C
    i2(M::Sub, O::EAX, O::Ivds), // 2D
    i0(M::Prefix),               // 2E
    i0(M::Das),                  // 2F
    i2(M::Xor, O::Eb, O::Gb),    // 30
    i2(M::Xor, O::Ev, O::Gv),    // 31
    i2(M::Xor, O::Gb, O::Eb),    // 32
    i2(M::Xor, O::Gv, O::Ev),    // 33
    i2(M::Xor, O::AL, O::Ib),    // 34
    i2(M::Xor, O::EAX, O::Ivds), // 35
    i0(M::Prefix),               // 36
    i0(M::Aaa),                  // 37
    i2(M::Cmp, O::Eb, O::Gb),    // 38
    i2(M::Cmp, O::Ev, O::Gv),    // 39
    i2(M::Cmp, O::Gb, O::Eb),    // 3A
    i2(M::Cmp, O::Gv, O::Ev),    // 3B
    i2(M::Cmp, O::AL, O::Ib),    // 3C
    i2(M::Cmp, O::EAX, O::Ivds), // 3D
    i0(M::Prefix),               // 3E
    i0(M::Aas),                  // 3F
    i1(M::Inc, O::EAX),          // 40
    i1(M::Inc, O::ECX),          // 41
    i1(M::Inc, O::EDX),          // 42
    i1(M::Inc, O::EBX),          // 43
    i1(M::Inc, O::ESP),          // 44
    i1(M::Inc, O::EBP),          // 45
    i1(M::Inc, O::ESI),          // 46
    i1(M::Inc, O::EDI),          // 47
    i1(M::Dec, O::EAX),          // 48
    i1(M::Dec, O::ECX),          // 49
    i1(M::Dec, O::EDX),          // 4A
    i1(M::Dec, O::EBX),          // 4B
    i1(M::Dec, O::ESP),          // 4C
    i1(M::Dec, O::EBP),          // 4D
    i1(M::Dec, O::ESI),          // 4E
    i1(M::Dec, O::EDI),          // 4F
    i1(M::Push, O::EAX),         // 50
    i1(M::Push, O::ECX),         // 51
    i1(M::Push, O::EDX),         // 52
    i1(M::Push, O::EBX),         // 53
    i1(M::Push, O::ESP),         // 54
    i1(M::Push, O::EBP),         // 55
    i1(M::Push, O::ESI),         // 56
    i1(M::Push, O::EDI),         // 57
    i1(M::Pop, O::EAX),          // 58
    i1(M::Pop, O::ECX),          // 59
    i1(M::Pop, O::EDX),          // 5A
    i1(M::Pop, O::EBX),          // 5B
    i1(M::Pop, O::ESP),          // 5C
    i1(M::Pop, O::EBP),          // 5D
    i1(M::Pop, O::ESI),          // 5E
    i1(M::Pop, O::EDI),          // 5F
    i0(M::Pusha),                // 60
    i0(M::Popa),                 // 61
    i2(M::Bound, O::Gv, O::Ma),  // 62
    i2(M::Arpl, O::Ew, O::Gw),   // 63
    i0(M::Prefix),               // 64
    i0(M::Prefix),               // 65
    i0(M::Prefix),               // 66
    i0(M::Prefix),               // 67
    i1(M::Push, O::Ivs),         // 68
    i3(M::Imul, O::Gv, O::Ev, O::Ivds), // 69
    i1(M::Push, O::Ibss),        // 6A
    i3(M::Imul, O::Gv, O::Ev, O::Ibs), // 6B
    i0(M::Insb),                 // 6C
    i0(M::Ins),                  // 6D
    i0(M::Outsb),                // 6E
    i0(M::Outs),                 // 6F
    i1(M::Jo, O::Jbs),           // 70
    i1(M::Jno, O::Jbs),          // 71
    i1(M::Jb, O::Jbs),           // 72
    i1(M::Jnb, O::Jbs),          // 73
    i1(M::Jz, O::Jbs),           // 74
    i1(M::Jnz, O::Jbs),          // 75
    i1(M::Jbe, O::Jbs),          // 76
    i1(M::Jnbe, O::Jbs),         // 77
    i1(M::Js, O::Jbs),           // 78
    i1(M::Jns, O::Jbs),          // 79
    i1(M::Jp, O::Jbs),           // 7A
    i1(M::Jnp, O::Jbs),          // 7B
    i1(M::Jl, O::Jbs),           // 7C
    i1(M::Jnl, O::Jbs),          // 7D
    i1(M::Jle, O::Jbs),          // 7E
    i1(M::Jnle, O::Jbs),         // 7F
    grp(&GROUP_80),              // 80
    grp(&GROUP_81),              // 81
    grp(&GROUP_80),              // 82 (alias of 80)
    grp(&GROUP_83),              // 83
    i2(M::Test, O::Eb, O::Gb),   // 84
    i2(M::Test, O::Ev, O::Gv),   // 85
    i2(M::Xchg, O::Gb, O::Eb),   // 86
    i2(M::Xchg, O::Gv, O::Ev),   // 87
    i2(M::Mov, O::Eb, O::Gb),    // 88
    i2(M::Mov, O::Ev, O::Gv),    // 89
    i2(M::Mov, O::Gb, O::Eb),    // 8A
    i2(M::Mov, O::Gv, O::Ev),    // 8B
    i2(M::Mov, O::MwRv, O::Sw),  // 8C
    i2(M::Lea, O::Gv, O::M),     // 8D
    i2(M::Mov, O::Sw, O::Ew),    // 8E
    grp(&GROUP_8F),              // 8F
    i0(M::Nop),                  // 90
    i2(M::Xchg, O::ECX, O::EAX), // 91
    i2(M::Xchg, O::EDX, O::EAX), // 92
    i2(M::Xchg, O::EBX, O::EAX), // 93
    i2(M::Xchg, O::ESP, O::EAX), // 94
    i2(M::Xchg, O::EBP, O::EAX), // 95
    i2(M::Xchg, O::ESI, O::EAX), // 96
    i2(M::Xchg, O::EDI, O::EAX), // 97
    i0(M::Cwde),                 // 98
    i0(M::Cdq),                  // 99
    i1(M::Callf, O::Ap),         // 9A
    i0(M::Fwait),                // 9B
    i0(M::Pushf),                // 9C
    i0(M::Popf),                 // 9D
    i0(M::Sahf),                 // 9E
    i0(M::Lahf),                 // 9F
    i2(M::Mov, O::AL, O::Ob),    // A0
    i2(M::Mov, O::EAX, O::Ov),   // A1
    i2(M::Mov, O::Ob, O::AL),    // A2
    i2(M::Mov, O::Ov, O::EAX),   // A3
    i0(M::Movsb),                // A4
    i0(M::Movs),                 // A5
    i0(M::Cmpsb),                // A6
    i0(M::Cmps),                 // A7
    i2(M::Test, O::AL, O::Ib),   // A8
    i2(M::Test, O::EAX, O::Ivds), // A9
    i0(M::Stosb),                // AA
    i0(M::Stos),                 // AB
    i0(M::Lodsb),                // AC
    i0(M::Lods),                 // AD
    i0(M::Scasb),                // AE
    i0(M::Scas),                 // AF
    i2(M::Mov, O::AL, O::Ib),    // B0
    i2(M::Mov, O::CL, O::Ib),    // B1
    i2(M::Mov, O::DL, O::Ib),    // B2
    i2(M::Mov, O::BL, O::Ib),    // B3
    i2(M::Mov, O::AH, O::Ib),    // B4
    i2(M::Mov, O::CH, O::Ib),    // B5
    i2(M::Mov, O::DH, O::Ib),    // B6
    i2(M::Mov, O::BH, O::Ib),    // B7
    i2(M::Mov, O::EAX, O::Iv),   // B8
    i2(M::Mov, O::ECX, O::Iv),   // B9
    i2(M::Mov, O::EDX, O::Iv),   // BA
    i2(M::Mov, O::EBX, O::Iv),   // BB
    i2(M::Mov, O::ESP, O::Iv),   // BC
    i2(M::Mov, O::EBP, O::Iv),   // BD
    i2(M::Mov, O::ESI, O::Iv),   // BE
    i2(M::Mov, O::EDI, O::Iv),   // BF
    grp(&GROUP_C0),              // C0
    grp(&GROUP_C1),              // C1
    i1(M::Retn, O::Iw),          // C2
    i0(M::Retn),                 // C3
    i2(M::Les, O::Gv, O::Mp),    // C4
    i2(M::Lds, O::Gv, O::Mp),    // C5
    grp(&GROUP_C6),              // C6
    grp(&GROUP_C7),              // C7
    i2(M::Enter, O::Iw, O::Ib),  // C8
    i0(M::Leave),                // C9
    i1(M::Retf, O::Iw),          // CA
    i0(M::Retf),                 // CB
    i0(M::Int3),                 // CC
    i1(M::Int, O::Ib),           // CD
    i0(M::Into),                 // CE
    i0(M::Iret),                 // CF
    grp(&GROUP_D0),              // D0
    grp(&GROUP_D1),              // D1
    grp(&GROUP_D2),              // D2
    grp(&GROUP_D3),              // D3
    i1(M::Aam, O::Ib),           // D4
    i1(M::Aad, O::Ib),           // D5
    i0(M::Salc),                 // D6
    i0(M::Xlat),                 // D7
    grp(&GROUP_ESC),             // D8
    grp(&GROUP_ESC),             // D9
    grp(&GROUP_ESC),             // DA
    grp(&GROUP_ESC),             // DB
    grp(&GROUP_ESC),             // DC
    grp(&GROUP_ESC),             // DD
    grp(&GROUP_ESC),             // DE
    grp(&GROUP_ESC),             // DF
    i1(M::Loopnz, O::Jbs),       // E0
    i1(M::Loopz, O::Jbs),        // E1
    i1(M::Loop, O::Jbs),         // E2
    i1(M::Jcxz, O::Jbs),         // E3
    i2(M::In, O::AL, O::Ib),     // E4
    i2(M::In, O::EAX, O::Ib),    // E5
    i2(M::Out, O::Ib, O::AL),    // E6
    i2(M::Out, O::Ib, O::EAX),   // E7
    i1(M::Call, O::Jvds),        // E8
    i1(M::Jmp, O::Jvds),         // E9
    i1(M::Jmpf, O::Ap),          // EA
    i1(M::Jmp, O::Jbs),          // EB
    i2(M::In, O::AL, O::DX),     // EC
    i2(M::In, O::EAX, O::DX),    // ED
    i2(M::Out, O::DX, O::AL),    // EE
    i2(M::Out, O::DX, O::EAX),   // EF
    i0(M::Prefix),               // F0
    i0(M::Int1),                 // F1
    i0(M::Prefix),               // F2
    i0(M::Prefix),               // F3
    i0(M::Hlt),                  // F4
    i0(M::Cmc),                  // F5
    grp(&GROUP_F6),              // F6
    grp(&GROUP_F7),              // F7
    i0(M::Clc),                  // F8
    i0(M::Stc),                  // F9
    i0(M::Cli),                  // FA
    i0(M::Sti),                  // FB
    i0(M::Cld),                  // FC
    i0(M::Std),                  // FD
    grp(&GROUP_FE),              // FE
    grp(&GROUP_FF),              // FF
];

pub(crate) static HAS_MODRM: [u32; 8] = [
    0x0F0F_0F0F,
    0x0F0F_0F0F,
    0x0000_0000,
    0x0000_0A0C,
    0x0000_FFFF,
    0x0000_0000,
    0xFF0F_00F3,
    0xC0C0_0000,
];

// === 0F escape table ===

static GROUP_0F_00: [Instruction; 8] = [
    i1(M::Sldt, O::MwRv),
    i1(M::Str, O::MwRv),
    i1(M::Lldt, O::Ew),
    i1(M::Ltr, O::Ew),
    i1(M::Verr, O::Ew),
    i1(M::Verw, O::Ew),
    i0(M::Undef),
    i0(M::Undef),
];

static GROUP_0F_01: [Instruction; 8] = [
    i1(M::Sgdt, O::Ms),
    i1(M::Sidt, O::Ms),
    i1(M::Lgdt, O::Ms),
    i1(M::Lidt, O::Ms),
    i1(M::Smsw, O::MwRv),
    i0(M::Undef),
    i1(M::Lmsw, O::Ew),
    i0(M::Undef),
];

static GROUP_0F_90: [Instruction; 8] = setcc(M::Seto);
static GROUP_0F_91: [Instruction; 8] = setcc(M::Setno);
static GROUP_0F_92: [Instruction; 8] = setcc(M::Setb);
static GROUP_0F_93: [Instruction; 8] = setcc(M::Setnb);
static GROUP_0F_94: [Instruction; 8] = setcc(M::Setz);
static GROUP_0F_95: [Instruction; 8] = setcc(M::Setnz);
static GROUP_0F_96: [Instruction; 8] = setcc(M::Setbe);
static GROUP_0F_97: [Instruction; 8] = setcc(M::Setnbe);
static GROUP_0F_98: [Instruction; 8] = setcc(M::Sets);
static GROUP_0F_99: [Instruction; 8] = setcc(M::Setns);
static GROUP_0F_9A: [Instruction; 8] = setcc(M::Setp);
static GROUP_0F_9B: [Instruction; 8] = setcc(M::Setnp);
static GROUP_0F_9C: [Instruction; 8] = setcc(M::Setl);
static GROUP_0F_9D: [Instruction; 8] = setcc(M::Setnl);
static GROUP_0F_9E: [Instruction; 8] = setcc(M::Setle);
static GROUP_0F_9F: [Instruction; 8] = setcc(M::Setnle);

static GROUP_0F_BA: [Instruction; 8] = [
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i0(M::Undef),
    i2(M::Bt, O::Ev, O::Ib),
    i2(M::Bts, O::Ev, O::Ib),
    i2(M::Btr, O::Ev, O::Ib),
    i2(M::Btc, O::Ev, O::Ib),
];

pub(crate) static INSTRUCTION_TABLE_0F: [Instruction; 256] = {
    let mut t = [i0(M::Undef); 256];
    t[0x00] = grp(&GROUP_0F_00);
    t[0x01] = grp(&GROUP_0F_01);
    t[0x02] = i2(M::Lar, O::Gv, O::Mw);
    t[0x03] = i2(M::Lsl, O::Gv, O::Mw);
    t[0x05] = i0(M::Loadall);
    t[0x06] = i0(M::Clts);
    t[0x07] = i0(M::Loadall);
    t[0x0B] = i0(M::Ud2);
    t[0x20] = i2(M::Mov, O::Rd, O::Cd);
    t[0x21] = i2(M::Mov, O::Rd, O::Dd);
    t[0x22] = i2(M::Mov, O::Cd, O::Rd);
    t[0x23] = i2(M::Mov, O::Dd, O::Rd);
    t[0x24] = i2(M::Mov, O::Rd, O::Td);
    t[0x26] = i2(M::Mov, O::Td, O::Rd);
    t[0x80] = i1(M::Jo, O::Jvds);
    t[0x81] = i1(M::Jno, O::Jvds);
    t[0x82] = i1(M::Jb, O::Jvds);
    t[0x83] = i1(M::Jnb, O::Jvds);
    t[0x84] = i1(M::Jz, O::Jvds);
    t[0x85] = i1(M::Jnz, O::Jvds);
    t[0x86] = i1(M::Jbe, O::Jvds);
    t[0x87] = i1(M::Jnbe, O::Jvds);
    t[0x88] = i1(M::Js, O::Jvds);
    t[0x89] = i1(M::Jns, O::Jvds);
    t[0x8A] = i1(M::Jp, O::Jvds);
    t[0x8B] = i1(M::Jnp, O::Jvds);
    t[0x8C] = i1(M::Jl, O::Jvds);
    t[0x8D] = i1(M::Jnl, O::Jvds);
    t[0x8E] = i1(M::Jle, O::Jvds);
    t[0x8F] = i1(M::Jnle, O::Jvds);
    t[0x90] = grp(&GROUP_0F_90);
    t[0x91] = grp(&GROUP_0F_91);
    t[0x92] = grp(&GROUP_0F_92);
    t[0x93] = grp(&GROUP_0F_93);
    t[0x94] = grp(&GROUP_0F_94);
    t[0x95] = grp(&GROUP_0F_95);
    t[0x96] = grp(&GROUP_0F_96);
    t[0x97] = grp(&GROUP_0F_97);
    t[0x98] = grp(&GROUP_0F_98);
    t[0x99] = grp(&GROUP_0F_99);
    t[0x9A] = grp(&GROUP_0F_9A);
    t[0x9B] = grp(&GROUP_0F_9B);
    t[0x9C] = grp(&GROUP_0F_9C);
    t[0x9D] = grp(&GROUP_0F_9D);
    t[0x9E] = grp(&GROUP_0F_9E);
    t[0x9F] = grp(&GROUP_0F_9F);
    t[0xA0] = i1(M::Push, O::FS);
    t[0xA1] = i1(M::Pop, O::FS);
    t[0xA3] = i2(M::Bt, O::Ev, O::Gv);
    t[0xA4] = i3(M::Shld, O::Ev, O::Gv, O::Ib);
    t[0xA5] = i3(M::Shld, O::Ev, O::Gv, O::CL);
    t[0xA8] = i1(M::Push, O::GS);
    t[0xA9] = i1(M::Pop, O::GS);
    t[0xAA] = i0(M::Rsm);
    t[0xAB] = i2(M::Bts, O::Ev, O::Gv);
    t[0xAC] = i3(M::Shrd, O::Ev, O::Gv, O::Ib);
    t[0xAD] = i3(M::Shrd, O::Ev, O::Gv, O::CL);
    t[0xAF] = i2(M::Imul, O::Gv, O::Ev);
    t[0xB2] = i2(M::Lss, O::Gv, O::Mptp);
    t[0xB3] = i2(M::Btr, O::Ev, O::Gv);
    t[0xB4] = i2(M::Lfs, O::Gv, O::Mptp);
    t[0xB5] = i2(M::Lgs, O::Gv, O::Mptp);
    t[0xB6] = i2(M::Movzx, O::Gv, O::Eb);
    t[0xB7] = i2(M::Movzx, O::Gv, O::Ew);
    t[0xB9] = i2(M::Ud1, O::G, O::E);
    t[0xBA] = grp(&GROUP_0F_BA);
    t[0xBB] = i2(M::Btc, O::Ev, O::Gv);
    t[0xBC] = i2(M::Bsf, O::Gv, O::Ev);
    t[0xBD] = i2(M::Bsr, O::Gv, O::Ev);
    t[0xBE] = i2(M::Movsx, O::Gv, O::Eb);
    t[0xBF] = i2(M::Movsx, O::Gv, O::Ew);
    t
};

pub(crate) static HAS_MODRM_0F: [u32; 8] = [
    0x0000_000F,
    0x0000_005F,
    0x0000_0000,
    0x0000_0000,
    0xFFFF_0000,
    0xFEFC_B838,
    0x0000_0000,
    0x0000_0000,
];
