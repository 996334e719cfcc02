//! Opcode table for the 8088/8086 family.
//!
//! Quirks preserved from the real silicon: `0F` is POP CS, `60`..`6F`
//! alias the conditional-jump row, `C0`/`C1` alias RETN and `C8`/`C9`
//! alias RETF, group 2 reg=6 is the undocumented SETMO, `D6` is SALC and
//! `F1` is simply undefined.

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

const fn grp(t: &'static [Instruction; 8]) -> Instruction {
    Instruction::group(t)
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

static GROUP_C6: [Instruction; 8] = [i2(M::Mov, O::Eb, O::Ib); 8];
static GROUP_C7: [Instruction; 8] = [i2(M::Mov, O::Ev, O::Ivds); 8];

static GROUP_D0: [Instruction; 8] = [
    i2(M::Rol, O::Eb, O::C1),
    i2(M::Ror, O::Eb, O::C1),
    i2(M::Rcl, O::Eb, O::C1),
    i2(M::Rcr, O::Eb, O::C1),
    i2(M::Shl, O::Eb, O::C1),
    i2(M::Shr, O::Eb, O::C1),
    i2(M::Setmo, O::Eb, O::C1),
    i2(M::Sar, O::Eb, O::C1),
];

static GROUP_D1: [Instruction; 8] = [
    i2(M::Rol, O::Ev, O::C1),
    i2(M::Ror, O::Ev, O::C1),
    i2(M::Rcl, O::Ev, O::C1),
    i2(M::Rcr, O::Ev, O::C1),
    i2(M::Shl, O::Ev, O::C1),
    i2(M::Shr, O::Ev, O::C1),
    i2(M::Setmo, O::Ev, O::C1),
    i2(M::Sar, O::Ev, O::C1),
];

static GROUP_D2: [Instruction; 8] = [
    i2(M::Rol, O::Eb, O::CL),
    i2(M::Ror, O::Eb, O::CL),
    i2(M::Rcl, O::Eb, O::CL),
    i2(M::Rcr, O::Eb, O::CL),
    i2(M::Shl, O::Eb, O::CL),
    i2(M::Shr, O::Eb, O::CL),
    i2(M::Setmo, O::Eb, O::CL),
    i2(M::Sar, O::Eb, O::CL),
];

static GROUP_D3: [Instruction; 8] = [
    i2(M::Rol, O::Ev, O::CL),
    i2(M::Ror, O::Ev, O::CL),
    i2(M::Rcl, O::Ev, O::CL),
    i2(M::Rcr, O::Ev, O::CL),
    i2(M::Shl, O::Ev, O::CL),
    i2(M::Shr, O::Ev, O::CL),
    i2(M::Setmo, O::Ev, O::CL),
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
    i1(M::Push, O::Ev),
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
    i1(M::Pop, O::CS),           // 0F
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
    i1(M::Jo, O::Jbs),           // 60 (alias of 70)
    i1(M::Jno, O::Jbs),          // 61
    i1(M::Jb, O::Jbs),           // 62
    i1(M::Jnb, O::Jbs),          // 63
    i1(M::Jz, O::Jbs),           // 64
    i1(M::Jnz, O::Jbs),          // 65
    i1(M::Jbe, O::Jbs),          // 66
    i1(M::Jnbe, O::Jbs),         // 67
    i1(M::Js, O::Jbs),           // 68
    i1(M::Jns, O::Jbs),          // 69
    i1(M::Jp, O::Jbs),           // 6A
    i1(M::Jnp, O::Jbs),          // 6B
    i1(M::Jl, O::Jbs),           // 6C
    i1(M::Jnl, O::Jbs),          // 6D
    i1(M::Jle, O::Jbs),          // 6E
    i1(M::Jnle, O::Jbs),         // 6F
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
    i2(M::Mov, O::Ew, O::Sw),    // 8C
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
    i0(M::Cbw),                  // 98
    i0(M::Cwd),                  // 99
    i1(M::Callf, O::Ap),         // 9A
    i0(M::Undef),                // 9B
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
    i1(M::Retn, O::Iw),          // C0 (alias of C2)
    i0(M::Retn),                 // C1 (alias of C3)
    i1(M::Retn, O::Iw),          // C2
    i0(M::Retn),                 // C3
    i2(M::Les, O::Gv, O::Mp),    // C4
    i2(M::Lds, O::Gv, O::Mp),    // C5
    grp(&GROUP_C6),              // C6
    grp(&GROUP_C7),              // C7
    i1(M::Retf, O::Iw),          // C8 (alias of CA)
    i0(M::Retf),                 // C9 (alias of CB)
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
    i0(M::Lock),                 // F0
    i0(M::Undef),                // F1
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
    0x0000_0000,
    0x0000_FFFF,
    0x0000_0000,
    0xFF0F_00F0,
    0xC0C0_0000,
];
