//! Decoder tests: prefixes, modrm/SIB forms, operand sizing, and the
//! 15-byte limit.

use cpu_x86::{decode, CpuError, CpuInfo, CpuModel, DecodedEa, Mnemonic, SReg};

fn decode_bytes(model: CpuModel, default_size: u8, bytes: &[u8]) -> cpu_x86::DecodedInstruction {
    try_decode(model, default_size, bytes).expect("decodes")
}

fn try_decode(
    model: CpuModel,
    default_size: u8,
    bytes: &[u8],
) -> Result<cpu_x86::DecodedInstruction, CpuError> {
    let mut iter = bytes.iter().copied().chain(std::iter::repeat(0x90));
    decode(
        CpuInfo {
            model,
            default_operand_size: default_size,
        },
        move || Ok(iter.next().expect("infinite stream")),
    )
}

#[test]
fn plain_alu_with_modrm_register_form() {
    // ADD AL, BL
    let ins = decode_bytes(CpuModel::I8086, 2, &[0x00, 0xD8]);
    assert_eq!(ins.mnemonic, Mnemonic::Add);
    assert_eq!(ins.num_bytes, 2);
    assert_eq!(ins.operation_size, 1);
    assert_eq!(ins.ea[0], DecodedEa::Reg8(0));
    assert_eq!(ins.ea[1], DecodedEa::Reg8(3));
}

#[test]
fn rm16_disp_forms() {
    // MOV AX, [BX+SI]
    let ins = decode_bytes(CpuModel::I8086, 2, &[0x8B, 0x00]);
    assert_eq!(ins.ea[1], DecodedEa::Rm16 { rm: 0x00, disp: 0 });

    // MOV AX, [BP-2] (mod=01, disp8)
    let ins = decode_bytes(CpuModel::I8086, 2, &[0x8B, 0x46, 0xFE]);
    assert_eq!(ins.ea[1], DecodedEa::Rm16 { rm: 0x46, disp: 0xFE });
    assert_eq!(ins.num_bytes, 3);

    // MOV AX, [0x1234] (mod=00, rm=110 means disp16)
    let ins = decode_bytes(CpuModel::I8086, 2, &[0x8B, 0x06, 0x34, 0x12]);
    assert_eq!(ins.ea[1], DecodedEa::Rm16 { rm: 0x06, disp: 0x1234 });
}

#[test]
fn prefixes_later_segment_override_wins() {
    // ES: then DS: MOV AL, [BX]
    let ins = decode_bytes(CpuModel::I8086, 2, &[0x26, 0x3E, 0x8A, 0x07]);
    assert_eq!(ins.prefixes.seg_override(), Some(SReg::Ds));
    assert_eq!(ins.num_bytes, 4);
}

#[test]
fn operand_size_prefix_toggles_between_16_and_32() {
    // 66 B8 imm32 with a 16-bit default
    let ins = decode_bytes(
        CpuModel::I80386,
        2,
        &[0x66, 0xB8, 0x78, 0x56, 0x34, 0x12],
    );
    assert_eq!(ins.mnemonic, Mnemonic::Mov);
    assert_eq!(ins.operand_size, 4);
    assert_eq!(ins.ea[0], DecodedEa::Reg32(0));
    assert_eq!(ins.ea[1], DecodedEa::Imm32(0x1234_5678));

    // Same bytes with a 32-bit default: back to 16
    let ins = decode_bytes(CpuModel::I80386, 4, &[0x66, 0xB8, 0x34, 0x12]);
    assert_eq!(ins.operand_size, 2);
    assert_eq!(ins.ea[1], DecodedEa::Imm16(0x1234));
}

#[test]
fn sib_with_displacement() {
    // MOV EAX, [EBX+ECX*4+0x10] : 8B 44 8B 10
    let ins = decode_bytes(CpuModel::I80386, 4, &[0x8B, 0x44, 0x8B, 0x10]);
    assert_eq!(
        ins.ea[1],
        DecodedEa::Rm32 {
            rm: 0x44,
            sib: 0x8B,
            disp: 0x10
        }
    );

    // SIB base=BP with mod=00 is disp32: 8B 04 8D 78 56 34 12
    let ins = decode_bytes(CpuModel::I80386, 4, &[0x8B, 0x04, 0x8D, 0x78, 0x56, 0x34, 0x12]);
    assert_eq!(
        ins.ea[1],
        DecodedEa::Rm32 {
            rm: 0x04,
            sib: 0x8D,
            disp: 0x1234_5678
        }
    );
}

#[test]
fn group_opcodes_dispatch_on_modrm_reg() {
    // F6 /6 is DIV r/m8
    let ins = decode_bytes(CpuModel::I8086, 2, &[0xF6, 0xF3]);
    assert_eq!(ins.mnemonic, Mnemonic::Div);
    // F7 /3 is NEG r/m16
    let ins = decode_bytes(CpuModel::I8086, 2, &[0xF7, 0xDB]);
    assert_eq!(ins.mnemonic, Mnemonic::Neg);
    // C0 /4 is SHL r/m8, imm8 on the 386
    let ins = decode_bytes(CpuModel::I80386, 2, &[0xC0, 0xE0, 0x03]);
    assert_eq!(ins.mnemonic, Mnemonic::Shl);
    assert_eq!(ins.ea[1], DecodedEa::Imm8(3));
}

#[test]
fn escape_table_on_the_386() {
    // 0F AF is IMUL Gv, Ev
    let ins = decode_bytes(CpuModel::I80386Sx, 2, &[0x0F, 0xAF, 0xC1]);
    assert_eq!(ins.mnemonic, Mnemonic::Imul);
    assert_eq!(ins.opcode, 0x0FAF);
    assert_eq!(ins.ea[0], DecodedEa::Reg16(0));
    assert_eq!(ins.ea[1], DecodedEa::Reg16(1));

    // On the 8086, 0F is POP CS
    let ins = decode_bytes(CpuModel::I8086, 2, &[0x0F]);
    assert_eq!(ins.mnemonic, Mnemonic::Pop);
}

#[test]
fn far_pointer_operand() {
    // JMP FAR 1234:5678
    let ins = decode_bytes(CpuModel::I8086, 2, &[0xEA, 0x78, 0x56, 0x34, 0x12]);
    assert_eq!(ins.mnemonic, Mnemonic::Jmpf);
    assert_eq!(ins.ea[0], DecodedEa::Abs16_16(0x1234_5678));
    assert_eq!(ins.num_bytes, 5);
}

#[test]
fn byte_string_forms_force_operation_size_one() {
    let ins = decode_bytes(CpuModel::I8086, 2, &[0xA4]); // MOVSB
    assert_eq!(ins.operation_size, 1);
    let ins = decode_bytes(CpuModel::I8086, 2, &[0xA5]); // MOVSW
    assert_eq!(ins.operation_size, 2);
}

#[test]
fn mov_sreg_forms() {
    // MOV ES, AX
    let ins = decode_bytes(CpuModel::I8086, 2, &[0x8E, 0xC0]);
    assert_eq!(ins.mnemonic, Mnemonic::Mov);
    assert_eq!(ins.ea[0], DecodedEa::Sreg(0));
    assert_eq!(ins.operation_size, 2);

    // On the 8086 the segment field is only two bits: "FS" decodes as ES
    let ins = decode_bytes(CpuModel::I8086, 2, &[0x8E, 0xE0]);
    assert_eq!(ins.ea[0], DecodedEa::Sreg(0));
    let ins = decode_bytes(CpuModel::I80386, 2, &[0x8E, 0xE0]);
    assert_eq!(ins.ea[0], DecodedEa::Sreg(4));
}

#[test]
fn sign_extended_immediates() {
    // 83 /0 is ADD Ev, Ibs: 0xFF sign-extends to -1
    let ins = decode_bytes(CpuModel::I8086, 2, &[0x83, 0xC0, 0xFF]);
    assert_eq!(ins.mnemonic, Mnemonic::Add);
    assert_eq!(ins.ea[1], DecodedEa::Imm8(0xFF));
    // 6A (PUSH Ibss) stores the sign-extended value
    let ins = decode_bytes(CpuModel::I80386, 2, &[0x6A, 0x80]);
    assert_eq!(ins.ea[0], DecodedEa::Imm8(0xFFFF_FFFF_FFFF_FF80));
}

#[test]
fn undefined_opcodes_fail_with_invalid_opcode() {
    let err = try_decode(CpuModel::I80386, 2, &[0x0F, 0xFF]).expect_err("undefined");
    assert!(matches!(
        err,
        CpuError::Exception(e) if e.number == cpu_x86::Exception::InvalidOpcode
    ));
}

#[test]
fn more_than_15_bytes_fails_with_invalid_opcode() {
    // Endless operand-size prefixes never reach an opcode
    let bytes = [0x66u8; 20];
    let err = try_decode(CpuModel::I80386, 2, &bytes).expect_err("too long");
    assert!(matches!(
        err,
        CpuError::Exception(e) if e.number == cpu_x86::Exception::InvalidOpcode
    ));
}

#[test]
fn rep_prefix_and_port_forms() {
    // REP STOSW
    let ins = decode_bytes(CpuModel::I8086, 2, &[0xF3, 0xAB]);
    assert_eq!(ins.mnemonic, Mnemonic::Stos);
    assert!(ins.prefixes.has_rep() && ins.prefixes.has_repz());

    // OUT DX, AX
    let ins = decode_bytes(CpuModel::I8086, 2, &[0xEF]);
    assert_eq!(ins.mnemonic, Mnemonic::Out);
    assert_eq!(ins.ea[0], DecodedEa::Reg16(2));

    // IN AL, imm8
    let ins = decode_bytes(CpuModel::I8086, 2, &[0xE4, 0x60]);
    assert_eq!(ins.mnemonic, Mnemonic::In);
    assert_eq!(ins.ea[1], DecodedEa::Imm8(0x60));
}

#[test]
fn three_operand_imul() {
    // IMUL AX, CX, 0x10
    let ins = decode_bytes(CpuModel::I80386, 2, &[0x6B, 0xC1, 0x10]);
    assert_eq!(ins.mnemonic, Mnemonic::Imul);
    assert_eq!(ins.num_operands, 3);
    assert_eq!(ins.ea[0], DecodedEa::Reg16(0));
    assert_eq!(ins.ea[1], DecodedEa::Reg16(1));
    assert_eq!(ins.ea[2], DecodedEa::Imm8(0x10));
}
