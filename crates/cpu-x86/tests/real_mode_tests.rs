//! Real-mode execution tests: ALU and flag behaviour, interrupts through
//! the IVT, stack round-trips, string operations, and the A20 alias.

use std::cell::RefCell;
use std::rc::Rc;

use cpu_x86::{Cpu, CpuError, CpuModel, InterruptOrigin, SReg, CF, DF, IF, OF, SF, TF, ZF};
use emu_core::{MemoryHandler, Ram, SystemBus};

const REG_AX: usize = 0;
const REG_CX: usize = 1;
const REG_BX: usize = 3;
const REG_SP: usize = 4;
const REG_SI: usize = 6;
const REG_DI: usize = 7;

fn machine(model: CpuModel) -> (Cpu, SystemBus, Rc<RefCell<Ram>>) {
    let mut bus = SystemBus::new();
    let ram = Rc::new(RefCell::new(Ram::new(0x10_0000)));
    bus.add_mem_handler(
        0,
        0x10_0000,
        Rc::clone(&ram) as Rc<RefCell<dyn MemoryHandler>>,
        false,
    );
    let mut cpu = Cpu::new(model);
    // Quiet the default exception trace in tests that fault on purpose
    cpu.set_exception_trace_mask(0);
    (cpu, bus, ram)
}

fn load(ram: &Rc<RefCell<Ram>>, phys: usize, bytes: &[u8]) {
    ram.borrow_mut().data_mut()[phys..phys + bytes.len()].copy_from_slice(bytes);
}

/// Point CS:IP at `cs:ip` with the code bytes already in memory.
fn enter(cpu: &mut Cpu, bus: &mut SystemBus, cs: u16, ip: u64) {
    cpu.load_sreg(bus, SReg::Cs, cs).expect("real-mode CS load");
    cpu.set_ip(ip);
}

fn setup_stack(cpu: &mut Cpu, bus: &mut SystemBus, ss: u16, sp: u64) {
    cpu.load_sreg(bus, SReg::Ss, ss).expect("real-mode SS load");
    cpu.state.regs[REG_SP] = sp;
}

#[test]
fn div_r8_quotient_and_remainder() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x500, &[0xF6, 0xF3]); // DIV BL
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    cpu.state.regs[REG_AX] = 0x0100;
    cpu.state.regs[REG_BX] = 0x03;

    cpu.step(&mut bus).expect("step");

    assert_eq!(cpu.state.regs[REG_AX] & 0xFF, 0x55);
    assert_eq!((cpu.state.regs[REG_AX] >> 8) & 0xFF, 0x01);
    assert!(cpu.last_exception().is_none());
}

#[test]
fn imul_r16_rm16_clears_overflow_and_carry() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x500, &[0x0F, 0xAF, 0xC1]); // IMUL AX, CX
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    cpu.state.regs[REG_AX] = 0x1234;
    cpu.state.regs[REG_CX] = 0x0002;

    cpu.step(&mut bus).expect("step");

    assert_eq!(cpu.state.regs[REG_AX] & 0xFFFF, 0x2468);
    assert_eq!(cpu.state.flags & (OF | CF), 0);
}

#[test]
fn int_21h_pushes_flags_cs_ip_and_clears_if_tf() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    // IVT entry 0x21 -> 0x0040:0x1234
    load(&ram, 0x21 * 4, &[0x34, 0x12, 0x40, 0x00]);
    load(&ram, 0x1000 * 16 + 0x0200, &[0xCD, 0x21]); // INT 21h
    enter(&mut cpu, &mut bus, 0x1000, 0x0200);
    setup_stack(&mut cpu, &mut bus, 0x0000, 0x2000);
    cpu.state.flags |= IF | TF;
    let old_flags = cpu.state.flags;

    cpu.step(&mut bus).expect("step");

    assert_eq!(cpu.state.sregs[SReg::Cs.index()], 0x0040);
    assert_eq!(cpu.state.ip, 0x1234);
    assert_eq!(cpu.state.flags & IF, 0);
    // Stack: FLAGS, CS, IP at decreasing addresses
    assert_eq!(cpu.state.regs[REG_SP], 0x1FFA);
    let mem = ram.borrow();
    let word = |addr: usize| {
        u16::from(mem.data()[addr]) | u16::from(mem.data()[addr + 1]) << 8
    };
    assert_eq!(word(0x1FFE), (old_flags & 0xFFFF) as u16);
    assert_eq!(word(0x1FFC), 0x1000);
    assert_eq!(word(0x1FFA), 0x0202);
    assert_eq!(
        cpu.last_exception().map(|e| (e.vector, e.origin)),
        Some((0x21, InterruptOrigin::Software))
    );
}

#[test]
fn iret_returns_from_the_handler() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x21 * 4, &[0x00, 0x00, 0x40, 0x00]); // 0040:0000
    load(&ram, 0x1000 * 16 + 0x0200, &[0xCD, 0x21]);
    load(&ram, 0x0040 * 16, &[0xCF]); // IRET
    enter(&mut cpu, &mut bus, 0x1000, 0x0200);
    setup_stack(&mut cpu, &mut bus, 0x0000, 0x2000);
    cpu.state.flags |= IF;

    cpu.step(&mut bus).expect("INT");
    cpu.step(&mut bus).expect("IRET");

    assert_eq!(cpu.state.sregs[SReg::Cs.index()], 0x1000);
    assert_eq!(cpu.state.ip, 0x0202);
    assert_eq!(cpu.state.regs[REG_SP], 0x2000);
    assert_ne!(cpu.state.flags & IF, 0);
}

#[test]
fn pushf_popf_round_trips_user_flags() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x500, &[0x9C, 0x9D]); // PUSHF; POPF
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    setup_stack(&mut cpu, &mut bus, 0x0000, 0x2000);
    cpu.state.flags |= CF | ZF | SF | OF | DF | IF;
    let before = cpu.state.flags;

    cpu.step(&mut bus).expect("PUSHF");
    cpu.step(&mut bus).expect("POPF");

    assert_eq!(cpu.state.flags & 0xFFFF, before & 0xFFFF);
    assert_eq!(cpu.state.regs[REG_SP], 0x2000);
}

#[test]
fn pusha_popa_round_trips_the_register_bank() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x500, &[0x60, 0x61]); // PUSHA; POPA
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    setup_stack(&mut cpu, &mut bus, 0x0000, 0x2000);
    let values: [u64; 8] = [0x1111, 0x2222, 0x3333, 0x4444, 0x2000, 0x5555, 0x6666, 0x7777];
    cpu.state.regs = values;

    cpu.step(&mut bus).expect("PUSHA");
    assert_eq!(cpu.state.regs[REG_SP], 0x2000 - 16);
    cpu.step(&mut bus).expect("POPA");

    for (i, &v) in values.iter().enumerate() {
        assert_eq!(cpu.state.regs[i] & 0xFFFF, v, "register {i}");
    }
}

#[test]
fn far_call_and_far_return_restore_cs_ip_sp() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    // 0100:0010 CALL FAR 0200:0005
    load(&ram, 0x100 * 16 + 0x10, &[0x9A, 0x05, 0x00, 0x00, 0x02]);
    load(&ram, 0x200 * 16 + 0x05, &[0xCB]); // RETF
    enter(&mut cpu, &mut bus, 0x0100, 0x0010);
    setup_stack(&mut cpu, &mut bus, 0x0000, 0x2000);

    cpu.step(&mut bus).expect("CALLF");
    assert_eq!(cpu.state.sregs[SReg::Cs.index()], 0x0200);
    assert_eq!(cpu.state.ip, 0x0005);
    assert_eq!(cpu.state.regs[REG_SP], 0x1FFC);

    cpu.step(&mut bus).expect("RETF");
    assert_eq!(cpu.state.sregs[SReg::Cs.index()], 0x0100);
    assert_eq!(cpu.state.ip, 0x0015);
    assert_eq!(cpu.state.regs[REG_SP], 0x2000);
}

#[test]
fn rep_movsb_copies_and_advances() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x500, &[0xF3, 0xA4]); // REP MOVSB
    load(&ram, 0x3000, b"HELLO");
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    cpu.load_sreg(&mut bus, SReg::Ds, 0x0300).expect("DS");
    cpu.load_sreg(&mut bus, SReg::Es, 0x0400).expect("ES");
    cpu.state.regs[REG_SI] = 0x0000;
    cpu.state.regs[REG_DI] = 0x0000;
    cpu.state.regs[REG_CX] = 5;
    cpu.state.flags &= !DF;

    cpu.step(&mut bus).expect("REP MOVSB");

    assert_eq!(&ram.borrow().data()[0x4000..0x4005], b"HELLO");
    assert_eq!(cpu.state.regs[REG_CX] & 0xFFFF, 0);
    assert_eq!(cpu.state.regs[REG_SI] & 0xFFFF, 5);
    assert_eq!(cpu.state.regs[REG_DI] & 0xFFFF, 5);
}

#[test]
fn repz_cmpsb_stops_at_the_first_difference() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x500, &[0xF3, 0xA6]); // REPZ CMPSB
    load(&ram, 0x3000, b"ABCX");
    load(&ram, 0x4000, b"ABCY");
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    cpu.load_sreg(&mut bus, SReg::Ds, 0x0300).expect("DS");
    cpu.load_sreg(&mut bus, SReg::Es, 0x0400).expect("ES");
    cpu.state.regs[REG_CX] = 8;
    cpu.state.flags &= !DF;

    cpu.step(&mut bus).expect("REPZ CMPSB");

    // Three matches then the mismatch: 4 iterations consumed
    assert_eq!(cpu.state.regs[REG_CX] & 0xFFFF, 4);
    assert_eq!(cpu.state.flags & ZF, 0);
}

#[test]
fn hlt_with_interrupts_disabled_is_the_end_of_the_road() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x500, &[0xF4]); // HLT
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    cpu.state.flags &= !IF;

    assert_eq!(cpu.step(&mut bus), Err(CpuError::Halted));
}

#[test]
fn hlt_waits_for_an_external_interrupt() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x08 * 4, &[0x00, 0x01, 0x40, 0x00]); // IVT 8 -> 0040:0100
    load(&ram, 0x500, &[0xF4, 0x90]); // HLT; NOP
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    setup_stack(&mut cpu, &mut bus, 0x0000, 0x2000);
    cpu.state.flags |= IF;

    // Nothing pending while HLT executes; the IRQ arrives afterwards
    let calls = Rc::new(RefCell::new(0u32));
    let calls_hook = Rc::clone(&calls);
    cpu.set_interrupt_function(move || {
        *calls_hook.borrow_mut() += 1;
        if *calls_hook.borrow() == 2 { Some(8) } else { None }
    });

    cpu.step(&mut bus).expect("HLT");
    assert!(cpu.halted());
    cpu.step(&mut bus).expect("IRQ delivery");
    assert!(!cpu.halted());
    assert_eq!(cpu.state.sregs[SReg::Cs.index()], 0x0040);
    assert_eq!(cpu.state.ip, 0x0100);
    assert_eq!(
        cpu.last_exception().map(|e| e.origin),
        Some(InterruptOrigin::Hardware)
    );
}

#[test]
fn sti_shadows_the_next_instruction() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x08 * 4, &[0x00, 0x01, 0x40, 0x00]);
    load(&ram, 0x500, &[0xFB, 0x90, 0x90]); // STI; NOP; NOP
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    setup_stack(&mut cpu, &mut bus, 0x0000, 0x2000);
    cpu.state.flags &= !IF;
    cpu.set_interrupt_function(|| Some(8));

    cpu.step(&mut bus).expect("STI");
    // The interrupt window opens only after one more instruction
    cpu.step(&mut bus).expect("shadowed NOP");
    assert_eq!(cpu.state.ip, 0x0002);
    cpu.step(&mut bus).expect("delivery");
    assert_eq!(cpu.state.sregs[SReg::Cs.index()], 0x0040);
}

#[test]
fn inc_preserves_the_carry_flag() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x500, &[0xF9, 0x40]); // STC; INC AX
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    cpu.state.regs[REG_AX] = 0xFFFF;

    cpu.step(&mut bus).expect("STC");
    cpu.step(&mut bus).expect("INC");

    assert_eq!(cpu.state.regs[REG_AX] & 0xFFFF, 0);
    assert_ne!(cpu.state.flags & CF, 0);
    assert_ne!(cpu.state.flags & ZF, 0);
}

#[test]
fn reserved_flag_bits_stay_pinned() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x500, &[0x04, 0x01, 0x9D]); // ADD AL, 1 (and later POPF)
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    setup_stack(&mut cpu, &mut bus, 0x0000, 0x2000);
    // Seed a stack image with all flag bits set for the POPF
    load(&ram, 0x1FFE, &[0xFF, 0xFF]);
    cpu.state.regs[REG_SP] = 0x1FFE;

    cpu.step(&mut bus).expect("ADD");
    assert_ne!(cpu.state.flags & 0x2, 0, "bit 1 reads as one");
    assert_eq!(cpu.state.flags & 0x28, 0, "bits 3 and 5 read as zero");

    cpu.step(&mut bus).expect("POPF");
    assert_ne!(cpu.state.flags & 0x2, 0);
    assert_eq!(cpu.state.flags & (0x28 | 0x8000), 0, "bits 3/5/15 clear");
}

#[test]
fn identical_runs_are_deterministic() {
    let run = || {
        let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
        load(
            &ram,
            0x500,
            &[
                0xB8, 0x34, 0x12, // MOV AX, 0x1234
                0x05, 0xCD, 0xAB, // ADD AX, 0xABCD
                0xF7, 0xE0, // MUL AX
                0x50, // PUSH AX
                0x58, // POP AX
            ],
        );
        enter(&mut cpu, &mut bus, 0x0050, 0x0000);
        setup_stack(&mut cpu, &mut bus, 0x0000, 0x2000);
        for _ in 0..5 {
            cpu.step(&mut bus).expect("step");
        }
        let ram_sum: u64 = ram.borrow().data().iter().map(|&b| u64::from(b)).sum();
        (cpu.state.regs, cpu.state.flags, cpu.state.ip, ram_sum)
    };

    assert_eq!(run(), run());
}

#[test]
fn a20_gated_wraps_the_high_megabyte() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    ram.borrow_mut().data_mut()[0x0010] = 0x77;
    // MOV AL, [0x0010] with DS=0xFFFF: linear 0x100000, masked to 0x0
    load(&ram, 0x500, &[0xA0, 0x10, 0x00, 0xA0, 0x10, 0x00]);
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    cpu.load_sreg(&mut bus, SReg::Ds, 0xFFFF).expect("DS");

    cpu.step(&mut bus).expect("gated read");
    assert_eq!(cpu.state.regs[REG_AX] & 0xFF, 0x77);

    // Ungate A20: 0x100000 no longer aliases into the first megabyte
    bus.set_address_mask(u64::MAX);
    cpu.step(&mut bus).expect("ungated read");
    assert_ne!(cpu.state.regs[REG_AX] & 0xFF, 0x77);
}

#[test]
fn ip_stays_within_its_mask_after_every_step() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I8086);
    // JMP -3 at the very top of the segment wraps IP
    load(&ram, 0xFFFE, &[0x90, 0x90]);
    enter(&mut cpu, &mut bus, 0x0000, 0xFFFE);
    for _ in 0..3 {
        cpu.step(&mut bus).expect("step");
        assert!(cpu.state.ip <= 0xFFFF);
    }
}

#[test]
fn xlat_honours_a_segment_override() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x500, &[0x26, 0xD7]); // ES: XLAT
    load(&ram, 0x4005, &[0xAA]);
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    cpu.load_sreg(&mut bus, SReg::Es, 0x0400).expect("ES");
    cpu.state.regs[REG_BX] = 0x0000;
    cpu.state.regs[REG_AX] = 0x0005;

    cpu.step(&mut bus).expect("XLAT");
    assert_eq!(cpu.state.regs[REG_AX] & 0xFF, 0xAA);
}

#[test]
fn loop_decrements_cx_and_branches() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x500, &[0x40, 0xE2, 0xFD]); // inc ax; loop -3
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    cpu.state.regs[REG_CX] = 3;

    for _ in 0..6 {
        cpu.step(&mut bus).expect("step");
    }
    assert_eq!(cpu.state.regs[REG_AX] & 0xFFFF, 3);
    assert_eq!(cpu.state.regs[REG_CX] & 0xFFFF, 0);
    // Fell through after the last decrement
    assert_eq!(cpu.state.ip, 0x0003);
}

#[test]
fn division_error_vectors_through_zero() {
    let (mut cpu, mut bus, ram) = machine(CpuModel::I80386Sx);
    load(&ram, 0x00, &[0x00, 0x03, 0x40, 0x00]); // IVT 0 -> 0040:0300
    load(&ram, 0x500, &[0xF6, 0xF3]); // DIV BL with BL=0
    enter(&mut cpu, &mut bus, 0x0050, 0x0000);
    setup_stack(&mut cpu, &mut bus, 0x0000, 0x2000);
    cpu.state.regs[REG_BX] = 0;

    cpu.step(&mut bus).expect("faulting DIV still steps");

    assert_eq!(cpu.state.sregs[SReg::Cs.index()], 0x0040);
    assert_eq!(cpu.state.ip, 0x0300);
    assert_eq!(
        cpu.last_exception().map(|e| (e.vector, e.origin)),
        Some((0, InterruptOrigin::Cpu))
    );
    // The 386 pushes the faulting instruction's address
    let mem = ram.borrow();
    let ip = u16::from(mem.data()[0x1FFA]) | u16::from(mem.data()[0x1FFB]) << 8;
    assert_eq!(ip, 0x0000);
}
