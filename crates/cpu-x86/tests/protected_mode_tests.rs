//! Protected-mode tests: descriptor loads, conforming transfers, call
//! gates with stack switches, paging with the TLB, and the unreal-mode
//! artifact.

use std::cell::RefCell;
use std::rc::Rc;

use cpu_x86::{
    Cpu, CpuError, CpuModel, DescriptorTable, Exception, InterruptOrigin, SReg, SegmentDescriptor,
};
use emu_core::{MemoryHandler, Ram, SystemBus};

const REG_AX: usize = 0;
const REG_BX: usize = 3;
const REG_SP: usize = 4;

// Selectors into the fixture GDT.
const SEL_CODE0: u16 = 0x08;
const SEL_DATA0: u16 = 0x10;
const SEL_CODE3: u16 = 0x18;
const SEL_DATA3: u16 = 0x20;
const SEL_CONFORMING: u16 = 0x28;
const SEL_TSS: u16 = 0x30;
const SEL_CALL_GATE: u16 = 0x38;

const GDT_BASE: u64 = 0x1_0000;
const IDT_BASE: u64 = 0x1_1000;
const TSS_BASE: u64 = 0x2_0000;

const ACCESS_CODE0: u8 = 0x9A;
const ACCESS_DATA0: u8 = 0x92;
const ACCESS_CODE3: u8 = 0xFA;
const ACCESS_DATA3: u8 = 0xF2;
const ACCESS_CONFORMING0: u8 = 0x9E;
const ACCESS_TSS32_BUSY: u8 = 0x8B;
const FLAGS_G_DB: u8 = 0xC;

fn machine() -> (Cpu, SystemBus, Rc<RefCell<Ram>>) {
    let mut bus = SystemBus::new();
    let ram = Rc::new(RefCell::new(Ram::new(0x20_0000)));
    bus.add_mem_handler(
        0,
        0x20_0000,
        Rc::clone(&ram) as Rc<RefCell<dyn MemoryHandler>>,
        false,
    );
    bus.set_address_mask(u64::MAX);
    let mut cpu = Cpu::new(CpuModel::I80386);
    cpu.set_exception_trace_mask(0);
    (cpu, bus, ram)
}

fn write_u64(ram: &Rc<RefCell<Ram>>, phys: usize, value: u64) {
    ram.borrow_mut().data_mut()[phys..phys + 8].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(ram: &Rc<RefCell<Ram>>, phys: usize, value: u32) {
    ram.borrow_mut().data_mut()[phys..phys + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_u32(ram: &Rc<RefCell<Ram>>, phys: usize) -> u32 {
    let mem = ram.borrow();
    u32::from_le_bytes(mem.data()[phys..phys + 4].try_into().expect("4 bytes"))
}

fn load(ram: &Rc<RefCell<Ram>>, phys: usize, bytes: &[u8]) {
    ram.borrow_mut().data_mut()[phys..phys + bytes.len()].copy_from_slice(bytes);
}

fn flat_descriptor(access: u8) -> u64 {
    SegmentDescriptor::to_raw(0xF_FFFF, 0, access, FLAGS_G_DB)
}

fn call_gate(selector: u16, offset: u32, params: u8, access: u8) -> u64 {
    u64::from(offset & 0xFFFF)
        | u64::from(selector) << 16
        | u64::from(params & 0xF) << 32
        | u64::from(access) << 40
        | u64::from(offset >> 16) << 48
}

fn interrupt_gate(selector: u16, offset: u32) -> u64 {
    // 32-bit interrupt gate, present, DPL 0
    call_gate(selector, offset, 0, 0x8E)
}

/// Build the standard GDT and point the CPU's GDTR/IDTR at it.
fn setup_tables(cpu: &mut Cpu, ram: &Rc<RefCell<Ram>>) {
    write_u64(ram, GDT_BASE as usize + 0x08, flat_descriptor(ACCESS_CODE0));
    write_u64(ram, GDT_BASE as usize + 0x10, flat_descriptor(ACCESS_DATA0));
    write_u64(ram, GDT_BASE as usize + 0x18, flat_descriptor(ACCESS_CODE3));
    write_u64(ram, GDT_BASE as usize + 0x20, flat_descriptor(ACCESS_DATA3));
    write_u64(
        ram,
        GDT_BASE as usize + 0x28,
        flat_descriptor(ACCESS_CONFORMING0),
    );
    write_u64(
        ram,
        GDT_BASE as usize + SEL_TSS as usize,
        SegmentDescriptor::to_raw(0xFF, TSS_BASE, ACCESS_TSS32_BUSY, 0),
    );
    cpu.state.gdt = DescriptorTable {
        base: GDT_BASE,
        limit: 0xFF,
    };
    cpu.state.idt = DescriptorTable {
        base: IDT_BASE,
        limit: 0xFF,
    };
}

/// Drop the CPU into protected mode with the given CS selector/access,
/// bypassing the mode-switch code a real BIOS would run.
fn enter_protected(cpu: &mut Cpu, cs_selector: u16, cs_access: u8, ip: u64) {
    cpu.set_creg(0, 1).expect("PE");
    cpu.state.sregs[SReg::Cs.index()] = cs_selector;
    cpu.state.sdesc[SReg::Cs.index()] = SegmentDescriptor::from_raw(flat_descriptor(cs_access));
    cpu.set_ip(ip);
}

fn setup_stack3(cpu: &mut Cpu, sp: u64) {
    cpu.state.sregs[SReg::Ss.index()] = SEL_DATA3 | 3;
    cpu.state.sdesc[SReg::Ss.index()] = SegmentDescriptor::from_raw(flat_descriptor(ACCESS_DATA3));
    cpu.state.regs[REG_SP] = sp;
}

#[test]
fn far_jmp_through_a_conforming_segment_keeps_cpl() {
    let (mut cpu, mut bus, ram) = machine();
    setup_tables(&mut cpu, &ram);
    // JMP FAR 0028:00006000
    load(
        &ram,
        0x5000,
        &[0xEA, 0x00, 0x60, 0x00, 0x00, SEL_CONFORMING as u8, 0x00],
    );
    load(&ram, 0x6000, &[0x90]);
    enter_protected(&mut cpu, SEL_CODE3 | 3, ACCESS_CODE3, 0x5000);
    setup_stack3(&mut cpu, 0x8F00);

    cpu.step(&mut bus).expect("far jmp");

    assert!(cpu.last_exception().is_none());
    assert_eq!(cpu.state.cpl(), 3, "conforming segment keeps caller CPL");
    assert_eq!(
        cpu.state.sregs[SReg::Cs.index()],
        SEL_CONFORMING | 3,
        "selector RPL follows CPL"
    );
    assert_eq!(cpu.state.ip, 0x6000);
}

#[test]
fn loading_a_privileged_data_segment_from_cpl3_faults() {
    let (mut cpu, mut bus, ram) = machine();
    setup_tables(&mut cpu, &ram);
    load(&ram, 0x5000, &[0x8E, 0xD8]); // MOV DS, AX
    enter_protected(&mut cpu, SEL_CODE3 | 3, ACCESS_CODE3, 0x5000);
    setup_stack3(&mut cpu, 0x8F00);
    cpu.state.regs[REG_AX] = u64::from(SEL_DATA0);

    // The #GP cannot be injected either (no usable IDT entry), so the
    // second fault escapes step()
    let err = cpu.step(&mut bus).expect_err("uninjectable #GP");
    assert!(matches!(err, CpuError::Exception(_)));
    assert_eq!(
        cpu.last_exception().map(|e| (e.vector, e.origin)),
        Some((Exception::GeneralProtection.vector(), InterruptOrigin::Cpu))
    );
    // DS stays untouched
    assert_eq!(cpu.state.sregs[SReg::Ds.index()], 0);
}

/// Identity-map the first `pages` pages with user+write access, leaving
/// holes where requested.
fn setup_paging(ram: &Rc<RefCell<Ram>>, dir: usize, table: usize, pages: u32, holes: &[u32]) {
    write_u32(ram, dir, table as u32 | 7);
    for i in 0..pages {
        let pte = if holes.contains(&i) { 0 } else { (i << 12) | 7 };
        write_u32(ram, table + 4 * i as usize, pte);
    }
}

#[test]
fn user_read_of_a_not_present_page_faults_with_u_error_code() {
    let (mut cpu, mut bus, ram) = machine();
    setup_tables(&mut cpu, &ram);
    // Page 7 (linear 0x7000) is not present
    setup_paging(&ram, 0x8000, 0x9000, 0x20, &[7]);
    write_u64(
        &ram,
        IDT_BASE as usize + 8 * 14,
        interrupt_gate(SEL_CONFORMING, 0x6000),
    );
    load(&ram, 0x5000, &[0xA0, 0x00, 0x70, 0x00, 0x00]); // MOV AL, [0x7000]
    load(&ram, 0x6000, &[0xF4]); // handler parks

    enter_protected(&mut cpu, SEL_CODE3 | 3, ACCESS_CODE3, 0x5000);
    setup_stack3(&mut cpu, 0x8F00);
    cpu.state.sregs[SReg::Ds.index()] = SEL_DATA3 | 3;
    cpu.state.sdesc[SReg::Ds.index()] = SegmentDescriptor::from_raw(flat_descriptor(ACCESS_DATA3));
    cpu.set_creg(3, 0x8000).expect("CR3");
    cpu.set_creg(0, 0x8000_0001u32).expect("PE|PG");

    cpu.step(&mut bus).expect("#PF injected through the IDT");

    assert_eq!(cpu.state.cregs[2], 0x7000, "CR2 holds the faulting address");
    assert_eq!(
        cpu.last_exception().map(|e| (e.vector, e.origin)),
        Some((Exception::PageFault.vector(), InterruptOrigin::Cpu))
    );
    // Conforming handler runs at the faulting CPL, on the same stack:
    // EFLAGS, CS, EIP, then the error code on top
    assert_eq!(cpu.state.ip, 0x6000);
    assert_eq!(cpu.state.cpl(), 3);
    let esp = cpu.state.regs[REG_SP];
    assert_eq!(esp, 0x8F00 - 16);
    assert_eq!(read_u32(&ram, esp as usize), 0b100, "P=0 W=0 U=1");
}

#[test]
fn tlb_serves_stale_mappings_until_cr3_is_rewritten() {
    let (mut cpu, mut bus, ram) = machine();
    setup_tables(&mut cpu, &ram);
    setup_paging(&ram, 0x8000, 0x9000, 0x20, &[]);
    // Linear 0xA000 -> physical 0xC000 initially
    write_u32(&ram, 0x9000 + 4 * 0xA, 0xC000 | 7);
    ram.borrow_mut().data_mut()[0xC000] = 0x11;
    ram.borrow_mut().data_mut()[0xD000] = 0x22;

    load(
        &ram,
        0x5000,
        &[
            0x8A, 0x1D, 0x00, 0xA0, 0x00, 0x00, // MOV BL, [0xA000]
            0x8A, 0x1D, 0x00, 0xA0, 0x00, 0x00, // MOV BL, [0xA000]
            0xB8, 0x00, 0x80, 0x00, 0x00, // MOV EAX, 0x8000
            0x0F, 0x22, 0xD8, // MOV CR3, EAX
            0x8A, 0x1D, 0x00, 0xA0, 0x00, 0x00, // MOV BL, [0xA000]
        ],
    );
    enter_protected(&mut cpu, SEL_CODE0, ACCESS_CODE0, 0x5000);
    cpu.state.sregs[SReg::Ss.index()] = SEL_DATA0;
    cpu.state.sdesc[SReg::Ss.index()] = SegmentDescriptor::from_raw(flat_descriptor(ACCESS_DATA0));
    cpu.state.regs[REG_SP] = 0x8F00;
    cpu.state.sregs[SReg::Ds.index()] = SEL_DATA0;
    cpu.state.sdesc[SReg::Ds.index()] = SegmentDescriptor::from_raw(flat_descriptor(ACCESS_DATA0));
    cpu.set_creg(3, 0x8000).expect("CR3");
    cpu.set_creg(0, 0x8000_0001u32).expect("PE|PG");

    cpu.step(&mut bus).expect("first read");
    assert_eq!(cpu.state.regs[REG_BX] & 0xFF, 0x11);

    // Repoint the PTE in memory; the TLB still has the old translation
    write_u32(&ram, 0x9000 + 4 * 0xA, 0xD000 | 7);
    cpu.step(&mut bus).expect("stale read");
    assert_eq!(cpu.state.regs[REG_BX] & 0xFF, 0x11, "served from the TLB");

    cpu.step(&mut bus).expect("MOV EAX");
    cpu.step(&mut bus).expect("MOV CR3 flushes the TLB");
    cpu.step(&mut bus).expect("fresh read");
    assert_eq!(cpu.state.regs[REG_BX] & 0xFF, 0x22, "walker sees the new PTE");
}

#[test]
fn call_gate_switches_stacks_and_copies_parameters() {
    let (mut cpu, mut bus, ram) = machine();
    setup_tables(&mut cpu, &ram);
    write_u64(
        &ram,
        GDT_BASE as usize + SEL_CALL_GATE as usize,
        call_gate(SEL_CODE0, 0x6100, 2, 0xEC), // present, DPL 3, 2 params
    );
    // TSS: ESP0 at +4, SS0 at +8
    write_u32(&ram, TSS_BASE as usize + 4, 0x9F00);
    write_u32(&ram, TSS_BASE as usize + 8, u32::from(SEL_DATA0));
    cpu.state.task = SegmentDescriptor::from_raw(SegmentDescriptor::to_raw(
        0xFF,
        TSS_BASE,
        ACCESS_TSS32_BUSY,
        0,
    ));
    cpu.state.task_index = SEL_TSS;

    // CALL FAR 0038:00006100
    load(
        &ram,
        0x5000,
        &[0x9A, 0x00, 0x61, 0x00, 0x00, SEL_CALL_GATE as u8, 0x00],
    );
    load(&ram, 0x6100, &[0xCA, 0x08, 0x00]); // RETF 8
    enter_protected(&mut cpu, SEL_CODE3 | 3, ACCESS_CODE3, 0x5000);
    setup_stack3(&mut cpu, 0x8EF8);
    // Two dword parameters already on the caller stack
    write_u32(&ram, 0x8EF8, 0xAAAA_0001);
    write_u32(&ram, 0x8EFC, 0xBBBB_0002);

    cpu.step(&mut bus).expect("call through the gate");

    assert_eq!(cpu.state.cpl(), 0);
    assert_eq!(cpu.state.sregs[SReg::Cs.index()], SEL_CODE0);
    assert_eq!(cpu.state.ip, 0x6100);
    assert_eq!(cpu.state.sregs[SReg::Ss.index()], SEL_DATA0);
    // Inner stack: old SS:ESP, two params, then CS:IP
    assert_eq!(cpu.state.regs[REG_SP], 0x9F00 - 24);
    // The last-copied parameter sits on top of the return address
    assert_eq!(read_u32(&ram, 0x9F00 - 16), 0xAAAA_0001);

    cpu.step(&mut bus).expect("RETF back out");
    assert_eq!(cpu.state.cpl(), 3);
    assert_eq!(cpu.state.sregs[SReg::Cs.index()], SEL_CODE3 | 3);
    assert_eq!(cpu.state.ip, 0x5007, "back after the far call");
    assert_eq!(
        cpu.state.regs[REG_SP],
        0x8F00,
        "parameters released on the outer stack"
    );
}

#[test]
fn real_mode_segment_load_preserves_the_cached_limit() {
    // "Unreal mode": a descriptor loaded in protected mode keeps its
    // limit when the segment register is rewritten in real mode
    let (mut cpu, mut bus, ram) = machine();
    load(&ram, 0x500, &[0x8E, 0xD8]); // MOV DS, AX
    cpu.load_sreg(&mut bus, SReg::Cs, 0x0050).expect("CS");
    cpu.set_ip(0);
    cpu.state.sdesc[SReg::Ds.index()] = SegmentDescriptor::from_raw(flat_descriptor(ACCESS_DATA0));
    cpu.state.regs[REG_AX] = 0x1234;

    cpu.step(&mut bus).expect("MOV DS, AX");

    let ds = cpu.state.sdesc[SReg::Ds.index()];
    assert_eq!(cpu.state.sregs[SReg::Ds.index()], 0x1234);
    assert_eq!(ds.base, 0x12340, "base follows the selector");
    assert_eq!(ds.limit, 0xFFFF_FFFF, "limit survives from protected mode");
}

#[test]
fn arpl_adjusts_the_requested_privilege_level() {
    let (mut cpu, mut bus, ram) = machine();
    setup_tables(&mut cpu, &ram);
    load(&ram, 0x5000, &[0x63, 0xD8]); // ARPL AX, BX
    enter_protected(&mut cpu, SEL_CODE0, ACCESS_CODE0, 0x5000);
    cpu.state.regs[REG_AX] = u64::from(SEL_DATA0); // RPL 0
    cpu.state.regs[REG_BX] = u64::from(SEL_DATA3 | 3); // RPL 3

    cpu.step(&mut bus).expect("ARPL");

    assert_eq!(cpu.state.regs[REG_AX] & 0xFFFF, u64::from(SEL_DATA0 | 3));
    assert_ne!(cpu.state.flags & cpu_x86::ZF, 0);
}
