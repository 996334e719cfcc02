//! Integration tests using published 8088 single-step vectors.
//!
//! Each JSON file holds test cases for one opcode: full register and
//! memory state before and after a single instruction. Register, IP and
//! memory state are compared exactly; flags are compared under a
//! per-opcode ignore mask covering the architecturally undefined bits.
//!
//! Test data lives in `test-data/8088/v1/` at the workspace root.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use cpu_x86::{Cpu, CpuModel, SReg};
use emu_core::{MemoryHandler, Ram, SystemBus};
use serde::Deserialize;

const REG_AX: usize = 0;
const REG_CX: usize = 1;
const REG_DX: usize = 2;
const REG_BX: usize = 3;
const REG_SP: usize = 4;
const REG_BP: usize = 5;
const REG_SI: usize = 6;
const REG_DI: usize = 7;

// User-visible flag bits on the 8088.
const FLAGS_COMPARE_MASK: u32 = 0x0FD5;

const CF: u32 = 1 << 0;
const PF: u32 = 1 << 2;
const AF: u32 = 1 << 4;
const ZF: u32 = 1 << 6;
const SF: u32 = 1 << 7;
const OF: u32 = 1 << 11;

#[derive(Deserialize)]
struct TestCase {
    name: String,
    bytes: Vec<u8>,
    initial: TestState,
    #[serde(rename = "final")]
    final_state: TestState,
}

#[derive(Deserialize)]
struct TestState {
    regs: TestRegs,
    ram: Vec<(u32, u8)>,
    #[serde(default)]
    #[allow(dead_code)]
    queue: Vec<u8>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct TestRegs {
    ax: Option<u16>,
    bx: Option<u16>,
    cx: Option<u16>,
    dx: Option<u16>,
    cs: Option<u16>,
    ss: Option<u16>,
    ds: Option<u16>,
    es: Option<u16>,
    sp: Option<u16>,
    bp: Option<u16>,
    si: Option<u16>,
    di: Option<u16>,
    ip: Option<u16>,
    flags: Option<u16>,
}

/// Flags left architecturally undefined by the instruction under test.
fn ignored_flags(bytes: &[u8]) -> u32 {
    let mut i = 0;
    // Skip prefixes
    while i < bytes.len()
        && matches!(
            bytes[i],
            0x26 | 0x2E | 0x36 | 0x3E | 0xF0 | 0xF2 | 0xF3
        )
    {
        i += 1;
    }
    let opcode = bytes.get(i).copied().unwrap_or(0x90);
    let reg = bytes.get(i + 1).map_or(0, |m| (m >> 3) & 7);
    match opcode {
        0x27 | 0x2F => OF,
        0x37 | 0x3F => OF | SF | ZF | PF,
        0xD4 | 0xD5 => OF | AF | CF,
        0xD0 | 0xD1 => OF | AF,
        0xD2 | 0xD3 => OF | AF | CF,
        0xF6 | 0xF7 => match reg {
            4 | 5 => SF | ZF | AF | PF,
            6 | 7 => CF | OF | SF | ZF | AF | PF,
            _ => 0,
        },
        _ => 0,
    }
}

fn setup(cpu: &mut Cpu, bus: &mut SystemBus, ram: &Rc<RefCell<Ram>>, state: &TestState) {
    for &(addr, value) in &state.ram {
        ram.borrow_mut().data_mut()[(addr & 0xF_FFFF) as usize] = value;
    }
    let r = &state.regs;
    cpu.state.regs[REG_AX] = u64::from(r.ax.unwrap_or(0));
    cpu.state.regs[REG_BX] = u64::from(r.bx.unwrap_or(0));
    cpu.state.regs[REG_CX] = u64::from(r.cx.unwrap_or(0));
    cpu.state.regs[REG_DX] = u64::from(r.dx.unwrap_or(0));
    cpu.state.regs[REG_SP] = u64::from(r.sp.unwrap_or(0));
    cpu.state.regs[REG_BP] = u64::from(r.bp.unwrap_or(0));
    cpu.state.regs[REG_SI] = u64::from(r.si.unwrap_or(0));
    cpu.state.regs[REG_DI] = u64::from(r.di.unwrap_or(0));
    for (sr, value) in [
        (SReg::Es, r.es),
        (SReg::Ss, r.ss),
        (SReg::Ds, r.ds),
        (SReg::Cs, r.cs),
    ] {
        cpu.load_sreg(bus, sr, value.unwrap_or(0)).expect("real-mode load");
    }
    cpu.state.flags = u32::from(r.flags.unwrap_or(2));
    cpu.set_ip(u64::from(r.ip.unwrap_or(0)));
}

fn compare(
    cpu: &Cpu,
    ram: &Rc<RefCell<Ram>>,
    expected: &TestState,
    ignore_flags: u32,
) -> Vec<String> {
    let mut errors = Vec::new();
    let r = &expected.regs;
    let regs = [
        ("AX", REG_AX, r.ax),
        ("BX", REG_BX, r.bx),
        ("CX", REG_CX, r.cx),
        ("DX", REG_DX, r.dx),
        ("SP", REG_SP, r.sp),
        ("BP", REG_BP, r.bp),
        ("SI", REG_SI, r.si),
        ("DI", REG_DI, r.di),
    ];
    for (name, index, want) in regs {
        if let Some(want) = want {
            let got = (cpu.state.regs[index] & 0xFFFF) as u16;
            if got != want {
                errors.push(format!("{name}: got {got:04X}, want {want:04X}"));
            }
        }
    }
    for (name, sr, want) in [
        ("ES", SReg::Es, r.es),
        ("CS", SReg::Cs, r.cs),
        ("SS", SReg::Ss, r.ss),
        ("DS", SReg::Ds, r.ds),
    ] {
        if let Some(want) = want {
            let got = cpu.state.sregs[sr.index()];
            if got != want {
                errors.push(format!("{name}: got {got:04X}, want {want:04X}"));
            }
        }
    }
    if let Some(want) = r.ip {
        let got = (cpu.state.ip & 0xFFFF) as u16;
        if got != want {
            errors.push(format!("IP: got {got:04X}, want {want:04X}"));
        }
    }
    if let Some(want) = r.flags {
        let diff = (cpu.state.flags ^ u32::from(want)) & FLAGS_COMPARE_MASK & !ignore_flags;
        if diff != 0 {
            errors.push(format!(
                "FLAGS: got {:04X}, want {want:04X} (diff {diff:04X})",
                cpu.state.flags & 0xFFFF
            ));
        }
    }
    for &(addr, want) in &expected.ram {
        let got = ram.borrow().data()[(addr & 0xF_FFFF) as usize];
        if got != want {
            errors.push(format!("RAM[{addr:05X}]: got {got:02X}, want {want:02X}"));
        }
    }
    errors
}

fn run_file(path: &Path) -> (u64, u64) {
    let content = fs::read_to_string(path).expect("readable test file");
    let tests: Vec<TestCase> = serde_json::from_str(&content).expect("valid test JSON");

    let mut pass = 0u64;
    let mut fail = 0u64;

    for test in &tests {
        let mut bus = SystemBus::new();
        let ram = Rc::new(RefCell::new(Ram::new(0x10_0000)));
        bus.add_mem_handler(
            0,
            0x10_0000,
            Rc::clone(&ram) as Rc<RefCell<dyn MemoryHandler>>,
            false,
        );
        let mut cpu = Cpu::new(CpuModel::I8088);
        cpu.set_exception_trace_mask(0);
        setup(&mut cpu, &mut bus, &ram, &test.initial);

        let step_result = cpu.step(&mut bus);

        let mut errors = compare(&cpu, &ram, &test.final_state, ignored_flags(&test.bytes));
        if let Err(e) = step_result {
            errors.push(format!("step failed: {e}"));
        }

        if errors.is_empty() {
            pass += 1;
        } else {
            fail += 1;
            if fail <= 5 {
                eprintln!("FAIL {} [{}]:", test.name, path.display());
                for error in &errors {
                    eprintln!("  {error}");
                }
            }
        }
    }

    (pass, fail)
}

/// Run all 8088 single-step vector files.
#[test]
#[ignore = "requires test-data/8088 — run with --ignored"]
fn run_all() {
    let test_dir = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("parent of crate dir")
        .parent()
        .expect("workspace root")
        .join("test-data/8088/v1");

    if !test_dir.exists() {
        eprintln!("Test data not found at {}", test_dir.display());
        eprintln!("Skipping single-step tests.");
        return;
    }

    let pattern = format!("{}/*.json", test_dir.display());
    let mut total_pass = 0u64;
    let mut total_fail = 0u64;
    let mut files = 0u32;

    for entry in glob::glob(&pattern).expect("valid glob pattern") {
        let path = entry.expect("readable directory entry");
        let (pass, fail) = run_file(&path);
        total_pass += pass;
        total_fail += fail;
        files += 1;
    }

    eprintln!("{files} files: {total_pass} passed, {total_fail} failed");
    assert_eq!(total_fail, 0, "single-step mismatches");
}
