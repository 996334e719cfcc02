//! CPU state and the instruction cycle.
//!
//! The architectural state lives in [`CpuState`] so the history ring can
//! snapshot it wholesale before every step. [`Cpu`] wraps it with the
//! non-architectural machinery: the current decoded instruction, the
//! history rings, and the external interrupt hook.
//!
//! Memory access is layered: physical (unchecked, through the bus),
//! linear (masking, page translation, unaligned split accesses), and
//! logical (descriptor limit and access checks). Guest faults propagate
//! as `Err` up to [`Cpu::step`], which rolls back IP, flushes the
//! prefetch queue and injects the exception.

use emu_core::SystemBus;

use crate::address::Address;
use crate::decode::{decode, DecodedEa, DecodedInstruction};
use crate::descriptor::{
    DescriptorTable, SegmentDescriptor, ACCESS_E, ACCESS_P, ACCESS_RW, ACCESS_S, ACCESS_TYPE,
    SD_TYPE_LDT, SEL_RPL, SEL_TI,
};
use crate::exception::{CpuError, CpuException, Exception, InterruptOrigin};
use crate::flags::{format_flags, IF, IOPL_MASK, IOPL_SHIFT, VM};
use crate::history::{ControlTransferEntry, HistoryEntry, MAX_HISTORY};
use crate::model::{CpuInfo, CpuModel};
use crate::prefetch::PrefetchQueue;
use crate::registers::{SReg, SegmentedAddress, REG_DX, REG_SP};
use crate::tlb::{
    Tlb, PAGE_ADDR_MASK, PAGE_OFFSET_MASK, PAGE_SHIFT, PAGE_SIZE, TLB_D, TLB_U, TLB_V, TLB_W,
};

pub(crate) const CR0_PE: u64 = 1 << 0;
pub(crate) const CR0_TS: u64 = 1 << 3;
pub(crate) const CR0_WP: u64 = 1 << 16;
pub(crate) const CR0_PG: u64 = 1 << 31;

/// CR0, CR2, CR3, CR4 and CR8 are the only meaningful control registers.
const VALID_CR_MASK: u32 = 1 << 0 | 1 << 2 | 1 << 3 | 1 << 4 | 1 << 8;

// Page table entry bits.
pub(crate) const PT_P: u32 = 1 << 0;
pub(crate) const PT_W: u32 = 1 << 1;
pub(crate) const PT_U: u32 = 1 << 2;
pub(crate) const PT_A: u32 = 1 << 5;
pub(crate) const PT_D: u32 = 1 << 6;
pub(crate) const PDE_PS: u32 = 1 << 7;

// Page lookup flags: the low bits double as the #PF error code.
pub(crate) const PL_P: u32 = 1 << 0;
pub(crate) const PL_W: u32 = 1 << 1;
pub(crate) const PL_U: u32 = 1 << 2;
pub(crate) const PL_I: u32 = 1 << 3;
pub(crate) const PL_ERR_MASK: u32 = 15;
/// Debugger lookup: no TLB fill, no accessed/dirty writeback.
pub(crate) const PL_PEEK: u32 = 1 << 4;
/// System access (descriptor tables): skip the user check.
pub(crate) const PL_SYS: u32 = 1 << 5;

// === Width helpers ===

pub(crate) fn get_u8l(val: u64) -> u8 {
    val as u8
}

pub(crate) fn get_u8h(val: u64) -> u8 {
    (val >> 8) as u8
}

pub(crate) fn get_u16(val: u64) -> u16 {
    val as u16
}

pub(crate) fn get_u32(val: u64) -> u32 {
    val as u32
}

/// Mask `val` down to `size` bytes.
pub(crate) fn get(val: u64, size: u8) -> u64 {
    match size {
        1 => u64::from(get_u8l(val)),
        2 => u64::from(get_u16(val)),
        4 => u64::from(get_u32(val)),
        _ => val,
    }
}

/// Sign-extend the low `size` bytes of `val` to 64 bits.
pub(crate) fn sign_extend(val: u64, size: u8) -> u64 {
    match size {
        1 => val as u8 as i8 as i64 as u64,
        2 => val as u16 as i16 as i64 as u64,
        4 => val as u32 as i32 as i64 as u64,
        _ => val,
    }
}

pub(crate) fn update_u8l(reg: &mut u64, value: u64) {
    *reg = (*reg & !0xFF) | (value & 0xFF);
}

pub(crate) fn update_u8h(reg: &mut u64, value: u64) {
    *reg = (*reg & !0xFF00) | ((value & 0xFF) << 8);
}

pub(crate) fn update_u16(reg: &mut u64, value: u64) {
    *reg = (*reg & !0xFFFF) | (value & 0xFFFF);
}

pub(crate) fn update_u32(reg: &mut u64, value: u64) {
    *reg = (*reg & !0xFFFF_FFFF) | (value & 0xFFFF_FFFF);
}

/// Merge the low `size` bytes of `val` into `reg`, preserving the rest.
pub(crate) fn update(reg: &mut u64, val: u64, size: u8) {
    match size {
        1 => update_u8l(reg, val),
        2 => update_u16(reg, val),
        _ => update_u32(reg, val),
    }
}

/// Add `addend` to the low `size` bytes of `reg`, wrapping inside the
/// width. Returns the masked result.
pub(crate) fn add_reg(reg: &mut u64, addend: i64, size: u8) -> u64 {
    let res = get(*reg, size).wrapping_add(addend as u64);
    update(reg, res, size);
    get(res, size)
}

/// The architectural CPU state, snapshotted wholesale into the history
/// ring before every step.
#[derive(Debug, Clone)]
pub struct CpuState {
    pub regs: [u64; 8],
    pub sregs: [u16; 6],
    pub cregs: [u64; 8],
    pub dregs: [u64; 8],
    pub ip: u64,
    pub flags: u32,
    pub idt: DescriptorTable,
    pub gdt: DescriptorTable,
    pub sdesc: [SegmentDescriptor; 6],
    pub ldt: SegmentDescriptor,
    pub ldt_index: u16,
    pub task: SegmentDescriptor,
    pub task_index: u16,
    pub(crate) prefetch: PrefetchQueue,
    pub(crate) tlb: Tlb,
    /// One-instruction interrupt shadow after STI / MOV SS.
    pub(crate) int_delay: bool,
}

impl Default for CpuState {
    fn default() -> Self {
        Self {
            regs: [0; 8],
            sregs: [0; 6],
            cregs: [0; 8],
            dregs: [0; 8],
            ip: 0,
            flags: 0,
            idt: DescriptorTable::default(),
            gdt: DescriptorTable::default(),
            sdesc: [SegmentDescriptor::default(); 6],
            ldt: SegmentDescriptor::default(),
            ldt_index: 0,
            task: SegmentDescriptor::default(),
            task_index: 0,
            prefetch: PrefetchQueue::default(),
            tlb: Tlb::default(),
            int_delay: false,
        }
    }
}

impl CpuState {
    #[must_use]
    pub fn protected_mode(&self) -> bool {
        self.cregs[0] & CR0_PE != 0
    }

    #[must_use]
    pub fn paging_enabled(&self) -> bool {
        self.cregs[0] & (CR0_PE | CR0_PG) == CR0_PE | CR0_PG
    }

    #[must_use]
    pub fn vm86(&self) -> bool {
        self.flags & VM != 0
    }

    #[must_use]
    pub fn iopl(&self) -> u8 {
        ((self.flags & IOPL_MASK) >> IOPL_SHIFT) as u8
    }

    #[must_use]
    pub fn cpl(&self) -> u8 {
        self.sdesc[SReg::Cs.index()].dpl()
    }

    #[must_use]
    pub fn default_operand_size(&self) -> u8 {
        if self.protected_mode()
            && self.sdesc[SReg::Cs.index()].flags & crate::descriptor::FLAGS_DB != 0
        {
            4
        } else {
            2
        }
    }

    #[must_use]
    pub fn stack_size(&self) -> u8 {
        if self.sdesc[SReg::Ss.index()].flags & crate::descriptor::FLAGS_DB != 0 {
            4
        } else {
            2
        }
    }

    #[must_use]
    pub fn stack_mask(&self) -> u64 {
        if self.sdesc[SReg::Ss.index()].flags & crate::descriptor::FLAGS_DB != 0 {
            0xFFFF_FFFF
        } else {
            0xFFFF
        }
    }

    #[must_use]
    pub fn ip_mask(&self) -> u64 {
        (1u64 << (8 * self.default_operand_size())) - 1
    }
}

type InterruptFn = Box<dyn FnMut() -> Option<u8>>;

/// The CPU core. Drives one instruction per [`Cpu::step`] against a
/// [`SystemBus`].
pub struct Cpu {
    pub(crate) model: CpuModel,
    pub(crate) shift_mask: u8,
    prefetch_queue_length: u32,
    pub state: CpuState,
    pub(crate) current: DecodedInstruction,
    pub(crate) current_ip: u64,
    pub(crate) halted: bool,
    int_fn: Option<InterruptFn>,
    pub(crate) instructions_executed: u64,
    pub(crate) history: Vec<HistoryEntry>,
    pub(crate) control_transfer_history: Vec<ControlTransferEntry>,
    pub(crate) control_transfer_count: u64,
    exception_trace_mask: u32,
}

impl Cpu {
    #[must_use]
    pub fn new(model: CpuModel) -> Self {
        let mut cpu = Self {
            model,
            shift_mask: model.shift_mask(),
            prefetch_queue_length: model.prefetch_queue_length(),
            state: CpuState::default(),
            current: DecodedInstruction::default(),
            current_ip: 0,
            halted: false,
            int_fn: None,
            instructions_executed: 0,
            history: Vec::new(),
            control_transfer_history: Vec::new(),
            control_transfer_count: 0,
            // Trace everything except #DE by default
            exception_trace_mask: u32::MAX & !(1 << 0),
        };
        cpu.reset();
        cpu
    }

    pub fn reset(&mut self) {
        self.state = CpuState::default();
        self.current = DecodedInstruction::default();
        self.instructions_executed = 0;
        self.control_transfer_count = 0;
        self.halted = false;

        self.set_flags(0);
        for sr in [SReg::Es, SReg::Ss, SReg::Ds, SReg::Fs, SReg::Gs] {
            self.state.sregs[sr.index()] = 0;
            self.state.sdesc[sr.index()] = SegmentDescriptor::real_mode_data(0);
        }

        if self.model <= CpuModel::I8086 {
            self.state.sregs[SReg::Cs.index()] = 0xFFFF;
            self.state.sdesc[SReg::Cs.index()] = SegmentDescriptor::real_mode_code(0xFFFF);
            self.state.ip = 0;
        } else {
            // Not quite right (the 386 keeps A31-A20 high until the first
            // far jump), but close enough to boot a BIOS at F000:FFF0
            self.state.sregs[SReg::Cs.index()] = 0xF000;
            self.state.sdesc[SReg::Cs.index()] = SegmentDescriptor::real_mode_code(0xF000);
            self.state.ip = 0xFFF0;
        }

        if self.model == CpuModel::I80386Sx {
            self.state.regs[REG_DX] = 3 << 8 | 8; // Stepping in DL
        }

        self.state.idt.base = 0;
        self.state.idt.limit = 0x3FF;

        self.state.prefetch.flush(self.state.ip);
    }

    /// Debugger write: move IP and restart instruction fetch there.
    pub fn set_ip(&mut self, ip: u64) {
        self.state.ip = ip;
        self.state.prefetch.flush(ip);
    }

    #[must_use]
    pub fn cpu_info(&self) -> CpuInfo {
        CpuInfo {
            model: self.model,
            default_operand_size: self.state.default_operand_size(),
        }
    }

    pub fn set_interrupt_function(&mut self, f: impl FnMut() -> Option<u8> + 'static) {
        self.int_fn = Some(Box::new(f));
    }

    #[must_use]
    pub fn halted(&self) -> bool {
        self.halted
    }

    #[must_use]
    pub fn instructions_executed(&self) -> u64 {
        self.instructions_executed
    }

    #[must_use]
    pub fn exception_trace_mask(&self) -> u32 {
        self.exception_trace_mask
    }

    pub fn set_exception_trace_mask(&mut self, mask: u32) {
        self.exception_trace_mask = mask;
    }

    #[must_use]
    pub fn current_ip(&self) -> Address {
        Address::new(
            self.state.sregs[SReg::Cs.index()],
            self.current_ip,
            self.state.default_operand_size(),
        )
    }

    // Convenience delegates for the hot mode predicates.
    pub(crate) fn protected_mode(&self) -> bool {
        self.state.protected_mode()
    }

    pub(crate) fn paging_enabled(&self) -> bool {
        self.state.paging_enabled()
    }

    pub(crate) fn vm86(&self) -> bool {
        self.state.vm86()
    }

    pub(crate) fn iopl(&self) -> u8 {
        self.state.iopl()
    }

    pub(crate) fn cpl(&self) -> u8 {
        self.state.cpl()
    }

    pub(crate) fn current_sp(&self) -> SegmentedAddress {
        SegmentedAddress {
            sreg: SReg::Ss,
            offset: self.state.regs[REG_SP] & self.state.stack_mask(),
        }
    }

    // === Exception construction ===

    pub(crate) fn trace_exception(&self, number: Exception) -> bool {
        self.exception_trace_mask & (1 << number as u32) != 0
    }

    /// Build a guest exception, tracing it when unmasked.
    pub(crate) fn fault(&self, number: Exception, error_code: u32, msg: &str) -> CpuError {
        if self.trace_exception(number) {
            eprintln!("{} - {} {msg}", self.current_ip(), number.mnemonic());
        }
        CpuException::with_code(number, error_code).into()
    }

    pub(crate) fn gp(&self, error_code: u32, msg: &str) -> CpuError {
        self.fault(Exception::GeneralProtection, error_code, msg)
    }

    pub(crate) fn ud(&self, msg: &str) -> CpuError {
        self.fault(Exception::InvalidOpcode, 0, msg)
    }

    // === Paging ===

    pub(crate) fn flush_tlb(&mut self) {
        self.state.tlb.invalidate();
    }

    fn page_fault(&mut self, linear: u64, err: u32, msg: &str) -> CpuError {
        if self.trace_exception(Exception::PageFault) {
            eprintln!("{} - #PF CR2 {linear:08X}: {msg}", self.current_ip());
        }
        self.state.cregs[2] = linear;
        CpuException::with_code(Exception::PageFault, err).into()
    }

    /// Translate a linear address through the page tables.
    ///
    /// TLB hits are served directly unless a write finds the dirty bit
    /// clear, which falls through to the walker so PTE.D gets set. The
    /// walker updates PDE.A and PTE.A/D in memory and refreshes the TLB
    /// (except for peek lookups, which touch nothing).
    pub(crate) fn page_lookup(
        &mut self,
        bus: &mut SystemBus,
        linear: u64,
        lookup_flags: u32,
    ) -> Result<u64, CpuError> {
        debug_assert!(lookup_flags & !(PL_W | PL_I | PL_PEEK | PL_SYS) == 0);

        let mut check_write = lookup_flags & PL_W != 0;
        let mut err = lookup_flags & PL_ERR_MASK;
        if lookup_flags & PL_SYS == 0 {
            if self.cpl() == 3 {
                err |= PL_U;
            } else if self.cpl() == 0 && self.state.cregs[0] & CR0_WP == 0 {
                check_write = false;
            }
        }

        let tlb_value = if lookup_flags & PL_PEEK == 0 {
            self.state.tlb.find(linear).map(|e| e.value)
        } else {
            None
        };
        if let Some(value) = tlb_value {
            debug_assert!(value & TLB_V != 0);
            if err & PL_U != 0 && value & TLB_U == 0 {
                return Err(self.page_fault(linear, err | PL_P, "TLB user access violation"));
            }
            if check_write && value & TLB_W == 0 {
                return Err(self.page_fault(linear, err | PL_P, "TLB write access violation"));
            }
            if lookup_flags & PL_W == 0 || value & TLB_D != 0 {
                return Ok(u64::from(value & PAGE_ADDR_MASK) + (linear & PAGE_OFFSET_MASK));
            }
            // Dirty bit needs setting: fall through to the walker
        }

        let pde_addr = (self.state.cregs[3] & u64::from(PAGE_ADDR_MASK)) + ((linear >> 22) & 1023) * 4;
        let pde = self.read_mem_physical(bus, pde_addr, 4)? as u32;
        if pde & PT_P == 0 {
            return Err(self.page_fault(linear, err, "PDE not present"));
        }

        if pde & PDE_PS != 0 {
            return Err(CpuError::Runtime(format!(
                "4MB page mapping linear address {linear:08X} (PDE {pde:08X})"
            )));
        }

        // Permissions are only checked once the PTE is known present
        let pte_addr = u64::from(pde & PAGE_ADDR_MASK) + ((linear >> PAGE_SHIFT) & 1023) * 4;
        let pte = self.read_mem_physical(bus, pte_addr, 4)? as u32;
        if pte & PT_P == 0 {
            return Err(self.page_fault(linear, err, "PTE not present"));
        }

        err |= PL_P;

        if err & PL_U != 0 && pde & PT_U == 0 {
            return Err(self.page_fault(linear, err, "PDE user access violation"));
        }
        if check_write && pde & PT_W == 0 {
            return Err(self.page_fault(linear, err, "PDE not writable"));
        }
        if err & PL_U != 0 && pte & PT_U == 0 {
            return Err(self.page_fault(linear, err, "PTE user access violation"));
        }
        if check_write && pte & PT_W == 0 {
            return Err(self.page_fault(linear, err, "PTE not writable"));
        }

        if lookup_flags & PL_PEEK == 0 {
            if pde & PT_A == 0 {
                self.write_mem_physical(bus, pde_addr, u64::from(pde | PT_A), 4)?;
            }

            let fl = PT_A
                | if lookup_flags & PL_W != 0 {
                    PT_D
                } else {
                    pte & PT_D
                };
            if pte & (PT_A | PT_D) != fl {
                self.write_mem_physical(bus, pte_addr, u64::from(pte | fl), 4)?;
            }

            let entry = if tlb_value.is_some() {
                match self.state.tlb.find(linear) {
                    Some(e) => e,
                    None => self.state.tlb.alloc(linear),
                }
            } else {
                self.state.tlb.alloc(linear)
            };
            entry.tag = linear as u32 & PAGE_ADDR_MASK;
            entry.value = (pte & PAGE_ADDR_MASK) | TLB_V;
            if pte & PT_U != 0 {
                entry.value |= TLB_U;
            }
            if pte & PT_W != 0 {
                entry.value |= TLB_W;
            }
            if fl & PT_D != 0 {
                entry.value |= TLB_D;
            }
        }

        Ok(u64::from(pte & PAGE_ADDR_MASK) + (linear & PAGE_OFFSET_MASK))
    }

    // === Physical access ===

    pub(crate) fn read_mem_physical(
        &mut self,
        bus: &mut SystemBus,
        addr: u64,
        size: u8,
    ) -> Result<u64, CpuError> {
        debug_assert!(addr & u64::from(size - 1) == 0);
        Ok(match size {
            1 => u64::from(bus.read_u8(addr)),
            2 => u64::from(bus.read_u16(addr)),
            4 => u64::from(bus.read_u32(addr)),
            8 => bus.read_u64(addr),
            _ => {
                return Err(CpuError::Runtime(format!(
                    "physical read of size {size} from {addr:#X}"
                )))
            }
        })
    }

    pub(crate) fn write_mem_physical(
        &mut self,
        bus: &mut SystemBus,
        addr: u64,
        value: u64,
        size: u8,
    ) -> Result<(), CpuError> {
        debug_assert!(addr & u64::from(size - 1) == 0);
        match size {
            1 => bus.write_u8(addr, value as u8),
            2 => bus.write_u16(addr, value as u16),
            4 => bus.write_u32(addr, value as u32),
            _ => {
                return Err(CpuError::Runtime(format!(
                    "physical write of size {size} to {addr:#X}"
                )))
            }
        }
        Ok(())
    }

    // === Linear access ===

    pub(crate) fn to_physical_address(
        &mut self,
        bus: &mut SystemBus,
        linear: u64,
        lookup_flags: u32,
    ) -> Result<u64, CpuError> {
        if self.paging_enabled() {
            self.page_lookup(bus, linear, lookup_flags)
        } else {
            Ok(linear)
        }
    }

    pub(crate) fn read_mem_linear(
        &mut self,
        bus: &mut SystemBus,
        linear: u64,
        size: u8,
        lookup_flags: u32,
    ) -> Result<u64, CpuError> {
        let low_bits = linear & u64::from(size - 1);
        if low_bits == 0 {
            let phys = self.to_physical_address(bus, linear, lookup_flags)?;
            return self.read_mem_physical(bus, phys, size);
        }
        // Unaligned: two aligned reads, stitched
        let aligned = linear & (!0u64 << (size >> 1));
        let p0 = self.to_physical_address(bus, aligned, lookup_flags)?;
        let p1 = self.to_physical_address(bus, aligned + u64::from(size), lookup_flags)?;
        let v0 = self.read_mem_physical(bus, p0, size)? >> (low_bits * 8);
        let v1 = self.read_mem_physical(bus, p1, size)? << ((u64::from(size) - low_bits) * 8);
        Ok((v0 | v1) & ((1u64 << (8 * u32::from(size))) - 1))
    }

    pub(crate) fn write_mem_linear(
        &mut self,
        bus: &mut SystemBus,
        linear: u64,
        value: u64,
        size: u8,
        lookup_flags: u32,
    ) -> Result<(), CpuError> {
        let low_bits = linear & u64::from(size - 1);
        let lookup_flags = lookup_flags | PL_W;
        if low_bits == 0 {
            let phys = self.to_physical_address(bus, linear, lookup_flags)?;
            return self.write_mem_physical(bus, phys, value, size);
        }
        let p0 = self.to_physical_address(bus, linear, lookup_flags)?;
        // Validate the whole range before the first byte lands if it
        // crosses into another page
        if self.paging_enabled() && (linear ^ (linear + u64::from(size) - 1)) & PAGE_SIZE != 0 {
            self.to_physical_address(
                bus,
                (linear + u64::from(size) - 1) & u64::from(PAGE_ADDR_MASK),
                lookup_flags,
            )?;
        }
        match size {
            2 => {
                self.write_mem_physical(bus, p0, value & 0xFF, 1)?;
                let p = self.to_physical_address(bus, linear + 1, lookup_flags)?;
                self.write_mem_physical(bus, p, (value >> 8) & 0xFF, 1)?;
            }
            4 => {
                if low_bits & 1 != 0 {
                    self.write_mem_physical(bus, p0, value & 0xFF, 1)?;
                    let p = self.to_physical_address(bus, linear + 1, lookup_flags)?;
                    self.write_mem_physical(bus, p, (value >> 8) & 0xFFFF, 2)?;
                    let p = self.to_physical_address(bus, linear + 3, lookup_flags)?;
                    self.write_mem_physical(bus, p, (value >> 24) & 0xFF, 1)?;
                } else {
                    self.write_mem_physical(bus, p0, value & 0xFFFF, 2)?;
                    let p = self.to_physical_address(bus, linear + 2, lookup_flags)?;
                    self.write_mem_physical(bus, p, (value >> 16) & 0xFFFF, 2)?;
                }
            }
            _ => {
                return Err(CpuError::Runtime(format!(
                    "unaligned linear write of size {size} to {linear:#X}"
                )))
            }
        }
        Ok(())
    }

    // === Logical access ===

    /// Segment translation with limit and access checks. Stack-segment
    /// violations raise `#SS`, others `#GP`.
    pub(crate) fn to_linear_address(
        &mut self,
        address: SegmentedAddress,
        size: u8,
        for_write: bool,
    ) -> Result<u64, CpuError> {
        debug_assert!(self.model >= CpuModel::I80286);

        let desc = self.state.sdesc[address.sreg.index()];
        if desc.access & (ACCESS_P | ACCESS_S) != ACCESS_P | ACCESS_S {
            return Err(self.gp(0, &format!("segment {} descriptor invalid", address.sreg.name())));
        }

        if address.offset + u64::from(size) - 1 > u64::from(desc.limit) {
            let number = if address.sreg == SReg::Ss {
                Exception::StackSegmentFault
            } else {
                Exception::GeneralProtection
            };
            return Err(self.fault(
                number,
                0,
                &format!(
                    "access of {:04X}:{:08X} through {} outside limit {:X}",
                    self.state.sregs[address.sreg.index()],
                    address.offset,
                    address.sreg.name(),
                    desc.limit
                ),
            ));
        }
        if for_write
            && self.protected_mode()
            && !self.vm86()
            && desc.access & (ACCESS_E | ACCESS_RW) != ACCESS_RW
        {
            return Err(self.gp(
                0,
                &format!(
                    "write to {:04X}:{:08X} through non-writable {}",
                    self.state.sregs[address.sreg.index()],
                    address.offset,
                    address.sreg.name()
                ),
            ));
        }

        Ok(desc.base + address.offset)
    }

    pub(crate) fn read_mem(
        &mut self,
        bus: &mut SystemBus,
        address: SegmentedAddress,
        size: u8,
    ) -> Result<u64, CpuError> {
        if self.model <= CpuModel::I8086 {
            let seg = u64::from(self.state.sregs[address.sreg.index()]);
            let phys0 = (seg * 16 + (address.offset & 0xFFFF)) & 0xF_FFFF;
            if size == 1 {
                return Ok(u64::from(bus.read_u8(phys0)));
            }
            debug_assert!(size <= 2);
            // The 8086 reads a word in one access from even addresses
            if self.model == CpuModel::I8086 && address.offset & 1 == 0 {
                return Ok(u64::from(bus.read_u16(phys0)));
            }
            let lo = u64::from(bus.read_u8(phys0));
            let hi = u64::from(bus.read_u8((seg * 16 + ((address.offset + 1) & 0xFFFF)) & 0xF_FFFF));
            return Ok(lo | hi << 8);
        }

        let linear = self.to_linear_address(address, size, false)?;
        self.read_mem_linear(bus, linear, size, 0)
    }

    pub(crate) fn write_mem(
        &mut self,
        bus: &mut SystemBus,
        address: SegmentedAddress,
        value: u64,
        size: u8,
    ) -> Result<(), CpuError> {
        if self.model <= CpuModel::I8086 {
            let seg = u64::from(self.state.sregs[address.sreg.index()]);
            let phys0 = (seg * 16 + (address.offset & 0xFFFF)) & 0xF_FFFF;
            if size == 1 {
                bus.write_u8(phys0, value as u8);
                return Ok(());
            }
            debug_assert!(size <= 2);
            if self.model == CpuModel::I8086 && address.offset & 1 == 0 {
                bus.write_u16(phys0, value as u16);
                return Ok(());
            }
            bus.write_u8(phys0, value as u8);
            bus.write_u8(
                (seg * 16 + ((address.offset + 1) & 0xFFFF)) & 0xF_FFFF,
                (value >> 8) as u8,
            );
            return Ok(());
        }

        let linear = self.to_linear_address(address, size, true)?;
        self.write_mem_linear(bus, linear, value, size, 0)
    }

    /// Debugger read: must not fault, must not disturb device state.
    pub(crate) fn peek_mem(
        &mut self,
        bus: &mut SystemBus,
        address: SegmentedAddress,
        size: u8,
    ) -> Option<u64> {
        let mut value = 0u64;
        let mut addr = address;
        for i in 0..size {
            let phys = if self.model >= CpuModel::I80286 {
                let linear = self.to_linear_address(addr, 1, false).ok()?;
                self.to_physical_address(bus, linear, PL_PEEK).ok()?
            } else {
                u64::from(self.state.sregs[SReg::Cs.index()]) * 16 + addr.offset
            };
            value |= u64::from(bus.peek_u8(phys).ok()?) << (8 * i);
            addr.offset += 1;
        }
        Some(value)
    }

    // === Descriptor access ===

    pub(crate) fn descriptor_linear_address(&mut self, selector: u16) -> Result<u64, CpuError> {
        let (base, limit) = if selector & SEL_TI != 0 {
            if self.state.ldt.access & (ACCESS_P | ACCESS_S | ACCESS_TYPE)
                != ACCESS_P | SD_TYPE_LDT
            {
                return Err(self.gp(
                    u32::from(selector & !SEL_RPL),
                    &format!("invalid local descriptor {selector:04X}"),
                ));
            }
            (self.state.ldt.base, self.state.ldt.limit)
        } else {
            (self.state.gdt.base, u32::from(self.state.gdt.limit))
        };
        let ofs = u32::from(selector & !7);
        if ofs + 7 > limit {
            return Err(self.gp(
                u32::from(selector & !SEL_RPL),
                &format!("descriptor {selector:04X} outside table limit {limit:04X}"),
            ));
        }
        Ok(base + u64::from(ofs))
    }

    pub(crate) fn read_descriptor_value(
        &mut self,
        bus: &mut SystemBus,
        linear: u64,
    ) -> Result<u64, CpuError> {
        if linear & 7 != 0 {
            let lo = self.read_mem_linear(bus, linear, 4, PL_SYS)?;
            let hi = self.read_mem_linear(bus, linear + 4, 4, PL_SYS)?;
            Ok(lo | hi << 32)
        } else {
            self.read_mem_linear(bus, linear, 8, PL_SYS)
        }
    }

    pub(crate) fn read_descriptor(
        &mut self,
        bus: &mut SystemBus,
        selector: u16,
    ) -> Result<SegmentDescriptor, CpuError> {
        let linear = self.descriptor_linear_address(selector)?;
        Ok(SegmentDescriptor::from_raw(
            self.read_descriptor_value(bus, linear)?,
        ))
    }

    /// Read a `seg:offset` pair through a memory operand.
    pub(crate) fn read_far_ptr(
        &mut self,
        bus: &mut SystemBus,
        ea: DecodedEa,
    ) -> Result<Address, CpuError> {
        match ea {
            DecodedEa::Rm16 { .. } | DecodedEa::Rm32 { .. } => {
                let mut addr = self.calc_address(ea);
                let offset = self.read_mem(bus, addr, self.current.operand_size)?;
                addr.offset += u64::from(self.current.operand_size);
                addr.offset &= self.current.address_mask();
                let seg = self.read_mem(bus, addr, 2)? as u16;
                Ok(Address::new(seg, offset, self.current.address_size))
            }
            _ => Err(self.ud(&format!("{} with a register operand", self.current.mnemonic))),
        }
    }

    // === Effective addresses ===

    /// Resolve a memory operand to segment:offset without the final
    /// 16-bit mask (bit-test instructions need the unmasked form).
    pub(crate) fn calc_address_no_mask(&self, ea: DecodedEa) -> SegmentedAddress {
        use crate::decode::{modrm32_has_sib, modrm_mod, modrm_rm};
        use crate::registers::{REG_BP, REG_BX, REG_DI, REG_SI};

        let mut segment = SReg::Ds;
        let offset;

        match ea {
            DecodedEa::Mem16(addr) => offset = addr & 0xFFFF,
            DecodedEa::Mem32(addr) => offset = addr & 0xFFFF_FFFF,
            DecodedEa::Rm16 { rm, disp } => {
                let md = modrm_mod(rm);
                let r = modrm_rm(rm) as usize;
                debug_assert!(md != 0b11);
                if md == 0b00 && r == 0b110 {
                    offset = u64::from(disp) & 0xFFFF;
                } else {
                    const BASE_REG: [usize; 8] =
                        [REG_BX, REG_BX, REG_BP, REG_BP, REG_SI, REG_DI, REG_BP, REG_BX];
                    const INDEX_REG: [usize; 4] = [REG_SI, REG_DI, REG_SI, REG_DI];
                    if BASE_REG[r] == REG_BP {
                        segment = SReg::Ss;
                    }
                    let mut ofs = u64::from(get_u16(self.state.regs[BASE_REG[r]]));
                    if r < 4 {
                        ofs = ofs.wrapping_add(u64::from(get_u16(self.state.regs[INDEX_REG[r]])));
                    }
                    if md == 0b01 {
                        ofs = ofs.wrapping_add(i64::from(disp as u8 as i8) as u64);
                    } else if md == 0b10 {
                        ofs = ofs.wrapping_add(i64::from(disp as u16 as i16) as u64);
                    }
                    offset = ofs;
                }
            }
            DecodedEa::Rm32 { rm, sib, disp } => {
                let md = modrm_mod(rm);
                let r = modrm_rm(rm) as usize;
                debug_assert!(md != 0b11);
                let mut ofs;
                if r == 0b100 {
                    debug_assert!(modrm32_has_sib(rm));
                    let scale = (sib >> 6) & 3;
                    let index = ((sib >> 3) & 7) as usize;
                    let base = (sib & 7) as usize;

                    let mut index_val = 0u64;
                    if index != 0b100 {
                        index_val = self.state.regs[index] << scale;
                    } else if scale != 0
                        && self.model < CpuModel::I80586
                        && !(base == 0b101 && md == 0b00)
                    {
                        // Undocumented 386/486 artifact: scale with no
                        // index register scales the base by (1<<ss)-1,
                        // except in the no-base (disp32-only) form
                        index_val = (self.state.regs[base] << scale)
                            .wrapping_sub(self.state.regs[base]);
                    }
                    if base == 0b101 && md == 0b00 {
                        ofs = u64::from(disp).wrapping_add(index_val);
                    } else {
                        if base == REG_BP || base == crate::registers::REG_SP {
                            segment = SReg::Ss;
                        }
                        ofs = self.state.regs[base].wrapping_add(index_val);
                    }
                } else if r == REG_BP {
                    if md == 0b00 {
                        ofs = u64::from(disp); // [disp32]
                    } else {
                        ofs = self.state.regs[REG_BP];
                        segment = SReg::Ss;
                    }
                } else {
                    ofs = self.state.regs[r];
                }
                if md == 0b01 {
                    ofs = ofs.wrapping_add(i64::from(disp as u8 as i8) as u64);
                } else if md == 0b10 {
                    ofs = ofs.wrapping_add(i64::from(disp as i32) as u64);
                }
                offset = ofs & 0xFFFF_FFFF;
            }
            _ => {
                debug_assert!(false, "calc_address on non-memory EA {ea:?}");
                offset = 0;
            }
        }

        let segment = self.current.prefixes.seg_override().unwrap_or(segment);
        SegmentedAddress {
            sreg: segment,
            offset,
        }
    }

    pub(crate) fn calc_address(&self, ea: DecodedEa) -> SegmentedAddress {
        let mut sa = self.calc_address_no_mask(ea);
        if matches!(ea, DecodedEa::Rm16 { .. }) {
            sa.offset &= 0xFFFF;
        }
        sa
    }

    pub(crate) fn check_sreg(&self, reg_num: u8) -> Result<(), CpuError> {
        if reg_num >= 6 {
            return Err(self.ud(&format!("invalid segment register {reg_num}")));
        }
        Ok(())
    }

    pub(crate) fn read_ea(&mut self, bus: &mut SystemBus, index: usize) -> Result<u64, CpuError> {
        debug_assert!(index < self.current.num_operands as usize);
        let ea = self.current.ea[index];
        match ea {
            DecodedEa::Reg8(r) => {
                let reg = self.state.regs[(r & 3) as usize];
                Ok(u64::from(if r & 4 != 0 {
                    get_u8h(reg)
                } else {
                    get_u8l(reg)
                }))
            }
            DecodedEa::Reg16(r) => Ok(u64::from(get_u16(self.state.regs[r as usize]))),
            DecodedEa::Reg32(r) => Ok(u64::from(get_u32(self.state.regs[r as usize]))),
            DecodedEa::Sreg(r) => {
                self.check_sreg(r)?;
                Ok(u64::from(self.state.sregs[r as usize]))
            }
            DecodedEa::Creg(r) => {
                if VALID_CR_MASK & (1 << r) == 0 {
                    return Err(self.ud(&format!("read from invalid CR{r}")));
                }
                Ok(self.state.cregs[r as usize])
            }
            DecodedEa::Dreg(r) => Ok(self.state.dregs[r as usize]),
            DecodedEa::Imm8(v) => Ok(sign_extend(v, 1)),
            DecodedEa::Imm16(v) => Ok(sign_extend(v, 2)),
            DecodedEa::Imm32(v) => Ok(sign_extend(v, 4)),
            DecodedEa::Rm16 { .. }
            | DecodedEa::Rm32 { .. }
            | DecodedEa::Mem16(_)
            | DecodedEa::Mem32(_) => {
                let addr = self.calc_address(ea);
                self.read_mem(bus, addr, self.current.operand_size)
            }
            _ => Err(CpuError::Runtime(format!("read_ea of {ea:?}"))),
        }
    }

    pub(crate) fn write_ea(
        &mut self,
        bus: &mut SystemBus,
        index: usize,
        value: u64,
    ) -> Result<(), CpuError> {
        debug_assert!(index < self.current.num_operands as usize);
        debug_assert!(self.current.operation_size != 0);
        let ea = self.current.ea[index];
        match ea {
            DecodedEa::Reg8(r) => {
                debug_assert!(self.current.operation_size == 1);
                let reg = &mut self.state.regs[(r & 3) as usize];
                if r & 4 != 0 {
                    update_u8h(reg, value);
                } else {
                    update_u8l(reg, value);
                }
                Ok(())
            }
            DecodedEa::Reg16(r) => {
                debug_assert!(self.current.operation_size == 2);
                update_u16(&mut self.state.regs[r as usize], value);
                Ok(())
            }
            DecodedEa::Reg32(r) => {
                debug_assert!(self.current.operation_size == 4);
                update_u32(&mut self.state.regs[r as usize], value);
                Ok(())
            }
            DecodedEa::Sreg(r) => {
                self.check_sreg(r)?;
                if r as usize == SReg::Cs.index() {
                    // Direct CS writes decode but fault from the 186 up
                    return Err(self.ud("write to CS"));
                }
                if r as usize == SReg::Ss.index() {
                    self.state.int_delay = true;
                }
                let sr = SReg::from_index(r)
                    .ok_or_else(|| CpuError::Runtime(format!("segment register {r}")))?;
                self.load_sreg(bus, sr, value as u16)
            }
            DecodedEa::Creg(r) => {
                debug_assert!(self.current.operation_size == 4);
                if VALID_CR_MASK & (1 << r) == 0 {
                    return Err(self.ud(&format!("write to invalid CR{r} value {value:#010X}")));
                }
                self.set_creg(r, value as u32)
            }
            DecodedEa::Dreg(r) => {
                debug_assert!(self.current.operation_size == 4);
                self.state.dregs[r as usize] = value;
                if r == 7 && value & 0xFF != 0 {
                    return Err(CpuError::Runtime(format!(
                        "hardware breakpoints enabled via DR7 value {value:#010X}"
                    )));
                }
                Ok(())
            }
            DecodedEa::Rm16 { .. }
            | DecodedEa::Rm32 { .. }
            | DecodedEa::Mem16(_)
            | DecodedEa::Mem32(_) => {
                let addr = self.calc_address(ea);
                self.write_mem(bus, addr, value, self.current.operand_size)
            }
            _ => Err(CpuError::Runtime(format!("write_ea of {ea:?}"))),
        }
    }

    // === Flags ===

    /// Set the flags word, applying the family mask of always-set and
    /// always-clear bits.
    pub(crate) fn set_flags(&mut self, value: u32) {
        self.state.flags = value;
        if self.model < CpuModel::I80386Sx {
            self.state.flags &= 0xFFFF - 0x28;
            self.state.flags |= 0xF002;
        } else {
            self.state.flags |= 0xFFFC_0002;
            self.state.flags &= !(1 << 3 | 1 << 5 | 1 << 15);
        }
    }

    /// Filter a flags image loaded by POPF/IRET: VM never changes here,
    /// the upper half survives 16-bit operations, IOPL is kept when
    /// CPL != 0.
    pub(crate) fn filter_flags(&self, flags: u32, op_16bit: bool) -> u32 {
        let mut keep_mask = 0u32;
        if op_16bit {
            keep_mask |= 0xFFFF_0000;
        }
        if self.cpl() != 0 {
            keep_mask |= IOPL_MASK;
        }
        (self.state.flags & keep_mask) | (flags & !keep_mask)
    }

    /// Evaluate the arithmetic flags from a result and its carry-chain
    /// word, updating only the bits in `flags_mask`.
    pub(crate) fn update_flags(&mut self, value: u64, carry: u64, flags_mask: u32) {
        use crate::flags::{parity, AF, CF, OF, PF, SF, ZF};

        let (value, msb_mask) = match self.current.operation_size {
            1 => (value & 0xFF, 0x80u64),
            2 => (value & 0xFFFF, 0x8000),
            _ => (value & 0xFFFF_FFFF, 0x8000_0000),
        };

        let mut flags = 0u32;
        if carry & msb_mask != 0 {
            flags |= CF;
        }
        if flags_mask & PF != 0 && parity(value as u8) {
            flags |= PF;
        }
        if carry & (1 << 3) != 0 {
            flags |= AF;
        }
        if value == 0 {
            flags |= ZF;
        }
        if value & msb_mask != 0 {
            flags |= SF;
        }
        if ((carry << 1) ^ carry) & msb_mask != 0 {
            flags |= OF;
        }
        self.state.flags = (self.state.flags & !flags_mask) | (flags & flags_mask);
    }

    // === Stack ===

    pub(crate) fn read_stack(
        &mut self,
        bus: &mut SystemBus,
        item_offset: i32,
    ) -> Result<u64, CpuError> {
        self.read_stack_sized(bus, item_offset, 0)
    }

    pub(crate) fn read_stack_sized(
        &mut self,
        bus: &mut SystemBus,
        item_offset: i32,
        size: u8,
    ) -> Result<u64, CpuError> {
        let size = if size == 0 {
            self.current.operand_size
        } else {
            size
        };
        let mut sp = self.current_sp();
        sp.offset = sp
            .offset
            .wrapping_add((i64::from(item_offset) * i64::from(size)) as u64);
        sp.offset &= self.state.stack_mask();
        self.read_mem(bus, sp, size)
    }

    pub(crate) fn write_stack(
        &mut self,
        bus: &mut SystemBus,
        item_offset: i32,
        value: u64,
    ) -> Result<(), CpuError> {
        self.write_stack_sized(bus, item_offset, value, 0)
    }

    pub(crate) fn write_stack_sized(
        &mut self,
        bus: &mut SystemBus,
        item_offset: i32,
        value: u64,
        size: u8,
    ) -> Result<(), CpuError> {
        let size = if size == 0 {
            self.current.operand_size
        } else {
            size
        };
        let mut sp = self.current_sp();
        sp.offset = sp
            .offset
            .wrapping_sub((i64::from(1 + item_offset) * i64::from(size)) as u64);
        sp.offset &= self.state.stack_mask();
        self.write_mem(bus, sp, value, size)
    }

    pub(crate) fn update_sp(&mut self, item_count: i32) {
        let delta = i64::from(self.current.operand_size) * i64::from(item_count);
        let stack_size = self.state.stack_size();
        add_reg(&mut self.state.regs[REG_SP], delta, stack_size);
    }

    /// Push `value`; `size == 0` means the default operand size. The
    /// write happens before SP moves so a fault leaves SP untouched.
    pub(crate) fn push(
        &mut self,
        bus: &mut SystemBus,
        value: u64,
        size: u8,
    ) -> Result<(), CpuError> {
        let size = if size == 0 {
            self.state.default_operand_size()
        } else {
            size
        };
        debug_assert!(size == 2 || size == 4);
        self.write_stack_sized(bus, 0, value, size)?;
        let stack_size = self.state.stack_size();
        add_reg(&mut self.state.regs[REG_SP], -i64::from(size), stack_size);
        Ok(())
    }

    pub(crate) fn pop(&mut self, bus: &mut SystemBus, size: u8) -> Result<u64, CpuError> {
        let size = if size == 0 {
            self.state.default_operand_size()
        } else {
            size
        };
        debug_assert!(size == 2 || size == 4);
        let sp = self.current_sp();
        let res = self.read_mem(bus, sp, size)?;
        let stack_size = self.state.stack_size();
        add_reg(&mut self.state.regs[REG_SP], i64::from(size), stack_size);
        Ok(res)
    }

    // === Segment and control register loads ===

    pub(crate) fn change_cpl(&mut self, new_cpl: u8) {
        self.state.sdesc[SReg::Cs.index()].set_dpl(new_cpl);
    }

    pub(crate) fn clear_sreg(&mut self, sr: SReg) {
        self.state.sdesc[sr.index()] = SegmentDescriptor::default();
        self.state.sregs[sr.index()] = 0;
    }

    /// Clear any data segment whose DPL is below the current CPL (used
    /// on transfers to a less privileged level).
    pub(crate) fn clear_all_sregs(&mut self) {
        for sr in [SReg::Es, SReg::Ds, SReg::Fs, SReg::Gs] {
            if self.state.sdesc[sr.index()].dpl() < self.cpl() {
                self.clear_sreg(sr);
            }
        }
    }

    /// Load a segment register with full mode-dependent checks. Public
    /// for the debugger.
    pub fn load_sreg(
        &mut self,
        bus: &mut SystemBus,
        sr: SReg,
        value: u16,
    ) -> Result<(), CpuError> {
        if sr == SReg::Cs {
            if self.protected_mode() {
                return Err(CpuError::Runtime(format!(
                    "setting CS to {value:04X} in protected mode via load_sreg"
                )));
            }
            self.state.sdesc[sr.index()] = SegmentDescriptor::real_mode_code(value);
        } else if self.vm86() {
            let mut desc = SegmentDescriptor::real_mode_data(value);
            desc.set_dpl(3);
            self.state.sdesc[sr.index()] = desc;
        } else if self.protected_mode() {
            let rpl = value & SEL_RPL;
            let selector = u32::from(value & !SEL_RPL);
            let desc = self.read_descriptor(bus, value)?;
            let dpl = u16::from(desc.dpl());
            if sr == SReg::Ss {
                if value == 0 {
                    return Err(self.gp(0, "SS: segment selector is NULL"));
                }
                if rpl != dpl
                    || desc.access & (ACCESS_E | ACCESS_RW) != ACCESS_RW
                    || dpl != u16::from(self.cpl())
                {
                    return Err(self.gp(selector, &format!("SS: invalid descriptor {desc}")));
                }
                if !desc.present() {
                    return Err(self.fault(
                        Exception::StackSegmentFault,
                        selector,
                        "stack segment marked not present",
                    ));
                }
            } else if value != 0 {
                if desc.access & ACCESS_S == 0
                    || (desc.access & ACCESS_E != 0 && desc.access & ACCESS_RW == 0)
                {
                    return Err(self.gp(
                        selector,
                        &format!(
                            "{} ({value:04X}) is not a data or readable code segment: {desc}",
                            sr.name()
                        ),
                    ));
                }
                // Conforming code segments skip the privilege check
                let data_or_nonconforming = desc.access & ACCESS_E == 0
                    || desc.access & crate::descriptor::ACCESS_DC == 0;
                if data_or_nonconforming && (rpl > dpl || u16::from(self.cpl()) > dpl) {
                    return Err(self.gp(
                        selector,
                        &format!(
                            "{} ({value:04X}): data/nonconforming segment with RPL or CPL above DPL",
                            sr.name()
                        ),
                    ));
                }
                if !desc.present() {
                    return Err(self.fault(
                        Exception::SegmentNotPresent,
                        selector,
                        "segment marked not present",
                    ));
                }
            }
            self.state.sdesc[sr.index()] = desc;
        } else {
            // Real mode: only the cached base changes, not the limit
            // ("unreal mode" survives a return from protected mode)
            self.state.sdesc[sr.index()].base = u64::from(value) << 4;
        }
        self.state.sregs[sr.index()] = value;
        Ok(())
    }

    /// Write a control register. Public for the debugger.
    pub fn set_creg(&mut self, index: u8, value: u32) -> Result<(), CpuError> {
        debug_assert!((index as usize) < 8);
        let value = u64::from(value);
        if index == 0 && value & CR0_PG != 0 && value & CR0_PE == 0 {
            return Err(CpuError::Runtime(
                "cannot enable paging without protected mode".into(),
            ));
        }
        if index == 0 {
            let change = self.state.cregs[0] ^ value;
            if change & CR0_PG != 0 {
                self.flush_tlb();
            }
        }
        self.state.cregs[index as usize] = value;
        if index == 3 {
            self.flush_tlb();
        }
        Ok(())
    }

    // === Instruction fetch ===

    /// Fetch up to one bus-width of bytes into the prefetch queue.
    /// Returns false when nothing could be fetched (queue full, or a
    /// speculative fetch refused at the CS limit).
    pub(crate) fn instruction_fetch(
        &mut self,
        bus: &mut SystemBus,
        prefetch: bool,
    ) -> Result<bool, CpuError> {
        let pf_size = self.state.prefetch.size();
        let mut max_fetch = self.prefetch_queue_length - pf_size;
        if max_fetch == 0 {
            return Ok(false);
        }

        let ip = self.state.prefetch.ip;
        if ip & 3 == 0 {
            max_fetch = max_fetch.min(4);
        } else if ip & 1 == 0 {
            max_fetch = max_fetch.min(2);
        } else {
            max_fetch = 1;
        }

        match self.model {
            CpuModel::I8088 => max_fetch = 1,
            CpuModel::I8086 => max_fetch = max_fetch.min(2),
            _ => {
                // Don't prefetch beyond the CS limit
                let cs_limit = self.state.sdesc[SReg::Cs.index()].limit;
                let to_limit = (u64::from(cs_limit) + 1).wrapping_sub(ip);
                max_fetch = max_fetch.min(to_limit.min(u64::from(u32::MAX)) as u32);
                if max_fetch == 0 {
                    if prefetch {
                        return Ok(false);
                    }
                    max_fetch = 1; // Forced fetch faults in translation
                }
                max_fetch = max_fetch.min(self.model.prefetch_bus_limit());
            }
        }

        if max_fetch >= 4 {
            max_fetch = 4;
        } else if max_fetch >= 2 {
            max_fetch = 2;
        }

        let mut phys = if self.model < CpuModel::I80286 {
            u64::from(self.state.sregs[SReg::Cs.index()]) * 16 + ip
        } else {
            let linear = self.to_linear_address(
                SegmentedAddress {
                    sreg: SReg::Cs,
                    offset: ip,
                },
                max_fetch as u8,
                false,
            )?;
            if self.paging_enabled() {
                if (linear ^ (linear + u64::from(max_fetch) - 1)) & u64::from(PAGE_ADDR_MASK) != 0 {
                    return Err(CpuError::Runtime(format!(
                        "instruction fetch spans a page boundary at {linear:#X}"
                    )));
                }
                self.page_lookup(bus, linear, PL_I)?
            } else {
                linear
            }
        };

        if phys & 3 != 0 {
            if phys & 1 != 0 {
                max_fetch = 1;
            } else {
                max_fetch = max_fetch.min(2);
            }
        }

        match max_fetch {
            1 => {
                let byte = self.read_mem_physical(bus, phys, 1)? as u8;
                self.state.prefetch.put(byte);
            }
            2 => {
                let word = self.read_mem_physical(bus, phys, 2)? as u16;
                self.state.prefetch.put(word as u8);
                self.state.prefetch.put((word >> 8) as u8);
            }
            _ => {
                let dword = self.read_mem_physical(bus, phys, 4)? as u32;
                self.state.prefetch.put(dword as u8);
                self.state.prefetch.put((dword >> 8) as u8);
                self.state.prefetch.put((dword >> 16) as u8);
                self.state.prefetch.put((dword >> 24) as u8);
            }
        }

        self.state.prefetch.ip += u64::from(max_fetch);
        if self.model <= CpuModel::I80186 {
            self.state.prefetch.ip &= 0xFFFF;
        }

        Ok(true)
    }

    /// Top the queue up to the family low-water mark before decoding.
    pub(crate) fn instruction_prefetch(&mut self, bus: &mut SystemBus) -> Result<(), CpuError> {
        let low_water = self.model.prefetch_low_water();
        if self.state.prefetch.size() >= low_water {
            return Ok(());
        }
        while self.instruction_fetch(bus, true)?
            && self.state.prefetch.size() != self.prefetch_queue_length
        {}
        Ok(())
    }

    // === The step loop ===

    /// Execute one instruction (or deliver one pending event).
    ///
    /// Guest exceptions raised during execution are injected here and the
    /// call still returns `Ok`. An `Err` is either a fault raised while
    /// injecting (double-fault territory, left to the driver), the
    /// distinct halted-with-IF=0 condition, or a host runtime error.
    pub fn step(&mut self, bus: &mut SystemBus) -> Result<(), CpuError> {
        if self.state.flags & IF != 0 && !self.state.int_delay {
            let vector = self.int_fn.as_mut().and_then(|f| f());
            if let Some(vector) = vector {
                self.halted = false;
                self.do_interrupt(bus, vector, InterruptOrigin::Hardware, 0)?;
            }
        }
        self.state.int_delay = false;

        if self.halted {
            bus.add_cycles(1);
            return Ok(());
        }

        let slot = (self.instructions_executed % MAX_HISTORY as u64) as usize;
        self.instructions_executed += 1;
        let entry = HistoryEntry {
            state: self.state.clone(),
            bytes: [0; 15],
            num_bytes: 0,
            exception: None,
        };
        if slot == self.history.len() {
            self.history.push(entry);
        } else {
            self.history[slot] = entry;
        }

        self.current = DecodedInstruction::default();
        self.current_ip = self.state.ip;

        let result = self.do_step(bus);

        // Record the raw bytes whether or not the instruction completed
        let n = self.current.num_bytes;
        self.history[slot].bytes = self.current.bytes;
        self.history[slot].num_bytes = n;

        match result {
            Ok(()) => Ok(()),
            Err(CpuError::Exception(e)) => {
                self.state.ip = self.current_ip;
                self.state.prefetch.flush(self.state.ip);

                if self.trace_exception(e.number) {
                    eprintln!(
                        "{} - {e}, SS:ESP = {:04X}:{:04X}",
                        self.current_ip(),
                        self.state.sregs[SReg::Ss.index()],
                        self.state.regs[REG_SP]
                    );
                }

                if e.number == Exception::DivisionError && self.model == CpuModel::I8088 {
                    // The 8088 pushes the address of the *next*
                    // instruction for a divide exception
                    self.state.ip = (self.state.ip + u64::from(n)) & 0xFFFF;
                    self.state.prefetch.flush(self.state.ip);
                }

                let code = if e.has_error_code() { e.error_code } else { 0 };
                self.do_interrupt(bus, e.number.vector(), InterruptOrigin::Cpu, code)
            }
            Err(other) => {
                self.state.ip = self.current_ip;
                self.state.prefetch.flush(self.state.ip);
                Err(other)
            }
        }
    }

    /// Decode one instruction out of the prefetch queue.
    pub(crate) fn decode_next(
        &mut self,
        bus: &mut SystemBus,
    ) -> Result<DecodedInstruction, CpuError> {
        self.instruction_prefetch(bus)?;
        let info = self.cpu_info();
        let this = &mut *self;
        let fetch = || -> Result<u8, CpuError> {
            if this.state.prefetch.is_empty() {
                this.instruction_fetch(bus, false)?;
                if this.state.prefetch.is_empty() {
                    return Err(CpuError::Runtime(
                        "instruction fetch produced no bytes".into(),
                    ));
                }
            }
            Ok(this.state.prefetch.get())
        };
        decode(info, fetch)
    }

    // === Privilege checks ===

    pub(crate) fn check_priv(&self, error_code: u32) -> Result<(), CpuError> {
        if !self.protected_mode() || self.cpl() == 0 {
            return Ok(());
        }
        Err(self.gp(
            error_code,
            &format!("{} not permitted at CPL {}", self.current.mnemonic, self.cpl()),
        ))
    }

    pub(crate) fn check_priv_iopl(&self) -> Result<(), CpuError> {
        if !self.protected_mode() || self.cpl() <= self.iopl() {
            return Ok(());
        }
        Err(self.gp(
            0,
            &format!(
                "{} not permitted with CPL {} IOPL {}",
                self.current.mnemonic,
                self.cpl(),
                self.iopl()
            ),
        ))
    }

    pub(crate) fn check_pmode(&self) -> Result<(), CpuError> {
        if self.protected_mode() && !self.vm86() {
            return Ok(());
        }
        Err(self.ud(&format!(
            "{} is not recognized in real/v86 mode",
            self.current.mnemonic
        )))
    }

    pub(crate) fn check_priv_vm86(&self) -> Result<(), CpuError> {
        if !self.vm86() || self.iopl() == 3 {
            return Ok(());
        }
        Err(self.gp(
            0,
            &format!(
                "{} not permitted in V86 mode with IOPL {}",
                self.current.mnemonic,
                self.iopl()
            ),
        ))
    }

    /// Show the live state (trace hook).
    pub fn trace(&mut self, bus: &mut SystemBus) {
        let state = self.state.clone();
        self.show_state(bus, &state, None);
    }

    pub(crate) fn show_state(
        &mut self,
        bus: &mut SystemBus,
        state: &CpuState,
        instruction_bytes: Option<(&[u8; 15], u8)>,
    ) {
        show_cpu_state(state);
        let pc = Address::new(
            state.sregs[SReg::Cs.index()],
            state.ip,
            state.default_operand_size(),
        );
        let info = CpuInfo {
            model: self.model,
            default_operand_size: state.default_operand_size(),
        };
        let mut offset = 0usize;
        let state_ip = state.ip;
        let this = &mut *self;
        let decoded = {
            let fetch = || -> Result<u8, CpuError> {
                if let Some((bytes, len)) = instruction_bytes {
                    if offset < len as usize {
                        let b = bytes[offset];
                        offset += 1;
                        return Ok(b);
                    }
                    offset += 1;
                    return Ok(0xCC);
                }
                let b = this
                    .peek_mem(
                        bus,
                        SegmentedAddress {
                            sreg: SReg::Cs,
                            offset: state_ip + offset as u64,
                        },
                        1,
                    )
                    .unwrap_or(0xCC);
                offset += 1;
                Ok(b as u8)
            };
            decode(info, fetch)
        };
        match decoded {
            Ok(res) => eprintln!("{}", crate::disasm::format_instruction_full(&res, pc)),
            Err(e) => eprintln!("{pc} {e}"),
        }
    }
}

/// Dump registers, segment registers, flags and the prefetch queue.
pub(crate) fn show_cpu_state(state: &CpuState) {
    use crate::registers::{REG32_NAMES, SREG_NAMES};
    const REG_ORDER: [usize; 8] = [0, 3, 1, 2, 6, 7, 4, 5]; // AX BX CX DX SI DI SP BP
    const SREG_ORDER: [usize; 6] = [1, 2, 3, 0, 4, 5]; // CS SS DS ES FS GS
    let mut line = String::new();
    for (i, &r) in REG_ORDER.iter().enumerate() {
        line.push_str(&format!(
            "{}={:08X}{}",
            REG32_NAMES[r],
            state.regs[r] & 0xFFFF_FFFF,
            if i == 7 { "\n" } else { " " }
        ));
    }
    for &r in &SREG_ORDER {
        line.push_str(&format!("{}={:04X} ", SREG_NAMES[r], state.sregs[r]));
    }
    line.push_str(&format!(
        "flags={} {}-bit",
        format_flags(state.flags),
        state.default_operand_size() * 8
    ));
    if state.protected_mode() {
        if state.vm86() {
            line.push_str(" v86");
        }
        line.push_str(&format!(" CPL={} IOPL={}", state.cpl(), state.iopl()));
    }
    eprintln!("{line}");

    let mut queue = String::from("Prefetch queue: ");
    for i in 0..state.prefetch.size() {
        queue.push_str(&format!("{:02X}", state.prefetch.peek(i)));
    }
    eprintln!("{queue}");
}
