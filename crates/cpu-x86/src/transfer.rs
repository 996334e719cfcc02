//! Control transfer: near and far jumps and calls, call gates, interrupt
//! dispatch, IRET and far returns, and the TSS-based stack switch.
//!
//! One routine handles every far transfer shape. In real or VM86 mode it
//! is just a push + CS load; in protected mode it reads the target
//! descriptor and branches on code segment vs call gate, performing the
//! privilege checks and stack switches as it goes. Task gates are not
//! modelled and surface as host errors.

use emu_core::SystemBus;

use crate::cpu::{Cpu, PL_SYS};
use crate::decode::DecodedEa;
use crate::descriptor::{
    ACCESS_E, ACCESS_P, ACCESS_S, ACCESS_TYPE, SD_TYPE_CALL16, SD_TYPE_CALL32, SD_TYPE_INT16,
    SD_TYPE_INT32, SD_TYPE_TASK16_BUSY, SD_TYPE_TASK32_BUSY, SD_TYPE_TASK_GATE, SD_TYPE_TRAP16,
    SD_TYPE_TRAP32, SD_TYPE_NAMES, SEL_RPL,
};
use crate::exception::{CpuError, Exception, InterruptEvent, InterruptOrigin, ERROR_CODE_MASK};
use crate::flags::{IF, VM};
use crate::history::MAX_HISTORY;
use crate::registers::{SReg, REG_SP};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferKind {
    Jump,
    Call,
    Int32,
    Int16,
    Iret,
    Retf,
}

impl TransferKind {
    fn name(self) -> &'static str {
        match self {
            Self::Jump => "jump",
            Self::Call => "call",
            Self::Int32 => "int32",
            Self::Int16 => "int16",
            Self::Iret => "iret",
            Self::Retf => "retf",
        }
    }
}

// 16- and 32-bit TSS layouts (only the privileged stack slots and the
// I/O permission bitmap pointer are used).
const TSS16_SP0_OFFSET: u64 = 0x02;
const TSS16_SS0_OFFSET: u64 = 0x04;
const TSS32_ESP0_OFFSET: u64 = 0x04;
const TSS32_SS0_OFFSET: u64 = 0x08;
const TSS32_IOPB_OFFSET: u64 = 0x66;

impl Cpu {
    /// Base address of the current TSS, validated up to `limit_check`.
    fn tss_address(&mut self, limit_check: u32) -> Result<u64, CpuError> {
        let task = self.state.task;
        if task.access & (ACCESS_P | ACCESS_S) != ACCESS_P {
            return Err(CpuError::Runtime(format!("invalid TSS descriptor: {task}")));
        }
        let ty = task.system_type();
        if ty != SD_TYPE_TASK16_BUSY && ty != SD_TYPE_TASK32_BUSY {
            return Err(CpuError::Runtime(format!("invalid TSS type: {task}")));
        }
        if limit_check > task.limit {
            return Err(CpuError::Runtime(format!(
                "access at {limit_check:#X} outside TSS limit: {task}"
            )));
        }
        Ok(task.base)
    }

    /// Switch to the inner-privilege stack from the TSS, pushing the old
    /// SS:SP (and, when leaving VM86, the four data segments).
    pub(crate) fn tss_restore_stack(
        &mut self,
        bus: &mut SystemBus,
        new_cpl: u8,
        from_vm86: bool,
        stack_op_size: u8,
    ) -> Result<(), CpuError> {
        if new_cpl != 0 {
            return Err(CpuError::Runtime(format!(
                "TSS stack switch to CPL {new_cpl} not supported"
            )));
        }

        let ty = self.state.task.system_type();
        if ty != SD_TYPE_TASK16_BUSY && ty != SD_TYPE_TASK32_BUSY {
            return Err(CpuError::Runtime(format!(
                "invalid TSS for stack switch: {}",
                self.state.task
            )));
        }
        let op_size: u8 = if ty == SD_TYPE_TASK16_BUSY { 2 } else { 4 };

        // Lower CPL first so the SS load and TSS reads pass their checks
        self.change_cpl(new_cpl);

        let (ss, sp) = if op_size == 2 {
            let tss = self.tss_address((TSS16_SS0_OFFSET + 2) as u32)?;
            let ss = self.read_mem_linear(bus, tss + TSS16_SS0_OFFSET, 2, 0)? as u16;
            let sp = self.read_mem_linear(bus, tss + TSS16_SP0_OFFSET, 2, 0)?;
            (ss, sp)
        } else {
            let tss = self.tss_address((TSS32_SS0_OFFSET + 2) as u32)?;
            let ss = self.read_mem_linear(bus, tss + TSS32_SS0_OFFSET, 2, 0)? as u16;
            let sp = self.read_mem_linear(bus, tss + TSS32_ESP0_OFFSET, 4, 0)?;
            (ss, sp)
        };

        let old_ss = self.state.sregs[SReg::Ss.index()];
        let old_sp = self.state.regs[REG_SP];
        self.load_sreg(bus, SReg::Ss, ss)?;
        self.state.regs[REG_SP] = sp;

        if from_vm86 {
            debug_assert!(stack_op_size == 4);
            debug_assert!(self.protected_mode() && new_cpl == 0);
            for sr in [SReg::Gs, SReg::Fs, SReg::Ds, SReg::Es] {
                let value = self.state.sregs[sr.index()];
                self.push(bus, u64::from(value), op_size)?;
                self.clear_sreg(sr);
            }
        }

        self.push(bus, u64::from(old_ss), stack_op_size)?;
        self.push(bus, old_sp, stack_op_size)?;
        Ok(())
    }

    /// Common far-transfer path: mutates CS (selector and cache), IP,
    /// flags, and the stack.
    pub(crate) fn do_control_transfer(
        &mut self,
        bus: &mut SystemBus,
        cs: u16,
        ip: u64,
        kind: TransferKind,
    ) -> Result<(), CpuError> {
        self.record_control_transfer(cs, ip);

        let op_size = match kind {
            TransferKind::Int32 => 4,
            TransferKind::Int16 => 2,
            _ => self.current.operand_size,
        };
        let is_interrupt = matches!(kind, TransferKind::Int32 | TransferKind::Int16);

        let old_cs = self.state.sregs[SReg::Cs.index()];
        let old_ip = self.state.ip;
        let old_flags = self.state.flags;

        if is_interrupt {
            self.state.flags &= !IF;
        }

        if !self.protected_mode() || (self.vm86() && !is_interrupt) {
            self.save_transfer_regs(bus, kind, op_size, old_flags, old_cs, old_ip)?;
            self.state.sregs[SReg::Cs.index()] = cs;
            self.state.sdesc[SReg::Cs.index()] =
                crate::descriptor::SegmentDescriptor::real_mode_code(cs);
            if self.vm86() {
                self.state.sdesc[SReg::Cs.index()].set_dpl(3);
            }
            self.state.ip = ip & self.state.ip_mask();
            let new_ip = self.state.ip;
            self.state.prefetch.flush(new_ip);
            return Ok(());
        }

        let mut cs = cs;
        let mut ip = ip;

        let mut from_vm86 = false;
        if self.vm86() {
            from_vm86 = true;
            self.state.flags &= !VM;
        }

        let selector = u32::from(cs & !SEL_RPL);
        let mut desc = self.read_descriptor(bus, cs)?;

        if desc.access & ACCESS_S != 0 {
            if desc.access & ACCESS_E == 0 {
                return Err(CpuError::Runtime(format!(
                    "CS loaded with non-code descriptor {desc}"
                )));
            }

            let conforming = desc.is_conforming_code_segment();

            if is_interrupt {
                if !desc.present() {
                    return Err(self.fault(
                        Exception::SegmentNotPresent,
                        selector,
                        &format!("{} CS loaded with not-present selector", kind.name()),
                    ));
                }

                if conforming {
                    // Conforming handlers run at the interrupted CPL;
                    // the cached DPL is what cpl() reads
                    let cur = self.cpl();
                    desc.set_dpl(cur);
                    cs = (cs & !SEL_RPL) | u16::from(cur);
                } else {
                    let new_cpl = desc.dpl();
                    if new_cpl < self.cpl() {
                        // Inner stack from the TSS; also spills the VM86
                        // data segments
                        self.tss_restore_stack(bus, new_cpl, from_vm86, op_size)?;
                    } else {
                        cs = (cs & !SEL_RPL) | u16::from(new_cpl);
                    }
                }
            } else if kind != TransferKind::Iret {
                // IRET has already performed its checks
                if conforming {
                    if desc.dpl() > self.cpl() {
                        return Err(self.gp(
                            selector,
                            &format!(
                                "{} through conforming segment with DPL {} above CPL {}",
                                kind.name(),
                                desc.dpl(),
                                self.cpl()
                            ),
                        ));
                    }
                    if !desc.present() {
                        return Err(self.fault(
                            Exception::SegmentNotPresent,
                            selector,
                            &format!("{} CS loaded with not-present selector", kind.name()),
                        ));
                    }
                    // Caller privilege is kept; the selector RPL follows
                    let cur = self.cpl();
                    desc.set_dpl(cur);
                    cs = (cs & !SEL_RPL) | u16::from(cur);
                } else {
                    let new_cpl = (cs & SEL_RPL) as u8;
                    if desc.dpl() < self.cpl() {
                        return Err(self.gp(
                            selector,
                            &format!(
                                "{} DPL ({}) below CPL ({})",
                                kind.name(),
                                desc.dpl(),
                                self.cpl()
                            ),
                        ));
                    }
                    if !desc.present() {
                        return Err(self.fault(
                            Exception::SegmentNotPresent,
                            selector,
                            &format!("{} CS loaded with not-present selector", kind.name()),
                        ));
                    }
                    if new_cpl > self.cpl() {
                        // Outward transfer: the outer SS:SP comes off the
                        // current stack
                        let sp = self.pop(bus, op_size)?;
                        let ss = self.pop(bus, op_size)? as u16;
                        self.change_cpl(new_cpl);
                        self.clear_all_sregs();
                        self.state.regs[REG_SP] = sp;
                        self.load_sreg(bus, SReg::Ss, ss)?;
                    } else {
                        self.change_cpl(new_cpl);
                    }
                }
            }
        } else {
            debug_assert!(!from_vm86);

            let desc_type = desc.system_type();
            if desc_type == SD_TYPE_TASK_GATE {
                return Err(CpuError::Runtime(format!(
                    "task gate transfer not implemented ({desc})"
                )));
            }
            if desc_type != SD_TYPE_CALL32 && desc_type != SD_TYPE_CALL16 {
                return Err(CpuError::Runtime(format!(
                    "CS loaded with unsupported descriptor {desc}"
                )));
            }

            if kind != TransferKind::Call {
                return Err(CpuError::Runtime(format!(
                    "cannot use {} through a call gate",
                    kind.name()
                )));
            }

            if desc.dpl() < self.cpl() {
                return Err(self.gp(
                    selector,
                    &format!("call gate DPL ({}) below CPL ({})", desc.dpl(), self.cpl()),
                ));
            }

            if !desc.present() {
                return Err(CpuError::Runtime(
                    "call gate not present (should raise #NP)".into(),
                ));
            }

            let code_desc = self.read_descriptor(bus, desc.gate_selector())?;
            if !code_desc.present() || !code_desc.is_code_segment() {
                return Err(CpuError::Runtime(format!(
                    "unsupported call gate {desc} referencing {code_desc}"
                )));
            }

            let new_cpl = (desc.gate_selector() & SEL_RPL) as u8;
            if new_cpl < self.cpl() {
                let old_ss_desc = self.state.sdesc[SReg::Ss.index()];
                let old_stack_mask = self.state.stack_mask();
                let old_sp = self.state.regs[REG_SP];

                self.tss_restore_stack(bus, new_cpl, false, op_size)?;

                // Copy the gate's parameters from the caller stack
                for i in (0..u64::from(desc.gate_param_count())).rev() {
                    let param = self.read_mem_linear(
                        bus,
                        old_ss_desc.base + ((old_sp + i * 2) & old_stack_mask),
                        op_size,
                        PL_SYS,
                    )?;
                    self.push(bus, param, op_size)?;
                }
            }

            cs = desc.gate_selector();
            ip = u64::from(desc.gate_offset());
            desc = code_desc;
        }

        self.save_transfer_regs(bus, kind, op_size, old_flags, old_cs, old_ip)?;
        self.state.sregs[SReg::Cs.index()] = cs;
        self.state.sdesc[SReg::Cs.index()] = desc;
        self.state.ip = ip & self.state.ip_mask();
        let new_ip = self.state.ip;
        self.state.prefetch.flush(new_ip);
        Ok(())
    }

    fn save_transfer_regs(
        &mut self,
        bus: &mut SystemBus,
        kind: TransferKind,
        op_size: u8,
        old_flags: u32,
        old_cs: u16,
        old_ip: u64,
    ) -> Result<(), CpuError> {
        match kind {
            TransferKind::Jump | TransferKind::Iret | TransferKind::Retf => Ok(()),
            TransferKind::Int32 | TransferKind::Int16 => {
                self.push(bus, u64::from(old_flags), op_size)?;
                self.push(bus, u64::from(old_cs), op_size)?;
                self.push(bus, old_ip, op_size)
            }
            TransferKind::Call => {
                self.push(bus, u64::from(old_cs), op_size)?;
                self.push(bus, old_ip, op_size)
            }
        }
    }

    /// Near jump or call through a relative or r/m operand.
    pub(crate) fn do_near_control_transfer(
        &mut self,
        bus: &mut SystemBus,
        kind: TransferKind,
    ) -> Result<(), CpuError> {
        debug_assert!(matches!(kind, TransferKind::Jump | TransferKind::Call));
        let old_ip = self.state.ip;
        let mut new_ip = self.state.ip;

        match self.current.ea[0] {
            DecodedEa::Rel8(v) => {
                new_ip = new_ip.wrapping_add(i64::from(v as u8 as i8) as u64);
            }
            DecodedEa::Rel16(v) => {
                new_ip = new_ip.wrapping_add(i64::from(v as u16 as i16) as u64);
            }
            DecodedEa::Rel32(v) => {
                new_ip = new_ip.wrapping_add(i64::from(v as u32 as i32) as u64);
            }
            _ => new_ip = self.read_ea(bus, 0)?,
        }
        new_ip &= self.state.ip_mask();

        let cs = self.state.sregs[SReg::Cs.index()];
        self.record_control_transfer(cs, new_ip);

        self.state.ip = new_ip;
        self.state.prefetch.flush(new_ip);
        if kind == TransferKind::Call {
            self.push(bus, old_ip, self.current.operand_size)?;
        }
        Ok(())
    }

    /// Return-IP and return-CS validation shared by RETN/RETF/IRET.
    pub(crate) fn check_ip_limit(
        &mut self,
        bus: &mut SystemBus,
        cs: u16,
        ip: u64,
    ) -> Result<(), CpuError> {
        if self.model < crate::model::CpuModel::I80286 {
            return Ok(());
        }
        let mnem = self.current.instruction.mnemonic;
        if !self.protected_mode() || self.vm86() {
            let limit = self.state.sdesc[SReg::Cs.index()].limit;
            if ip > u64::from(limit) {
                return Err(self.gp(
                    0,
                    &format!(
                        "{mnem} - return instruction pointer ({ip:04X}) outside the code segment limit ({limit:04X})"
                    ),
                ));
            }
            return Ok(());
        }

        if cs == 0 {
            return Err(self.gp(0, &format!("{mnem} - code segment selector is NULL")));
        }
        let desc = self.read_descriptor(bus, cs)?;
        let selector = u32::from(cs & !SEL_RPL);
        let rpl = cs & SEL_RPL;
        if !desc.is_code_segment() {
            return Err(self.gp(
                selector,
                &format!("{mnem} - return segment is not a code segment ({desc})"),
            ));
        }
        if rpl < u16::from(self.cpl()) {
            return Err(self.gp(
                selector,
                &format!("{mnem} - return selector RPL ({rpl}) below CPL ({})", self.cpl()),
            ));
        }
        if desc.is_conforming_code_segment() {
            return Err(CpuError::Runtime(format!(
                "return to conforming code segment not implemented ({desc})"
            )));
        }
        if u16::from(desc.dpl()) != rpl {
            return Err(CpuError::Runtime(format!(
                "return with DPL ({}) != RPL ({rpl}) not implemented",
                desc.dpl()
            )));
        }
        if !desc.present() {
            return Err(self.fault(
                Exception::SegmentNotPresent,
                selector,
                &format!("{mnem} - return segment not present"),
            ));
        }
        Ok(())
    }

    /// IRET: decode the three stack slots, filter flags, and return —
    /// possibly back into VM86 or to an outer privilege level.
    pub(crate) fn do_interrupt_return(&mut self, bus: &mut SystemBus) -> Result<(), CpuError> {
        let ip = self.read_stack(bus, 0)?;
        let cs = self.read_stack(bus, 1)? as u16;
        let popped = self.read_stack(bus, 2)? as u32;
        let flags = self.filter_flags(popped, self.current.operand_size == 2);
        self.record_control_transfer(cs, ip);

        if flags & VM == 0 {
            self.check_ip_limit(bus, cs, ip)?;
        }
        self.update_sp(3);

        if !self.protected_mode() || self.vm86() {
            // Privilege was already checked before we got here
            self.set_flags(flags);
            return self.do_control_transfer(bus, cs, ip, TransferKind::Jump);
        }

        let mut requested_pl = (cs & SEL_RPL) as u8;

        if flags & VM != 0 {
            // Return to virtual-8086 mode (only legal from CPL 0)
            if self.cpl() != 0 {
                return Err(CpuError::Runtime(format!(
                    "IRET with VM=1 at CPL {}",
                    self.cpl()
                )));
            }
            self.set_flags(flags);
            requested_pl = 3;
        }

        if requested_pl > self.cpl() {
            // Return to outer privilege level: pop SS:SP before the
            // privilege change takes effect
            let op_size = self.current.operand_size;
            let sp = self.pop(bus, op_size)?;
            let ss = self.pop(bus, op_size)? as u16;
            if self.vm86() {
                let es = self.pop(bus, op_size)? as u16;
                self.load_sreg(bus, SReg::Es, es)?;
                let ds = self.pop(bus, op_size)? as u16;
                self.load_sreg(bus, SReg::Ds, ds)?;
                let fs = self.pop(bus, op_size)? as u16;
                self.load_sreg(bus, SReg::Fs, fs)?;
                let gs = self.pop(bus, op_size)? as u16;
                self.load_sreg(bus, SReg::Gs, gs)?;
                self.state.sdesc[SReg::Cs.index()] =
                    crate::descriptor::SegmentDescriptor::real_mode_code(cs);
                self.state.sdesc[SReg::Cs.index()].set_dpl(requested_pl);
                self.state.sregs[SReg::Cs.index()] = cs;
                self.state.ip = ip;
                self.state.prefetch.flush(ip);
            } else {
                self.set_flags(flags);
                self.do_control_transfer(bus, cs, ip, TransferKind::Iret)?;
            }
            self.state.regs[REG_SP] = sp;
            self.load_sreg(bus, SReg::Ss, ss)?;

            if self.vm86() {
                return Ok(());
            }

            self.clear_all_sregs();
            Ok(())
        } else {
            self.set_flags(flags);
            self.do_control_transfer(bus, cs, ip, TransferKind::Iret)
        }
    }

    /// RETF, optionally releasing `bytes_to_pop` of parameters.
    pub(crate) fn do_far_return(
        &mut self,
        bus: &mut SystemBus,
        bytes_to_pop: u16,
    ) -> Result<(), CpuError> {
        let ip = self.read_stack(bus, 0)?;
        let cs = self.read_stack(bus, 1)? as u16;
        self.check_ip_limit(bus, cs, ip)?;
        self.update_sp(2);
        if self.protected_mode() && !self.vm86() && (cs & SEL_RPL) as u8 > self.cpl() {
            // Outer-level return: the parameters sit below the outer
            // SS:SP image
            add_reg_sp(self, i64::from(bytes_to_pop));
        }
        match self.do_control_transfer(bus, cs, ip, TransferKind::Retf) {
            Err(e @ CpuError::Exception(_)) => {
                // Undo the return-address pop so the fault handler sees
                // the original stack
                self.update_sp(-2);
                Err(e)
            }
            other => {
                other?;
                add_reg_sp(self, i64::from(bytes_to_pop));
                Ok(())
            }
        }
    }

    /// Dispatch an interrupt or exception through the IVT/IDT.
    pub(crate) fn do_interrupt(
        &mut self,
        bus: &mut SystemBus,
        vector: u8,
        origin: InterruptOrigin,
        error_code: u32,
    ) -> Result<(), CpuError> {
        if self.instructions_executed > 0 {
            let idx = ((self.instructions_executed - 1) % MAX_HISTORY as u64) as usize;
            if let Some(entry) = self.history.get_mut(idx) {
                entry.exception = Some(InterruptEvent { vector, origin });
            }
        }

        if self.protected_mode() {
            if i64::from(vector) * 8 - 1 > i64::from(self.state.idt.limit) {
                return Err(self.gp(
                    0,
                    &format!("interrupt {vector} over IDT limit {}", self.state.idt.limit),
                ));
            }
            let desc_addr = self.state.idt.base + 8 * u64::from(vector);
            let desc = self.read_descriptor_value(bus, desc_addr)?;
            let offset = (desc & 0xFFFF) | (desc >> 48) << 16;
            let selector = (desc >> 16) as u16;
            let gate_flags = ((desc >> 40) & 0xFF) as u8;
            let ty = gate_flags & ACCESS_TYPE;
            let dpl = (gate_flags >> 5) & 3;

            match ty {
                SD_TYPE_TASK_GATE => {
                    return Err(CpuError::Runtime(format!(
                        "interrupt {vector:#04X} through a task gate not implemented"
                    )))
                }
                SD_TYPE_TRAP16 | SD_TYPE_TRAP32 | SD_TYPE_INT16 | SD_TYPE_INT32 => {}
                _ => {
                    return Err(self.gp(
                        u32::from(vector) * 8,
                        &format!(
                            "interrupt {vector:#04X} through unsupported gate type {}",
                            SD_TYPE_NAMES[ty as usize]
                        ),
                    ))
                }
            }

            if gate_flags & 0x80 == 0 {
                // Should raise #NP
                return Err(CpuError::Runtime(format!(
                    "interrupt {vector:#04X} gate not present in IDT"
                )));
            }

            if origin == InterruptOrigin::Software && dpl < self.cpl() {
                return Err(self.gp(
                    u32::from(vector) * 8,
                    &format!("interrupt {vector:#04X} not allowed from CPL {}", self.cpl()),
                ));
            }

            let gate32 = ty & 8 != 0;
            let old_if = self.state.flags & IF;
            self.do_control_transfer(
                bus,
                selector,
                offset,
                if gate32 {
                    TransferKind::Int32
                } else {
                    TransferKind::Int16
                },
            )?;
            if origin == InterruptOrigin::Cpu && ERROR_CODE_MASK & (1 << u32::from(vector)) != 0 {
                self.push(bus, u64::from(error_code), if gate32 { 4 } else { 2 })?;
            }
            if ty & 1 != 0 {
                // Trap gates keep interrupts enabled
                self.state.flags |= old_if;
            }
            Ok(())
        } else {
            if i64::from(vector) * 4 - 1 > i64::from(self.state.idt.limit) {
                return Err(self.gp(
                    0,
                    &format!("interrupt {vector} over IVT limit {}", self.state.idt.limit),
                ));
            }
            let addr = self.read_mem_physical(bus, u64::from(vector) << 2, 4)?;
            self.do_control_transfer(bus, (addr >> 16) as u16, addr & 0xFFFF, TransferKind::Int16)
        }
    }

    /// Check the TSS I/O permission bitmap for an `IN`/`OUT`/`INS`/`OUTS`
    /// access when CPL or VM86 requires it.
    pub(crate) fn check_io_access(
        &mut self,
        bus: &mut SystemBus,
        port: u16,
        size: u8,
    ) -> Result<(), CpuError> {
        if !self.protected_mode() || (self.cpl() <= self.iopl() && !self.vm86()) {
            return Ok(());
        }
        if self.state.task.system_type() != SD_TYPE_TASK32_BUSY {
            return Err(CpuError::Runtime(format!(
                "invalid TSS {} for I/O permission check",
                self.state.task
            )));
        }

        let tss = self.tss_address((TSS32_IOPB_OFFSET + 2) as u32)?;
        let iopb_offset = self.read_mem_linear(bus, tss + TSS32_IOPB_OFFSET, 2, PL_SYS)?;
        let last_byte = (u32::from(port) + u32::from(size) - 1) / 8;
        if iopb_offset + u64::from(last_byte) >= u64::from(self.state.task.limit) {
            return Err(self.gp(
                0,
                &format!(
                    "{} port={port:02X} denied: IOPB offset {iopb_offset:X} outside TSS limit",
                    self.current.mnemonic
                ),
            ));
        }
        let permissions = (self
            .read_mem_linear(bus, tss + iopb_offset + u64::from(port / 8), 2, PL_SYS)?
            >> (port & 7)) as u16;
        if permissions & (1 << (size - 1)) != 0 {
            return Err(self.gp(
                0,
                &format!(
                    "{} port={port:02X} denied by I/O permission bitmap",
                    self.current.mnemonic
                ),
            ));
        }
        Ok(())
    }
}

fn add_reg_sp(cpu: &mut Cpu, delta: i64) {
    let size = cpu.state.stack_size();
    crate::cpu::add_reg(&mut cpu.state.regs[REG_SP], delta, size);
}
