//! Segment descriptors and descriptor tables.
//!
//! A [`SegmentDescriptor`] keeps both the raw 8-byte encoding and the
//! unpacked cache fields (base, limit, access, flags) the way the CPU's
//! hidden descriptor cache does. Gate descriptors reuse `raw` through
//! accessor methods instead of a second decoded form, since the field
//! layout only matters for the few gate types.

pub(crate) const ACCESS_BIT_DPL: u8 = 5;

pub(crate) const ACCESS_RW: u8 = 1 << 1; // Readable (code) / writable (data)
pub(crate) const ACCESS_DC: u8 = 1 << 2; // Direction / conforming
pub(crate) const ACCESS_E: u8 = 1 << 3; // Executable
pub(crate) const ACCESS_S: u8 = 1 << 4; // 0 = system, 1 = code/data
pub(crate) const ACCESS_DPL: u8 = 3 << ACCESS_BIT_DPL;
pub(crate) const ACCESS_P: u8 = 1 << 7; // Present

pub(crate) const ACCESS_TYPE: u8 = 0xF; // System descriptor type field

pub(crate) const SD_TYPE_TASK16_AVAILABLE: u8 = 0x1;
pub(crate) const SD_TYPE_LDT: u8 = 0x2;
pub(crate) const SD_TYPE_TASK16_BUSY: u8 = 0x3;
pub(crate) const SD_TYPE_CALL16: u8 = 0x4;
pub(crate) const SD_TYPE_TASK_GATE: u8 = 0x5;
pub(crate) const SD_TYPE_INT16: u8 = 0x6;
pub(crate) const SD_TYPE_TRAP16: u8 = 0x7;
pub(crate) const SD_TYPE_TASK32_AVAILABLE: u8 = 0x9;
pub(crate) const SD_TYPE_TASK32_BUSY: u8 = 0xB;
pub(crate) const SD_TYPE_CALL32: u8 = 0xC;
pub(crate) const SD_TYPE_INT32: u8 = 0xE;
pub(crate) const SD_TYPE_TRAP32: u8 = 0xF;

/// Available → busy TSS types differ in this bit.
pub(crate) const SD_TYPE_TSS_BUSY_BIT: u8 = 0x2;

pub(crate) const FLAGS_DB: u8 = 1 << 2; // D/B: 0 = 16-bit, 1 = 32-bit
pub(crate) const FLAGS_G: u8 = 1 << 3; // Granularity: limit in 4K blocks

/// Selector low bits: requested privilege level and table indicator.
pub(crate) const SEL_RPL: u16 = 3;
pub(crate) const SEL_TI: u16 = 4;

pub(crate) const SD_TYPE_NAMES: [&str; 16] = [
    "Reserved0",
    "TSS16 (available)",
    "LDT",
    "TSS16 (busy)",
    "Call gate 16",
    "Task gate",
    "Interrupt gate 16",
    "Trap gate 16",
    "Reserved8",
    "TSS32 (available)",
    "ReservedA",
    "TSS32 (busy)",
    "Call gate 32",
    "ReservedD",
    "Interrupt gate 32",
    "Trap gate 32",
];

/// GDT or IDT location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorTable {
    pub limit: u16,
    pub base: u64,
}

/// An unpacked 8-byte descriptor plus its raw encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub raw: u64,
    pub limit: u32,
    pub base: u64,
    pub flags: u8,
    pub access: u8,
}

impl SegmentDescriptor {
    /// Unpack a raw descriptor. The granularity flag expands the limit
    /// from 4K blocks.
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        let mut limit = (raw & 0xFFFF) as u32 | (((raw >> 48) & 0xF) as u32) << 16;
        let base = (raw >> 16) & 0xFF_FFFF | (raw >> 56) << 24;
        let access = (raw >> 40) as u8;
        let flags = ((raw >> 52) & 0xF) as u8;
        if flags & FLAGS_G != 0 {
            limit = limit << 12 | 0xFFF;
        }
        Self {
            raw,
            limit,
            base,
            flags,
            access,
        }
    }

    /// Pack cache fields back into the raw 8-byte form.
    #[must_use]
    pub const fn to_raw(limit: u32, base: u64, access: u8, flags: u8) -> u64 {
        (limit & 0xFFFF) as u64
            | (((limit >> 20) & 0xF) as u64) << 48
            | (base & 0xFF_FFFF) << 16
            | (base >> 24) << 56
            | (access as u64) << 40
            | (flags as u64) << 52
    }

    /// The descriptor cache contents for a real-mode code segment load.
    #[must_use]
    pub fn real_mode_code(selector: u16) -> Self {
        Self::from_raw(Self::to_raw(
            0xFFFF,
            u64::from(selector) << 4,
            ACCESS_S | ACCESS_E | ACCESS_RW | ACCESS_P,
            0,
        ))
    }

    /// The descriptor cache contents for a real-mode data segment load.
    #[must_use]
    pub fn real_mode_data(selector: u16) -> Self {
        Self::from_raw(Self::to_raw(
            0xFFFF,
            u64::from(selector) << 4,
            ACCESS_S | ACCESS_RW | ACCESS_P,
            0,
        ))
    }

    #[must_use]
    pub const fn dpl(&self) -> u8 {
        (self.access & ACCESS_DPL) >> ACCESS_BIT_DPL
    }

    pub(crate) fn set_dpl(&mut self, dpl: u8) {
        self.access = (self.access & !ACCESS_DPL) | (dpl << ACCESS_BIT_DPL);
    }

    #[must_use]
    pub const fn present(&self) -> bool {
        self.access & ACCESS_P != 0
    }

    #[must_use]
    pub const fn is_code_segment(&self) -> bool {
        self.access & (ACCESS_S | ACCESS_E) == ACCESS_S | ACCESS_E
    }

    #[must_use]
    pub const fn is_conforming_code_segment(&self) -> bool {
        self.access & (ACCESS_S | ACCESS_E | ACCESS_DC) == ACCESS_S | ACCESS_E | ACCESS_DC
    }

    #[must_use]
    pub(crate) const fn system_type(&self) -> u8 {
        self.access & ACCESS_TYPE
    }

    // === Call-gate views over the raw encoding ===

    #[must_use]
    pub(crate) const fn gate_selector(&self) -> u16 {
        (self.raw >> 16) as u16
    }

    #[must_use]
    pub(crate) const fn gate_offset(&self) -> u32 {
        (self.raw & 0xFFFF) as u32 | ((self.raw >> 48) as u32) << 16
    }

    #[must_use]
    pub(crate) const fn gate_param_count(&self) -> u8 {
        ((self.raw >> 32) & 0xF) as u8
    }
}

impl std::fmt::Display for SegmentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "base={:08X} limit={:08X} access={:02X} flags={:X}",
            self.base, self.limit, self.access, self.flags
        )?;
        if self.access & ACCESS_S == 0 {
            write!(f, " ({})", SD_TYPE_NAMES[self.system_type() as usize])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trips_through_the_cache_fields() {
        let raw = SegmentDescriptor::to_raw(0xF_FFFF, 0x0012_3456, 0x9A, FLAGS_G | FLAGS_DB);
        let d = SegmentDescriptor::from_raw(raw);
        assert_eq!(d.base, 0x0012_3456);
        // Granularity: limit in 4K blocks
        assert_eq!(d.limit, 0xFFFF_FFFF);
        assert_eq!(d.access, 0x9A);
        assert!(d.present());
        assert!(d.is_code_segment());
        assert!(!d.is_conforming_code_segment());
        assert_eq!(d.dpl(), 0);
    }

    #[test]
    fn real_mode_descriptors_shift_the_selector() {
        let d = SegmentDescriptor::real_mode_code(0xF000);
        assert_eq!(d.base, 0xF0000);
        assert_eq!(d.limit, 0xFFFF);
        assert!(d.is_code_segment());
        let d = SegmentDescriptor::real_mode_data(0x1234);
        assert_eq!(d.base, 0x12340);
        assert!(!d.is_code_segment());
    }

    #[test]
    fn call_gate_fields_come_from_the_raw_encoding() {
        // Gate: offset 0x1234_5678, selector 0x0008, 3 params, present DPL 3
        let raw = 0x5678u64 | 0x0008u64 << 16 | 0x3u64 << 32 | 0xECu64 << 40 | 0x1234u64 << 48;
        let d = SegmentDescriptor::from_raw(raw);
        assert_eq!(d.system_type(), SD_TYPE_CALL32);
        assert_eq!(d.gate_selector(), 0x0008);
        assert_eq!(d.gate_offset(), 0x1234_5678);
        assert_eq!(d.gate_param_count(), 3);
        assert_eq!(d.dpl(), 3);
    }
}
