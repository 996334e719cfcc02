//! Memory and I/O handler traits plus the stock RAM/ROM handlers.
//!
//! A handler only has to implement the byte accessors; the wider widths
//! default to little-endian composition so simple devices stay simple.
//! `addr` is the absolute (already masked) address, `offset` is relative
//! to the handler's registered base. Handlers must tolerate unaligned
//! offsets.

/// A memory-mapped device or RAM/ROM region.
pub trait MemoryHandler {
    fn read_u8(&mut self, addr: u64, offset: u64) -> u8;

    /// Debugger read: must not change device state.
    fn peek_u8(&mut self, addr: u64, offset: u64) -> u8 {
        self.read_u8(addr, offset)
    }

    fn read_u16(&mut self, addr: u64, offset: u64) -> u16 {
        u16::from(self.read_u8(addr, offset))
            | u16::from(self.read_u8(addr + 1, offset + 1)) << 8
    }

    fn read_u32(&mut self, addr: u64, offset: u64) -> u32 {
        u32::from(self.read_u16(addr, offset))
            | u32::from(self.read_u16(addr + 2, offset + 2)) << 16
    }

    fn read_u64(&mut self, addr: u64, offset: u64) -> u64 {
        u64::from(self.read_u32(addr, offset))
            | u64::from(self.read_u32(addr + 4, offset + 4)) << 32
    }

    fn write_u8(&mut self, addr: u64, offset: u64, value: u8);

    fn write_u16(&mut self, addr: u64, offset: u64, value: u16) {
        self.write_u8(addr, offset, value as u8);
        self.write_u8(addr + 1, offset + 1, (value >> 8) as u8);
    }

    fn write_u32(&mut self, addr: u64, offset: u64, value: u32) {
        self.write_u16(addr, offset, value as u16);
        self.write_u16(addr + 2, offset + 2, (value >> 16) as u16);
    }
}

/// A port-mapped device. `offset` is relative to the registered base port.
///
/// Wider accesses default to composition from adjacent ports, matching how
/// a 16-bit OUT to an 8-bit device pair behaves on the ISA bus.
pub trait IoHandler {
    fn in_u8(&mut self, port: u16, offset: u16) -> u8;

    fn in_u16(&mut self, port: u16, offset: u16) -> u16 {
        u16::from(self.in_u8(port, offset))
            | u16::from(self.in_u8(port + 1, offset + 1)) << 8
    }

    fn in_u32(&mut self, port: u16, offset: u16) -> u32 {
        u32::from(self.in_u16(port, offset))
            | u32::from(self.in_u16(port + 2, offset + 2)) << 16
    }

    fn out_u8(&mut self, port: u16, offset: u16, value: u8);

    fn out_u16(&mut self, port: u16, offset: u16, value: u16) {
        self.out_u8(port, offset, value as u8);
        self.out_u8(port + 1, offset + 1, (value >> 8) as u8);
    }

    fn out_u32(&mut self, port: u16, offset: u16, value: u32) {
        self.out_u16(port, offset, value as u16);
        self.out_u16(port + 2, offset + 2, (value >> 16) as u16);
    }
}

/// Plain byte-addressable RAM.
pub struct Ram {
    data: Vec<u8>,
}

impl Ram {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    #[must_use]
    pub fn from_data(data: Vec<u8>) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl MemoryHandler for Ram {
    fn read_u8(&mut self, _addr: u64, offset: u64) -> u8 {
        self.data[offset as usize]
    }

    fn read_u16(&mut self, _addr: u64, offset: u64) -> u16 {
        let o = offset as usize;
        u16::from_le_bytes([self.data[o], self.data[o + 1]])
    }

    fn read_u32(&mut self, _addr: u64, offset: u64) -> u32 {
        let o = offset as usize;
        u32::from_le_bytes([
            self.data[o],
            self.data[o + 1],
            self.data[o + 2],
            self.data[o + 3],
        ])
    }

    fn write_u8(&mut self, _addr: u64, offset: u64, value: u8) {
        self.data[offset as usize] = value;
    }
}

/// Read-only memory. Writes are ignored (the IBM PC XT BIOS pushes with
/// SS=F000, so a write to ROM must not be fatal).
pub struct Rom {
    data: Vec<u8>,
}

impl Rom {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl MemoryHandler for Rom {
    fn read_u8(&mut self, _addr: u64, offset: u64) -> u8 {
        self.data[offset as usize]
    }

    fn read_u16(&mut self, _addr: u64, offset: u64) -> u16 {
        let o = offset as usize;
        u16::from_le_bytes([self.data[o], self.data[o + 1]])
    }

    fn write_u8(&mut self, addr: u64, _offset: u64, value: u8) {
        #[cfg(debug_assertions)]
        eprintln!("Write to ROM addr {addr:X} value {value:02X}");
        let _ = (addr, value);
    }
}

/// A hole in the address space: reads float high, writes vanish.
pub struct Unmapped;

impl MemoryHandler for Unmapped {
    fn read_u8(&mut self, _addr: u64, _offset: u64) -> u8 {
        0xFF
    }

    fn write_u8(&mut self, _addr: u64, _offset: u64, _value: u8) {}
}
