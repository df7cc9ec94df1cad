// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Guest address space.
//!
//! A flat main memory with a supervisor-only prefix, plus optional high
//! memory at [`HIMEM_START`]. Everything else is un-backed and faults.
//! All multi-byte accesses are big-endian regardless of the host.

use crate::exception::Fault;
use crate::utils::{peek_l, peek_w, poke_l, poke_w};

/// The 24-bit address mask of the plain MC68000 configuration.
pub const ADDRESS_MASK: u32 = 0x00FF_FFFF;
/// Start of the high memory area (and one past the 24-bit space).
pub const HIMEM_START: u32 = 0x0100_0000;

enum Region {
    /// No memory backs the first byte of the request.
    None,
    /// Byte range into the main memory array, clamped to what is mapped.
    Main(usize, usize),
    /// Byte range into the high memory array, clamped to what is mapped.
    High(usize, usize),
}

/// The guest address space.
pub struct AddressSpace {
    main: Vec<u8>,
    high: Vec<u8>,
    /// `[0, supervisor_end)` of main memory is supervisor-only.
    pub supervisor_end: u32,
}

impl AddressSpace {
    pub fn new(main_size: u32, high_size: u32) -> Self {
        Self {
            main: vec![0; main_size as usize],
            high: vec![0; high_size as usize],
            supervisor_end: 0,
        }
    }

    /// One past the last main memory address; equals the capacity.
    pub fn main_end(&self) -> u32 {
        self.main.len() as u32
    }

    /// One past the last high memory address, or 0 when none is fitted.
    pub fn high_end(&self) -> u32 {
        if self.high.is_empty() {
            0
        } else {
            HIMEM_START + self.high.len() as u32
        }
    }

    pub fn has_high_memory(&self) -> bool {
        !self.high.is_empty()
    }

    /// Converts a logical address to a physical one.
    ///
    /// Without high memory the space is the plain 24-bit one and the top
    /// byte is ignored (the OS personality stores vector numbers there).
    pub fn to_physical(&self, adr: u32) -> u32 {
        if self.high.is_empty() {
            adr & ADDRESS_MASK
        } else {
            adr
        }
    }

    fn resolve(&self, adr: u32, len: u32, superv: bool) -> Region {
        let adr = self.to_physical(adr);

        let end = self.main_end();
        if adr < end {
            if !superv && adr < self.supervisor_end {
                return Region::None;
            }
            let max = end - adr;
            let avail = if len == 0 || max < len { max } else { len };
            return Region::Main(adr as usize, avail as usize);
        }

        // Between main memory and HIMEM_START lives the hardware the
        // emulator does not model (GVRAM, I/O ports, ROM).
        if adr < HIMEM_START {
            return Region::None;
        }

        let end = self.high_end();
        if adr < end {
            let max = end - adr;
            let avail = if len == 0 || max < len { max } else { len };
            return Region::High((adr - HIMEM_START) as usize, avail as usize);
        }

        Region::None
    }

    /// Returns the readable bytes starting at `adr`.
    ///
    /// The slice is shorter than `len` when the range crosses an unmapped
    /// boundary and empty-handed (`None`) when the first byte is already
    /// unreachable. `len == 0` asks for everything reachable from `adr`.
    pub fn readable(&self, adr: u32, len: u32, superv: bool) -> Option<&[u8]> {
        match self.resolve(adr, len, superv) {
            Region::None => None,
            Region::Main(start, avail) => Some(&self.main[start..start + avail]),
            Region::High(start, avail) => Some(&self.high[start..start + avail]),
        }
    }

    /// Writable counterpart of [`Self::readable`].
    pub fn writable(&mut self, adr: u32, len: u32, superv: bool) -> Option<&mut [u8]> {
        match self.resolve(adr, len, superv) {
            Region::None => None,
            Region::Main(start, avail) => Some(&mut self.main[start..start + avail]),
            Region::High(start, avail) => Some(&mut self.high[start..start + avail]),
        }
    }

    fn read(&self, adr: u32, len: u32, superv: bool) -> Result<&[u8], Fault> {
        let len = len as usize;
        match self.resolve(adr, len as u32, superv) {
            Region::Main(start, avail) if avail >= len => Ok(&self.main[start..start + len]),
            Region::High(start, avail) if avail >= len => Ok(&self.high[start..start + len]),
            Region::Main(_, avail) | Region::High(_, avail) => {
                Err(Fault::bus_read(adr + avail as u32))
            }
            Region::None => Err(Fault::bus_read(adr)),
        }
    }

    fn write_buf(&mut self, adr: u32, len: u32, superv: bool) -> Result<&mut [u8], Fault> {
        let len = len as usize;
        match self.resolve(adr, len as u32, superv) {
            Region::Main(start, avail) if avail >= len => Ok(&mut self.main[start..start + len]),
            Region::High(start, avail) if avail >= len => Ok(&mut self.high[start..start + len]),
            Region::Main(_, avail) | Region::High(_, avail) => {
                Err(Fault::bus_write(adr + avail as u32))
            }
            Region::None => Err(Fault::bus_write(adr)),
        }
    }

    pub fn read_u8(&self, adr: u32, superv: bool) -> Result<u8, Fault> {
        Ok(self.read(adr, 1, superv)?[0])
    }

    pub fn read_u16(&self, adr: u32, superv: bool) -> Result<u16, Fault> {
        Ok(peek_w(self.read(adr, 2, superv)?))
    }

    pub fn read_u32(&self, adr: u32, superv: bool) -> Result<u32, Fault> {
        Ok(peek_l(self.read(adr, 4, superv)?))
    }

    pub fn write_u8(&mut self, adr: u32, n: u8, superv: bool) -> Result<(), Fault> {
        self.write_buf(adr, 1, superv)?[0] = n;
        Ok(())
    }

    pub fn write_u16(&mut self, adr: u32, n: u16, superv: bool) -> Result<(), Fault> {
        poke_w(self.write_buf(adr, 2, superv)?, n);
        Ok(())
    }

    pub fn write_u32(&mut self, adr: u32, n: u32, superv: bool) -> Result<(), Fault> {
        poke_l(self.write_buf(adr, 4, superv)?, n);
        Ok(())
    }

    pub fn read_u8_super(&self, adr: u32) -> Result<u8, Fault> {
        self.read_u8(adr, true)
    }

    pub fn read_u16_super(&self, adr: u32) -> Result<u16, Fault> {
        self.read_u16(adr, true)
    }

    pub fn read_u32_super(&self, adr: u32) -> Result<u32, Fault> {
        self.read_u32(adr, true)
    }

    pub fn write_u8_super(&mut self, adr: u32, n: u8) -> Result<(), Fault> {
        self.write_u8(adr, n, true)
    }

    pub fn write_u16_super(&mut self, adr: u32, n: u16) -> Result<(), Fault> {
        self.write_u16(adr, n, true)
    }

    pub fn write_u32_super(&mut self, adr: u32, n: u32) -> Result<(), Fault> {
        self.write_u32(adr, n, true)
    }

    /// Reads the NUL-terminated string at `adr` (terminator excluded).
    ///
    /// Faults with a bus error at the first inaccessible byte when the
    /// string runs off the mapped memory without a terminator.
    pub fn read_string_super(&self, adr: u32) -> Result<&[u8], Fault> {
        let buf = self.readable(adr, 0, true).unwrap_or(&[]);
        match buf.iter().position(|&b| b == 0) {
            Some(nul) => Ok(&buf[..nul]),
            None => Err(Fault::bus_read(adr + buf.len() as u32)),
        }
    }

    /// Writes `s` plus a NUL terminator at `adr`.
    ///
    /// Bytes up to the first inaccessible address are written before the
    /// bus error is reported, like the hardware would.
    pub fn write_string_super(&mut self, adr: u32, s: &[u8]) -> Result<(), Fault> {
        let len = s.len() + 1;
        let buf = self.writable(adr, len as u32, true).unwrap_or(&mut []);
        let avail = buf.len();
        if avail >= len {
            buf[..s.len()].copy_from_slice(s);
            buf[s.len()] = 0;
            return Ok(());
        }
        buf.copy_from_slice(&s[..avail]);
        Err(Fault::bus_write(adr + avail as u32))
    }

    /// Zero-fills `[adr, adr + len)`; stops silently at an unmapped boundary.
    pub fn clear_super(&mut self, adr: u32, len: u32) {
        if let Some(buf) = self.writable(adr, len, true) {
            buf.fill(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> AddressSpace {
        let mut mem = AddressSpace::new(0x10000, 0);
        mem.supervisor_end = 0x2000;
        mem
    }

    #[test]
    fn big_endian_access() {
        let mut mem = space();
        mem.write_u32_super(0x3000, 0x1234_5678).unwrap();
        assert_eq!(mem.read_u8_super(0x3000).unwrap(), 0x12);
        assert_eq!(mem.read_u16_super(0x3002).unwrap(), 0x5678);
        assert_eq!(mem.read_u32_super(0x3000).unwrap(), 0x1234_5678);
    }

    #[test]
    fn supervisor_area_enforced() {
        let mem = space();
        assert!(mem.read_u16(0x1000, false).is_err());
        assert!(mem.read_u16(0x1000, true).is_ok());
        assert!(mem.readable(0x1000, 2, false).is_none());
    }

    #[test]
    fn short_span_at_memory_end() {
        let mem = space();
        let buf = mem.readable(0xFFFE, 8, true).unwrap();
        assert_eq!(buf.len(), 2);
        assert!(mem.readable(0x10000, 1, true).is_none());
    }

    #[test]
    fn bus_error_reports_first_inaccessible_byte() {
        // A word read at the top of the 24-bit space names the faulting
        // address itself, not the rounded-up boundary.
        let mem = AddressSpace::new(12 * 1024 * 1024, 0);
        match mem.read_u16_super(0x00FF_FFFF) {
            Err(Fault::Bus { adr, write }) => {
                assert_eq!(adr, 0x00FF_FFFF);
                assert!(!write);
            }
            other => panic!("expected bus error, got {other:?}"),
        }
        // A straddling access names the first byte past the mapped range.
        match mem.read_u32_super(12 * 1024 * 1024 - 2) {
            Err(Fault::Bus { adr, .. }) => assert_eq!(adr, 12 * 1024 * 1024),
            other => panic!("expected bus error, got {other:?}"),
        }
    }

    #[test]
    fn top_byte_ignored_without_high_memory() {
        let mut mem = space();
        mem.write_u16_super(0x3000, 0xBEEF).unwrap();
        assert_eq!(mem.read_u16_super(0x2000_3000).unwrap(), 0xBEEF);
    }

    #[test]
    fn high_memory_is_user_accessible() {
        let mut mem = AddressSpace::new(0x10000, 0x10000);
        mem.supervisor_end = 0x2000;
        mem.write_u32(HIMEM_START + 8, 0xCAFE_BABE, false).unwrap();
        assert_eq!(mem.read_u32(HIMEM_START + 8, false).unwrap(), 0xCAFE_BABE);
        assert!(mem.read_u8(HIMEM_START - 1, true).is_err());
        assert_eq!(mem.high_end(), HIMEM_START + 0x10000);
    }

    #[test]
    fn string_read_needs_terminator() {
        let mut mem = space();
        mem.write_string_super(0x4000, b"hello").unwrap();
        assert_eq!(mem.read_string_super(0x4000).unwrap(), b"hello");

        // Fill the tail of memory with non-zero bytes: no terminator.
        for adr in 0xFF00..0x10000u32 {
            mem.write_u8_super(adr, 0xAA).unwrap();
        }
        match mem.read_string_super(0xFF00) {
            Err(Fault::Bus { adr, .. }) => assert_eq!(adr, 0x10000),
            other => panic!("expected bus error, got {other:?}"),
        }
    }
}
