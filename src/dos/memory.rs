// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The memory block allocator: DOS _MALLOC and friends.
//!
//! Allocations are 16-byte headers linked in a doubly linked list rooted
//! at the OS work area; the allocator walks the chain looking at the gap
//! after each block. On failure D0 carries `0x81xxxxxx` with the largest
//! gap found, or `0x82000000` when not even a header fits.

use crate::exception::Fault;
use crate::human68k::{
    DosError, DosResult, MallocMode, MALLOC3_NOMEM, MALLOC_MASK, MALLOC_NOMEM, MALLOC_NOMEM2,
    MEMBLK_ALIGN, MEMBLK_END, MEMBLK_NEXT, MEMBLK_PARENT, MEMBLK_PREV, OSWORK_MEMORY_END,
    OSWORK_ROOT_PSP, SIZEOF_MEMBLK,
};
use crate::memory::HIMEM_START;
use crate::Emulator;

const MALLOC_MAX_SIZE: u32 = 0x00FF_FFF0;
const MALLOC3_MAX_SIZE: u32 = 0x7FFF_FFF0;

/// Which part of the address space DOS _MALLOC may place blocks in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AllocArea {
    #[default]
    MainOnly,
    HighOnly,
    Unlimited,
}

fn align_memblk(adr: u32) -> u32 {
    (adr + (MEMBLK_ALIGN - 1)) & !(MEMBLK_ALIGN - 1)
}

fn align_memblk_down(adr: u32) -> u32 {
    adr & !(MEMBLK_ALIGN - 1)
}

fn request_size(size: u32, max: u32) -> u32 {
    if size > max {
        // A query for the largest size: ask for something unsatisfiable.
        u32::MAX
    } else {
        size + SIZEOF_MEMBLK
    }
}

impl Emulator {
    pub(crate) fn set_alloc_area(&mut self, area: AllocArea) {
        self.alloc_area = area;
    }

    fn is_allocatable(&self, adr: u32) -> bool {
        match self.alloc_area {
            AllocArea::MainOnly => adr < HIMEM_START,
            AllocArea::HighOnly => adr >= HIMEM_START,
            AllocArea::Unlimited => true,
        }
    }

    /// Writes an MCB header and links it between its neighbours.
    pub(crate) fn build_memory_block(
        &mut self,
        adr: u32,
        prev: u32,
        parent: u32,
        end: u32,
        next: u32,
    ) -> Result<(), Fault> {
        self.mem.write_u32_super(adr + MEMBLK_PREV, prev)?;
        self.mem.write_u32_super(adr + MEMBLK_PARENT, parent)?;
        self.mem.write_u32_super(adr + MEMBLK_END, end)?;
        self.mem.write_u32_super(adr + MEMBLK_NEXT, next)?;

        if prev != 0 {
            self.mem.write_u32_super(prev + MEMBLK_NEXT, adr)?;
        }
        if next != 0 {
            self.mem.write_u32_super(next + MEMBLK_PREV, adr)?;
        }
        Ok(())
    }

    /// Finds a gap for `size_with_header` bytes. On success returns the
    /// payload address; on failure 0, with the largest usable gap in the
    /// second slot.
    fn try_malloc(
        &mut self,
        mode: MallocMode,
        size_with_header: u32,
        parent: u32,
    ) -> Result<(u32, u32), Fault> {
        let memory_end = self.mem.read_u32_super(OSWORK_MEMORY_END)?;
        let mut max_gap = 0u32;
        let mut min_capacity = u32::MAX;
        let mut candidate: Option<(u32, u32, u32)> = None; // (prev, newblk, next)

        let mut memblk = self.mem.read_u32_super(OSWORK_ROOT_PSP)?;
        while memblk != 0 {
            let next = self.mem.read_u32_super(memblk + MEMBLK_NEXT)?;
            let newblk = align_memblk(self.mem.read_u32_super(memblk + MEMBLK_END)?);

            if self.is_allocatable(newblk) {
                let limit = if next != 0 { next } else { memory_end };
                let capacity = limit.saturating_sub(newblk);

                if capacity < size_with_header {
                    if capacity > max_gap {
                        max_gap = capacity;
                    }
                } else {
                    match mode {
                        MallocMode::FromLower => {
                            candidate = Some((memblk, newblk, next));
                            break;
                        }
                        MallocMode::FromSmallest => {
                            if capacity < min_capacity {
                                min_capacity = capacity;
                                candidate = Some((memblk, newblk, next));
                            }
                        }
                        MallocMode::FromHigher => {
                            candidate = Some((memblk, newblk, next));
                        }
                    }
                }
            }

            memblk = next;
        }

        let (prev, mut newblk, next) = match candidate {
            Some(c) => c,
            None => return Ok((0, max_gap)),
        };

        if mode == MallocMode::FromHigher {
            // The new block goes to the high end of the winning gap.
            let limit = if next != 0 { next } else { memory_end };
            newblk = align_memblk_down(limit - size_with_header);
        }

        self.build_memory_block(newblk, prev, parent, newblk + size_with_header, next)?;
        Ok((newblk + SIZEOF_MEMBLK, 0))
    }

    /// DOS _MALLOC / _MALLOC2 common path; the returned value goes to D0.
    pub(crate) fn malloc(&mut self, mode: MallocMode, size: u32, parent: u32) -> Result<u32, Fault> {
        let (adr, max_gap) = self.try_malloc(mode, request_size(size, MALLOC_MAX_SIZE), parent)?;
        if adr != 0 {
            return Ok(adr);
        }

        if max_gap <= SIZEOF_MEMBLK {
            return Ok(MALLOC_NOMEM2);
        }
        let n = (max_gap - SIZEOF_MEMBLK).min(MALLOC_MAX_SIZE);
        Ok(MALLOC_NOMEM | n)
    }

    /// DOS _MALLOC3 / _MALLOC4 common path (2 GiB ceiling, different error
    /// overlay).
    pub(crate) fn malloc_huge(&mut self, mode: MallocMode, size: u32, parent: u32) -> Result<u32, Fault> {
        let (adr, max_gap) = self.try_malloc(mode, request_size(size, MALLOC3_MAX_SIZE), parent)?;
        if adr != 0 {
            return Ok(adr);
        }

        let n = max_gap.saturating_sub(SIZEOF_MEMBLK);
        Ok(MALLOC3_NOMEM | n)
    }

    /// Allocates the largest block available.
    pub(crate) fn malloc_all(&mut self, parent: u32) -> Result<(u32, u32), Fault> {
        let size = self.malloc(MallocMode::FromLower, u32::MAX, parent)? & MALLOC_MASK;
        let adr = self.malloc(MallocMode::FromLower, size, parent)?;
        Ok((adr, size))
    }

    /// Checks that `memblk` is on the chain and returns its next pointer.
    fn valid_memblk(&self, memblk: u32) -> Result<Option<u32>, Fault> {
        let mut m = self.mem.read_u32_super(OSWORK_ROOT_PSP)?;
        loop {
            let next = self.mem.read_u32_super(m + MEMBLK_NEXT)?;
            if m == memblk {
                return Ok(Some(next));
            }
            if next == 0 {
                return Ok(None);
            }
            m = next;
        }
    }

    /// DOS _MFREE. Address 0 releases everything the current process owns.
    pub(crate) fn mfree(&mut self, adr: u32) -> DosResult {
        if adr == 0 {
            self.mfree_all(self.current_psp())?;
            return Ok(0);
        }

        let memblk = adr.wrapping_sub(SIZEOF_MEMBLK);
        if self.valid_memblk(memblk)?.is_none() {
            return Err(DosError::IllegalMemblk.into());
        }

        let prev = self.mem.read_u32_super(memblk + MEMBLK_PREV)?;
        if prev == 0 {
            // The root block is Human68k itself.
            return Err(DosError::IllegalMemblk.into());
        }

        let next = self.mem.read_u32_super(memblk + MEMBLK_NEXT)?;
        self.mem.write_u32_super(prev + MEMBLK_NEXT, next)?;
        if next != 0 {
            self.mem.write_u32_super(next + MEMBLK_PREV, prev)?;
        }
        Ok(0)
    }

    /// Unlinks every block owned by `psp`, cascading into blocks owned by
    /// the just-freed blocks.
    pub(crate) fn mfree_all(&mut self, psp: u32) -> Result<(), Fault> {
        let mut m = self.mem.read_u32_super(OSWORK_ROOT_PSP)?;
        loop {
            let next = self.mem.read_u32_super(m + MEMBLK_NEXT)?;

            if self.mem.read_u32_super(m + MEMBLK_PARENT)? == psp {
                let prev = self.mem.read_u32_super(m + MEMBLK_PREV)?;
                if prev == 0 {
                    return Ok(());
                }
                self.mem.write_u32_super(prev + MEMBLK_NEXT, next)?;
                if next != 0 {
                    self.mem.write_u32_super(next + MEMBLK_PREV, prev)?;
                }
                self.mfree_all(m)?;
            }

            if next == 0 {
                return Ok(());
            }
            m = next;
        }
    }

    /// DOS _SETBLOCK: resizes a block in place; the D0 value follows the
    /// same overlay scheme as _MALLOC.
    pub(crate) fn setblock(&mut self, adr: u32, size: u32) -> Result<u32, Fault> {
        let size_with_header = request_size(size, MALLOC_MAX_SIZE);
        let memblk = adr.wrapping_sub(SIZEOF_MEMBLK);
        let next = match self.valid_memblk(memblk)? {
            Some(next) => next,
            None => return Ok(DosError::IllegalMemblk.code() as u32),
        };

        let limit = if next != 0 { next } else { self.mem.read_u32_super(OSWORK_MEMORY_END)? };
        let max_size = limit.saturating_sub(memblk);

        if max_size < size_with_header {
            if max_size <= SIZEOF_MEMBLK {
                return Ok(MALLOC_NOMEM2);
            }
            let n = (max_size - SIZEOF_MEMBLK).min(MALLOC_MAX_SIZE);
            return Ok(MALLOC_NOMEM | n);
        }

        self.mem.write_u32_super(memblk + MEMBLK_END, adr + size)?;
        Ok(0)
    }

    /// DOS _SETBLOCK2, with the _MALLOC3 error overlay.
    pub(crate) fn setblock_huge(&mut self, adr: u32, size: u32) -> Result<u32, Fault> {
        let size_with_header = request_size(size, MALLOC3_MAX_SIZE);
        let memblk = adr.wrapping_sub(SIZEOF_MEMBLK);
        let next = match self.valid_memblk(memblk)? {
            Some(next) => next,
            None => return Ok(DosError::IllegalMemblk.code() as u32),
        };

        let limit = if next != 0 { next } else { self.mem.read_u32_super(OSWORK_MEMORY_END)? };
        let max_size = limit.saturating_sub(memblk);

        if max_size < size_with_header {
            return Ok(MALLOC3_NOMEM | max_size.saturating_sub(SIZEOF_MEMBLK));
        }

        self.mem.write_u32_super(memblk + MEMBLK_END, adr + size)?;
        Ok(0)
    }

    // DOS call adapters.

    pub(super) fn dos_malloc(&mut self) -> DosResult {
        let mut p = self.a[7];
        let len = self.read_param_long(&mut p)?;
        Ok(self.malloc(MallocMode::FromLower, len, self.current_psp())? as i32)
    }

    pub(super) fn dos_malloc2(&mut self) -> DosResult {
        let mut p = self.a[7];
        let mode = self.read_param_word(&mut p)?;
        let len = self.read_param_long(&mut p)?;
        let parent = if mode & 0x8000 != 0 {
            self.read_param_long(&mut p)?
        } else {
            self.current_psp()
        };
        let mode = MallocMode::from_byte(mode as u8).ok_or(DosError::IllegalParam)?;
        Ok(self.malloc(mode, len, parent)? as i32)
    }

    pub(super) fn dos_malloc3(&mut self) -> DosResult {
        let mut p = self.a[7];
        let len = self.read_param_long(&mut p)?;
        Ok(self.malloc_huge(MallocMode::FromLower, len, self.current_psp())? as i32)
    }

    pub(super) fn dos_malloc4(&mut self) -> DosResult {
        let mut p = self.a[7];
        let mode = self.read_param_word(&mut p)?;
        let len = self.read_param_long(&mut p)?;
        let parent = if mode & 0x8000 != 0 {
            self.read_param_long(&mut p)?
        } else {
            self.current_psp()
        };
        let mode = MallocMode::from_byte(mode as u8).ok_or(DosError::IllegalParam)?;
        Ok(self.malloc_huge(mode, len, parent)? as i32)
    }

    pub(super) fn dos_mfree(&mut self) -> DosResult {
        let mut p = self.a[7];
        let adr = self.read_param_long(&mut p)?;
        self.mfree(adr)
    }

    pub(super) fn dos_setblock(&mut self) -> DosResult {
        let mut p = self.a[7];
        let adr = self.read_param_long(&mut p)?;
        let len = self.read_param_long(&mut p)?;
        Ok(self.setblock(adr, len)? as i32)
    }

    pub(super) fn dos_setblock2(&mut self) -> DosResult {
        let mut p = self.a[7];
        let adr = self.read_param_long(&mut p)?;
        let len = self.read_param_long(&mut p)?;
        Ok(self.setblock_huge(adr, len)? as i32)
    }
}
