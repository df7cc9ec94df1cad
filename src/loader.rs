// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable loading: path search, X-file relocation, R-file flat load
//! and PSP construction.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::exception::Fault;
use crate::human68k::{
    CallError, DosError, ExecType, PathName, PSP_BSS_PTR, PSP_CMDLINE, PSP_ENV_PTR, PSP_EXEFILE_NAME,
    PSP_EXEFILE_PATH, PSP_HEAP_PTR, PSP_PARENT_SR, PSP_PARENT_SSP, PSP_STACK_PTR, SIZEOF_MEMBLK,
    SIZEOF_PSP,
};
use crate::Emulator;

/// Size of the X-format executable header.
pub const XHEAD_SIZE: u32 = 0x40;
/// Magic word 'HU' opening an X-format header.
const XHEAD_MAGIC: u16 = 0x4855;

/// What the loader places in memory.
#[derive(Clone, Copy, Debug)]
pub struct LoadedProgram {
    /// Initial PC.
    pub entry: u32,
    /// Code + data + bss.
    pub prog_size: u32,
    /// Code + data only; the PSP heap pointer starts here.
    pub prog_size2: u32,
}

/// Code and bss sizes handed to [`Emulator::build_psp`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ProgramSpec {
    pub code_size: u32,
    pub bss_size: u32,
}

fn try_open(path: &Path) -> Option<(File, PathBuf)> {
    match File::open(path) {
        Ok(f) if f.metadata().map(|m| m.is_file()).unwrap_or(false) => {
            Some((f, path.to_path_buf()))
        }
        _ => None,
    }
}

fn open_with_extensions(base: &Path, has_ext: bool) -> Option<(File, PathBuf)> {
    if has_ext {
        return try_open(base);
    }
    if let Some(found) = try_open(base) {
        return Some(found);
    }
    let mut name = base.as_os_str().to_owned();
    name.push(".r");
    if let Some(found) = try_open(Path::new(&name)) {
        return Some(found);
    }
    let mut name = base.as_os_str().to_owned();
    name.push(".x");
    try_open(Path::new(&name))
}

/// Opens an executable, searching the current directory and then the host
/// `PATH`, completing a missing `.r`/`.x` extension.
pub fn find_executable(name: &str) -> Result<(File, PathBuf), DosError> {
    let has_separator = name.contains(['/', '\\', ':']);
    let without_drive = match name.as_bytes() {
        [d, b':', ..] if d.is_ascii_alphabetic() => &name[2..],
        _ => name,
    };
    let normalized = without_drive.replace('\\', "/");
    let has_ext = matches!(
        Path::new(&normalized).extension().and_then(|e| e.to_str()),
        Some(e) if e.eq_ignore_ascii_case("r") || e.eq_ignore_ascii_case("x")
    );

    if has_separator {
        // Only extension completion, no path search.
        return open_with_extensions(Path::new(&normalized), has_ext).ok_or(DosError::NoEntry);
    }

    if let Ok(cwd) = std::env::current_dir() {
        if let Some(found) = open_with_extensions(&cwd.join(&normalized), has_ext) {
            return Ok(found);
        }
    }

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            if dir.as_os_str().is_empty() {
                continue;
            }
            if let Some(found) = open_with_extensions(&dir.join(&normalized), has_ext) {
                return Ok(found);
            }
        }
    }

    Err(DosError::NoEntry)
}

fn xhead_long(xhead: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([xhead[offset], xhead[offset + 1], xhead[offset + 2], xhead[offset + 3]])
}

impl Emulator {
    /// Reads the program into `[read_top, limit)` and converts it
    /// according to its format.
    pub(crate) fn load_program_image(
        &mut self,
        file: &mut File,
        fname: &str,
        read_top: u32,
        limit: u32,
        exec_type: ExecType,
    ) -> Result<LoadedProgram, CallError> {
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).map_err(|_| DosError::IllegalFormat)?;
        if contents.is_empty() {
            return Err(DosError::IllegalFormat.into());
        }
        let file_size = contents.len() as u32;
        if read_top.wrapping_add(file_size) > limit {
            return Err(DosError::NoMemory.into());
        }

        let x_file = file_size >= XHEAD_SIZE
            && u16::from_be_bytes([contents[0], contents[1]]) == XHEAD_MAGIC
            && match exec_type {
                ExecType::R => false,
                ExecType::X => true,
                ExecType::Default | ExecType::Z => {
                    let lower = fname.to_ascii_lowercase();
                    lower.ends_with(".x")
                }
            };

        let (xhead, image): (&[u8], &[u8]) = if x_file {
            contents.split_at(XHEAD_SIZE as usize)
        } else {
            (&[], &contents[..])
        };

        let span = self
            .mem
            .writable(read_top, image.len() as u32, true)
            .ok_or(Fault::bus_write(read_top))?;
        if span.len() < image.len() {
            return Err(DosError::NoMemory.into());
        }
        span[..image.len()].copy_from_slice(image);

        if !x_file {
            return Ok(LoadedProgram { entry: read_top, prog_size: file_size, prog_size2: file_size });
        }

        if xhead_long(xhead, 0x3C) != 0 {
            // Bound library files are not supported.
            return Err(DosError::IllegalFormat.into());
        }
        let pc_begin = xhead_long(xhead, 0x08);
        let code_size = xhead_long(xhead, 0x0C);
        let data_size = xhead_long(xhead, 0x10);
        let bss_size = xhead_long(xhead, 0x14);
        let reloc_size = xhead_long(xhead, 0x18);
        let text_and_data = code_size.wrapping_add(data_size);

        if reloc_size != 0 {
            self.relocate(read_top, text_and_data, reloc_size)?;
        }

        let bss_top = read_top + text_and_data;
        if limit < bss_top.wrapping_add(bss_size) {
            return Err(DosError::NoMemory.into());
        }
        self.mem.clear_super(bss_top, bss_size);

        Ok(LoadedProgram {
            entry: read_top + pc_begin,
            prog_size: text_and_data + bss_size,
            prog_size2: text_and_data,
        })
    }

    /// Applies the X-format relocation table found after code + data.
    ///
    /// Each word entry advances the relocation pointer; the value 1
    /// escapes to a longword displacement in the following two words. An
    /// odd displacement relocates a word, an even one a longword.
    fn relocate(&mut self, read_top: u32, text_and_data: u32, reloc_size: u32) -> Result<(), Fault> {
        let mut reloc_adr = read_top + text_and_data;
        let mut rest = reloc_size as i64;
        let mut prog_adr = read_top;

        while rest > 0 {
            let mut disp = self.mem.read_u16_super(reloc_adr)? as u32;
            reloc_adr += 2;
            rest -= 2;

            if disp == 1 {
                disp = self.mem.read_u32_super(reloc_adr)?;
                reloc_adr += 4;
                rest -= 4;
            }

            if disp & 1 != 0 {
                prog_adr = prog_adr.wrapping_add(disp & !1);
                let value = self.mem.read_u16_super(prog_adr)?.wrapping_add(read_top as u16);
                self.mem.write_u16_super(prog_adr, value)?;
            } else {
                prog_adr = prog_adr.wrapping_add(disp);
                let value = self.mem.read_u32_super(prog_adr)?.wrapping_add(read_top);
                self.mem.write_u32_super(prog_adr, value)?;
            }
        }
        Ok(())
    }

    /// Fills in the PSP; the memory block header must already exist.
    pub(crate) fn build_psp(
        &mut self,
        psp: u32,
        envptr: u32,
        cmdline: u32,
        parent_sr: u16,
        parent_ssp: u32,
        spec: ProgramSpec,
        pathname: &PathName,
    ) -> Result<(), Fault> {
        self.mem.clear_super(psp + SIZEOF_MEMBLK, SIZEOF_PSP - SIZEOF_MEMBLK);

        let path = self
            .host
            .utf8_to_sjis(&pathname.path)
            .unwrap_or_else(|| pathname.path.as_bytes().to_vec());
        let name = self
            .host
            .utf8_to_sjis(&pathname.name)
            .unwrap_or_else(|| pathname.name.as_bytes().to_vec());
        self.mem.write_string_super(psp + PSP_EXEFILE_PATH, &path)?;
        self.mem.write_string_super(psp + PSP_EXEFILE_NAME, &name)?;

        self.mem.write_u32_super(psp + PSP_ENV_PTR, envptr)?;
        self.mem.write_u32_super(psp + PSP_CMDLINE, cmdline)?;
        let bss_top = psp + SIZEOF_PSP + spec.code_size;
        self.mem.write_u32_super(psp + PSP_BSS_PTR, bss_top)?;
        self.mem.write_u32_super(psp + PSP_HEAP_PTR, bss_top)?;
        self.mem.write_u32_super(psp + PSP_STACK_PTR, bss_top + spec.bss_size)?;

        self.mem.write_u32_super(psp + PSP_PARENT_SSP, parent_ssp)?;
        self.mem.write_u16_super(psp + PSP_PARENT_SR, parent_sr)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::test_machine;

    /// Builds a minimal X-format executable with one word relocation.
    fn x_executable(code: &[u8], reloc: &[u8], bss: u32) -> Vec<u8> {
        let mut image = vec![0u8; XHEAD_SIZE as usize];
        image[0] = 0x48;
        image[1] = 0x55;
        image[8..12].copy_from_slice(&0u32.to_be_bytes()); // entry offset
        image[12..16].copy_from_slice(&(code.len() as u32).to_be_bytes());
        image[16..20].copy_from_slice(&0u32.to_be_bytes()); // data
        image[20..24].copy_from_slice(&bss.to_be_bytes());
        image[24..28].copy_from_slice(&(reloc.len() as u32).to_be_bytes());
        image.extend_from_slice(code);
        image.extend_from_slice(reloc);
        image
    }

    #[test]
    fn r_format_loads_verbatim() {
        let mut emu = test_machine();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, &[0x4E, 0x71, 0x4E, 0x75]).unwrap();
        let mut file = f.reopen().unwrap();

        let loaded = emu
            .load_program_image(&mut file, "prog.r", 0x30000, 0x40000, ExecType::Default)
            .unwrap();
        assert_eq!(loaded.entry, 0x30000);
        assert_eq!(loaded.prog_size, 4);
        assert_eq!(loaded.prog_size2, 4);
        assert_eq!(emu.mem.read_u16_super(0x30000).unwrap(), 0x4E71);
    }

    #[test]
    fn x_format_relocates_longwords_and_words() {
        let mut emu = test_machine();
        // Code: a longword slot then a word slot.
        let code = [0x00, 0x00, 0x00, 0x10, 0x00, 0x20];
        // Relocate offset 0 (long), then advance 4 with the odd bit for a
        // word relocation.
        let reloc = [0x00, 0x00, 0x00, 0x05];
        let image = x_executable(&code, &reloc, 8);

        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, &image).unwrap();
        let mut file = f.reopen().unwrap();

        let base = 0x30000;
        let loaded = emu
            .load_program_image(&mut file, "prog.x", base, 0x40000, ExecType::X)
            .unwrap();
        assert_eq!(loaded.entry, base);
        assert_eq!(loaded.prog_size2, 6);
        assert_eq!(loaded.prog_size, 6 + 8);
        assert_eq!(emu.mem.read_u32_super(base).unwrap(), base + 0x10);
        assert_eq!(emu.mem.read_u16_super(base + 4).unwrap(), 0x20 + base as u16);
        // BSS is zero-filled.
        assert_eq!(emu.mem.read_u32_super(base + 6).unwrap(), 0);
    }

    #[test]
    fn bound_executables_are_rejected() {
        let mut emu = test_machine();
        let mut image = x_executable(&[0x4E, 0x75], &[], 0);
        image[0x3C..0x40].copy_from_slice(&4u32.to_be_bytes());

        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, &image).unwrap();
        let mut file = f.reopen().unwrap();

        let err = emu
            .load_program_image(&mut file, "prog.x", 0x30000, 0x40000, ExecType::X)
            .unwrap_err();
        assert_eq!(err, DosError::IllegalFormat.into());
    }
}
