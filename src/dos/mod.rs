// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DOS call dispatch.
//!
//! An F-line opcode `$FFxx` lands here with the call number in the low
//! byte. Call numbers $80..$AF are the version-agnostic aliases of
//! $50..$7F and fold onto the same handlers. Arguments live on the guest
//! stack at A7; results go to D0 as a value or a negative DOS error code.

pub mod file;
pub mod memory;
pub mod misc;
pub mod process;
pub mod trace;

use crate::exception::Fault;
use crate::human68k::{CallError, DosError, DosResult, STDOUT_FILENO};
use crate::interpreter::Control;
use crate::Emulator;

impl Emulator {
    /// Reads a stacked word argument and advances the cursor.
    pub(crate) fn read_param_word(&self, p: &mut u32) -> Result<u16, Fault> {
        let v = self.mem.read_u16_super(*p)?;
        *p += 2;
        Ok(v)
    }

    /// Reads a stacked longword argument and advances the cursor.
    pub(crate) fn read_param_long(&self, p: &mut u32) -> Result<u32, Fault> {
        let v = self.mem.read_u32_super(*p)?;
        *p += 4;
        Ok(v)
    }

    /// Executes one DOS call.
    pub(crate) fn dos_call(&mut self, code: u8) -> Result<Control, Fault> {
        let code = if (0x80..=0xAF).contains(&code) { code - 0x30 } else { code };

        if self.settings.trace_func {
            self.print_dos_trace(code)?;
        }

        // Calls that rewrite the control flow themselves.
        match code {
            0x00 | 0x4C => return self.dos_exit(code),
            0x31 => return self.dos_keeppr(),
            0x4B => return self.dos_exec(),
            0xF6 => return self.dos_super_jsr().map(|()| Control::Continue),
            _ => {}
        }

        let result = self.dos_call_value(code)?;
        match result {
            Some(Ok(v)) => self.d[0] = v as u32,
            Some(Err(CallError::Dos(e))) => self.d[0] = e.code() as u32,
            Some(Err(CallError::Fault(f))) => return Err(f),
            // Unknown calls leave D0 alone, like the real dispatcher stub.
            None => log::debug!("unimplemented DOS call $FF{code:02X}"),
        }
        Ok(Control::Continue)
    }

    /// The plain value-returning calls.
    fn dos_call_value(&mut self, code: u8) -> Result<Option<DosResult>, Fault> {
        let r = match code {
            0x01 => self.dos_getchar(),
            0x02 => self.dos_putchar(),
            0x06 => self.dos_kbhit(),
            0x07 | 0x08 => Ok(self.host.read_char() as i32),
            0x09 => self.dos_print(),
            0x0A | 0x1A => self.dos_gets(),
            0x0B => Ok(0),  // KEYSNS: no key waiting
            0x0C => self.dos_kflush(),
            0x0D => Ok(0),  // FFLUSH
            0x0E => self.dos_chgdrv(),
            0x0F => Ok(0),  // DRVCTRL
            0x10 => Ok(-1), // CONSNS: console ready
            0x11 => Ok(-1), // PRNSNS
            0x12 => Ok(0),  // CINSNS
            0x13 => Ok(-1), // COUTSNS
            0x19 => Ok(0),  // CURDRV: drive A
            0x1B => self.dos_fgetc(),
            0x1C => self.dos_fgets(),
            0x1D => self.dos_fputc(),
            0x1E => self.dos_fputs(),
            0x1F => self.dos_allclose(),
            0x20 => self.dos_super(),
            0x21 => self.dos_fnckey(),
            0x23 => self.dos_conctrl(),
            0x24 => Ok(0), // KEYCTRL
            0x25 => self.dos_intvcs(),
            0x27 => self.dos_gettim2(),
            0x28 => self.dos_settim2(),
            0x29 => self.dos_namests(),
            0x2A => self.dos_getdate(),
            0x2B => self.dos_setdate(),
            0x2C => self.dos_gettime(),
            0x2D => self.dos_settime(),
            0x30 => self.dos_vernum(),
            0x32 => Ok(DosError::IllegalDrive.code()), // GETDPB
            0x33 => Ok(0),                             // BREAKCK
            0x34 => Ok(DosError::IllegalFunc.code()),  // DRVXCHG
            0x35 => self.dos_intvcg(),
            0x36 => self.dos_dskfre(),
            0x37 => self.dos_nameck(),
            0x39 => self.dos_mkdir(),
            0x3A => self.dos_rmdir(),
            0x3B => self.dos_chdir(),
            0x3C => self.dos_create(),
            0x3D => self.dos_open(),
            0x3E => self.dos_close(),
            0x3F => self.dos_read(),
            0x40 => self.dos_write(),
            0x41 => self.dos_delete(),
            0x42 => self.dos_seek(),
            0x43 => self.dos_chmod(),
            0x44 => self.dos_ioctrl(),
            0x45 => self.dos_dup(),
            0x46 => self.dos_dup2(),
            0x47 => self.dos_curdir(),
            0x48 => self.dos_malloc(),
            0x49 => self.dos_mfree(),
            0x4A => self.dos_setblock(),
            // FILES/NFILES: legacy directory enumeration, not emulated.
            0x4E | 0x4F => Ok(DosError::IllegalFunc.code()),
            0x51 => self.dos_getpdb(),
            0x53 => self.dos_getenv(),
            0x54 => Ok(1), // VERIFYG
            0x56 => self.dos_rename(),
            0x57 => self.dos_filedate(),
            0x58 => self.dos_malloc2(),
            0x5A => self.dos_maketmp(),
            0x5B => self.dos_newfile(),
            0x5F => self.dos_assign(),
            0x60 => self.dos_malloc3(),
            0x61 => self.dos_setblock2(),
            0x62 => self.dos_malloc4(),
            0x7C => self.dos_getfcb(),
            0xF7 => self.dos_bus_err(),
            _ => return Ok(None),
        };
        Ok(Some(r))
    }

    /// Writes bytes to a guest file handle's host end.
    pub(crate) fn write_to_handle(&mut self, fileno: usize, bytes: &[u8]) -> DosResult {
        let iothrough = self.settings.iothrough;
        let entry = match self.files.get_mut(fileno) {
            Some(entry) if entry.is_opened => entry,
            _ => return Err(DosError::BadFileno.into()),
        };
        let host_file = entry.host.as_mut().ok_or(DosError::BadFileno)?;
        let n = self.host.write_file(host_file, bytes, iothrough)?;
        Ok(n as i32)
    }

    /// Prints to the guest's standard output handle.
    pub(crate) fn console_print(&mut self, bytes: &[u8]) -> DosResult {
        self.write_to_handle(STDOUT_FILENO, bytes)
    }

    fn dos_getchar(&mut self) -> DosResult {
        Ok(self.host.read_char() as i32)
    }

    fn dos_putchar(&mut self) -> DosResult {
        let mut p = self.a[7];
        let code = self.read_param_word(&mut p)?;
        if code >= 0x100 {
            self.console_print(&[(code >> 8) as u8, code as u8])?;
        } else {
            self.console_print(&[code as u8])?;
        }
        Ok(0)
    }

    fn dos_kbhit(&mut self) -> DosResult {
        let mut p = self.a[7];
        let mode = self.read_param_word(&mut p)? & 0xFF;
        if mode >= 0xFE {
            // Sense/peek: report no key rather than blocking.
            Ok(0)
        } else {
            self.console_print(&[mode as u8])?;
            Ok(0)
        }
    }

    fn dos_print(&mut self) -> DosResult {
        let mut p = self.a[7];
        let mesptr = self.read_param_long(&mut p)?;
        let text = self.mem.read_string_super(mesptr)?.to_vec();
        self.console_print(&text)?;
        Ok(0)
    }

    /// DOS _GETS: buffer starts with the capacity byte; the length goes to
    /// the second byte and the text after it.
    fn dos_gets(&mut self) -> DosResult {
        self.dos_gets_at(self.a[7])
    }

    fn dos_kflush(&mut self) -> DosResult {
        let mut p = self.a[7];
        let mode = self.read_param_word(&mut p)?;
        match mode {
            0x01 | 0x07 | 0x08 => Ok(self.host.read_char() as i32),
            0x0A => self.dos_gets_at(p),
            _ => Ok(0),
        }
    }

    /// The GETS sub-form of KFLUSH: the buffer pointer follows the mode.
    fn dos_gets_at(&mut self, mut p: u32) -> DosResult {
        let buffer = self.read_param_long(&mut p)?;
        let max = self.mem.read_u8_super(buffer)? as usize;
        let mut line = self.host.read_line();
        line.truncate(max);
        self.mem.write_u8_super(buffer + 1, line.len() as u8)?;
        let mut adr = buffer + 2;
        for &b in &line {
            self.mem.write_u8_super(adr, b)?;
            adr += 1;
        }
        self.mem.write_u8_super(adr, 0)?;
        Ok(line.len() as i32)
    }

    fn dos_chgdrv(&mut self) -> DosResult {
        let mut p = self.a[7];
        let drive = self.read_param_word(&mut p)?;
        if drive != 0 {
            return Err(DosError::IllegalDrive.into());
        }
        // One virtual drive.
        Ok(1)
    }

    /// DOS _SUPER: 0 enters supervisor mode returning the old stack
    /// pointer, anything else restores it and drops back to user mode.
    fn dos_super(&mut self) -> DosResult {
        let mut p = self.a[7];
        let stack = self.read_param_long(&mut p)?;
        if stack == 0 {
            if self.sr.s {
                return Err(DosError::IllegalFunc.into());
            }
            let old = self.a[7] as i32;
            self.sr.s = true;
            Ok(old)
        } else {
            self.a[7] = stack;
            self.sr.s = false;
            Ok(0)
        }
    }

    /// DOS _SUPER_JSR: calls the routine in supervisor mode; the matching
    /// RTS drops back to user mode at the recorded return address.
    fn dos_super_jsr(&mut self) -> Result<(), Fault> {
        let mut p = self.a[7];
        let target = self.read_param_long(&mut p)?;
        self.a[7] = self.a[7].wrapping_sub(4);
        self.mem.write_u32_super(self.a[7], self.pc)?;
        if !self.sr.s {
            self.superjsr_ret = self.pc;
            self.sr.s = true;
        }
        self.pc = target;
        Ok(())
    }

    fn dos_fnckey(&mut self) -> DosResult {
        let mut p = self.a[7];
        let _mode = self.read_param_word(&mut p)?;
        let buffer = self.read_param_long(&mut p)?;
        // No function key settings: hand back an empty definition.
        for i in 0..32 {
            self.mem.write_u8_super(buffer + i, 0)?;
        }
        Ok(0)
    }

    fn dos_conctrl(&mut self) -> DosResult {
        let mut p = self.a[7];
        let mode = self.read_param_word(&mut p)?;
        match mode {
            0 => {
                let code = self.read_param_word(&mut p)?;
                if code >= 0x100 {
                    self.console_print(&[(code >> 8) as u8, code as u8])?;
                } else {
                    self.console_print(&[code as u8])?;
                }
            }
            1 => {
                let mesptr = self.read_param_long(&mut p)?;
                let text = self.mem.read_string_super(mesptr)?.to_vec();
                self.console_print(&text)?;
            }
            2 => {
                let atr = self.read_param_word(&mut p)?;
                let seq = text_color_sequence(atr);
                self.console_print(seq.as_bytes())?;
                return Ok(3);
            }
            3 => {
                let x = self.read_param_word(&mut p)?.wrapping_add(1);
                let y = self.read_param_word(&mut p)?.wrapping_add(1);
                self.console_print(format!("\x1B[{y};{x}H").as_bytes())?;
            }
            4 => {
                self.console_print(b"\x1B[s\n\x1B[u\x1B[1B")?;
            }
            5 => {
                self.console_print(b"\x1B[1A")?;
            }
            6..=9 => {
                let n = self.read_param_word(&mut p)?.max(1);
                let dir = [b'A', b'B', b'C', b'D'][(mode - 6) as usize] as char;
                self.console_print(format!("\x1B[{n}{dir}").as_bytes())?;
            }
            10 => {
                let _mod = self.read_param_word(&mut p)?;
                self.console_print(b"\x1B[2J")?;
            }
            11 => {
                let _mod = self.read_param_word(&mut p)?;
                self.console_print(b"\x1B[K")?;
            }
            17 => {
                self.console_print(b"\x1B[>5l")?;
            }
            18 => {
                self.console_print(b"\x1B[>5h")?;
            }
            _ => {}
        }
        Ok(0)
    }
}

/// ANSI color sequence for the Human68k text attribute.
pub(crate) fn text_color_sequence(atr: u16) -> &'static str {
    match atr & 0x0F {
        0 => "\x1B[0;30m",
        1 => "\x1B[0;36m",
        2 => "\x1B[0;33m",
        3 => "\x1B[0;37m",
        4 => "\x1B[0;1;30m",
        5 => "\x1B[0;1;36m",
        6 => "\x1B[0;1;33m",
        7 => "\x1B[0;1;37m",
        8 => "\x1B[0;30;40m",
        9 => "\x1B[0;30;46m",
        10 => "\x1B[0;30;43m",
        11 => "\x1B[0;30;47m",
        12 => "\x1B[0;30;1;40m",
        13 => "\x1B[0;30;1;46m",
        14 => "\x1B[0;30;1;43m",
        _ => "\x1B[0;30;1;47m",
    }
}
