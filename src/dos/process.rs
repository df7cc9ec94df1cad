// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process control: DOS _EXEC, _EXIT, _EXIT2 and _KEEPPR.

use crate::exception::Fault;
use crate::human68k::{
    CallError, DosError, ExecType, PathName, MEMBLK_END, NEST_MAX, PSP_ENV_PTR, PSP_PARENT_SR,
    SIZEOF_MEMBLK, SIZEOF_PSP,
};
use crate::interpreter::Control;
use crate::loader::{find_executable, ProgramSpec};
use crate::Emulator;

impl Emulator {
    /// DOS _EXIT ($FF00) and _EXIT2 ($FF4C).
    pub(super) fn dos_exit(&mut self, code: u8) -> Result<Control, Fault> {
        let exit_code = if code == 0x4C {
            let mut p = self.a[7];
            self.read_param_word(&mut p)?
        } else {
            0
        };

        self.release_process()?;

        if self.nest_cnt == 0 {
            self.d[0] = exit_code as u32;
            return Ok(Control::Exit);
        }

        let psp = self.current_psp();
        let sr = self.mem.read_u16_super(psp + PSP_PARENT_SR)?;
        self.sr = crate::StatusRegister::from(sr);
        if let Err(CallError::Fault(f)) = self.mfree(psp + SIZEOF_MEMBLK) {
            return Err(f);
        }
        self.return_to_parent(exit_code as u32)?;
        Ok(Control::Continue)
    }

    /// DOS _KEEPPR ($FF31): exit leaving the resident part allocated.
    pub(super) fn dos_keeppr(&mut self) -> Result<Control, Fault> {
        let mut p = self.a[7];
        let resident_len = self.read_param_long(&mut p)?;
        let exit_code = self.read_param_word(&mut p)?;

        self.release_process()?;

        if self.nest_cnt == 0 {
            self.d[0] = exit_code as u32;
            return Ok(Control::Exit);
        }

        let psp = self.current_psp();
        self.setblock(psp + SIZEOF_MEMBLK, resident_len + SIZEOF_PSP - SIZEOF_MEMBLK)?;
        // Mark the block as belonging to a resident process.
        self.mem.write_u8_super(psp + 0x04, 0xFF)?;
        let sr = self.mem.read_u16_super(psp + PSP_PARENT_SR)?;
        self.sr = crate::StatusRegister::from(sr);
        self.return_to_parent(exit_code as u32)?;
        Ok(Control::Continue)
    }

    /// Frees this process's allocations and closes its files.
    fn release_process(&mut self) -> Result<(), Fault> {
        if let Err(CallError::Fault(f)) = self.mfree(0) {
            return Err(f);
        }
        self.close_files(Some(self.nest_cnt));
        Ok(())
    }

    fn return_to_parent(&mut self, d0: u32) -> Result<(), Fault> {
        self.nest_cnt -= 1;
        self.pc = self.nest_pc[self.nest_cnt];
        self.a[7] = self.nest_sp[self.nest_cnt];
        self.d[0] = d0;
        Ok(())
    }

    /// DOS _EXEC ($FF4B), modes 0 to 4.
    pub(super) fn dos_exec(&mut self) -> Result<Control, Fault> {
        let mut p = self.a[7];
        let mode = self.read_param_word(&mut p)?;
        let nm = self.read_param_long(&mut p)?;
        let (cmd, env) = if mode < 4 {
            (self.read_param_long(&mut p)?, self.read_param_long(&mut p)?)
        } else {
            (0, 0)
        };

        let result = match mode {
            0 | 1 => self.exec_load(nm, cmd, env, mode == 0),
            2 => self.exec_path_check(nm, cmd),
            3 => self.exec_raw_load(nm, cmd, env),
            4 => {
                self.exec_call(nm);
                return Ok(Control::Continue);
            }
            _ => return Err(Fault::Abort("DOSCALL EXECのモード5が実行されました")),
        };

        match result {
            // Mode 0 transferred control: D0 stays what the child sees.
            Ok(None) => {}
            Ok(Some(v)) => self.d[0] = v as u32,
            Err(CallError::Dos(e)) => self.d[0] = e.code() as u32,
            Err(CallError::Fault(f)) => return Err(f),
        }
        Ok(Control::Continue)
    }

    /// EXEC modes 0 and 1: load the child; mode 0 transfers control.
    fn exec_load(&mut self, nm: u32, cmd: u32, env: u32, run: bool) -> Result<Option<i32>, CallError> {
        let loadmode = nm >> 24 & 3;
        let name = self.guest_path(nm & 0x00FF_FFFF)?;
        let (mut file, found) = find_executable(&name)?;

        if self.nest_cnt + 1 >= NEST_MAX {
            return Err(DosError::NoMemory.into());
        }

        let (payload, _) = self.malloc_all(self.current_psp())?;
        if payload >= 0x8000_0000 {
            return Err(DosError::NoMemory.into());
        }
        let child_psp = payload - SIZEOF_MEMBLK;
        let end_adr = self.mem.read_u32_super(child_psp + MEMBLK_END)?;

        let found_str = found.to_string_lossy().into_owned();
        let loaded = match self.load_program_image(
            &mut file,
            &found_str,
            child_psp + SIZEOF_PSP,
            end_adr,
            ExecType::from_loadmode(loadmode),
        ) {
            Ok(loaded) => loaded,
            Err(e) => {
                self.mfree(payload)?;
                return Err(e);
            }
        };

        let pathname = self
            .host
            .canonical_path_name(&found_str)
            .unwrap_or_else(|| PathName {
                path: "A:\\".into(),
                name: "PROG.X".into(),
                name_len: 4,
                ext_len: 2,
            });

        self.nest_pc[self.nest_cnt] = self.pc;
        self.nest_sp[self.nest_cnt] = self.a[7];

        let envptr = if env == 0 {
            self.mem.read_u32_super(self.current_psp() + PSP_ENV_PTR)?
        } else {
            env
        };

        self.a[0] = child_psp;
        self.a[1] = child_psp + SIZEOF_PSP + loaded.prog_size;
        self.a[2] = cmd;
        self.a[3] = envptr;
        self.a[4] = loaded.entry;

        self.nest_cnt += 1;
        self.psp[self.nest_cnt] = child_psp;

        let spec = ProgramSpec {
            code_size: loaded.prog_size2,
            bss_size: loaded.prog_size - loaded.prog_size2,
        };
        self.build_psp(child_psp, envptr, cmd, self.sr.word(), self.a[7], spec, &pathname)?;

        if run {
            self.pc = loaded.entry;
            Ok(None)
        } else {
            self.nest_cnt -= 1;
            Ok(Some(loaded.entry as i32))
        }
    }

    /// EXEC mode 2: split the command line and check the file exists.
    fn exec_path_check(&mut self, nm: u32, cmd: u32) -> Result<Option<i32>, CallError> {
        let raw = self.mem.read_string_super(nm)?.to_vec();
        let split = raw.iter().position(|&b| b == b' ');

        if let Some(space) = split {
            let rest = &raw[space + 1..];
            let mut record = Vec::with_capacity(rest.len() + 1);
            record.push(rest.len() as u8);
            record.extend_from_slice(rest);
            let mut adr = cmd;
            for b in record {
                self.mem.write_u8_super(adr, b)?;
                adr += 1;
            }
            self.mem.write_u8_super(adr, 0)?;
            // Terminate the name at the first space.
            self.mem.write_u8_super(nm + space as u32, 0)?;
        }

        let name = self.guest_path(nm)?;
        let _ = find_executable(&name);
        Ok(Some(0))
    }

    /// EXEC mode 3: raw load at a caller-supplied address, no PSP.
    fn exec_raw_load(&mut self, nm: u32, adr1: u32, adr2: u32) -> Result<Option<i32>, CallError> {
        let loadmode = nm >> 24 & 3;
        let name = self.guest_path(nm & 0x00FF_FFFF)?;
        let (mut file, found) = find_executable(&name)?;
        let found_str = found.to_string_lossy().into_owned();

        let loaded = self.load_program_image(
            &mut file,
            &found_str,
            adr1 & 0x00FF_FFFF,
            adr2 & 0x00FF_FFFF,
            ExecType::from_loadmode(loadmode),
        )?;
        Ok(Some(loaded.prog_size as i32))
    }

    /// EXEC mode 4: call a loaded image at the given address.
    fn exec_call(&mut self, adr: u32) {
        self.nest_pc[self.nest_cnt] = self.pc;
        self.nest_sp[self.nest_cnt] = self.a[7];
        let psp = self.current_psp();
        self.nest_cnt += 1;
        self.psp[self.nest_cnt] = psp;
        self.pc = adr;
    }
}
