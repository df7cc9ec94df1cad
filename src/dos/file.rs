// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The file handle table and the file-oriented DOS calls.

use crate::exception::Fault;
use crate::human68k::{
    CallError, DosError, DosResult, OpenMode, SeekMode, FILE_MAX, USER_FILENO_MIN,
};
use crate::host::HostFile;
use crate::Emulator;

/// Contents of a read-only file translated to Shift_JIS at open time;
/// reads and seeks are served from the buffer.
pub struct OnmemoryFile {
    pub buffer: Vec<u8>,
    pub position: usize,
}

/// One slot of the file handle table.
#[derive(Default)]
pub struct FileInfo {
    pub host: Option<HostFile>,
    pub is_opened: bool,
    pub mode: OpenMode,
    /// EXEC nest depth that opened the handle.
    pub nest: usize,
    pub name: String,
    pub onmemory: Option<OnmemoryFile>,
}

impl FileInfo {
    pub fn clear(&mut self) {
        *self = FileInfo::default();
    }
}

impl Emulator {
    /// First free user file handle, scanning from 5.
    pub(crate) fn find_free_fileno(&self) -> Option<usize> {
        (USER_FILENO_MIN..FILE_MAX).find(|&i| !self.files[i].is_opened)
    }

    pub(crate) fn set_finfo(&mut self, fileno: usize, host: HostFile, mode: OpenMode, name: String) {
        self.files[fileno] = FileInfo {
            host: Some(host),
            is_opened: true,
            mode,
            nest: self.nest_cnt,
            name,
            onmemory: None,
        };
    }

    /// Closes every user handle, or only those opened at `nest` depth.
    pub(crate) fn close_files(&mut self, nest: Option<usize>) {
        for i in USER_FILENO_MIN..FILE_MAX {
            if !self.files[i].is_opened {
                continue;
            }
            if let Some(nest) = nest {
                if self.files[i].nest != nest {
                    continue;
                }
            }
            if let Some(host) = self.files[i].host.as_mut() {
                self.host.close_file(host);
            }
            self.files[i].clear();
        }
    }

    /// Reads the NUL-terminated guest path at `adr` (trailing spaces
    /// stripped) as a host UTF-8 string.
    pub(crate) fn guest_path(&self, adr: u32) -> Result<String, CallError> {
        let bytes = self.mem.read_string_super(adr)?;
        let mut len = bytes.len();
        while len > 0 && bytes[len - 1] == b' ' {
            len -= 1;
        }
        if len == 0 {
            return Err(DosError::IllegalFilename.into());
        }
        let trimmed = &bytes[..len];
        Ok(self
            .host
            .sjis_to_utf8(trimmed)
            .unwrap_or_else(|| String::from_utf8_lossy(trimmed).into_owned()))
    }

    /// Writes a host string into guest memory as Shift_JIS.
    pub(crate) fn write_guest_string(&mut self, adr: u32, text: &str) -> Result<(), Fault> {
        let bytes = self
            .host
            .utf8_to_sjis(text)
            .unwrap_or_else(|| text.as_bytes().to_vec());
        self.mem.write_string_super(adr, &bytes)
    }

    /// Creates a file; `newfile` refuses to clobber an existing one.
    fn create_newfile(&mut self, path: &str, newfile: bool) -> DosResult {
        let fileno = self.find_free_fileno().ok_or(DosError::TooManyFiles)?;
        let host = self.host.create_newfile(path, newfile)?;
        self.set_finfo(fileno, host, OpenMode::ReadWrite, path.to_string());
        Ok(fileno as i32)
    }

    /// Slurps a read-only file into the Shift_JIS translation buffer when
    /// the corresponding setting asks for it.
    fn read_onmemory_file(&mut self, fileno: usize) {
        if !self.settings.read_file_utf8 {
            return;
        }
        let entry = &mut self.files[fileno];
        if entry.mode != OpenMode::Read {
            return;
        }
        let host_file = match entry.host.as_mut() {
            Some(f) => f,
            None => return,
        };

        let size = match self.host.seek_file(host_file, 0, SeekMode::End) {
            Ok(n) => n as usize,
            Err(_) => return,
        };
        if self.host.seek_file(host_file, 0, SeekMode::Set).is_err() {
            return;
        }
        let mut raw = vec![0u8; size];
        match self.host.read_file_or_tty(host_file, &mut raw) {
            Ok(n) if n == size => {}
            _ => {
                let _ = self.host.seek_file(host_file, 0, SeekMode::Set);
                return;
            }
        }
        let _ = self.host.seek_file(host_file, 0, SeekMode::Set);

        let text = match std::str::from_utf8(&raw) {
            Ok(t) => t,
            Err(_) => return,
        };
        if let Some(sjis) = self.host.utf8_to_sjis(text) {
            self.files[fileno].onmemory = Some(OnmemoryFile { buffer: sjis, position: 0 });
        }
    }

    /// Reads from a handle, honoring the in-memory translation buffer.
    fn read_file_bytes(&mut self, fileno: usize, buf: &mut [u8]) -> Result<usize, CallError> {
        let entry = &mut self.files[fileno];
        if let Some(om) = entry.onmemory.as_mut() {
            let rest = om.buffer.len() - om.position;
            let n = rest.min(buf.len());
            buf[..n].copy_from_slice(&om.buffer[om.position..om.position + n]);
            om.position += n;
            return Ok(n);
        }
        let host_file = entry.host.as_mut().ok_or(DosError::BadFileno)?;
        Ok(self.host.read_file_or_tty(host_file, buf)?)
    }

    fn opened_fileno(&self, fileno: u16) -> Result<usize, CallError> {
        let fileno = fileno as usize;
        if fileno >= FILE_MAX {
            return Err(DosError::TooManyFiles.into());
        }
        if !self.files[fileno].is_opened {
            return Err(DosError::BadFileno.into());
        }
        Ok(fileno)
    }

    // DOS call handlers.

    pub(super) fn dos_mkdir(&mut self) -> DosResult {
        let mut p = self.a[7];
        let dir = self.read_param_long(&mut p)?;
        let path = self.guest_path(dir)?;
        self.host.mkdir(&path)?;
        Ok(0)
    }

    pub(super) fn dos_rmdir(&mut self) -> DosResult {
        let mut p = self.a[7];
        let dir = self.read_param_long(&mut p)?;
        let path = self.guest_path(dir)?;
        self.host.rmdir(&path)?;
        Ok(0)
    }

    pub(super) fn dos_chdir(&mut self) -> DosResult {
        let mut p = self.a[7];
        let dir = self.read_param_long(&mut p)?;
        let path = self.guest_path(dir)?;
        self.host.chdir(&path)?;
        Ok(0)
    }

    pub(super) fn dos_curdir(&mut self) -> DosResult {
        let mut p = self.a[7];
        let drive = self.read_param_word(&mut p)?;
        let buffer = self.read_param_long(&mut p)?;
        let dir = self.host.curdir(drive)?;
        self.write_guest_string(buffer, &dir)?;
        Ok(0)
    }

    pub(super) fn dos_create(&mut self) -> DosResult {
        let mut p = self.a[7];
        let file = self.read_param_long(&mut p)?;
        let _atr = self.read_param_word(&mut p)?;
        let path = self.guest_path(file)?;
        self.create_newfile(&path, false)
    }

    pub(super) fn dos_newfile(&mut self) -> DosResult {
        let mut p = self.a[7];
        let file = self.read_param_long(&mut p)?;
        let _atr = self.read_param_word(&mut p)?;
        let path = self.guest_path(file)?;
        self.create_newfile(&path, true)
    }

    /// DOS _MAKETMP: `?` in the file name becomes a digit; when the file
    /// exists the digit run is incremented until creation succeeds or the
    /// digits roll over.
    pub(super) fn dos_maketmp(&mut self) -> DosResult {
        let mut p = self.a[7];
        let path_adr = self.read_param_long(&mut p)?;
        let _atr = self.read_param_word(&mut p)?;

        let raw = self.mem.read_string_super(path_adr)?.to_vec();
        let name_start = filename_offset(&raw);
        if name_start == raw.len() {
            return Err(DosError::IllegalFilename.into());
        }

        let mut buf = raw;
        for b in &mut buf[name_start..] {
            if *b == b'?' {
                *b = b'0';
            }
        }

        loop {
            // The renamed candidate is visible to the guest.
            self.mem.write_string_super(path_adr, &buf)?;
            let path = self.guest_path(path_adr)?;
            match self.create_newfile(&path, true) {
                Err(CallError::Dos(DosError::ExistFile)) => {}
                other => return other,
            }

            let mut done = false;
            for i in (name_start..buf.len()).rev() {
                if !buf[i].is_ascii_digit() {
                    continue;
                }
                if buf[i] == b'9' {
                    buf[i] = b'0';
                    continue;
                }
                buf[i] += 1;
                done = true;
                break;
            }
            if !done {
                return Err(DosError::ExistFile.into());
            }
        }
    }

    pub(super) fn dos_open(&mut self) -> DosResult {
        let mut p = self.a[7];
        let file = self.read_param_long(&mut p)?;
        let mode = self.read_param_word(&mut p)?;

        let rw_mode = OpenMode::from_word(mode).ok_or(DosError::IllegalArg)?;
        // Sharing modes beyond the Human68k set are rejected.
        if mode & 0x00F0 >= 0x0050 {
            return Err(DosError::IllegalArg.into());
        }

        let path = self.guest_path(file)?;
        let fileno = self.find_free_fileno().ok_or(DosError::TooManyFiles)?;
        let host = self.host.open_file(&path, rw_mode)?;
        self.set_finfo(fileno, host, rw_mode, path);
        self.read_onmemory_file(fileno);
        Ok(fileno as i32)
    }

    pub(super) fn dos_close(&mut self) -> DosResult {
        let mut p = self.a[7];
        let fileno = self.read_param_word(&mut p)?;
        let fileno = self.opened_fileno(fileno)?;
        if fileno >= USER_FILENO_MIN {
            if let Some(host) = self.files[fileno].host.as_mut() {
                self.host.close_file(host);
            }
            self.files[fileno].clear();
        }
        Ok(0)
    }

    pub(super) fn dos_allclose(&mut self) -> DosResult {
        self.close_files(None);
        Ok(0)
    }

    /// DOS _READ, including the bus error emulation when the buffer
    /// straddles unmapped memory.
    pub(super) fn dos_read(&mut self) -> DosResult {
        let mut p = self.a[7];
        let fileno = self.read_param_word(&mut p)?;
        let buffer = self.read_param_long(&mut p)?;
        let length = self.read_param_long(&mut p)?;

        // Human68k v3.02 checks the length before the file handle.
        if length == 0 {
            return Ok(0);
        }
        let fileno = self.opened_fileno(fileno)?;
        // Files opened for writing may still be read, so the open mode is
        // not checked.

        let span_len = match self.mem.writable(buffer, length, true) {
            Some(span) => span.len(),
            None => return Err(Fault::bus_write(buffer).into()),
        };

        let mut tmp = vec![0u8; span_len];
        let n = self.read_file_bytes(fileno, &mut tmp)?;
        if let Some(span) = self.mem.writable(buffer, n as u32, true) {
            span.copy_from_slice(&tmp[..n]);
        }

        if span_len == length as usize || n < span_len {
            // Either the whole buffer was valid, or the file ended inside
            // the valid part.
            return Ok(n as i32);
        }

        // The valid prefix was filled exactly: probe one more byte to tell
        // end-of-file apart from a read into the unmapped area.
        let mut probe = [0u8; 1];
        let more = self.read_file_bytes(fileno, &mut probe)?;
        if more == 0 {
            return Ok(n as i32);
        }
        Err(Fault::bus_write(buffer + span_len as u32).into())
    }

    pub(super) fn dos_write(&mut self) -> DosResult {
        let mut p = self.a[7];
        let fileno = self.read_param_word(&mut p)?;
        let buffer = self.read_param_long(&mut p)?;
        let length = self.read_param_long(&mut p)?;

        if length == 0 {
            return Ok(0);
        }
        let fileno = self.opened_fileno(fileno)?;

        let span = match self.mem.readable(buffer, length, true) {
            Some(span) => span.to_vec(),
            None => return Err(Fault::bus_read(buffer).into()),
        };
        let short = span.len() < length as usize;
        let written = self.write_to_handle(fileno, &span)?;
        if short {
            return Err(Fault::bus_read(buffer + span.len() as u32).into());
        }
        Ok(written)
    }

    pub(super) fn dos_seek(&mut self) -> DosResult {
        let mut p = self.a[7];
        let fileno = self.read_param_word(&mut p)?;
        let offset = self.read_param_long(&mut p)? as i32;
        let mode = self.read_param_word(&mut p)?;

        let fileno = self.opened_fileno(fileno)?;
        let mode = SeekMode::from_word(mode).ok_or(DosError::IllegalParam)?;

        let entry = &mut self.files[fileno];
        if let Some(om) = entry.onmemory.as_mut() {
            let base = match mode {
                SeekMode::Set => 0,
                SeekMode::Cur => om.position as i64,
                SeekMode::End => om.buffer.len() as i64,
            };
            let pos = base + offset as i64;
            if pos < 0 || pos > om.buffer.len() as i64 {
                return Err(DosError::CantSeek.into());
            }
            om.position = pos as usize;
            return Ok(pos as i32);
        }

        let host_file = entry.host.as_mut().ok_or(DosError::BadFileno)?;
        Ok(self.host.seek_file(host_file, offset, mode)?)
    }

    pub(super) fn dos_fgetc(&mut self) -> DosResult {
        let mut p = self.a[7];
        let fileno = self.read_param_word(&mut p)?;
        let fileno = self.opened_fileno(fileno)?;
        let mut byte = [0u8; 1];
        match self.read_file_bytes(fileno, &mut byte)? {
            0 => Ok(-1),
            _ => Ok(byte[0] as i32),
        }
    }

    /// DOS _FGETS: one line into the GETS-style buffer; -1 at end of file.
    pub(super) fn dos_fgets(&mut self) -> DosResult {
        let mut p = self.a[7];
        let buffer = self.read_param_long(&mut p)?;
        let fileno = self.read_param_word(&mut p)?;
        let fileno = self.opened_fileno(fileno)?;

        let max = self.mem.read_u8_super(buffer)? as usize;
        let mut line = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            if self.read_file_bytes(fileno, &mut byte)? == 0 {
                if line.is_empty() {
                    return Ok(-1);
                }
                break;
            }
            match byte[0] {
                b'\n' => break,
                b'\r' => {}
                b => {
                    if line.len() < max {
                        line.push(b);
                    }
                }
            }
        }

        self.mem.write_u8_super(buffer + 1, line.len() as u8)?;
        let mut adr = buffer + 2;
        for &b in &line {
            self.mem.write_u8_super(adr, b)?;
            adr += 1;
        }
        self.mem.write_u8_super(adr, 0)?;
        Ok(line.len() as i32)
    }

    pub(super) fn dos_fputc(&mut self) -> DosResult {
        let mut p = self.a[7];
        let code = self.read_param_word(&mut p)?;
        let fileno = self.read_param_word(&mut p)?;
        let fileno = self.opened_fileno(fileno)?;
        if code >= 0x100 {
            self.write_to_handle(fileno, &[(code >> 8) as u8, code as u8])
        } else {
            self.write_to_handle(fileno, &[code as u8])
        }
    }

    pub(super) fn dos_fputs(&mut self) -> DosResult {
        let mut p = self.a[7];
        let mesptr = self.read_param_long(&mut p)?;
        let fileno = self.read_param_word(&mut p)?;
        let fileno = self.opened_fileno(fileno)?;
        let text = self.mem.read_string_super(mesptr)?.to_vec();
        self.write_to_handle(fileno, &text)
    }

    pub(super) fn dos_delete(&mut self) -> DosResult {
        let mut p = self.a[7];
        let file = self.read_param_long(&mut p)?;
        let path = self.guest_path(file)?;
        self.host.delete_file(&path)?;
        Ok(0)
    }

    pub(super) fn dos_rename(&mut self) -> DosResult {
        let mut p = self.a[7];
        let old = self.read_param_long(&mut p)?;
        let new = self.read_param_long(&mut p)?;
        let old_path = self.guest_path(old)?;
        let new_path = self.guest_path(new)?;
        self.host.rename_file(&old_path, &new_path)?;
        Ok(0)
    }

    /// DOS _CHMOD: attribute read with atr = -1, attribute write otherwise.
    pub(super) fn dos_chmod(&mut self) -> DosResult {
        let mut p = self.a[7];
        let file = self.read_param_long(&mut p)?;
        let atr = self.read_param_word(&mut p)?;

        let path = self.guest_path(file)?;
        let hpn = self
            .host
            .canonical_path_name(&path)
            .ok_or(DosError::IllegalFilename)?;
        if hpn.name.is_empty() {
            return Err(DosError::IllegalFilename.into());
        }
        // A bare drive name is not a file.
        let raw = path.as_bytes();
        if raw.len() == 2 && raw[0].is_ascii_alphabetic() && raw[1] == b':' {
            return Err(DosError::IllegalFilename.into());
        }
        // Wildcards are documented as platform-dependent; refuse them.
        if hpn.name.contains(['?', '*']) {
            return Err(DosError::IllegalFilename.into());
        }

        if atr == 0xFFFF {
            Ok(self.host.get_file_attribute(&path)?)
        } else {
            Ok(self.host.set_file_attribute(&path, atr)?)
        }
    }

    pub(super) fn dos_filedate(&mut self) -> DosResult {
        let mut p = self.a[7];
        let fileno = self.read_param_word(&mut p)?;
        let dt = self.read_param_long(&mut p)?;

        let fileno = self.opened_fileno(fileno)?;
        let entry = &mut self.files[fileno];
        let host_file = entry.host.as_mut().ok_or(DosError::BadFileno)?;

        if dt == 0 {
            return Ok(self.host.get_filedate(host_file)?);
        }
        if entry.mode == OpenMode::Read {
            return Err(DosError::IllegalArg.into());
        }
        Ok(self.host.set_filedate(host_file, dt)?)
    }

    pub(super) fn dos_dup(&mut self) -> DosResult {
        let mut p = self.a[7];
        let fileno = self.read_param_word(&mut p)?;
        let fileno = self.opened_fileno(fileno)?;
        let new_fileno = self.find_free_fileno().ok_or(DosError::TooManyFiles)?;

        let host_file = self.files[fileno].host.as_ref().ok_or(DosError::BadFileno)?;
        let clone = self.host.dup_file(host_file)?;
        let mode = self.files[fileno].mode;
        let name = self.files[fileno].name.clone();
        self.set_finfo(new_fileno, clone, mode, name);
        Ok(new_fileno as i32)
    }

    pub(super) fn dos_dup2(&mut self) -> DosResult {
        let mut p = self.a[7];
        let fileno = self.read_param_word(&mut p)?;
        let new_fileno = self.read_param_word(&mut p)? as usize;
        let fileno = self.opened_fileno(fileno)?;

        if new_fileno >= FILE_MAX || new_fileno < USER_FILENO_MIN {
            return Err(DosError::IllegalParam.into());
        }
        if new_fileno == fileno {
            return Ok(0);
        }
        if self.files[new_fileno].is_opened {
            if let Some(host) = self.files[new_fileno].host.as_mut() {
                self.host.close_file(host);
            }
            self.files[new_fileno].clear();
        }

        let host_file = self.files[fileno].host.as_ref().ok_or(DosError::BadFileno)?;
        let clone = self.host.dup_file(host_file)?;
        let mode = self.files[fileno].mode;
        let name = self.files[fileno].name.clone();
        self.set_finfo(new_fileno, clone, mode, name);
        Ok(0)
    }

    /// DOS _IOCTRL, device-information subset.
    pub(super) fn dos_ioctrl(&mut self) -> DosResult {
        let mut p = self.a[7];
        let mode = self.read_param_word(&mut p)?;
        match mode {
            0 => {
                let fileno = self.read_param_word(&mut p)?;
                let fileno = self.opened_fileno(fileno)?;
                let device = matches!(
                    self.files[fileno].host,
                    Some(HostFile::Stdin | HostFile::Stdout | HostFile::Stderr | HostFile::Null)
                );
                Ok(if device { 0x80C0 } else { 0 })
            }
            6 | 7 => Ok(0xFF),
            _ => Ok(0),
        }
    }
}

/// Offset of the file name after the last path delimiter, skipping over
/// 2-byte Shift_JIS characters.
fn filename_offset(path: &[u8]) -> usize {
    let mut start = 0;
    let mut i = 0;
    while i < path.len() {
        let c = path[i];
        if c == b'\\' || c == b':' || c == b'/' {
            start = i + 1;
        } else if crate::human68k::is_mb_lead(c) {
            i += 1;
        }
        i += 1;
    }
    start
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_offset_skips_delimiters() {
        assert_eq!(filename_offset(b"A:\\dir\\name.x"), 7);
        assert_eq!(filename_offset(b"name.x"), 0);
        assert_eq!(filename_offset(b"dir/"), 4);
    }
}
