// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time, date, environment and the small informational DOS calls.

use crate::exception::Fault;
use crate::human68k::{DosError, DosResult, FCB_WORK, PSP_ENV_PTR, SIZEOF_MEMBLK};
use crate::iocs::{date_bcd, date_bin, time_bcd, time_bin};
use crate::Emulator;

impl Emulator {
    /// DOS _GETTIM2: binary (hour << 16) | (min << 8) | sec.
    pub(super) fn dos_gettim2(&mut self) -> DosResult {
        Ok(time_bin(self.iocs_timeget()) as i32)
    }

    /// DOS _SETTIM2 validates the time but never sets the host clock.
    pub(super) fn dos_settim2(&mut self) -> DosResult {
        let mut p = self.a[7];
        let bin = self.read_param_long(&mut p)?;
        match time_bcd(bin) {
            Some(_) => Ok(0),
            None => Err(DosError::IllegalFunc.into()),
        }
    }

    /// DOS _GETDATE: (wday << 16) | ((year - 1980) << 9) | (month << 5) | day.
    pub(super) fn dos_getdate(&mut self) -> DosResult {
        let date = date_bin(self.iocs_dateget());
        let wday = date >> 28 & 7;
        let year = (date >> 16 & 0xFFF).saturating_sub(1980);
        let month = date >> 8 & 0x0F;
        let day = date & 0x1F;
        Ok((wday << 16 | year << 9 | month << 5 | day) as i32)
    }

    pub(super) fn dos_setdate(&mut self) -> DosResult {
        let mut p = self.a[7];
        let date = self.read_param_word(&mut p)? as u32;
        let year = (date >> 9) + 1980;
        let month = date >> 5 & 0x0F;
        let day = date & 0x1F;
        match date_bcd(year << 16 | month << 8 | day) {
            Some(_) => Ok(0),
            None => Err(DosError::IllegalFunc.into()),
        }
    }

    /// DOS _GETTIME: (hour << 11) | (min << 5) | (sec / 2).
    pub(super) fn dos_gettime(&mut self) -> DosResult {
        let t = time_bin(self.iocs_timeget());
        let hour = t >> 16;
        let min = t >> 8 & 0x3F;
        let sec = (t & 0x3F) / 2;
        Ok((hour << 11 | min << 5 | sec) as i32)
    }

    pub(super) fn dos_settime(&mut self) -> DosResult {
        let mut p = self.a[7];
        let t = self.read_param_word(&mut p)? as u32;
        let hour = t >> 11;
        let min = t >> 5 & 0x3F;
        let sec = (t & 0x1F) * 2;
        match time_bcd(hour << 16 | min << 8 | sec) {
            Some(_) => Ok(0),
            None => Err(DosError::IllegalFunc.into()),
        }
    }

    /// DOS _VERNUM: '68' and version 3.02.
    pub(super) fn dos_vernum(&mut self) -> DosResult {
        Ok(0x3638_0302u32 as i32)
    }

    /// Looks up `name` in the environment block at `env` (0 selects the
    /// running process environment). The block is a 4-byte size prefix
    /// followed by `KEY=VALUE` strings and an empty terminator.
    pub(crate) fn getenv_guest(&self, name: &[u8], env: u32) -> Result<Option<Vec<u8>>, Fault> {
        let env = if env == 0 {
            self.mem.read_u32_super(self.current_psp() + PSP_ENV_PTR)?
        } else {
            env
        };
        if env == 0xFFFF_FFFF {
            return Ok(None);
        }

        let mut kv = env + 4;
        loop {
            let record = self.mem.read_string_super(kv)?;
            if record.is_empty() {
                return Ok(None);
            }
            if record.len() > name.len()
                && &record[..name.len()] == name
                && record[name.len()] == b'='
            {
                return Ok(Some(record[name.len() + 1..].to_vec()));
            }
            kv += record.len() as u32 + 1;
        }
    }

    pub(super) fn dos_getenv(&mut self) -> DosResult {
        let mut p = self.a[7];
        let name = self.read_param_long(&mut p)?;
        let env = self.read_param_long(&mut p)?;
        let buf = self.read_param_long(&mut p)?;

        let name = self.mem.read_string_super(name)?.to_vec();
        match self.getenv_guest(&name, env)? {
            Some(value) => {
                self.mem.write_string_super(buf, &value)?;
                Ok(0)
            }
            None => Err(DosError::IllegalFunc.into()),
        }
    }

    pub(super) fn dos_intvcs(&mut self) -> DosResult {
        let mut p = self.a[7];
        let intno = self.read_param_word(&mut p)? as u32;
        let jobadr = self.read_param_long(&mut p)?;
        let vector = (intno & 0xFFFF) * 4;
        let old = self.mem.read_u32_super(vector)?;
        self.mem.write_u32_super(vector, jobadr)?;
        Ok(old as i32)
    }

    pub(super) fn dos_intvcg(&mut self) -> DosResult {
        let mut p = self.a[7];
        let intno = self.read_param_word(&mut p)? as u32;
        Ok(self.mem.read_u32_super((intno & 0xFFFF) * 4)? as i32)
    }

    /// DOS _DSKFRE: a synthetic, roomy virtual drive.
    pub(super) fn dos_dskfre(&mut self) -> DosResult {
        let mut p = self.a[7];
        let drive = self.read_param_word(&mut p)?;
        let buffer = self.read_param_long(&mut p)?;
        if drive > 26 {
            return Err(DosError::IllegalDrive.into());
        }

        let free_clusters = 0x4000u32;
        let total_clusters = 0x4000u32;
        let sectors_per_cluster = 2u32;
        let bytes_per_sector = 1024u32;
        self.mem.write_u16_super(buffer, free_clusters as u16)?;
        self.mem.write_u16_super(buffer + 2, total_clusters as u16)?;
        self.mem.write_u16_super(buffer + 4, sectors_per_cluster as u16)?;
        self.mem.write_u16_super(buffer + 6, bytes_per_sector as u16)?;
        Ok((free_clusters * sectors_per_cluster * bytes_per_sector) as i32)
    }

    /// DOS _NAMESTS: split a path into the internal name status buffer.
    pub(super) fn dos_namests(&mut self) -> DosResult {
        let mut p = self.a[7];
        let file = self.read_param_long(&mut p)?;
        let buffer = self.read_param_long(&mut p)?;

        let path = self.guest_path(file)?;
        let hpn = self
            .host
            .canonical_path_name(&path)
            .ok_or(DosError::IllegalFilename)?;

        let wildcard = hpn.name.contains(['?', '*']) as u8;
        self.mem.write_u8_super(buffer, wildcard)?;
        self.mem.write_u8_super(buffer + 1, 0)?; // drive A:

        // Directory part without the drive, NUL padded to 65 bytes.
        let dir = hpn.path.trim_start_matches(|c: char| c != '\\');
        let dir_sjis = self.host.utf8_to_sjis(dir).unwrap_or_else(|| dir.as_bytes().to_vec());
        for i in 0..65usize {
            let b = dir_sjis.get(i).copied().unwrap_or(0);
            self.mem.write_u8_super(buffer + 2 + i as u32, b)?;
        }

        let stem = &hpn.name[..hpn.name_len.min(hpn.name.len())];
        let ext = hpn.name.get(hpn.name_len..).unwrap_or("");
        let stem_sjis = self.host.utf8_to_sjis(stem).unwrap_or_else(|| stem.as_bytes().to_vec());
        for i in 0..8usize {
            let b = stem_sjis.get(i).copied().unwrap_or(b' ');
            self.mem.write_u8_super(buffer + 67 + i as u32, b)?;
        }
        // Extension without the dot, space padded to 3 bytes.
        let ext_body = ext.strip_prefix('.').unwrap_or(ext).as_bytes();
        for i in 0..3usize {
            let b = ext_body.get(i).copied().unwrap_or(b' ');
            self.mem.write_u8_super(buffer + 75 + i as u32, b)?;
        }
        // Name part beyond 8 bytes.
        for i in 0..10usize {
            let b = stem_sjis.get(8 + i).copied().unwrap_or(0);
            self.mem.write_u8_super(buffer + 78 + i as u32, b)?;
        }
        Ok(0)
    }

    /// DOS _NAMECK: expand a path into drive/dir, name and extension.
    pub(super) fn dos_nameck(&mut self) -> DosResult {
        let mut p = self.a[7];
        let file = self.read_param_long(&mut p)?;
        let buffer = self.read_param_long(&mut p)?;

        let path = self.guest_path(file)?;
        let hpn = self
            .host
            .canonical_path_name(&path)
            .ok_or(DosError::IllegalFilename)?;

        let dir_sjis = self
            .host
            .utf8_to_sjis(&hpn.path)
            .unwrap_or_else(|| hpn.path.as_bytes().to_vec());
        for i in 0..66usize {
            let b = dir_sjis.get(i).copied().unwrap_or(0);
            self.mem.write_u8_super(buffer + i as u32, b)?;
        }

        let stem = &hpn.name[..hpn.name_len.min(hpn.name.len())];
        let ext = hpn.name.get(hpn.name_len..).unwrap_or("");
        let stem_sjis = self.host.utf8_to_sjis(stem).unwrap_or_else(|| stem.as_bytes().to_vec());
        for i in 0..19usize {
            let b = stem_sjis.get(i).copied().unwrap_or(0);
            self.mem.write_u8_super(buffer + 66 + i as u32, b)?;
        }
        let ext_sjis = ext.as_bytes();
        for i in 0..6usize {
            let b = ext_sjis.get(i).copied().unwrap_or(0);
            self.mem.write_u8_super(buffer + 85 + i as u32, b)?;
        }

        Ok(if hpn.name.contains(['?', '*']) { 1 } else { 0 })
    }

    pub(super) fn dos_getpdb(&mut self) -> DosResult {
        Ok((self.current_psp() + SIZEOF_MEMBLK) as i32)
    }

    /// DOS _ASSIGN, status subset: every drive is the plain root.
    pub(super) fn dos_assign(&mut self) -> DosResult {
        let mut p = self.a[7];
        let mode = self.read_param_word(&mut p)?;
        match mode {
            0 => {
                let _buffer1 = self.read_param_long(&mut p)?;
                let buffer2 = self.read_param_long(&mut p)?;
                self.write_guest_string(buffer2, "\\")?;
                Ok(0x40)
            }
            _ => Err(DosError::IllegalFunc.into()),
        }
    }

    /// DOS _GETFCB: canned control block images for the standard handles.
    pub(super) fn dos_getfcb(&mut self) -> DosResult {
        let mut p = self.a[7];
        let fileno = self.read_param_word(&mut p)?;

        let mut fcb = [0u8; 0x60];
        match fileno {
            0 => {
                fcb[0] = 0x01;
                fcb[1] = 0xC1;
                fcb[14] = 0x02;
                fcb[36..44].copy_from_slice(b"CON     ");
            }
            1 | 2 => {
                fcb[0] = 0x01;
                fcb[1] = 0xC2;
                fcb[2] = 0x00;
                fcb[3] = 0x02;
                fcb[4] = 0xC6;
                fcb[5] = 0x04;
                fcb[14] = 0x02;
                fcb[36..44].copy_from_slice(b"CON     ");
            }
            _ => {
                fcb[14] = fileno as u8;
            }
        }

        for (i, b) in fcb.iter().enumerate() {
            self.mem.write_u8_super(FCB_WORK + i as u32, *b)?;
        }
        Ok(FCB_WORK as i32)
    }

    /// DOS _BUS_ERR: probe guest memory for accessibility.
    pub(super) fn dos_bus_err(&mut self) -> DosResult {
        let mut p = self.a[7];
        let s_adr = self.read_param_long(&mut p)?;
        let d_adr = self.read_param_long(&mut p)?;
        let size = self.read_param_word(&mut p)?;

        match size {
            1 => {}
            2 | 4 => {
                if s_adr & 1 != 0 || d_adr & 1 != 0 {
                    return Err(DosError::IllegalFunc.into());
                }
            }
            _ => return Err(DosError::IllegalFunc.into()),
        }

        let len = size as u32;
        let value = match self.mem.readable(s_adr, len, true) {
            Some(span) if span.len() == len as usize => span.to_vec(),
            _ => return Ok(2), // read side faults
        };
        match self.mem.writable(d_adr, len, true) {
            Some(span) if span.len() == len as usize => span.copy_from_slice(&value),
            _ => return Ok(1), // write side faults
        }
        Ok(0)
    }
}
