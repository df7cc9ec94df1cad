// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host abstraction layer.
//!
//! The OS personality reaches the host filesystem, clock and standard
//! streams only through the [`Host`] trait, so a port replaces one
//! implementation instead of scattering `cfg` switches. [`LocalHost`] is
//! the native implementation for ordinary desktop targets; guest text is
//! Shift_JIS and crosses this boundary through the transcoding methods.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Datelike, Local, Timelike};
use encoding_rs::SHIFT_JIS;

use crate::human68k::{
    DosError, OpenMode, PathName, SeekMode, DIR_MAX, DRV_DIR_MAX, EXT_MAX, FILEATR_ARCHIVE,
    FILEATR_DIRECTORY, FILEATR_READONLY, FILENAME_MAX, NAME_MAX,
};

/// A host file or stream bound to a guest file handle.
pub enum HostFile {
    Stdin,
    Stdout,
    Stderr,
    /// stdaux and stdprn; reads return EOF, writes are swallowed.
    Null,
    File(File),
}

/// A broken-down local time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HostDateTime {
    pub year: i32,
    /// 1..=12
    pub month: u32,
    /// 1..=31
    pub day: u32,
    /// 0 = Sunday
    pub wday: u32,
    pub hour: u32,
    pub min: u32,
    pub sec: u32,
}

impl HostDateTime {
    /// The DOS _FILEDATE packing: date word in the high half, time word in
    /// the low half.
    pub fn to_datetime_words(&self) -> u32 {
        let date = ((self.year - 1980).max(0) as u32) << 9 | self.month << 5 | self.day;
        let time = self.hour << 11 | self.min << 5 | self.sec / 2;
        date << 16 | time
    }
}

/// The narrow interface between the OS personality and the host.
pub trait Host {
    /// Breaks the current moment into local calendar fields.
    fn local_now(&self) -> HostDateTime;

    /// Breaks a host timestamp into local calendar fields.
    fn to_localtime(&self, t: SystemTime) -> HostDateTime;

    /// Monotonic clock for IOCS _ONTIME: centiseconds within the current
    /// day and a wrapping day counter.
    fn ontime(&self) -> (u32, u32);

    fn utf8_to_sjis(&self, text: &str) -> Option<Vec<u8>>;
    fn sjis_to_utf8(&self, bytes: &[u8]) -> Option<String>;

    /// Resolves a Human68k path into the canonical drive/dir/name split,
    /// enforcing the 64/18/4 byte component limits.
    fn canonical_path_name(&self, path: &str) -> Option<PathName>;

    fn create_newfile(&self, path: &str, newfile: bool) -> Result<HostFile, DosError>;
    fn open_file(&self, path: &str, mode: OpenMode) -> Result<HostFile, DosError>;
    fn close_file(&self, file: &mut HostFile) -> bool;
    fn dup_file(&self, file: &HostFile) -> Result<HostFile, DosError>;
    fn read_file_or_tty(&self, file: &mut HostFile, buf: &mut [u8]) -> Result<usize, DosError>;
    /// Writes guest bytes; console streams are transcoded from Shift_JIS
    /// unless `iothrough` passes them on unchanged.
    fn write_file(&self, file: &mut HostFile, buf: &[u8], iothrough: bool) -> Result<usize, DosError>;
    fn seek_file(&self, file: &mut HostFile, offset: i32, mode: SeekMode) -> Result<i32, DosError>;

    fn get_file_attribute(&self, path: &str) -> Result<i32, DosError>;
    fn set_file_attribute(&self, path: &str, atr: u16) -> Result<i32, DosError>;
    fn delete_file(&self, path: &str) -> Result<(), DosError>;
    fn rename_file(&self, old: &str, new: &str) -> Result<(), DosError>;

    fn mkdir(&self, path: &str) -> Result<(), DosError>;
    fn rmdir(&self, path: &str) -> Result<(), DosError>;
    fn chdir(&self, path: &str) -> Result<(), DosError>;
    fn curdir(&self, drive: u16) -> Result<String, DosError>;

    /// File modification timestamp as Human68k date and time words.
    fn get_filedate(&self, file: &mut HostFile) -> Result<i32, DosError>;
    fn set_filedate(&self, file: &mut HostFile, dt: u32) -> Result<i32, DosError>;

    /// One line from standard input, without the terminator.
    fn read_line(&self) -> Vec<u8>;
    /// One byte from standard input; 0 at end of input.
    fn read_char(&self) -> u8;
}

/// Native host implementation.
pub struct LocalHost;

impl LocalHost {
    pub fn new() -> Self {
        LocalHost
    }

    /// Strips the virtual drive prefix and normalizes the separators of a
    /// guest-supplied path.
    fn host_path(path: &str) -> PathBuf {
        let without_drive = match path.as_bytes() {
            [d, b':', ..] if d.is_ascii_alphabetic() => &path[2..],
            _ => path,
        };
        PathBuf::from(without_drive.replace('\\', "/"))
    }

    fn from_chrono<T: Datelike + Timelike>(t: &T) -> HostDateTime {
        HostDateTime {
            year: t.year(),
            month: t.month(),
            day: t.day(),
            wday: t.weekday().num_days_from_sunday(),
            hour: t.hour(),
            min: t.minute(),
            sec: t.second(),
        }
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

fn to_dos_error(e: &std::io::Error, fallback: DosError) -> DosError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::NotFound => DosError::NoEntry,
        ErrorKind::AlreadyExists => DosError::ExistFile,
        ErrorKind::PermissionDenied => DosError::ReadOnly,
        _ => {
            log::debug!("host I/O error mapped to {fallback:?}: {e}");
            fallback
        }
    }
}

impl Host for LocalHost {
    fn local_now(&self) -> HostDateTime {
        Self::from_chrono(&Local::now())
    }

    fn to_localtime(&self, t: SystemTime) -> HostDateTime {
        let dt: chrono::DateTime<Local> = t.into();
        Self::from_chrono(&dt)
    }

    fn ontime(&self) -> (u32, u32) {
        let now = Local::now();
        let centis = now.num_seconds_from_midnight() * 100 + now.timestamp_subsec_millis() / 10;
        let days = (now.timestamp() / 86_400) as u32;
        (centis, days & 0xFFFF)
    }

    fn utf8_to_sjis(&self, text: &str) -> Option<Vec<u8>> {
        let (bytes, _, had_errors) = SHIFT_JIS.encode(text);
        if had_errors {
            None
        } else {
            Some(bytes.into_owned())
        }
    }

    fn sjis_to_utf8(&self, bytes: &[u8]) -> Option<String> {
        let (text, had_errors) = SHIFT_JIS.decode_without_bom_handling(bytes);
        if had_errors {
            None
        } else {
            Some(text.into_owned())
        }
    }

    fn canonical_path_name(&self, path: &str) -> Option<PathName> {
        let host = Self::host_path(path);
        let absolute = if host.is_absolute() {
            host
        } else {
            std::env::current_dir().ok()?.join(host)
        };

        let name = absolute.file_name()?.to_str()?.to_string();
        if name.len() > FILENAME_MAX {
            return None;
        }
        let (stem_len, ext_len) = match name.rfind('.') {
            Some(0) | None => (name.len(), 0),
            Some(dot) => (dot, name.len() - dot),
        };
        if stem_len > NAME_MAX || ext_len > EXT_MAX {
            return None;
        }

        let parent = absolute.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut dir = parent.to_str()?.replace('/', "\\");
        if !dir.ends_with('\\') {
            dir.push('\\');
        }
        if !dir.starts_with('\\') {
            dir.insert(0, '\\');
        }
        if dir.len() > DIR_MAX {
            return None;
        }
        let path = format!("A:{dir}");
        debug_assert!(path.len() <= DRV_DIR_MAX);

        Some(PathName { path, name, name_len: stem_len, ext_len })
    }

    fn create_newfile(&self, path: &str, newfile: bool) -> Result<HostFile, DosError> {
        let host = Self::host_path(path);
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if newfile {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        match options.open(&host) {
            Ok(file) => Ok(HostFile::File(file)),
            Err(e) => Err(to_dos_error(&e, DosError::IllegalFilename)),
        }
    }

    fn open_file(&self, path: &str, mode: OpenMode) -> Result<HostFile, DosError> {
        let host = Self::host_path(path);
        if host.is_dir() {
            return Err(DosError::IsDirectory);
        }
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true),
            OpenMode::ReadWrite => options.read(true).write(true),
        };
        match options.open(&host) {
            Ok(file) => Ok(HostFile::File(file)),
            Err(e) => Err(to_dos_error(&e, DosError::NoEntry)),
        }
    }

    fn close_file(&self, file: &mut HostFile) -> bool {
        // Dropping the handle closes it; the standard streams stay open.
        if let HostFile::File(_) = file {
            *file = HostFile::Null;
        }
        true
    }

    fn dup_file(&self, file: &HostFile) -> Result<HostFile, DosError> {
        match file {
            HostFile::Stdin => Ok(HostFile::Stdin),
            HostFile::Stdout => Ok(HostFile::Stdout),
            HostFile::Stderr => Ok(HostFile::Stderr),
            HostFile::Null => Ok(HostFile::Null),
            // A host-level dup shares the file description, so the position
            // follows the original and closing one side keeps the other
            // usable.
            HostFile::File(f) => match f.try_clone() {
                Ok(clone) => Ok(HostFile::File(clone)),
                Err(e) => Err(to_dos_error(&e, DosError::TooManyFiles)),
            },
        }
    }

    fn read_file_or_tty(&self, file: &mut HostFile, buf: &mut [u8]) -> Result<usize, DosError> {
        match file {
            HostFile::Stdin => std::io::stdin()
                .lock()
                .read(buf)
                .map_err(|e| to_dos_error(&e, DosError::BadFileno)),
            HostFile::Stdout | HostFile::Stderr => Err(DosError::BadFileno),
            HostFile::Null => Ok(0),
            HostFile::File(f) => {
                let mut total = 0;
                while total < buf.len() {
                    match f.read(&mut buf[total..]) {
                        Ok(0) => break,
                        Ok(n) => total += n,
                        Err(e) => return Err(to_dos_error(&e, DosError::BadFileno)),
                    }
                }
                Ok(total)
            }
        }
    }

    fn write_file(&self, file: &mut HostFile, buf: &[u8], iothrough: bool) -> Result<usize, DosError> {
        fn console(out: &mut dyn Write, buf: &[u8], iothrough: bool) -> std::io::Result<()> {
            if iothrough {
                out.write_all(buf)?;
            } else {
                let (text, _) = SHIFT_JIS.decode_without_bom_handling(buf);
                out.write_all(text.as_bytes())?;
            }
            out.flush()
        }

        let result = match file {
            HostFile::Stdin => return Err(DosError::BadFileno),
            HostFile::Stdout => console(&mut std::io::stdout().lock(), buf, iothrough),
            HostFile::Stderr => console(&mut std::io::stderr().lock(), buf, iothrough),
            HostFile::Null => Ok(()),
            HostFile::File(f) => f.write_all(buf),
        };
        match result {
            Ok(()) => Ok(buf.len()),
            Err(e) => Err(to_dos_error(&e, DosError::DiskFull)),
        }
    }

    fn seek_file(&self, file: &mut HostFile, offset: i32, mode: SeekMode) -> Result<i32, DosError> {
        let f = match file {
            HostFile::File(f) => f,
            _ => return Err(DosError::CantSeek),
        };
        let pos = match mode {
            SeekMode::Set => {
                if offset < 0 {
                    return Err(DosError::CantSeek);
                }
                SeekFrom::Start(offset as u64)
            }
            SeekMode::Cur => SeekFrom::Current(offset as i64),
            SeekMode::End => SeekFrom::End(offset as i64),
        };
        match f.seek(pos) {
            Ok(n) if n <= i32::MAX as u64 => Ok(n as i32),
            Ok(_) => Err(DosError::CantSeek),
            Err(_) => Err(DosError::CantSeek),
        }
    }

    fn get_file_attribute(&self, path: &str) -> Result<i32, DosError> {
        let meta = std::fs::metadata(Self::host_path(path))
            .map_err(|e| to_dos_error(&e, DosError::NoEntry))?;
        let mut atr = 0u16;
        if meta.is_dir() {
            atr |= FILEATR_DIRECTORY;
        } else {
            atr |= FILEATR_ARCHIVE;
        }
        if meta.permissions().readonly() {
            atr |= FILEATR_READONLY;
        }
        Ok(atr as i32)
    }

    fn set_file_attribute(&self, path: &str, atr: u16) -> Result<i32, DosError> {
        let host = Self::host_path(path);
        let meta = std::fs::metadata(&host).map_err(|e| to_dos_error(&e, DosError::NoEntry))?;
        let mut perm = meta.permissions();
        perm.set_readonly(atr & FILEATR_READONLY != 0);
        std::fs::set_permissions(&host, perm).map_err(|e| to_dos_error(&e, DosError::ReadOnly))?;
        Ok(atr as i32)
    }

    fn delete_file(&self, path: &str) -> Result<(), DosError> {
        std::fs::remove_file(Self::host_path(path)).map_err(|e| to_dos_error(&e, DosError::NoEntry))
    }

    fn rename_file(&self, old: &str, new: &str) -> Result<(), DosError> {
        std::fs::rename(Self::host_path(old), Self::host_path(new))
            .map_err(|e| to_dos_error(&e, DosError::NoEntry))
    }

    fn mkdir(&self, path: &str) -> Result<(), DosError> {
        std::fs::create_dir(Self::host_path(path)).map_err(|e| to_dos_error(&e, DosError::NoEntry))
    }

    fn rmdir(&self, path: &str) -> Result<(), DosError> {
        std::fs::remove_dir(Self::host_path(path)).map_err(|e| to_dos_error(&e, DosError::NoDirectory))
    }

    fn chdir(&self, path: &str) -> Result<(), DosError> {
        std::env::set_current_dir(Self::host_path(path))
            .map_err(|e| to_dos_error(&e, DosError::NoDirectory))
    }

    fn curdir(&self, drive: u16) -> Result<String, DosError> {
        if drive > 26 {
            return Err(DosError::IllegalDrive);
        }
        let cwd = std::env::current_dir().map_err(|_| DosError::NoDirectory)?;
        let mut dir = cwd.to_str().ok_or(DosError::IllegalFilename)?.replace('/', "\\");
        while dir.starts_with('\\') {
            dir.remove(0);
        }
        dir.truncate(DIR_MAX);
        Ok(dir)
    }

    fn get_filedate(&self, file: &mut HostFile) -> Result<i32, DosError> {
        let f = match file {
            HostFile::File(f) => f,
            _ => return Err(DosError::BadFileno),
        };
        let modified = f
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| to_dos_error(&e, DosError::BadFileno))?;
        Ok(self.to_localtime(modified).to_datetime_words() as i32)
    }

    fn set_filedate(&self, file: &mut HostFile, dt: u32) -> Result<i32, DosError> {
        let f = match file {
            HostFile::File(f) => f,
            _ => return Err(DosError::BadFileno),
        };
        let date = dt >> 16;
        let time = dt & 0xFFFF;
        let local = Local::now()
            .with_year((date >> 9) as i32 + 1980)
            .and_then(|t| t.with_month(date >> 5 & 0x0F))
            .and_then(|t| t.with_day(date & 0x1F))
            .and_then(|t| t.with_hour(time >> 11))
            .and_then(|t| t.with_minute(time >> 5 & 0x3F))
            .and_then(|t| t.with_second((time & 0x1F) * 2))
            .ok_or(DosError::IllegalParam)?;
        let system: SystemTime = local.into();
        f.set_modified(system).map_err(|e| to_dos_error(&e, DosError::BadFileno))?;
        Ok(0)
    }

    fn read_line(&self) -> Vec<u8> {
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return Vec::new();
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        self.utf8_to_sjis(&line).unwrap_or_else(|| line.into_bytes())
    }

    fn read_char(&self) -> u8 {
        let mut byte = [0u8; 1];
        match std::io::stdin().lock().read(&mut byte) {
            Ok(1) => byte[0],
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sjis_round_trip_is_identity_on_representable_text() {
        let host = LocalHost::new();
        let text = "abcカナ漢字.txt";
        let sjis = host.utf8_to_sjis(text).unwrap();
        assert_eq!(host.sjis_to_utf8(&sjis).unwrap(), text);
    }

    #[test]
    fn datetime_words_packing() {
        let t = HostDateTime { year: 2024, month: 3, day: 15, wday: 5, hour: 13, min: 45, sec: 58 };
        let packed = t.to_datetime_words();
        assert_eq!(packed >> 16, (44 << 9 | 3 << 5 | 15) as u32);
        assert_eq!(packed & 0xFFFF, (13 << 11 | 45 << 5 | 29) as u32);
    }

    #[test]
    fn drive_prefix_is_stripped() {
        assert_eq!(LocalHost::host_path("A:\\tmp\\x.txt"), PathBuf::from("/tmp/x.txt"));
        assert_eq!(LocalHost::host_path("test.tmp"), PathBuf::from("test.tmp"));
    }
}
