// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Function call trace.
//!
//! With `trace_func` on, every DOS call prints one line of the shape
//! `$PC $FFxx: DOS _NAME (args)`. The argument rendering is driven by a
//! per-call format string: `{b}` byte, `{w}` word, `{c}` word as a
//! character, `{l}` long, `{p}` pointer, `{s}` string pointer, `{f}` file
//! handle, `{d}` drive number. Calls whose stack layout depends on the
//! leading mode word carry a sub-table keyed by that mode.

use crate::exception::Fault;
use crate::Emulator;

struct SubParams {
    mode: u16,
    name: &'static str,
    format: &'static str,
}

struct SubCmd {
    params: &'static [SubParams],
    /// Only the low byte of the mode selects the entry (DOS _EXEC).
    low_byte: bool,
}

static KFLUSH: SubCmd = SubCmd {
    params: &[
        SubParams { mode: 0x0001, name: "gp", format: "" },
        SubParams { mode: 0x0006, name: "io", format: "code={c}" },
        SubParams { mode: 0x0007, name: "in", format: "" },
        SubParams { mode: 0x0008, name: "gc", format: "" },
        SubParams { mode: 0x000A, name: "gs", format: "inpptr={p}" },
    ],
    low_byte: false,
};

static CONCTRL: SubCmd = SubCmd {
    params: &[
        SubParams { mode: 0x0000, name: "putc", format: "code={c}" },
        SubParams { mode: 0x0001, name: "print", format: "mesptr={s}" },
        SubParams { mode: 0x0002, name: "color", format: "atr={w}" },
        SubParams { mode: 0x0003, name: "locate", format: "x={w}, y={w}" },
        SubParams { mode: 0x0004, name: "down_s", format: "" },
        SubParams { mode: 0x0005, name: "up_s", format: "" },
        SubParams { mode: 0x0006, name: "up", format: "n={w}" },
        SubParams { mode: 0x0007, name: "down", format: "n={w}" },
        SubParams { mode: 0x0008, name: "right", format: "n={w}" },
        SubParams { mode: 0x0009, name: "left", format: "n={w}" },
        SubParams { mode: 0x000A, name: "cls", format: "mod={w}" },
        SubParams { mode: 0x000B, name: "era", format: "mod={w}" },
        SubParams { mode: 0x000C, name: "ins", format: "n={w}" },
        SubParams { mode: 0x000D, name: "del", format: "n={w}" },
        SubParams { mode: 0x000E, name: "fnkmod", format: "mod={w}" },
        SubParams { mode: 0x000F, name: "window", format: "ys={w}, yl={w}" },
        SubParams { mode: 0x0010, name: "width", format: "mod={w}" },
        SubParams { mode: 0x0011, name: "curon", format: "" },
        SubParams { mode: 0x0012, name: "curoff", format: "" },
    ],
    low_byte: false,
};

static KEYCTRL: SubCmd = SubCmd {
    params: &[
        SubParams { mode: 0x0000, name: "keyinp", format: "" },
        SubParams { mode: 0x0001, name: "keysns", format: "" },
        SubParams { mode: 0x0002, name: "sftsns", format: "" },
        SubParams { mode: 0x0003, name: "keybit", format: "group={w}" },
        SubParams { mode: 0x0004, name: "insmod", format: "insmode={w}" },
    ],
    low_byte: false,
};

static IOCTRL: SubCmd = SubCmd {
    params: &[
        SubParams { mode: 0x0000, name: "gt", format: "fileno={f}" },
        SubParams { mode: 0x0001, name: "st", format: "fileno={f}, dt={w}" },
        SubParams { mode: 0x0002, name: "rh", format: "fileno={f}, ptr={p}, len={l}" },
        SubParams { mode: 0x0003, name: "wh", format: "fileno={f}, ptr={p}, len={l}" },
        SubParams { mode: 0x0004, name: "rd", format: "drive={d}, ptr={p}, len={l}" },
        SubParams { mode: 0x0005, name: "wd", format: "drive={d}, ptr={p}, len={l}" },
        SubParams { mode: 0x0006, name: "is", format: "fileno={f}" },
        SubParams { mode: 0x0007, name: "os", format: "fileno={f}" },
        SubParams { mode: 0x0009, name: "dvgt", format: "drive={d}" },
        SubParams { mode: 0x000A, name: "fdgt", format: "fileno={f}" },
        SubParams { mode: 0x000B, name: "rtset", format: "count={w}, time={w}" },
        SubParams { mode: 0x000C, name: "dvctl", format: "fileno={f}, f_code={w}, ptr={p}" },
        SubParams { mode: 0x000D, name: "fdctl", format: "drive={d}, f_code={w}, ptr={p}" },
    ],
    low_byte: false,
};

static EXEC: SubCmd = SubCmd {
    params: &[
        SubParams { mode: 0x00, name: "loadexec", format: "file={s}, cmdline={s}, envptr={p}" },
        SubParams { mode: 0x01, name: "load", format: "file={s}, cmdline={s}, envptr={p}" },
        SubParams { mode: 0x02, name: "pathchk", format: "file={s}, cmdline={s}, envptr={p}" },
        SubParams { mode: 0x03, name: "loadonly", format: "file={s}, loadadr={p}, limit={p}" },
        SubParams { mode: 0x04, name: "execonly", format: "execadr={p}" },
        SubParams { mode: 0x05, name: "bindno", format: "file={s}, file2={s}" },
    ],
    low_byte: true,
};

static MALLOC2: SubCmd = SubCmd {
    params: &[
        SubParams { mode: 0x0000, name: "low", format: "len={l}" },
        SubParams { mode: 0x0001, name: "minimum", format: "len={l}" },
        SubParams { mode: 0x0002, name: "high", format: "len={l}" },
        SubParams { mode: 0x8000, name: "ex,low", format: "len={l}, oya_mcb={p}" },
        SubParams { mode: 0x8001, name: "ex,minimum", format: "len={l}, oya_mcb={p}" },
        SubParams { mode: 0x8002, name: "ex,high", format: "len={l}, oya_mcb={p}" },
    ],
    low_byte: false,
};

static ASSIGN: SubCmd = SubCmd {
    params: &[
        SubParams { mode: 0x0000, name: "getassign", format: "buffer1={s}, buffer2={p}" },
        SubParams { mode: 0x0001, name: "makeassign", format: "buffer1={s}, buffer2={s}, mode={w}" },
        SubParams { mode: 0x0004, name: "rassign", format: "buffer1={s}" },
    ],
    low_byte: false,
};

/// Name, argument format and optional mode sub-table of a call.
fn dos_call_spec(code: u8) -> (Option<&'static str>, Option<&'static str>, Option<&'static SubCmd>) {
    match code {
        0x00 => (Some("EXIT"), Some(""), None),
        0x01 => (Some("GETCHAR"), Some(""), None),
        0x02 => (Some("PUTCHAR"), Some("code={c}"), None),
        0x06 => (Some("INPOUT"), Some("code={c}"), None),
        0x07 => (Some("INKEY"), Some(""), None),
        0x08 => (Some("GETC"), Some(""), None),
        0x09 => (Some("PRINT"), Some("mesptr={s}"), None),
        0x0A => (Some("GETS"), Some("inpptr={p}"), None),
        0x0B => (Some("KEYSNS"), Some(""), None),
        0x0C => (Some("KFLUSH"), Some("mode={w}"), Some(&KFLUSH)),
        0x0D => (Some("FFLUSH"), Some(""), None),
        0x0E => (Some("CHGDRV"), Some("drive={d}"), None),
        0x0F => (Some("DRVCTRL"), Some("mode={w}"), None),
        0x10 => (Some("CONSNS"), Some(""), None),
        0x11 => (Some("PRNSNS"), Some(""), None),
        0x12 => (Some("CINSNS"), Some(""), None),
        0x13 => (Some("COUTSNS"), Some(""), None),
        0x19 => (Some("CURDRV"), Some(""), None),
        0x1A => (Some("GETSS"), Some("inpptr={p}"), None),
        0x1B => (Some("FGETC"), Some("fileno={f}"), None),
        0x1C => (Some("FGETS"), Some("buffer={p}, fileno={f}"), None),
        0x1D => (Some("FPUTC"), Some("code={c}, fileno={f}"), None),
        0x1E => (Some("FPUTS"), Some("mesptr={s}, fileno={f}"), None),
        0x1F => (Some("ALLCLOSE"), Some(""), None),
        0x20 => (Some("SUPER"), Some("stack={p}"), None),
        0x21 => (Some("FNCKEY"), Some("mode={w}, buffer={p}"), None),
        0x23 => (Some("CONCTRL"), Some("md={w}"), Some(&CONCTRL)),
        0x24 => (Some("KEYCTRL"), Some("md={w}"), Some(&KEYCTRL)),
        0x25 => (Some("INTVCS"), Some("intno={w}, jobadr={p}"), None),
        0x26 => (Some("PSPSET"), Some("pspadr={p}"), None),
        0x27 => (Some("GETTIM2"), Some(""), None),
        0x28 => (Some("SETTIM2"), Some("time={l}"), None),
        0x29 => (Some("NAMESTS"), Some("file={s}, buffer={p}"), None),
        0x2A => (Some("GETDATE"), Some(""), None),
        0x2B => (Some("SETDATE"), Some("date={w}"), None),
        0x2C => (Some("GETTIME"), Some(""), None),
        0x2D => (Some("SETTIME"), Some("time={w}"), None),
        0x30 => (Some("VERNUM"), Some(""), None),
        0x31 => (Some("KEEPPR"), Some("prglen={l}, code={w}"), None),
        0x32 => (Some("GETDPB"), Some("drive={d}, buffer={p}"), None),
        0x33 => (Some("BREAKCK"), Some("mode={w}"), None),
        0x34 => (Some("DRVXCHG"), Some("old={d}, new={d}"), None),
        0x35 => (Some("INTVCG"), Some("intno={w}"), None),
        0x36 => (Some("DSKFRE"), Some("drive={d}, buffer={p}"), None),
        0x37 => (Some("NAMECK"), Some("file={s}, buffer={p}"), None),
        0x39 => (Some("MKDIR"), Some("file={s}"), None),
        0x3A => (Some("RMDIR"), Some("file={s}"), None),
        0x3B => (Some("CHDIR"), Some("file={s}"), None),
        0x3C => (Some("CREATE"), Some("file={s}, atr={w}"), None),
        0x3D => (Some("OPEN"), Some("file={s}, mode={w}"), None),
        0x3E => (Some("CLOSE"), Some("fileno={f}"), None),
        0x3F => (Some("READ"), Some("fileno={f}, buffer={p}, len={l}"), None),
        0x40 => (Some("WRITE"), Some("fileno={f}, buffer={p}, len={l}"), None),
        0x41 => (Some("DELETE"), Some("file={s}"), None),
        0x42 => (Some("SEEK"), Some("fileno={f}, offset={l}, mode={w}"), None),
        0x43 => (Some("CHMOD"), Some("file={s}, atr={w}"), None),
        0x44 => (Some("IOCTRL"), Some("md={w}"), Some(&IOCTRL)),
        0x45 => (Some("DUP"), Some("fileno={f}"), None),
        0x46 => (Some("DUP2"), Some("fileno={f}, newno={f}"), None),
        0x47 => (Some("CURDIR"), Some("drive={d}, buffer={p}"), None),
        0x48 => (Some("MALLOC"), Some("len={l}"), None),
        0x49 => (Some("MFREE"), Some("memptr={p}"), None),
        0x4A => (Some("SETBLOCK"), Some("memptr={p}, len={l}"), None),
        0x4B => (Some("EXEC"), Some("md={w}"), Some(&EXEC)),
        0x4C => (Some("EXIT2"), Some("code={w}"), None),
        0x4E => (Some("FILES"), Some("buffer={p}, file={s}, atr={w}"), None),
        0x4F => (Some("NFILES"), Some("buffer={p}"), None),
        0x51 => (Some("GETPDB"), Some(""), None),
        0x53 => (Some("GETENV"), Some("name={s}, env={p}, buffer={p}"), None),
        0x54 => (Some("VERIFYG"), Some(""), None),
        0x56 => (Some("RENAME"), Some("old={s}, new={s}"), None),
        0x57 => (Some("FILEDATE"), Some("fileno={f}, datetime={l}"), None),
        0x58 => (Some("MALLOC2"), Some("md={w}"), Some(&MALLOC2)),
        0x5A => (Some("MAKETMP"), Some("file={s}, atr={w}"), None),
        0x5B => (Some("NEWFILE"), Some("file={s}, atr={w}"), None),
        0x5F => (Some("ASSIGN"), Some("md={w}"), Some(&ASSIGN)),
        0x60 => (Some("MALLOC3"), Some("len={l}"), None),
        0x61 => (Some("SETBLOCK2"), Some("memptr={p}, len={l}"), None),
        0x62 => (Some("MALLOC4"), Some("md={w}"), Some(&MALLOC2)),
        0x7C => (Some("GETFCB"), Some("fileno={f}"), None),
        0xF6 => (Some("SUPER_JSR"), Some("jobadr={p}"), None),
        0xF7 => (Some("BUS_ERR"), Some("s_adr={p}, d_adr={p}, size={w}"), None),
        _ => (None, None, None),
    }
}

impl Emulator {
    /// Renders one `{x}` argument, advancing the stacked parameter cursor.
    fn trace_arg(&self, kind: u8, p: &mut u32, out: &mut String) {
        use std::fmt::Write;
        match kind {
            b'b' => {
                if let Ok(v) = self.mem.read_u8_super(*p) {
                    let _ = write!(out, "${v:02x}");
                }
                *p += 1;
            }
            b'w' => {
                if let Ok(v) = self.read_param_word(p) {
                    let _ = write!(out, "${v:04x}");
                }
            }
            b'c' => {
                if let Ok(v) = self.read_param_word(p) {
                    let c = (v & 0xFF) as u8;
                    if c.is_ascii_graphic() || c == b' ' {
                        let _ = write!(out, "'{}'", c as char);
                    } else {
                        let _ = write!(out, "${v:04x}");
                    }
                }
            }
            b'l' => {
                if let Ok(v) = self.read_param_long(p) {
                    let _ = write!(out, "${v:08x}");
                }
            }
            b'p' => {
                if let Ok(v) = self.read_param_long(p) {
                    let _ = write!(out, "${v:08x}");
                }
            }
            b'f' => {
                if let Ok(v) = self.read_param_word(p) {
                    let _ = write!(out, "{v}");
                }
            }
            b'd' => {
                if let Ok(v) = self.read_param_word(p) {
                    match v {
                        0 => out.push_str("current"),
                        1..=26 => out.push((b'A' + v as u8 - 1) as char),
                        _ => {
                            let _ = write!(out, "{v}(??)");
                        }
                    }
                }
            }
            b's' => {
                if let Ok(adr) = self.read_param_long(p) {
                    match self.mem.read_string_super(adr) {
                        Ok(bytes) => {
                            let text = String::from_utf8_lossy(&bytes[..bytes.len().min(40)]);
                            let _ = write!(out, "\"{text}\"");
                        }
                        Err(_) => {
                            let _ = write!(out, "${adr:08x}");
                        }
                    }
                }
            }
            _ => out.push('?'),
        }
    }

    fn trace_format(&self, format: &str, p: &mut u32, out: &mut String) {
        let bytes = format.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'{' && i + 2 < bytes.len() && bytes[i + 2] == b'}' {
                self.trace_arg(bytes[i + 1], p, out);
                i += 3;
            } else {
                out.push(bytes[i] as char);
                i += 1;
            }
        }
    }

    /// One trace line for the DOS call about to run.
    pub(crate) fn print_dos_trace(&mut self, code: u8) -> Result<(), Fault> {
        let (name, format, sub) = dos_call_spec(code);
        let name = name.unwrap_or("????????");
        let mut p = self.a[7];
        let mut args = String::new();

        match (format, sub) {
            (Some(format), None) => self.trace_format(format, &mut p, &mut args),
            (Some(format), Some(sub)) => {
                self.trace_format(format, &mut p, &mut args);
                if let Ok(mode) = self.mem.read_u16_super(self.a[7]) {
                    let key = if sub.low_byte { mode & 0xFF } else { mode };
                    if let Some(entry) = sub.params.iter().find(|s| s.mode == key) {
                        use std::fmt::Write;
                        let _ = write!(args, " [{}] ", entry.name);
                        self.trace_format(entry.format, &mut p, &mut args);
                    }
                }
            }
            _ => args.push_str("not emulated"),
        }

        eprintln!("${:06x} $FF{:02X}: DOS _{} ({})", self.op_pc, code, name, args);
        Ok(())
    }
}
