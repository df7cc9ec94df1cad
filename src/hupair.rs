// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HUPAIR command line packaging.
//!
//! The command line block is always framed for HUPAIR: an 8-byte
//! `"#HUPAIR\0"` marker, the classic length byte + text + NUL, then the
//! program name as NUL-terminated text. Programs only need to understand
//! the extension when the text exceeds 255 bytes, which is checked
//! against their entry prologue before control is transferred.

use crate::exception::Fault;
use crate::human68k::{CallError, DosError, MallocMode, MALLOC_MASK};
use crate::Emulator;

const HUPAIR_MARK: &[u8; 8] = b"#HUPAIR\0";

/// One quoting step: how many bytes can be emitted with which quote
/// character (0 for none).
fn quoting_type(s: &[u8]) -> (usize, u8) {
    for (i, &c) in s.iter().enumerate() {
        if c == b'"' || c == b'\'' {
            return quote_found(s, i + 1, c);
        }
        if c == b' ' {
            return space_found(s, i + 1);
        }
    }
    (s.len(), 0)
}

/// A quote character inside the argument: everything up to the first
/// occurrence of the *other* quote can be wrapped in that other quote.
fn quote_found(s: &[u8], from: usize, c: u8) -> (usize, u8) {
    let quot = c ^ b'"' ^ b'\'';
    let end = s[from..].iter().position(|&x| x == quot).map(|p| from + p).unwrap_or(s.len());
    (end, quot)
}

/// A space inside the argument: pick the quote character not used later.
fn space_found(s: &[u8], from: usize) -> (usize, u8) {
    for (i, &c) in s[from..].iter().enumerate() {
        if c == b'"' || c == b'\'' {
            return quote_found(s, from + i + 1, c);
        }
    }
    (s.len(), b'"')
}

/// Quotes and joins the argument vector like the HUPAIR encoder does.
fn encode_arguments(args: &[Vec<u8>]) -> Vec<u8> {
    let mut text = Vec::new();
    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            text.push(b' ');
        }
        if arg.is_empty() {
            text.extend_from_slice(b"\"\"");
            continue;
        }

        let mut rest: &[u8] = arg;
        while !rest.is_empty() {
            let (len, quote) = quoting_type(rest);
            if quote != 0 {
                text.push(quote);
            }
            text.extend_from_slice(&rest[..len]);
            if quote != 0 {
                text.push(quote);
            }
            rest = &rest[len..];
        }
    }
    text
}

impl Emulator {
    /// Builds the command line block in a fresh allocation owned by
    /// `parent` and returns the guest address of the length byte, along
    /// with whether the line needs a HUPAIR-aware program.
    pub(crate) fn encode_hupair(
        &mut self,
        args: &[Vec<u8>],
        argv0: &[u8],
        parent: u32,
    ) -> Result<(u32, bool), CallError> {
        let text = encode_arguments(args);
        let need_hupair = text.len() > 255;

        let mut block = Vec::with_capacity(HUPAIR_MARK.len() + text.len() + argv0.len() + 10);
        block.extend_from_slice(HUPAIR_MARK);
        block.push(text.len().min(255) as u8);
        block.extend_from_slice(&text);
        block.push(0);
        block.extend_from_slice(argv0);
        block.push(0);

        let size = self.malloc(MallocMode::FromLower, u32::MAX, parent)? & MALLOC_MASK;
        let adr = self.malloc(MallocMode::FromLower, size, parent)?;
        if adr >= 0x8000_0000 {
            return Err(DosError::NoMemory.into());
        }
        if (block.len() as u32) > size {
            self.mfree(adr)?;
            return Err(DosError::NoMemory.into());
        }

        let span = self
            .mem
            .writable(adr, block.len() as u32, true)
            .ok_or(Fault::bus_write(adr))?;
        span[..block.len()].copy_from_slice(&block);
        self.setblock(adr, block.len() as u32)?;

        Ok((adr + HUPAIR_MARK.len() as u32, need_hupair))
    }

    /// Looks for the HUPAIR marker in the program's entry prologue.
    pub(crate) fn is_hupair_compliant(&self, entry: u32, load_top: u32, prog_size: u32) -> bool {
        let program_end = load_top.wrapping_add(prog_size);
        let window = program_end.saturating_sub(entry).min(0x100);
        match self.mem.readable(entry, window, true) {
            Some(span) => span
                .windows(HUPAIR_MARK.len() - 1)
                .any(|w| w == &HUPAIR_MARK[..HUPAIR_MARK.len() - 1]),
            None => false,
        }
    }
}
