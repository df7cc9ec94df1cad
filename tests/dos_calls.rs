// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DOS and FEFUNC behavior driven through guest code.

use x68run::host::LocalHost;
use x68run::{Emulator, Settings};

fn machine() -> Emulator {
    Emulator::new(Settings::default(), Box::new(LocalHost::new())).unwrap()
}

/// Writes instruction words at `base` and points the CPU there.
fn setup(emu: &mut Emulator, base: u32, words: &[u16]) {
    let mut adr = base;
    for &w in words {
        emu.mem.write_u16_super(adr, w).unwrap();
        adr += 2;
    }
    emu.pc = base;
    emu.a[7] = base + 0x4000;
}

/// FEFUNC law: __STOL(__LTOS(n)) == n, with C and N clear afterwards.
#[test]
fn stol_of_ltos_is_identity() {
    for n in [0i32, 1, 42, -1, -123_456, i32::MAX, i32::MIN + 1] {
        let mut emu = machine();
        setup(&mut emu, 0x40000, &[0xFE11, 0xFE10]); // __LTOS; __STOL

        let buffer = 0x60000;
        emu.d[0] = n as u32;
        emu.a[0] = buffer;
        emu.single_step().unwrap(); // __LTOS

        emu.a[0] = buffer;
        emu.single_step().unwrap(); // __STOL

        assert_eq!(emu.d[0] as i32, n, "round trip of {n}");
        assert!(!emu.sr.c);
        assert!(!emu.sr.n);
    }
}

/// FEFUNC double add keeps the MSW-first register convention.
#[test]
fn dadd_computes_in_d0_d1() {
    let mut emu = machine();
    setup(&mut emu, 0x40000, &[0xFE2B]); // __DADD

    let a = 1.5f64.to_bits();
    let b = 2.25f64.to_bits();
    emu.d[0] = (a >> 32) as u32;
    emu.d[1] = a as u32;
    emu.d[2] = (b >> 32) as u32;
    emu.d[3] = b as u32;
    emu.single_step().unwrap();

    let result = f64::from_bits((emu.d[0] as u64) << 32 | emu.d[1] as u64);
    assert_eq!(result, 3.75);
    assert!(!emu.sr.c);
}

/// FEFUNC __LDIV by zero reports through the carry flag.
#[test]
fn ldiv_by_zero_sets_carry() {
    let mut emu = machine();
    setup(&mut emu, 0x40000, &[0xFE01]);
    emu.d[0] = 100;
    emu.d[1] = 0;
    emu.single_step().unwrap();
    assert!(emu.sr.c);
}

/// DOS _GETENV walks the KEY=VALUE records of the environment block.
#[test]
fn getenv_finds_records() {
    let mut emu = machine();

    // Environment block: size prefix, records, empty terminator.
    let env = 0x58000;
    emu.mem.write_u32_super(env, 0x1000).unwrap();
    emu.mem.write_u8_super(env + 4, 0).unwrap();
    emu.put_env(env, "PATH", "A:\\bin").unwrap();
    emu.put_env(env, "TEMP", "A:\\tmp").unwrap();

    let name = 0x59000;
    let buffer = 0x59100;
    emu.mem.write_string_super(name, b"TEMP").unwrap();

    // MOVE.L #buffer,-(SP); MOVE.L #env,-(SP); MOVE.L #name,-(SP); DOS _GETENV
    let mut words = vec![0x2F3C];
    words.extend_from_slice(&[(buffer >> 16) as u16, buffer as u16]);
    words.push(0x2F3C);
    words.extend_from_slice(&[(env >> 16) as u16, env as u16]);
    words.push(0x2F3C);
    words.extend_from_slice(&[(name >> 16) as u16, name as u16]);
    words.push(0xFF53);
    setup(&mut emu, 0x40000, &words);

    for _ in 0..4 {
        emu.single_step().unwrap();
    }
    assert_eq!(emu.d[0], 0);
    assert_eq!(emu.mem.read_string_super(buffer).unwrap(), b"A:\\tmp");
}

/// DOS _GETENV misses with ILGFNC.
#[test]
fn getenv_miss_is_an_error() {
    let mut emu = machine();
    let env = 0x58000;
    emu.mem.write_u32_super(env, 0x1000).unwrap();
    emu.mem.write_u8_super(env + 4, 0).unwrap();

    let name = 0x59000;
    emu.mem.write_string_super(name, b"MISSING").unwrap();

    let buffer = 0x59100u32;
    let mut words = vec![0x2F3C];
    words.extend_from_slice(&[(buffer >> 16) as u16, buffer as u16]);
    words.push(0x2F3C);
    words.extend_from_slice(&[(env >> 16) as u16, env as u16]);
    words.push(0x2F3C);
    words.extend_from_slice(&[(name >> 16) as u16, name as u16]);
    words.push(0xFF53);
    setup(&mut emu, 0x40000, &words);

    for _ in 0..4 {
        emu.single_step().unwrap();
    }
    assert_eq!(emu.d[0] as i32, -1);
}

/// DOS _GETDATE and _GETTIME return the documented packings.
#[test]
fn date_and_time_packings() {
    let mut emu = machine();
    setup(&mut emu, 0x40000, &[0xFF2A, 0xFF2C]); // _GETDATE; _GETTIME

    emu.single_step().unwrap();
    let date = emu.d[0];
    let wday = date >> 16 & 7;
    let year = (date >> 9 & 0x7F) + 1980;
    let month = date >> 5 & 0x0F;
    let day = date & 0x1F;
    assert!(wday < 7);
    assert!((2020..=2099).contains(&year));
    assert!((1..=12).contains(&month));
    assert!((1..=31).contains(&day));

    emu.single_step().unwrap();
    let time = emu.d[0];
    let hour = time >> 11 & 0x1F;
    let min = time >> 5 & 0x3F;
    let sec2 = time & 0x1F;
    assert!(hour < 24);
    assert!(min < 60);
    assert!(sec2 < 30);
}

/// DOS _MAKETMP replaces `?` with digits and skips existing names.
#[test]
fn maketmp_increments_past_existing_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("t0.tmp"), b"").unwrap();

    let mut emu = machine();
    let template = format!("{}/t?.tmp\0", dir.path().to_str().unwrap());
    let path_adr = 0x59000;
    emu.mem.write_string_super(path_adr, template.as_bytes()).unwrap();

    // MOVE.W #$20,-(SP); MOVE.L #path,-(SP) reversed order: path then atr.
    let mut words = vec![0x3F3C, 0x0020];
    words.push(0x2F3C);
    words.extend_from_slice(&[(path_adr >> 16) as u16, path_adr as u16]);
    words.push(0xFF5A);
    setup(&mut emu, 0x40000, &words);

    for _ in 0..3 {
        emu.single_step().unwrap();
    }

    assert!(emu.d[0] as i32 >= 5, "got handle {}", emu.d[0] as i32);
    assert!(dir.path().join("t1.tmp").exists());
    // The rewritten name is visible in the guest buffer.
    let s = emu.mem.read_string_super(path_adr).unwrap();
    assert!(s.ends_with(b"t1.tmp"));
}

/// DOS _VERNUM identifies Human68k v3.02.
#[test]
fn vernum_reports_302() {
    let mut emu = machine();
    setup(&mut emu, 0x40000, &[0xFF30]);
    emu.single_step().unwrap();
    assert_eq!(emu.d[0], 0x3638_0302);
}

/// The v2 alias range folds onto the same handlers.
#[test]
fn v2_alias_calls_fold() {
    let mut emu = machine();
    setup(&mut emu, 0x40000, &[0xFF83]); // alias of _GETENV ($FF53)
    let env = 0x58000;
    emu.mem.write_u32_super(env, 0x1000).unwrap();
    emu.mem.write_u8_super(env + 4, 0).unwrap();

    let name = 0x59000;
    emu.mem.write_string_super(name, b"NOPE").unwrap();
    // Arguments directly on the stack.
    emu.a[7] = 0x44000;
    emu.mem.write_u32_super(0x44000, name).unwrap();
    emu.mem.write_u32_super(0x44004, env).unwrap();
    emu.mem.write_u32_super(0x44008, 0x59100).unwrap();

    emu.single_step().unwrap();
    assert_eq!(emu.d[0] as i32, -1);
}
