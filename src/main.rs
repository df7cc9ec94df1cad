// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The x68run command line front end.

use anyhow::Context;

use x68run::host::LocalHost;
use x68run::machine::{BootError, HIGH_MEMORY_SIZES_MB};
use x68run::{Emulator, Settings};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_title() {
    eprintln!("x68run {VERSION}  Human68k console emulator");
}

fn print_usage() {
    eprintln!(
        "Usage: x68run [options] execute_filename [commandline]\n\
         \x20 -himem=<mb>  allocate high memory\n\
         \x20 -f           function call trace\n\
         \x20 -tr <adr>    mpu instruction trap\n\
         \x20 -io          pass console bytes through unconverted\n\
         \x20 -utf8        translate read-only file contents to Shift_JIS"
    );
}

fn parse_himem(arg: &str) -> Option<u32> {
    let mb: u32 = arg.strip_prefix("-himem=")?.parse().ok()?;
    if HIGH_MEMORY_SIZES_MB.contains(&mb) {
        Some(mb * 1024 * 1024)
    } else {
        None
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let argv: Vec<String> = std::env::args().collect();
    let mut settings = Settings::default();
    let mut i = 1;

    while i < argv.len() && argv[i].starts_with('-') {
        let flag = &argv[i];
        match flag.as_str() {
            "-f" => settings.trace_func = true,
            "-debug" => settings.debug = true,
            "-io" => settings.iothrough = true,
            "-utf8" => settings.read_file_utf8 = true,
            "-tr" => {
                i += 1;
                let adr = argv.get(i).context("-trにはアドレスを指定してください")?;
                settings.trap_pc = u32::from_str_radix(adr.trim_start_matches('$'), 16)
                    .with_context(|| format!("16進アドレス指定は無効です。(\"{adr}\")"))?;
            }
            _ if flag.starts_with("-tr") => {
                let adr = &flag[3..];
                settings.trap_pc = u32::from_str_radix(adr.trim_start_matches('$'), 16)
                    .with_context(|| format!("16進アドレス指定は無効です。(\"{adr}\")"))?;
            }
            _ if flag.starts_with("-himem=") => match parse_himem(flag) {
                Some(size) => settings.high_memory_size = size,
                None => {
                    eprintln!(
                        "ハイメモリの容量は16,32,64,128,256,384,512,768の\
                         いずれかを指定する必要があります。"
                    );
                    std::process::exit(1);
                }
            },
            _ => eprintln!("無効なフラグ'{flag}'は無視されます。"),
        }
        i += 1;
    }

    if i >= argv.len() {
        print_title();
        print_usage();
        std::process::exit(1);
    }

    let program = argv[i].clone();
    let args = argv[i + 1..].to_vec();

    let mut emu = Emulator::new(settings, Box::new(LocalHost::new()))
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    match emu.run_program(&program, &args) {
        Ok(code) => std::process::exit(code),
        Err(BootError::ProgramNotFound(name)) => {
            eprintln!("x68run:Program '{name}' was not found.");
            std::process::exit(1);
        }
        Err(BootError::Fault(_)) => {
            // The runner already printed the abort report.
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
