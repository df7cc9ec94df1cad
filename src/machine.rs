// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Machine bring-up and the runner loop.
//!
//! [`Emulator::new`] builds the OS work area, vector table and root PSP;
//! [`Emulator::run_program`] loads an executable, wires the entry register
//! contract and interprets instructions until the guest exits or a fault
//! escapes to the abort channel.

use thiserror::Error;

use crate::disassembler::disassemble;
use crate::dos::file::FileInfo;
use crate::dos::memory::AllocArea;
use crate::exception::{Fault, VECTOR_COUNT};
use crate::history::{History, OpInfo};
use crate::host::{Host, HostFile};
use crate::human68k::{
    trap_work, CallError, DosError, MallocMode, PathName, HUMAN_HEAD, HUMAN_TAIL, MEMBLK_END,
    NEST_MAX, OSWORK_MEMORY_END, OSWORK_ROOT_PSP, SIZEOF_MEMBLK, SIZEOF_PSP, STDERR_FILENO,
    STDIN_FILENO, STDOUT_FILENO,
};
use crate::interpreter::Control;
use crate::loader::{find_executable, ProgramSpec};
use crate::memory::{AddressSpace, ADDRESS_MASK, HIMEM_START};
use crate::{Emulator, StatusRegister};

pub const DEFAULT_MAIN_MEMORY_SIZE: u32 = 12 * 1024 * 1024;
pub const DEFAULT_STACK_SIZE: u32 = 64 * 1024;
pub const DEFAULT_ENV_SIZE: u32 = 8 * 1024;

/// Allowed high memory sizes in MiB.
pub const HIGH_MEMORY_SIZES_MB: [u32; 9] = [0, 16, 32, 64, 128, 256, 384, 512, 768];

/// Process-wide settings.
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    /// Main memory size; 1 to 12 MiB in 1 MiB steps.
    pub main_memory_size: u32,
    /// High memory size; one of [`HIGH_MEMORY_SIZES_MB`], in bytes.
    pub high_memory_size: u32,
    /// Break when the PC reaches this address (0 = off).
    pub trap_pc: u32,
    /// Function call trace.
    pub trace_func: bool,
    /// Stop before the first instruction (debugger hook).
    pub debug: bool,
    /// Pass console bytes through without Shift_JIS translation.
    pub iothrough: bool,
    /// Serve read-only files through a UTF-8 to Shift_JIS buffer.
    pub read_file_utf8: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            main_memory_size: DEFAULT_MAIN_MEMORY_SIZE,
            high_memory_size: 0,
            trap_pc: 0,
            trace_func: false,
            debug: false,
            iothrough: false,
            read_file_utf8: false,
        }
    }
}

/// Failures surfacing from machine construction and program start.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("メインメモリの容量は1～12MBの範囲で指定する必要があります。")]
    BadMainMemorySize,
    #[error("ハイメモリの容量は16,32,64,128,256,384,512,768のいずれかを指定する必要があります。")]
    BadHighMemorySize,
    #[error("ファイルがオープンできません: {0}")]
    ProgramNotFound(String),
    #[error("プロセス用のメモリを確保できません")]
    NoMemory,
    #[error("実行ファイルの形式が不正です")]
    BadExecutable,
    #[error(
        "コマンドライン文字列の長さが255バイトを超えましたが、\
         プログラムがHUPAIRに対応していないため実行できません。"
    )]
    HupairRequired,
    #[error("{0}")]
    Fault(#[from] Fault),
}

impl From<CallError> for BootError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Fault(f) => BootError::Fault(f),
            CallError::Dos(DosError::NoMemory) => BootError::NoMemory,
            CallError::Dos(_) => BootError::BadExecutable,
        }
    }
}

impl Emulator {
    /// Builds a machine: memory, vector table, OS work area and root PSP.
    pub fn new(settings: Settings, host: Box<dyn Host>) -> Result<Self, BootError> {
        if settings.main_memory_size == 0
            || settings.main_memory_size > 12 * 1024 * 1024
            || settings.main_memory_size % (1024 * 1024) != 0
        {
            return Err(BootError::BadMainMemorySize);
        }
        if !HIGH_MEMORY_SIZES_MB.contains(&(settings.high_memory_size / (1024 * 1024)))
            || settings.high_memory_size % (1024 * 1024) != 0
        {
            return Err(BootError::BadHighMemorySize);
        }

        let mut emu = Emulator {
            d: [0; 8],
            a: [0; 8],
            usp: 0,
            pc: 0,
            sr: StatusRegister::default(),
            mem: AddressSpace::new(settings.main_memory_size, settings.high_memory_size),
            settings,
            host,
            files: std::array::from_fn(|_| FileInfo::default()),
            psp: [0; NEST_MAX],
            nest_pc: [0; NEST_MAX],
            nest_sp: [0; NEST_MAX],
            nest_cnt: 0,
            alloc_area: AllocArea::MainOnly,
            superjsr_ret: 0,
            history: History::new(),
            op_info: OpInfo::default(),
            op_pc: 0,
            default_vectors: [0; VECTOR_COUNT],
            rng_state: 1,
        };

        emu.mem.write_u32_super(OSWORK_MEMORY_END, emu.settings.main_memory_size)?;
        emu.init_vector_table()?;
        emu.init_root_psp()?;
        emu.write_device_headers()?;

        // Everything up to the Human68k tail is supervisor-only; the area
        // set register works in 8 KiB steps.
        emu.mem.supervisor_end = HUMAN_TAIL;

        emu.link_high_memory()?;
        emu.init_std_files();

        Ok(emu)
    }

    /// The default exception and call vectors: `rte`/`rts` stubs in the
    /// OS work area and per-trap default markers.
    fn init_vector_table(&mut self) -> Result<(), Fault> {
        let rte = crate::human68k::HUMAN_WORK;
        let rts = crate::human68k::HUMAN_WORK + 2;
        self.mem.write_u16_super(rte, 0x4E73)?;
        self.mem.write_u16_super(rts, 0x4E75)?;

        let mut vectors: Vec<(u32, u32)> = vec![
            (0x20, rte), // privilege violation returns to the program
            (0x28, rte), // A-line
            (0x2C, rte), // F-line
            (0x118, 0),  // V-DISP handler slot
            (0x138, 0),  // CRTC-IRQ handler slot
        ];
        for n in 0..=8 {
            vectors.push((0x80 + n * 4, trap_work(n)));
        }

        for (vector, handler) in vectors {
            // A handler address whose tag byte would point into high
            // memory loses the tag.
            let h = if self.mem.to_physical(handler) < HIMEM_START {
                handler
            } else {
                handler & ADDRESS_MASK
            };
            self.mem.write_u32_super(vector, h)?;
        }

        // IOCS and DOS call vectors all lead to an rts stub.
        for i in 0..256u32 {
            self.mem.write_u32_super(crate::human68k::IOCSCALL_ADRS_TABLE + i * 4, rts)?;
            self.mem.write_u32_super(crate::human68k::DOSCALL_ADRS_TABLE + i * 4, rts)?;
        }

        // IOCS work area: screen columns - 1 and rows - 1.
        self.mem.write_u16_super(0x970, 79)?;
        self.mem.write_u16_super(0x972, 24)?;

        for vecno in 0..VECTOR_COUNT {
            self.default_vectors[vecno] = self.mem.read_u32_super(vecno as u32 * 4)?;
        }
        Ok(())
    }

    /// The memory block and PSP of the resident Human68k image.
    fn init_root_psp(&mut self) -> Result<(), Fault> {
        let human_psp = HUMAN_HEAD;
        self.build_memory_block(human_psp, 0, 0, HUMAN_TAIL, 0)?;

        let spec = ProgramSpec {
            code_size: HUMAN_TAIL - (human_psp + SIZEOF_PSP),
            bss_size: 0,
        };
        let name = PathName {
            path: "A:\\".into(),
            name: "HUMAN.SYS".into(),
            name_len: 5,
            ext_len: 4,
        };
        self.build_psp(human_psp, 0xFFFF_FFFF, 0, 0x2000, human_psp, spec, &name)?;
        self.mem.write_u32_super(OSWORK_ROOT_PSP, human_psp)?;
        self.psp[0] = human_psp;
        self.nest_cnt = 0;
        Ok(())
    }

    /// A dummy NUL device header is the whole device chain.
    fn write_device_headers(&mut self) -> Result<(), Fault> {
        let adr = 0xFA50;
        self.mem.write_u32_super(adr, 0xFFFF_FFFF)?;
        self.mem.write_u16_super(adr + 4, 0x8024)?;
        self.mem.write_u32_super(adr + 6, 0)?;
        self.mem.write_u32_super(adr + 10, 0)?;
        let mut name_adr = adr + 14;
        for b in *b"NUL     " {
            self.mem.write_u8_super(name_adr, b)?;
            name_adr += 1;
        }
        Ok(())
    }

    /// Joins high memory onto the memory block chain with a bridging
    /// block whose payload starts at the high memory base.
    fn link_high_memory(&mut self) -> Result<(), Fault> {
        if !self.mem.has_high_memory() {
            return Ok(());
        }
        let human_psp = HUMAN_HEAD;
        let buf = self.malloc(MallocMode::FromHigher, 0, human_psp)?;
        if buf >= 0x8000_0000 {
            return Ok(());
        }
        self.mem.write_u32_super(buf - SIZEOF_MEMBLK + MEMBLK_END, HIMEM_START)?;
        self.mem.write_u32_super(OSWORK_MEMORY_END, self.mem.high_end())?;
        Ok(())
    }

    fn init_std_files(&mut self) {
        use crate::human68k::OpenMode;
        self.files[STDIN_FILENO] = FileInfo {
            host: Some(HostFile::Stdin),
            is_opened: true,
            mode: OpenMode::Read,
            nest: 0,
            name: String::new(),
            onmemory: None,
        };
        self.files[STDOUT_FILENO] = FileInfo {
            host: Some(HostFile::Stdout),
            is_opened: true,
            mode: OpenMode::Write,
            nest: 0,
            name: String::new(),
            onmemory: None,
        };
        self.files[STDERR_FILENO] = FileInfo {
            host: Some(HostFile::Stderr),
            is_opened: true,
            mode: OpenMode::Write,
            nest: 0,
            name: String::new(),
            onmemory: None,
        };
    }

    /// The environment block: a size prefix and an empty record list.
    fn init_env(&mut self, size: u32, parent: u32) -> Result<u32, BootError> {
        let buf = self.malloc(MallocMode::FromLower, size, parent)?;
        if buf >= 0x8000_0000 {
            return Err(BootError::NoMemory);
        }
        self.mem.write_u32_super(buf, size)?;
        self.mem.write_u8_super(buf + 4, 0)?;
        Ok(buf)
    }

    /// Appends a `KEY=VALUE` record to the environment block.
    pub fn put_env(&mut self, env: u32, key: &str, value: &str) -> Result<bool, Fault> {
        let size = self.mem.read_u32_super(env)?;
        let mut kv = env + 4;
        loop {
            let len = self.mem.read_string_super(kv)?.len() as u32;
            if len == 0 {
                break;
            }
            kv += len + 1;
        }

        let record = format!("{key}={value}");
        let sjis = self
            .host
            .utf8_to_sjis(&record)
            .unwrap_or_else(|| record.clone().into_bytes());
        if kv + sjis.len() as u32 + 2 > env + size {
            return Ok(false);
        }
        self.mem.write_string_super(kv, &sjis)?;
        self.mem.write_u8_super(kv + sjis.len() as u32 + 1, 0)?;
        Ok(true)
    }

    /// Loads `program` with its arguments and runs it to completion,
    /// returning the guest's exit code.
    pub fn run_program(&mut self, program: &str, args: &[String]) -> Result<i32, BootError> {
        let human_psp = HUMAN_HEAD;

        let env = self.init_env(DEFAULT_ENV_SIZE, human_psp)?;

        let (mut file, found) = match find_executable(program) {
            Ok(found) => found,
            Err(_) => return Err(BootError::ProgramNotFound(program.to_string())),
        };
        let found_str = found.to_string_lossy().into_owned();

        let pathname = self.host.canonical_path_name(&found_str).unwrap_or_else(|| {
            eprintln!(
                "x68run:Human68k形式のパス名に変換できないため、PSP内の実行ファイル名を\
                 \"A:\\PROG.X\"に変更します。"
            );
            PathName { path: "A:\\".into(), name: "PROG.X".into(), name_len: 4, ext_len: 2 }
        });

        // Command line block.
        let sjis_args: Vec<Vec<u8>> = args
            .iter()
            .map(|a| self.host.utf8_to_sjis(a).unwrap_or_else(|| a.clone().into_bytes()))
            .collect();
        let argv0 = self
            .host
            .utf8_to_sjis(&pathname.name)
            .unwrap_or_else(|| pathname.name.clone().into_bytes());
        let (cmdline, need_hupair) = self.encode_hupair(&sjis_args, &argv0, human_psp)?;

        // The initial stack still lives in main memory.
        let stack = self.malloc(MallocMode::FromLower, DEFAULT_STACK_SIZE, human_psp)?;
        if stack >= 0x8000_0000 {
            return Err(BootError::NoMemory);
        }
        let stack_bottom = stack + DEFAULT_STACK_SIZE;

        // From here on allocations may land in high memory too.
        self.set_alloc_area(AllocArea::Unlimited);

        let (payload, length) = self.malloc_all(human_psp)?;
        if payload >= 0x8000_0000 {
            return Err(BootError::NoMemory);
        }
        let program_psp = payload - SIZEOF_MEMBLK;

        let loaded = self.load_program_image(
            &mut file,
            &found_str,
            program_psp + SIZEOF_PSP,
            payload + length,
            crate::human68k::ExecType::Default,
        )?;

        if need_hupair
            && !self.is_hupair_compliant(loaded.entry, program_psp + SIZEOF_PSP, loaded.prog_size)
        {
            return Err(BootError::HupairRequired);
        }

        let spec = ProgramSpec {
            code_size: loaded.prog_size2,
            bss_size: loaded.prog_size - loaded.prog_size2,
        };
        self.build_psp(program_psp, env, cmdline, self.sr.word(), human_psp, spec, &pathname)?;

        // Entry register contract.
        self.pc = loaded.entry;
        self.a[0] = program_psp;
        self.a[1] = program_psp + SIZEOF_PSP + loaded.prog_size;
        self.a[2] = cmdline;
        self.a[3] = env;
        self.a[4] = loaded.entry;
        self.a[7] = stack_bottom;
        self.psp[0] = program_psp;
        self.nest_cnt = 0;
        self.superjsr_ret = 0;
        self.usp = 0;

        match self.run() {
            Ok(code) => Ok(code),
            Err(fault) => Err(BootError::Fault(fault)),
        }
    }

    /// Interprets instructions until the guest exits or a fault escapes;
    /// the abort path prints the diagnostic report first.
    pub fn run(&mut self) -> Result<i32, Fault> {
        self.history.clear();
        if self.settings.debug {
            // The interactive debugger is an external collaborator; the
            // hook just announces where single-stepping would begin.
            eprintln!("(x68run) debug: PC=${:06x}", self.pc);
        }
        loop {
            if self.superjsr_ret != 0 && self.pc == self.superjsr_ret {
                self.sr.s = false;
                self.superjsr_ret = 0;
            }
            if self.settings.trap_pc != 0 && self.pc == self.settings.trap_pc {
                eprintln!(
                    "(x68run) breakpoint:MPUがアドレス${:08x}の命令を実行しました。",
                    self.pc
                );
            }

            match self.step() {
                Ok(Control::Continue) => self.record_history(),
                Ok(Control::Exit) => {
                    self.record_history();
                    self.close_files(None);
                    return Ok((self.d[0] & 0xFF) as i32);
                }
                Err(fault) => {
                    self.record_history();
                    self.report_abort(&fault);
                    self.close_files(None);
                    return Err(fault);
                }
            }
        }
    }

    /// One instruction through the single-step hook, for embedders and
    /// the debugger collaborator.
    pub fn single_step(&mut self) -> Result<Control, Fault> {
        let control = self.step()?;
        self.record_history();
        Ok(control)
    }

    /// Read-only view of the instruction history ring.
    pub fn instruction_history(&self) -> &History {
        &self.history
    }

    /// The abort report: cause, PC, executed-instruction history and the
    /// faulting address.
    fn report_abort(&self, fault: &Fault) {
        match fault {
            Fault::Bus { adr, write } => {
                let dir = if *write { "への書き込み" } else { "からの読み込み" };
                let name = self.address_space_name(*adr);
                eprintln!(
                    "x68run exec error: {name}(${adr:08x}){dir}でバスエラーが発生しました。 PC={:06X}",
                    self.op_pc
                );
            }
            _ => {
                eprintln!("x68run exec error: {fault} PC={:06X}", self.op_pc);
            }
        }
        if let Fault::IllegalInstruction { opcode } = fault {
            eprintln!("code = {opcode:04X}");
        }

        self.display_history(10);

        let adr = fault.address().unwrap_or(self.pc);
        eprintln!("アドレス：${adr:08x}");
    }

    fn address_space_name(&self, adr: u32) -> &'static str {
        let adr = self.mem.to_physical(adr);
        if adr < self.mem.main_end() {
            return "メインメモリ(スーパーバイザ領域)";
        }
        match adr {
            0x0000_0000..=0x00BF_FFFF => "メインメモリ(未搭載)",
            0x00C0_0000..=0x00DF_FFFF => "GVRAM",
            0x00E0_0000..=0x00E7_FFFF => "TVRAM",
            0x00E8_0000..=0x00EF_FFFF => "I/Oポート",
            0x00F0_0000..=0x00FB_FFFF => "CGROM",
            0x00FC_0000..=0x00FF_FFFF => "IOCS ROM",
            _ => "不正なアドレス",
        }
    }

    /// Prints the last `n` executed instructions with their hex words and
    /// disassembly.
    fn display_history(&self, n: usize) {
        let count = n.min(self.history.len());
        eprintln!(
            "** EXECUTED INSTRUCTION HISTORY **\n\
             ADDRESS OPCODE                    MNEMONIC\n\
             -------------------------------------------------------"
        );
        for i in (0..count).rev() {
            let op = match self.history.entry(i) {
                Some(op) => op,
                None => continue,
            };
            let (text, mut next) = disassemble(&self.mem, op.pc);
            if next == op.pc {
                next = op.pc + 2;
            }

            let mut line = format!("${:08x} ", op.pc);
            let mut adr = op.pc;
            while adr < next {
                match self.mem.read_u16_super(adr) {
                    Ok(w) => line.push_str(&format!("{w:04x} ")),
                    Err(_) => {
                        line.push_str("(read error) ");
                        break;
                    }
                }
                adr += 2;
            }
            while line.len() < 34 {
                line.push(' ');
            }
            eprintln!("{line}{text}");
        }
    }
}

/// A small machine for unit tests.
#[cfg(test)]
pub(crate) fn test_machine() -> Emulator {
    use crate::host::LocalHost;
    let settings = Settings { main_memory_size: 1024 * 1024, ..Settings::default() };
    Emulator::new(settings, Box::new(LocalHost::new())).expect("test machine")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::human68k::{MALLOC_MASK, MEMBLK_NEXT, MEMBLK_PREV};

    #[test]
    fn settings_are_validated() {
        use crate::host::LocalHost;
        let bad = Settings { main_memory_size: 13 * 1024 * 1024, ..Settings::default() };
        assert!(matches!(
            Emulator::new(bad, Box::new(LocalHost::new())),
            Err(BootError::BadMainMemorySize)
        ));
        let bad = Settings { high_memory_size: 7 * 1024 * 1024, ..Settings::default() };
        assert!(matches!(
            Emulator::new(bad, Box::new(LocalHost::new())),
            Err(BootError::BadHighMemorySize)
        ));
    }

    #[test]
    fn boot_builds_the_root_block() {
        let emu = test_machine();
        assert_eq!(emu.mem.read_u32_super(OSWORK_ROOT_PSP).unwrap(), HUMAN_HEAD);
        assert_eq!(emu.mem.read_u32_super(HUMAN_HEAD + MEMBLK_PREV).unwrap(), 0);
        assert_eq!(emu.mem.read_u32_super(HUMAN_HEAD + MEMBLK_END).unwrap(), HUMAN_TAIL);
        // The default F-line vector leads to the rte stub.
        assert_eq!(
            emu.mem.read_u32_super(0x2C).unwrap(),
            crate::human68k::HUMAN_WORK
        );
        assert_eq!(emu.mem.read_u16_super(crate::human68k::HUMAN_WORK).unwrap(), 0x4E73);
    }

    #[test]
    fn allocator_round_trip_restores_largest_gap() {
        let mut emu = test_machine();
        let before = emu.malloc(MallocMode::FromLower, u32::MAX, HUMAN_HEAD).unwrap() & MALLOC_MASK;

        let adr = emu.malloc(MallocMode::FromLower, 0x1000, HUMAN_HEAD).unwrap();
        assert!(adr < 0x8000_0000);
        assert_eq!(adr % 16, 0);

        // The chain stays doubly linked.
        let memblk = adr - SIZEOF_MEMBLK;
        let prev = emu.mem.read_u32_super(memblk + MEMBLK_PREV).unwrap();
        assert_eq!(emu.mem.read_u32_super(prev + MEMBLK_NEXT).unwrap(), memblk);

        assert_eq!(emu.mfree(adr), Ok(0));
        let after = emu.malloc(MallocMode::FromLower, u32::MAX, HUMAN_HEAD).unwrap() & MALLOC_MASK;
        assert_eq!(before, after);
    }

    #[test]
    fn malloc_from_higher_places_at_gap_end() {
        let mut emu = test_machine();
        let lower = emu.malloc(MallocMode::FromLower, 0x100, HUMAN_HEAD).unwrap();
        let higher = emu.malloc(MallocMode::FromHigher, 0x100, HUMAN_HEAD).unwrap();
        assert!(higher > lower);
        let memory_end = emu.mem.read_u32_super(OSWORK_MEMORY_END).unwrap();
        assert_eq!(
            emu.mem.read_u32_super(higher - SIZEOF_MEMBLK + MEMBLK_END).unwrap(),
            memory_end & !15
        );
    }

    #[test]
    fn setblock_reports_the_gap_on_failure() {
        let mut emu = test_machine();
        let adr = emu.malloc(MallocMode::FromLower, 0x1000, HUMAN_HEAD).unwrap();
        let d0 = emu.setblock(adr, 0x1000_0000).unwrap();
        assert!(d0 == 0x8200_0000 || d0 & 0xFF00_0000 == 0x8100_0000);
        // The failure report names a gap smaller than the request.
        if d0 & 0xFF00_0000 == 0x8100_0000 {
            assert!(d0 & MALLOC_MASK < 0x1000_0000);
        }
    }

    #[test]
    fn mfree_refuses_the_root_block() {
        let mut emu = test_machine();
        let r = emu.mfree(HUMAN_HEAD + SIZEOF_MEMBLK);
        assert_eq!(r, Err(DosError::IllegalMemblk.into()));
    }
}
