// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instruction-level behavior: condition codes, addressing quirks and the
//! read-modify-write rules, driven one instruction at a time.

use x68run::host::LocalHost;
use x68run::{Emulator, Settings};

const BASE: u32 = 0x40000;

fn machine_with(words: &[u16]) -> Emulator {
    let mut emu = Emulator::new(Settings::default(), Box::new(LocalHost::new())).unwrap();
    let mut adr = BASE;
    for &w in words {
        emu.mem.write_u16_super(adr, w).unwrap();
        adr += 2;
    }
    emu.pc = BASE;
    emu.a[7] = BASE + 0x4000;
    emu
}

fn step(emu: &mut Emulator) {
    emu.single_step().unwrap();
}

#[test]
fn move_byte_keeps_upper_register_bits() {
    // MOVE.B D1, D0
    let mut emu = machine_with(&[0x1001]);
    emu.d[0] = 0xAABB_CCDD;
    emu.d[1] = 0x0000_0080;
    step(&mut emu);
    assert_eq!(emu.d[0], 0xAABB_CC80);
    assert!(emu.sr.n && !emu.sr.z && !emu.sr.v && !emu.sr.c);
}

#[test]
fn movea_word_sign_extends_and_keeps_flags() {
    // MOVEA.W D0, A0
    let mut emu = machine_with(&[0x3040]);
    emu.d[0] = 0x8000;
    emu.sr.z = true;
    step(&mut emu);
    assert_eq!(emu.a[0], 0xFFFF_8000);
    assert!(emu.sr.z, "MOVEA leaves the flags alone");
}

#[test]
fn addq_to_address_register_sets_no_flags() {
    // ADDQ.W #1, A0 with a pending Z
    let mut emu = machine_with(&[0x5248]);
    emu.a[0] = 0xFFFF;
    emu.sr.z = true;
    step(&mut emu);
    assert_eq!(emu.a[0], 0x1_0000, "whole register, not just the word");
    assert!(emu.sr.z);
}

#[test]
fn addx_zero_flag_only_clears() {
    // ADDX.B D1, D0 twice
    let mut emu = machine_with(&[0xD101, 0xD101]);
    emu.d[0] = 0xFF;
    emu.d[1] = 0x00;
    emu.sr.x = true;
    emu.sr.z = true;
    step(&mut emu); // 0xFF + 0 + X = 0x00, carry out, result zero
    assert_eq!(emu.d[0] & 0xFF, 0);
    assert!(emu.sr.z, "zero result must not clear Z it inherited");
    assert!(emu.sr.x && emu.sr.c);

    emu.d[0] = 0x01;
    emu.sr.x = false;
    step(&mut emu); // 0x01 + 0 = 0x01: nonzero clears Z
    assert!(!emu.sr.z);
}

#[test]
fn subx_borrows_through_x() {
    // SUBX.W D1, D0
    let mut emu = machine_with(&[0x9141]);
    emu.d[0] = 0x0005;
    emu.d[1] = 0x0003;
    emu.sr.x = true;
    emu.sr.z = false;
    step(&mut emu);
    assert_eq!(emu.d[0] & 0xFFFF, 1);
    assert!(!emu.sr.x && !emu.sr.c);
}

#[test]
fn asl_sets_overflow_when_sign_changes() {
    // ASL.B #1, D0
    let mut emu = machine_with(&[0xE300]);
    emu.d[0] = 0x40;
    step(&mut emu);
    assert_eq!(emu.d[0] & 0xFF, 0x80);
    assert!(emu.sr.v);
    assert!(!emu.sr.c);
    assert!(emu.sr.n);
}

#[test]
fn lsr_shifts_into_carry_and_x() {
    // LSR.W #1, D0
    let mut emu = machine_with(&[0xE248]);
    emu.d[0] = 0x0003;
    step(&mut emu);
    assert_eq!(emu.d[0] & 0xFFFF, 1);
    assert!(emu.sr.c && emu.sr.x);
    assert!(!emu.sr.v);
}

#[test]
fn roxl_rotates_through_extend() {
    // ROXL.B #1, D0 with X set: bit0 takes the old X.
    let mut emu = machine_with(&[0xE310]);
    emu.d[0] = 0x00;
    emu.sr.x = true;
    step(&mut emu);
    assert_eq!(emu.d[0] & 0xFF, 0x01);
    assert!(!emu.sr.x, "old MSB (0) moves into X");
    assert!(!emu.sr.c);
}

#[test]
fn ror_keeps_x_untouched() {
    // ROR.B #1, D0
    let mut emu = machine_with(&[0xE218]);
    emu.d[0] = 0x01;
    emu.sr.x = true;
    step(&mut emu);
    assert_eq!(emu.d[0] & 0xFF, 0x80);
    assert!(emu.sr.c);
    assert!(emu.sr.x, "plain rotate leaves X alone");
    assert!(emu.sr.n);
}

#[test]
fn shift_count_zero_still_sets_nz() {
    // LSL.W D1, D0 with D1 = 0
    let mut emu = machine_with(&[0xE368]);
    emu.d[0] = 0x8000;
    emu.d[1] = 0;
    emu.sr.c = true;
    step(&mut emu);
    assert!(!emu.sr.c, "count 0 clears C");
    assert!(emu.sr.n);
}

#[test]
fn dbra_counts_words_down() {
    // MOVEQ #2, D0; loop: DBRA D0, loop  (condition F never satisfied)
    let mut emu = machine_with(&[0x7002, 0x51C8, 0xFFFE]);
    step(&mut emu);
    // Two taken branches, then fall through at -1.
    for _ in 0..3 {
        step(&mut emu);
    }
    assert_eq!(emu.d[0] as u16, 0xFFFF);
    assert_eq!(emu.pc, BASE + 6);
}

#[test]
fn scc_writes_all_ones_or_zero() {
    // SEQ D0; SNE D1
    let mut emu = machine_with(&[0x57C0, 0x56C1]);
    emu.sr.z = true;
    emu.d[0] = 0x1234_5600;
    emu.d[1] = 0x1234_56FF;
    step(&mut emu);
    step(&mut emu);
    assert_eq!(emu.d[0] & 0xFF, 0xFF);
    assert_eq!(emu.d[1] & 0xFF, 0x00);
    assert_eq!(emu.d[0] >> 8, 0x123456, "only the low byte changes");
}

#[test]
fn exg_swap_ext_cover_the_register_shuffles() {
    // EXG D0, A0; SWAP D1; EXT.W D2; EXT.L D3
    let mut emu = machine_with(&[0xC188, 0x4841, 0x4882, 0x48C3]);
    emu.d[0] = 0x1111_1111;
    emu.a[0] = 0x2222_2222;
    emu.d[1] = 0xAAAA_BBBB;
    emu.d[2] = 0x0000_0080;
    emu.d[3] = 0x0000_8000;
    for _ in 0..4 {
        step(&mut emu);
    }
    assert_eq!(emu.d[0], 0x2222_2222);
    assert_eq!(emu.a[0], 0x1111_1111);
    assert_eq!(emu.d[1], 0xBBBB_AAAA);
    assert_eq!(emu.d[2] & 0xFFFF, 0xFF80);
    assert_eq!(emu.d[3], 0xFFFF_8000);
}

#[test]
fn link_and_unlk_frame_the_stack() {
    // LINK A6, #-8; UNLK A6
    let mut emu = machine_with(&[0x4E56, 0xFFF8, 0x4E5E]);
    emu.a[6] = 0xCAFE_BABE;
    let sp = emu.a[7];
    step(&mut emu);
    assert_eq!(emu.a[6], sp - 4);
    assert_eq!(emu.a[7], sp - 4 - 8);
    assert_eq!(emu.mem.read_u32_super(sp - 4).unwrap(), 0xCAFE_BABE);
    step(&mut emu);
    assert_eq!(emu.a[7], sp);
    assert_eq!(emu.a[6], 0xCAFE_BABE);
}

#[test]
fn movep_spreads_bytes_over_alternate_addresses() {
    // MOVEP.L D0, (0, A0); MOVEP.W (0, A0), D1
    let mut emu = machine_with(&[0x01C8, 0x0000, 0x0308, 0x0000]);
    emu.a[0] = 0x50000;
    emu.d[0] = 0x1234_5678;
    step(&mut emu);
    assert_eq!(emu.mem.read_u8_super(0x50000).unwrap(), 0x12);
    assert_eq!(emu.mem.read_u8_super(0x50002).unwrap(), 0x34);
    assert_eq!(emu.mem.read_u8_super(0x50004).unwrap(), 0x56);
    assert_eq!(emu.mem.read_u8_super(0x50006).unwrap(), 0x78);
    step(&mut emu);
    assert_eq!(emu.d[1] & 0xFFFF, 0x1234);
}

#[test]
fn bit_operations_on_register_and_memory() {
    // BSET #0, D0; BTST #0, D0; BCLR #33, D0 (mod 32); BCHG #7, (A0)
    let mut emu = machine_with(&[
        0x08C0, 0x0000, // BSET #0, D0
        0x0800, 0x0000, // BTST #0, D0
        0x0880, 0x0021, // BCLR #33, D0
        0x0850, 0x0007, // BCHG #7, (A0)
    ]);
    emu.a[0] = 0x50000;
    emu.mem.write_u8_super(0x50000, 0x80).unwrap();

    step(&mut emu);
    assert_eq!(emu.d[0] & 1, 1);
    assert!(emu.sr.z, "bit was clear before BSET");

    step(&mut emu);
    assert!(!emu.sr.z, "bit is now set");

    step(&mut emu);
    assert_eq!(emu.d[0] & 2, 0);

    step(&mut emu);
    assert_eq!(emu.mem.read_u8_super(0x50000).unwrap(), 0x00);
    assert!(!emu.sr.z, "bit 7 was set before BCHG");
}

#[test]
fn cmpm_advances_both_pointers() {
    // CMPM.B (A1)+, (A0)+
    let mut emu = machine_with(&[0xB109]);
    emu.a[0] = 0x50000;
    emu.a[1] = 0x50010;
    emu.mem.write_u8_super(0x50000, 5).unwrap();
    emu.mem.write_u8_super(0x50010, 5).unwrap();
    step(&mut emu);
    assert!(emu.sr.z);
    assert_eq!(emu.a[0], 0x50001);
    assert_eq!(emu.a[1], 0x50011);
}

#[test]
fn multiply_produces_32_bits() {
    // MULU.W D1, D0; MULS.W D3, D2
    let mut emu = machine_with(&[0xC0C1, 0xC5C3]);
    emu.d[0] = 0xFFFF;
    emu.d[1] = 0xFFFF;
    emu.d[2] = 0xFFFF; // -1 as a word
    emu.d[3] = 0x0002;
    step(&mut emu);
    assert_eq!(emu.d[0], 0xFFFE_0001);
    assert!(emu.sr.n);
    step(&mut emu);
    assert_eq!(emu.d[2], 0xFFFF_FFFE); // -2
}

#[test]
fn divu_overflow_sets_v_and_keeps_destination() {
    // DIVU.W D1, D0 with a quotient beyond 16 bits
    let mut emu = machine_with(&[0x80C1]);
    emu.d[0] = 0x0010_0000;
    emu.d[1] = 1;
    step(&mut emu);
    assert!(emu.sr.v);
    assert_eq!(emu.d[0], 0x0010_0000, "destination unchanged on overflow");
}

#[test]
fn divs_packs_remainder_high_quotient_low() {
    // DIVS.W D1, D0: -7 / 2 = -3 remainder -1
    let mut emu = machine_with(&[0x81C1]);
    emu.d[0] = -7i32 as u32;
    emu.d[1] = 2;
    step(&mut emu);
    assert_eq!(emu.d[0] & 0xFFFF, (-3i16 as u16) as u32);
    assert_eq!(emu.d[0] >> 16, (-1i16 as u16) as u32);
}

#[test]
fn stack_byte_push_keeps_sp_even() {
    // MOVE.B D0, -(A7)
    let mut emu = machine_with(&[0x1F00]);
    let sp = emu.a[7];
    emu.d[0] = 0xAB;
    step(&mut emu);
    assert_eq!(emu.a[7], sp - 2, "A7 moves by two for byte data");
    assert_eq!(emu.mem.read_u8_super(sp - 2).unwrap(), 0xAB);
}

#[test]
fn tas_sets_the_high_bit() {
    // TAS (A0)
    let mut emu = machine_with(&[0x4AD0]);
    emu.a[0] = 0x50000;
    emu.mem.write_u8_super(0x50000, 0x00).unwrap();
    step(&mut emu);
    assert!(emu.sr.z);
    assert_eq!(emu.mem.read_u8_super(0x50000).unwrap(), 0x80);
}

#[test]
fn bsr_and_rts_round_trip() {
    // BSR.S +4; NOP; NOP  /  target: RTS
    let mut emu = machine_with(&[0x6104, 0x4E71, 0x4E71, 0x4E75]);
    step(&mut emu);
    assert_eq!(emu.pc, BASE + 6, "branch lands on the RTS");
    step(&mut emu);
    assert_eq!(emu.pc, BASE + 2, "RTS returns past the BSR");
}

#[test]
fn jsr_pushes_the_return_address() {
    // JSR (A0)
    let mut emu = machine_with(&[0x4E90]);
    emu.a[0] = 0x50000;
    emu.mem.write_u16_super(0x50000, 0x4E75).unwrap(); // RTS
    let sp = emu.a[7];
    step(&mut emu);
    assert_eq!(emu.pc, 0x50000);
    assert_eq!(emu.mem.read_u32_super(sp - 4).unwrap(), BASE + 2);
    step(&mut emu);
    assert_eq!(emu.pc, BASE + 2);
}

#[test]
fn andi_to_ccr_and_move_from_sr() {
    // ANDI #$1A, CCR; MOVE SR, D0
    let mut emu = machine_with(&[0x023C, 0x001A, 0x40C0]);
    emu.sr.set_ccr(0x1F);
    step(&mut emu);
    assert_eq!(emu.sr.ccr(), 0x1A);
    step(&mut emu);
    assert_eq!(emu.d[0] & 0xFFFF, 0x001A);
}

#[test]
fn nbcd_of_zero_with_x_borrows_to_99() {
    // NBCD D0
    let mut emu = machine_with(&[0x4800]);
    emu.d[0] = 0x00;
    emu.sr.x = true;
    emu.sr.z = true;
    step(&mut emu);
    assert_eq!(emu.d[0] & 0xFF, 0x99);
    assert!(emu.sr.c && emu.sr.x);
    assert!(!emu.sr.z, "nonzero result clears Z");
}

#[test]
fn sbcd_subtracts_decimal_digits() {
    // SBCD D1, D0: 0x42 - 0x17 = 0x25
    let mut emu = machine_with(&[0x8101]);
    emu.d[0] = 0x42;
    emu.d[1] = 0x17;
    emu.sr.x = false;
    emu.sr.z = true;
    step(&mut emu);
    assert_eq!(emu.d[0] & 0xFF, 0x25);
    assert!(!emu.sr.c);
    assert!(!emu.sr.z);
}

#[test]
fn movem_predecrement_stores_descending() {
    // MOVEM.L D0/A0, -(A7)
    let mut emu = machine_with(&[0x48E7, 0x8080]);
    let sp = emu.a[7];
    emu.d[0] = 0x1111_1111;
    emu.a[0] = 0x2222_2222;
    step(&mut emu);
    assert_eq!(emu.a[7], sp - 8);
    assert_eq!(emu.mem.read_u32_super(sp - 8).unwrap(), 0x1111_1111);
    assert_eq!(emu.mem.read_u32_super(sp - 4).unwrap(), 0x2222_2222);
}

#[test]
fn pea_and_lea_resolve_the_same_address() {
    // LEA (8, A0), A1; PEA (8, A0)
    let mut emu = machine_with(&[0x43E8, 0x0008, 0x4868, 0x0008]);
    emu.a[0] = 0x50000;
    let sp = emu.a[7];
    step(&mut emu);
    assert_eq!(emu.a[1], 0x50008);
    step(&mut emu);
    assert_eq!(emu.mem.read_u32_super(sp - 4).unwrap(), 0x50008);
}

#[test]
fn not_and_neg_flag_behavior() {
    // NOT.B D0; NEG.B D0
    let mut emu = machine_with(&[0x4600, 0x4400]);
    emu.d[0] = 0xFF;
    step(&mut emu);
    assert_eq!(emu.d[0] & 0xFF, 0x00);
    assert!(emu.sr.z && !emu.sr.c);
    step(&mut emu);
    assert_eq!(emu.d[0] & 0xFF, 0x00);
    assert!(!emu.sr.c, "negating zero produces no borrow");
}

#[test]
fn clr_leaves_x_alone() {
    // CLR.L D0
    let mut emu = machine_with(&[0x4280]);
    emu.d[0] = 0xDEAD_BEEF;
    emu.sr.x = true;
    step(&mut emu);
    assert_eq!(emu.d[0], 0);
    assert!(emu.sr.z && emu.sr.x);
}
