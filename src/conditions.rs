// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared condition code policy.
//!
//! Every instruction routes its flag updates through one of these helpers
//! so the CCR rules live in a single place. The `zero_flag` parameter is
//! the pre-operation Z for the extend variants (ADDX, SUBX, NEGX), which
//! may clear Z but never set it; all other callers pass `true`.

use crate::addressing::Size;
use crate::Emulator;

/// Most significant bit of `data` at the given size.
pub(crate) fn msb(data: u32, size: Size) -> bool {
    match size {
        Size::Byte => data & 0x80 != 0,
        Size::Word => data & 0x8000 != 0,
        Size::Long => data & 0x8000_0000 != 0,
    }
}

impl Emulator {
    /// N from the MSB, Z from the truncated result, V and C cleared,
    /// X untouched.
    pub(crate) fn general_conditions(&mut self, result: u32, size: Size) {
        self.sr.v = false;
        self.sr.c = false;
        self.sr.z = result & size.mask() == 0;
        self.sr.n = msb(result, size);
    }

    /// Flags of the ADD family. C and X from the carry-out, V from the
    /// operand/result sign pattern.
    pub(crate) fn add_conditions(&mut self, src: u32, dest: u32, result: u32, size: Size, zero_flag: bool) {
        let sm = msb(src, size);
        let dm = msb(dest, size);
        let rm = msb(result, size);

        self.sr.v = sm && dm && !rm || !sm && !dm && rm;
        let carry = sm && dm || dm && !rm || sm && !rm;
        self.sr.c = carry;
        self.sr.x = carry;
        self.sr.z = zero_flag && result & size.mask() == 0;
        self.sr.n = rm;
    }

    /// Flags of the CMP family; X is not touched.
    pub(crate) fn cmp_conditions(&mut self, src: u32, dest: u32, result: u32, size: Size) {
        let sm = msb(src, size);
        let dm = msb(dest, size);
        let rm = msb(result, size);

        self.sr.v = !sm && dm && !rm || sm && !dm && rm;
        self.sr.c = sm && !dm || !dm && rm || sm && rm;
        self.sr.z = result & size.mask() == 0;
        self.sr.n = rm;
    }

    /// Flags of the SUB family: CMP flags plus X from the borrow.
    pub(crate) fn sub_conditions(&mut self, src: u32, dest: u32, result: u32, size: Size, zero_flag: bool) {
        self.cmp_conditions(src, dest, result, size);
        self.sr.x = self.sr.c;
        self.sr.z = zero_flag && self.sr.z;
    }

    /// Flags of NEG/NEGX.
    pub(crate) fn neg_conditions(&mut self, dest: u32, result: u32, size: Size, zero_flag: bool) {
        let dm = msb(dest, size);
        let rm = msb(result, size);

        self.sr.v = dm && rm;
        let carry = dm || rm;
        self.sr.c = carry;
        self.sr.x = carry;
        self.sr.z = zero_flag && result & size.mask() == 0;
        self.sr.n = rm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::test_machine;

    #[test]
    fn general_leaves_x_alone() {
        let mut emu = test_machine();
        emu.sr.x = true;
        emu.general_conditions(0, Size::Byte);
        assert!(emu.sr.z && emu.sr.x && !emu.sr.n && !emu.sr.v && !emu.sr.c);
        emu.general_conditions(0x80, Size::Byte);
        assert!(emu.sr.n && !emu.sr.z);
    }

    #[test]
    fn add_carry_and_overflow() {
        let mut emu = test_machine();
        // 0x7F + 1 overflows signed byte, no carry.
        emu.add_conditions(0x7F, 0x01, 0x80, Size::Byte, true);
        assert!(emu.sr.v && !emu.sr.c && emu.sr.n);
        // 0xFF + 1 carries out, result zero.
        emu.add_conditions(0xFF, 0x01, 0x00, Size::Byte, true);
        assert!(!emu.sr.v && emu.sr.c && emu.sr.x && emu.sr.z);
    }

    #[test]
    fn extend_variant_only_clears_z() {
        let mut emu = test_machine();
        emu.sr.z = false;
        // Result is zero but Z was already clear: stays clear.
        emu.add_conditions(0xFF, 0x01, 0x00, Size::Byte, emu.sr.z);
        assert!(!emu.sr.z);
        emu.sr.z = true;
        emu.add_conditions(0x01, 0x01, 0x02, Size::Byte, emu.sr.z);
        assert!(!emu.sr.z);
    }

    #[test]
    fn cmp_does_not_touch_x() {
        let mut emu = test_machine();
        emu.sr.x = true;
        // 0 - 1 borrows.
        emu.cmp_conditions(0x01, 0x00, 0xFF, Size::Byte);
        assert!(emu.sr.c && emu.sr.x && emu.sr.n);
        emu.sr.x = false;
        emu.cmp_conditions(0x01, 0x00, 0xFF, Size::Byte);
        assert!(!emu.sr.x);
    }

    #[test]
    fn neg_of_zero_clears_carry() {
        let mut emu = test_machine();
        emu.neg_conditions(0x00, 0x00, Size::Word, true);
        assert!(!emu.sr.c && !emu.sr.x && emu.sr.z);
        emu.neg_conditions(0x01, 0xFFFF, Size::Word, true);
        assert!(emu.sr.c && emu.sr.x && emu.sr.n && !emu.sr.z);
    }
}
