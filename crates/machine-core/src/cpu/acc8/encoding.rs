//! Opcode assignments for the acc8 instruction set.

/// Assigned acc8 opcodes. The discriminant is the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Opcode {
    Nop = 0x00,
    LdaImm = 0x10,
    LdaAbs = 0x11,
    LdaAbsX = 0x12,
    StaAbs = 0x20,
    StaAbsX = 0x21,
    LdxImm = 0x30,
    Inx = 0x31,
    AddImm = 0x40,
    AddAbs = 0x41,
    SubImm = 0x42,
    CmpImm = 0x43,
    Jmp = 0x50,
    Bne = 0x51,
    Beq = 0x52,
    Jsr = 0x53,
    Rts = 0x54,
    In = 0x60,
    Out = 0x61,
    Ei = 0x70,
    Di = 0x71,
    Reti = 0x72,
    Halt = 0x7F,
}

/// Single source-of-truth opcode table: `(byte, opcode, operand bytes)`.
///
/// Any byte not present here is an illegal instruction.
pub const OPCODE_ENCODING_TABLE: &[(u8, Opcode, u8)] = &[
    (0x00, Opcode::Nop, 0),
    (0x10, Opcode::LdaImm, 1),
    (0x11, Opcode::LdaAbs, 2),
    (0x12, Opcode::LdaAbsX, 2),
    (0x20, Opcode::StaAbs, 2),
    (0x21, Opcode::StaAbsX, 2),
    (0x30, Opcode::LdxImm, 1),
    (0x31, Opcode::Inx, 0),
    (0x40, Opcode::AddImm, 1),
    (0x41, Opcode::AddAbs, 2),
    (0x42, Opcode::SubImm, 1),
    (0x43, Opcode::CmpImm, 1),
    (0x50, Opcode::Jmp, 2),
    (0x51, Opcode::Bne, 1),
    (0x52, Opcode::Beq, 1),
    (0x53, Opcode::Jsr, 2),
    (0x54, Opcode::Rts, 0),
    (0x60, Opcode::In, 1),
    (0x61, Opcode::Out, 1),
    (0x70, Opcode::Ei, 0),
    (0x71, Opcode::Di, 0),
    (0x72, Opcode::Reti, 0),
    (0x7F, Opcode::Halt, 0),
];

const DECODE_TABLE: [Option<Opcode>; 256] = build_decode_table();

const fn build_decode_table() -> [Option<Opcode>; 256] {
    let mut table = [None; 256];
    let mut index = 0;
    while index < OPCODE_ENCODING_TABLE.len() {
        let (byte, opcode, _) = OPCODE_ENCODING_TABLE[index];
        assert!(byte == opcode as u8, "opcode discriminant must match its byte");
        assert!(table[byte as usize].is_none(), "opcode bytes must be unique");
        table[byte as usize] = Some(opcode);
        index += 1;
    }
    table
}

/// Decodes an opcode byte. `None` means illegal.
#[must_use]
pub const fn decode(byte: u8) -> Option<Opcode> {
    DECODE_TABLE[byte as usize]
}

/// Number of operand bytes following the opcode byte.
#[must_use]
pub fn operand_len(opcode: Opcode) -> u8 {
    OPCODE_ENCODING_TABLE
        .iter()
        .find_map(|(_, entry, len)| (*entry == opcode).then_some(*len))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{decode, operand_len, Opcode, OPCODE_ENCODING_TABLE};

    #[test]
    fn table_contains_unique_bytes() {
        let bytes: HashSet<_> = OPCODE_ENCODING_TABLE.iter().map(|(byte, _, _)| *byte).collect();
        assert_eq!(bytes.len(), OPCODE_ENCODING_TABLE.len());
    }

    #[test]
    fn every_table_entry_resolves_via_decode() {
        for (byte, opcode, _) in OPCODE_ENCODING_TABLE {
            assert_eq!(decode(*byte), Some(*opcode));
        }
    }

    #[test]
    fn unassigned_bytes_are_illegal() {
        let legal = (0_u16..=0xFF)
            .filter_map(|byte| u8::try_from(byte).ok())
            .filter(|byte| decode(*byte).is_some())
            .count();
        assert_eq!(legal, OPCODE_ENCODING_TABLE.len());
        assert_eq!(decode(0xFF), None);
        assert_eq!(decode(0x13), None);
    }

    #[test]
    fn operand_lengths_follow_addressing_mode() {
        assert_eq!(operand_len(Opcode::Nop), 0);
        assert_eq!(operand_len(Opcode::LdaImm), 1);
        assert_eq!(operand_len(Opcode::Jsr), 2);
    }
}
