use super::encoding::{Opcode, OPCODE_ENCODING_TABLE};

/// Cycles charged to enter an interrupt handler.
pub const INTERRUPT_ENTRY_CYCLES: u8 = 7;
/// Extra cycles charged when a conditional branch is taken.
pub const BRANCH_TAKEN_PENALTY: u8 = 1;
/// Cycles charged for an illegal opcode executed as a no-op.
pub const ILLEGAL_OPCODE_CYCLES: u8 = 1;

/// Single source-of-truth base cycle cost per opcode.
pub const CYCLE_COST_TABLE: &[(Opcode, u8)] = &[
    (Opcode::Nop, 2),
    (Opcode::LdaImm, 2),
    (Opcode::LdaAbs, 4),
    (Opcode::LdaAbsX, 5),
    (Opcode::StaAbs, 4),
    (Opcode::StaAbsX, 5),
    (Opcode::LdxImm, 2),
    (Opcode::Inx, 2),
    (Opcode::AddImm, 2),
    (Opcode::AddAbs, 4),
    (Opcode::SubImm, 2),
    (Opcode::CmpImm, 2),
    (Opcode::Jmp, 3),
    (Opcode::Bne, 2),
    (Opcode::Beq, 2),
    (Opcode::Jsr, 6),
    (Opcode::Rts, 5),
    (Opcode::In, 4),
    (Opcode::Out, 4),
    (Opcode::Ei, 1),
    (Opcode::Di, 1),
    (Opcode::Reti, 6),
    (Opcode::Halt, 1),
];

const COST_BY_BYTE: [u8; 256] = build_cost_table();

const fn build_cost_table() -> [u8; 256] {
    assert!(
        CYCLE_COST_TABLE.len() == OPCODE_ENCODING_TABLE.len(),
        "every opcode needs exactly one cycle cost"
    );
    let mut table = [0_u8; 256];
    let mut index = 0;
    while index < CYCLE_COST_TABLE.len() {
        let (opcode, cycles) = CYCLE_COST_TABLE[index];
        assert!(cycles > 0, "instructions must consume time");
        table[opcode as usize] = cycles;
        index += 1;
    }
    table
}

/// Base cycle cost of `opcode`.
#[must_use]
pub const fn cycle_cost(opcode: Opcode) -> u8 {
    COST_BY_BYTE[opcode as usize]
}
