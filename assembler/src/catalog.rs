//! Static ISA tables: directives, sections, data definitions, mnemonics and
//! registers. Pure data plus lookup.

use crate::section::SectionType;

// ============================================================================
// DIRECTIVES AND SECTIONS
// ============================================================================

pub const GLOBAL_DIRECTIVE: &str = ".global";
pub const END_DIRECTIVE: &str = ".end";
pub const ALIGN_DIRECTIVE: &str = ".align";
pub const SKIP_DIRECTIVE: &str = ".skip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionSpec {
    pub name: &'static str,
    pub section_type: SectionType,
}

pub const SECTIONS: &[SectionSpec] = &[
    SectionSpec {
        name: ".data",
        section_type: SectionType::Data,
    },
    SectionSpec {
        name: ".text",
        section_type: SectionType::Text,
    },
    SectionSpec {
        name: ".bss",
        section_type: SectionType::Bss,
    },
    SectionSpec {
        name: ".rodata",
        section_type: SectionType::Rodata,
    },
];

/// Data definition directive and its byte multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefinitionSpec {
    pub name: &'static str,
    pub unit_size: u32,
}

pub const DEFINITIONS: &[DefinitionSpec] = &[
    DefinitionSpec {
        name: ".char",
        unit_size: 1,
    },
    DefinitionSpec {
        name: ".word",
        unit_size: 2,
    },
    DefinitionSpec {
        name: ".long",
        unit_size: 4,
    },
];

pub fn find_section(name: &str) -> Option<&'static SectionSpec> {
    SECTIONS.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

pub fn find_definition(name: &str) -> Option<&'static DefinitionSpec> {
    DEFINITIONS.iter().find(|d| d.name.eq_ignore_ascii_case(name))
}

// ============================================================================
// INSTRUCTIONS
// ============================================================================

/// Encoding family of a mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// One operand; `destination` places it at bit 21 instead of bit 16.
    SingleOperand { destination: bool },
    DoubleOperand,
    /// No operands; `implied_destination` fills the destination field.
    NoOperand { implied_destination: Option<u8> },
    Jump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionSpec {
    pub name: &'static str,
    /// 4-bit operation code (bits 29..26).
    pub operation: u8,
    pub shape: Shape,
}

pub const OP_ADD: u8 = 0x0;
pub const OP_MOV: u8 = 0xD;

/// Register field value naming the program counter.
pub const PC_REGISTER_FIELD: u8 = 0x0F;

const fn spec(name: &'static str, operation: u8, shape: Shape) -> InstructionSpec {
    InstructionSpec {
        name,
        operation,
        shape,
    }
}

pub const SINGLE_OPERAND: &[InstructionSpec] = &[
    spec("push", 0x9, Shape::SingleOperand { destination: false }),
    spec("pop", 0xA, Shape::SingleOperand { destination: true }),
    spec("call", 0xB, Shape::SingleOperand { destination: false }),
];

pub const DOUBLE_OPERAND: &[InstructionSpec] = &[
    spec("add", 0x0, Shape::DoubleOperand),
    spec("sub", 0x1, Shape::DoubleOperand),
    spec("mul", 0x2, Shape::DoubleOperand),
    spec("div", 0x3, Shape::DoubleOperand),
    spec("cmp", 0x4, Shape::DoubleOperand),
    spec("and", 0x5, Shape::DoubleOperand),
    spec("or", 0x6, Shape::DoubleOperand),
    spec("not", 0x7, Shape::DoubleOperand),
    spec("test", 0x8, Shape::DoubleOperand),
    spec("mov", 0xD, Shape::DoubleOperand),
    spec("shl", 0xE, Shape::DoubleOperand),
    spec("shr", 0xF, Shape::DoubleOperand),
];

pub const NO_OPERAND: &[InstructionSpec] = &[
    spec(
        "iret",
        0xC,
        Shape::NoOperand {
            implied_destination: None,
        },
    ),
    spec(
        "ret",
        0xA,
        Shape::NoOperand {
            implied_destination: Some(PC_REGISTER_FIELD),
        },
    ),
];

pub const JUMP: &[InstructionSpec] = &[spec("jmp", OP_MOV, Shape::Jump)];

/// Condition suffixes and their 2-bit codes (bits 31..30).
pub const CONDITIONS: &[(&str, u8)] = &[("eq", 0), ("ne", 1), ("gt", 2), ("al", 3)];

pub const ALWAYS: u8 = 3;

/// A mnemonic matched against the tables, with its condition resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mnemonic {
    pub spec: &'static InstructionSpec,
    pub condition: u8,
}

impl Mnemonic {
    /// Full 6-bit opcode: condition in the top two bits.
    pub fn opcode(&self) -> u8 {
        (self.condition << 4) | self.spec.operation
    }
}

fn match_in(table: &'static [InstructionSpec], name: &str) -> Option<Mnemonic> {
    let lower = name.to_ascii_lowercase();
    table.iter().find_map(|spec| {
        let suffix = lower.strip_prefix(spec.name)?;
        if suffix.is_empty() {
            return Some(Mnemonic {
                spec,
                condition: ALWAYS,
            });
        }
        CONDITIONS
            .iter()
            .find(|(text, _)| *text == suffix)
            .map(|&(_, condition)| Mnemonic { spec, condition })
    })
}

/// Look a mnemonic up: single-operand, double-operand, no-operand, then jump.
pub fn find_instruction(name: &str) -> Option<Mnemonic> {
    [SINGLE_OPERAND, DOUBLE_OPERAND, NO_OPERAND, JUMP]
        .into_iter()
        .find_map(|table| match_in(table, name))
}

// ============================================================================
// REGISTERS
// ============================================================================

pub const REGISTERS: &[(&str, u8)] = &[
    ("r0", 0),
    ("r1", 1),
    ("r2", 2),
    ("r3", 3),
    ("r4", 4),
    ("r5", 5),
    ("r6", 6),
    ("r7", 7),
];

/// Register names are case-sensitive, so `R1` or `sp` is a symbol.
pub fn find_register(name: &str) -> Option<u8> {
    REGISTERS
        .iter()
        .find(|(reg, _)| *reg == name)
        .map(|&(_, code)| code)
}

pub fn is_psw(name: &str) -> bool {
    name == "PSW" || name == "psw"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_instruction_conditions() {
        let add = find_instruction("add").unwrap();
        assert_eq!(add.opcode(), 0x30);

        let addeq = find_instruction("addeq").unwrap();
        assert_eq!(addeq.opcode(), 0x00);

        let shrgt = find_instruction("SHRGT").unwrap();
        assert_eq!(shrgt.opcode(), 0x2F);

        let movne = find_instruction("movne").unwrap();
        assert_eq!(movne.opcode(), 0x1D);
        assert_eq!(movne.spec.shape, Shape::DoubleOperand);
    }

    #[test]
    fn test_find_instruction_shapes() {
        assert_eq!(
            find_instruction("pop").unwrap().spec.shape,
            Shape::SingleOperand { destination: true }
        );
        assert_eq!(
            find_instruction("ret").unwrap().spec.shape,
            Shape::NoOperand {
                implied_destination: Some(PC_REGISTER_FIELD)
            }
        );
        assert_eq!(find_instruction("jmpeq").unwrap().spec.shape, Shape::Jump);
        assert_eq!(find_instruction("jmpeq").unwrap().condition, 0);
        assert_eq!(find_instruction("iretal").unwrap().opcode(), 0x3C);
    }

    #[test]
    fn test_unknown_mnemonics() {
        assert!(find_instruction("addxx").is_none());
        assert!(find_instruction("ad").is_none());
        assert!(find_instruction("nop").is_none());
        assert!(find_instruction("").is_none());
    }

    #[test]
    fn test_sections_and_definitions() {
        assert_eq!(find_section(".TEXT").unwrap().section_type, SectionType::Text);
        assert_eq!(find_section(".bss").unwrap().section_type, SectionType::Bss);
        assert!(find_section(".code").is_none());
        assert_eq!(find_definition(".long").unwrap().unit_size, 4);
        assert_eq!(find_definition(".Word").unwrap().unit_size, 2);
    }

    #[test]
    fn test_registers() {
        assert_eq!(find_register("r0"), Some(0));
        assert_eq!(find_register("r7"), Some(7));
        assert_eq!(find_register("R7"), None);
        assert_eq!(find_register("sp"), None);
        assert_eq!(find_register("r8"), None);
        assert!(is_psw("psw"));
        assert!(!is_psw("Psw"));
    }
}
