//! Operand parsing and pass-2 resolution.
//!
//! An operand is parsed once from its token slice. Symbolic payloads stay
//! [`Payload::Unresolved`] until [`Operand::resolve`] runs against the
//! completed symbol table, which fixes the value and reports any relocation.

use log::trace;

use crate::catalog;
use crate::error::{AssemblerError, Result};
use crate::section::RelocationData;
use crate::symbol_table::{Scope, Symbol, SymbolTable};
use crate::token::{join_tokens, Token, TokenKind};

/// Bit width of register and PSW operands.
pub const NARROW_WIDTH: u32 = 5;
/// Bit width of operands carrying a 16-bit payload.
pub const WIDE_WIDTH: u32 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    ImmediateConstant,
    ImmediateSymbol,
    MemoryConstant,
    MemorySymbol,
    RegisterDirect,
    RegisterIndirectWithDisplacement,
    PcRelative,
    Psw,
}

impl AddressingMode {
    pub fn width(self) -> u32 {
        match self {
            AddressingMode::RegisterDirect | AddressingMode::Psw => NARROW_WIDTH,
            _ => WIDE_WIDTH,
        }
    }

}

/// Modes an operand in destination position may not use.
pub const IMMEDIATE_MODES: &[AddressingMode] = &[
    AddressingMode::ImmediateConstant,
    AddressingMode::ImmediateSymbol,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Register and PSW operands carry no payload.
    Empty,
    /// A symbol or displacement token waiting for pass 2.
    Unresolved(Token),
    Resolved(i64),
}

/// Where the operand being resolved sits in the output.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub symbols: &'a SymbolTable,
    /// Absolute address of the owning instruction.
    pub location: u32,
    /// Absolute address of the instruction that follows.
    pub next_instruction: u32,
    /// Ordinal of the section being assembled.
    pub section: u32,
    /// Base address of that section.
    pub section_base: u32,
}

impl EvalContext<'_> {
    /// Section-relative offset of 16-bit word `word` of the current
    /// instruction. Word 0 holds the opcode and mode fields.
    fn payload_offset(&self, word: u32) -> u32 {
        self.location - self.section_base + 2 * word
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    mode: AddressingMode,
    register: Option<u8>,
    payload: Payload,
}

fn invalid(tokens: &[Token]) -> AssemblerError {
    let line = tokens.first().map(|t| t.line).unwrap_or(0);
    AssemblerError::decoding(format!(
        "invalid operand '{}' at line {}",
        join_tokens(tokens),
        line
    ))
}

impl Operand {
    /// Parses an operand from its tokens, rejecting any mode in `disallowed`.
    pub fn parse(tokens: &[Token], disallowed: &[AddressingMode]) -> Result<Operand> {
        let operand = Self::determine(tokens)?;
        if disallowed.contains(&operand.mode) {
            return Err(AssemblerError::decoding(format!(
                "address mode {:?} not allowed for operand '{}' at line {}",
                operand.mode,
                join_tokens(tokens),
                tokens[0].line
            )));
        }
        Ok(operand)
    }

    fn determine(tokens: &[Token]) -> Result<Operand> {
        let Some(first) = tokens.first() else {
            return Err(AssemblerError::decoding("missing operand"));
        };
        let operand = |mode, register, payload| Operand {
            mode,
            register,
            payload,
        };

        match (first.kind, tokens) {
            (kind, [_]) if kind.is_numeric() => Ok(operand(
                AddressingMode::ImmediateConstant,
                None,
                Payload::Resolved(sized_value(first, 2)?),
            )),
            (TokenKind::ImmediateMark, [_, symbol]) if symbol.is(TokenKind::Identifier) => Ok(
                operand(
                    AddressingMode::ImmediateSymbol,
                    None,
                    Payload::Unresolved(symbol.clone()),
                ),
            ),
            (TokenKind::LocationValueMark, [_, value]) if value.kind.is_numeric() => Ok(operand(
                AddressingMode::MemoryConstant,
                None,
                Payload::Resolved(sized_value(value, 2)?),
            )),
            (TokenKind::PcRelativeMark, [_, symbol]) if symbol.is(TokenKind::Identifier) => Ok(
                operand(
                    AddressingMode::PcRelative,
                    None,
                    Payload::Unresolved(symbol.clone()),
                ),
            ),
            (TokenKind::Identifier, _) => Self::determine_identifier(tokens),
            _ => Err(invalid(tokens)),
        }
    }

    fn determine_identifier(tokens: &[Token]) -> Result<Operand> {
        let name = &tokens[0].text;
        if let Some(register) = catalog::find_register(name) {
            return match tokens {
                [_] => Ok(Operand {
                    mode: AddressingMode::RegisterDirect,
                    register: Some(register),
                    payload: Payload::Empty,
                }),
                [_, open, displacement, close]
                    if open.is(TokenKind::OpenBracket)
                        && close.is(TokenKind::CloseBracket)
                        && (displacement.kind.is_numeric()
                            || displacement.is(TokenKind::Identifier)) =>
                {
                    if displacement.kind.is_numeric() {
                        sized_value(displacement, 2)?;
                    }
                    Ok(Operand {
                        mode: AddressingMode::RegisterIndirectWithDisplacement,
                        register: Some(register),
                        payload: Payload::Unresolved(displacement.clone()),
                    })
                }
                _ => Err(invalid(tokens)),
            };
        }
        if tokens.len() != 1 {
            return Err(invalid(tokens));
        }
        if catalog::is_psw(name) {
            return Ok(Operand {
                mode: AddressingMode::Psw,
                register: None,
                payload: Payload::Empty,
            });
        }
        Ok(Operand {
            mode: AddressingMode::MemorySymbol,
            register: None,
            payload: Payload::Unresolved(tokens[0].clone()),
        })
    }

    pub fn mode(&self) -> AddressingMode {
        self.mode
    }

    pub fn register(&self) -> Option<u8> {
        self.register
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn width(&self) -> u32 {
        self.mode.width()
    }

    pub fn is_wide(&self) -> bool {
        self.width() == WIDE_WIDTH
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self.payload, Payload::Unresolved(_))
    }

    /// The 5-bit address-mode field: `00000` immediate, `00111` PSW,
    /// `01rrr` register, `10000` memory, `11rrr` register indirect and
    /// `11111` PC relative (indirect through `r7`).
    pub fn mode_field(&self) -> u8 {
        let register = self.register.unwrap_or(0) & 0x07;
        match self.mode {
            AddressingMode::ImmediateConstant | AddressingMode::ImmediateSymbol => 0x00,
            AddressingMode::Psw => 0x07,
            AddressingMode::RegisterDirect => 0x08 | register,
            AddressingMode::MemoryConstant | AddressingMode::MemorySymbol => 0x10,
            AddressingMode::RegisterIndirectWithDisplacement => 0x18 | register,
            AddressingMode::PcRelative => 0x1F,
        }
    }

    /// Low 16 bits of the resolved payload, or 0 when there is none.
    pub fn payload_word(&self) -> u16 {
        match self.payload {
            Payload::Resolved(value) => (value & 0xFFFF) as u16,
            _ => 0,
        }
    }

    /// Resolves the payload carried in the word right after the opcode.
    pub fn resolve(&mut self, ctx: &EvalContext<'_>) -> Result<Option<RelocationData>> {
        self.resolve_in_word(ctx, 1)
    }

    /// Resolves the payload against the completed symbol table and returns
    /// the relocation the linker needs, if any. `word` is the index of the
    /// 16-bit instruction word the payload is emitted in.
    pub fn resolve_in_word(
        &mut self,
        ctx: &EvalContext<'_>,
        word: u32,
    ) -> Result<Option<RelocationData>> {
        let token = match &self.payload {
            Payload::Unresolved(token) => token.clone(),
            _ => return Ok(None),
        };

        match self.mode {
            AddressingMode::RegisterIndirectWithDisplacement if token.kind.is_numeric() => {
                self.payload = Payload::Resolved(token.int_value()?);
                Ok(None)
            }
            AddressingMode::ImmediateSymbol
            | AddressingMode::MemorySymbol
            | AddressingMode::RegisterIndirectWithDisplacement => {
                let symbol = ctx.symbols.symbol(&token.text)?;
                self.payload = Payload::Resolved(i64::from(symbol.address.unwrap_or(0)));
                let relocation =
                    RelocationData::absolute(ctx.payload_offset(word), relocation_target(symbol)?);
                trace!("absolute relocation for {} at {:#06x}", symbol.name, relocation.offset);
                Ok(Some(relocation))
            }
            AddressingMode::PcRelative => {
                let symbol = ctx.symbols.symbol(&token.text)?;
                let displacement =
                    i64::from(symbol.address.unwrap_or(0)) - i64::from(ctx.next_instruction);
                self.payload = Payload::Resolved(displacement);
                if symbol.section == Some(ctx.section) {
                    return Ok(None);
                }
                let relocation = RelocationData::relative(
                    ctx.payload_offset(word),
                    relocation_target(symbol)?,
                    ctx.next_instruction,
                );
                trace!("relative relocation for {} at {:#06x}", symbol.name, relocation.offset);
                Ok(Some(relocation))
            }
            mode => Err(AssemblerError::SystemError(format!(
                "operand in mode {mode:?} holds an unresolved payload"
            ))),
        }
    }
}

/// Reads a numeral that must fit in `bytes` bytes, signed or unsigned.
pub(crate) fn sized_value(token: &Token, bytes: u32) -> Result<i64> {
    let value = token.int_value()?;
    let bits = 8 * bytes;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << bits) - 1;
    if value < min || value > max {
        return Err(AssemblerError::decoding(format!(
            "value {} does not fit in {bytes} bytes at line {}",
            token, token.line
        )));
    }
    Ok(value)
}

/// Relocation target: the owning section for locals, the symbol itself for
/// globals.
pub(crate) fn relocation_target(symbol: &Symbol) -> Result<u32> {
    match (symbol.scope, symbol.section) {
        (Scope::Local, Some(section)) => Ok(section),
        (Scope::Local, None) => Err(AssemblerError::SystemError(format!(
            "local symbol {} has no section",
            symbol.name
        ))),
        (Scope::Global, _) => Ok(symbol.ordinal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::scan_line;

    fn parse(source: &str) -> Result<Operand> {
        Operand::parse(&scan_line(source, 1).unwrap(), &[])
    }

    /// `.text` at 0x100 holding `local` at 0x104 and `exported` (global) at
    /// 0x108; `.data` at 0x200 holding `value` at 0x200.
    fn symbols() -> SymbolTable {
        let mut table = SymbolTable::new();
        table.declare_section(".text", 0x100).unwrap();
        table.declare_symbol("local", 0x104, Scope::Local, None).unwrap();
        table.declare_symbol("exported", 0x108, Scope::Local, None).unwrap();
        table.declare_section(".data", 0x200).unwrap();
        table.declare_symbol("value", 0x200, Scope::Local, None).unwrap();
        table.promote_scope("exported", Scope::Global);
        table.finalize_ordinals().unwrap();
        table
    }

    fn ctx(table: &SymbolTable) -> EvalContext<'_> {
        EvalContext {
            symbols: table,
            location: 0x100,
            next_instruction: 0x104,
            section: 1,
            section_base: 0x100,
        }
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!(parse("42").unwrap().mode(), AddressingMode::ImmediateConstant);
        assert_eq!(parse("&x").unwrap().mode(), AddressingMode::ImmediateSymbol);
        assert_eq!(parse("*0x20").unwrap().mode(), AddressingMode::MemoryConstant);
        assert_eq!(parse("$x").unwrap().mode(), AddressingMode::PcRelative);
        assert_eq!(parse("r3").unwrap().mode(), AddressingMode::RegisterDirect);
        assert_eq!(
            parse("r3[4]").unwrap().mode(),
            AddressingMode::RegisterIndirectWithDisplacement
        );
        assert_eq!(
            parse("r3[x]").unwrap().mode(),
            AddressingMode::RegisterIndirectWithDisplacement
        );
        assert_eq!(parse("PSW").unwrap().mode(), AddressingMode::Psw);
        assert_eq!(parse("psw").unwrap().mode(), AddressingMode::Psw);
        assert_eq!(parse("x").unwrap().mode(), AddressingMode::MemorySymbol);
    }

    #[test]
    fn test_register_names_are_case_sensitive() {
        assert_eq!(parse("R1").unwrap().mode(), AddressingMode::MemorySymbol);
        assert_eq!(parse("sp").unwrap().mode(), AddressingMode::MemorySymbol);
        assert_eq!(parse("pc").unwrap().mode(), AddressingMode::MemorySymbol);
        assert_eq!(parse("r1").unwrap().register(), Some(1));
    }

    #[test]
    fn test_parse_rejects_oversized_payloads() {
        for source in ["0x10000", "*0x10000", "r1[0x10000]"] {
            assert!(
                matches!(parse(source), Err(AssemblerError::DecodingError(_))),
                "accepted '{source}'"
            );
        }
        assert_eq!(parse("0xFFFF").unwrap().payload_word(), 0xFFFF);
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for source in ["", "& 5", "*x", "$5", "r1[4", "x[4]", "5 6", "r1 r2", ","] {
            let tokens = scan_line(source, 1).unwrap();
            assert!(
                matches!(Operand::parse(&tokens, &[]), Err(AssemblerError::DecodingError(_))),
                "accepted '{source}'"
            );
        }
    }

    #[test]
    fn test_parse_disallowed_mode() {
        let tokens = scan_line("&x", 1).unwrap();
        assert!(matches!(
            Operand::parse(&tokens, IMMEDIATE_MODES),
            Err(AssemblerError::DecodingError(_))
        ));
        let tokens = scan_line("r1", 1).unwrap();
        assert!(Operand::parse(&tokens, IMMEDIATE_MODES).is_ok());
    }

    #[test]
    fn test_widths_and_fields() {
        let reg = parse("r5").unwrap();
        assert_eq!(reg.width(), 5);
        assert_eq!(reg.mode_field(), 0x0D);

        assert_eq!(parse("psw").unwrap().mode_field(), 0x07);
        assert_eq!(parse("r2[1]").unwrap().mode_field(), 0x1A);
        assert_eq!(parse("$x").unwrap().mode_field(), 0x1F);
        assert_eq!(parse("x").unwrap().mode_field(), 0x10);

        let immediate = parse("0x1234").unwrap();
        assert_eq!(immediate.width(), 21);
        assert_eq!(immediate.mode_field(), 0x00);
        assert_eq!(immediate.payload_word(), 0x1234);
    }

    #[test]
    fn test_resolve_constants_is_noop() {
        let table = symbols();
        let mut operand = parse("7").unwrap();
        assert_eq!(operand.resolve(&ctx(&table)).unwrap(), None);
        assert_eq!(operand.payload_word(), 7);

        let mut register = parse("r1").unwrap();
        assert_eq!(register.resolve(&ctx(&table)).unwrap(), None);
    }

    #[test]
    fn test_resolve_numeric_displacement() {
        let table = symbols();
        let mut operand = parse("r1[0x10]").unwrap();
        assert!(!operand.is_resolved());
        assert_eq!(operand.resolve(&ctx(&table)).unwrap(), None);
        assert!(operand.is_resolved());
        assert_eq!(operand.payload_word(), 0x10);
    }

    #[test]
    fn test_resolve_local_symbol_targets_section() {
        let table = symbols();
        let mut operand = parse("&value").unwrap();
        let relocation = operand.resolve(&ctx(&table)).unwrap().unwrap();
        assert_eq!(operand.payload_word(), 0x200);
        assert_eq!(relocation, RelocationData::absolute(2, 2));
    }

    #[test]
    fn test_resolve_global_symbol_targets_symbol() {
        let table = symbols();
        let mut operand = parse("exported").unwrap();
        let relocation = operand.resolve(&ctx(&table)).unwrap().unwrap();
        let ordinal = table.symbol("exported").unwrap().ordinal;
        assert_eq!(relocation, RelocationData::absolute(2, ordinal));
        assert_eq!(operand.payload_word(), 0x108);
    }

    #[test]
    fn test_resolve_in_second_payload_word() {
        let table = symbols();
        let mut operand = parse("value").unwrap();
        let relocation = operand.resolve_in_word(&ctx(&table), 2).unwrap().unwrap();
        assert_eq!(relocation, RelocationData::absolute(4, 2));
    }

    #[test]
    fn test_resolve_undefined_symbol() {
        let table = symbols();
        let mut operand = parse("&nowhere").unwrap();
        assert!(matches!(
            operand.resolve(&ctx(&table)),
            Err(AssemblerError::SymbolNotFound(_))
        ));
    }

    #[test]
    fn test_pc_relative_same_section_needs_no_relocation() {
        let table = symbols();
        let mut operand = parse("$local").unwrap();
        assert_eq!(operand.resolve(&ctx(&table)).unwrap(), None);
        assert_eq!(operand.payload_word(), 0);

        let mut backwards = parse("$local").unwrap();
        let later = EvalContext {
            location: 0x108,
            next_instruction: 0x10C,
            ..ctx(&table)
        };
        backwards.resolve(&later).unwrap();
        assert_eq!(backwards.payload_word(), (-8i64 & 0xFFFF) as u16);
    }

    #[test]
    fn test_pc_relative_local_in_other_section_targets_section() {
        let table = symbols();
        let mut operand = parse("$value").unwrap();
        let relocation = operand.resolve(&ctx(&table)).unwrap().unwrap();
        assert_eq!(relocation, RelocationData::relative(2, 2, 0x104));
        assert_eq!(operand.payload_word(), 0x200 - 0x104);
    }

    #[test]
    fn test_pc_relative_global_in_other_section_targets_symbol() {
        let table = symbols();
        let data_ctx = EvalContext {
            location: 0x200,
            next_instruction: 0x204,
            section: 2,
            section_base: 0x200,
            ..ctx(&table)
        };
        let mut operand = parse("$exported").unwrap();
        let relocation = operand.resolve(&data_ctx).unwrap().unwrap();
        let ordinal = table.symbol("exported").unwrap().ordinal;
        assert_eq!(relocation, RelocationData::relative(2, ordinal, 0x204));
    }
}
