//! Directive and instruction encoders.
//!
//! Every unit a section can hold is one variant of [`EncodedUnit`]. Each
//! variant decodes itself from the token stream, reports its size in bits and
//! serializes its bytes once pass 2 has resolved its operands.

use std::io::{self, Write};

use log::warn;

use crate::assembler::MEMORY_SIZE;
use crate::catalog::{self, DefinitionSpec, Mnemonic, Shape};
use crate::error::{AssemblerError, Result};
use crate::operand::{self, AddressingMode, EvalContext, Operand, Payload, IMMEDIATE_MODES};
use crate::section::RelocationData;
use crate::token::{Token, TokenKind, TokenStream};

// ============================================================================
// HEX OUTPUT
// ============================================================================

/// Writes bytes as two hex digits each, 16 bytes per line.
pub struct HexWriter<'a, W: Write> {
    out: &'a mut W,
    column: usize,
}

impl<'a, W: Write> HexWriter<'a, W> {
    pub const BYTES_PER_LINE: usize = 16;

    pub fn new(out: &'a mut W) -> Self {
        HexWriter { out, column: 0 }
    }

    /// Number of bytes written so far.
    pub fn column(&self) -> usize {
        self.column
    }

    pub fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        if self.column % Self::BYTES_PER_LINE != 0 {
            write!(self.out, " ")?;
        }
        write!(self.out, "{byte:02x}")?;
        self.column += 1;
        if self.column % Self::BYTES_PER_LINE == 0 {
            writeln!(self.out)?;
        }
        Ok(())
    }

    /// Terminates a partially filled last line.
    pub fn finish(self) -> io::Result<()> {
        if self.column % Self::BYTES_PER_LINE != 0 {
            writeln!(self.out)?;
        }
        Ok(())
    }
}

fn bits_to_bytes(bits: u32) -> u32 {
    (bits + 7) / 8
}

fn push_le(out: &mut Vec<u8>, value: u64, size: u32) {
    for i in 0..size {
        out.push((value >> (8 * i)) as u8);
    }
}

// ============================================================================
// ENCODED UNITS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedUnit {
    Definition(Definition),
    Skip(SkipDirective),
    Align(AlignDirective),
    NoOperand(NoOperandInstruction),
    SingleOperand(SingleOperandInstruction),
    DoubleOperand(DoubleOperandInstruction),
    Jump(JumpInstruction),
}

impl EncodedUnit {
    /// Size in bits.
    pub fn size(&self) -> u32 {
        match self {
            EncodedUnit::Definition(d) => d.size(),
            EncodedUnit::Skip(s) => s.size(),
            EncodedUnit::Align(a) => a.size(),
            EncodedUnit::NoOperand(i) => i.size(),
            EncodedUnit::SingleOperand(i) => i.size(),
            EncodedUnit::DoubleOperand(i) => i.size(),
            EncodedUnit::Jump(i) => i.size(),
        }
    }

    pub fn byte_size(&self) -> u32 {
        bits_to_bytes(self.size())
    }

    /// Whether the unit stores explicit data (forbidden in BSS).
    pub fn is_initialized(&self) -> bool {
        match self {
            EncodedUnit::Definition(d) => d.is_initialized(),
            EncodedUnit::Skip(s) => s.fill != 0,
            EncodedUnit::Align(a) => a.fill != 0,
            EncodedUnit::NoOperand(_)
            | EncodedUnit::SingleOperand(_)
            | EncodedUnit::DoubleOperand(_)
            | EncodedUnit::Jump(_) => true,
        }
    }

    pub fn is_resolved(&self) -> bool {
        match self {
            EncodedUnit::Definition(d) => d
                .values
                .iter()
                .all(|v| !matches!(v, Payload::Unresolved(_))),
            EncodedUnit::Skip(_) | EncodedUnit::Align(_) | EncodedUnit::NoOperand(_) => true,
            EncodedUnit::SingleOperand(i) => i.operand.is_resolved(),
            EncodedUnit::DoubleOperand(i) => i.dst.is_resolved() && i.src.is_resolved(),
            EncodedUnit::Jump(i) => i.operand.is_resolved(),
        }
    }

    /// Resolves symbolic payloads, returning the relocations they need.
    pub fn resolve(&mut self, ctx: &EvalContext<'_>) -> Result<Vec<RelocationData>> {
        let relocations = match self {
            EncodedUnit::Definition(d) => return d.resolve(ctx),
            EncodedUnit::Skip(_) | EncodedUnit::Align(_) | EncodedUnit::NoOperand(_) => {
                Vec::new()
            }
            EncodedUnit::SingleOperand(i) => i.operand.resolve(ctx)?.into_iter().collect(),
            EncodedUnit::DoubleOperand(i) => {
                let src_word = if i.dst.is_wide() { 2 } else { 1 };
                let mut relocations: Vec<_> = i.dst.resolve(ctx)?.into_iter().collect();
                relocations.extend(i.src.resolve_in_word(ctx, src_word)?);
                relocations
            }
            EncodedUnit::Jump(i) => i.operand.resolve(ctx)?.into_iter().collect(),
        };
        Ok(relocations)
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            EncodedUnit::Definition(d) => d.encode_into(out),
            EncodedUnit::Skip(s) => out.extend(std::iter::repeat(s.fill).take(s.count as usize)),
            EncodedUnit::Align(a) => out.extend(std::iter::repeat(a.fill).take(a.pad as usize)),
            EncodedUnit::NoOperand(i) => encode_instruction(out, i.word(), i.size()),
            EncodedUnit::SingleOperand(i) => encode_instruction(out, i.word(), i.size()),
            EncodedUnit::DoubleOperand(i) => i.encode_into(out),
            EncodedUnit::Jump(i) => encode_instruction(out, i.word(), i.size()),
        }
    }

    /// Writes the unit's bytes and returns the updated column count.
    pub fn write<W: Write>(&self, writer: &mut HexWriter<'_, W>) -> io::Result<usize> {
        let mut bytes = Vec::with_capacity(self.byte_size() as usize);
        self.encode_into(&mut bytes);
        for byte in bytes {
            writer.write_byte(byte)?;
        }
        Ok(writer.column())
    }
}

/// Emits the instruction word as 16-bit little-endian words: bits 31..16
/// first, then the payload when the instruction is wider than 16 bits.
fn encode_instruction(out: &mut Vec<u8>, word: u32, bits: u32) {
    push_le(out, u64::from(word >> 16), 2);
    if bits > 16 {
        push_le(out, u64::from(word & 0xFFFF), 2);
    }
}

fn numeric_arg(token: &Token, what: &str) -> Result<i64> {
    if !token.kind.is_numeric() {
        return Err(AssemblerError::decoding(format!(
            "{what} expects a number, found '{}' at line {}",
            token, token.line
        )));
    }
    token.int_value()
}

/// Reads `value {, value}` up to the line delimiter.
fn read_argument_list(stream: &mut TokenStream, what: &str) -> Result<Vec<Token>> {
    let mut args = Vec::new();
    if stream.peek()?.is(TokenKind::LineDelimiter) {
        stream.next()?;
        return Ok(args);
    }
    loop {
        let value = stream.next()?;
        if matches!(value.kind, TokenKind::Comma | TokenKind::LineDelimiter) {
            return Err(AssemblerError::decoding(format!(
                "missing argument for {what} at line {}",
                value.line
            )));
        }
        args.push(value);
        let separator = stream.next()?;
        match separator.kind {
            TokenKind::LineDelimiter => return Ok(args),
            TokenKind::Comma => continue,
            _ => {
                return Err(AssemblerError::decoding(format!(
                    "unexpected '{}' in {what} arguments at line {}",
                    separator, separator.line
                )))
            }
        }
    }
}

// ============================================================================
// DIRECTIVES
// ============================================================================

/// `.char`, `.word` and `.long`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub name: &'static str,
    /// Bytes per value.
    pub unit_size: u32,
    values: Vec<Payload>,
}

impl Definition {
    pub fn decode(spec: &DefinitionSpec, stream: &mut TokenStream) -> Result<Definition> {
        let values = read_argument_list(stream, spec.name)?
            .into_iter()
            .map(|token| {
                if token.kind.is_numeric() {
                    Ok(Payload::Resolved(operand::sized_value(&token, spec.unit_size)?))
                } else if token.is(TokenKind::Identifier) {
                    Ok(Payload::Unresolved(token))
                } else {
                    Err(AssemblerError::decoding(format!(
                        "data can be initialized only with numbers or symbols, found '{}' at line {}",
                        token, token.line
                    )))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Definition {
            name: spec.name,
            unit_size: spec.unit_size,
            values,
        })
    }

    pub fn with_values(name: &'static str, unit_size: u32, values: &[i64]) -> Definition {
        Definition {
            name,
            unit_size,
            values: values.iter().map(|&v| Payload::Resolved(v)).collect(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn size(&self) -> u32 {
        self.unit_size * self.values.len().max(1) as u32 * 8
    }

    fn resolve(&mut self, ctx: &EvalContext<'_>) -> Result<Vec<RelocationData>> {
        let mut relocations = Vec::new();
        let start = ctx.location - ctx.section_base;
        for (index, value) in self.values.iter_mut().enumerate() {
            let Payload::Unresolved(token) = value else {
                continue;
            };
            let symbol = ctx.symbols.symbol(&token.text)?;
            let offset = start + index as u32 * self.unit_size;
            relocations.push(RelocationData::absolute(
                offset,
                operand::relocation_target(symbol)?,
            ));
            *value = Payload::Resolved(i64::from(symbol.address.unwrap_or(0)));
        }
        Ok(relocations)
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        if self.values.is_empty() {
            push_le(out, 0, self.unit_size);
            return;
        }
        for value in &self.values {
            let raw = match value {
                Payload::Resolved(v) => *v as u64,
                _ => 0,
            };
            push_le(out, raw, self.unit_size);
        }
    }
}

/// `.skip size [, fill]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipDirective {
    pub count: u32,
    pub fill: u8,
}

impl SkipDirective {
    pub fn new(count: u32, fill: u8) -> Self {
        SkipDirective { count, fill }
    }

    pub fn decode(stream: &mut TokenStream) -> Result<SkipDirective> {
        let args = read_argument_list(stream, ".skip")?;
        let (count, fill) = match args.as_slice() {
            [count] => (numeric_arg(count, ".skip")?, 0),
            [count, fill] => (numeric_arg(count, ".skip")?, numeric_arg(fill, ".skip")?),
            _ => {
                return Err(AssemblerError::decoding(
                    ".skip takes a size and an optional fill byte",
                ))
            }
        };
        if count > i64::from(MEMORY_SIZE) {
            return Err(AssemblerError::MemoryError(format!(
                ".skip of {count} bytes exceeds the address space"
            )));
        }
        Ok(SkipDirective {
            count: count as u32,
            fill: fill_byte(fill)?,
        })
    }

    pub fn size(&self) -> u32 {
        self.count * 8
    }
}

fn fill_byte(value: i64) -> Result<u8> {
    u8::try_from(value)
        .map_err(|_| AssemblerError::decoding(format!("fill value {value} does not fit in a byte")))
}

/// `.align alignment [, fill [, max]]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignDirective {
    pub alignment: u32,
    pub fill: u8,
    pub max_pad: u32,
    pad: u32,
}

impl AlignDirective {
    pub fn new(alignment: u32, fill: u8, max_pad: u32) -> Self {
        AlignDirective {
            alignment,
            fill,
            max_pad,
            pad: 0,
        }
    }

    pub fn decode(stream: &mut TokenStream) -> Result<AlignDirective> {
        let args = read_argument_list(stream, ".align")?;
        let numbers = args
            .iter()
            .map(|arg| numeric_arg(arg, ".align"))
            .collect::<Result<Vec<_>>>()?;
        let (alignment, fill, max_pad) = match numbers.as_slice() {
            [alignment] => (*alignment, 0, u32::MAX),
            [alignment, fill] => (*alignment, fill_byte(*fill)?, u32::MAX),
            [alignment, fill, max] => (*alignment, fill_byte(*fill)?, *max as u32),
            _ => {
                return Err(AssemblerError::decoding(
                    ".align takes an alignment, an optional fill byte and an optional maximum",
                ))
            }
        };
        if alignment <= 0 || alignment > i64::from(MEMORY_SIZE) {
            return Err(AssemblerError::decoding(format!(
                "alignment must be between 1 and 0x{MEMORY_SIZE:X}, found {alignment}"
            )));
        }
        Ok(AlignDirective::new(alignment as u32, fill, max_pad))
    }

    /// Computes the padding needed at `location_counter`, the address just
    /// before the directive. A pad above the maximum is dropped entirely.
    pub fn evaluate(&mut self, location_counter: u32) -> &mut Self {
        let remainder = location_counter % self.alignment;
        let natural = if remainder == 0 {
            0
        } else {
            self.alignment - remainder
        };
        self.pad = if natural > self.max_pad {
            warn!(
                "alignment to {} at 0x{location_counter:04X} skipped: pad {natural} exceeds maximum {}",
                self.alignment, self.max_pad
            );
            0
        } else {
            natural
        };
        self
    }

    pub fn pad(&self) -> u32 {
        self.pad
    }

    pub fn size(&self) -> u32 {
        self.pad * 8
    }
}

// ============================================================================
// INSTRUCTIONS
// ============================================================================

/// Decodes the instruction named by `mnemonic` from the rest of its line.
pub fn decode_instruction(mnemonic: Mnemonic, stream: &mut TokenStream) -> Result<EncodedUnit> {
    let unit = match mnemonic.spec.shape {
        Shape::NoOperand {
            implied_destination,
        } => {
            stream.expect_line_end(mnemonic.spec.name)?;
            EncodedUnit::NoOperand(NoOperandInstruction {
                mnemonic,
                implied_destination,
            })
        }
        Shape::SingleOperand { destination } => {
            let disallowed: &[AddressingMode] = if destination { IMMEDIATE_MODES } else { &[] };
            let operand = Operand::parse(&stream.take_until_separator()?, disallowed)?;
            stream.expect_line_end(mnemonic.spec.name)?;
            EncodedUnit::SingleOperand(SingleOperandInstruction {
                mnemonic,
                destination,
                operand,
            })
        }
        Shape::DoubleOperand => {
            let dst = Operand::parse(&stream.take_until_separator()?, IMMEDIATE_MODES)?;
            let comma = stream.next()?;
            if !comma.is(TokenKind::Comma) {
                return Err(AssemblerError::decoding(format!(
                    "{} expects two operands at line {}",
                    mnemonic.spec.name, comma.line
                )));
            }
            let src = Operand::parse(&stream.take_until_separator()?, &[])?;
            stream.expect_line_end(mnemonic.spec.name)?;
            EncodedUnit::DoubleOperand(DoubleOperandInstruction { mnemonic, dst, src })
        }
        Shape::Jump => {
            let operand =
                Operand::parse(&stream.take_until_separator()?, &[AddressingMode::Psw])?;
            stream.expect_line_end(mnemonic.spec.name)?;
            EncodedUnit::Jump(JumpInstruction { mnemonic, operand })
        }
    };
    Ok(unit)
}

const FIXED_FIELD_BITS: u32 = 11;
const OPCODE_BITS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoOperandInstruction {
    pub mnemonic: Mnemonic,
    implied_destination: Option<u8>,
}

impl NoOperandInstruction {
    pub fn size(&self) -> u32 {
        16
    }

    fn word(&self) -> u32 {
        let dst = u32::from(self.implied_destination.unwrap_or(0));
        (u32::from(self.mnemonic.opcode()) << 26) | (dst << 21)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleOperandInstruction {
    pub mnemonic: Mnemonic,
    /// Operand goes in the destination field (bit 21) rather than the source.
    pub destination: bool,
    pub operand: Operand,
}

impl SingleOperandInstruction {
    pub fn size(&self) -> u32 {
        bits_to_bytes(FIXED_FIELD_BITS + self.operand.width()) * 8
    }

    fn word(&self) -> u32 {
        let shift = if self.destination { 21 } else { 16 };
        (u32::from(self.mnemonic.opcode()) << 26)
            | (u32::from(self.operand.mode_field()) << shift)
            | u32::from(self.operand.payload_word())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoubleOperandInstruction {
    pub mnemonic: Mnemonic,
    pub dst: Operand,
    pub src: Operand,
}

impl DoubleOperandInstruction {
    pub fn size(&self) -> u32 {
        bits_to_bytes(OPCODE_BITS + self.dst.width() + self.src.width()) * 8
    }

    /// Word 0, then one payload word per wide operand: destination first.
    fn encode_into(&self, out: &mut Vec<u8>) {
        encode_instruction(out, self.word(), self.size());
        if self.dst.is_wide() && self.src.is_wide() {
            push_le(out, u64::from(self.src.payload_word()), 2);
        }
    }

    fn word(&self) -> u32 {
        let payload = if self.dst.is_wide() {
            self.dst.payload_word()
        } else {
            self.src.payload_word()
        };
        (u32::from(self.mnemonic.opcode()) << 26)
            | (u32::from(self.dst.mode_field()) << 21)
            | (u32::from(self.src.mode_field()) << 16)
            | u32::from(payload)
    }
}

/// `jmp` is `add pc, &displacement` for PC-relative targets and
/// `mov pc, operand` for everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpInstruction {
    pub mnemonic: Mnemonic,
    pub operand: Operand,
}

impl JumpInstruction {
    pub fn size(&self) -> u32 {
        bits_to_bytes(FIXED_FIELD_BITS + self.operand.width()) * 8
    }

    fn word(&self) -> u32 {
        let pc_relative = self.operand.mode() == AddressingMode::PcRelative;
        let (operation, source) = if pc_relative {
            (catalog::OP_ADD, 0x00)
        } else {
            (catalog::OP_MOV, self.operand.mode_field())
        };
        (u32::from(self.mnemonic.condition) << 30)
            | (u32::from(operation) << 26)
            | (u32::from(catalog::PC_REGISTER_FIELD) << 21)
            | (u32::from(source) << 16)
            | u32::from(self.operand.payload_word())
    }
}
