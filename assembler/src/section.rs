//! Sections: the encoded units and relocation records produced in pass 2.

use std::fmt;
use std::io::{self, Write};

use crate::encoder::{EncodedUnit, HexWriter};
use crate::error::{AssemblerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionType {
    Data,
    Text,
    Bss,
    Rodata,
}

impl SectionType {
    /// Whether the section holds data directives rather than instructions.
    pub fn holds_data(self) -> bool {
        !matches!(self, SectionType::Text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    Absolute,
    Relative,
}

impl RelocationKind {
    pub fn name(self) -> &'static str {
        match self {
            RelocationKind::Absolute => "R_386_32",
            RelocationKind::Relative => "R_386_PC32",
        }
    }
}

/// How a linker must patch a reference whose final address is not known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationData {
    /// Byte offset of the patched field from the start of its section.
    pub offset: u32,
    pub kind: RelocationKind,
    /// Ordinal of the target section (local symbols) or symbol (globals).
    pub value: u32,
    /// Address of the next instruction, for relative relocations.
    pub next_instruction: Option<u32>,
}

impl RelocationData {
    pub fn absolute(offset: u32, value: u32) -> Self {
        RelocationData {
            offset,
            kind: RelocationKind::Absolute,
            value,
            next_instruction: None,
        }
    }

    pub fn relative(offset: u32, value: u32, next_instruction: u32) -> Self {
        RelocationData {
            offset,
            kind: RelocationKind::Relative,
            value,
            next_instruction: Some(next_instruction),
        }
    }
}

impl fmt::Display for RelocationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}\t{}\t{}", self.offset, self.kind.name(), self.value)?;
        if let Some(next) = self.next_instruction {
            write!(f, "\t0x{:04X}", next)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION CONTENT
// ============================================================================

#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub section_type: SectionType,
    pub base_address: u32,
    units: Vec<EncodedUnit>,
    relocations: Vec<RelocationData>,
}

impl Section {
    pub fn new(name: impl Into<String>, section_type: SectionType, base_address: u32) -> Self {
        Section {
            name: name.into(),
            section_type,
            base_address,
            units: Vec::new(),
            relocations: Vec::new(),
        }
    }

    /// Appends an encoded unit, rejecting initialized data in a BSS section
    /// and units whose symbolic payloads were never resolved.
    pub fn add_unit(&mut self, unit: EncodedUnit) -> Result<()> {
        check_bss_purity(self.section_type, &unit)?;
        if !unit.is_resolved() {
            return Err(AssemblerError::SystemError(format!(
                "unresolved unit added to {}",
                self.name
            )));
        }
        self.units.push(unit);
        Ok(())
    }

    pub fn add_relocation(&mut self, relocation: RelocationData) {
        self.relocations.push(relocation);
    }

    pub fn relocations(&self) -> &[RelocationData] {
        &self.relocations
    }

    /// Total encoded size in bytes.
    pub fn byte_size(&self) -> u32 {
        self.units.iter().map(EncodedUnit::byte_size).sum()
    }

    /// Encoded bytes of every unit, in order.
    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for unit in &self.units {
            unit.encode_into(&mut bytes);
        }
        bytes
    }

    pub fn write_relocations<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if self.section_type == SectionType::Bss {
            return Ok(());
        }
        writeln!(out, "#.rel{}", self.name)?;
        writeln!(out, "#offset\ttype\tvalue")?;
        for relocation in &self.relocations {
            writeln!(out, "{}", relocation)?;
        }
        Ok(())
    }

    pub fn write_content<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if self.section_type == SectionType::Bss {
            return Ok(());
        }
        writeln!(out, "#{}", self.name)?;
        let mut writer = HexWriter::new(out);
        for unit in &self.units {
            unit.write(&mut writer)?;
        }
        writer.finish()
    }
}

pub(crate) fn check_bss_purity(section_type: SectionType, unit: &EncodedUnit) -> Result<()> {
    if section_type == SectionType::Bss && unit.is_initialized() {
        return Err(AssemblerError::decoding(
            "BSS section can only contain uninitialized data",
        ));
    }
    Ok(())
}
