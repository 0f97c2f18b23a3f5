//! Sections and symbols discovered in pass 1.
//!
//! Sections are numbered first (1-based, in declaration order); symbols get
//! their ordinals after all sections once [`SymbolTable::finalize_ordinals`]
//! runs at the end of pass 1.

use std::io::{self, Write};

use log::debug;

use crate::error::{AssemblerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    Global,
}

impl Scope {
    pub fn letter(self) -> char {
        match self {
            Scope::Local => 'L',
            Scope::Global => 'G',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionEntry {
    pub name: String,
    pub base_address: u32,
    pub size: u32,
    pub ordinal: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    /// Ordinal of the owning section; `None` for an undefined global.
    pub section: Option<u32>,
    pub scope: Scope,
    /// `None` while the address is unknown.
    pub address: Option<u32>,
    pub ordinal: u32,
}

impl Symbol {
    pub fn is_defined(&self) -> bool {
        self.address.is_some()
    }
}

#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    sections: Vec<SectionEntry>,
    symbols: Vec<Symbol>,
    finalized: bool,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a section at `base_address` and returns its ordinal.
    pub fn declare_section(&mut self, name: &str, base_address: u32) -> Result<u32> {
        if self.sections.iter().any(|s| s.name == name) {
            return Err(AssemblerError::SymbolRedefined(name.to_string()));
        }
        let ordinal = self.sections.len() as u32 + 1;
        debug!("section {name} #{ordinal} at 0x{base_address:04X}");
        self.sections.push(SectionEntry {
            name: name.to_string(),
            base_address,
            size: 0,
            ordinal,
        });
        Ok(ordinal)
    }

    /// Declares a symbol in `section`, or in the most recent section if `None`.
    pub fn declare_symbol(
        &mut self,
        name: &str,
        address: u32,
        scope: Scope,
        section: Option<u32>,
    ) -> Result<()> {
        let section = match section.or_else(|| self.sections.last().map(|s| s.ordinal)) {
            Some(section) => section,
            None => {
                return Err(AssemblerError::NoSectionDefined(format!(
                    "symbol '{name}'"
                )))
            }
        };
        self.check_unique(name)?;
        debug!("symbol {name} in section #{section} at 0x{address:04X}");
        self.symbols.push(Symbol {
            name: name.to_string(),
            section: Some(section),
            scope,
            address: Some(address),
            ordinal: 0,
        });
        Ok(())
    }

    /// Inserts a global whose definition has not been seen.
    pub fn declare_undefined_global(&mut self, name: &str) -> Result<()> {
        self.check_unique(name)?;
        self.symbols.push(Symbol {
            name: name.to_string(),
            section: None,
            scope: Scope::Global,
            address: None,
            ordinal: 0,
        });
        Ok(())
    }

    fn check_unique(&self, name: &str) -> Result<()> {
        if self.symbols.iter().any(|s| s.name == name) {
            return Err(AssemblerError::SymbolRedefined(name.to_string()));
        }
        Ok(())
    }

    /// Changes a symbol's scope. Returns `false` if the symbol does not exist.
    /// A global symbol is never demoted back to local.
    pub fn promote_scope(&mut self, name: &str, scope: Scope) -> bool {
        match self.symbols.iter_mut().find(|s| s.name == name) {
            Some(symbol) => {
                if symbol.scope != Scope::Global {
                    symbol.scope = scope;
                }
                true
            }
            None => false,
        }
    }

    pub fn update_section_size(&mut self, name: &str, size: u32) -> Result<()> {
        let section = self
            .sections
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| AssemblerError::SymbolNotFound(name.to_string()))?;
        debug!("section {name} closed with size {size}");
        section.size = size;
        Ok(())
    }

    /// Numbers symbols after all sections. Must run once, between the passes.
    pub fn finalize_ordinals(&mut self) -> Result<()> {
        if self.finalized {
            return Err(AssemblerError::SystemError(
                "symbol ordinals finalized twice".to_string(),
            ));
        }
        let first = self.sections.len() as u32 + 1;
        for (index, symbol) in self.symbols.iter_mut().enumerate() {
            symbol.ordinal = first + index as u32;
        }
        self.finalized = true;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn total_section_size(&self) -> u32 {
        self.sections.iter().map(|s| s.size).sum()
    }

    pub fn symbol(&self, name: &str) -> Result<&Symbol> {
        self.symbols
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| AssemblerError::SymbolNotFound(name.to_string()))
    }

    pub fn section(&self, name: &str) -> Result<&SectionEntry> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| AssemblerError::SymbolNotFound(name.to_string()))
    }

    pub fn section_by_ordinal(&self, ordinal: u32) -> Result<&SectionEntry> {
        ordinal
            .checked_sub(1)
            .and_then(|index| self.sections.get(index as usize))
            .ok_or_else(|| {
                AssemblerError::SystemError(format!("section ordinal {ordinal} out of range"))
            })
    }

    pub fn symbol_by_ordinal(&self, ordinal: u32) -> Result<&Symbol> {
        let first = self.sections.len() as u32 + 1;
        ordinal
            .checked_sub(first)
            .and_then(|index| self.symbols.get(index as usize))
            .ok_or_else(|| {
                AssemblerError::SystemError(format!("symbol ordinal {ordinal} out of range"))
            })
    }

    pub fn sections(&self) -> &[SectionEntry] {
        &self.sections
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Globals that were declared but never defined.
    pub fn unresolved_globals(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(|s| !s.is_defined())
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "#symbol table")?;
        writeln!(out, "#ord\ttype\tname\tsection\taddress\tscope/size")?;
        for section in &self.sections {
            writeln!(
                out,
                "{}\tSEK\t{}\t{}\t0x{:04X}\tL\t{}",
                section.ordinal, section.name, section.ordinal, section.base_address, section.size
            )?;
        }
        for symbol in &self.symbols {
            let address = match symbol.address {
                Some(address) => format!("0x{address:04X}"),
                None => "?".to_string(),
            };
            writeln!(
                out,
                "{}\tSIM\t{}\t{}\t{}\t{}",
                symbol.ordinal,
                symbol.name,
                symbol.section.unwrap_or(0),
                address,
                symbol.scope.letter()
            )?;
        }
        Ok(())
    }
}
