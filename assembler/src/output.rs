//! Textual relocatable object file: the symbol table, then relocations and
//! content for every section that holds data.

use std::io::{self, Write};

use crate::section::Section;
use crate::symbol_table::SymbolTable;

#[derive(Debug, Clone)]
pub struct ObjectFile {
    symbols: SymbolTable,
    sections: Vec<Section>,
}

impl ObjectFile {
    pub fn new(symbols: SymbolTable, sections: Vec<Section>) -> Self {
        ObjectFile { symbols, sections }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.symbols.write_to(out)?;
        for section in &self.sections {
            section.write_relocations(out)?;
            section.write_content(out)?;
        }
        Ok(())
    }

    pub fn to_text(&self) -> String {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
}
