//! # relasm
//!
//! A two-pass assembler for a 16-bit-addressed instruction set. Source text is
//! translated into a textual relocatable object file carrying a symbol table,
//! per-section relocation records and the encoded section contents.
//!
//! # Example
//!
//! ```no_run
//! use relasm::assemble;
//!
//! assemble("program.s", "program.o", 0)?;
//! # Ok::<(), relasm::AssemblerError>(())
//! ```

use std::fs::{read_to_string, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;

pub mod assembler;
pub mod catalog;
pub mod command;
pub mod encoder;
pub mod error;
pub mod lexer;
pub mod operand;
pub mod output;
pub mod recognizer;
pub mod section;
pub mod symbol_table;
pub mod token;

pub use assembler::{Assembler, MEMORY_SIZE};
pub use error::{AssemblerError, Result};
pub use output::ObjectFile;
pub use section::{RelocationData, RelocationKind, Section, SectionType};
pub use symbol_table::{Scope, Symbol, SymbolTable};

// ============================================================================
// PUBLIC API
// ============================================================================

/// Assemble an input file into an object file.
///
/// The output file is only created once both passes have succeeded, so no
/// partial object is left behind on failure.
///
/// # Errors
/// Returns `AssemblerError` if file I/O fails or assembly fails.
pub fn assemble(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    start_address: u32,
) -> Result<()> {
    let input_path = input_path.as_ref();
    let output_path = output_path.as_ref();
    debug!("assembling {}", input_path.display());

    let content = read_to_string(input_path)?;
    let object = assemble_string(&content, start_address)?;

    let mut out = BufWriter::new(File::create(output_path)?);
    object.write_to(&mut out)?;
    out.flush()?;
    debug!("wrote {}", output_path.display());
    Ok(())
}

/// Assemble source text in memory.
///
/// # Example
/// ```
/// use relasm::assemble_string;
///
/// let object = assemble_string(".data\n.word 5\n.end\n", 0)?;
/// assert_eq!(object.section(".data").unwrap().bytes(), vec![0x05, 0x00]);
/// # Ok::<(), relasm::AssemblerError>(())
/// ```
pub fn assemble_string(source: &str, start_address: u32) -> Result<ObjectFile> {
    Assembler::new(source, start_address)?.run()
}
