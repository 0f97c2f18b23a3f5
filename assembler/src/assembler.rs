//! The two-pass driver.
//!
//! Pass 1 walks the token stream to lay out sections and collect symbols.
//! Pass 2 rewinds the same stream, decodes every unit again, resolves it
//! against the finished symbol table and stores it in its section.

use log::{debug, trace, warn};

use crate::command::{check_sequence, Command, CommandKind};
use crate::encoder::{AlignDirective, Definition, EncodedUnit, SkipDirective};
use crate::error::{AssemblerError, Result};
use crate::lexer;
use crate::operand::EvalContext;
use crate::output::ObjectFile;
use crate::recognizer;
use crate::section::{self, Section};
use crate::symbol_table::{Scope, SymbolTable};
use crate::token::TokenStream;

/// Size of the 16-bit address space.
pub const MEMORY_SIZE: u32 = 0x10000;

/// Per-pass driver state.
#[derive(Debug)]
pub struct PassState {
    pub previous: Command,
    pub section: Option<Section>,
    pub location_counter: u32,
    pub end_seen: bool,
}

impl PassState {
    pub fn new(start_address: u32) -> Self {
        PassState {
            previous: Command::empty(),
            section: None,
            location_counter: start_address,
            end_seen: false,
        }
    }

    fn advance(&mut self, bytes: u32) -> Result<()> {
        self.location_counter = self
            .location_counter
            .checked_add(bytes)
            .filter(|&lc| lc <= MEMORY_SIZE)
            .ok_or_else(|| {
                AssemblerError::MemoryError(format!(
                    "location counter passes the end of memory at 0x{:04X}",
                    self.location_counter
                ))
            })?;
        Ok(())
    }

    fn current_section(&self, command: &Command) -> Result<&Section> {
        self.section
            .as_ref()
            .ok_or_else(|| AssemblerError::NoSectionDefined(command.to_string()))
    }
}

pub struct Assembler {
    stream: TokenStream,
    symbols: SymbolTable,
    start_address: u32,
}

impl Assembler {
    /// Scans `source` into the token stream both passes share.
    pub fn new(source: &str, start_address: u32) -> Result<Self> {
        Ok(Assembler {
            stream: TokenStream::new(lexer::scan(source)?),
            symbols: SymbolTable::new(),
            start_address,
        })
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Runs both passes and returns the assembled object.
    pub fn run(mut self) -> Result<ObjectFile> {
        self.check_memory()?;
        self.first_pass()?;
        self.check_memory()?;
        let sections = self.second_pass()?;
        Ok(ObjectFile::new(self.symbols, sections))
    }

    fn check_memory(&self) -> Result<()> {
        if self.start_address >= MEMORY_SIZE {
            return Err(AssemblerError::MemoryError(format!(
                "start address 0x{:X} is outside the address space",
                self.start_address
            )));
        }
        let end = self.start_address + self.symbols.total_section_size();
        if end > MEMORY_SIZE {
            return Err(AssemblerError::MemoryError(format!(
                "sections end at 0x{end:X}, past the end of memory"
            )));
        }
        Ok(())
    }

    // ========================================================================
    // PASS 1
    // ========================================================================

    /// Lays out sections and declares symbols.
    pub fn first_pass(&mut self) -> Result<()> {
        debug!("pass 1 from 0x{:04X}", self.start_address);
        let mut state = PassState::new(self.start_address);
        let mut globals = Vec::new();

        while !state.end_seen {
            let Some(command) = recognizer::recognize_command(&mut self.stream)? else {
                break;
            };
            check_sequence(
                &state.previous,
                &command,
                state.section.as_ref().map(|s| s.section_type),
            )?;

            match command.kind {
                CommandKind::GlobalDirective => {
                    globals.extend(recognizer::recognize_global_symbols(&mut self.stream)?);
                }
                CommandKind::EndDirective => {
                    self.close_section(&state, &command)?;
                    state.end_seen = true;
                }
                CommandKind::Section => {
                    if state.section.is_some() {
                        self.close_section(&state, &command)?;
                    }
                    let section = recognizer::recognize_section(
                        &command,
                        &mut self.stream,
                        state.location_counter,
                    )?;
                    self.symbols
                        .declare_section(&section.name, state.location_counter)?;
                    state.section = Some(section);
                }
                CommandKind::Label => {
                    self.symbols.declare_symbol(
                        &command.name,
                        state.location_counter,
                        Scope::Local,
                        None,
                    )?;
                }
                CommandKind::Definition
                | CommandKind::AlignDirective
                | CommandKind::SkipDirective
                | CommandKind::Instruction => {
                    let unit = decode_unit(&command, &mut self.stream, state.location_counter)?;
                    let section_type = state.current_section(&command)?.section_type;
                    section::check_bss_purity(section_type, &unit)?;
                    state.advance(unit.byte_size())?;
                }
                CommandKind::Empty => {
                    return Err(AssemblerError::SystemError(format!(
                        "empty command {command} reached dispatch"
                    )))
                }
            }
            state.previous = command;
        }

        if !state.end_seen {
            return Err(AssemblerError::decoding("missing .end directive"));
        }

        for name in globals {
            if !self.symbols.promote_scope(&name, Scope::Global) {
                self.symbols.declare_undefined_global(&name)?;
            }
        }
        for symbol in self.symbols.unresolved_globals() {
            warn!("global symbol {} is not defined in this file", symbol.name);
        }
        self.symbols.finalize_ordinals()?;
        debug!(
            "pass 1 done: {} sections, {} symbols, {} bytes",
            self.symbols.sections().len(),
            self.symbols.symbols().len(),
            self.symbols.total_section_size()
        );
        Ok(())
    }

    fn close_section(&mut self, state: &PassState, command: &Command) -> Result<()> {
        let section = state.current_section(command)?;
        self.symbols
            .update_section_size(&section.name, state.location_counter - section.base_address)
    }

    // ========================================================================
    // PASS 2
    // ========================================================================

    /// Encodes every unit against the finished symbol table.
    pub fn second_pass(&mut self) -> Result<Vec<Section>> {
        if !self.symbols.is_finalized() {
            return Err(AssemblerError::SystemError(
                "second pass started before the symbol table was finalized".to_string(),
            ));
        }
        debug!("pass 2");
        self.stream.reset();
        let mut state = PassState::new(self.start_address);
        let mut sections = Vec::new();

        while !state.end_seen {
            let Some(command) = recognizer::recognize_command(&mut self.stream)? else {
                break;
            };
            match command.kind {
                CommandKind::GlobalDirective => {
                    recognizer::recognize_global_symbols(&mut self.stream)?;
                }
                CommandKind::Label => {}
                CommandKind::EndDirective => {
                    sections.extend(state.section.take());
                    state.end_seen = true;
                }
                CommandKind::Section => {
                    sections.extend(state.section.take());
                    state.section = Some(recognizer::recognize_section(
                        &command,
                        &mut self.stream,
                        state.location_counter,
                    )?);
                }
                CommandKind::Definition
                | CommandKind::AlignDirective
                | CommandKind::SkipDirective
                | CommandKind::Instruction => {
                    let mut unit =
                        decode_unit(&command, &mut self.stream, state.location_counter)?;
                    let size = unit.byte_size();
                    let section = state
                        .section
                        .as_mut()
                        .ok_or_else(|| AssemblerError::NoSectionDefined(command.to_string()))?;
                    let entry = self.symbols.section(&section.name)?;
                    let ctx = EvalContext {
                        symbols: &self.symbols,
                        location: state.location_counter,
                        next_instruction: state.location_counter + size,
                        section: entry.ordinal,
                        section_base: entry.base_address,
                    };
                    for relocation in unit.resolve(&ctx)? {
                        trace!("{}: relocation {}", section.name, relocation);
                        section.add_relocation(relocation);
                    }
                    section.add_unit(unit)?;
                    state.advance(size)?;
                }
                CommandKind::Empty => {
                    return Err(AssemblerError::SystemError(format!(
                        "empty command {command} reached dispatch"
                    )))
                }
            }
            state.previous = command;
        }

        if !state.end_seen {
            return Err(AssemblerError::decoding("missing .end directive"));
        }
        debug!("pass 2 done: {} sections encoded", sections.len());
        Ok(sections)
    }
}

/// Decodes the unit a content command introduces. `.align` is evaluated at
/// `location_counter`, the address just before it.
fn decode_unit(
    command: &Command,
    stream: &mut TokenStream,
    location_counter: u32,
) -> Result<EncodedUnit> {
    match command.kind {
        CommandKind::Definition => {
            let spec = recognizer::recognize_definition(command)?;
            Ok(EncodedUnit::Definition(Definition::decode(spec, stream)?))
        }
        CommandKind::SkipDirective => Ok(EncodedUnit::Skip(SkipDirective::decode(stream)?)),
        CommandKind::AlignDirective => {
            let mut align = AlignDirective::decode(stream)?;
            align.evaluate(location_counter);
            Ok(EncodedUnit::Align(align))
        }
        CommandKind::Instruction => recognizer::recognize_instruction(command, stream),
        _ => Err(AssemblerError::SystemError(format!(
            "{command} does not encode a unit"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_pass(source: &str, start: u32) -> Result<Assembler> {
        let mut assembler = Assembler::new(source, start)?;
        assembler.first_pass()?;
        Ok(assembler)
    }

    #[test]
    fn test_first_pass_layout() {
        let assembler = first_pass(
            ".data\nvalue: .word 1, 2\n.text\nmain: mov r1, value\niret\n.end\n",
            0x100,
        )
        .unwrap();
        let symbols = assembler.symbols();
        assert_eq!(symbols.section(".data").unwrap().size, 4);
        assert_eq!(symbols.section(".text").unwrap().base_address, 0x104);
        assert_eq!(symbols.section(".text").unwrap().size, 6);
        assert_eq!(symbols.symbol("main").unwrap().address, Some(0x104));
        assert_eq!(symbols.symbol("main").unwrap().ordinal, 4);
    }

    #[test]
    fn test_align_measured_before_directive() {
        let assembler = first_pass(".data\n.char 1\n.align 4\nafter: .char 2\n.end", 0).unwrap();
        assert_eq!(assembler.symbols().symbol("after").unwrap().address, Some(4));
    }

    #[test]
    fn test_missing_end() {
        assert!(matches!(
            first_pass(".text\niret\n", 0),
            Err(AssemblerError::DecodingError(_))
        ));
    }

    #[test]
    fn test_end_without_section() {
        assert!(matches!(
            first_pass(".end", 0),
            Err(AssemblerError::NoSectionDefined(_))
        ));
    }

    #[test]
    fn test_tokens_after_end_ignored() {
        let assembler = first_pass(".text\niret\n.end\n&&& garbage\n", 0);
        assert!(assembler.is_ok());
    }

    #[test]
    fn test_undefined_global_placeholder() {
        let assembler = first_pass(".global ext, ext\n.text\niret\n.end", 0).unwrap();
        let ext = assembler.symbols().symbol("ext").unwrap();
        assert_eq!(ext.scope, Scope::Global);
        assert!(!ext.is_defined());
        assert_eq!(assembler.symbols().unresolved_globals().count(), 1);
    }

    #[test]
    fn test_bss_checked_in_first_pass() {
        assert!(matches!(
            first_pass(".bss\n.skip 4, 1\n.end", 0),
            Err(AssemblerError::DecodingError(_))
        ));
    }

    #[test]
    fn test_second_pass_requires_finalized_table() {
        let mut assembler = Assembler::new(".text\n.end", 0).unwrap();
        assert!(matches!(
            assembler.second_pass(),
            Err(AssemblerError::SystemError(_))
        ));
    }

    #[test]
    fn test_second_pass_relocations() {
        let mut assembler = first_pass(
            ".global main\n.data\nvalue: .word 7\n.text\nmain: mov r1, value\njmp $main\ncall $value\n.end",
            0,
        )
        .unwrap();
        let sections = assembler.second_pass().unwrap();
        assert_eq!(sections.len(), 2);

        let text = &sections[1];
        let relocations: Vec<String> = text.relocations().iter().map(|r| r.to_string()).collect();
        // value is local to .data (ordinal 1); $main stays in .text
        assert_eq!(
            relocations,
            vec!["0x0002\tR_386_32\t1", "0x000A\tR_386_PC32\t1\t0x000E"]
        );
        assert_eq!(text.byte_size(), 12);
    }

    #[test]
    fn test_start_address_out_of_range() {
        assert!(matches!(
            Assembler::new(".text\n.end", MEMORY_SIZE).unwrap().run(),
            Err(AssemblerError::MemoryError(_))
        ));
    }

    #[test]
    fn test_location_counter_overflow() {
        assert!(matches!(
            first_pass(".bss\n.skip 0x10000\n.skip 1\n.end", 0),
            Err(AssemblerError::MemoryError(_))
        ));
    }
}
