//! Classifies the next logical command in the token stream.

use log::trace;

use crate::catalog::{self, DefinitionSpec};
use crate::command::{Command, CommandKind};
use crate::encoder::{self, EncodedUnit};
use crate::error::{AssemblerError, Result};
use crate::section::Section;
use crate::token::{TokenKind, TokenStream};

/// Skips blank lines and classifies the next command.
/// Returns `None` once the stream is exhausted.
pub fn recognize_command(stream: &mut TokenStream) -> Result<Option<Command>> {
    while !stream.at_end() && stream.peek()?.is(TokenKind::LineDelimiter) {
        stream.next()?;
    }
    if stream.at_end() {
        return Ok(None);
    }

    let token = stream.next()?;
    if token.is(TokenKind::Label) {
        return Ok(Some(Command::new(token.text, CommandKind::Label, token.line)));
    }
    if !token.is(TokenKind::Identifier) {
        return Err(AssemblerError::UnknownCommand(format!(
            "'{}' at line {}",
            token, token.line
        )));
    }

    let kind = classify(&token.text).ok_or_else(|| {
        AssemblerError::UnknownCommand(format!("'{}' at line {}", token, token.line))
    })?;
    trace!("line {}: {:?} {}", token.line, kind, token.text);
    Ok(Some(Command::new(token.text, kind, token.line)))
}

fn classify(name: &str) -> Option<CommandKind> {
    let directive = [
        (catalog::GLOBAL_DIRECTIVE, CommandKind::GlobalDirective),
        (catalog::END_DIRECTIVE, CommandKind::EndDirective),
        (catalog::ALIGN_DIRECTIVE, CommandKind::AlignDirective),
        (catalog::SKIP_DIRECTIVE, CommandKind::SkipDirective),
    ]
    .into_iter()
    .find(|(keyword, _)| keyword.eq_ignore_ascii_case(name))
    .map(|(_, kind)| kind);

    directive
        .or_else(|| catalog::find_section(name).map(|_| CommandKind::Section))
        .or_else(|| catalog::find_definition(name).map(|_| CommandKind::Definition))
        .or_else(|| catalog::find_instruction(name).map(|_| CommandKind::Instruction))
}

/// Reads `name {, name}` up to the end of the line.
pub fn recognize_global_symbols(stream: &mut TokenStream) -> Result<Vec<String>> {
    let mut names = Vec::new();
    loop {
        let name = stream.next()?;
        if !name.is(TokenKind::Identifier) {
            return Err(AssemblerError::decoding(format!(
                ".global expects a symbol name, found '{}' at line {}",
                name, name.line
            )));
        }
        names.push(name.text);

        let separator = stream.next()?;
        match separator.kind {
            TokenKind::Comma => continue,
            TokenKind::LineDelimiter => return Ok(names),
            _ => {
                return Err(AssemblerError::decoding(format!(
                    "unexpected '{}' in .global list at line {}",
                    separator, separator.line
                )))
            }
        }
    }
}

/// Opens a section at `location_counter`. The directive stands alone on its
/// line.
pub fn recognize_section(
    command: &Command,
    stream: &mut TokenStream,
    location_counter: u32,
) -> Result<Section> {
    let spec = catalog::find_section(&command.name)
        .ok_or_else(|| AssemblerError::SystemError(format!("{command} is not a section")))?;
    stream.expect_line_end(spec.name)?;
    Ok(Section::new(spec.name, spec.section_type, location_counter))
}

pub fn recognize_definition(command: &Command) -> Result<&'static DefinitionSpec> {
    catalog::find_definition(&command.name)
        .ok_or_else(|| AssemblerError::SystemError(format!("{command} is not a definition")))
}

/// Looks the mnemonic up and decodes the instruction's operands.
pub fn recognize_instruction(command: &Command, stream: &mut TokenStream) -> Result<EncodedUnit> {
    let mnemonic = catalog::find_instruction(&command.name)
        .ok_or_else(|| AssemblerError::UnknownCommand(command.to_string()))?;
    encoder::decode_instruction(mnemonic, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::scan;
    use crate::section::SectionType;

    fn stream(source: &str) -> TokenStream {
        TokenStream::new(scan(source).unwrap())
    }

    fn kinds(source: &str) -> Vec<CommandKind> {
        let mut s = stream(source);
        let mut kinds = Vec::new();
        while let Some(command) = recognize_command(&mut s).unwrap() {
            kinds.push(command.kind);
            while !s.next().unwrap().is(TokenKind::LineDelimiter) {}
        }
        kinds
    }

    #[test]
    fn test_classification_order() {
        assert_eq!(
            kinds(".global a\n.TEXT\n.word\n.skip 1\n.align 2\nmovne r1, r2\n.end"),
            vec![
                CommandKind::GlobalDirective,
                CommandKind::Section,
                CommandKind::Definition,
                CommandKind::SkipDirective,
                CommandKind::AlignDirective,
                CommandKind::Instruction,
                CommandKind::EndDirective,
            ]
        );
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut s = stream("\n\n  ; nothing\n.data\n");
        let command = recognize_command(&mut s).unwrap().unwrap();
        assert_eq!(command.kind, CommandKind::Section);
        assert_eq!(command.line, 4);
    }

    #[test]
    fn test_label_then_command_on_same_line() {
        let mut s = stream("start: iret");
        let label = recognize_command(&mut s).unwrap().unwrap();
        assert_eq!(label.kind, CommandKind::Label);
        assert_eq!(label.name, "start");
        let next = recognize_command(&mut s).unwrap().unwrap();
        assert_eq!(next.kind, CommandKind::Instruction);
    }

    #[test]
    fn test_unknown_command() {
        assert!(matches!(
            recognize_command(&mut stream("nop")),
            Err(AssemblerError::UnknownCommand(_))
        ));
        assert!(matches!(
            recognize_command(&mut stream("5")),
            Err(AssemblerError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_empty_stream() {
        assert!(recognize_command(&mut stream("")).unwrap().is_none());
        assert!(recognize_command(&mut stream("\n\n")).unwrap().is_none());
    }

    #[test]
    fn test_global_symbols() {
        let mut s = stream("a, b,c\n");
        assert_eq!(recognize_global_symbols(&mut s).unwrap(), vec!["a", "b", "c"]);
        assert!(recognize_global_symbols(&mut stream("a b")).is_err());
        assert!(recognize_global_symbols(&mut stream("a,")).is_err());
        assert!(recognize_global_symbols(&mut stream("5")).is_err());
    }

    #[test]
    fn test_section_opens_at_location_counter() {
        let mut s = stream(".BSS\n");
        let command = recognize_command(&mut s).unwrap().unwrap();
        let section = recognize_section(&command, &mut s, 0x40).unwrap();
        assert_eq!(section.name, ".bss");
        assert_eq!(section.section_type, SectionType::Bss);
        assert_eq!(section.base_address, 0x40);

        let mut trailing = stream(".data 5\n");
        let command = recognize_command(&mut trailing).unwrap().unwrap();
        assert!(recognize_section(&command, &mut trailing, 0).is_err());
    }

    #[test]
    fn test_instruction_decoded() {
        let mut s = stream("push r1\n");
        let command = recognize_command(&mut s).unwrap().unwrap();
        let unit = recognize_instruction(&command, &mut s).unwrap();
        assert_eq!(unit.byte_size(), 2);
        assert!(s.at_end());
    }
}
