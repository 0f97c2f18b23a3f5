//! Recognized commands and the rules for which command may follow which.

use std::fmt;

use crate::error::{AssemblerError, Result};
use crate::section::SectionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    GlobalDirective,
    Instruction,
    EndDirective,
    Definition,
    Section,
    AlignDirective,
    SkipDirective,
    Label,
    /// No previous command: the start of a pass.
    Empty,
}

impl CommandKind {
    /// Commands that emit bytes into the current section.
    pub fn is_content(self) -> bool {
        matches!(
            self,
            CommandKind::Instruction
                | CommandKind::Definition
                | CommandKind::SkipDirective
                | CommandKind::AlignDirective
        )
    }

    /// Whether a section of `section_type` accepts this command.
    pub fn allowed_in(self, section_type: SectionType) -> bool {
        match self {
            CommandKind::Label | CommandKind::Section | CommandKind::EndDirective => true,
            CommandKind::Instruction => !section_type.holds_data(),
            CommandKind::Definition | CommandKind::SkipDirective | CommandKind::AlignDirective => {
                section_type.holds_data()
            }
            CommandKind::GlobalDirective | CommandKind::Empty => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub kind: CommandKind,
    pub line: usize,
}

impl Command {
    pub fn new(name: impl Into<String>, kind: CommandKind, line: usize) -> Self {
        Command {
            name: name.into(),
            kind,
            line,
        }
    }

    pub fn empty() -> Self {
        Command::new("", CommandKind::Empty, 0)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' at line {}", self.name, self.line)
    }
}

/// Checks that `current` may follow `previous` inside a section of
/// `section_type` (`None` before the first section is opened).
pub fn check_sequence(
    previous: &Command,
    current: &Command,
    section_type: Option<SectionType>,
) -> Result<()> {
    let before_sections = matches!(
        previous.kind,
        CommandKind::GlobalDirective | CommandKind::Empty
    );

    if current.kind == CommandKind::GlobalDirective && !before_sections {
        return Err(AssemblerError::decoding(format!(
            ".global {current} must come before any other command"
        )));
    }
    if current.kind == CommandKind::Label && previous.kind == CommandKind::Label {
        return Err(AssemblerError::decoding(format!(
            "label {current} directly follows label {previous}"
        )));
    }
    if current.kind.is_content() && before_sections {
        return Err(AssemblerError::decoding(format!(
            "{current} appears before any section"
        )));
    }
    if let Some(section_type) = section_type {
        if !current.kind.allowed_in(section_type) {
            return Err(AssemblerError::decoding(format!(
                "{current} is not allowed in a {section_type:?} section"
            )));
        }
    } else if current.kind.is_content() {
        return Err(AssemblerError::decoding(format!(
            "{current} appears before any section"
        )));
    }
    Ok(())
}
