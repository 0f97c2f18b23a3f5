//! Error taxonomy shared by every stage of the assembler.
//!
//! Every error is terminal for the current assembly: it is raised where it is
//! detected and propagated with `?` up to [`crate::assemble`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AssemblerError>;

#[derive(Debug, Error)]
pub enum AssemblerError {
    /// Lexical error: no transition exists for the current character.
    #[error("invalid token '{token}' at line {line}")]
    ParserError { token: String, line: usize },

    /// Grammar or shape violation while decoding commands and operands.
    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("unknown command {0}")]
    UnknownCommand(String),

    #[error("symbol '{0}' is already defined")]
    SymbolRedefined(String),

    #[error("symbol '{0}' is not defined")]
    SymbolNotFound(String),

    #[error("no section is open for {0}")]
    NoSectionDefined(String),

    #[error("memory error: {0}")]
    MemoryError(String),

    /// Internal invariant violation. Indicates a bug, not bad input.
    #[error("internal error: {0}")]
    SystemError(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AssemblerError {
    pub(crate) fn decoding(reason: impl Into<String>) -> Self {
        Self::DecodingError(reason.into())
    }

    /// Process exit code for this failure category.
    ///
    /// Stream and file failures, bad numeric arguments and assembler failures
    /// each map to a distinct non-zero code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) => 2,
            Self::InvalidArgument(_) => 3,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_error_display() {
        let error = AssemblerError::ParserError {
            token: "ab.".to_string(),
            line: 7,
        };
        let message = error.to_string();
        assert!(message.contains("ab."));
        assert!(message.contains("line 7"));
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let io = AssemblerError::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let argument = AssemblerError::InvalidArgument("0xZZ".to_string());
        let semantic = AssemblerError::decoding("bad operand");

        assert_eq!(io.exit_code(), 2);
        assert_eq!(argument.exit_code(), 3);
        assert_eq!(semantic.exit_code(), 1);
        assert_eq!(AssemblerError::MemoryError("full".into()).exit_code(), 1);
    }

    #[test]
    fn test_error_is_std_error() {
        let error = AssemblerError::UnknownCommand("'frob' at line 3".to_string());
        let _: &dyn std::error::Error = &error;
        assert_eq!(error.to_string(), "unknown command 'frob' at line 3");
    }
}
