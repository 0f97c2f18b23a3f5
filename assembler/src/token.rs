//! Tokens produced by the lexer and the rewindable stream the passes walk.

use std::fmt;

use crate::error::{AssemblerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    DecNumber,
    HexNumber,
    BinNumber,
    /// `$`
    PcRelativeMark,
    /// `&`
    ImmediateMark,
    Comma,
    OpenBracket,
    CloseBracket,
    /// `name:`
    Label,
    LineDelimiter,
    /// `*`
    LocationValueMark,
    Undefined,
}

impl TokenKind {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            TokenKind::DecNumber | TokenKind::HexNumber | TokenKind::BinNumber
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            TokenKind::Identifier => "identifier",
            TokenKind::DecNumber => "decimal number",
            TokenKind::HexNumber => "hexadecimal number",
            TokenKind::BinNumber => "binary number",
            TokenKind::PcRelativeMark => "PC relative mark ($)",
            TokenKind::ImmediateMark => "immediate mark (&)",
            TokenKind::Comma => "comma (,)",
            TokenKind::OpenBracket => "open bracket ([)",
            TokenKind::CloseBracket => "closed bracket (])",
            TokenKind::Label => "label",
            TokenKind::LineDelimiter => "end of line",
            TokenKind::LocationValueMark => "location value mark (*)",
            TokenKind::Undefined => "undefined token",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based source line the token was read from.
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize) -> Self {
        Token {
            kind,
            text: text.into(),
            line,
        }
    }

    pub fn line_delimiter(line: usize) -> Self {
        Token::new(TokenKind::LineDelimiter, "\n", line)
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    /// Integer value of a numeric token under the base its kind implies.
    ///
    /// Hex numerals carry a `0x` prefix and binary numerals a `b` suffix.
    pub fn int_value(&self) -> Result<i64> {
        let (digits, radix) = match self.kind {
            TokenKind::DecNumber => (self.text.as_str(), 10),
            TokenKind::HexNumber => (strip_hex_prefix(&self.text), 16),
            TokenKind::BinNumber => (
                self.text.trim_end_matches(|c: char| c == 'b' || c == 'B'),
                2,
            ),
            other => {
                return Err(AssemblerError::SystemError(format!(
                    "can't convert token of kind {} to int",
                    other.description()
                )))
            }
        };
        u32::from_str_radix(digits, radix)
            .map(i64::from)
            .map_err(|_| {
                AssemblerError::decoding(format!(
                    "numeral '{}' at line {} is out of range",
                    self.text, self.line
                ))
            })
    }
}

fn strip_hex_prefix(text: &str) -> &str {
    text.strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text)
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::LineDelimiter => write!(f, "end of line"),
            TokenKind::Label => write!(f, "{}:", self.text),
            _ => write!(f, "{}", self.text),
        }
    }
}

/// Joins token texts for diagnostics, e.g. `r1 [ 4 ]`.
pub fn join_tokens(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// TOKEN STREAM
// ============================================================================

/// Cursor over a lexed token sequence.
///
/// Both passes walk the same stream; [`TokenStream::reset`] rewinds it between
/// them so the second pass sees exactly what the first one did.
#[derive(Debug, Clone)]
pub struct TokenStream {
    tokens: Vec<Token>,
    position: usize,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        TokenStream {
            tokens,
            position: 0,
        }
    }

    pub fn next(&mut self) -> Result<Token> {
        let token = self.peek()?.clone();
        self.position += 1;
        Ok(token)
    }

    pub fn peek(&self) -> Result<&Token> {
        self.tokens
            .get(self.position)
            .ok_or_else(|| AssemblerError::decoding("unexpected end of input"))
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    pub fn at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    /// Collects tokens up to (not including) the next comma or line delimiter.
    pub(crate) fn take_until_separator(&mut self) -> Result<Vec<Token>> {
        let mut taken = Vec::new();
        while !matches!(
            self.peek()?.kind,
            TokenKind::Comma | TokenKind::LineDelimiter
        ) {
            taken.push(self.next()?);
        }
        Ok(taken)
    }

    /// Consumes the mandatory line delimiter that closes a command.
    pub(crate) fn expect_line_end(&mut self, context: &str) -> Result<()> {
        let token = self.next()?;
        if token.is(TokenKind::LineDelimiter) {
            Ok(())
        } else {
            Err(AssemblerError::decoding(format!(
                "unexpected '{}' after {} at line {}",
                token, context, token.line
            )))
        }
    }
}
