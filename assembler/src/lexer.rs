//! Character-level scanner.
//!
//! Each source line is fed through a small state machine and closed with a
//! synthetic [`TokenKind::LineDelimiter`]. A `;` starts a comment that runs to
//! the end of the line.

use crate::error::{AssemblerError, Result};
use crate::token::{Token, TokenKind};

/// Scan a whole source text into tokens, one line delimiter per source line.
pub fn scan(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    for (index, line) in source.lines().enumerate() {
        let line_number = index + 1;
        tokens.extend(scan_line(line, line_number)?);
        tokens.push(Token::line_delimiter(line_number));
    }
    Ok(tokens)
}

/// Scan a single line. The returned tokens do not include the line delimiter.
pub fn scan_line(line: &str, line_number: usize) -> Result<Vec<Token>> {
    Lexer::new(line, line_number).run()
}

// ============================================================================
// CHARACTER FEEDER
// ============================================================================

/// Yields the characters of a line, reporting end of input at a comment.
struct Feeder<'a> {
    chars: std::str::Chars<'a>,
    done: bool,
}

impl<'a> Feeder<'a> {
    fn new(line: &'a str) -> Self {
        Feeder {
            chars: line.chars(),
            done: false,
        }
    }

    fn feed(&mut self) -> Option<char> {
        if self.done {
            return None;
        }
        match self.chars.next() {
            Some(';') | None => {
                self.done = true;
                None
            }
            Some(c) => Some(c),
        }
    }
}

// ============================================================================
// STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Hunting,
    Identifier,
    Label,
    /// A lone `0`: may become hex (`0x`), binary or decimal.
    ZeroDetected,
    /// Only `0`/`1` digits so far: binary if a `b` suffix follows.
    OneDetected,
    DecNumeral,
    HexPrefix,
    HexNumeral,
    BinDetected,
    ClosedBracket,
}

struct Lexer<'a> {
    feeder: Feeder<'a>,
    line: usize,
    state: State,
    pending: String,
    tokens: Vec<Token>,
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r')
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn single_char_kind(c: char) -> Option<TokenKind> {
    match c {
        '$' => Some(TokenKind::PcRelativeMark),
        '&' => Some(TokenKind::ImmediateMark),
        '*' => Some(TokenKind::LocationValueMark),
        '[' => Some(TokenKind::OpenBracket),
        ']' => Some(TokenKind::CloseBracket),
        ',' => Some(TokenKind::Comma),
        _ => None,
    }
}

impl<'a> Lexer<'a> {
    fn new(line: &'a str, line_number: usize) -> Self {
        Lexer {
            feeder: Feeder::new(line),
            line: line_number,
            state: State::Hunting,
            pending: String::new(),
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        loop {
            let c = self.feeder.feed();
            let finished = match self.state {
                State::Hunting => self.hunting(c)?,
                State::Identifier => self.identifier(c)?,
                State::Label => self.label(c)?,
                State::ZeroDetected => self.zero_detected(c)?,
                State::OneDetected => self.one_detected(c)?,
                State::DecNumeral => {
                    self.numeral(c, TokenKind::DecNumber, |c| c.is_ascii_digit())?
                }
                State::HexPrefix => self.hex_prefix(c)?,
                State::HexNumeral => {
                    self.numeral(c, TokenKind::HexNumber, |c| c.is_ascii_hexdigit())?
                }
                State::BinDetected => self.numeral(c, TokenKind::BinNumber, |_| false)?,
                State::ClosedBracket => self.closed_bracket(c)?,
            };
            if finished {
                return Ok(self.tokens);
            }
        }
    }

    fn error(&self, c: Option<char>) -> AssemblerError {
        let mut token = self.pending.clone();
        if let Some(c) = c {
            token.push(c);
        }
        AssemblerError::ParserError {
            token,
            line: self.line,
        }
    }

    fn accept(&mut self, c: char, next: State) {
        self.pending.push(c);
        self.state = next;
    }

    fn flush(&mut self, kind: TokenKind) {
        let text = std::mem::take(&mut self.pending);
        self.tokens.push(Token::new(kind, text, self.line));
    }

    fn push_char(&mut self, kind: TokenKind, c: char) {
        self.tokens.push(Token::new(kind, c.to_string(), self.line));
    }

    /// Handles the characters that may terminate any accumulated token.
    /// Returns `None` when `c` is not a terminator for `kind`.
    fn terminate(&mut self, c: Option<char>, kind: TokenKind) -> Option<bool> {
        match c {
            None => {
                self.flush(kind);
                Some(true)
            }
            Some(c) if is_blank(c) => {
                self.flush(kind);
                self.state = State::Hunting;
                Some(false)
            }
            Some(',') => {
                self.flush(kind);
                self.push_char(TokenKind::Comma, ',');
                self.state = State::Hunting;
                Some(false)
            }
            Some(']') => {
                self.flush(kind);
                self.push_char(TokenKind::CloseBracket, ']');
                self.state = State::ClosedBracket;
                Some(false)
            }
            Some(_) => None,
        }
    }

    fn hunting(&mut self, c: Option<char>) -> Result<bool> {
        let Some(c) = c else {
            return Ok(true);
        };
        match c {
            c if is_blank(c) => {}
            '0' => self.accept(c, State::ZeroDetected),
            '1' => self.accept(c, State::OneDetected),
            '2'..='9' => self.accept(c, State::DecNumeral),
            c if is_identifier_char(c) || c == '.' => self.accept(c, State::Identifier),
            c => match single_char_kind(c) {
                Some(kind) => self.push_char(kind, c),
                None => return Err(self.error(Some(c))),
            },
        }
        Ok(false)
    }

    fn identifier(&mut self, c: Option<char>) -> Result<bool> {
        match c {
            Some('[') => {
                self.flush(TokenKind::Identifier);
                self.push_char(TokenKind::OpenBracket, '[');
                self.state = State::Hunting;
                Ok(false)
            }
            Some(':') => {
                self.state = State::Label;
                Ok(false)
            }
            Some('.') => Err(self.error(c)),
            Some(ch) if is_identifier_char(ch) => {
                self.pending.push(ch);
                Ok(false)
            }
            _ => self
                .terminate(c, TokenKind::Identifier)
                .ok_or_else(|| self.error(c)),
        }
    }

    fn label(&mut self, c: Option<char>) -> Result<bool> {
        match c {
            None => {
                self.flush(TokenKind::Label);
                Ok(true)
            }
            Some(ch) if is_blank(ch) => {
                self.flush(TokenKind::Label);
                self.state = State::Hunting;
                Ok(false)
            }
            Some(ch) => {
                self.pending.push(':');
                Err(self.error(Some(ch)))
            }
        }
    }

    fn zero_detected(&mut self, c: Option<char>) -> Result<bool> {
        match c {
            Some(ch @ ('x' | 'X')) => {
                self.accept(ch, State::HexPrefix);
                Ok(false)
            }
            _ => self.one_detected(c),
        }
    }

    fn one_detected(&mut self, c: Option<char>) -> Result<bool> {
        match c {
            Some(ch @ ('0' | '1')) => {
                self.accept(ch, State::OneDetected);
                Ok(false)
            }
            Some(ch @ ('b' | 'B')) => {
                self.accept(ch, State::BinDetected);
                Ok(false)
            }
            Some(ch @ '2'..='9') => {
                self.accept(ch, State::DecNumeral);
                Ok(false)
            }
            _ => self
                .terminate(c, TokenKind::DecNumber)
                .ok_or_else(|| self.error(c)),
        }
    }

    fn hex_prefix(&mut self, c: Option<char>) -> Result<bool> {
        match c {
            Some(ch) if ch.is_ascii_hexdigit() => {
                self.accept(ch, State::HexNumeral);
                Ok(false)
            }
            _ => Err(self.error(c)),
        }
    }

    fn numeral(
        &mut self,
        c: Option<char>,
        kind: TokenKind,
        digit: impl Fn(char) -> bool,
    ) -> Result<bool> {
        match c {
            Some(ch) if digit(ch) => {
                self.pending.push(ch);
                Ok(false)
            }
            _ => self.terminate(c, kind).ok_or_else(|| self.error(c)),
        }
    }

    fn closed_bracket(&mut self, c: Option<char>) -> Result<bool> {
        match c {
            None => Ok(true),
            Some(ch) if is_blank(ch) => {
                self.state = State::Hunting;
                Ok(false)
            }
            Some(',') => {
                self.push_char(TokenKind::Comma, ',');
                self.state = State::Hunting;
                Ok(false)
            }
            Some(_) => Err(self.error(c)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_instruction_line() {
        let tokens = scan_line("mov r1, &value", 1).unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Comma,
                TokenKind::ImmediateMark,
                TokenKind::Identifier,
            ]
        );
        assert_eq!(tokens[4].text, "value");
    }

    #[test]
    fn test_numeral_bases() {
        let tokens = scan_line("0x1F 101b 10 0 7 1", 1).unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::HexNumber,
                TokenKind::BinNumber,
                TokenKind::DecNumber,
                TokenKind::DecNumber,
                TokenKind::DecNumber,
                TokenKind::DecNumber,
            ]
        );
        assert_eq!(tokens[0].text, "0x1F");
        assert_eq!(tokens[1].text, "101b");
        assert_eq!(tokens[2].int_value().unwrap(), 10);
    }

    #[test]
    fn test_label_then_command() {
        let tokens = scan_line("loop: jmp $loop", 3).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Label);
        assert_eq!(tokens[0].text, "loop");
        assert_eq!(tokens[2].kind, TokenKind::PcRelativeMark);
        assert!(tokens.iter().all(|t| t.line == 3));
    }

    #[test]
    fn test_register_indirect() {
        let tokens = scan_line("r2[0x10]", 1).unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Identifier,
                TokenKind::OpenBracket,
                TokenKind::HexNumber,
                TokenKind::CloseBracket,
            ]
        );
    }

    #[test]
    fn test_closed_bracket_then_comma() {
        let tokens = scan_line("mov r1[4], r2", 1).unwrap();
        assert_eq!(tokens[5].kind, TokenKind::Comma);
        assert_eq!(tokens[6].text, "r2");
    }

    #[test]
    fn test_closed_bracket_rejects_garbage() {
        let err = scan_line("r1[4]x", 5).unwrap_err();
        match err {
            AssemblerError::ParserError { token, line } => {
                assert_eq!(token, "x");
                assert_eq!(line, 5);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_comment_truncates_line() {
        let tokens = scan_line(".word 5 ; .word 6", 1).unwrap();
        assert_eq!(tokens.len(), 2);
        assert!(scan_line("; only a comment", 1).unwrap().is_empty());
    }

    #[test]
    fn test_dot_inside_identifier_is_error() {
        assert!(matches!(
            scan_line("foo.bar", 2),
            Err(AssemblerError::ParserError { line: 2, .. })
        ));
    }

    #[test]
    fn test_bad_numerals() {
        assert!(scan_line("12a", 1).is_err());
        assert!(scan_line("0x", 1).is_err());
        assert!(scan_line("0xG1", 1).is_err());
        assert!(scan_line("101b1", 1).is_err());
    }

    #[test]
    fn test_label_followed_by_garbage() {
        let err = scan_line("foo:bar", 1).unwrap_err();
        assert!(matches!(err, AssemblerError::ParserError { ref token, .. } if token == "foo:b"));
    }

    #[test]
    fn test_one_delimiter_per_line() {
        let tokens = scan(".data\n\n.word 5 ; five\n.end\n").unwrap();
        let delimiters = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::LineDelimiter)
            .count();
        assert_eq!(delimiters, 4);
        assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::LineDelimiter));
    }

    #[test]
    fn test_scan_is_restartable() {
        let source = ".text\nstart: add r1, 5\n.end";
        assert_eq!(scan(source).unwrap(), scan(source).unwrap());
    }
}
