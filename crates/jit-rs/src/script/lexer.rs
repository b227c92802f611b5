//! Indentation-aware tokenizer for the scripting language.
//!
//! A line break at bracket depth zero becomes one of:
//! - `Indent` when the next line is indented deeper,
//! - `Newline` when it stays at the same depth,
//! - one `Dedent` per closed block when it is shallower.
//!
//! No `Newline` precedes a run of `Dedent`s; the parser treats a dedent as an
//! implied end of line.

use super::parser::ParseError;
use crate::ir::SourceRange;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,
    Newline,
    Indent,
    Dedent,
    Number,
    Ident,
    // keywords
    Def,
    If,
    Else,
    Elif,
    While,
    Global,
    Return,
    And,
    Or,
    Not,
    True,
    False,
    Float,
    Double,
    Int,
    Long,
    // operators
    Plus,
    Minus,
    Star,
    Slash,
    At,
    Pow,
    Lt,
    Gt,
    EqEq,
    Ne,
    Le,
    Ge,
    Assign,
    PlusEq,
    MinusEq,
    TimesEq,
    DivEq,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
}

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("def", TokenKind::Def),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("elif", TokenKind::Elif),
    ("while", TokenKind::While),
    ("global", TokenKind::Global),
    ("return", TokenKind::Return),
    ("and", TokenKind::And),
    ("or", TokenKind::Or),
    ("not", TokenKind::Not),
    ("True", TokenKind::True),
    ("False", TokenKind::False),
    ("float", TokenKind::Float),
    ("double", TokenKind::Double),
    ("int", TokenKind::Int),
    ("long", TokenKind::Long),
];

// Longest operators first.
const OPERATORS: &[(&str, TokenKind)] = &[
    ("**", TokenKind::Pow),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::Ne),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("+=", TokenKind::PlusEq),
    ("-=", TokenKind::MinusEq),
    ("*=", TokenKind::TimesEq),
    ("/=", TokenKind::DivEq),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("@", TokenKind::At),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    ("=", TokenKind::Assign),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    (",", TokenKind::Comma),
    (":", TokenKind::Colon),
    (".", TokenKind::Dot),
];

impl TokenKind {
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Eof => "end of input",
            TokenKind::Newline => "newline",
            TokenKind::Indent => "indent",
            TokenKind::Dedent => "dedent",
            TokenKind::Number => "number",
            TokenKind::Ident => "identifier",
            other => KEYWORDS
                .iter()
                .chain(OPERATORS)
                .find(|(_, kind)| *kind == other)
                .map(|(text, _)| *text)
                .unwrap_or("token"),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Eof
            | TokenKind::Newline
            | TokenKind::Indent
            | TokenKind::Dedent
            | TokenKind::Number
            | TokenKind::Ident => f.write_str(self.describe()),
            _ => write!(f, "'{}'", self.describe()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub range: SourceRange,
}

impl Token {
    pub fn text(&self) -> &str {
        self.range.text()
    }
}

/// Tokenizes `source` completely.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source).run()
}

struct Lexer {
    source: Arc<str>,
    pos: usize,
    nesting: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Lexer {
            source: Arc::from(source),
            pos: 0,
            nesting: 0,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    fn range(&self, start: usize, end: usize) -> SourceRange {
        SourceRange::new(Arc::clone(&self.source), start, end)
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) {
        let range = self.range(start, end);
        self.tokens.push(Token { kind, range });
    }

    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.pos).copied()
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        // Leading blank lines and the first line's indentation do not count.
        self.skip_blank_lines();
        loop {
            self.skip_inline_whitespace();
            let Some(c) = self.peek() else { break };
            let start = self.pos;
            match c {
                b'\n' => {
                    self.pos += 1;
                    if self.nesting == 0 {
                        self.line_break(start)?;
                    }
                }
                b'0'..=b'9' => self.number(),
                b'.' if self.digit_at(self.pos + 1) => self.number(),
                c if c == b'_' || c.is_ascii_alphabetic() => self.word(),
                _ => self.operator()?,
            }
        }
        let end = self.source.len();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, end, end);
        }
        self.push(TokenKind::Eof, end, end);
        Ok(self.tokens)
    }

    fn skip_inline_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b'#' => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.pos += 1;
                    }
                }
                b'\n' if self.nesting > 0 => self.pos += 1,
                _ => break,
            }
        }
    }

    /// Skips whitespace-only and comment-only lines; returns the indentation
    /// of the first line with content.
    fn skip_blank_lines(&mut self) -> usize {
        loop {
            let line_start = self.pos;
            while matches!(self.peek(), Some(b' ' | b'\t' | b'\r')) {
                self.pos += 1;
            }
            let depth = self.pos - line_start;
            if self.peek() == Some(b'#') {
                while !matches!(self.peek(), None | Some(b'\n')) {
                    self.pos += 1;
                }
            }
            match self.peek() {
                Some(b'\n') => self.pos += 1,
                _ => return depth,
            }
        }
    }

    fn line_break(&mut self, newline_at: usize) -> Result<(), ParseError> {
        let depth = self.skip_blank_lines();
        if self.peek().is_none() {
            // Trailing newlines close every block at the end of input.
            return Ok(());
        }
        let current = *self.indents.last().unwrap_or(&0);
        if depth > current {
            self.indents.push(depth);
            self.push(TokenKind::Indent, newline_at, self.pos);
        } else if depth == current {
            self.push(TokenKind::Newline, newline_at, newline_at + 1);
        } else {
            while depth < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(TokenKind::Dedent, newline_at, self.pos);
            }
            if depth != *self.indents.last().unwrap_or(&0) {
                return Err(ParseError::new(
                    self.range(newline_at, self.pos),
                    "dedent does not match any enclosing indentation level",
                ));
            }
        }
        Ok(())
    }

    fn digit_at(&self, pos: usize) -> bool {
        self.source
            .as_bytes()
            .get(pos)
            .is_some_and(|c| c.is_ascii_digit())
    }

    // Type suffixes such as `LL` or `f` are left for the next token.
    fn number(&mut self) {
        let start = self.pos;
        let bytes = self.source.as_bytes();
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mut exp = self.pos + 1;
            if matches!(bytes.get(exp), Some(b'+' | b'-')) {
                exp += 1;
            }
            if self.digit_at(exp) {
                self.pos = exp;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        self.push(TokenKind::Number, start, self.pos);
    }

    fn word(&mut self) {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c == b'_' || c.is_ascii_alphanumeric())
        {
            self.pos += 1;
        }
        let text = &self.source[start..self.pos];
        let kind = KEYWORDS
            .iter()
            .find(|(keyword, _)| *keyword == text)
            .map_or(TokenKind::Ident, |(_, kind)| *kind);
        self.push(kind, start, self.pos);
    }

    fn operator(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let rest = &self.source[start..];
        let Some(&(text, kind)) = OPERATORS.iter().find(|(text, _)| rest.starts_with(text)) else {
            let width = rest.chars().next().map_or(1, char::len_utf8);
            return Err(ParseError::new(
                self.range(start, start + width),
                format!("unexpected character {:?}", &rest[..width]),
            ));
        };
        match kind {
            TokenKind::LParen | TokenKind::LBracket => self.nesting += 1,
            TokenKind::RParen | TokenKind::RBracket => self.nesting = self.nesting.saturating_sub(1),
            _ => {}
        }
        self.pos += text.len();
        self.push(kind, start, self.pos);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .expect("tokenize")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn dedent_is_not_preceded_by_newline() {
        use TokenKind::*;
        assert_eq!(
            kinds("def f(x):\n  y = x\n  return y\n"),
            vec![
                Def, Ident, LParen, Ident, RParen, Colon, Indent, Ident, Assign, Ident, Newline,
                Return, Ident, Dedent, Eof
            ]
        );
    }

    #[test]
    fn brackets_suppress_newlines_and_comments_are_skipped() {
        use TokenKind::*;
        assert_eq!(
            kinds("f(a, # first\n  b)\n\n# trailing\n"),
            vec![Ident, LParen, Ident, Comma, Ident, RParen, Eof]
        );
    }

    #[test]
    fn numeric_suffix_is_a_separate_identifier() {
        let tokens = tokenize("3LL + 2.5f ** 1e3").expect("tokenize");
        let texts: Vec<&str> = tokens.iter().map(Token::text).collect();
        assert_eq!(texts, vec!["3", "LL", "+", "2.5", "f", "**", "1e3", ""]);
    }

    #[test]
    fn inconsistent_dedent_is_rejected() {
        let err = tokenize("if a:\n    b\n  c\n").expect_err("bad indentation");
        assert!(err.to_string().contains("dedent"), "{err}");
    }
}
