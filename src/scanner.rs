//! Delimiter-aware lexical scanner for Solidity source.
//!
//! The scanner only classifies what the locator needs: identifiers and
//! keywords, numbers, string literals, punctuation, and the three bracket
//! pairs with their running nesting depth. Comments are swallowed, so
//! nothing inside a comment or a string can be mistaken for a construct.

use crate::error::ScanError;
use crate::model::Position;

/// The three bracket pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delim {
    Brace,
    Paren,
    Bracket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword.
    Ident,
    Number,
    /// String literal, quotes included.
    Str,
    /// Operator or punctuation other than a bracket.
    Punct,
    Open(Delim),
    Close(Delim),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
    pub pos: Position,
    /// Position one past the last character.
    pub end_pos: Position,
    /// Nesting depth outside this token. An opening bracket and its
    /// matching closing bracket carry the same depth.
    pub depth: u32,
}

/// Multi-character operators, longest first so the scan is maximal munch.
const OPERATORS: &[&str] = &[
    ">>>=", "<<=", ">>=", ">>>", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=", "-=",
    "*=", "/=", "%=", "|=", "&=", "^=", "**", "<<", ">>", "=>", "->", ":=",
];

/// A scanned file: the source text and its token stream.
#[derive(Debug)]
pub struct Tokens<'a> {
    src: &'a str,
    tokens: Vec<Token>,
}

impl<'a> Tokens<'a> {
    pub fn src(&self) -> &'a str {
        self.src
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Token> {
        self.tokens.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Token> {
        self.tokens.iter()
    }

    /// Source text of token `idx`, or `""` past the end.
    pub fn text(&self, idx: usize) -> &'a str {
        match self.tokens.get(idx) {
            Some(t) => &self.src[t.start..t.end],
            None => "",
        }
    }

    /// Whether token `idx` is the identifier or punctuation `text`.
    pub fn is(&self, idx: usize, text: &str) -> bool {
        match self.tokens.get(idx) {
            Some(t) => {
                matches!(t.kind, TokenKind::Ident | TokenKind::Punct)
                    && &self.src[t.start..t.end] == text
            }
            None => false,
        }
    }

    pub fn is_open(&self, idx: usize, delim: Delim) -> bool {
        matches!(self.tokens.get(idx), Some(t) if t.kind == TokenKind::Open(delim))
    }
}

/// Tokenize `src`.
pub fn scan(src: &str) -> Result<Tokens<'_>, ScanError> {
    let tokens = Scanner::new(src).tokenize()?;
    Ok(Tokens { src, tokens })
}

struct Scanner<'a> {
    src: &'a str,
    offset: usize,
    line: u32,
    column: u32,
    depth: u32,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            offset: 0,
            line: 1,
            column: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.offset..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.offset..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ScanError> {
        let mut tokens = Vec::new();

        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
                continue;
            }
            if c == '/' && self.peek_at(1) == Some('/') {
                self.line_comment();
                continue;
            }
            if c == '/' && self.peek_at(1) == Some('*') {
                self.block_comment()?;
                continue;
            }

            let start = self.offset;
            let pos = self.position();
            let mut depth = self.depth;

            let kind = match c {
                '"' | '\'' => {
                    self.string(c)?;
                    TokenKind::Str
                }
                c if is_ident_start(c) => {
                    while self.peek().is_some_and(is_ident_continue) {
                        self.bump();
                    }
                    TokenKind::Ident
                }
                c if c.is_ascii_digit() => {
                    self.number();
                    TokenKind::Number
                }
                '{' | '(' | '[' => {
                    self.bump();
                    self.depth += 1;
                    TokenKind::Open(delim_of(c))
                }
                '}' | ')' | ']' => {
                    self.bump();
                    self.depth = self.depth.saturating_sub(1);
                    depth = self.depth;
                    TokenKind::Close(delim_of(c))
                }
                _ => {
                    self.punct();
                    TokenKind::Punct
                }
            };

            tokens.push(Token {
                kind,
                start,
                end: self.offset,
                pos,
                end_pos: self.position(),
                depth,
            });
        }

        Ok(tokens)
    }

    fn line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    /// Block comments nest: `/* a /* b */ c */` is one comment.
    fn block_comment(&mut self) -> Result<(), ScanError> {
        let line = self.line;
        self.bump();
        self.bump();
        let mut nesting = 1u32;
        loop {
            match (self.peek(), self.peek_at(1)) {
                (None, _) => {
                    return Err(ScanError {
                        line,
                        message: "unterminated block comment".to_string(),
                    })
                }
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    nesting += 1;
                }
                (Some('*'), Some('/')) => {
                    self.bump();
                    self.bump();
                    nesting -= 1;
                    if nesting == 0 {
                        return Ok(());
                    }
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<(), ScanError> {
        let line = self.line;
        let unterminated = || ScanError {
            line,
            message: "unterminated string literal".to_string(),
        };
        self.bump();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(unterminated()),
                Some('\\') => {
                    if self.bump().is_none() {
                        return Err(unterminated());
                    }
                }
                Some(c) if c == quote => return Ok(()),
                Some(_) => {}
            }
        }
    }

    /// Decimal, hex, scientific (`2e18`, `1e-5`) and underscore-separated
    /// literals. A `.` only belongs to the number when a digit follows it.
    fn number(&mut self) {
        let is_hex = self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X'));
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.bump();
                if !is_hex
                    && matches!(c, 'e' | 'E')
                    && self.peek() == Some('-')
                    && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())
                {
                    self.bump();
                }
            } else if c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn punct(&mut self) {
        let rest = &self.src[self.offset..];
        let width = OPERATORS
            .iter()
            .find(|op| rest.starts_with(**op))
            .map_or(1, |op| op.chars().count());
        for _ in 0..width {
            self.bump();
        }
    }
}

fn delim_of(c: char) -> Delim {
    match c {
        '{' | '}' => Delim::Brace,
        '(' | ')' => Delim::Paren,
        _ => Delim::Bracket,
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(src: &str) -> Vec<String> {
        let toks = scan(src).unwrap();
        (0..toks.len()).map(|i| toks.text(i).to_string()).collect()
    }

    #[test]
    fn test_scan_basic_statement() {
        assert_eq!(
            texts("uint x = a >>= 2;"),
            vec!["uint", "x", "=", "a", ">>=", "2", ";"]
        );
    }

    #[test]
    fn test_scan_skips_comments() {
        let src = "a // if (x) {\n/* while { /* nested */ still comment */ b";
        assert_eq!(texts(src), vec!["a", "b"]);
    }

    #[test]
    fn test_scan_string_swallows_contents() {
        let toks = scan(r#"f("a \" { ; }", 'b');"#).unwrap();
        assert_eq!(toks.text(2), r#""a \" { ; }""#);
        assert_eq!(toks.get(2).unwrap().kind, TokenKind::Str);
        assert_eq!(toks.text(4), "'b'");
        assert_eq!(toks.len(), 7);
    }

    #[test]
    fn test_scan_depth_tracking() {
        let toks = scan("{ f(a[1]) }").unwrap();
        let depths: Vec<u32> = toks.iter().map(|t| t.depth).collect();
        // {  f  (  a  [  1  ]  )  }
        assert_eq!(depths, vec![0, 1, 1, 2, 2, 3, 2, 1, 0]);
        assert_eq!(toks.get(0).unwrap().kind, TokenKind::Open(Delim::Brace));
        assert_eq!(toks.get(8).unwrap().kind, TokenKind::Close(Delim::Brace));
    }

    #[test]
    fn test_scan_positions() {
        let toks = scan("a\n  bc").unwrap();
        let b = toks.get(1).unwrap();
        assert_eq!(b.pos, Position { line: 2, column: 2 });
        assert_eq!(b.end_pos, Position { line: 2, column: 4 });
    }

    #[test]
    fn test_scan_numbers() {
        assert_eq!(texts("1.5 + 2e-3 - 0xff_ee + x.y"), vec![
            "1.5", "+", "2e-3", "-", "0xff_ee", "+", "x", ".", "y"
        ]);
    }

    #[test]
    fn test_scan_unterminated_string() {
        let err = scan("a;\nb = \"oops;\nc;").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("string"));
    }

    #[test]
    fn test_scan_unterminated_block_comment() {
        let err = scan("a;\n\n/* /* */ never closed").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("comment"));
    }
}
