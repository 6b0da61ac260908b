//! Restricted SQL lexer.
//!
//! Splits GoogleSQL text into tokens carrying byte spans into the source.
//! It knows enough to never mistake the inside of a string, quoted
//! identifier or comment for a keyword, and nothing more: no grammar, no
//! keyword table.

use std::ops::Range;

/// Token categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    /// `-- ...`, `# ...` or `/* ... */`
    Comment,
    /// Any string or bytes literal, including raw and triple-quoted forms.
    String,
    /// `` `project.dataset.table` ``
    QuotedIdent,
    /// Bare identifier or keyword.
    Word,
    Number,
    LParen,
    RParen,
    Semicolon,
    /// Any other single character (`,`, `*`, `=`, `@`, ...).
    Punct,
}

/// A token and its byte range in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

impl Token {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.clone()]
    }

    /// Whitespace and comments.
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    /// Bare word equal to `keyword`, ignoring ASCII case.
    pub fn is_keyword(&self, source: &str, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text(source).eq_ignore_ascii_case(keyword)
    }
}

/// Input that cannot be tokenized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("unterminated {what} starting at byte {offset}")]
    Unterminated { what: &'static str, offset: usize },
}

/// Tokenize `source`, trivia included.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer {
        bytes: source.as_bytes(),
        pos: 0,
    }
    .run()
}

struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
}

fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_word_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

impl<'a> Lexer<'a> {
    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();

        while let Some(b) = self.peek(0) {
            let start = self.pos;
            let kind = match b {
                b if b.is_ascii_whitespace() => {
                    self.eat_while(|b| b.is_ascii_whitespace());
                    TokenKind::Whitespace
                }
                b'-' if self.peek(1) == Some(b'-') => {
                    self.skip_line();
                    TokenKind::Comment
                }
                b'#' => {
                    self.skip_line();
                    TokenKind::Comment
                }
                b'/' if self.peek(1) == Some(b'*') => {
                    self.skip_block_comment(start)?;
                    TokenKind::Comment
                }
                b'\'' | b'"' => {
                    self.skip_string(start)?;
                    TokenKind::String
                }
                b'`' => {
                    self.skip_quoted_ident(start)?;
                    TokenKind::QuotedIdent
                }
                b if b.is_ascii_digit() => {
                    self.skip_number();
                    TokenKind::Number
                }
                b'.' if self.peek(1).is_some_and(|n| n.is_ascii_digit()) => {
                    self.skip_number();
                    TokenKind::Number
                }
                b if is_word_start(b) => {
                    if self.at_string_prefix() {
                        self.eat_while(|b| matches!(b, b'r' | b'R' | b'b' | b'B'));
                        self.skip_string(start)?;
                        TokenKind::String
                    } else {
                        self.eat_while(is_word_continue);
                        TokenKind::Word
                    }
                }
                b'(' => {
                    self.pos += 1;
                    TokenKind::LParen
                }
                b')' => {
                    self.pos += 1;
                    TokenKind::RParen
                }
                b';' => {
                    self.pos += 1;
                    TokenKind::Semicolon
                }
                _ => {
                    self.pos += 1;
                    TokenKind::Punct
                }
            };

            tokens.push(Token {
                kind,
                span: start..self.pos,
            });
        }

        Ok(tokens)
    }

    fn eat_while(&mut self, pred: impl Fn(u8) -> bool) {
        while self.peek(0).is_some_and(&pred) {
            self.pos += 1;
        }
    }

    fn skip_line(&mut self) {
        self.eat_while(|b| b != b'\n');
    }

    fn skip_block_comment(&mut self, start: usize) -> Result<(), LexError> {
        self.pos += 2;
        while let Some(b) = self.peek(0) {
            if b == b'*' && self.peek(1) == Some(b'/') {
                self.pos += 2;
                return Ok(());
            }
            self.pos += 1;
        }
        Err(LexError::Unterminated {
            what: "block comment",
            offset: start,
        })
    }

    /// `r'..'`, `b".."`, `rb'''..'''` and friends.
    fn at_string_prefix(&self) -> bool {
        let prefix_len = (0..2)
            .take_while(|&i| matches!(self.peek(i), Some(b'r' | b'R' | b'b' | b'B')))
            .count();
        if prefix_len == 0 {
            return false;
        }
        if prefix_len == 2 {
            let pair = [self.bytes[self.pos], self.bytes[self.pos + 1]];
            // `rr` or `bb` are ordinary identifiers.
            if pair[0].eq_ignore_ascii_case(&pair[1]) {
                return false;
            }
        }
        matches!(self.peek(prefix_len), Some(b'\'' | b'"'))
    }

    /// Positioned on the opening quote.
    fn skip_string(&mut self, start: usize) -> Result<(), LexError> {
        let quote = self.bytes[self.pos];
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        while let Some(b) = self.peek(0) {
            match b {
                b'\\' => self.pos += 2,
                b if b == quote => {
                    if !triple {
                        self.pos += 1;
                        return Ok(());
                    }
                    if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                        self.pos += 3;
                        return Ok(());
                    }
                    self.pos += 1;
                }
                b'\n' if !triple => break,
                _ => self.pos += 1,
            }
        }

        self.pos = self.pos.min(self.bytes.len());
        Err(LexError::Unterminated {
            what: "string literal",
            offset: start,
        })
    }

    fn skip_quoted_ident(&mut self, start: usize) -> Result<(), LexError> {
        self.pos += 1;
        while let Some(b) = self.peek(0) {
            match b {
                b'\\' => self.pos += 2,
                b'`' => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => self.pos += 1,
            }
        }
        Err(LexError::Unterminated {
            what: "quoted identifier",
            offset: start,
        })
    }

    /// Digits, decimal point, exponent with sign.
    fn skip_number(&mut self) {
        while let Some(b) = self.peek(0) {
            let exponent_sign = matches!(b, b'+' | b'-')
                && self.pos > 0
                && matches!(self.bytes[self.pos - 1], b'e' | b'E');
            if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }
    }
}
