//! Tokenizer for guard expressions.

use crate::error::GuardCompileError;

use super::ast::CmpOp;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum TokenKind {
    /// Identifier, possibly dotted (`order.total`, `marking.ready`).
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    And,
    Or,
    Not,
    Cmp(CmpOp),
    LParen,
    RParen,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Token {
    pub kind: TokenKind,
    /// Byte offset into the source expression.
    pub offset: usize,
}

pub(super) struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, GuardCompileError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(&(offset, ch)) = self.chars.get(self.pos) else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    offset: self.src.len(),
                });
                return Ok(tokens);
            };
            let kind = self.next_kind(offset, ch)?;
            tokens.push(Token { kind, offset });
        }
    }

    fn next_kind(&mut self, offset: usize, ch: char) -> Result<TokenKind, GuardCompileError> {
        let two = |lx: &Self, c: char| lx.peek_at(1) == Some(c);
        let kind = match ch {
            '(' => {
                self.pos += 1;
                TokenKind::LParen
            }
            ')' => {
                self.pos += 1;
                TokenKind::RParen
            }
            '>' if two(self, '=') => self.advance_by(2, TokenKind::Cmp(CmpOp::Ge)),
            '<' if two(self, '=') => self.advance_by(2, TokenKind::Cmp(CmpOp::Le)),
            '=' if two(self, '=') => self.advance_by(2, TokenKind::Cmp(CmpOp::Eq)),
            '!' if two(self, '=') => self.advance_by(2, TokenKind::Cmp(CmpOp::Ne)),
            '&' if two(self, '&') => self.advance_by(2, TokenKind::And),
            '|' if two(self, '|') => self.advance_by(2, TokenKind::Or),
            '>' => self.advance_by(1, TokenKind::Cmp(CmpOp::Gt)),
            '<' => self.advance_by(1, TokenKind::Cmp(CmpOp::Lt)),
            '!' => self.advance_by(1, TokenKind::Not),
            '"' | '\'' => self.string(offset, ch)?,
            c if c.is_ascii_digit() || (c == '-' && self.peek_is_digit()) => self.number(offset)?,
            c if c.is_alphabetic() || c == '_' => self.word(),
            other => {
                return Err(error(self.src, offset, format!("unexpected character '{other}'")));
            }
        };
        Ok(kind)
    }

    fn advance_by(&mut self, n: usize, kind: TokenKind) -> TokenKind {
        self.pos += n;
        kind
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).map(|(_, c)| *c)
    }

    fn peek_is_digit(&self) -> bool {
        self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
    }

    fn skip_whitespace(&mut self) {
        while self.peek_at(0).is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn slice_from(&self, start: usize) -> &'a str {
        let end = self
            .chars
            .get(self.pos)
            .map(|(i, _)| *i)
            .unwrap_or(self.src.len());
        &self.src[start..end]
    }

    fn number(&mut self, offset: usize) -> Result<TokenKind, GuardCompileError> {
        self.pos += 1;
        while self
            .peek_at(0)
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.pos += 1;
        }
        let text = self.slice_from(offset);
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| error(self.src, offset, format!("invalid number '{text}'")))
    }

    fn string(&mut self, offset: usize, quote: char) -> Result<TokenKind, GuardCompileError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek_at(0) {
                None => return Err(error(self.src, offset, "unterminated string literal")),
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(TokenKind::Str(out));
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn word(&mut self) -> TokenKind {
        let start = self.chars[self.pos].0;
        while self
            .peek_at(0)
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            self.pos += 1;
        }
        match self.slice_from(start) {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            ident => TokenKind::Ident(ident.to_string()),
        }
    }
}

pub(super) fn error(src: &str, offset: usize, message: impl Into<String>) -> GuardCompileError {
    GuardCompileError {
        expression: src.to_string(),
        offset,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn comparison_tokens() {
        assert_eq!(
            kinds("score >= 90"),
            vec![
                TokenKind::Ident("score".into()),
                TokenKind::Cmp(CmpOp::Ge),
                TokenKind::Number(90.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn dotted_identifiers_and_keywords() {
        assert_eq!(
            kinds("marking.ready == 0 and !approved"),
            vec![
                TokenKind::Ident("marking.ready".into()),
                TokenKind::Cmp(CmpOp::Eq),
                TokenKind::Number(0.0),
                TokenKind::And,
                TokenKind::Not,
                TokenKind::Ident("approved".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_and_negative_numbers() {
        assert_eq!(
            kinds("tier == 'gold' || delta > -1.5"),
            vec![
                TokenKind::Ident("tier".into()),
                TokenKind::Cmp(CmpOp::Eq),
                TokenKind::Str("gold".into()),
                TokenKind::Or,
                TokenKind::Ident("delta".into()),
                TokenKind::Cmp(CmpOp::Gt),
                TokenKind::Number(-1.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn rejects_stray_characters() {
        let err = Lexer::new("a = 1").tokenize().unwrap_err();
        assert_eq!(err.offset, 2);
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(Lexer::new("name == \"bob").tokenize().is_err());
    }
}
