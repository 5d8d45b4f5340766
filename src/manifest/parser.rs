// src/manifest/parser.rs

//! libconfig lexer and recursive-descent parser

use super::{Group, Value};
use crate::error::{Error, Result};
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    /// `=` or `:`
    Assign,
    Semi,
    Comma,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("'{}'", name),
            Self::Str(_) => "string".to_string(),
            Self::Int(_) => "integer".to_string(),
            Self::Float(_) => "float".to_string(),
            Self::Assign => "'='".to_string(),
            Self::Semi => "';'".to_string(),
            Self::Comma => "','".to_string(),
            Self::LBrace => "'{'".to_string(),
            Self::RBrace => "'}'".to_string(),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
            Self::LBracket => "'['".to_string(),
            Self::RBracket => "']'".to_string(),
            Self::Eof => "end of input".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Position {
    line: usize,
    column: usize,
}

fn parse_error(pos: Position, message: impl Into<String>) -> Error {
    Error::ConfigParse {
        line: pos.line,
        column: pos.column,
        message: message.into(),
    }
}

struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => self.skip_line(),
                Some('/') => {
                    let start = self.position();
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    match ahead.peek().map(|&(_, c)| c) {
                        Some('/') => self.skip_line(),
                        Some('*') => {
                            self.bump();
                            self.bump();
                            self.skip_block_comment(start)?;
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self, start: Position) -> Result<()> {
        let mut prev = '\0';
        while let Some(c) = self.bump() {
            if prev == '*' && c == '/' {
                return Ok(());
            }
            prev = c;
        }
        Err(parse_error(start, "unterminated comment"))
    }

    fn next_token(&mut self) -> Result<(Token, Position)> {
        self.skip_trivia()?;
        let pos = self.position();

        let Some(c) = self.peek() else {
            return Ok((Token::Eof, pos));
        };

        let token = match c {
            '=' | ':' => self.single(Token::Assign),
            ';' => self.single(Token::Semi),
            ',' => self.single(Token::Comma),
            '{' => self.single(Token::LBrace),
            '}' => self.single(Token::RBrace),
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),
            '"' => self.string(pos)?,
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(pos)?,
            c if c.is_ascii_alphabetic() || c == '*' => self.ident(),
            '@' => return Err(parse_error(pos, "@include directives are not supported")),
            other => return Err(parse_error(pos, format!("unexpected character {:?}", other))),
        };
        Ok((token, pos))
    }

    fn single(&mut self, token: Token) -> Token {
        self.bump();
        token
    }

    fn ident(&mut self) -> Token {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '*') {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Token::Ident(name)
    }

    fn string(&mut self, start: Position) -> Result<Token> {
        self.bump();
        let mut bytes = Vec::new();
        loop {
            let pos = self.position();
            match self.bump() {
                None | Some('\n') => return Err(parse_error(start, "unterminated string")),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('\\') => bytes.push(b'\\'),
                    Some('"') => bytes.push(b'"'),
                    Some('n') => bytes.push(b'\n'),
                    Some('r') => bytes.push(b'\r'),
                    Some('t') => bytes.push(b'\t'),
                    Some('f') => bytes.push(0x0c),
                    Some('x') => {
                        let mut hex = String::new();
                        for _ in 0..2 {
                            match self.bump() {
                                Some(h) if h.is_ascii_hexdigit() => hex.push(h),
                                _ => return Err(parse_error(pos, "invalid \\x escape")),
                            }
                        }
                        let byte = u8::from_str_radix(&hex, 16)
                            .map_err(|_| parse_error(pos, "invalid \\x escape"))?;
                        bytes.push(byte);
                    }
                    other => {
                        return Err(parse_error(
                            pos,
                            format!("invalid escape sequence \\{}", other.unwrap_or(' ')),
                        ))
                    }
                },
                Some(c) => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
        String::from_utf8(bytes)
            .map(Token::Str)
            .map_err(|_| parse_error(start, "string is not valid UTF-8"))
    }

    fn number(&mut self, start: Position) -> Result<Token> {
        let mut raw = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-') {
                raw.push(c);
                self.bump();
            } else {
                break;
            }
        }
        parse_number(&raw).ok_or_else(|| parse_error(start, format!("invalid number '{}'", raw)))
    }
}

fn parse_number(raw: &str) -> Option<Token> {
    let (negative, body) = match raw.as_bytes().first()? {
        b'-' => (true, &raw[1..]),
        b'+' => (false, &raw[1..]),
        _ => (false, raw),
    };

    let lower = body.to_ascii_lowercase();
    let trimmed = lower
        .strip_suffix("ll")
        .or_else(|| lower.strip_suffix('l'))
        .unwrap_or(&lower);

    if let Some(hex) = trimmed.strip_prefix("0x") {
        let value = u64::from_str_radix(hex, 16).ok()? as i64;
        return Some(Token::Int(if negative { value.wrapping_neg() } else { value }));
    }

    if trimmed.len() == lower.len() && (lower.contains('.') || lower.contains('e')) {
        let value: f64 = lower.parse().ok()?;
        return Some(Token::Float(if negative { -value } else { value }));
    }

    let value: i64 = trimmed.parse().ok()?;
    Some(Token::Int(if negative { -value } else { value }))
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    pos: Position,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Result<Self> {
        let mut lexer = Lexer::new(text);
        let (current, pos) = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            pos,
        })
    }

    fn advance(&mut self) -> Result<Token> {
        let (next, pos) = self.lexer.next_token()?;
        self.pos = pos;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.current == token {
            self.advance()?;
            Ok(())
        } else {
            Err(self.unexpected(&token.describe()))
        }
    }

    fn unexpected(&self, wanted: &str) -> Error {
        parse_error(
            self.pos,
            format!("expected {}, found {}", wanted, self.current.describe()),
        )
    }

    /// Settings until `end` (`}` or end of input)
    fn settings(&mut self, end: Token) -> Result<Group> {
        let mut group = Group::new();
        while self.current != end {
            let pos = self.pos;
            let name = match self.advance()? {
                Token::Ident(name) => name,
                other => {
                    return Err(parse_error(
                        pos,
                        format!("expected setting name, found {}", other.describe()),
                    ))
                }
            };
            self.expect(Token::Assign)?;
            let value = self.value()?;
            if matches!(self.current, Token::Semi | Token::Comma) {
                self.advance()?;
            }
            if group.contains(&name) {
                return Err(parse_error(pos, format!("duplicate setting '{}'", name)));
            }
            group.set(&name, value);
        }
        Ok(group)
    }

    fn value(&mut self) -> Result<Value> {
        match &self.current {
            Token::LBrace => {
                self.advance()?;
                let group = self.settings(Token::RBrace)?;
                self.expect(Token::RBrace)?;
                Ok(Value::Group(group))
            }
            Token::LParen => {
                self.advance()?;
                let items = self.elements(Token::RParen, false)?;
                Ok(Value::List(items))
            }
            Token::LBracket => {
                self.advance()?;
                let items = self.elements(Token::RBracket, true)?;
                Ok(Value::Array(items))
            }
            _ => self.scalar(),
        }
    }

    fn elements(&mut self, end: Token, scalars_only: bool) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        while self.current != end {
            let item = if scalars_only {
                self.scalar()?
            } else {
                self.value()?
            };
            items.push(item);
            if self.current == Token::Comma {
                self.advance()?;
            } else if self.current != end {
                return Err(self.unexpected(&format!("',' or {}", end.describe())));
            }
        }
        self.advance()?;
        Ok(items)
    }

    fn scalar(&mut self) -> Result<Value> {
        let pos = self.pos;
        match self.advance()? {
            Token::Str(mut s) => {
                // Adjacent literals concatenate
                while let Token::Str(next) = &self.current {
                    s.push_str(next);
                    self.advance()?;
                }
                Ok(Value::Str(s))
            }
            Token::Int(i) => Ok(Value::Int(i)),
            Token::Float(x) => Ok(Value::Float(x)),
            Token::Ident(word) if word.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Token::Ident(word) if word.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            other => Err(parse_error(
                pos,
                format!("expected value, found {}", other.describe()),
            )),
        }
    }
}

/// Parse a complete libconfig document into its root group
pub(super) fn parse(text: &str) -> Result<Group> {
    let mut parser = Parser::new(text)?;
    parser.settings(Token::Eof)
}
