// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::LuaError;

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),

    // Keywords
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    // Operators and punctuation
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    LessEq,
    GreaterEq,
    Less,
    Greater,
    Assign,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Colon,
    Comma,
    Dot,
    DotDot,

    Eof,
}

#[derive(Clone, Debug)]
pub struct SpannedToken {
    pub tok: Token,
    pub line: u32,
}

fn keyword(name: &str) -> Option<Token> {
    Some(match name {
        "and" => Token::And,
        "break" => Token::Break,
        "do" => Token::Do,
        "else" => Token::Else,
        "elseif" => Token::Elseif,
        "end" => Token::End,
        "false" => Token::False,
        "for" => Token::For,
        "function" => Token::Function,
        "if" => Token::If,
        "in" => Token::In,
        "local" => Token::Local,
        "nil" => Token::Nil,
        "not" => Token::Not,
        "or" => Token::Or,
        "repeat" => Token::Repeat,
        "return" => Token::Return,
        "then" => Token::Then,
        "true" => Token::True,
        "until" => Token::Until,
        "while" => Token::While,
        _ => return None,
    })
}

pub struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<SpannedToken>, LuaError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.tok == Token::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.bytes.get(self.pos).copied();
        if let Some(b) = b {
            self.pos += 1;
            if b == b'\n' {
                self.line += 1;
            }
        }
        b
    }

    fn err(&self, message: impl Into<String>) -> LuaError {
        LuaError::new(self.line, message)
    }

    fn skip_trivia(&mut self) -> Result<(), LuaError> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.advance();
                }
                Some(b'-') if self.peek2() == Some(b'-') => {
                    self.advance();
                    self.advance();
                    if self.peek() == Some(b'[') && self.peek2() == Some(b'[') {
                        self.advance();
                        self.advance();
                        self.skip_block_comment()?;
                    } else {
                        while let Some(b) = self.peek() {
                            if b == b'\n' {
                                break;
                            }
                            self.advance();
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), LuaError> {
        let start = self.line;
        loop {
            match self.advance() {
                Some(b']') if self.peek() == Some(b']') => {
                    self.advance();
                    return Ok(());
                }
                Some(_) => {}
                None => {
                    return Err(LuaError::new(start, "unterminated block comment"));
                }
            }
        }
    }

    fn next_token(&mut self) -> Result<SpannedToken, LuaError> {
        self.skip_trivia()?;
        let line = self.line;
        let Some(b) = self.peek() else {
            return Ok(SpannedToken {
                tok: Token::Eof,
                line,
            });
        };

        let tok = match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => self.name(),
            b'0'..=b'9' => self.number()?,
            b'"' | b'\'' => self.string(b)?,
            b'.' => {
                if matches!(self.peek2(), Some(b'0'..=b'9')) {
                    self.number()?
                } else {
                    self.advance();
                    if self.peek() == Some(b'.') {
                        self.advance();
                        if self.peek() == Some(b'.') {
                            return Err(self.err("'...' is not supported"));
                        }
                        Token::DotDot
                    } else {
                        Token::Dot
                    }
                }
            }
            _ => self.symbol()?,
        };
        Ok(SpannedToken { tok, line })
    }

    fn name(&mut self) -> Token {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.advance();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .expect("ascii identifier")
            .to_string();
        keyword(&text).unwrap_or(Token::Name(text))
    }

    fn number(&mut self) -> Result<Token, LuaError> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek2(), Some(b'x' | b'X')) {
            self.advance();
            self.advance();
            while matches!(self.peek(), Some(b) if b.is_ascii_hexdigit()) {
                self.advance();
            }
            let text = std::str::from_utf8(&self.bytes[start + 2..self.pos]).expect("hex digits");
            return i64::from_str_radix(text, 16)
                .map(Token::Int)
                .map_err(|_| self.err("hex literal out of range"));
        }

        let mut is_float = false;
        while let Some(b) = self.peek() {
            match b {
                b'0'..=b'9' => {
                    self.advance();
                }
                b'.' if !is_float => {
                    is_float = true;
                    self.advance();
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).expect("digits");
        if is_float {
            text.parse()
                .map(Token::Float)
                .map_err(|_| self.err("malformed number"))
        } else {
            text.parse()
                .map(Token::Int)
                .map_err(|_| self.err("integer literal out of range"))
        }
    }

    fn string(&mut self, quote: u8) -> Result<Token, LuaError> {
        self.advance();
        let mut out = String::new();
        loop {
            let Some(b) = self.advance() else {
                return Err(self.err("unterminated string"));
            };
            match b {
                _ if b == quote => break,
                b'\n' => return Err(self.err("unterminated string")),
                b'\\' => out.push(self.escape()?),
                _ => {
                    // Re-assemble UTF-8 sequences byte by byte.
                    let mut buf = vec![b];
                    while !buf.is_empty() && std::str::from_utf8(&buf).is_err() {
                        if buf.len() == 4 {
                            return Err(self.err("invalid UTF-8 in string"));
                        }
                        let Some(next) = self.advance() else {
                            return Err(self.err("unterminated string"));
                        };
                        buf.push(next);
                    }
                    out.push_str(std::str::from_utf8(&buf).expect("validated"));
                }
            }
        }
        Ok(Token::Str(out))
    }

    /// Escapes: `\\ \" \' \n \r \t`, `\xHH`, `\OOO` (octal), `\uHHHH`,
    /// `\UHHHHHHHH`, `\N{Name}`.
    fn escape(&mut self) -> Result<char, LuaError> {
        let Some(b) = self.advance() else {
            return Err(self.err("dangling escape"));
        };
        match b {
            b'\\' => Ok('\\'),
            b'"' => Ok('"'),
            b'\'' => Ok('\''),
            b'n' => Ok('\n'),
            b'r' => Ok('\r'),
            b't' => Ok('\t'),
            b'x' => {
                let code = self.hex_digits(2)?;
                Ok(code as u8 as char)
            }
            b'0'..=b'7' => {
                let mut code = (b - b'0') as u32;
                for _ in 0..2 {
                    match self.peek() {
                        Some(d @ b'0'..=b'7') => {
                            self.advance();
                            code = code * 8 + (d - b'0') as u32;
                        }
                        _ => break,
                    }
                }
                char::from_u32(code).ok_or_else(|| self.err("octal escape out of range"))
            }
            b'u' => self.unicode_escape(4),
            b'U' => self.unicode_escape(8),
            b'N' => {
                if self.advance() != Some(b'{') {
                    return Err(self.err("expected '{' after \\N"));
                }
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c != b'}' && c != b'\n') {
                    self.advance();
                }
                if self.advance() != Some(b'}') {
                    return Err(self.err("unterminated \\N{...} escape"));
                }
                let name = std::str::from_utf8(&self.bytes[start..self.pos - 1])
                    .map_err(|_| self.err("invalid character name"))?;
                unicode_names2::character(name)
                    .ok_or_else(|| self.err(format!("unknown character name {name:?}")))
            }
            other => Err(self.err(format!("unknown escape '\\{}'", other as char))),
        }
    }

    fn unicode_escape(&mut self, len: usize) -> Result<char, LuaError> {
        let code = self.hex_digits(len)?;
        char::from_u32(code).ok_or_else(|| self.err("escape is not a valid code point"))
    }

    fn hex_digits(&mut self, len: usize) -> Result<u32, LuaError> {
        let mut code = 0u32;
        for _ in 0..len {
            let Some(d) = self.advance() else {
                return Err(self.err("truncated escape"));
            };
            let digit = (d as char)
                .to_digit(16)
                .ok_or_else(|| self.err(format!("'{}' is not a hex digit", d as char)))?;
            code = code * 16 + digit;
        }
        Ok(code)
    }

    fn symbol(&mut self) -> Result<Token, LuaError> {
        let b = self.advance().expect("peeked");
        Ok(match b {
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b';' => Token::Semi,
            b':' => Token::Colon,
            b',' => Token::Comma,
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    Token::EqEq
                } else {
                    Token::Assign
                }
            }
            b'~' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    Token::NotEq
                } else {
                    return Err(self.err("unexpected '~'"));
                }
            }
            b'<' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    Token::LessEq
                } else {
                    Token::Less
                }
            }
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    Token::GreaterEq
                } else {
                    Token::Greater
                }
            }
            other => {
                return Err(self.err(format!("unexpected character '{}'", other as char)));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Token> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn statements_tokenize_with_lines() {
        let tokens = Lexer::new("NET(\"y\")\nWLAN:set(m)\n").tokenize().unwrap();
        assert_eq!(tokens[0].tok, Token::Name("NET".into()));
        assert_eq!(tokens[0].line, 1);
        let colon = tokens.iter().find(|t| t.tok == Token::Colon).unwrap();
        assert_eq!(colon.line, 2);
    }

    #[test]
    fn numbers_and_operators() {
        assert_eq!(
            lex("1 + 2.5 * 0x10 .. x"),
            vec![
                Token::Int(1),
                Token::Plus,
                Token::Float(2.5),
                Token::Star,
                Token::Int(16),
                Token::DotDot,
                Token::Name("x".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            lex("-- line comment\nx --[[ block\ncomment ]] = 1"),
            vec![Token::Name("x".into()), Token::Assign, Token::Int(1), Token::Eof]
        );
    }

    #[test]
    fn simple_escapes() {
        assert_eq!(
            lex(r#""a\tb\\c\"d\n""#),
            vec![Token::Str("a\tb\\c\"d\n".into()), Token::Eof]
        );
    }

    #[test]
    fn numeric_escapes() {
        assert_eq!(lex(r#""\x41\102\u0043""#), vec![Token::Str("ABC".into()), Token::Eof]);
        assert_eq!(
            lex(r#""\U0001F600""#),
            vec![Token::Str("\u{1F600}".into()), Token::Eof]
        );
    }

    #[test]
    fn named_escapes() {
        assert_eq!(
            lex(r#""\N{LATIN SMALL LETTER A}""#),
            vec![Token::Str("a".into()), Token::Eof]
        );
        assert!(Lexer::new(r#""\N{NOT A REAL NAME}""#).tokenize().is_err());
    }

    #[test]
    fn bad_escape_is_an_error() {
        let err = Lexer::new("x = \"\\q\"").tokenize().unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("\\q"));
    }

    #[test]
    fn keywords_are_not_names() {
        assert_eq!(
            lex("if x then end"),
            vec![
                Token::If,
                Token::Name("x".into()),
                Token::Then,
                Token::End,
                Token::Eof
            ]
        );
    }
}
