// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Recursive-descent parser for the scripted dialect.
//!
//! The grammar is the statement subset configuration programs need:
//! locals, assignment, calls and method calls, `if`/`elseif`/`else`,
//! `while`, numeric `for`, `break` and `return`. `function`, `repeat` and
//! the generic `for ... in` loop are recognized and rejected with a clear
//! message.

use super::ast::{BinOp, Block, Expr, LValue, Stat, UnOp};
use super::lexer::{SpannedToken, Token};
use super::LuaError;

pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<SpannedToken>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_chunk(mut self) -> Result<Block, LuaError> {
        let block = self.block()?;
        self.expect(Token::Eof)?;
        Ok(block)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].tok
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].tok.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn accept(&mut self, tok: Token) -> bool {
        if *self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Token) -> Result<(), LuaError> {
        if *self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected {tok:?}, found {:?}", self.peek())))
        }
    }

    fn expect_name(&mut self) -> Result<String, LuaError> {
        match self.advance() {
            Token::Name(name) => Ok(name),
            other => Err(self.err(format!("expected a name, found {other:?}"))),
        }
    }

    fn err(&self, message: impl Into<String>) -> LuaError {
        LuaError::new(self.line(), message)
    }

    fn block_ends(&self) -> bool {
        matches!(
            self.peek(),
            Token::Eof | Token::End | Token::Else | Token::Elseif | Token::Until
        )
    }

    fn block(&mut self) -> Result<Block, LuaError> {
        let mut stats = Vec::new();
        while !self.block_ends() {
            if self.accept(Token::Semi) {
                continue;
            }
            let stat = self.statement()?;
            let is_return = matches!(stat, Stat::Return { .. });
            stats.push(stat);
            if is_return {
                // `return` closes a block.
                self.accept(Token::Semi);
                break;
            }
        }
        Ok(Block { stats })
    }

    fn statement(&mut self) -> Result<Stat, LuaError> {
        let line = self.line();
        match self.peek() {
            Token::Local => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.accept(Token::Comma) {
                    names.push(self.expect_name()?);
                }
                let mut exprs = Vec::new();
                if self.accept(Token::Assign) {
                    exprs = self.expr_list()?;
                }
                Ok(Stat::Local { names, exprs, line })
            }
            Token::If => {
                self.advance();
                let mut arms = Vec::new();
                let cond = self.expression()?;
                self.expect(Token::Then)?;
                arms.push((cond, self.block()?));
                let mut else_block = None;
                loop {
                    match self.advance() {
                        Token::Elseif => {
                            let cond = self.expression()?;
                            self.expect(Token::Then)?;
                            arms.push((cond, self.block()?));
                        }
                        Token::Else => {
                            else_block = Some(self.block()?);
                            self.expect(Token::End)?;
                            break;
                        }
                        Token::End => break,
                        other => {
                            return Err(self.err(format!(
                                "expected elseif/else/end, found {other:?}"
                            )))
                        }
                    }
                }
                Ok(Stat::If { arms, else_block })
            }
            Token::While => {
                self.advance();
                let cond = self.expression()?;
                self.expect(Token::Do)?;
                let body = self.block()?;
                self.expect(Token::End)?;
                Ok(Stat::While { cond, body })
            }
            Token::For => {
                self.advance();
                let var = self.expect_name()?;
                if !self.accept(Token::Assign) {
                    return Err(self.err("only the numeric for loop is supported"));
                }
                let start = self.expression()?;
                self.expect(Token::Comma)?;
                let stop = self.expression()?;
                let step = if self.accept(Token::Comma) {
                    Some(self.expression()?)
                } else {
                    None
                };
                self.expect(Token::Do)?;
                let body = self.block()?;
                self.expect(Token::End)?;
                Ok(Stat::NumericFor {
                    var,
                    start,
                    stop,
                    step,
                    body,
                })
            }
            Token::Break => {
                self.advance();
                Ok(Stat::Break { line })
            }
            Token::Return => {
                self.advance();
                let expr = if self.block_ends() || *self.peek() == Token::Semi {
                    None
                } else {
                    Some(self.expression()?)
                };
                Ok(Stat::Return { expr, line })
            }
            Token::Function | Token::Repeat => Err(self.err(format!(
                "{:?} is not supported by the configuration dialect",
                self.peek()
            ))),
            Token::Do => {
                self.advance();
                let body = self.block()?;
                self.expect(Token::End)?;
                // A bare do-block behaves like an if-true arm.
                Ok(Stat::If {
                    arms: vec![(Expr::True, body)],
                    else_block: None,
                })
            }
            _ => self.expr_statement(line),
        }
    }

    fn expr_statement(&mut self, line: u32) -> Result<Stat, LuaError> {
        let first = self.suffixed_expr()?;
        if *self.peek() == Token::Assign || *self.peek() == Token::Comma {
            let mut targets = vec![self.to_lvalue(first)?];
            while self.accept(Token::Comma) {
                let target = self.suffixed_expr()?;
                targets.push(self.to_lvalue(target)?);
            }
            self.expect(Token::Assign)?;
            let exprs = self.expr_list()?;
            return Ok(Stat::Assign {
                targets,
                exprs,
                line,
            });
        }
        match &first {
            Expr::Call { .. } | Expr::Method { .. } => Ok(Stat::ExprStat { expr: first, line }),
            _ => Err(self.err("expected a statement")),
        }
    }

    fn to_lvalue(&self, expr: Expr) -> Result<LValue, LuaError> {
        match expr {
            Expr::Name(name, line) => Ok(LValue::Name(name, line)),
            Expr::Index { obj, key, line } => Ok(LValue::Index {
                obj: *obj,
                key: *key,
                line,
            }),
            _ => Err(LuaError::new(self.line(), "cannot assign to this expression")),
        }
    }

    fn expr_list(&mut self) -> Result<Vec<Expr>, LuaError> {
        let mut exprs = vec![self.expression()?];
        while self.accept(Token::Comma) {
            exprs.push(self.expression()?);
        }
        Ok(exprs)
    }

    fn expression(&mut self) -> Result<Expr, LuaError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, LuaError> {
        let mut lhs = self.and_expr()?;
        while *self.peek() == Token::Or {
            let line = self.line();
            self.advance();
            let rhs = self.and_expr()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, LuaError> {
        let mut lhs = self.comparison()?;
        while *self.peek() == Token::And {
            let line = self.line();
            self.advance();
            let rhs = self.comparison()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, LuaError> {
        let mut lhs = self.concat()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinOp::Eq,
                Token::NotEq => BinOp::Ne,
                Token::Less => BinOp::Lt,
                Token::LessEq => BinOp::Le,
                Token::Greater => BinOp::Gt,
                Token::GreaterEq => BinOp::Ge,
                _ => return Ok(lhs),
            };
            let line = self.line();
            self.advance();
            let rhs = self.concat()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
    }

    fn concat(&mut self) -> Result<Expr, LuaError> {
        let lhs = self.additive()?;
        if *self.peek() == Token::DotDot {
            let line = self.line();
            self.advance();
            // Right associative.
            let rhs = self.concat()?;
            return Ok(Expr::Binary {
                op: BinOp::Concat,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            });
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, LuaError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            let line = self.line();
            self.advance();
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, LuaError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => return Ok(lhs),
            };
            let line = self.line();
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, LuaError> {
        let line = self.line();
        let op = match self.peek() {
            Token::Not => UnOp::Not,
            Token::Minus => UnOp::Neg,
            _ => return self.suffixed_expr(),
        };
        self.advance();
        let expr = self.unary()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
            line,
        })
    }

    fn suffixed_expr(&mut self) -> Result<Expr, LuaError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    let line = self.line();
                    self.advance();
                    let name = self.expect_name()?;
                    expr = Expr::Index {
                        obj: Box::new(expr),
                        key: Box::new(Expr::Str(name)),
                        line,
                    };
                }
                Token::LBracket => {
                    let line = self.line();
                    self.advance();
                    let key = self.expression()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index {
                        obj: Box::new(expr),
                        key: Box::new(key),
                        line,
                    };
                }
                Token::Colon => {
                    let line = self.line();
                    self.advance();
                    let name = self.expect_name()?;
                    let args = self.call_args()?;
                    expr = Expr::Method {
                        obj: Box::new(expr),
                        name,
                        args,
                        line,
                    };
                }
                Token::LParen | Token::LBrace | Token::Str(_) => {
                    let line = self.line();
                    let args = self.call_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        line,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// `(a, b)`, a table constructor, or a bare string literal.
    fn call_args(&mut self) -> Result<Vec<Expr>, LuaError> {
        match self.peek().clone() {
            Token::LParen => {
                self.advance();
                let args = if *self.peek() == Token::RParen {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                self.expect(Token::RParen)?;
                Ok(args)
            }
            Token::LBrace => Ok(vec![self.table()?]),
            Token::Str(s) => {
                self.advance();
                Ok(vec![Expr::Str(s)])
            }
            other => Err(self.err(format!("expected call arguments, found {other:?}"))),
        }
    }

    fn primary(&mut self) -> Result<Expr, LuaError> {
        let line = self.line();
        match self.advance() {
            Token::Nil => Ok(Expr::Nil),
            Token::True => Ok(Expr::True),
            Token::False => Ok(Expr::False),
            Token::Int(v) => Ok(Expr::Int(v)),
            Token::Float(v) => Ok(Expr::Float(v)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Name(name) => Ok(Expr::Name(name, line)),
            Token::LParen => {
                let expr = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::LBrace => {
                self.pos -= 1;
                self.table()
            }
            other => Err(LuaError::new(line, format!("unexpected {other:?}"))),
        }
    }

    fn table(&mut self) -> Result<Expr, LuaError> {
        self.expect(Token::LBrace)?;
        let mut array = Vec::new();
        let mut fields = Vec::new();
        while *self.peek() != Token::RBrace {
            // `name = value` field or positional entry.
            if let Token::Name(name) = self.peek().clone() {
                if self.tokens[self.pos + 1].tok == Token::Assign {
                    self.advance();
                    self.advance();
                    fields.push((name, self.expression()?));
                    if !self.accept(Token::Comma) && !self.accept(Token::Semi) {
                        break;
                    }
                    continue;
                }
            }
            array.push(self.expression()?);
            if !self.accept(Token::Comma) && !self.accept(Token::Semi) {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(Expr::Table { array, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::Lexer;
    use super::*;

    fn parse(src: &str) -> Block {
        Parser::new(Lexer::new(src).tokenize().unwrap())
            .parse_chunk()
            .unwrap()
    }

    fn parse_err(src: &str) -> LuaError {
        match Parser::new(Lexer::new(src).tokenize().unwrap()).parse_chunk() {
            Ok(_) => panic!("expected parse error for {src:?}"),
            Err(e) => e,
        }
    }

    #[test]
    fn call_statement_forms() {
        let block = parse("NET(\"y\")\nNET \"y\"\nWLAN:satisfy{\"y\", recursive=true}\n");
        assert_eq!(block.stats.len(), 3);
        assert!(matches!(
            &block.stats[0],
            Stat::ExprStat {
                expr: Expr::Call { .. },
                ..
            }
        ));
        match &block.stats[2] {
            Stat::ExprStat {
                expr: Expr::Method { name, args, .. },
                ..
            } => {
                assert_eq!(name, "satisfy");
                assert!(matches!(&args[0], Expr::Table { array, fields }
                    if array.len() == 1 && fields.len() == 1));
            }
            other => panic!("expected method call, got {other:?}"),
        }
    }

    #[test]
    fn if_elseif_else_chain() {
        let block = parse(
            "if kernel_version >= ver(\"5.6\") then USB4(\"y\") elseif x then y(\"m\") else THUNDERBOLT(\"y\") end",
        );
        match &block.stats[0] {
            Stat::If { arms, else_block } => {
                assert_eq!(arms.len(), 2);
                assert!(else_block.is_some());
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn numeric_for_and_while() {
        parse("for i = 1, 4 do print(i) end\nwhile x do break end");
    }

    #[test]
    fn operator_precedence() {
        let block = parse("x = 1 + 2 * 3 == 7 and true");
        match &block.stats[0] {
            Stat::Assign { exprs, .. } => match &exprs[0] {
                Expr::Binary { op: BinOp::And, lhs, .. } => match lhs.as_ref() {
                    Expr::Binary { op: BinOp::Eq, .. } => {}
                    other => panic!("expected ==, got {other:?}"),
                },
                other => panic!("expected and, got {other:?}"),
            },
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_constructs_fail_clearly() {
        assert!(parse_err("function f() end").message.contains("not supported"));
        assert!(parse_err("for k, v in pairs(t) do end")
            .message
            .contains("numeric for"));
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = parse_err("NET(\"y\")\nNET(");
        assert_eq!(err.line, 2);
    }
}
