//! Recursive-descent / precedence-climbing parser for the monitor
//! expression grammar, mirroring the PLY grammar's precedence levels:
//! primary -> postfix -> unary -> multiplicative -> additive -> relational
//! -> equality -> logical_and -> logical_or -> conditional -> expression
//! -> when_expression (the start symbol).

use super::ast::{named_constant, BinOp, Node, UnOp};
use super::lexer::{Lexer, Token};
use crate::errors::{ArchiverError, ArchiverResult};
use crate::value::Value;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn parse(expr: &str) -> ArchiverResult<Node> {
        let tokens = Lexer::new(expr).tokenize()?;
        let mut parser = Parser { tokens, pos: 0 };
        let node = parser.parse_when_expression()?;
        parser.expect_eof()?;
        Ok(node)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect_eof(&self) -> ArchiverResult<()> {
        if *self.peek() == Token::Eof {
            Ok(())
        } else {
            Err(ArchiverError::expression(format!("unexpected trailing tokens near {:?}", self.peek())))
        }
    }

    fn expect(&mut self, tok: &Token) -> ArchiverResult<()> {
        if self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(ArchiverError::expression(format!("expected {tok:?}, found {:?}", self.peek())))
        }
    }

    // when_expression: expression [ 'when' expression ]
    fn parse_when_expression(&mut self) -> ArchiverResult<Node> {
        let value_expr = self.parse_expression()?;
        if *self.peek() == Token::When {
            self.advance();
            let when_expr = self.parse_expression()?;
            Ok(Node::When {
                value_expr: Box::new(value_expr),
                when_expr: Some(Box::new(when_expr)),
                value: Value::Invalid,
                latched_true: false,
            })
        } else {
            Ok(value_expr)
        }
    }

    // expression: conditional
    fn parse_expression(&mut self) -> ArchiverResult<Node> {
        self.parse_conditional()
    }

    // conditional: logical_or [ '?' expression ':' conditional ]
    fn parse_conditional(&mut self) -> ArchiverResult<Node> {
        let cond = self.parse_logical_or()?;
        if *self.peek() == Token::Question {
            self.advance();
            let then_branch = self.parse_expression()?;
            self.expect(&Token::Colon)?;
            let else_branch = self.parse_conditional()?;
            Ok(Node::Conditional {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
                value: Value::Invalid,
            })
        } else {
            Ok(cond)
        }
    }

    // logical_or: logical_and ( '||' logical_and )*
    fn parse_logical_or(&mut self) -> ArchiverResult<Node> {
        let mut node = self.parse_logical_and()?;
        while *self.peek() == Token::OrOr {
            self.advance();
            let rhs = self.parse_logical_and()?;
            node = binary(BinOp::Or, node, rhs);
        }
        Ok(node)
    }

    // logical_and: equality ( '&&' equality )*
    fn parse_logical_and(&mut self) -> ArchiverResult<Node> {
        let mut node = self.parse_equality()?;
        while *self.peek() == Token::AndAnd {
            self.advance();
            let rhs = self.parse_equality()?;
            node = binary(BinOp::And, node, rhs);
        }
        Ok(node)
    }

    // equality: relational ( ('==' | '!=') relational )*
    fn parse_equality(&mut self) -> ArchiverResult<Node> {
        let mut node = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinOp::Eq,
                Token::Neq => BinOp::Neq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_relational()?;
            node = binary(op, node, rhs);
        }
        Ok(node)
    }

    // relational: additive ( ('<' | '>' | '<=' | '>=') additive )*
    fn parse_relational(&mut self) -> ArchiverResult<Node> {
        let mut node = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::Gt => BinOp::Gt,
                Token::Leq => BinOp::Leq,
                Token::Geq => BinOp::Geq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            node = binary(op, node, rhs);
        }
        Ok(node)
    }

    // additive: multiplicative ( ('+' | '-') multiplicative )*
    fn parse_additive(&mut self) -> ArchiverResult<Node> {
        let mut node = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            node = binary(op, node, rhs);
        }
        Ok(node)
    }

    // multiplicative: unary ( ('*' | '/' | '%') unary )*
    fn parse_multiplicative(&mut self) -> ArchiverResult<Node> {
        let mut node = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            node = binary(op, node, rhs);
        }
        Ok(node)
    }

    // unary: ('+' | '-' | '!')* postfix
    fn parse_unary(&mut self) -> ArchiverResult<Node> {
        let op = match self.peek() {
            Token::Plus => Some(UnOp::Pos),
            Token::Minus => Some(UnOp::Neg),
            Token::Bang => Some(UnOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let child = self.parse_unary()?;
            Ok(Node::Unary {
                op,
                child: Box::new(child),
                value: Value::Invalid,
            })
        } else {
            self.parse_postfix()
        }
    }

    // postfix: primary ( '.' IDENTIFIER )*   -- keyword member access
    fn parse_postfix(&mut self) -> ArchiverResult<Node> {
        if let Token::Identifier(first) = self.peek().clone() {
            // Lookahead for `actor.keyword[.member]` without consuming a
            // plain identifier/constant/call prematurely.
            if self.tokens.get(self.pos + 1) == Some(&Token::Dot) {
                return self.parse_keyvalue(first);
            }
        }
        self.parse_primary()
    }

    fn parse_keyvalue(&mut self, actor: String) -> ArchiverResult<Node> {
        self.advance(); // actor identifier
        self.advance(); // '.'
        let Token::Identifier(keyword) = self.advance() else {
            return Err(ArchiverError::expression("expected keyword name after '.'"));
        };
        let member = if *self.peek() == Token::Dot {
            self.advance();
            let Token::Identifier(member) = self.advance() else {
                return Err(ArchiverError::expression("expected member name after '.'"));
            };
            Some(member)
        } else {
            None
        };
        let tag = format!("{}.{}", actor.to_lowercase(), keyword.to_lowercase());
        Ok(Node::KeyValue {
            tag,
            member: member.map(|m| m.to_lowercase()),
            value_index: None, // resolved later by the monitor registration pass
            value: Value::Invalid,
        })
    }

    // primary: constant | identifier | call | '(' expression ')'
    fn parse_primary(&mut self) -> ArchiverResult<Node> {
        match self.advance() {
            Token::IntConst(i) => Ok(Node::Constant { value: Value::Int(i) }),
            Token::FloatConst(f) => Ok(Node::Constant { value: Value::Float(f) }),
            Token::StringConst(s) => Ok(Node::Constant { value: Value::Text(s) }),
            Token::LParen => {
                let node = self.parse_expression()?;
                self.expect(&Token::RParen)?;
                Ok(node)
            }
            Token::Identifier(name) => {
                if *self.peek() == Token::LParen {
                    self.advance();
                    let mut args = Vec::new();
                    if *self.peek() != Token::RParen {
                        loop {
                            args.push(self.parse_expression()?);
                            if *self.peek() == Token::Comma {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Node::Call {
                        name: name.to_lowercase(),
                        args,
                        value: Value::Invalid,
                    })
                } else if let Some(v) = named_constant(&name.to_lowercase()) {
                    Ok(Node::Identifier { value: v })
                } else {
                    Err(ArchiverError::expression(format!("unknown identifier: {name}")))
                }
            }
            other => Err(ArchiverError::expression(format!("unexpected token: {other:?}"))),
        }
    }
}

fn binary(op: BinOp, lhs: Node, rhs: Node) -> Node {
    Node::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        value: Value::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_precedence() {
        let node = Parser::parse("1 + 2 * 3").unwrap();
        // Evaluate by feeding a dummy update since there are no keyword refs.
        let mut node = node;
        node.update("nothing.here", &[]).unwrap();
        // Constants never change, so force an evaluation path instead:
        assert!(matches!(node, Node::Binary { op: BinOp::Add, .. }));
    }

    #[test]
    fn parses_keyvalue_with_member() {
        let node = Parser::parse("tcc.axepos.az").unwrap();
        match node {
            Node::KeyValue { tag, .. } => assert_eq!(tag, "tcc.axepos"),
            _ => panic!("expected KeyValue"),
        }
    }

    #[test]
    fn parses_when_expression() {
        let node = Parser::parse("x.y when a.b").unwrap();
        assert!(matches!(node, Node::When { .. }));
    }

    #[test]
    fn parses_call_with_two_args() {
        let node = Parser::parse("pow(a.b, 2)").unwrap();
        match node {
            Node::Call { name, args, .. } => {
                assert_eq!(name, "pow");
                assert_eq!(args.len(), 2);
            }
            _ => panic!("expected Call"),
        }
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(Parser::parse("1 + 2 3").is_err());
    }
}
