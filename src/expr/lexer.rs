//! Lexer for the monitor expression language
//!
//! Token set mirrors `python/archiver/expression.py`'s PLY token list:
//! identifiers (with `when` special-cased as a keyword), binary/hex/decimal/
//! float constants, single- or double-quoted string literals with
//! backslash escapes, and the multi-character operators `&& || == != <= >=`.

use crate::errors::{ArchiverError, ArchiverResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    IntConst(i64),
    FloatConst(f64),
    StringConst(String),
    When,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Lt,
    Gt,
    Leq,
    Geq,
    Eq,
    Neq,
    AndAnd,
    OrOr,
    Question,
    Colon,
    Dot,
    Comma,
    LParen,
    RParen,
    Eof,
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            chars: src.char_indices().peekable(),
            src,
        }
    }

    pub fn tokenize(mut self) -> ArchiverResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let done = tok == Token::Eof;
            tokens.push(tok);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn next_token(&mut self) -> ArchiverResult<Token> {
        self.skip_whitespace();
        let Some((start, c)) = self.chars.next() else {
            return Ok(Token::Eof);
        };
        match c {
            '+' => Ok(Token::Plus),
            '-' => Ok(Token::Minus),
            '*' => Ok(Token::Star),
            '/' => Ok(Token::Slash),
            '%' => Ok(Token::Percent),
            '?' => Ok(Token::Question),
            ':' => Ok(Token::Colon),
            '.' => Ok(Token::Dot),
            ',' => Ok(Token::Comma),
            '(' => Ok(Token::LParen),
            ')' => Ok(Token::RParen),
            '!' => {
                if self.peek_char() == Some('=') {
                    self.chars.next();
                    Ok(Token::Neq)
                } else {
                    Ok(Token::Bang)
                }
            }
            '<' => {
                if self.peek_char() == Some('=') {
                    self.chars.next();
                    Ok(Token::Leq)
                } else {
                    Ok(Token::Lt)
                }
            }
            '>' => {
                if self.peek_char() == Some('=') {
                    self.chars.next();
                    Ok(Token::Geq)
                } else {
                    Ok(Token::Gt)
                }
            }
            '=' => {
                if self.peek_char() == Some('=') {
                    self.chars.next();
                    Ok(Token::Eq)
                } else {
                    Err(ArchiverError::expression("unexpected '=' (did you mean '=='?)"))
                }
            }
            '&' => {
                if self.peek_char() == Some('&') {
                    self.chars.next();
                    Ok(Token::AndAnd)
                } else {
                    Err(ArchiverError::expression("unexpected '&' (did you mean '&&'?)"))
                }
            }
            '|' => {
                if self.peek_char() == Some('|') {
                    self.chars.next();
                    Ok(Token::OrOr)
                } else {
                    Err(ArchiverError::expression("unexpected '|' (did you mean '||'?)"))
                }
            }
            '\'' | '"' => self.read_string(c),
            c if c.is_ascii_digit() => self.read_number(start),
            c if c.is_alphabetic() || c == '_' => self.read_identifier(start),
            other => Err(ArchiverError::expression(format!("unexpected character '{other}'"))),
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    fn read_string(&mut self, quote: char) -> ArchiverResult<Token> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => return Ok(Token::StringConst(out)),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, c)) => out.push(c),
                    None => return Err(ArchiverError::expression("unterminated escape in string literal")),
                },
                Some((_, c)) => out.push(c),
                None => return Err(ArchiverError::expression("unterminated string literal")),
            }
        }
    }

    fn read_number(&mut self, start: usize) -> ArchiverResult<Token> {
        let mut end = start + 1;
        let first_two: String = self.src[start..].chars().take(2).collect();
        if first_two == "0b" || first_two == "0B" {
            self.chars.next();
            end += 1;
            while let Some(c) = self.peek_char() {
                if c == '0' || c == '1' {
                    self.chars.next();
                    end += c.len_utf8();
                } else {
                    break;
                }
            }
            let digits = &self.src[start + 2..end];
            let value = i64::from_str_radix(digits, 2)
                .map_err(|_| ArchiverError::expression("invalid binary constant"))?;
            return Ok(Token::IntConst(value));
        }
        if first_two == "0x" || first_two == "0X" {
            self.chars.next();
            end += 1;
            while let Some(c) = self.peek_char() {
                if c.is_ascii_hexdigit() {
                    self.chars.next();
                    end += c.len_utf8();
                } else {
                    break;
                }
            }
            let digits = &self.src[start + 2..end];
            let value = i64::from_str_radix(digits, 16)
                .map_err(|_| ArchiverError::expression("invalid hex constant"))?;
            return Ok(Token::IntConst(value));
        }

        let mut is_float = false;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.chars.next();
                end += c.len_utf8();
            } else if c == '.' && !is_float {
                is_float = true;
                self.chars.next();
                end += c.len_utf8();
            } else if (c == 'e' || c == 'E') && !is_float {
                is_float = true;
                self.chars.next();
                end += c.len_utf8();
                if matches!(self.peek_char(), Some('+') | Some('-')) {
                    let (_, sign) = self.chars.next().unwrap();
                    end += sign.len_utf8();
                }
            } else {
                break;
            }
        }
        let text = &self.src[start..end];
        if is_float {
            text.parse::<f64>()
                .map(Token::FloatConst)
                .map_err(|_| ArchiverError::expression(format!("invalid float constant: {text}")))
        } else {
            text.parse::<i64>()
                .map(Token::IntConst)
                .map_err(|_| ArchiverError::expression(format!("invalid decimal constant: {text}")))
        }
    }

    fn read_identifier(&mut self, start: usize) -> ArchiverResult<Token> {
        let mut end = start + 1;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                self.chars.next();
                end += c.len_utf8();
            } else {
                break;
            }
        }
        let text = &self.src[start..end];
        if text == "when" {
            Ok(Token::When)
        } else {
            Ok(Token::Identifier(text.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_keyword_reference_and_arithmetic() {
        let tokens = Lexer::new("a.b.val + 1").tokenize().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Identifier("a".into()),
                Token::Dot,
                Token::Identifier("b".into()),
                Token::Dot,
                Token::Identifier("val".into()),
                Token::Plus,
                Token::IntConst(1),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn when_is_a_keyword_not_an_identifier() {
        let tokens = Lexer::new("x when y").tokenize().unwrap();
        assert_eq!(tokens[1], Token::When);
    }

    #[test]
    fn hex_and_binary_constants() {
        let tokens = Lexer::new("0x1F + 0b101").tokenize().unwrap();
        assert_eq!(tokens[0], Token::IntConst(31));
        assert_eq!(tokens[2], Token::IntConst(5));
    }
}
