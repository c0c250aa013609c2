//! Expression text parser
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparison.

use super::expression::{CompareOp, Expression};
use crate::core::error::{RequestError, StaResult};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Number(serde_json::Number),
    Open,
    Close,
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '\'' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string".to_string()),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            s.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || matches!(chars[i], '.' | 'e' | 'E')
                        || (matches!(chars[i], '-' | '+') && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal
                    .parse::<i64>()
                    .map(serde_json::Number::from)
                    .ok()
                    .or_else(|| literal.parse::<f64>().ok().and_then(serde_json::Number::from_f64))
                    .ok_or_else(|| format!("bad number '{literal}'"))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphanumeric() || matches!(c, '_' | '@' | '$') => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '@' | '.' | '/' | '$'))
                {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek_word(&self) -> Option<&str> {
        match self.tokens.get(self.pos) {
            Some(Token::Word(w)) => Some(w),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or(&mut self) -> Result<Expression, String> {
        let mut left = self.and()?;
        while self.peek_word() == Some("or") {
            self.pos += 1;
            left = left.or(self.and()?);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expression, String> {
        let mut left = self.not()?;
        while self.peek_word() == Some("and") {
            self.pos += 1;
            left = left.and(self.not()?);
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expression, String> {
        if self.peek_word() == Some("not") {
            self.pos += 1;
            return Ok(Expression::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expression, String> {
        let left = self.primary()?;
        if let Some(op) = self.peek_word().and_then(CompareOp::from_keyword) {
            self.pos += 1;
            let right = self.primary()?;
            return Ok(Expression::compare(op, left, right));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expression, String> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.or()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(Token::Str(s)) => Ok(Expression::Constant(Value::String(s))),
            Some(Token::Number(n)) => Ok(Expression::Constant(Value::Number(n))),
            Some(Token::Word(w)) => Ok(match w.as_str() {
                "true" => Expression::Constant(Value::Bool(true)),
                "false" => Expression::Constant(Value::Bool(false)),
                "null" => Expression::Constant(Value::Null),
                "and" | "or" | "not" => return Err(format!("unexpected '{w}'")),
                _ => Expression::Path(w.split('/').map(str::to_string).collect()),
            }),
            Some(Token::Close) => Err("unexpected ')'".to_string()),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// Parse expression text such as `name eq 'x' and (id gt 3 or not active)`
pub fn parse_expression(text: &str) -> StaResult<Expression> {
    let tokens = tokenize(text).map_err(|m| RequestError::query(format!("{m} in '{text}'")))?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser
        .or()
        .map_err(|m| RequestError::query(format!("{m} in '{text}'")))?;
    if parser.pos < parser.tokens.len() {
        return Err(RequestError::query(format!("trailing input in '{text}'")).into());
    }
    Ok(expr)
}
