//! A restricted boolean expression language for step `condition`s.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr   := or
//! or     := and ( "||" and )*
//! and    := unary ( "&&" unary )*
//! unary  := "!" unary | cmp
//! cmp    := atom ( ("==" | "!=") atom )?
//! atom   := "true" | "false" | number | string | path | "(" expr ")"
//! ```
//!
//! No function calls, no loops, no arbitrary code — exactly what the Design
//! Notes (`spec.md` §9) ask for in place of a general expression evaluator.
//! An unparseable condition is a definition error, caught by [`parse`] at
//! workflow load time.

use serde_json::Value;

use crate::error::{Result, RuntimeError};
use crate::workflow::template::lookup;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Value),
    Path(String),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

struct Tokens<'a> {
    src: &'a str,
    pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    True,
    False,
    Number(f64),
    Str(String),
    Path(String),
    Not,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    LParen,
    RParen,
    End,
}

impl<'a> Tokens<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn next(&mut self) -> Result<Tok> {
        self.skip_ws();
        let Some(c) = self.peek_char() else {
            return Ok(Tok::End);
        };
        match c {
            '(' => {
                self.pos += 1;
                Ok(Tok::LParen)
            }
            ')' => {
                self.pos += 1;
                Ok(Tok::RParen)
            }
            '!' => {
                self.pos += 1;
                if self.peek_char() == Some('=') {
                    self.pos += 1;
                    Ok(Tok::NotEq)
                } else {
                    Ok(Tok::Not)
                }
            }
            '=' => {
                self.pos += 1;
                if self.peek_char() == Some('=') {
                    self.pos += 1;
                    Ok(Tok::EqEq)
                } else {
                    Err(RuntimeError::usage("expected '==', found single '='"))
                }
            }
            '&' => {
                self.pos += 1;
                if self.peek_char() == Some('&') {
                    self.pos += 1;
                    Ok(Tok::AndAnd)
                } else {
                    Err(RuntimeError::usage("expected '&&', found single '&'"))
                }
            }
            '|' => {
                self.pos += 1;
                if self.peek_char() == Some('|') {
                    self.pos += 1;
                    Ok(Tok::OrOr)
                } else {
                    Err(RuntimeError::usage("expected '||', found single '|'"))
                }
            }
            '\'' | '"' => {
                let quote = c;
                self.pos += c.len_utf8();
                let start = self.pos;
                while self.peek_char().is_some_and(|ch| ch != quote) {
                    self.pos += self.peek_char().unwrap().len_utf8();
                }
                if self.peek_char() != Some(quote) {
                    return Err(RuntimeError::usage("unterminated string literal in condition"));
                }
                let lit = self.src[start..self.pos].to_string();
                self.pos += quote.len_utf8();
                Ok(Tok::Str(lit))
            }
            c if c.is_ascii_digit() || (c == '-' && self.src[self.pos + 1..].starts_with(|d: char| d.is_ascii_digit())) => {
                let start = self.pos;
                self.pos += c.len_utf8();
                while self.peek_char().is_some_and(|d| d.is_ascii_digit() || d == '.') {
                    self.pos += 1;
                }
                let text = &self.src[start..self.pos];
                text.parse::<f64>()
                    .map(Tok::Number)
                    .map_err(|_| RuntimeError::usage(format!("invalid number literal '{text}'")))
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => {
                let start = self.pos;
                while self.peek_char().is_some_and(|d| d.is_alphanumeric() || d == '_' || d == '.') {
                    self.pos += self.peek_char().unwrap().len_utf8();
                }
                let word = &self.src[start..self.pos];
                match word {
                    "true" => Ok(Tok::True),
                    "false" => Ok(Tok::False),
                    _ => Ok(Tok::Path(word.to_string())),
                }
            }
            other => Err(RuntimeError::usage(format!("unexpected character '{other}' in condition"))),
        }
    }
}

struct Parser<'a> {
    toks: Tokens<'a>,
    cur: Tok,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self> {
        let mut toks = Tokens::new(src);
        let cur = toks.next()?;
        Ok(Self { toks, cur })
    }

    fn advance(&mut self) -> Result<()> {
        self.cur = self.toks.next()?;
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.cur == Tok::OrOr {
            self.advance()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while self.cur == Tok::AndAnd {
            self.advance()?;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.cur == Tok::Not {
            self.advance()?;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let left = self.parse_atom()?;
        match self.cur {
            Tok::EqEq => {
                self.advance()?;
                let right = self.parse_atom()?;
                Ok(Expr::Eq(Box::new(left), Box::new(right)))
            }
            Tok::NotEq => {
                self.advance()?;
                let right = self.parse_atom()?;
                Ok(Expr::Ne(Box::new(left), Box::new(right)))
            }
            _ => Ok(left),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let expr = match self.cur.clone() {
            Tok::True => Expr::Lit(Value::Bool(true)),
            Tok::False => Expr::Lit(Value::Bool(false)),
            Tok::Number(n) => Expr::Lit(serde_json::json!(n)),
            Tok::Str(s) => Expr::Lit(Value::String(s)),
            Tok::Path(p) => Expr::Path(p),
            Tok::LParen => {
                self.advance()?;
                let inner = self.parse_expr()?;
                if self.cur != Tok::RParen {
                    return Err(RuntimeError::usage("expected closing ')' in condition"));
                }
                self.advance()?;
                return Ok(inner);
            }
            other => return Err(RuntimeError::usage(format!("unexpected token {other:?} in condition"))),
        };
        self.advance()?;
        Ok(expr)
    }
}

/// Parses a condition expression, returning a definition-time `usage` error
/// on anything unparseable.
pub fn parse(src: &str) -> Result<Expr> {
    let mut parser = Parser::new(src)?;
    let expr = parser.parse_expr()?;
    if parser.cur != Tok::End {
        return Err(RuntimeError::usage(format!("trailing tokens after condition: {:?}", parser.cur)));
    }
    Ok(expr)
}

fn resolve(expr: &Expr, vars: &Value) -> Value {
    match expr {
        Expr::Lit(v) => v.clone(),
        Expr::Path(p) => {
            let path = p.strip_prefix("vars.").unwrap_or(p);
            lookup(vars, path).cloned().unwrap_or(Value::Null)
        }
        Expr::Not(inner) => Value::Bool(!truthy(&resolve(inner, vars))),
        Expr::Eq(a, b) => Value::Bool(resolve(a, vars) == resolve(b, vars)),
        Expr::Ne(a, b) => Value::Bool(resolve(a, vars) != resolve(b, vars)),
        Expr::And(a, b) => Value::Bool(truthy(&resolve(a, vars)) && truthy(&resolve(b, vars))),
        Expr::Or(a, b) => Value::Bool(truthy(&resolve(a, vars)) || truthy(&resolve(b, vars))),
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Evaluates a parsed condition against the run's variable scope.
pub fn eval(expr: &Expr, vars: &Value) -> bool {
    truthy(&resolve(expr, vars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_over_path_and_literal() {
        let expr = parse("vars.step.1.ok == true").unwrap();
        let vars = json!({"step": [{}, {"ok": true}]});
        assert!(eval(&expr, &vars));
    }

    #[test]
    fn and_or_not_precedence() {
        let expr = parse("!vars.a && vars.b || vars.c").unwrap();
        assert!(eval(&expr, &json!({"a": false, "b": true, "c": false})));
        assert!(!eval(&expr, &json!({"a": true, "b": true, "c": false})));
        assert!(eval(&expr, &json!({"a": true, "b": false, "c": true})));
    }

    #[test]
    fn string_literal_equality() {
        let expr = parse("vars.trigger.status != 'ok'").unwrap();
        assert!(eval(&expr, &json!({"trigger": {"status": "error"}})));
        assert!(!eval(&expr, &json!({"trigger": {"status": "ok"}})));
    }

    #[test]
    fn parenthesized_grouping_overrides_precedence() {
        let expr = parse("!(vars.a && vars.b)").unwrap();
        assert!(eval(&expr, &json!({"a": true, "b": false})));
        assert!(!eval(&expr, &json!({"a": true, "b": true})));
    }

    #[test]
    fn missing_path_resolves_to_null_and_is_falsy() {
        let expr = parse("vars.missing == true").unwrap();
        assert!(!eval(&expr, &json!({})));
    }

    #[test]
    fn unparseable_condition_is_a_definition_error() {
        let err = parse("vars.a &&").unwrap_err();
        assert_eq!(err.kind, crate::error::Kind::Usage);

        let err2 = parse("vars.a == )").unwrap_err();
        assert_eq!(err2.kind, crate::error::Kind::Usage);
    }
}
