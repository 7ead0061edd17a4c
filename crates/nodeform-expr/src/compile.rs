//! Lexer and parser for the rule expression language.
//!
//! The grammar is a single precedence-climbing pass; dependency paths are
//! interned into the caller's [`DependencyTable`] as they are encountered,
//! so every rule on a node shares one slot table.

use serde_json::Value;
use thiserror::Error;

use crate::eval::{Ast, BinOp, CompiledExpr, DependencyTable, UnaryOp};

/// Compilation failure for a rule expression.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExprError {
    /// A character that starts no token.
    #[error("unexpected character {ch:?} at position {at} in {source_expr:?}")]
    UnexpectedChar {
        /// Offending character.
        ch: char,
        /// Character position in the expression.
        at: usize,
        /// The full expression.
        source_expr: String,
    },

    /// A string literal missing its closing quote.
    #[error("unterminated string literal starting at position {at} in {source_expr:?}")]
    UnterminatedString {
        /// Character position of the opening quote.
        at: usize,
        /// The full expression.
        source_expr: String,
    },

    /// A token in a position the grammar does not allow.
    #[error("unexpected token {token:?} in {source_expr:?}")]
    UnexpectedToken {
        /// Debug rendering of the token.
        token: String,
        /// The full expression.
        source_expr: String,
    },

    /// Input ended mid-expression.
    #[error("unexpected end of expression in {source_expr:?}")]
    UnexpectedEnd {
        /// The full expression.
        source_expr: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Path(String),
    Num(f64),
    Str(String),
    True,
    False,
    Null,
    Undefined,
    OrOr,
    AndAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    LParen,
    RParen,
    Question,
    Colon,
}

/// Compile `source` against a shared dependency table.
///
/// Every dependency path referenced by the expression is interned into
/// `table`; the returned [`CompiledExpr`] holds only slot indices.
pub fn compile(source: &str, table: &mut DependencyTable) -> Result<CompiledExpr, ExprError> {
    let tokens = lex(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        table,
    };
    let ast = parser.ternary()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::UnexpectedToken {
            token: format!("{:?}", parser.tokens[parser.pos]),
            source_expr: source.to_string(),
        });
    }
    Ok(CompiledExpr::new(source.to_string(), ast))
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

/// Characters that may continue a path token once one has started.
///
/// `*` is excluded: wildcard resolution is multi-match and only legal in
/// plain watch-path lists, never inside an expression. `-` is included so
/// prefixed paths can address kebab-case keys; a bare identifier stops at
/// `-` and binds it as subtraction instead.
fn is_path_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/' | '.' | '~')
}

fn lex(source: &str) -> Result<Vec<Tok>, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    // Whether the next token sits in operand position. Disambiguates `/`
    // (path anchor vs division) and unary minus.
    let mut expect_operand = true;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '(' => {
                tokens.push(Tok::LParen);
                expect_operand = true;
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                expect_operand = false;
                i += 1;
            }
            '?' => {
                tokens.push(Tok::Question);
                expect_operand = true;
                i += 1;
            }
            ':' => {
                tokens.push(Tok::Colon);
                expect_operand = true;
                i += 1;
            }
            '+' => {
                tokens.push(Tok::Plus);
                expect_operand = true;
                i += 1;
            }
            '-' => {
                tokens.push(Tok::Minus);
                expect_operand = true;
                i += 1;
            }
            '*' => {
                tokens.push(Tok::Star);
                expect_operand = true;
                i += 1;
            }
            '%' => {
                tokens.push(Tok::Percent);
                expect_operand = true;
                i += 1;
            }
            '/' => {
                if expect_operand {
                    let (path, next) = take_path(&chars, i);
                    tokens.push(Tok::Path(path));
                    expect_operand = false;
                    i = next;
                } else {
                    tokens.push(Tok::Slash);
                    expect_operand = true;
                    i += 1;
                }
            }
            '=' => {
                // ===, ==
                let mut j = i + 1;
                while j < chars.len() && chars[j] == '=' {
                    j += 1;
                }
                if j - i < 2 {
                    return Err(ExprError::UnexpectedChar {
                        ch: '=',
                        at: i,
                        source_expr: source.to_string(),
                    });
                }
                tokens.push(Tok::Eq);
                expect_operand = true;
                i = j;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    let mut j = i + 2;
                    if chars.get(j) == Some(&'=') {
                        j += 1;
                    }
                    tokens.push(Tok::Ne);
                    i = j;
                } else {
                    tokens.push(Tok::Bang);
                    i += 1;
                }
                expect_operand = true;
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Tok::Le);
                    i += 2;
                } else {
                    tokens.push(Tok::Lt);
                    i += 1;
                }
                expect_operand = true;
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Tok::Ge);
                    i += 2;
                } else {
                    tokens.push(Tok::Gt);
                    i += 1;
                }
                expect_operand = true;
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Tok::AndAnd);
                    i += 2;
                    expect_operand = true;
                } else {
                    return Err(ExprError::UnexpectedChar {
                        ch: '&',
                        at: i,
                        source_expr: source.to_string(),
                    });
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Tok::OrOr);
                    i += 2;
                    expect_operand = true;
                } else {
                    return Err(ExprError::UnexpectedChar {
                        ch: '|',
                        at: i,
                        source_expr: source.to_string(),
                    });
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut j = i + 1;
                let mut out = String::new();
                loop {
                    match chars.get(j) {
                        None => {
                            return Err(ExprError::UnterminatedString {
                                at: i,
                                source_expr: source.to_string(),
                            })
                        }
                        Some(&ch) if ch == quote => {
                            j += 1;
                            break;
                        }
                        Some('\\') => {
                            match chars.get(j + 1) {
                                Some('n') => out.push('\n'),
                                Some('t') => out.push('\t'),
                                Some(&esc) => out.push(esc),
                                None => {
                                    return Err(ExprError::UnterminatedString {
                                        at: i,
                                        source_expr: source.to_string(),
                                    })
                                }
                            }
                            j += 2;
                        }
                        Some(&ch) => {
                            out.push(ch);
                            j += 1;
                        }
                    }
                }
                tokens.push(Tok::Str(out));
                expect_operand = false;
                i = j;
            }
            '0'..='9' => {
                let mut j = i;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    j += 1;
                }
                let text: String = chars[i..j].iter().collect();
                let n = text.parse::<f64>().map_err(|_| ExprError::UnexpectedChar {
                    ch: c,
                    at: i,
                    source_expr: source.to_string(),
                })?;
                tokens.push(Tok::Num(n));
                expect_operand = false;
                i = j;
            }
            '.' | '#' | '@' => {
                let (path, next) = take_path(&chars, i);
                tokens.push(Tok::Path(path));
                expect_operand = false;
                i = next;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut j = i;
                while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                // A slash continues the identifier into a relative path.
                if chars.get(j) == Some(&'/') {
                    while j < chars.len() && is_path_continue(chars[j]) {
                        j += 1;
                    }
                }
                let word: String = chars[i..j].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "null" => Tok::Null,
                    "undefined" => Tok::Undefined,
                    _ => Tok::Path(word),
                });
                expect_operand = false;
                i = j;
            }
            other => {
                return Err(ExprError::UnexpectedChar {
                    ch: other,
                    at: i,
                    source_expr: source.to_string(),
                })
            }
        }
    }
    Ok(tokens)
}

fn take_path(chars: &[char], start: usize) -> (String, usize) {
    let mut j = start;
    // Anchor characters are always valid openers.
    if matches!(chars[j], '#' | '@') {
        j += 1;
    }
    while j < chars.len() && is_path_continue(chars[j]) {
        j += 1;
    }
    (chars[start..j].iter().collect(), j)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Tok>,
    pos: usize,
    table: &'a mut DependencyTable,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Result<Tok, ExprError> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ExprError::UnexpectedEnd {
                source_expr: self.source.to_string(),
            })?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), ExprError> {
        let got = self.bump()?;
        if &got == tok {
            Ok(())
        } else {
            Err(ExprError::UnexpectedToken {
                token: format!("{got:?}"),
                source_expr: self.source.to_string(),
            })
        }
    }

    fn ternary(&mut self) -> Result<Ast, ExprError> {
        let cond = self.or()?;
        if self.peek() == Some(&Tok::Question) {
            self.pos += 1;
            let then = self.ternary()?;
            self.expect(&Tok::Colon)?;
            let otherwise = self.ternary()?;
            return Ok(Ast::Conditional(
                Box::new(cond),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.and()?;
        while self.peek() == Some(&Tok::OrOr) {
            self.pos += 1;
            let rhs = self.and()?;
            lhs = Ast::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.equality()?;
        while self.peek() == Some(&Tok::AndAnd) {
            self.pos += 1;
            let rhs = self.equality()?;
            lhs = Ast::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Eq) => BinOp::Eq,
                Some(Tok::Ne) => BinOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.comparison()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Lt) => BinOp::Lt,
                Some(Tok::Le) => BinOp::Le,
                Some(Tok::Gt) => BinOp::Gt,
                Some(Tok::Ge) => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::Percent) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Ast, ExprError> {
        match self.peek() {
            Some(Tok::Bang) => {
                self.pos += 1;
                Ok(Ast::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            Some(Tok::Minus) => {
                self.pos += 1;
                Ok(Ast::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Ast, ExprError> {
        match self.bump()? {
            Tok::Num(n) => Ok(Ast::Literal(Some(crate::eval::number(n)))),
            Tok::Str(s) => Ok(Ast::Literal(Some(Value::String(s)))),
            Tok::True => Ok(Ast::Literal(Some(Value::Bool(true)))),
            Tok::False => Ok(Ast::Literal(Some(Value::Bool(false)))),
            Tok::Null => Ok(Ast::Literal(Some(Value::Null))),
            Tok::Undefined => Ok(Ast::Literal(None)),
            Tok::Path(path) => Ok(Ast::Dep(self.table.intern(&path))),
            Tok::LParen => {
                let inner = self.ternary()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            other => Err(ExprError::UnexpectedToken {
                token: format!("{other:?}"),
                source_expr: self.source.to_string(),
            }),
        }
    }
}
