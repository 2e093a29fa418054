//! `${{ }}` expression language
//!
//! Supports what workflow files use in practice: context paths
//! (`matrix.python-version`, `github.event_name`, `steps.build.outcome`),
//! string/number/bool/null literals, `!`, `&&`, `||`, comparisons, and the
//! functions `success()`, `failure()`, `always()`, `cancelled()`,
//! `contains()`, `startsWith()`, `endsWith()`.
//!
//! String comparison is case-insensitive; operands of different types are
//! compared as numbers.

use std::fmt;

use crate::error::FlowError;

// ============================================================================
// VALUES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl ExprValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            ExprValue::Null => false,
            ExprValue::Bool(b) => *b,
            ExprValue::Number(n) => *n != 0.0 && !n.is_nan(),
            ExprValue::String(s) => !s.is_empty(),
        }
    }

    fn as_number(&self) -> f64 {
        match self {
            ExprValue::Null => 0.0,
            ExprValue::Bool(b) => f64::from(u8::from(*b)),
            ExprValue::Number(n) => *n,
            ExprValue::String(s) if s.trim().is_empty() => 0.0,
            ExprValue::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        }
    }

    fn loose_eq(&self, other: &ExprValue) -> bool {
        match (self, other) {
            (ExprValue::String(a), ExprValue::String(b)) => a.eq_ignore_ascii_case(b),
            (ExprValue::Null, ExprValue::Null) => true,
            (ExprValue::Bool(a), ExprValue::Bool(b)) => a == b,
            _ => self.as_number() == other.as_number(),
        }
    }

    fn loose_cmp(&self, other: &ExprValue) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (ExprValue::String(a), ExprValue::String(b)) => {
                Some(a.to_lowercase().cmp(&b.to_lowercase()))
            }
            _ => self.as_number().partial_cmp(&other.as_number()),
        }
    }
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprValue::Null => Ok(()),
            ExprValue::Bool(b) => write!(f, "{}", b),
            ExprValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            ExprValue::Number(n) => write!(f, "{}", n),
            ExprValue::String(s) => f.write_str(s),
        }
    }
}

/// What an expression can see while being evaluated
pub trait Scope {
    /// Resolve a context path such as `["matrix", "python-version"]`
    fn lookup(&self, path: &[String]) -> Result<ExprValue, FlowError>;

    /// Whether any earlier step of this job instance failed
    fn prior_failure(&self) -> bool;
}

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(ExprValue),
    Path(Vec<String>),
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

const STATUS_FUNCTIONS: [&str; 4] = ["success", "failure", "always", "cancelled"];

impl Expr {
    pub fn parse(source: &str) -> Result<Expr, FlowError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or()?;
        match parser.peek() {
            Some((pos, tok)) => Err(FlowError::ExpressionParse {
                position: *pos,
                details: format!("unexpected {:?}", tok),
            }),
            None => Ok(expr),
        }
    }

    /// Whether the expression calls success()/failure()/always()/cancelled()
    pub fn uses_status_function(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Path(_) => false,
            Expr::Not(inner) => inner.uses_status_function(),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.uses_status_function() || rhs.uses_status_function()
            }
            Expr::Call { name, args } => {
                STATUS_FUNCTIONS.contains(&name.as_str())
                    || args.iter().any(Expr::uses_status_function)
            }
        }
    }

    pub fn eval(&self, scope: &dyn Scope) -> Result<ExprValue, FlowError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Path(path) => scope.lookup(path),
            Expr::Not(inner) => Ok(ExprValue::Bool(!inner.eval(scope)?.is_truthy())),
            Expr::Binary { op, lhs, rhs } => {
                let left = lhs.eval(scope)?;
                // && and || return an operand, short-circuiting like GitHub
                let result = match op {
                    BinaryOp::And if !left.is_truthy() => return Ok(left),
                    BinaryOp::Or if left.is_truthy() => return Ok(left),
                    BinaryOp::And | BinaryOp::Or => return rhs.eval(scope),
                    BinaryOp::Eq => left.loose_eq(&rhs.eval(scope)?),
                    BinaryOp::Ne => !left.loose_eq(&rhs.eval(scope)?),
                    BinaryOp::Lt => left.loose_cmp(&rhs.eval(scope)?).is_some_and(|o| o.is_lt()),
                    BinaryOp::Le => left.loose_cmp(&rhs.eval(scope)?).is_some_and(|o| o.is_le()),
                    BinaryOp::Gt => left.loose_cmp(&rhs.eval(scope)?).is_some_and(|o| o.is_gt()),
                    BinaryOp::Ge => left.loose_cmp(&rhs.eval(scope)?).is_some_and(|o| o.is_ge()),
                };
                Ok(ExprValue::Bool(result))
            }
            Expr::Call { name, args } => call(name, args, scope),
        }
    }
}

fn call(name: &str, args: &[Expr], scope: &dyn Scope) -> Result<ExprValue, FlowError> {
    let arity = |n: usize| -> Result<(), FlowError> {
        if args.len() == n {
            Ok(())
        } else {
            Err(FlowError::ExpressionParse {
                position: 0,
                details: format!("{}() takes {} argument(s), got {}", name, n, args.len()),
            })
        }
    };

    match name {
        "success" => {
            arity(0)?;
            Ok(ExprValue::Bool(!scope.prior_failure()))
        }
        "failure" => {
            arity(0)?;
            Ok(ExprValue::Bool(scope.prior_failure()))
        }
        "always" => {
            arity(0)?;
            Ok(ExprValue::Bool(true))
        }
        // Runs are never cancelled locally
        "cancelled" => {
            arity(0)?;
            Ok(ExprValue::Bool(false))
        }
        "contains" | "startsWith" | "endsWith" => {
            arity(2)?;
            let haystack = args[0].eval(scope)?.to_string().to_lowercase();
            let needle = args[1].eval(scope)?.to_string().to_lowercase();
            let found = match name {
                "contains" => haystack.contains(&needle),
                "startsWith" => haystack.starts_with(&needle),
                _ => haystack.ends_with(&needle),
            };
            Ok(ExprValue::Bool(found))
        }
        other => Err(FlowError::UnknownFunction {
            name: other.to_string(),
        }),
    }
}

// ============================================================================
// LEXER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Not,
    And,
    Or,
    Op(BinaryOp),
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, FlowError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let error = |position: usize, details: &str| FlowError::ExpressionParse {
        position,
        details: details.to_string(),
    };

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
                continue;
            }
            '.' => {
                tokens.push((start, Token::Dot));
                i += 1;
            }
            ',' => {
                tokens.push((start, Token::Comma));
                i += 1;
            }
            '(' => {
                tokens.push((start, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((start, Token::RParen));
                i += 1;
            }
            '[' => {
                tokens.push((start, Token::LBracket));
                i += 1;
            }
            ']' => {
                tokens.push((start, Token::RBracket));
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push((start, Token::Op(BinaryOp::Ne)));
                i += 2;
            }
            '!' => {
                tokens.push((start, Token::Not));
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push((start, Token::Op(BinaryOp::Eq)));
                i += 2;
            }
            '<' | '>' => {
                let eq = chars.get(i + 1) == Some(&'=');
                let op = match (c, eq) {
                    ('<', false) => BinaryOp::Lt,
                    ('<', true) => BinaryOp::Le,
                    ('>', false) => BinaryOp::Gt,
                    _ => BinaryOp::Ge,
                };
                tokens.push((start, Token::Op(op)));
                i += if eq { 2 } else { 1 };
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push((start, Token::And));
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push((start, Token::Or));
                i += 2;
            }
            '\'' => {
                // '' is an escaped quote
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(error(start, "unterminated string literal")),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push((start, Token::Str(value)));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| error(start, "invalid number"))?;
                tokens.push((start, Token::Num(n)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '-')
                {
                    i += 1;
                }
                tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
            }
            _ => return Err(error(start, &format!("unexpected character '{}'", c))),
        }
    }

    Ok(tokens)
}

// ============================================================================
// PARSER (precedence climbing: || < && < comparison < !)
// ============================================================================

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        tok
    }

    fn position(&self) -> usize {
        self.peek()
            .map(|(p, _)| *p)
            .or_else(|| self.tokens.last().map(|(p, _)| p + 1))
            .unwrap_or(0)
    }

    fn expect(&mut self, expected: Token) -> Result<(), FlowError> {
        let position = self.position();
        match self.advance() {
            Some(tok) if tok == expected => Ok(()),
            found => Err(FlowError::ExpressionParse {
                position,
                details: format!("expected {:?}, found {:?}", expected, found),
            }),
        }
    }

    fn or(&mut self) -> Result<Expr, FlowError> {
        let mut lhs = self.and()?;
        while self.peek_token() == Some(&Token::Or) {
            self.advance();
            let rhs = self.and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, FlowError> {
        let mut lhs = self.comparison()?;
        while self.peek_token() == Some(&Token::And) {
            self.advance();
            let rhs = self.comparison()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, FlowError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op)) = self.peek_token() {
            let op = *op;
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, FlowError> {
        if self.peek_token() == Some(&Token::Not) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, FlowError> {
        let position = self.position();
        match self.advance() {
            Some(Token::Str(s)) => Ok(Expr::Literal(ExprValue::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(ExprValue::Number(n))),
            Some(Token::LParen) => {
                let inner = self.or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(ExprValue::Bool(true))),
                "false" => Ok(Expr::Literal(ExprValue::Bool(false))),
                "null" => Ok(Expr::Literal(ExprValue::Null)),
                _ if self.peek_token() == Some(&Token::LParen) => {
                    self.advance();
                    let mut args = Vec::new();
                    if self.peek_token() != Some(&Token::RParen) {
                        args.push(self.or()?);
                        while self.peek_token() == Some(&Token::Comma) {
                            self.advance();
                            args.push(self.or()?);
                        }
                    }
                    self.expect(Token::RParen)?;
                    Ok(Expr::Call { name, args })
                }
                _ => self.path(name),
            },
            found => Err(FlowError::ExpressionParse {
                position,
                details: format!("unexpected {:?}", found),
            }),
        }
    }

    fn path(&mut self, head: String) -> Result<Expr, FlowError> {
        let mut segments = vec![head];
        loop {
            match self.peek_token() {
                Some(Token::Dot) => {
                    self.advance();
                    let position = self.position();
                    match self.advance() {
                        Some(Token::Ident(seg)) => segments.push(seg),
                        found => {
                            return Err(FlowError::ExpressionParse {
                                position,
                                details: format!("expected property name, found {:?}", found),
                            })
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let position = self.position();
                    match self.advance() {
                        Some(Token::Str(seg)) => segments.push(seg),
                        found => {
                            return Err(FlowError::ExpressionParse {
                                position,
                                details: format!("expected quoted property, found {:?}", found),
                            })
                        }
                    }
                    self.expect(Token::RBracket)?;
                }
                _ => return Ok(Expr::Path(segments)),
            }
        }
    }
}
