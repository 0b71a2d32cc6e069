//! Arithmetic expressions for the `evaluate` calculation.
//!
//! A recursive-descent parser produces an [`Expr`] tree that is evaluated
//! directly. Grammar, loosest binding first:
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/' | '%') unary)*
//! unary := '-' unary | power
//! power := atom ('^' unary)?
//! atom  := number | ident | ident '(' expr (',' expr)* ')' | '(' expr ')'
//! ```
//!
//! `^` is right-associative and binds tighter than unary minus, so `-2^2`
//! is `-4`. Functions: `abs`, `sqrt`, `min`, `max`, `round(x[, digits])`.

use serde_json::{Map, Value};
use tessera_core::EngineError;
use tessera_core::value::as_f64;
use thiserror::Error;

const MAX_SOURCE_LEN: usize = 1024;
const MAX_NESTING: usize = 64;

/// Expression errors.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    /// A character outside the grammar.
    #[error("unexpected character '{0}' at {1}")]
    UnexpectedChar(char, usize),
    /// Input ended early.
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    /// A token in the wrong place.
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    /// The expression is too long or too deeply nested.
    #[error("expression too complex")]
    TooComplex,
    /// A variable with no value.
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    /// A function outside the library.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    /// Wrong number of arguments.
    #[error("{name} expects {expected} argument(s), got {got}")]
    Arity {
        /// Function name.
        name: &'static str,
        /// Accepted argument count.
        expected: &'static str,
        /// Supplied argument count.
        got: usize,
    },
    /// Division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// The result is NaN or infinite.
    #[error("result is not a finite number")]
    NotFinite,
}

impl From<ExprError> for EngineError {
    fn from(err: ExprError) -> Self {
        match err {
            ExprError::UnknownFunction(_) => EngineError::UnknownOperation(err.to_string()),
            other => EngineError::InvalidParameters(other.to_string()),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `^`
    Pow,
}

/// Library functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    /// `abs(x)`
    Abs,
    /// `sqrt(x)`
    Sqrt,
    /// `min(x, ...)`
    Min,
    /// `max(x, ...)`
    Max,
    /// `round(x[, digits])`
    Round,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "abs" => Some(Func::Abs),
            "sqrt" => Some(Func::Sqrt),
            "min" => Some(Func::Min),
            "max" => Some(Func::Max),
            "round" => Some(Func::Round),
            _ => None,
        }
    }
}

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal number.
    Num(f64),
    /// Variable reference.
    Var(String),
    /// Unary minus.
    Neg(Box<Expr>),
    /// Binary operation.
    Bin(BinOp, Box<Expr>, Box<Expr>),
    /// Function call.
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            other => return Err(ExprError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(ExprError::UnexpectedToken(describe(&t))),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ExprError::TooComplex);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let mut lhs = self.term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek() {
            let op = if *c == '+' { BinOp::Add } else { BinOp::Sub };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= 1;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(c @ ('*' | '/' | '%'))) = self.peek() {
            let op = match *c {
                '*' => BinOp::Mul,
                '/' => BinOp::Div,
                _ => BinOp::Rem,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if let Some(Token::Op('-')) = self.peek() {
            self.pos += 1;
            self.enter()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.atom()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            self.enter()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Bin(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Ident(name)) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(Expr::Var(name));
                }
                let func = Func::from_name(&name).ok_or(ExprError::UnknownFunction(name))?;
                self.pos += 1;
                let mut args = vec![self.expr()?];
                while self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    args.push(self.expr()?);
                }
                self.expect(Token::RParen)?;
                Ok(Expr::Call(func, args))
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(other) => Err(ExprError::UnexpectedToken(describe(&other))),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Num(n) => n.to_string(),
        Token::Ident(s) => s.clone(),
        Token::Op(c) => c.to_string(),
        Token::LParen => "(".into(),
        Token::RParen => ")".into(),
        Token::Comma => ",".into(),
    }
}

/// Parse an expression.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    if source.len() > MAX_SOURCE_LEN {
        return Err(ExprError::TooComplex);
    }
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    match parser.next() {
        None => Ok(expr),
        Some(extra) => Err(ExprError::UnexpectedToken(describe(&extra))),
    }
}

impl Expr {
    /// Evaluate against numeric variables.
    pub fn eval(&self, vars: &Map<String, Value>) -> Result<f64, ExprError> {
        let n = match self {
            Expr::Num(n) => *n,
            Expr::Var(name) => vars
                .get(name)
                .and_then(as_f64)
                .ok_or_else(|| ExprError::UnknownVariable(name.clone()))?,
            Expr::Neg(inner) => -inner.eval(vars)?,
            Expr::Bin(op, lhs, rhs) => {
                let (a, b) = (lhs.eval(vars)?, rhs.eval(vars)?);
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div if b == 0.0 => return Err(ExprError::DivisionByZero),
                    BinOp::Div => a / b,
                    BinOp::Rem if b == 0.0 => return Err(ExprError::DivisionByZero),
                    BinOp::Rem => a % b,
                    BinOp::Pow => a.powf(b),
                }
            }
            Expr::Call(func, args) => {
                let values = args
                    .iter()
                    .map(|a| a.eval(vars))
                    .collect::<Result<Vec<f64>, _>>()?;
                call(*func, &values)?
            }
        };
        if n.is_finite() {
            Ok(n)
        } else {
            Err(ExprError::NotFinite)
        }
    }
}

fn call(func: Func, args: &[f64]) -> Result<f64, ExprError> {
    let arity = |name, expected, ok: bool| {
        if ok {
            Ok(())
        } else {
            Err(ExprError::Arity {
                name,
                expected,
                got: args.len(),
            })
        }
    };
    match func {
        Func::Abs => {
            arity("abs", "1", args.len() == 1)?;
            Ok(args[0].abs())
        }
        Func::Sqrt => {
            arity("sqrt", "1", args.len() == 1)?;
            Ok(args[0].sqrt())
        }
        Func::Min => {
            arity("min", "at least 1", !args.is_empty())?;
            Ok(args.iter().copied().fold(f64::INFINITY, f64::min))
        }
        Func::Max => {
            arity("max", "at least 1", !args.is_empty())?;
            Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max))
        }
        Func::Round => {
            arity("round", "1 or 2", matches!(args.len(), 1 | 2))?;
            let digits = args.get(1).copied().unwrap_or(0.0).clamp(0.0, 15.0) as i32;
            let scale = 10f64.powi(digits);
            Ok((args[0] * scale).round() / scale)
        }
    }
}

/// Parse and evaluate in one go.
pub fn evaluate(source: &str, vars: &Map<String, Value>) -> Result<f64, ExprError> {
    parse(source)?.eval(vars)
}
