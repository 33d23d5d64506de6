//! Formula expressions.
//!
//! A small expression language over the fields of one row:
//!
//! ```text
//! expr    := or
//! or      := and ("OR" and)*
//! and     := not ("AND" not)*
//! not     := "NOT" not | cmp
//! cmp     := add (("=" | "!=" | "<>" | "<" | "<=" | ">" | ">=") add)?
//! add     := mul (("+" | "-" | "||") mul)*
//! mul     := unary (("*" | "/") unary)*
//! unary   := "-" unary | primary
//! primary := number | string | TRUE | FALSE | NULL | ident | call | "(" expr ")"
//! call    := FUNCTION "(" expr ("," expr)* ")"
//! ```
//!
//! Expressions translate to SQL for the read view and evaluate directly
//! against a JSON row for the in-memory store.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde_json::{Map, Number, Value};
use thiserror::Error;

use super::sql::{quote_str, Ident};
use crate::catalog::FormulaResultType;
use crate::registry::number;

/// Formula parse error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {position}")]
pub struct FormulaError {
    /// What went wrong.
    pub message: String,
    /// Byte offset into the expression.
    pub position: usize,
}

impl FormulaError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Concatenate arguments, skipping nulls.
    Concat,
    /// Uppercase text.
    Upper,
    /// Lowercase text.
    Lower,
    /// Round to N decimal places (default 0).
    Round,
    /// Absolute value.
    Abs,
    /// First non-null argument.
    Coalesce,
    /// `IF(condition, then, else)`.
    If,
    /// Character length.
    Len,
}

impl Function {
    fn lookup(name: &str) -> Option<Function> {
        Some(match name.to_ascii_uppercase().as_str() {
            "CONCAT" => Function::Concat,
            "UPPER" => Function::Upper,
            "LOWER" => Function::Lower,
            "ROUND" => Function::Round,
            "ABS" => Function::Abs,
            "COALESCE" => Function::Coalesce,
            "IF" => Function::If,
            "LEN" => Function::Len,
            _ => return None,
        })
    }

    fn arity(&self) -> (usize, usize) {
        match self {
            Function::Upper | Function::Lower | Function::Abs | Function::Len => (1, 1),
            Function::Round => (1, 2),
            Function::If => (3, 3),
            Function::Concat | Function::Coalesce => (1, usize::MAX),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Function::Concat => "CONCAT",
            Function::Upper => "UPPER",
            Function::Lower => "LOWER",
            Function::Round => "ROUND",
            Function::Abs => "ABS",
            Function::Coalesce => "COALESCE",
            Function::If => "IF",
            Function::Len => "LEN",
        };
        f.write_str(name)
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn sql(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Concat => "||",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

/// Parsed formula expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaExpr {
    /// Field of the current row.
    Field(String),
    /// Numeric literal.
    Number(f64),
    /// String literal.
    Text(String),
    /// Boolean literal.
    Bool(bool),
    /// `NULL`
    Null,
    /// Arithmetic negation.
    Neg(Box<FormulaExpr>),
    /// Logical negation.
    Not(Box<FormulaExpr>),
    /// Binary operation.
    Binary {
        op: BinaryOp,
        left: Box<FormulaExpr>,
        right: Box<FormulaExpr>,
    },
    /// Function call.
    Call {
        function: Function,
        args: Vec<FormulaExpr>,
    },
}

impl FormulaExpr {
    /// Parse an expression.
    pub fn parse(source: &str) -> Result<FormulaExpr, FormulaError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: source.len(),
        };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some((_, at)) => Err(FormulaError::new("unexpected trailing input", at)),
        }
    }

    /// Field names referenced by the expression.
    pub fn references(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            FormulaExpr::Field(name) => {
                out.insert(name.as_str());
            }
            FormulaExpr::Neg(inner) | FormulaExpr::Not(inner) => inner.collect_references(out),
            FormulaExpr::Binary { left, right, .. } => {
                left.collect_references(out);
                right.collect_references(out);
            }
            FormulaExpr::Call { args, .. } => {
                for arg in args {
                    arg.collect_references(out);
                }
            }
            FormulaExpr::Number(_) | FormulaExpr::Text(_) | FormulaExpr::Bool(_) | FormulaExpr::Null => {}
        }
    }

    /// Translate to SQL; columns are qualified with `alias`.
    pub fn to_sql(&self, alias: &str) -> String {
        match self {
            FormulaExpr::Field(name) => format!("{alias}.{}", Ident(name)),
            FormulaExpr::Number(n) => number(*n),
            FormulaExpr::Text(s) => quote_str(s),
            FormulaExpr::Bool(b) => b.to_string(),
            FormulaExpr::Null => "NULL".to_string(),
            FormulaExpr::Neg(inner) => format!("(-{})", inner.to_sql(alias)),
            FormulaExpr::Not(inner) => format!("(NOT {})", inner.to_sql(alias)),
            FormulaExpr::Binary {
                op: BinaryOp::Div,
                left,
                right,
            } => format!(
                "({} / NULLIF({}, 0))",
                left.to_sql(alias),
                right.to_sql(alias)
            ),
            FormulaExpr::Binary { op, left, right } => format!(
                "({} {} {})",
                left.to_sql(alias),
                op.sql(),
                right.to_sql(alias)
            ),
            FormulaExpr::Call { function, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_sql(alias)).collect();
                match function {
                    Function::If => format!(
                        "(CASE WHEN {} THEN {} ELSE {} END)",
                        args[0], args[1], args[2]
                    ),
                    Function::Len => format!("LENGTH({})", args[0]),
                    Function::Round if args.len() == 2 => {
                        format!("ROUND(({})::numeric, {})", args[0], args[1])
                    }
                    Function::Round => format!("ROUND(({})::numeric)", args[0]),
                    other => format!("{other}({})", args.join(", ")),
                }
            }
        }
    }

    /// Evaluate against a row with SQL null semantics.
    pub fn evaluate(&self, row: &Map<String, Value>) -> Value {
        match self {
            FormulaExpr::Field(name) => row.get(name).cloned().unwrap_or(Value::Null),
            FormulaExpr::Number(n) => number_value(*n),
            FormulaExpr::Text(s) => Value::String(s.clone()),
            FormulaExpr::Bool(b) => Value::Bool(*b),
            FormulaExpr::Null => Value::Null,
            FormulaExpr::Neg(inner) => match as_f64(&inner.evaluate(row)) {
                Some(n) => number_value(-n),
                None => Value::Null,
            },
            FormulaExpr::Not(inner) => match inner.evaluate(row) {
                Value::Bool(b) => Value::Bool(!b),
                _ => Value::Null,
            },
            FormulaExpr::Binary { op, left, right } => {
                let left = left.evaluate(row);
                let right = right.evaluate(row);
                evaluate_binary(*op, &left, &right)
            }
            FormulaExpr::Call { function, args } => {
                let args: Vec<Value> = args.iter().map(|a| a.evaluate(row)).collect();
                evaluate_call(*function, &args)
            }
        }
    }
}

/// SQL cast applied to a formula's view column.
pub fn result_cast(result_type: FormulaResultType) -> &'static str {
    match result_type {
        FormulaResultType::Text => "TEXT",
        FormulaResultType::Number => "NUMERIC",
        FormulaResultType::Boolean => "BOOLEAN",
        FormulaResultType::Date => "DATE",
        FormulaResultType::Datetime => "TIMESTAMPTZ",
    }
}

/// Coerce an evaluated value to the declared result type.
pub fn coerce_result(value: Value, result_type: FormulaResultType) -> Value {
    match (result_type, value) {
        (_, Value::Null) => Value::Null,
        (FormulaResultType::Text, Value::String(s)) => Value::String(s),
        (FormulaResultType::Text, other) => Value::String(as_text(&other)),
        (FormulaResultType::Number, value) => match as_f64(&value) {
            Some(n) => number_value(n),
            None => Value::Null,
        },
        (FormulaResultType::Boolean, Value::Bool(b)) => Value::Bool(b),
        (FormulaResultType::Boolean, _) => Value::Null,
        (_, value) => value,
    }
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Compare two non-null values the way the database would.
pub(crate) fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(x), Ok(y)) if !a.is_empty() && !b.is_empty() => x.partial_cmp(&y),
            _ => Some(a.cmp(b)),
        },
        _ => match (as_f64(left), as_f64(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => Some(left.to_string().cmp(&right.to_string())),
        },
    }
}

fn evaluate_binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::And => match (left, right) {
            (Value::Bool(false), _) | (_, Value::Bool(false)) => Value::Bool(false),
            (Value::Bool(true), Value::Bool(true)) => Value::Bool(true),
            _ => Value::Null,
        },
        BinaryOp::Or => match (left, right) {
            (Value::Bool(true), _) | (_, Value::Bool(true)) => Value::Bool(true),
            (Value::Bool(false), Value::Bool(false)) => Value::Bool(false),
            _ => Value::Null,
        },
        _ if left.is_null() || right.is_null() => Value::Null,
        BinaryOp::Concat => Value::String(format!("{}{}", as_text(left), as_text(right))),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) else {
                return Value::Null;
            };
            match op {
                BinaryOp::Add => number_value(a + b),
                BinaryOp::Sub => number_value(a - b),
                BinaryOp::Mul => number_value(a * b),
                _ if b == 0.0 => Value::Null,
                _ => number_value(a / b),
            }
        }
        BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge => match compare_values(left, right) {
            Some(ordering) => Value::Bool(match op {
                BinaryOp::Eq => ordering == Ordering::Equal,
                BinaryOp::Ne => ordering != Ordering::Equal,
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }),
            None => Value::Null,
        },
    }
}

fn evaluate_call(function: Function, args: &[Value]) -> Value {
    match function {
        Function::Concat => Value::String(args.iter().map(as_text).collect()),
        Function::Upper => match &args[0] {
            Value::Null => Value::Null,
            v => Value::String(as_text(v).to_uppercase()),
        },
        Function::Lower => match &args[0] {
            Value::Null => Value::Null,
            v => Value::String(as_text(v).to_lowercase()),
        },
        Function::Len => match &args[0] {
            Value::Null => Value::Null,
            v => Value::from(as_text(v).chars().count() as u64),
        },
        Function::Abs => as_f64(&args[0]).map_or(Value::Null, |n| number_value(n.abs())),
        Function::Round => {
            let digits = args.get(1).and_then(as_f64).unwrap_or(0.0) as i32;
            as_f64(&args[0]).map_or(Value::Null, |n| {
                let factor = 10f64.powi(digits);
                number_value((n * factor).round() / factor)
            })
        }
        Function::Coalesce => args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null),
        Function::If => match &args[0] {
            Value::Bool(true) => args[1].clone(),
            _ => args[2].clone(),
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(at, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && source[at + 1..].starts_with(|d: char| d.is_ascii_digit())) {
            let mut end = at;
            while let Some(&(i, d)) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    end = i + d.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let n = source[at..end]
                .parse()
                .map_err(|_| FormulaError::new("invalid number", at))?;
            tokens.push((Token::Number(n), at));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let mut end = at;
            while let Some(&(i, d)) = chars.peek() {
                if d.is_ascii_alphanumeric() || d == '_' {
                    end = i + d.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push((Token::Ident(source[at..end].to_string()), at));
            continue;
        }
        if c == '\'' || c == '"' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some((_, d)) = chars.next() {
                if d == c {
                    if chars.peek().map(|&(_, n)| n) == Some(c) {
                        chars.next();
                        text.push(c);
                    } else {
                        closed = true;
                        break;
                    }
                } else {
                    text.push(d);
                }
            }
            if !closed {
                return Err(FormulaError::new("unterminated string literal", at));
            }
            tokens.push((Token::Text(text), at));
            continue;
        }

        chars.next();
        let next = chars.peek().map(|&(_, n)| n);
        let token = match (c, next) {
            ('(', _) => Token::LParen,
            (')', _) => Token::RParen,
            (',', _) => Token::Comma,
            ('|', Some('|')) => {
                chars.next();
                Token::Op("||")
            }
            ('!', Some('=')) => {
                chars.next();
                Token::Op("!=")
            }
            ('<', Some('>')) => {
                chars.next();
                Token::Op("!=")
            }
            ('<', Some('=')) => {
                chars.next();
                Token::Op("<=")
            }
            ('>', Some('=')) => {
                chars.next();
                Token::Op(">=")
            }
            ('=', Some('=')) => {
                chars.next();
                Token::Op("=")
            }
            ('=', _) => Token::Op("="),
            ('<', _) => Token::Op("<"),
            ('>', _) => Token::Op(">"),
            ('+', _) => Token::Op("+"),
            ('-', _) => Token::Op("-"),
            ('*', _) => Token::Op("*"),
            ('/', _) => Token::Op("/"),
            _ => return Err(FormulaError::new(format!("unexpected character {c:?}"), at)),
        };
        tokens.push((token, at));
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(t, at)| (t, *at))
    }

    fn position(&self) -> usize {
        self.peek().map_or(self.end, |(_, at)| at)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some((Token::Ident(word), _)) if word.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some((Token::Op(op), _)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), FormulaError> {
        let at = self.position();
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            _ => Err(FormulaError::new(format!("expected {what}"), at)),
        }
    }

    fn parse_or(&mut self) -> Result<FormulaExpr, FormulaError> {
        let mut expr = self.parse_and()?;
        while self.eat_keyword("OR") {
            let right = self.parse_and()?;
            expr = binary(BinaryOp::Or, expr, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<FormulaExpr, FormulaError> {
        let mut expr = self.parse_not()?;
        while self.eat_keyword("AND") {
            let right = self.parse_not()?;
            expr = binary(BinaryOp::And, expr, right);
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<FormulaExpr, FormulaError> {
        if self.eat_keyword("NOT") {
            return Ok(FormulaExpr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<FormulaExpr, FormulaError> {
        let left = self.parse_additive()?;
        let op = match self.eat_op(&["=", "!=", "<", "<=", ">", ">="]) {
            Some("=") => BinaryOp::Eq,
            Some("!=") => BinaryOp::Ne,
            Some("<") => BinaryOp::Lt,
            Some("<=") => BinaryOp::Le,
            Some(">") => BinaryOp::Gt,
            Some(">=") => BinaryOp::Ge,
            _ => return Ok(left),
        };
        let right = self.parse_additive()?;
        Ok(binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<FormulaExpr, FormulaError> {
        let mut expr = self.parse_multiplicative()?;
        while let Some(op) = self.eat_op(&["+", "-", "||"]) {
            let op = match op {
                "+" => BinaryOp::Add,
                "-" => BinaryOp::Sub,
                _ => BinaryOp::Concat,
            };
            let right = self.parse_multiplicative()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> Result<FormulaExpr, FormulaError> {
        let mut expr = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/"]) {
            let op = if op == "*" { BinaryOp::Mul } else { BinaryOp::Div };
            let right = self.parse_unary()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<FormulaExpr, FormulaError> {
        if self.eat_op(&["-"]).is_some() {
            return Ok(FormulaExpr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<FormulaExpr, FormulaError> {
        let at = self.position();
        match self.advance() {
            Some(Token::Number(n)) => Ok(FormulaExpr::Number(n)),
            Some(Token::Text(s)) => Ok(FormulaExpr::Text(s)),
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(Token::Ident(word)) => {
                if matches!(self.peek(), Some((Token::LParen, _))) {
                    let function = Function::lookup(&word)
                        .ok_or_else(|| FormulaError::new(format!("unknown function {word}"), at))?;
                    self.pos += 1;
                    return self.parse_call(function, at);
                }
                Ok(match word.to_ascii_uppercase().as_str() {
                    "TRUE" => FormulaExpr::Bool(true),
                    "FALSE" => FormulaExpr::Bool(false),
                    "NULL" => FormulaExpr::Null,
                    "AND" | "OR" | "NOT" => {
                        return Err(FormulaError::new(format!("unexpected keyword {word}"), at))
                    }
                    _ => FormulaExpr::Field(word),
                })
            }
            Some(_) => Err(FormulaError::new("unexpected token", at)),
            None => Err(FormulaError::new("unexpected end of expression", at)),
        }
    }

    fn parse_call(&mut self, function: Function, at: usize) -> Result<FormulaExpr, FormulaError> {
        let mut args = Vec::new();
        if !matches!(self.peek(), Some((Token::RParen, _))) {
            loop {
                args.push(self.parse_or()?);
                if matches!(self.peek(), Some((Token::Comma, _))) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')'")?;

        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            return Err(FormulaError::new(
                format!("{function} takes {}", arity_text(min, max)),
                at,
            ));
        }
        Ok(FormulaExpr::Call { function, args })
    }
}

fn arity_text(min: usize, max: usize) -> String {
    match (min, max) {
        (a, b) if a == b => format!("{a} argument(s)"),
        (a, usize::MAX) => format!("at least {a} argument(s)"),
        (a, b) => format!("{a} to {b} arguments"),
    }
}

fn binary(op: BinaryOp, left: FormulaExpr, right: FormulaExpr) -> FormulaExpr {
    FormulaExpr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_parse_and_references() {
        let expr = FormulaExpr::parse("CONCAT(first_name, ' ', last_name)").unwrap();
        let refs: Vec<&str> = expr.references().into_iter().collect();
        assert_eq!(refs, vec!["first_name", "last_name"]);
    }

    #[test]
    fn test_precedence() {
        let expr = FormulaExpr::parse("price * quantity + 1").unwrap();
        assert_eq!(
            expr.to_sql("t"),
            "((t.\"price\" * t.\"quantity\") + 1)"
        );

        let expr = FormulaExpr::parse("NOT done AND a > 2 OR b").unwrap();
        assert_eq!(
            expr.to_sql("t"),
            "(((NOT t.\"done\") AND (t.\"a\" > 2)) OR t.\"b\")"
        );
    }

    #[test]
    fn test_sql_translation() {
        let expr = FormulaExpr::parse("IF(score >= 50, 'pass', 'fail')").unwrap();
        assert_eq!(
            expr.to_sql("t"),
            "(CASE WHEN (t.\"score\" >= 50) THEN 'pass' ELSE 'fail' END)"
        );
        let expr = FormulaExpr::parse("total / count").unwrap();
        assert_eq!(expr.to_sql("t"), "(t.\"total\" / NULLIF(t.\"count\", 0))");
        let expr = FormulaExpr::parse("ROUND(amount, 2)").unwrap();
        assert_eq!(expr.to_sql("t"), "ROUND((t.\"amount\")::numeric, 2)");
        let expr = FormulaExpr::parse("LEN(name) || 'x'").unwrap();
        assert_eq!(expr.to_sql("t"), "(LENGTH(t.\"name\") || 'x')");
    }

    #[test]
    fn test_parse_errors() {
        assert!(FormulaExpr::parse("1 +").is_err());
        assert!(FormulaExpr::parse("UPPER(a, b)").is_err());
        assert!(FormulaExpr::parse("FROB(a)").is_err());
        assert!(FormulaExpr::parse("'unterminated").is_err());
        assert!(FormulaExpr::parse("a b").is_err());
        assert!(FormulaExpr::parse("a ; b").is_err());
    }

    #[test]
    fn test_evaluate() {
        let r = row(json!({"first": "Ada", "last": "Lovelace", "price": 2.5, "qty": 4}));

        let expr = FormulaExpr::parse("CONCAT(first, ' ', last)").unwrap();
        assert_eq!(expr.evaluate(&r), json!("Ada Lovelace"));

        let expr = FormulaExpr::parse("price * qty").unwrap();
        assert_eq!(expr.evaluate(&r), json!(10));

        let expr = FormulaExpr::parse("UPPER(first) || missing").unwrap();
        assert_eq!(expr.evaluate(&r), Value::Null);

        let expr = FormulaExpr::parse("IF(qty > 3, 'bulk', 'single')").unwrap();
        assert_eq!(expr.evaluate(&r), json!("bulk"));

        let expr = FormulaExpr::parse("qty / 0").unwrap();
        assert_eq!(expr.evaluate(&r), Value::Null);

        let expr = FormulaExpr::parse("COALESCE(missing, ROUND(price))").unwrap();
        assert_eq!(expr.evaluate(&r), json!(3));
    }

    #[test]
    fn test_coerce_result() {
        assert_eq!(coerce_result(json!(5), FormulaResultType::Text), json!("5"));
        assert_eq!(coerce_result(json!("7"), FormulaResultType::Number), json!(7));
        assert_eq!(coerce_result(Value::Null, FormulaResultType::Text), Value::Null);
    }
}
