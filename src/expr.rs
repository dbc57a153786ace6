//! Expression parser and evaluator for node parameters.
//!
//! Supports expressions like:
//! - `value > 90`
//! - `NOT IS_NAN(value) AND value >= 0`
//! - `SUM(values) / COUNT(values)`
//! - `JOIN_STRINGS(category_values, "_")`
//! - `"Bin " + TO_STRING(bin_limit_min)`
//! - `$"#Dataset" == 'control'`
//! - `label IS NOT NULL`

use crate::column::ColumnValue;
use crate::evaluator::Variables;
use crate::functions;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result value of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// Numeric interpretation. Booleans map to 1/0, text is parsed.
    pub fn as_f64(&self) -> Result<f64, String> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => parse_number(s)
                .ok_or_else(|| format!("Cannot convert '{}' to a number", s)),
            other => Err(format!("Expected a number, got {}", other.type_name())),
        }
    }

    /// Boolean interpretation. Non-zero numbers are true.
    pub fn as_bool(&self) -> Result<bool, String> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(format!("Expected a boolean, got {}", other.type_name())),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], String> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(format!("Expected a list, got {}", other.type_name())),
        }
    }

    /// Text rendering. `Null` renders as the empty string.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_display_string()).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Number(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::List(v.into_iter().map(Value::Number).collect())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v.into_iter().map(Value::String).collect())
    }
}

impl From<ColumnValue> for Value {
    fn from(v: ColumnValue) -> Self {
        match v {
            ColumnValue::Float64(n) => Value::Number(n),
            ColumnValue::String(s) => Value::String(s),
            ColumnValue::Null => Value::Null,
        }
    }
}

pub(crate) fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "inf" | "infinity" | "+inf" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        _ => trimmed.parse::<f64>().ok(),
    }
}

/// A parsed expression that can be evaluated against a set of variables.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Variable(String),
    List(Vec<Expr>),
    Call { function: String, args: Vec<Expr> },
    Negate(Box<Expr>),
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Eq,      // ==
    Ne,      // !=
    Lt,      // <
    Le,      // <=
    Gt,      // >
    Ge,      // >=
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

/// Token types for lexing
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    // Operators
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
    Caret,
    And,
    Or,
    Not,
    Is,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eof,
}

/// Lexer for tokenizing expression strings
struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.input.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '#' || c == '.' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        ident
    }

    fn read_number(&mut self) -> Result<Token, String> {
        let mut num_str = String::new();
        let mut seen_dot = false;
        let mut seen_exp = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                num_str.push(c);
                self.advance();
            } else if c == '.' && !seen_dot && !seen_exp {
                seen_dot = true;
                num_str.push(c);
                self.advance();
            } else if (c == 'e' || c == 'E') && !seen_exp {
                // Only an exponent if digits (optionally signed) follow
                let next = self.peek_next();
                let signed_digit = matches!(next, Some('+') | Some('-'))
                    && self.input.get(self.pos + 2).map_or(false, |d| d.is_ascii_digit());
                if next.map_or(false, |d| d.is_ascii_digit()) || signed_digit {
                    seen_exp = true;
                    num_str.push(c);
                    self.advance();
                    if signed_digit {
                        if let Some(sign) = self.advance() {
                            num_str.push(sign);
                        }
                    }
                } else {
                    break;
                }
            } else {
                break;
            }
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| format!("Invalid number literal: {}", num_str))
    }

    fn read_string(&mut self, quote: char) -> Result<String, String> {
        self.advance(); // consume opening quote
        let mut s = String::new();

        while let Some(c) = self.peek() {
            if c == quote {
                self.advance(); // consume closing quote
                return Ok(s);
            } else if c == '\\' {
                self.advance();
                if let Some(escaped) = self.advance() {
                    match escaped {
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        '\\' => s.push('\\'),
                        '\'' => s.push('\''),
                        '"' => s.push('"'),
                        _ => s.push(escaped),
                    }
                }
            } else {
                s.push(c);
                self.advance();
            }
        }

        Err("Unterminated string".to_string())
    }

    fn next_token(&mut self) -> Result<Token, String> {
        self.skip_whitespace();

        match self.peek() {
            None => Ok(Token::Eof),
            Some(c) => {
                match c {
                    '(' => { self.advance(); Ok(Token::LParen) }
                    ')' => { self.advance(); Ok(Token::RParen) }
                    '[' => { self.advance(); Ok(Token::LBracket) }
                    ']' => { self.advance(); Ok(Token::RBracket) }
                    ',' => { self.advance(); Ok(Token::Comma) }
                    '+' => { self.advance(); Ok(Token::Plus) }
                    '-' => { self.advance(); Ok(Token::Minus) }
                    '*' => { self.advance(); Ok(Token::Star) }
                    '/' => { self.advance(); Ok(Token::Slash) }
                    '%' => { self.advance(); Ok(Token::Percent) }
                    '^' => { self.advance(); Ok(Token::Caret) }
                    '=' => {
                        self.advance();
                        if self.peek() == Some('=') {
                            self.advance();
                        }
                        // Single = also means ==
                        Ok(Token::Eq)
                    }
                    '!' => {
                        self.advance();
                        if self.peek() == Some('=') {
                            self.advance();
                            Ok(Token::Ne)
                        } else {
                            Ok(Token::Not)
                        }
                    }
                    '<' => {
                        self.advance();
                        if self.peek() == Some('=') {
                            self.advance();
                            Ok(Token::Le)
                        } else {
                            Ok(Token::Lt)
                        }
                    }
                    '>' => {
                        self.advance();
                        if self.peek() == Some('=') {
                            self.advance();
                            Ok(Token::Ge)
                        } else {
                            Ok(Token::Gt)
                        }
                    }
                    '\'' | '"' => self.read_string(c).map(Token::String),
                    '$' => {
                        // $"variable with spaces" or $name
                        self.advance();
                        match self.peek() {
                            Some(q @ ('\'' | '"')) => self.read_string(q).map(Token::Ident),
                            Some(n) if n.is_alphabetic() || n == '_' || n == '#' => {
                                Ok(Token::Ident(self.read_ident()))
                            }
                            _ => Err("Expected variable name after '$'".to_string()),
                        }
                    }
                    _ if c.is_ascii_digit()
                        || (c == '.' && self.peek_next().map_or(false, |d| d.is_ascii_digit())) =>
                    {
                        self.read_number()
                    }
                    _ if c.is_alphabetic() || c == '_' || c == '#' => {
                        let ident = self.read_ident();
                        // Check for keywords
                        match ident.to_uppercase().as_str() {
                            "AND" => Ok(Token::And),
                            "OR" => Ok(Token::Or),
                            "NOT" => Ok(Token::Not),
                            "IS" => Ok(Token::Is),
                            "NULL" => Ok(Token::Null),
                            "TRUE" => Ok(Token::Bool(true)),
                            "FALSE" => Ok(Token::Bool(false)),
                            "INF" | "INFINITY" => Ok(Token::Number(f64::INFINITY)),
                            "NAN" => Ok(Token::Number(f64::NAN)),
                            _ => Ok(Token::Ident(ident)),
                        }
                    }
                    _ => Err(format!("Unexpected character: {}", c)),
                }
            }
        }
    }
}

/// Parser for building expression AST
struct Parser {
    lexer: Lexer,
    current: Token,
}

impl Parser {
    fn new(input: &str) -> Result<Self, String> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Parser { lexer, current })
    }

    fn advance(&mut self) -> Result<(), String> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        if &self.current == expected {
            self.advance()
        } else {
            Err(format!("Expected {:?}, got {:?}", expected, self.current))
        }
    }

    /// Parse a full expression
    fn parse(&mut self) -> Result<Expr, String> {
        self.parse_or()
    }

    /// Parse OR expressions (lowest precedence)
    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;

        while self.current == Token::Or {
            self.advance()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    /// Parse AND expressions
    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_not()?;

        while self.current == Token::And {
            self.advance()?;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    /// Parse NOT expressions
    fn parse_not(&mut self) -> Result<Expr, String> {
        if self.current == Token::Not {
            self.advance()?;
            let expr = self.parse_not()?;
            Ok(Expr::Not(Box::new(expr)))
        } else {
            self.parse_comparison()
        }
    }

    /// Parse comparison expressions, including IS [NOT] NULL
    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let left = self.parse_additive()?;

        if self.current == Token::Is {
            self.advance()?;
            if self.current == Token::Not {
                self.advance()?;
                if self.current != Token::Null {
                    return Err("Expected NULL after IS NOT".to_string());
                }
                self.advance()?;
                return Ok(Expr::IsNotNull(Box::new(left)));
            } else if self.current == Token::Null {
                self.advance()?;
                return Ok(Expr::IsNull(Box::new(left)));
            } else {
                return Err("Expected NULL or NOT NULL after IS".to_string());
            }
        }

        let op = match &self.current {
            Token::Eq => CompareOp::Eq,
            Token::Ne => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            _ => return Ok(left),
        };
        self.advance()?;
        let right = self.parse_additive()?;

        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current {
                Token::Plus => ArithmeticOp::Add,
                Token::Minus => ArithmeticOp::Sub,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.current {
                Token::Star => ArithmeticOp::Mul,
                Token::Slash => ArithmeticOp::Div,
                Token::Percent => ArithmeticOp::Rem,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.current {
            Token::Minus => {
                self.advance()?;
                let operand = self.parse_unary()?;
                Ok(Expr::Negate(Box::new(operand)))
            }
            Token::Plus => {
                self.advance()?;
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    /// Exponentiation binds tighter than unary minus and is right-associative
    fn parse_power(&mut self) -> Result<Expr, String> {
        let base = self.parse_primary()?;

        if self.current == Token::Caret {
            self.advance()?;
            let exponent = self.parse_unary()?;
            return Ok(Expr::Arithmetic {
                op: ArithmeticOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }

        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        let token = self.current.clone();
        match token {
            Token::Number(n) => {
                self.advance()?;
                Ok(Expr::Literal(Value::Number(n)))
            }
            Token::String(s) => {
                self.advance()?;
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::Bool(b) => {
                self.advance()?;
                Ok(Expr::Literal(Value::Bool(b)))
            }
            Token::Null => {
                self.advance()?;
                Ok(Expr::Literal(Value::Null))
            }
            Token::LParen => {
                self.advance()?;
                let expr = self.parse()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                self.advance()?;
                let items = self.parse_arguments(&Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Token::Ident(name) => {
                self.advance()?;
                if self.current == Token::LParen {
                    self.advance()?;
                    let args = self.parse_arguments(&Token::RParen)?;
                    Ok(Expr::Call {
                        function: name.to_uppercase(),
                        args,
                    })
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            other => Err(format!("Expected expression, got {:?}", other)),
        }
    }

    /// Parse a comma-separated list up to and including `close`
    fn parse_arguments(&mut self, close: &Token) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if &self.current == close {
            self.advance()?;
            return Ok(args);
        }
        loop {
            args.push(self.parse()?);
            if self.current == Token::Comma {
                self.advance()?;
            } else {
                self.expect(close)?;
                return Ok(args);
            }
        }
    }
}

/// Parse an expression string into an Expr AST.
pub fn parse_expr(input: &str) -> Result<Expr, String> {
    let mut parser = Parser::new(input)?;
    let expr = parser.parse()?;

    // Ensure we consumed all input
    if parser.current != Token::Eof {
        return Err(format!("Unexpected token after expression: {:?}", parser.current));
    }

    Ok(expr)
}

/// Evaluate an expression against a set of variables.
pub fn eval_expr(expr: &Expr, variables: &Variables) -> Result<Value, String> {
    eval_expr_fast(expr, &|name: &str| variables.get(name).cloned())
}

/// Evaluate an expression using a variable lookup function.
/// This avoids building a `Variables` map per row: the lookup function
/// can read table cells directly.
pub fn eval_expr_fast<F>(expr: &Expr, lookup: &F) -> Result<Value, String>
where
    F: Fn(&str) -> Option<Value>,
{
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Variable(name) => {
            lookup(name).ok_or_else(|| format!("Unknown variable '{}'", name))
        }
        Expr::List(items) => {
            let values = items
                .iter()
                .map(|item| eval_expr_fast(item, lookup))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(values))
        }
        Expr::Call { function, args } => {
            // IF_ELSE only evaluates the selected branch
            if function == "IF_ELSE" {
                if args.len() != 3 {
                    return Err(format!("IF_ELSE expects 3 arguments, got {}", args.len()));
                }
                let condition = eval_expr_fast(&args[0], lookup)?.as_bool()?;
                return eval_expr_fast(if condition { &args[1] } else { &args[2] }, lookup);
            }
            let values = args
                .iter()
                .map(|arg| eval_expr_fast(arg, lookup))
                .collect::<Result<Vec<_>, _>>()?;
            functions::call(function, &values)
        }
        Expr::Negate(operand) => {
            let value = eval_expr_fast(operand, lookup)?;
            Ok(Value::Number(-value.as_f64()?))
        }
        Expr::Arithmetic { op, left, right } => {
            let left = eval_expr_fast(left, lookup)?;
            let right = eval_expr_fast(right, lookup)?;
            arithmetic(*op, &left, &right)
        }
        Expr::Compare { op, left, right } => {
            let left = eval_expr_fast(left, lookup)?;
            let right = eval_expr_fast(right, lookup)?;
            Ok(Value::Bool(compare_values(&left, op, &right)))
        }
        Expr::IsNull(inner) => {
            // Unknown variables count as NULL here
            let value = eval_expr_fast(inner, lookup).unwrap_or(Value::Null);
            Ok(Value::Bool(value.is_null()))
        }
        Expr::IsNotNull(inner) => {
            let value = eval_expr_fast(inner, lookup).unwrap_or(Value::Null);
            Ok(Value::Bool(!value.is_null()))
        }
        Expr::And(left, right) => {
            if !eval_expr_fast(left, lookup)?.as_bool()? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval_expr_fast(right, lookup)?.as_bool()?))
        }
        Expr::Or(left, right) => {
            if eval_expr_fast(left, lookup)?.as_bool()? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval_expr_fast(right, lookup)?.as_bool()?))
        }
        Expr::Not(inner) => {
            Ok(Value::Bool(!eval_expr_fast(inner, lookup)?.as_bool()?))
        }
    }
}

fn arithmetic(op: ArithmeticOp, left: &Value, right: &Value) -> Result<Value, String> {
    // + concatenates as soon as one side is text
    if op == ArithmeticOp::Add
        && (matches!(left, Value::String(_)) || matches!(right, Value::String(_)))
    {
        return Ok(Value::String(format!(
            "{}{}",
            left.to_display_string(),
            right.to_display_string()
        )));
    }
    if op == ArithmeticOp::Add {
        if let (Value::List(a), Value::List(b)) = (left, right) {
            let mut joined = a.clone();
            joined.extend(b.iter().cloned());
            return Ok(Value::List(joined));
        }
    }

    let a = left.as_f64()?;
    let b = right.as_f64()?;
    let result = match op {
        ArithmeticOp::Add => a + b,
        ArithmeticOp::Sub => a - b,
        ArithmeticOp::Mul => a * b,
        ArithmeticOp::Div => a / b,
        ArithmeticOp::Rem => a % b,
        ArithmeticOp::Pow => a.powf(b),
    };
    Ok(Value::Number(result))
}

/// Compare two values.
fn compare_values(left: &Value, op: &CompareOp, right: &Value) -> bool {
    match (left, right) {
        // NULL comparisons: any comparison involving NULL yields UNKNOWN (treated as false).
        // Use IS NULL / IS NOT NULL to test for nulls.
        (Value::Null, _) | (_, Value::Null) => false,

        (Value::Number(a), Value::Number(b)) => compare_ord(*a, *b, op),
        (Value::String(a), Value::String(b)) => compare_ord(a.as_str(), b.as_str(), op),

        // Numbers compared against numeric text
        (Value::Number(a), Value::String(b)) => match parse_number(b) {
            Some(b) => compare_ord(*a, b, op),
            None => false,
        },
        (Value::String(a), Value::Number(b)) => match parse_number(a) {
            Some(a) => compare_ord(a, *b, op),
            None => false,
        },

        (Value::Bool(a), Value::Bool(b)) => {
            match op {
                CompareOp::Eq => a == b,
                CompareOp::Ne => a != b,
                _ => false, // < > <= >= don't make sense for bools
            }
        }

        (Value::List(a), Value::List(b)) => match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            _ => false,
        },

        // Type mismatches return false
        _ => false,
    }
}

/// Compare two ordered values.
fn compare_ord<T: PartialOrd>(a: T, b: T, op: &CompareOp) -> bool {
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
    }
}
