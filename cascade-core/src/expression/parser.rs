//! Recursive-descent parser for parameter formulas.
//!
//! # Grammar
//!
//! ```text
//! expr     = term (('+' | '-') term)*
//! term     = unary (('*' | '/') unary)*
//! unary    = ('-' | '+') unary | power
//! power    = atom (('**' | '^') unary)?
//! atom     = number | identifier | identifier '(' args ')' | '(' expr ')'
//! args     = expr (',' expr)*
//! ```
//!
//! Division is rewritten to a `safe_div` call and only allow-listed functions may be called.

use super::ast::{BinaryOperator, Expr, Function};
use super::{unescape_identifier, ExpressionError, MAX_NESTING_DEPTH};

/// Parse an (already escaped) formula into an expression tree.
pub(crate) fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let mut parser = FormulaParser::new(input);
    let expr = parser.parse_expression()?;
    parser.skip_whitespace();
    if let Some(c) = parser.peek() {
        return Err(parser.error(format!("unexpected character '{c}'")));
    }
    Ok(expr)
}

struct FormulaParser<'a> {
    input: &'a str,
    pos: usize,
    /// Number of `parse_unary` calls currently on the stack
    depth: usize,
}

impl<'a> FormulaParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, ExpressionError> {
        let mut result = self.parse_term()?;

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('+') => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    result = Expr::binary(BinaryOperator::Add, result, rhs);
                }
                Some('-') => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    result = Expr::binary(BinaryOperator::Sub, result, rhs);
                }
                _ => break,
            }
        }

        Ok(result)
    }

    fn parse_term(&mut self) -> Result<Expr, ExpressionError> {
        let mut result = self.parse_unary()?;

        loop {
            self.skip_whitespace();
            if self.check("**") {
                // Exponentiation binds tighter and is handled in parse_power
                break;
            }
            match self.peek() {
                Some('*') => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    result = Expr::binary(BinaryOperator::Mul, result, rhs);
                }
                Some('/') => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    result = Expr::Call(Function::SafeDiv, vec![result, rhs]);
                }
                _ => break,
            }
        }

        Ok(result)
    }

    /// Brackets, call arguments, signs and exponents all recurse through here.
    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ExpressionError::TooDeep {
                position: self.pos,
                max: MAX_NESTING_DEPTH,
            });
        }
        self.depth += 1;
        let result = self.parse_signed();
        self.depth -= 1;
        result
    }

    fn parse_signed(&mut self) -> Result<Expr, ExpressionError> {
        self.skip_whitespace();
        match self.peek() {
            Some('-') => {
                self.advance();
                Ok(Expr::Negate(Box::new(self.parse_unary()?)))
            }
            Some('+') => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.parse_atom()?;
        self.skip_whitespace();

        let has_operator = if self.check("**") {
            self.pos += 2;
            true
        } else if self.peek() == Some('^') {
            self.advance();
            true
        } else {
            false
        };

        if has_operator {
            // Right associative: 2**3**2 == 2**(3**2)
            let exponent = self.parse_unary()?;
            return Ok(Expr::binary(BinaryOperator::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> Result<Expr, ExpressionError> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(')')?;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.parse_number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let start = self.pos;
                let identifier = self.parse_identifier();
                self.skip_whitespace();
                if self.peek() == Some('(') {
                    self.advance();
                    self.parse_call(&identifier, start)
                } else if identifier == "pi" {
                    Ok(Expr::Constant(std::f64::consts::PI))
                } else {
                    Ok(Expr::Variable(unescape_identifier(&identifier)))
                }
            }
            Some(c) => Err(self.error(format!("unexpected character '{c}'"))),
            None => Err(self.error("unexpected end of formula".to_string())),
        }
    }

    fn parse_call(&mut self, name: &str, start: usize) -> Result<Expr, ExpressionError> {
        let function = Function::from_name(name)
            .ok_or_else(|| ExpressionError::DisallowedFunction(unescape_identifier(name)))?;

        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.advance();
        } else {
            loop {
                args.push(self.parse_expression()?);
                self.skip_whitespace();
                match self.peek() {
                    Some(',') => self.advance(),
                    Some(')') => {
                        self.advance();
                        break;
                    }
                    _ => return Err(self.error("expected ',' or ')' in argument list".into())),
                }
            }
        }

        function.check_arity(args.len())?;

        if let Function::Aggregate(method) = function {
            if !args.iter().all(|arg| matches!(arg, Expr::Variable(_))) {
                return Err(ExpressionError::InvalidAggregation(format!(
                    "arguments of {method} (at position {start}) must be plain names"
                )));
            }
        }

        Ok(Expr::Call(function, args))
    }

    fn parse_number(&mut self) -> Result<Expr, ExpressionError> {
        let start = self.pos;
        self.consume_digits();
        if self.peek() == Some('.') {
            self.advance();
            self.consume_digits();
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.advance();
            }
            self.consume_digits();
        }

        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .map(Expr::Constant)
            .map_err(|_| ExpressionError::Syntax {
                position: start,
                message: format!("invalid number '{text}'"),
            })
    }

    fn parse_identifier(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        self.input[start..self.pos].to_string()
    }

    fn consume_digits(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), ExpressionError> {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected '{expected}'")))
        }
    }

    fn error(&self, message: String) -> ExpressionError {
        ExpressionError::Syntax {
            position: self.pos,
            message,
        }
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

    fn check(&self, token: &str) -> bool {
        self.input[self.pos..].starts_with(token)
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }
}
