//! Restricted formula evaluation for computed parameters.
//!
//! A formula such as `"exp(x) + y**2"` is parsed into a small expression tree together with
//! the list of names it reads. Only a fixed allow-list of functions may be called and any
//! `__` token is refused; both checks happen while parsing, before anything is evaluated.
//!
//! Names containing `:` (link references such as `foi:flow` or `sus:inf:`) are escaped before
//! parsing and restored afterwards, so they appear unchanged in [`Expression::dependencies`].
//!
//! ```rust
//! use cascade_core::expression::Expression;
//! use std::collections::HashMap;
//!
//! let expr = Expression::parse("x + y").unwrap();
//! assert_eq!(expr.dependencies(), ["x", "y"]);
//!
//! let inputs = HashMap::from([("x".to_string(), 1.0), ("y".to_string(), 2.0)]);
//! assert_eq!(expr.evaluate(&inputs).unwrap(), 3.0);
//! ```

mod ast;
mod parser;

pub use ast::{safe_div, AggregationMethod, BinaryOperator, Expr, Function};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Longest formula accepted by the parser.
pub const MAX_FORMULA_LENGTH: usize = 1800;

/// Deepest nesting of brackets, calls, signs and exponents accepted by the parser.
pub const MAX_NESTING_DEPTH: usize = 100;

const COLON_ESCAPE: &str = "_colon_";

/// Errors raised while parsing or evaluating a formula.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("formula is empty")]
    Empty,
    #[error("formula is {length} characters long, the maximum is {max}")]
    TooLong { length: usize, max: usize },
    #[error("formula is nested too deeply at position {position}, the maximum depth is {max}")]
    TooDeep { position: usize, max: usize },
    #[error("formula contains the disallowed token '{0}'")]
    DisallowedToken(String),
    #[error("function '{0}' is not allowed in formulas")]
    DisallowedFunction(String),
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("'{function}' takes {expected} arguments, got {got}")]
    WrongArity {
        function: String,
        expected: String,
        got: usize,
    },
    #[error("invalid population aggregation: {0}")]
    InvalidAggregation(String),
    #[error("no value supplied for '{0}'")]
    UnknownVariable(String),
    #[error("population aggregations can only be evaluated by the model")]
    AggregationOutsideModel,
}

/// Replace `:` so that link references survive identifier parsing.
pub fn escape_identifier(name: &str) -> String {
    name.replace(':', COLON_ESCAPE)
}

/// Inverse of [`escape_identifier`].
pub fn unescape_identifier(name: &str) -> String {
    name.replace(COLON_ESCAPE, ":")
}

/// A cross-population aggregation formula, e.g. `SRC_POP_AVG(foi, contacts, alive)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationCall {
    pub method: AggregationMethod,
    /// Variable averaged across populations
    pub variable: String,
    /// Interaction whose weights are used
    pub interaction: String,
    /// Optional characteristic that further weights each population
    pub weighting: Option<String>,
}

/// A parsed, validated formula.
///
/// Serialises as the original formula string and is re-validated when deserialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Expression {
    formula: String,
    expr: Expr,
    dependencies: Vec<String>,
}

impl Expression {
    pub fn parse(formula: &str) -> Result<Self, ExpressionError> {
        let trimmed = formula.trim();
        if trimmed.is_empty() {
            return Err(ExpressionError::Empty);
        }
        if formula.len() > MAX_FORMULA_LENGTH {
            return Err(ExpressionError::TooLong {
                length: formula.len(),
                max: MAX_FORMULA_LENGTH,
            });
        }
        if formula.contains("__") {
            return Err(ExpressionError::DisallowedToken("__".to_string()));
        }

        let expr = parser::parse(&escape_identifier(trimmed))?;

        // Aggregations read other populations, so they cannot be mixed with local arithmetic
        let is_root_aggregation = matches!(expr, Expr::Call(Function::Aggregate(_), _));
        if !is_root_aggregation && contains_aggregation(&expr) {
            return Err(ExpressionError::InvalidAggregation(
                "population aggregations must make up the whole formula".to_string(),
            ));
        }

        let mut dependencies = Vec::new();
        expr.collect_variables(&mut dependencies);

        Ok(Self {
            formula: trimmed.to_string(),
            expr,
            dependencies,
        })
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Names read by the formula, in order of first appearance.
    ///
    /// For aggregations the interaction name is not included.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Details of the aggregation if this formula is a population aggregation.
    pub fn aggregation(&self) -> Option<AggregationCall> {
        match &self.expr {
            Expr::Call(Function::Aggregate(method), args) => {
                let mut names = args.iter().map(|arg| match arg {
                    Expr::Variable(name) => name.clone(),
                    _ => unreachable!("aggregation arguments are validated by the parser"),
                });
                Some(AggregationCall {
                    method: *method,
                    variable: names.next()?,
                    interaction: names.next()?,
                    weighting: names.next(),
                })
            }
            _ => None,
        }
    }

    pub fn evaluate(&self, inputs: &HashMap<String, f64>) -> Result<f64, ExpressionError> {
        self.expr.evaluate(&|name: &str| inputs.get(name).copied())
    }

    /// Evaluate using an arbitrary lookup for variable values.
    pub fn evaluate_with<F>(&self, lookup: F) -> Result<f64, ExpressionError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        self.expr.evaluate(&lookup)
    }
}

fn contains_aggregation(expr: &Expr) -> bool {
    match expr {
        Expr::Call(Function::Aggregate(_), _) => true,
        Expr::Call(_, args) => args.iter().any(contains_aggregation),
        Expr::Negate(inner) => contains_aggregation(inner),
        Expr::Binary(_, left, right) => contains_aggregation(left) || contains_aggregation(right),
        Expr::Constant(_) | Expr::Variable(_) => false,
    }
}

impl TryFrom<String> for Expression {
    type Error = ExpressionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Expression> for String {
    fn from(value: Expression) -> Self {
        value.formula
    }
}
