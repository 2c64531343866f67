//! Expression tree and tree-walking evaluator.

use super::ExpressionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction and kind of a cross-population aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationMethod {
    /// Weighted average over source populations
    SrcPopAvg,
    /// Weighted average over target populations
    TgtPopAvg,
    /// Weighted sum over source populations
    SrcPopSum,
    /// Weighted sum over target populations
    TgtPopSum,
}

impl AggregationMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SRC_POP_AVG" => Some(Self::SrcPopAvg),
            "TGT_POP_AVG" => Some(Self::TgtPopAvg),
            "SRC_POP_SUM" => Some(Self::SrcPopSum),
            "TGT_POP_SUM" => Some(Self::TgtPopSum),
            _ => None,
        }
    }

    /// Source averaging reads the interaction tensor transposed.
    pub fn is_source(&self) -> bool {
        matches!(self, Self::SrcPopAvg | Self::SrcPopSum)
    }

    /// Averages normalise the weights of each population to 1.
    pub fn is_average(&self) -> bool {
        matches!(self, Self::SrcPopAvg | Self::TgtPopAvg)
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SrcPopAvg => "SRC_POP_AVG",
            Self::TgtPopAvg => "TGT_POP_AVG",
            Self::SrcPopSum => "SRC_POP_SUM",
            Self::TgtPopSum => "TGT_POP_SUM",
        };
        write!(f, "{name}")
    }
}

/// Functions that formulas are allowed to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Exp,
    Floor,
    Ceil,
    Min,
    Max,
    Sqrt,
    Ln,
    Log10,
    Sin,
    Cos,
    Tan,
    Abs,
    Pow,
    SafeDiv,
    Aggregate(AggregationMethod),
}

impl Function {
    /// Look up an allowed function by name.
    ///
    /// Anything not listed here is rejected by the parser.
    pub fn from_name(name: &str) -> Option<Self> {
        let function = match name {
            "exp" => Self::Exp,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "min" => Self::Min,
            "max" => Self::Max,
            "sqrt" => Self::Sqrt,
            "ln" | "log" => Self::Ln,
            "log10" => Self::Log10,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "abs" => Self::Abs,
            "pow" => Self::Pow,
            "safe_div" => Self::SafeDiv,
            other => Self::Aggregate(AggregationMethod::from_name(other)?),
        };
        Some(function)
    }

    /// Accepted argument counts (inclusive range).
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Self::Min | Self::Max => (1, usize::MAX),
            Self::Pow | Self::SafeDiv => (2, 2),
            Self::Aggregate(_) => (2, 3),
            _ => (1, 1),
        }
    }

    /// Check that `got` arguments are accepted.
    pub fn check_arity(&self, got: usize) -> Result<(), ExpressionError> {
        let (min, max) = self.arity();
        if got >= min && got <= max {
            return Ok(());
        }
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {min}")
        } else {
            format!("{min} to {max}")
        };
        Err(ExpressionError::WrongArity {
            function: self.name(),
            expected,
            got,
        })
    }

    pub fn name(&self) -> String {
        match self {
            Self::Exp => "exp".into(),
            Self::Floor => "floor".into(),
            Self::Ceil => "ceil".into(),
            Self::Min => "min".into(),
            Self::Max => "max".into(),
            Self::Sqrt => "sqrt".into(),
            Self::Ln => "ln".into(),
            Self::Log10 => "log10".into(),
            Self::Sin => "sin".into(),
            Self::Cos => "cos".into(),
            Self::Tan => "tan".into(),
            Self::Abs => "abs".into(),
            Self::Pow => "pow".into(),
            Self::SafeDiv => "safe_div".into(),
            Self::Aggregate(method) => method.to_string(),
        }
    }
}

/// Division that is 0 for 0/0 instead of NaN.
pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 && numerator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(f64),
    Variable(String),
    Negate(Box<Expr>),
    Binary(BinaryOperator, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
        Self::Binary(op, Box::new(left), Box::new(right))
    }

    /// Collect free variable names in order of first appearance.
    pub(crate) fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Expr::Constant(_) => {}
            Expr::Variable(name) => {
                if !out.iter().any(|x| x == name) {
                    out.push(name.clone());
                }
            }
            Expr::Negate(inner) => inner.collect_variables(out),
            Expr::Binary(_, left, right) => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expr::Call(Function::Aggregate(_), args) => {
                // The interaction name (second argument) is not a model variable
                for (i, arg) in args.iter().enumerate() {
                    if i != 1 {
                        arg.collect_variables(out);
                    }
                }
            }
            Expr::Call(_, args) => args.iter().for_each(|arg| arg.collect_variables(out)),
        }
    }

    /// Evaluate the tree, resolving variables with `lookup`.
    pub fn evaluate<F>(&self, lookup: &F) -> Result<f64, ExpressionError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        match self {
            Expr::Constant(v) => Ok(*v),
            Expr::Variable(name) => {
                lookup(name).ok_or_else(|| ExpressionError::UnknownVariable(name.clone()))
            }
            Expr::Negate(inner) => Ok(-inner.evaluate(lookup)?),
            Expr::Binary(op, left, right) => {
                let a = left.evaluate(lookup)?;
                let b = right.evaluate(lookup)?;
                Ok(match op {
                    BinaryOperator::Add => a + b,
                    BinaryOperator::Sub => a - b,
                    BinaryOperator::Mul => a * b,
                    BinaryOperator::Pow => a.powf(b),
                })
            }
            Expr::Call(Function::Aggregate(_), _) => Err(ExpressionError::AggregationOutsideModel),
            Expr::Call(function, args) => {
                function.check_arity(args.len())?;
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(lookup))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(apply(*function, &values))
            }
        }
    }
}

/// Apply a (non-aggregation) function to already evaluated arguments.
///
/// Argument counts must already have been checked.
fn apply(function: Function, args: &[f64]) -> f64 {
    match function {
        Function::Exp => args[0].exp(),
        Function::Floor => args[0].floor(),
        Function::Ceil => args[0].ceil(),
        Function::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
        Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Function::Sqrt => args[0].sqrt(),
        Function::Ln => args[0].ln(),
        Function::Log10 => args[0].log10(),
        Function::Sin => args[0].sin(),
        Function::Cos => args[0].cos(),
        Function::Tan => args[0].tan(),
        Function::Abs => args[0].abs(),
        Function::Pow => args[0].powf(args[1]),
        Function::SafeDiv => safe_div(args[0], args[1]),
        Function::Aggregate(_) => unreachable!("aggregations are evaluated by the model"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_division() {
        assert_eq!(safe_div(0.0, 0.0), 0.0);
        assert_eq!(safe_div(1.0, 4.0), 0.25);
        assert_eq!(safe_div(1.0, 0.0), f64::INFINITY);
        assert_eq!(safe_div(-1.0, 0.0), f64::NEG_INFINITY);
    }

    #[test]
    fn function_lookup() {
        assert_eq!(Function::from_name("log"), Some(Function::Ln));
        assert_eq!(
            Function::from_name("TGT_POP_SUM"),
            Some(Function::Aggregate(AggregationMethod::TgtPopSum))
        );
        assert_eq!(Function::from_name("eval"), None);
        assert_eq!(Function::from_name("open"), None);
    }

    #[test]
    fn evaluate_tree() {
        let expr = Expr::binary(
            BinaryOperator::Add,
            Expr::Call(Function::Max, vec![Expr::Constant(1.0), Expr::Constant(3.0)]),
            Expr::Negate(Box::new(Expr::Variable("x".to_string()))),
        );
        let value = expr
            .evaluate(&|name: &str| (name == "x").then_some(2.0))
            .unwrap();
        assert_eq!(value, 1.0);
    }

    #[test]
    fn evaluate_checks_arity() {
        let lookup = |_: &str| None;
        let res = Expr::Call(Function::Exp, vec![]).evaluate(&lookup);
        assert_eq!(
            res.unwrap_err(),
            ExpressionError::WrongArity {
                function: "exp".to_string(),
                expected: "1".to_string(),
                got: 0,
            }
        );

        let res = Expr::Call(Function::SafeDiv, vec![Expr::Constant(1.0)]).evaluate(&lookup);
        assert!(matches!(res, Err(ExpressionError::WrongArity { .. })));
        assert!(Expr::Call(Function::Min, vec![]).evaluate(&lookup).is_err());
    }
}
