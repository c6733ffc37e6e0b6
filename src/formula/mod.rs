//! Restricted arithmetic over the bytes of a payload.
//!
//! Expressions may use numeric literals, the variables `b1`, `b2`, ... (1-indexed payload bytes),
//! the binary operators `+ - * / // % **`, unary `+ -` and parentheses. Anything else is rejected
//! while parsing, so evaluation can neither call nor look up anything outside the environment.

use std::collections::HashMap;
use std::fmt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::EvalError;

pub mod lexer;
pub mod parser;

use parser::{BinaryOp, Expr, UnaryOp};

/// Byte values visible to a formula, keyed by variable name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    values: HashMap<String, i64>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// `b1..bN` bound to the payload bytes in order.
    pub fn from_payload(payload: &[u8]) -> Self {
        payload.iter().enumerate().map(|(i, byte)| (format!("b{}", i + 1), i64::from(*byte))).collect()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: i64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }
}

impl<S: Into<String>> FromIterator<(S, i64)> for Environment {
    fn from_iter<T: IntoIterator<Item = (S, i64)>>(iter: T) -> Self {
        Environment { values: iter.into_iter().map(|(name, value)| (name.into(), value)).collect() }
    }
}

/// Result of an evaluation. Displays integral values without a fractional part (`4.0` shows as `4`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormulaValue(pub f64);

impl FormulaValue {
    pub fn as_f64(&self) -> f64 {
        self.0
    }

    pub fn as_integer(&self) -> Option<i64> {
        let value = self.0;
        if value.fract() == 0.0 && value.abs() < 9.0e15 {
            Some(value as i64)
        } else {
            None
        }
    }
}

impl fmt::Display for FormulaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_integer() {
            Some(integer) => write!(f, "{}", integer),
            None => write!(f, "{}", self.0),
        }
    }
}

/// A parsed expression, ready to be evaluated any number of times.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    expr: Expr,
}

fn arithmetic(what: &str) -> EvalError {
    EvalError::ArithmeticError(what.to_string())
}

fn checked(value: f64) -> Result<f64, EvalError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(arithmetic("result out of range"))
    }
}

fn apply(op: BinaryOp, left: f64, right: f64) -> Result<f64, EvalError> {
    match op {
        BinaryOp::Add => checked(left + right),
        BinaryOp::Sub => checked(left - right),
        BinaryOp::Mul => checked(left * right),
        BinaryOp::Div => {
            if right == 0.0 {
                return Err(arithmetic("division by zero"));
            }
            checked(left / right)
        },
        BinaryOp::FloorDiv => {
            if right == 0.0 {
                return Err(arithmetic("integer division by zero"));
            }
            checked((left / right).floor())
        },
        BinaryOp::Mod => {
            if right == 0.0 {
                return Err(arithmetic("modulo by zero"));
            }
            // the result takes the sign of the divisor
            let mut remainder = left % right;
            if remainder != 0.0 && (remainder < 0.0) != (right < 0.0) {
                remainder += right;
            }
            checked(remainder)
        },
        BinaryOp::Pow => {
            if left == 0.0 && right < 0.0 {
                return Err(arithmetic("zero raised to a negative power"));
            }
            if left < 0.0 && right.fract() != 0.0 {
                return Err(arithmetic("fractional power of a negative number"));
            }
            checked(left.powf(right))
        },
    }
}

fn eval(expr: &Expr, environment: &Environment) -> Result<f64, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(*value),
        Expr::Variable(name) => environment
            .get(name)
            .map(|value| value as f64)
            .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
        Expr::Unary(op, operand) => {
            let value = eval(operand, environment)?;
            Ok(match op {
                UnaryOp::Plus => value,
                UnaryOp::Minus => -value,
            })
        },
        Expr::Binary(op, left, right) => {
            let left = eval(left, environment)?;
            let right = eval(right, environment)?;
            apply(*op, left, right)
        },
    }
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, EvalError> {
        let tokens = lexer::tokenize(source)?;
        Ok(Formula { expr: parser::parse(tokens)? })
    }

    pub fn evaluate(&self, environment: &Environment) -> Result<FormulaValue, EvalError> {
        eval(&self.expr, environment).map(FormulaValue)
    }
}

pub fn evaluate(expression: &str, environment: &Environment) -> Result<FormulaValue, EvalError> {
    Formula::parse(expression)?.evaluate(environment)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaDefinition {
    pub name: String,
    pub expression: String,
}

impl FormulaDefinition {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        FormulaDefinition { name: name.into(), expression: expression.into() }
    }
}

/// The formulas attached to one characteristic, compiled once and keyed by unique name.
#[derive(Debug, Clone, Default)]
pub struct FormulaSet {
    formulas: IndexMap<String, Result<Formula, EvalError>>,
}

impl FormulaSet {
    pub fn new(definitions: Vec<FormulaDefinition>) -> Self {
        let mut set = FormulaSet::default();
        for definition in definitions {
            set.insert(definition);
        }
        set
    }

    /// Adds `definition`, replacing an earlier formula of the same name.
    pub fn insert(&mut self, definition: FormulaDefinition) {
        let compiled = Formula::parse(&definition.expression);
        self.formulas.insert(definition.name, compiled);
    }

    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formulas.keys().map(String::as_str)
    }

    pub fn evaluate_all(&self, environment: &Environment) -> Vec<(String, Result<FormulaValue, EvalError>)> {
        self.formulas
            .iter()
            .map(|(name, formula)| {
                let result = match formula {
                    Ok(formula) => formula.evaluate(environment),
                    Err(err) => Err(err.clone()),
                };
                (name.clone(), result)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, i64)]) -> Environment {
        pairs.iter().map(|(name, value)| (*name, *value)).collect()
    }

    #[test]
    fn combines_two_bytes() {
        let result = evaluate("b1*255 + b2", &env(&[("b1", 1), ("b2", 10)])).unwrap();
        assert_eq!(result, FormulaValue(265.0));
        assert_eq!(result.to_string(), "265");
    }

    #[test]
    fn division_by_zero_is_an_arithmetic_error() {
        let environment = env(&[("b1", 5)]);
        assert!(matches!(evaluate("b1/0", &environment), Err(EvalError::ArithmeticError(_))));
        assert!(matches!(evaluate("b1//0", &environment), Err(EvalError::ArithmeticError(_))));
        assert!(matches!(evaluate("b1%0", &environment), Err(EvalError::ArithmeticError(_))));
        assert!(matches!(evaluate("0**-1", &environment), Err(EvalError::ArithmeticError(_))));
    }

    #[test]
    fn method_calls_are_unsupported() {
        let result = evaluate("b1.bit_length()", &env(&[("b1", 5)]));
        assert!(matches!(result, Err(EvalError::UnsupportedConstruct(_))));
    }

    #[test]
    fn missing_bytes_are_unknown_not_zero() {
        let environment = Environment::from_payload(&[7]);
        assert_eq!(evaluate("b2 + 1", &environment), Err(EvalError::UnknownVariable(String::from("b2"))));
    }

    #[test]
    fn floor_division_and_modulo_follow_the_divisor_sign() {
        let environment = Environment::new();
        assert_eq!(evaluate("7 // 2", &environment).unwrap(), FormulaValue(3.0));
        assert_eq!(evaluate("-7 // 2", &environment).unwrap(), FormulaValue(-4.0));
        assert_eq!(evaluate("-7 % 3", &environment).unwrap(), FormulaValue(2.0));
        assert_eq!(evaluate("7 % -3", &environment).unwrap(), FormulaValue(-2.0));
    }

    #[test]
    fn true_division_and_powers() {
        let environment = Environment::new();
        assert_eq!(evaluate("7 / 2", &environment).unwrap().to_string(), "3.5");
        assert_eq!(evaluate("8 / 2", &environment).unwrap().to_string(), "4");
        assert_eq!(evaluate("-2**2", &environment).unwrap(), FormulaValue(-4.0));
        assert_eq!(evaluate("2**-1", &environment).unwrap(), FormulaValue(0.5));
        assert_eq!(evaluate("(1 + 2) * +3", &environment).unwrap(), FormulaValue(9.0));
    }

    #[test]
    fn evaluation_is_repeatable() {
        let formula = Formula::parse("(b1 * 256 + b2) / 10").unwrap();
        let environment = Environment::from_payload(&[0x01, 0x2C]);
        let first = formula.evaluate(&environment).unwrap();
        let second = formula.evaluate(&environment).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_string(), "30");
    }

    #[test]
    fn formula_set_replaces_by_name_and_keeps_parse_errors() {
        let set = FormulaSet::new(vec![
            FormulaDefinition::new("temp", "b1"),
            FormulaDefinition::new("bad", "b1 < 2"),
            FormulaDefinition::new("temp", "b1 * 2"),
        ]);
        let results = set.evaluate_all(&Environment::from_payload(&[4]));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], (String::from("temp"), Ok(FormulaValue(8.0))));
        assert!(matches!(results[1].1, Err(EvalError::UnsupportedConstruct(_))));
    }

    #[test]
    fn overlong_sums_are_rejected_instead_of_evaluated() {
        let environment = Environment::from_payload(&[1]);
        let long = vec!["b1"; 100_000].join("+");
        assert!(matches!(evaluate(&long, &environment), Err(EvalError::UnsupportedConstruct(_))));
        assert_eq!(evaluate(&vec!["b1"; 500].join("+"), &environment), Ok(FormulaValue(500.0)));
    }
}
