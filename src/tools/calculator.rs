//! `deterministic_calculator`: arithmetic for the analyst and reviewer, so
//! ratios and percentage changes never come from the model's own arithmetic.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr   = term (("+" | "-") term)*
//! term   = power (("*" | "/") power)*
//! power  = unary ("^" power)?
//! unary  = "-" unary | atom
//! atom   = number | "(" expr ")"
//! ```
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use winnow::ascii::{float, multispace0};
use winnow::combinator::{alt, delimited, opt, preceded, repeat};
use winnow::error::ModalResult;
use winnow::prelude::*;
use winnow::token::one_of;

use super::{CALCULATOR_TOOL_NAME, SideEffect, Tool, parse_args, schema_value};
use crate::error::ToolInvocationError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalculatorError {
    #[error("expression is empty")]
    Empty,
    #[error("could not parse expression: {0}")]
    Syntax(String),
    #[error("result is not a finite number (division by zero?)")]
    NonFinite,
    #[error("expression nested too deeply (limit {0})")]
    TooDeep(usize),
}

/// Deepest nesting of parentheses, unary minus and `^` chains accepted.
/// The parser recurses once per level, so this bounds its stack use.
pub const MAX_NESTING: usize = 64;

/// Evaluate an arithmetic expression. `,` thousands separators and `$`
/// signs are ignored so figures can be pasted as they appear in reports.
pub fn evaluate(expression: &str) -> Result<f64, CalculatorError> {
    let cleaned = expression
        .chars()
        .filter(|ch| !matches!(ch, ',' | '$'))
        .collect::<String>();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(CalculatorError::Empty);
    }
    if nesting_depth(cleaned) > MAX_NESTING {
        return Err(CalculatorError::TooDeep(MAX_NESTING));
    }

    let value = expr
        .parse(cleaned)
        .map_err(|err| CalculatorError::Syntax(err.to_string()))?;

    if !value.is_finite() {
        return Err(CalculatorError::NonFinite);
    }
    Ok(value)
}

/// Upper bound on how deep the grammar below recurses for `expression`.
///
/// Each open parenthesis is one level. Within a level, unary minus signs and
/// `^` operators stay open until the next `+ - * /` at that level.
fn nesting_depth(expression: &str) -> usize {
    let mut pending = vec![0usize];
    let mut open = 1usize;
    let mut deepest = open;
    let mut after_operand = false;

    for ch in expression.chars().filter(|ch| !ch.is_whitespace()) {
        match ch {
            '(' => {
                pending.push(0);
                open += 1;
                after_operand = false;
            }
            ')' => {
                if pending.len() > 1 {
                    open -= 1 + pending.pop().unwrap_or_default();
                }
                after_operand = true;
            }
            '-' if !after_operand => {
                if let Some(level) = pending.last_mut() {
                    *level += 1;
                    open += 1;
                }
            }
            '^' => {
                if let Some(level) = pending.last_mut() {
                    *level += 1;
                    open += 1;
                }
                after_operand = false;
            }
            '+' | '-' | '*' | '/' => {
                if let Some(level) = pending.last_mut() {
                    open -= *level;
                    *level = 0;
                }
                after_operand = false;
            }
            _ => after_operand = true,
        }
        deepest = deepest.max(open);
    }
    deepest
}

fn expr(i: &mut &str) -> ModalResult<f64> {
    let init = term.parse_next(i)?;
    repeat(0.., (one_of(['+', '-']), term))
        .fold(
            move || init,
            |acc, (op, val): (char, f64)| {
                if op == '+' { acc + val } else { acc - val }
            },
        )
        .parse_next(i)
}

fn term(i: &mut &str) -> ModalResult<f64> {
    let init = power.parse_next(i)?;
    repeat(0.., (one_of(['*', '/']), power))
        .fold(
            move || init,
            |acc, (op, val): (char, f64)| {
                if op == '*' { acc * val } else { acc / val }
            },
        )
        .parse_next(i)
}

// Right-associative: 2^3^2 == 2^9.
fn power(i: &mut &str) -> ModalResult<f64> {
    let base = unary.parse_next(i)?;
    let exponent = opt(preceded('^', power)).parse_next(i)?;
    Ok(match exponent {
        Some(exponent) => base.powf(exponent),
        None => base,
    })
}

fn unary(i: &mut &str) -> ModalResult<f64> {
    alt((
        preceded((multispace0, '-'), unary).map(|value: f64| -value),
        atom,
    ))
    .parse_next(i)
}

fn atom(i: &mut &str) -> ModalResult<f64> {
    delimited(
        multispace0,
        alt((float, delimited('(', expr, ')'))),
        multispace0,
    )
    .parse_next(i)
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CalculatorArgs {
    /// Arithmetic expression using + - * / ^ and parentheses, e.g. "(189.5 - 164.2) / 164.2 * 100".
    pub expression: String,
}

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        CALCULATOR_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Evaluates an arithmetic expression exactly. Use it for every ratio, percentage change \
         and score computation. Args: expression (required)."
    }

    fn input_schema(&self) -> Value {
        schema_value::<CalculatorArgs>()
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": { "type": "string" },
                "result": { "type": "number" }
            },
            "required": ["expression", "result"]
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::None
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolInvocationError> {
        let args: CalculatorArgs = parse_args(self.name(), args)?;
        let result = evaluate(&args.expression)
            .map_err(|err| ToolInvocationError::new(self.name(), err.to_string()))?;
        tracing::debug!(expression = %args.expression, result, "Calculator evaluated");
        Ok(json!({
            "expression": args.expression,
            "result": result,
        }))
    }
}
