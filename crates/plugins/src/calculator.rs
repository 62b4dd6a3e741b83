//! Calculator plugin — evaluates arithmetic expressions.
//!
//! Supports `+ - * / % ^`, parentheses, unary signs, scientific notation,
//! the constants `pi` and `e`, and a handful of one-argument functions.
//! `^` is right-associative and binds tighter than unary minus, so
//! `-2^2` is `-4`.

use async_trait::async_trait;
use botloom_core::plugin::{Plugin, PluginFailure};

pub struct CalculatorPlugin;

#[async_trait]
impl Plugin for CalculatorPlugin {
    fn name(&self) -> &str {
        "calculator"
    }

    fn usage(&self) -> &str {
        "Evaluate an arithmetic expression exactly. Supports + - * / % ^, parentheses, \
         pi, e, and sqrt/abs/ln/log10/round/floor/ceil."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '(2 + 3) * 4'"
                }
            },
            "required": ["expression"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, PluginFailure> {
        let expr = arguments["expression"]
            .as_str()
            .ok_or("missing 'expression' argument")?;
        let value = evaluate(expr)?;
        Ok(format_number(value))
    }
}

/// Integers print without a trailing `.0`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// ── Pratt evaluator ──

/// Evaluate an expression string.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let mut eval = Evaluator {
        src: expr,
        pos: 0,
        depth: 0,
    };
    let value = eval.expression(0)?;
    eval.skip_whitespace();
    if let Some(c) = eval.peek() {
        return Err(format!("unexpected '{}' at offset {}", c as char, eval.pos));
    }
    if !value.is_finite() {
        return Err(format!("result of '{expr}' is not a finite number"));
    }
    Ok(value)
}

/// (left, right) binding power of an infix operator.
fn infix_binding(op: u8) -> Option<(u8, u8)> {
    match op {
        b'+' | b'-' => Some((1, 2)),
        b'*' | b'/' | b'%' => Some((3, 4)),
        b'^' => Some((7, 6)),
        _ => None,
    }
}

const PREFIX_BINDING: u8 = 5;

/// Deepest nesting of parentheses, unary signs and `^` chains accepted.
pub const MAX_DEPTH: usize = 256;

struct Evaluator<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl Evaluator<'_> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: u8) -> Result<(), String> {
        self.skip_whitespace();
        match self.peek() {
            Some(c) if c == want => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(format!(
                "expected '{}' at offset {}, found '{}'",
                want as char, self.pos, c as char
            )),
            None => Err(format!("expected '{}' before end of expression", want as char)),
        }
    }

    fn expression(&mut self, min_binding: u8) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err(format!("expression nested deeper than {MAX_DEPTH} levels"));
        }
        self.depth += 1;
        let result = self.binary(min_binding);
        self.depth -= 1;
        result
    }

    fn binary(&mut self, min_binding: u8) -> Result<f64, String> {
        let mut lhs = self.prefix()?;
        loop {
            self.skip_whitespace();
            let Some(op) = self.peek() else { break };
            let Some((left, right)) = infix_binding(op) else { break };
            if left < min_binding {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(right)?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<f64, String> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.expression(PREFIX_BINDING)?)
            }
            Some(b'+') => {
                self.pos += 1;
                self.expression(PREFIX_BINDING)
            }
            Some(b'(') => {
                self.pos += 1;
                let value = self.expression(0)?;
                self.expect(b')')?;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.identifier(),
            Some(c) => Err(format!("unexpected '{}' at offset {}", c as char, self.pos)),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == b'.') {
            self.pos += 1;
        }
        // Exponent only if digits follow, so `2e` stays an error rather than `2 * e`.
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let bytes = self.src.as_bytes();
            let mut look = self.pos + 1;
            if matches!(bytes.get(look), Some(b'+' | b'-')) {
                look += 1;
            }
            if bytes.get(look).is_some_and(|c| c.is_ascii_digit()) {
                self.pos = look;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text = &self.src[start..self.pos];
        text.parse::<f64>()
            .map_err(|_| format!("invalid number '{text}'"))
    }

    fn identifier(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        let name = &self.src[start..self.pos];
        match name {
            "pi" => return Ok(std::f64::consts::PI),
            "e" => return Ok(std::f64::consts::E),
            _ => {}
        }

        self.expect(b'(')?;
        let arg = self.expression(0)?;
        self.expect(b')')?;
        match name {
            "sqrt" if arg < 0.0 => Err("square root of a negative number".into()),
            "sqrt" => Ok(arg.sqrt()),
            "abs" => Ok(arg.abs()),
            "ln" if arg <= 0.0 => Err("logarithm of a non-positive number".into()),
            "ln" => Ok(arg.ln()),
            "log10" if arg <= 0.0 => Err("logarithm of a non-positive number".into()),
            "log10" => Ok(arg.log10()),
            "round" => Ok(arg.round()),
            "floor" => Ok(arg.floor()),
            "ceil" => Ok(arg.ceil()),
            other => Err(format!("unknown function '{other}'")),
        }
    }
}

fn apply(op: u8, lhs: f64, rhs: f64) -> Result<f64, String> {
    match op {
        b'+' => Ok(lhs + rhs),
        b'-' => Ok(lhs - rhs),
        b'*' => Ok(lhs * rhs),
        b'/' if rhs == 0.0 => Err("division by zero".into()),
        b'/' => Ok(lhs / rhs),
        b'%' if rhs == 0.0 => Err("modulo by zero".into()),
        b'%' => Ok(lhs % rhs),
        b'^' => Ok(lhs.powf(rhs)),
        other => Err(format!("unknown operator '{}'", other as char)),
    }
}
