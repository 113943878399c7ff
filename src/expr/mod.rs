//! Compiled arithmetic/logical expressions.
//!
//! Expressions drive allometries, mortality curves, response functions,
//! aging, and user filters. Parsing produces an immutable postfix exec list;
//! evaluation runs against an [`Env`] holding the variable slots, so one
//! compiled expression can be shared across threads and called repeatedly
//! with different bindings.
//!
//! Supported syntax: numbers; identifiers; unary +/-; binary `+ - * / ^`;
//! comparisons `= < > <= >= <>`; `and` / `or`; function calls
//! `sin cos tan exp ln sqrt min max if(c,t,f) mod(x,y) incsum(x)
//! sigmoid(x,type,p1,p2) polygon(x, x1,y1, .., xn,yn) rnd(a,b)`.

mod lexer;
mod parser;
mod program;

pub use program::Cmp;
pub use program::Env;
pub use program::VarId;

use crate::LINEARIZATION_STEPS;
use crate::error::Result;
use program::Program;

/// a parsed expression plus its variable table and an optional linearization
#[derive(Debug, Clone, Default)]
pub struct Expression {
    source: String,
    program: Program,
    variables: Vec<String>,
    linear: Option<Linearized>,
}

impl Expression {
    /// parse in non-strict mode: variables register on first use
    pub fn parse(source: &str) -> Result<Self> {
        Self::compile(source, None)
    }

    /// parse in strict mode: only the declared variables may appear, and
    /// their slot order follows the declaration order
    pub fn parse_strict(source: &str, declared: &[&str]) -> Result<Self> {
        Self::compile(source, Some(declared))
    }

    fn compile(source: &str, declared: Option<&[&str]>) -> Result<Self> {
        let tokens = lexer::tokenize(source)?;
        let (program, variables) = parser::Parser::compile(source, &tokens, declared)?;
        Ok(Self {
            source: source.to_string(),
            program,
            variables,
            linear: None,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// handle for fast repeated writes of one variable
    pub fn var(&self, name: &str) -> Option<VarId> {
        self.variables.iter().position(|v| v == name).map(VarId)
    }

    /// fresh environment with one zeroed slot per variable
    pub fn env(&self) -> Env {
        Env::new(self.variables.len())
    }

    /// true when no variable (and no rnd call) occurs
    pub fn is_constant(&self) -> bool {
        self.program.is_constant()
    }

    pub fn evaluate(&self, env: &mut Env) -> Result<f64> {
        self.program.execute(env, &self.source)
    }

    /// convenience: bind the first two slots to v0 and v1 and evaluate
    pub fn calculate(&self, v0: f64, v1: f64) -> Result<f64> {
        let mut env = self.env();
        if !env.values.is_empty() {
            env.values[0] = v0;
        }
        if env.values.len() > 1 {
            env.values[1] = v1;
        }
        self.evaluate(&mut env)
    }

    /// single-argument evaluation; uses the linearized table inside its
    /// domain and falls back to the exec list outside
    pub fn calculate1(&self, x: f64) -> Result<f64> {
        if let Some(linear) = &self.linear {
            if let Some(value) = linear.value(x) {
                return Ok(value);
            }
        }
        self.calculate(x, 0.)
    }

    /// replace evaluation over [low, high] with interpolation between
    /// sampled points
    pub fn linearize(&mut self, low: f64, high: f64) -> Result<()> {
        let step = (high - low) / LINEARIZATION_STEPS as f64;
        let mut values = Vec::with_capacity(LINEARIZATION_STEPS + 1);
        for i in 0..=LINEARIZATION_STEPS {
            values.push(self.calculate(low + step * i as f64, 0.)?);
        }
        self.linear = Some(Linearized {
            low,
            high,
            step,
            values,
        });
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Linearized {
    low: f64,
    high: f64,
    step: f64,
    values: Vec<f64>,
}

impl Linearized {
    fn value(&self, x: f64) -> Option<f64> {
        if x < self.low || x > self.high {
            return None;
        }
        let t = (x - self.low) / self.step;
        let i = (t as usize).min(self.values.len() - 2);
        let frac = t - i as f64;
        Some(self.values[i] * (1. - frac) + self.values[i + 1] * frac)
    }
}
