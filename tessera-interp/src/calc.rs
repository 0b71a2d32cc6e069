//! The fixed calculation library behind `calculate` steps.

use crate::expr;
use serde_json::{Map, Value};
use tessera_core::EngineError;
use tessera_core::value::{as_f64, number};

const DEFAULT_COMPOUND_FREQUENCY: f64 = 12.0;

/// A library operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcOp {
    /// `principal × (1 + rate/100/n)^(n × time)`, rounded to cents.
    CompoundInterest,
    /// `(to − from) / |from| × 100`, rounded to two decimals.
    PercentageChange,
    /// Population standard deviation of `values`.
    StandardDeviation,
    /// Arithmetic mean of `values`.
    Mean,
    /// Pearson correlation of `x` and `y`.
    Correlation,
    /// Arithmetic `expression` over numeric `variables`.
    Evaluate,
}

impl CalcOp {
    /// Look up an operation by its wire name. Unknown names are
    /// `UnknownOperation`.
    pub fn from_name(name: &str) -> Result<Self, EngineError> {
        match name {
            "compoundInterest" => Ok(CalcOp::CompoundInterest),
            "percentageChange" => Ok(CalcOp::PercentageChange),
            "standardDeviation" => Ok(CalcOp::StandardDeviation),
            "mean" => Ok(CalcOp::Mean),
            "correlation" => Ok(CalcOp::Correlation),
            "evaluate" => Ok(CalcOp::Evaluate),
            other => Err(EngineError::UnknownOperation(format!(
                "unknown calculation '{other}'"
            ))),
        }
    }

    /// Run the operation over resolved parameters.
    pub fn run(self, params: &Value) -> Result<Value, EngineError> {
        let empty = Map::new();
        let params = match params {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(invalid("calculate params must be an object")),
        };
        let result = match self {
            CalcOp::CompoundInterest => compound_interest(params)?,
            CalcOp::PercentageChange => percentage_change(params)?,
            CalcOp::StandardDeviation => standard_deviation(&series(params, "values")?),
            CalcOp::Mean => mean(&series(params, "values")?),
            CalcOp::Correlation => correlation(&series(params, "x")?, &series(params, "y")?)?,
            CalcOp::Evaluate => evaluate(params)?,
        };
        if !result.is_finite() {
            return Err(invalid("calculation result is not a finite number"));
        }
        Ok(number(result))
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidParameters(message.into())
}

fn field(params: &Map<String, Value>, name: &str) -> Result<f64, EngineError> {
    params
        .get(name)
        .and_then(as_f64)
        .ok_or_else(|| invalid(format!("'{name}' must be a number")))
}

fn series(params: &Map<String, Value>, name: &str) -> Result<Vec<f64>, EngineError> {
    let items = params
        .get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(format!("'{name}' must be an array of numbers")))?;
    if items.is_empty() {
        return Err(invalid(format!("'{name}' must not be empty")));
    }
    items
        .iter()
        .map(|v| as_f64(v).ok_or_else(|| invalid(format!("'{name}' contains a non-number"))))
        .collect()
}

fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

fn compound_interest(params: &Map<String, Value>) -> Result<f64, EngineError> {
    let principal = field(params, "principal")?;
    let rate = field(params, "rate")?;
    let time = field(params, "time")?;
    let n = match params.get("compoundFrequency") {
        None | Some(Value::Null) => DEFAULT_COMPOUND_FREQUENCY,
        Some(_) => field(params, "compoundFrequency")?,
    };
    if n <= 0.0 {
        return Err(invalid("'compoundFrequency' must be positive"));
    }
    Ok(round2(principal * (1.0 + rate / 100.0 / n).powf(n * time)))
}

fn percentage_change(params: &Map<String, Value>) -> Result<f64, EngineError> {
    let from = field(params, "from")?;
    let to = field(params, "to")?;
    if from == 0.0 {
        return Err(invalid("percentage change from zero is undefined"));
    }
    Ok(round2((to - from) / from.abs() * 100.0))
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn standard_deviation(values: &[f64]) -> f64 {
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn correlation(x: &[f64], y: &[f64]) -> Result<f64, EngineError> {
    if x.len() != y.len() || x.len() < 2 {
        return Err(invalid("'x' and 'y' must have the same length, at least 2"));
    }
    let (mx, my) = (mean(x), mean(y));
    let cov: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    let vx: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
    let vy: f64 = y.iter().map(|b| (b - my).powi(2)).sum();
    if vx == 0.0 || vy == 0.0 {
        return Err(invalid("correlation of a constant series is undefined"));
    }
    Ok(cov / (vx.sqrt() * vy.sqrt()))
}

fn evaluate(params: &Map<String, Value>) -> Result<f64, EngineError> {
    let source = params
        .get("expression")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("'expression' must be a string"))?;
    let empty = Map::new();
    let vars = match params.get("variables") {
        Some(Value::Object(vars)) => vars,
        None | Some(Value::Null) => &empty,
        Some(_) => return Err(invalid("'variables' must be an object")),
    };
    Ok(expr::evaluate(source, vars)?)
}
