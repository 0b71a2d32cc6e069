//! Pure value transforms for `transform` steps and `apiCall` post-processing.

use serde_json::Value;
use tessera_core::EngineError;
use tessera_core::value::{as_f64, display, number};

const DEFAULT_DECIMALS: u32 = 2;

/// A named transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformFn {
    /// Parse `"$65,000.12"` into `65000.12`.
    ParseNumber,
    /// Upper-case text.
    ToUpperCase,
    /// Lower-case text.
    ToLowerCase,
    /// Round to `decimals` places (default 2).
    Round,
    /// Absolute value.
    Abs,
}

impl TransformFn {
    /// Look up a transform by name. Unknown names are `UnknownOperation`.
    pub fn from_name(name: &str) -> Result<Self, EngineError> {
        match name {
            "parseNumber" => Ok(TransformFn::ParseNumber),
            "toUpperCase" => Ok(TransformFn::ToUpperCase),
            "toLowerCase" => Ok(TransformFn::ToLowerCase),
            "round" => Ok(TransformFn::Round),
            "abs" => Ok(TransformFn::Abs),
            other => Err(EngineError::UnknownOperation(format!(
                "unknown transform '{other}'"
            ))),
        }
    }

    /// Apply the transform.
    pub fn apply(self, input: &Value, decimals: Option<u32>) -> Result<Value, EngineError> {
        match self {
            TransformFn::ParseNumber => parse_number(input).map(number),
            TransformFn::ToUpperCase => Ok(Value::String(display(input).to_uppercase())),
            TransformFn::ToLowerCase => Ok(Value::String(display(input).to_lowercase())),
            TransformFn::Round => {
                let scale = 10f64.powi(decimals.unwrap_or(DEFAULT_DECIMALS).min(15) as i32);
                numeric(input, "round").map(|n| number((n * scale).round() / scale))
            }
            TransformFn::Abs => numeric(input, "abs").map(|n| number(n.abs())),
        }
    }
}

fn numeric(input: &Value, function: &str) -> Result<f64, EngineError> {
    as_f64(input).ok_or_else(|| {
        EngineError::InvalidParameters(format!("{function} needs a number, got {input}"))
    })
}

fn parse_number(input: &Value) -> Result<f64, EngineError> {
    if let Some(n) = input.as_f64() {
        return Ok(n);
    }
    let text = input.as_str().ok_or_else(|| {
        EngineError::InvalidParameters(format!("parseNumber needs text or a number, got {input}"))
    })?;
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| EngineError::InvalidParameters(format!("'{text}' is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_number_strips_formatting() {
        let f = TransformFn::from_name("parseNumber").unwrap();
        assert_eq!(f.apply(&json!("65000.12"), None).unwrap(), json!(65000.12));
        assert_eq!(f.apply(&json!(" $1,234.5 "), None).unwrap(), json!(1234.5));
        assert_eq!(f.apply(&json!(7), None).unwrap(), json!(7.0));
        assert!(f.apply(&json!("abc"), None).is_err());
        assert!(f.apply(&json!(null), None).is_err());
    }

    #[test]
    fn rounding_and_case() {
        assert_eq!(
            TransformFn::Round.apply(&json!(3.14159), Some(3)).unwrap(),
            json!(3.142)
        );
        assert_eq!(TransformFn::Round.apply(&json!("2.5"), Some(0)).unwrap(), json!(3.0));
        assert_eq!(TransformFn::Abs.apply(&json!(-4), None).unwrap(), json!(4.0));
        assert_eq!(
            TransformFn::ToUpperCase.apply(&json!("btc"), None).unwrap(),
            json!("BTC")
        );
        assert_eq!(
            TransformFn::ToLowerCase.apply(&json!("ETH"), None).unwrap(),
            json!("eth")
        );
    }

    #[test]
    fn unknown_transform_is_an_unknown_operation() {
        assert!(matches!(
            TransformFn::from_name("eval"),
            Err(EngineError::UnknownOperation(_))
        ));
    }
}
