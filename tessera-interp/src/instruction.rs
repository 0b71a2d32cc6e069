//! Decoding raw steps into the closed instruction set.
//!
//! Every step of a recipe, nested branches included, is decoded before the
//! first one runs. A tag outside the whitelist that is not a registered
//! custom action fails with `UnknownOperation`; malformed fields fail with
//! `InvalidParameters`. Either way nothing has executed yet.

use crate::calc::CalcOp;
use crate::transform::TransformFn;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tessera_capability::CapabilityRegistry;
use tessera_core::{EngineError, ErrorKind, Intent, Step};
use tessera_provider::{Method, Requirements};

/// Which provider an API call targets.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderTarget {
    /// A provider id (may contain placeholders).
    Id(String),
    /// The best provider of a category.
    Category {
        /// Category name.
        category: String,
        /// Filters applied before scoring.
        requirements: Requirements,
    },
}

/// Post-processing applied to an API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseTransform {
    /// The transform.
    pub function: TransformFn,
    /// Apply to this top-level field instead of the whole body.
    pub field: Option<String>,
    /// Decimal places for `round`.
    pub decimals: Option<u32>,
}

/// One API call, before parameter resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    /// Provider selection.
    pub target: ProviderTarget,
    /// Endpoint name (may contain placeholders).
    pub endpoint: String,
    /// Parameters (resolved against the context at run time).
    pub params: Value,
    /// HTTP method.
    pub method: Method,
    /// JSON body (resolved at run time).
    pub body: Option<Value>,
    /// Optional response transform.
    pub transform: Option<ResponseTransform>,
}

impl ApiCall {
    /// The same call against a different provider.
    pub fn with_provider(&self, provider: &str) -> Self {
        Self {
            target: ProviderTarget::Id(provider.to_string()),
            ..self.clone()
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `apiCall`
    ApiCall(ApiCall),
    /// `parallelApiCalls`
    ParallelApiCalls(Vec<ApiCall>),
    /// `batchApiCalls`: every call against one provider, sequentially.
    BatchApiCalls {
        /// Provider id.
        provider: String,
        /// The calls; their own targets are ignored.
        calls: Vec<ApiCall>,
    },
    /// `calculate`
    Calculate {
        /// Library operation.
        operation: CalcOp,
        /// Parameters.
        params: Value,
    },
    /// `formatResponse`
    FormatResponse {
        /// Template text.
        template: String,
    },
    /// `transform`
    Transform {
        /// Context path of the input.
        input: String,
        /// The function.
        function: TransformFn,
        /// Decimal places for `round`.
        decimals: Option<u32>,
    },
    /// `conditional`
    Conditional {
        /// Boolean, `"true"`/`"false"`, context path or `${path}`.
        condition: Value,
        /// Steps run when the condition holds.
        if_true: Vec<DecodedStep>,
        /// Steps run otherwise.
        if_false: Vec<DecodedStep>,
    },
    /// `error`
    Error {
        /// Message (may contain placeholders).
        message: String,
        /// Classification, when given.
        kind: Option<ErrorKind>,
        /// Ask the user for more information.
        needs_clarification: bool,
        /// Ask the host to escalate.
        escalate: bool,
        /// Intent attached to an escalation.
        intent: Option<Intent>,
    },
    /// `<capability>.<action>`
    Custom {
        /// Qualified action name.
        action: String,
        /// Parameters.
        params: Value,
    },
}

impl Instruction {
    /// Whether step-level provider fallback applies.
    pub fn uses_providers(&self) -> bool {
        matches!(
            self,
            Instruction::ApiCall(_)
                | Instruction::ParallelApiCalls(_)
                | Instruction::BatchApiCalls { .. }
        )
    }

    /// The same instruction with every provider replaced by `provider`.
    pub fn with_provider(&self, provider: &str) -> Self {
        match self {
            Instruction::ApiCall(call) => Instruction::ApiCall(call.with_provider(provider)),
            Instruction::ParallelApiCalls(calls) => Instruction::ParallelApiCalls(
                calls.iter().map(|c| c.with_provider(provider)).collect(),
            ),
            Instruction::BatchApiCalls { calls, .. } => Instruction::BatchApiCalls {
                provider: provider.to_string(),
                calls: calls.clone(),
            },
            other => other.clone(),
        }
    }
}

/// A decoded step: the instruction plus the step's bookkeeping fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedStep {
    /// The original tag.
    pub op: String,
    /// Context key for the result.
    pub assign_to: Option<String>,
    /// Halt after this step.
    pub returns: bool,
    /// What to do.
    pub instruction: Instruction,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransform {
    function: String,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    decimals: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawApiCall {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    requirements: Requirements,
    endpoint: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    transform: Option<RawTransform>,
}

#[derive(Deserialize)]
struct RawParallel {
    calls: Vec<Value>,
}

#[derive(Deserialize)]
struct RawBatch {
    provider: String,
    calls: Vec<Value>,
}

#[derive(Deserialize)]
struct RawCalculate {
    operation: String,
    #[serde(default)]
    params: Value,
}

#[derive(Deserialize)]
struct RawFormat {
    template: String,
}

#[derive(Deserialize)]
struct RawTransformStep {
    input: String,
    function: String,
    #[serde(default)]
    decimals: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConditional {
    condition: Value,
    #[serde(default, alias = "if_true")]
    if_true: Vec<Step>,
    #[serde(default, alias = "if_false")]
    if_false: Vec<Step>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawError {
    message: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    needs_clarification: bool,
    #[serde(default)]
    escalate: bool,
    #[serde(default)]
    intent: Option<Intent>,
}

#[derive(Deserialize)]
struct RawCustom {
    #[serde(default)]
    params: Value,
}

fn fields<T: DeserializeOwned>(op: &str, fields: &Map<String, Value>) -> Result<T, EngineError> {
    serde_json::from_value(Value::Object(fields.clone()))
        .map_err(|e| EngineError::InvalidParameters(format!("{op}: {e}")))
}

fn decode_call(op: &str, raw: Value, provider_required: bool) -> Result<ApiCall, EngineError> {
    let raw: RawApiCall = serde_json::from_value(raw)
        .map_err(|e| EngineError::InvalidParameters(format!("{op}: {e}")))?;
    let target = match (raw.provider, raw.category) {
        (Some(id), _) => ProviderTarget::Id(id),
        (None, Some(category)) => ProviderTarget::Category {
            category,
            requirements: raw.requirements,
        },
        // Batch calls take their provider from the step.
        (None, None) if !provider_required => ProviderTarget::Id(String::new()),
        (None, None) => {
            return Err(EngineError::InvalidParameters(format!(
                "{op}: either 'provider' or 'category' is required"
            )));
        }
    };
    let method = raw
        .method
        .as_deref()
        .map(str::parse::<Method>)
        .transpose()?
        .unwrap_or_default();
    let transform = raw
        .transform
        .map(|t| {
            Ok::<_, EngineError>(ResponseTransform {
                function: TransformFn::from_name(&t.function)?,
                field: t.field,
                decimals: t.decimals,
            })
        })
        .transpose()?;
    Ok(ApiCall {
        target,
        endpoint: raw.endpoint,
        params: raw.params,
        method,
        body: raw.body,
        transform,
    })
}

/// Decode a list of steps, recursing into conditional branches.
pub fn decode_steps(
    steps: &[Step],
    capabilities: &CapabilityRegistry,
    max_depth: usize,
) -> Result<Vec<DecodedStep>, EngineError> {
    decode_at(steps, capabilities, 0, max_depth)
}

fn decode_at(
    steps: &[Step],
    capabilities: &CapabilityRegistry,
    depth: usize,
    max_depth: usize,
) -> Result<Vec<DecodedStep>, EngineError> {
    if depth > max_depth {
        return Err(EngineError::InvalidParameters(format!(
            "conditional nesting exceeds {max_depth} levels"
        )));
    }
    steps
        .iter()
        .map(|step| decode_step(step, capabilities, depth, max_depth))
        .collect()
}

fn decode_step(
    step: &Step,
    capabilities: &CapabilityRegistry,
    depth: usize,
    max_depth: usize,
) -> Result<DecodedStep, EngineError> {
    let op = step.op.as_str();
    let instruction = match op {
        "apiCall" => Instruction::ApiCall(decode_call(op, Value::Object(step.fields.clone()), true)?),
        "parallelApiCalls" => {
            let raw: RawParallel = fields(op, &step.fields)?;
            Instruction::ParallelApiCalls(
                raw.calls
                    .into_iter()
                    .map(|c| decode_call(op, c, true))
                    .collect::<Result<_, _>>()?,
            )
        }
        "batchApiCalls" => {
            let raw: RawBatch = fields(op, &step.fields)?;
            Instruction::BatchApiCalls {
                provider: raw.provider,
                calls: raw
                    .calls
                    .into_iter()
                    .map(|c| decode_call(op, c, false))
                    .collect::<Result<_, _>>()?,
            }
        }
        "calculate" => {
            let raw: RawCalculate = fields(op, &step.fields)?;
            Instruction::Calculate {
                operation: CalcOp::from_name(&raw.operation)?,
                params: raw.params,
            }
        }
        "formatResponse" => {
            let raw: RawFormat = fields(op, &step.fields)?;
            Instruction::FormatResponse {
                template: raw.template,
            }
        }
        "transform" => {
            let raw: RawTransformStep = fields(op, &step.fields)?;
            Instruction::Transform {
                input: raw.input,
                function: TransformFn::from_name(&raw.function)?,
                decimals: raw.decimals,
            }
        }
        "conditional" => {
            let raw: RawConditional = fields(op, &step.fields)?;
            Instruction::Conditional {
                condition: raw.condition,
                if_true: decode_at(&raw.if_true, capabilities, depth + 1, max_depth)?,
                if_false: decode_at(&raw.if_false, capabilities, depth + 1, max_depth)?,
            }
        }
        "error" => {
            let raw: RawError = fields(op, &step.fields)?;
            let kind = raw
                .kind
                .map(|name| {
                    ErrorKind::from_name(&name).ok_or_else(|| {
                        EngineError::InvalidParameters(format!("error: unknown kind '{name}'"))
                    })
                })
                .transpose()?;
            Instruction::Error {
                message: raw.message,
                kind,
                needs_clarification: raw.needs_clarification,
                escalate: raw.escalate,
                intent: raw.intent,
            }
        }
        qualified if qualified.contains('.') && capabilities.has_action(qualified) => {
            let raw: RawCustom = fields(op, &step.fields)?;
            Instruction::Custom {
                action: qualified.to_string(),
                params: raw.params,
            }
        }
        other => {
            return Err(EngineError::UnknownOperation(format!(
                "step type '{other}' is not allowed"
            )));
        }
    };
    Ok(DecodedStep {
        op: step.op.clone(),
        assign_to: step.assign_to.clone(),
        returns: step.returns,
        instruction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tessera_capability::{Capability, action_fn};
    use tessera_provider::ProviderRegistry;

    fn registry() -> CapabilityRegistry {
        let reg = CapabilityRegistry::new(Arc::new(ProviderRegistry::new()));
        reg.install(
            Capability::new("email", "1.0.0")
                .trigger("email")
                .action("validate", action_fn(|_: Value| async { Ok(json!(true)) })),
        )
        .unwrap();
        reg
    }

    fn step(value: Value) -> Step {
        Step::from_json(value).unwrap()
    }

    fn decode(steps: Vec<Step>) -> Result<Vec<DecodedStep>, EngineError> {
        decode_steps(&steps, &registry(), 16)
    }

    #[test]
    fn decodes_api_call_defaults() {
        let decoded = decode(vec![step(json!({
            "type": "apiCall",
            "provider": "primary-crypto",
            "endpoint": "price",
            "params": {"symbol": "btc"},
            "transform": {"function": "parseNumber"},
            "assignTo": "price"
        }))])
        .unwrap();
        let Instruction::ApiCall(call) = &decoded[0].instruction else {
            panic!("expected apiCall");
        };
        assert_eq!(call.method, Method::Get);
        assert_eq!(call.target, ProviderTarget::Id("primary-crypto".into()));
        assert_eq!(call.transform.as_ref().unwrap().function, TransformFn::ParseNumber);
        assert_eq!(decoded[0].assign_to.as_deref(), Some("price"));
    }

    #[test]
    fn category_calls_carry_requirements() {
        let decoded = decode(vec![step(json!({
            "type": "apiCall",
            "category": "crypto",
            "requirements": {"maxCost": 0.01},
            "endpoint": "price"
        }))])
        .unwrap();
        let Instruction::ApiCall(call) = &decoded[0].instruction else {
            panic!("expected apiCall");
        };
        assert!(matches!(
            &call.target,
            ProviderTarget::Category { category, requirements }
                if category == "crypto" && requirements.max_cost == Some(0.01)
        ));
    }

    #[test]
    fn unknown_tags_are_rejected_even_when_nested() {
        let err = decode(vec![
            step(json!({"type": "formatResponse", "template": "hi"})),
            step(json!({
                "type": "conditional",
                "condition": true,
                "ifTrue": [{"type": "exec", "command": "rm -rf /"}],
                "ifFalse": []
            })),
        ])
        .unwrap_err();
        assert!(matches!(err, EngineError::UnknownOperation(_)));
    }

    #[test]
    fn custom_actions_must_be_registered() {
        assert!(decode(vec![step(json!({"type": "email.validate", "params": {}}))]).is_ok());
        let err = decode(vec![step(json!({"type": "email.delete"}))]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownOperation(_)));
    }

    #[test]
    fn snake_case_branch_aliases() {
        let decoded = decode(vec![step(json!({
            "type": "conditional",
            "condition": "${ok}",
            "if_true": [{"type": "formatResponse", "template": "yes"}],
            "if_false": [{"type": "formatResponse", "template": "no"}]
        }))])
        .unwrap();
        let Instruction::Conditional { if_true, if_false, .. } = &decoded[0].instruction else {
            panic!("expected conditional");
        };
        assert_eq!(if_true.len(), 1);
        assert_eq!(if_false.len(), 1);
    }

    #[test]
    fn malformed_fields_and_unknown_functions() {
        let err = decode(vec![step(json!({"type": "calculate", "operation": "shell"}))]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownOperation(_)));

        let err = decode(vec![step(json!({"type": "formatResponse"}))]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameters(_)));

        let err = decode(vec![step(json!({"type": "apiCall", "endpoint": "price"}))]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameters(_)));

        let err = decode(vec![step(json!({"type": "error", "message": "x", "kind": "Nope"}))])
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameters(_)));
    }

    #[test]
    fn nesting_is_bounded() {
        let mut inner = json!({"type": "formatResponse", "template": "deep"});
        for _ in 0..5 {
            inner = json!({"type": "conditional", "condition": true, "ifTrue": [inner]});
        }
        let steps = vec![step(inner)];
        assert!(decode_steps(&steps, &registry(), 5).is_ok());
        assert!(decode_steps(&steps, &registry(), 4).is_err());
    }

    #[test]
    fn fallback_substitution_replaces_every_provider() {
        let decoded = decode(vec![step(json!({
            "type": "parallelApiCalls",
            "calls": [
                {"provider": "a", "endpoint": "price"},
                {"category": "crypto", "endpoint": "price"}
            ]
        }))])
        .unwrap();
        let Instruction::ParallelApiCalls(calls) = decoded[0].instruction.with_provider("backup")
        else {
            panic!("expected parallelApiCalls");
        };
        assert!(calls.iter().all(|c| c.target == ProviderTarget::Id("backup".into())));
    }
}
