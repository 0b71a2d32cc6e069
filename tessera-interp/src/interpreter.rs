//! The step interpreter.

use crate::config::InterpreterConfig;
use crate::instruction::{ApiCall, DecodedStep, Instruction, ProviderTarget, ResponseTransform, decode_steps};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tessera_capability::CapabilityRegistry;
use tessera_core::template::Template;
use tessera_core::value::is_truthy;
use tessera_core::{
    DurationMs, EngineError, ExecutionContext, ExecutionRecord, ExecutionStatus, Recipe,
    StepStatus,
};
use tessera_provider::{CallSpec, ProviderEntry, ProviderRegistry, Transport, dispatch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type StepsFuture<'a> = Pin<Box<dyn Future<Output = Result<Flow, EngineError>> + Send + 'a>>;

/// What a finished step tells the step loop.
enum Flow {
    /// Keep going; the value is the step's result.
    Continue(Value),
    /// A `returns` step halted the recipe with this value.
    Return(Value),
}

/// Everything one execution produced.
#[derive(Debug, Clone)]
pub struct Execution {
    /// The recipe result, or the failure that ended it.
    pub result: Result<Value, EngineError>,
    /// The audit trail.
    pub record: ExecutionRecord,
    /// The context as it stood when execution ended.
    pub context: ExecutionContext,
}

impl Execution {
    /// Whether the recipe produced a result.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Executes recipes over the closed instruction set.
///
/// Each call to [`execute`](Self::execute) gets its own context and record,
/// so one interpreter may run many recipes concurrently.
pub struct Interpreter {
    capabilities: Arc<CapabilityRegistry>,
    transport: Arc<dyn Transport>,
    config: InterpreterConfig,
}

impl Interpreter {
    /// An interpreter calling providers of `capabilities.providers()` over
    /// `transport`.
    pub fn new(capabilities: Arc<CapabilityRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            capabilities,
            transport,
            config: InterpreterConfig::default(),
        }
    }

    /// Override the settings.
    #[must_use]
    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    /// Current settings.
    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    fn providers(&self) -> &ProviderRegistry {
        self.capabilities.providers()
    }

    /// Execute `recipe` to completion.
    pub async fn execute(&self, recipe: &Recipe) -> Execution {
        self.execute_with_cancellation(recipe, CancellationToken::new())
            .await
    }

    /// Execute `recipe`, stopping early when `cancel` fires.
    ///
    /// Every step is decoded before the first one runs; a rejected recipe
    /// performs no calls and leaves the context empty. Cancellation drops
    /// the in-flight step, aborting any outstanding parallel branches.
    pub async fn execute_with_cancellation(
        &self,
        recipe: &Recipe,
        cancel: CancellationToken,
    ) -> Execution {
        let mut run = Run {
            interpreter: self,
            fallbacks: recipe
                .fallbacks_by_priority()
                .into_iter()
                .map(|f| f.provider.clone())
                .collect(),
            context: ExecutionContext::new(),
            record: ExecutionRecord::start(),
        };

        let outcome = match decode_steps(&recipe.steps, &self.capabilities, self.config.max_depth) {
            Err(err) => Err(err),
            Ok(steps) => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(EngineError::Cancelled),
                    flow = run.steps(&steps, "") => flow,
                }
            }
        };

        let (status, result) = match outcome {
            Ok(Flow::Continue(value)) => (ExecutionStatus::Completed, Ok(value)),
            Ok(Flow::Return(value)) => (ExecutionStatus::Returned, Ok(value)),
            Err(EngineError::Cancelled) => (ExecutionStatus::Cancelled, Err(EngineError::Cancelled)),
            Err(err) => (ExecutionStatus::Failed, Err(err)),
        };

        let Run {
            mut record,
            context,
            ..
        } = run;
        for trace in record.steps.iter_mut().filter(|s| s.status == StepStatus::Running) {
            trace.status = StepStatus::Failed;
            trace.error = Some(EngineError::Cancelled.to_string());
        }
        record.finish(status);
        tracing::info!(
            execution = %record.id,
            status = ?record.status,
            elapsed_ms = record.elapsed().map_or(0, |d| d.as_millis()),
            steps = record.steps.len(),
            "execution finished"
        );

        Execution {
            result,
            record,
            context,
        }
    }

    /// Resolve a call against the context and pick its provider.
    fn prepare(&self, call: &ApiCall, context: &ExecutionContext) -> Result<PreparedCall, EngineError> {
        let policy = self.config.unresolved;
        let entry = match &call.target {
            ProviderTarget::Id(id) => self.providers().require(&context.render(id, policy)?)?,
            ProviderTarget::Category {
                category,
                requirements,
            } => self
                .providers()
                .select_best(&context.render(category, policy)?, requirements)?,
        };
        let params = match context.resolve_value(&call.params, policy)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(EngineError::InvalidParameters(format!(
                    "call params must be an object, got {other}"
                )));
            }
        };
        let body = call
            .body
            .as_ref()
            .map(|b| context.resolve_value(b, policy))
            .transpose()?;
        let mut spec = CallSpec::new(context.render(&call.endpoint, policy)?)
            .with_params(params)
            .with_method(call.method);
        if let Some(body) = body {
            spec = spec.with_body(body);
        }
        Ok(PreparedCall {
            entry,
            spec,
            transform: call.transform.clone(),
        })
    }

    /// Run one non-conditional instruction. Returns the value and the
    /// provider that produced it, if any.
    async fn perform(
        &self,
        instruction: &Instruction,
        context: &ExecutionContext,
    ) -> Result<(Value, Option<String>), EngineError> {
        let policy = self.config.unresolved;
        match instruction {
            Instruction::ApiCall(call) => {
                let prepared = self.prepare(call, context)?;
                let provider = prepared.entry.id().to_string();
                let value = prepared
                    .send(self.transport.as_ref(), self.config.call_timeout())
                    .await?;
                Ok((value, Some(provider)))
            }
            Instruction::ParallelApiCalls(calls) => {
                self.fan_out(calls, context).await.map(|v| (v, None))
            }
            Instruction::BatchApiCalls { provider, calls } => {
                let provider = context.render(provider, policy)?;
                self.batch(&provider, calls, context)
                    .await
                    .map(|v| (v, Some(provider)))
            }
            Instruction::Calculate { operation, params } => {
                let params = context.resolve_value(params, policy)?;
                operation.run(&params).map(|v| (v, None))
            }
            Instruction::FormatResponse { template } => context
                .render(template, policy)
                .map(|text| (Value::String(text), None)),
            Instruction::Transform {
                input,
                function,
                decimals,
            } => {
                let parsed = Template::parse(input);
                let path = parsed.single_reference().unwrap_or(input.as_str());
                let value = context.resolve(path).ok_or_else(|| {
                    EngineError::InvalidParameters(format!("transform input '{path}' is not set"))
                })?;
                function.apply(value, *decimals).map(|v| (v, None))
            }
            Instruction::Error {
                message,
                kind,
                needs_clarification,
                escalate,
                intent,
            } => {
                let message = context.render(message, policy)?;
                Err(if *escalate {
                    EngineError::Escalation {
                        message,
                        intent: intent.clone().map(Box::new),
                    }
                } else if *needs_clarification {
                    EngineError::Clarification(message)
                } else {
                    match kind {
                        Some(kind) => EngineError::from_kind(*kind, message),
                        None => EngineError::Unknown(message),
                    }
                })
            }
            Instruction::Custom { action, params } => {
                let handler = self.capabilities.action(action).ok_or_else(|| {
                    EngineError::UnknownOperation(format!("custom action '{action}' is not registered"))
                })?;
                let params = context.resolve_value(params, policy)?;
                handler.invoke(params).await.map(|v| (v, None))
            }
            Instruction::Conditional { .. } => Err(EngineError::Unknown(
                "conditional steps are run by the step loop".into(),
            )),
        }
    }

    /// Run every call concurrently and collect results in declaration order.
    async fn fan_out(&self, calls: &[ApiCall], context: &ExecutionContext) -> Result<Value, EngineError> {
        let total = calls.len();
        let mut slots: Vec<Result<Value, EngineError>> = Vec::with_capacity(total);
        let mut tasks = JoinSet::new();
        let mut branches = HashMap::new();
        let timeout = self.config.call_timeout();

        for (index, call) in calls.iter().enumerate() {
            match self.prepare(call, context) {
                Ok(prepared) => {
                    slots.push(Err(EngineError::Unknown(format!(
                        "branch {index} did not complete"
                    ))));
                    let transport = Arc::clone(&self.transport);
                    let handle = tasks.spawn(async move {
                        (index, prepared.send(transport.as_ref(), timeout).await)
                    });
                    branches.insert(handle.id(), index);
                }
                Err(err) => slots.push(Err(err)),
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = result,
                Err(err) => {
                    tracing::warn!(error = %err, "parallel branch aborted");
                    if let Some(&index) = branches.get(&err.id()) {
                        slots[index] = Err(EngineError::Unknown(format!(
                            "branch {index} did not complete: {err}"
                        )));
                    }
                }
            }
        }

        let mut successful = Vec::new();
        let mut failures = Vec::new();
        for slot in slots {
            match slot {
                Ok(value) => successful.push(value),
                Err(err) => failures.push(err),
            }
        }
        if total > 0 && successful.is_empty() {
            return Err(EngineError::AllCallsFailed { failures });
        }
        for err in &failures {
            tracing::debug!(error = %err, "parallel branch failed");
        }
        Ok(json!({
            "successful": successful,
            "failed": failures.len(),
            "total": total,
        }))
    }

    /// Run every call against one provider in order, without early abort.
    async fn batch(
        &self,
        provider: &str,
        calls: &[ApiCall],
        context: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let timeout = self.config.call_timeout();
        let mut results = Vec::with_capacity(calls.len());
        let mut failures = Vec::new();
        for call in calls {
            let outcome = match self.prepare(&call.with_provider(provider), context) {
                Ok(prepared) => prepared.send(self.transport.as_ref(), timeout).await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(data) => results.push(json!({"success": true, "data": data})),
                Err(err) => {
                    results.push(json!({"success": false, "error": err.to_string()}));
                    failures.push(err);
                }
            }
        }
        if !calls.is_empty() && failures.len() == calls.len() {
            return Err(EngineError::AllCallsFailed { failures });
        }
        Ok(Value::Array(results))
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A call with parameters resolved and a provider chosen.
struct PreparedCall {
    entry: Arc<ProviderEntry>,
    spec: CallSpec,
    transform: Option<ResponseTransform>,
}

impl PreparedCall {
    async fn send(&self, transport: &dyn Transport, timeout: Duration) -> Result<Value, EngineError> {
        let body = dispatch(&self.entry, transport, &self.spec, timeout).await?;
        apply_transform(body, self.transform.as_ref())
    }
}

fn apply_transform(body: Value, transform: Option<&ResponseTransform>) -> Result<Value, EngineError> {
    let Some(transform) = transform else {
        return Ok(body);
    };
    let Some(field) = &transform.field else {
        return transform.function.apply(&body, transform.decimals);
    };
    let mut body = body;
    let target = body
        .as_object_mut()
        .and_then(|map| map.get_mut(field))
        .ok_or_else(|| {
            EngineError::InvalidParameters(format!("response has no field '{field}'"))
        })?;
    *target = transform.function.apply(target, transform.decimals)?;
    Ok(body)
}

/// State of one execution.
struct Run<'a> {
    interpreter: &'a Interpreter,
    fallbacks: Vec<String>,
    context: ExecutionContext,
    record: ExecutionRecord,
}

impl Run<'_> {
    fn steps<'s>(&'s mut self, steps: &'s [DecodedStep], prefix: &'s str) -> StepsFuture<'s> {
        Box::pin(async move {
            let mut last = Value::Null;
            for (i, step) in steps.iter().enumerate() {
                let path = if prefix.is_empty() {
                    i.to_string()
                } else {
                    format!("{prefix}/{i}")
                };
                match self.step(step, path).await? {
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Continue(value) => last = value,
                }
            }
            Ok(Flow::Continue(last))
        })
    }

    async fn step(&mut self, step: &DecodedStep, path: String) -> Result<Flow, EngineError> {
        tracing::debug!(path = %path, op = %step.op, "step started");
        let index = self.record.begin_step(path.clone(), &step.op);
        let started = Instant::now();

        let outcome = match &step.instruction {
            Instruction::Conditional {
                condition,
                if_true,
                if_false,
            } => {
                let flow = match self.condition(condition) {
                    Ok(true) => self.steps(if_true, &format!("{path}/ifTrue")).await,
                    Ok(false) => self.steps(if_false, &format!("{path}/ifFalse")).await,
                    Err(err) => Err(err),
                };
                flow.map(|flow| (flow, None, StepStatus::Completed))
            }
            instruction => self
                .attempt(instruction)
                .await
                .map(|(value, provider, status)| (Flow::Continue(value), provider, status)),
        };

        let elapsed = DurationMs::from(started.elapsed());
        let trace = self.record.step_mut(index);
        match outcome {
            Ok((flow, provider, status)) => {
                if let Some(trace) = trace {
                    trace.status = status;
                    trace.provider = provider;
                    trace.duration = elapsed;
                }
                let (value, halted) = match flow {
                    Flow::Continue(value) => (value, step.returns),
                    Flow::Return(value) => (value, true),
                };
                if let Some(key) = &step.assign_to {
                    self.context.assign(key.clone(), value.clone());
                }
                Ok(if halted {
                    Flow::Return(value)
                } else {
                    Flow::Continue(value)
                })
            }
            Err(err) => {
                if let Some(trace) = trace {
                    trace.status = StepStatus::Failed;
                    trace.duration = elapsed;
                    trace.error = Some(err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Run an instruction, then its fallback providers in priority order.
    async fn attempt(
        &self,
        instruction: &Instruction,
    ) -> Result<(Value, Option<String>, StepStatus), EngineError> {
        let original = match self.interpreter.perform(instruction, &self.context).await {
            Ok((value, provider)) => return Ok((value, provider, StepStatus::Completed)),
            Err(err) => err,
        };
        if !instruction.uses_providers() || !original.allows_fallback() {
            return Err(original);
        }
        for provider in &self.fallbacks {
            tracing::warn!(provider = %provider, error = %original, "step failed, trying fallback");
            match self
                .interpreter
                .perform(&instruction.with_provider(provider), &self.context)
                .await
            {
                Ok((value, _)) => {
                    return Ok((value, Some(provider.clone()), StepStatus::CompletedViaFallback));
                }
                Err(err) => tracing::warn!(provider = %provider, error = %err, "fallback failed"),
            }
        }
        Err(original)
    }

    /// Resolve a `conditional` condition. A path that is not set is false.
    fn condition(&self, condition: &Value) -> Result<bool, EngineError> {
        let Value::String(text) = condition else {
            return Ok(is_truthy(condition));
        };
        match text.trim() {
            "true" => return Ok(true),
            "false" => return Ok(false),
            _ => {}
        }
        let template = Template::parse(text);
        if let Some(path) = template.single_reference() {
            return Ok(self.context.resolve(path).is_some_and(is_truthy));
        }
        if template.references().next().is_some() {
            let rendered = self
                .context
                .render(text, self.interpreter.config.unresolved)?;
            return Ok(is_truthy(&Value::String(rendered)));
        }
        Ok(self.context.resolve(text.trim()).is_some_and(is_truthy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{ErrorKind, Step};
    use tessera_provider::test_utils::{Reply, StubTransport};
    use tessera_provider::ProviderManifest;

    fn interpreter(stub: StubTransport) -> (Interpreter, Arc<StubTransport>) {
        let providers = Arc::new(ProviderRegistry::new());
        for id in ["alpha", "beta", "gamma"] {
            providers
                .register(
                    id,
                    ProviderManifest::new(format!("https://{id}.test"))
                        .endpoint("price", "/price/{symbol}")
                        .category("crypto"),
                )
                .unwrap();
        }
        let capabilities = Arc::new(CapabilityRegistry::new(providers));
        let stub = Arc::new(stub);
        let transport: Arc<dyn Transport> = stub.clone();
        (Interpreter::new(capabilities, transport), stub)
    }

    fn call(provider: &str) -> Step {
        Step::new("apiCall")
            .with("provider", provider)
            .with("endpoint", "price")
            .with("params", json!({"symbol": "btc"}))
    }

    #[tokio::test]
    async fn last_value_is_the_result_without_returns() {
        let (interp, _) = interpreter(StubTransport::new());
        let recipe = Recipe::new(
            1.0,
            vec![
                Step::new("calculate")
                    .with("operation", "mean")
                    .with("params", json!({"values": [1, 2, 3]}))
                    .assign_to("avg"),
                Step::new("formatResponse").with("template", "avg=${avg}"),
            ],
        );
        let execution = interp.execute(&recipe).await;
        assert_eq!(execution.result.unwrap(), json!("avg=2"));
        assert_eq!(execution.record.status, ExecutionStatus::Completed);
        assert_eq!(execution.context.get("avg"), Some(&json!(2.0)));
    }

    #[tokio::test]
    async fn returns_halts_the_recipe() {
        let (interp, stub) = interpreter(StubTransport::new());
        let recipe = Recipe::new(
            1.0,
            vec![
                Step::new("formatResponse").with("template", "done").returning(),
                call("alpha"),
            ],
        );
        let execution = interp.execute(&recipe).await;
        assert_eq!(execution.result.unwrap(), json!("done"));
        assert_eq!(execution.record.status, ExecutionStatus::Returned);
        assert_eq!(execution.record.steps.len(), 1);
        assert_eq!(stub.request_count(), 0);
    }

    #[tokio::test]
    async fn empty_recipe_yields_null() {
        let (interp, _) = interpreter(StubTransport::new());
        let execution = interp.execute(&Recipe::new(1.0, vec![])).await;
        assert_eq!(execution.result.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn response_field_transform() {
        let stub = StubTransport::new().route("alpha", Reply::ok(json!({"price": "$1,250.50"})));
        let (interp, _) = interpreter(stub);
        let step = call("alpha")
            .with("transform", json!({"function": "parseNumber", "field": "price"}))
            .assign_to("quote");
        let execution = interp.execute(&Recipe::new(1.0, vec![step])).await;
        assert_eq!(execution.result.unwrap(), json!({"price": 1250.5}));
    }

    #[tokio::test]
    async fn category_selection_prefers_the_healthier_provider() {
        let stub = StubTransport::new()
            .route("alpha", Reply::ok(json!(1)))
            .route("beta", Reply::ok(json!(2)))
            .route("gamma", Reply::ok(json!(3)));
        let (interp, _) = interpreter(stub);
        let providers = interp.providers();
        for _ in 0..3 {
            providers.record_call("alpha", false).unwrap();
            providers.record_call("gamma", false).unwrap();
        }
        let step = Step::new("apiCall")
            .with("category", "crypto")
            .with("endpoint", "price")
            .with("params", json!({"symbol": "btc"}));
        let execution = interp.execute(&Recipe::new(1.0, vec![step])).await;
        assert_eq!(execution.result.unwrap(), json!(2));
        assert_eq!(execution.record.steps[0].provider.as_deref(), Some("beta"));
    }

    #[tokio::test]
    async fn batch_tags_each_call_without_aborting() {
        let stub = StubTransport::new()
            .route("https://alpha.test/price/btc", Reply::ok(json!(1)))
            .route("https://alpha.test/price/eth", Reply::status(500, json!("down")));
        let (interp, stub) = interpreter(stub);
        let step = Step::new("batchApiCalls").with("provider", "alpha").with(
            "calls",
            json!([
                {"endpoint": "price", "params": {"symbol": "eth"}},
                {"endpoint": "price", "params": {"symbol": "btc"}}
            ]),
        );
        let execution = interp.execute(&Recipe::new(1.0, vec![step])).await;
        let results = execution.result.unwrap();
        assert_eq!(results[0]["success"], json!(false));
        assert_eq!(results[1], json!({"success": true, "data": 1}));
        assert_eq!(stub.request_count(), 2);
    }

    #[tokio::test]
    async fn error_steps_are_classified() {
        let (interp, _) = interpreter(StubTransport::new());
        let cases = [
            (json!({"message": "which account?", "needsClarification": true}), ErrorKind::AmbiguousIntent),
            (json!({"message": "slow down", "kind": "RateLimited"}), ErrorKind::RateLimited),
            (json!({"message": "no idea"}), ErrorKind::Unknown),
        ];
        for (fields, kind) in cases {
            let mut step = Step::new("error");
            if let Value::Object(map) = fields {
                step.fields.extend(map);
            }
            let err = interp
                .execute(&Recipe::new(1.0, vec![step]))
                .await
                .result
                .unwrap_err();
            assert_eq!(err.kind(), kind);
        }
    }

    #[tokio::test]
    async fn failed_steps_are_traced_and_not_retried_without_fallbacks() {
        let stub = StubTransport::new().route("alpha", Reply::fail("connection reset"));
        let (interp, stub) = interpreter(stub);
        let execution = interp.execute(&Recipe::new(1.0, vec![call("alpha")])).await;
        assert_eq!(execution.result.unwrap_err().kind(), ErrorKind::ApiFailure);
        assert_eq!(execution.record.status, ExecutionStatus::Failed);
        assert_eq!(execution.record.steps[0].status, StepStatus::Failed);
        assert_eq!(stub.request_count(), 1);
    }

    #[tokio::test]
    async fn fatal_failures_skip_fallbacks() {
        let stub = StubTransport::new()
            .route("alpha", Reply::status(401, json!("bad key")))
            .route("beta", Reply::ok(json!(2)));
        let (interp, stub) = interpreter(stub);
        let recipe = Recipe::new(1.0, vec![call("alpha")]).with_fallback("beta", 0.9);
        let execution = interp.execute(&recipe).await;
        assert_eq!(
            execution.result.unwrap_err().kind(),
            ErrorKind::AuthenticationFailure
        );
        assert_eq!(stub.requests_to("beta"), 0);
    }

    #[tokio::test]
    async fn conditional_paths_and_string_conditions() {
        let (interp, _) = interpreter(StubTransport::new());
        let branch = |text: &str| json!([{"type": "formatResponse", "template": text}]);
        let recipe = Recipe::new(
            1.0,
            vec![
                Step::new("calculate")
                    .with("operation", "mean")
                    .with("params", json!({"values": [0]}))
                    .assign_to("zero"),
                Step::new("conditional")
                    .with("condition", "zero")
                    .with("ifTrue", branch("nonzero"))
                    .with("ifFalse", branch("zero"))
                    .assign_to("first"),
                Step::new("conditional")
                    .with("condition", "missing.path")
                    .with("ifTrue", branch("set"))
                    .with("ifFalse", branch("unset"))
                    .assign_to("second"),
                Step::new("conditional")
                    .with("condition", "true")
                    .with("ifTrue", branch("${first}/${second}")),
            ],
        );
        let execution = interp.execute(&recipe).await;
        assert_eq!(execution.result.unwrap(), json!("zero/unset"));
        assert!(execution.record.step("1/ifFalse/0").is_some());
        assert!(execution.record.step("3/ifTrue/0").is_some());
    }
}
