//! The per-execution key/value store.

use crate::error::EngineError;
use crate::template::{Template, UnresolvedPolicy};
use crate::value;
use serde_json::{Map, Value};

/// Key/value store scoped to exactly one recipe execution.
///
/// Written only through a step's `assignTo`, read only through placeholder
/// substitution. Never shared across executions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a step result. Later steps see the new value.
    pub fn assign(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Read a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Resolve a dotted path (`quote.price`, `results.0.name`).
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let head = segments.next()?;
        let root = self.values.get(head)?;
        let rest: Vec<&str> = segments.collect();
        value::lookup_path(root, &rest)
    }

    /// Number of keys written so far.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Snapshot of the whole context as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Render a template string against this context.
    pub fn render(&self, template: &str, policy: UnresolvedPolicy) -> Result<String, EngineError> {
        Template::parse(template).render(|path| self.resolve(path).cloned(), policy)
    }

    /// Resolve every string inside `input` against this context.
    ///
    /// A string that is exactly one reference yields the referenced value
    /// itself (numbers stay numbers); other strings are rendered to text.
    /// Objects and arrays are resolved recursively; other values are
    /// returned unchanged.
    pub fn resolve_value(&self, input: &Value, policy: UnresolvedPolicy) -> Result<Value, EngineError> {
        match input {
            Value::String(s) => {
                let template = Template::parse(s);
                if let Some(path) = template.single_reference() {
                    if let Some(v) = self.resolve(path) {
                        return Ok(v.clone());
                    }
                }
                template
                    .render(|path| self.resolve(path).cloned(), policy)
                    .map(Value::String)
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item, policy))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (k, v) in map {
                    resolved.insert(k.clone(), self.resolve_value(v, policy)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }
}
