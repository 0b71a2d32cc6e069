//! Tokenized string templates.
//!
//! A template is parsed once into literal segments and path references:
//!
//! ```text
//! "Price of ${target} is ${price|currency}"
//!   -> Literal("Price of ") Ref(target) Literal(" is ") Ref(price, Currency)
//! ```
//!
//! Rendering substitutes values into the segment list. Substituted text is
//! never scanned again, so a `${` that arrives inside user content or a
//! provider response stays inert. `\${` in a template is a literal `${` and
//! `\\` a literal backslash.
//! Anything that does not tokenize as a well-formed reference (unclosed
//! brace, empty path, unknown filter) is kept as literal text.

use crate::error::EngineError;
use crate::value;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What to do when a reference has no value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnresolvedPolicy {
    /// Leave the placeholder text in the output unchanged.
    #[default]
    PassThrough,
    /// Fail with `InvalidParameters`.
    Error,
}

/// Presentation filter applied to a referenced value (`${price|currency}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// `$65,000.12`
    Currency,
    /// `65,000.12`
    Number,
    /// `12.50%`
    Percent,
    /// Upper case.
    Upper,
    /// Lower case.
    Lower,
}

impl Filter {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "currency" => Some(Filter::Currency),
            "number" => Some(Filter::Number),
            "percent" => Some(Filter::Percent),
            "upper" => Some(Filter::Upper),
            "lower" => Some(Filter::Lower),
            _ => None,
        }
    }

    /// Apply the filter to a value, producing text.
    pub fn apply(self, v: &Value) -> String {
        match self {
            Filter::Currency => match value::as_f64(v) {
                Some(n) if n < 0.0 => format!("-${}", group_thousands(-n)),
                Some(n) => format!("${}", group_thousands(n)),
                None => value::display(v),
            },
            Filter::Number => value::as_f64(v).map_or_else(|| value::display(v), group_thousands),
            Filter::Percent => match value::as_f64(v) {
                Some(n) => format!("{n:.2}%"),
                None => value::display(v),
            },
            Filter::Upper => value::display(v).to_uppercase(),
            Filter::Lower => value::display(v).to_lowercase(),
        }
    }
}

/// Format with two decimals and comma thousands separators.
fn group_thousands(n: f64) -> String {
    let fixed = format!("{:.2}", n.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if n < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Text copied through verbatim.
    Literal(String),
    /// A `${path}` or `${path|filter}` reference.
    Reference {
        /// Dotted path, e.g. `quote.price`.
        path: String,
        /// Optional presentation filter.
        filter: Option<Filter>,
        /// The original placeholder text, used for pass-through.
        raw: String,
    },
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Tokenize a template. Parsing never fails: malformed placeholders are
    /// literal text.
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix("\\\\") {
                literal.push('\\');
                rest = after;
                continue;
            }
            if let Some(after) = rest.strip_prefix("\\${") {
                literal.push_str("${");
                rest = after;
                continue;
            }
            if let Some(after) = rest.strip_prefix("${") {
                if let Some(close) = after.find('}') {
                    let inner = &after[..close];
                    let raw = &rest[..close + 3];
                    if let Some((path, filter)) = parse_reference(inner) {
                        if !literal.is_empty() {
                            segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        }
                        segments.push(Segment::Reference {
                            path,
                            filter,
                            raw: raw.to_string(),
                        });
                    } else {
                        literal.push_str(raw);
                    }
                    rest = &after[close + 1..];
                    continue;
                }
                literal.push_str(rest);
                break;
            }
            let mut chars = rest.chars();
            if let Some(ch) = chars.next() {
                literal.push(ch);
            }
            rest = chars.as_str();
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Self { segments }
    }

    /// The parsed segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Paths referenced by this template, in order of appearance.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Reference { path, .. } => Some(path.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// If the whole template is exactly one unfiltered reference, its path.
    ///
    /// Such templates substitute the referenced value itself rather than its
    /// text, so `"${principal}"` can carry a number.
    pub fn single_reference(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [Segment::Reference { path, filter: None, .. }] => Some(path),
            _ => None,
        }
    }

    /// Render to final text.
    pub fn render<F>(&self, mut lookup: F, policy: UnresolvedPolicy) -> Result<String, EngineError>
    where
        F: FnMut(&str) -> Option<Value>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Reference { path, filter, raw } => match lookup(path) {
                    Some(v) => out.push_str(&render_value(&v, *filter)),
                    None => match policy {
                        UnresolvedPolicy::PassThrough => out.push_str(raw),
                        UnresolvedPolicy::Error => {
                            return Err(EngineError::InvalidParameters(format!(
                                "unresolved placeholder '{path}'"
                            )));
                        }
                    },
                },
            }
        }
        Ok(out)
    }

    /// Partially substitute, producing template source rather than final
    /// text: unresolved references are kept, and both literals and
    /// substituted values are re-escaped so that the result parses back to
    /// the same literal content.
    pub fn substitute<F>(&self, mut lookup: F) -> String
    where
        F: FnMut(&str) -> Option<Value>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(&escape(text)),
                Segment::Reference { path, filter, raw } => match lookup(path) {
                    Some(v) => out.push_str(&escape(&render_value(&v, *filter))),
                    None => out.push_str(raw),
                },
            }
        }
        out
    }
}

/// Whether `text` contains at least one well-formed reference.
pub fn has_references(text: &str) -> bool {
    Template::parse(text).references().next().is_some()
}

/// Escape `text` so that it parses back as the same literal: a trailing
/// backslash cannot swallow the `$` of a following reference.
pub fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace("${", "\\${")
}

fn render_value(v: &Value, filter: Option<Filter>) -> String {
    match filter {
        Some(f) => f.apply(v),
        None => value::display(v),
    }
}

fn parse_reference(inner: &str) -> Option<(String, Option<Filter>)> {
    let (path, filter) = match inner.split_once('|') {
        Some((path, filter)) => (path.trim(), Some(Filter::parse(filter.trim())?)),
        None => (inner.trim(), None),
    };
    let valid = !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    valid.then(|| (path.to_string(), filter))
}
