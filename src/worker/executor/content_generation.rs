//! Content generation executor: renders `{{ placeholder }}` templates.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;

use super::{Executor, parse_payload};
use crate::error::ExecutionError;
use crate::process::ProcessKind;

/// Upper bound on rendered instances per tick.
const MAX_COUNT: usize = 10_000;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.-]*)\s*\}\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Deserialize)]
struct ContentGenerationPayload {
    template: String,
    #[serde(default)]
    variables: serde_json::Map<String, Value>,
    #[serde(default = "default_count")]
    count: usize,
}

fn default_count() -> usize {
    1
}

/// Render one instance. List variables are sampled once per instance, so a
/// placeholder repeated in the template gets the same pick.
pub fn render<R: rand::Rng + ?Sized>(
    template: &str,
    variables: &serde_json::Map<String, Value>,
    rng: &mut R,
) -> String {
    let mut picks: HashMap<String, String> = HashMap::new();
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            if let Some(text) = picks.get(name) {
                return text.clone();
            }
            let Some(value) = variables.get(name) else {
                return caps[0].to_string();
            };
            let text = match value {
                Value::Array(items) => items.choose(&mut *rng).map(as_text).unwrap_or_default(),
                other => as_text(other),
            };
            picks.insert(name.to_string(), text.clone());
            text
        })
        .into_owned()
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct ContentGenerationExecutor;

#[async_trait]
impl Executor for ContentGenerationExecutor {
    fn kind(&self) -> ProcessKind {
        ProcessKind::ContentGeneration
    }

    async fn execute(&self, process_id: &str, payload: &Value) -> Result<Value, ExecutionError> {
        let payload: ContentGenerationPayload = parse_payload(self.kind(), payload)?;
        if payload.count > MAX_COUNT {
            return Err(ExecutionError::InvalidPayload {
                kind: self.kind().to_string(),
                reason: format!("count {} exceeds the limit of {MAX_COUNT}", payload.count),
            });
        }

        let mut rng = rand::thread_rng();
        let rendered: Vec<Value> = (0..payload.count)
            .map(|_| Value::String(render(&payload.template, &payload.variables, &mut rng)))
            .collect();

        tracing::debug!(process_id = %process_id, count = rendered.len(), "Rendered content");
        Ok(Value::Array(rendered))
    }
}
