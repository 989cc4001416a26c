use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use switchyard_tools::ContentBlock;
use tracing::warn;

/// Anything serde can serialize, kept erased until conversion time.
pub trait SerializableValue: Send + Sync + fmt::Debug {
    fn to_json(&self) -> serde_json::Result<Value>;
}

impl<T> SerializableValue for T
where
    T: Serialize + Send + Sync + fmt::Debug,
{
    fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Erased return value of a tool handler.
#[derive(Debug)]
pub enum ReturnValue {
    Null,
    /// The handler finished without producing a value.
    Void,
    /// Already shaped as tool output.
    Content(Vec<ContentBlock>),
    Json(Value),
    Serializable(Box<dyn SerializableValue>),
}

impl ReturnValue {
    pub fn serialize<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + fmt::Debug + 'static,
    {
        ReturnValue::Serializable(Box::new(value))
    }
}

impl From<()> for ReturnValue {
    fn from(_: ()) -> Self {
        ReturnValue::Void
    }
}

impl<T: Into<ReturnValue>> From<Option<T>> for ReturnValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ReturnValue::Null, Into::into)
    }
}

impl From<Value> for ReturnValue {
    fn from(value: Value) -> Self {
        ReturnValue::Json(value)
    }
}

impl From<String> for ReturnValue {
    fn from(value: String) -> Self {
        ReturnValue::Json(Value::String(value))
    }
}

impl From<&str> for ReturnValue {
    fn from(value: &str) -> Self {
        ReturnValue::Json(Value::String(value.to_string()))
    }
}

impl From<bool> for ReturnValue {
    fn from(value: bool) -> Self {
        ReturnValue::Json(Value::Bool(value))
    }
}

macro_rules! number_return_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ReturnValue {
                fn from(value: $ty) -> Self {
                    ReturnValue::Json(Value::from(value))
                }
            }
        )*
    };
}

number_return_value!(i32, i64, u32, u64, usize, f32, f64);

impl From<ContentBlock> for ReturnValue {
    fn from(block: ContentBlock) -> Self {
        ReturnValue::Content(vec![block])
    }
}

impl From<Vec<ContentBlock>> for ReturnValue {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        ReturnValue::Content(blocks)
    }
}

/// One step of the conversion chain. Returning `None` passes the value on.
pub trait ConversionRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, value: &ReturnValue) -> Option<Vec<ContentBlock>>;
}

struct NullRule;

impl ConversionRule for NullRule {
    fn name(&self) -> &'static str {
        "null"
    }

    fn apply(&self, value: &ReturnValue) -> Option<Vec<ContentBlock>> {
        match value {
            ReturnValue::Null | ReturnValue::Json(Value::Null) => {
                Some(vec![ContentBlock::text("null")])
            }
            _ => None,
        }
    }
}

struct VoidRule;

impl ConversionRule for VoidRule {
    fn name(&self) -> &'static str {
        "void"
    }

    fn apply(&self, value: &ReturnValue) -> Option<Vec<ContentBlock>> {
        matches!(value, ReturnValue::Void).then(|| vec![ContentBlock::text("Done")])
    }
}

struct ContentRule;

impl ConversionRule for ContentRule {
    fn name(&self) -> &'static str {
        "content"
    }

    fn apply(&self, value: &ReturnValue) -> Option<Vec<ContentBlock>> {
        match value {
            ReturnValue::Content(blocks) => Some(blocks.clone()),
            _ => None,
        }
    }
}

struct ScalarRule;

impl ConversionRule for ScalarRule {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn apply(&self, value: &ReturnValue) -> Option<Vec<ContentBlock>> {
        match value {
            ReturnValue::Json(json) => scalar_text(json).map(|t| vec![ContentBlock::text(t)]),
            _ => None,
        }
    }
}

struct StructuredRule;

impl ConversionRule for StructuredRule {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn apply(&self, value: &ReturnValue) -> Option<Vec<ContentBlock>> {
        let text = match value {
            ReturnValue::Json(json @ (Value::Array(_) | Value::Object(_))) => json.to_string(),
            ReturnValue::Serializable(inner) => match inner.to_json() {
                Ok(json) => scalar_text(&json).unwrap_or_else(|| json.to_string()),
                Err(e) => {
                    warn!(target: "toolkit", "Return value did not serialize: {e}");
                    return None;
                }
            },
            _ => return None,
        };
        Some(vec![ContentBlock::text(text)])
    }
}

struct DebugFallbackRule;

impl ConversionRule for DebugFallbackRule {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn apply(&self, value: &ReturnValue) -> Option<Vec<ContentBlock>> {
        Some(vec![ContentBlock::text(debug_text(value))])
    }
}

fn scalar_text(json: &Value) -> Option<String> {
    match json {
        Value::Null => Some("null".to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(json.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn debug_text(value: &ReturnValue) -> String {
    match value {
        ReturnValue::Serializable(inner) => format!("{inner:?}"),
        other => format!("{other:?}"),
    }
}

/// Number of built-in rules that always stay at the end of the chain.
const TAIL_RULES: usize = 2;

/// Turns handler return values into tool output. Never fails.
#[derive(Clone)]
pub struct ResultConverter {
    rules: Vec<Arc<dyn ConversionRule>>,
}

impl fmt::Debug for ResultConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultConverter")
            .field("rules", &self.rule_names())
            .finish()
    }
}

impl Default for ResultConverter {
    fn default() -> Self {
        Self {
            rules: vec![
                Arc::new(NullRule),
                Arc::new(VoidRule),
                Arc::new(ContentRule),
                Arc::new(ScalarRule),
                Arc::new(StructuredRule),
                Arc::new(DebugFallbackRule),
            ],
        }
    }
}

impl ResultConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule that runs after the built-in shape rules but before the
    /// generic JSON and debug fallbacks.
    pub fn with_rule(mut self, rule: impl ConversionRule + 'static) -> Self {
        let at = self.rules.len().saturating_sub(TAIL_RULES);
        self.rules.insert(at, Arc::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn convert(&self, value: ReturnValue) -> Vec<ContentBlock> {
        for rule in &self.rules {
            match catch_unwind(AssertUnwindSafe(|| rule.apply(&value))) {
                Ok(Some(blocks)) => return blocks,
                Ok(None) => {}
                Err(_) => {
                    warn!(target: "toolkit", rule = rule.name(), "Conversion rule panicked");
                }
            }
        }

        let text = catch_unwind(AssertUnwindSafe(|| debug_text(&value)))
            .unwrap_or_else(|_| "<unprintable value>".to_string());
        vec![ContentBlock::text(text)]
    }
}
