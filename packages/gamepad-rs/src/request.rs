//! Steps as they travel from the step source through the engine.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A level started.
pub const STARTED: &str = "STARTED";
/// A level finished.
pub const FINISHED: &str = "FINISHED";
/// Every level finished.
pub const COMPLETED: &str = "COMPLETED";

/// Returns true for the lifecycle methods `STARTED`, `FINISHED` and
/// `COMPLETED`.
pub fn is_lifecycle(method: &str) -> bool {
    matches!(method, STARTED | FINISHED | COMPLETED)
}

/// One atomic step.
///
/// `id` correlates the step with a breakpoint and with whatever the step
/// source displays for it. Requests are immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    method: String,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, args: Vec<Value>, id: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args,
            id: id.into(),
            data: None,
        }
    }

    /// Attach an output annex.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// A lifecycle request the step source submits itself, with id equal
    /// to the method.
    pub fn lifecycle(state: &str) -> Self {
        Self::new(state, Vec::new(), state)
    }

    /// A lifecycle marker synthesised by the engine. It is recorded in
    /// history but never handed to the handler when first produced.
    pub fn generated(state: &str) -> Self {
        Self::lifecycle(state).with_data(json!({ "generated": true }))
    }

    /// Build a request from loosely typed JSON parts.
    ///
    /// A non-string method or id becomes `""`; non-array args become `[]`.
    pub fn build(method: &Value, args: &Value, id: &Value) -> Self {
        let text = |value: &Value| value.as_str().unwrap_or_default().to_string();
        Self {
            method: text(method),
            args: args.as_array().cloned().unwrap_or_default(),
            id: text(id),
            data: None,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Returns true for markers produced by [`Request::generated`].
    pub fn is_generated(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|data| data.get("generated"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_lifecycle(&self) -> bool {
        is_lifecycle(&self.method)
    }

    pub fn is(&self, method: &str) -> bool {
        self.method == method
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.method)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ") #{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_marker() {
        let marker = Request::generated(FINISHED);
        assert_eq!(marker.method(), FINISHED);
        assert_eq!(marker.id(), FINISHED);
        assert!(marker.is_generated());
        assert!(marker.is_lifecycle());
        assert!(!Request::lifecycle(FINISHED).is_generated());
    }

    #[test]
    fn test_build_sanitises_loose_input() {
        let request = Request::build(&json!(7), &json!("nope"), &json!(null));
        assert_eq!(request, Request::new("", vec![], ""));

        let request = Request::build(&json!("MOVE"), &json!([1, "up"]), &json!("b3"));
        assert_eq!(request.args(), &[json!(1), json!("up")]);
        assert_eq!(request.to_string(), "MOVE(1, \"up\") #b3");
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let request: Request = serde_json::from_value(json!({"method": "TURN"})).unwrap();
        assert_eq!(request.args(), &[] as &[Value]);
        assert_eq!(request.id(), "");
        assert!(!request.is_lifecycle());
    }
}
