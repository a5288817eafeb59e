//! Invocation context consumed by condition predicates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What kind of ref the workflow was invoked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Branch,
    Tag,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Branch => "branch",
            RefKind::Tag => "tag",
        }
    }
}

/// Context of one workflow invocation. Pure data; predicates read it,
/// never mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationContext {
    pub ref_name: String,
    pub ref_kind: RefKind,
    /// Declared pipeline parameter values.
    pub parameters: HashMap<String, String>,
    /// Environment variables visible at invocation time.
    pub env: HashMap<String, String>,
}

impl InvocationContext {
    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            ref_name: name.into(),
            ref_kind: RefKind::Branch,
            parameters: HashMap::new(),
            env: HashMap::new(),
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            ref_name: name.into(),
            ref_kind: RefKind::Tag,
            parameters: HashMap::new(),
            env: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let ctx = InvocationContext::tag("v1.2.0")
            .with_parameter("deploy", "true")
            .with_env("CI", "1");
        assert_eq!(ctx.ref_kind, RefKind::Tag);
        assert_eq!(ctx.parameters["deploy"], "true");
        assert_eq!(ctx.env["CI"], "1");
    }
}
