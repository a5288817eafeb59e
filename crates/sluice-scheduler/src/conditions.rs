//! Condition evaluation against an invocation context.
//!
//! Conditions reference context fields through `${{ ... }}` interpolation
//! and are compared with a small operator set. Referencing a field the
//! context does not define is an evaluation error, which callers treat as
//! "do not run" rather than a hard failure.

use regex::Regex;
use sluice_core::context::{InvocationContext, RefKind};
use sluice_core::definition::{ConditionExpression, WorkflowFilters};
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

static INTERPOLATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").unwrap());

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("condition references undefined field '{0}'")]
    UndefinedField(String),
}

impl From<ConditionError> for sluice_core::Error {
    fn from(err: ConditionError) -> Self {
        sluice_core::Error::ConditionEvaluation(err.to_string())
    }
}

/// Evaluator binding conditions and filters to one invocation.
pub struct ConditionEvaluator<'a> {
    context: &'a InvocationContext,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(context: &'a InvocationContext) -> Self {
        Self { context }
    }

    /// Workflow-level ref filters. `None` means the workflow always runs.
    ///
    /// For a branch invocation, empty `branches` matches every branch; for
    /// a tag invocation, empty `tags` matches no tag. Tags must opt in.
    pub fn filters_match(&self, filters: Option<&WorkflowFilters>) -> bool {
        let Some(filters) = filters else {
            return true;
        };

        match self.context.ref_kind {
            RefKind::Branch => {
                filters.branches.is_empty()
                    || filters
                        .branches
                        .iter()
                        .any(|p| glob_match(p, &self.context.ref_name))
            }
            RefKind::Tag => filters
                .tags
                .iter()
                .any(|p| glob_match(p, &self.context.ref_name)),
        }
    }

    /// Evaluate an instance condition. `None` always runs.
    ///
    /// The structured form requires `if` to hold (when present) and
    /// `unless` not to hold (when present).
    pub fn evaluate(
        &self,
        condition: Option<&ConditionExpression>,
        matrix: &HashMap<String, String>,
    ) -> Result<bool, ConditionError> {
        let Some(condition) = condition else {
            return Ok(true);
        };

        match condition {
            ConditionExpression::Simple(expr) => self.evaluate_expression(expr, matrix),
            ConditionExpression::Structured { if_expr, unless } => {
                if let Some(expr) = if_expr
                    && !self.evaluate_expression(expr, matrix)?
                {
                    return Ok(false);
                }
                if let Some(expr) = unless
                    && self.evaluate_expression(expr, matrix)?
                {
                    return Ok(false);
                }
                Ok(true)
            }
        }
    }

    /// Interpolate `${{ field }}` references in a string.
    pub fn interpolate(
        &self,
        input: &str,
        matrix: &HashMap<String, String>,
    ) -> Result<String, ConditionError> {
        let mut output = String::with_capacity(input.len());
        let mut last = 0;
        for caps in INTERPOLATION_RE.captures_iter(input) {
            let whole = caps.get(0).unwrap();
            let field = caps.get(1).unwrap().as_str().trim();
            output.push_str(&input[last..whole.start()]);
            output.push_str(&self.resolve(field, matrix)?);
            last = whole.end();
        }
        output.push_str(&input[last..]);
        Ok(output)
    }

    fn resolve(
        &self,
        field: &str,
        matrix: &HashMap<String, String>,
    ) -> Result<String, ConditionError> {
        if field == "ref.name" {
            return Ok(self.context.ref_name.clone());
        }
        if field == "ref.kind" {
            return Ok(self.context.ref_kind.as_str().to_string());
        }
        if let Some(name) = field.strip_prefix("params.") {
            return self
                .context
                .parameters
                .get(name)
                .cloned()
                .ok_or_else(|| ConditionError::UndefinedField(field.to_string()));
        }
        if let Some(name) = field.strip_prefix("env.") {
            return self
                .context
                .env
                .get(name)
                .cloned()
                .ok_or_else(|| ConditionError::UndefinedField(field.to_string()));
        }
        if let Some(name) = field.strip_prefix("matrix.") {
            return matrix
                .get(name)
                .cloned()
                .ok_or_else(|| ConditionError::UndefinedField(field.to_string()));
        }
        Err(ConditionError::UndefinedField(field.to_string()))
    }

    fn evaluate_expression(
        &self,
        expr: &str,
        matrix: &HashMap<String, String>,
    ) -> Result<bool, ConditionError> {
        let interpolated = self.interpolate(expr, matrix)?;
        let trimmed = interpolated.trim();

        if trimmed == "true" {
            return Ok(true);
        }
        if trimmed == "false" {
            return Ok(false);
        }

        if let Some((left, right)) = trimmed.split_once("==") {
            return Ok(unquote(left.trim()) == unquote(right.trim()));
        }
        if let Some((left, right)) = trimmed.split_once("!=") {
            return Ok(unquote(left.trim()) != unquote(right.trim()));
        }
        if let Some((left, right)) = trimmed.split_once(" contains ") {
            return Ok(unquote(left.trim()).contains(unquote(right.trim())));
        }
        if let Some((left, right)) = trimmed.split_once(" matches ") {
            return Ok(glob_match(unquote(right.trim()), unquote(left.trim())));
        }

        // Unrecognized expressions do not run the job.
        Ok(false)
    }
}

fn unquote(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Glob matching for ref names, as used by filters and the `matches`
/// operator. Four shapes: bare `*`/`**` match everything, `base/**`
/// matches any depth under the base, `base/*` matches exactly one more
/// segment, and one infix `*` splits the pattern into a prefix and
/// suffix check. Anything else compares literally.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if matches!(pattern, "*" | "**") {
        return true;
    }
    if let Some(base) = pattern.strip_suffix("/**") {
        return text.starts_with(base);
    }
    if let Some(base) = pattern.strip_suffix("/*") {
        return match text.strip_prefix(base).and_then(|rest| rest.strip_prefix('/')) {
            Some(leaf) => !leaf.contains('/'),
            None => false,
        };
    }
    match pattern.split_once('*') {
        Some((head, tail)) if !tail.contains('*') => {
            text.starts_with(head) && text.ends_with(tail)
        }
        _ => pattern == text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> InvocationContext {
        InvocationContext::branch("main")
            .with_parameter("run_nightly", "true")
            .with_env("CI", "1")
    }

    fn eval(condition: &str) -> Result<bool, ConditionError> {
        let context = ctx();
        let evaluator = ConditionEvaluator::new(&context);
        let parsed = ConditionExpression::Simple(condition.to_string());
        evaluator.evaluate(Some(&parsed), &HashMap::new())
    }

    #[test]
    fn test_no_condition_runs() {
        let context = ctx();
        let evaluator = ConditionEvaluator::new(&context);
        assert!(evaluator.evaluate(None, &HashMap::new()).unwrap());
    }

    #[test]
    fn test_equality_on_ref_name() {
        assert!(eval("${{ ref.name }} == main").unwrap());
        assert!(!eval("${{ ref.name }} == develop").unwrap());
    }

    #[test]
    fn test_parameter_boolean() {
        assert!(eval("${{ params.run_nightly }}").unwrap());
        assert!(eval("${{ params.run_nightly }} == true").unwrap());
    }

    #[test]
    fn test_inequality_and_contains() {
        assert!(eval("${{ ref.name }} != develop").unwrap());
        assert!(eval("${{ ref.name }} contains ai").unwrap());
        assert!(!eval("${{ ref.name }} contains xyz").unwrap());
    }

    #[test]
    fn test_matches_glob() {
        let context = InvocationContext::branch("release/v2");
        let evaluator = ConditionEvaluator::new(&context);
        let parsed =
            ConditionExpression::Simple("${{ ref.name }} matches 'release/*'".to_string());
        assert!(evaluator.evaluate(Some(&parsed), &HashMap::new()).unwrap());
    }

    #[test]
    fn test_quoted_operands() {
        assert!(eval("${{ ref.name }} == 'main'").unwrap());
        assert!(eval("\"${{ ref.name }}\" == \"main\"").unwrap());
    }

    #[test]
    fn test_undefined_field_is_error() {
        let err = eval("${{ params.missing }} == yes").unwrap_err();
        assert!(matches!(err, ConditionError::UndefinedField(_)));
        assert!(eval("${{ bogus.path }}").is_err());
    }

    #[test]
    fn test_undefined_field_converts_to_core_error() {
        let err = eval("${{ params.missing }}").unwrap_err();
        let core: sluice_core::Error = err.into();
        assert!(matches!(core, sluice_core::Error::ConditionEvaluation(_)));
        assert!(core.to_string().contains("params.missing"));
    }

    #[test]
    fn test_matrix_field() {
        let context = ctx();
        let evaluator = ConditionEvaluator::new(&context);
        let matrix = HashMap::from([("os".to_string(), "linux".to_string())]);
        let parsed = ConditionExpression::Simple("${{ matrix.os }} == linux".to_string());
        assert!(evaluator.evaluate(Some(&parsed), &matrix).unwrap());
    }

    #[test]
    fn test_structured_if_unless() {
        let context = ctx();
        let evaluator = ConditionEvaluator::new(&context);
        let matrix = HashMap::new();

        let parsed = ConditionExpression::Structured {
            if_expr: Some("${{ ref.name }} == main".to_string()),
            unless: Some("${{ env.CI }} == 0".to_string()),
        };
        assert!(evaluator.evaluate(Some(&parsed), &matrix).unwrap());

        let parsed = ConditionExpression::Structured {
            if_expr: Some("${{ ref.name }} == main".to_string()),
            unless: Some("${{ env.CI }} == 1".to_string()),
        };
        assert!(!evaluator.evaluate(Some(&parsed), &matrix).unwrap());
    }

    #[test]
    fn test_unrecognized_expression_is_false() {
        assert!(!eval("some plain text").unwrap());
    }

    #[test]
    fn test_branch_filters() {
        let context = InvocationContext::branch("feature/login");
        let evaluator = ConditionEvaluator::new(&context);

        assert!(evaluator.filters_match(None));
        assert!(evaluator.filters_match(Some(&WorkflowFilters {
            branches: vec![],
            tags: vec![],
        })));
        assert!(evaluator.filters_match(Some(&WorkflowFilters {
            branches: vec!["feature/*".to_string()],
            tags: vec![],
        })));
        assert!(!evaluator.filters_match(Some(&WorkflowFilters {
            branches: vec!["main".to_string()],
            tags: vec![],
        })));
    }

    #[test]
    fn test_tag_filters_require_opt_in() {
        let context = InvocationContext::tag("v1.2.3");
        let evaluator = ConditionEvaluator::new(&context);

        // Empty tag patterns never match a tag invocation.
        assert!(!evaluator.filters_match(Some(&WorkflowFilters {
            branches: vec!["main".to_string()],
            tags: vec![],
        })));
        assert!(evaluator.filters_match(Some(&WorkflowFilters {
            branches: vec![],
            tags: vec!["v*".to_string()],
        })));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("release/**", "release/v1/hotfix"));
        assert!(glob_match("feature/*", "feature/login"));
        assert!(!glob_match("feature/*", "feature/a/b"));
        assert!(glob_match("v*", "v1.2.3"));
        assert!(glob_match("main", "main"));
        assert!(!glob_match("main", "master"));
    }

    #[test]
    fn test_glob_match_edges() {
        // One-segment wildcard needs the separator.
        assert!(!glob_match("feature/*", "feature"));
        assert!(!glob_match("feature/*", "featureX/login"));
        // Infix star splits into prefix and suffix checks.
        assert!(glob_match("release-*-rc", "release-2.1-rc"));
        assert!(!glob_match("release-*-rc", "release-2.1"));
        // More than one star falls back to a literal compare.
        assert!(!glob_match("a*b*c", "axbxc"));
        assert!(glob_match("a*b*c", "a*b*c"));
    }
}
