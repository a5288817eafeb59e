//! Matrix expansion: one job template into N concrete assignments.

use sluice_core::definition::MatrixConfig;
use std::collections::HashMap;
use tracing::warn;

/// One concrete matrix assignment with its derived display name.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub display_name: String,
    pub values: HashMap<String, serde_json::Value>,
}

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a template's matrix into assignments.
    ///
    /// A template without a matrix yields exactly one empty assignment.
    /// An empty value list for any parameter yields zero assignments;
    /// that is a skip, not an error, but it is almost always an authoring
    /// mistake so it is logged loudly.
    pub fn expand(&self, job: &str, matrix: Option<&MatrixConfig>) -> Vec<Assignment> {
        let Some(matrix) = matrix else {
            return vec![Assignment {
                display_name: job.to_string(),
                values: HashMap::new(),
            }];
        };

        if let Some((param, _)) = matrix.parameters.iter().find(|(_, v)| v.is_empty()) {
            warn!(
                job,
                parameter = %param,
                "matrix parameter has no values, job expands to zero instances"
            );
            return vec![];
        }

        self.generate_combinations(&matrix.parameters)
            .into_iter()
            .map(|values| Assignment {
                display_name: format_display_name(job, &values),
                values,
            })
            .collect()
    }

    fn generate_combinations(
        &self,
        parameters: &HashMap<String, Vec<serde_json::Value>>,
    ) -> Vec<HashMap<String, serde_json::Value>> {
        // Sorted parameter order keeps expansion deterministic.
        let mut names: Vec<&String> = parameters.keys().collect();
        names.sort();

        let mut result = vec![HashMap::new()];
        for name in names {
            let mut expanded = Vec::new();
            for combo in result {
                for value in &parameters[name] {
                    let mut next: HashMap<String, serde_json::Value> = combo.clone();
                    next.insert(name.clone(), value.clone());
                    expanded.push(next);
                }
            }
            result = expanded;
        }
        result
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

/// Display name for a matrixed instance: `"job (k=v, k2=v2)"` with sorted
/// keys. Doubles as the instance identity, so it must be deterministic.
pub fn format_display_name(job: &str, values: &HashMap<String, serde_json::Value>) -> String {
    if values.is_empty() {
        return job.to_string();
    }

    let mut keys: Vec<&String> = values.keys().collect();
    keys.sort();
    let parts: Vec<String> = keys
        .iter()
        .map(|k| {
            let v = match &values[*k] {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{}={}", k, v)
        })
        .collect();

    format!("{} ({})", job, parts.join(", "))
}
