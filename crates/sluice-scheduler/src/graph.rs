//! Graph build: declarative definition to a concrete DAG of instances.

use crate::matrix::MatrixExpander;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use sluice_core::definition::{StepDefinition, StepSpec, WorkflowDefinition};
use sluice_core::ids::{InstanceId, RunId};
use sluice_core::run::{InstanceState, JobInstance, WorkflowRun};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("workflow has no jobs")]
    EmptyWorkflow,
    #[error("duplicate job name: {0}")]
    DuplicateJob(String),
    #[error("duplicate instance name after matrix expansion: {0}")]
    DuplicateInstance(String),
    #[error("job '{job}' requires unknown job '{target}'")]
    UnknownRequires { job: String, target: String },
    #[error("job '{job}' references unknown fragment '{fragment}'")]
    UnknownFragment { job: String, fragment: String },
    #[error("circular fragment reference involving '{0}'")]
    CircularFragment(String),
    #[error("cycle detected in requires graph")]
    CycleDetected,
}

impl From<DefinitionError> for sluice_core::Error {
    fn from(err: DefinitionError) -> Self {
        sluice_core::Error::Definition(err.to_string())
    }
}

/// Builder turning a workflow definition into a `WorkflowRun`.
///
/// All structural validation happens here, before anything runs: fragment
/// substitution, matrix expansion, requires resolution, and cycle
/// detection. A cycle is a build-time error, never a runtime failure.
pub struct GraphBuilder {
    expander: MatrixExpander,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            expander: MatrixExpander::new(),
        }
    }

    pub fn build(&self, definition: &WorkflowDefinition) -> Result<WorkflowRun, DefinitionError> {
        if definition.jobs.is_empty() {
            return Err(DefinitionError::EmptyWorkflow);
        }

        // Template-level validation first: names unique, requires resolve.
        let mut template_names = HashSet::new();
        for job in &definition.jobs {
            if !template_names.insert(job.name.as_str()) {
                return Err(DefinitionError::DuplicateJob(job.name.clone()));
            }
        }
        for job in &definition.jobs {
            for target in &job.requires {
                if !template_names.contains(target.as_str()) {
                    return Err(DefinitionError::UnknownRequires {
                        job: job.name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        // Expand templates into instances; fragment references are
        // substituted structurally so no reference graph survives here.
        let mut instances: HashMap<InstanceId, JobInstance> = HashMap::new();
        let mut by_template: HashMap<String, Vec<InstanceId>> = HashMap::new();

        for job in &definition.jobs {
            let steps = self.resolve_steps(&job.name, &job.steps, definition, &mut Vec::new())?;
            let assignments = self.expander.expand(&job.name, job.matrix.as_ref());
            let ids: Vec<InstanceId> = assignments
                .iter()
                .map(|a| InstanceId::new(a.display_name.clone()))
                .collect();

            for (assignment, id) in assignments.into_iter().zip(ids.iter()) {
                let instance = JobInstance {
                    id: id.clone(),
                    template: job.name.clone(),
                    steps: steps.clone(),
                    matrix: assignment.values,
                    requires: vec![],
                    condition: job.condition.clone(),
                    cache: job.cache.clone(),
                    workspace: job.workspace.clone(),
                    optional: job.optional,
                    timeout_minutes: job.timeout_minutes,
                    image: job.image.clone(),
                    env: job.env.clone(),
                    state: InstanceState::Pending,
                };
                if instances.insert(id.clone(), instance).is_some() {
                    return Err(DefinitionError::DuplicateInstance(id.to_string()));
                }
            }
            by_template.insert(job.name.clone(), ids);
        }

        // A template-level edge becomes edges against every instance of
        // the target template. A target that expanded to zero instances
        // contributes nothing and the dependent is unblocked by it.
        for job in &definition.jobs {
            let required: Vec<InstanceId> = job
                .requires
                .iter()
                .flat_map(|target| by_template[target].iter().cloned())
                .collect();
            for id in &by_template[&job.name] {
                if let Some(instance) = instances.get_mut(id) {
                    instance.requires = required.clone();
                }
            }
        }

        let order = self.topological_order(&instances)?;
        debug!(
            workflow = %definition.name,
            instances = order.len(),
            "built workflow graph"
        );

        Ok(WorkflowRun {
            id: RunId::new(),
            name: definition.name.clone(),
            instances,
            order,
            filters: definition.filters.clone(),
            parameters: definition.parameters.clone(),
            env: definition.env.clone(),
        })
    }

    /// Resolve fragment references by structural substitution, recursing
    /// through nested fragments with cycle detection.
    fn resolve_steps(
        &self,
        job: &str,
        steps: &[StepDefinition],
        definition: &WorkflowDefinition,
        seen: &mut Vec<String>,
    ) -> Result<Vec<StepSpec>, DefinitionError> {
        let mut resolved = Vec::new();
        for step in steps {
            match step {
                StepDefinition::Run(spec) => resolved.push(spec.clone()),
                StepDefinition::Fragment { fragment } => {
                    if seen.iter().any(|s| s == fragment) {
                        return Err(DefinitionError::CircularFragment(fragment.clone()));
                    }
                    let body = definition.fragments.get(fragment).ok_or_else(|| {
                        DefinitionError::UnknownFragment {
                            job: job.to_string(),
                            fragment: fragment.clone(),
                        }
                    })?;
                    seen.push(fragment.clone());
                    resolved.extend(self.resolve_steps(job, body, definition, seen)?);
                    seen.pop();
                }
            }
        }
        Ok(resolved)
    }

    fn topological_order(
        &self,
        instances: &HashMap<InstanceId, JobInstance>,
    ) -> Result<Vec<InstanceId>, DefinitionError> {
        let mut graph: DiGraph<InstanceId, ()> = DiGraph::new();
        let mut index: HashMap<InstanceId, NodeIndex> = HashMap::new();

        // Sorted insertion keeps the order stable across builds.
        let mut ids: Vec<&InstanceId> = instances.keys().collect();
        ids.sort();
        for id in ids {
            let node = graph.add_node(id.clone());
            index.insert(id.clone(), node);
        }
        for instance in instances.values() {
            for req in &instance.requires {
                graph.add_edge(index[req], index[&instance.id], ());
            }
        }

        toposort(&graph, None)
            .map(|nodes| nodes.into_iter().map(|n| graph[n].clone()).collect())
            .map_err(|_| DefinitionError::CycleDetected)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::definition::WorkflowDefinition;

    fn build(yaml: &str) -> Result<WorkflowRun, DefinitionError> {
        let def = WorkflowDefinition::from_yaml(yaml).unwrap();
        GraphBuilder::new().build(&def)
    }

    #[test]
    fn test_linear_graph() {
        let run = build(
            r#"
name: ci
jobs:
  - name: build
    steps: [{name: b, uses: run}]
  - name: test
    requires: [build]
    steps: [{name: t, uses: run}]
  - name: deploy
    requires: [test]
    steps: [{name: d, uses: run}]
"#,
        )
        .unwrap();

        assert_eq!(run.order.len(), 3);
        let pos =
            |name: &str| run.order.iter().position(|id| id.as_str() == name).unwrap();
        assert!(pos("build") < pos("test"));
        assert!(pos("test") < pos("deploy"));
    }

    #[test]
    fn test_cycle_is_definition_error() {
        let err = build(
            r#"
name: ci
jobs:
  - name: a
    requires: [b]
    steps: [{name: s, uses: run}]
  - name: b
    requires: [a]
    steps: [{name: s, uses: run}]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::CycleDetected));
    }

    #[test]
    fn test_unknown_requires() {
        let err = build(
            r#"
name: ci
jobs:
  - name: a
    requires: [ghost]
    steps: [{name: s, uses: run}]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownRequires { .. }));
    }

    #[test]
    fn test_matrix_requires_fan_in() {
        let run = build(
            r#"
name: ci
jobs:
  - name: test
    matrix:
      parameters:
        py: ["3.10", "3.11"]
    steps: [{name: t, uses: run}]
  - name: report
    requires: [test]
    steps: [{name: r, uses: run}]
"#,
        )
        .unwrap();

        assert_eq!(run.instances.len(), 3);
        let report = &run.instances[&InstanceId::new("report")];
        assert_eq!(report.requires.len(), 2);
    }

    #[test]
    fn test_fragment_substitution() {
        let run = build(
            r#"
name: ci
fragments:
  setup:
    - name: checkout
      uses: run
    - fragment: tools
  tools:
    - name: install
      uses: run
jobs:
  - name: test
    steps:
      - fragment: setup
      - name: pytest
        uses: run
"#,
        )
        .unwrap();

        let test = &run.instances[&InstanceId::new("test")];
        let names: Vec<&str> = test.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["checkout", "install", "pytest"]);
    }

    #[test]
    fn test_circular_fragment() {
        let err = build(
            r#"
name: ci
fragments:
  a:
    - fragment: b
  b:
    - fragment: a
jobs:
  - name: test
    steps:
      - fragment: a
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::CircularFragment(_)));
    }

    #[test]
    fn test_unknown_fragment() {
        let err = build(
            r#"
name: ci
jobs:
  - name: test
    steps:
      - fragment: ghost
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownFragment { .. }));
    }

    #[test]
    fn test_empty_workflow() {
        let err = build("name: ci\njobs: []").unwrap_err();
        assert!(matches!(err, DefinitionError::EmptyWorkflow));
    }

    #[test]
    fn test_duplicate_job_name() {
        let err = build(
            r#"
name: ci
jobs:
  - name: a
    steps: [{name: s, uses: run}]
  - name: a
    steps: [{name: s, uses: run}]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateJob(_)));
    }

    #[test]
    fn test_empty_matrix_target_unblocks_dependent() {
        let run = build(
            r#"
name: ci
jobs:
  - name: test
    matrix:
      parameters:
        py: []
    steps: [{name: t, uses: run}]
  - name: report
    requires: [test]
    steps: [{name: r, uses: run}]
"#,
        )
        .unwrap();

        assert_eq!(run.instances.len(), 1);
        let report = &run.instances[&InstanceId::new("report")];
        assert!(report.requires.is_empty());
    }
}
