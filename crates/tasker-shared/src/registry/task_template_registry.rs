//! # Task Template Registry
//!
//! In-process registry of task templates keyed by (namespace, name, version).
//! A template names its steps, their dependency edges, handler names, and
//! retry policy defaults. Validation happens at registration: duplicate step
//! names, dangling dependencies, and cyclic step graphs are configuration
//! errors long before a task request arrives.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

use crate::errors::{TaskerError, TaskerResult};
use crate::models::core::dependent_system::DependentSystem;
use crate::models::core::named_step::NamedStep;
use crate::models::core::named_task::NamedTask;
use crate::models::core::task_namespace::TaskNamespace;

pub const DEFAULT_DEPENDENT_SYSTEM: &str = "default";
pub const DEFAULT_RETRY_LIMIT: i32 = 3;

/// One step of a task template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTemplate {
    pub name: String,
    /// External system the step executes against
    #[serde(default = "StepTemplate::default_system")]
    pub dependent_system: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Handler name resolved by the step handler registry
    pub handler: String,
    /// Names of producer steps this step depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "StepTemplate::default_retryable")]
    pub retryable: bool,
    #[serde(default = "StepTemplate::default_retry_limit")]
    pub retry_limit: i32,
    #[serde(default)]
    pub skippable: bool,
    #[serde(default)]
    pub inputs: Option<Value>,
}

impl StepTemplate {
    fn default_system() -> String {
        DEFAULT_DEPENDENT_SYSTEM.to_string()
    }

    fn default_retryable() -> bool {
        true
    }

    fn default_retry_limit() -> i32 {
        DEFAULT_RETRY_LIMIT
    }

    pub fn new(name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependent_system: Self::default_system(),
            description: None,
            handler: handler.into(),
            depends_on: Vec::new(),
            retryable: true,
            retry_limit: DEFAULT_RETRY_LIMIT,
            skippable: false,
            inputs: None,
        }
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: i32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = Some(inputs);
        self
    }
}

/// A task template: the blueprint tasks are materialized from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub namespace: String,
    pub name: String,
    #[serde(default = "TaskTemplate::default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<StepTemplate>,
    /// Demand ordered (sequential) execution regardless of DAG width
    #[serde(default)]
    pub sequential: bool,
    #[serde(default)]
    pub default_priority: i32,
}

impl TaskTemplate {
    fn default_version() -> String {
        "1.0.0".to_string()
    }

    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        steps: Vec<StepTemplate>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: Self::default_version(),
            description: None,
            steps,
            sequential: false,
            default_priority: 0,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    /// Validate the step graph: unique names, resolvable dependencies, no
    /// cycles, at least one step
    pub fn validate(&self) -> TaskerResult<()> {
        if self.steps.is_empty() {
            return Err(TaskerError::ConfigurationError(format!(
                "template {}/{} has no steps",
                self.namespace, self.name
            )));
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(TaskerError::ConfigurationError(format!(
                    "template {}/{} has duplicate step '{}'",
                    self.namespace, self.name, step.name
                )));
            }
        }

        for step in &self.steps {
            for dependency in &step.depends_on {
                if !names.contains(dependency.as_str()) {
                    return Err(TaskerError::ConfigurationError(format!(
                        "step '{}' depends on unknown step '{dependency}'",
                        step.name
                    )));
                }
                if dependency == &step.name {
                    return Err(TaskerError::ConfigurationError(format!(
                        "step '{}' depends on itself",
                        step.name
                    )));
                }
            }
        }

        if has_cycle(&self.steps) {
            return Err(TaskerError::ConfigurationError(format!(
                "template {}/{} step graph contains a cycle",
                self.namespace, self.name
            )));
        }

        Ok(())
    }
}

/// Depth-first cycle detection over the depends_on graph
fn has_cycle(steps: &[StepTemplate]) -> bool {
    let dependencies: HashMap<&str, &Vec<String>> = steps
        .iter()
        .map(|s| (s.name.as_str(), &s.depends_on))
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        name: &'a str,
        dependencies: &HashMap<&'a str, &'a Vec<String>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> bool {
        match marks.get(name) {
            Some(Mark::Done) => return false,
            Some(Mark::Visiting) => return true,
            None => {}
        }
        marks.insert(name, Mark::Visiting);
        if let Some(deps) = dependencies.get(name) {
            for dep in deps.iter() {
                if visit(dep.as_str(), dependencies, marks) {
                    return true;
                }
            }
        }
        marks.insert(name, Mark::Done);
        false
    }

    let mut marks = HashMap::new();
    steps
        .iter()
        .any(|s| visit(s.name.as_str(), &dependencies, &mut marks))
}

type TemplateKey = (String, String, String);

/// Registry of templates, backed by the shared template tables
#[derive(Debug)]
pub struct TaskTemplateRegistry {
    pool: PgPool,
    templates: RwLock<HashMap<TemplateKey, TaskTemplate>>,
}

impl TaskTemplateRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            templates: RwLock::new(HashMap::new()),
        }
    }

    /// Validate and register a template, upserting its namespace, named task,
    /// dependent systems, and named steps
    pub async fn register_template(&self, template: TaskTemplate) -> TaskerResult<NamedTask> {
        template.validate()?;

        let namespace =
            TaskNamespace::find_or_create(&self.pool, &template.namespace, None).await?;
        let named_task = NamedTask::find_or_create(
            &self.pool,
            namespace.task_namespace_uuid,
            &template.name,
            &template.version,
            template.description.as_deref(),
        )
        .await?;

        for step in &template.steps {
            let system =
                DependentSystem::find_or_create(&self.pool, &step.dependent_system, None).await?;
            NamedStep::find_or_create(
                &self.pool,
                system.dependent_system_uuid,
                &step.name,
                step.description.as_deref(),
            )
            .await?;
        }

        let key = (
            template.namespace.clone(),
            template.name.clone(),
            template.version.clone(),
        );
        self.templates
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key, template);

        Ok(named_task)
    }

    /// Look up a template; absence is a validation error surfaced at the
    /// task-request boundary
    pub fn get_task_template(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> TaskerResult<TaskTemplate> {
        self.templates
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(
                namespace.to_string(),
                name.to_string(),
                version.to_string(),
            ))
            .cloned()
            .ok_or_else(|| {
                TaskerError::ValidationError(format!(
                    "no task template registered for {namespace}/{name}/{version}"
                ))
            })
    }

    /// Namespaces with at least one registered template, sorted
    pub fn namespaces(&self) -> Vec<String> {
        let templates = self.templates.read().unwrap_or_else(|p| p.into_inner());
        let mut namespaces: Vec<String> =
            templates.keys().map(|(ns, _, _)| ns.clone()).collect();
        namespaces.sort();
        namespaces.dedup();
        namespaces
    }

    /// Templates in a namespace, sorted by (name, version)
    pub fn templates_in_namespace(&self, namespace: &str) -> Vec<TaskTemplate> {
        let templates = self.templates.read().unwrap_or_else(|p| p.into_inner());
        let mut found: Vec<TaskTemplate> = templates
            .iter()
            .filter(|((ns, _, _), _)| ns == namespace)
            .map(|(_, t)| t.clone())
            .collect();
        found.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        found
    }
}
