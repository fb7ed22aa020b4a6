//! The task-instance boundary consumed by the execution engine.
//!
//! A [`TaskNode`] carries a constructed unit-of-work state together with the
//! actions, validators, and lazily resolved input/output declarations that
//! the metadata factory installs on it. Scheduling and running the node is
//! the engine's business; this crate only decorates it.
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::ActionError;
use crate::model::{Dynamic, TypeModel, Value, WorkUnit};
use crate::property::Validator;

/// Opaque description of which inputs changed since the last execution.
/// Produced by the incremental-build machinery, consumed here only to hand
/// it to actions declaring the incremental-inputs parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputChanges {
    /// Whether the engine could compute a change set at all. When `false`
    /// the action must treat every input as out of date.
    pub incremental: bool,
    pub modified: Vec<Utf8PathBuf>,
}

/// Externally owned record of a task's prior execution fingerprint.
#[derive(Debug, Clone)]
pub struct ArtifactState {
    changes: InputChanges,
}

impl ArtifactState {
    pub fn new(changes: InputChanges) -> Self {
        Self { changes }
    }

    pub fn input_changes(&self) -> InputChanges {
        self.changes.clone()
    }
}

/// Per-execution context handed to context-aware actions by the engine.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    artifact_state: ArtifactState,
}

impl ExecutionContext {
    pub fn new(artifact_state: ArtifactState) -> Self {
        Self { artifact_state }
    }

    pub fn artifact_state(&self) -> &ArtifactState {
        &self.artifact_state
    }
}

/// An executable action installed on a task instance.
pub trait TaskAction: Send + Sync {
    fn execute(&self, task: &TaskNode) -> Result<(), ActionError>;

    /// Called by the engine before an execution with the context, and after
    /// it with `None`. Actions holding per-execution state pick it up here;
    /// the default implementation ignores it.
    fn contextualize(&self, _context: Option<&ExecutionContext>) {}
}

impl Debug for dyn TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TaskAction")
    }
}

/// Deferred evaluation of a property value against a task instance.
pub(crate) type FutureValue = Arc<dyn Fn(&TaskNode) -> Option<Value> + Send + Sync>;

/// Declared transformation from a raw property value to a set of paths.
pub(crate) type PathTransform = fn(&Value) -> Vec<Utf8PathBuf>;

type UpToDateSpec = Box<dyn Fn(&TaskNode) -> bool + Send + Sync>;

/// A property registered as a declared input or output path set, resolved
/// lazily against the instance.
pub struct PathBinding {
    pub(crate) property: String,
    pub(crate) resolve: FutureValue,
    pub(crate) transform: PathTransform,
}

impl PathBinding {
    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn paths(&self, task: &TaskNode) -> Vec<Utf8PathBuf> {
        (self.resolve)(task)
            .map(|value| (self.transform)(&value))
            .unwrap_or_default()
    }
}

impl Debug for PathBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PathBinding({})", self.property)
    }
}

/// A plain input value registered for fingerprinting, resolved lazily.
pub struct ValueBinding {
    pub(crate) property: String,
    pub(crate) resolve: FutureValue,
}

impl ValueBinding {
    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn snapshot(&self, task: &TaskNode) -> serde_json::Value {
        (self.resolve)(task)
            .map(|value| value.to_json())
            .unwrap_or(serde_json::Value::Null)
    }
}

impl Debug for ValueBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValueBinding({})", self.property)
    }
}

#[derive(Debug, Default)]
pub struct TaskInputs {
    files: Vec<PathBinding>,
    values: Vec<ValueBinding>,
}

impl TaskInputs {
    pub fn files(&mut self, binding: PathBinding) {
        self.files.push(binding);
    }

    pub fn value(&mut self, binding: ValueBinding) {
        self.values.push(binding);
    }

    pub fn file_bindings(&self) -> &[PathBinding] {
        &self.files
    }

    pub fn value_bindings(&self) -> &[ValueBinding] {
        &self.values
    }

    /// Every declared input path, resolved now.
    pub fn paths(&self, task: &TaskNode) -> Vec<Utf8PathBuf> {
        self.files
            .iter()
            .flat_map(|binding| binding.paths(task))
            .collect()
    }
}

#[derive(Default)]
pub struct TaskOutputs {
    files: Vec<PathBinding>,
    up_to_date: Vec<UpToDateSpec>,
}

impl TaskOutputs {
    pub fn files(&mut self, binding: PathBinding) {
        self.files.push(binding);
    }

    pub fn up_to_date_when<F>(&mut self, spec: F)
    where
        F: Fn(&TaskNode) -> bool + Send + Sync + 'static,
    {
        self.up_to_date.push(Box::new(spec));
    }

    /// Whether the instance declares any outputs, explicitly or through an
    /// up-to-date spec.
    pub fn has_declared_outputs(&self) -> bool {
        !self.files.is_empty() || !self.up_to_date.is_empty()
    }

    /// Conjunction of all registered up-to-date specs.
    pub fn satisfied(&self, task: &TaskNode) -> bool {
        self.up_to_date.iter().all(|spec| spec(task))
    }

    pub fn file_bindings(&self) -> &[PathBinding] {
        &self.files
    }

    pub fn paths(&self, task: &TaskNode) -> Vec<Utf8PathBuf> {
        self.files
            .iter()
            .flat_map(|binding| binding.paths(task))
            .collect()
    }
}

pub struct InstalledAction {
    pub(crate) action: Box<dyn TaskAction>,
    parallel_safe: bool,
}

impl InstalledAction {
    pub fn action(&self) -> &dyn TaskAction {
        &*self.action
    }

    pub fn is_parallel_safe(&self) -> bool {
        self.parallel_safe
    }
}

/// One constructed task instance, ready for decoration and execution.
pub struct TaskNode {
    name: String,
    state: Dynamic,
    model: Arc<TypeModel>,
    actions: VecDeque<InstalledAction>,
    validators: Vec<Arc<Validator>>,
    inputs: TaskInputs,
    outputs: TaskOutputs,
}

impl TaskNode {
    pub fn new<T: WorkUnit>(name: impl Into<String>, model: &Arc<TypeModel>, state: T) -> Self {
        Self::from_dynamic(name, model, Arc::new(state))
    }

    pub fn from_dynamic(name: impl Into<String>, model: &Arc<TypeModel>, state: Dynamic) -> Self {
        Self {
            name: name.into(),
            state,
            model: model.clone(),
            actions: VecDeque::new(),
            validators: Vec::new(),
            inputs: TaskInputs::default(),
            outputs: TaskOutputs::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &dyn WorkUnit {
        &*self.state
    }

    pub fn model(&self) -> &Arc<TypeModel> {
        &self.model
    }

    /// Installs an action in front of any action already present. Actions
    /// installed this way are safe to run in parallel with other tasks.
    pub fn prepend_parallel_safe(&mut self, action: Box<dyn TaskAction>) {
        self.actions.push_front(InstalledAction {
            action,
            parallel_safe: true,
        });
    }

    /// Appends a user-supplied action after everything already installed.
    pub fn append(&mut self, action: Box<dyn TaskAction>) {
        self.actions.push_back(InstalledAction {
            action,
            parallel_safe: false,
        });
    }

    pub fn add_validator(&mut self, validator: Arc<Validator>) {
        self.validators.push(validator);
    }

    pub fn validators(&self) -> &[Arc<Validator>] {
        &self.validators
    }

    pub fn actions(&self) -> impl ExactSizeIterator<Item = &InstalledAction> {
        self.actions.iter()
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn inputs(&self) -> &TaskInputs {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut TaskInputs {
        &mut self.inputs
    }

    pub fn outputs(&self) -> &TaskOutputs {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut TaskOutputs {
        &mut self.outputs
    }

    /// Runs every installed validator, accumulating user-facing messages.
    /// A pass reports every violation found, not just the first.
    pub fn validate(&self) -> Vec<String> {
        let mut messages = Vec::new();
        for validator in &self.validators {
            validator.validate(self, &mut messages);
        }
        messages
    }

    /// Runs the installed actions in order, handing each context-aware
    /// action its execution context for exactly one run.
    pub fn execute(&self, context: &ExecutionContext) -> Result<(), ActionError> {
        for installed in &self.actions {
            installed.action.contextualize(Some(context));
            let result = installed.action.execute(self);
            installed.action.contextualize(None);
            result?;
        }
        Ok(())
    }
}

impl Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("actions", &self.actions.len())
            .finish()
    }
}
