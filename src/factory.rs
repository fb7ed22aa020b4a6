//! The metadata store and the decorating task factory.
//!
//! Everything this crate extracts from a type is computed once, memoized in
//! a [`MetadataStore`], and replayed onto every instance the factory hands
//! out: dispatchers for the declared actions, the validator, and the lazy
//! input/output registrations of the validated properties.
use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;

use crate::action::{ActionFactory, find_task_actions};
use crate::error::FactoryError;
use crate::model::TypeModel;
use crate::property::{ValidationAction, Validator};
use crate::task::TaskNode;

/// The extracted per-type metadata: action factories in discovery order, the
/// validator if any property requires one, and whether the type declares an
/// incremental action.
pub struct TypeMetadata {
    actions: Vec<ActionFactory>,
    validator: Option<Arc<Validator>>,
    incremental: bool,
}

impl TypeMetadata {
    fn compute(model: &Arc<TypeModel>) -> Result<Self, FactoryError> {
        let (actions, incremental) = find_task_actions(model)?;
        let validator = Validator::for_type(model)?;
        Ok(Self {
            actions,
            validator,
            incremental,
        })
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    pub fn is_incremental(&self) -> bool {
        self.incremental
    }
}

/// Memoizes [`TypeMetadata`] by the concrete state type. Extraction failures
/// are not cached, so a structurally broken type reports the same error on
/// every construction attempt.
#[derive(Default)]
pub struct MetadataStore {
    cache: DashMap<TypeId, Arc<TypeMetadata>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&self, model: &Arc<TypeModel>) -> Result<Arc<TypeMetadata>, FactoryError> {
        if let Some(cached) = self.cache.get(&model.id()) {
            return Ok(cached.clone());
        }
        // Computed outside the map entry so a failure leaves nothing behind.
        let computed = Arc::new(TypeMetadata::compute(model)?);
        tracing::debug!(
            "extracted metadata for {}: {} action(s), validator: {}",
            model.name(),
            computed.actions.len(),
            computed.validator.is_some(),
        );
        Ok(self.cache.entry(model.id()).or_insert(computed).clone())
    }
}

/// Constructs task instances for a registered type model.
pub trait TaskFactory: Send + Sync {
    fn create(&self, name: &str, model: &Arc<TypeModel>) -> Result<TaskNode, FactoryError>;
}

/// The innermost factory: constructs the bare state through the model's
/// registered constructor and wraps it in an undecorated [`TaskNode`].
pub struct InstantiatingTaskFactory;

impl TaskFactory for InstantiatingTaskFactory {
    fn create(&self, name: &str, model: &Arc<TypeModel>) -> Result<TaskNode, FactoryError> {
        let state = model
            .instantiate()
            .ok_or(FactoryError::NoConstructor(model.name()))?;
        Ok(TaskNode::from_dynamic(name, model, state))
    }
}

/// Decorating factory: delegates construction to an inner factory, then
/// installs the type's extracted metadata on the fresh instance.
pub struct MetadataTaskFactory {
    store: Arc<MetadataStore>,
    inner: Arc<dyn TaskFactory>,
}

impl MetadataTaskFactory {
    pub fn new(inner: Arc<dyn TaskFactory>) -> Self {
        Self {
            store: Arc::new(MetadataStore::new()),
            inner,
        }
    }

    /// A sibling factory over a different inner factory, sharing this
    /// factory's metadata store.
    pub fn create_child(&self, inner: Arc<dyn TaskFactory>) -> Self {
        Self {
            store: self.store.clone(),
            inner,
        }
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    /// Installs the type's metadata on a constructed instance.
    pub fn process(&self, mut task: TaskNode) -> Result<TaskNode, FactoryError> {
        let metadata = self.store.metadata(task.model())?;

        if metadata.incremental {
            // An incremental action reads its own change set; the task is
            // never out of date for lack of declared outputs.
            task.outputs_mut().up_to_date_when(|_| true);
        }

        for factory in &metadata.actions {
            let action = factory
                .create()
                .map_err(|err| FactoryError::Install(task.name().to_string(), err))?;
            task.prepend_parallel_safe(action);
        }

        if let Some(validator) = &metadata.validator {
            task.prepend_parallel_safe(Box::new(ValidationAction::new(validator.clone())));
            validator.add_inputs_and_outputs(&mut task);
        }

        Ok(task)
    }
}

impl TaskFactory for MetadataTaskFactory {
    fn create(&self, name: &str, model: &Arc<TypeModel>) -> Result<TaskNode, FactoryError> {
        self.process(self.inner.create(name, model)?)
    }
}
