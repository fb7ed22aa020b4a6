//! Property discovery and the two-phase validation pipeline.
//!
//! The validator walks a type's member hierarchy root-to-leaf, collects
//! getter-shaped accessors, and lets each registered marker handler attach
//! its behavior to the resulting [`PropertyNode`]. Nodes form a forest:
//! nested-bean properties parent the nodes discovered on the bean's own
//! type, and paths are dotted accordingly.
use std::any::TypeId;
use std::fmt::Debug;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{ActionError, StructuralError};
use crate::handler::handlers;
use crate::model::{AccessorFn, TypeModel, Value};
use crate::task::{
    FutureValue, PathBinding, PathTransform, TaskAction, TaskNode, ValueBinding,
};

/// Accessor prefixes recognized as getter-shaped.
const ACCESSOR_PREFIXES: [&str; 2] = ["get_", "is_"];

/// Derives a property name from an accessor name, or `None` when the name
/// carries no recognized prefix.
fn derive_property_name(accessor: &'static str) -> Option<&'static str> {
    ACCESSOR_PREFIXES
        .iter()
        .find_map(|prefix| accessor.strip_prefix(prefix))
        .filter(|name| !name.is_empty())
}

/// Checks one already-resolved property value for shape violations.
pub(crate) type ShapeCheck = fn(&str, &Value, &mut Vec<String>);

/// Registers a property's lazily resolved value on the task instance as a
/// declared input or output.
pub(crate) type UpdateFn = Box<dyn Fn(&mut TaskNode, FutureValue) + Send + Sync>;

/// One discoverable property on a type, possibly nested under a bean.
pub(crate) struct PropertyNode {
    pub(crate) path: String,
    parent: Option<usize>,
    required: bool,
    check_not_null: bool,
    read: AccessorFn,
    shape: Option<ShapeCheck>,
    update: Option<UpdateFn>,
}

impl PropertyNode {
    fn bare(path: String, parent: Option<usize>, read: AccessorFn) -> Self {
        Self {
            path,
            parent,
            required: false,
            check_not_null: false,
            read,
            shape: None,
            update: None,
        }
    }
}

/// The memoized result of evaluating one node's accessor during a pass.
#[derive(Clone)]
enum Snapshot {
    /// The node was unreachable because a parent bean resolved to nothing;
    /// both checks skip it without raising anything.
    Skipped,
    Value(Option<Value>),
}

/// Walks a type's properties once and validates instances of it on demand.
pub struct Validator {
    nodes: IndexMap<String, PropertyNode>,
    /// Indices of required nodes, in discovery order.
    validated: Vec<usize>,
}

impl Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Validator({})",
            self.property_paths().collect::<Vec<_>>().join(", ")
        )
    }
}

impl Validator {
    /// Builds the validator for a type, or `None` when the type declares no
    /// required properties at all.
    pub(crate) fn for_type(model: &Arc<TypeModel>) -> Result<Option<Arc<Validator>>, StructuralError> {
        let mut validator = Validator {
            nodes: IndexMap::new(),
            validated: Vec::new(),
        };
        let mut stack = vec![model.id()];
        validator.attach_properties(None, model, &mut stack)?;
        Ok((!validator.validated.is_empty()).then(|| Arc::new(validator)))
    }

    pub(crate) fn attach_properties(
        &mut self,
        parent: Option<usize>,
        model: &Arc<TypeModel>,
        stack: &mut Vec<TypeId>,
    ) -> Result<(), StructuralError> {
        // Base class first, stopping below known framework base types which
        // carry no markers.
        if let Some(base) = model.parent() {
            if !base.is_framework() {
                self.attach_properties(parent, base, stack)?;
            }
        }

        for method in model.methods() {
            if method.is_static || !method.params.is_empty() || !method.returns_value {
                continue;
            }
            let Some(read) = method.read.clone() else {
                continue;
            };
            let Some(name) = derive_property_name(method.name) else {
                continue;
            };

            let path = match parent {
                Some(parent) => format!("{}.{}", self.node(parent).path, name),
                None => name.to_string(),
            };
            // Paths are unique across the forest; the first declaration of a
            // re-declared accessor wins.
            if self.nodes.contains_key(&path) {
                continue;
            }

            let mut node = PropertyNode::bare(path.clone(), parent, read.clone());
            // Reserve the slot up front so nested children can reference it;
            // the finished node replaces the placeholder below.
            let (index, _) = self
                .nodes
                .insert_full(path.clone(), PropertyNode::bare(path, parent, read));

            let field = model.field(name);
            for handler in handlers() {
                let marker = handler.marker();
                let optional = if method.markers.contains(&marker) {
                    Some(method.optional)
                } else {
                    field.and_then(|field| field.markers.contains(&marker).then_some(field.optional))
                };
                let Some(optional) = optional else {
                    continue;
                };
                if !optional {
                    node.check_not_null = true;
                }
                let mut context = AttachContext {
                    validator: &mut *self,
                    node: &mut node,
                    index,
                    nested: method.nested.clone(),
                    stack: &mut *stack,
                };
                handler.attach(&mut context)?;
                node.required = true;
            }

            if node.required {
                self.validated.push(index);
            }
            *self
                .nodes
                .get_index_mut(index)
                .expect("reserved property slot")
                .1 = node;
        }

        Ok(())
    }

    fn node(&self, index: usize) -> &PropertyNode {
        self.nodes
            .get_index(index)
            .expect("property node index")
            .1
    }

    /// Paths of all required properties, in discovery order.
    pub fn property_paths(&self) -> impl Iterator<Item = &str> {
        self.validated.iter().map(|&index| self.node(index).path.as_str())
    }

    fn snapshot(
        &self,
        index: usize,
        task: &TaskNode,
        memo: &mut Vec<Option<Snapshot>>,
    ) -> Snapshot {
        if let Some(snapshot) = &memo[index] {
            return snapshot.clone();
        }
        let node = self.node(index);
        let snapshot = match node.parent {
            None => Snapshot::Value((node.read)(task.state())),
            Some(parent) => match self.snapshot(parent, task, memo) {
                Snapshot::Value(Some(Value::Bean(bean))) => {
                    Snapshot::Value((node.read)(bean.state()))
                }
                _ => Snapshot::Skipped,
            },
        };
        memo[index] = Some(snapshot.clone());
        snapshot
    }

    /// Resolves one node's current value against an instance, outside any
    /// validation pass. Used by the lazy input/output bindings.
    pub(crate) fn value_of(&self, index: usize, task: &TaskNode) -> Option<Value> {
        let mut memo = vec![None; self.nodes.len()];
        match self.snapshot(index, task, &mut memo) {
            Snapshot::Value(value) => value,
            Snapshot::Skipped => None,
        }
    }

    /// One full validation pass over an instance.
    ///
    /// Every required node's value is snapshotted exactly once; all not-null
    /// checks run over the snapshots before any shape check does, and every
    /// violation found is accumulated rather than failing fast.
    pub fn validate(&self, task: &TaskNode, messages: &mut Vec<String>) {
        let mut memo = vec![None; self.nodes.len()];
        let snapshots: Vec<(usize, Snapshot)> = self
            .validated
            .iter()
            .map(|&index| (index, self.snapshot(index, task, &mut memo)))
            .collect();

        for (index, snapshot) in &snapshots {
            let node = self.node(*index);
            if node.check_not_null && matches!(snapshot, Snapshot::Value(None)) {
                messages.push(format!(
                    "No value has been specified for property '{}'.",
                    node.path
                ));
            }
        }
        for (index, snapshot) in &snapshots {
            let node = self.node(*index);
            if let (Some(check), Snapshot::Value(Some(value))) = (node.shape, snapshot) {
                check(&node.path, value, messages);
            }
        }
    }

    /// Registers the validator and the lazily evaluated values of all
    /// required properties on a freshly constructed instance.
    pub(crate) fn add_inputs_and_outputs(self: &Arc<Self>, task: &mut TaskNode) {
        task.add_validator(self.clone());
        for &index in &self.validated {
            if let Some(update) = &self.node(index).update {
                let validator = self.clone();
                let future: FutureValue = Arc::new(move |task| validator.value_of(index, task));
                update(task, future);
            }
        }
    }
}

/// Handler-facing view of the node currently being attached.
pub(crate) struct AttachContext<'a> {
    validator: &'a mut Validator,
    node: &'a mut PropertyNode,
    index: usize,
    nested: Option<Arc<TypeModel>>,
    stack: &'a mut Vec<TypeId>,
}

impl AttachContext<'_> {
    pub(crate) fn shape_check(&mut self, check: ShapeCheck) {
        self.node.shape = Some(check);
    }

    pub(crate) fn register_input_files(&mut self, transform: PathTransform) {
        let property = self.node.path.clone();
        self.node.update = Some(Box::new(move |task, future| {
            task.inputs_mut().files(PathBinding {
                property: property.clone(),
                resolve: future,
                transform,
            });
        }));
    }

    pub(crate) fn register_output_files(&mut self, transform: PathTransform) {
        let property = self.node.path.clone();
        self.node.update = Some(Box::new(move |task, future| {
            task.outputs_mut().files(PathBinding {
                property: property.clone(),
                resolve: future,
                transform,
            });
        }));
    }

    pub(crate) fn register_input_value(&mut self) {
        let property = self.node.path.clone();
        self.node.update = Some(Box::new(move |task, future| {
            task.inputs_mut().value(ValueBinding {
                property: property.clone(),
                resolve: future,
            });
        }));
    }

    /// Recursively discovers the properties of a nested bean, parented at
    /// the current node. Discovery fails instead of recursing forever when
    /// the bean type re-enters the current bean stack.
    pub(crate) fn walk_nested(&mut self) -> Result<(), StructuralError> {
        let Some(model) = self.nested.clone() else {
            return Ok(());
        };
        if self.stack.contains(&model.id()) {
            return Err(StructuralError::NestedCycle(
                self.node.path.clone(),
                model.name(),
            ));
        }
        self.stack.push(model.id());
        let result = self
            .validator
            .attach_properties(Some(self.index), &model, self.stack);
        self.stack.pop();
        result
    }
}

/// Placeholder action installed in front of everything else when a type has
/// a validator. Validation itself runs through the validator registration;
/// executing the action does nothing.
pub(crate) struct ValidationAction {
    _validator: Arc<Validator>,
}

impl ValidationAction {
    pub(crate) fn new(validator: Arc<Validator>) -> Self {
        Self {
            _validator: validator,
        }
    }
}

impl TaskAction for ValidationAction {
    fn execute(&self, _task: &TaskNode) -> Result<(), ActionError> {
        Ok(())
    }
}
