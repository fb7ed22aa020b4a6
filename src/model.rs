//! The declared-member model for unit-of-work types.
//!
//! Build logic and plugins hand the engine types whose shape is unknown until
//! they are loaded, so every type registers a [`TypeModel`]: the set of
//! declared methods and fields at each level of its hierarchy, together with
//! type-erased closures that read properties and run action bodies. The model
//! is the introspection surface everything else in this crate walks.
use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, Weak};

use camino::Utf8PathBuf;

use crate::resolve::TypeResolver;
use crate::task::InputChanges;

/// A type-erased, thread-safe unit-of-work state.
pub type Dynamic = Arc<dyn WorkUnit>;

/// Implemented by every concrete unit-of-work state type.
///
/// Types which extend another unit-of-work type embed the base state and
/// surface it through [`WorkUnit::base`], which lets members declared on a
/// base level read their data from any derived instance.
pub trait WorkUnit: Any + Send + Sync {
    /// The embedded base state, if this type extends another.
    fn base(&self) -> Option<&dyn WorkUnit> {
        None
    }
}

/// Walks the base-chain of `unit` until a level with the concrete type `T`
/// is found.
pub(crate) fn receiver<T: WorkUnit>(unit: &dyn WorkUnit) -> Option<&T> {
    let mut current = Some(unit);
    while let Some(unit) = current {
        if let Some(concrete) = (unit as &dyn Any).downcast_ref::<T>() {
            return Some(concrete);
        }
        current = unit.base();
    }
    None
}

/// A runtime property value produced by an accessor.
#[derive(Clone)]
pub enum Value {
    /// A single filesystem path.
    Path(Utf8PathBuf),
    /// A collection of filesystem paths.
    Paths(Vec<Utf8PathBuf>),
    /// A plain input value, compared by serialized form.
    Scalar(serde_json::Value),
    /// A nested bean exposing further properties.
    Bean(Bean),
}

impl Value {
    /// All paths named by this value. Non-path values name none.
    pub(crate) fn as_paths(&self) -> &[Utf8PathBuf] {
        match self {
            Value::Path(path) => std::slice::from_ref(path),
            Value::Paths(paths) => paths,
            _ => &[],
        }
    }

    /// The serialized form used when the value participates in input
    /// fingerprinting. Beans carry no comparable value of their own.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Path(path) => serde_json::Value::String(path.to_string()),
            Value::Paths(paths) => paths.iter().map(|p| p.to_string()).collect(),
            Value::Scalar(value) => value.clone(),
            Value::Bean(_) => serde_json::Value::Null,
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Path(path) => write!(f, "Path({path})"),
            Value::Paths(paths) => write!(f, "Paths({paths:?})"),
            Value::Scalar(value) => write!(f, "Scalar({value})"),
            Value::Bean(bean) => write!(f, "Bean({})", bean.model.name()),
        }
    }
}

/// A nested unit-of-work state together with its declared shape.
#[derive(Clone)]
pub struct Bean {
    state: Dynamic,
    model: Arc<TypeModel>,
}

impl Bean {
    pub fn new(state: Dynamic, model: &Arc<TypeModel>) -> Self {
        Self {
            state,
            model: model.clone(),
        }
    }

    pub(crate) fn state(&self) -> &dyn WorkUnit {
        &*self.state
    }

    pub fn model(&self) -> &Arc<TypeModel> {
        &self.model
    }
}

/// Declarative tag identifying the role of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    InputFile,
    InputDirectory,
    InputFiles,
    OutputFile,
    OutputFiles,
    OutputDirectory,
    OutputDirectories,
    /// A plain input value.
    Input,
    /// A nested bean whose own properties participate in discovery.
    Nested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// The declared kind of a method parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// The incremental-inputs marker type.
    InputChanges,
    /// Anything else, by display name.
    Other(&'static str),
}

impl ParamKind {
    pub(crate) fn display(&self) -> &'static str {
        match self {
            ParamKind::InputChanges => "InputChanges",
            ParamKind::Other(name) => name,
        }
    }
}

pub(crate) type ActionFn = Arc<dyn Fn(&dyn WorkUnit) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type IncrementalFn =
    Arc<dyn Fn(&dyn WorkUnit, &InputChanges) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type AccessorFn = Arc<dyn Fn(&dyn WorkUnit) -> Option<Value> + Send + Sync>;

/// One declared method on a hierarchy level.
///
/// Most declarations are produced by [`TypeModelBuilder`], which binds the
/// body or accessor closure alongside the shape. The raw constructors exist
/// so registrations can declare shapes the builder would refuse to bind a
/// body to, such as static or multi-parameter methods.
pub struct MethodModel {
    pub name: &'static str,
    pub visibility: Visibility,
    pub is_static: bool,
    pub params: Vec<ParamKind>,
    pub returns_value: bool,
    pub is_action: bool,
    /// Property markers present on the accessor itself.
    pub markers: Vec<Marker>,
    /// Whether the explicit optional marker is present on the accessor.
    pub optional: bool,
    /// The declared shape of a nested bean property.
    pub nested: Option<Arc<TypeModel>>,
    pub(crate) invoke: Option<ActionFn>,
    pub(crate) invoke_incremental: Option<IncrementalFn>,
    pub(crate) read: Option<AccessorFn>,
}

impl MethodModel {
    /// A public, zero-parameter method declaration with nothing attached.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            visibility: Visibility::Public,
            is_static: false,
            params: Vec::new(),
            returns_value: false,
            is_action: false,
            markers: Vec::new(),
            optional: false,
            nested: None,
            invoke: None,
            invoke_incremental: None,
            read: None,
        }
    }

    pub fn action(mut self) -> Self {
        self.is_action = true;
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn param(mut self, param: ParamKind) -> Self {
        self.params.push(param);
        self
    }

    pub(crate) fn signature(&self) -> &'static str {
        match self.params.as_slice() {
            [] => "()",
            [ParamKind::InputChanges] => "(InputChanges)",
            _ => "(...)",
        }
    }
}

impl Debug for MethodModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MethodModel({}{})", self.name, self.signature())
    }
}

/// One declared field on a hierarchy level. Fields act as the fallback
/// location for property markers when the accessor carries none.
#[derive(Debug)]
pub struct FieldModel {
    pub name: &'static str,
    pub markers: Vec<Marker>,
    pub optional: bool,
}

impl FieldModel {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            markers: Vec::new(),
            optional: false,
        }
    }

    pub fn marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

type ConstructFn = Arc<dyn Fn() -> Dynamic + Send + Sync>;

/// The registered shape of one level of a unit-of-work type hierarchy.
///
/// Identity is the [`TypeId`] of the concrete state type; the per-type
/// metadata cache and the direct dispatcher cache both key on it.
pub struct TypeModel {
    name: &'static str,
    id: TypeId,
    parent: Option<Arc<TypeModel>>,
    framework: bool,
    methods: Vec<MethodModel>,
    fields: Vec<FieldModel>,
    construct: Option<ConstructFn>,
    origin: OnceLock<Weak<TypeResolver>>,
}

impl TypeModel {
    pub fn of<T: WorkUnit>(name: &'static str) -> TypeModelBuilder<T> {
        TypeModelBuilder {
            name,
            parent: None,
            framework: false,
            methods: Vec::new(),
            fields: Vec::new(),
            construct: None,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn parent(&self) -> Option<&Arc<TypeModel>> {
        self.parent.as_ref()
    }

    pub fn is_framework(&self) -> bool {
        self.framework
    }

    pub fn methods(&self) -> &[MethodModel] {
        &self.methods
    }

    pub(crate) fn field(&self, property: &str) -> Option<&FieldModel> {
        self.fields.iter().find(|field| field.name == property)
    }

    /// The hierarchy from this concrete level up to the root.
    pub(crate) fn lineage(self: &Arc<Self>) -> Vec<Arc<TypeModel>> {
        let mut levels = Vec::new();
        let mut level = Some(self.clone());
        while let Some(current) = level {
            level = current.parent.clone();
            levels.push(current);
        }
        levels
    }

    /// Generic call-by-name lookup: the first action method with a matching
    /// name, walking from this level toward the root.
    pub(crate) fn find_action(&self, name: &str) -> Option<&MethodModel> {
        let mut level = Some(self);
        while let Some(current) = level {
            if let Some(method) = current
                .methods
                .iter()
                .find(|method| method.is_action && method.name == name)
            {
                return Some(method);
            }
            level = current.parent.as_deref();
        }
        None
    }

    pub(crate) fn instantiate(&self) -> Option<Dynamic> {
        self.construct.as_ref().map(|construct| construct())
    }

    pub(crate) fn set_origin(&self, resolver: Weak<TypeResolver>) {
        let _ = self.origin.set(resolver);
    }

    /// The resolver this model was registered with, if still alive.
    pub fn origin(&self) -> Option<Arc<TypeResolver>> {
        self.origin.get().and_then(Weak::upgrade)
    }
}

impl Debug for TypeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypeModel({})", self.name)
    }
}

/// Declarative description of a getter-shaped accessor method.
pub struct Getter {
    name: &'static str,
    markers: Vec<Marker>,
    optional: bool,
    nested: Option<Arc<TypeModel>>,
}

impl Getter {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            markers: Vec::new(),
            optional: false,
            nested: None,
        }
    }

    /// A nested-bean accessor, declaring the shape of the bean it returns.
    pub fn nested(name: &'static str, model: &Arc<TypeModel>) -> Self {
        Self {
            name,
            markers: vec![Marker::Nested],
            optional: false,
            nested: Some(model.clone()),
        }
    }

    pub fn marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Builder binding typed closures to the declared members of `T`.
pub struct TypeModelBuilder<T> {
    name: &'static str,
    parent: Option<Arc<TypeModel>>,
    framework: bool,
    methods: Vec<MethodModel>,
    fields: Vec<FieldModel>,
    construct: Option<ConstructFn>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: WorkUnit> TypeModelBuilder<T> {
    pub fn parent(mut self, parent: &Arc<TypeModel>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Marks this level as a framework base type which carries no property
    /// markers of its own; the property discovery walk stops below it.
    pub fn framework_base(mut self) -> Self {
        self.framework = true;
        self
    }

    pub fn constructor<F>(mut self, construct: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.construct = Some(Arc::new(move || Arc::new(construct()) as Dynamic));
        self
    }

    /// Declares a zero-parameter action method with its body.
    pub fn action<F>(mut self, name: &'static str, visibility: Visibility, body: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let invoke: ActionFn = Arc::new(move |unit| {
            let unit = receiver::<T>(unit).ok_or_else(|| {
                anyhow::anyhow!("receiver is not a {}", std::any::type_name::<T>())
            })?;
            body(unit)
        });
        let mut method = MethodModel::new(name).action().visibility(visibility);
        method.invoke = Some(invoke);
        self.methods.push(method);
        self
    }

    /// Declares an action method taking the incremental-inputs parameter.
    pub fn incremental_action<F>(
        mut self,
        name: &'static str,
        visibility: Visibility,
        body: F,
    ) -> Self
    where
        F: Fn(&T, &InputChanges) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let invoke: IncrementalFn = Arc::new(move |unit, changes| {
            let unit = receiver::<T>(unit).ok_or_else(|| {
                anyhow::anyhow!("receiver is not a {}", std::any::type_name::<T>())
            })?;
            body(unit, changes)
        });
        let mut method = MethodModel::new(name)
            .action()
            .visibility(visibility)
            .param(ParamKind::InputChanges);
        method.invoke_incremental = Some(invoke);
        self.methods.push(method);
        self
    }

    /// Declares a getter-shaped accessor method with its read closure.
    pub fn getter<F>(mut self, getter: Getter, read: F) -> Self
    where
        F: Fn(&T) -> Option<Value> + Send + Sync + 'static,
    {
        let read: AccessorFn = Arc::new(move |unit| receiver::<T>(unit).and_then(&read));
        let mut method = MethodModel::new(getter.name);
        method.returns_value = true;
        method.markers = getter.markers;
        method.optional = getter.optional;
        method.nested = getter.nested;
        method.read = Some(read);
        self.methods.push(method);
        self
    }

    /// Declares a raw method shape without binding anything to it.
    pub fn method(mut self, method: MethodModel) -> Self {
        self.methods.push(method);
        self
    }

    pub fn field(mut self, field: FieldModel) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Arc<TypeModel> {
        Arc::new(TypeModel {
            name: self.name,
            id: TypeId::of::<T>(),
            parent: self.parent,
            framework: self.framework,
            methods: self.methods,
            fields: self.fields,
            construct: self.construct,
            origin: OnceLock::new(),
        })
    }
}
