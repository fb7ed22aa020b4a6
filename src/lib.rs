#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod action;
mod error;
mod factory;
mod handler;
mod model;
mod property;
mod resolve;
mod task;

pub use crate::error::{
    ActionError, DispatchError, FactoryError, ResolveError, RuntimeError, StructuralError,
};
pub use crate::factory::{
    InstantiatingTaskFactory, MetadataStore, MetadataTaskFactory, TaskFactory, TypeMetadata,
};
pub use crate::model::{
    Bean, Dynamic, FieldModel, Getter, Marker, MethodModel, ParamKind, TypeModel, TypeModelBuilder,
    Value, Visibility, WorkUnit,
};
pub use crate::property::Validator;
pub use crate::resolve::{TypeResolver, current_context};
pub use crate::task::{
    ArtifactState, ExecutionContext, InputChanges, InstalledAction, PathBinding, TaskAction,
    TaskInputs, TaskNode, TaskOutputs, ValueBinding,
};
