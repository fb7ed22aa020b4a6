pub use anyhow::Error as RuntimeError;
use thiserror::Error;

/// Discovery-time structural problems with a unit-of-work type. These are
/// fatal: nothing is cached for the offending type, so every construction
/// attempt re-runs discovery and reports the same error.
#[derive(Debug, Error)]
pub enum StructuralError {
    #[error("Cannot use an action marker on static method {0}.{1}().")]
    StaticAction(&'static str, &'static str),

    #[error("Cannot use an action marker on method {0}.{1}() as this method takes multiple parameters.")]
    MultipleParameters(&'static str, &'static str),

    #[error("Cannot use an action marker on method {0}.{1}() because {2} is not a valid parameter to an action method.")]
    InvalidParameterType(&'static str, &'static str, &'static str),

    #[error("Cannot have multiple action methods accepting an InputChanges parameter.")]
    MultipleIncrementalActions,

    #[error("Nested property '{0}' creates a cycle through type '{1}'.")]
    NestedCycle(String, &'static str),
}

/// Dispatcher synthesis problems. Never downgraded to the plain path.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to synthesize a direct dispatcher for {0}.{1}() because the method has no body bound to it.")]
    Synthesis(&'static str, &'static str),

    #[error("Action method {0}.{1}() has no body bound to it.")]
    MissingBody(&'static str, &'static str),
}

/// Execution-time action failures.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Type '{0}' does not declare an action method named '{1}'.")]
    MissingMethod(&'static str, &'static str),

    #[error("Action method {0}.{1}() has not been given an execution context.")]
    MissingContext(&'static str, &'static str),

    #[error(transparent)]
    Userland(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Type '{0}' is not registered with this resolver.")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("Type '{0}' does not declare a constructor.")]
    NoConstructor(&'static str),

    #[error("Failed to install actions on task '{0}'.\n{1}")]
    Install(String, DispatchError),
}
