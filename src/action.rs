//! Discovery of declared action methods and synthesis of their dispatchers.
//!
//! Discovery walks a type's hierarchy leaf to root, validates the shape of
//! every action-marked method, and produces one [`ActionFactory`] per unique
//! action name. A factory synthesizes the cheapest dispatcher the method
//! allows: a direct dispatcher bound straight to the body for public
//! zero-parameter methods, a name-resolved plain dispatcher otherwise, and a
//! context-consuming incremental dispatcher for methods declaring the
//! incremental-inputs parameter.
use std::any::TypeId;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock, Mutex};

use dashmap::DashMap;

use crate::error::{ActionError, DispatchError, StructuralError};
use crate::model::{ActionFn, IncrementalFn, ParamKind, TypeModel, Visibility};
use crate::resolve::{self, TypeResolver};
use crate::task::{ArtifactState, ExecutionContext, TaskAction, TaskNode};

/// The discovered shape of one action method, pinned to the hierarchy level
/// declaring it.
pub(crate) struct ActionDescriptor {
    declaring: Arc<TypeModel>,
    name: &'static str,
    visibility: Visibility,
    incremental: bool,
    invoke: Option<ActionFn>,
    invoke_incremental: Option<IncrementalFn>,
    signature: &'static str,
}

/// Produces a fresh dispatcher for one discovered action method. Factories
/// are cached per type and re-used across every construction of it.
pub struct ActionFactory {
    descriptor: Arc<ActionDescriptor>,
}

impl Debug for ActionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ActionFactory({}.{})",
            self.descriptor.declaring.name(),
            self.descriptor.name
        )
    }
}

impl ActionFactory {
    pub(crate) fn create(&self) -> Result<Box<dyn TaskAction>, DispatchError> {
        let descriptor = &self.descriptor;
        if descriptor.incremental {
            let invoke = descriptor.invoke_incremental.clone().ok_or(
                DispatchError::MissingBody(descriptor.declaring.name(), descriptor.name),
            )?;
            return Ok(Box::new(IncrementalAction {
                declaring: descriptor.declaring.clone(),
                name: descriptor.name,
                invoke,
                context: Mutex::new(None),
            }));
        }

        if descriptor.visibility == Visibility::Public {
            // Synthesis failures are fatal; the direct path never degrades
            // to name resolution.
            let invoke = direct_dispatcher(descriptor)?;
            return Ok(Box::new(DirectAction { invoke }));
        }

        tracing::debug!(
            "Cannot synthesize a direct dispatcher for {}.{}() because the method is not public.",
            descriptor.declaring.name(),
            descriptor.name,
        );
        Ok(Box::new(PlainAction {
            declaring: descriptor.declaring.clone(),
            name: descriptor.name,
        }))
    }
}

type DirectKey = (TypeId, &'static str, &'static str);

/// Process-wide cache of synthesized direct dispatchers, keyed by declaring
/// type, method name, and signature.
static DIRECT_DISPATCHERS: LazyLock<DashMap<DirectKey, ActionFn>> = LazyLock::new(DashMap::new);

fn direct_dispatcher(descriptor: &ActionDescriptor) -> Result<ActionFn, DispatchError> {
    let key = (
        descriptor.declaring.id(),
        descriptor.name,
        descriptor.signature,
    );
    if let Some(cached) = DIRECT_DISPATCHERS.get(&key) {
        return Ok(cached.clone());
    }
    let invoke = descriptor.invoke.clone().ok_or(DispatchError::Synthesis(
        descriptor.declaring.name(),
        descriptor.name,
    ))?;
    // First synthesis wins under a race.
    Ok(DIRECT_DISPATCHERS.entry(key).or_insert(invoke).clone())
}

/// Dispatcher bound straight to the declared body: no lookup per call and
/// no resolver swap, unlike the name-resolved paths.
struct DirectAction {
    invoke: ActionFn,
}

impl TaskAction for DirectAction {
    fn execute(&self, task: &TaskNode) -> Result<(), ActionError> {
        (self.invoke)(task.state())?;
        Ok(())
    }
}

/// Dispatcher resolving the action by name on every call, so overrides on
/// the instance's concrete type win over the declaring level.
struct PlainAction {
    declaring: Arc<TypeModel>,
    name: &'static str,
}

impl TaskAction for PlainAction {
    fn execute(&self, task: &TaskNode) -> Result<(), ActionError> {
        let _guard = swap_to_origin(&self.declaring);
        let invoke = task
            .model()
            .find_action(self.name)
            .and_then(|method| method.invoke.clone())
            .ok_or(ActionError::MissingMethod(self.declaring.name(), self.name))?;
        invoke(task.state())?;
        Ok(())
    }
}

/// Dispatcher for the incremental action. Holds the execution context handed
/// to it before the run and consumes it exactly once.
struct IncrementalAction {
    declaring: Arc<TypeModel>,
    name: &'static str,
    invoke: IncrementalFn,
    context: Mutex<Option<ArtifactState>>,
}

impl TaskAction for IncrementalAction {
    fn execute(&self, task: &TaskNode) -> Result<(), ActionError> {
        let state = self
            .context
            .lock()
            .unwrap()
            .take()
            .ok_or(ActionError::MissingContext(
                self.declaring.name(),
                self.name,
            ))?;
        let changes = state.input_changes();
        let _guard = swap_to_origin(&self.declaring);
        (self.invoke)(task.state(), &changes)?;
        Ok(())
    }

    fn contextualize(&self, context: Option<&ExecutionContext>) {
        *self.context.lock().unwrap() =
            context.map(|context| context.artifact_state().clone());
    }
}

/// Scopes the call to the resolver the declaring model was registered with,
/// restoring the caller's context afterwards.
fn swap_to_origin(declaring: &Arc<TypeModel>) -> resolve::ContextGuard {
    let origin: Option<Arc<TypeResolver>> = declaring.origin();
    resolve::swap_context(origin)
}

/// Walks the hierarchy leaf to root and collects one factory per unique
/// action name, validating every declaration on the way. Returns the
/// factories in discovery order together with whether any action is
/// incremental.
pub(crate) fn find_task_actions(
    model: &Arc<TypeModel>,
) -> Result<(Vec<ActionFactory>, bool), StructuralError> {
    let mut factories = Vec::new();
    let mut processed: HashSet<&'static str> = HashSet::new();
    let mut incremental = false;

    for level in model.lineage() {
        for method in level.methods() {
            if !method.is_action {
                continue;
            }
            if method.is_static {
                return Err(StructuralError::StaticAction(level.name(), method.name));
            }
            if method.params.len() > 1 {
                return Err(StructuralError::MultipleParameters(
                    level.name(),
                    method.name,
                ));
            }
            let declares_incremental = match method.params.as_slice() {
                [] => false,
                [ParamKind::InputChanges] => true,
                [param] => {
                    return Err(StructuralError::InvalidParameterType(
                        level.name(),
                        method.name,
                        param.display(),
                    ));
                }
                _ => unreachable!(),
            };
            if declares_incremental {
                // Checked before override de-duplication: an overridden
                // incremental action still counts as a second declaration.
                if incremental {
                    return Err(StructuralError::MultipleIncrementalActions);
                }
                incremental = true;
            }
            if !processed.insert(method.name) {
                continue;
            }
            factories.push(ActionFactory {
                descriptor: Arc::new(ActionDescriptor {
                    declaring: level.clone(),
                    name: method.name,
                    visibility: method.visibility,
                    incremental: declares_incremental,
                    invoke: method.invoke.clone(),
                    invoke_incremental: method.invoke_incremental.clone(),
                    signature: method.signature(),
                }),
            });
        }
    }

    Ok((factories, incremental))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::model::{MethodModel, WorkUnit};
    use crate::task::InputChanges;

    fn run(action: &dyn TaskAction, task: &TaskNode) -> Result<(), ActionError> {
        let context = ExecutionContext::new(ArtifactState::new(InputChanges::default()));
        action.contextualize(Some(&context));
        let result = action.execute(task);
        action.contextualize(None);
        result
    }

    #[test]
    fn static_action_methods_are_rejected() {
        struct Broken;
        impl WorkUnit for Broken {}

        let model = TypeModel::of::<Broken>("Broken")
            .method(MethodModel::new("run").action().static_method())
            .build();

        let err = find_task_actions(&model).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot use an action marker on static method Broken.run()."
        );
    }

    #[test]
    fn multi_parameter_action_methods_are_rejected() {
        struct Broken;
        impl WorkUnit for Broken {}

        let model = TypeModel::of::<Broken>("Broken")
            .method(
                MethodModel::new("run")
                    .action()
                    .param(ParamKind::InputChanges)
                    .param(ParamKind::Other("String")),
            )
            .build();

        let err = find_task_actions(&model).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot use an action marker on method Broken.run() as this method takes multiple parameters."
        );
    }

    #[test]
    fn single_non_incremental_parameter_is_rejected() {
        struct Broken;
        impl WorkUnit for Broken {}

        let model = TypeModel::of::<Broken>("Broken")
            .method(
                MethodModel::new("run")
                    .action()
                    .param(ParamKind::Other("String")),
            )
            .build();

        let err = find_task_actions(&model).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot use an action marker on method Broken.run() because String is not a valid parameter to an action method."
        );
    }

    #[test]
    fn two_incremental_actions_are_rejected() {
        struct Broken;
        impl WorkUnit for Broken {}

        let model = TypeModel::of::<Broken>("Broken")
            .incremental_action("first", Visibility::Public, |_: &Broken, _| Ok(()))
            .incremental_action("second", Visibility::Public, |_: &Broken, _| Ok(()))
            .build();

        assert!(matches!(
            find_task_actions(&model).unwrap_err(),
            StructuralError::MultipleIncrementalActions
        ));
    }

    #[test]
    fn overridden_incremental_action_still_counts_twice() {
        struct Base;
        impl WorkUnit for Base {}
        struct Derived {
            base: Base,
        }
        impl WorkUnit for Derived {
            fn base(&self) -> Option<&dyn WorkUnit> {
                Some(&self.base)
            }
        }

        let base = TypeModel::of::<Base>("Base")
            .incremental_action("sync", Visibility::Public, |_: &Base, _| Ok(()))
            .build();
        let derived = TypeModel::of::<Derived>("Derived")
            .parent(&base)
            .incremental_action("sync", Visibility::Public, |_: &Derived, _| Ok(()))
            .build();

        // The duplicate check runs before override de-duplication would
        // collapse the two declarations.
        assert!(matches!(
            find_task_actions(&derived).unwrap_err(),
            StructuralError::MultipleIncrementalActions
        ));
    }

    #[test]
    fn overridden_plain_action_is_collected_once_and_runs_the_override() {
        static BASE_RUNS: AtomicUsize = AtomicUsize::new(0);
        static DERIVED_RUNS: AtomicUsize = AtomicUsize::new(0);

        struct Base;
        impl WorkUnit for Base {}
        struct Derived {
            base: Base,
        }
        impl WorkUnit for Derived {
            fn base(&self) -> Option<&dyn WorkUnit> {
                Some(&self.base)
            }
        }

        let base = TypeModel::of::<Base>("Base")
            .action("pack", Visibility::Public, |_: &Base| {
                BASE_RUNS.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build();
        let derived = TypeModel::of::<Derived>("Derived")
            .parent(&base)
            .action("pack", Visibility::Public, |_: &Derived| {
                DERIVED_RUNS.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build();

        let (factories, incremental) = find_task_actions(&derived).unwrap();
        assert_eq!(factories.len(), 1);
        assert!(!incremental);

        let task = TaskNode::new("pack", &derived, Derived { base: Base });
        let action = factories[0].create().unwrap();
        run(&*action, &task).unwrap();

        assert_eq!(DERIVED_RUNS.load(Ordering::SeqCst), 1);
        assert_eq!(BASE_RUNS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn direct_dispatchers_are_synthesized_once_per_method() {
        struct Unit;
        impl WorkUnit for Unit {}

        let model = TypeModel::of::<Unit>("Unit")
            .action("run", Visibility::Public, |_: &Unit| Ok(()))
            .build();

        let (factories, _) = find_task_actions(&model).unwrap();
        let first = direct_dispatcher(&factories[0].descriptor).unwrap();
        let second = direct_dispatcher(&factories[0].descriptor).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn factories_and_dispatchers_format_by_declaring_method() {
        struct Fmt;
        impl WorkUnit for Fmt {}

        let model = TypeModel::of::<Fmt>("Fmt")
            .action("run", Visibility::Public, |_: &Fmt| Ok(()))
            .build();

        let (factories, _) = find_task_actions(&model).unwrap();
        assert_eq!(format!("{:?}", factories[0]), "ActionFactory(Fmt.run)");

        let action = factories[0].create().unwrap();
        assert_eq!(format!("{action:?}"), "TaskAction");
    }

    #[test]
    fn direct_synthesis_failure_is_fatal() {
        struct Unit;
        impl WorkUnit for Unit {}

        // A public zero-parameter action with no body bound to it.
        let model = TypeModel::of::<Unit>("Unit")
            .method(MethodModel::new("ghost").action())
            .build();

        let (factories, _) = find_task_actions(&model).unwrap();
        let err = factories[0].create().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to synthesize a direct dispatcher for Unit.ghost() because the method has no body bound to it."
        );
    }

    #[test]
    fn private_actions_fall_back_to_name_resolution() {
        static RUNS: AtomicUsize = AtomicUsize::new(0);

        struct Unit;
        impl WorkUnit for Unit {}

        let model = TypeModel::of::<Unit>("Unit")
            .action("hidden", Visibility::Private, |_: &Unit| {
                RUNS.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build();

        let (factories, _) = find_task_actions(&model).unwrap();
        let action = factories[0].create().unwrap();
        let task = TaskNode::new("unit", &model, Unit);
        run(&*action, &task).unwrap();
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn incremental_action_requires_a_context_and_consumes_it() {
        static RUNS: AtomicUsize = AtomicUsize::new(0);

        struct Sync;
        impl WorkUnit for Sync {}

        let model = TypeModel::of::<Sync>("Sync")
            .incremental_action("sync", Visibility::Public, |_: &Sync, changes| {
                assert!(changes.incremental);
                RUNS.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build();

        let (factories, incremental) = find_task_actions(&model).unwrap();
        assert!(incremental);

        let task = TaskNode::new("sync", &model, Sync);
        let action = factories[0].create().unwrap();

        // No context handed over yet.
        assert!(matches!(
            action.execute(&task),
            Err(ActionError::MissingContext("Sync", "sync"))
        ));

        let context = ExecutionContext::new(ArtifactState::new(InputChanges {
            incremental: true,
            modified: vec!["src/lib.rs".into()],
        }));
        action.contextualize(Some(&context));
        action.execute(&task).unwrap();
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);

        // The context is consumed by the first run.
        assert!(matches!(
            action.execute(&task),
            Err(ActionError::MissingContext("Sync", "sync"))
        ));
    }

    #[test]
    fn name_resolved_dispatch_scopes_the_context_resolver_to_the_declaring_origin() {
        struct Scoped;
        impl WorkUnit for Scoped {}

        let resolver = crate::resolve::TypeResolver::new();
        let probe = Arc::new(Mutex::new(None));
        let seen = probe.clone();
        let model = TypeModel::of::<Scoped>("Scoped")
            .action("run", Visibility::Private, move |_: &Scoped| {
                *seen.lock().unwrap() = Some(crate::resolve::current_context());
                Ok(())
            })
            .build();
        resolver.register(&model);

        let (factories, _) = find_task_actions(&model).unwrap();
        let action = factories[0].create().unwrap();
        let task = TaskNode::new("scoped", &model, Scoped);
        run(&*action, &task).unwrap();

        let seen = probe.lock().unwrap().take().flatten().unwrap();
        assert!(Arc::ptr_eq(&seen, &resolver));
        // Restored after the call.
        assert!(crate::resolve::current_context().is_none());
    }

    #[test]
    fn direct_dispatch_leaves_the_context_resolver_alone() {
        struct Bound;
        impl WorkUnit for Bound {}

        let resolver = crate::resolve::TypeResolver::new();
        let probe = Arc::new(Mutex::new(None));
        let seen = probe.clone();
        let model = TypeModel::of::<Bound>("Bound")
            .action("run", Visibility::Public, move |_: &Bound| {
                *seen.lock().unwrap() = Some(crate::resolve::current_context());
                Ok(())
            })
            .build();
        resolver.register(&model);

        let (factories, _) = find_task_actions(&model).unwrap();
        let action = factories[0].create().unwrap();
        let task = TaskNode::new("bound", &model, Bound);
        run(&*action, &task).unwrap();

        // The body is bound at synthesis time; no resolver swap happens
        // around the call.
        assert!(probe.lock().unwrap().take().unwrap().is_none());
    }
}
