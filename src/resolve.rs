//! Resolution of symbolic type names to registered type models.
//!
//! Mirrors a delegating loader: each resolver owns a registry of models, may
//! delegate to a parent resolver first, and memoizes both successful and
//! failed lookups. Successful entries hold the model weakly so an unloaded
//! model can be reclaimed; a stale entry falls through to a fresh lookup.
//! Negative entries are sticky, matching the source of truth for a name at
//! the time it was first asked for.
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use dashmap::DashMap;

use crate::error::ResolveError;
use crate::model::TypeModel;

enum Slot {
    Missing,
    Found(Weak<TypeModel>),
}

pub struct TypeResolver {
    parent: Option<Arc<TypeResolver>>,
    registered: RwLock<HashMap<String, Arc<TypeModel>>>,
    cache: DashMap<String, Slot>,
}

impl TypeResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            registered: RwLock::new(HashMap::new()),
            cache: DashMap::new(),
        })
    }

    /// A child resolver delegating to `parent` before its own registry.
    pub fn with_parent(parent: &Arc<TypeResolver>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(parent.clone()),
            registered: RwLock::new(HashMap::new()),
            cache: DashMap::new(),
        })
    }

    /// Registers a model under its display name and records this resolver as
    /// the model's origin, used by dispatchers to scope action execution.
    pub fn register(self: &Arc<Self>, model: &Arc<TypeModel>) {
        model.set_origin(Arc::downgrade(self));
        self.registered
            .write()
            .unwrap()
            .insert(model.name().to_string(), model.clone());
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<TypeModel>, ResolveError> {
        enum Hit {
            Missing,
            Found(Option<Arc<TypeModel>>),
        }

        let cached = self.cache.get(name).map(|slot| match &*slot {
            Slot::Missing => Hit::Missing,
            Slot::Found(weak) => Hit::Found(weak.upgrade()),
        });
        match cached {
            Some(Hit::Missing) => return Err(ResolveError::NotFound(name.to_string())),
            Some(Hit::Found(Some(model))) => return Ok(model),
            // A reclaimed weak entry falls through to a fresh lookup.
            _ => {}
        }

        match self.lookup(name) {
            Some(model) => {
                self.cache
                    .insert(name.to_string(), Slot::Found(Arc::downgrade(&model)));
                Ok(model)
            }
            None => {
                self.cache.insert(name.to_string(), Slot::Missing);
                Err(ResolveError::NotFound(name.to_string()))
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<Arc<TypeModel>> {
        if let Some(parent) = &self.parent {
            if let Ok(model) = parent.resolve(name) {
                return Some(model);
            }
        }
        self.registered.read().unwrap().get(name).cloned()
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<Arc<TypeResolver>>> = const { RefCell::new(None) };
}

/// The resolver currently scoping action execution on this thread, if any.
pub fn current_context() -> Option<Arc<TypeResolver>> {
    CONTEXT.with(|context| context.borrow().clone())
}

pub(crate) struct ContextGuard {
    previous: Option<Arc<TypeResolver>>,
}

/// Swaps the thread's context resolver, restoring the previous one when the
/// guard drops, whichever way the scope exits.
pub(crate) fn swap_context(next: Option<Arc<TypeResolver>>) -> ContextGuard {
    let previous = CONTEXT.with(|context| context.replace(next));
    ContextGuard { previous }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CONTEXT.with(|context| {
            *context.borrow_mut() = previous;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkUnit;

    struct Unit;
    impl WorkUnit for Unit {}

    struct Other;
    impl WorkUnit for Other {}

    #[test]
    fn resolves_registered_models() {
        let resolver = TypeResolver::new();
        let model = TypeModel::of::<Unit>("Unit").build();
        resolver.register(&model);

        let found = resolver.resolve("Unit").unwrap();
        assert!(Arc::ptr_eq(&found, &model));
        assert!(model.origin().is_some());
    }

    #[test]
    fn negative_results_are_cached() {
        let resolver = TypeResolver::new();
        assert!(resolver.resolve("Unit").is_err());

        // Registration after a failed lookup does not unstick the negative
        // cache entry.
        let model = TypeModel::of::<Unit>("Unit").build();
        resolver.register(&model);
        assert!(resolver.resolve("Unit").is_err());
    }

    #[test]
    fn delegates_to_parent_first() {
        let parent = TypeResolver::new();
        let child = TypeResolver::with_parent(&parent);

        let in_parent = TypeModel::of::<Unit>("Unit").build();
        parent.register(&in_parent);
        let shadowed = TypeModel::of::<Other>("Unit").build();
        child.register(&shadowed);

        let found = child.resolve("Unit").unwrap();
        assert!(Arc::ptr_eq(&found, &in_parent));
    }

    #[test]
    fn context_guard_restores_previous_resolver() {
        let outer = TypeResolver::new();
        let inner = TypeResolver::new();

        let _outer_guard = swap_context(Some(outer.clone()));
        {
            let _inner_guard = swap_context(Some(inner.clone()));
            assert!(Arc::ptr_eq(&current_context().unwrap(), &inner));
        }
        assert!(Arc::ptr_eq(&current_context().unwrap(), &outer));
    }
}
