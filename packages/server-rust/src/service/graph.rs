use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use super::error::OperationError;

/// Error raised while assembling a [`DependencyGraph`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("dependency {type_name} provided twice")]
    Duplicate { type_name: &'static str },
}

// ---------------------------------------------------------------------------
// DependencyGraph
// ---------------------------------------------------------------------------

/// Immutable, type-keyed set of shared capabilities handed to every operation.
///
/// Built once at startup by [`GraphBuilder`] and then shared read-only behind
/// an `Arc`. Lookups are by concrete type via `TypeId`.
pub struct DependencyGraph {
    by_type: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    names: HashMap<TypeId, &'static str>,
    layers: Vec<&'static str>,
}

impl DependencyGraph {
    #[must_use]
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// A graph with no dependencies.
    #[must_use]
    pub fn empty() -> Self {
        GraphBuilder::default().build()
    }

    /// Returns the shared instance of `T`.
    ///
    /// Repeated calls return the same `Arc`.
    ///
    /// # Errors
    ///
    /// Returns `OperationError::MissingDependency` if `T` was never provided.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, OperationError> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| Arc::clone(entry).downcast::<T>().ok())
            .ok_or(OperationError::MissingDependency {
                type_name: type_name::<T>(),
            })
    }

    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    /// Layer names in construction order.
    #[must_use]
    pub fn layers(&self) -> &[&'static str] {
        &self.layers
    }

    /// Type names of every provided dependency, sorted.
    #[must_use]
    pub fn provided(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.names.values().copied().collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("layers", &self.layers)
            .field("provided", &self.provided())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// GraphBuilder
// ---------------------------------------------------------------------------

/// Collects dependencies layer by layer before freezing them into a graph.
#[derive(Default)]
pub struct GraphBuilder {
    by_type: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    names: HashMap<TypeId, &'static str>,
    layers: Vec<&'static str>,
}

impl GraphBuilder {
    /// Marks the start of a named layer. Later layers may depend on earlier ones.
    pub fn layer(&mut self, name: &'static str) -> &mut Self {
        self.layers.push(name);
        self
    }

    /// Adds `value` as the graph's instance of `T`.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Duplicate` if `T` is already provided.
    pub fn provide<T: Send + Sync + 'static>(&mut self, value: T) -> Result<&mut Self, GraphError> {
        self.provide_arc(Arc::new(value))
    }

    /// Like [`provide`](Self::provide) for a value that is already shared.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Duplicate` if `T` is already provided.
    pub fn provide_arc<T: Send + Sync + 'static>(
        &mut self,
        value: Arc<T>,
    ) -> Result<&mut Self, GraphError> {
        let key = TypeId::of::<T>();
        if self.by_type.contains_key(&key) {
            return Err(GraphError::Duplicate {
                type_name: type_name::<T>(),
            });
        }
        self.by_type.insert(key, value);
        self.names.insert(key, type_name::<T>());
        Ok(self)
    }

    /// Looks up a dependency provided by an earlier layer.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| Arc::clone(entry).downcast::<T>().ok())
    }

    #[must_use]
    pub fn build(self) -> DependencyGraph {
        DependencyGraph {
            by_type: self.by_type,
            names: self.names,
            layers: self.layers,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
