//! Test kind registry
//!
//! Maps a kind name to a factory producing the action of a leaf test.
//! The registry is built once at start-up and passed to whoever needs it.

mod builtin;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::{TestAction, TestSpec, TestUnit, COMPOSITE_KIND};

pub use builtin::{HttpAction, NoopAction, SleepAction};

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown test kind '{kind}' for test '{test}'")]
    UnknownKind { test: String, kind: String },

    #[error("Test '{test}': invalid property '{property}': {reason}")]
    InvalidProperty {
        test: String,
        property: String,
        reason: String,
    },

    #[error("Composite test '{0}' has no children")]
    EmptyComposite(String),

    #[error("Test '{0}' has children but is not a composite")]
    UnexpectedChildren(String),
}

/// Builds the action of one leaf test
pub type ActionFactory =
    Arc<dyn Fn(&TestSpec) -> Result<Arc<dyn TestAction>, RegistryError> + Send + Sync>;

/// Kind name to factory mapping
#[derive(Clone, Default)]
pub struct TestRegistry {
    factories: BTreeMap<String, (String, ActionFactory)>,
}

impl TestRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `http`, `sleep` and `noop` kinds
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("http", "HTTP request against the target", |spec| {
            Ok(Arc::new(HttpAction::from_spec(spec)?) as Arc<dyn TestAction>)
        });
        registry.register("sleep", "Waits for `millis` milliseconds", |spec| {
            Ok(Arc::new(SleepAction::from_spec(spec)?) as Arc<dyn TestAction>)
        });
        registry.register("noop", "Passes immediately", |_| {
            Ok(Arc::new(NoopAction) as Arc<dyn TestAction>)
        });
        registry
    }

    /// Register or replace a kind
    pub fn register<F>(&mut self, kind: impl Into<String>, description: impl Into<String>, factory: F)
    where
        F: Fn(&TestSpec) -> Result<Arc<dyn TestAction>, RegistryError> + Send + Sync + 'static,
    {
        self.factories
            .insert(kind.into(), (description.into(), Arc::new(factory)));
    }

    pub fn contains(&self, kind: &str) -> bool {
        kind == COMPOSITE_KIND || self.factories.contains_key(kind)
    }

    /// Registered kinds with their description, composite included
    pub fn kinds(&self) -> Vec<(String, String)> {
        let mut kinds: Vec<(String, String)> = self
            .factories
            .iter()
            .map(|(kind, (description, _))| (kind.clone(), description.clone()))
            .collect();
        kinds.push((
            COMPOSITE_KIND.to_string(),
            "Runs its children in order".to_string(),
        ));
        kinds
    }

    /// Build a unit from its spec, keeping the spec's identity when present
    pub fn build(&self, spec: &TestSpec) -> Result<TestUnit, RegistryError> {
        let unit = if spec.kind == COMPOSITE_KIND {
            if spec.children.is_empty() {
                return Err(RegistryError::EmptyComposite(spec.name.clone()));
            }
            let children = spec
                .children
                .iter()
                .map(|child| self.build(child))
                .collect::<Result<Vec<_>, _>>()?;
            TestUnit::composite(spec.name.clone(), children)
        } else {
            if !spec.children.is_empty() {
                return Err(RegistryError::UnexpectedChildren(spec.name.clone()));
            }
            let (_, factory) =
                self.factories
                    .get(&spec.kind)
                    .ok_or_else(|| RegistryError::UnknownKind {
                        test: spec.name.clone(),
                        kind: spec.kind.clone(),
                    })?;
            TestUnit::leaf(spec.name.clone(), spec.kind.clone(), factory(spec)?)
        };

        let unit = unit
            .with_weight(spec.weight)
            .with_count(spec.count)
            .with_timeout(spec.timeout_ms.map(Duration::from_millis))
            .with_properties(spec.properties.clone());

        Ok(match spec.id {
            Some(id) => unit.with_id(id),
            None => unit,
        })
    }
}

/// Read an optional property of a spec
pub(crate) fn property<T: serde::de::DeserializeOwned>(
    spec: &TestSpec,
    name: &str,
) -> Result<Option<T>, RegistryError> {
    spec.properties
        .get(name)
        .map(|value| {
            serde_json::from_value(value.clone()).map_err(|e| RegistryError::InvalidProperty {
                test: spec.name.clone(),
                property: name.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestId;

    #[test]
    fn test_builtins_registered() {
        let registry = TestRegistry::with_builtins();
        assert!(registry.contains("http"));
        assert!(registry.contains("sleep"));
        assert!(registry.contains("noop"));
        assert!(registry.contains("composite"));
        assert!(!registry.contains("grpc"));
        assert_eq!(registry.kinds().len(), 4);
    }

    #[test]
    fn test_build_keeps_identity_and_settings() {
        let registry = TestRegistry::with_builtins();
        let id = TestId::new();
        let mut spec = TestSpec::new("Ping", "noop").weight(4).count(9).timeout_ms(250);
        spec.id = Some(id);

        let unit = registry.build(&spec).unwrap();
        assert_eq!(unit.id(), id);
        assert_eq!(unit.weight(), 4);
        assert_eq!(unit.count(), Some(9));
        assert_eq!(unit.timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_build_composite() {
        let registry = TestRegistry::with_builtins();
        let spec = TestSpec::new("Journey", "composite")
            .child(TestSpec::new("Step1", "noop"))
            .child(TestSpec::new("Step2", "sleep").property("millis", 5));

        let unit = registry.build(&spec).unwrap();
        assert!(unit.is_composite());
        assert_eq!(unit.children().len(), 2);
        assert_eq!(unit.children()[1].parent(), Some(unit.id()));
    }

    #[test]
    fn test_build_errors() {
        let registry = TestRegistry::with_builtins();

        assert!(matches!(
            registry.build(&TestSpec::new("X", "grpc")),
            Err(RegistryError::UnknownKind { .. })
        ));
        assert_eq!(
            registry.build(&TestSpec::new("J", "composite")).err(),
            Some(RegistryError::EmptyComposite("J".to_string()))
        );
        assert!(matches!(
            registry.build(&TestSpec::new("S", "sleep").property("millis", "soon")),
            Err(RegistryError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_custom_kind() {
        let mut registry = TestRegistry::new();
        registry.register("custom", "test kind", |_| Ok(Arc::new(NoopAction) as Arc<dyn TestAction>));
        assert!(registry.build(&TestSpec::new("C", "custom")).is_ok());
    }
}
