//! Test units
//!
//! A test unit is a named, weighted piece of work. Leaves carry a pluggable
//! action, composites run their children in order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::test_result::Verdict;
use crate::http::HttpClient;

/// Kind name used for composite units
pub const COMPOSITE_KIND: &str = "composite";

/// Opaque identity shared by every clone of the same logical test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(Uuid);

impl TestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a test action may use while executing
pub struct ExecutionContext {
    /// Base URL of the system under load
    pub target: String,
    /// Client shared by all workers of a run
    pub client: HttpClient,
}

impl ExecutionContext {
    pub fn new(target: impl Into<String>, client: HttpClient) -> Self {
        Self {
            target: target.into(),
            client,
        }
    }

    /// Resolve a path against the target base URL
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.target.trim_end_matches('/'), path)
        }
    }
}

/// Pluggable body of a leaf test
#[async_trait]
pub trait TestAction: Send + Sync {
    async fn before(&self, _ctx: &ExecutionContext) {}

    async fn execute(&self, ctx: &ExecutionContext) -> Verdict;

    async fn after(&self, _ctx: &ExecutionContext) {}
}

/// Leaf or composite body
#[derive(Clone)]
pub enum TestBody {
    Leaf(Arc<dyn TestAction>),
    Composite(Vec<TestUnit>),
}

/// A single schedulable test
#[derive(Clone)]
pub struct TestUnit {
    id: TestId,
    name: String,
    kind: String,
    weight: u32,
    count: Option<u64>,
    timeout: Option<Duration>,
    parent: Option<TestId>,
    properties: BTreeMap<String, serde_json::Value>,
    body: TestBody,
}

impl TestUnit {
    /// Create a leaf unit around an action
    pub fn leaf(name: impl Into<String>, kind: impl Into<String>, action: Arc<dyn TestAction>) -> Self {
        Self {
            id: TestId::new(),
            name: name.into(),
            kind: kind.into(),
            weight: 1,
            count: None,
            timeout: None,
            parent: None,
            properties: BTreeMap::new(),
            body: TestBody::Leaf(action),
        }
    }

    /// Create a composite unit; children get this unit as their parent
    pub fn composite(name: impl Into<String>, children: Vec<TestUnit>) -> Self {
        let id = TestId::new();
        let children = children
            .into_iter()
            .map(|child| child.with_parent(id))
            .collect();

        Self {
            id,
            name: name.into(),
            kind: COMPOSITE_KIND.to_string(),
            weight: 1,
            count: None,
            timeout: None,
            parent: None,
            properties: BTreeMap::new(),
            body: TestBody::Composite(children),
        }
    }

    /// Reuse an existing identity (units rebuilt from a wire spec)
    pub fn with_id(mut self, id: TestId) -> Self {
        self.id = id;
        let parent = self.id;
        if let TestBody::Composite(children) = &mut self.body {
            for child in children.iter_mut() {
                child.parent = Some(parent);
            }
        }
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_count(mut self, count: Option<u64>) -> Self {
        self.count = count;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, serde_json::Value>) -> Self {
        self.properties = properties;
        self
    }

    fn with_parent(mut self, parent: TestId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn id(&self) -> TestId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn count(&self) -> Option<u64> {
        self.count
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Effective timeout, falling back to the run-wide default
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }

    pub fn parent(&self) -> Option<TestId> {
        self.parent
    }

    pub fn properties(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.properties
    }

    pub fn body(&self) -> &TestBody {
        &self.body
    }

    pub fn children(&self) -> &[TestUnit] {
        match &self.body {
            TestBody::Leaf(_) => &[],
            TestBody::Composite(children) => children,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.body, TestBody::Composite(_))
    }

    /// Wire/config form of this unit
    pub fn to_spec(&self) -> TestSpec {
        TestSpec {
            id: Some(self.id),
            name: self.name.clone(),
            kind: self.kind.clone(),
            weight: self.weight,
            count: self.count,
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
            properties: self.properties.clone(),
            children: self.children().iter().map(TestUnit::to_spec).collect(),
        }
    }
}

impl PartialEq for TestUnit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TestUnit {}

impl Hash for TestUnit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("weight", &self.weight)
            .field("count", &self.count)
            .field("timeout", &self.timeout)
            .field("children", &self.children().len())
            .finish()
    }
}

impl fmt::Display for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

fn default_weight() -> u32 {
    1
}

/// Serializable description of a test, as found in configuration files
/// and in sub-phases shipped to agents
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestSpec {
    /// Stable identity; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TestId>,

    pub name: String,

    /// Registry key of the action
    pub kind: String,

    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Maximum number of executions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TestSpec>,
}

impl TestSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind: kind.into(),
            weight: 1,
            count: None,
            timeout_ms: None,
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn child(mut self, child: TestSpec) -> Self {
        self.children.push(child);
        self
    }
}
