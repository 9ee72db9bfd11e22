#![forbid(unsafe_code)]

//! Identity keys for models and state partitions.

use std::fmt;
use std::rc::Rc;

/// Identity of a registered model.
///
/// An opaque string key, unique per router. Cheap to clone (`Rc<str>`
/// interior); not `Send`, like everything else in the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(Rc<str>);

impl ModelId {
    #[must_use]
    pub fn new(id: impl Into<Rc<str>>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Identity of a state partition within a model.
///
/// Binding groups declare the partition they operate on; a published event
/// may carry a partition scope that restricts delivery to matching groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey(Rc<str>);

impl PartitionKey {
    #[must_use]
    pub fn new(key: impl Into<Rc<str>>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for PartitionKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}
