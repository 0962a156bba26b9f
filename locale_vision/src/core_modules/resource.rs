// THEORY:
// A `ResourceLocator` is the only input the pipeline takes from the outside world
// besides an extraction schema. It is deliberately opaque: the engine never
// parses or normalizes it, it just hands it to the retrieval strategies. Keeping
// it a newtype (rather than a bare `String`) stops locators from being confused
// with transcribed text or field values as they flow through the stages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque, caller-supplied reference (normally a URL) to a remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceLocator(String);

impl ResourceLocator {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceLocator {
    fn from(locator: &str) -> Self {
        Self::new(locator)
    }
}

impl From<String> for ResourceLocator {
    fn from(locator: String) -> Self {
        Self(locator)
    }
}

impl AsRef<str> for ResourceLocator {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
