//! Drawable identifiers.

use crate::shapes::DrawableKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a drawable, also used as its key in the shared map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrawableId(String);

impl DrawableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DrawableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DrawableId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DrawableId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for DrawableId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Produces ids of the form `{namespace}-{prefix}{n}`, or `{prefix}{n}` without a namespace.
///
/// One counter is shared by all kinds, so ids never repeat within a namespace.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    namespace: String,
    counter: u64,
}

impl IdGenerator {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            counter: 0,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn next(&mut self, kind: DrawableKind) -> DrawableId {
        self.counter += 1;
        if self.namespace.is_empty() {
            DrawableId(format!("{}{}", kind.prefix(), self.counter))
        } else {
            DrawableId(format!("{}-{}{}", self.namespace, kind.prefix(), self.counter))
        }
    }

    /// Advance past an id seen in the shared map, so later ids cannot collide with it.
    pub fn observe(&mut self, id: &DrawableId) {
        if let Some(n) = self.local_sequence(id.as_str()) {
            self.counter = self.counter.max(n);
        }
    }

    fn local_sequence(&self, id: &str) -> Option<u64> {
        let local = if self.namespace.is_empty() {
            id
        } else {
            id.strip_prefix(self.namespace.as_str())?.strip_prefix('-')?
        };
        let mut chars = local.chars();
        DrawableKind::from_prefix(chars.next()?)?;
        chars.as_str().parse().ok()
    }
}
