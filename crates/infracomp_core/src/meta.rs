//! Component metadata: name, tags, protection and the active toggle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CompError, CompResult};

fn default_active() -> bool {
    true
}

/// Decoration carried by every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Unique component name, also the resource label
    pub name: String,
    /// Tags applied to the underlying resource
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Prevent accidental deletion of the underlying resource
    #[serde(default)]
    pub protect: bool,
    /// Inactive components never run their construction logic
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            name: String::new(),
            tags: BTreeMap::new(),
            protect: false,
            active: true,
        }
    }
}

impl Meta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = (String, String)>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn protected(mut self) -> Self {
        self.protect = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Resolve the full component name.
    ///
    /// An empty name is a configuration error.
    pub fn full_name(&self) -> CompResult<String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(CompError::EmptyName);
        }
        Ok(name.to_string())
    }

    /// Derive the meta of a sub-resource named `"{name}-{suffix}"`.
    ///
    /// Tags and protection carry over; the child is always active.
    pub fn child(&self, suffix: &str) -> Meta {
        Meta {
            name: format!("{}-{}", self.name, suffix),
            tags: self.tags.clone(),
            protect: self.protect,
            active: true,
        }
    }

    /// Overlay this component's tags on deployment-wide defaults.
    pub fn merged_tags(&self, defaults: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut tags = defaults.clone();
        tags.extend(self.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        tags
    }
}

impl From<&str> for Meta {
    fn from(name: &str) -> Self {
        Meta::new(name)
    }
}

impl From<String> for Meta {
    fn from(name: String) -> Self {
        Meta::new(name)
    }
}
