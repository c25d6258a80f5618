//! Common types used throughout StudioSync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A backend-relative object path.
///
/// Paths are slash-separated and carry no leading or trailing slash once
/// normalized. The empty path addresses the backend root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoragePath {
    components: Vec<String>,
}

impl StoragePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty, a dot segment, or contains
    ///   a separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            validate_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a path string, stripping leading and trailing slashes.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let path = path.trim_start_matches('/').trim_end_matches('/');
        if path.is_empty() {
            return Ok(Self::root());
        }

        let components: Vec<String> = path.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the file/directory name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a single child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        validate_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The normalized slash-joined form, empty for the root.
    pub fn to_key(&self) -> String {
        self.components.join("/")
    }

    /// Whether `self` equals `ancestor` or lies beneath it.
    pub fn is_within(&self, ancestor: &StoragePath) -> bool {
        self.components.starts_with(&ancestor.components)
    }
}

fn validate_component(comp: &str) -> crate::Result<()> {
    if comp.is_empty() {
        return Err(crate::Error::InvalidInput(
            "Path component cannot be empty".to_string(),
        ));
    }
    if comp == "." || comp == ".." {
        return Err(crate::Error::InvalidInput(format!(
            "Path component cannot be '{}'",
            comp
        )));
    }
    if comp.contains('/') || comp.contains('\\') {
        return Err(crate::Error::InvalidInput(
            "Path component cannot contain separators".to_string(),
        ));
    }
    Ok(())
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

impl FromStr for StoragePath {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StoragePath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<StoragePath> for String {
    fn from(path: StoragePath) -> Self {
        path.to_key()
    }
}

/// Logical content category used to route paths to cloud backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageScope {
    Projects,
    Samples,
    Soundfonts,
    /// Matches every path; the catch-all for backends and routing.
    All,
}

impl StorageScope {
    pub const VARIANTS: [StorageScope; 4] = [
        StorageScope::Projects,
        StorageScope::Samples,
        StorageScope::Soundfonts,
        StorageScope::All,
    ];

    /// Fixed path prefix of the scope's content. Empty for [`StorageScope::All`].
    pub fn prefix(&self) -> &'static str {
        match self {
            StorageScope::Projects => "projects/v1",
            StorageScope::Samples => "samples/v2",
            StorageScope::Soundfonts => "soundfont",
            StorageScope::All => "",
        }
    }

    /// The prefix as a path.
    pub fn base_path(&self) -> StoragePath {
        let prefix = self.prefix();
        if prefix.is_empty() {
            return StoragePath::root();
        }
        StoragePath {
            components: prefix.split('/').map(String::from).collect(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageScope::Projects => "projects",
            StorageScope::Samples => "samples",
            StorageScope::Soundfonts => "soundfonts",
            StorageScope::All => "all",
        }
    }
}

impl fmt::Display for StorageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageScope {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::VARIANTS
            .into_iter()
            .find(|scope| scope.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown storage scope: {}", s)))
    }
}
