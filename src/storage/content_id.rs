use std::{fmt, str::FromStr};

use anyhow::{Context, Result};
use git2::Oid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Id of the tree every repository can describe without storing it.
pub const EMPTY_TREE_ID: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Content-derived identifier of a stored object.
///
/// Two entries with equal ids have byte-identical content, so every change
/// check in the walker compares these and never paths or timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Oid);

impl ContentId {
    /// Parse a 40 character hex id
    pub fn parse(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.len() != 40 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("Invalid ContentId format: {}", id);
        }
        let oid = Oid::from_str(id).with_context(|| format!("Invalid ContentId: {}", id))?;
        Ok(ContentId(oid))
    }

    pub fn empty_tree() -> Self {
        // The constant is valid hex, so this can only fail if it is edited.
        ContentId(Oid::from_str(EMPTY_TREE_ID).unwrap_or_else(|_| Oid::zero()))
    }

    pub fn is_empty_tree(&self) -> bool {
        *self == Self::empty_tree()
    }

    pub fn oid(&self) -> Oid {
        self.0
    }
}

impl From<Oid> for ContentId {
    fn from(oid: Oid) -> Self {
        ContentId(oid)
    }
}

impl FromStr for ContentId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        ContentId::parse(s)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ContentId::parse(&raw).map_err(serde::de::Error::custom)
    }
}
