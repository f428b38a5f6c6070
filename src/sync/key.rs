use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Name of a shared document, optionally carrying a schema version suffix.
///
/// Keys are written `"<domain>/<version>"` (e.g. `game-session/1`). Bumping the
/// version orphans the previous document: clients joining the new key start
/// from their initial value instead of migrating old state in place. A key
/// whose last segment is not numeric (e.g. `lobby/ABC-123`) is unversioned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreKey {
    domain: String,
    version: Option<u32>,
}

impl StoreKey {
    /// Build a versioned key.
    pub fn new(domain: impl Into<String>, version: u32) -> Self {
        Self {
            domain: domain.into(),
            version: Some(version),
        }
    }

    /// Build a key without a version suffix.
    pub fn unversioned(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            version: None,
        }
    }

    /// Parse a raw store name.
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('/') || raw.ends_with('/') {
            return Err(SyncError::InvalidKey(raw.to_string()));
        }

        match raw.rsplit_once('/') {
            Some((domain, suffix)) => match suffix.parse::<u32>() {
                Ok(version) => Ok(Self::new(domain, version)),
                Err(_) => Ok(Self::unversioned(raw)),
            },
            None => Ok(Self::unversioned(raw)),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// Key for the next schema version of the same domain.
    pub fn bumped(&self) -> Self {
        Self::new(self.domain.clone(), self.version.map_or(1, |v| v + 1))
    }

    /// File name used when a device-local document is persisted to disk.
    pub fn file_stem(&self) -> String {
        let domain = self.domain.replace('/', "__");
        match self.version {
            Some(version) => format!("{domain}__v{version}"),
            None => domain,
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => write!(f, "{}/{}", self.domain, version),
            None => f.write_str(&self.domain),
        }
    }
}

impl FromStr for StoreKey {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_versioned_keys() {
        let key = StoreKey::parse("game-session/1").unwrap();
        assert_eq!(key.domain(), "game-session");
        assert_eq!(key.version(), Some(1));
        assert_eq!(key.to_string(), "game-session/1");
    }

    #[test]
    fn non_numeric_suffix_is_part_of_the_domain() {
        let key = StoreKey::parse("lobby/ABC-123").unwrap();
        assert_eq!(key.domain(), "lobby/ABC-123");
        assert_eq!(key.version(), None);
        assert_eq!(key.to_string(), "lobby/ABC-123");
    }

    #[test]
    fn bumping_changes_identity() {
        let key = StoreKey::parse("players/1").unwrap();
        let next = key.bumped();
        assert_eq!(next.to_string(), "players/2");
        assert_ne!(key, next);
    }

    #[test]
    fn rejects_empty_and_dangling_separators() {
        assert!(StoreKey::parse("").is_err());
        assert!(StoreKey::parse("  ").is_err());
        assert!(StoreKey::parse("host/").is_err());
        assert!(StoreKey::parse("/1").is_err());
    }

    #[test]
    fn file_stem_is_flat() {
        assert_eq!(
            StoreKey::parse("local-player/1").unwrap().file_stem(),
            "local-player__v1"
        );
        assert_eq!(
            StoreKey::parse("lobby/ABC-123").unwrap().file_stem(),
            "lobby__ABC-123"
        );
    }
}
