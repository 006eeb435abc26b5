//! Minimum-compatible-version gate.
//!
//! Each peer declares its own version and the minimum version it is
//! willing to talk to. A mismatch in either direction terminates the
//! session with a user-visible reason instead of a silent retry.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::TetherError;

/// The version this build of the protocol speaks.
pub const PROTOCOL_VERSION: Version = Version::new(1, 2, 0);

/// The oldest peer version this build accepts.
pub const MIN_COMPATIBLE_VERSION: Version = Version::new(1, 0, 0);

// ── Version ──────────────────────────────────────────────────────

/// Semantic protocol version, ordered `(major, minor, patch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = || -> Result<u32, TetherError> {
            parts
                .next()
                .ok_or(TetherError::ProtocolViolation("version needs 3 components"))?
                .parse()
                .map_err(|_| TetherError::Encoding(format!("invalid version: {s}")))
        };
        let version = Version::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(TetherError::ProtocolViolation("version needs 3 components"));
        }
        Ok(version)
    }
}

// ── VersionInfo ──────────────────────────────────────────────────

/// Wire payload of the version exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// The sender's own version.
    pub version: Version,
    /// The minimum peer version the sender accepts.
    pub min_required: Version,
}

impl VersionInfo {
    /// The exchange payload for this build.
    pub fn current() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            min_required: MIN_COMPATIBLE_VERSION,
        }
    }
}

/// Check compatibility in both directions.
///
/// Fails when the peer is older than our minimum, or when we are older
/// than the peer's minimum. The error reason names the version the
/// lagging side must upgrade to.
pub fn check_compatibility(local: VersionInfo, remote: VersionInfo) -> Result<(), TetherError> {
    if remote.version < local.min_required {
        return Err(TetherError::VersionIncompatible {
            required: local.min_required.to_string(),
            actual: remote.version.to_string(),
        });
    }
    if local.version < remote.min_required {
        return Err(TetherError::VersionIncompatible {
            required: remote.min_required.to_string(),
            actual: local.version.to_string(),
        });
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn info(version: Version, min_required: Version) -> VersionInfo {
        VersionInfo {
            version,
            min_required,
        }
    }

    #[test]
    fn version_ordering() {
        assert!(Version::new(1, 2, 0) > Version::new(1, 1, 9));
        assert!(Version::new(2, 0, 0) > Version::new(1, 9, 9));
        assert_eq!(Version::new(1, 0, 0), Version::new(1, 0, 0));
    }

    #[test]
    fn parse_and_display() {
        let v: Version = "1.2.3".parse().unwrap();
        assert_eq!(v, Version::new(1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
        assert!("1.2".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
        assert!("a.b.c".parse::<Version>().is_err());
    }

    #[test]
    fn compatible_peers_pass() {
        let local = info(Version::new(1, 2, 0), Version::new(1, 0, 0));
        let remote = info(Version::new(1, 1, 0), Version::new(1, 0, 0));
        assert!(check_compatibility(local, remote).is_ok());
    }

    #[test]
    fn peer_below_local_minimum_fails_naming_minimum() {
        let local = info(Version::new(1, 2, 0), Version::new(1, 2, 0));
        let remote = info(Version::new(1, 1, 0), Version::new(1, 0, 0));
        let err = check_compatibility(local, remote).unwrap_err();
        assert!(err.to_string().contains("1.2.0"));
    }

    #[test]
    fn local_below_peer_minimum_fails() {
        let local = info(Version::new(1, 1, 0), Version::new(1, 0, 0));
        let remote = info(Version::new(2, 0, 0), Version::new(2, 0, 0));
        let err = check_compatibility(local, remote).unwrap_err();
        assert!(matches!(err, TetherError::VersionIncompatible { .. }));
        assert!(err.to_string().contains("2.0.0"));
    }
}
