//! Semantic version strings

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static SEMVER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:-([0-9A-Za-z.-]+))?(?:\+([0-9A-Za-z.-]+))?$").expect("valid regex"));

/// A parsed `major.minor.patch[-pre][+build]` version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemVer {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub pre_release: Option<String>,
    pub build: Option<String>,
}

impl SemVer {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
            build: None,
        }
    }
}

/// Displays only `major.minor.patch`
impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Error for strings that are not semantic versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemVerParseError(pub String);

impl fmt::Display for SemVerParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid semantic version: {}", self.0)
    }
}

impl std::error::Error for SemVerParseError {}

impl FromStr for SemVer {
    type Err = SemVerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = SEMVER_PATTERN.captures(s.trim()).ok_or_else(|| SemVerParseError(s.to_string()))?;
        let number = |i: usize| caps[i].parse::<u32>().map_err(|_| SemVerParseError(s.to_string()));
        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            pre_release: caps.get(4).map(|m| m.as_str().to_string()),
            build: caps.get(5).map(|m| m.as_str().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_semver() {
        let version: SemVer = " 1.2.3-beta.1+build.5 ".parse().unwrap();
        assert_eq!((version.major, version.minor, version.patch), (1, 2, 3));
        assert_eq!(version.pre_release.as_deref(), Some("beta.1"));
        assert_eq!(version.build.as_deref(), Some("build.5"));
        assert_eq!(version.to_string(), "1.2.3");

        assert!("1.2".parse::<SemVer>().is_err());
        assert!("v1.2.3".parse::<SemVer>().is_err());
        assert!("99999999999.0.0".parse::<SemVer>().is_err());
    }
}
