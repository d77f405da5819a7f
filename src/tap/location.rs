//! Logical data locations.
//!
//! Example: "out/logs/" and "out/logs" name the same location.
//!
//! Stored as the normalised path string; ordering is derived so locations can
//! key BTreeMap/BTreeSet.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location(String);

impl Location {
    pub fn new(path: impl AsRef<str>) -> Self {
        let path = path.as_ref().trim();
        let trimmed = path.trim_end_matches('/');
        // Keep "/" itself addressable.
        if trimmed.is_empty() && path.starts_with('/') {
            return Self("/".to_string());
        }
        Self(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Location {
    fn from(s: &str) -> Self {
        Location::new(s)
    }
}

impl From<String> for Location {
    fn from(s: String) -> Self {
        Location::new(s)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_ignored() {
        assert_eq!(Location::new("out/logs/"), Location::new("out/logs"));
        assert_eq!(Location::new("/").as_str(), "/");
        assert_ne!(Location::new("out/logs"), Location::new("out/log"));
    }
}
