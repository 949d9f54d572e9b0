//! Wildcard path patterns.
//!
//! A pattern is an access path followed by a suffix of `*` characters, for
//! example `.info.*`, `.info**` or `***`. The number of stars is the
//! wildcard depth: the pattern matches its prefix and every path that extends
//! the prefix by at most that many steps. Matching is done step by step on
//! typed paths, never on strings.

use std::fmt;
use std::str::FromStr;

use crate::{format_access_path, parse_access_path, Path, PathError, PathStep};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern {
    prefix: Path,
    depth: usize,
}

impl PathPattern {
    pub fn new(prefix: Path, depth: usize) -> Self {
        Self { prefix, depth }
    }

    /// Pattern for every path at most `depth` steps below the root.
    pub fn with_depth(depth: usize) -> Self {
        Self::new(Vec::new(), depth)
    }

    /// Parse a pattern string.
    ///
    /// # Example
    ///
    /// ```
    /// use milo_path::{parse_access_path, PathPattern};
    ///
    /// let pattern = PathPattern::parse(".info.*").unwrap();
    /// assert_eq!(pattern.wildcard_depth(), 1);
    /// assert!(pattern.matches(&parse_access_path(".info.name").unwrap()));
    /// assert!(pattern.matches(&parse_access_path(".info").unwrap()));
    /// assert!(!pattern.matches(&parse_access_path(".info.name.first").unwrap()));
    /// ```
    pub fn parse(pattern: &str) -> Result<Self, PathError> {
        let body = pattern.trim_end_matches('*');
        let depth = pattern.len() - body.len();
        let body = if depth > 0 {
            body.strip_suffix('.').unwrap_or(body)
        } else {
            body
        };
        let prefix =
            parse_access_path(body).map_err(|_| PathError::InvalidPattern(pattern.to_string()))?;
        Ok(Self { prefix, depth })
    }

    /// Returns true when `pattern` carries a wildcard suffix.
    pub fn is_pattern(pattern: &str) -> bool {
        pattern.ends_with('*')
    }

    pub fn prefix(&self) -> &[PathStep] {
        &self.prefix
    }

    pub fn wildcard_depth(&self) -> usize {
        self.depth
    }

    pub fn is_wildcard(&self) -> bool {
        self.depth > 0
    }

    pub fn matches(&self, path: &[PathStep]) -> bool {
        path.starts_with(&self.prefix) && path.len() - self.prefix.len() <= self.depth
    }

    /// Move a matching `path` from this pattern's prefix onto `target`'s prefix,
    /// keeping the part captured by the wildcard.
    ///
    /// # Example
    ///
    /// ```
    /// use milo_path::{format_access_path, parse_access_path, PathPattern};
    ///
    /// let from = PathPattern::parse(".info.*").unwrap();
    /// let to = PathPattern::parse(".myInfo.*").unwrap();
    /// let path = parse_access_path(".info.name").unwrap();
    /// let moved = from.rebase(&path, &to).unwrap();
    /// assert_eq!(format_access_path(&moved), ".myInfo.name");
    /// ```
    pub fn rebase(&self, path: &[PathStep], target: &PathPattern) -> Option<Path> {
        if !self.matches(path) {
            return None;
        }
        let mut out = target.prefix.clone();
        out.extend_from_slice(&path[self.prefix.len()..]);
        Some(out)
    }
}

impl FromStr for PathPattern {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = format_access_path(&self.prefix);
        f.write_str(&prefix)?;
        if self.depth > 0 && !prefix.is_empty() {
            f.write_str(".")?;
        }
        f.write_str(&"*".repeat(self.depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        parse_access_path(s).unwrap()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(PathPattern::parse("***").unwrap(), PathPattern::with_depth(3));
        assert_eq!(
            PathPattern::parse(".info**").unwrap(),
            PathPattern::new(p(".info"), 2)
        );
        assert_eq!(
            PathPattern::parse(".list[0].*").unwrap(),
            PathPattern::new(p(".list[0]"), 1)
        );
        assert_eq!(PathPattern::parse(".info").unwrap(), PathPattern::new(p(".info"), 0));
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(
            PathPattern::parse(".a*.b*"),
            Err(PathError::InvalidPattern(".a*.b*".to_string()))
        );
        assert!(PathPattern::parse("info.*").is_err());
    }

    #[test]
    fn test_depth_matching() {
        let pattern = PathPattern::with_depth(2);
        assert!(pattern.matches(&[]));
        assert!(pattern.matches(&p(".a")));
        assert!(pattern.matches(&p(".a[1]")));
        assert!(!pattern.matches(&p(".a[1].b")));
    }

    #[test]
    fn test_prefix_is_segment_wise() {
        let pattern = PathPattern::parse(".info.*").unwrap();
        assert!(!pattern.matches(&p(".information")));
        assert!(!pattern.matches(&p(".other.name")));
        assert!(!pattern.matches(&[]));
    }

    #[test]
    fn test_rebase_outside_pattern() {
        let from = PathPattern::parse(".a.*").unwrap();
        let to = PathPattern::parse(".b.*").unwrap();
        assert_eq!(from.rebase(&p(".c.d"), &to), None);
        assert_eq!(from.rebase(&p(".a"), &to), Some(p(".b")));
    }

    #[test]
    fn test_display() {
        assert_eq!(PathPattern::parse(".info.*").unwrap().to_string(), ".info.*");
        assert_eq!(PathPattern::parse(".info**").unwrap().to_string(), ".info.**");
        assert_eq!(PathPattern::with_depth(3).to_string(), "***");
        assert_eq!(PathPattern::parse("[2]").unwrap().to_string(), "[2]");
    }
}
