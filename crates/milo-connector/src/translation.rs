//! Path translation between the two endpoints of a connector.
//!
//! A table maps ds1 paths to ds2 paths. Entries are exact (`.info.name` to
//! `.myInfo.myName`) or wildcard rules (`.info.*` to `.myInfo.*`); a rule
//! keeps whatever the wildcard captured below the prefix. Exact entries win
//! over rules, and rules are tried in insertion order.

use indexmap::IndexMap;
use milo_path::{format_access_path, parse_access_path, Path, PathPattern, PathStep};

use crate::ConnectorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRule {
    pub source: PathPattern,
    pub target: PathPattern,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTranslation {
    exact: IndexMap<Path, Path>,
    rules: Vec<TranslationRule>,
}

impl PathTranslation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(source, target)` access strings.
    ///
    /// # Example
    ///
    /// ```
    /// use milo_connector::PathTranslation;
    /// use milo_path::{format_access_path, parse_access_path};
    ///
    /// let table = PathTranslation::parse([
    ///     (".info.name", ".myInfo.myName"),
    ///     (".list.*", ".items.*"),
    /// ])
    /// .unwrap();
    /// let name = table.translate(&parse_access_path(".info.name").unwrap()).unwrap();
    /// assert_eq!(format_access_path(&name), ".myInfo.myName");
    /// let item = table.translate(&parse_access_path(".list[3]").unwrap()).unwrap();
    /// assert_eq!(format_access_path(&item), ".items[3]");
    /// assert!(table.translate(&parse_access_path(".other").unwrap()).is_none());
    ///
    /// assert!(PathTranslation::parse([(".a.*", ".b.**")]).is_err());
    /// ```
    pub fn parse<I, K, V>(entries: I) -> Result<Self, ConnectorError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut table = Self::new();
        for (source, target) in entries {
            let (source, target) = (source.as_ref(), target.as_ref());
            if PathPattern::is_pattern(source) || PathPattern::is_pattern(target) {
                table.insert_rule(PathPattern::parse(source)?, PathPattern::parse(target)?)?;
            } else {
                table.insert_exact(parse_access_path(source)?, parse_access_path(target)?);
            }
        }
        Ok(table)
    }

    pub fn insert_exact(&mut self, source: Path, target: Path) -> Option<Path> {
        self.exact.insert(source, target)
    }

    /// Add a wildcard rule. Both sides need the same wildcard depth.
    pub fn insert_rule(&mut self, source: PathPattern, target: PathPattern) -> Result<(), ConnectorError> {
        if !source.is_wildcard() || source.wildcard_depth() != target.wildcard_depth() {
            return Err(ConnectorError::AsymmetricWildcard {
                from: source.to_string(),
                to: target.to_string(),
            });
        }
        self.rules.push(TranslationRule { source, target });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.rules.is_empty()
    }

    pub fn rules(&self) -> &[TranslationRule] {
        &self.rules
    }

    pub fn translate(&self, path: &[PathStep]) -> Option<Path> {
        if let Some(target) = self.exact.get(path) {
            return Some(target.clone());
        }
        self.rules
            .iter()
            .find_map(|rule| rule.source.rebase(path, &rule.target))
    }

    /// The ds2 to ds1 table.
    ///
    /// # Errors
    ///
    /// `ConnectorError::AmbiguousTranslation` when two exact entries share a
    /// target, since the reverse lookup would have two answers.
    pub fn invert(&self) -> Result<Self, ConnectorError> {
        let mut exact = IndexMap::with_capacity(self.exact.len());
        for (source, target) in &self.exact {
            if exact.insert(target.clone(), source.clone()).is_some() {
                return Err(ConnectorError::AmbiguousTranslation(format_access_path(target)));
            }
        }
        let rules = self
            .rules
            .iter()
            .map(|rule| TranslationRule {
                source: rule.target.clone(),
                target: rule.source.clone(),
            })
            .collect();
        Ok(Self { exact, rules })
    }
}
