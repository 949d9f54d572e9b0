use indexmap::IndexMap;
use milo_path::{parse_access_path, Path};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::rc::Rc;

use crate::mode::Direction;
use crate::translation::PathTranslation;
use crate::ConnectorError;

/// Maps a value on its way to the other endpoint. Applied to both the old
/// and the new value of a change.
pub type DataTranslator = Rc<dyn Fn(Option<&Value>) -> Option<Value>>;

/// Receives the outcome of one validator. May be called later.
pub type ValidationCallback = Box<dyn FnOnce(ValidationResult)>;

/// Checks the new value of a change.
pub type Validator = Rc<dyn Fn(Option<&Value>, ValidationCallback)>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub details: Map<String, Value>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            details: Map::new(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        let mut details = Map::new();
        details.insert("reason".to_string(), Value::String(reason.into()));
        Self { valid: false, details }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Translation and validation tables of a connector.
///
/// Data translators and validators are registered per direction and keyed by
/// the path of the change on its source endpoint.
///
/// # Example
///
/// ```
/// use milo_connector::{ConnectorOptions, Direction, PathTranslation, ValidationResult};
/// use serde_json::Value;
///
/// let options = ConnectorOptions::new()
///     .path_translation(PathTranslation::parse([(".info.name", ".myInfo.myName")]).unwrap())
///     .translate_data(Direction::Forward, ".info.name", |v| {
///         v.and_then(Value::as_str).map(|s| Value::String(s.to_uppercase()))
///     })
///     .unwrap()
///     .validate(Direction::Forward, ".info.name", |v, done| {
///         done(match v {
///             Some(Value::String(_)) => ValidationResult::valid(),
///             _ => ValidationResult::invalid("name must be a string"),
///         })
///     })
///     .unwrap();
/// assert!(options.translation().is_some());
/// ```
#[derive(Clone, Default)]
pub struct ConnectorOptions {
    path_translation: Option<PathTranslation>,
    data_translation: [IndexMap<Path, DataTranslator>; 2],
    data_validation: [IndexMap<Path, Vec<Validator>>; 2],
}

impl ConnectorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// ds1 to ds2 path table; the ds2 to ds1 table is its inverse.
    pub fn path_translation(mut self, table: PathTranslation) -> Self {
        self.path_translation = Some(table);
        self
    }

    pub fn translate_data<F>(mut self, direction: Direction, access: &str, translator: F) -> Result<Self, ConnectorError>
    where
        F: Fn(Option<&Value>) -> Option<Value> + 'static,
    {
        let path = parse_access_path(access)?;
        self.data_translation[direction.index()].insert(path, Rc::new(translator));
        Ok(self)
    }

    pub fn validate<F>(mut self, direction: Direction, access: &str, validator: F) -> Result<Self, ConnectorError>
    where
        F: Fn(Option<&Value>, ValidationCallback) + 'static,
    {
        let path = parse_access_path(access)?;
        self.data_validation[direction.index()]
            .entry(path)
            .or_default()
            .push(Rc::new(validator));
        Ok(self)
    }

    pub fn translation(&self) -> Option<&PathTranslation> {
        self.path_translation.as_ref()
    }

    pub(crate) fn into_tables(self) -> Result<Tables, ConnectorError> {
        let backward = self.path_translation.as_ref().map(PathTranslation::invert).transpose()?;
        Ok(Tables {
            path_translation: [self.path_translation, backward],
            data_translation: self.data_translation,
            data_validation: self.data_validation,
        })
    }
}

impl fmt::Debug for ConnectorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorOptions")
            .field("path_translation", &self.path_translation)
            .field("data_translation", &self.data_translation.iter().map(IndexMap::len).collect::<Vec<_>>())
            .field("data_validation", &self.data_validation.iter().map(IndexMap::len).collect::<Vec<_>>())
            .finish()
    }
}

/// Per-direction tables, indexed by [`Direction::index`].
pub(crate) struct Tables {
    pub(crate) path_translation: [Option<PathTranslation>; 2],
    pub(crate) data_translation: [IndexMap<Path, DataTranslator>; 2],
    pub(crate) data_validation: [IndexMap<Path, Vec<Validator>>; 2],
}

/// The serializable part of a connector's setup.
///
/// ```
/// use milo_connector::ConnectorConfig;
///
/// let config: ConnectorConfig = serde_json::from_str(
///     r#"{"mode": "<<->>", "pathTranslation": {".info.*": ".myInfo.*"}}"#,
/// )
/// .unwrap();
/// assert_eq!(config.mode, "<<->>");
/// assert!(config.options().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub mode: String,
    #[serde(default, alias = "pathTranslation", skip_serializing_if = "Option::is_none")]
    pub path_translation: Option<IndexMap<String, String>>,
}

impl ConnectorConfig {
    pub fn options(&self) -> Result<ConnectorOptions, ConnectorError> {
        let mut options = ConnectorOptions::new();
        if let Some(entries) = &self.path_translation {
            options = options.path_translation(PathTranslation::parse(entries)?);
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use milo_path::parse_access_path;

    #[test]
    fn test_reverse_table_is_derived() {
        let tables = ConnectorOptions::new()
            .path_translation(PathTranslation::parse([(".a", ".b")]).unwrap())
            .into_tables()
            .unwrap();
        let back = tables.path_translation[Direction::Backward.index()].as_ref().unwrap();
        assert_eq!(
            back.translate(&parse_access_path(".b").unwrap()),
            Some(parse_access_path(".a").unwrap())
        );
    }

    #[test]
    fn test_validators_accumulate() {
        let options = ConnectorOptions::new()
            .validate(Direction::Backward, ".x", |_, done| done(ValidationResult::valid()))
            .unwrap()
            .validate(Direction::Backward, ".x", |_, done| done(ValidationResult::valid()))
            .unwrap();
        let tables = options.into_tables().unwrap();
        let path = parse_access_path(".x").unwrap();
        assert_eq!(tables.data_validation[Direction::Backward.index()][&path].len(), 2);
        assert!(tables.data_validation[Direction::Forward.index()].is_empty());
    }

    #[test]
    fn test_bad_access_path() {
        assert!(ConnectorOptions::new()
            .translate_data(Direction::Forward, "no-dot", |v| v.cloned())
            .is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config: ConnectorConfig = toml::from_str(
            r#"
            mode = "<->"

            [path_translation]
            ".info.name" = ".myInfo.myName"
            ".list.*" = ".items.*"
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, "<->");
        let options = config.options().unwrap();
        let table = options.translation().unwrap();
        assert_eq!(table.rules().len(), 1);
    }

    #[test]
    fn test_config_rejects_asymmetric_rule() {
        let config: ConnectorConfig =
            serde_json::from_str(r#"{"mode": "->", "path_translation": {".a.*": ".b"}}"#).unwrap();
        assert!(matches!(config.options(), Err(ConnectorError::AsymmetricWildcard { .. })));
    }

    #[test]
    fn test_invalid_result_details() {
        let result = ValidationResult::invalid("too long").with_detail("max", Value::from(3));
        assert!(!result.valid);
        assert_eq!(result.details["reason"], Value::from("too long"));
        assert_eq!(result.details["max"], Value::from(3));
    }
}
