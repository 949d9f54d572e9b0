//! Typed access paths for hierarchical JSON values.
//!
//! An access path addresses a value inside a `serde_json::Value` tree as an
//! ordered list of [`PathStep`]s. The textual form uses `.name` for object
//! keys, `[3]` for array indices, `["any key"]` for keys that are not plain
//! names and `[$1]` / `.$1` for parameters filled in by [`interpolate`].
//! The empty string is the root.
//!
//! # Example
//!
//! ```
//! use milo_path::{format_access_path, get, parse_access_path, set, PathStep};
//! use serde_json::json;
//!
//! let path = parse_access_path(".list[1].name").unwrap();
//! assert_eq!(
//!     path,
//!     vec![
//!         PathStep::Key("list".into()),
//!         PathStep::Index(1),
//!         PathStep::Key("name".into()),
//!     ]
//! );
//! assert_eq!(format_access_path(&path), ".list[1].name");
//!
//! // Writing materializes the missing containers.
//! let mut doc = None;
//! set(&mut doc, &path, json!("milo")).unwrap();
//! assert_eq!(doc, Some(json!({"list": [null, {"name": "milo"}]})));
//! assert_eq!(get(doc.as_ref(), &path), Some(&json!("milo")));
//! ```

use serde_json::Value;
use std::fmt;
use thiserror::Error;

mod access;
mod parse;
pub mod pattern;

pub use access::{get, get_mut, remove, set, splice, MAX_ARRAY_PADDING};
pub use parse::{format_access_path, parse_access_path};
pub use pattern::PathPattern;

/// One segment of an access path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathStep {
    /// Object property name.
    Key(String),
    /// Array index.
    Index(usize),
    /// Positional parameter (`$1` is `Param(1)`), resolved by [`interpolate`].
    Param(usize),
}

/// An access path.
pub type Path = Vec<PathStep>;

impl From<usize> for PathStep {
    fn from(index: usize) -> Self {
        PathStep::Index(index)
    }
}

impl From<&str> for PathStep {
    fn from(key: &str) -> Self {
        PathStep::Key(key.to_string())
    }
}

impl From<String> for PathStep {
    fn from(key: String) -> Self {
        PathStep::Key(key)
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_access_path(std::slice::from_ref(self)))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid access path {path:?} at byte {position}")]
    InvalidPath { path: String, position: usize },
    #[error("invalid path pattern {0:?}")]
    InvalidPattern(String),
    #[error("unresolved path parameter ${0}")]
    UnresolvedParam(usize),
    #[error("value at {0:?} is not a container")]
    NotContainer(String),
    #[error("value at {0:?} is not an array")]
    NotArray(String),
    #[error("index {index} at {path:?} is too far past the end of the array")]
    IndexTooFar { path: String, index: usize },
}

/// Check if `child` lies strictly below `parent`.
pub fn is_child(parent: &[PathStep], child: &[PathStep]) -> bool {
    parent.len() < child.len() && child.starts_with(parent)
}

/// Replace every [`PathStep::Param`] with the matching entry of `params`.
///
/// Parameters are numbered from one. A parameter must resolve to a key or an
/// index step.
///
/// # Example
///
/// ```
/// use milo_path::{format_access_path, interpolate, parse_access_path};
///
/// let template = parse_access_path(".list[$1].$2").unwrap();
/// let path = interpolate(&template, &[4.into(), "title".into()]).unwrap();
/// assert_eq!(format_access_path(&path), ".list[4].title");
/// ```
pub fn interpolate(path: &[PathStep], params: &[PathStep]) -> Result<Path, PathError> {
    path.iter()
        .map(|step| match step {
            PathStep::Param(n) => match n.checked_sub(1).and_then(|i| params.get(i)) {
                Some(PathStep::Param(_)) | None => Err(PathError::UnresolvedParam(*n)),
                Some(resolved) => Ok(resolved.clone()),
            },
            other => Ok(other.clone()),
        })
        .collect()
}

/// Returns the first unresolved parameter of `path`, if any.
pub(crate) fn ensure_resolved(path: &[PathStep]) -> Result<(), PathError> {
    match path.iter().find_map(|step| match step {
        PathStep::Param(n) => Some(*n),
        _ => None,
    }) {
        Some(n) => Err(PathError::UnresolvedParam(n)),
        None => Ok(()),
    }
}

/// Build an empty container suited to hold `step`.
pub(crate) fn empty_container(step: &PathStep) -> Value {
    match step {
        PathStep::Index(_) => Value::Array(Vec::new()),
        _ => Value::Object(serde_json::Map::new()),
    }
}
