//! Safe reads and materializing writes through access paths.
//!
//! The root is an `Option<Value>`: `None` stands for a value that was never
//! set, which is different from an explicit `null`.

use serde_json::Value;

use crate::{empty_container, ensure_resolved, format_access_path, PathError, PathStep};

/// How many `null`s a write may add in front of the new element when it
/// indexes past the end of an array.
pub const MAX_ARRAY_PADDING: usize = 1 << 16;

fn pad_array(arr: &mut Vec<Value>, index: usize, at: &[PathStep]) -> Result<(), PathError> {
    if index - arr.len() > MAX_ARRAY_PADDING {
        return Err(PathError::IndexTooFar {
            path: format_access_path(at),
            index,
        });
    }
    arr.resize(index, Value::Null);
    Ok(())
}

/// Get a value by path. Missing branches yield `None`, never an error.
///
/// # Example
///
/// ```
/// use milo_path::{get, parse_access_path};
/// use serde_json::json;
///
/// let doc = json!({"a": {"b": [1, 2, 3]}});
/// let path = parse_access_path(".a.b[1]").unwrap();
/// assert_eq!(get(Some(&doc), &path), Some(&json!(2)));
///
/// let missing = parse_access_path(".a.x.y").unwrap();
/// assert_eq!(get(Some(&doc), &missing), None);
/// ```
pub fn get<'a>(root: Option<&'a Value>, path: &[PathStep]) -> Option<&'a Value> {
    let mut cur = root?;
    for step in path {
        cur = match (step, cur) {
            (PathStep::Key(key), Value::Object(map)) => map.get(key)?,
            (PathStep::Index(idx), Value::Array(arr)) => arr.get(*idx)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Get a mutable reference to a value by path.
pub fn get_mut<'a>(root: &'a mut Value, path: &[PathStep]) -> Option<&'a mut Value> {
    let mut cur = root;
    for step in path {
        cur = match (step, cur) {
            (PathStep::Key(key), Value::Object(map)) => map.get_mut(key)?,
            (PathStep::Index(idx), Value::Array(arr)) => arr.get_mut(*idx)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Set a value by path, creating missing containers on the way.
///
/// A missing (or `null`) intermediate becomes an object when the next step is
/// a key and an array when it is an index; arrays are padded with `null`, by
/// at most [`MAX_ARRAY_PADDING`] elements.
/// Returns the previous value at `path`.
///
/// # Errors
///
/// - `PathError::UnresolvedParam` if the path still contains parameters
/// - `PathError::NotContainer` if a step runs into a scalar, or a key step
///   into an array (and vice versa)
/// - `PathError::IndexTooFar` if an index needs more padding than
///   [`MAX_ARRAY_PADDING`]
pub fn set(root: &mut Option<Value>, path: &[PathStep], value: Value) -> Result<Option<Value>, PathError> {
    ensure_resolved(path)?;
    let Some((leaf, parent)) = path.split_last() else {
        return Ok(root.replace(value));
    };
    let container = materialize(root, parent, leaf)?;
    match (container, leaf) {
        (Value::Object(map), PathStep::Key(key)) => Ok(map.insert(key.clone(), value)),
        (Value::Array(arr), PathStep::Index(idx)) => {
            if *idx < arr.len() {
                Ok(Some(std::mem::replace(&mut arr[*idx], value)))
            } else {
                pad_array(arr, *idx, parent)?;
                arr.push(value);
                Ok(None)
            }
        }
        _ => Err(PathError::NotContainer(format_access_path(parent))),
    }
}

/// Remove the value at `path`. Array elements are removed, shifting the
/// following ones. Removing something that does not exist is not an error.
pub fn remove(root: &mut Option<Value>, path: &[PathStep]) -> Result<Option<Value>, PathError> {
    ensure_resolved(path)?;
    let Some((leaf, parent)) = path.split_last() else {
        return Ok(root.take());
    };
    let Some(container) = root.as_mut().and_then(|r| get_mut(r, parent)) else {
        return Ok(None);
    };
    Ok(match (container, leaf) {
        (Value::Object(map), PathStep::Key(key)) => map.remove(key),
        (Value::Array(arr), PathStep::Index(idx)) if *idx < arr.len() => Some(arr.remove(*idx)),
        _ => None,
    })
}

/// Splice the array at `path`: remove `remove_count` elements starting at
/// `index` and insert `items` there. A missing array is created first.
///
/// Returns the effective (clamped) start index and the removed elements.
pub fn splice(
    root: &mut Option<Value>,
    path: &[PathStep],
    index: usize,
    remove_count: usize,
    items: Vec<Value>,
) -> Result<(usize, Vec<Value>), PathError> {
    ensure_resolved(path)?;
    if get(root.as_ref(), path).is_none() {
        set(root, path, Value::Array(Vec::new()))?;
    }
    match root.as_mut().and_then(|r| get_mut(r, path)) {
        Some(Value::Array(arr)) => {
            let start = index.min(arr.len());
            let end = start.saturating_add(remove_count).min(arr.len());
            let removed = arr.splice(start..end, items).collect();
            Ok((start, removed))
        }
        _ => Err(PathError::NotArray(format_access_path(path))),
    }
}

fn materialize<'a>(
    root: &'a mut Option<Value>,
    parent: &[PathStep],
    leaf: &PathStep,
) -> Result<&'a mut Value, PathError> {
    let first = parent.first().unwrap_or(leaf);
    let mut cur = root.get_or_insert_with(|| empty_container(first));
    if cur.is_null() {
        *cur = empty_container(first);
    }
    for (i, step) in parent.iter().enumerate() {
        let next = parent.get(i + 1).unwrap_or(leaf);
        cur = child_or_insert(cur, &parent[..i], step, next)?;
    }
    Ok(cur)
}

fn child_or_insert<'a>(
    cur: &'a mut Value,
    at: &[PathStep],
    step: &PathStep,
    next: &PathStep,
) -> Result<&'a mut Value, PathError> {
    let slot = match (cur, step) {
        (Value::Object(map), PathStep::Key(key)) => map.entry(key.clone()).or_insert(Value::Null),
        (Value::Array(arr), PathStep::Index(idx)) => {
            if *idx >= arr.len() {
                pad_array(arr, *idx, at)?;
                arr.push(Value::Null);
            }
            &mut arr[*idx]
        }
        _ => return Err(PathError::NotContainer(format_access_path(at))),
    };
    if slot.is_null() {
        *slot = empty_container(next);
    }
    Ok(slot)
}
