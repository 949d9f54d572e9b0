use milo_path::{Path, PathStep};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// Groups batches that belong to one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

static NEXT_TRANSACTION: AtomicU64 = AtomicU64::new(1);

impl TransactionId {
    /// A fresh id, unique within the process.
    pub fn next() -> Self {
        TransactionId(NEXT_TRANSACTION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    Changed,
    Added,
    Deleted,
    /// `removed` holds the elements taken out at `index`; the `added_count`
    /// inserted elements start at `index` of the new array.
    Splice {
        index: usize,
        removed: Vec<Value>,
        added_count: usize,
    },
}

/// One change record. For splices, `old_value` and `new_value` are the whole
/// array before and after.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub path: Path,
    pub kind: ChangeKind,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

impl Change {
    pub fn changed(path: Path, old_value: Value, new_value: Value) -> Self {
        Self {
            path,
            kind: ChangeKind::Changed,
            old_value: Some(old_value),
            new_value: Some(new_value),
        }
    }

    pub fn added(path: Path, new_value: Value) -> Self {
        Self {
            path,
            kind: ChangeKind::Added,
            old_value: None,
            new_value: Some(new_value),
        }
    }

    pub fn deleted(path: Path, old_value: Value) -> Self {
        Self {
            path,
            kind: ChangeKind::Deleted,
            old_value: Some(old_value),
            new_value: None,
        }
    }

    /// The elements a splice inserted.
    pub fn spliced_items(&self) -> Option<&[Value]> {
        let ChangeKind::Splice { index, added_count, .. } = &self.kind else {
            return None;
        };
        let items = self.new_value.as_ref()?.as_array()?;
        items.get(*index..index.checked_add(*added_count)?)
    }
}

/// An ordered group of changes emitted by one mutation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeBatch {
    pub changes: Vec<Change>,
    pub transaction: Option<TransactionId>,
}

impl ChangeBatch {
    pub fn new(changes: Vec<Change>, transaction: Option<TransactionId>) -> Self {
        Self { changes, transaction }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Diff `old` against `new` at `path`.
///
/// Descends while both sides are objects, or arrays of the same length. A
/// change is reported at the shallowest path whose value differs; keys only
/// in `new` are added, keys only in `old` are deleted.
pub fn compute_changes(path: &[PathStep], old: Option<&Value>, new: Option<&Value>) -> Vec<Change> {
    let mut out = Vec::new();
    diff_into(&mut path.to_vec(), old, new, &mut out);
    out
}

fn diff_into(path: &mut Path, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<Change>) {
    match (old, new) {
        (None, None) => {}
        (None, Some(new)) => out.push(Change::added(path.clone(), new.clone())),
        (Some(old), None) => out.push(Change::deleted(path.clone(), old.clone())),
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            for (key, value) in b {
                path.push(PathStep::Key(key.clone()));
                diff_into(path, a.get(key), Some(value), out);
                path.pop();
            }
            for (key, value) in a {
                if !b.contains_key(key) {
                    path.push(PathStep::Key(key.clone()));
                    out.push(Change::deleted(path.clone(), value.clone()));
                    path.pop();
                }
            }
        }
        (Some(Value::Array(a)), Some(Value::Array(b))) if a.len() == b.len() => {
            for (i, (x, y)) in a.iter().zip(b).enumerate() {
                path.push(PathStep::Index(i));
                diff_into(path, Some(x), Some(y), out);
                path.pop();
            }
        }
        (Some(old), Some(new)) if old == new => {}
        (Some(old), Some(new)) => out.push(Change::changed(path.clone(), old.clone(), new.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use milo_path::parse_access_path;
    use serde_json::json;

    fn p(s: &str) -> Path {
        parse_access_path(s).unwrap()
    }

    #[test]
    fn test_equal_values_produce_nothing() {
        let v = json!({"a": [1, {"b": 2}]});
        assert!(compute_changes(&[], Some(&v), Some(&v.clone())).is_empty());
        assert!(compute_changes(&[], None, None).is_empty());
    }

    #[test]
    fn test_deep_replace_reports_leaves() {
        let old = json!({"info": {"name": "x", "age": 3, "gone": true}});
        let new = json!({"info": {"name": "y", "age": 3, "city": "z"}});
        let changes = compute_changes(&[], Some(&old), Some(&new));
        assert_eq!(
            changes,
            vec![
                Change::changed(p(".info.name"), json!("x"), json!("y")),
                Change::added(p(".info.city"), json!("z")),
                Change::deleted(p(".info.gone"), json!(true)),
            ]
        );
    }

    #[test]
    fn test_kind_change_reported_at_parent() {
        let changes = compute_changes(&p(".a"), Some(&json!({"b": 1})), Some(&json!([1])));
        assert_eq!(changes, vec![Change::changed(p(".a"), json!({"b": 1}), json!([1]))]);
    }

    #[test]
    fn test_arrays_of_different_length() {
        let changes = compute_changes(&p(".l"), Some(&json!([1, 2])), Some(&json!([1, 2, 3])));
        assert_eq!(changes, vec![Change::changed(p(".l"), json!([1, 2]), json!([1, 2, 3]))]);

        let changes = compute_changes(&p(".l"), Some(&json!([1, 2])), Some(&json!([1, 5])));
        assert_eq!(changes, vec![Change::changed(p(".l[1]"), json!(2), json!(5))]);
    }

    #[test]
    fn test_spliced_items() {
        let change = Change {
            path: p(".l"),
            kind: ChangeKind::Splice {
                index: 1,
                removed: vec![json!(2)],
                added_count: 2,
            },
            old_value: Some(json!([1, 2, 3])),
            new_value: Some(json!([1, "a", "b", 3])),
        };
        assert_eq!(change.spliced_items(), Some(&[json!("a"), json!("b")][..]));
        assert_eq!(Change::added(p(".x"), json!(1)).spliced_items(), None);
    }

    #[test]
    fn test_transaction_ids_are_unique() {
        let a = TransactionId::next();
        let b = TransactionId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }
}
