//! Textual form of access paths.

use crate::{Path, PathError, PathStep};

/// Parse an access path string into path steps.
///
/// - The empty string is the root path
/// - `.name` is a key; names run until the next `.` or `[`
/// - `[12]` is an index, `["key"]` / `['key']` a quoted key (backslash escapes)
/// - `[$1]` and `.$1` are parameters
///
/// # Example
///
/// ```
/// use milo_path::{parse_access_path, PathStep};
///
/// assert_eq!(parse_access_path("").unwrap(), vec![]);
/// assert_eq!(
///     parse_access_path(".info[\"first name\"]").unwrap(),
///     vec![PathStep::Key("info".into()), PathStep::Key("first name".into())]
/// );
/// assert!(parse_access_path("info").is_err());
/// ```
pub fn parse_access_path(path: &str) -> Result<Path, PathError> {
    let bytes = path.as_bytes();
    let invalid = |position: usize| PathError::InvalidPath {
        path: path.to_string(),
        position,
    };
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b'.' => {
                let start = pos + 1;
                let end = path[start..]
                    .find(['.', '['])
                    .map_or(path.len(), |offset| start + offset);
                let name = &path[start..end];
                if name.is_empty() || name.contains([']', '*', '"', '\'']) {
                    return Err(invalid(pos));
                }
                out.push(match param_number(name) {
                    Some(n) => PathStep::Param(n),
                    None => PathStep::Key(name.to_string()),
                });
                pos = end;
            }
            b'[' => {
                let start = pos + 1;
                match bytes.get(start) {
                    Some(&quote) if quote == b'"' || quote == b'\'' => {
                        let (key, close) = read_quoted(path, start + 1, quote).ok_or(invalid(pos))?;
                        if bytes.get(close + 1) != Some(&b']') {
                            return Err(invalid(close + 1));
                        }
                        out.push(PathStep::Key(key));
                        pos = close + 2;
                    }
                    _ => {
                        let end = path[start..]
                            .find(']')
                            .map(|offset| start + offset)
                            .ok_or(invalid(pos))?;
                        let inner = &path[start..end];
                        let step = if let Some(n) = param_number(inner) {
                            PathStep::Param(n)
                        } else if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit()) {
                            PathStep::Index(inner.parse().map_err(|_| invalid(start))?)
                        } else {
                            return Err(invalid(start));
                        };
                        out.push(step);
                        pos = end + 1;
                    }
                }
            }
            _ => return Err(invalid(pos)),
        }
    }
    Ok(out)
}

fn param_number(token: &str) -> Option<usize> {
    let digits = token.strip_prefix('$')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Reads a quoted key starting after the opening quote. Returns the key and
/// the byte offset of the closing quote.
fn read_quoted(path: &str, start: usize, quote: u8) -> Option<(String, usize)> {
    let mut key = String::new();
    let mut escaped = false;
    for (offset, c) in path[start..].char_indices() {
        if escaped {
            key.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c as u32 == quote as u32 {
            return Some((key, start + offset));
        } else {
            key.push(c);
        }
    }
    None
}

fn is_plain_name(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('$')
        && !key.contains(['.', '[', ']', '*', '"', '\'', '\\', ','])
        && !key.contains(char::is_whitespace)
}

/// Format path steps into an access path string.
///
/// Returns an empty string for the root path.
///
/// # Example
///
/// ```
/// use milo_path::{format_access_path, PathStep};
///
/// assert_eq!(format_access_path(&[]), "");
/// assert_eq!(
///     format_access_path(&[PathStep::Key("a.b".into()), PathStep::Index(0)]),
///     "[\"a.b\"][0]"
/// );
/// ```
pub fn format_access_path(path: &[PathStep]) -> String {
    let mut out = String::new();
    for step in path {
        match step {
            PathStep::Key(key) if is_plain_name(key) => {
                out.push('.');
                out.push_str(key);
            }
            PathStep::Key(key) => {
                out.push_str("[\"");
                for c in key.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push_str("\"]");
            }
            PathStep::Index(index) => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
            PathStep::Param(n) => {
                out.push_str("[$");
                out.push_str(&n.to_string());
                out.push(']');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> PathStep {
        PathStep::Key(k.to_string())
    }

    #[test]
    fn test_parse_root() {
        assert_eq!(parse_access_path("").unwrap(), Vec::<PathStep>::new());
    }

    #[test]
    fn test_parse_keys_and_indices() {
        assert_eq!(
            parse_access_path(".info.name").unwrap(),
            vec![key("info"), key("name")]
        );
        assert_eq!(
            parse_access_path("[0][12].x").unwrap(),
            vec![PathStep::Index(0), PathStep::Index(12), key("x")]
        );
    }

    #[test]
    fn test_parse_numeric_looking_key_stays_key() {
        assert_eq!(parse_access_path(".0").unwrap(), vec![key("0")]);
        assert_eq!(parse_access_path("[0]").unwrap(), vec![PathStep::Index(0)]);
    }

    #[test]
    fn test_parse_params() {
        assert_eq!(
            parse_access_path(".list[$1].$2").unwrap(),
            vec![key("list"), PathStep::Param(1), PathStep::Param(2)]
        );
    }

    #[test]
    fn test_parse_quoted() {
        assert_eq!(
            parse_access_path("['a.b'][\"say \\\"hi\\\"\"]").unwrap(),
            vec![key("a.b"), key("say \"hi\"")]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_access_path("info"),
            Err(PathError::InvalidPath { position: 0, .. })
        ));
        assert!(parse_access_path(".").is_err());
        assert!(parse_access_path(".a..b").is_err());
        assert!(parse_access_path("[x]").is_err());
        assert!(parse_access_path("[1").is_err());
        assert!(parse_access_path("[\"open]").is_err());
        assert!(parse_access_path(".a*").is_err());
    }

    #[test]
    fn test_format_escapes_non_plain_keys() {
        assert_eq!(format_access_path(&[key("first name")]), "[\"first name\"]");
        assert_eq!(format_access_path(&[key("a,b")]), "[\"a,b\"]");
        assert_eq!(format_access_path(&[key("")]), "[\"\"]");
        assert_eq!(format_access_path(&[key("$1")]), "[\"$1\"]");
        assert_eq!(format_access_path(&[key("a\"b")]), "[\"a\\\"b\"]");
    }

    #[test]
    fn test_format_then_parse_odd_keys() {
        for k in ["a.b", "[x]", "", "$2", "back\\slash", "q\"uote", "*", "first name", "a,b"] {
            let path = vec![key(k), PathStep::Index(3)];
            assert_eq!(parse_access_path(&format_access_path(&path)).unwrap(), path);
        }
    }
}
