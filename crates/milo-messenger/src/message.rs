use regex::Regex;
use std::fmt;
use std::rc::Rc;

/// A pattern subscription key.
#[derive(Clone)]
pub enum MessagePattern {
    Regex(Regex),
    /// A named predicate. Subscriptions are grouped by `key`.
    Predicate {
        key: String,
        test: Rc<dyn Fn(&str) -> bool>,
    },
}

impl MessagePattern {
    pub fn predicate<F>(key: impl Into<String>, test: F) -> Self
    where
        F: Fn(&str) -> bool + 'static,
    {
        MessagePattern::Predicate {
            key: key.into(),
            test: Rc::new(test),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            MessagePattern::Regex(re) => re.as_str(),
            MessagePattern::Predicate { key, .. } => key,
        }
    }

    pub fn matches(&self, message: &str) -> bool {
        match self {
            MessagePattern::Regex(re) => re.is_match(message),
            MessagePattern::Predicate { test, .. } => test(message),
        }
    }
}

impl fmt::Debug for MessagePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessagePattern::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            MessagePattern::Predicate { key, .. } => f.debug_tuple("Predicate").field(key).finish(),
        }
    }
}

/// What a subscribe, unsubscribe or dispatch call addresses.
///
/// Strings are split on whitespace and commas, so `"added, removed"` names
/// two messages.
#[derive(Debug, Clone)]
pub enum Messages {
    Names(Vec<String>),
    Pattern(MessagePattern),
}

impl Messages {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Messages::Names(
            names
                .into_iter()
                .flat_map(|name| split_names(name.as_ref()))
                .collect(),
        )
    }
}

/// Split on whitespace and commas, except inside `[...]` and quotes within
/// brackets, so path messages such as `.user["first name"]` stay whole.
fn split_names(names: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in names.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' if depth > 0 => {
                quote = Some(c);
                current.push(c);
            }
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if depth == 0 && (c.is_whitespace() || c == ',') => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

impl From<&str> for Messages {
    fn from(names: &str) -> Self {
        Messages::Names(split_names(names))
    }
}

impl From<String> for Messages {
    fn from(names: String) -> Self {
        Messages::from(names.as_str())
    }
}

impl From<&String> for Messages {
    fn from(names: &String) -> Self {
        Messages::from(names.as_str())
    }
}

impl From<&[&str]> for Messages {
    fn from(names: &[&str]) -> Self {
        Messages::names(names)
    }
}

impl<const N: usize> From<[&str; N]> for Messages {
    fn from(names: [&str; N]) -> Self {
        Messages::names(names)
    }
}

impl From<Vec<String>> for Messages {
    fn from(names: Vec<String>) -> Self {
        Messages::names(names)
    }
}

impl From<Regex> for Messages {
    fn from(re: Regex) -> Self {
        Messages::Pattern(MessagePattern::Regex(re))
    }
}

impl From<MessagePattern> for Messages {
    fn from(pattern: MessagePattern) -> Self {
        Messages::Pattern(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(messages: Messages) -> Vec<String> {
        match messages {
            Messages::Names(names) => names,
            Messages::Pattern(p) => panic!("expected names, got {p:?}"),
        }
    }

    #[test]
    fn test_split_string() {
        assert_eq!(names("a b,c ,, d".into()), vec!["a", "b", "c", "d"]);
        assert!(names("  ".into()).is_empty());
    }

    #[test]
    fn test_bracketed_keys_are_not_split() {
        assert_eq!(
            names(r#".user["first name"] .tags["a, b"][0],x"#.into()),
            vec![r#".user["first name"]"#, r#".tags["a, b"][0]"#, "x"]
        );
        assert_eq!(names(r#"["say \"hi there\""]"#.into()), vec![r#"["say \"hi there\""]"#]);
    }

    #[test]
    fn test_array_entries_are_split_too() {
        assert_eq!(names(["a b", "c"].into()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_pattern_key() {
        let re = Regex::new("^change").unwrap();
        let pattern = MessagePattern::Regex(re);
        assert_eq!(pattern.key(), "^change");
        assert!(pattern.matches("changed"));
        assert!(!pattern.matches("unchanged"));

        let even = MessagePattern::predicate("even", |m| m.len() % 2 == 0);
        assert_eq!(even.key(), "even");
        assert!(even.matches("ab"));
    }
}
