//! Cache key expansion and namespacing.
//!
//! Logical names are expanded into a flat string ([`CacheKey`]) and prefixed
//! with the active namespace: `"{namespace}:{expanded}"`. Without a namespace
//! the expanded name is used as-is.

use std::collections::BTreeMap;

/// Separator between the namespace and the expanded name.
pub const NAMESPACE_SEPARATOR: char = ':';

/// Anything that can be used as a logical cache name.
///
/// # Example
///
/// ```
/// use redis_cache_store::key::CacheKey;
///
/// assert_eq!("user".cache_key(), "user");
/// assert_eq!(["user", "42"].cache_key(), "user/42");
/// assert_eq!(42u64.cache_key(), "42");
/// ```
pub trait CacheKey {
    /// Flatten the name into the string used as the physical key body.
    fn cache_key(&self) -> String;
}

impl CacheKey for str {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl CacheKey for String {
    fn cache_key(&self) -> String {
        self.clone()
    }
}

impl<K: CacheKey + ?Sized> CacheKey for &K {
    fn cache_key(&self) -> String {
        (**self).cache_key()
    }
}

macro_rules! display_cache_key {
    ($($t:ty),*) => {
        $(
            impl CacheKey for $t {
                fn cache_key(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

display_cache_key!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, bool, char);

// A one-element list expands to the element itself.
impl<K: CacheKey> CacheKey for [K] {
    fn cache_key(&self) -> String {
        self.iter()
            .map(CacheKey::cache_key)
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl<K: CacheKey, const N: usize> CacheKey for [K; N] {
    fn cache_key(&self) -> String {
        self.as_slice().cache_key()
    }
}

impl<K: CacheKey> CacheKey for Vec<K> {
    fn cache_key(&self) -> String {
        self.as_slice().cache_key()
    }
}

impl<K: CacheKey, V: CacheKey> CacheKey for BTreeMap<K, V> {
    fn cache_key(&self) -> String {
        self.iter()
            .map(|(k, v)| format!("{}={}", k.cache_key(), v.cache_key()))
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Build the physical key for a logical name.
///
/// The namespace is escaped so that the first unescaped `:` always ends it.
/// Distinct `(namespace, name)` pairs therefore never share a key, across
/// namespaces as well as within one.
pub fn namespaced_key<K: CacheKey + ?Sized>(name: &K, namespace: Option<&str>) -> String {
    let expanded = name.cache_key();
    match namespace {
        Some(prefix) if !prefix.is_empty() => {
            format!("{}{}{}", escape_namespace(prefix), NAMESPACE_SEPARATOR, expanded)
        }
        _ => expanded,
    }
}

/// Build the glob pattern handed to the backend's `KEYS` for a caller pattern.
///
/// The namespace is encoded as in [`namespaced_key`], then glob-escaped so
/// it matches literally. A pattern never reaches into another namespace.
pub fn key_matcher(pattern: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(prefix) if !prefix.is_empty() => format!(
            "{}{}{}",
            escape_glob(&escape_namespace(prefix)),
            NAMESPACE_SEPARATOR,
            pattern
        ),
        _ => pattern.to_string(),
    }
}

/// Escape `\` and the separator inside a namespace with a backslash.
pub fn escape_namespace(namespace: &str) -> String {
    let mut escaped = String::with_capacity(namespace.len());
    for c in namespace.chars() {
        if c == '\\' || c == NAMESPACE_SEPARATOR {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escape the glob metacharacters understood by the backend (`* ? [ ] \`).
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Match `text` against a backend-style glob pattern.
///
/// Supports `*`, `?`, `[abc]`, `[^abc]`, `[a-z]` and `\` escapes, with the
/// same semantics as the backend's `KEYS` command.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_from(&p, &t)
}

fn glob_match_from(p: &[char], t: &[char]) -> bool {
    let (mut pi, mut ti) = (0usize, 0usize);
    // Backtracking point for the most recent `*`.
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(p, pi, t[ti]) {
                        if matched {
                            pi = next;
                            ti += 1;
                            continue;
                        }
                    }
                }
                '\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == t[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                }
                c => {
                    if c == t[ti] {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// Evaluate a `[...]` class starting at `p[start]`.
///
/// Returns whether `c` matched and the index just past the class, or `None`
/// when the class is unterminated.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = i < p.len() && p[i] == '^';
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < p.len() && p[i] != ']' {
        let mut lo = p[i];
        if lo == '\\' && i + 1 < p.len() {
            i += 1;
            lo = p[i];
        }
        if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let hi = p[i + 2];
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            if lo <= c && c <= hi {
                matched = true;
            }
            i += 3;
        } else {
            if lo == c {
                matched = true;
            }
            i += 1;
        }
    }

    if i >= p.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}
