//! JSON Pointer (RFC 6901) lookup and formatting.

use serde_json::Value;

/// Resolve a JSON Pointer against `root`.
///
/// Accepts the URI-fragment form with a leading `#`. Returns `None` when any
/// segment is missing or walks through a scalar; absence is an ordinary result.
pub fn resolve<'a>(root: &'a Value, pointer: &str) -> Option<&'a Value> {
    let pointer = pointer.strip_prefix('#').unwrap_or(pointer);
    if pointer.is_empty() {
        return Some(root);
    }
    let rest = pointer.strip_prefix('/')?;

    let mut current = root;
    for part in rest.split('/') {
        let token = unescape_token(part);
        current = match current {
            Value::Object(map) => map.get(&token)?,
            Value::Array(arr) => arr.get(parse_index(&token)?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Parse an array index token. Leading zeros and `-` are rejected.
fn parse_index(token: &str) -> Option<usize> {
    if token.is_empty() || (token.len() > 1 && token.starts_with('0')) {
        return None;
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// Unescape one pointer token (`~1` = `/`, `~0` = `~`).
pub fn unescape_token(token: &str) -> String {
    if !token.contains('~') {
        return token.to_string();
    }
    token.replace("~1", "/").replace("~0", "~")
}

/// Escape one pointer token.
pub fn escape_token(token: &str) -> String {
    if !token.contains('/') && !token.contains('~') {
        return token.to_string();
    }
    token.replace('~', "~0").replace('/', "~1")
}

/// Split a pointer into unescaped tokens. `""` is the root; a non-empty
/// pointer without a leading `/` is malformed and yields `None`.
pub fn parse_pointer(pointer: &str) -> Option<Vec<String>> {
    let pointer = pointer.strip_prefix('#').unwrap_or(pointer);
    if pointer.is_empty() {
        return Some(Vec::new());
    }
    let rest = pointer.strip_prefix('/')?;
    Some(rest.split('/').map(unescape_token).collect())
}

/// Pointer to a child of `parent`.
pub fn child_path(parent: &str, token: &str) -> String {
    format!("{}/{}", parent, escape_token(token))
}

/// Format unescaped tokens as a pointer.
pub fn format_pointer<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .fold(String::new(), |acc, t| child_path(&acc, t.as_ref()))
}
