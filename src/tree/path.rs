//! Paths: `/`-joined field names used both as rule keys and as nesting
//! instructions.

/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// Extend a traversal path by one field name.
///
/// The root path is empty, so top-level fields get paths like `/root`.
pub fn child(path: &str, key: &str) -> String {
    let mut out = String::with_capacity(path.len() + key.len() + 1);
    out.push_str(path);
    out.push(SEPARATOR);
    out.push_str(key);
    out
}

/// Split a path into its non-empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty()).collect()
}
