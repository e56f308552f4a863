//! Path helpers for slash-separated drive paths

/// Non-empty segments of a path; `"/"` and `""` have none.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".").collect()
}

/// Canonical form with a single leading slash.
pub fn normalize(path: &str) -> String {
    format!("/{}", segments(path).join("/"))
}

/// Split into parent path and final name. `None` for the root.
pub fn split_parent(path: &str) -> Option<(String, String)> {
    let mut parts = segments(path);
    let name = parts.pop()?.to_string();
    Some((format!("/{}", parts.join("/")), name))
}
