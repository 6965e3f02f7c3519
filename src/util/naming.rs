//! Name normalisation for agents and callables.

/// Lowercase slug: runs of characters outside `[a-z0-9_]` collapse into a
/// single `-`, leading and trailing separators are dropped.
///
/// "Search Specialist" becomes `search-specialist`.
pub fn parameterize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || lower == '_' {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(lower);
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Whether `name` can be addressed by a model as a function name.
pub fn is_valid_callable_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
