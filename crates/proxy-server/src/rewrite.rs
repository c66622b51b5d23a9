/// Inbound prefix stripped before resolving against the upstream.
pub const API_PREFIX: &str = "/api/";

/// Map an inbound path (with query) to the upstream path.
///
/// Exactly one leading `/api/` is replaced by `/`; anything else passes
/// through unchanged.
pub fn rewrite_path(path: &str) -> &str {
    match path.strip_prefix(API_PREFIX) {
        // Keep the slash that ended the prefix.
        Some(_) => &path[API_PREFIX.len() - 1..],
        None => path,
    }
}
