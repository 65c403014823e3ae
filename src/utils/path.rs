//! Public path normalization and forward-path rewriting.
//!
//! A public path is stored in one canonical form: a leading and a trailing
//! slash (`/orders/`, `/`). Matching and rewriting below rely on that form, so
//! callers must normalize once at registration time and never again.

/// Bring a public API path into canonical `/segment/.../` form.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let mut normalized = String::with_capacity(trimmed.len() + 2);
    if !trimmed.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(trimmed);
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

/// Return the part of `request_path` beyond the normalized `public_path`.
///
/// The suffix keeps its leading slash (`/orders/` + `/orders/123` gives
/// `/123`). A request for the bare mount point (`/orders`) yields an empty
/// suffix. `None` means the request does not belong to this public path.
pub fn match_suffix<'a>(public_path: &str, request_path: &'a str) -> Option<&'a str> {
    let mount = public_path.strip_suffix('/').unwrap_or(public_path);
    if request_path == mount {
        return Some("");
    }
    if request_path.starts_with(public_path) {
        return Some(&request_path[mount.len()..]);
    }
    None
}

/// Append a path suffix (and optional query) to a target base address.
///
/// The suffix is preserved verbatim; the only adjustment is collapsing the
/// single duplicated slash when the target itself ends with `/`.
pub fn forward_uri(target: &str, suffix: &str, query: Option<&str>) -> String {
    let mut uri = String::with_capacity(target.len() + suffix.len() + 16);
    uri.push_str(target);

    if suffix.is_empty() {
        if !target_has_path(target) {
            uri.push('/');
        }
    } else if target.ends_with('/') && suffix.starts_with('/') {
        uri.push_str(&suffix[1..]);
    } else {
        uri.push_str(suffix);
    }

    if let Some(query) = query.filter(|q| !q.is_empty()) {
        uri.push('?');
        uri.push_str(query);
    }
    uri
}

fn target_has_path(target: &str) -> bool {
    let after_scheme = target.split_once("://").map_or(target, |(_, rest)| rest);
    after_scheme.contains('/')
}
