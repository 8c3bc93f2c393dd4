//! Document name derivation and validation.
//!
//! Names come from the request path: the configured prefix is stripped, the
//! remainder URL-decoded, and the result validated before it ever reaches
//! the filesystem. Accepted shapes are a rooted path (`/a/b`) used verbatim
//! in filesystem mode, or a relative path (`a/b`) resolved under the base
//! directory.

const MAX_NAME_LEN: usize = 1024;

/// Derive a document name from a request path.
///
/// Returns `None` when the path cannot name a document (empty after
/// stripping, undecodable percent-encoding, or failing validation).
pub fn derive_doc_name(request_path: &str, path_prefix: Option<&str>) -> Option<String> {
    let mut path = request_path;
    if let Some(prefix) = path_prefix {
        path = path.strip_prefix(prefix).unwrap_or(path);
    }
    let path = path.strip_prefix('/').unwrap_or(path);

    let decoded = urlencoding::decode(path).ok()?;
    let name = decoded.into_owned();
    if is_valid_doc_name(&name) { Some(name) } else { None }
}

/// Validate a document name.
///
/// Rules: non-empty; at most 1024 bytes; no `..` segment; either a rooted
/// path or a relative path not starting with a backslash; characters
/// restricted to `[A-Za-z0-9_./-]`.
pub fn is_valid_doc_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    if name.starts_with('\\') {
        return false;
    }

    let body = name.strip_prefix('/').unwrap_or(name);
    if body.is_empty() {
        return false;
    }
    if !body
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
    {
        return false;
    }
    if body.split('/').any(|segment| segment == "..") {
        return false;
    }
    true
}
