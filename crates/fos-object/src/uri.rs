//! URI Helpers
//!
//! Resolution and inspection of object URIs.

use url::Url;

pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";
pub const BINARY_OCTET_STREAM: &str = "binary/octet-stream";
/// Placeholder type meaning "guess from the file extension"
pub const APPLICATION_GUESS_FROM_EXT: &str = "application/x-unknown-content-type";

/// Schemes whose URLs wrap another URL
const NESTED_SCHEMES: &[&str] = &["view-source", "jar"];

/// Resolve `spec` against an optional base.
///
/// Absolute specs parse on their own; relative specs need a base.
pub fn resolve(spec: &str, base: Option<&Url>) -> Option<Url> {
    let spec = spec.trim();
    match base {
        Some(base) => base.join(spec).ok(),
        None => Url::parse(spec).ok(),
    }
}

/// The URL wrapped by a nested URL, if any
pub fn inner_uri(uri: &Url) -> Option<Url> {
    let scheme = uri.scheme();
    if !NESTED_SCHEMES.contains(&scheme) {
        return None;
    }
    let rest = &uri.as_str()[scheme.len() + 1..];
    let inner = match scheme {
        "jar" => rest.split("!/").next().unwrap_or(rest),
        _ => rest,
    };
    Url::parse(inner).ok()
}

/// Whether a URL, or any URL nested inside it, uses the `view-source` scheme
pub fn is_view_source(uri: &Url) -> bool {
    let mut current = uri.clone();
    loop {
        if current.scheme() == "view-source" {
            return true;
        }
        match inner_uri(&current) {
            Some(inner) => current = inner,
            None => return false,
        }
    }
}

/// File extension of the URL's last path segment
pub fn file_extension(uri: &Url) -> Option<String> {
    let name = if uri.cannot_be_a_base() {
        uri.as_str()
    } else {
        uri.path_segments()?.next_back()?
    };
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

/// Strip parameters from a MIME type and normalize its case
pub fn parse_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

/// Whether `uri` is a `file:` URL inside the directory of `document`
pub fn is_within_directory(uri: &Url, document: &Url) -> bool {
    if uri.scheme() != "file" || document.scheme() != "file" {
        return false;
    }
    let doc_path = document.path();
    let dir = match doc_path.rfind('/') {
        Some(pos) => &doc_path[..=pos],
        None => return false,
    };
    uri.path().starts_with(dir)
}
