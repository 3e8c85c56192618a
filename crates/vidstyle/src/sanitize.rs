//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Source URLs may carry credentials or signed query strings, and work
//! directory paths reveal the host layout; neither belongs in traces.

use std::path::Path;

use url::Url;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Strips userinfo, query and fragment from a URL.
///
/// - `https://user:pw@cdn.example/v.mp4?sig=abc` → `https://****@cdn.example/v.mp4`
/// - `https://cdn.example/v.mp4` → unchanged
pub fn redact_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return "<invalid url>".to_string();
    };

    let had_userinfo = !url.username().is_empty() || url.password().is_some();
    url.set_query(None);
    url.set_fragment(None);

    if had_userinfo {
        // Only fails for URLs that cannot have credentials in the first place.
        let _ = url.set_password(None);
        let _ = url.set_username("****");
    }

    url.to_string()
}
