//! Filename to URL resolution
//!
//! A TFTP filename is untrusted input. When appended to the base URL it is
//! split into path segments, normalised, and every segment is percent-encoded
//! on its own, so no filename can change the host, add a query or fragment,
//! or climb above the base path.

use reqwest::Url;

use crate::error::GatewayError;

/// Build the origin URL for `filename`
///
/// With `append_path` unset the base URL is returned unchanged. Otherwise the
/// filename's segments are appended below the base path, which is treated as
/// a directory even without a trailing slash. The base URL's query is kept
/// and its fragment dropped.
///
/// ```
/// use reqwest::Url;
/// use tftp_gateway::resolve;
///
/// let base = Url::parse("http://10.0.0.1/tftp/").unwrap();
/// let url = resolve(&base, true, "boot/pxelinux.0").unwrap();
/// assert_eq!(url.as_str(), "http://10.0.0.1/tftp/boot/pxelinux.0");
/// ```
pub fn resolve(base_url: &Url, append_path: bool, filename: &str) -> Result<Url, GatewayError> {
    if !append_path {
        return Ok(base_url.clone());
    }

    let segments = normalize_segments(filename)?;

    let mut url = base_url.clone();
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    let base_path = url.path().to_string();

    if segments.is_empty() {
        return Ok(url);
    }

    url.path_segments_mut()
        .map_err(|()| GatewayError::construction(filename, "base URL cannot carry a path"))?
        .pop_if_empty()
        .extend(&segments);

    if url.host() != base_url.host() || !url.path().starts_with(&base_path) {
        return Err(GatewayError::construction(filename, "result leaves the base URL"));
    }

    Ok(url)
}

/// Split a filename into clean path segments
///
/// Empty and `.` segments are dropped (this also strips leading slashes) and
/// `..` removes the previous segment. A `..` with nothing left to remove
/// would escape the base path and is rejected.
///
/// Control characters are rejected outright: the URL parser silently drops
/// tab, CR and LF, which would fetch a different path than the one asked for.
fn normalize_segments(filename: &str) -> Result<Vec<&str>, GatewayError> {
    if filename.chars().any(|c| c.is_ascii_control()) {
        return Err(GatewayError::construction(filename, "filename contains control characters"));
    }

    let mut segments = Vec::new();

    for segment in filename.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(GatewayError::construction(filename, "path escapes the base URL"));
                }
            }
            segment => segments.push(segment),
        }
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    fn resolved(base_url: &str, filename: &str) -> String {
        resolve(&base(base_url), true, filename).unwrap().to_string()
    }

    #[test]
    fn test_appends_relative_path() {
        assert_eq!(
            resolved("http://10.0.0.1/tftp/", "boot/pxelinux.0"),
            "http://10.0.0.1/tftp/boot/pxelinux.0"
        );
        assert_eq!(resolved("http://10.0.0.1/", "pxelinux.0"), "http://10.0.0.1/pxelinux.0");
        assert_eq!(resolved("http://10.0.0.1", "pxelinux.0"), "http://10.0.0.1/pxelinux.0");
    }

    #[test]
    fn test_base_without_trailing_slash_is_extended() {
        assert_eq!(resolved("http://10.0.0.1/tftp", "grub.cfg"), "http://10.0.0.1/tftp/grub.cfg");
    }

    #[test]
    fn test_leading_slashes_keep_base_prefix() {
        assert_eq!(resolved("http://10.0.0.1/tftp/", "/etc/passwd"), "http://10.0.0.1/tftp/etc/passwd");
        assert_eq!(
            resolved("http://10.0.0.1/tftp/", "//evil.example/x"),
            "http://10.0.0.1/tftp/evil.example/x"
        );
    }

    #[test]
    fn test_reserved_characters_are_escaped() {
        assert_eq!(
            resolved("http://10.0.0.1/tftp/", "a b?c=1#frag.bin"),
            "http://10.0.0.1/tftp/a%20b%3Fc=1%23frag.bin"
        );
        assert_eq!(resolved("http://10.0.0.1/tftp/", "100%.bin"), "http://10.0.0.1/tftp/100%25.bin");
        assert_eq!(
            resolved("http://10.0.0.1/tftp/", "EFI\\BOOT\\bootx64.efi"),
            "http://10.0.0.1/tftp/EFI%5CBOOT%5Cbootx64.efi"
        );
    }

    #[test]
    fn test_host_never_changes() {
        let base_url = base("http://10.0.0.1/tftp/");
        for filename in ["@evil.example/x", "http://evil.example/", "..%2f..%2fx", ":8080/x", "?x", "#x"] {
            let url = resolve(&base_url, true, filename).unwrap();
            assert_eq!(url.host_str(), Some("10.0.0.1"), "{filename}");
            assert!(url.path().starts_with("/tftp/"), "{filename}");
            assert_eq!(url.query(), None, "{filename}");
            assert_eq!(url.fragment(), None, "{filename}");
        }
    }

    #[test]
    fn test_dot_segments() {
        assert_eq!(resolved("http://10.0.0.1/tftp/", "./a/./b"), "http://10.0.0.1/tftp/a/b");
        assert_eq!(
            resolved("http://10.0.0.1/tftp/", "boot/../pxelinux.0"),
            "http://10.0.0.1/tftp/pxelinux.0"
        );
    }

    #[test]
    fn test_traversal_is_rejected() {
        let base_url = base("http://10.0.0.1/tftp/");
        for filename in ["..", "../secret", "boot/../../secret", "/../etc/passwd"] {
            let err = resolve(&base_url, true, filename).unwrap_err();
            assert!(matches!(err, GatewayError::Construction { .. }), "{filename}: {err}");
        }
    }

    #[test]
    fn test_control_characters_are_rejected() {
        let base_url = base("http://10.0.0.1/tftp/");
        for filename in ["a\tb.bin", "boot/\t../x", "\t", "boot\r\n.cfg", "nul\0.bin", "del\x7f"] {
            let err = resolve(&base_url, true, filename).unwrap_err();
            assert!(matches!(err, GatewayError::Construction { .. }), "{filename:?}: {err}");
        }
    }

    #[test]
    fn test_empty_filename_resolves_to_base_directory() {
        assert_eq!(resolved("http://10.0.0.1/tftp", ""), "http://10.0.0.1/tftp/");
        assert_eq!(resolved("http://10.0.0.1/tftp/", "/"), "http://10.0.0.1/tftp/");
    }

    #[test]
    fn test_base_query_kept_and_fragment_dropped() {
        assert_eq!(
            resolved("https://origin.example/tftp?token=abc#top", "pxelinux.0"),
            "https://origin.example/tftp/pxelinux.0?token=abc"
        );
    }

    #[test]
    fn test_append_disabled_returns_base() {
        let base_url = base("http://10.0.0.1/image.bin");
        for filename in ["", "pxelinux.0", "../../etc/passwd", "a b?c"] {
            assert_eq!(resolve(&base_url, false, filename).unwrap(), base_url);
        }
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let base_url = base("http://10.0.0.1/tftp/");
        let first = resolve(&base_url, true, "boot/a b.cfg").unwrap();
        let second = resolve(&base_url, true, "boot/a b.cfg").unwrap();
        assert_eq!(first, second);
    }
}
