//! Well-known object property names.
//!
//! Properties travel in the metadata section of a fragmented object and as
//! HTTP headers of the authoritative endpoint, so the names follow HTTP
//! header capitalisation. Lookups elsewhere are ASCII-case-insensitive.

/// Start of validity, milliseconds since the UNIX epoch.
pub const VALID_FROM: &str = "Valid-From";
/// End of validity (exclusive), milliseconds since the UNIX epoch.
pub const VALID_UNTIL: &str = "Valid-Until";
/// Creation time, milliseconds since the UNIX epoch.
pub const CREATED: &str = "Created";
/// Last modification time of the object's metadata.
pub const LAST_MODIFIED: &str = "Last-Modified";
/// Hex-encoded MD5 of the payload.
pub const CONTENT_MD5: &str = "Content-MD5";
/// MIME type of the payload.
pub const CONTENT_TYPE: &str = "Content-Type";
/// File name the object was uploaded with.
pub const ORIGINAL_FILE_NAME: &str = "OriginalFileName";

/// Content type used when an object does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Parse a millisecond timestamp property value.
pub fn parse_millis(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

/// Normalise a `Content-MD5` value to lowercase hex without dashes.
pub fn normalize_md5(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_millis_accepts_padded_numbers() {
        assert_eq!(parse_millis(" 1500 "), Some(1500));
        assert_eq!(parse_millis("abc"), None);
        assert_eq!(parse_millis("-1"), None);
    }

    #[test]
    fn md5_normalisation_strips_dashes_and_case() {
        assert_eq!(
            normalize_md5("D41D8CD9-8F00-B204-E980-0998ECF8427E"),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }
}
