use replicast_types::props;

/// Response headers describing the transfer rather than the object.
pub const SKIPPED_HEADERS: [&str; 6] = [
    "Accept-Ranges",
    "Date",
    "ETag",
    "Content-Length",
    "Content-Type",
    "Content-Range",
];

const CONTENT_DISPOSITION: &str = "Content-Disposition";

const WELL_KNOWN: [&str; 7] = [
    props::VALID_FROM,
    props::VALID_UNTIL,
    props::CREATED,
    props::LAST_MODIFIED,
    props::CONTENT_MD5,
    props::CONTENT_TYPE,
    props::ORIGINAL_FILE_NAME,
];

/// Turns upstream response headers into object properties.
///
/// Transfer headers are dropped, `Content-Disposition` contributes only its
/// `filename` parameter (as `OriginalFileName`), and names are normalised to
/// their canonical spelling since HTTP clients may lowercase them.
pub fn recovered_properties(headers: &[(String, String)]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (name, value) in headers {
        if SKIPPED_HEADERS.iter().any(|s| s.eq_ignore_ascii_case(name)) {
            continue;
        }
        if name.eq_ignore_ascii_case(CONTENT_DISPOSITION) {
            if let Some(file_name) = disposition_filename(value) {
                out.push((props::ORIGINAL_FILE_NAME.to_string(), file_name));
            }
            continue;
        }
        out.push((canonical_name(name), value.clone()));
    }
    out
}

/// Extracts `filename="..."` (or an unquoted `filename=...`) from a
/// `Content-Disposition` value.
pub fn disposition_filename(value: &str) -> Option<String> {
    value.split(';').find_map(|param| {
        let (key, raw) = param.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let raw = raw.trim();
        let name = raw
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .unwrap_or(raw);
        (!name.is_empty()).then(|| name.to_string())
    })
}

/// Known property names keep their exact spelling; others are Title-Cased
/// per dash-separated word.
pub fn canonical_name(name: &str) -> String {
    if let Some(known) = WELL_KNOWN.iter().find(|k| k.eq_ignore_ascii_case(name)) {
        return known.to_string();
    }
    name.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
