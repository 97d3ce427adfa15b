//! Object request paths: `/{path...}/{time}[/{end}][/{version}][/k=v...]`.

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use replicast_cache::{BrowseQuery, Constraints, Query};
use replicast_types::{Millis, VersionId};

use crate::error::{ServerError, ServerResult};

/// Most path elements an object key may have.
pub const MAX_PATH_ELEMENTS: usize = 10;

pub const BROWSE_LIMIT: &str = "Browse-Limit";
pub const IF_NONE_MATCH: &str = "If-None-Match";
pub const IF_NOT_AFTER: &str = "If-Not-After";
pub const IF_NOT_BEFORE: &str = "If-Not-Before";

/// A parsed object request.
///
/// Tokens before the first numeric one are path elements, except `k=v`
/// tokens which are flags. The first numeric token is the start time. After
/// it, a second numeric token is the end time and a UUID selects a version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectRequest {
    pub path: Vec<String>,
    pub start_time: Option<Millis>,
    pub end_time: Option<Millis>,
    pub version: Option<VersionId>,
    pub flags: BTreeMap<String, String>,
    /// Version the client already holds (`If-None-Match`).
    pub cached_version: Option<VersionId>,
    pub not_after: Option<Millis>,
    pub not_before: Option<Millis>,
    pub browse_limit: Option<usize>,
}

impl ObjectRequest {
    /// Parses a request path and its conditional headers.
    ///
    /// With `time_required` unset the path may also be empty, which browse
    /// requests use to address the root.
    pub fn parse(path: &str, headers: &HeaderMap, time_required: bool) -> ServerResult<Self> {
        let mut request = ObjectRequest::default();

        for token in path.split('/').filter(|t| !t.is_empty()) {
            if let Some((name, value)) = token.split_once('=') {
                request.flags.insert(name.to_string(), value.to_string());
            } else if let Some(number) = parse_number(token) {
                match (request.start_time, request.end_time) {
                    (None, _) => request.start_time = Some(number),
                    (Some(_), None) => request.end_time = Some(number),
                    (Some(_), Some(_)) => {
                        return Err(ServerError::BadRequest(format!(
                            "more than two timestamps in {path}"
                        )))
                    }
                }
            } else if request.start_time.is_none() {
                request.path.push(token.to_string());
            } else {
                let version = token.parse::<VersionId>().map_err(|_| {
                    ServerError::BadRequest(format!("unexpected token {token} in {path}"))
                })?;
                if request.version.replace(version).is_some() {
                    return Err(ServerError::BadRequest(format!("two versions in {path}")));
                }
            }
        }

        if request.path.len() > MAX_PATH_ELEMENTS {
            return Err(ServerError::BadRequest(format!(
                "at most {MAX_PATH_ELEMENTS} path elements are allowed"
            )));
        }
        if time_required {
            if request.path.is_empty() {
                return Err(ServerError::BadRequest("missing object path".into()));
            }
            if request.start_time.is_none() {
                return Err(ServerError::BadRequest(format!("missing timestamp in {path}")));
            }
        }

        request.cached_version = header(headers, IF_NONE_MATCH)
            .map(|v| v.trim().trim_matches('"').to_string())
            .and_then(|v| v.parse().ok());
        request.not_after = header(headers, IF_NOT_AFTER)
            .and_then(parse_number)
            .filter(|&t| t != 0);
        request.not_before = header(headers, IF_NOT_BEFORE)
            .and_then(parse_number)
            .filter(|&t| t != 0);
        request.browse_limit = header(headers, BROWSE_LIMIT)
            .and_then(|v| v.trim().parse().ok())
            .filter(|&n| n > 0);

        Ok(request)
    }

    /// The object key, path elements joined with `/`.
    pub fn key(&self) -> String {
        self.path.join("/")
    }

    pub fn constraints(&self) -> Constraints {
        Constraints {
            version: self.version,
            at: self.start_time,
            flags: self.flags.clone(),
            not_after: self.not_after,
            not_before: self.not_before,
        }
    }

    pub fn query(&self) -> Query {
        Query {
            key: self.key(),
            constraints: self.constraints(),
        }
    }

    pub fn browse_query(&self) -> BrowseQuery {
        let mut query = BrowseQuery::new(&self.key()).with_constraints(self.constraints());
        if let Some(limit) = self.browse_limit {
            query = query.limit(limit);
        }
        query
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_number(token: &str) -> Option<u64> {
    let token = token.trim();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    fn name(s: &str) -> HeaderName {
        HeaderName::from_bytes(s.as_bytes()).unwrap()
    }

    fn parse(path: &str) -> ServerResult<ObjectRequest> {
        ObjectRequest::parse(path, &HeaderMap::new(), true)
    }

    #[test]
    fn path_time_and_version() {
        let v = VersionId::new();
        let r = parse(&format!("DET/A/1500/{v}")).unwrap();
        assert_eq!(r.key(), "DET/A");
        assert_eq!(r.start_time, Some(1500));
        assert_eq!(r.end_time, None);
        assert_eq!(r.version, Some(v));
    }

    #[test]
    fn flags_anywhere() {
        let r = parse("run=7/DET/A/1500/2000/quality=good").unwrap();
        assert_eq!(r.key(), "DET/A");
        assert_eq!(r.end_time, Some(2000));
        assert_eq!(r.flags.get("run").map(String::as_str), Some("7"));
        assert_eq!(r.flags.get("quality").map(String::as_str), Some("good"));
        let q = r.query();
        assert_eq!(q.constraints.at, Some(1500));
        assert_eq!(q.constraints.flags.len(), 2);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(parse("DET/A").is_err());
        assert!(parse("1500").is_err());
        assert!(parse("DET/1/2/3").is_err());
        assert!(parse("DET/1500/not-a-uuid").is_err());
        let too_deep = (0..11).map(|i| format!("p{i}")).collect::<Vec<_>>().join("/");
        assert!(parse(&format!("{too_deep}/1")).is_err());
    }

    #[test]
    fn browse_allows_missing_time() {
        let r = ObjectRequest::parse("DET/A*", &HeaderMap::new(), false).unwrap();
        assert_eq!(r.start_time, None);
        assert!(r.browse_query().path.is_wildcard());
        assert!(ObjectRequest::parse("", &HeaderMap::new(), false).is_ok());
    }

    #[test]
    fn conditional_headers() {
        let v = VersionId::new();
        let mut headers = HeaderMap::new();
        headers.insert(name(IF_NONE_MATCH), HeaderValue::from_str(&format!("\"{v}\"")).unwrap());
        headers.insert(name(IF_NOT_AFTER), HeaderValue::from_static("0"));
        headers.insert(name(IF_NOT_BEFORE), HeaderValue::from_static("100"));
        headers.insert(name(BROWSE_LIMIT), HeaderValue::from_static("5"));

        let r = ObjectRequest::parse("DET/1", &headers, true).unwrap();
        assert_eq!(r.cached_version, Some(v));
        assert_eq!(r.not_after, None);
        assert_eq!(r.not_before, Some(100));
        assert_eq!(r.browse_query().limit, Some(5));
    }
}
