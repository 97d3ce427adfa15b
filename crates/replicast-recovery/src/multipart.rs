use bytes::Bytes;

use crate::error::{RecoveryError, RecoveryResult};

/// One spliceable piece of a partial-content response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BytePart {
    pub offset: u64,
    pub data: Bytes,
}

/// Parsed `Content-Range: bytes first-last/total`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentRange {
    pub first: u64,
    pub last: u64,
    /// `None` for `*`.
    pub total: Option<u64>,
}

impl ContentRange {
    /// Number of bytes covered. Fails when the range spans all of `u64`.
    pub fn len(&self) -> RecoveryResult<u64> {
        self.last
            .checked_sub(self.first)
            .and_then(|span| span.checked_add(1))
            .ok_or_else(|| RecoveryError::ContentRange(format!("bytes {}-{}", self.first, self.last)))
    }

    pub fn parse(value: &str) -> RecoveryResult<Self> {
        let bad = || RecoveryError::ContentRange(value.to_string());
        let spec = value.trim().strip_prefix("bytes").ok_or_else(bad)?.trim_start();
        let (range, total) = spec.split_once('/').ok_or_else(bad)?;
        let (first, last) = range.split_once('-').ok_or_else(bad)?;
        let first: u64 = first.trim().parse().map_err(|_| bad())?;
        let last: u64 = last.trim().parse().map_err(|_| bad())?;
        if last < first {
            return Err(bad());
        }
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().map_err(|_| bad())?),
        };
        Ok(Self { first, last, total })
    }
}

/// Returns the `boundary` parameter of a `multipart/byteranges` content type.
pub fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/byteranges") {
        return None;
    }
    params.find_map(|p| {
        let (k, v) = p.trim().split_once('=')?;
        if !k.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let v = v.trim();
        Some(v.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(v).to_string())
    })
}

/// Splits a `multipart/byteranges` body into its parts.
///
/// Each part's length is taken from its own `Content-Range`, so payload
/// bytes that happen to look like a boundary are never misread. Line endings
/// may be CRLF or bare LF.
pub fn parse_byteranges(body: &Bytes, boundary: &str) -> RecoveryResult<Vec<BytePart>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut pos = find(body, delimiter, 0)
        .ok_or_else(|| RecoveryError::Multipart("opening boundary not found".into()))?;

    loop {
        pos += delimiter.len();
        if body[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        pos = skip_line(body, pos)?;

        let mut range = None;
        loop {
            let (line, next) = read_line(body, pos)?;
            pos = next;
            if line.is_empty() {
                break;
            }
            let line = std::str::from_utf8(line)
                .map_err(|_| RecoveryError::Multipart("non-UTF-8 part header".into()))?;
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("Content-Range") {
                    range = Some(ContentRange::parse(value)?);
                }
            }
        }

        let range = range.ok_or_else(|| RecoveryError::Multipart("part without Content-Range".into()))?;
        let len = usize::try_from(range.len()?)
            .map_err(|_| RecoveryError::Multipart("part larger than address space".into()))?;
        let end = pos
            .checked_add(len)
            .filter(|&end| end <= body.len())
            .ok_or_else(|| RecoveryError::Multipart("part body truncated".into()))?;
        parts.push(BytePart {
            offset: range.first,
            data: body.slice(pos..end),
        });

        pos = find(body, delimiter, end)
            .ok_or_else(|| RecoveryError::Multipart("closing boundary not found".into()))?;
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Returns the line starting at `pos` without its terminator, and the
/// position just after the terminator.
fn read_line(body: &[u8], pos: usize) -> RecoveryResult<(&[u8], usize)> {
    let nl = find(body, b"\n", pos)
        .ok_or_else(|| RecoveryError::Multipart("unterminated header line".into()))?;
    let line = &body[pos..nl];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Ok((line, nl + 1))
}

fn skip_line(body: &[u8], pos: usize) -> RecoveryResult<usize> {
    read_line(body, pos).map(|(_, next)| next)
}
