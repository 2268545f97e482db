//! `Range` / `Content-Range` header parsing.
//!
//! Only the single-range `bytes` forms used by blob downloads are accepted:
//! `bytes=N-`, `bytes=N-M`, and `bytes N-M/<total or *>`. Multi-range,
//! suffix ranges (`bytes=-N`), and other units are rejected.

/// Parses a request `Range` header value.
///
/// Returns `(start, end)` where `end` is `None` for an open-ended range.
pub fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let value = value.trim();
    let spec = strip_unit_prefix(value, "bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    // A leading '-' would make `start` empty: that is a suffix range.
    let start: u64 = start.trim().parse().ok()?;
    let end = end.trim();
    if end.is_empty() {
        return Some((start, None));
    }
    let end: u64 = end.parse().ok()?;
    if start > end {
        return None;
    }
    Some((start, Some(end)))
}

/// Parses a response `Content-Range` header value.
///
/// Returns `(start, end, total)` where `total` is `None` when the server
/// reported `*`.
pub fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let value = value.trim();
    let spec = strip_unit_prefix(value, "bytes ")?;
    let (span, total) = spec.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if start > end {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start, end, total))
}

/// Strips a case-insensitive unit prefix, returning the remainder.
fn strip_unit_prefix<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    if value.len() < prefix.len() {
        return None;
    }
    let (head, tail) = value.split_at(prefix.len());
    head.eq_ignore_ascii_case(prefix).then_some(tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_open_end() {
        assert_eq!(parse_range("bytes=100-"), Some((100, None)));
    }

    #[test]
    fn range_closed() {
        assert_eq!(parse_range("bytes=5-10"), Some((5, Some(10))));
    }

    #[test]
    fn range_case_insensitive_unit() {
        assert_eq!(parse_range("Bytes=0-9"), Some((0, Some(9))));
        assert_eq!(parse_range("BYTES=7-"), Some((7, None)));
    }

    #[test]
    fn range_rejects_suffix() {
        assert_eq!(parse_range("bytes=-500"), None);
    }

    #[test]
    fn range_rejects_multi() {
        assert_eq!(parse_range("bytes=0-5,10-20"), None);
    }

    #[test]
    fn range_rejects_other_units() {
        assert_eq!(parse_range("items=0-5"), None);
    }

    #[test]
    fn range_rejects_inverted() {
        assert_eq!(parse_range("bytes=10-5"), None);
    }

    #[test]
    fn range_rejects_garbage() {
        assert_eq!(parse_range("bytes=abc-def"), None);
        assert_eq!(parse_range(""), None);
        assert_eq!(parse_range("bytes="), None);
    }

    #[test]
    fn content_range_with_total() {
        assert_eq!(
            parse_content_range("bytes 1000-4999/5000"),
            Some((1000, 4999, Some(5000)))
        );
    }

    #[test]
    fn content_range_unknown_total() {
        assert_eq!(parse_content_range("bytes 0-99/*"), Some((0, 99, None)));
    }

    #[test]
    fn content_range_case_insensitive_unit() {
        assert_eq!(
            parse_content_range("BYTES 5-9/10"),
            Some((5, 9, Some(10)))
        );
    }

    #[test]
    fn content_range_rejects_malformed() {
        assert_eq!(parse_content_range("bytes 5-9"), None);
        assert_eq!(parse_content_range("bytes x-9/10"), None);
        assert_eq!(parse_content_range("bits 5-9/10"), None);
        assert_eq!(parse_content_range("bytes 9-5/10"), None);
    }
}
