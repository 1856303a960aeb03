//! `Content-Range` parsing for chunk uploads
//!
//! The range is a per-chunk sanity check on the payload length, not a
//! sequencing mechanism: the offsets themselves are never compared against
//! the session.

use std::str::FromStr;

use crate::error::AppError;

/// Parsed `bytes start-end/total` header; `end` is inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// `None` for the `*` form
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid Content-Range header")]
pub struct InvalidContentRange;

impl ContentRange {
    /// Number of bytes the range covers
    pub fn length(&self) -> u64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }
}

impl FromStr for ContentRange {
    type Err = InvalidContentRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (unit, rest) = s.trim().split_once(' ').ok_or(InvalidContentRange)?;
        if !unit.eq_ignore_ascii_case("bytes") {
            return Err(InvalidContentRange);
        }

        let (range, total) = rest.trim().split_once('/').ok_or(InvalidContentRange)?;
        let (start, end) = range.split_once('-').ok_or(InvalidContentRange)?;

        let start: u64 = start.trim().parse().map_err(|_| InvalidContentRange)?;
        let end: u64 = end.trim().parse().map_err(|_| InvalidContentRange)?;
        let total = match total.trim() {
            "*" => None,
            value => Some(value.parse::<u64>().map_err(|_| InvalidContentRange)?),
        };

        if end < start || total.is_some_and(|t| end >= t) {
            return Err(InvalidContentRange);
        }
        // A full 0..=u64::MAX span has no representable length
        if (end - start).checked_add(1).is_none() {
            return Err(InvalidContentRange);
        }

        Ok(ContentRange { start, end, total })
    }
}

/// Check an optional `Content-Range` against the received payload length
pub fn verify_length(header: Option<&str>, actual: u64) -> Result<(), AppError> {
    let Some(header) = header else {
        return Ok(());
    };

    let range: ContentRange = header
        .parse()
        .map_err(|e: InvalidContentRange| AppError::Validation(e.to_string()))?;

    if range.length() != actual {
        return Err(AppError::Validation(format!(
            "Content-Range length mismatch: expected {}, got {}",
            range.length(),
            actual
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ranges() {
        let range: ContentRange = "bytes 0-4194303/10485760".parse().unwrap();
        assert_eq!(range.start, 0);
        assert_eq!(range.length(), 4 * 1024 * 1024);
        assert_eq!(range.total, Some(10_485_760));

        let range: ContentRange = "BYTES 10-19/*".parse().unwrap();
        assert_eq!(range.length(), 10);
        assert_eq!(range.total, None);
    }

    #[test]
    fn test_rejects_malformed_ranges() {
        for header in [
            "",
            "bytes",
            "items 0-1/2",
            "bytes 0-1",
            "bytes a-b/10",
            "bytes 5-1/10",
            "bytes 0-10/10",
            "bytes */10",
            "bytes 0-18446744073709551615/*",
        ] {
            assert!(header.parse::<ContentRange>().is_err(), "{header}");
        }
    }

    #[test]
    fn test_verify_length() {
        assert!(verify_length(None, 123).is_ok());
        assert!(verify_length(Some("bytes 0-9/100"), 10).is_ok());

        let err = verify_length(Some("bytes 0-9/100"), 11).unwrap_err();
        assert_eq!(err.to_string(), "Content-Range length mismatch: expected 10, got 11");

        let err = verify_length(Some("garbage"), 11).unwrap_err();
        assert_eq!(err.to_string(), "Invalid Content-Range header");

        let err = verify_length(Some("bytes 0-18446744073709551615/*"), 0).unwrap_err();
        assert_eq!(err.to_string(), "Invalid Content-Range header");
    }
}
