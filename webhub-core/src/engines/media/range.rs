//! Pure `Range: bytes=…` parsing (§4.7, §8): the three range forms
//! (`start-end`, `start-`, `-suffix`), comma-separated multi-range
//! rejection, and bounds validation.

/// An inclusive byte range. Invariant: `0 <= start <= end < size` for the
/// file it was validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: u64,
}

impl RangeSpec {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// More than one range was requested; multi-range responses are not
    /// supported (§4.7: respond `416` with `Content-Range: bytes */{size}`).
    MultiRange,
    /// The header was malformed or out of bounds for the file size.
    NotSatisfiable,
}

/// Parse a `Range: bytes=…` header value against a file of `size` bytes.
/// Returns the single validated range, or a [`RangeError`] explaining why
/// the request cannot be satisfied.
pub fn parse_range_header(value: &str, size: u64) -> Result<RangeSpec, RangeError> {
    let spec = value.strip_prefix("bytes=").ok_or(RangeError::NotSatisfiable)?;
    let parts: Vec<&str> = spec.split(',').map(str::trim).collect();
    if parts.len() > 1 {
        return Err(RangeError::MultiRange);
    }
    let part = parts.first().ok_or(RangeError::NotSatisfiable)?;
    let (start, end) = parse_one(part, size).ok_or(RangeError::NotSatisfiable)?;

    if start <= end && end < size {
        Ok(RangeSpec { start, end })
    } else {
        Err(RangeError::NotSatisfiable)
    }
}

fn parse_one(part: &str, size: u64) -> Option<(u64, u64)> {
    let (start_str, end_str) = part.split_once('-')?;

    if start_str.is_empty() {
        // "-suffix": last `suffix` bytes.
        let suffix: u64 = end_str.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        let start = size.saturating_sub(suffix);
        return Some((start, size.checked_sub(1)?));
    }

    let start: u64 = start_str.parse().ok()?;
    if end_str.is_empty() {
        // "start-": open-ended, through end of file.
        return Some((start, size.checked_sub(1)?));
    }

    let end: u64 = end_str.parse().ok()?;
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_single_byte_range() {
        assert_eq!(parse_range_header("bytes=0-0", 100).unwrap(), RangeSpec { start: 0, end: 0 });
    }

    #[test]
    fn suffix_range_on_hundred_byte_file() {
        assert_eq!(parse_range_header("bytes=-5", 100).unwrap(), RangeSpec { start: 95, end: 99 });
    }

    #[test]
    fn open_ended_range() {
        assert_eq!(parse_range_header("bytes=10-", 100).unwrap(), RangeSpec { start: 10, end: 99 });
    }

    #[test]
    fn multi_range_is_rejected() {
        assert_eq!(parse_range_header("bytes=0-99,200-299", 1000), Err(RangeError::MultiRange));
    }

    #[test]
    fn out_of_bounds_is_not_satisfiable() {
        assert_eq!(parse_range_header("bytes=0-999", 100), Err(RangeError::NotSatisfiable));
        assert_eq!(parse_range_header("bytes=50-10", 100), Err(RangeError::NotSatisfiable));
    }

    #[test]
    fn missing_bytes_prefix_is_rejected() {
        assert_eq!(parse_range_header("items=0-10", 100), Err(RangeError::NotSatisfiable));
    }
}
