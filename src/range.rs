//! `Range` request header handling.
//!
//! Only single byte ranges are supported.  A header that cannot be turned
//! into a satisfiable range against the object size is reported as
//! [`RangeRequest::Invalid`], and callers answer with the full object.

/// A concrete, satisfiable byte window of an object.
///
/// Invariant: `start <= end < total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte, inclusive.
    pub start: u64,
    /// Last byte, inclusive.
    pub end: u64,
    /// Size of the whole object.
    pub total: u64,
}

impl ByteRange {
    /// Number of bytes in the window, for the `Content-Length` header.
    pub fn content_length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Content-Range` response header.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// Outcome of evaluating a request's `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No header, or an empty one.
    NoRange,
    /// A satisfiable single range.
    Valid(ByteRange),
    /// Malformed, multi-range, or unsatisfiable.
    Invalid,
}

/// Parsed but unresolved range spec.
#[derive(Debug, Clone, PartialEq)]
enum RangeSpec {
    /// bytes=start-end (inclusive both ends)
    StartEnd(u64, u64),
    /// bytes=start-  (from start to end of object)
    StartOpen(u64),
    /// bytes=-N  (last N bytes)
    Suffix(u64),
}

/// Evaluate a `Range` header value against an object of `total` bytes.
pub fn evaluate(header: Option<&str>, total: u64) -> RangeRequest {
    let header = match header.map(str::trim) {
        None | Some("") => return RangeRequest::NoRange,
        Some(h) => h,
    };
    parse_range_spec(header)
        .and_then(|spec| resolve(&spec, total))
        .map_or(RangeRequest::Invalid, RangeRequest::Valid)
}

/// Parse a header value like "bytes=0-4", "bytes=5-", "bytes=-3".
fn parse_range_spec(value: &str) -> Option<RangeSpec> {
    let spec = value.strip_prefix("bytes=")?.trim();

    if spec.contains(',') {
        return None;
    }

    if let Some(suffix) = spec.strip_prefix('-') {
        let n: u64 = suffix.parse().ok()?;
        if n == 0 {
            return None;
        }
        Some(RangeSpec::Suffix(n))
    } else if let Some(stripped) = spec.strip_suffix('-') {
        let start: u64 = stripped.parse().ok()?;
        Some(RangeSpec::StartOpen(start))
    } else if let Some((start_s, end_s)) = spec.split_once('-') {
        let start: u64 = start_s.parse().ok()?;
        let end: u64 = end_s.parse().ok()?;
        if start > end {
            return None;
        }
        Some(RangeSpec::StartEnd(start, end))
    } else {
        None
    }
}

/// Resolve a spec against the object size, clamping the end to the last
/// byte.  Returns `None` when no byte of the object is selected.
fn resolve(spec: &RangeSpec, total: u64) -> Option<ByteRange> {
    if total == 0 {
        return None;
    }
    let (start, end) = match *spec {
        RangeSpec::StartEnd(start, end) => {
            if start >= total {
                return None;
            }
            (start, end.min(total - 1))
        }
        RangeSpec::StartOpen(start) => {
            if start >= total {
                return None;
            }
            (start, total - 1)
        }
        RangeSpec::Suffix(n) => (total.saturating_sub(n), total - 1),
    };
    Some(ByteRange { start, end, total })
}

// -- Unit tests ---------------------------------------------------------------
