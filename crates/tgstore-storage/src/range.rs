//! HTTP byte-range parsing
//!
//! Parsing is permissive: only a leading `bytes=<start>-<end?>` is honored and
//! anything else is treated as if no range had been requested.

/// Range as requested by the client; `end` is inclusive and optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

/// Inclusive byte range resolved against a known total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// The whole object, or `None` for an empty one.
    pub fn full(total_size: u64) -> Option<Self> {
        total_size.checked_sub(1).map(|end| ByteRange { start: 0, end })
    }

    /// Number of bytes covered; never zero.
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for an upstream `Range` request header.
    pub fn to_header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// Value for a `Content-Range` response header.
    pub fn content_range(&self, total_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_size)
    }
}

impl RangeSpec {
    /// Clamp against `total_size`. `None` means the range cannot be satisfied
    /// and the full content should be served instead.
    pub fn resolve(&self, total_size: u64) -> Option<ByteRange> {
        let last = total_size.checked_sub(1)?;
        if self.start > last {
            return None;
        }
        let end = self.end.map_or(last, |end| end.min(last));
        if self.start > end {
            return None;
        }
        Some(ByteRange {
            start: self.start,
            end,
        })
    }
}

/// Parse a `Range` header value.
pub fn parse_range_header(value: Option<&str>) -> Option<RangeSpec> {
    let rest = value?.trim_start().strip_prefix("bytes=")?;

    let (start_digits, rest) = split_digits(rest);
    let start = start_digits.parse::<u64>().ok()?;
    let rest = rest.strip_prefix('-')?;

    let (end_digits, _) = split_digits(rest);
    let end = if end_digits.is_empty() {
        None
    } else {
        Some(end_digits.parse::<u64>().ok()?)
    };

    Some(RangeSpec { start, end })
}

fn split_digits(s: &str) -> (&str, &str) {
    let idx = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_closed_and_open_ranges() {
        assert_eq!(
            parse_range_header(Some("bytes=0-99")),
            Some(RangeSpec {
                start: 0,
                end: Some(99)
            })
        );
        assert_eq!(
            parse_range_header(Some("bytes=500-")),
            Some(RangeSpec {
                start: 500,
                end: None
            })
        );
    }

    #[test]
    fn test_parse_only_honors_leading_range() {
        assert_eq!(
            parse_range_header(Some("bytes=10-20,30-40")),
            Some(RangeSpec {
                start: 10,
                end: Some(20)
            })
        );
    }

    #[test]
    fn test_malformed_ranges_are_ignored() {
        for header in [
            "bytes=-500",
            "bytes=abc-",
            "items=0-10",
            "bytes 0-10",
            "bytes=",
            "bytes=99999999999999999999999-",
        ] {
            assert_eq!(parse_range_header(Some(header)), None, "{}", header);
        }
        assert_eq!(parse_range_header(None), None);
    }

    #[test]
    fn test_resolve_clamps_and_defaults_end() {
        let open = RangeSpec {
            start: 10,
            end: None,
        };
        assert_eq!(open.resolve(100), Some(ByteRange { start: 10, end: 99 }));

        let past_end = RangeSpec {
            start: 90,
            end: Some(1_000),
        };
        let resolved = past_end.resolve(100).unwrap();
        assert_eq!(resolved, ByteRange { start: 90, end: 99 });
        assert_eq!(resolved.byte_count(), 10);
        assert_eq!(resolved.content_range(100), "bytes 90-99/100");
    }

    #[test]
    fn test_unsatisfiable_ranges_resolve_to_none() {
        let beyond = RangeSpec {
            start: 100,
            end: None,
        };
        assert_eq!(beyond.resolve(100), None);

        let inverted = RangeSpec {
            start: 50,
            end: Some(10),
        };
        assert_eq!(inverted.resolve(100), None);

        let any = RangeSpec {
            start: 0,
            end: None,
        };
        assert_eq!(any.resolve(0), None);
        assert_eq!(ByteRange::full(0), None);
    }
}
