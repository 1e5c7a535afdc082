use std::fmt;
use std::str::FromStr;

use crate::ProxyError;

/// A single byte range as sent by media elements in the `Range` header.
///
/// Multi-range requests are rejected: audio elements never send them, and
/// the proxy cannot serve `multipart/byteranges` by piping one upstream body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-end`, both inclusive.
    Bounded { start: u64, end: u64 },
    /// `bytes=start-`
    From { start: u64 },
    /// `bytes=-len`, the last `len` bytes.
    Suffix { len: u64 },
}

impl FromStr for ByteRange {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProxyError::invalid_range(s);

        let ranges = s.trim().strip_prefix("bytes=").ok_or_else(invalid)?.trim();
        if ranges.contains(',') {
            return Err(invalid());
        }
        let (start, end) = ranges.split_once('-').ok_or_else(invalid)?;
        let (start, end) = (start.trim(), end.trim());

        match (start.is_empty(), end.is_empty()) {
            (true, true) => Err(invalid()),
            (true, false) => {
                let len: u64 = end.parse().map_err(|_| invalid())?;
                if len == 0 {
                    return Err(invalid());
                }
                Ok(Self::Suffix { len })
            }
            (false, true) => Ok(Self::From {
                start: start.parse().map_err(|_| invalid())?,
            }),
            (false, false) => {
                let start: u64 = start.parse().map_err(|_| invalid())?;
                let end: u64 = end.parse().map_err(|_| invalid())?;
                if end < start {
                    return Err(invalid());
                }
                Ok(Self::Bounded { start, end })
            }
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded { start, end } => write!(f, "bytes={start}-{end}"),
            Self::From { start } => write!(f, "bytes={start}-"),
            Self::Suffix { len } => write!(f, "bytes=-{len}"),
        }
    }
}
