//! `Content-Range` / `Range` header codec.
//!
//! # Wire format
//!
//! ```text
//! CHUNK (client -> server):   Content-Range: bytes {start}-{end}/{total}
//!                             ({total} is "*" while the length is unknown)
//! EMPTY PAYLOAD:              Content-Range: bytes */0
//! STATUS QUERY:               Content-Range: bytes */{total}  (or "bytes */*")
//! ACK (server -> client):     Range: bytes 0-{N}   on a 308 response
//! ```

/// Error returned when a server `Range` header cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("malformed range header: {0:?}")]
pub struct RangeError(pub String);

/// Formats the `Content-Range` value for a chunk covering `[start, start+len)`.
///
/// `total` is the payload length if known. A zero-length chunk with a known
/// total of zero is the empty-payload special case and yields `bytes */0`.
pub fn format_content_range(start: u64, len: u64, total: Option<u64>) -> String {
    if len == 0 && total == Some(0) {
        return "bytes */0".to_string();
    }
    let end = start + len - 1;
    match total {
        Some(t) => format!("bytes {start}-{end}/{t}"),
        None => format!("bytes {start}-{end}/*"),
    }
}

/// Formats the `Content-Range` value of a status query (`bytes */{total}`).
///
/// Sent with an empty body to ask the server for its current cursor.
pub fn format_status_query(total: Option<u64>) -> String {
    match total {
        Some(t) => format!("bytes */{t}"),
        None => "bytes */*".to_string(),
    }
}

/// Parses the server's `Range: bytes 0-N` response header and returns `N`.
///
/// The next byte the server expects is `N + 1`. Leading whitespace is
/// tolerated; anything else malformed is a fatal session error.
pub fn parse_range_end(value: &str) -> Result<u64, RangeError> {
    let trimmed = value.trim_start();
    let rest = trimmed
        .strip_prefix("bytes ")
        .ok_or_else(|| RangeError(value.to_string()))?;
    let (_, end) = rest
        .split_once('-')
        .ok_or_else(|| RangeError(value.to_string()))?;
    end.trim()
        .parse::<u64>()
        .map_err(|_| RangeError(value.to_string()))
}
