//! Wire-level types for the resumable upload protocol.
//!
//! Header names, size constants, the `Content-Range`/`Range` codec, and the
//! server's JSON error envelope. No I/O happens here; the client crate owns
//! the transport.

pub mod error_document;
pub mod range;

// Re-export primary types for convenience.
pub use error_document::{ApiError, ErrorDetail, ErrorEnvelope};
pub use range::{RangeError, format_content_range, format_status_query, parse_range_end};

/// Smallest chunk size the protocol accepts for non-final chunks: 256 KiB.
pub const MIN_CHUNK_SIZE: usize = 256 * 1024;

/// Default chunk size: 10 MiB.
///
/// Larger chunks reduce per-request overhead; the final chunk may be
/// smaller than the minimum.
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Query parameter value selecting the resumable upload protocol.
pub const UPLOAD_TYPE_RESUMABLE: &str = "resumable";

/// Request header carrying the payload content type on initialization.
pub const HEADER_UPLOAD_CONTENT_TYPE: &str = "X-Upload-Content-Type";

/// Request header carrying the total payload length on initialization.
///
/// Sent only when the source reports a finite length.
pub const HEADER_UPLOAD_CONTENT_LENGTH: &str = "X-Upload-Content-Length";

/// Status code the server uses to acknowledge a prefix of the upload.
pub const STATUS_RESUME_INCOMPLETE: u16 = 308;
