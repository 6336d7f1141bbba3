//! Byte sources and chunk windowing for resumable uploads.
//!
//! A [`ByteSource`] abstracts the payload stream. Sources that report a
//! finite length are windowed by re-seeking ([`SeekWindower`]); sources of
//! unknown length are windowed through a buffered [`ChunkBuffer`] that can
//! resend any suffix the server has not yet acknowledged.

mod buffer;
mod bytes;
mod file;
mod reader;
mod window;

pub use buffer::{ChunkBuffer, Window};
pub use bytes::BytesSource;
pub use file::FileSource;
pub use reader::ReaderSource;
pub use window::SeekWindower;

use std::future::Future;
use std::io;
use std::pin::Pin;

/// Errors produced while windowing a source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cancelled")]
    Cancelled,

    #[error(
        "server cursor {ack} outside buffered window [{window_start}, {window_start}+{window_len})"
    )]
    AckOutOfWindow {
        ack: u64,
        window_start: u64,
        window_len: u64,
    },
}

/// Abstract byte source for an upload.
///
/// Implemented with manually boxed futures so sessions can hold a
/// `Box<dyn ByteSource>` and tests can script sources without a runtime
/// dependency on any concrete reader type.
pub trait ByteSource: Send {
    /// Total length in bytes, if known at construction.
    ///
    /// Sources returning `Some` must also support [`seek`](Self::seek);
    /// the upload is then driven in the known-size regime.
    fn total_len(&self) -> Option<u64>;

    /// Reads into `buf`, returning the number of bytes read. Zero means
    /// end of stream.
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = io::Result<usize>> + Send + 'a>>;

    /// Repositions the source to the absolute byte offset `pos`.
    ///
    /// Non-seekable sources return [`io::ErrorKind::Unsupported`].
    fn seek(&mut self, pos: u64) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>>;
}
