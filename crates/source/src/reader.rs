use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::ByteSource;

/// Wraps any [`AsyncRead`] as a non-seekable source of unknown length.
///
/// Uploads from a `ReaderSource` run in the unknown-size regime: the client
/// buffers one chunk at a time and never rewinds the reader.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin + Send> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: AsyncRead + Unpin + Send> ByteSource for ReaderSource<R> {
    fn total_len(&self) -> Option<u64> {
        None
    }

    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = io::Result<usize>> + Send + 'a>> {
        Box::pin(async move { self.reader.read(buf).await })
    }

    fn seek(&mut self, pos: u64) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>> {
        Box::pin(async move {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("cannot seek a streaming source (to byte {pos})"),
            ))
        })
    }
}
