use std::future::Future;
use std::io;
use std::pin::Pin;

use crate::ByteSource;

/// In-memory byte source with a known length.
pub struct BytesSource {
    data: Vec<u8>,
    pos: usize,
}

impl BytesSource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }
}

impl ByteSource for BytesSource {
    fn total_len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = io::Result<usize>> + Send + 'a>> {
        Box::pin(async move {
            let remaining = &self.data[self.pos..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.pos += n;
            Ok(n)
        })
    }

    fn seek(&mut self, pos: u64) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + '_>> {
        Box::pin(async move {
            if pos > self.data.len() as u64 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("seek to {pos} past end of {}-byte source", self.data.len()),
                ));
            }
            self.pos = pos as usize;
            Ok(())
        })
    }
}
