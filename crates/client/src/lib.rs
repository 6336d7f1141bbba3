//! Resumable chunked upload client.
//!
//! Transfers an arbitrary byte stream to a server in bounded `PUT` requests,
//! recovering from transient failures by querying the server for the number
//! of bytes it has durably received and resending only the missing tail.
//!
//! A session is built from a shared [`RetryLayer`] (transport + retry policy
//! + interceptor chain), a target path, an HTTP method for initialization,
//! a [`ByteSource`](upwire_source::ByteSource), and a content type:
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use upwire_client::{ReqwestTransport, ResumableUpload, RetryLayer};
//! use upwire_source::BytesSource;
//!
//! # async fn example() -> Result<(), upwire_client::UploadError> {
//! let layer = Arc::new(RetryLayer::new(Arc::new(ReqwestTransport::new()?)));
//! let mut upload = ResumableUpload::builder(
//!     layer,
//!     "/upload/files/{fileId}",
//!     "POST",
//!     BytesSource::new(b"payload".to_vec()),
//!     "application/octet-stream",
//! )
//! .base_url("https://api.example.com")
//! .build()?;
//!
//! let progress = upload
//!     .upload_with_cancellation(CancellationToken::new())
//!     .await?;
//! println!("sent {} bytes", progress.bytes_sent);
//! # Ok(()) }
//! ```

mod error;
mod params;
mod progress;
mod recovery;
mod retry;
mod session;
mod transport;

pub use error::UploadError;
pub use params::{ParamLocation, RequestParams};
pub use progress::{ProgressCallback, UploadProgress, UploadStatus};
pub use retry::{
    AttemptFailure, AttemptLimit, BackoffConfig, RetryInterceptor, RetryLayer, RetryPolicy,
};
pub use session::{ResumableUpload, ResumableUploadBuilder};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
