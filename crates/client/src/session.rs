//! The upload session driver.
//!
//! Owns the chunk loop: initialize the session, pull windows from the
//! source (re-seeking for known-size sources, buffering for unknown-size
//! ones), attach `Content-Range` headers, classify responses, and emit
//! progress. Transient failures never surface here; the retry layer and
//! the status-query interceptor handle them underneath.

use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use upwire_protocol::{
    ApiError, DEFAULT_CHUNK_SIZE, HEADER_UPLOAD_CONTENT_LENGTH, HEADER_UPLOAD_CONTENT_TYPE,
    MIN_CHUNK_SIZE, STATUS_RESUME_INCOMPLETE, UPLOAD_TYPE_RESUMABLE, format_content_range,
    format_status_query, parse_range_end,
};
use upwire_source::{ByteSource, ChunkBuffer, SeekWindower};

use crate::error::UploadError;
use crate::params::{RequestParams, encode_query};
use crate::progress::{ProgressCallback, ResponseCallback, UploadProgress, UploadStatus};
use crate::recovery::{SessionState, StatusQueryInterceptor};
use crate::retry::{RetryInterceptor, RetryLayer};
use crate::transport::{HttpRequest, HttpResponse};

/// What a chunk (or status-query) response told us.
enum Step {
    /// 2xx: the server has everything; carries the response body.
    Completed(Vec<u8>),
    /// 308: the server's cursor, i.e. the next byte index it expects.
    Acked(u64),
}

/// Builder for [`ResumableUpload`].
pub struct ResumableUploadBuilder {
    layer: Arc<RetryLayer>,
    base_url: String,
    path: String,
    method: String,
    content_type: String,
    source: Box<dyn ByteSource>,
    chunk_size: usize,
    enforce_chunk_multiple: bool,
    metadata: Option<serde_json::Value>,
    params: RequestParams,
    api_key: Option<String>,
    progress_callbacks: Vec<ProgressCallback>,
    response_handler: Option<ResponseCallback>,
}

impl ResumableUploadBuilder {
    /// Service root the target path is resolved against.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Chunk size in bytes. Must be a positive multiple of 256 KiB; the
    /// final chunk may be smaller.
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self.enforce_chunk_multiple = true;
        self
    }

    /// Sets the chunk size without the multiple-of-256-KiB check, for
    /// servers that negotiate arbitrary chunk sizes.
    pub fn chunk_size_unchecked(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self.enforce_chunk_multiple = false;
        self
    }

    /// Metadata body sent with the initialization request.
    ///
    /// When absent, the initialization request carries no body and no
    /// metadata content type.
    pub fn metadata(mut self, value: serde_json::Value) -> Self {
        self.metadata = Some(value);
        self
    }

    /// Declared path/query parameter bindings.
    pub fn params(mut self, params: RequestParams) -> Self {
        self.params = params;
        self
    }

    /// API key appended to the initialization query as `key`.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Registers a progress observer.
    pub fn on_progress(
        mut self,
        callback: impl Fn(UploadProgress) + Send + Sync + 'static,
    ) -> Self {
        self.progress_callbacks.push(Box::new(callback));
        self
    }

    /// Registers a typed observer for the completion response body.
    ///
    /// Invoked with the decoded body before `Completed` is emitted; never
    /// invoked on a failed upload. Without an observer the body is
    /// discarded.
    pub fn on_response<T, F>(mut self, callback: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.response_handler = Some(Box::new(move |body: &[u8]| {
            let value: T = serde_json::from_slice(body)?;
            callback(value);
            Ok(())
        }));
        self
    }

    pub fn build(self) -> Result<ResumableUpload, UploadError> {
        if self.method.trim().is_empty() {
            return Err(UploadError::Config("HTTP method must not be empty".into()));
        }
        if self.base_url.is_empty() {
            return Err(UploadError::Config("base URL must be set".into()));
        }
        if self.chunk_size == 0 {
            return Err(UploadError::Config("chunk size must be positive".into()));
        }
        if self.enforce_chunk_multiple && !self.chunk_size.is_multiple_of(MIN_CHUNK_SIZE) {
            return Err(UploadError::Config(format!(
                "chunk size {} must be a multiple of {} bytes",
                self.chunk_size, MIN_CHUNK_SIZE
            )));
        }

        Ok(ResumableUpload {
            layer: self.layer,
            base_url: self.base_url,
            path: self.path,
            method: self.method,
            content_type: self.content_type,
            source: self.source,
            chunk_size: self.chunk_size,
            metadata: self.metadata,
            params: self.params,
            api_key: self.api_key,
            state: Arc::new(SessionState::default()),
            bytes_sent: 0,
            latest: Mutex::new(UploadProgress::starting()),
            progress_callbacks: self.progress_callbacks,
            response_handler: self.response_handler,
        })
    }
}

/// One resumable upload attempt. Not reusable after completion.
pub struct ResumableUpload {
    layer: Arc<RetryLayer>,
    base_url: String,
    path: String,
    method: String,
    content_type: String,
    source: Box<dyn ByteSource>,
    chunk_size: usize,
    metadata: Option<serde_json::Value>,
    params: RequestParams,
    api_key: Option<String>,
    state: Arc<SessionState>,
    bytes_sent: u64,
    latest: Mutex<UploadProgress>,
    progress_callbacks: Vec<ProgressCallback>,
    response_handler: Option<ResponseCallback>,
}

impl std::fmt::Debug for ResumableUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumableUpload")
            .field("base_url", &self.base_url)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("content_type", &self.content_type)
            .field("chunk_size", &self.chunk_size)
            .field("bytes_sent", &self.bytes_sent)
            .finish_non_exhaustive()
    }
}

impl ResumableUpload {
    pub fn builder(
        layer: Arc<RetryLayer>,
        path: impl Into<String>,
        method: impl Into<String>,
        source: impl ByteSource + 'static,
        content_type: impl Into<String>,
    ) -> ResumableUploadBuilder {
        ResumableUploadBuilder {
            layer,
            base_url: String::new(),
            path: path.into(),
            method: method.into(),
            content_type: content_type.into(),
            source: Box::new(source),
            chunk_size: DEFAULT_CHUNK_SIZE,
            enforce_chunk_multiple: true,
            metadata: None,
            params: RequestParams::new(),
            api_key: None,
            progress_callbacks: Vec::new(),
            response_handler: None,
        }
    }

    /// Latest progress snapshot.
    pub fn progress(&self) -> UploadProgress {
        self.latest.lock().unwrap().clone()
    }

    /// The session URI, once initialization has succeeded.
    pub fn session_uri(&self) -> Option<String> {
        self.state.session_uri.read().unwrap().clone()
    }

    /// Runs the upload to completion and returns the terminal snapshot.
    ///
    /// Failures are reported only through the snapshot (`Failed` with the
    /// error text attached).
    pub async fn upload(&mut self) -> UploadProgress {
        match self.upload_with_cancellation(CancellationToken::new()).await {
            Ok(progress) => progress,
            Err(_) => self.progress(),
        }
    }

    /// Runs the upload to completion, resolving with the terminal snapshot
    /// or the terminating error.
    ///
    /// Cancelling the token exits at the next suspension point with
    /// [`UploadError::Cancelled`]; no terminal progress event is emitted in
    /// that case and partial server state is left as-is.
    pub async fn upload_with_cancellation(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<UploadProgress, UploadError> {
        let hook: Arc<dyn RetryInterceptor> =
            Arc::new(StatusQueryInterceptor::new(Arc::clone(&self.state)));
        self.layer.register(Arc::clone(&hook));
        let result = self.run(&cancel).await;
        self.layer.deregister(&hook);
        self.conclude(result)
    }

    /// Continues an upload against an existing session URI.
    ///
    /// Skips initialization: a status query learns the server's cursor and
    /// the chunk loop continues from there. A non-seekable source must
    /// already be positioned at the acknowledged offset.
    pub async fn resume(
        &mut self,
        session_uri: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<UploadProgress, UploadError> {
        let hook: Arc<dyn RetryInterceptor> =
            Arc::new(StatusQueryInterceptor::new(Arc::clone(&self.state)));
        self.layer.register(Arc::clone(&hook));
        let result = self.run_resume(session_uri.into(), &cancel).await;
        self.layer.deregister(&hook);
        self.conclude(result)
    }

    fn conclude(
        &self,
        result: Result<(), UploadError>,
    ) -> Result<UploadProgress, UploadError> {
        match result {
            Ok(()) => Ok(self.progress()),
            Err(UploadError::Cancelled) => {
                debug!("upload cancelled");
                Err(UploadError::Cancelled)
            }
            Err(err) => {
                warn!(error = %err, bytes_sent = self.bytes_sent, "upload failed");
                self.emit(UploadStatus::Failed, self.bytes_sent, Some(err.to_string()));
                Err(err)
            }
        }
    }

    async fn run(&mut self, cancel: &CancellationToken) -> Result<(), UploadError> {
        self.emit(UploadStatus::Starting, 0, None);

        if let Some(total) = self.source.total_len() {
            *self.state.total.write().unwrap() = Some(total);
        }

        let uri = self.initialize(cancel).await?;
        info!(uri = %uri, "upload session initialized");
        *self.state.session_uri.write().unwrap() = Some(uri);

        self.chunk_loop(cancel).await
    }

    async fn run_resume(
        &mut self,
        uri: String,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        self.emit(UploadStatus::Starting, 0, None);

        if let Some(total) = self.source.total_len() {
            *self.state.total.write().unwrap() = Some(total);
        }
        info!(uri = %uri, "resuming upload session");
        *self.state.session_uri.write().unwrap() = Some(uri.clone());

        // Learn the server's cursor before touching the source.
        let total = *self.state.total.read().unwrap();
        let mut request = HttpRequest::new("PUT", uri);
        request.set_header("Content-Range", format_status_query(total));
        request.set_header("Content-Length", "0");
        let response = self
            .layer
            .send(&mut request, cancel)
            .await
            .map_err(UploadError::from)?;

        match self.classify(response)? {
            Step::Completed(body) => {
                if let Some(total) = total {
                    self.bytes_sent = total;
                }
                self.finish(body)
            }
            Step::Acked(next) => {
                self.bytes_sent = next;
                self.emit(UploadStatus::Uploading, next, None);
                self.chunk_loop(cancel).await
            }
        }
    }

    /// Builds and sends the initialization request; returns the session URI.
    async fn initialize(&self, cancel: &CancellationToken) -> Result<String, UploadError> {
        let (path, mut query) = self.params.resolve(&self.path);
        query.push((
            "uploadType".to_string(),
            UPLOAD_TYPE_RESUMABLE.to_string(),
        ));
        if let Some(key) = &self.api_key {
            query.push(("key".to_string(), key.clone()));
        }
        let url = format!("{}{}?{}", self.base_url, path, encode_query(&query));

        let mut request = HttpRequest::new(self.method.clone(), url);
        request.set_header(HEADER_UPLOAD_CONTENT_TYPE, &self.content_type);
        if let Some(total) = *self.state.total.read().unwrap() {
            request.set_header(HEADER_UPLOAD_CONTENT_LENGTH, total.to_string());
        }
        if let Some(metadata) = &self.metadata {
            request.body = serde_json::to_vec(metadata)?;
            request.set_header("Content-Type", "application/json; charset=UTF-8");
        }

        let response = self
            .layer
            .send(&mut request, cancel)
            .await
            .map_err(UploadError::from)?;
        if !response.is_success() {
            return Err(self.response_error(response));
        }
        let uri = response.header("Location").ok_or_else(|| {
            UploadError::Protocol("missing Location header on initialization response".into())
        })?;
        Ok(uri.to_string())
    }

    async fn chunk_loop(&mut self, cancel: &CancellationToken) -> Result<(), UploadError> {
        match self.source.total_len() {
            Some(total) => self.run_known(total, cancel).await,
            None => self.run_unknown(cancel).await,
        }
    }

    /// Known-size regime: re-seek and re-read on every attempt.
    async fn run_known(
        &mut self,
        total: u64,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let windower = SeekWindower::new(self.chunk_size, total);
        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let start = self.bytes_sent;
            let chunk = windower
                .window(self.source.as_mut(), start, cancel)
                .await?;
            if chunk.is_empty() && total > 0 {
                return Err(UploadError::Protocol(
                    "server acknowledged the full payload without completing".into(),
                ));
            }
            let len = chunk.len() as u64;
            let header = format_content_range(start, len, Some(total));

            let response = self.send_chunk(&header, chunk, cancel).await?;
            match self.classify(response)? {
                Step::Completed(body) => {
                    self.bytes_sent = start + len;
                    return self.finish(body);
                }
                Step::Acked(next) => self.advance(next, start + len)?,
            }
        }
    }

    /// Unknown-size regime: buffer one chunk, resend unacknowledged suffixes.
    async fn run_unknown(&mut self, cancel: &CancellationToken) -> Result<(), UploadError> {
        let mut buffer = ChunkBuffer::new(self.chunk_size);
        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let (start, chunk, total) = {
                let window = buffer
                    .window(self.source.as_mut(), self.bytes_sent, cancel)
                    .await?;
                (window.start, window.data.to_vec(), window.total)
            };
            if total.is_some() {
                *self.state.total.write().unwrap() = total;
            }
            if chunk.is_empty() && start > 0 {
                return Err(UploadError::Protocol(
                    "server acknowledged the full payload without completing".into(),
                ));
            }

            let len = chunk.len() as u64;
            let header = format_content_range(start, len, total);

            let response = self.send_chunk(&header, chunk, cancel).await?;
            match self.classify(response)? {
                Step::Completed(body) => {
                    self.bytes_sent = start + len;
                    return self.finish(body);
                }
                Step::Acked(next) => self.advance(next, start + len)?,
            }
        }
    }

    async fn send_chunk(
        &self,
        content_range: &str,
        body: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, UploadError> {
        let uri = self
            .state
            .session_uri
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| UploadError::Protocol("no session URI".into()))?;

        debug!(range = content_range, len = body.len(), "sending chunk");

        let mut request = HttpRequest::new("PUT", uri);
        request.set_header("Content-Range", content_range);
        request.set_header("Content-Length", body.len().to_string());
        request.body = body;

        self.layer
            .send(&mut request, cancel)
            .await
            .map_err(UploadError::from)
    }

    fn classify(&self, response: HttpResponse) -> Result<Step, UploadError> {
        if response.is_success() {
            return Ok(Step::Completed(response.body));
        }
        if response.status == STATUS_RESUME_INCOMPLETE {
            let next = match response.header("Range") {
                Some(value) => parse_range_end(value)? + 1,
                // 308 without a Range header: the server has nothing yet.
                None => 0,
            };
            return Ok(Step::Acked(next));
        }
        Err(self.response_error(response))
    }

    /// Moves the cursor to the server's acknowledged position.
    fn advance(&mut self, next: u64, sent_end: u64) -> Result<(), UploadError> {
        if next < self.bytes_sent {
            return Err(UploadError::Protocol(format!(
                "server cursor moved backwards: {next} < {}",
                self.bytes_sent
            )));
        }
        if next > sent_end {
            return Err(UploadError::Protocol(format!(
                "server acknowledged {next} bytes but only {sent_end} were sent"
            )));
        }
        self.bytes_sent = next;
        self.emit(UploadStatus::Uploading, next, None);
        Ok(())
    }

    fn finish(&self, body: Vec<u8>) -> Result<(), UploadError> {
        if let Some(handler) = &self.response_handler {
            handler(&body)?;
        }
        info!(bytes_sent = self.bytes_sent, "upload completed");
        self.emit(UploadStatus::Completed, self.bytes_sent, None);
        Ok(())
    }

    fn response_error(&self, response: HttpResponse) -> UploadError {
        match ApiError::decode(&response.body) {
            Some(api) => UploadError::Api(api),
            None => UploadError::Status {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            },
        }
    }

    fn emit(&self, status: UploadStatus, bytes_sent: u64, error: Option<String>) {
        let progress = UploadProgress {
            status,
            bytes_sent,
            error,
        };
        *self.latest.lock().unwrap() = progress.clone();
        for callback in &self.progress_callbacks {
            callback(progress.clone());
        }
    }
}
