fn main() {
    println!("Run `cargo test -p protocol-compat` to execute protocol conformance tests.");
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;
    use upwire_client::{
        BackoffConfig, HttpRequest, HttpResponse, ResumableUpload, ResumableUploadBuilder,
        RetryLayer, Transport, TransportError, UploadError, UploadStatus,
    };
    use upwire_source::{ByteSource, BytesSource, ReaderSource};

    const BASE: &str = "http://host";
    const SESSION_URI: &str = "http://host/upload/session/abc";

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 1.0,
        }
    }

    // -----------------------------------------------------------------------
    // Scripted transport: fixed response sequence, records every request
    // -----------------------------------------------------------------------

    enum Scripted {
        Respond(HttpResponse),
        /// Cancels the session token mid-flight, as if the caller aborted
        /// while this request was on the wire.
        CancelInFlight,
    }

    struct ScriptedTransport {
        script: Mutex<Vec<Scripted>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn send<'a>(
            &'a self,
            request: &'a HttpRequest,
            cancel: &'a CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>
        {
            self.seen.lock().unwrap().push(request.clone());
            let step = {
                let mut script = self.script.lock().unwrap();
                assert!(!script.is_empty(), "unexpected request: {request:?}");
                script.remove(0)
            };
            Box::pin(async move {
                match step {
                    Scripted::Respond(response) => Ok(response),
                    Scripted::CancelInFlight => {
                        cancel.cancel();
                        Err(TransportError::Cancelled)
                    }
                }
            })
        }
    }

    fn respond(response: HttpResponse) -> Scripted {
        Scripted::Respond(response)
    }

    fn init_ok() -> Scripted {
        respond(HttpResponse {
            status: 200,
            headers: vec![("Location".into(), SESSION_URI.into())],
            body: Vec::new(),
        })
    }

    fn done() -> Scripted {
        respond(HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
        })
    }

    fn incomplete(last_byte: u64) -> Scripted {
        respond(HttpResponse {
            status: 308,
            headers: vec![("Range".into(), format!("bytes 0-{last_byte}"))],
            body: Vec::new(),
        })
    }

    fn error_status(code: u16, body: &str) -> Scripted {
        respond(HttpResponse {
            status: code,
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
        })
    }

    fn session(
        transport: Arc<ScriptedTransport>,
        source: impl ByteSource + 'static,
        chunk_size: usize,
    ) -> ResumableUploadBuilder {
        ResumableUpload::builder(
            Arc::new(RetryLayer::new(transport).with_backoff(fast_backoff())),
            "/files/upload",
            "POST",
            source,
            "application/octet-stream",
        )
        .base_url(BASE)
        .chunk_size_unchecked(chunk_size)
    }

    // -----------------------------------------------------------------------
    // Literal wire scenarios
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn single_chunk_known_size() {
        let data = payload(453);
        let transport = ScriptedTransport::new(vec![init_ok(), done()]);
        let mut upload = session(transport.clone(), BytesSource::new(data.clone()), 1000)
            .build()
            .unwrap();

        let progress = upload
            .upload_with_cancellation(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(progress.status, UploadStatus::Completed);
        assert_eq!(progress.bytes_sent, 453);

        let seen = transport.requests();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].url.contains("uploadType=resumable"));
        assert_eq!(seen[1].header("Content-Range"), Some("bytes 0-452/453"));
        assert_eq!(seen[1].header("Content-Length"), Some("453"));
        assert_eq!(seen[1].body, data);
    }

    #[tokio::test]
    async fn empty_payload() {
        let transport = ScriptedTransport::new(vec![init_ok(), done()]);
        let mut upload = session(transport.clone(), BytesSource::new(Vec::new()), 1000)
            .build()
            .unwrap();

        let progress = upload
            .upload_with_cancellation(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(progress.status, UploadStatus::Completed);
        assert_eq!(progress.bytes_sent, 0);

        let seen = transport.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].header("X-Upload-Content-Length"), Some("0"));
        assert_eq!(seen[1].header("Content-Range"), Some("bytes */0"));
        assert_eq!(seen[1].header("Content-Length"), Some("0"));
        assert!(seen[1].body.is_empty());
    }

    #[tokio::test]
    async fn five_chunk_upload_known_size() {
        let data = payload(453);
        let transport = ScriptedTransport::new(vec![
            init_ok(),
            incomplete(99),
            incomplete(199),
            incomplete(299),
            incomplete(399),
            done(),
        ]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut upload = session(transport.clone(), BytesSource::new(data.clone()), 100)
            .on_progress(move |p| sink.lock().unwrap().push((p.status, p.bytes_sent)))
            .build()
            .unwrap();

        let progress = upload
            .upload_with_cancellation(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(progress.status, UploadStatus::Completed);
        assert_eq!(progress.bytes_sent, 453);

        let seen = transport.requests();
        assert_eq!(seen.len(), 6);
        let want_ranges = [
            "bytes 0-99/453",
            "bytes 100-199/453",
            "bytes 200-299/453",
            "bytes 300-399/453",
            "bytes 400-452/453",
        ];
        for (request, want) in seen[1..].iter().zip(want_ranges) {
            assert_eq!(request.header("Content-Range"), Some(want));
        }

        // Concatenated chunk bodies reproduce the payload byte-for-byte.
        let delivered: Vec<u8> = seen[1..].iter().flat_map(|r| r.body.clone()).collect();
        assert_eq!(delivered, data);

        let events = events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                (UploadStatus::Starting, 0),
                (UploadStatus::Uploading, 100),
                (UploadStatus::Uploading, 200),
                (UploadStatus::Uploading, 300),
                (UploadStatus::Uploading, 400),
                (UploadStatus::Completed, 453),
            ]
        );
    }

    #[tokio::test]
    async fn transient_failure_recovers_via_status_query() {
        let data = payload(453);
        let transport = ScriptedTransport::new(vec![
            init_ok(),
            incomplete(99),
            incomplete(199),
            incomplete(299),
            error_status(503, "backend hiccup"),
            // Response to the rewritten status query: the server kept the
            // first three chunks.
            incomplete(299),
            incomplete(399),
            done(),
        ]);
        let mut upload = session(
            transport.clone(),
            ReaderSource::new(std::io::Cursor::new(data.clone())),
            100,
        )
        .build()
        .unwrap();

        let progress = upload
            .upload_with_cancellation(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(progress.status, UploadStatus::Completed);
        assert_eq!(progress.bytes_sent, 453);

        let seen = transport.requests();
        assert_eq!(seen.len(), 8);
        assert_eq!(seen[1].header("Content-Range"), Some("bytes 0-99/*"));
        assert_eq!(seen[2].header("Content-Range"), Some("bytes 100-199/*"));
        assert_eq!(seen[3].header("Content-Range"), Some("bytes 200-299/*"));
        assert_eq!(seen[4].header("Content-Range"), Some("bytes 300-399/*"));

        // The failed send was reissued as a zero-body status query.
        assert_eq!(seen[5].method, "PUT");
        assert_eq!(seen[5].header("Content-Range"), Some("bytes */*"));
        assert!(seen[5].body.is_empty());

        // The unacknowledged chunk is resent from the buffer, then the
        // final chunk carries the freshly discovered total.
        assert_eq!(seen[6].header("Content-Range"), Some("bytes 300-399/*"));
        assert_eq!(seen[6].body, &data[300..400]);
        assert_eq!(seen[7].header("Content-Range"), Some("bytes 400-452/453"));
        assert_eq!(seen[7].body, &data[400..453]);

        // Deduplicated delivery equals the payload.
        let delivered: Vec<u8> = [&seen[1], &seen[2], &seen[3], &seen[6], &seen[7]]
            .iter()
            .flat_map(|r| r.body.clone())
            .collect();
        assert_eq!(delivered, data);
    }

    #[tokio::test]
    async fn partial_server_read_resends_the_tail() {
        let data = payload(453);
        let transport =
            ScriptedTransport::new(vec![init_ok(), incomplete(119), done()]);
        let mut upload = session(transport.clone(), BytesSource::new(data.clone()), 400)
            .build()
            .unwrap();

        let progress = upload
            .upload_with_cancellation(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(progress.status, UploadStatus::Completed);
        assert_eq!(progress.bytes_sent, 453);

        let seen = transport.requests();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].header("Content-Range"), Some("bytes 0-399/453"));
        assert_eq!(seen[2].header("Content-Range"), Some("bytes 120-452/453"));
        assert_eq!(seen[2].body, &data[120..]);

        // First 120 bytes from the initial send plus the resent tail.
        let mut delivered = seen[1].body[..120].to_vec();
        delivered.extend_from_slice(&seen[2].body);
        assert_eq!(delivered, data);
    }

    #[tokio::test]
    async fn unrecoverable_client_error_surfaces_the_error_document() {
        let error_body = r#"{"error":{"code":401,"message":"Login Required","errors":[
            {"domain":"global","reason":"required","message":"Login Required",
             "location":"Authorization","locationType":"header"}]}}"#;
        let transport = ScriptedTransport::new(vec![
            init_ok(),
            incomplete(99),
            incomplete(199),
            incomplete(299),
            error_status(404, error_body),
        ]);
        let mut upload = session(transport.clone(), BytesSource::new(payload(453)), 100)
            .build()
            .unwrap();

        let err = upload
            .upload_with_cancellation(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Api(_)));
        assert!(err.to_string().contains(
            "Message[Login Required] Location[Authorization - header] \
             Reason[required] Domain[global]"
        ));

        // Exactly four chunk requests were made after initialization.
        assert_eq!(transport.requests().len(), 5);

        let snapshot = upload.progress();
        assert_eq!(snapshot.status, UploadStatus::Failed);
        assert_eq!(snapshot.bytes_sent, 300);
    }

    #[tokio::test]
    async fn cancellation_stops_the_chunk_loop() {
        let transport = ScriptedTransport::new(vec![
            init_ok(),
            incomplete(99),
            incomplete(199),
            incomplete(299),
            Scripted::CancelInFlight,
        ]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut upload = session(transport.clone(), BytesSource::new(payload(453)), 100)
            .on_progress(move |p| sink.lock().unwrap().push(p.status))
            .build()
            .unwrap();

        let err = upload
            .upload_with_cancellation(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));

        // Five requests were observed; nothing was sent after cancellation.
        assert_eq!(transport.requests().len(), 5);
        let events = events.lock().unwrap().clone();
        assert!(!events.contains(&UploadStatus::Completed));
        assert!(!events.contains(&UploadStatus::Failed));
    }

    // -----------------------------------------------------------------------
    // Recovery idempotence against a stateful fake server
    // -----------------------------------------------------------------------

    /// Transport that behaves like the server side of the protocol: keeps
    /// the received prefix, answers 308 with its cursor, and injects 503s
    /// at the requested ordinals.
    struct FakeServer {
        received: Mutex<Vec<u8>>,
        fail_on: HashSet<usize>,
        calls: AtomicUsize,
    }

    impl FakeServer {
        fn new(fail_on: impl IntoIterator<Item = usize>) -> Arc<Self> {
            Arc::new(Self {
                received: Mutex::new(Vec::new()),
                fail_on: fail_on.into_iter().collect(),
                calls: AtomicUsize::new(0),
            })
        }

        fn received(&self) -> Vec<u8> {
            self.received.lock().unwrap().clone()
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn cursor_response(len: usize) -> HttpResponse {
            let headers = if len == 0 {
                Vec::new()
            } else {
                vec![("Range".into(), format!("bytes 0-{}", len - 1))]
            };
            HttpResponse {
                status: 308,
                headers,
                body: Vec::new(),
            }
        }

        fn handle(&self, request: &HttpRequest) -> HttpResponse {
            if request.url != SESSION_URI {
                return HttpResponse {
                    status: 200,
                    headers: vec![("Location".into(), SESSION_URI.into())],
                    body: Vec::new(),
                };
            }

            let range = request
                .header("Content-Range")
                .expect("chunk request without Content-Range")
                .to_string();
            let mut received = self.received.lock().unwrap();

            // Status query (or the empty-payload special case).
            if let Some(total) = range.strip_prefix("bytes */") {
                if total != "*" {
                    let total: usize = total.parse().unwrap();
                    if received.len() >= total {
                        return HttpResponse {
                            status: 200,
                            headers: Vec::new(),
                            body: Vec::new(),
                        };
                    }
                }
                return Self::cursor_response(received.len());
            }

            // Data chunk.
            let rest = range.strip_prefix("bytes ").unwrap();
            let (span, total) = rest.split_once('/').unwrap();
            let (start, end) = span.split_once('-').unwrap();
            let start: usize = start.parse().unwrap();
            let end: usize = end.parse().unwrap();
            assert_eq!(request.body.len(), end - start + 1, "length/range mismatch");

            if start <= received.len() {
                let skip = received.len() - start;
                if skip <= request.body.len() {
                    let tail = &request.body[skip..];
                    received.extend_from_slice(tail);
                }
            }

            if total != "*" {
                let total: usize = total.parse().unwrap();
                if received.len() >= total {
                    return HttpResponse {
                        status: 200,
                        headers: Vec::new(),
                        body: Vec::new(),
                    };
                }
            }
            Self::cursor_response(received.len())
        }
    }

    impl Transport for FakeServer {
        fn send<'a>(
            &'a self,
            request: &'a HttpRequest,
            _cancel: &'a CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>
        {
            let ordinal = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let response = if self.fail_on.contains(&ordinal) {
                HttpResponse {
                    status: 503,
                    headers: Vec::new(),
                    body: b"try again".to_vec(),
                }
            } else {
                self.handle(request)
            };
            Box::pin(async move { Ok(response) })
        }
    }

    fn fake_session(
        server: Arc<FakeServer>,
        source: impl ByteSource + 'static,
    ) -> ResumableUpload {
        ResumableUpload::builder(
            Arc::new(RetryLayer::new(server).with_backoff(fast_backoff())),
            "/files/upload",
            "POST",
            source,
            "application/octet-stream",
        )
        .base_url(BASE)
        .chunk_size_unchecked(100)
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn recovery_is_idempotent_known_size() {
        let data = payload(453);

        let clean = FakeServer::new([]);
        let progress = fake_session(clean.clone(), BytesSource::new(data.clone()))
            .upload()
            .await;
        assert_eq!(progress.status, UploadStatus::Completed);
        assert_eq!(clean.received(), data);
        assert_eq!(clean.calls(), 6);

        // Same upload with failures injected mid-stream delivers the same
        // bytes and reaches the same terminal state.
        let faulty = FakeServer::new([3, 7]);
        let progress = fake_session(faulty.clone(), BytesSource::new(data.clone()))
            .upload()
            .await;
        assert_eq!(progress.status, UploadStatus::Completed);
        assert_eq!(progress.bytes_sent, 453);
        assert_eq!(faulty.received(), data);
    }

    #[tokio::test]
    async fn recovery_is_idempotent_unknown_size() {
        let data = payload(453);

        let faulty = FakeServer::new([2, 5, 8]);
        let progress = fake_session(
            faulty.clone(),
            ReaderSource::new(std::io::Cursor::new(data.clone())),
        )
        .upload()
        .await;

        assert_eq!(progress.status, UploadStatus::Completed);
        assert_eq!(progress.bytes_sent, 453);
        assert_eq!(faulty.received(), data);
    }

    // -----------------------------------------------------------------------
    // End to end over real HTTP
    // -----------------------------------------------------------------------

    struct CapturedRequest {
        head: String,
        body: Vec<u8>,
    }

    fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    async fn read_request(stream: &mut tokio::net::TcpStream) -> CapturedRequest {
        use tokio::io::AsyncReadExt;

        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        let header_end = loop {
            let n = stream.read(&mut tmp).await.unwrap();
            buf.extend_from_slice(&tmp[..n]);
            if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
                break pos + 4;
            }
            assert!(n > 0, "connection closed before headers ended");
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
        let content_length = head
            .lines()
            .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
            .and_then(|line| line.split(':').nth(1))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);

        let mut body = buf[header_end..].to_vec();
        while body.len() < content_length {
            let n = stream.read(&mut tmp).await.unwrap();
            assert!(n > 0, "connection closed before body ended");
            body.extend_from_slice(&tmp[..n]);
        }
        CapturedRequest { head, body }
    }

    #[tokio::test]
    async fn three_chunk_upload_over_real_http() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;
        use upwire_client::ReqwestTransport;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let base = format!("http://127.0.0.1:{port}");
        let session_uri = format!("{base}/upload/session/xyz");

        let script = vec![
            format!(
                "HTTP/1.1 200 OK\r\nLocation: {session_uri}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            ),
            "HTTP/1.1 308 Resume Incomplete\r\nRange: bytes 0-99\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
            "HTTP/1.1 308 Resume Incomplete\r\nRange: bytes 0-199\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
        ];

        let server = tokio::spawn(async move {
            let mut captured = Vec::new();
            for response in script {
                let (mut stream, _) = listener.accept().await.unwrap();
                captured.push(read_request(&mut stream).await);
                stream.write_all(response.as_bytes()).await.unwrap();
                let _ = stream.shutdown().await;
            }
            captured
        });

        let data = payload(253);
        let layer = Arc::new(RetryLayer::new(Arc::new(ReqwestTransport::new().unwrap())));
        let mut upload = ResumableUpload::builder(
            layer,
            "/files/upload",
            "POST",
            BytesSource::new(data.clone()),
            "application/octet-stream",
        )
        .base_url(base)
        .chunk_size_unchecked(100)
        .build()
        .unwrap();

        let progress = upload
            .upload_with_cancellation(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(progress.status, UploadStatus::Completed);
        assert_eq!(progress.bytes_sent, 253);

        let captured = server.await.unwrap();
        assert_eq!(captured.len(), 4);
        assert!(
            captured[0]
                .head
                .starts_with("POST /files/upload?uploadType=resumable"),
            "unexpected init request line: {}",
            captured[0].head.lines().next().unwrap_or_default()
        );
        assert!(
            captured[0]
                .head
                .to_ascii_lowercase()
                .contains("x-upload-content-length: 253")
        );

        let want_ranges = ["bytes 0-99/253", "bytes 100-199/253", "bytes 200-252/253"];
        for (request, want) in captured[1..].iter().zip(want_ranges) {
            let head = request.head.to_ascii_lowercase();
            assert!(
                head.contains(&format!("content-range: {want}")),
                "missing range {want} in: {head}"
            );
        }

        let delivered: Vec<u8> = captured[1..].iter().flat_map(|r| r.body.clone()).collect();
        assert_eq!(delivered, data);
    }
}
