//! # HTTP Stream Client
//!
//! Owns one long-lived HTTP GET against a firehose endpoint at a time. Each
//! call to [`StreamClient::connect`] is one *session*: a fresh
//! [`FrameBuffer`], the response body fed chunk by chunk into it, and every
//! complete record handed to a [`StreamObserver`] in arrival order.
//!
//! The session ends on a clean close, on a transport error or when the
//! shutdown token fires. Reconnecting is not this module's concern; see
//! [`firehose`](super::firehose).

use std::future::Future;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::framing::{FrameBuffer, Framing, RawRecord};

/// Connect timeout for firehose connections (2^16 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(65_536);
/// Read timeout between chunks (2^16 seconds). Firehoses go quiet for long stretches.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(65_536);

/// Errors raised by a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be built (bad header, bad URL).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Response status code.
        status: u16,
        /// Response body, as far as it could be read.
        body: String,
    },
    /// The response body broke off mid-stream.
    #[error("stream read failed: {0}")]
    Read(String),
}

/// Everything needed to open a stream.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Full endpoint URL.
    pub url: String,
    /// Basic-auth user. Empty disables authentication.
    pub user_name: String,
    /// Basic-auth password, already decoded.
    pub password: String,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Ask for a gzip-compressed response body.
    pub compressed: bool,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Maximum silence between two chunks.
    pub idle_timeout: Duration,
}

impl StreamRequest {
    /// A request for `url` with the default timeouts and compression on.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_name: String::new(),
            password: String::new(),
            headers: Vec::new(),
            compressed: true,
            connect_timeout: CONNECT_TIMEOUT,
            idle_timeout: IDLE_TIMEOUT,
        }
    }

    /// Sets basic-auth credentials.
    pub fn with_credentials(mut self, user_name: impl Into<String>, password: impl Into<String>) -> Self {
        self.user_name = user_name.into();
        self.password = password.into();
        self
    }

    /// Adds a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Body of an open stream, one `Bytes` per received chunk.
pub type ChunkStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// An established connection.
pub struct Connection {
    /// Response status code.
    pub status: u16,
    /// Response body chunks.
    pub chunks: ChunkStream,
}

/// Opens streaming HTTP connections.
///
/// Kept as a trait so sessions can be driven by scripted transports in tests.
pub trait Transport: Send + Sync {
    /// Performs the GET and returns the body stream once a success status arrived.
    fn connect(&self, request: &StreamRequest) -> impl Future<Output = Result<Connection, TransportError>> + Send;
}

/// [`Transport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds the client with the timeouts and compression setting of `request`.
    pub fn new(request: &StreamRequest) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(request.connect_timeout)
            .read_timeout(request.idle_timeout)
            .gzip(request.compressed)
            .user_agent(concat!("lib_stream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self { client })
    }

    fn headers(request: &StreamRequest) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
            headers.insert(name, value);
        }
        if !request.compressed {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        }
        Ok(headers)
    }
}

impl Transport for ReqwestTransport {
    fn connect(&self, request: &StreamRequest) -> impl Future<Output = Result<Connection, TransportError>> + Send {
        let client = self.client.clone();
        let request = request.clone();
        async move {
            let mut builder = client.get(&request.url).headers(Self::headers(&request)?);
            if !request.user_name.is_empty() {
                builder = builder.basic_auth(&request.user_name, Some(&request.password));
            }

            let response = builder.send().await.map_err(|e| TransportError::Connect(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    body: body.trim().to_string(),
                });
            }

            let chunks = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| TransportError::Read(e.to_string())))
                .boxed();
            Ok(Connection {
                status: status.as_u16(),
                chunks,
            })
        }
    }
}

/// Snapshot of a session handed to observer callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    /// Endpoint of the session.
    pub url: String,
    /// Response status, once known.
    pub status: Option<u16>,
    /// Chunks received.
    pub chunks: u64,
    /// Bytes received.
    pub bytes: u64,
    /// Records extracted.
    pub records: u64,
    /// Time since the session started.
    pub elapsed: Duration,
}

impl ConnectionContext {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            status: None,
            chunks: 0,
            bytes: 0,
            records: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// Receives the events of one session.
pub trait StreamObserver: Send {
    /// A complete record, in stream order. The next chunk is read only after this resolves.
    fn on_record(&mut self, record: RawRecord) -> impl Future<Output = ()> + Send;

    /// The server ended the response body.
    fn on_connection_close(&mut self, context: &ConnectionContext);

    /// The connection failed to open or broke off.
    fn on_error(&mut self, context: &ConnectionContext, error: &TransportError);
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server closed the stream.
    Closed,
    /// A transport error ended or prevented the session.
    Failed,
    /// The shutdown token fired.
    Cancelled,
}

/// Firehose client bound to one endpoint and one framing.
pub struct StreamClient<T> {
    transport: T,
    request: StreamRequest,
    framing: Framing,
    shutdown: CancellationToken,
    next_sequence: u64,
}

impl<T: Transport> StreamClient<T> {
    /// Creates a client. Nothing is opened until [`connect`](Self::connect).
    pub fn new(transport: T, request: StreamRequest, framing: Framing, shutdown: CancellationToken) -> Self {
        Self {
            transport,
            request,
            framing,
            shutdown,
            next_sequence: 0,
        }
    }

    /// A client framing compact JSON lines.
    pub fn json(transport: T, request: StreamRequest, shutdown: CancellationToken) -> Self {
        Self::new(transport, request, Framing::Json, shutdown)
    }

    /// A client framing Atom `<entry>` elements.
    pub fn xml(transport: T, request: StreamRequest, shutdown: CancellationToken) -> Self {
        Self::new(transport, request, Framing::Xml, shutdown)
    }

    /// Endpoint this client connects to.
    pub fn url(&self) -> &str {
        &self.request.url
    }

    /// Framing policy of this client.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Token that ends the current session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs one session to completion.
    ///
    /// Exactly one of `on_connection_close` and `on_error` is called unless
    /// the session was cancelled.
    pub async fn connect<O: StreamObserver>(&mut self, observer: &mut O) -> SessionEnd {
        let started = Instant::now();
        let mut context = ConnectionContext::new(&self.request.url);
        log::info!("Connecting to {} stream: {}", self.framing, self.request.url);

        let opened = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return SessionEnd::Cancelled,
            opened = self.transport.connect(&self.request) => opened,
        };

        let mut connection = match opened {
            Ok(connection) => connection,
            Err(e) => {
                context.elapsed = started.elapsed();
                log::error!("Connection to {} failed: {}", self.request.url, e);
                observer.on_error(&context, &e);
                return SessionEnd::Failed;
            }
        };
        context.status = Some(connection.status);
        log::info!("Stream connected ({}): {}", connection.status, self.request.url);

        let mut buffer = FrameBuffer::starting_at(self.framing, self.next_sequence);
        let end = loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break SessionEnd::Cancelled,
                next = connection.chunks.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    context.chunks += 1;
                    context.bytes += chunk.len() as u64;
                    buffer.process(&chunk);
                    for record in buffer.complete_entries() {
                        context.records += 1;
                        observer.on_record(record).await;
                    }
                }
                Some(Err(e)) => {
                    context.elapsed = started.elapsed();
                    log::error!("Stream {} broke off: {}", self.request.url, e);
                    observer.on_error(&context, &e);
                    break SessionEnd::Failed;
                }
                None => {
                    context.elapsed = started.elapsed();
                    log::warn!(
                        "Stream {} closed by remote host after {} records",
                        self.request.url,
                        context.records
                    );
                    observer.on_connection_close(&context);
                    break SessionEnd::Closed;
                }
            }
        };

        self.next_sequence = buffer.next_sequence();
        if !buffer.pending().is_empty() {
            log::debug!("Discarding {} unframed bytes from ended session", buffer.pending().len());
        }
        end
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    /// What a scripted connection attempt does.
    pub(crate) enum Script {
        /// Refuse to connect.
        Refuse(&'static str),
        /// Deliver these chunks, then close cleanly.
        Chunks(Vec<&'static [u8]>),
        /// Deliver these chunks, then break with a read error.
        ChunksThenError(Vec<&'static [u8]>),
        /// Deliver these chunks, then stay open forever.
        ChunksThenHang(Vec<&'static [u8]>),
    }

    /// Transport that replays one script per connect call and counts calls.
    #[derive(Clone)]
    pub(crate) struct ScriptedTransport {
        scripts: Arc<Mutex<VecDeque<Script>>>,
        pub(crate) connects: Arc<Mutex<u32>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Arc::new(Mutex::new(scripts.into())),
                connects: Arc::new(Mutex::new(0)),
            }
        }

        pub(crate) fn connect_count(&self) -> u32 {
            *self.connects.lock().unwrap()
        }
    }

    impl Transport for ScriptedTransport {
        fn connect(&self, _request: &StreamRequest) -> impl Future<Output = Result<Connection, TransportError>> + Send {
            *self.connects.lock().unwrap() += 1;
            let script = self.scripts.lock().unwrap().pop_front();
            async move {
                let chunk_stream = |chunks: Vec<&'static [u8]>| {
                    futures_util::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
                };
                match script.unwrap_or(Script::Refuse("no script left")) {
                    Script::Refuse(reason) => Err(TransportError::Connect(reason.to_string())),
                    Script::Chunks(chunks) => Ok(Connection {
                        status: 200,
                        chunks: chunk_stream(chunks).boxed(),
                    }),
                    Script::ChunksThenError(chunks) => Ok(Connection {
                        status: 200,
                        chunks: chunk_stream(chunks)
                            .chain(futures_util::stream::once(async {
                                Err(TransportError::Read("connection reset".to_string()))
                            }))
                            .boxed(),
                    }),
                    Script::ChunksThenHang(chunks) => Ok(Connection {
                        status: 200,
                        chunks: chunk_stream(chunks).chain(futures_util::stream::pending()).boxed(),
                    }),
                }
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        records: Vec<(u64, String)>,
        closes: Vec<ConnectionContext>,
        errors: Vec<String>,
    }

    impl StreamObserver for Recorder {
        fn on_record(&mut self, record: RawRecord) -> impl Future<Output = ()> + Send {
            self.records
                .push((record.sequence(), record.to_text().unwrap().to_string()));
            std::future::ready(())
        }

        fn on_connection_close(&mut self, context: &ConnectionContext) {
            self.closes.push(context.clone());
        }

        fn on_error(&mut self, _context: &ConnectionContext, error: &TransportError) {
            self.errors.push(error.to_string());
        }
    }

    fn request() -> StreamRequest {
        StreamRequest::new("http://stream.test/track.json")
    }

    #[tokio::test]
    async fn test_records_split_across_chunks_arrive_in_order() {
        let transport = ScriptedTransport::new(vec![Script::Chunks(vec![
            b"{\"id\":\"1\"}\r\n{\"id\"",
            b":\"2\"}\r",
            b"\n\r\n{\"id\":\"3\"}\r\n",
        ])]);
        let mut client = StreamClient::json(transport, request(), CancellationToken::new());
        let mut observer = Recorder::default();

        assert_eq!(client.connect(&mut observer).await, SessionEnd::Closed);
        let bodies: Vec<&str> = observer.records.iter().map(|(_, b)| b.as_str()).collect();
        assert_eq!(bodies, vec!["{\"id\":\"1\"}", "{\"id\":\"2\"}", "{\"id\":\"3\"}"]);
        assert_eq!(observer.closes.len(), 1);
        assert_eq!(observer.closes[0].chunks, 3);
        assert_eq!(observer.closes[0].records, 3);
        assert!(observer.errors.is_empty());
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error_only() {
        let transport = ScriptedTransport::new(vec![Script::Refuse("connection refused")]);
        let mut client = StreamClient::json(transport, request(), CancellationToken::new());
        let mut observer = Recorder::default();

        assert_eq!(client.connect(&mut observer).await, SessionEnd::Failed);
        assert_eq!(observer.errors, vec!["connection failed: connection refused".to_string()]);
        assert!(observer.closes.is_empty());
    }

    #[tokio::test]
    async fn test_broken_stream_keeps_delivered_records() {
        let transport = ScriptedTransport::new(vec![Script::ChunksThenError(vec![b"{\"id\":\"1\"}\r\n{\"id\":\"par"])]);
        let mut client = StreamClient::json(transport, request(), CancellationToken::new());
        let mut observer = Recorder::default();

        assert_eq!(client.connect(&mut observer).await, SessionEnd::Failed);
        assert_eq!(observer.records.len(), 1);
        assert_eq!(observer.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_new_session_starts_with_empty_buffer_and_continues_sequence() {
        let transport = ScriptedTransport::new(vec![
            Script::Chunks(vec![b"{\"id\":\"1\"}\r\n{\"id\":\"trunc"]),
            Script::Chunks(vec![b"{\"id\":\"2\"}\r\n"]),
        ]);
        let mut client = StreamClient::json(transport, request(), CancellationToken::new());
        let mut observer = Recorder::default();

        client.connect(&mut observer).await;
        client.connect(&mut observer).await;

        // The truncated tail of the first session never leaks into the second.
        assert_eq!(
            observer.records,
            vec![(0, "{\"id\":\"1\"}".to_string()), (1, "{\"id\":\"2\"}".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cancel_ends_hanging_session() {
        let transport = ScriptedTransport::new(vec![Script::ChunksThenHang(vec![b"{\"id\":\"1\"}\r\n"])]);
        let shutdown = CancellationToken::new();
        let mut client = StreamClient::json(transport, request(), shutdown.clone());

        let handle = tokio::spawn(async move {
            let mut observer = Recorder::default();
            let end = client.connect(&mut observer).await;
            (end, observer.records.len(), observer.closes.len(), observer.errors.len())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        assert_eq!(handle.await.unwrap(), (SessionEnd::Cancelled, 1, 0, 0));
    }

    #[tokio::test]
    async fn test_xml_client_frames_entries() {
        let transport = ScriptedTransport::new(vec![Script::Chunks(vec![
            b"<?xml version=\"1.0\"?><feed><entry><id>1</id>",
            b"</entry><entry><id>2</id></entry>",
        ])]);
        let mut client = StreamClient::xml(transport, request(), CancellationToken::new());
        let mut observer = Recorder::default();

        client.connect(&mut observer).await;
        assert_eq!(observer.records.len(), 2);
        assert_eq!(observer.records[1].1, "<entry><id>2</id></entry>");
    }

    /// Serves one canned HTTP response and hands back the raw request text.
    fn serve_once(response: &'static str) -> (String, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{}/accounts/acme/publishers/twitter/streams/track/prod.json", addr), handle)
    }

    #[tokio::test]
    async fn test_reqwest_transport_streams_chunked_body_with_basic_auth() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n\
             c\r\n{\"id\":\"1\"}\r\n\r\n\
             c\r\n{\"id\":\"2\"}\r\n\r\n\
             0\r\n\r\n",
        );
        let request = StreamRequest::new(url).with_credentials("user", "pass");
        let transport = ReqwestTransport::new(&request).unwrap();
        let mut client = StreamClient::json(transport, request, CancellationToken::new());
        let mut observer = Recorder::default();

        assert_eq!(client.connect(&mut observer).await, SessionEnd::Closed);
        assert_eq!(observer.records.len(), 2);
        assert_eq!(observer.closes[0].status, Some(200));

        let raw_request = server.join().unwrap().to_lowercase();
        // base64("user:pass")
        assert!(raw_request.contains("authorization: basic dxnlcjpwyxnz"));
        assert!(raw_request.contains("accept-encoding: gzip"));
    }

    #[tokio::test]
    async fn test_reqwest_transport_rejects_error_status() {
        let (url, server) = serve_once(
            "HTTP/1.1 401 Unauthorized\r\nContent-Length: 12\r\nConnection: close\r\n\r\nUnauthorized",
        );
        let request = StreamRequest::new(url).with_credentials("user", "wrong");
        let transport = ReqwestTransport::new(&request).unwrap();
        let mut client = StreamClient::json(transport, request, CancellationToken::new());
        let mut observer = Recorder::default();

        assert_eq!(client.connect(&mut observer).await, SessionEnd::Failed);
        assert_eq!(observer.errors, vec!["HTTP 401: Unauthorized".to_string()]);
        server.join().unwrap();
    }
}
