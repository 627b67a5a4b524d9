//! Request orchestration.
//!
//! [`Transport`] owns the full lifecycle of a call: body serialization and
//! compression, connection selection, the retry loop with its health
//! side-effects, response decoding, and diagnostic event emission. It never
//! touches sockets; the wire lives behind [`Connector`](crate::connection::Connector),
//! and cluster topology discovery behind [`Sniffer`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::compression::{GzipBody, gzip, gunzip};
use crate::connection::{BodyStream, NodeConfig, PreparedBody, RequestParams};
use crate::errors::{TransportError, TransportResult};
use crate::events::{Diagnostic, DiagnosticKind};
use crate::pool::{ConnectionPool, SelectionContext};
use crate::selector::{NodeFilter, NodeSelector};
use crate::serializer::Serializer;

/// Default per-attempt time budget
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries after the initial attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Statuses that indicate a node-level problem rather than a request-level
/// one; the node is marked dead and the request moves to another node
const RETRYABLE_STATUSES: [u16; 3] = [502, 503, 504];

/// User agent sent when neither the transport nor the call provides one
const DEFAULT_USER_AGENT: &str = concat!("clusterlink/", env!("CARGO_PKG_VERSION"));

/// Generates ids for requests that do not carry one
pub type RequestIdGenerator = Arc<dyn Fn(&Request, &RequestOptions) -> String + Send + Sync>;

/// Why a sniff round was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffReason {
    /// First sniff, right after the transport was built
    SniffOnStart,
    /// Periodic refresh driven by the configured interval
    SniffInterval,
    /// A node just failed at the connection level
    SniffOnConnectionFault,
    /// Explicitly requested by the caller
    Default,
}

impl SniffReason {
    /// Canonical kebab-case name, as carried on sniff events
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SniffOnStart => "sniff-on-start",
            Self::SniffInterval => "sniff-interval",
            Self::SniffOnConnectionFault => "sniff-on-connection-fault",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for SniffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topology discovery seam.
///
/// The transport decides when to sniff and applies the result to the pool;
/// how the cluster is interrogated is entirely up to the implementation.
#[async_trait]
pub trait Sniffer: Send + Sync + fmt::Debug {
    /// Discover the current node set
    async fn sniff(&self, reason: SniffReason) -> TransportResult<Vec<NodeConfig>>;
}

/// Request body accepted by [`Transport::request`]
pub enum Body {
    /// No body
    None,
    /// JSON value, serialized by the configured serializer
    Json(Value),
    /// Bulk lines, serialized as newline-delimited JSON
    NdJson(Vec<Value>),
    /// Pre-rendered text, sent as-is
    Text(String),
    /// Raw bytes, sent as-is
    Binary(Bytes),
    /// Chunked body; consumable once, which disables retries for the request
    Stream(BodyStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Json(_) => f.write_str("Json"),
            Self::NdJson(lines) => f.debug_tuple("NdJson").field(&lines.len()).finish(),
            Self::Text(t) => f.debug_tuple("Text").field(&t.len()).finish(),
            Self::Binary(b) => f.debug_tuple("Binary").field(&b.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// One API call, method and path plus optional body and query parameters
#[derive(Debug)]
pub struct Request {
    /// HTTP method, uppercase
    pub method: String,
    /// Request path, with a leading slash
    pub path: String,
    /// Request body
    pub body: Body,
    /// Query parameters; keys sort lexicographically in the encoded string
    pub querystring: BTreeMap<String, String>,
}

impl Request {
    /// Build a body-less request
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            path: path.into(),
            body: Body::None,
            querystring: BTreeMap::new(),
        }
    }

    /// Shorthand for a GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    /// Shorthand for a POST request
    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    /// Shorthand for a HEAD request
    pub fn head(path: impl Into<String>) -> Self {
        Self::new("HEAD", path)
    }

    /// Attach a body
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Add a query parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.querystring.insert(key.into(), value.into());
        self
    }
}

/// Per-call overrides for transport defaults
#[derive(Default)]
pub struct RequestOptions {
    /// Response statuses to treat as success instead of failure
    pub ignore: Vec<u16>,
    /// Per-attempt time budget override
    pub request_timeout: Option<Duration>,
    /// Retry budget override
    pub max_retries: Option<u32>,
    /// Request compression override
    pub compression: Option<bool>,
    /// Extra headers; override transport defaults on conflict
    pub headers: HashMap<String, String>,
    /// Extra query parameters; override the request's own on conflict
    pub querystring: BTreeMap<String, String>,
    /// Explicit request id; wins over the generator and the counter
    pub id: Option<String>,
    /// Caller context, merged over the transport-level context
    pub context: Option<Value>,
    /// Value for the `x-opaque-id` header, prefixed if a prefix is configured
    pub opaque_id: Option<String>,
    /// Cooperative cancellation handle
    pub cancellation: Option<CancellationToken>,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("ignore", &self.ignore)
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Metadata describing one request's lifecycle.
///
/// Attached to every response and to every transport error that has a
/// request to describe, and carried on diagnostic events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    /// Request id: caller-provided, generated, or counter-assigned
    pub request_id: String,
    /// Client name, for multi-client deployments
    pub name: String,
    /// Merged caller context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Diagnostic view of the last connection used, if one was selected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<Value>,
    /// Retries performed, not counting the initial attempt
    pub attempts: u32,
    /// Whether the request was cancelled
    pub aborted: bool,
}

/// Decoded response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// No body
    Empty,
    /// HEAD existence result
    Bool(bool),
    /// Parsed JSON body
    Json(Value),
    /// Non-JSON text body
    Text(String),
    /// Binary body
    Binary(Bytes),
}

impl ResponseBody {
    /// The parsed JSON value, if this body is JSON
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The boolean result of a HEAD request, if applicable
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

/// Final decoded response handed to the caller
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, lowercase keys
    pub headers: HashMap<String, String>,
    /// Decoded body
    pub body: ResponseBody,
    /// Request lifecycle metadata
    pub meta: RequestMeta,
}

impl HttpResponse {
    /// Deprecation warnings sent by the server, split per RFC 7234.
    ///
    /// Commas inside quoted warning text do not split; `None` when the
    /// header is absent.
    pub fn warnings(&self) -> Option<Vec<String>> {
        let header = self.headers.get("warning")?;
        Some(split_warnings(header))
    }
}

/// Split a `warning` header on commas that sit outside quoted segments
fn split_warnings(header: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in header.chars() {
        match c {
            '\\' if in_quotes && !escaped => {
                escaped = true;
                current.push(c);
            }
            '"' if !escaped => {
                in_quotes = !in_quotes;
                current.push(c);
                escaped = false;
            }
            ',' if !in_quotes => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    warnings.push(trimmed.to_string());
                }
                current.clear();
                escaped = false;
            }
            _ => {
                current.push(c);
                escaped = false;
            }
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        warnings.push(trimmed.to_string());
    }
    warnings
}

/// Current time in epoch milliseconds
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Serialized-and-compressed body, ready for the connector
enum ReadyBody {
    None,
    Buffered(Bytes),
    // Taken on the first (and only) attempt
    Stream(Option<BodyStream>),
}

pub(crate) struct TransportParts {
    pub pool: Arc<dyn ConnectionPool>,
    pub diagnostic: Arc<Diagnostic>,
    pub serializer: Arc<dyn Serializer>,
    pub name: String,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub compression: bool,
    pub headers: HashMap<String, String>,
    pub context: Option<Value>,
    pub opaque_id_prefix: Option<String>,
    pub generate_request_id: Option<RequestIdGenerator>,
    pub sniffer: Option<Arc<dyn Sniffer>>,
    pub sniff_interval: Option<Duration>,
    pub sniff_on_connection_fault: bool,
    pub sniff_on_start: bool,
    pub filter: Option<NodeFilter>,
    pub selector: Option<NodeSelector>,
}

/// The request orchestrator.
///
/// Cheap to share: every piece of state lives behind an `Arc` or an atomic,
/// so one transport serves arbitrarily many concurrent callers.
pub struct Transport {
    pool: Arc<dyn ConnectionPool>,
    diagnostic: Arc<Diagnostic>,
    serializer: Arc<dyn Serializer>,
    name: String,
    max_retries: u32,
    request_timeout: Duration,
    compression: bool,
    headers: HashMap<String, String>,
    context: Option<Value>,
    opaque_id_prefix: Option<String>,
    generate_request_id: Option<RequestIdGenerator>,
    sniffer: Option<Arc<dyn Sniffer>>,
    sniff_interval: Option<Duration>,
    sniff_on_connection_fault: bool,
    filter: Option<NodeFilter>,
    selector: Option<NodeSelector>,
    is_sniffing: Arc<AtomicBool>,
    next_sniff_at: AtomicU64,
    request_counter: AtomicU32,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .field("request_timeout", &self.request_timeout)
            .field("compression", &self.compression)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub(crate) fn from_parts(parts: TransportParts) -> Self {
        let transport = Self {
            pool: parts.pool,
            diagnostic: parts.diagnostic,
            serializer: parts.serializer,
            name: parts.name,
            max_retries: parts.max_retries,
            request_timeout: parts.request_timeout,
            compression: parts.compression,
            headers: parts.headers,
            context: parts.context,
            opaque_id_prefix: parts.opaque_id_prefix,
            generate_request_id: parts.generate_request_id,
            sniffer: parts.sniffer,
            sniff_interval: parts.sniff_interval,
            sniff_on_connection_fault: parts.sniff_on_connection_fault,
            filter: parts.filter,
            selector: parts.selector,
            is_sniffing: Arc::new(AtomicBool::new(false)),
            next_sniff_at: AtomicU64::new(
                parts
                    .sniff_interval
                    .map_or(u64::MAX, |i| now_ms() + i.as_millis() as u64),
            ),
            request_counter: AtomicU32::new(0),
        };
        if parts.sniff_on_start {
            transport.schedule_sniff(SniffReason::SniffOnStart, "initial");
        }
        transport
    }

    /// The diagnostic bus this transport emits on
    pub fn diagnostic(&self) -> &Arc<Diagnostic> {
        &self.diagnostic
    }

    /// The pool this transport selects from
    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }

    /// Client name carried on events and metadata
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close every connection and stop serving
    pub async fn close(&self) {
        self.pool.empty().await;
    }

    /// Start a sniff round on behalf of the caller
    pub fn sniff(&self) {
        self.schedule_sniff(SniffReason::Default, "manual");
    }

    /// Perform one orchestrated request: serialize, select, send, retry,
    /// decode. Every terminal outcome, success or failure, emits exactly one
    /// response event.
    pub async fn request(
        &self,
        request: Request,
        options: RequestOptions,
    ) -> TransportResult<HttpResponse> {
        let request_id = self.assign_request_id(&request, &options);
        let mut meta = RequestMeta {
            request_id,
            name: self.name.clone(),
            context: merge_context(self.context.as_ref(), options.context.as_ref()),
            method: request.method.clone(),
            path: request.path.clone(),
            connection: None,
            attempts: 0,
            aborted: false,
        };

        let cancel = options
            .cancellation
            .clone()
            .unwrap_or_else(CancellationToken::new);

        match self.execute(request, &options, &mut meta, &cancel).await {
            Ok(response) => {
                self.emit_response(&response.meta, Some(&response), None);
                Ok(response)
            }
            Err(err) => {
                let err = err.with_meta(meta.clone());
                self.emit_response(&meta, None, Some(&err));
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        request: Request,
        options: &RequestOptions,
        meta: &mut RequestMeta,
        cancel: &CancellationToken,
    ) -> TransportResult<HttpResponse> {
        let Request {
            method,
            path,
            body,
            querystring,
        } = request;
        let compression = options.compression.unwrap_or(self.compression);
        let mut headers = self.base_headers(options);
        let mut body = self.prepare_body(body, compression, &mut headers, meta)?;
        let querystring = self.encode_querystring(&querystring, options);

        // A stream can be sent once, so a streamed request is never retried
        let max_retries = if matches!(body, ReadyBody::Stream(_)) {
            0
        } else {
            options.max_retries.unwrap_or(self.max_retries)
        };
        let timeout = options.request_timeout.unwrap_or(self.request_timeout);
        let is_head = method == "HEAD";

        loop {
            if cancel.is_cancelled() {
                meta.aborted = true;
                return Err(TransportError::RequestAborted { meta: None });
            }

            // Interval check sits in the acquire phase so a long-running
            // retry sequence still refreshes the topology
            if self.sniff_interval.is_some()
                && now_ms() >= self.next_sniff_at.load(Ordering::Acquire)
            {
                self.schedule_sniff(SniffReason::SniffInterval, &meta.request_id);
            }

            let ctx = SelectionContext {
                filter: self.filter.clone(),
                selector: self.selector.clone(),
                request_id: meta.request_id.clone(),
                name: self.name.clone(),
                now_ms: now_ms(),
            };
            let Some(connection) = self.pool.get_connection(&ctx).await else {
                return Err(TransportError::NoLivingConnections { meta: None });
            };
            meta.connection = Some(connection.diagnostic_view());

            let mut attempt_headers = headers.clone();
            for (key, value) in connection.headers() {
                attempt_headers
                    .entry(key.to_lowercase())
                    .or_insert_with(|| value.clone());
            }
            let params = RequestParams {
                method: method.clone(),
                path: path.clone(),
                headers: attempt_headers,
                querystring: querystring.clone(),
                body: take_attempt_body(&mut body),
                timeout: Some(timeout),
            };

            self.diagnostic.emit(
                DiagnosticKind::Request,
                None,
                json!({ "request": meta_value(meta) }),
            );
            trace!(
                id = %meta.request_id,
                method = %method,
                path = %path,
                attempt = meta.attempts,
                "sending request"
            );

            // Set when this attempt already condemned the node, so a later
            // step of the same attempt cannot contradict the verdict
            let mut marked_dead = false;

            let raw = match connection.request(params, cancel).await {
                Ok(raw) => raw,
                Err(err) => {
                    if cancel.is_cancelled() {
                        meta.aborted = true;
                        return Err(TransportError::RequestAborted { meta: None });
                    }
                    if err.is_retryable() {
                        self.pool.mark_dead(&connection, now_ms());
                        if self.sniff_on_connection_fault {
                            self.schedule_sniff(
                                SniffReason::SniffOnConnectionFault,
                                &meta.request_id,
                            );
                        }
                        if meta.attempts < max_retries {
                            meta.attempts += 1;
                            debug!(
                                id = %meta.request_id,
                                attempt = meta.attempts,
                                "retrying after connection failure"
                            );
                            continue;
                        }
                    }
                    return Err(err);
                }
            };

            let status = raw.status;
            let ignored = options.ignore.contains(&status) || (is_head && status == 404);

            if RETRYABLE_STATUSES.contains(&status) && !ignored {
                self.pool.mark_dead(&connection, now_ms());
                marked_dead = true;
                if meta.attempts < max_retries {
                    meta.attempts += 1;
                    debug!(
                        id = %meta.request_id,
                        status,
                        attempt = meta.attempts,
                        "retrying after gateway status"
                    );
                    continue;
                }
            }

            if !marked_dead {
                self.pool.mark_alive(&connection);
            }

            let decoded = self.decode_body(&raw, is_head, meta)?;
            let response = HttpResponse {
                status,
                headers: raw.headers,
                body: decoded,
                meta: meta.clone(),
            };

            if status >= 400 && !ignored {
                return Err(TransportError::Response(Box::new(response)));
            }
            return Ok(response);
        }
    }

    /// Serialize and optionally compress the body, filling in the
    /// content-type, content-encoding, and content-length headers
    fn prepare_body(
        &self,
        body: Body,
        compression: bool,
        headers: &mut HashMap<String, String>,
        meta: &RequestMeta,
    ) -> TransportResult<ReadyBody> {
        let (buffered, content_type): (Option<Bytes>, Option<&str>) = match body {
            Body::None => (None, None),
            Body::Json(value) => {
                self.diagnostic.emit(
                    DiagnosticKind::Serialization,
                    None,
                    json!({ "request": meta_value(meta) }),
                );
                let text = self.serializer.serialize(&value)?;
                (Some(Bytes::from(text)), Some("application/json"))
            }
            Body::NdJson(lines) => {
                self.diagnostic.emit(
                    DiagnosticKind::Serialization,
                    None,
                    json!({ "request": meta_value(meta) }),
                );
                let text = self.serializer.ndserialize(&lines)?;
                (Some(Bytes::from(text)), Some("application/x-ndjson"))
            }
            Body::Text(text) => (Some(Bytes::from(text)), Some("text/plain")),
            Body::Binary(bytes) => (Some(bytes), Some("application/octet-stream")),
            Body::Stream(stream) => {
                headers
                    .entry("content-type".to_string())
                    .or_insert_with(|| "application/json".to_string());
                if compression {
                    headers.insert("content-encoding".to_string(), "gzip".to_string());
                    let compressed: BodyStream = Box::pin(GzipBody::new(stream));
                    return Ok(ReadyBody::Stream(Some(compressed)));
                }
                return Ok(ReadyBody::Stream(Some(stream)));
            }
        };

        let Some(bytes) = buffered else {
            return Ok(ReadyBody::None);
        };
        if let Some(content_type) = content_type {
            headers
                .entry("content-type".to_string())
                .or_insert_with(|| content_type.to_string());
        }

        let bytes = if compression && !bytes.is_empty() {
            headers.insert("content-encoding".to_string(), "gzip".to_string());
            gzip(&bytes)?
        } else {
            bytes
        };
        headers.insert("content-length".to_string(), bytes.len().to_string());
        Ok(ReadyBody::Buffered(bytes))
    }

    fn decode_body(
        &self,
        raw: &crate::connection::RawResponse,
        is_head: bool,
        meta: &RequestMeta,
    ) -> TransportResult<ResponseBody> {
        if is_head {
            return Ok(ResponseBody::Bool(raw.status < 300));
        }

        let body = if raw
            .headers
            .get("content-encoding")
            .is_some_and(|e| e.contains("gzip"))
        {
            gunzip(&raw.body)?
        } else {
            raw.body.clone()
        };
        if body.is_empty() {
            return Ok(ResponseBody::Empty);
        }

        let content_type = raw.headers.get("content-type").map_or("", String::as_str);
        if content_type.contains("application/json")
            || content_type.contains("application/x-ndjson")
        {
            self.diagnostic.emit(
                DiagnosticKind::Deserialization,
                None,
                json!({ "request": meta_value(meta) }),
            );
            let text = std::str::from_utf8(&body)
                .map_err(|e| TransportError::Deserialization(format!("invalid utf-8: {e}")))?;
            return Ok(ResponseBody::Json(self.serializer.deserialize(text)?));
        }
        match std::str::from_utf8(&body) {
            Ok(text) => Ok(ResponseBody::Text(text.to_string())),
            Err(_) => Ok(ResponseBody::Binary(body)),
        }
    }

    fn base_headers(&self, options: &RequestOptions) -> HashMap<String, String> {
        let mut headers = HashMap::from([(
            "user-agent".to_string(),
            DEFAULT_USER_AGENT.to_string(),
        )]);
        for (key, value) in &self.headers {
            headers.insert(key.to_lowercase(), value.clone());
        }
        for (key, value) in &options.headers {
            headers.insert(key.to_lowercase(), value.clone());
        }
        if let Some(opaque_id) = &options.opaque_id {
            let value = match &self.opaque_id_prefix {
                Some(prefix) => format!("{prefix}{opaque_id}"),
                None => opaque_id.clone(),
            };
            headers.insert("x-opaque-id".to_string(), value);
        }
        if self.compression {
            headers
                .entry("accept-encoding".to_string())
                .or_insert_with(|| "gzip".to_string());
        }
        headers
    }

    fn encode_querystring(
        &self,
        querystring: &BTreeMap<String, String>,
        options: &RequestOptions,
    ) -> Option<String> {
        let mut params = querystring.clone();
        for (key, value) in &options.querystring {
            params.insert(key.clone(), value.clone());
        }
        if params.is_empty() {
            return None;
        }
        Some(self.serializer.qserialize(&params))
    }

    fn assign_request_id(&self, request: &Request, options: &RequestOptions) -> String {
        if let Some(id) = &options.id {
            return id.clone();
        }
        if let Some(generator) = &self.generate_request_id {
            return generator(request, options);
        }
        next_request_id(&self.request_counter)
    }

    fn emit_response(
        &self,
        meta: &RequestMeta,
        response: Option<&HttpResponse>,
        error: Option<&TransportError>,
    ) {
        let mut payload = json!({ "request": meta_value(meta) });
        if let Some(response) = response {
            payload["response"] = json!({
                "statusCode": response.status,
                "headers": response.headers,
            });
        }
        if error.is_some() {
            warn!(
                id = %meta.request_id,
                attempts = meta.attempts,
                "request failed"
            );
        }
        self.diagnostic
            .emit(DiagnosticKind::Response, error.cloned(), payload);
    }

    /// Start a sniff round in the background, unless one is already running.
    ///
    /// Selection and in-flight requests never wait on discovery; the pool is
    /// updated when the round completes.
    fn schedule_sniff(&self, reason: SniffReason, request_id: &str) {
        let Some(sniffer) = self.sniffer.clone() else {
            return;
        };
        if self.is_sniffing.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(interval) = self.sniff_interval {
            self.next_sniff_at
                .store(now_ms() + interval.as_millis() as u64, Ordering::Release);
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.is_sniffing.store(false, Ordering::Release);
            return;
        };

        let pool = self.pool.clone();
        let diagnostic = self.diagnostic.clone();
        let name = self.name.clone();
        let request_id = request_id.to_string();
        let in_flight = self.is_sniffing.clone();
        handle.spawn(async move {
            debug!(reason = reason.as_str(), "sniff round started");
            let payload = |hosts: usize| {
                json!({
                    "reason": reason.as_str(),
                    "hosts": hosts,
                    "name": name,
                    "request": { "id": request_id },
                })
            };
            match sniffer.sniff(reason).await {
                Ok(nodes) => {
                    let hosts = nodes.len();
                    let error = pool.update(nodes).err();
                    diagnostic.emit(DiagnosticKind::Sniff, error, payload(hosts));
                }
                Err(err) => {
                    warn!(reason = reason.as_str(), "sniff round failed");
                    diagnostic.emit(DiagnosticKind::Sniff, Some(err), payload(0));
                }
            }
            in_flight.store(false, Ordering::Release);
        });
    }
}

/// Counter-assigned request ids cycle exactly through 1..=2^31-1, so the
/// sequence never jumps when the underlying integer would overflow
fn next_request_id(counter: &AtomicU32) -> String {
    let n = counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            Some((n + 1) % 0x7fff_ffff)
        })
        .unwrap_or(0);
    (n + 1).to_string()
}

/// Pull the body for one attempt; buffered bodies replay cheaply, streams
/// are surrendered on first use
fn take_attempt_body(body: &mut ReadyBody) -> Option<PreparedBody> {
    match body {
        ReadyBody::None => None,
        ReadyBody::Buffered(bytes) => Some(PreparedBody::Bytes(bytes.clone())),
        ReadyBody::Stream(stream) => stream.take().map(PreparedBody::Stream),
    }
}

/// Shallow-merge two context objects, the override winning per key
fn merge_context(base: Option<&Value>, overlay: Option<&Value>) -> Option<Value> {
    match (base, overlay) {
        (None, None) => None,
        (Some(value), None) | (None, Some(value)) => Some(value.clone()),
        (Some(Value::Object(base)), Some(Value::Object(overlay))) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Some(Value::Object(merged))
        }
        (_, Some(overlay)) => Some(overlay.clone()),
    }
}

fn meta_value(meta: &RequestMeta) -> Value {
    serde_json::to_value(meta).unwrap_or(Value::Null)
}

impl FromStr for Request {
    type Err = TransportError;

    /// Parse `"METHOD /path"` into a body-less request
    fn from_str(s: &str) -> TransportResult<Self> {
        let mut parts = s.splitn(2, ' ');
        let method = parts
            .next()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| TransportError::Configuration("empty request line".to_string()))?;
        let path = parts
            .next()
            .ok_or_else(|| TransportError::Configuration("request line has no path".to_string()))?;
        Ok(Self::new(method, path))
    }
}
