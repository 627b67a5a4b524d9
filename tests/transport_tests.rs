//! End-to-end tests of the transport against a scripted connector.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use clusterlink::connection::{Connection, PreparedBody, RequestParams};
use clusterlink::{
    Body, ClusterPool, Connector, Diagnostic, DiagnosticKind, NodeConfig, NodeStatus, RawResponse,
    Request, RequestOptions, SniffReason, Sniffer, Transport, TransportBuilder, TransportError,
    TransportResult,
};

/// Everything the connector observed about one attempt
#[derive(Debug, Clone)]
struct SeenRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    querystring: Option<String>,
    body: Option<Vec<u8>>,
}

/// Connector that replays scripted outcomes and records every attempt
#[derive(Debug, Default)]
struct MockConnector {
    outcomes: Mutex<VecDeque<TransportResult<RawResponse>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl MockConnector {
    fn script(self, outcomes: Vec<TransportResult<RawResponse>>) -> Self {
        *self.outcomes.lock() = outcomes.into();
        self
    }

    fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn request(
        &self,
        _connection: &Connection,
        params: RequestParams,
        _cancel: &CancellationToken,
    ) -> TransportResult<RawResponse> {
        let body = match params.body {
            None => None,
            Some(PreparedBody::Bytes(bytes)) => Some(bytes.to_vec()),
            Some(PreparedBody::Stream(mut stream)) => {
                let mut out = Vec::new();
                while let Some(chunk) = stream.next().await {
                    out.extend_from_slice(&chunk.unwrap());
                }
                Some(out)
            }
        };
        self.seen.lock().push(SeenRequest {
            method: params.method,
            path: params.path,
            headers: params.headers,
            querystring: params.querystring,
            body,
        });
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(empty_response(200)))
    }
}

fn empty_response(status: u16) -> RawResponse {
    RawResponse {
        status,
        headers: HashMap::new(),
        body: Bytes::new(),
    }
}

fn json_response(status: u16, value: serde_json::Value) -> RawResponse {
    RawResponse {
        status,
        headers: HashMap::from([(
            "content-type".to_string(),
            "application/json".to_string(),
        )]),
        body: Bytes::from(value.to_string()),
    }
}

fn transport_with(connector: Arc<MockConnector>) -> Transport {
    TransportBuilder::new(connector)
        .node("http://node1:9200/")
        .unwrap()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_get_decodes_json_body() {
    let connector = Arc::new(
        MockConnector::default().script(vec![Ok(json_response(200, json!({ "ok": true })))]),
    );
    let transport = transport_with(connector.clone());

    let response = transport
        .request(Request::get("/_cluster/health"), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body.as_json().unwrap()["ok"], true);
    assert_eq!(response.meta.attempts, 0);

    let seen = connector.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "GET");
    assert_eq!(seen[0].path, "/_cluster/health");
}

#[tokio::test]
async fn test_error_status_becomes_response_error() {
    let connector = Arc::new(MockConnector::default().script(vec![Ok(json_response(
        500,
        json!({ "error": "boom" }),
    ))]));
    let transport = transport_with(connector);

    let err = transport
        .request(Request::get("/"), RequestOptions::default())
        .await
        .unwrap_err();

    match err {
        TransportError::Response(response) => {
            assert_eq!(response.status, 500);
            assert_eq!(response.body.as_json().unwrap()["error"], "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_ignore_list_turns_error_into_success() {
    let connector = Arc::new(MockConnector::default().script(vec![Ok(empty_response(404))]));
    let transport = transport_with(connector);

    let options = RequestOptions {
        ignore: vec![404],
        ..Default::default()
    };
    let response = transport
        .request(Request::get("/missing"), options)
        .await
        .unwrap();
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_head_maps_status_to_existence() {
    let connector = Arc::new(MockConnector::default().script(vec![
        Ok(empty_response(200)),
        Ok(empty_response(404)),
    ]));
    let transport = transport_with(connector);

    let exists = transport
        .request(Request::head("/index"), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(exists.body.as_bool(), Some(true));

    // HEAD 404 is an answer, not a failure
    let missing = transport
        .request(Request::head("/index"), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(missing.status, 404);
    assert_eq!(missing.body.as_bool(), Some(false));
}

#[tokio::test]
async fn test_retries_until_budget_exhausted() {
    let connector = Arc::new(MockConnector::default().script(vec![
        Err(TransportError::connection("reset")),
        Err(TransportError::connection("reset")),
        Err(TransportError::connection("reset")),
        Err(TransportError::connection("reset")),
    ]));
    let transport = transport_with(connector.clone());

    let err = transport
        .request(Request::get("/"), RequestOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Connection { .. }));
    assert_eq!(err.meta().unwrap().attempts, 3);
    assert_eq!(connector.seen().len(), 4);

    let node = &transport.pool().connections()[0];
    assert_eq!(node.status(), NodeStatus::Dead);
}

#[tokio::test]
async fn test_retry_recovers_on_second_attempt() {
    let connector = Arc::new(MockConnector::default().script(vec![
        Err(TransportError::timeout("deadline")),
        Ok(json_response(200, json!({ "ok": true }))),
    ]));
    let transport = transport_with(connector.clone());

    let response = transport
        .request(Request::get("/"), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(response.meta.attempts, 1);
    assert_eq!(connector.seen().len(), 2);

    // The successful attempt resets the node's health
    let node = &transport.pool().connections()[0];
    assert_eq!(node.status(), NodeStatus::Alive);
    assert_eq!(node.dead_count(), 0);
}

#[tokio::test]
async fn test_gateway_status_marks_dead_and_retries() {
    let connector = Arc::new(MockConnector::default().script(vec![
        Ok(empty_response(503)),
        Ok(json_response(200, json!({ "ok": true }))),
    ]));
    let transport = transport_with(connector.clone());

    let response = transport
        .request(Request::get("/"), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.meta.attempts, 1);
    assert_eq!(connector.seen().len(), 2);
}

#[tokio::test]
async fn test_gateway_status_without_budget_is_response_error() {
    let connector = Arc::new(MockConnector::default().script(vec![Ok(empty_response(502))]));
    let transport = transport_with(connector.clone());

    let options = RequestOptions {
        max_retries: Some(0),
        ..Default::default()
    };
    let err = transport.request(Request::get("/"), options).await.unwrap_err();

    assert!(matches!(err, TransportError::Response(_)));
    // The verdict from the failed attempt stands
    let node = &transport.pool().connections()[0];
    assert_eq!(node.status(), NodeStatus::Dead);
}

#[tokio::test]
async fn test_streamed_body_is_never_retried() {
    let connector = Arc::new(
        MockConnector::default().script(vec![Err(TransportError::connection("reset"))]),
    );
    let transport = transport_with(connector.clone());

    let chunks: Vec<std::io::Result<Bytes>> = vec![Ok(Bytes::from_static(b"{\"a\":1}"))];
    let body = Body::Stream(Box::pin(futures::stream::iter(chunks)));
    let err = transport
        .request(
            Request::post("/_bulk").with_body(body),
            RequestOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Connection { .. }));
    assert_eq!(err.meta().unwrap().attempts, 0);
    assert_eq!(connector.seen().len(), 1);
}

#[tokio::test]
async fn test_request_compression_round_trip() {
    let connector = Arc::new(MockConnector::default());
    let transport = TransportBuilder::new(connector.clone())
        .node("http://node1:9200/")
        .unwrap()
        .compression(true)
        .build()
        .unwrap();

    let body = json!({ "query": { "match_all": {} } });
    transport
        .request(
            Request::post("/_search").with_body(Body::Json(body.clone())),
            RequestOptions::default(),
        )
        .await
        .unwrap();

    let seen = connector.seen();
    assert_eq!(seen[0].headers.get("content-encoding").unwrap(), "gzip");
    assert_eq!(seen[0].headers.get("accept-encoding").unwrap(), "gzip");
    let decompressed = clusterlink::compression::gunzip(seen[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(&decompressed[..], body.to_string().as_bytes());
}

#[tokio::test]
async fn test_gzip_response_is_decoded() {
    let payload = json!({ "took": 3 });
    let compressed = clusterlink::compression::gzip(payload.to_string().as_bytes()).unwrap();
    let raw = RawResponse {
        status: 200,
        headers: HashMap::from([
            ("content-type".to_string(), "application/json".to_string()),
            ("content-encoding".to_string(), "gzip".to_string()),
        ]),
        body: compressed,
    };
    let connector = Arc::new(MockConnector::default().script(vec![Ok(raw)]));
    let transport = transport_with(connector);

    let response = transport
        .request(Request::get("/_search"), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(response.body.as_json().unwrap()["took"], 3);
}

#[tokio::test]
async fn test_empty_pool_fails_with_no_living_connections() {
    let connector = Arc::new(MockConnector::default());
    let pool = Arc::new(ClusterPool::new(
        connector.clone(),
        Arc::new(Diagnostic::new()),
    ));
    let transport = TransportBuilder::new(connector)
        .pool(pool)
        .build()
        .unwrap();

    let err = transport
        .request(Request::get("/"), RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::NoLivingConnections { .. }));
}

#[tokio::test]
async fn test_request_ids_count_up_and_explicit_id_wins() {
    let connector = Arc::new(MockConnector::default());
    let transport = transport_with(connector);

    let first = transport
        .request(Request::get("/"), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(first.meta.request_id, "1");

    let second = transport
        .request(Request::get("/"), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(second.meta.request_id, "2");

    let options = RequestOptions {
        id: Some("trace-42".to_string()),
        ..Default::default()
    };
    let custom = transport.request(Request::get("/"), options).await.unwrap();
    assert_eq!(custom.meta.request_id, "trace-42");
}

#[tokio::test]
async fn test_cancelled_request_aborts_before_send() {
    let connector = Arc::new(MockConnector::default());
    let transport = transport_with(connector.clone());

    let token = CancellationToken::new();
    token.cancel();
    let options = RequestOptions {
        cancellation: Some(token),
        ..Default::default()
    };
    let err = transport.request(Request::get("/"), options).await.unwrap_err();

    assert!(matches!(err, TransportError::RequestAborted { .. }));
    assert!(err.meta().unwrap().aborted);
    assert!(connector.seen().is_empty());
}

#[tokio::test]
async fn test_one_request_event_per_attempt_one_response_event_total() {
    let connector = Arc::new(MockConnector::default().script(vec![
        Err(TransportError::connection("reset")),
        Err(TransportError::connection("reset")),
        Ok(empty_response(200)),
    ]));
    let transport = transport_with(connector);

    let requests = Arc::new(Mutex::new(0usize));
    let responses = Arc::new(Mutex::new(0usize));
    let r = requests.clone();
    transport
        .diagnostic()
        .on(DiagnosticKind::Request, move |_| *r.lock() += 1);
    let r = responses.clone();
    transport
        .diagnostic()
        .on(DiagnosticKind::Response, move |_| *r.lock() += 1);

    transport
        .request(Request::get("/"), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(*requests.lock(), 3);
    assert_eq!(*responses.lock(), 1);
}

#[tokio::test]
async fn test_failed_request_emits_one_response_event_with_error() {
    let connector =
        Arc::new(MockConnector::default().script(vec![Ok(json_response(500, json!({})))]));
    let transport = transport_with(connector);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let slot = seen.clone();
    transport.diagnostic().on(DiagnosticKind::Response, move |event| {
        slot.lock().push(event.error.is_some());
    });

    let _ = transport
        .request(Request::get("/"), RequestOptions::default())
        .await;

    assert_eq!(*seen.lock(), vec![true]);
}

#[tokio::test]
async fn test_querystring_merge_and_header_precedence() {
    let connector = Arc::new(MockConnector::default());
    let transport = TransportBuilder::new(connector.clone())
        .node("http://node1:9200/")
        .unwrap()
        .header("x-client", "default")
        .opaque_id_prefix("acme-")
        .build()
        .unwrap();

    let options = RequestOptions {
        headers: HashMap::from([("X-Client".to_string(), "override".to_string())]),
        querystring: BTreeMap::from([("size".to_string(), "5".to_string())]),
        opaque_id: Some("task-1".to_string()),
        ..Default::default()
    };
    transport
        .request(
            Request::get("/_search")
                .with_param("q", "user:kimchy")
                .with_param("size", "1"),
            options,
        )
        .await
        .unwrap();

    let seen = connector.seen();
    assert_eq!(seen[0].headers.get("x-client").unwrap(), "override");
    assert_eq!(seen[0].headers.get("x-opaque-id").unwrap(), "acme-task-1");
    // Option-level parameters override the request's own
    assert_eq!(
        seen[0].querystring.as_deref(),
        Some("q=user%3Akimchy&size=5")
    );
}

#[tokio::test]
async fn test_default_user_agent_sent_and_overridable() {
    let connector = Arc::new(MockConnector::default());
    let transport = transport_with(connector.clone());
    transport
        .request(Request::get("/"), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(
        connector.seen()[0].headers.get("user-agent").unwrap(),
        &format!("clusterlink/{}", env!("CARGO_PKG_VERSION"))
    );

    // Transport-level headers win over the built-in default
    let connector = Arc::new(MockConnector::default());
    let transport = TransportBuilder::new(connector.clone())
        .node("http://node1:9200/")
        .unwrap()
        .header("User-Agent", "acme-client/2.0")
        .build()
        .unwrap();
    transport
        .request(Request::get("/"), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(
        connector.seen()[0].headers.get("user-agent").unwrap(),
        "acme-client/2.0"
    );

    // And per-call headers win over both
    let options = RequestOptions {
        headers: HashMap::from([("user-agent".to_string(), "one-off/0.1".to_string())]),
        ..Default::default()
    };
    transport.request(Request::get("/"), options).await.unwrap();
    assert_eq!(
        connector.seen()[1].headers.get("user-agent").unwrap(),
        "one-off/0.1"
    );
}

#[tokio::test]
async fn test_malformed_json_response_is_terminal() {
    let raw = RawResponse {
        status: 200,
        headers: HashMap::from([(
            "content-type".to_string(),
            "application/json".to_string(),
        )]),
        body: Bytes::from_static(b"{not json"),
    };
    let connector = Arc::new(MockConnector::default().script(vec![Ok(raw)]));
    let transport = transport_with(connector.clone());

    let err = transport
        .request(Request::get("/"), RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Deserialization(_)));
    assert_eq!(connector.seen().len(), 1);
}

#[tokio::test]
async fn test_ndjson_body_sets_content_type() {
    let connector = Arc::new(MockConnector::default());
    let transport = transport_with(connector.clone());

    let lines = vec![json!({ "index": {} }), json!({ "field": 1 })];
    transport
        .request(
            Request::post("/_bulk").with_body(Body::NdJson(lines)),
            RequestOptions::default(),
        )
        .await
        .unwrap();

    let seen = connector.seen();
    assert_eq!(
        seen[0].headers.get("content-type").unwrap(),
        "application/x-ndjson"
    );
    assert_eq!(
        seen[0].body.as_deref(),
        Some(&b"{\"index\":{}}\n{\"field\":1}\n"[..])
    );
}

#[derive(Debug)]
struct MockSniffer {
    nodes: Vec<String>,
}

#[async_trait]
impl Sniffer for MockSniffer {
    async fn sniff(&self, _reason: SniffReason) -> TransportResult<Vec<NodeConfig>> {
        self.nodes.iter().map(|n| NodeConfig::parse(n)).collect()
    }
}

#[tokio::test]
async fn test_sniff_on_connection_fault_updates_pool() {
    let connector = Arc::new(MockConnector::default().script(vec![
        Err(TransportError::connection("reset")),
        Ok(empty_response(200)),
    ]));
    let sniffer = Arc::new(MockSniffer {
        nodes: vec![
            "http://node1:9200/".to_string(),
            "http://node2:9200/".to_string(),
        ],
    });
    let transport = TransportBuilder::new(connector)
        .node("http://node1:9200/")
        .unwrap()
        .sniffer(sniffer)
        .sniff_on_connection_fault(true)
        .build()
        .unwrap();

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let slot = reasons.clone();
    transport.diagnostic().on(DiagnosticKind::Sniff, move |event| {
        slot.lock().push(event.payload["reason"].clone());
    });

    transport
        .request(Request::get("/"), RequestOptions::default())
        .await
        .unwrap();

    // The sniff round runs in the background; wait for it to land
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while transport.pool().connections().len() < 2 {
        assert!(std::time::Instant::now() < deadline, "sniff never completed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*reasons.lock(), vec![json!("sniff-on-connection-fault")]);
}

/// Fails slowly on the first attempt, succeeds afterwards
#[derive(Debug, Default)]
struct SlowFirstFailure {
    calls: Mutex<usize>,
}

#[async_trait]
impl Connector for SlowFirstFailure {
    async fn request(
        &self,
        _connection: &Connection,
        _params: RequestParams,
        _cancel: &CancellationToken,
    ) -> TransportResult<RawResponse> {
        let first = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls == 1
        };
        if first {
            tokio::time::sleep(Duration::from_millis(80)).await;
            return Err(TransportError::connection("reset"));
        }
        Ok(empty_response(200))
    }
}

#[tokio::test]
async fn test_interval_sniff_fires_between_retries() {
    let sniffer = Arc::new(MockSniffer {
        nodes: vec![
            "http://node1:9200/".to_string(),
            "http://node2:9200/".to_string(),
        ],
    });
    let transport = TransportBuilder::new(Arc::new(SlowFirstFailure::default()))
        .node("http://node1:9200/")
        .unwrap()
        .sniffer(sniffer)
        .sniff_interval(Duration::from_millis(50))
        .build()
        .unwrap();

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let slot = reasons.clone();
    transport.diagnostic().on(DiagnosticKind::Sniff, move |event| {
        slot.lock().push(event.payload["reason"].clone());
    });

    // The first attempt outlives the interval; the retry's acquire phase
    // must notice the elapsed deadline inside the same call
    transport
        .request(Request::get("/"), RequestOptions::default())
        .await
        .unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while transport.pool().connections().len() < 2 {
        assert!(std::time::Instant::now() < deadline, "sniff never completed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*reasons.lock(), vec![json!("sniff-interval")]);
}
