use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::error::ProxyError;
use crate::proxy::descriptor::{ProxyRequestDescriptor, RequestBody};
use crate::types::ProxyResult;

pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Fully shaped request, ready to send.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// The single network call the proxy makes. Implementations must turn
/// every failure, timeouts included, into `ProxyError::Transport`.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, ProxyError>;
}

pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, ProxyError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProxyError::transport(error_chain(&e)))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::transport(error_chain(&e)))?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Joins an error with its `source()` chain, e.g.
/// `error sending request for url (...): operation timed out`.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Shapes the outbound request: caller headers, default User-Agent,
/// serialized body (dropped for GET and HEAD).
pub fn build_outbound(descriptor: &ProxyRequestDescriptor) -> Result<OutboundRequest, ProxyError> {
    let method_name = descriptor.normalized_method();
    let method = Method::from_bytes(method_name.as_bytes())
        .map_err(|_| ProxyError::transport(format!("Invalid HTTP method: {}", descriptor.method)))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &descriptor.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ProxyError::transport(format!("Invalid header name: {}", name)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| ProxyError::transport(format!("Invalid value for header {}", name)))?;
        headers.insert(header_name, header_value);
    }

    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    }

    let body = if descriptor.allows_body() {
        match &descriptor.body {
            RequestBody::Empty => None,
            RequestBody::Json(value) => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                let encoded = serde_json::to_vec(value)
                    .map_err(|e| ProxyError::transport(e.to_string()))?;
                Some(Bytes::from(encoded))
            }
            RequestBody::Text(text) => Some(Bytes::from(text.clone())),
            RequestBody::Binary(bytes) => Some(bytes.clone()),
        }
    } else {
        None
    };

    Ok(OutboundRequest {
        method,
        url: descriptor.url(),
        headers,
        body,
    })
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.contains("application/json") || ct.contains("text/json"))
        .unwrap_or(false)
}

/// Turns the upstream reply into a result. Non-JSON payloads are wrapped
/// as `{"data": <text>}`; a JSON content type with an unparsable payload
/// is a transport failure.
pub fn relay(response: UpstreamResponse, url: &str) -> Result<ProxyResult, ProxyError> {
    let json = is_json(response.content_type.as_deref());
    let malformed = |e: serde_json::Error| ProxyError::transport(format!("Malformed upstream JSON: {}", e));

    if !response.status.is_success() {
        let text = String::from_utf8_lossy(&response.body);
        let details = if json {
            serde_json::from_str(&text).map_err(malformed)?
        } else {
            Value::String(text.into_owned())
        };
        return Err(ProxyError::Upstream {
            status: response.status.as_u16(),
            status_text: response.status.canonical_reason().unwrap_or_default().to_string(),
            details,
            url: url.to_string(),
        });
    }

    let body = if json {
        serde_json::from_slice(&response.body).map_err(malformed)?
    } else {
        json!({ "data": String::from_utf8_lossy(&response.body) })
    };

    Ok(ProxyResult {
        status: response.status,
        body,
    })
}

/// Sends an already validated descriptor and relays the reply.
pub async fn forward(
    descriptor: &ProxyRequestDescriptor,
    upstream: &dyn Upstream,
) -> Result<ProxyResult, ProxyError> {
    let request = build_outbound(descriptor)?;
    let url = request.url.clone();

    info!(method = %request.method, url = %url, "[PROXY] forwarding");
    let response = match upstream.send(request).await {
        Ok(response) => response,
        Err(e) => {
            error!(url = %url, error = %e, "[PROXY] upstream call failed");
            return Err(e);
        }
    };
    info!(status = %response.status, url = %url, "[PROXY] response");

    relay(response, &url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_stub;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;

    fn descriptor(method: &str, body: RequestBody) -> ProxyRequestDescriptor {
        ProxyRequestDescriptor {
            protocol: "https".to_string(),
            origin: "api.binance.com".to_string(),
            path: "/api/v3/ticker/24hr".to_string(),
            method: method.to_string(),
            headers: Vec::new(),
            body,
        }
    }

    fn response(status: u16, content_type: Option<&str>, body: &str) -> UpstreamResponse {
        UpstreamResponse {
            status: StatusCode::from_u16(status).unwrap(),
            content_type: content_type.map(str::to_string),
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_get_and_head_never_carry_body() {
        for method in ["GET", "get", "HEAD", "head"] {
            let req = build_outbound(&descriptor(method, RequestBody::Json(json!({ "a": 1 })))).unwrap();
            assert!(req.body.is_none(), "{method}");
            assert!(!req.headers.contains_key(CONTENT_TYPE));
        }
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let req = build_outbound(&descriptor("post", RequestBody::Json(json!({ "a": 1 })))).unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.body.unwrap(), Bytes::from_static(br#"{"a":1}"#));
        assert_eq!(req.headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_caller_content_type_is_kept() {
        let mut d = descriptor("PUT", RequestBody::Json(json!([1])));
        d.headers.push(("content-type".to_string(), "text/plain".to_string()));
        let req = build_outbound(&d).unwrap();
        assert_eq!(req.headers[CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_text_and_binary_pass_through() {
        let req = build_outbound(&descriptor("POST", RequestBody::Text("a=1".to_string()))).unwrap();
        assert_eq!(req.body.unwrap(), Bytes::from_static(b"a=1"));
        assert!(!req.headers.contains_key(CONTENT_TYPE));

        let raw = Bytes::from_static(&[0, 159, 146, 150]);
        let req = build_outbound(&descriptor("PATCH", RequestBody::Binary(raw.clone()))).unwrap();
        assert_eq!(req.body.unwrap(), raw);
    }

    #[test]
    fn test_default_user_agent() {
        let req = build_outbound(&descriptor("GET", RequestBody::Empty)).unwrap();
        assert_eq!(req.headers[USER_AGENT], DEFAULT_USER_AGENT);

        let mut d = descriptor("GET", RequestBody::Empty);
        d.headers.push(("User-Agent".to_string(), "dashboard/2".to_string()));
        let req = build_outbound(&d).unwrap();
        assert_eq!(req.headers[USER_AGENT], "dashboard/2");
        assert_eq!(req.headers.get_all(USER_AGENT).iter().count(), 1);
    }

    #[test]
    fn test_invalid_header_is_transport_error() {
        let mut d = descriptor("GET", RequestBody::Empty);
        d.headers.push(("bad header".to_string(), "v".to_string()));
        assert!(matches!(build_outbound(&d), Err(ProxyError::Transport { .. })));
    }

    #[test]
    fn test_relay_json_success() {
        let result = relay(response(200, Some("application/json;charset=UTF-8"), r#"{"ok":true}"#), "u").unwrap();
        assert_eq!(result.status, StatusCode::OK);
        assert_eq!(result.body, json!({ "ok": true }));
    }

    #[test]
    fn test_relay_wraps_text() {
        let result = relay(response(201, Some("text/plain"), "pong"), "u").unwrap();
        assert_eq!(result.status, StatusCode::CREATED);
        assert_eq!(result.body, json!({ "data": "pong" }));

        let result = relay(response(200, None, ""), "u").unwrap();
        assert_eq!(result.body, json!({ "data": "" }));
    }

    #[test]
    fn test_relay_upstream_error_json() {
        let err = relay(
            response(404, Some("application/json"), r#"{"code":-1121,"msg":"Bad symbol"}"#),
            "https://api.binance.com/api/v3/ticker/24hr",
        )
        .unwrap_err();
        match err {
            ProxyError::Upstream { status, status_text, details, url } => {
                assert_eq!(status, 404);
                assert_eq!(status_text, "Not Found");
                assert_eq!(details, json!({ "code": -1121, "msg": "Bad symbol" }));
                assert_eq!(url, "https://api.binance.com/api/v3/ticker/24hr");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_relay_upstream_error_text() {
        let err = relay(response(502, Some("text/html"), "<h1>bad gateway</h1>"), "u").unwrap_err();
        assert_eq!(err.body()["details"], "<h1>bad gateway</h1>");
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_relay_malformed_json_is_transport_error() {
        let err = relay(response(200, Some("application/json"), "{oops"), "u").unwrap_err();
        assert!(matches!(err, ProxyError::Transport { .. }));
        let err = relay(response(500, Some("text/json"), "nope"), "u").unwrap_err();
        assert!(matches!(err, ProxyError::Transport { .. }));
    }

    #[test]
    fn test_error_chain_includes_sources() {
        #[derive(Debug)]
        struct Wrapper(std::io::Error);
        impl std::fmt::Display for Wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "error sending request")
            }
        }
        impl std::error::Error for Wrapper {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }
        let inner = std::io::Error::new(std::io::ErrorKind::TimedOut, "operation timed out");
        assert_eq!(error_chain(&ProxyError::transport("refused")), "Proxy request failed: refused");
        assert_eq!(
            error_chain(&Wrapper(inner)),
            "error sending request: operation timed out"
        );
    }

    fn outbound(method: Method, url: String) -> OutboundRequest {
        OutboundRequest {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn test_http_upstream_timeout_is_transport_error() {
        // 只接受连接，从不回复
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let upstream = HttpUpstream::new(Duration::from_millis(300)).unwrap();
        let err = upstream
            .send(outbound(Method::GET, format!("http://{}/slow", addr)))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = err.body();
        assert_eq!(body["error"], "Proxy request failed");
        let details = body["details"].as_str().unwrap();
        assert!(details.contains("timed out"), "{details}");
    }

    #[tokio::test]
    async fn test_http_upstream_reads_status_and_content_type() {
        let stub = Router::new().route(
            "/api/v3/ticker/24hr",
            get(|| async {
                (
                    StatusCode::ACCEPTED,
                    [(CONTENT_TYPE, "application/json; charset=utf-8")],
                    r#"{"symbol":"BTCUSDT"}"#,
                )
            }),
        );
        let base = spawn_stub(stub).await;

        let upstream = HttpUpstream::new(Duration::from_secs(5)).unwrap();
        let response = upstream
            .send(outbound(Method::GET, format!("{}/api/v3/ticker/24hr", base)))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::ACCEPTED);
        assert_eq!(response.content_type.as_deref(), Some("application/json; charset=utf-8"));
        let result = relay(response, "stub").unwrap();
        assert_eq!(result.body["symbol"], "BTCUSDT");
    }

    #[tokio::test]
    async fn test_http_upstream_sends_headers_and_body() {
        let stub = Router::new().route(
            "/echo",
            axum::routing::post(|headers: axum::http::HeaderMap, body: Bytes| async move {
                let agent = headers
                    .get(USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                format!("{}|{}", agent, String::from_utf8_lossy(&body))
            }),
        );
        let base = spawn_stub(stub).await;

        let mut d = descriptor("post", RequestBody::Text("a=1".to_string()));
        d.protocol = "http".to_string();
        let mut request = build_outbound(&d).unwrap();
        request.url = format!("{}/echo", base);

        let upstream = HttpUpstream::new(Duration::from_secs(5)).unwrap();
        let response = upstream.send(request).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from(format!("{}|a=1", DEFAULT_USER_AGENT)));
    }
}
