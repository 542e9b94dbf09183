//! The caller-supplied description of one outbound request.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::ProxyError;
use crate::proxy::secrets::SecretMap;

/// Payload to send upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    /// Object or array, serialized as JSON.
    Json(Value),
    /// Sent as-is.
    Text(String),
    /// Pre-encoded form payload, sent as-is. Only built programmatically;
    /// JSON input never produces it.
    Binary(Bytes),
}

impl RequestBody {
    /// Maps the descriptor's `body` field. Null, empty strings, numbers and
    /// booleans carry no payload.
    fn from_json(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(s)) if !s.is_empty() => RequestBody::Text(s.clone()),
            Some(v @ Value::Object(_)) | Some(v @ Value::Array(_)) => RequestBody::Json(v.clone()),
            _ => RequestBody::Empty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRequestDescriptor {
    pub protocol: String,
    pub origin: String,
    pub path: String,
    pub method: String,
    /// String-valued entries only, in the order given.
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ProxyRequestDescriptor {
    /// Parses the raw inbound body. An empty body is treated as `{}` and
    /// therefore fails the required-field check.
    pub fn parse(raw: &[u8], secrets: &SecretMap) -> Result<Self, ProxyError> {
        let value: Value = if raw.is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_slice(raw).map_err(|_| ProxyError::invalid_json())?
        };
        Self::from_value(secrets.apply(value))
    }

    pub fn from_value(value: Value) -> Result<Self, ProxyError> {
        let obj = match value {
            Value::Object(obj) => obj,
            _ => return Err(ProxyError::missing_fields()),
        };

        let required = |name: &str| -> Option<String> {
            obj.get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let (Some(protocol), Some(origin), Some(path), Some(method)) = (
            required("protocol"),
            required("origin"),
            required("path"),
            required("method"),
        ) else {
            return Err(ProxyError::missing_fields());
        };

        let headers = obj
            .get("headers")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            protocol,
            origin,
            path,
            method,
            headers,
            body: RequestBody::from_json(obj.get("body")),
        })
    }

    pub fn normalized_method(&self) -> String {
        self.method.to_uppercase()
    }

    /// GET and HEAD never carry a body.
    pub fn allows_body(&self) -> bool {
        !matches!(self.normalized_method().as_str(), "GET" | "HEAD")
    }

    /// `{protocol}://{origin}/{path}` with one leading slash dropped from path.
    pub fn url(&self) -> String {
        let path = self.path.strip_prefix('/').unwrap_or(&self.path);
        format!("{}://{}/{}", self.protocol, self.origin, path)
    }
}
