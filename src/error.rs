//! Error types for the proxy, the signed exchange client and startup.

use axum::http::StatusCode;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use thiserror::Error;

/// Every way a proxied call can fail. Each kind maps to one HTTP status
/// and one JSON error shape; nothing is retried.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Unparsable body or missing required field. Never forwarded.
    #[error("{message}: {details}")]
    MalformedInput {
        message: String,
        details: String,
        example: Option<Value>,
    },

    /// Origin failed the allow-list check. Never forwarded.
    #[error("Origin {origin} is not in the allowed list")]
    OriginNotAllowed { origin: String },

    /// Upstream answered with a non-2xx status.
    #[error("External API error: {status} {status_text}")]
    Upstream {
        status: u16,
        status_text: String,
        details: Value,
        url: String,
    },

    /// Network or decode failure while forwarding.
    #[error("Proxy request failed: {message}")]
    Transport {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProxyError {
    pub fn invalid_json() -> Self {
        ProxyError::MalformedInput {
            message: "Invalid JSON format".to_string(),
            details: "Request body must be valid JSON".to_string(),
            example: None,
        }
    }

    pub fn missing_fields() -> Self {
        ProxyError::MalformedInput {
            message: "Missing required fields".to_string(),
            details: "Required: protocol, origin, path, method".to_string(),
            example: Some(json!({
                "protocol": "https",
                "origin": "api.binance.com",
                "path": "/api/v3/ticker/24hr",
                "method": "GET",
                "headers": {},
            })),
        }
    }

    /// Body could not be read, e.g. it exceeds the configured size limit.
    pub fn unreadable_body(details: impl Into<String>) -> Self {
        ProxyError::MalformedInput {
            message: "Invalid request body".to_string(),
            details: details.into(),
            example: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ProxyError::Transport {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MalformedInput { .. } => StatusCode::BAD_REQUEST,
            ProxyError::OriginNotAllowed { .. } => StatusCode::FORBIDDEN,
            ProxyError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::Transport { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body sent back to the caller for this error.
    pub fn body(&self) -> Value {
        match self {
            ProxyError::MalformedInput {
                message,
                details,
                example,
            } => {
                let mut body = json!({ "error": message, "details": details });
                if let Some(example) = example {
                    body["example"] = example.clone();
                }
                body
            }
            ProxyError::OriginNotAllowed { origin } => json!({
                "error": "Origin not allowed",
                "details": format!("Origin {} is not in the allowed list", origin),
            }),
            ProxyError::Upstream {
                status,
                status_text,
                details,
                url,
            } => json!({
                "error": format!("External API error: {} {}", status, status_text),
                "details": details,
                "url": url,
            }),
            ProxyError::Transport { message, timestamp } => json!({
                "error": "Proxy request failed",
                "details": message,
                "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            }),
        }
    }
}

/// Failures of the signed exchange client.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("BINANCE_API_KEY and BINANCE_API_SECRET must be set for signed requests")]
    MissingCredentials,

    #[error("Binance API Error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid API key header: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Errors that stop the service from starting.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Exchange client error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
