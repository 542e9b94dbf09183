//! HTTP surface: the generic proxy path, the signed exchange endpoint and a
//! health check.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{ExchangeError, ProxyError, StartupError};
use crate::exchange::{BinanceClient, DEFAULT_SYMBOLS};
use crate::proxy::{self, HttpUpstream, ProxyContext};
use crate::types::{BalancesResponse, ExchangeAction};

pub const PROXY_PATH: &str = "/api/proxy";
pub const BINANCE_PATH: &str = "/api/binance";

const DEFAULT_TRADES_SYMBOL: &str = "BTCUSDT";
const DEFAULT_TRADES_LIMIT: u32 = 10;

/// Sent on every proxy response, errors and preflight included.
pub const CORS_HEADERS: [(HeaderName, &str); 3] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, PUT, DELETE, OPTIONS"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization, X-MBX-APIKEY"),
];

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ProxyContext>,
    pub exchange: Arc<BinanceClient>,
    /// Largest inbound proxy body accepted.
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let upstream = HttpUpstream::new(config.upstream_timeout)?;
        let exchange = BinanceClient::new(&config.binance, config.upstream_timeout)?;
        Ok(Self {
            proxy: Arc::new(ProxyContext::new(Arc::new(upstream), config.secrets.clone())),
            exchange: Arc::new(exchange),
            max_body_bytes: config.max_body_bytes,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let proxy_routes = get(proxy_request)
        .post(proxy_request)
        .put(proxy_request)
        .patch(proxy_request)
        .delete(proxy_request)
        .options(proxy_preflight)
        .fallback(proxy_method_not_allowed)
        .layer(DefaultBodyLimit::max(state.max_body_bytes));

    Router::new()
        .route(PROXY_PATH, proxy_routes)
        .route(BINANCE_PATH, get(binance_request))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds, serves until Ctrl-C, then drains in-flight requests.
pub async fn run(config: Config) -> Result<(), StartupError> {
    let state = AppState::from_config(&config)?;
    if !state.exchange.has_credentials() {
        info!("Binance credentials not set; signed actions on {} will fail", BINANCE_PATH);
    }
    if !config.secrets.is_empty() {
        info!("{} secret mask(s) loaded", config.secrets.len());
    }

    let addr = config.socket_addr();
    let listener = TcpListener::bind(addr).await?;
    info!("exchange proxy listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("exchange proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn proxy_preflight() -> Response {
    (StatusCode::OK, CORS_HEADERS).into_response()
}

async fn proxy_method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        CORS_HEADERS,
        Json(json!({ "error": "Method not allowed" })),
    )
        .into_response()
}

fn proxy_error_response(e: &ProxyError) -> Response {
    (e.status(), CORS_HEADERS, Json(e.body())).into_response()
}

async fn proxy_request(State(state): State<AppState>, body: Result<Bytes, BytesRejection>) -> Response {
    // 超出大小限制等读取失败也要带上 CORS 头
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let e = ProxyError::unreadable_body(rejection.body_text());
            warn!(error = %e, "[PROXY] rejected request");
            return proxy_error_response(&e);
        }
    };

    match proxy::handle(&body, &state.proxy).await {
        Ok(result) => (result.status, CORS_HEADERS, Json(result.body)).into_response(),
        Err(e) => proxy_error_response(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BinanceQuery {
    action: Option<String>,
    symbols: Option<String>,
    symbol: Option<String>,
    limit: Option<String>,
}

impl BinanceQuery {
    fn symbols(&self) -> Vec<String> {
        let requested: Vec<String> = self
            .symbols
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if requested.is_empty() {
            DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect()
        } else {
            requested
        }
    }

    fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref().filter(|s| !s.is_empty())
    }

    fn limit(&self) -> u32 {
        self.limit
            .as_deref()
            .and_then(|l| l.trim().parse().ok())
            .unwrap_or(DEFAULT_TRADES_LIMIT)
    }
}

async fn binance_request(State(state): State<AppState>, Query(query): Query<BinanceQuery>) -> Response {
    let Some(action) = query.action.as_deref().and_then(ExchangeAction::parse) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Unknown action. Use: account, balance, prices, orders, trades" })),
        )
            .into_response();
    };

    match run_action(&state.exchange, action, &query).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            error!(?action, error = %e, "Binance request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Binance API error", "details": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn run_action(
    client: &BinanceClient,
    action: ExchangeAction,
    query: &BinanceQuery,
) -> Result<Value, ExchangeError> {
    let body = match action {
        ExchangeAction::Account => client.get_account().await?,
        ExchangeAction::Balance => serde_json::to_value(BalancesResponse {
            balances: client.get_balances().await?,
        })?,
        ExchangeAction::Prices => Value::Array(client.get_prices(&query.symbols()).await?),
        ExchangeAction::Orders => client.get_open_orders(query.symbol()).await?,
        ExchangeAction::Trades => {
            let symbol = query.symbol().unwrap_or(DEFAULT_TRADES_SYMBOL);
            client.get_my_trades(symbol, query.limit()).await?
        }
    };
    Ok(body)
}
