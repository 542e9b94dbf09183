use std::time::Duration;

use chrono::Utc;
use futures_util::future::try_join_all;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info};

use crate::config::BinanceConfig;
use crate::error::ExchangeError;
use crate::types::{AccountBalances, Balance};

pub const DEFAULT_SYMBOLS: &[&str] = &["BTCUSDT", "ETHUSDT", "BNBUSDT", "ADAUSDT", "DOTUSDT", "SOLUSDT"];

const API_KEY_HEADER: &str = "X-MBX-APIKEY";

// 与 URLSearchParams 一致：字母数字和 *-._ 不转义
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'*').remove(b'-').remove(b'.').remove(b'_');

struct Credentials {
    api_key: HeaderValue,
    api_secret: String,
}

pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

/// Hex HMAC-SHA256 of `query` keyed by `secret`.
pub fn sign(query: &str, secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Encodes `params` in order, appends `timestamp`, then the signature over
/// everything before it.
pub fn signed_query(params: &[(&str, String)], timestamp: i64, secret: &str) -> String {
    let mut query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, utf8_percent_encode(v, QUERY_VALUE)))
        .chain(std::iter::once(format!("timestamp={}", timestamp)))
        .collect::<Vec<String>>()
        .join("&");

    let signature = sign(&query, secret);
    query.push_str("&signature=");
    query.push_str(&signature);
    query
}

/// Keeps only balances with something free or locked.
pub fn non_zero_balances(balances: Vec<Balance>) -> Vec<Balance> {
    balances.into_iter().filter(|b| !b.is_empty()).collect()
}

impl BinanceClient {
    pub fn new(config: &BinanceConfig, timeout: Duration) -> Result<Self, ExchangeError> {
        let credentials = match (&config.api_key, &config.api_secret) {
            (Some(key), Some(secret)) => Some(Credentials {
                api_key: HeaderValue::from_str(key)?,
                api_secret: secret.clone(),
            }),
            _ => None,
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-www-form-urlencoded"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, ExchangeError> {
        let status = response.status();
        let text = response.text().await?;
        debug!("Binance response {}: {}", status, text);

        if !status.is_success() {
            return Err(ExchangeError::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn signed_get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, ExchangeError> {
        let credentials = self.credentials.as_ref().ok_or(ExchangeError::MissingCredentials)?;

        let query = signed_query(params, Utc::now().timestamp_millis(), &credentials.api_secret);
        let url = format!("{}{}?{}", self.base_url, endpoint, query);
        info!("Binance signed GET {}", endpoint);

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, credentials.api_key.clone())
            .send()
            .await?;
        Self::read_json(response).await
    }

    pub async fn get_account(&self) -> Result<Value, ExchangeError> {
        self.signed_get("/api/v3/account", &[]).await
    }

    pub async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        let account: AccountBalances = serde_json::from_value(self.get_account().await?)?;
        Ok(non_zero_balances(account.balances))
    }

    pub async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Value, ExchangeError> {
        let params: Vec<(&str, String)> = symbol
            .map(|s| vec![("symbol", s.to_string())])
            .unwrap_or_default();
        self.signed_get("/api/v3/openOrders", &params).await
    }

    pub async fn get_my_trades(&self, symbol: &str, limit: u32) -> Result<Value, ExchangeError> {
        let params = [("symbol", symbol.to_string()), ("limit", limit.to_string())];
        self.signed_get("/api/v3/myTrades", &params).await
    }

    /// Public 24h ticker for one symbol. No signature needed.
    pub async fn get_ticker_24hr(&self, symbol: &str) -> Result<Value, ExchangeError> {
        let url = format!(
            "{}/api/v3/ticker/24hr?symbol={}",
            self.base_url,
            utf8_percent_encode(symbol, QUERY_VALUE)
        );
        debug!("Binance ticker URL: {}", url);
        let response = self.client.get(&url).send().await?;
        Self::read_json(response).await
    }

    /// 24h tickers for all `symbols`, fetched concurrently. Fails if any one fails.
    pub async fn get_prices(&self, symbols: &[String]) -> Result<Vec<Value>, ExchangeError> {
        try_join_all(symbols.iter().map(|s| self.get_ticker_24hr(s))).await
    }
}
