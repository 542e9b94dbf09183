use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Successful outcome of a proxied call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResult {
    pub status: StatusCode,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

impl Balance {
    pub fn is_empty(&self) -> bool {
        let free = self.free.parse::<f64>().unwrap_or_default();
        let locked = self.locked.parse::<f64>().unwrap_or_default();
        free <= 0.0 && locked <= 0.0
    }
}

// 只取账户里的余额列表，其余字段原样丢弃
#[derive(Debug, Deserialize)]
pub struct AccountBalances {
    #[serde(default)]
    pub balances: Vec<Balance>,
}

#[derive(Debug, Serialize)]
pub struct BalancesResponse {
    pub balances: Vec<Balance>,
}

/// Read-only actions served by the signed exchange endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeAction {
    Account,
    Balance,
    Prices,
    Orders,
    Trades,
}

impl ExchangeAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "account" => Some(ExchangeAction::Account),
            "balance" => Some(ExchangeAction::Balance),
            "prices" => Some(ExchangeAction::Prices),
            "orders" => Some(ExchangeAction::Orders),
            "trades" => Some(ExchangeAction::Trades),
            _ => None,
        }
    }
}
