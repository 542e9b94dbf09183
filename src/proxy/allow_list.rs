/// Hosts the proxy may forward to: the exchange's production and test
/// domains plus the market-data providers the dashboard reads from.
pub const ALLOWED_ORIGINS: &[&str] = &[
    "api.binance.com",
    "api.binance.us",
    "testnet.binance.vision",
    "api.coingecko.com",
    "api.coinmarketcap.com",
    "api.cryptocompare.com",
];

/// True when any allow-listed host appears inside `origin`.
///
/// This is a containment test, not a host match: `api.binance.com.evil.net`
/// passes because it contains `api.binance.com`. Case-sensitive.
pub fn is_allowed_origin(allow_list: &[&str], origin: &str) -> bool {
    allow_list.iter().any(|allowed| origin.contains(allowed))
}
