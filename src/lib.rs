//! Allow-listed outbound HTTP proxy for a crypto trading dashboard, plus a
//! signed read-only endpoint for the exchange account.
//!
//! The dashboard posts a JSON descriptor (`protocol`, `origin`, `path`,
//! `method`, optional `headers` and `body`) to `/api/proxy`. The proxy checks
//! the origin against a fixed list of exchange and market-data hosts,
//! forwards the request and relays the reply with permissive CORS headers.

pub mod config;
pub mod error;
pub mod exchange;
pub mod proxy;
pub mod server;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{ExchangeError, ProxyError, StartupError};
pub use server::{router, run, AppState};
