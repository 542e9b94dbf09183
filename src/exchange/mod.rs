pub mod binance;

pub use binance::{BinanceClient, DEFAULT_SYMBOLS};
