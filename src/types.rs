/// Core type definitions shared by the datafeed, schedulers and widget
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

/// OHLCV bar as delivered to chart listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time (epoch milliseconds when produced by the UDF client)
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl Bar {
    /// Bar whose open, high and low all equal the close
    pub fn flat(time: i64, close: f64) -> Self {
        Bar {
            time,
            open: close,
            high: close,
            low: close,
            close,
            volume: None,
        }
    }
}

/// Bar period: intraday minutes or a calendar unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Minutes(u32),
    Daily,
    Weekly,
    Monthly,
}

impl Resolution {
    /// Length of one period in seconds (a month counts as 31 days)
    pub fn seconds(&self) -> i64 {
        const DAY: i64 = 24 * 60 * 60;
        match self {
            Resolution::Minutes(m) => *m as i64 * 60,
            Resolution::Daily => DAY,
            Resolution::Weekly => 7 * DAY,
            Resolution::Monthly => 31 * DAY,
        }
    }
}

impl FromStr for Resolution {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "D" | "1D" => Ok(Resolution::Daily),
            "W" | "1W" => Ok(Resolution::Weekly),
            "M" | "1M" => Ok(Resolution::Monthly),
            other => match other.parse::<u32>() {
                Ok(minutes) if minutes > 0 => Ok(Resolution::Minutes(minutes)),
                _ => Err(BridgeError::InvalidResolution(s.to_string())),
            },
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Minutes(m) => write!(f, "{}", m),
            Resolution::Daily => f.write_str("D"),
            Resolution::Weekly => f.write_str("W"),
            Resolution::Monthly => f.write_str("M"),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_intraday_multipliers() -> Vec<String> {
    ["1", "5", "15", "30", "60"].iter().map(|s| s.to_string()).collect()
}

/// Symbol descriptor handed to the chart and back to the datafeed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub base_name: Vec<String>,
    #[serde(default)]
    pub legs: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub symbol_type: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub listed_exchange: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub pricescale: Option<f64>,
    #[serde(default)]
    pub minmov: Option<f64>,
    #[serde(default)]
    pub pointvalue: Option<f64>,
    #[serde(default)]
    pub has_intraday: bool,
    #[serde(default)]
    pub has_no_volume: bool,
    #[serde(default)]
    pub supported_resolutions: Vec<String>,
    #[serde(default = "default_intraday_multipliers")]
    pub intraday_multipliers: Vec<String>,
    #[serde(default = "default_true")]
    pub has_daily: bool,
    #[serde(default)]
    pub has_weekly_and_monthly: bool,
    #[serde(default)]
    pub has_empty_bars: bool,
    #[serde(default)]
    pub force_session_rebuild: bool,
    #[serde(default)]
    pub has_fractional_volume: bool,
}

impl SymbolInfo {
    /// Ticker used for history requests, falling back to the name
    pub fn ticker(&self) -> &str {
        self.ticker.as_deref().unwrap_or(&self.name)
    }
}

/// Per-symbol quote snapshot, forwarded to listeners verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteData {
    /// Per-symbol status ("ok" or "error")
    pub s: String,
    /// Symbol name
    pub n: String,
    /// Quote fields
    #[serde(default)]
    pub v: Map<String, Value>,
}

/// Symbol search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub symbol: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(rename = "type", default)]
    pub symbol_type: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Chart mark as returned by `/marks`; the shape is owned by the widget
pub type Mark = Value;

fn default_update_frequency_ms() -> i64 {
    10_000
}

fn default_quote_interval_secs() -> u64 {
    60
}

fn default_quote_fast_interval_secs() -> u64 {
    10
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_symbol_groups() -> Vec<String> {
    ["NYSE", "FOREX", "AMEX"].iter().map(|s| s.to_string()).collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_provider_id() -> String {
    crate::channel::DEFAULT_PROVIDER_ID.to_string()
}

fn default_watch_resolution() -> String {
    "1".to_string()
}

/// Runtime settings (loaded from TOML with environment overrides)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the UDF-compatible server
    pub datafeed_url: String,

    /// Bar polling period in milliseconds; zero or negative disables polling
    #[serde(default = "default_update_frequency_ms")]
    pub update_frequency_ms: i64,

    #[serde(default = "default_quote_interval_secs")]
    pub quote_update_interval_secs: u64,

    #[serde(default = "default_quote_fast_interval_secs")]
    pub quote_fast_update_interval_secs: u64,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Groups requested from `/symbol_info` when the server supports group requests
    #[serde(default = "default_symbol_groups")]
    pub symbol_groups: Vec<String>,

    /// Provider tag stamped on every message channel envelope
    #[serde(default = "default_provider_id")]
    pub provider_id: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    /// Symbols the demo binary subscribes to
    #[serde(default)]
    pub watch_symbols: Vec<String>,

    #[serde(default = "default_watch_resolution")]
    pub watch_resolution: String,

    /// Websocket of a chart frame host; when set the binary drives a widget over it
    #[serde(default)]
    pub widget_socket_url: Option<String>,
}

impl Settings {
    /// Settings with every optional field at its default
    pub fn with_url(datafeed_url: impl Into<String>) -> Self {
        Settings {
            datafeed_url: datafeed_url.into(),
            update_frequency_ms: default_update_frequency_ms(),
            quote_update_interval_secs: default_quote_interval_secs(),
            quote_fast_update_interval_secs: default_quote_fast_interval_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            symbol_groups: default_symbol_groups(),
            provider_id: default_provider_id(),
            log_level: default_log_level(),
            log_json: false,
            watch_symbols: Vec::new(),
            watch_resolution: default_watch_resolution(),
            widget_socket_url: None,
        }
    }
}
