/// UDF REST client
///
/// Speaks the UDF protocol: `/config`, `/symbol_info`, `/symbols`,
/// `/search`, `/history`, `/quotes` and `/marks`. Every endpoint answers
/// JSON; the columnar `/history` payload is turned into bars here.
use std::time::Duration;
use futures_util::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::configuration::DatafeedConfiguration;
use super::UdfApi;
use crate::error::{BridgeError, Result};
use crate::realtime::{HistorySource, QuoteSource};
use crate::types::{Bar, Mark, QuoteData, SearchResult, SymbolInfo};

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    s: String,
    #[serde(default)]
    errmsg: Option<String>,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    o: Option<Vec<f64>>,
    #[serde(default)]
    h: Option<Vec<f64>>,
    #[serde(default)]
    l: Option<Vec<f64>>,
    #[serde(default)]
    v: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct QuotesResponse {
    s: String,
    #[serde(default)]
    errmsg: Option<String>,
    #[serde(default)]
    d: Vec<QuoteData>,
}

fn column(values: &Option<Vec<f64>>, name: &str, index: usize) -> Result<Option<f64>> {
    match values {
        None => Ok(None),
        Some(values) => values
            .get(index)
            .copied()
            .map(Some)
            .ok_or_else(|| BridgeError::MalformedResponse(format!("column `{}` too short", name))),
    }
}

/// Turn a `/history` body into bars with millisecond times
///
/// Without `o` the open, high and low repeat the close; volume is set only
/// when `v` is present.
pub fn parse_history(body: &str) -> Result<Vec<Bar>> {
    let data: HistoryResponse = serde_json::from_str(body)?;

    if data.s != "ok" {
        debug!("History status {} ({:?})", data.s, data.errmsg);
        return Err(BridgeError::DatafeedStatus(data.s));
    }

    let ohl_present = data.o.is_some();
    let mut bars = Vec::with_capacity(data.t.len());

    for (i, &time) in data.t.iter().enumerate() {
        let close = *data
            .c
            .get(i)
            .ok_or_else(|| BridgeError::MalformedResponse("column `c` too short".to_string()))?;

        let mut bar = Bar::flat(time * 1000, close);
        if ohl_present {
            bar.open = column(&data.o, "o", i)?.unwrap_or(close);
            bar.high = column(&data.h, "h", i)?.unwrap_or(close);
            bar.low = column(&data.l, "l", i)?.unwrap_or(close);
        }
        bar.volume = column(&data.v, "v", i)?;

        bars.push(bar);
    }

    if bars.is_empty() {
        return Err(BridgeError::NoData);
    }

    Ok(bars)
}

/// Quote payload of a `/quotes` body, or the server's error message
pub fn parse_quotes(body: &str) -> Result<Vec<QuoteData>> {
    let data: QuotesResponse = serde_json::from_str(body)?;

    if data.s == "ok" {
        Ok(data.d)
    } else {
        Err(BridgeError::DatafeedStatus(data.errmsg.unwrap_or(data.s)))
    }
}

/// Search hits of a `/search` body; an error status yields no hits
pub fn parse_search(body: &str) -> Result<Vec<SearchResult>> {
    let data: Value = serde_json::from_str(body)?;

    if data.get("s").and_then(Value::as_str) == Some("error") {
        return Ok(Vec::new());
    }

    Ok(serde_json::from_value(data)?)
}

/// Symbol of a `/symbols` body; any non-`ok` status is an unknown symbol
pub fn parse_symbol(body: &str) -> Result<SymbolInfo> {
    let data: Value = serde_json::from_str(body)?;

    if let Some(status) = data.get("s").and_then(Value::as_str) {
        if status != "ok" {
            return Err(BridgeError::UnknownSymbol);
        }
    }

    Ok(serde_json::from_value(data)?)
}

/// UDF-compatible server client
pub struct UdfClient {
    client: Client,
    base_url: String,
}

impl UdfClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(UdfClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, path: &str, params: &[(&str, String)]) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        debug!("New request: {} {:?}", url, params);

        let response = self.client.get(&url).query(params).send().await?;
        let response = response.error_for_status()?;
        Ok(response.text().await?)
    }

    pub async fn request_configuration(&self) -> Result<DatafeedConfiguration> {
        let body = self.send("/config", &[]).await?;
        DatafeedConfiguration::from_json(&body)
    }

    pub async fn request_symbol_group(&self, group: &str) -> Result<Value> {
        let body = self.send("/symbol_info", &[("group", group.to_string())]).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Resolve a single symbol; every failure is reported as `unknown_symbol`
    pub async fn request_symbol(&self, name: &str) -> Result<SymbolInfo> {
        let result = match self.send("/symbols", &[("symbol", name.to_uppercase())]).await {
            Ok(body) => parse_symbol(&body),
            Err(e) => Err(e),
        };

        result.map_err(|e| {
            debug!("Resolving {} failed: {}", name, e);
            BridgeError::UnknownSymbol
        })
    }

    /// Server-side search; failures yield no hits
    pub async fn request_search(
        &self,
        query: &str,
        symbol_type: &str,
        exchange: &str,
        limit: usize,
    ) -> Vec<SearchResult> {
        let params = [
            ("limit", limit.to_string()),
            ("query", query.to_uppercase()),
            ("type", symbol_type.to_string()),
            ("exchange", exchange.to_string()),
        ];

        match self.send("/search", &params).await.and_then(|body| parse_search(&body)) {
            Ok(results) => results,
            Err(e) => {
                warn!("Symbol search for {} failed: {}", query, e);
                Vec::new()
            }
        }
    }

    /// Bars for `[from, to]` in epoch seconds
    pub async fn request_history(
        &self,
        symbol: &SymbolInfo,
        resolution: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Bar>> {
        // Unix seconds have ten digits until 2286
        if from > 0 && from.to_string().len() > 10 {
            return Err(BridgeError::MillisecondTimestamp(from));
        }

        let params = [
            ("symbol", symbol.ticker().to_uppercase()),
            ("resolution", resolution.to_string()),
            ("from", from.to_string()),
            ("to", to.to_string()),
        ];

        let body = self.send("/history", &params).await?;
        parse_history(&body)
    }

    pub async fn request_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteData>> {
        let body = self.send("/quotes", &[("symbols", symbols.join(","))]).await?;
        parse_quotes(&body)
    }

    /// Marks for the range; failures yield no marks
    pub async fn request_marks(
        &self,
        symbol: &SymbolInfo,
        from: i64,
        to: i64,
        resolution: &str,
    ) -> Vec<Mark> {
        let params = [
            ("symbol", symbol.ticker().to_uppercase()),
            ("from", from.to_string()),
            ("to", to.to_string()),
            ("resolution", resolution.to_string()),
        ];

        let result = match self.send("/marks", &params).await {
            Ok(body) => serde_json::from_str::<Vec<Mark>>(&body).map_err(BridgeError::from),
            Err(e) => Err(e),
        };

        result.unwrap_or_else(|e| {
            warn!("Marks request for {} failed: {}", symbol.name, e);
            Vec::new()
        })
    }
}

impl HistorySource for UdfClient {
    fn fetch_bars<'a>(
        &'a self,
        symbol: &'a SymbolInfo,
        resolution: &'a str,
        from: i64,
        to: i64,
    ) -> BoxFuture<'a, Result<Vec<Bar>>> {
        Box::pin(self.request_history(symbol, resolution, from, to))
    }
}

impl QuoteSource for UdfClient {
    fn fetch_quotes<'a>(&'a self, symbols: &'a [String]) -> BoxFuture<'a, Result<Vec<QuoteData>>> {
        Box::pin(self.request_quotes(symbols))
    }
}

impl UdfApi for UdfClient {
    fn fetch_configuration(&self) -> BoxFuture<'_, Result<DatafeedConfiguration>> {
        Box::pin(self.request_configuration())
    }

    fn fetch_symbol_group<'a>(&'a self, group: &'a str) -> BoxFuture<'a, Result<Value>> {
        Box::pin(self.request_symbol_group(group))
    }

    fn resolve_symbol<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<SymbolInfo>> {
        Box::pin(self.request_symbol(name))
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
        symbol_type: &'a str,
        exchange: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Vec<SearchResult>> {
        Box::pin(self.request_search(query, symbol_type, exchange, limit))
    }

    fn fetch_marks<'a>(
        &'a self,
        symbol: &'a SymbolInfo,
        from: i64,
        to: i64,
        resolution: &'a str,
    ) -> BoxFuture<'a, Vec<Mark>> {
        Box::pin(self.request_marks(symbol, from, to, resolution))
    }
}
