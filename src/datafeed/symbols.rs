/// Symbol storage built from `/symbol_info` group tables, plus local search
///
/// A group table is a JSON object of columns. A column is either an array
/// with one entry per symbol or a scalar shared by every symbol in the group.
use std::collections::HashMap;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::types::{SearchResult, SymbolInfo};

pub const MAX_SEARCH_RESULTS: usize = 30;

/// Column value for one symbol; null counts as missing
fn table_field<'a>(table: &'a Map<String, Value>, name: &str, index: usize) -> Option<&'a Value> {
    let value = match table.get(name)? {
        Value::Array(items) => items.get(index)?,
        scalar => scalar,
    };
    (!value.is_null()).then_some(value)
}

fn text_field(table: &Map<String, Value>, name: &str, index: usize) -> Option<String> {
    table_field(table, name, index).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn number_field(table: &Map<String, Value>, name: &str, index: usize) -> Option<f64> {
    table_field(table, name, index).and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

fn bool_field(table: &Map<String, Value>, name: &str, index: usize) -> Option<bool> {
    table_field(table, name, index).and_then(|v| match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    })
}

fn list_field(table: &Map<String, Value>, name: &str, index: usize) -> Option<Vec<String>> {
    // A per-symbol list column is an array of arrays; a shared list is a flat array
    let column = table.get(name)?;
    let list = match column {
        Value::Array(items) if items.iter().all(|i| i.is_array()) => items.get(index)?,
        other => other,
    };
    list.as_array().map(|items| {
        items
            .iter()
            .map(|i| i.as_str().map(str::to_string).unwrap_or_else(|| i.to_string()))
            .collect()
    })
}

#[derive(Debug, Default)]
pub struct SymbolsStorage {
    /// Keyed by both `EXCHANGE:NAME` and bare name
    symbols_info: HashMap<String, SymbolInfo>,
    symbols_list: Vec<String>,
    default_resolutions: Vec<String>,
}

impl SymbolsStorage {
    pub fn new(default_resolutions: Vec<String>) -> Self {
        SymbolsStorage {
            symbols_info: HashMap::new(),
            symbols_list: Vec::new(),
            default_resolutions,
        }
    }

    /// Add every symbol of one group table; returns how many were added
    ///
    /// Symbols before a malformed entry stay stored.
    pub fn add_group(&mut self, group: &str, data: &Value) -> Result<usize> {
        let malformed = |index: usize, reason: &str| BridgeError::MalformedSymbolGroup {
            group: group.to_string(),
            index,
            reason: reason.to_string(),
        };

        let table = data.as_object().ok_or_else(|| malformed(0, "not an object"))?;
        let names = table
            .get("symbol")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed(0, "missing symbol column"))?;

        for (index, name) in names.iter().enumerate() {
            let name = name.as_str().ok_or_else(|| malformed(index, "symbol is not a string"))?;
            let info = self
                .build_symbol(table, name, index)
                .map_err(|reason| malformed(index, reason))?;

            let full_name = info.full_name.clone();
            self.symbols_info.insert(full_name.clone(), info.clone());
            self.symbols_info.insert(name.to_string(), info);
            self.symbols_list.push(name.to_string());
        }

        debug!("Stored {} symbols from group {}", names.len(), group);
        Ok(names.len())
    }

    fn build_symbol(
        &self,
        table: &Map<String, Value>,
        name: &str,
        index: usize,
    ) -> std::result::Result<SymbolInfo, &'static str> {
        let traded = text_field(table, "exchange-traded", index).ok_or("missing exchange-traded")?;
        let listed = text_field(table, "exchange-listed", index).unwrap_or_else(|| traded.clone());
        let full_name = format!("{}:{}", traded, name);

        let ticker = if table.contains_key("ticker") {
            text_field(table, "ticker", index)
        } else {
            Some(name.to_string())
        };

        Ok(SymbolInfo {
            name: name.to_string(),
            ticker,
            base_name: vec![format!("{}:{}", listed, name)],
            legs: vec![full_name.clone()],
            full_name,
            description: text_field(table, "description", index).unwrap_or_default(),
            symbol_type: text_field(table, "type", index).unwrap_or_default(),
            session: text_field(table, "session-regular", index).unwrap_or_default(),
            exchange: traded,
            listed_exchange: listed,
            timezone: text_field(table, "timezone", index).unwrap_or_default(),
            pricescale: number_field(table, "pricescale", index),
            minmov: number_field(table, "minmovement", index)
                .or_else(|| number_field(table, "minmov", index)),
            pointvalue: number_field(table, "pointvalue", index),
            has_intraday: bool_field(table, "has-intraday", index).unwrap_or(false),
            has_no_volume: bool_field(table, "has-no-volume", index).unwrap_or(false),
            supported_resolutions: list_field(table, "supported-resolutions", index)
                .unwrap_or_else(|| self.default_resolutions.clone()),
            intraday_multipliers: list_field(table, "intraday-multipliers", index)
                .unwrap_or_else(|| {
                    ["1", "5", "15", "30", "60"].iter().map(|s| s.to_string()).collect()
                }),
            has_daily: bool_field(table, "has-daily", index).unwrap_or(true),
            has_weekly_and_monthly: bool_field(table, "has-weekly-and-monthly", index)
                .unwrap_or(false),
            has_empty_bars: bool_field(table, "has-empty-bars", index).unwrap_or(false),
            force_session_rebuild: bool_field(table, "force-session-rebuild", index)
                .unwrap_or(false),
            has_fractional_volume: bool_field(table, "has-fractional-volume", index)
                .unwrap_or(false),
        })
    }

    /// Called once every group has answered
    pub fn finish(&mut self) {
        self.symbols_list.sort();
    }

    pub fn len(&self) -> usize {
        self.symbols_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols_list.is_empty()
    }

    /// Exact lookup by bare or exchange-qualified name
    ///
    /// Does not consider the exchange of a bare name: the last group loaded wins.
    pub fn resolve(&self, name: &str) -> Result<SymbolInfo> {
        self.symbols_info
            .get(name)
            .cloned()
            .ok_or(BridgeError::InvalidSymbol)
    }

    /// Prefix search over the sorted symbol list
    ///
    /// Empty `symbol_type` or `exchange` means no filter; an empty query
    /// matches everything.
    pub fn search(
        &self,
        query: &str,
        exchange: &str,
        symbol_type: &str,
        limit: usize,
    ) -> Vec<SearchResult> {
        let mut results = Vec::new();

        for name in &self.symbols_list {
            if results.len() >= limit {
                break;
            }

            let Some(item) = self.symbols_info.get(name) else {
                continue;
            };

            if !symbol_type.is_empty() && item.symbol_type != symbol_type {
                continue;
            }
            if !exchange.is_empty() && item.exchange != exchange {
                continue;
            }

            if query.is_empty() || item.name.starts_with(query) {
                results.push(SearchResult {
                    symbol: item.name.clone(),
                    full_name: item.full_name.clone(),
                    description: item.description.clone(),
                    exchange: item.exchange.clone(),
                    ticker: None,
                    symbol_type: item.symbol_type.clone(),
                    params: Vec::new(),
                });
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nyse_group() -> Value {
        json!({
            "symbol": ["MSFT", "AAPL", "AMZN"],
            "description": ["Microsoft", "Apple", "Amazon"],
            "exchange-listed": "NASDAQ",
            "exchange-traded": "NYSE",
            "minmovement": 1,
            "pricescale": [100, 100, 1000],
            "type": ["stock", "stock", "etf"],
            "session-regular": "0930-1600",
            "timezone": "America/New_York",
            "has-intraday": true,
            "has-no-volume": [false, false, true],
            "supported-resolutions": ["1", "D"]
        })
    }

    fn storage() -> SymbolsStorage {
        let mut storage = SymbolsStorage::new(vec!["D".to_string()]);
        storage.add_group("NYSE", &nyse_group()).unwrap();
        storage.finish();
        storage
    }

    #[test]
    fn test_group_table_with_scalar_and_array_columns() {
        let storage = storage();
        assert_eq!(storage.len(), 3);

        let amzn = storage.resolve("AMZN").unwrap();
        assert_eq!(amzn.full_name, "NYSE:AMZN");
        assert_eq!(amzn.base_name, vec!["NASDAQ:AMZN"]);
        assert_eq!(amzn.legs, vec!["NYSE:AMZN"]);
        assert_eq!(amzn.listed_exchange, "NASDAQ");
        assert_eq!(amzn.pricescale, Some(1000.0));
        assert_eq!(amzn.minmov, Some(1.0));
        assert_eq!(amzn.symbol_type, "etf");
        assert!(amzn.has_intraday);
        assert!(amzn.has_no_volume);
        assert_eq!(amzn.ticker(), "AMZN");
        assert_eq!(amzn.supported_resolutions, vec!["1", "D"]);
        assert!(amzn.has_daily);
        assert!(!amzn.has_empty_bars);

        assert_eq!(storage.resolve("NYSE:AAPL").unwrap().description, "Apple");
    }

    #[test]
    fn test_resolve_unknown_symbol() {
        assert!(matches!(storage().resolve("GOOG"), Err(BridgeError::InvalidSymbol)));
    }

    #[test]
    fn test_defaults_for_missing_columns() {
        let mut storage = SymbolsStorage::new(vec!["D".to_string(), "W".to_string()]);
        storage
            .add_group(
                "FOREX",
                &json!({ "symbol": ["EURUSD"], "exchange-traded": "FOREX", "minmov": 1 }),
            )
            .unwrap();

        let info = storage.resolve("FOREX:EURUSD").unwrap();
        assert_eq!(info.supported_resolutions, vec!["D", "W"]);
        assert_eq!(info.intraday_multipliers, vec!["1", "5", "15", "30", "60"]);
        assert_eq!(info.minmov, Some(1.0));
        assert_eq!(info.listed_exchange, "FOREX");
    }

    #[test]
    fn test_malformed_group_names_index() {
        let mut storage = SymbolsStorage::new(Vec::new());
        let err = storage
            .add_group("AMEX", &json!({ "symbol": ["SPY", "QQQ"], "exchange-traded": ["AMEX"] }))
            .unwrap_err();

        match err {
            BridgeError::MalformedSymbolGroup { group, index, .. } => {
                assert_eq!(group, "AMEX");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected error: {}", other),
        }
        // Symbols before the bad entry are kept
        assert!(storage.resolve("SPY").is_ok());
    }

    #[test]
    fn test_search_prefix_and_filters() {
        let storage = storage();

        let hits = storage.search("A", "", "", MAX_SEARCH_RESULTS);
        let names: Vec<_> = hits.iter().map(|h| h.symbol.as_str()).collect();
        assert_eq!(names, vec!["AAPL", "AMZN"]);

        let etfs = storage.search("", "", "etf", MAX_SEARCH_RESULTS);
        assert_eq!(etfs.len(), 1);
        assert_eq!(etfs[0].full_name, "NYSE:AMZN");

        assert!(storage.search("", "AMEX", "", MAX_SEARCH_RESULTS).is_empty());
        assert_eq!(storage.search("", "", "", 2).len(), 2);
    }
}
