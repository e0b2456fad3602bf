/// Datafeed configuration as served by `/config`
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BridgeError, Result};

pub fn default_supported_resolutions() -> Vec<String> {
    ["1", "5", "15", "30", "60", "1D", "1W", "1M"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawConfiguration")]
pub struct DatafeedConfiguration {
    pub supports_search: bool,

    pub supports_group_request: bool,

    pub supported_resolutions: Vec<String>,

    pub supports_marks: bool,

    pub exchanges: Vec<Value>,

    pub symbols_types: Vec<Value>,

    /// Study engine options attached by `setup`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<Value>,

    /// Server-specific fields passed through to the chart untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `/config` as sent, with both spellings of the renamed fields
///
/// The snake_case spelling wins when a server sends both.
#[derive(Deserialize)]
struct RawConfiguration {
    #[serde(default)]
    supports_search: bool,
    #[serde(default)]
    supports_group_request: bool,
    #[serde(default)]
    supported_resolutions: Option<Vec<String>>,
    #[serde(default, rename = "supportedResolutions")]
    legacy_supported_resolutions: Option<Vec<String>>,
    #[serde(default)]
    supports_marks: bool,
    #[serde(default)]
    exchanges: Option<Vec<Value>>,
    #[serde(default)]
    symbols_types: Option<Vec<Value>>,
    #[serde(default, rename = "symbolsTypes")]
    legacy_symbols_types: Option<Vec<Value>>,
    #[serde(default)]
    engine: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RawConfiguration> for DatafeedConfiguration {
    fn from(raw: RawConfiguration) -> Self {
        DatafeedConfiguration {
            supports_search: raw.supports_search,
            supports_group_request: raw.supports_group_request,
            supported_resolutions: raw
                .supported_resolutions
                .or(raw.legacy_supported_resolutions)
                .unwrap_or_default(),
            supports_marks: raw.supports_marks,
            exchanges: raw.exchanges.unwrap_or_default(),
            symbols_types: raw.symbols_types.or(raw.legacy_symbols_types).unwrap_or_default(),
            engine: raw.engine,
            extra: raw.extra,
        }
    }
}

impl Default for DatafeedConfiguration {
    fn default() -> Self {
        DatafeedConfiguration {
            supports_search: false,
            supports_group_request: true,
            supported_resolutions: default_supported_resolutions(),
            supports_marks: false,
            exchanges: Vec::new(),
            symbols_types: Vec::new(),
            engine: None,
            extra: Map::new(),
        }
    }
}

impl DatafeedConfiguration {
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// A datafeed must offer at least one way to find symbols
    pub fn validate(&self) -> Result<()> {
        if !self.supports_search && !self.supports_group_request {
            return Err(BridgeError::UnsupportedConfiguration(
                "Must either support search, or support group request".to_string(),
            ));
        }
        Ok(())
    }

    /// Symbol search runs locally over group data
    pub fn uses_local_search(&self) -> bool {
        !self.supports_search
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = DatafeedConfiguration::default();
        assert!(config.supports_group_request);
        assert!(!config.supports_search);
        assert_eq!(config.supported_resolutions.len(), 8);
        assert!(config.validate().is_ok());
        assert!(config.uses_local_search());
    }

    #[test]
    fn test_legacy_aliases_and_missing_exchanges() {
        let config = DatafeedConfiguration::from_json(
            r#"{"supports_search":true,"supportedResolutions":["1","D"],
                "symbolsTypes":[{"name":"All","value":""}],"currency":"USD"}"#,
        )
        .unwrap();

        assert_eq!(config.supported_resolutions, vec!["1", "D"]);
        assert_eq!(config.symbols_types.len(), 1);
        assert!(config.exchanges.is_empty());
        assert_eq!(config.extra["currency"], "USD");
    }

    #[test]
    fn test_rejects_search_less_configuration() {
        let config = DatafeedConfiguration::from_json(
            r#"{"supports_search":false,"supports_group_request":false}"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(BridgeError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn test_snake_case_wins_over_legacy_spelling() {
        let config = DatafeedConfiguration::from_json(
            r#"{"supports_search":true,"supports_marks":true,
                "supported_resolutions":["1","5"],"supportedResolutions":["D"],
                "symbols_types":[{"name":"Stock","value":"stock"}],"symbolsTypes":[]}"#,
        )
        .unwrap();

        assert_eq!(config.supported_resolutions, vec!["1", "5"]);
        assert_eq!(config.symbols_types.len(), 1);
        assert!(config.supports_search);
        assert!(config.supports_marks);
        // Legacy spellings are consumed, not passed through
        assert!(!config.extra.contains_key("supportedResolutions"));
        assert!(!config.extra.contains_key("symbolsTypes"));
    }

    #[test]
    fn test_serialized_configuration_reads_back() {
        let config = DatafeedConfiguration {
            engine: Some(serde_json::json!({ "studies": 1 })),
            ..DatafeedConfiguration::default()
        };
        let body = serde_json::to_string(&config).unwrap();
        assert_eq!(DatafeedConfiguration::from_json(&body).unwrap(), config);
    }
}
