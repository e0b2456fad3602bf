/// Chart widget options and frame URL construction
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, Result};

const NEWS_VENDORS: [&str; 2] = ["headlines", "stocktwits"];

/// Separator the chart frame expects between study names
const STUDY_SEPARATOR: char = '\x1F';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetOptions {
    pub width: u32,
    pub height: u32,
    pub symbol: String,
    pub interval: String,
    pub timezone: String,
    pub autosize: bool,
    pub save_image: bool,
    pub container_id: String,
    pub toolbar_bg: String,
    pub studies: Vec<String>,
    pub theme: String,
    /// Only kept when positive
    pub widgetbar_width: Option<i64>,
    /// UDF server the chart pulls from; required
    pub datafeed_url: Option<String>,
    pub library_path: String,
    pub enabled_studies: Vec<String>,
    pub enabled_drawings: Vec<String>,
    pub disabled_drawings: Vec<String>,
    pub saved_data: Option<Value>,
    pub locale: Option<String>,
    /// Requested news vendors; unknown vendors are dropped
    pub news: Vec<String>,
}

impl Default for WidgetOptions {
    fn default() -> Self {
        WidgetOptions {
            width: 800,
            height: 500,
            symbol: "FX:SPX500".to_string(),
            interval: "1".to_string(),
            timezone: String::new(),
            autosize: false,
            save_image: true,
            container_id: String::new(),
            toolbar_bg: "f4f7f9".to_string(),
            studies: Vec::new(),
            theme: String::new(),
            widgetbar_width: None,
            datafeed_url: None,
            library_path: String::new(),
            enabled_studies: Vec::new(),
            enabled_drawings: Vec::new(),
            disabled_drawings: Vec::new(),
            saved_data: None,
            locale: None,
            news: Vec::new(),
        }
    }
}

impl WidgetOptions {
    pub fn with_datafeed(datafeed_url: impl Into<String>) -> Self {
        WidgetOptions {
            datafeed_url: Some(datafeed_url.into()),
            ..WidgetOptions::default()
        }
    }

    /// Check required fields and normalize the rest
    pub fn prepare(mut self) -> Result<Self> {
        if self.datafeed_url.as_deref().map_or(true, str::is_empty) {
            return Err(BridgeError::InvalidParameter("Datafeed is not defined".to_string()));
        }

        self.news.retain(|vendor| NEWS_VENDORS.contains(&vendor.as_str()));
        self.widgetbar_width = self.widgetbar_width.filter(|w| *w > 0);
        self.toolbar_bg = self.toolbar_bg.trim_start_matches('#').to_string();

        Ok(self)
    }

    /// URL of the chart frame page, relative to the library path
    pub fn frame_url(&self) -> Result<String> {
        let mut url = Url::parse("http://frame.local/")
            .map_err(|e| BridgeError::InternalError(e.to_string()))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("localserver", "1")
                .append_pair("symbol", &self.symbol)
                .append_pair("interval", &self.interval)
                .append_pair("toolbarbg", self.toolbar_bg.trim_start_matches('#'));

            if let Some(width) = self.widgetbar_width.filter(|w| *w > 0) {
                query.append_pair("widgetbarwidth", &width.to_string());
            }

            let studies: Vec<&str> = self.studies.iter().map(String::as_str).collect();
            query.append_pair("studies", &studies.join(&STUDY_SEPARATOR.to_string()));

            if !self.theme.is_empty() {
                query.append_pair("theme", &self.theme);
            }

            query
                .append_pair("enabledStudies", &serde_json::to_string(&self.enabled_studies)?)
                .append_pair("enabledDrawings", &serde_json::to_string(&self.enabled_drawings)?)
                .append_pair("disabledDrawings", &serde_json::to_string(&self.disabled_drawings)?);

            if let Some(locale) = &self.locale {
                query.append_pair("locale", locale);
            }
            if !self.timezone.is_empty() {
                query.append_pair("timezone", &self.timezone);
            }
        }

        Ok(format!(
            "{}static/tv-chart.html?{}",
            self.library_path,
            url.query().unwrap_or_default()
        ))
    }
}
