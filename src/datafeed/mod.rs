/// UDF-compatible datafeed adapter
///
/// Presents the callback surface a chart expects (configuration, symbol
/// search and resolution, history, marks, quotes, realtime subscriptions)
/// on top of a UDF REST server. Realtime updates are emulated by the
/// polling schedulers in [`crate::realtime`].
pub mod client;
pub mod configuration;
pub mod symbols;

pub use client::UdfClient;
pub use configuration::{default_supported_resolutions, DatafeedConfiguration};
pub use symbols::{SymbolsStorage, MAX_SEARCH_RESULTS};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use futures_util::future::{join_all, BoxFuture};
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};
use crate::realtime::{
    BarListener, BarScheduler, HistorySource, QuoteCadences, QuoteListener, QuoteScheduler,
    QuoteSource,
};
use crate::types::{Bar, Mark, QuoteData, SearchResult, Settings, SymbolInfo};

/// The UDF endpoints the datafeed needs beyond history and quotes
pub trait UdfApi: HistorySource + QuoteSource + 'static {
    fn fetch_configuration(&self) -> BoxFuture<'_, Result<DatafeedConfiguration>>;

    fn fetch_symbol_group<'a>(&'a self, group: &'a str) -> BoxFuture<'a, Result<Value>>;

    fn resolve_symbol<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<SymbolInfo>>;

    fn search<'a>(
        &'a self,
        query: &'a str,
        symbol_type: &'a str,
        exchange: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Vec<SearchResult>>;

    fn fetch_marks<'a>(
        &'a self,
        symbol: &'a SymbolInfo,
        from: i64,
        to: i64,
        resolution: &'a str,
    ) -> BoxFuture<'a, Vec<Mark>>;
}

pub struct UdfDatafeed<A: UdfApi = UdfClient> {
    api: Arc<A>,
    symbol_groups: Vec<String>,
    configuration: watch::Sender<Option<Arc<DatafeedConfiguration>>>,
    initialized: watch::Sender<bool>,
    storage: RwLock<Option<SymbolsStorage>>,
    bars: BarScheduler,
    quotes: QuoteScheduler,
}

impl UdfDatafeed<UdfClient> {
    /// Datafeed talking HTTP to `settings.datafeed_url`
    pub fn connect(settings: &Settings) -> Result<Self> {
        let client = UdfClient::new(
            &settings.datafeed_url,
            Duration::from_secs(settings.http_timeout_secs),
        )?;
        Ok(Self::new(Arc::new(client), settings))
    }
}

impl<A: UdfApi> UdfDatafeed<A> {
    /// Build the datafeed and start its schedulers
    ///
    /// Call [`initialize`](Self::initialize) before use; operations that
    /// need configuration or symbols wait for it.
    pub fn new(api: Arc<A>, settings: &Settings) -> Self {
        let history: Arc<dyn HistorySource> = api.clone();
        let quotes: Arc<dyn QuoteSource> = api.clone();

        let cadences = QuoteCadences {
            slow: Duration::from_secs(settings.quote_update_interval_secs),
            fast: Duration::from_secs(settings.quote_fast_update_interval_secs),
        };

        UdfDatafeed {
            api,
            symbol_groups: settings.symbol_groups.clone(),
            configuration: watch::Sender::new(None),
            initialized: watch::Sender::new(false),
            storage: RwLock::new(None),
            bars: BarScheduler::new(history, settings.update_frequency_ms),
            quotes: QuoteScheduler::new(quotes, cadences),
        }
    }

    /// Load configuration and, for group-capable servers, all symbol groups
    pub async fn initialize(&self) -> Result<()> {
        let configuration = match self.api.fetch_configuration().await {
            Ok(configuration) => configuration,
            Err(e) => {
                warn!("Using default datafeed configuration: {}", e);
                DatafeedConfiguration::default()
            }
        };

        if let Err(e) = configuration.validate() {
            error!("Datafeed configuration rejected: {} ({})", e, e.error_code());
            return Err(e);
        }

        let load_groups = configuration.supports_group_request;
        info!(
            "Datafeed configured (search: {}, group request: {}, marks: {})",
            configuration.supports_search,
            configuration.supports_group_request,
            configuration.supports_marks
        );
        self.configuration.send_replace(Some(Arc::new(configuration)));

        if load_groups {
            let storage = self.load_symbol_groups().await;
            info!("All exchanges data ready ({} symbols)", storage.len());
            *self.storage.write().await = Some(storage);
        }

        self.initialized.send_replace(true);
        Ok(())
    }

    async fn load_symbol_groups(&self) -> SymbolsStorage {
        let mut seen = HashSet::new();
        let groups: Vec<&str> = self
            .symbol_groups
            .iter()
            .map(String::as_str)
            .filter(|g| seen.insert(*g))
            .collect();

        // Symbols without their own list get the built-in one, not the server's
        let mut storage = SymbolsStorage::new(default_supported_resolutions());

        let requests = groups.iter().map(|group| self.api.fetch_symbol_group(group));
        let responses = join_all(requests).await;

        for (group, response) in groups.iter().zip(responses) {
            match response {
                Ok(data) => match storage.add_group(group, &data) {
                    Ok(count) => debug!("Group {} delivered {} symbols", group, count),
                    Err(e) => error!("API error when processing exchange {}: {}", group, e),
                },
                Err(e) => warn!("Symbol group {} unavailable: {}", group, e),
            }
        }

        storage.finish();
        storage
    }

    /// Configuration once loaded (waits for `initialize`)
    pub async fn configuration(&self) -> Arc<DatafeedConfiguration> {
        let mut rx = self.configuration.subscribe();
        let current = match rx.wait_for(Option::is_some).await {
            Ok(configuration) => (*configuration).clone(),
            Err(_) => None,
        };
        current.unwrap_or_else(|| Arc::new(DatafeedConfiguration::default()))
    }

    async fn wait_initialized(&self) {
        let mut rx = self.initialized.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.borrow()
    }

    /// Configuration with the study engine options attached
    pub async fn setup(&self, engine: Option<Value>) -> DatafeedConfiguration {
        let mut configuration = (*self.configuration().await).clone();
        configuration.engine = engine;
        configuration
    }

    pub async fn search_symbols(
        &self,
        query: &str,
        exchange: &str,
        symbol_type: &str,
    ) -> Result<Vec<SearchResult>> {
        let configuration = self.configuration().await;

        if configuration.supports_search {
            return Ok(self
                .api
                .search(query, symbol_type, exchange, MAX_SEARCH_RESULTS)
                .await);
        }

        self.wait_initialized().await;
        let storage = self.storage.read().await;
        let storage = storage.as_ref().ok_or_else(|| {
            BridgeError::UnsupportedConfiguration(
                "Cannot use local symbol search when no groups information is available"
                    .to_string(),
            )
        })?;

        Ok(storage.search(query, exchange, symbol_type, MAX_SEARCH_RESULTS))
    }

    /// Resolve by name; does not consider the symbol's exchange
    pub async fn resolve_symbol(&self, name: &str) -> Result<SymbolInfo> {
        self.wait_initialized().await;

        if !self.configuration().await.supports_group_request {
            return self.api.resolve_symbol(name).await;
        }

        let storage = self.storage.read().await;
        match storage.as_ref() {
            Some(storage) => storage.resolve(name),
            None => Err(BridgeError::InvalidSymbol),
        }
    }

    pub async fn get_bars(
        &self,
        symbol: &SymbolInfo,
        resolution: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Bar>> {
        self.api.fetch_bars(symbol, resolution, from, to).await
    }

    /// Marks when the server supports them, otherwise none
    pub async fn get_marks(
        &self,
        symbol: &SymbolInfo,
        from: i64,
        to: i64,
        resolution: &str,
    ) -> Vec<Mark> {
        if !self.configuration().await.supports_marks {
            return Vec::new();
        }
        self.api.fetch_marks(symbol, from, to, resolution).await
    }

    pub async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteData>> {
        self.api.fetch_quotes(symbols).await
    }

    pub async fn subscribe_bars(
        &self,
        symbol: SymbolInfo,
        resolution: &str,
        listener: BarListener,
        listener_guid: &str,
    ) {
        self.bars.subscribe(symbol, resolution, listener, listener_guid).await;
    }

    pub async fn unsubscribe_bars(&self, listener_guid: &str) {
        self.bars.unsubscribe(listener_guid).await;
    }

    pub async fn subscribe_quotes(
        &self,
        symbols: Vec<String>,
        fast_symbols: Vec<String>,
        listener: QuoteListener,
        listener_guid: &str,
    ) {
        self.quotes
            .subscribe(symbols, fast_symbols, listener, listener_guid)
            .await;
    }

    pub async fn unsubscribe_quotes(&self, listener_guid: &str) {
        self.quotes.unsubscribe(listener_guid).await;
    }

    /// History depth hint for the chart; the UDF adapter has no opinion
    pub fn calculate_history_depth(
        &self,
        _resolution: &str,
        _periods_back: u32,
        _interval_back: &str,
    ) -> Option<Value> {
        None
    }

    pub fn bar_scheduler(&self) -> &BarScheduler {
        &self.bars
    }

    pub fn quote_scheduler(&self) -> &QuoteScheduler {
        &self.quotes
    }
}
