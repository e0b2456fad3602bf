/// Main entry point for the chartlink datafeed bridge
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chartlink::{
    channel::{handler, MessageChannel, Responder, Transport, WebSocketTransport},
    config::load_config,
    datafeed::UdfDatafeed,
    realtime::{BarListener, QuoteListener},
    types::{Bar, QuoteData},
    widget::{ChartWidget, WidgetOptions},
    Settings,
};

/// Application state
pub struct BridgeApp {
    settings: Arc<Settings>,
    datafeed: Arc<UdfDatafeed>,
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chartlink={},warn", settings.log_level)));

    if settings.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

impl BridgeApp {
    pub async fn new(config_path: &str) -> anyhow::Result<Self> {
        let settings = Arc::new(load_config(config_path)?);
        init_logging(&settings);

        info!("Starting chartlink against {}", settings.datafeed_url);

        let datafeed = Arc::new(UdfDatafeed::connect(&settings)?);
        datafeed.initialize().await?;

        Ok(BridgeApp { settings, datafeed })
    }

    /// Drive a chart frame reachable over a websocket
    async fn attach_widget(&self, url: &str) -> anyhow::Result<ChartWidget> {
        let (transport, inbound) = WebSocketTransport::connect(url).await?;
        let target: Arc<dyn Transport> = transport;

        let channel = MessageChannel::new(self.settings.provider_id.clone());
        channel.listen(inbound, Arc::clone(&target));

        let mut options = WidgetOptions::with_datafeed(self.settings.datafeed_url.clone());
        if let Some(symbol) = self.settings.watch_symbols.first() {
            options.symbol = symbol.clone();
        }
        options.interval = self.settings.watch_resolution.clone();

        let widget = ChartWidget::attach(options, &channel, target)?;
        widget
            .on_symbol_change(handler(|data, _responder: Responder| async move {
                info!("🔀 Chart symbol changed: {}", data);
                Ok(())
            }))
            .await;
        widget.on_chart_ready(|| info!("✅ Chart ready")).await;

        let handshake = widget.frame_loaded();
        tokio::spawn(async move {
            if let Ok(Err(e)) = handshake.await {
                warn!("Chart handshake failed: {}", e);
            }
        });

        Ok(widget)
    }

    /// Subscribe the watch list and log updates until Ctrl+C
    pub async fn run(&self) -> anyhow::Result<()> {
        let resolution = &self.settings.watch_resolution;

        let _widget = match &self.settings.widget_socket_url {
            Some(url) => Some(self.attach_widget(url).await?),
            None => None,
        };

        for name in &self.settings.watch_symbols {
            let symbol = match self.datafeed.resolve_symbol(name).await {
                Ok(symbol) => symbol,
                Err(e) => {
                    warn!("Skipping {}: {}", name, e);
                    continue;
                }
            };

            let label = symbol.full_name.clone();
            let listener: BarListener = Arc::new(move |bar: &Bar| {
                info!(
                    "📈 {} {} O:{} H:{} L:{} C:{} V:{:?}",
                    label, bar.time, bar.open, bar.high, bar.low, bar.close, bar.volume
                );
            });

            let guid = format!("{}_{}", symbol.full_name, resolution);
            self.datafeed
                .subscribe_bars(symbol, resolution, listener, &guid)
                .await;
        }

        if !self.settings.watch_symbols.is_empty() {
            let listener: QuoteListener = Arc::new(|quotes: &[QuoteData]| {
                for quote in quotes {
                    info!("💬 {} [{}] {:?}", quote.n, quote.s, quote.v);
                }
            });
            self.datafeed
                .subscribe_quotes(
                    self.settings.watch_symbols.clone(),
                    Vec::new(),
                    listener,
                    "watchlist",
                )
                .await;
        }

        info!("Watching {} symbols - press Ctrl+C to stop", self.settings.watch_symbols.len());
        tokio::signal::ctrl_c().await?;
        info!("Ctrl+C received - shutting down");

        self.datafeed.unsubscribe_quotes("watchlist").await;
        for name in &self.settings.watch_symbols {
            if let Ok(symbol) = self.datafeed.resolve_symbol(name).await {
                self.datafeed
                    .unsubscribe_bars(&format!("{}_{}", symbol.full_name, resolution))
                    .await;
            }
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| "config.toml".to_string());

    let app = BridgeApp::new(&config_path).await?;

    app.run().await?;

    Ok(())
}
