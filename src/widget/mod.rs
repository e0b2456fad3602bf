/// Host-side controller for an embedded chart frame
///
/// Drives the chart over a [`MessageChannel`]: a `widgetReady` handshake
/// once the frame has loaded, then commands sent as notifications and
/// chart events delivered to registered handlers.
pub mod options;

pub use options::WidgetOptions;

use std::sync::Arc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::channel::{ChannelClient, Handler, MessageChannel, Transport};
use crate::error::Result;

/// Callback run once the chart reports ready
pub type ReadyHandler = Box<dyn FnOnce() + Send>;

/// `tradingview_` followed by five hex digits
pub fn widget_id() -> String {
    let random = uuid::Uuid::new_v4().as_u128();
    format!("tradingview_{:05x}", (random & 0xF_FFFF) as u32)
}

#[derive(Default)]
struct ReadyState {
    ready: bool,
    handlers: Vec<ReadyHandler>,
}

pub struct ChartWidget {
    id: String,
    options: WidgetOptions,
    client: ChannelClient,
    state: Arc<Mutex<ReadyState>>,
}

impl ChartWidget {
    /// Bind a widget to the frame reachable through `target`
    pub fn attach(
        options: WidgetOptions,
        channel: &MessageChannel,
        target: Arc<dyn Transport>,
    ) -> Result<Self> {
        let options = options.prepare()?;
        let id = widget_id();
        let client = channel.client(id.clone(), target);

        info!("Chart widget {} attached for {}", id, options.symbol);

        Ok(ChartWidget {
            id,
            options,
            client,
            state: Arc::new(Mutex::new(ReadyState::default())),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &WidgetOptions {
        &self.options
    }

    pub async fn is_ready(&self) -> bool {
        self.state.lock().await.ready
    }

    /// Start the ready handshake; call once the frame has loaded
    ///
    /// The returned task completes after the ready handlers ran and the
    /// frame was told initialization finished.
    pub fn frame_loaded(&self) -> JoinHandle<Result<()>> {
        let client = self.client.clone();
        let state = Arc::clone(&self.state);
        let id = self.id.clone();

        tokio::spawn(async move {
            client.request("widgetReady", json!({})).await?.await?;

            let handlers = {
                let mut state = state.lock().await;
                state.ready = true;
                std::mem::take(&mut state.handlers)
            };

            debug!("Widget {} ready, running {} handlers", id, handlers.len());
            // Most recently added first
            for handler in handlers.into_iter().rev() {
                handler();
            }

            client.notify("initializationFinished", Value::Null)
        })
    }

    /// Run `handler` once the chart is ready, immediately if it already is
    pub async fn on_chart_ready<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().await;
        if state.ready {
            drop(state);
            handler();
        } else {
            state.handlers.push(Box::new(handler));
        }
    }

    pub fn set_symbol(&self, symbol: &str, interval: &str) -> Result<()> {
        self.client
            .notify("changeSymbol", json!({ "symbol": symbol, "interval": interval }))
    }

    pub fn create_study(&self, name: &str, lock: bool) -> Result<()> {
        self.client.notify("createStudy", json!({ "name": name, "lock": lock }))
    }

    pub fn create_shape(&self, point: Value, options: Value) -> Result<()> {
        self.client
            .notify("createShape", json!({ "point": point, "options": options }))
    }

    /// Ask the chart to save; `handler` receives the saved state
    pub async fn save(&self, handler: Handler) -> Result<()> {
        self.client.channel().register("onChartSaved", handler).await;
        self.client.notify("saveChart", json!({}))
    }

    pub async fn on_symbol_change(&self, handler: Handler) {
        self.client.channel().register("onSymbolChange", handler).await;
    }

    pub async fn on_tick(&self, handler: Handler) {
        self.client.channel().register("onTick", handler).await;
    }

    pub async fn on_auto_save_needed(&self, handler: Handler) {
        self.client.channel().register("onAutoSaveNeeded", handler).await;
    }
}
