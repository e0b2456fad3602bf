/// Bar pulse updater - emulates a realtime bar stream by polling history
///
/// Every tick re-fetches a short trailing window for each subscription and
/// compares its last bar with the last one observed. Fetching a single bar
/// cannot tell "bar unchanged" from "bar closed, new bar opened", so the
/// window always covers several periods and the closed bar is re-emitted in
/// its settled form before the new one.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{HistorySource, TickOutcome};
use crate::error::{BridgeError, Result};
use crate::types::{Bar, Resolution, SymbolInfo};

/// Periods of history requested per poll; large enough to cover holidays
pub const HISTORY_DEPTH: u32 = 10;

pub type BarListener = Arc<dyn Fn(&Bar) + Send + Sync>;

/// Length in seconds of `periods` bars at `resolution`
///
/// `D` counts days, `W` seven days, `M` thirty-one days; anything else is
/// read as intraday minutes.
pub fn period_length_seconds(resolution: &str, periods: u32) -> Result<i64> {
    let resolution: Resolution = resolution.parse()?;
    Ok(resolution.seconds() * periods as i64)
}

/// Result of comparing a fetched window with the last observed bar time
#[derive(Debug, PartialEq)]
pub enum PulseUpdate<'a> {
    /// Last bar is older than what listeners already saw
    Stale,
    Emit {
        /// Bar that closed since the previous poll, emitted first
        closed: Option<&'a Bar>,
        /// Bar in progress
        current: &'a Bar,
    },
}

/// Decide what to emit for one fetched window
pub fn diff_window(last_bar_time: Option<i64>, bars: &[Bar]) -> Result<PulseUpdate<'_>> {
    let current = bars.last().ok_or(BridgeError::NoData)?;

    let Some(last_time) = last_bar_time else {
        return Ok(PulseUpdate::Emit { closed: None, current });
    };

    if current.time < last_time {
        return Ok(PulseUpdate::Stale);
    }

    if current.time > last_time {
        if bars.len() < 2 {
            return Err(BridgeError::InsufficientHistory(bars.len()));
        }
        return Ok(PulseUpdate::Emit {
            closed: Some(&bars[bars.len() - 2]),
            current,
        });
    }

    Ok(PulseUpdate::Emit { closed: None, current })
}

struct BarSubscription {
    symbol: SymbolInfo,
    resolution: String,
    /// Unset until the first successful poll
    last_bar_time: Option<i64>,
    listeners: Vec<BarListener>,
    /// Distinguishes a re-subscription under the same id from the earlier one
    generation: u64,
}

#[derive(Default)]
struct BarState {
    subscribers: HashMap<String, BarSubscription>,
    requests_pending: usize,
    next_generation: u64,
}

struct Inner {
    source: Arc<dyn HistorySource>,
    state: Mutex<BarState>,
}

pub struct BarScheduler {
    inner: Arc<Inner>,
    ticker: Option<JoinHandle<()>>,
}

impl BarScheduler {
    /// Create the scheduler; polling starts only for a positive frequency
    ///
    /// Must be called inside a tokio runtime when polling is enabled.
    pub fn new(source: Arc<dyn HistorySource>, update_frequency_ms: i64) -> Self {
        let inner = Arc::new(Inner {
            source,
            state: Mutex::new(BarState::default()),
        });

        let ticker = if update_frequency_ms > 0 {
            let period = Duration::from_millis(update_frequency_ms as u64);
            let ticking = Arc::clone(&inner);

            info!("Bar pulse updater polling every {:?}", period);
            Some(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately; polling starts one period in
                interval.tick().await;

                loop {
                    interval.tick().await;
                    let _ = ticking.tick().await;
                }
            }))
        } else {
            debug!("Bar pulse updater disabled (frequency {} ms)", update_frequency_ms);
            None
        };

        BarScheduler { inner, ticker }
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Add `listener` to the subscription `listener_guid`, creating it if needed
    pub async fn subscribe(
        &self,
        symbol: SymbolInfo,
        resolution: &str,
        listener: BarListener,
        listener_guid: &str,
    ) {
        info!("Subscribing {}", listener_guid);

        let mut state = self.inner.state.lock().await;
        let generation = state.next_generation;
        state.next_generation += 1;

        state
            .subscribers
            .entry(listener_guid.to_string())
            .or_insert_with(|| BarSubscription {
                symbol,
                resolution: resolution.to_string(),
                last_bar_time: None,
                listeners: Vec::new(),
                generation,
            })
            .listeners
            .push(listener);
    }

    /// Drop the subscription; outstanding polls for it will not emit
    pub async fn unsubscribe(&self, listener_guid: &str) {
        info!("Unsubscribing {}", listener_guid);

        let mut state = self.inner.state.lock().await;
        state.subscribers.remove(listener_guid);
    }

    /// Run one polling pass now
    pub async fn tick(&self) -> TickOutcome {
        self.inner.tick().await
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.state.lock().await.subscribers.len()
    }

    pub async fn requests_pending(&self) -> usize {
        self.inner.state.lock().await.requests_pending
    }

    /// Last observed bar time, `None` when unknown or not yet polled
    pub async fn last_bar_time(&self, listener_guid: &str) -> Option<i64> {
        let state = self.inner.state.lock().await;
        state.subscribers.get(listener_guid).and_then(|s| s.last_bar_time)
    }

    /// Stop periodic polling; manual ticks still work
    pub fn shutdown(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
            debug!("Bar pulse updater stopped");
        }
    }
}

impl Drop for BarScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    async fn tick(self: &Arc<Self>) -> TickOutcome {
        let mut state = self.state.lock().await;

        if state.requests_pending > 0 {
            debug!("Skipping bar pulse, {} requests pending", state.requests_pending);
            return TickOutcome::Skipped {
                pending: state.requests_pending,
            };
        }

        let range_end = Utc::now().timestamp();
        let mut handles = Vec::with_capacity(state.subscribers.len());
        let mut jobs = Vec::with_capacity(state.subscribers.len());

        for (guid, record) in &state.subscribers {
            let lookback = match period_length_seconds(&record.resolution, HISTORY_DEPTH) {
                Ok(seconds) => seconds,
                Err(e) => {
                    warn!("Skipping {} this pulse: {}", guid, e);
                    continue;
                }
            };

            jobs.push((
                guid.clone(),
                record.generation,
                record.symbol.clone(),
                record.resolution.clone(),
                range_end - lookback,
            ));
        }

        for (guid, generation, symbol, resolution, range_start) in jobs {
            state.requests_pending += 1;

            let inner = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let result = inner
                    .source
                    .fetch_bars(&symbol, &resolution, range_start, range_end)
                    .await;
                inner.complete(&guid, generation, result).await;
            }));
        }

        TickOutcome::Issued(handles)
    }

    async fn complete(&self, guid: &str, generation: u64, result: Result<Vec<Bar>>) {
        let mut state = self.state.lock().await;
        state.requests_pending = state.requests_pending.saturating_sub(1);

        let bars = match result {
            Ok(bars) => bars,
            Err(e) => {
                debug!("Bar poll for {} failed: {}", guid, e);
                return;
            }
        };

        // The subscription may have been cancelled while waiting for data
        let Some(record) = state
            .subscribers
            .get_mut(guid)
            .filter(|r| r.generation == generation)
        else {
            debug!("Dropping bars for cancelled subscription {}", guid);
            return;
        };

        match diff_window(record.last_bar_time, &bars) {
            Ok(PulseUpdate::Stale) => {
                debug!("Ignoring out-of-order bars for {}", guid);
            }
            Ok(PulseUpdate::Emit { closed, current }) => {
                if let Some(closed) = closed {
                    for listener in &record.listeners {
                        listener(closed);
                    }
                }

                record.last_bar_time = Some(current.time);

                for listener in &record.listeners {
                    listener(current);
                }
            }
            Err(BridgeError::NoData) => {
                debug!("Empty bar window for {}", guid);
            }
            Err(e) => {
                error!(
                    "Bar pulse for {} ({} {}) aborted: {} ({})",
                    guid,
                    record.symbol.name,
                    record.resolution,
                    e,
                    e.error_code()
                );
            }
        }
    }
}
