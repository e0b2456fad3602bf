/// Quote pulse updater - polls quote snapshots on two cadences
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{QuoteSource, TickOutcome};
use crate::error::Result;
use crate::types::QuoteData;

pub type QuoteListener = Arc<dyn Fn(&[QuoteData]) + Send + Sync>;

/// Which symbol selection a pass polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cadence {
    /// Full symbol list
    Slow,
    /// Priority list, or the full list when no priority symbols were given
    Fast,
}

impl Cadence {
    fn index(self) -> usize {
        match self {
            Cadence::Slow => 0,
            Cadence::Fast => 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuoteCadences {
    pub slow: Duration,
    pub fast: Duration,
}

impl Default for QuoteCadences {
    fn default() -> Self {
        QuoteCadences {
            slow: Duration::from_secs(60),
            fast: Duration::from_secs(10),
        }
    }
}

struct QuoteSubscription {
    symbols: Vec<String>,
    fast_symbols: Vec<String>,
    listeners: Vec<QuoteListener>,
    generation: u64,
}

impl QuoteSubscription {
    fn symbols_for(&self, cadence: Cadence) -> &[String] {
        match cadence {
            Cadence::Fast if !self.fast_symbols.is_empty() => &self.fast_symbols,
            _ => &self.symbols,
        }
    }
}

#[derive(Default)]
struct QuoteState {
    subscribers: HashMap<String, QuoteSubscription>,
    /// Outstanding fetches per cadence
    requests_pending: [usize; 2],
    next_generation: u64,
}

struct Inner {
    source: Arc<dyn QuoteSource>,
    state: Mutex<QuoteState>,
}

pub struct QuoteScheduler {
    inner: Arc<Inner>,
    tickers: Vec<JoinHandle<()>>,
}

impl QuoteScheduler {
    /// Create the scheduler and start both cadences
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(source: Arc<dyn QuoteSource>, cadences: QuoteCadences) -> Self {
        let mut scheduler = Self::idle(source);

        info!(
            "Quote pulse updater polling every {:?} (fast {:?})",
            cadences.slow, cadences.fast
        );
        scheduler.tickers = vec![
            scheduler.spawn_ticker(Cadence::Slow, cadences.slow),
            scheduler.spawn_ticker(Cadence::Fast, cadences.fast),
        ];
        scheduler
    }

    fn idle(source: Arc<dyn QuoteSource>) -> Self {
        QuoteScheduler {
            inner: Arc::new(Inner {
                source,
                state: Mutex::new(QuoteState::default()),
            }),
            tickers: Vec::new(),
        }
    }

    fn spawn_ticker(&self, cadence: Cadence, period: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let period = period.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;
                let _ = inner.tick(cadence).await;
            }
        })
    }

    pub async fn subscribe(
        &self,
        symbols: Vec<String>,
        fast_symbols: Vec<String>,
        listener: QuoteListener,
        listener_guid: &str,
    ) {
        debug!("Subscribing quotes {}", listener_guid);

        let mut state = self.inner.state.lock().await;
        let generation = state.next_generation;
        state.next_generation += 1;

        state
            .subscribers
            .entry(listener_guid.to_string())
            .or_insert_with(|| QuoteSubscription {
                symbols,
                fast_symbols,
                listeners: Vec::new(),
                generation,
            })
            .listeners
            .push(listener);
    }

    pub async fn unsubscribe(&self, listener_guid: &str) {
        debug!("Unsubscribing quotes {}", listener_guid);

        let mut state = self.inner.state.lock().await;
        state.subscribers.remove(listener_guid);
    }

    /// Run one pass of the given cadence now
    pub async fn tick(&self, cadence: Cadence) -> TickOutcome {
        self.inner.tick(cadence).await
    }

    pub async fn requests_pending(&self, cadence: Cadence) -> usize {
        self.inner.state.lock().await.requests_pending[cadence.index()]
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.state.lock().await.subscribers.len()
    }

    pub fn is_ticking(&self) -> bool {
        !self.tickers.is_empty() && self.tickers.iter().all(|t| !t.is_finished())
    }

    pub fn shutdown(&mut self) {
        for ticker in self.tickers.drain(..) {
            ticker.abort();
        }
    }
}

impl Drop for QuoteScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    async fn tick(self: &Arc<Self>, cadence: Cadence) -> TickOutcome {
        let mut state = self.state.lock().await;
        let slot = cadence.index();

        if state.requests_pending[slot] > 0 {
            debug!(
                "Skipping {:?} quote pulse, {} requests pending",
                cadence, state.requests_pending[slot]
            );
            return TickOutcome::Skipped {
                pending: state.requests_pending[slot],
            };
        }

        let jobs: Vec<(String, u64, Vec<String>)> = state
            .subscribers
            .iter()
            .map(|(guid, record)| {
                (
                    guid.clone(),
                    record.generation,
                    record.symbols_for(cadence).to_vec(),
                )
            })
            .collect();

        let mut handles = Vec::with_capacity(jobs.len());
        for (guid, generation, symbols) in jobs {
            state.requests_pending[slot] += 1;

            let inner = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let result = inner.source.fetch_quotes(&symbols).await;
                inner.complete(cadence, &guid, generation, result).await;
            }));
        }

        TickOutcome::Issued(handles)
    }

    async fn complete(
        &self,
        cadence: Cadence,
        guid: &str,
        generation: u64,
        result: Result<Vec<QuoteData>>,
    ) {
        let mut state = self.state.lock().await;
        let slot = cadence.index();
        state.requests_pending[slot] = state.requests_pending[slot].saturating_sub(1);

        let quotes = match result {
            Ok(quotes) => quotes,
            Err(e) => {
                debug!("Quote poll for {} failed: {}", guid, e);
                return;
            }
        };

        // The subscription may have been cancelled while waiting for data
        let Some(record) = state
            .subscribers
            .get(guid)
            .filter(|r| r.generation == generation)
        else {
            debug!("Dropping quotes for cancelled subscription {}", guid);
            return;
        };

        for listener in &record.listeners {
            listener(&quotes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use futures_util::future::BoxFuture;
    use serde_json::Map;
    use tokio::sync::Semaphore;

    fn quote(name: &str) -> QuoteData {
        QuoteData {
            s: "ok".to_string(),
            n: name.to_string(),
            v: Map::new(),
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    struct RecordingSource {
        requested: std::sync::Mutex<Vec<Vec<String>>>,
        gate: Option<Semaphore>,
        fail: bool,
    }

    impl RecordingSource {
        fn new() -> Arc<Self> {
            Arc::new(RecordingSource {
                requested: std::sync::Mutex::new(Vec::new()),
                gate: None,
                fail: false,
            })
        }

        fn gated() -> Arc<Self> {
            Arc::new(RecordingSource {
                requested: std::sync::Mutex::new(Vec::new()),
                gate: Some(Semaphore::new(0)),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(RecordingSource {
                requested: std::sync::Mutex::new(Vec::new()),
                gate: None,
                fail: true,
            })
        }
    }

    impl QuoteSource for RecordingSource {
        fn fetch_quotes<'a>(
            &'a self,
            symbols: &'a [String],
        ) -> BoxFuture<'a, Result<Vec<QuoteData>>> {
            Box::pin(async move {
                self.requested.lock().unwrap().push(symbols.to_vec());
                if let Some(gate) = &self.gate {
                    gate.acquire().await.unwrap().forget();
                }
                if self.fail {
                    return Err(BridgeError::DatafeedStatus("quotes unavailable".to_string()));
                }
                Ok(symbols.iter().map(|s| quote(s)).collect())
            })
        }
    }

    fn recorder() -> (QuoteListener, Arc<std::sync::Mutex<Vec<Vec<QuoteData>>>>) {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: QuoteListener =
            Arc::new(move |quotes: &[QuoteData]| sink.lock().unwrap().push(quotes.to_vec()));
        (listener, seen)
    }

    #[tokio::test]
    async fn test_fast_tick_falls_back_to_full_list() {
        let source = RecordingSource::new();
        let scheduler = QuoteScheduler::idle(source.clone());
        let (listener, seen) = recorder();

        scheduler
            .subscribe(names(&["AAPL", "MSFT"]), Vec::new(), listener, "q")
            .await;
        scheduler.tick(Cadence::Fast).await.join().await;

        assert_eq!(*source.requested.lock().unwrap(), vec![names(&["AAPL", "MSFT"])]);
        assert_eq!(seen.lock().unwrap()[0].len(), 2);
    }

    #[tokio::test]
    async fn test_cadences_pick_their_symbols() {
        let source = RecordingSource::new();
        let scheduler = QuoteScheduler::idle(source.clone());
        let (listener, seen) = recorder();

        scheduler
            .subscribe(names(&["AAPL", "MSFT", "IBM"]), names(&["AAPL"]), listener, "q")
            .await;
        scheduler.tick(Cadence::Slow).await.join().await;
        scheduler.tick(Cadence::Fast).await.join().await;

        assert_eq!(
            *source.requested.lock().unwrap(),
            vec![names(&["AAPL", "MSFT", "IBM"]), names(&["AAPL"])]
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], vec![quote("AAPL")]);
    }

    #[tokio::test]
    async fn test_single_flight_is_per_cadence() {
        let source = RecordingSource::gated();
        let scheduler = QuoteScheduler::idle(source.clone());
        let (listener, _) = recorder();
        scheduler.subscribe(names(&["AAPL"]), Vec::new(), listener, "q").await;

        let slow = scheduler.tick(Cadence::Slow).await;
        assert_eq!(slow.issued(), 1);
        assert!(scheduler.tick(Cadence::Slow).await.is_skipped());

        // The fast cadence has its own gate
        let fast = scheduler.tick(Cadence::Fast).await;
        assert_eq!(fast.issued(), 1);

        if let Some(gate) = &source.gate {
            gate.add_permits(2);
        }
        slow.join().await;
        fast.join().await;
        assert_eq!(scheduler.requests_pending(Cadence::Slow).await, 0);
        assert_eq!(scheduler.requests_pending(Cadence::Fast).await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_while_fetch_outstanding() {
        let source = RecordingSource::gated();
        let scheduler = QuoteScheduler::idle(source.clone());
        let (listener, seen) = recorder();
        scheduler.subscribe(names(&["AAPL"]), Vec::new(), listener, "q").await;

        let outcome = scheduler.tick(Cadence::Slow).await;
        scheduler.unsubscribe("q").await;
        if let Some(gate) = &source.gate {
            gate.add_permits(1);
        }
        outcome.join().await;

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(scheduler.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_error_releases_gate_without_emission() {
        let source = RecordingSource::failing();
        let scheduler = QuoteScheduler::idle(source);
        let (listener, seen) = recorder();
        scheduler.subscribe(names(&["AAPL"]), Vec::new(), listener, "q").await;

        scheduler.tick(Cadence::Slow).await.join().await;

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(scheduler.requests_pending(Cadence::Slow).await, 0);
        assert!(!scheduler.tick(Cadence::Slow).await.is_skipped());
    }

    #[tokio::test]
    async fn test_new_starts_both_cadences() {
        let mut scheduler = QuoteScheduler::new(RecordingSource::new(), QuoteCadences::default());
        assert!(scheduler.is_ticking());
        scheduler.shutdown();
        assert!(!scheduler.is_ticking());
    }
}
