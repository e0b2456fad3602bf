/// Realtime emulation by periodic polling of pull-only sources
pub mod bars;
pub mod quotes;

pub use bars::{diff_window, period_length_seconds, BarListener, BarScheduler, PulseUpdate};
pub use quotes::{Cadence, QuoteCadences, QuoteListener, QuoteScheduler};

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::types::{Bar, QuoteData, SymbolInfo};

/// Pull-only history source
///
/// Returns bars ascending by time for `[from, to]` (epoch seconds).
pub trait HistorySource: Send + Sync {
    fn fetch_bars<'a>(
        &'a self,
        symbol: &'a SymbolInfo,
        resolution: &'a str,
        from: i64,
        to: i64,
    ) -> BoxFuture<'a, Result<Vec<Bar>>>;
}

/// Pull-only quote source
pub trait QuoteSource: Send + Sync {
    fn fetch_quotes<'a>(&'a self, symbols: &'a [String]) -> BoxFuture<'a, Result<Vec<QuoteData>>>;
}

/// What a single scheduler pass did
#[derive(Debug)]
pub enum TickOutcome {
    /// A previous pass still has fetches outstanding
    Skipped { pending: usize },
    /// One spawned fetch per live subscription
    Issued(Vec<JoinHandle<()>>),
}

impl TickOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, TickOutcome::Skipped { .. })
    }

    pub fn issued(&self) -> usize {
        match self {
            TickOutcome::Skipped { .. } => 0,
            TickOutcome::Issued(handles) => handles.len(),
        }
    }

    /// Wait for every fetch issued by this pass to complete
    pub async fn join(self) {
        if let TickOutcome::Issued(handles) = self {
            for handle in handles {
                let _ = handle.await;
            }
        }
    }
}
