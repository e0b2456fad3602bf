pub mod types;
pub mod error;
pub mod channel;
pub mod realtime;
pub mod datafeed;
pub mod widget;
pub mod config;

pub use types::*;
pub use error::{BridgeError, Result};
