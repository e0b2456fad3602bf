/// Settings loading and validation
pub mod loader;

pub use loader::{load_config, load_config_str, validate_config, ENV_PREFIX};
