use tracing_subscriber::EnvFilter;

use crate::error::{EntigraphError, Result};

/// Installs a fmt subscriber. `filter` wins over `RUST_LOG`; with neither,
/// only warnings are shown. Calling it again is harmless.
pub fn init(filter: Option<&str>) -> Result<()> {
    let env_filter = match filter {
        Some(filter) => EnvFilter::try_new(filter)
            .map_err(|e| EntigraphError::Config(format!("invalid log filter '{filter}': {e}")))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    // a subscriber installed earlier stays in place
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
    Ok(())
}
