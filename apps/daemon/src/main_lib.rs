use std::sync::Arc;

use limitup_market_data::{AcquisitionConfig, AcquisitionService};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

/// Install the global subscriber. The library logs through `log`; those
/// records are bridged into tracing by the fmt subscriber's log adapter.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if config.log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub fn load_acquisition_config(config: &Config) -> anyhow::Result<AcquisitionConfig> {
    match &config.acquisition_path {
        Some(path) => {
            let acquisition = AcquisitionConfig::from_json_file(path)?;
            tracing::info!("Acquisition config loaded from {}", path.display());
            Ok(acquisition)
        }
        None => {
            tracing::warn!("LIMITUP_CONFIG not set, using built-in defaults with no providers");
            Ok(AcquisitionConfig::default())
        }
    }
}

pub fn build_service(config: &Config) -> anyhow::Result<Arc<AcquisitionService>> {
    let acquisition = load_acquisition_config(config)?;
    let service = AcquisitionService::from_config(acquisition)?;
    Ok(Arc::new(service))
}
