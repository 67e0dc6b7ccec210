use std::sync::Arc;

use ilg_core::config::Config;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ilg_core::Error> {
    ilg_core::logging::init("ilg")?;

    let cfg = Arc::new(Config::load()?);
    info!(
        rotation_hours = cfg.rotation_period.as_secs() / 3600,
        tick_secs = cfg.scheduler_tick.as_secs(),
        "starting invite link guard"
    );

    ilg_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| ilg_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
