//! Capture Simulator - Main Entry Point

use capture_sim::{init_logging, load_settings, run};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    info!("=== Orientation-Aware Capture Simulator v{} ===", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "capture-sim".to_string());
    let settings = load_settings(&config_path)?;

    let report = run(&settings).await?;
    info!(
        "Captured {} of {} poses into {}",
        report.captured(),
        report.captures.len(),
        settings.output_dir.display()
    );

    Ok(())
}
