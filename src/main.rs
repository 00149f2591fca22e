use anyhow::Context;
use car_scout::config::RunConfig;
use car_scout::scrapers::{BrowserFetcher, HttpFetcher, PageFetcher};
use car_scout::Harvester;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚗 Car Scout - AutoScout24 listing harvester");
    info!("==========================================");

    let config_path = RunConfig::path_from_env();
    let config = RunConfig::load(&config_path)?;
    info!(
        "Config: {} (countries: {})",
        config_path.display(),
        config
            .search
            .countries
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let http: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config.fetch)?);

    let fallback: Option<Arc<dyn PageFetcher>> = if config.fetch.fallback_enabled {
        match BrowserFetcher::launch(&config.fetch) {
            Ok(browser) => Some(Arc::new(browser) as Arc<dyn PageFetcher>),
            Err(e) => {
                warn!("Browser fallback disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let harvester = Arc::new(Harvester::from_config(&config, http, fallback));

    info!("Discovering listings...");
    let tasks = harvester.discover(&config.search).await?;
    if tasks.is_empty() {
        warn!("No listing URLs discovered; nothing to do");
        return Ok(());
    }

    let report = harvester.run(tasks).await?;
    report.metrics.log_summary();

    for (country, records) in &report.listings.by_country {
        info!("  {}: {} listings", country, records.len());
    }

    // Save combined and per-country exports
    let output_dir = config.output_dir();
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let combined = output_dir.join("listings.json");
    tokio::fs::write(&combined, serde_json::to_string_pretty(&report.listings.combined)?).await?;
    info!("💾 Saved {} listings to {}", report.listings.len(), combined.display());

    for (country, records) in &report.listings.by_country {
        let path = output_dir.join(format!("listings_{}.json", country.code()));
        tokio::fs::write(&path, serde_json::to_string_pretty(records)?).await?;
    }

    let metrics_path = output_dir.join("metrics.json");
    tokio::fs::write(&metrics_path, serde_json::to_string_pretty(&report.metrics)?).await?;
    info!("💾 Saved per-country files and metrics to {}", output_dir.display());

    Ok(())
}
