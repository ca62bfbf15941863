//! Wardrobe Sync runner
//!
//! Signs in as the configured user, refreshes outfits and collections into the
//! local cache and warms the image cache for offline use.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wardrobe_sync::config::Config;
use wardrobe_sync::sync::LoadOutcome;
use wardrobe_sync::WardrobeSync;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Wardrobe Sync");
    tracing::info!("Cache path: {:?}", config.db_path);
    tracing::info!("Remote store: {}", config.remote_url);

    if config.api_token.is_none() {
        tracing::warn!("No API token configured (WARDROBE_API_TOKEN). Requests are anonymous!");
    }

    let Some(user_id) = config.user_id.clone() else {
        tracing::error!("WARDROBE_USER_ID is not set; nothing to sync");
        return Err("WARDROBE_USER_ID is required".into());
    };

    let sync = WardrobeSync::from_config(&config)?;

    let report = sync.sign_in(&user_id).await;
    let mut degraded = false;
    for (kind, outcome) in [("outfits", &report.outfits), ("collections", &report.collections)] {
        match outcome {
            LoadOutcome::Refreshed { records } => {
                tracing::info!("Synced {} {}", records, kind);
            }
            LoadOutcome::Degraded(e) => {
                tracing::warn!("Serving cached {} ({}): {}", kind, e.error_code(), e);
                degraded = true;
            }
            LoadOutcome::Superseded | LoadOutcome::SignedOut => {}
        }
    }

    let dangling = sync.dangling_memberships();
    if !dangling.is_empty() {
        tracing::warn!("{} outfits reference missing collections", dangling.len());
    }

    let images = sync.warm_images().await;
    tracing::info!(
        "Image cache warm: {} already cached, {} fetched, {} failed",
        images.cached,
        images.fetched,
        images.failed
    );

    if degraded {
        tracing::warn!("Finished with stale data; rerun when the remote store is reachable");
    } else {
        tracing::info!("Sync complete");
    }

    Ok(())
}
