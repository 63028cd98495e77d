use anyhow::Result;
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;

use swapbot::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Starting swapbot v{}", swapbot::VERSION);

    let config_manager = Arc::new(ConfigurationManager::new(Path::new("config")));
    if let Err(e) = config_manager.initialize().await {
        error!("Failed to load configuration: {:#}", e);
        return Err(e);
    }
    let config = config_manager.get_bot_config().await;

    let mut bot = SwapBot::new(config.clone(), config_manager)?;

    match YouTubeConfig::from_env(&config.video_id) {
        Ok(youtube) => bot.set_connection(Box::new(YouTubeConnection::new(youtube))),
        Err(e) => warn!("YouTube not configured, running without chat: {:#}", e),
    }

    match &config.donors.participant_id {
        Some(participant_id) => {
            let client = ExtraLifeClient::new(participant_id, config.donors.page_size);
            bot.set_donor_source(Arc::new(client));
        }
        None => warn!("donors.participant_id not set, donor roster disabled"),
    }

    let shutdown = bot.shutdown_signal();
    shutdown.listen_for_ctrl_c();

    bot.start().await?;
    info!("Press Ctrl-C to stop");

    shutdown.wait().await;
    bot.shutdown().await?;

    info!("swapbot stopped");
    Ok(())
}
