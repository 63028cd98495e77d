//! # Swap Bot
//!
//! Live chat moderation for "swap the game" streams. Viewers who donated can
//! trigger a game swap from chat; the bot enforces global and per-user
//! cooldowns, a host-controlled lock, and escalates repeat offenders from
//! strikes to timeouts to a ban.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use swapbot::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = Arc::new(ConfigurationManager::new("config"));
//!     config_manager.initialize().await?;
//!     let config = config_manager.get_bot_config().await;
//!
//!     let mut bot = SwapBot::new(config.clone(), config_manager)?;
//!     let youtube = YouTubeConfig::from_env(&config.video_id)?;
//!     bot.set_connection(Box::new(YouTubeConnection::new(youtube)));
//!
//!     bot.start().await?;
//!     bot.shutdown_signal().wait().await;
//!     bot.shutdown().await
//! }
//! ```

pub mod bot;
pub mod config;
pub mod platforms;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::donors::{DonorSource, ExtraLifeClient};
    pub use crate::bot::moderation::{EngineSettings, ModerationEngine};
    pub use crate::bot::shutdown::ShutdownSignal;
    pub use crate::bot::SwapBot;
    pub use crate::config::{BotConfiguration, ConfigurationManager};
    pub use crate::platforms::{
        youtube::{YouTubeConfig, YouTubeConnection},
        PlatformConnection,
    };
    pub use crate::types::{
        AdminCommand, Decision, Effect, EscalationOutcome, InboundEvent, ModerationError, Outcome,
        RejectionReason, Role,
    };
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
