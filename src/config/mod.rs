// src/config/mod.rs - YAML-backed bot configuration

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

use crate::bot::effects::BanListStore;
use crate::bot::escalation::EscalationPolicy;
use crate::bot::identity::normalize;
use crate::types::{ModerationError, ModerationResult, UserKey};

const CONFIG_FILE: &str = "bot.yaml";

/// Everything the bot reads from `bot.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfiguration {
    /// Display name of the stream host
    pub host: String,
    pub video_id: String,
    /// Display names (or keys) of banned users
    pub banned: Vec<String>,
    pub commands: CommandSettings,
    pub cooldowns: CooldownSettings,
    pub escalation: EscalationPolicy,
    pub files: FileSettings,
    pub donors: DonorSettings,
    pub outbound: OutboundSettings,
    pub effects: EffectSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    pub prefix: String,
    /// Trigger command name without the prefix
    pub trigger: String,
    /// Only donors (and the host) may trigger
    pub require_donor: bool,
    /// Reply in chat when a trigger is accepted
    pub acknowledge_triggers: bool,
    /// Keep messages from banned users in the full chat log
    pub log_banned_messages: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownSettings {
    pub global_seconds: u64,
    pub per_user_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub full_log: PathBuf,
    pub action_log: PathBuf,
    pub catalog: PathBuf,
    pub plugin_feed: Option<PathBuf>,
    pub donor_roster: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DonorSettings {
    pub participant_id: Option<String>,
    pub refresh_interval_seconds: u64,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundSettings {
    pub batch_size: usize,
    pub max_message_length: usize,
    pub min_send_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSettings {
    pub drain_interval_ms: u64,
}

impl Default for BotConfiguration {
    fn default() -> Self {
        Self {
            host: "RetroIndieJosh".to_string(),
            video_id: String::new(),
            banned: Vec::new(),
            commands: CommandSettings::default(),
            cooldowns: CooldownSettings::default(),
            escalation: EscalationPolicy::default(),
            files: FileSettings::default(),
            donors: DonorSettings::default(),
            outbound: OutboundSettings::default(),
            effects: EffectSettings::default(),
        }
    }
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
            trigger: "swap".to_string(),
            require_donor: true,
            acknowledge_triggers: false,
            log_banned_messages: false,
        }
    }
}

impl Default for CooldownSettings {
    fn default() -> Self {
        Self {
            global_seconds: 5,
            per_user_seconds: 60,
        }
    }
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            full_log: PathBuf::from("youtube-chat.txt"),
            action_log: PathBuf::from("swap-log.txt"),
            catalog: PathBuf::from("games.txt"),
            plugin_feed: None,
            donor_roster: PathBuf::from("extra-life-donors.txt"),
        }
    }
}

impl Default for DonorSettings {
    fn default() -> Self {
        Self {
            participant_id: None,
            refresh_interval_seconds: 300,
            page_size: 100,
        }
    }
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_message_length: 200,
            min_send_interval_ms: 1500,
        }
    }
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self { drain_interval_ms: 1000 }
    }
}

impl BotConfiguration {
    pub fn host_key(&self) -> UserKey {
        normalize(&self.host)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> ModerationResult<()> {
        if self.host_key().is_empty() {
            return Err(ModerationError::Config(format!(
                "host '{}' normalizes to an empty name",
                self.host
            )));
        }
        if self.commands.prefix.trim().is_empty() {
            return Err(ModerationError::Config("command prefix must not be empty".to_string()));
        }
        if normalize(&self.commands.trigger).is_empty() {
            return Err(ModerationError::Config("trigger command must not be empty".to_string()));
        }
        if self.escalation.strikes_before_timeout == 0 || self.escalation.timeouts_before_ban == 0 {
            return Err(ModerationError::Config(
                "escalation thresholds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads `bot.yaml` and writes ban list changes back to it
#[derive(Clone)]
pub struct ConfigurationManager {
    config_dir: PathBuf,
    bot_config: Arc<RwLock<BotConfiguration>>,
}

impl ConfigurationManager {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            bot_config: Arc::new(RwLock::new(BotConfiguration::default())),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Load the configuration, writing a default file first if there is none
    pub async fn initialize(&self) -> Result<()> {
        if !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir).await?;
            info!("Created configuration directory: {}", self.config_dir.display());
        }

        let config_path = self.config_path();
        if !config_path.exists() {
            warn!("Bot config not found, creating default: {}", config_path.display());
            self.save(&BotConfiguration::default()).await?;
        }

        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read bot config: {}", config_path.display()))?;
        let config: BotConfiguration = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse bot config: {}", config_path.display()))?;

        config.validate()?;

        *self.bot_config.write().await = config;
        info!("Loaded bot configuration from {}", config_path.display());
        Ok(())
    }

    pub async fn get_bot_config(&self) -> BotConfiguration {
        self.bot_config.read().await.clone()
    }

    async fn save(&self, config: &BotConfiguration) -> Result<()> {
        let config_path = self.config_path();
        let content = serde_yaml::to_string(config).context("Failed to serialize bot config")?;
        fs::write(&config_path, content)
            .await
            .with_context(|| format!("Failed to write bot config: {}", config_path.display()))?;
        debug!("Saved bot configuration to {}", config_path.display());
        Ok(())
    }

    /// Replace the persisted ban list
    pub async fn save_banned<I>(&self, banned: I) -> Result<()>
    where
        I: IntoIterator<Item = UserKey>,
    {
        let sorted: BTreeSet<UserKey> = banned.into_iter().collect();
        let mut config = self.bot_config.write().await;
        config.banned = sorted.into_iter().collect();
        self.save(&config).await?;
        info!("Persisted ban list ({} users)", config.banned.len());
        Ok(())
    }

    async fn banned_keys(&self) -> BTreeSet<UserKey> {
        self.bot_config
            .read()
            .await
            .banned
            .iter()
            .map(|name| normalize(name))
            .filter(|key| !key.is_empty())
            .collect()
    }
}

#[async_trait]
impl BanListStore for ConfigurationManager {
    async fn add_banned(&self, user_key: &UserKey) -> Result<()> {
        let mut banned = self.banned_keys().await;
        if banned.insert(user_key.clone()) {
            self.save_banned(banned).await?;
        }
        Ok(())
    }

    async fn remove_banned(&self, user_key: &UserKey) -> Result<()> {
        let mut banned = self.banned_keys().await;
        if banned.remove(user_key) {
            self.save_banned(banned).await?;
        }
        Ok(())
    }
}
