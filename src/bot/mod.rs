use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use notify::RecommendedWatcher;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::config::BotConfiguration;
use crate::platforms::PlatformConnection;
use crate::types::InboundEvent;

pub mod admin_commands;
pub mod catalog;
pub mod cooldowns;
pub mod donors;
pub mod effects;
pub mod escalation;
pub mod identity;
pub mod moderation;
pub mod outbound;
pub mod plugin_feed;
pub mod shutdown;

use catalog::CatalogStore;
use donors::{DonorRefresher, DonorSource};
use effects::{run_drain_worker, ActionDispatcher, BanListStore, EffectQueues, EffectSink, FileLogSink};
use moderation::ModerationEngine;
use outbound::OutboundSender;
use plugin_feed::PluginFeed;
use shutdown::ShutdownSignal;

const PLUGIN_POLL_INTERVAL: Duration = Duration::from_millis(500);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Runtime that wires the moderation engine to its collaborators and owns
/// every background task
pub struct SwapBot {
    config: BotConfiguration,
    engine: ModerationEngine,
    queues: Arc<EffectQueues>,
    outbound: Arc<OutboundSender>,
    ban_store: Arc<dyn BanListStore>,
    connection: Option<Box<dyn PlatformConnection>>,
    active_connection: Option<Arc<dyn PlatformConnection>>,
    donor_source: Option<Arc<dyn DonorSource>>,
    catalog_watcher: Option<RecommendedWatcher>,
    /// Stops the producers: chat, plugin feed, catalog and donor reloads
    shutdown: ShutdownSignal,
    /// Stops the effect workers once no producer can enqueue anymore
    drain_shutdown: ShutdownSignal,
    /// Stops the reply sender, after the effect workers have flushed into it
    outbound_shutdown: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
    drain_tasks: Vec<JoinHandle<()>>,
    outbound_task: Option<JoinHandle<()>>,
}

impl SwapBot {
    pub fn new(config: BotConfiguration, ban_store: Arc<dyn BanListStore>) -> Result<Self> {
        let queues = Arc::new(EffectQueues::new());
        let engine = ModerationEngine::from_config(&config, Arc::clone(&queues))?;
        let outbound = Arc::new(OutboundSender::new(
            config.outbound.batch_size,
            config.outbound.max_message_length,
            Duration::from_millis(config.outbound.min_send_interval_ms),
        ));

        Ok(Self {
            config,
            engine,
            queues,
            outbound,
            ban_store,
            connection: None,
            active_connection: None,
            donor_source: None,
            catalog_watcher: None,
            shutdown: ShutdownSignal::new(),
            drain_shutdown: ShutdownSignal::new(),
            outbound_shutdown: ShutdownSignal::new(),
            tasks: Vec::new(),
            drain_tasks: Vec::new(),
            outbound_task: None,
        })
    }

    pub fn set_connection(&mut self, connection: Box<dyn PlatformConnection>) {
        info!("Using {} connection", connection.platform_name());
        self.connection = Some(connection);
    }

    pub fn set_donor_source(&mut self, source: Arc<dyn DonorSource>) {
        self.donor_source = Some(source);
    }

    pub fn engine(&self) -> ModerationEngine {
        self.engine.clone()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Start every background activity. Returns once they are running.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting swap bot...");

        let history_sink = FileLogSink::new("history", &self.config.files.full_log);
        history_sink.truncate().await?;

        self.start_catalog().await?;
        self.start_effect_workers(history_sink);
        self.start_donor_refresh();
        self.start_plugin_feed()?;
        self.start_connection().await?;

        info!("Swap bot started");
        Ok(())
    }

    async fn start_catalog(&mut self) -> Result<()> {
        let store = CatalogStore::new(&self.config.files.catalog);
        match store.load().await {
            Ok(entries) => self.engine.replace_catalog(entries).await,
            Err(e) => error!("Failed to load catalog, starting empty: {:#}", e),
        }

        let (tx, mut rx) = mpsc::channel(8);
        match store.watch(tx) {
            Ok(watcher) => self.catalog_watcher = Some(watcher),
            Err(e) => {
                warn!("Catalog hot-reload disabled: {:#}", e);
                return Ok(());
            }
        }

        let engine = self.engine.clone();
        let mut shutdown_receiver = self.shutdown.subscribe();
        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = rx.recv() => match update {
                        Some(entries) => engine.replace_catalog(entries).await,
                        None => break,
                    },
                    _ = shutdown_receiver.recv() => break,
                }
            }
            debug!("Catalog reload task stopped");
        }));
        Ok(())
    }

    fn start_effect_workers(&mut self, history_sink: FileLogSink) {
        let period = Duration::from_millis(self.config.effects.drain_interval_ms.max(1));

        let dispatcher = ActionDispatcher::new(FileLogSink::new("actions", &self.config.files.action_log))
            .with_outbound(Arc::clone(&self.outbound))
            .with_ban_store(Arc::clone(&self.ban_store));

        self.drain_tasks.push(tokio::spawn(run_drain_worker(
            Arc::clone(&self.queues),
            |queues| &queues.history,
            Arc::new(history_sink) as Arc<dyn EffectSink>,
            period,
            self.drain_shutdown.clone(),
        )));
        self.drain_tasks.push(tokio::spawn(run_drain_worker(
            Arc::clone(&self.queues),
            |queues| &queues.actions,
            Arc::new(dispatcher) as Arc<dyn EffectSink>,
            period,
            self.drain_shutdown.clone(),
        )));
    }

    fn start_donor_refresh(&mut self) {
        let source = match &self.donor_source {
            Some(source) => Arc::clone(source),
            None => {
                warn!("No donor source configured, only the host can trigger swaps");
                return;
            }
        };

        let refresher = DonorRefresher::new(source, self.engine.clone())
            .with_roster_file(self.config.files.donor_roster.clone());
        let interval = Duration::from_secs(self.config.donors.refresh_interval_seconds.max(1));
        self.tasks.push(tokio::spawn(refresher.run(interval, self.shutdown.clone())));
    }

    fn start_plugin_feed(&mut self) -> Result<()> {
        let path = match &self.config.files.plugin_feed {
            Some(path) => path.clone(),
            None => return Ok(()),
        };

        let mut events = PluginFeed::new(path, PLUGIN_POLL_INTERVAL)?.into_stream();
        let engine = self.engine.clone();
        let mut shutdown_receiver = self.shutdown.subscribe();
        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.next() => match event {
                        Some(event) => engine.record_plugin_result(&event).await,
                        None => break,
                    },
                    _ = shutdown_receiver.recv() => break,
                }
            }
            debug!("Plugin feed task stopped");
        }));
        Ok(())
    }

    async fn start_connection(&mut self) -> Result<()> {
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                warn!("No chat connection configured");
                return Ok(());
            }
        };

        let receiver = connection
            .get_message_receiver()
            .context("Connection does not provide a message receiver")?;
        connection
            .connect()
            .await
            .with_context(|| format!("Failed to connect to {}", connection.platform_name()))?;

        self.tasks.push(tokio::spawn(run_event_loop(
            self.engine.clone(),
            receiver,
            self.shutdown.clone(),
        )));

        let connection: Arc<dyn PlatformConnection> = Arc::from(connection);
        let channel = connection.get_channels().into_iter().next().unwrap_or_default();
        self.outbound_task = Some(tokio::spawn(Arc::clone(&self.outbound).run(
            Arc::clone(&connection),
            channel,
            self.outbound_shutdown.clone(),
        )));
        self.active_connection = Some(connection);
        Ok(())
    }

    /// Stop every background task, flushing queued effects and replies
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down swap bot...");

        if let Some(connection) = &self.active_connection {
            if let Err(e) = connection.disconnect().await {
                warn!("Failed to disconnect from {}: {}", connection.platform_name(), e);
            }
        }
        self.shutdown.trigger();
        self.catalog_watcher = None;

        for task in self.tasks.drain(..) {
            join_with_grace(task).await;
        }

        self.drain_shutdown.trigger();
        for task in self.drain_tasks.drain(..) {
            join_with_grace(task).await;
        }

        self.outbound_shutdown.trigger();
        if let Some(task) = self.outbound_task.take() {
            join_with_grace(task).await;
        }

        let snapshot = self.engine.snapshot(Utc::now()).await;
        info!(
            "Final state: locked={}, {} banned, {} donors, {} catalog entries",
            snapshot.locked, snapshot.banned_users, snapshot.donors, snapshot.catalog_entries
        );
        Ok(())
    }
}

async fn join_with_grace(task: JoinHandle<()>) {
    match timeout(SHUTDOWN_GRACE, task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Background task failed: {}", e),
        Err(_) => warn!("Background task did not stop within {:?}", SHUTDOWN_GRACE),
    }
}

/// Single consumer of inbound chat: events are decided strictly one at a time
pub async fn run_event_loop(
    engine: ModerationEngine,
    mut receiver: broadcast::Receiver<InboundEvent>,
    shutdown: ShutdownSignal,
) {
    info!("Chat event loop started");
    let mut shutdown_receiver = shutdown.subscribe();

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Ok(event) => {
                    let decision = engine.process(&event).await;
                    debug!("{} -> {:?}", event.author, decision.outcome);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Chat receiver lagged, {} messages skipped", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Chat receiver closed");
                    break;
                }
            },
            _ = shutdown_receiver.recv() => break,
        }
    }

    info!("Chat event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::outbound::tests::RecordingConnection;
    use crate::config::ConfigurationManager;
    use crate::types::{Outcome, RejectionReason};
    use tempfile::{tempdir, TempDir};
    use tokio::fs;

    fn config_in(dir: &TempDir) -> BotConfiguration {
        let mut config = BotConfiguration::default();
        config.host = "StreamHost".to_string();
        config.commands.acknowledge_triggers = true;
        config.files.full_log = dir.path().join("chat.txt");
        config.files.action_log = dir.path().join("swaps.txt");
        config.files.catalog = dir.path().join("games.txt");
        config.files.donor_roster = dir.path().join("donors.txt");
        config.effects.drain_interval_ms = 20;
        config.outbound.min_send_interval_ms = 20;
        config
    }

    #[tokio::test]
    async fn test_event_loop_processes_in_order() {
        let dir = tempdir().unwrap();
        let bot = SwapBot::new(config_in(&dir), Arc::new(ConfigurationManager::new(dir.path()))).unwrap();
        let engine = bot.engine();
        let (tx, rx) = broadcast::channel(16);
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(run_event_loop(engine.clone(), rx, shutdown.clone()));

        tx.send(InboundEvent::new("StreamHost", "!swap", Utc::now())).unwrap();
        tx.send(InboundEvent::new("StreamHost", "!swap", Utc::now())).unwrap();
        drop(tx);
        task.await.unwrap();

        let actions = engine.queues().actions.drain().await;
        assert_eq!(actions.iter().filter(|effect| effect.log_line().is_some()).count(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_start_wires_catalog_logs_and_ban_list() {
        let dir = tempdir().unwrap();
        let config_manager = Arc::new(ConfigurationManager::new(dir.path().join("config")));
        config_manager.initialize().await.unwrap();

        let config = config_in(&dir);
        fs::write(&config.files.full_log, "stale line\n").await.unwrap();
        fs::write(&config.files.catalog, "# games\nSuper Mario Bros\nMario Kart\n").await.unwrap();

        let mut bot = SwapBot::new(config.clone(), config_manager.clone()).unwrap();
        bot.start().await.unwrap();
        let engine = bot.engine();

        let accepted = engine.process(&InboundEvent::new("StreamHost", "!swap kart", Utc::now())).await;
        assert_eq!(accepted.outcome, Outcome::Accepted);
        let rejected = engine.process(&InboundEvent::new("Olly", "!swap", Utc::now())).await;
        assert_eq!(rejected.outcome, Outcome::Rejected(RejectionReason::NotDonor));
        engine.process(&InboundEvent::new("StreamHost", "!ban Olly", Utc::now())).await;

        bot.shutdown().await.unwrap();

        let history = fs::read_to_string(&config.files.full_log).await.unwrap();
        assert!(!history.contains("stale line"));
        assert!(history.contains("Olly: !swap"));

        let actions = fs::read_to_string(&config.files.action_log).await.unwrap();
        assert!(actions.contains("StreamHost: !swap Mario Kart"));
        assert!(actions.contains("StreamHost: !ban Olly"));

        assert_eq!(config_manager.get_bot_config().await.banned, vec!["olly".to_string()]);
    }

    #[tokio::test]
    async fn test_replies_are_flushed_to_the_connection_on_shutdown() {
        let dir = tempdir().unwrap();
        let mut bot = SwapBot::new(config_in(&dir), Arc::new(ConfigurationManager::new(dir.path()))).unwrap();
        let connection = RecordingConnection::default();
        let sent = Arc::clone(&connection.sent);
        bot.set_connection(Box::new(connection));
        bot.start().await.unwrap();

        bot.engine()
            .process(&InboundEvent::new("StreamHost", "!swap", Utc::now()))
            .await;
        bot.shutdown().await.unwrap();

        let sent = sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], ("test".to_string(), "@StreamHost swapping".to_string()));
        assert_eq!(bot.outbound.pending().await, 0);
    }

    #[tokio::test]
    async fn test_effects_enqueued_after_stop_request_are_still_written() {
        let dir = tempdir().unwrap();
        let config_manager = Arc::new(ConfigurationManager::new(dir.path().join("config")));
        config_manager.initialize().await.unwrap();
        let config = config_in(&dir);

        let mut bot = SwapBot::new(config.clone(), config_manager.clone()).unwrap();
        bot.start().await.unwrap();

        // An event still being decided when the stop request arrives
        bot.shutdown_signal().trigger();
        tokio::time::sleep(Duration::from_millis(100)).await;
        bot.engine()
            .process(&InboundEvent::new("StreamHost", "!ban Mallory", Utc::now()))
            .await;

        bot.shutdown().await.unwrap();

        let actions = fs::read_to_string(&config.files.action_log).await.unwrap();
        assert!(actions.contains("StreamHost: !ban Mallory"));
        assert_eq!(config_manager.get_bot_config().await.banned, vec!["mallory".to_string()]);
    }
}
