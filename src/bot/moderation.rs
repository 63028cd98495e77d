// src/bot/moderation.rs - Moderation engine: one decision per chat event

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::admin_commands::parse_admin_command;
use super::catalog::{find_entry, CatalogSnapshot};
use super::cooldowns::{CooldownController, LockTicket};
use super::effects::EffectQueues;
use super::escalation::{EscalationPolicy, EscalationTracker};
use super::identity::{classify, normalize, normalize_all};
use super::plugin_feed::PluginEvent;
use crate::config::BotConfiguration;
use crate::types::{
    AdminCommand, CommandParseError, Decision, Effect, EscalationOutcome, InboundEvent,
    ModerationError, ModerationResult, Outcome, RejectionReason, Role, UserKey,
};

/// Author used for log lines the engine writes on its own behalf
const SYSTEM_AUTHOR: &str = "swapbot";

/// Static engine settings, taken from the bot configuration at startup
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub host: String,
    pub banned: Vec<String>,
    pub prefix: String,
    pub trigger: String,
    pub require_donor: bool,
    pub acknowledge_triggers: bool,
    pub log_banned_messages: bool,
    pub global_cooldown_seconds: u64,
    pub per_user_cooldown_seconds: u64,
    pub escalation: EscalationPolicy,
}

impl EngineSettings {
    pub fn from_config(config: &BotConfiguration) -> Self {
        Self {
            host: config.host.clone(),
            banned: config.banned.clone(),
            prefix: config.commands.prefix.clone(),
            trigger: config.commands.trigger.clone(),
            require_donor: config.commands.require_donor,
            acknowledge_triggers: config.commands.acknowledge_triggers,
            log_banned_messages: config.commands.log_banned_messages,
            global_cooldown_seconds: config.cooldowns.global_seconds,
            per_user_cooldown_seconds: config.cooldowns.per_user_seconds,
            escalation: config.escalation,
        }
    }

    fn trigger_command(&self) -> String {
        format!("{}{}", self.prefix, self.trigger)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&BotConfiguration::default())
    }
}

/// Point-in-time view of the engine state, for status logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub locked: bool,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub banned_users: usize,
    pub donors: usize,
    pub catalog_entries: usize,
    pub timed_out_users: usize,
    pub global_cooldown_seconds: u64,
    pub per_user_cooldown_seconds: u64,
}

/// Everything the engine mutates. Guarded by a single mutex held for one
/// full event decision, one admin mutation or one timer wake-up.
struct ModerationState {
    host_key: UserKey,
    donors: Arc<HashSet<UserKey>>,
    banned: HashSet<UserKey>,
    catalog: CatalogSnapshot,
    cooldowns: CooldownController,
    escalation: EscalationTracker,
    pending_unlock: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct ModerationEngine {
    state: Arc<Mutex<ModerationState>>,
    queues: Arc<EffectQueues>,
    settings: EngineSettings,
    trigger_command: String,
}

impl ModerationEngine {
    pub fn new(settings: EngineSettings, queues: Arc<EffectQueues>) -> ModerationResult<Self> {
        let host_key = normalize(&settings.host);
        if host_key.is_empty() {
            return Err(ModerationError::Config(format!(
                "host '{}' normalizes to an empty name",
                settings.host
            )));
        }

        let state = ModerationState {
            host_key,
            donors: Arc::new(HashSet::new()),
            banned: normalize_all(&settings.banned),
            catalog: Arc::new(Vec::new()),
            cooldowns: CooldownController::new(
                settings.global_cooldown_seconds,
                settings.per_user_cooldown_seconds,
            ),
            escalation: EscalationTracker::new(settings.escalation),
            pending_unlock: None,
        };

        info!(
            "Moderation engine ready: host '{}', trigger '{}', {} banned users",
            state.host_key,
            settings.trigger_command(),
            state.banned.len()
        );

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            queues,
            trigger_command: settings.trigger_command(),
            settings,
        })
    }

    pub fn from_config(config: &BotConfiguration, queues: Arc<EffectQueues>) -> ModerationResult<Self> {
        Self::new(EngineSettings::from_config(config), queues)
    }

    pub fn queues(&self) -> Arc<EffectQueues> {
        Arc::clone(&self.queues)
    }

    /// Decide what to do with one chat event.
    ///
    /// The whole decision runs under the state lock, and its effects are
    /// queued before the lock is released. Never fails: malformed input ends
    /// up as `Invalid` or `Ignored`.
    pub async fn process(&self, event: &InboundEvent) -> Decision {
        let user_key = normalize(&event.author);
        let mut state = self.state.lock().await;
        let role = classify(&user_key, &state.host_key, &state.donors, &state.banned);

        let mut effects = Vec::new();
        if role != Role::Banned || self.settings.log_banned_messages {
            effects.push(Effect::LogFull {
                author: event.author.clone(),
                text: event.text.clone(),
            });
        }

        let outcome = match role {
            Role::Host => match parse_admin_command(&event.text, &self.settings.prefix) {
                Ok(Some(command)) => self.apply_admin(&mut state, command, event, &mut effects),
                Ok(None) => self.evaluate_trigger(&mut state, &user_key, role, event, &mut effects),
                Err(e) => {
                    warn!("Ignoring malformed host command '{}': {}", event.text, e);
                    Outcome::Invalid(e)
                }
            },
            Role::Banned => {
                debug!("Dropping message from banned user {}", user_key);
                Outcome::Ignored
            }
            Role::Donor | Role::Ordinary => {
                self.evaluate_trigger(&mut state, &user_key, role, event, &mut effects)
            }
        };

        self.queues.enqueue_all(effects.iter().cloned()).await;
        Decision::new(outcome, effects)
    }

    /// Split a trigger command into its optional argument. `None` when the
    /// text is not a trigger.
    fn parse_trigger<'a>(&self, text: &'a str) -> Option<Option<&'a str>> {
        let mut parts = text.trim().splitn(2, char::is_whitespace);
        let head = parts.next()?;
        if !head.eq_ignore_ascii_case(&self.trigger_command) {
            return None;
        }
        Some(parts.next().map(str::trim).filter(|rest| !rest.is_empty()))
    }

    fn evaluate_trigger(
        &self,
        state: &mut ModerationState,
        user_key: &str,
        role: Role,
        event: &InboundEvent,
        effects: &mut Vec<Effect>,
    ) -> Outcome {
        let now = event.received_at;
        let argument = match self.parse_trigger(&event.text) {
            Some(argument) => argument,
            None => {
                debug!("{}: {}", event.author, event.text);
                return Outcome::Ignored;
            }
        };

        if role != Role::Host {
            if state.escalation.is_timed_out(user_key, now) {
                return self.charge_violation(state, user_key, RejectionReason::TimedOut, event, effects);
            }
            if role == Role::Ordinary && self.settings.require_donor {
                return self.charge_violation(state, user_key, RejectionReason::NotDonor, event, effects);
            }
        }

        let entry = match argument {
            Some(query) => match find_entry(query, &state.catalog) {
                Some(entry) => Some(entry.to_string()),
                None => {
                    return self.reject(state, user_key, role, RejectionReason::NoMatch, event, effects);
                }
            },
            None => None,
        };

        if let Err(reason) = state.cooldowns.can_trigger(user_key, role, now) {
            return self.reject(state, user_key, role, reason, event, effects);
        }

        state.cooldowns.record(user_key, now);

        let action = match &entry {
            Some(entry) => format!("{} {}", self.trigger_command, entry),
            None => self.trigger_command.clone(),
        };
        info!("Accepted {} from {}", action, event.author);
        effects.push(Effect::LogAction {
            author: event.author.clone(),
            text: action,
        });

        if self.settings.acknowledge_triggers {
            let reply = match &entry {
                Some(entry) => format!("@{} swapping to {}", event.author, entry),
                None => format!("@{} swapping", event.author),
            };
            effects.push(Effect::Reply(reply));
        }

        Outcome::Accepted
    }

    /// Refuse a trigger. The host is told why but never charged a violation.
    fn reject(
        &self,
        state: &mut ModerationState,
        user_key: &str,
        role: Role,
        reason: RejectionReason,
        event: &InboundEvent,
        effects: &mut Vec<Effect>,
    ) -> Outcome {
        if role == Role::Host {
            info!("Host trigger rejected: {}", reason);
            effects.push(Effect::Reply(format!("@{} swap rejected: {}", event.author, reason)));
            return Outcome::Rejected(reason);
        }
        self.charge_violation(state, user_key, reason, event, effects)
    }

    fn charge_violation(
        &self,
        state: &mut ModerationState,
        user_key: &str,
        reason: RejectionReason,
        event: &InboundEvent,
        effects: &mut Vec<Effect>,
    ) -> Outcome {
        let per_user = state.cooldowns.per_user_cooldown_seconds();
        let escalation = state
            .escalation
            .record_violation(user_key, reason, event.received_at, per_user);
        info!("Rejected trigger from {} ({}): {:?}", event.author, reason, escalation);

        let author = &event.author;
        match escalation {
            EscalationOutcome::StrikeRecorded(strikes) => {
                effects.push(Effect::Reply(format!(
                    "@{} swap rejected: {} (strike {})",
                    author, reason, strikes
                )));
                Outcome::Rejected(reason)
            }
            EscalationOutcome::TimeoutStarted { duration_seconds } => {
                effects.push(Effect::Reply(format!(
                    "@{} timed out for {}s ({})",
                    author, duration_seconds, reason
                )));
                Outcome::Escalated { reason, escalation }
            }
            EscalationOutcome::TimeoutExtended { duration_seconds } => {
                effects.push(Effect::Reply(format!(
                    "@{} timeout extended by {}s ({})",
                    author, duration_seconds, reason
                )));
                Outcome::Escalated { reason, escalation }
            }
            EscalationOutcome::BanTriggered => {
                state.banned.insert(user_key.to_string());
                effects.push(Effect::LogAction {
                    author: SYSTEM_AUTHOR.to_string(),
                    text: format!("banned {} after repeated violations", author),
                });
                effects.push(Effect::Reply(format!("@{} banned for repeated violations", author)));
                effects.push(Effect::BanRequest(user_key.to_string()));
                Outcome::Escalated { reason, escalation }
            }
            EscalationOutcome::AlreadyBanned => Outcome::Rejected(reason),
        }
    }

    fn apply_admin(
        &self,
        state: &mut ModerationState,
        command: AdminCommand,
        event: &InboundEvent,
        effects: &mut Vec<Effect>,
    ) -> Outcome {
        let now = event.received_at;

        match &command {
            AdminCommand::Ban(name) | AdminCommand::Unban(name) | AdminCommand::Timeout(name) => {
                let target = normalize(name);
                if target.is_empty() {
                    let error = CommandParseError::MissingArgument {
                        command: event.text.split_whitespace().next().unwrap_or_default().to_string(),
                        expected: "a user name",
                    };
                    warn!("Ignoring host command '{}': {}", event.text, error);
                    return Outcome::Invalid(error);
                }
                if target == state.host_key {
                    warn!("Refusing to apply '{}' to the host", event.text);
                    return Outcome::Ignored;
                }

                match &command {
                    AdminCommand::Ban(_) => {
                        state.banned.insert(target.clone());
                        info!("{} banned by host", target);
                        effects.push(Effect::BanRequest(target));
                    }
                    AdminCommand::Unban(_) => {
                        state.banned.remove(&target);
                        state.escalation.reset(&target);
                        info!("{} unbanned by host", target);
                        effects.push(Effect::UnbanRequest(target));
                    }
                    _ => {
                        let per_user = state.cooldowns.per_user_cooldown_seconds();
                        let duration = state.escalation.force_timeout(&target, now, per_user);
                        effects.push(Effect::Reply(format!("@{} timed out for {}s", name, duration)));
                    }
                }
            }
            AdminCommand::SetCooldown(seconds) => state.cooldowns.set_per_user_cooldown(*seconds),
            AdminCommand::SetGlobalCooldown(seconds) => state.cooldowns.set_global_cooldown(*seconds),
            AdminCommand::Lock(minutes) => {
                let ticket = state.cooldowns.set_lock(*minutes, now);
                self.schedule_unlock(state, ticket, now);
            }
            AdminCommand::Unlock => {
                if let Some(pending) = state.pending_unlock.take() {
                    pending.abort();
                }
                state.cooldowns.unlock();
            }
        }

        effects.push(Effect::LogAction {
            author: event.author.clone(),
            text: event.text.trim().to_string(),
        });
        Outcome::Admin(command)
    }

    /// Replace any pending auto-unlock with one for `ticket`
    fn schedule_unlock(&self, state: &mut ModerationState, ticket: LockTicket, now: DateTime<Utc>) {
        if let Some(pending) = state.pending_unlock.take() {
            pending.abort();
        }

        let expires_at = match ticket.expires_at {
            Some(expires_at) => expires_at,
            None => return,
        };
        let delay = expires_at.signed_duration_since(now).to_std().unwrap_or_default();
        let shared = Arc::clone(&self.state);
        let queues = Arc::clone(&self.queues);

        state.pending_unlock = Some(tokio::spawn(async move {
            sleep(delay).await;

            let mut state = shared.lock().await;
            if state.cooldowns.expire_lock(ticket.generation) {
                state.pending_unlock = None;
                info!("Lock expired, triggers unlocked");
                queues
                    .enqueue(Effect::LogAction {
                        author: SYSTEM_AUTHOR.to_string(),
                        text: "lock expired".to_string(),
                    })
                    .await;
            }
        }));
    }

    /// Swap in a new donor roster snapshot
    pub async fn replace_donors(&self, donors: HashSet<UserKey>) {
        let count = donors.len();
        self.state.lock().await.donors = Arc::new(donors);
        info!("Donor roster updated ({} donors)", count);
    }

    /// Swap in a new catalog snapshot
    pub async fn replace_catalog(&self, entries: Vec<String>) {
        let count = entries.len();
        self.state.lock().await.catalog = Arc::new(entries);
        info!("Catalog updated ({} entries)", count);
    }

    /// Report a result produced by the display plugin back to chat
    pub async fn record_plugin_result(&self, event: &PluginEvent) {
        info!("Plugin result for {}: {}", event.user, event.result);
        self.queues
            .enqueue_all(vec![
                Effect::LogAction {
                    author: event.user.clone(),
                    text: format!("swapped to {}", event.result),
                },
                Effect::Reply(format!("@{} swapped to {}", event.user, event.result)),
            ])
            .await;
    }

    pub async fn is_locked(&self) -> bool {
        self.state.lock().await.cooldowns.is_locked()
    }

    pub async fn is_banned(&self, user_key: &str) -> bool {
        self.state.lock().await.banned.contains(user_key)
    }

    /// Current ban list, sorted
    pub async fn banned_users(&self) -> Vec<UserKey> {
        let mut banned: Vec<UserKey> = self.state.lock().await.banned.iter().cloned().collect();
        banned.sort();
        banned
    }

    pub async fn snapshot(&self, now: DateTime<Utc>) -> EngineSnapshot {
        let state = self.state.lock().await;
        EngineSnapshot {
            locked: state.cooldowns.is_locked(),
            lock_expires_at: state.cooldowns.lock_state().expires_at,
            banned_users: state.banned.len(),
            donors: state.donors.len(),
            catalog_entries: state.catalog.len(),
            timed_out_users: state.escalation.timed_out_users(now),
            global_cooldown_seconds: state.cooldowns.global_cooldown_seconds(),
            per_user_cooldown_seconds: state.cooldowns.per_user_cooldown_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tokio::time;

    fn t(offset_seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 1, 12, 0, 0).unwrap() + Duration::seconds(offset_seconds)
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            host: "@StreamHost".to_string(),
            banned: Vec::new(),
            ..EngineSettings::default()
        }
    }

    async fn engine_with(settings: EngineSettings) -> ModerationEngine {
        let engine = ModerationEngine::new(settings, Arc::new(EffectQueues::new())).unwrap();
        engine.replace_donors(normalize_all(["Dana", "@Erin"])).await;
        engine
    }

    async fn engine() -> ModerationEngine {
        engine_with(settings()).await
    }

    async fn send(engine: &ModerationEngine, author: &str, text: &str, at: i64) -> Decision {
        engine.process(&InboundEvent::new(author, text, t(at))).await
    }

    fn action_lines(decision: &Decision) -> Vec<String> {
        decision
            .effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::LogAction { .. } => effect.log_line(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_empty_host_is_a_config_error() {
        let settings = EngineSettings {
            host: "@@".to_string(),
            ..EngineSettings::default()
        };
        assert!(matches!(
            ModerationEngine::new(settings, Arc::new(EffectQueues::new())),
            Err(ModerationError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_ordinary_chat_is_only_logged() {
        let engine = engine().await;
        let decision = send(&engine, "Olly", "hello everyone", 0).await;

        assert_eq!(decision.outcome, Outcome::Ignored);
        assert_eq!(
            decision.effects,
            vec![Effect::LogFull { author: "Olly".to_string(), text: "hello everyone".to_string() }]
        );
        assert_eq!(engine.queues().history.len().await, 1);
        assert!(engine.queues().actions.is_empty().await);
    }

    #[tokio::test]
    async fn test_donor_trigger_accepted_then_on_cooldown() {
        let engine = engine().await;

        let first = send(&engine, "Dana", "!SWAP", 0).await;
        assert!(first.is_accepted());
        assert_eq!(action_lines(&first), vec!["Dana: !swap".to_string()]);

        let second = send(&engine, "Dana", "!swap", 30).await;
        assert_eq!(second.outcome, Outcome::Rejected(RejectionReason::UserCooldown));

        assert!(send(&engine, "Dana", "!swap", 61).await.is_accepted());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_triggers_from_one_donor_accept_once() {
        let engine = engine().await;

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { send(&engine, "Dana", "!swap", 0).await })
            })
            .collect();

        let mut accepted = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_accepted() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn test_global_cooldown_applies_to_host_without_strike() {
        let engine = engine().await;
        assert!(send(&engine, "Dana", "!swap", 0).await.is_accepted());

        let decision = send(&engine, "StreamHost", "!swap", 2).await;
        assert_eq!(decision.outcome, Outcome::Rejected(RejectionReason::GlobalCooldown));
        assert!(engine.state.lock().await.escalation.state("streamhost").is_none());

        assert!(send(&engine, "StreamHost", "!swap", 5).await.is_accepted());
    }

    #[tokio::test]
    async fn test_catalog_resolution() {
        let engine = engine().await;
        engine
            .replace_catalog(vec!["Super Mario Bros".to_string(), "Mario Kart".to_string()])
            .await;

        let accepted = send(&engine, "Dana", "!swap mario", 0).await;
        assert!(accepted.is_accepted());
        assert_eq!(action_lines(&accepted), vec!["Dana: !swap Super Mario Bros".to_string()]);

        let rejected = send(&engine, "Erin", "!swap zelda", 10).await;
        assert_eq!(rejected.outcome, Outcome::Rejected(RejectionReason::NoMatch));
        assert!(engine.state.lock().await.cooldowns.last_user_trigger("erin").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_blocks_donors_and_expires_on_its_own() {
        let engine = engine().await;

        let lock = send(&engine, "StreamHost", "!lock 1", 0).await;
        assert_eq!(lock.outcome, Outcome::Admin(AdminCommand::Lock(Some(1))));
        assert!(engine.is_locked().await);

        let donor = send(&engine, "Dana", "!swap", 30).await;
        assert_eq!(donor.outcome, Outcome::Rejected(RejectionReason::Locked));

        let host = send(&engine, "StreamHost", "!swap", 31).await;
        assert!(host.is_accepted());

        time::sleep(time::Duration::from_secs(61)).await;
        assert!(!engine.is_locked().await);

        assert!(send(&engine, "Erin", "!swap", 61).await.is_accepted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_cancels_scheduled_unlock() {
        let engine = engine().await;

        send(&engine, "StreamHost", "!lock 1", 0).await;
        send(&engine, "StreamHost", "!unlock", 10).await;
        assert!(!engine.is_locked().await);
        send(&engine, "StreamHost", "!lock", 20).await;

        time::sleep(time::Duration::from_secs(120)).await;
        assert!(engine.is_locked().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_lock_replaces_pending_unlock() {
        let engine = engine().await;

        send(&engine, "StreamHost", "!lock 1", 0).await;
        send(&engine, "StreamHost", "!lock 5", 0).await;

        time::sleep(time::Duration::from_secs(61)).await;
        assert!(engine.is_locked().await);

        time::sleep(time::Duration::from_secs(240)).await;
        assert!(!engine.is_locked().await);
    }

    #[test_log::test(tokio::test)]
    async fn test_non_donor_strikes_lead_to_timeout() {
        let engine = engine().await;

        for at in 0..2 {
            let decision = send(&engine, "Olly", "!swap", at).await;
            assert_eq!(decision.outcome, Outcome::Rejected(RejectionReason::NotDonor));
        }

        let third = send(&engine, "Olly", "!swap", 2).await;
        assert_eq!(
            third.outcome,
            Outcome::Escalated {
                reason: RejectionReason::NotDonor,
                escalation: EscalationOutcome::TimeoutStarted { duration_seconds: 300 },
            }
        );
        assert!(third.effects.contains(&Effect::Reply("@Olly timed out for 300s (not a donor)".to_string())));

        let fourth = send(&engine, "Olly", "!swap", 3).await;
        assert_eq!(
            fourth.outcome,
            Outcome::Escalated {
                reason: RejectionReason::TimedOut,
                escalation: EscalationOutcome::TimeoutExtended { duration_seconds: 300 },
            }
        );
    }

    #[tokio::test]
    async fn test_repeat_offender_is_banned_once_and_then_dropped() {
        let mut settings = settings();
        settings.escalation = EscalationPolicy {
            strikes_before_timeout: 1,
            timeouts_before_ban: 2,
            timeout_multiplier: 5,
        };
        let engine = engine_with(settings).await;

        send(&engine, "Olly", "!swap", 0).await;
        let ban = send(&engine, "Olly", "!swap", 1).await;
        assert_eq!(
            ban.outcome,
            Outcome::Escalated {
                reason: RejectionReason::TimedOut,
                escalation: EscalationOutcome::BanTriggered,
            }
        );
        assert!(ban.effects.contains(&Effect::BanRequest("olly".to_string())));
        assert!(engine.is_banned("olly").await);

        let dropped = send(&engine, "Olly", "!swap", 2).await;
        assert_eq!(dropped.outcome, Outcome::Ignored);
        assert!(dropped.effects.is_empty());
    }

    #[tokio::test]
    async fn test_admin_ban_and_unban() {
        let engine = engine().await;

        let ban = send(&engine, "StreamHost", "!ban @Dana", 0).await;
        assert_eq!(ban.outcome, Outcome::Admin(AdminCommand::Ban("Dana".to_string())));
        assert!(ban.effects.contains(&Effect::BanRequest("dana".to_string())));
        assert_eq!(send(&engine, "Dana", "!swap", 1).await.outcome, Outcome::Ignored);

        let unban = send(&engine, "StreamHost", "!UNBAN dana", 2).await;
        assert!(unban.effects.contains(&Effect::UnbanRequest("dana".to_string())));
        assert!(send(&engine, "Dana", "!swap", 10).await.is_accepted());
    }

    #[tokio::test]
    async fn test_host_cannot_ban_self() {
        let engine = engine().await;
        let decision = send(&engine, "StreamHost", "!ban streamhost", 0).await;

        assert_eq!(decision.outcome, Outcome::Ignored);
        assert!(engine.banned_users().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_admin_command_changes_nothing() {
        let engine = engine().await;

        let decision = send(&engine, "StreamHost", "!cooldown soon", 0).await;
        assert!(matches!(decision.outcome, Outcome::Invalid(CommandParseError::InvalidInteger { .. })));
        assert_eq!(engine.snapshot(t(0)).await.per_user_cooldown_seconds, 60);
        assert!(engine.state.lock().await.escalation.state("streamhost").is_none());
    }

    #[tokio::test]
    async fn test_cooldown_commands_apply_to_next_evaluation() {
        let engine = engine().await;

        send(&engine, "StreamHost", "!cooldown -5", 0).await;
        send(&engine, "StreamHost", "!globalcooldown 0", 0).await;
        let snapshot = engine.snapshot(t(0)).await;
        assert_eq!(snapshot.per_user_cooldown_seconds, 0);
        assert_eq!(snapshot.global_cooldown_seconds, 0);

        assert!(send(&engine, "Dana", "!swap", 1).await.is_accepted());
        assert!(send(&engine, "Dana", "!swap", 1).await.is_accepted());
    }

    #[tokio::test]
    async fn test_admin_timeout() {
        let engine = engine().await;
        send(&engine, "StreamHost", "!timeout Dana", 0).await;

        let decision = send(&engine, "Dana", "!swap", 10).await;
        assert_eq!(decision.rejection_reason(), Some(RejectionReason::TimedOut));
        assert_eq!(engine.snapshot(t(10)).await.timed_out_users, 1);
    }

    #[tokio::test]
    async fn test_non_host_admin_text_is_chat() {
        let engine = engine().await;
        let decision = send(&engine, "Dana", "!ban Erin", 0).await;

        assert_eq!(decision.outcome, Outcome::Ignored);
        assert!(!engine.is_banned("erin").await);
    }

    #[tokio::test]
    async fn test_banned_messages_logged_when_enabled() {
        let mut settings = settings();
        settings.banned = vec!["Mallory".to_string()];
        settings.log_banned_messages = true;
        let engine = engine_with(settings).await;

        let decision = send(&engine, "Mallory", "!swap", 0).await;
        assert_eq!(decision.outcome, Outcome::Ignored);
        assert_eq!(decision.effects.len(), 1);
        assert!(engine.queues().actions.is_empty().await);
    }

    #[tokio::test]
    async fn test_acknowledgement_reply() {
        let mut settings = settings();
        settings.acknowledge_triggers = true;
        let engine = engine_with(settings).await;
        engine.replace_catalog(vec!["Tetris".to_string()]).await;

        let decision = send(&engine, "Dana", "!swap tet", 0).await;
        assert!(decision.effects.contains(&Effect::Reply("@Dana swapping to Tetris".to_string())));
    }

    #[tokio::test]
    async fn test_plugin_result_is_reported() {
        let engine = engine().await;
        engine
            .record_plugin_result(&PluginEvent {
                user: "Dana".to_string(),
                result: "Tetris".to_string(),
            })
            .await;

        let actions = engine.queues().actions.drain().await;
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1], Effect::Reply("@Dana swapped to Tetris".to_string()));
    }
}
