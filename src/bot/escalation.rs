// src/bot/escalation.rs - Strike -> timeout -> ban state machine

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::cooldowns::seconds;
use crate::types::{EscalationOutcome, RejectionReason, UserKey};

/// Thresholds for escalating repeated violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    /// Strikes that open a timeout
    pub strikes_before_timeout: u32,
    /// Timeouts (including violations while timed out) that trigger a ban
    pub timeouts_before_ban: u32,
    /// Timeout length as a multiple of the per-user cooldown
    pub timeout_multiplier: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            strikes_before_timeout: 3,
            timeouts_before_ban: 3,
            timeout_multiplier: 5,
        }
    }
}

impl EscalationPolicy {
    pub fn timeout_seconds(&self, per_user_cooldown_seconds: u64) -> u64 {
        per_user_cooldown_seconds.saturating_mul(u64::from(self.timeout_multiplier))
    }
}

/// Escalation record for one user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalationState {
    pub strikes: u32,
    pub timeout_expiry: Option<DateTime<Utc>>,
    pub timeout_count: u32,
    pub ban_issued: bool,
    pub total_violations: u64,
    pub last_reason: Option<RejectionReason>,
}

impl EscalationState {
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        matches!(self.timeout_expiry, Some(expiry) if expiry > now)
    }
}

pub struct EscalationTracker {
    policy: EscalationPolicy,
    users: HashMap<UserKey, EscalationState>,
}

impl EscalationTracker {
    pub fn new(policy: EscalationPolicy) -> Self {
        Self {
            policy,
            users: HashMap::new(),
        }
    }

    pub fn policy(&self) -> EscalationPolicy {
        self.policy
    }

    /// Charge one violation to `user_key`.
    ///
    /// A violation while an unexpired timeout is open counts toward a ban;
    /// otherwise it is a strike, and enough strikes open a timeout. A timeout
    /// opened here only affects later events.
    pub fn record_violation(
        &mut self,
        user_key: &str,
        reason: RejectionReason,
        now: DateTime<Utc>,
        per_user_cooldown_seconds: u64,
    ) -> EscalationOutcome {
        let policy = self.policy;
        let timeout_seconds = policy.timeout_seconds(per_user_cooldown_seconds);
        let state = self.users.entry(user_key.to_string()).or_default();

        state.total_violations += 1;
        state.last_reason = Some(reason);

        if state.ban_issued {
            return EscalationOutcome::AlreadyBanned;
        }

        if state.is_timed_out(now) {
            state.timeout_count += 1;

            if state.timeout_count >= policy.timeouts_before_ban {
                state.ban_issued = true;
                warn!(
                    "{} reached {} timeouts ({}), requesting ban",
                    user_key, state.timeout_count, reason
                );
                return EscalationOutcome::BanTriggered;
            }

            state.timeout_expiry = Some(now + seconds(timeout_seconds));
            info!(
                "{} acted while timed out ({}), timeout extended by {}s",
                user_key, reason, timeout_seconds
            );
            return EscalationOutcome::TimeoutExtended {
                duration_seconds: timeout_seconds,
            };
        }

        state.strikes += 1;
        if state.strikes >= policy.strikes_before_timeout {
            state.strikes = 0;
            state.timeout_expiry = Some(now + seconds(timeout_seconds));
            state.timeout_count += 1;
            info!(
                "{} reached {} strikes ({}), timed out for {}s",
                user_key, policy.strikes_before_timeout, reason, timeout_seconds
            );
            return EscalationOutcome::TimeoutStarted {
                duration_seconds: timeout_seconds,
            };
        }

        info!("Strike {} for {} ({})", state.strikes, user_key, reason);
        EscalationOutcome::StrikeRecorded(state.strikes)
    }

    pub fn is_timed_out(&self, user_key: &str, now: DateTime<Utc>) -> bool {
        self.users
            .get(user_key)
            .map_or(false, |state| state.is_timed_out(now))
    }

    /// Open a timeout immediately (host `!timeout`). Returns the duration in seconds.
    pub fn force_timeout(&mut self, user_key: &str, now: DateTime<Utc>, per_user_cooldown_seconds: u64) -> u64 {
        let timeout_seconds = self.policy.timeout_seconds(per_user_cooldown_seconds);
        let state = self.users.entry(user_key.to_string()).or_default();
        state.strikes = 0;
        state.timeout_expiry = Some(now + seconds(timeout_seconds));
        state.timeout_count += 1;
        info!("{} timed out by host for {}s", user_key, timeout_seconds);
        timeout_seconds
    }

    /// Forget everything about a user (used on unban)
    pub fn reset(&mut self, user_key: &str) {
        self.users.remove(user_key);
    }

    pub fn state(&self, user_key: &str) -> Option<&EscalationState> {
        self.users.get(user_key)
    }

    /// Users with an unexpired timeout at `now`
    pub fn timed_out_users(&self, now: DateTime<Utc>) -> usize {
        self.users.values().filter(|state| state.is_timed_out(now)).count()
    }
}
