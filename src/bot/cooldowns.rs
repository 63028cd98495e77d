// src/bot/cooldowns.rs - Global/per-user cooldowns and the trigger lock

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use std::collections::HashMap;

use crate::types::{RejectionReason, Role, UserKey};

/// Lock on trigger commands for everyone but the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockState {
    pub locked: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Bumped on every lock/unlock so a stale auto-unlock can be recognised
    pub generation: u64,
}

/// Handle describing a freshly applied lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTicket {
    pub generation: u64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Cooldown and lock bookkeeping. Owned by the moderation engine and only
/// mutated while the engine's state lock is held.
#[derive(Debug, Clone)]
pub struct CooldownController {
    global_cooldown_seconds: u64,
    per_user_cooldown_seconds: u64,
    last_global_trigger: Option<DateTime<Utc>>,
    last_user_trigger: HashMap<UserKey, DateTime<Utc>>,
    lock: LockState,
}

impl CooldownController {
    pub fn new(global_cooldown_seconds: u64, per_user_cooldown_seconds: u64) -> Self {
        Self {
            global_cooldown_seconds,
            per_user_cooldown_seconds,
            last_global_trigger: None,
            last_user_trigger: HashMap::new(),
            lock: LockState::default(),
        }
    }

    pub fn global_cooldown_seconds(&self) -> u64 {
        self.global_cooldown_seconds
    }

    pub fn per_user_cooldown_seconds(&self) -> u64 {
        self.per_user_cooldown_seconds
    }

    /// Takes effect on the next evaluation
    pub fn set_global_cooldown(&mut self, seconds: u64) {
        self.global_cooldown_seconds = seconds;
        info!("Global cooldown set to {} seconds", seconds);
    }

    /// Takes effect on the next evaluation
    pub fn set_per_user_cooldown(&mut self, seconds: u64) {
        self.per_user_cooldown_seconds = seconds;
        info!("Per-user cooldown set to {} seconds", seconds);
    }

    /// Check whether `user_key` may trigger right now. First failing check wins:
    /// global cooldown (applies to the host too), then lock, then per-user cooldown.
    pub fn can_trigger(&self, user_key: &str, role: Role, now: DateTime<Utc>) -> Result<(), RejectionReason> {
        if let Some(last) = self.last_global_trigger {
            if now.signed_duration_since(last) < seconds(self.global_cooldown_seconds) {
                return Err(RejectionReason::GlobalCooldown);
            }
        }

        if role == Role::Host {
            return Ok(());
        }

        if self.lock.locked {
            return Err(RejectionReason::Locked);
        }

        if let Some(last) = self.last_user_trigger.get(user_key) {
            let elapsed = now.signed_duration_since(*last);
            if elapsed < seconds(self.per_user_cooldown_seconds) {
                debug!(
                    "{} is on cooldown for {} more seconds",
                    user_key,
                    self.per_user_cooldown_seconds as i64 - elapsed.num_seconds()
                );
                return Err(RejectionReason::UserCooldown);
            }
        }

        Ok(())
    }

    /// Record an accepted trigger. Timestamps never move backwards, so a
    /// replayed older event cannot shorten a cooldown.
    pub fn record(&mut self, user_key: &str, now: DateTime<Utc>) {
        self.last_global_trigger = Some(match self.last_global_trigger {
            Some(last) if last > now => last,
            _ => now,
        });

        self.last_user_trigger
            .entry(user_key.to_string())
            .and_modify(|last| {
                if now > *last {
                    *last = now;
                }
            })
            .or_insert(now);
    }

    pub fn last_user_trigger(&self, user_key: &str) -> Option<DateTime<Utc>> {
        self.last_user_trigger.get(user_key).copied()
    }

    pub fn lock_state(&self) -> &LockState {
        &self.lock
    }

    pub fn is_locked(&self) -> bool {
        self.lock.locked
    }

    /// Lock triggers. A timed lock supersedes any earlier scheduled unlock;
    /// the caller schedules the wake-up from the returned ticket.
    pub fn set_lock(&mut self, duration_minutes: Option<u64>, now: DateTime<Utc>) -> LockTicket {
        self.lock.generation += 1;
        self.lock.locked = true;
        self.lock.expires_at = duration_minutes.map(|minutes| now + minutes_duration(minutes));

        match self.lock.expires_at {
            Some(expiry) => info!("Triggers locked until {}", expiry),
            None => info!("Triggers locked until further notice"),
        }

        LockTicket {
            generation: self.lock.generation,
            expires_at: self.lock.expires_at,
        }
    }

    /// Remove the lock. Idempotent.
    pub fn unlock(&mut self) {
        self.lock.generation += 1;
        if self.lock.locked {
            info!("Triggers unlocked");
        }
        self.lock.locked = false;
        self.lock.expires_at = None;
    }

    /// Apply a scheduled auto-unlock. Returns false when the ticket is stale
    /// because the lock was replaced or lifted in the meantime.
    pub fn expire_lock(&mut self, generation: u64) -> bool {
        if !self.lock.locked || self.lock.generation != generation {
            debug!("Ignoring stale auto-unlock (generation {})", generation);
            return false;
        }
        self.unlock();
        true
    }
}

/// Longest duration the engine will schedule; larger inputs are clamped
pub(crate) const MAX_DURATION_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

pub(crate) fn seconds(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_DURATION_SECONDS) as i64)
}

fn minutes_duration(value: u64) -> Duration {
    seconds(value.saturating_mul(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(offset_seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 1, 12, 0, 0).unwrap() + Duration::seconds(offset_seconds)
    }

    #[test]
    fn test_user_cooldown_after_record() {
        let mut controller = CooldownController::new(5, 60);
        assert!(controller.can_trigger("dana", Role::Donor, t(0)).is_ok());

        controller.record("dana", t(0));

        assert_eq!(controller.can_trigger("dana", Role::Donor, t(3)), Err(RejectionReason::GlobalCooldown));
        assert_eq!(controller.can_trigger("dana", Role::Donor, t(30)), Err(RejectionReason::UserCooldown));
        assert_eq!(controller.can_trigger("dana", Role::Donor, t(59)), Err(RejectionReason::UserCooldown));
        assert!(controller.can_trigger("dana", Role::Donor, t(60)).is_ok());
        assert!(controller.can_trigger("erin", Role::Donor, t(10)).is_ok());
    }

    #[test]
    fn test_global_cooldown_applies_to_host() {
        let mut controller = CooldownController::new(5, 60);
        controller.record("dana", t(0));

        assert_eq!(controller.can_trigger("host", Role::Host, t(2)), Err(RejectionReason::GlobalCooldown));
        assert!(controller.can_trigger("host", Role::Host, t(5)).is_ok());
    }

    #[test]
    fn test_host_bypasses_user_cooldown_and_lock() {
        let mut controller = CooldownController::new(0, 60);
        controller.record("host", t(0));
        controller.set_lock(None, t(0));

        assert!(controller.can_trigger("host", Role::Host, t(1)).is_ok());
        assert_eq!(controller.can_trigger("dana", Role::Donor, t(1)), Err(RejectionReason::Locked));
    }

    #[test]
    fn test_lock_checked_before_user_cooldown() {
        let mut controller = CooldownController::new(0, 60);
        controller.record("dana", t(0));
        controller.set_lock(None, t(0));
        assert_eq!(controller.can_trigger("dana", Role::Donor, t(1)), Err(RejectionReason::Locked));
    }

    #[test]
    fn test_record_is_monotonic() {
        let mut controller = CooldownController::new(0, 60);
        controller.record("dana", t(100));
        controller.record("dana", t(50));
        assert_eq!(controller.last_user_trigger("dana"), Some(t(100)));
    }

    #[test]
    fn test_lock_without_duration_persists() {
        let mut controller = CooldownController::new(0, 0);
        let ticket = controller.set_lock(None, t(0));
        assert_eq!(ticket.expires_at, None);
        assert_eq!(controller.can_trigger("dana", Role::Donor, t(86_400)), Err(RejectionReason::Locked));

        controller.unlock();
        controller.unlock();
        assert!(!controller.is_locked());
    }

    #[test]
    fn test_stale_auto_unlock_is_ignored() {
        let mut controller = CooldownController::new(0, 0);
        let first = controller.set_lock(Some(1), t(0));
        assert_eq!(first.expires_at, Some(t(60)));

        let second = controller.set_lock(Some(10), t(30));
        assert!(!controller.expire_lock(first.generation));
        assert!(controller.is_locked());

        assert!(controller.expire_lock(second.generation));
        assert!(!controller.is_locked());
    }

    #[test]
    fn test_cooldown_change_applies_to_next_evaluation() {
        let mut controller = CooldownController::new(0, 60);
        controller.record("dana", t(0));
        assert_eq!(controller.can_trigger("dana", Role::Donor, t(20)), Err(RejectionReason::UserCooldown));

        controller.set_per_user_cooldown(10);
        assert!(controller.can_trigger("dana", Role::Donor, t(20)).is_ok());
    }
}
