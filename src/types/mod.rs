// src/types/mod.rs - Shared data model for the moderation engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Normalized identity string (see `bot::identity::normalize`)
pub type UserKey = String;

/// One live chat message as delivered by a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub platform: String,
    pub author: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(author: impl Into<String>, text: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            platform: "youtube".to_string(),
            author: author.into(),
            text: text.into(),
            received_at,
        }
    }
}

/// Role of the author of an event, derived per event and never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Host,
    Donor,
    Ordinary,
    Banned,
}

/// Why a trigger attempt was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    GlobalCooldown,
    Locked,
    UserCooldown,
    NotDonor,
    NoMatch,
    TimedOut,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectionReason::GlobalCooldown => "global cooldown",
            RejectionReason::Locked => "locked",
            RejectionReason::UserCooldown => "user cooldown",
            RejectionReason::NotDonor => "not a donor",
            RejectionReason::NoMatch => "no match",
            RejectionReason::TimedOut => "timed out",
        };
        f.write_str(text)
    }
}

/// Result of charging a violation to a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationOutcome {
    StrikeRecorded(u32),
    TimeoutStarted { duration_seconds: u64 },
    TimeoutExtended { duration_seconds: u64 },
    BanTriggered,
    /// The ban was already requested by an earlier violation
    AlreadyBanned,
}

impl EscalationOutcome {
    /// Whether this outcome went past a plain strike
    pub fn is_escalation(&self) -> bool {
        !matches!(self, EscalationOutcome::StrikeRecorded(_) | EscalationOutcome::AlreadyBanned)
    }
}

/// Host-only administrative commands, parsed once before dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminCommand {
    Ban(String),
    Unban(String),
    SetCooldown(u64),
    SetGlobalCooldown(u64),
    Lock(Option<u64>),
    Unlock,
    Timeout(String),
}

/// Side effects produced by the engine, handed verbatim to external sinks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    LogFull { author: String, text: String },
    LogAction { author: String, text: String },
    Reply(String),
    BanRequest(UserKey),
    UnbanRequest(UserKey),
}

impl Effect {
    /// Line written by the file sinks for log effects
    pub fn log_line(&self) -> Option<String> {
        match self {
            Effect::LogFull { author, text } | Effect::LogAction { author, text } => {
                Some(format!("{}: {}", author, text))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A trigger command was accepted
    Accepted,
    /// A trigger was refused; a strike may have been charged
    Rejected(RejectionReason),
    /// A trigger was refused and the violation opened, extended or escalated a timeout
    Escalated { reason: RejectionReason, escalation: EscalationOutcome },
    /// A host administrative command was applied
    Admin(AdminCommand),
    /// A host administrative command had malformed arguments
    Invalid(CommandParseError),
    /// Ordinary chat, or a dropped event from a banned user
    Ignored,
}

/// Per-event decision, created fresh for every event and never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub outcome: Outcome,
    pub effects: Vec<Effect>,
}

impl Decision {
    pub fn new(outcome: Outcome, effects: Vec<Effect>) -> Self {
        Self { outcome, effects }
    }

    pub fn is_accepted(&self) -> bool {
        self.outcome == Outcome::Accepted
    }

    /// Rejection reason for rejected or escalated triggers
    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        match &self.outcome {
            Outcome::Rejected(reason) => Some(*reason),
            Outcome::Escalated { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Malformed administrative command arguments
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("{command} requires {expected}")]
    MissingArgument { command: String, expected: &'static str },

    #[error("{command} expects an integer, got '{value}'")]
    InvalidInteger { command: String, value: String },

    #[error("{command} takes at most {max} argument(s)")]
    TooManyArguments { command: String, max: usize },
}

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("invalid command: {0}")]
    Validation(#[from] CommandParseError),

    #[error("{collaborator} failed: {message}")]
    Collaborator { collaborator: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl ModerationError {
    pub fn collaborator(collaborator: &str, error: impl fmt::Display) -> Self {
        ModerationError::Collaborator {
            collaborator: collaborator.to_string(),
            message: error.to_string(),
        }
    }
}

pub type ModerationResult<T> = Result<T, ModerationError>;
