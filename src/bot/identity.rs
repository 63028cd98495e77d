// src/bot/identity.rs - Display name normalization and role classification

use std::collections::HashSet;

use crate::types::{Role, UserKey};

/// Normalize a display name (or any free text) into a comparable key.
///
/// Lowercases the input and keeps only `[a-z0-9]`. A leading `@`
/// disappears along with every other symbol, accented letters included.
/// Total and idempotent.
pub fn normalize(raw: &str) -> UserKey {
    raw.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Classify a normalized user key. Host wins over every other role.
pub fn classify(
    user_key: &str,
    host_key: &str,
    donors: &HashSet<UserKey>,
    banned: &HashSet<UserKey>,
) -> Role {
    if user_key == host_key {
        Role::Host
    } else if banned.contains(user_key) {
        Role::Banned
    } else if donors.contains(user_key) {
        Role::Donor
    } else {
        Role::Ordinary
    }
}

/// Normalize a whole roster of display names, dropping names that normalize to nothing
pub fn normalize_all<I, S>(names: I) -> HashSet<UserKey>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| normalize(name.as_ref()))
        .filter(|key| !key.is_empty())
        .collect()
}
