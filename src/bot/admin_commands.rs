// src/bot/admin_commands.rs - Host-only administrative command grammar

use crate::types::{AdminCommand, CommandParseError};

/// Parse `text` as a host administrative command.
///
/// Returns `Ok(None)` when the text is not an admin command at all, so the
/// caller can carry on treating it as chat or a trigger. Command names are
/// case-insensitive and must match a whole token (`!lockdown` is not `!lock`).
pub fn parse_admin_command(text: &str, prefix: &str) -> Result<Option<AdminCommand>, CommandParseError> {
    let mut parts = text.split_whitespace();
    let head = match parts.next() {
        Some(head) => head.to_lowercase(),
        None => return Ok(None),
    };
    let name = match head.strip_prefix(&prefix.to_lowercase()) {
        Some(name) if !prefix.is_empty() => name.to_string(),
        _ => return Ok(None),
    };
    let args: Vec<&str> = parts.collect();
    let command = format!("{}{}", prefix, name);

    let parsed = match name.as_str() {
        "ban" => AdminCommand::Ban(single_user(&command, &args)?),
        "unban" => AdminCommand::Unban(single_user(&command, &args)?),
        "timeout" => AdminCommand::Timeout(single_user(&command, &args)?),
        "cooldown" => AdminCommand::SetCooldown(single_integer(&command, &args, "a number of seconds")?),
        "globalcooldown" => {
            AdminCommand::SetGlobalCooldown(single_integer(&command, &args, "a number of seconds")?)
        }
        "lock" => match args.as_slice() {
            [] => AdminCommand::Lock(None),
            [minutes] => AdminCommand::Lock(Some(clamped_integer(&command, minutes)?)),
            _ => return Err(too_many(&command, 1)),
        },
        "unlock" => {
            if !args.is_empty() {
                return Err(too_many(&command, 0));
            }
            AdminCommand::Unlock
        }
        _ => return Ok(None),
    };

    Ok(Some(parsed))
}

fn single_user(command: &str, args: &[&str]) -> Result<String, CommandParseError> {
    match args {
        [user] => {
            let user = user.trim_start_matches('@');
            if user.is_empty() {
                Err(CommandParseError::MissingArgument {
                    command: command.to_string(),
                    expected: "a user name",
                })
            } else {
                Ok(user.to_string())
            }
        }
        [] => Err(CommandParseError::MissingArgument {
            command: command.to_string(),
            expected: "a user name",
        }),
        _ => Err(too_many(command, 1)),
    }
}

fn single_integer(command: &str, args: &[&str], expected: &'static str) -> Result<u64, CommandParseError> {
    match args {
        [value] => clamped_integer(command, value),
        [] => Err(CommandParseError::MissingArgument {
            command: command.to_string(),
            expected,
        }),
        _ => Err(too_many(command, 1)),
    }
}

/// Integers below zero clamp to zero
fn clamped_integer(command: &str, value: &str) -> Result<u64, CommandParseError> {
    value
        .parse::<i64>()
        .map(|parsed| parsed.max(0) as u64)
        .map_err(|_| CommandParseError::InvalidInteger {
            command: command.to_string(),
            value: value.to_string(),
        })
}

fn too_many(command: &str, max: usize) -> CommandParseError {
    CommandParseError::TooManyArguments {
        command: command.to_string(),
        max,
    }
}
