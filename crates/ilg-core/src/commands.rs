//! Operator commands and inline-button payloads, decoded once at the boundary.

use crate::domain::ChatId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Add,
    Remove,
    Status,
    /// `None` refreshes every pair of the caller.
    Refresh(Option<ChatId>),
    Cancel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandError {
    Unknown(String),
    InvalidArgument { command: &'static str, arg: String },
}

impl Command {
    /// Parse `/cmd@botname args`. Returns `None` for non-command text.
    pub fn parse(text: &str) -> Option<Result<Command, CommandError>> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }

        let mut parts = text.splitn(2, char::is_whitespace);
        let first = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        let name = first
            .trim_start_matches('/')
            .split('@')
            .next()
            .unwrap_or("")
            .to_lowercase();

        let cmd = match name.as_str() {
            "start" => Ok(Command::Start),
            "help" => Ok(Command::Help),
            "add" => Ok(Command::Add),
            "remove" => Ok(Command::Remove),
            "status" => Ok(Command::Status),
            "cancel" => Ok(Command::Cancel),
            "refresh" if rest.is_empty() => Ok(Command::Refresh(None)),
            "refresh" => match rest.parse::<i64>() {
                Ok(id) => Ok(Command::Refresh(Some(ChatId(id)))),
                Err(_) => Err(CommandError::InvalidArgument {
                    command: "refresh",
                    arg: rest.to_string(),
                }),
            },
            _ => Err(CommandError::Unknown(name)),
        };
        Some(cmd)
    }
}

/// Inline keyboard callback payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    Help,
    Add,
    RefreshAll,
    Refresh(ChatId),
}

impl CallbackAction {
    pub fn encode(self) -> String {
        match self {
            CallbackAction::Help => "help".to_string(),
            CallbackAction::Add => "add".to_string(),
            CallbackAction::RefreshAll => "refresh_all".to_string(),
            CallbackAction::Refresh(id) => format!("refresh:{}", id.0),
        }
    }

    /// Also accepts the older `update_<channel id>` form found on buttons that
    /// were sent before the `refresh:` prefix existed.
    pub fn decode(data: &str) -> Option<CallbackAction> {
        match data {
            "help" => return Some(CallbackAction::Help),
            "add" => return Some(CallbackAction::Add),
            "refresh_all" => return Some(CallbackAction::RefreshAll),
            _ => {}
        }

        let id = data
            .strip_prefix("refresh:")
            .or_else(|| data.strip_prefix("update_"))?;
        id.parse::<i64>()
            .ok()
            .map(|id| CallbackAction::Refresh(ChatId(id)))
    }
}
